// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Variable expansion for configuration values.
//!
//! Handles `${VAR}` references in configuration strings, resolved from the
//! process environment.

use crate::error::Result;

/// Expand variables in a string.
///
/// Variables are in the format `${VARIABLE_NAME}` and resolve to the
/// environment variable of the same name. `${HOME}` and `${TEMP}` fall back
/// to the platform home and temporary directories when unset.
///
/// Unknown variables are left unchanged.
///
/// # Examples
///
/// ```
/// use machine_registrar::config::expand_variables;
///
/// let result = expand_variables("/srv/${DEFINITELY_UNSET_VARIABLE}/snapshot.json").unwrap();
/// assert_eq!(result, "/srv/${DEFINITELY_UNSET_VARIABLE}/snapshot.json");
/// ```
pub fn expand_variables(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let absolute_start = start + var_start;

        let Some(var_end) = result[absolute_start..].find('}') else {
            break;
        };
        let absolute_end = absolute_start + var_end;
        let var_name = &result[absolute_start + 2..absolute_end];

        match get_variable_value(var_name) {
            Some(value) => {
                result.replace_range(absolute_start..absolute_end + 1, &value);
                start = absolute_start + value.len();
            }
            None => start = absolute_end + 1,
        }
    }

    Ok(result)
}

fn get_variable_value(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    if let Ok(value) = std::env::var(name) {
        return Some(value);
    }
    match name {
        "HOME" => dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
        "TEMP" | "TMP" | "TMPDIR" => Some(std::env::temp_dir().to_string_lossy().into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_no_variables() {
        let result = expand_variables("0.0.0.0:8443").unwrap();
        assert_eq!(result, "0.0.0.0:8443");
    }

    #[test]
    fn test_expand_single_variable() {
        // SAFETY: This is a test, no other threads are accessing this variable
        unsafe {
            std::env::set_var("REGISTRAR_TEST_PORT_7731", "9443");
        }
        let result = expand_variables("0.0.0.0:${REGISTRAR_TEST_PORT_7731}").unwrap();
        assert_eq!(result, "0.0.0.0:9443");
        unsafe {
            std::env::remove_var("REGISTRAR_TEST_PORT_7731");
        }
    }

    #[test]
    fn test_expand_multiple_variables() {
        // SAFETY: This is a test, no other threads are accessing these variables
        unsafe {
            std::env::set_var("REGISTRAR_TEST_A_7731", "aaa");
            std::env::set_var("REGISTRAR_TEST_B_7731", "bbb");
        }
        let result = expand_variables("${REGISTRAR_TEST_A_7731}-${REGISTRAR_TEST_B_7731}").unwrap();
        assert_eq!(result, "aaa-bbb");
        unsafe {
            std::env::remove_var("REGISTRAR_TEST_A_7731");
            std::env::remove_var("REGISTRAR_TEST_B_7731");
        }
    }

    #[test]
    fn test_expand_unknown_variable() {
        let result = expand_variables("${DEFINITELY_NOT_SET_XYZ123}").unwrap();
        assert_eq!(result, "${DEFINITELY_NOT_SET_XYZ123}");
    }

    #[test]
    fn test_expand_unclosed_brace() {
        let result = expand_variables("${UNCLOSED").unwrap();
        assert_eq!(result, "${UNCLOSED");
    }

    #[test]
    fn test_expand_temp() {
        let result = expand_variables("${TEMP}").unwrap();
        assert!(!result.is_empty());
        assert!(!result.contains("${"));
    }
}
