// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Machine name templating.
//!
//! Templates reference values in the SMBIOS map with `${a/b/c}` paths, for
//! example `${System Information/Serial Number}`. The rendered string is then
//! sanitized into a valid name prefix.
//!
//! # Examples
//!
//! ```
//! use machine_registrar::naming::build_name;
//! use serde_json::json;
//!
//! let smbios = json!({"System Information": {"Manufacturer": "Dell Inc."}});
//! let name = build_name(smbios.as_object().unwrap(), "m-${System Information/Manufacturer}-");
//! assert_eq!(name, "m-dell-inc-");
//! ```

use serde_json::Value;

use crate::model::GenericMap;

/// Name template used when a registration ticket does not set one.
pub const DEFAULT_MACHINE_NAME: &str = "m-${System Information/Manufacturer}-${System Information/Product Name}-${System Information/Serial Number}-";

/// Longest prefix handed to the store, leaving room for a generated suffix.
pub const MAX_NAME_PREFIX_LEN: usize = 58;

/// Render `template` against `data` and sanitize the result.
///
/// String values found at a `${path}` are substituted; missing or non-string
/// values render as nothing. An unterminated `${` is copied verbatim along
/// with the rest of the template.
pub fn build_name(data: &GenericMap, template: &str) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let end = start + len;
        rendered.push_str(&rest[..start]);
        if let Some(Value::String(value)) = lookup(data, &rest[start + 2..end]) {
            rendered.push_str(value);
        }
        rest = &rest[end + 1..];
    }
    rendered.push_str(rest);

    sanitize(&rendered)
}

fn lookup<'a>(data: &'a GenericMap, path: &str) -> Option<&'a Value> {
    let mut keys = path.split('/');
    let mut current = data.get(keys.next()?)?;
    for key in keys {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn sanitize(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len() + 1);
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name.insert(0, 'm');
    }
    name.truncate(MAX_NAME_PREFIX_LEN);
    name.make_ascii_lowercase();
    name
}
