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

//! Read-mostly record cache with secondary indexes.
//!
//! Indexes are pure key-extraction functions registered when the cache is
//! built. Lookups return `Arc` snapshots; a record replaced after a lookup
//! does not change what the caller already holds.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::error;

use crate::error::{RegistrarError, Result};
use crate::model::{object_key, Resource};

/// Extracts zero or more index keys from a record.
pub type IndexFunc<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// Outcome of a lookup that expects at most one match.
#[derive(Debug)]
pub enum Match<T> {
    /// Nothing matched.
    None,
    /// Exactly one record matched.
    One(Arc<T>),
    /// Several records share the key.
    Ambiguous(Vec<Arc<T>>),
}

impl<T> Match<T> {
    /// The single match, treating ambiguity as absence.
    pub fn unique(self) -> Option<Arc<T>> {
        match self {
            Match::One(found) => Some(found),
            Match::None | Match::Ambiguous(_) => None,
        }
    }
}

struct CacheInner<T> {
    objects: HashMap<String, Arc<T>>,
    indices: HashMap<&'static str, HashMap<String, BTreeSet<String>>>,
}

/// Concurrent cache of one record kind.
pub struct IndexedCache<T: Resource> {
    inner: Arc<RwLock<CacheInner<T>>>,
    indexers: Arc<Vec<(&'static str, IndexFunc<T>)>>,
}

impl<T: Resource> Clone for IndexedCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            indexers: Arc::clone(&self.indexers),
        }
    }
}

impl<T: Resource> fmt::Debug for IndexedCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.indexers.iter().map(|(name, _)| *name).collect();
        f.debug_struct("IndexedCache")
            .field("kind", &T::KIND)
            .field("len", &self.len())
            .field("indexes", &names)
            .finish()
    }
}

/// Builder for [`IndexedCache`].
pub struct IndexedCacheBuilder<T: Resource> {
    indexers: Vec<(&'static str, IndexFunc<T>)>,
}

impl<T: Resource> IndexedCacheBuilder<T> {
    /// Register a named index.
    pub fn index<F>(mut self, name: &'static str, func: F) -> Self
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        self.indexers.push((name, Arc::new(func)));
        self
    }

    /// Build the cache.
    pub fn build(self) -> IndexedCache<T> {
        let indices = self
            .indexers
            .iter()
            .map(|(name, _)| (*name, HashMap::new()))
            .collect();
        IndexedCache {
            inner: Arc::new(RwLock::new(CacheInner {
                objects: HashMap::new(),
                indices,
            })),
            indexers: Arc::new(self.indexers),
        }
    }
}

impl<T: Resource> IndexedCache<T> {
    /// Start building a cache.
    pub fn builder() -> IndexedCacheBuilder<T> {
        IndexedCacheBuilder {
            indexers: Vec::new(),
        }
    }

    /// Get a record by namespace and name.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        self.inner
            .read()
            .objects
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// All records whose index function produced `key`.
    ///
    /// Fails only when `index` was never registered.
    pub fn get_by_index(&self, index: &str, key: &str) -> Result<Vec<Arc<T>>> {
        let inner = self.inner.read();
        let entries = inner.indices.get(index).ok_or_else(|| {
            RegistrarError::store(format!("{} index {index} does not exist", T::KIND))
        })?;
        Ok(entries
            .get(key)
            .map(|keys| {
                keys.iter()
                    .filter_map(|object| inner.objects.get(object).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Look up a record expected to be unique under `key`.
    ///
    /// Ambiguous matches are logged here so callers can downgrade them to
    /// their own not-found error.
    pub fn find_unique(&self, index: &str, key: &str) -> Result<Match<T>> {
        let mut found = self.get_by_index(index, key)?;
        Ok(match found.len() {
            0 => Match::None,
            1 => Match::One(found.remove(0)),
            _ => {
                let names: Vec<String> = found.iter().map(|o| o.metadata().key()).collect();
                error!(
                    kind = T::KIND,
                    index,
                    matches = ?names,
                    "Multiple records share the same identity key"
                );
                Match::Ambiguous(found)
            }
        })
    }

    /// Insert or replace a record, reindexing it.
    pub fn upsert(&self, object: T) -> Arc<T> {
        let key = object.metadata().key();
        let object = Arc::new(object);
        let mut inner = self.inner.write();
        if let Some(previous) = inner.objects.remove(&key) {
            self.unindex(&mut inner, &key, &previous);
        }
        for (name, func) in self.indexers.iter() {
            let index = inner.indices.entry(*name).or_default();
            for value in func(&object) {
                index.entry(value).or_default().insert(key.clone());
            }
        }
        inner.objects.insert(key, Arc::clone(&object));
        object
    }

    /// Remove a record.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        let key = object_key(namespace, name);
        let mut inner = self.inner.write();
        let previous = inner.objects.remove(&key)?;
        self.unindex(&mut inner, &key, &previous);
        Some(previous)
    }

    /// Snapshot of every record.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.inner.read().objects.values().cloned().collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unindex(&self, inner: &mut CacheInner<T>, key: &str, object: &T) {
        for (name, func) in self.indexers.iter() {
            let Some(index) = inner.indices.get_mut(name) else {
                continue;
            };
            for value in func(object) {
                if let Some(keys) = index.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }
    }
}
