// Copyright 2025 Snoindex Project
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

//! In-process search engine with OpenSearch-like visibility: writes are only
//! searchable after a refresh, and versions are external and strictly
//! increasing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{IndexOutcome, IndexedDocument, SearchIndex};
use crate::domain::Item;
use crate::{Result, SnoindexError};

#[derive(Clone, Debug)]
struct Doc {
    source: Value,
    version: u64,
}

#[derive(Default)]
struct State {
    indices: BTreeSet<String>,
    // keyed by (index, uuid)
    live: BTreeMap<(String, String), Doc>,
    searchable: BTreeMap<(String, String), Doc>,
}

impl State {
    fn write(&mut self, item: &Item) -> IndexOutcome {
        let key = (item.index.clone(), item.uuid.clone());
        if let Some(existing) = self.live.get(&key) {
            if existing.version >= item.version {
                return IndexOutcome::Conflict;
            }
        }
        self.indices.insert(item.index.clone());
        self.live.insert(
            key,
            Doc {
                source: item.data.clone(),
                version: item.version,
            },
        );
        IndexOutcome::Indexed
    }
}

/// The resources index acts as an alias over every index it holds.
#[derive(Default)]
pub struct InMemorySearch {
    resources_index: Option<String>,
    state: Mutex<State>,
    unavailable: AtomicBool,
}

fn field_intersects(source: &Value, field: &str, wanted: &BTreeSet<&str>) -> bool {
    source
        .get(field)
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str())
                .any(|v| wanted.contains(v))
        })
        .unwrap_or(false)
}

impl InMemorySearch {
    pub fn new(resources_index: Option<String>) -> Self {
        Self {
            resources_index,
            ..Self::default()
        }
    }

    /// Create the resources index so readiness checks pass.
    pub fn create_resources_index(&self) {
        if let Some(index) = &self.resources_index {
            self.state.lock().indices.insert(index.clone());
        }
    }

    /// Make every call fail with a transient error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remove every document and index.
    pub fn clear(&self) {
        *self.state.lock() = State::default();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SnoindexError::Search("search engine unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemorySearch {
    fn resources_index(&self) -> Option<&str> {
        self.resources_index.as_deref()
    }

    async fn index_item(&self, item: &Item) -> Result<IndexOutcome> {
        self.check_available()?;
        Ok(self.state.lock().write(item))
    }

    async fn bulk_index_items(&self, items: &[Item]) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        for item in items {
            state.write(item);
        }
        Ok(())
    }

    async fn delete_from_other_indices(&self, uuid: &str, keep_index: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        state
            .live
            .retain(|(index, id), _| id != uuid || index == keep_index);
        state
            .searchable
            .retain(|(index, id), _| id != uuid || index == keep_index);
        Ok(())
    }

    async fn refresh_resources_index(&self) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.searchable = state.live.clone();
        Ok(())
    }

    async fn search_related(&self, updated: &[String], renamed: &[String]) -> Result<Vec<String>> {
        self.check_available()?;
        let updated: BTreeSet<&str> = updated.iter().map(String::as_str).collect();
        let renamed: BTreeSet<&str> = renamed.iter().map(String::as_str).collect();
        let state = self.state.lock();
        Ok(state
            .searchable
            .iter()
            .filter(|(_, doc)| {
                field_intersects(&doc.source, "embedded_uuids", &updated)
                    || field_intersects(&doc.source, "linked_uuids", &renamed)
            })
            .map(|((_, uuid), _)| uuid.clone())
            .collect())
    }

    async fn resources_index_exists(&self) -> Result<bool> {
        self.check_available()?;
        match &self.resources_index {
            Some(index) => Ok(self.state.lock().indices.contains(index)),
            None => Ok(true),
        }
    }

    async fn all_documents(&self) -> Result<Vec<IndexedDocument>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .searchable
            .iter()
            .map(|((index, uuid), doc)| IndexedDocument {
                index: index.clone(),
                uuid: uuid.clone(),
                version: doc.version,
                source: doc.source.clone(),
            })
            .collect())
    }
}
