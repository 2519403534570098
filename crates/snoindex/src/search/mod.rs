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

//! Search engine abstraction.
//!
//! Documents carry two reverse-link fields: `embedded_uuids` (records whose
//! content is embedded in the document) and `linked_uuids` (records the
//! document links to by name). They are how related records are found.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::Item;
use crate::retry::{wait_until, RetryPolicy};
use crate::Result;

pub mod memory;
pub mod opensearch;

pub use memory::InMemorySearch;
pub use opensearch::{Opensearch, OpensearchProps};

/// Result of a version-gated write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    /// A document with an equal or newer version is already stored.
    Conflict,
}

/// A stored document as returned by [`SearchIndex::all_documents`].
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedDocument {
    pub index: String,
    pub uuid: String,
    pub version: u64,
    pub source: Value,
}

/// Documents embedding any of `updated` or linking any of `renamed`.
pub fn related_uuids_query(updated: &[String], renamed: &[String]) -> Value {
    json!({
        "query": {
            "bool": {
                "should": [
                    {"terms": {"embedded_uuids": updated}},
                    {"terms": {"linked_uuids": renamed}},
                ],
            },
        },
        "_source": false,
    })
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index (or alias) that related-uuid searches and refreshes target.
    fn resources_index(&self) -> Option<&str>;

    /// Write `item` unless a document with version >= `item.version` exists.
    async fn index_item(&self, item: &Item) -> Result<IndexOutcome>;

    /// Write all items in one request. Per-item outcomes are not reported.
    async fn bulk_index_items(&self, items: &[Item]) -> Result<()>;

    /// Remove copies of `uuid` stored under any index other than `keep_index`.
    async fn delete_from_other_indices(&self, uuid: &str, keep_index: &str) -> Result<()>;

    async fn refresh_resources_index(&self) -> Result<()>;

    /// Unbounded search for related document ids, without refreshing first.
    async fn search_related(&self, updated: &[String], renamed: &[String]) -> Result<Vec<String>>;

    async fn resources_index_exists(&self) -> Result<bool>;

    /// Every searchable document.
    async fn all_documents(&self) -> Result<Vec<IndexedDocument>>;

    /// Refresh, then return ids of documents related to the given uuids.
    async fn get_related_uuids(&self, updated: &[String], renamed: &[String]) -> Result<Vec<String>> {
        if updated.is_empty() && renamed.is_empty() {
            return Ok(Vec::new());
        }
        self.refresh_resources_index().await?;
        self.search_related(updated, renamed).await
    }

    async fn wait_for_resources_index_to_exist(&self, policy: &RetryPolicy) -> Result<()> {
        let Some(index) = self.resources_index() else {
            return Ok(());
        };
        let what = format!("resources index {}", index);
        wait_until(policy, &what, || self.resources_index_exists()).await?;
        Ok(())
    }
}
