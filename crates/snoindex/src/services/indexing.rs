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

//! Consume invalidation notices and refresh the search index.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{InboundMessage, Item};
use crate::queue::MessageQueue;
use crate::remote::ContentStore;
use crate::retry::RetryPolicy;
use crate::search::{IndexOutcome, SearchIndex};
use crate::services::poller::{MessageHandler, ProcessingMode};
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexingProps {
    /// Remove copies of a document stored under another index before writing.
    pub delete_stale_copies: bool,
    /// Concurrent content-store fetches in bulk mode.
    pub fetch_concurrency: usize,
}

impl Default for IndexingProps {
    fn default() -> Self {
        Self {
            delete_stale_copies: false,
            fetch_concurrency: 1,
        }
    }
}

async fn wait_for_dependencies(
    invalidation_queue: &dyn MessageQueue,
    search: &dyn SearchIndex,
    portal: &dyn ContentStore,
    policy: &RetryPolicy,
) -> Result<()> {
    invalidation_queue.wait_for_queue_to_exist(policy).await?;
    search.wait_for_resources_index_to_exist(policy).await?;
    portal.wait_for_portal_connection(policy).await?;
    portal.wait_for_access_key_to_exist(policy).await?;
    tracing::info!(
        invalidation_queue = invalidation_queue.name(),
        "indexing: dependencies ready"
    );
    Ok(())
}

/// One notice at a time, one version-gated write per record.
pub struct IndexingService {
    portal: Arc<dyn ContentStore>,
    search: Arc<dyn SearchIndex>,
    props: IndexingProps,
}

impl IndexingService {
    pub fn new(
        portal: Arc<dyn ContentStore>,
        search: Arc<dyn SearchIndex>,
        props: IndexingProps,
    ) -> Self {
        Self {
            portal,
            search,
            props,
        }
    }

    pub async fn wait_until_ready(
        &self,
        invalidation_queue: &dyn MessageQueue,
        policy: &RetryPolicy,
    ) -> Result<()> {
        wait_for_dependencies(
            invalidation_queue,
            self.search.as_ref(),
            self.portal.as_ref(),
            policy,
        )
        .await
    }

    /// Fetch `uuid` and write it at `version`. A version conflict means a
    /// newer copy is already indexed and is not an error.
    pub async fn fetch_and_index(&self, uuid: &str, version: u64) -> Result<IndexOutcome> {
        let item = self.portal.get_item(uuid, version).await?;
        if self.props.delete_stale_copies {
            self.search
                .delete_from_other_indices(&item.uuid, &item.index)
                .await?;
        }
        let outcome = self.search.index_item(&item).await?;
        match outcome {
            IndexOutcome::Indexed => {
                tracing::debug!(uuid, version, index = %item.index, "indexing: indexed")
            }
            IndexOutcome::Conflict => {
                tracing::info!(uuid, version, "indexing: newer version already indexed")
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for IndexingService {
    fn name(&self) -> &str {
        "indexing"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Single
    }

    async fn handle(&self, messages: &[InboundMessage]) -> Result<()> {
        for message in messages {
            let notice = message.invalidation()?;
            let (uuid, version) = notice.uuid_and_version();
            self.fetch_and_index(uuid, version).await?;
        }
        Ok(())
    }
}

/// Collapse notices to one version per uuid, keeping the highest.
pub fn latest_versions(messages: &[InboundMessage]) -> Result<BTreeMap<String, u64>> {
    let mut versions: BTreeMap<String, u64> = BTreeMap::new();
    for message in messages {
        let notice = message.invalidation()?;
        let (uuid, version) = notice.uuid_and_version();
        let slot = versions.entry(uuid.to_string()).or_insert(version);
        *slot = (*slot).max(version);
    }
    Ok(versions)
}

/// Many notices per cycle, written with a single bulk request.
pub struct BulkIndexingService {
    portal: Arc<dyn ContentStore>,
    search: Arc<dyn SearchIndex>,
    props: IndexingProps,
}

impl BulkIndexingService {
    pub fn new(
        portal: Arc<dyn ContentStore>,
        search: Arc<dyn SearchIndex>,
        props: IndexingProps,
    ) -> Self {
        Self {
            portal,
            search,
            props,
        }
    }

    pub async fn wait_until_ready(
        &self,
        invalidation_queue: &dyn MessageQueue,
        policy: &RetryPolicy,
    ) -> Result<()> {
        wait_for_dependencies(
            invalidation_queue,
            self.search.as_ref(),
            self.portal.as_ref(),
            policy,
        )
        .await
    }

    /// Fetch every record, then write them all in one request. Any fetch
    /// error fails the batch before anything is written.
    pub async fn fetch_and_index_many(&self, versions: &BTreeMap<String, u64>) -> Result<usize> {
        if versions.is_empty() {
            return Ok(0);
        }
        let wanted: Vec<(String, u64)> = versions
            .iter()
            .map(|(uuid, version)| (uuid.clone(), *version))
            .collect();
        let items: Vec<Item> = stream::iter(wanted)
            .map(|(uuid, version)| {
                let portal = Arc::clone(&self.portal);
                async move { portal.get_item(&uuid, version).await }
            })
            .buffer_unordered(self.props.fetch_concurrency.max(1))
            .try_collect()
            .await?;
        if self.props.delete_stale_copies {
            for item in &items {
                self.search
                    .delete_from_other_indices(&item.uuid, &item.index)
                    .await?;
            }
        }
        self.search.bulk_index_items(&items).await?;
        tracing::info!(count = items.len(), "bulk indexing: batch written");
        Ok(items.len())
    }
}

#[async_trait]
impl MessageHandler for BulkIndexingService {
    fn name(&self) -> &str {
        "bulk-indexing"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Bulk
    }

    async fn handle(&self, messages: &[InboundMessage]) -> Result<()> {
        let versions = latest_versions(messages)?;
        self.fetch_and_index_many(&versions).await.map(|_| ())
    }
}
