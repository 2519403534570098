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

//! Turn transaction notifications into invalidation notices.
//!
//! Every uuid a transaction names directly gets a notice, and so does every
//! document whose `embedded_uuids` contain an updated uuid or whose
//! `linked_uuids` contain a renamed one. Direct notices are queued before the
//! related search runs.

use async_trait::async_trait;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::domain::{InboundMessage, OutboundMessage, TransactionBody, TransactionMetadata};
use crate::queue::MessageQueue;
use crate::retry::RetryPolicy;
use crate::search::SearchIndex;
use crate::services::poller::{MessageHandler, ProcessingMode};
use crate::Result;

/// Number of notices queued for one transaction or batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvalidationSummary {
    pub direct: usize,
    pub related: usize,
}

fn notices<'a>(
    metadata: &TransactionMetadata,
    uuids: impl IntoIterator<Item = &'a String>,
) -> Vec<OutboundMessage> {
    uuids
        .into_iter()
        .map(|uuid| OutboundMessage::invalidation(metadata, uuid))
        .collect()
}

/// Source queue, destination queue and search index all exist.
async fn wait_for_dependencies(
    transaction_queue: &dyn MessageQueue,
    invalidation_queue: &dyn MessageQueue,
    search: &dyn SearchIndex,
    policy: &RetryPolicy,
) -> Result<()> {
    transaction_queue.wait_for_queue_to_exist(policy).await?;
    invalidation_queue.wait_for_queue_to_exist(policy).await?;
    search.wait_for_resources_index_to_exist(policy).await?;
    tracing::info!(
        transaction_queue = transaction_queue.name(),
        invalidation_queue = invalidation_queue.name(),
        "invalidation: dependencies ready"
    );
    Ok(())
}

/// One transaction at a time.
pub struct InvalidationService {
    invalidation_queue: Arc<dyn MessageQueue>,
    search: Arc<dyn SearchIndex>,
}

impl InvalidationService {
    pub fn new(invalidation_queue: Arc<dyn MessageQueue>, search: Arc<dyn SearchIndex>) -> Self {
        Self {
            invalidation_queue,
            search,
        }
    }

    pub async fn wait_until_ready(
        &self,
        transaction_queue: &dyn MessageQueue,
        policy: &RetryPolicy,
    ) -> Result<()> {
        wait_for_dependencies(
            transaction_queue,
            self.invalidation_queue.as_ref(),
            self.search.as_ref(),
            policy,
        )
        .await
    }

    /// Related ids minus the transaction's own ids.
    pub async fn get_related_uuids(&self, transaction: &TransactionBody) -> Result<BTreeSet<String>> {
        let updated: Vec<String> = transaction.updated_uuids().into_iter().collect();
        let renamed: Vec<String> = transaction.renamed_uuids().into_iter().collect();
        let direct = transaction.all_uuids();
        Ok(self
            .search
            .get_related_uuids(&updated, &renamed)
            .await?
            .into_iter()
            .filter(|uuid| !direct.contains(uuid))
            .collect())
    }

    /// Queue notices for the direct uuids, then for the related ones. A
    /// failed related search leaves the direct notices queued.
    pub async fn invalidate_transaction(
        &self,
        transaction: &TransactionBody,
    ) -> Result<InvalidationSummary> {
        let direct = transaction.all_uuids();
        self.invalidation_queue
            .send_messages(&notices(&transaction.metadata, &direct))
            .await?;
        let related = self.get_related_uuids(transaction).await?;
        self.invalidation_queue
            .send_messages(&notices(&transaction.metadata, &related))
            .await?;
        tracing::debug!(
            xid = transaction.metadata.xid,
            direct = direct.len(),
            related = related.len(),
            "invalidation: transaction fanned out"
        );
        Ok(InvalidationSummary {
            direct: direct.len(),
            related: related.len(),
        })
    }
}

#[async_trait]
impl MessageHandler for InvalidationService {
    fn name(&self) -> &str {
        "invalidation"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Single
    }

    async fn handle(&self, messages: &[InboundMessage]) -> Result<()> {
        for message in messages {
            let transaction = message.transaction()?;
            self.invalidate_transaction(&transaction).await?;
        }
        Ok(())
    }
}

/// Uuids named by a batch of transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedTransactions {
    /// Each direct uuid with the metadata of the highest-xid transaction
    /// naming it.
    pub all: BTreeMap<String, TransactionMetadata>,
    pub updated: BTreeSet<String>,
    pub renamed: BTreeSet<String>,
    /// Metadata of the highest-xid transaction in the batch.
    pub latest: Option<TransactionMetadata>,
}

fn keep_latest(slot: &mut Option<TransactionMetadata>, candidate: &TransactionMetadata) {
    if slot.as_ref().map_or(true, |current| candidate.xid > current.xid) {
        *slot = Some(candidate.clone());
    }
}

/// Parse every message; any malformed body fails the whole batch.
pub fn parse_uuids_from_messages(messages: &[InboundMessage]) -> Result<ParsedTransactions> {
    let mut parsed = ParsedTransactions::default();
    for message in messages {
        let transaction = message.transaction()?;
        let metadata = &transaction.metadata;
        for uuid in transaction.all_uuids() {
            match parsed.all.entry(uuid) {
                Entry::Vacant(slot) => {
                    slot.insert(metadata.clone());
                }
                Entry::Occupied(mut slot) => {
                    if metadata.xid > slot.get().xid {
                        slot.insert(metadata.clone());
                    }
                }
            }
        }
        parsed.updated.extend(transaction.updated_uuids());
        parsed.renamed.extend(transaction.renamed_uuids());
        keep_latest(&mut parsed.latest, metadata);
    }
    Ok(parsed)
}

/// Many transactions per cycle, with batched related searches.
pub struct BulkInvalidationService {
    invalidation_queue: Arc<dyn MessageQueue>,
    search: Arc<dyn SearchIndex>,
    related_uuids_search_batch_size: usize,
}

impl BulkInvalidationService {
    pub fn new(
        invalidation_queue: Arc<dyn MessageQueue>,
        search: Arc<dyn SearchIndex>,
        related_uuids_search_batch_size: usize,
    ) -> Self {
        Self {
            invalidation_queue,
            search,
            related_uuids_search_batch_size: related_uuids_search_batch_size.max(1),
        }
    }

    pub async fn wait_until_ready(
        &self,
        transaction_queue: &dyn MessageQueue,
        policy: &RetryPolicy,
    ) -> Result<()> {
        wait_for_dependencies(
            transaction_queue,
            self.invalidation_queue.as_ref(),
            self.search.as_ref(),
            policy,
        )
        .await
    }

    /// Search each side in chunks and return related ids not already in
    /// `all`.
    pub async fn get_related_uuids(
        &self,
        all: &BTreeSet<String>,
        updated: &BTreeSet<String>,
        renamed: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let updated: Vec<String> = updated.iter().cloned().collect();
        let renamed: Vec<String> = renamed.iter().cloned().collect();
        let mut related = BTreeSet::new();
        for chunk in updated.chunks(self.related_uuids_search_batch_size) {
            related.extend(self.search.get_related_uuids(chunk, &[]).await?);
        }
        for chunk in renamed.chunks(self.related_uuids_search_batch_size) {
            related.extend(self.search.get_related_uuids(&[], chunk).await?);
        }
        Ok(related.difference(all).cloned().collect())
    }

    pub async fn invalidate_messages(
        &self,
        messages: &[InboundMessage],
    ) -> Result<InvalidationSummary> {
        let parsed = parse_uuids_from_messages(messages)?;
        let Some(latest) = parsed.latest.as_ref() else {
            return Ok(InvalidationSummary::default());
        };
        let direct: Vec<OutboundMessage> = parsed
            .all
            .iter()
            .map(|(uuid, metadata)| OutboundMessage::invalidation(metadata, uuid))
            .collect();
        self.invalidation_queue.send_messages(&direct).await?;
        let all: BTreeSet<String> = parsed.all.keys().cloned().collect();
        let related = self
            .get_related_uuids(&all, &parsed.updated, &parsed.renamed)
            .await?;
        self.invalidation_queue
            .send_messages(&notices(latest, &related))
            .await?;
        tracing::info!(
            transactions = messages.len(),
            direct = direct.len(),
            related = related.len(),
            "bulk invalidation: batch fanned out"
        );
        Ok(InvalidationSummary {
            direct: direct.len(),
            related: related.len(),
        })
    }
}

#[async_trait]
impl MessageHandler for BulkInvalidationService {
    fn name(&self) -> &str {
        "bulk-invalidation"
    }

    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Bulk
    }

    async fn handle(&self, messages: &[InboundMessage]) -> Result<()> {
        self.invalidate_messages(messages).await.map(|_| ())
    }
}
