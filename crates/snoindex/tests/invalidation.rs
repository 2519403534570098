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

use serde_json::{json, Value};
use std::sync::Arc;

use snoindex::domain::{InboundMessage, Item};
use snoindex::queue::{InMemoryQueue, MessageQueue};
use snoindex::retry::RetryPolicy;
use snoindex::search::{InMemorySearch, SearchIndex};
use snoindex::services::{InvalidationService, Poller};
use snoindex::test_utils::{init_test_logging, received, transaction_message};
use snoindex::SnoindexError;

struct Fixture {
    transactions: Arc<InMemoryQueue>,
    invalidations: Arc<InMemoryQueue>,
    search: Arc<InMemorySearch>,
}

impl Fixture {
    fn new() -> Self {
        init_test_logging();
        let search = Arc::new(InMemorySearch::new(Some("snovault-resources".into())));
        search.create_resources_index();
        Self {
            transactions: Arc::new(InMemoryQueue::new("transaction-queue")),
            invalidations: Arc::new(InMemoryQueue::new("invalidation-queue")),
            search,
        }
    }

    fn service(&self) -> InvalidationService {
        InvalidationService::new(self.invalidations.clone(), self.search.clone())
    }

    async fn store_document(&self, uuid: &str, embedded: &[&str], linked: &[&str]) {
        let item = Item {
            data: json!({
                "uuid": uuid,
                "item_type": "item",
                "embedded_uuids": embedded,
                "linked_uuids": linked,
            }),
            version: 1,
            uuid: uuid.into(),
            index: "item".into(),
        };
        self.search.index_item(&item).await.unwrap();
    }

    /// (uuid, xid, tid) of every queued notice, sorted by uuid.
    fn notices(&self) -> Vec<(String, u64, String)> {
        let mut out: Vec<_> = self
            .invalidations
            .peek_bodies()
            .into_iter()
            .map(|b: Value| {
                (
                    b["data"]["uuid"].as_str().unwrap().to_string(),
                    b["metadata"]["xid"].as_u64().unwrap(),
                    b["metadata"]["tid"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        out.sort();
        out
    }
}

fn notice(uuid: &str, xid: u64, tid: &str) -> (String, u64, String) {
    (uuid.to_string(), xid, tid.to_string())
}

#[tokio::test]
async fn direct_uuid_only_when_nothing_references_it() {
    let f = Fixture::new();
    let msg = received(&transaction_message(1234, "abcd", &["A"], &["A"]));
    let summary = f
        .service()
        .invalidate_transaction(&msg.transaction().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.direct, 1);
    assert_eq!(summary.related, 0);
    assert_eq!(f.notices(), vec![notice("A", 1234, "abcd")]);
}

#[tokio::test]
async fn documents_embedding_an_updated_uuid_are_invalidated() {
    let f = Fixture::new();
    f.store_document("A", &["A"], &[]).await;
    f.store_document("D", &["D", "A"], &[]).await;
    f.store_document("E", &["E"], &[]).await;

    let msg = received(&transaction_message(1234, "abcd", &["A"], &["A"]));
    f.service()
        .invalidate_transaction(&msg.transaction().unwrap())
        .await
        .unwrap();
    // A embeds itself but is only notified once
    assert_eq!(
        f.notices(),
        vec![notice("A", 1234, "abcd"), notice("D", 1234, "abcd")]
    );
}

#[tokio::test]
async fn links_only_count_for_renamed_uuids() {
    let f = Fixture::new();
    f.store_document("L", &["L"], &["B"]).await;
    f.store_document("M", &["M"], &["C"]).await;

    let msg = received(&transaction_message(7, "t7", &["C"], &["B"]));
    f.service()
        .invalidate_transaction(&msg.transaction().unwrap())
        .await
        .unwrap();
    assert_eq!(
        f.notices(),
        vec![notice("B", 7, "t7"), notice("C", 7, "t7"), notice("L", 7, "t7")]
    );
}

#[tokio::test]
async fn reemitting_a_transaction_reuses_dedup_keys() {
    let f = Fixture::new();
    f.store_document("D", &["A"], &[]).await;
    let tx = received(&transaction_message(1234, "abcd", &["A"], &[]))
        .transaction()
        .unwrap();
    let service = f.service();
    service.invalidate_transaction(&tx).await.unwrap();
    let first: Vec<_> = f.invalidations.get_messages(10).await.unwrap();
    service.invalidate_transaction(&tx).await.unwrap();
    let second: Vec<_> = f.invalidations.get_messages(10).await.unwrap();

    let ids = |msgs: &[InboundMessage]| {
        let mut ids: Vec<String> = msgs.iter().map(|m| m.message_id.clone()).collect();
        ids.sort();
        ids
    };
    assert_eq!(first.len(), 2);
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn related_search_failure_keeps_direct_notices() {
    let f = Fixture::new();
    f.search.set_unavailable(true);
    let tx = received(&transaction_message(9, "t9", &["A", "B"], &[]))
        .transaction()
        .unwrap();
    let err = f.service().invalidate_transaction(&tx).await.unwrap_err();
    assert!(matches!(err, SnoindexError::Search(_)));
    assert_eq!(f.notices(), vec![notice("A", 9, "t9"), notice("B", 9, "t9")]);
}

#[tokio::test]
async fn poller_acknowledges_only_handled_transactions() {
    let f = Fixture::new();
    f.store_document("D", &["A"], &[]).await;
    f.transactions
        .send_messages(&[
            transaction_message(1, "t1", &["A"], &[]),
            snoindex::domain::OutboundMessage::new("broken", json!({"metadata": {"xid": 2}})),
            transaction_message(3, "t3", &["C"], &["C"]),
        ])
        .await
        .unwrap();

    let mut poller = Poller::new(f.transactions.clone(), f.service(), 10);
    let summary = poller.run_once().await.unwrap();
    assert_eq!((summary.received, summary.handled, summary.failed), (3, 2, 1));
    let stats = poller.tracker().stats();
    assert_eq!(stats.all, stats.handled + stats.failed);

    assert_eq!(
        f.notices(),
        vec![notice("A", 1, "t1"), notice("C", 3, "t3"), notice("D", 1, "t1")]
    );
    // the broken transaction stays in flight on the source queue
    let info = f.transactions.info().await.unwrap();
    assert_eq!((info.visible, info.in_flight), (0, 1));
    assert!(f.invalidations.info().await.unwrap().in_flight == 0);
}

#[tokio::test]
async fn readiness_requires_both_queues_and_index() {
    let f = Fixture::new();
    f.service()
        .wait_until_ready(f.transactions.as_ref(), &RetryPolicy::immediate(3))
        .await
        .unwrap();

    let missing_index = Arc::new(InMemorySearch::new(Some("snovault-resources".into())));
    let service = InvalidationService::new(f.invalidations.clone(), missing_index);
    let err = service
        .wait_until_ready(f.transactions.as_ref(), &RetryPolicy::immediate(3))
        .await
        .unwrap_err();
    assert!(matches!(err, SnoindexError::NotReady { attempts: 3, .. }));
}
