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

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use snoindex::domain::Item;
use snoindex::queue::{InMemoryQueue, MessageQueue};
use snoindex::retry::RetryPolicy;
use snoindex::search::{InMemorySearch, IndexOutcome, IndexedDocument, SearchIndex};
use snoindex::services::{
    BulkIndexingService, IndexingProps, IndexingService, MessageHandler, Poller,
};
use snoindex::test_utils::{init_test_logging, invalidation_message, received, FixturePortal};
use snoindex::SnoindexError;

fn setup() -> (Arc<FixturePortal>, Arc<InMemorySearch>) {
    init_test_logging();
    let portal = Arc::new(FixturePortal::new());
    portal.add_record("A", "snowball", &["A"], &[]);
    portal.add_record("B", "snowflake", &["B", "A"], &[]);
    portal.add_record("C", "snowflake", &["C"], &["A"]);
    let search = Arc::new(InMemorySearch::new(Some("snovault-resources".into())));
    search.create_resources_index();
    (portal, search)
}

async fn documents(search: &InMemorySearch) -> Vec<IndexedDocument> {
    search.refresh_resources_index().await.unwrap();
    search.all_documents().await.unwrap()
}

#[tokio::test]
async fn index_then_read_back() {
    let (portal, search) = setup();
    let service = IndexingService::new(portal, search.clone(), IndexingProps::default());
    assert_eq!(
        service.fetch_and_index("A", 3).await.unwrap(),
        IndexOutcome::Indexed
    );
    let docs = documents(&search).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].uuid, "A");
    assert_eq!(docs[0].index, "snowball");
    assert_eq!(docs[0].version, 3);
}

#[tokio::test]
async fn versions_gate_writes() {
    let (portal, search) = setup();
    let service = IndexingService::new(portal.clone(), search.clone(), IndexingProps::default());
    service.fetch_and_index("A", 5).await.unwrap();

    portal.add_raw("A", json!({"item_type": "snowball", "title": "older"}));
    assert_eq!(
        service.fetch_and_index("A", 4).await.unwrap(),
        IndexOutcome::Conflict
    );
    assert_eq!(
        service.fetch_and_index("A", 5).await.unwrap(),
        IndexOutcome::Conflict
    );
    let docs = documents(&search).await;
    assert_eq!(docs[0].version, 5);
    assert!(docs[0].source.get("title").is_none());

    portal.add_raw("A", json!({"item_type": "snowball", "title": "newer"}));
    assert_eq!(
        service.fetch_and_index("A", 6).await.unwrap(),
        IndexOutcome::Indexed
    );
    let docs = documents(&search).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].version, 6);
    assert_eq!(docs[0].source["title"], "newer");
}

#[tokio::test]
async fn conflicting_notice_is_handled_and_acknowledged() {
    let (portal, search) = setup();
    let queue = Arc::new(InMemoryQueue::new("inv"));
    let service = IndexingService::new(portal, search.clone(), IndexingProps::default());
    service.fetch_and_index("A", 5).await.unwrap();

    queue
        .send_messages(&[invalidation_message("A", 5)])
        .await
        .unwrap();
    let mut poller = Poller::new(queue.clone(), service, 1);
    let summary = poller.run_once().await.unwrap();
    assert_eq!((summary.handled, summary.failed), (1, 0));
    assert!(queue.info().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_record_or_item_type_fails_the_message() {
    let (portal, search) = setup();
    portal.add_raw("Z", json!({"title": "no type"}));
    let service = IndexingService::new(portal, search.clone(), IndexingProps::default());

    let err = service
        .handle(&[received(&invalidation_message("Z", 1))])
        .await
        .unwrap_err();
    assert!(matches!(err, SnoindexError::DataShape(_)));
    let err = service
        .handle(&[received(&invalidation_message("nope", 1))])
        .await
        .unwrap_err();
    assert!(matches!(err, SnoindexError::Backend(_)));
    assert!(documents(&search).await.is_empty());
}

#[tokio::test]
async fn stale_copies_in_other_indices_are_removed_when_enabled() {
    let (portal, search) = setup();
    search
        .index_item(&Item {
            data: json!({"item_type": "old_type"}),
            version: 1,
            uuid: "A".into(),
            index: "old_type".into(),
        })
        .await
        .unwrap();
    let service = IndexingService::new(
        portal,
        search.clone(),
        IndexingProps {
            delete_stale_copies: true,
            ..IndexingProps::default()
        },
    );
    service.fetch_and_index("A", 2).await.unwrap();
    let docs = documents(&search).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].index, "snowball");
}

#[tokio::test]
async fn bulk_collapses_duplicates_to_highest_version() {
    let (portal, search) = setup();
    let queue = Arc::new(InMemoryQueue::new("inv"));
    queue
        .send_messages(&[
            invalidation_message("A", 3),
            invalidation_message("B", 4),
            invalidation_message("A", 8),
            invalidation_message("C", 2),
            invalidation_message("A", 5),
        ])
        .await
        .unwrap();
    let service = BulkIndexingService::new(
        portal.clone(),
        search.clone(),
        IndexingProps {
            fetch_concurrency: 3,
            ..IndexingProps::default()
        },
    );
    let mut poller = Poller::new(queue.clone(), service, 1000);
    let summary = poller.run_once().await.unwrap();
    assert_eq!((summary.received, summary.handled), (5, 5));
    assert_eq!(portal.fetches(), 3);

    let versions: BTreeMap<String, u64> = documents(&search)
        .await
        .into_iter()
        .map(|d| (d.uuid, d.version))
        .collect();
    assert_eq!(versions["A"], 8);
    assert_eq!(versions["B"], 4);
    assert_eq!(versions["C"], 2);
    assert!(queue.info().await.unwrap().is_empty());
}

#[tokio::test]
async fn bulk_poller_runs_on_a_spawned_task() {
    let (portal, search) = setup();
    let queue = Arc::new(InMemoryQueue::new("inv"));
    queue
        .send_messages(&[invalidation_message("A", 2), invalidation_message("B", 6)])
        .await
        .unwrap();
    let service = BulkIndexingService::new(
        portal,
        search.clone(),
        IndexingProps {
            fetch_concurrency: 2,
            ..IndexingProps::default()
        },
    );
    let mut poller = Poller::new(queue.clone(), service, 100);
    let summary = tokio::spawn(async move { poller.run_once().await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.handled, 2);
    assert_eq!(documents(&search).await.len(), 2);
}

#[tokio::test]
async fn bulk_writes_nothing_when_a_fetch_fails() {
    let (portal, search) = setup();
    let service = BulkIndexingService::new(portal, search.clone(), IndexingProps::default());
    let messages = [
        received(&invalidation_message("A", 1)),
        received(&invalidation_message("missing", 1)),
    ];
    assert!(service.handle(&messages).await.is_err());
    assert!(documents(&search).await.is_empty());
}

#[tokio::test]
async fn bulk_ignores_per_item_version_conflicts() {
    let (portal, search) = setup();
    let single = IndexingService::new(portal.clone(), search.clone(), IndexingProps::default());
    single.fetch_and_index("A", 9).await.unwrap();

    let bulk = BulkIndexingService::new(portal, search.clone(), IndexingProps::default());
    let messages = [
        received(&invalidation_message("A", 2)),
        received(&invalidation_message("B", 2)),
    ];
    bulk.handle(&messages).await.unwrap();
    let versions: BTreeMap<String, u64> = documents(&search)
        .await
        .into_iter()
        .map(|d| (d.uuid, d.version))
        .collect();
    assert_eq!(versions["A"], 9);
    assert_eq!(versions["B"], 2);
}

#[tokio::test]
async fn readiness_waits_for_portal_and_access_key() {
    let (portal, search) = setup();
    let queue = InMemoryQueue::new("inv");
    let service = IndexingService::new(portal.clone(), search, IndexingProps::default());
    service
        .wait_until_ready(&queue, &RetryPolicy::immediate(2))
        .await
        .unwrap();

    portal.set_reject_access_key(true);
    let err = service
        .wait_until_ready(&queue, &RetryPolicy::immediate(2))
        .await
        .unwrap_err();
    assert!(matches!(err, SnoindexError::NotReady { .. }));

    portal.set_reject_access_key(false);
    portal.set_unavailable(true);
    assert!(service
        .wait_until_ready(&queue, &RetryPolicy::immediate(2))
        .await
        .is_err());
}
