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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::{Result, SnoindexError};

/// A message received from a queue. It stays owned by the queue until it is
/// marked as processed with its `receipt_handle`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub checksum: String,
    pub body: String,
}

impl InboundMessage {
    /// Parse the raw body as JSON.
    pub fn json_body(&self) -> Result<Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            SnoindexError::DataShape(format!("message {}: {}", self.message_id, e))
        })
    }

    /// Parse the raw body as a transaction notification.
    pub fn transaction(&self) -> Result<TransactionBody> {
        serde_json::from_str(&self.body).map_err(|e| {
            SnoindexError::DataShape(format!("transaction message {}: {}", self.message_id, e))
        })
    }

    /// Parse the raw body as an invalidation notice.
    pub fn invalidation(&self) -> Result<InvalidationBody> {
        serde_json::from_str(&self.body).map_err(|e| {
            SnoindexError::DataShape(format!("invalidation message {}: {}", self.message_id, e))
        })
    }
}

/// A message about to be sent. `unique_id` doubles as the dedup key.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub unique_id: String,
    pub body: Value,
}

impl OutboundMessage {
    pub fn new(unique_id: impl Into<String>, body: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            body,
        }
    }

    /// Invalidation notice for `uuid`, stamped with the originating transaction.
    pub fn invalidation(metadata: &TransactionMetadata, uuid: &str) -> Self {
        let body = InvalidationBody {
            metadata: metadata.clone(),
            data: InvalidationData {
                uuid: uuid.to_string(),
            },
        };
        Self {
            unique_id: make_unique_id(uuid, metadata.xid),
            // Serializing a struct of strings and integers cannot fail.
            body: serde_json::to_value(&body).unwrap_or(Value::Null),
        }
    }

    pub fn str_body(&self) -> String {
        self.body.to_string()
    }
}

/// Dedup key for an invalidation notice. Stable across re-emission of the
/// same transaction.
pub fn make_unique_id(uuid: &str, xid: u64) -> String {
    format!("{}-{}", uuid, xid)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub xid: u64,
    pub tid: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub updated: Vec<String>,
    pub renamed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub payload: TransactionPayload,
}

/// `{ metadata: { xid, tid }, data: { payload: { updated, renamed } } }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub metadata: TransactionMetadata,
    pub data: TransactionData,
}

impl TransactionBody {
    pub fn new(xid: u64, tid: &str, updated: &[&str], renamed: &[&str]) -> Self {
        Self {
            metadata: TransactionMetadata {
                xid,
                tid: tid.to_string(),
            },
            data: TransactionData {
                payload: TransactionPayload {
                    updated: updated.iter().map(|s| s.to_string()).collect(),
                    renamed: renamed.iter().map(|s| s.to_string()).collect(),
                },
            },
        }
    }

    pub fn updated_uuids(&self) -> BTreeSet<String> {
        self.data.payload.updated.iter().cloned().collect()
    }

    pub fn renamed_uuids(&self) -> BTreeSet<String> {
        self.data.payload.renamed.iter().cloned().collect()
    }

    /// Directly affected uuids: `updated ∪ renamed`.
    pub fn all_uuids(&self) -> BTreeSet<String> {
        let mut uuids = self.updated_uuids();
        uuids.extend(self.data.payload.renamed.iter().cloned());
        uuids
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationData {
    pub uuid: String,
}

/// `{ metadata: { xid, tid }, data: { uuid } }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationBody {
    pub metadata: TransactionMetadata,
    pub data: InvalidationData,
}

impl InvalidationBody {
    /// The uuid to reindex and the version to index it at.
    pub fn uuid_and_version(&self) -> (&str, u64) {
        (self.data.uuid.as_str(), self.metadata.xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(body: Value) -> InboundMessage {
        InboundMessage {
            message_id: "abc".into(),
            receipt_handle: "abc123".into(),
            checksum: "ccc".into(),
            body: body.to_string(),
        }
    }

    #[test]
    fn json_body_parses_lazily() {
        let msg = inbound(json!({"some": ["json", "string"], "with": {"meta": "data"}}));
        assert_eq!(msg.json_body().unwrap()["with"]["meta"], "data");

        let broken = InboundMessage {
            body: "{".into(),
            ..msg
        };
        assert!(matches!(
            broken.json_body(),
            Err(SnoindexError::DataShape(_))
        ));
    }

    #[test]
    fn transaction_uuids_are_collapsed() {
        let msg = inbound(json!({
            "metadata": {"xid": 1234, "tid": "abcd"},
            "data": {"payload": {"updated": ["A", "B", "A"], "renamed": ["A", "C"]}}
        }));
        let tx = msg.transaction().unwrap();
        assert_eq!(tx.metadata.xid, 1234);
        assert_eq!(tx.updated_uuids().len(), 2);
        let all: Vec<_> = tx.all_uuids().into_iter().collect();
        assert_eq!(all, vec!["A", "B", "C"]);
    }

    #[test]
    fn transaction_missing_renamed_is_rejected() {
        let msg = inbound(json!({
            "metadata": {"xid": 1, "tid": "t"},
            "data": {"payload": {"updated": ["A"]}}
        }));
        assert!(matches!(msg.transaction(), Err(SnoindexError::DataShape(_))));
    }

    #[test]
    fn transaction_with_string_xid_is_rejected() {
        let msg = inbound(json!({
            "metadata": {"xid": "1", "tid": "t"},
            "data": {"payload": {"updated": [], "renamed": []}}
        }));
        assert!(msg.transaction().is_err());
    }

    #[test]
    fn empty_lists_are_allowed() {
        let msg = inbound(json!({
            "metadata": {"xid": 1, "tid": "t"},
            "data": {"payload": {"updated": [], "renamed": []}}
        }));
        assert!(msg.transaction().unwrap().all_uuids().is_empty());
    }

    #[test]
    fn invalidation_notice_wire_shape() {
        let meta = TransactionMetadata {
            xid: 1234,
            tid: "abcd".into(),
        };
        let out = OutboundMessage::invalidation(&meta, "09d05b87");
        assert_eq!(out.unique_id, "09d05b87-1234");
        assert_eq!(
            out.body,
            json!({"metadata": {"xid": 1234, "tid": "abcd"}, "data": {"uuid": "09d05b87"}})
        );
        // same transaction, same key
        assert_eq!(
            OutboundMessage::invalidation(&meta, "09d05b87").unique_id,
            out.unique_id
        );
    }

    #[test]
    fn invalidation_uuid_and_version() {
        let msg = inbound(json!({
            "metadata": {"xid": 1234, "tid": "abcd"},
            "data": {"uuid": "09d05b87-4d30-4dfb-b243-3327005095f2"}
        }));
        let body = msg.invalidation().unwrap();
        assert_eq!(
            body.uuid_and_version(),
            ("09d05b87-4d30-4dfb-b243-3327005095f2", 1234)
        );
    }

    #[test]
    fn str_body_round_trips_through_inbound() {
        let out = OutboundMessage::new("k", json!({"a": 1}));
        let back = inbound(serde_json::from_str(&out.str_body()).unwrap());
        assert_eq!(back.json_body().unwrap(), json!({"a": 1}));
    }
}
