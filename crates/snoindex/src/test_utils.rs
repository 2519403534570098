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

//! Test utilities shared by unit and integration tests.
//!
//! Environment variable management, test logging setup, an in-process
//! content store and message fixtures.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

use crate::domain::{InboundMessage, Item, OutboundMessage, TransactionBody, TransactionMetadata};
use crate::remote::ContentStore;
use crate::{Result, SnoindexError};

/// Test helper to manage environment variables and ensure proper cleanup
pub struct EnvGuard {
    original_values: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            original_values: HashMap::new(),
        }
    }

    pub fn save_and_clear(&mut self, vars: &[&str]) {
        for &var in vars {
            let original = std::env::var(var).ok();
            self.original_values.insert(var.to_string(), original);
            std::env::remove_var(var);
        }
    }

    pub fn set(&self, var: &str, value: &str) {
        std::env::set_var(var, value);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (var, original_value) in &self.original_values {
            match original_value {
                Some(value) => std::env::set_var(var, value),
                None => std::env::remove_var(var),
            }
        }
    }
}

impl Default for EnvGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize tracing only once for tests. Respects RUST_LOG when set.
pub fn init_test_logging() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Content store backed by a map of uuid -> index-data view.
#[derive(Default)]
pub struct FixturePortal {
    records: Mutex<HashMap<String, Value>>,
    fetches: AtomicUsize,
    unavailable: AtomicBool,
    reject_access_key: AtomicBool,
}

impl FixturePortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record under `uuid` with the given `item_type` and
    /// reverse-link fields.
    pub fn add_record(&self, uuid: &str, item_type: &str, embedded: &[&str], linked: &[&str]) {
        self.add_raw(
            uuid,
            json!({
                "uuid": uuid,
                "item_type": item_type,
                "embedded": {"uuid": uuid},
                "embedded_uuids": embedded,
                "linked_uuids": linked,
            }),
        );
    }

    pub fn add_raw(&self, uuid: &str, data: Value) {
        self.records.lock().insert(uuid.to_string(), data);
    }

    /// Number of `get_item` calls served so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_reject_access_key(&self, reject: bool) {
        self.reject_access_key.store(reject, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SnoindexError::Backend("fixture portal unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FixturePortal {
    async fn get_item(&self, uuid: &str, version: u64) -> Result<Item> {
        self.ensure_available()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let data = self
            .records
            .lock()
            .get(uuid)
            .cloned()
            .ok_or_else(|| SnoindexError::Backend(format!("{}: 404 Not Found", uuid)))?;
        Item::from_index_data(uuid, version, data)
    }

    async fn check_connection(&self) -> Result<()> {
        self.ensure_available()
    }

    async fn access_key_exists(&self) -> Result<bool> {
        self.ensure_available()?;
        Ok(!self.reject_access_key.load(Ordering::SeqCst))
    }
}

/// Transaction notification as the upstream producer would send it.
pub fn transaction_message(xid: u64, tid: &str, updated: &[&str], renamed: &[&str]) -> OutboundMessage {
    let body = TransactionBody::new(xid, tid, updated, renamed);
    OutboundMessage::new(
        format!("tx-{}", xid),
        serde_json::to_value(&body).unwrap_or(Value::Null),
    )
}

/// Invalidation notice for `uuid` at `xid`.
pub fn invalidation_message(uuid: &str, xid: u64) -> OutboundMessage {
    let metadata = TransactionMetadata {
        xid,
        tid: format!("t{}", xid),
    };
    OutboundMessage::invalidation(&metadata, uuid)
}

/// Inbound copy of an outbound message, as if just received.
pub fn received(message: &OutboundMessage) -> InboundMessage {
    InboundMessage {
        message_id: message.unique_id.clone(),
        receipt_handle: format!("{}-receipt", message.unique_id),
        checksum: String::new(),
        body: message.str_body(),
    }
}
