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

//! In-process queue with visibility-timeout semantics, used by tests and
//! local runs without Redis.

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::{MessageQueue, QueueInfo};
use crate::domain::{InboundMessage, OutboundMessage};
use crate::Result;

#[derive(Clone, Debug)]
struct Stored {
    id: String,
    checksum: String,
    body: String,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Stored>,
    in_flight: HashMap<String, (Stored, Instant)>,
}

impl State {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((stored, _)) = self.in_flight.remove(&receipt) {
                self.pending.push_front(stored);
            }
        }
    }
}

pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    max_batch_size: usize,
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_visibility_timeout(name, Duration::from_secs(60))
    }

    pub fn with_visibility_timeout(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            max_batch_size: 10,
            state: Mutex::new(State::default()),
        }
    }

    /// Drop every pending and in-flight message.
    pub fn purge(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.in_flight.clear();
    }

    /// Bodies of every pending message, oldest first, without receiving them.
    pub fn peek_bodies(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .pending
            .iter()
            .filter_map(|s| serde_json::from_str(&s.body).ok())
            .collect()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn receive(&self, max: usize) -> Result<Vec<InboundMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.requeue_expired(now);
        let mut out = Vec::new();
        while out.len() < max {
            let Some(stored) = state.pending.pop_front() else {
                break;
            };
            let receipt = uuid::Uuid::new_v4().to_string();
            out.push(InboundMessage {
                message_id: stored.id.clone(),
                receipt_handle: receipt.clone(),
                checksum: stored.checksum.clone(),
                body: stored.body.clone(),
            });
            state
                .in_flight
                .insert(receipt, (stored, now + self.visibility_timeout));
        }
        Ok(out)
    }

    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<()> {
        let mut state = self.state.lock();
        for m in messages {
            let body = m.str_body();
            state.pending.push_back(Stored {
                id: m.unique_id.clone(),
                checksum: format!("{:x}", Sha256::digest(body.as_bytes())),
                body,
            });
        }
        Ok(())
    }

    async fn delete_batch(&self, messages: &[InboundMessage]) -> Result<()> {
        let mut state = self.state.lock();
        for m in messages {
            state.in_flight.remove(&m.receipt_handle);
        }
        Ok(())
    }

    async fn info(&self) -> Result<QueueInfo> {
        let state = self.state.lock();
        Ok(QueueInfo {
            visible: state.pending.len() as u64,
            in_flight: state.in_flight.len() as u64,
        })
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }
}
