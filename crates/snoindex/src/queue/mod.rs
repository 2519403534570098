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

//! Queue abstraction consumed by the services.
//!
//! Implementations provide single-call primitives (`receive`, `send_batch`,
//! `delete_batch`); the provided methods chunk to the provider's batch limit
//! and treat empty input as a no-op.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{InboundMessage, OutboundMessage};
use crate::retry::{wait_until, RetryPolicy};
use crate::Result;

pub mod memory;
pub mod redis;

pub use memory::InMemoryQueue;
pub use redis::{create_redis_pool, RedisQueue};

/// Approximate queue depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueInfo {
    /// Messages waiting to be received.
    pub visible: u64,
    /// Messages received but not yet processed or returned.
    pub in_flight: u64,
}

impl QueueInfo {
    pub fn is_empty(&self) -> bool {
        self.visible == 0 && self.in_flight == 0
    }
}

/// Receive/visibility knobs for one queue handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueProps {
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
}

impl Default for QueueProps {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Largest number of messages one provider call may carry.
    fn max_batch_size(&self) -> usize;

    /// One receive call for at most `max` messages, hiding them for the
    /// visibility timeout.
    async fn receive(&self, max: usize) -> Result<Vec<InboundMessage>>;

    /// One send call; `messages.len() <= max_batch_size()`.
    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<()>;

    /// One delete call; `messages.len() <= max_batch_size()`.
    async fn delete_batch(&self, messages: &[InboundMessage]) -> Result<()>;

    async fn info(&self) -> Result<QueueInfo>;

    async fn exists(&self) -> Result<bool>;

    /// Receive until `desired` messages were collected or a receive call
    /// comes back empty.
    async fn get_messages(&self, desired: usize) -> Result<Vec<InboundMessage>> {
        let mut received = Vec::new();
        while received.len() < desired {
            let max = (desired - received.len()).min(self.max_batch_size());
            let messages = self.receive(max).await?;
            if messages.is_empty() {
                break;
            }
            received.extend(messages);
        }
        Ok(received)
    }

    async fn send_messages(&self, messages: &[OutboundMessage]) -> Result<()> {
        for chunk in messages.chunks(self.max_batch_size().max(1)) {
            self.send_batch(chunk).await?;
        }
        Ok(())
    }

    async fn mark_as_processed(&self, messages: &[InboundMessage]) -> Result<()> {
        for chunk in messages.chunks(self.max_batch_size().max(1)) {
            self.delete_batch(chunk).await?;
        }
        Ok(())
    }

    async fn wait_for_queue_to_exist(&self, policy: &RetryPolicy) -> Result<()> {
        let what = format!("queue {}", self.name());
        wait_until(policy, &what, || self.exists()).await?;
        Ok(())
    }

    /// Return once `number_of_checks` consecutive checks saw an empty queue.
    async fn wait_for_queue_to_drain(
        &self,
        number_of_checks: u32,
        between_checks: Duration,
    ) -> Result<()> {
        let mut checks_left = number_of_checks;
        loop {
            if self.info().await?.is_empty() {
                checks_left = checks_left.saturating_sub(1);
            } else {
                checks_left = number_of_checks;
            }
            if checks_left == 0 {
                return Ok(());
            }
            tokio::time::sleep(between_checks).await;
        }
    }
}
