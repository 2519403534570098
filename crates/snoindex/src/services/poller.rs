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

//! The fetch → process → acknowledge → report loop shared by every service.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::domain::{InboundMessage, MessageTracker};
use crate::queue::MessageQueue;
use crate::telemetry::ServiceMetrics;
use crate::Result;

/// Where the failure boundary sits during processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Each message succeeds or fails on its own.
    Single,
    /// The whole fetched list succeeds or fails together.
    Bulk,
}

/// Unit of work run by a [`Poller`] on freshly received messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> ProcessingMode;

    /// Process `messages`; in single mode this is always one message.
    async fn handle(&self, messages: &[InboundMessage]) -> Result<()>;
}

/// Per-cycle outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub received: usize,
    pub handled: usize,
    pub failed: usize,
}

/// Stats are logged every hundred messages seen.
fn should_report(all: u64) -> bool {
    all > 0 && all % 100 == 0
}

pub struct Poller<H> {
    source: Arc<dyn MessageQueue>,
    handler: H,
    messages_per_run: usize,
    idle_sleep: Duration,
    tracker: MessageTracker,
    metrics: Arc<ServiceMetrics>,
}

impl<H: MessageHandler> Poller<H> {
    pub fn new(source: Arc<dyn MessageQueue>, handler: H, messages_per_run: usize) -> Self {
        Self {
            source,
            handler,
            messages_per_run: messages_per_run.max(1),
            idle_sleep: Duration::from_millis(100),
            tracker: MessageTracker::new(),
            metrics: Arc::new(ServiceMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Pause after a cycle that received nothing.
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    async fn get_new_messages(&mut self) -> Result<()> {
        let messages = self.source.get_messages(self.messages_per_run).await?;
        tracing::debug!(
            service = self.handler.name(),
            count = messages.len(),
            "poller: received messages"
        );
        self.tracker.add_new_messages(messages);
        Ok(())
    }

    async fn process_new_messages(&mut self) {
        if self.tracker.new_messages.is_empty() {
            return;
        }
        match self.handler.mode() {
            ProcessingMode::Single => {
                let new_messages = self.tracker.new_messages.clone();
                for message in new_messages {
                    match self.handler.handle(std::slice::from_ref(&message)).await {
                        Ok(()) => self.tracker.add_handled_messages([message]),
                        Err(e) => {
                            tracing::warn!(
                                service = self.handler.name(),
                                message_id = %message.message_id,
                                error = %e,
                                "poller: message failed"
                            );
                            self.tracker.add_failed_messages([message]);
                        }
                    }
                }
            }
            ProcessingMode::Bulk => {
                let new_messages = self.tracker.new_messages.clone();
                match self.handler.handle(&new_messages).await {
                    Ok(()) => self.tracker.add_handled_messages(new_messages),
                    Err(e) => {
                        tracing::warn!(
                            service = self.handler.name(),
                            count = new_messages.len(),
                            error = %e,
                            "poller: batch failed"
                        );
                        self.tracker.add_failed_messages(new_messages);
                    }
                }
            }
        }
    }

    /// Acknowledge on the source queue. A failure here leaves the messages to
    /// reappear after their visibility timeout.
    async fn mark_handled_messages_as_processed(&mut self) {
        if self.tracker.handled_messages.is_empty() {
            return;
        }
        if let Err(e) = self
            .source
            .mark_as_processed(&self.tracker.handled_messages)
            .await
        {
            tracing::warn!(
                service = self.handler.name(),
                count = self.tracker.handled_messages.len(),
                error = %e,
                "poller: failed to acknowledge handled messages"
            );
        }
    }

    fn log_stats(&self) {
        let stats = self.tracker.stats();
        if should_report(stats.all) {
            tracing::warn!(
                service = self.handler.name(),
                all = stats.all,
                handled = stats.handled,
                failed = stats.failed,
                "poller: message stats"
            );
        }
    }

    /// One full cycle. Only a failure to receive is returned; processing
    /// failures end up in the tracker's failed set.
    pub async fn run_once(&mut self) -> Result<CycleSummary> {
        self.tracker.clear();
        let fetched = self.get_new_messages().await;
        if let Err(e) = fetched {
            self.tracker.clear();
            return Err(e);
        }
        self.process_new_messages().await;
        self.mark_handled_messages_as_processed().await;
        let summary = CycleSummary {
            received: self.tracker.new_messages.len(),
            handled: self.tracker.handled_messages.len(),
            failed: self.tracker.failed_messages.len(),
        };
        debug_assert!(self.tracker.is_settled());
        self.log_stats();
        self.metrics.record_cycle(self.tracker.stats());
        self.tracker.clear();
        Ok(summary)
    }

    /// Cycle until `shutdown` fires or its sender is dropped.
    pub async fn poll(&mut self, mut shutdown: watch::Receiver<()>) -> Result<()> {
        tracing::info!(
            service = self.handler.name(),
            queue = self.source.name(),
            messages_per_run = self.messages_per_run,
            "poller: starting"
        );
        loop {
            if shutdown.has_changed().unwrap_or(true) {
                tracing::info!(service = self.handler.name(), "poller: shutdown requested");
                break;
            }
            let idle = match self.run_once().await {
                Ok(summary) => summary.received == 0,
                Err(e) => {
                    tracing::warn!(
                        service = self.handler.name(),
                        error = %e,
                        "poller: failed to receive messages"
                    );
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_sleep) => {},
                    _ = shutdown.changed() => break,
                }
            }
        }
        tracing::info!(service = self.handler.name(), "poller: exiting");
        Ok(())
    }
}
