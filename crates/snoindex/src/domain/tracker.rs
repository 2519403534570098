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

use serde::Serialize;

use super::message::InboundMessage;

/// Cumulative counters, as reported every hundred messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub all: u64,
    pub handled: u64,
    pub failed: u64,
}

/// Keeps the messages of the current poll cycle and counters across cycles.
///
/// `clear` drops the per-cycle messages only; counters survive until
/// `clear_stats`.
#[derive(Debug, Default)]
pub struct MessageTracker {
    pub new_messages: Vec<InboundMessage>,
    pub handled_messages: Vec<InboundMessage>,
    pub failed_messages: Vec<InboundMessage>,
    number_all_messages: u64,
    number_handled_messages: u64,
    number_failed_messages: u64,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_stats(&mut self) {
        self.number_all_messages = 0;
        self.number_handled_messages = 0;
        self.number_failed_messages = 0;
    }

    pub fn clear(&mut self) {
        self.new_messages.clear();
        self.handled_messages.clear();
        self.failed_messages.clear();
    }

    pub fn add_new_messages(&mut self, messages: impl IntoIterator<Item = InboundMessage>) {
        let before = self.new_messages.len();
        self.new_messages.extend(messages);
        self.number_all_messages += (self.new_messages.len() - before) as u64;
    }

    pub fn add_handled_messages(&mut self, messages: impl IntoIterator<Item = InboundMessage>) {
        let before = self.handled_messages.len();
        self.handled_messages.extend(messages);
        self.number_handled_messages += (self.handled_messages.len() - before) as u64;
    }

    pub fn add_failed_messages(&mut self, messages: impl IntoIterator<Item = InboundMessage>) {
        let before = self.failed_messages.len();
        self.failed_messages.extend(messages);
        self.number_failed_messages += (self.failed_messages.len() - before) as u64;
    }

    pub fn number_all_messages(&self) -> u64 {
        self.number_all_messages
    }

    pub fn number_handled_messages(&self) -> u64 {
        self.number_handled_messages
    }

    pub fn number_failed_messages(&self) -> u64 {
        self.number_failed_messages
    }

    /// True once every new message of this cycle was classified exactly once.
    pub fn is_settled(&self) -> bool {
        self.new_messages.len() == self.handled_messages.len() + self.failed_messages.len()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            all: self.number_all_messages,
            handled: self.number_handled_messages,
            failed: self.number_failed_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            receipt_handle: format!("{}-receipt", id),
            checksum: "ccc".into(),
            body: "{}".into(),
        }
    }

    fn three() -> Vec<InboundMessage> {
        (0..3).map(|i| message(&i.to_string())).collect()
    }

    #[test]
    fn starts_empty() {
        let mt = MessageTracker::new();
        assert_eq!(mt.stats(), TrackerStats::default());
        assert!(mt.new_messages.is_empty());
        assert!(mt.handled_messages.is_empty());
        assert!(mt.failed_messages.is_empty());
    }

    #[test]
    fn clear_stats_keeps_messages() {
        let mut mt = MessageTracker::new();
        mt.add_new_messages([message("a")]);
        assert_eq!(mt.number_all_messages(), 1);
        mt.clear_stats();
        assert_eq!(mt.number_all_messages(), 0);
        assert_eq!(mt.new_messages.len(), 1);
    }

    #[test]
    fn clear_keeps_counters() {
        let mut mt = MessageTracker::new();
        mt.add_new_messages(three());
        mt.add_failed_messages(three());
        mt.add_handled_messages(three());
        assert_eq!(
            mt.stats(),
            TrackerStats {
                all: 3,
                handled: 3,
                failed: 3
            }
        );
        assert_eq!(mt.new_messages, three());
        mt.clear();
        assert_eq!(mt.stats().all, 3);
        assert!(mt.new_messages.is_empty());
        assert!(mt.handled_messages.is_empty());
        assert!(mt.failed_messages.is_empty());
    }

    #[test]
    fn counters_accumulate_across_cycles() {
        let mut mt = MessageTracker::new();
        mt.add_new_messages(three());
        mt.clear();
        mt.add_new_messages(three());
        mt.add_new_messages(three());
        assert_eq!(mt.number_all_messages(), 9);
        assert_eq!(mt.new_messages.len(), 6);
        mt.clear();
        assert!(mt.new_messages.is_empty());
        assert_eq!(mt.number_all_messages(), 9);
    }

    #[test]
    fn settled_when_every_message_is_classified() {
        let mut mt = MessageTracker::new();
        mt.add_new_messages(three());
        assert!(!mt.is_settled());
        let mut msgs = three();
        let last = msgs.pop().unwrap();
        mt.add_handled_messages(msgs);
        mt.add_failed_messages([last]);
        assert!(mt.is_settled());
        assert_eq!(mt.stats().handled + mt.stats().failed, mt.stats().all);
    }
}
