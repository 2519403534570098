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
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

use crate::domain::TrackerStats;

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` filter.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_all: u64,
    pub messages_handled: u64,
    pub messages_failed: u64,
    pub last_cycle_unix: u64,
}

/// Counters published by a poller and read by the health server.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    messages_all: AtomicU64,
    messages_handled: AtomicU64,
    messages_failed: AtomicU64,
    last_cycle_unix: AtomicU64,
}

impl ServiceMetrics {
    pub const fn new() -> Self {
        Self {
            messages_all: AtomicU64::new(0),
            messages_handled: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            last_cycle_unix: AtomicU64::new(0),
        }
    }

    /// Mirror the tracker counters at the end of a cycle.
    pub fn record_cycle(&self, stats: TrackerStats) {
        self.messages_all.store(stats.all, Ordering::SeqCst);
        self.messages_handled.store(stats.handled, Ordering::SeqCst);
        self.messages_failed.store(stats.failed, Ordering::SeqCst);
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_cycle_unix.store(now_unix, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_all: self.messages_all.load(Ordering::SeqCst),
            messages_handled: self.messages_handled.load(Ordering::SeqCst),
            messages_failed: self.messages_failed.load(Ordering::SeqCst),
            last_cycle_unix: self.last_cycle_unix.load(Ordering::SeqCst),
        }
    }

    /// Prometheus text exposition, labelled with the service name.
    pub fn render_prometheus(&self, service: &str) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        let series = [
            (
                "snoindex_messages_all_total",
                "counter",
                "Messages received",
                s.messages_all,
            ),
            (
                "snoindex_messages_handled_total",
                "counter",
                "Messages handled and acknowledged",
                s.messages_handled,
            ),
            (
                "snoindex_messages_failed_total",
                "counter",
                "Messages that failed processing",
                s.messages_failed,
            ),
            (
                "snoindex_last_cycle_unix_seconds",
                "gauge",
                "End of the last poll cycle (unix seconds)",
                s.last_cycle_unix,
            ),
        ];
        for (name, kind, help, value) in series {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} {}\n", name, kind));
            out.push_str(&format!("{}{{service=\"{}\"}} {}\n", name, service, value));
        }
        out
    }
}
