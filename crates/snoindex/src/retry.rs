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

//! Readiness waiting with linear backoff.
//!
//! Services refuse to poll until their queues, search index and backend are
//! reachable. Each check sleeps `attempt * step` between failures. The
//! default attempt limit is large enough to behave like waiting forever
//! under a supervisor, while tests can use [`RetryPolicy::immediate`].

use std::future::Future;
use std::time::Duration;

use crate::{Result, SnoindexError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub step: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(5),
            max_attempts: 100_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self { step, max_attempts }
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, max_attempts)
    }

    /// Delay after the `attempt`-th failed check (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// Run `check` until it returns `Ok(true)`.
///
/// `Ok(false)` and transient errors count as a failed attempt. Other errors
/// are returned immediately.
pub async fn wait_until<F, Fut>(policy: &RetryPolicy, what: &str, mut check: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    tracing::warn!(what = %what, "waiting for dependency");
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match check().await {
            Ok(true) => {
                tracing::warn!(what = %what, attempt, "dependency ready");
                return Ok(attempt);
            }
            Ok(false) => {
                tracing::debug!(what = %what, attempt, "dependency not ready yet");
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(what = %what, attempt, error = %e, "dependency check failed");
            }
            Err(e) => return Err(e),
        }
        if attempt >= policy.max_attempts {
            return Err(SnoindexError::NotReady {
                what: what.to_string(),
                attempts: attempt,
            });
        }
        tokio::time::sleep(policy.delay_for(attempt)).await;
    }
}
