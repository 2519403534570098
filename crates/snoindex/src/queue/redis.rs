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

//! Redis-backed queue with visibility timeouts.
//!
//! Layout for a queue named `q`:
//! - `snoindex:queue:q` list of pending envelopes (LPUSH in, RPOP out)
//! - `snoindex:queue:q:inflight` sorted set of receipt handles scored by
//!   visibility deadline in unix millis
//! - `snoindex:queue:q:payloads` hash of receipt handle to envelope
//! - `snoindex:queues` set of queue names that exist
//!
//! Receiving first moves expired in-flight messages back to the pending list,
//! so an unacknowledged message is redelivered once its visibility timeout
//! passes.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::{MessageQueue, QueueInfo, QueueProps};
use crate::domain::{InboundMessage, OutboundMessage};
use crate::retry::{wait_until, RetryPolicy};
use crate::{Result, SnoindexError};

const QUEUE_REGISTRY_KEY: &str = "snoindex:queues";
const REDIS_MAX_BATCH: usize = 10;

const RECEIVE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, handle in ipairs(expired) do
  local raw = redis.call('HGET', KEYS[3], handle)
  if raw then
    redis.call('RPUSH', KEYS[1], raw)
  end
  redis.call('HDEL', KEYS[3], handle)
  redis.call('ZREM', KEYS[2], handle)
end
local out = {}
for i = 1, tonumber(ARGV[3]) do
  local raw = redis.call('RPOP', KEYS[1])
  if not raw then
    break
  end
  local handle = ARGV[4] .. ':' .. i
  redis.call('HSET', KEYS[3], handle, raw)
  redis.call('ZADD', KEYS[2], ARGV[2], handle)
  table.insert(out, handle)
  table.insert(out, raw)
end
return out
"#;

const DELETE_SCRIPT: &str = r#"
local n = 0
for _, handle in ipairs(ARGV) do
  n = n + redis.call('ZREM', KEYS[1], handle)
  redis.call('HDEL', KEYS[2], handle)
end
return n
"#;

/// What is stored in Redis for each message.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    dedup_key: String,
    checksum: String,
    body: String,
}

/// Insert credentials into a Redis URL when it carries none.
///
/// URLs without a scheme (`host:6379`) get `redis://` prepended first.
pub fn redis_url_with_credentials(
    url_str: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> String {
    let normalized = if url_str.contains("://") {
        url_str.to_string()
    } else {
        format!("redis://{}", url_str)
    };
    let Ok(mut url) = url::Url::parse(&normalized) else {
        return normalized;
    };
    if url.username().is_empty() && url.password().is_none() {
        if let Some(u) = username {
            let _ = url.set_username(u);
        }
        if let Some(p) = password {
            let _ = url.set_password(Some(p));
        }
    }
    let s = url.to_string();
    // drop the lone trailing slash url::Url adds for an empty path
    if url.path() == "/" && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s
    }
}

/// Build a connection pool for `url`. Creating the pool does not connect.
pub fn create_redis_pool(url: &str) -> Result<Pool> {
    RedisConfig::from_url(url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| SnoindexError::Config(format!("redis pool for {}: {}", url, e)))
}

#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
    name: String,
    props: QueueProps,
}

impl RedisQueue {
    pub fn new(pool: Pool, name: impl Into<String>, props: QueueProps) -> Self {
        Self {
            pool,
            name: name.into(),
            props,
        }
    }

    fn pending_key(&self) -> String {
        format!("snoindex:queue:{}", self.name)
    }

    fn inflight_key(&self) -> String {
        format!("snoindex:queue:{}:inflight", self.name)
    }

    fn payloads_key(&self) -> String {
        format!("snoindex:queue:{}:payloads", self.name)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Register the queue so readiness checks find it.
    pub async fn create(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.sadd(QUEUE_REGISTRY_KEY, &self.name).await?;
        Ok(())
    }

    /// Drop every pending and in-flight message.
    pub async fn purge(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .del(vec![
                self.pending_key(),
                self.inflight_key(),
                self.payloads_key(),
            ])
            .await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn receive_once(&self, max: usize) -> Result<Vec<InboundMessage>> {
        let mut conn = self.connection().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let deadline_ms = now_ms + self.props.visibility_timeout.as_millis() as i64;
        let receipt_prefix = uuid::Uuid::new_v4().simple().to_string();
        let flat: Vec<String> = redis::cmd("EVAL")
            .arg(RECEIVE_SCRIPT)
            .arg(3)
            .arg(self.pending_key())
            .arg(self.inflight_key())
            .arg(self.payloads_key())
            .arg(now_ms)
            .arg(deadline_ms)
            .arg(max)
            .arg(&receipt_prefix)
            .query_async(&mut conn)
            .await?;

        Ok(flat
            .chunks_exact(2)
            .map(|pair| decode_entry(&self.name, &pair[0], &pair[1]))
            .collect())
    }

    /// Register the queue unless it exists, retrying while Redis is
    /// unreachable.
    pub async fn create_if_missing(&self, policy: &RetryPolicy) -> Result<()> {
        let what = format!("queue {} registration", self.name);
        wait_until(policy, &what, || async {
            if !self.exists().await? {
                self.create().await?;
                tracing::info!(queue = %self.name, "redis queue: created");
            }
            Ok(true)
        })
        .await?;
        Ok(())
    }
}

/// Turn one stored entry into a message. An entry that is not a valid
/// envelope is handed over with its raw text as the body so that only
/// that message fails downstream.
fn decode_entry(queue: &str, handle: &str, raw: &str) -> InboundMessage {
    match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => InboundMessage {
            message_id: envelope.id,
            receipt_handle: handle.to_string(),
            checksum: envelope.checksum,
            body: envelope.body,
        },
        Err(e) => {
            tracing::warn!(queue = %queue, handle = %handle, error = %e, "redis queue: corrupt envelope");
            InboundMessage {
                message_id: handle.to_string(),
                receipt_handle: handle.to_string(),
                checksum: String::new(),
                body: raw.to_string(),
            }
        }
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_batch_size(&self) -> usize {
        REDIS_MAX_BATCH
    }

    /// Polls every 100ms until a message arrives or the wait time passes.
    async fn receive(&self, max: usize) -> Result<Vec<InboundMessage>> {
        let started = std::time::Instant::now();
        loop {
            let messages = self.receive_once(max).await?;
            if !messages.is_empty() || started.elapsed() >= self.props.wait_time {
                return Ok(messages);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn send_batch(&self, messages: &[OutboundMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut raw = Vec::with_capacity(messages.len());
        for m in messages {
            let body = m.str_body();
            let envelope = Envelope {
                id: uuid::Uuid::new_v4().to_string(),
                dedup_key: m.unique_id.clone(),
                checksum: format!("{:x}", Sha256::digest(body.as_bytes())),
                body,
            };
            raw.push(serde_json::to_string(&envelope)?);
        }
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(self.pending_key(), raw).await?;
        Ok(())
    }

    async fn delete_batch(&self, messages: &[InboundMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(DELETE_SCRIPT)
            .arg(2)
            .arg(self.inflight_key())
            .arg(self.payloads_key());
        for m in messages {
            cmd.arg(&m.receipt_handle);
        }
        let removed: i64 = cmd.query_async(&mut conn).await?;
        if (removed as usize) < messages.len() {
            // visibility timeout passed before the ack; those will be redelivered
            tracing::warn!(
                queue = %self.name,
                expected = messages.len(),
                removed,
                "some messages were no longer in flight when acknowledged"
            );
        }
        Ok(())
    }

    async fn info(&self) -> Result<QueueInfo> {
        let mut conn = self.connection().await?;
        let visible: u64 = conn.llen(self.pending_key()).await?;
        let in_flight: u64 = conn.zcard(self.inflight_key()).await?;
        Ok(QueueInfo { visible, in_flight })
    }

    async fn exists(&self) -> Result<bool> {
        let mut conn = self.connection().await?;
        let found: bool = conn.sismember(QUEUE_REGISTRY_KEY, &self.name).await?;
        Ok(found)
    }
}
