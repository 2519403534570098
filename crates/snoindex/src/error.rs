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

use thiserror::Error;

/// Typed errors shared by the adapters and services.
///
/// Version conflicts reported by the search engine are not errors; see
/// [`crate::search::IndexOutcome`].
#[derive(Debug, Error)]
pub enum SnoindexError {
    /// Queue transport unreachable or returned an error.
    #[error("queue error: {0}")]
    Queue(String),
    /// Search engine unreachable or rejected a request.
    #[error("search error: {0}")]
    Search(String),
    /// Content store unreachable or returned an unusable response.
    #[error("backend error: {0}")]
    Backend(String),
    /// Message body or fetched record does not have the expected shape.
    #[error("data shape error: {0}")]
    DataShape(String),
    /// Required configuration is missing or invalid. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
    /// A readiness check gave up after exhausting its retry policy.
    #[error("{what} not ready after {attempts} attempts")]
    NotReady { what: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, SnoindexError>;

impl SnoindexError {
    /// Dependency errors that a later poll cycle may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SnoindexError::Queue(_) | SnoindexError::Search(_) | SnoindexError::Backend(_)
        )
    }
}

impl From<serde_json::Error> for SnoindexError {
    fn from(e: serde_json::Error) -> Self {
        SnoindexError::DataShape(e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for SnoindexError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        SnoindexError::Queue(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for SnoindexError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        SnoindexError::Queue(e.to_string())
    }
}

impl From<toml::de::Error> for SnoindexError {
    fn from(e: toml::de::Error) -> Self {
        SnoindexError::Config(e.to_string())
    }
}
