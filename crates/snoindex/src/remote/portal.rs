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

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::domain::Item;
use crate::retry::{wait_until, RetryPolicy};
use crate::{Result, SnoindexError};

pub const INDEX_DATA_VIEW: &str = "@@index-data-external";

/// Source of truth for what a record's indexed document should look like.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Current representation of `uuid`, stamped with `version`.
    async fn get_item(&self, uuid: &str, version: u64) -> Result<Item>;

    /// Succeeds once the backend answers at all.
    async fn check_connection(&self) -> Result<()>;

    /// Whether the configured credentials are accepted.
    async fn access_key_exists(&self) -> Result<bool>;

    async fn wait_for_portal_connection(&self, policy: &RetryPolicy) -> Result<()> {
        wait_until(policy, "portal connection", move || async move {
            self.check_connection().await.map(|_| true)
        })
        .await?;
        Ok(())
    }

    async fn wait_for_access_key_to_exist(&self, policy: &RetryPolicy) -> Result<()> {
        wait_until(policy, "portal access key", || self.access_key_exists()).await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PortalProps {
    pub backend_url: String,
    pub auth: (String, String),
    pub index_data_view: String,
    pub request_timeout: Duration,
}

impl PortalProps {
    pub fn new(backend_url: impl Into<String>, key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            auth: (key.into(), secret.into()),
            index_data_view: INDEX_DATA_VIEW.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the content store.
#[derive(Clone)]
pub struct Portal {
    client: Client,
    props: PortalProps,
}

fn backend_err(context: &str, e: impl std::fmt::Display) -> SnoindexError {
    SnoindexError::Backend(format!("{}: {}", context, e))
}

impl Portal {
    pub fn new(props: PortalProps) -> Result<Self> {
        let client = Client::builder()
            .timeout(props.request_timeout)
            .build()
            .map_err(|e| backend_err("building http client", e))?;
        Ok(Self { client, props })
    }

    fn base_url(&self) -> &str {
        self.props.backend_url.trim_end_matches('/')
    }

    pub fn make_index_data_view_url_from_uuid(&self, uuid: &str) -> String {
        format!(
            "{}/{}/{}/?datastore=database",
            self.base_url(),
            uuid,
            self.props.index_data_view
        )
    }

    pub fn make_access_key_url(&self) -> String {
        format!("{}/access-keys/?datastore=database", self.base_url())
    }

    pub async fn get_raw_item_by_uuid(&self, uuid: &str) -> Result<Value> {
        let url = self.make_index_data_view_url_from_uuid(uuid);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.props.auth.0, Some(&self.props.auth.1))
            .send()
            .await
            .map_err(|e| backend_err(&url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(backend_err(&url, status));
        }
        resp.json()
            .await
            .map_err(|e| SnoindexError::DataShape(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl ContentStore for Portal {
    async fn get_item(&self, uuid: &str, version: u64) -> Result<Item> {
        let raw = self.get_raw_item_by_uuid(uuid).await?;
        Item::from_index_data(uuid, version, raw)
    }

    async fn check_connection(&self) -> Result<()> {
        self.client
            .get(&self.props.backend_url)
            .send()
            .await
            .map_err(|e| backend_err(&self.props.backend_url, e))?;
        Ok(())
    }

    async fn access_key_exists(&self) -> Result<bool> {
        let url = self.make_access_key_url();
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.props.auth.0, Some(&self.props.auth.1))
            .send()
            .await
            .map_err(|e| backend_err(&url, e))?;
        Ok(resp.status() == StatusCode::OK)
    }
}
