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

//! OpenSearch REST client covering the handful of endpoints the services use.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::{related_uuids_query, IndexOutcome, IndexedDocument, SearchIndex};
use crate::domain::Item;
use crate::retry::RetryPolicy;
use crate::{Result, SnoindexError};

const SCROLL_KEEP_ALIVE: &str = "2m";
const SCROLL_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct OpensearchProps {
    pub url: String,
    pub resources_index: Option<String>,
    pub request_timeout: Duration,
    /// Attempts per request when the connection drops, times out, or the
    /// cluster answers 502/503/504.
    pub request_retry: RetryPolicy,
}

impl OpensearchProps {
    pub fn new(url: impl Into<String>, resources_index: Option<String>) -> Self {
        Self {
            url: url.into(),
            resources_index,
            request_timeout: Duration::from_secs(60),
            request_retry: RetryPolicy::new(Duration::from_millis(500), 4),
        }
    }
}

#[derive(Clone)]
pub struct Opensearch {
    client: Client,
    props: OpensearchProps,
}

fn search_err(context: &str, e: impl std::fmt::Display) -> SnoindexError {
    SnoindexError::Search(format!("{}: {}", context, e))
}

impl Opensearch {
    pub fn new(props: OpensearchProps) -> Result<Self> {
        let client = Client::builder()
            .timeout(props.request_timeout)
            .build()
            .map_err(|e| search_err("building http client", e))?;
        Ok(Self { client, props })
    }

    pub fn props(&self) -> &OpensearchProps {
        &self.props
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.props.url.trim_end_matches('/'), path)
    }

    /// Send the request built by `build`, rebuilding and resending it after
    /// connection failures, timeouts and gateway errors.
    async fn send(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let policy = &self.props.request_retry;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let last = attempt >= policy.max_attempts;
            match build().send().await {
                Ok(resp) if last || !retryable_status(resp.status()) => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(what = %what, attempt, status = %resp.status(), "opensearch: retrying");
                }
                Err(e) if !last && (e.is_connect() || e.is_timeout()) => {
                    tracing::debug!(what = %what, attempt, error = %e, "opensearch: retrying");
                }
                Err(e) => return Err(search_err(what, e)),
            }
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    /// Path prefix for searches: the resources index, or every index.
    fn search_target(&self) -> &str {
        self.props.resources_index.as_deref().unwrap_or("_all")
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        let resp = self
            .send(path, || self.client.post(&url).json(body))
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(search_err(path, format!("{} {}", status, text)));
        }
        resp.json().await.map_err(|e| search_err(path, e))
    }

    /// Run `body` as a scroll search and collect every hit.
    async fn scan(&self, mut body: Value) -> Result<Vec<Value>> {
        body["size"] = json!(SCROLL_PAGE_SIZE);
        body["sort"] = json!(["_doc"]);
        let path = format!("{}/_search?scroll={}", self.search_target(), SCROLL_KEEP_ALIVE);
        let mut page = self.post_json(&path, &body).await?;
        let mut hits = Vec::new();
        let mut scroll_id = page
            .get("_scroll_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        loop {
            let batch = page["hits"]["hits"].as_array().cloned().unwrap_or_default();
            if batch.is_empty() {
                break;
            }
            hits.extend(batch);
            let Some(id) = scroll_id.clone() else {
                break;
            };
            page = self
                .post_json(
                    "_search/scroll",
                    &json!({"scroll": SCROLL_KEEP_ALIVE, "scroll_id": id}),
                )
                .await?;
            if let Some(next) = page.get("_scroll_id").and_then(|v| v.as_str()) {
                scroll_id = Some(next.to_string());
            }
        }
        if let Some(id) = scroll_id {
            let cleared = self
                .client
                .delete(self.url("_search/scroll"))
                .json(&json!({"scroll_id": [id]}))
                .send()
                .await;
            if let Err(e) = cleared {
                tracing::debug!(error = %e, "failed to clear scroll context");
            }
        }
        Ok(hits)
    }
}

fn retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// NDJSON body for a `_bulk` request indexing `items` with external versions.
pub fn bulk_body(items: &[Item]) -> String {
    let mut out = String::new();
    for item in items {
        let action = json!({
            "index": {
                "_index": item.index,
                "_id": item.uuid,
                "version": item.version,
                "version_type": "external",
            }
        });
        out.push_str(&action.to_string());
        out.push('\n');
        out.push_str(&item.data.to_string());
        out.push('\n');
    }
    out
}

#[async_trait]
impl SearchIndex for Opensearch {
    fn resources_index(&self) -> Option<&str> {
        self.props.resources_index.as_deref()
    }

    async fn index_item(&self, item: &Item) -> Result<IndexOutcome> {
        let path = format!("{}/_doc/{}", item.index, item.uuid);
        let url = self.url(&path);
        let version = item.version.to_string();
        let resp = self
            .send(&path, || {
                self.client
                    .put(&url)
                    .query(&[("version", version.as_str()), ("version_type", "external")])
                    .json(&item.data)
            })
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(IndexOutcome::Indexed),
            StatusCode::CONFLICT => Ok(IndexOutcome::Conflict),
            s => {
                let text = resp.text().await.unwrap_or_default();
                Err(search_err(&path, format!("{} {}", s, text)))
            }
        }
    }

    async fn bulk_index_items(&self, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let url = self.url("_bulk");
        let body = bulk_body(items);
        let resp = self
            .send("_bulk", || {
                self.client
                    .post(&url)
                    .header("content-type", "application/x-ndjson")
                    .body(body.clone())
            })
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(search_err("_bulk", format!("{} {}", status, text)));
        }
        let body: Value = resp.json().await.map_err(|e| search_err("_bulk", e))?;
        if body.get("errors").and_then(|v| v.as_bool()).unwrap_or(false) {
            tracing::info!(items = items.len(), "bulk request reported item errors");
        }
        Ok(())
    }

    async fn delete_from_other_indices(&self, uuid: &str, keep_index: &str) -> Result<()> {
        let body = json!({
            "query": {
                "bool": {
                    "filter": [{"ids": {"values": [uuid]}}],
                    "must_not": [{"term": {"_index": keep_index}}],
                }
            }
        });
        let path = format!("{}/_delete_by_query?conflicts=proceed", self.search_target());
        self.post_json(&path, &body).await?;
        Ok(())
    }

    async fn refresh_resources_index(&self) -> Result<()> {
        if let Some(index) = &self.props.resources_index {
            self.post_json(&format!("{}/_refresh", index), &json!({}))
                .await?;
        }
        Ok(())
    }

    async fn search_related(&self, updated: &[String], renamed: &[String]) -> Result<Vec<String>> {
        let hits = self.scan(related_uuids_query(updated, renamed)).await?;
        Ok(hits
            .iter()
            .filter_map(|h| h.get("_id").and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }

    async fn resources_index_exists(&self) -> Result<bool> {
        let Some(index) = &self.props.resources_index else {
            return Ok(true);
        };
        let url = self.url(index);
        let resp = self.send(index, || self.client.head(&url)).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(search_err(index, s)),
        }
    }

    async fn all_documents(&self) -> Result<Vec<IndexedDocument>> {
        let hits = self
            .scan(json!({"query": {"match_all": {}}, "version": true}))
            .await?;
        let mut docs = Vec::with_capacity(hits.len());
        for hit in hits {
            docs.push(IndexedDocument {
                index: hit["_index"].as_str().unwrap_or_default().to_string(),
                uuid: hit["_id"].as_str().unwrap_or_default().to_string(),
                version: hit["_version"].as_u64().unwrap_or_default(),
                source: hit.get("_source").cloned().unwrap_or(Value::Null),
            });
        }
        Ok(docs)
    }
}
