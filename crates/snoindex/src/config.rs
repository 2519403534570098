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

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::queue::redis::redis_url_with_credentials;
use crate::queue::QueueProps;
use crate::remote::PortalProps;
use crate::retry::RetryPolicy;
use crate::search::OpensearchProps;
use crate::services::IndexingProps;
use crate::{Result, SnoindexError};

/// Which of the four services a process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    Invalidation,
    BulkInvalidation,
    Indexing,
    BulkIndexing,
}

impl ServiceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Invalidation => "invalidation",
            ServiceKind::BulkInvalidation => "bulk-invalidation",
            ServiceKind::Indexing => "indexing",
            ServiceKind::BulkIndexing => "bulk-indexing",
        }
    }

    /// Reads transactions and writes invalidation notices.
    pub fn is_invalidation(&self) -> bool {
        matches!(
            self,
            ServiceKind::Invalidation | ServiceKind::BulkInvalidation
        )
    }

    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            ServiceKind::BulkInvalidation | ServiceKind::BulkIndexing
        )
    }

    fn default_messages_per_run(&self) -> usize {
        match self {
            ServiceKind::Invalidation => 1,
            ServiceKind::BulkInvalidation => 5000,
            ServiceKind::Indexing => 1,
            ServiceKind::BulkIndexing => 1000,
        }
    }

    fn default_visibility_timeout(&self) -> Duration {
        if self.is_bulk() {
            Duration::from_secs(1800)
        } else {
            Duration::from_secs(60)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    pub kind: ServiceKind,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub transaction_queue: Option<String>,
    pub invalidation_queue: Option<String>,
    pub opensearch_url: Option<String>,
    pub resources_index: Option<String>,
    pub backend_url: Option<String>,
    pub backend_key: Option<String>,
    pub backend_secret_key: Option<String>,
    pub messages_per_run: usize,
    pub related_uuids_search_batch_size: usize,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
    pub readiness: RetryPolicy,
    pub fetch_concurrency: usize,
    pub delete_stale_copies: bool,
    pub create_missing_queues: bool,
    pub metrics_port: Option<u16>,
}

impl ServiceConfig {
    pub fn defaults(kind: ServiceKind) -> Self {
        Self {
            kind,
            redis_url: None,
            redis_username: None,
            redis_password: None,
            transaction_queue: None,
            invalidation_queue: None,
            opensearch_url: None,
            resources_index: None,
            backend_url: None,
            backend_key: None,
            backend_secret_key: None,
            messages_per_run: kind.default_messages_per_run(),
            related_uuids_search_batch_size: 1000,
            visibility_timeout: kind.default_visibility_timeout(),
            wait_time: Duration::from_secs(20),
            readiness: RetryPolicy::default(),
            fetch_concurrency: 1,
            delete_stale_copies: false,
            create_missing_queues: false,
            metrics_port: None,
        }
    }

    fn required<'a>(&self, field: &str, value: &'a Option<String>) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                SnoindexError::Config(format!(
                    "{} is required for the {} service",
                    field,
                    self.kind.name()
                ))
            })
    }

    /// Check every field this kind of service needs.
    pub fn validate(&self) -> Result<()> {
        self.redis_url()?;
        self.invalidation_queue()?;
        self.required("opensearch_url", &self.opensearch_url)?;
        if self.kind.is_invalidation() {
            self.transaction_queue()?;
        } else {
            self.portal_props()?;
        }
        if self.messages_per_run == 0 {
            return Err(SnoindexError::Config(
                "messages_per_run must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn redis_url(&self) -> Result<&str> {
        self.required("redis_url", &self.redis_url)
    }

    /// `redis_url` with the configured credentials filled in when the URL
    /// carries none.
    pub fn redis_connection_url(&self) -> Result<String> {
        Ok(redis_url_with_credentials(
            self.redis_url()?,
            self.redis_username.as_deref(),
            self.redis_password.as_deref(),
        ))
    }

    pub fn transaction_queue(&self) -> Result<&str> {
        self.required("transaction_queue", &self.transaction_queue)
    }

    pub fn invalidation_queue(&self) -> Result<&str> {
        self.required("invalidation_queue", &self.invalidation_queue)
    }

    /// Knobs for the queue the service consumes.
    pub fn source_queue_props(&self) -> QueueProps {
        QueueProps {
            wait_time: self.wait_time,
            visibility_timeout: self.visibility_timeout,
        }
    }

    /// Knobs for queues the service only writes to.
    pub fn destination_queue_props(&self) -> QueueProps {
        QueueProps {
            wait_time: self.wait_time,
            ..QueueProps::default()
        }
    }

    pub fn opensearch_props(&self) -> Result<OpensearchProps> {
        let url = self.required("opensearch_url", &self.opensearch_url)?;
        Ok(OpensearchProps::new(url, self.resources_index.clone()))
    }

    pub fn portal_props(&self) -> Result<PortalProps> {
        Ok(PortalProps::new(
            self.required("backend_url", &self.backend_url)?,
            self.required("backend_key", &self.backend_key)?,
            self.required("backend_secret_key", &self.backend_secret_key)?,
        ))
    }

    pub fn indexing_props(&self) -> IndexingProps {
        IndexingProps {
            delete_stale_copies: self.delete_stale_copies,
            fetch_concurrency: self.fetch_concurrency.max(1),
        }
    }
}

/// CLI-level options that binaries pass to `load_service_config`.
#[derive(Clone, Debug, Default)]
pub struct MergeOpts {
    pub config_path: Option<PathBuf>,
    pub cli_redis_url: Option<String>,
    pub cli_opensearch_url: Option<String>,
    pub cli_resources_index: Option<String>,
    pub cli_messages_per_run: Option<usize>,
    pub cli_metrics_port: Option<u16>,
    pub cli_create_missing_queues: bool,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Unparseable values are ignored.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn merge_file(base: &mut ServiceConfig, v: &toml::Value) {
    let string = |key: &str| v.get(key).and_then(|x| x.as_str()).map(str::to_string);
    let integer = |key: &str| {
        v.get(key)
            .and_then(|x| x.as_integer())
            .and_then(|i| u64::try_from(i).ok())
    };
    let boolean = |key: &str| v.get(key).and_then(|x| x.as_bool());

    if let Some(s) = string("redis_url") {
        base.redis_url = Some(s);
    }
    if let Some(s) = string("redis_username") {
        base.redis_username = Some(s);
    }
    if let Some(s) = string("redis_password") {
        base.redis_password = Some(s);
    }
    if let Some(s) = string("transaction_queue") {
        base.transaction_queue = Some(s);
    }
    if let Some(s) = string("invalidation_queue") {
        base.invalidation_queue = Some(s);
    }
    if let Some(s) = string("opensearch_url") {
        base.opensearch_url = Some(s);
    }
    if let Some(s) = string("resources_index") {
        base.resources_index = Some(s);
    }
    if let Some(s) = string("backend_url") {
        base.backend_url = Some(s);
    }
    if let Some(s) = string("backend_key") {
        base.backend_key = Some(s);
    }
    if let Some(s) = string("backend_secret_key") {
        base.backend_secret_key = Some(s);
    }
    if let Some(n) = integer("messages_per_run") {
        base.messages_per_run = n as usize;
    }
    if let Some(n) = integer("related_uuids_search_batch_size") {
        base.related_uuids_search_batch_size = n as usize;
    }
    if let Some(n) = integer("visibility_timeout_seconds") {
        base.visibility_timeout = Duration::from_secs(n);
    }
    if let Some(n) = integer("wait_time_seconds") {
        base.wait_time = Duration::from_secs(n);
    }
    if let Some(n) = integer("readiness_step_seconds") {
        base.readiness.step = Duration::from_secs(n);
    }
    if let Some(n) = integer("readiness_max_attempts") {
        base.readiness.max_attempts = u32::try_from(n).unwrap_or(u32::MAX);
    }
    if let Some(n) = integer("fetch_concurrency") {
        base.fetch_concurrency = n as usize;
    }
    if let Some(b) = boolean("delete_stale_copies") {
        base.delete_stale_copies = b;
    }
    if let Some(b) = boolean("create_missing_queues") {
        base.create_missing_queues = b;
    }
    if let Some(p) = integer("metrics_port").and_then(|p| u16::try_from(p).ok()) {
        base.metrics_port = Some(p);
    }
}

fn merge_env(base: &mut ServiceConfig) {
    if let Some(s) = env_string("REDIS_URL") {
        base.redis_url = Some(s);
    }
    if let Some(s) = env_string("REDIS_USERNAME") {
        base.redis_username = Some(s);
    }
    if let Some(s) = env_string("REDIS_PASSWORD") {
        base.redis_password = Some(s);
    }
    if let Some(s) = env_string("TRANSACTION_QUEUE") {
        base.transaction_queue = Some(s);
    }
    if let Some(s) = env_string("INVALIDATION_QUEUE") {
        base.invalidation_queue = Some(s);
    }
    if let Some(s) = env_string("OPENSEARCH_URL") {
        base.opensearch_url = Some(s);
    }
    if let Some(s) = env_string("RESOURCES_INDEX") {
        base.resources_index = Some(s);
    }
    if let Some(s) = env_string("BACKEND_URL") {
        base.backend_url = Some(s);
    }
    if let Some(s) = env_string("BACKEND_KEY") {
        base.backend_key = Some(s);
    }
    if let Some(s) = env_string("BACKEND_SECRET_KEY") {
        base.backend_secret_key = Some(s);
    }
    if let Some(n) = env_parse("SNOINDEX_MESSAGES_PER_RUN") {
        base.messages_per_run = n;
    }
    if let Some(n) = env_parse("SNOINDEX_RELATED_BATCH_SIZE") {
        base.related_uuids_search_batch_size = n;
    }
    if let Some(n) = env_parse("SNOINDEX_VISIBILITY_TIMEOUT_SECONDS") {
        base.visibility_timeout = Duration::from_secs(n);
    }
    if let Some(n) = env_parse("SNOINDEX_WAIT_TIME_SECONDS") {
        base.wait_time = Duration::from_secs(n);
    }
    if let Some(n) = env_parse("SNOINDEX_READINESS_STEP_SECONDS") {
        base.readiness.step = Duration::from_secs(n);
    }
    if let Some(n) = env_parse("SNOINDEX_READINESS_MAX_ATTEMPTS") {
        base.readiness.max_attempts = n;
    }
    if let Some(n) = env_parse("SNOINDEX_FETCH_CONCURRENCY") {
        base.fetch_concurrency = n;
    }
    if let Some(b) = env_parse("SNOINDEX_DELETE_STALE_COPIES") {
        base.delete_stale_copies = b;
    }
    if let Some(b) = env_parse("SNOINDEX_CREATE_MISSING_QUEUES") {
        base.create_missing_queues = b;
    }
    if let Some(p) = env_parse("SNOINDEX_METRICS_PORT") {
        base.metrics_port = Some(p);
    }
}

/// Load and merge a ServiceConfig from: defaults <- config file <- env vars <- CLI,
/// then validate the fields `kind` needs.
pub fn load_service_config(kind: ServiceKind, opts: MergeOpts) -> Result<ServiceConfig> {
    let mut base = ServiceConfig::defaults(kind);

    if let Some(path) = opts.config_path.as_ref() {
        if path.exists() {
            let s = fs::read_to_string(path).map_err(|e| {
                SnoindexError::Config(format!("reading {}: {}", path.display(), e))
            })?;
            let v: toml::Value = toml::from_str(&s)?;
            merge_file(&mut base, &v);
        } else {
            tracing::warn!(path = %path.display(), "config: file not found, skipping");
        }
    }

    merge_env(&mut base);

    // CLI overrides everything
    if let Some(s) = opts.cli_redis_url {
        base.redis_url = Some(s);
    }
    if let Some(s) = opts.cli_opensearch_url {
        base.opensearch_url = Some(s);
    }
    if let Some(s) = opts.cli_resources_index {
        base.resources_index = Some(s);
    }
    if let Some(n) = opts.cli_messages_per_run {
        base.messages_per_run = n;
    }
    if let Some(p) = opts.cli_metrics_port {
        base.metrics_port = Some(p);
    }
    if opts.cli_create_missing_queues {
        base.create_missing_queues = true;
    }

    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, EnvGuard};

    const VARS: &[&str] = &[
        "REDIS_URL",
        "REDIS_USERNAME",
        "REDIS_PASSWORD",
        "TRANSACTION_QUEUE",
        "INVALIDATION_QUEUE",
        "OPENSEARCH_URL",
        "RESOURCES_INDEX",
        "BACKEND_URL",
        "BACKEND_KEY",
        "BACKEND_SECRET_KEY",
        "SNOINDEX_MESSAGES_PER_RUN",
        "SNOINDEX_RELATED_BATCH_SIZE",
        "SNOINDEX_VISIBILITY_TIMEOUT_SECONDS",
        "SNOINDEX_WAIT_TIME_SECONDS",
        "SNOINDEX_READINESS_STEP_SECONDS",
        "SNOINDEX_READINESS_MAX_ATTEMPTS",
        "SNOINDEX_FETCH_CONCURRENCY",
        "SNOINDEX_DELETE_STALE_COPIES",
        "SNOINDEX_CREATE_MISSING_QUEUES",
        "SNOINDEX_METRICS_PORT",
    ];

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(tmp.path(), contents).unwrap();
        tmp
    }

    const INVALIDATION_TOML: &str = r#"
redis_url = "redis://file:6379"
transaction_queue = "tx-file"
invalidation_queue = "inv-file"
opensearch_url = "http://file:9200"
messages_per_run = 3
related_uuids_search_batch_size = 50
"#;

    #[test]
    fn per_kind_defaults() {
        let c = ServiceConfig::defaults(ServiceKind::BulkInvalidation);
        assert_eq!(c.messages_per_run, 5000);
        assert_eq!(c.visibility_timeout.as_secs(), 1800);
        assert_eq!(c.related_uuids_search_batch_size, 1000);
        let c = ServiceConfig::defaults(ServiceKind::BulkIndexing);
        assert_eq!(c.messages_per_run, 1000);
        let c = ServiceConfig::defaults(ServiceKind::Indexing);
        assert_eq!(c.messages_per_run, 1);
        assert_eq!(c.visibility_timeout.as_secs(), 60);
        assert_eq!(c.wait_time.as_secs(), 20);
        assert_eq!(c.readiness, RetryPolicy::default());
    }

    #[test]
    #[serial_test::serial]
    fn merge_file_env_cli_precedence() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(VARS);
        let tmp = write_toml(INVALIDATION_TOML);

        guard.set("SNOINDEX_MESSAGES_PER_RUN", "7");
        guard.set("REDIS_URL", "redis://env:6379");
        guard.set("SNOINDEX_RELATED_BATCH_SIZE", "20");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            cli_messages_per_run: Some(9),
            ..MergeOpts::default()
        };
        let got = load_service_config(ServiceKind::Invalidation, opts).expect("load");
        assert_eq!(got.messages_per_run, 9);
        assert_eq!(got.redis_url.as_deref(), Some("redis://env:6379"));
        assert_eq!(got.related_uuids_search_batch_size, 20);
        assert_eq!(got.transaction_queue.as_deref(), Some("tx-file"));
    }

    #[test]
    #[serial_test::serial]
    fn invalid_env_is_ignored() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(VARS);
        let tmp = write_toml(INVALIDATION_TOML);

        guard.set("SNOINDEX_MESSAGES_PER_RUN", "not-a-number");
        guard.set("SNOINDEX_DELETE_STALE_COPIES", "maybe");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..MergeOpts::default()
        };
        let got = load_service_config(ServiceKind::Invalidation, opts).expect("load");
        assert_eq!(got.messages_per_run, 3);
        assert!(!got.delete_stale_copies);
    }

    #[test]
    #[serial_test::serial]
    fn missing_required_field_names_it() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(VARS);
        let tmp = write_toml(INVALIDATION_TOML);

        // invalidation config lacks the backend settings indexing needs
        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..MergeOpts::default()
        };
        let err = load_service_config(ServiceKind::Indexing, opts).unwrap_err();
        match err {
            SnoindexError::Config(msg) => assert!(msg.contains("backend_url"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    #[serial_test::serial]
    fn indexing_from_env_only() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(VARS);
        guard.set("REDIS_URL", "redis://localhost:6379");
        guard.set("INVALIDATION_QUEUE", "inv");
        guard.set("OPENSEARCH_URL", "http://localhost:9200");
        guard.set("RESOURCES_INDEX", "snovault-resources");
        guard.set("BACKEND_URL", "http://portal");
        guard.set("BACKEND_KEY", "key");
        guard.set("BACKEND_SECRET_KEY", "secret");
        guard.set("SNOINDEX_FETCH_CONCURRENCY", "4");
        guard.set("SNOINDEX_DELETE_STALE_COPIES", "true");
        guard.set("SNOINDEX_METRICS_PORT", "9911");

        let got = load_service_config(ServiceKind::BulkIndexing, MergeOpts::default()).expect("load");
        assert_eq!(got.indexing_props().fetch_concurrency, 4);
        assert!(got.indexing_props().delete_stale_copies);
        assert_eq!(got.metrics_port, Some(9911));
        let portal = got.portal_props().unwrap();
        assert_eq!(portal.backend_url, "http://portal");
        assert_eq!(portal.auth, ("key".to_string(), "secret".to_string()));
        let os = got.opensearch_props().unwrap();
        assert_eq!(os.resources_index.as_deref(), Some("snovault-resources"));
        assert_eq!(got.source_queue_props().visibility_timeout.as_secs(), 1800);
    }

    #[test]
    #[serial_test::serial]
    fn redis_credentials_are_injected() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(VARS);
        let tmp = write_toml(INVALIDATION_TOML);
        guard.set("REDIS_URL", "cache:6379");
        guard.set("REDIS_USERNAME", "svc");
        guard.set("REDIS_PASSWORD", "pw");
        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..MergeOpts::default()
        };
        let got = load_service_config(ServiceKind::Invalidation, opts).expect("load");
        assert_eq!(got.redis_connection_url().unwrap(), "redis://svc:pw@cache:6379");
    }

    #[test]
    #[serial_test::serial]
    fn malformed_file_is_a_config_error() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(VARS);
        let tmp = write_toml("redis_url = [unterminated");
        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..MergeOpts::default()
        };
        assert!(matches!(
            load_service_config(ServiceKind::Invalidation, opts),
            Err(SnoindexError::Config(_))
        ));
    }
}
