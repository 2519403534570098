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

//! Process bootstrap shared by the service binaries.

use clap::Args;
use deadpool_redis::Pool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use crate::config::{MergeOpts, ServiceConfig};
use crate::queue::{MessageQueue, QueueProps, RedisQueue};
use crate::retry::RetryPolicy;
use crate::services::{MessageHandler, Poller};
use crate::telemetry::ServiceMetrics;
use crate::web::{spawn_health_server, HealthState};
use crate::Result;

/// Flags accepted by every service binary. Anything not given here comes
/// from the config file or the environment.
#[derive(Args, Clone, Debug, Default)]
pub struct ServiceArgs {
    /// TOML config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub redis_url: Option<String>,
    #[arg(long)]
    pub opensearch_url: Option<String>,
    #[arg(long)]
    pub resources_index: Option<String>,
    #[arg(long)]
    pub messages_per_run: Option<usize>,
    /// Serve /health, /healthz and /metrics on this port
    #[arg(long)]
    pub metrics_port: Option<u16>,
    /// Register queues that do not exist yet instead of waiting for them
    #[arg(long)]
    pub create_missing_queues: bool,
}

impl ServiceArgs {
    pub fn merge_opts(self) -> MergeOpts {
        MergeOpts {
            config_path: self.config,
            cli_redis_url: self.redis_url,
            cli_opensearch_url: self.opensearch_url,
            cli_resources_index: self.resources_index,
            cli_messages_per_run: self.messages_per_run,
            cli_metrics_port: self.metrics_port,
            cli_create_missing_queues: self.create_missing_queues,
        }
    }
}

pub async fn open_queue(
    pool: &Pool,
    name: &str,
    props: QueueProps,
    create_missing: bool,
    readiness: &RetryPolicy,
) -> Result<Arc<RedisQueue>> {
    let queue = RedisQueue::new(pool.clone(), name, props);
    if create_missing {
        queue.create_if_missing(readiness).await?;
    }
    Ok(Arc::new(queue))
}

/// Serve health endpoints when configured and poll `source` until Ctrl-C.
pub async fn run_until_ctrl_c<H>(
    cfg: &ServiceConfig,
    source: Arc<dyn MessageQueue>,
    handler: H,
) -> anyhow::Result<()>
where
    H: MessageHandler + 'static,
{
    let metrics = Arc::new(ServiceMetrics::new());
    let server = match cfg.metrics_port {
        Some(port) => Some(
            spawn_health_server(
                port,
                HealthState {
                    service: cfg.kind.name().to_string(),
                    queue: Arc::clone(&source),
                    metrics: Arc::clone(&metrics),
                },
            )
            .await?,
        ),
        None => None,
    };

    let mut poller = Poller::new(source, handler, cfg.messages_per_run).with_metrics(metrics);
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(async move { poller.poll(rx).await });

    signal::ctrl_c().await?;
    let _ = tx.send(());
    handle.await??;
    if let Some(server) = server {
        server.abort();
    }
    Ok(())
}
