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

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use snoindex::queue::create_redis_pool;
use snoindex::runner::{open_queue, run_until_ctrl_c, ServiceArgs};
use snoindex::search::Opensearch;
use snoindex::services::BulkInvalidationService;
use snoindex::telemetry::init_logging;
use snoindex::{load_service_config, ServiceKind};

/// Fan batches of transaction notifications out into invalidation notices.
#[derive(Parser, Debug)]
#[command(name = "snoindex-bulk-invalidation")]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
    /// Uuids per related-document search
    #[arg(long)]
    related_batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut cfg = load_service_config(ServiceKind::BulkInvalidation, cli.service.merge_opts())?;
    if let Some(n) = cli.related_batch_size {
        cfg.related_uuids_search_batch_size = n;
    }

    let pool = create_redis_pool(&cfg.redis_connection_url()?)?;
    let transaction_queue = open_queue(
        &pool,
        cfg.transaction_queue()?,
        cfg.source_queue_props(),
        cfg.create_missing_queues,
        &cfg.readiness,
    )
    .await?;
    let invalidation_queue = open_queue(
        &pool,
        cfg.invalidation_queue()?,
        cfg.destination_queue_props(),
        cfg.create_missing_queues,
        &cfg.readiness,
    )
    .await?;
    let search = Arc::new(Opensearch::new(cfg.opensearch_props()?)?);

    let service = BulkInvalidationService::new(
        invalidation_queue,
        search,
        cfg.related_uuids_search_batch_size,
    );
    service
        .wait_until_ready(transaction_queue.as_ref(), &cfg.readiness)
        .await?;
    tracing::info!(
        messages_per_run = cfg.messages_per_run,
        related_batch_size = cfg.related_uuids_search_batch_size,
        "bulk invalidation: starting"
    );
    run_until_ctrl_c(&cfg, transaction_queue, service).await
}
