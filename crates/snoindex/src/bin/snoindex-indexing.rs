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
use snoindex::remote::Portal;
use snoindex::runner::{open_queue, run_until_ctrl_c, ServiceArgs};
use snoindex::search::Opensearch;
use snoindex::services::IndexingService;
use snoindex::telemetry::init_logging;
use snoindex::{load_service_config, ServiceKind};

/// Reindex one record per invalidation notice.
#[derive(Parser, Debug)]
#[command(name = "snoindex-indexing")]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = load_service_config(ServiceKind::Indexing, cli.service.merge_opts())?;

    let pool = create_redis_pool(&cfg.redis_connection_url()?)?;
    let invalidation_queue = open_queue(
        &pool,
        cfg.invalidation_queue()?,
        cfg.source_queue_props(),
        cfg.create_missing_queues,
        &cfg.readiness,
    )
    .await?;
    let search = Arc::new(Opensearch::new(cfg.opensearch_props()?)?);
    let portal = Arc::new(Portal::new(cfg.portal_props()?)?);

    let service = IndexingService::new(portal, search, cfg.indexing_props());
    service
        .wait_until_ready(invalidation_queue.as_ref(), &cfg.readiness)
        .await?;
    run_until_ctrl_c(&cfg, invalidation_queue, service).await
}
