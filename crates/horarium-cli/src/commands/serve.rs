/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */


//! Implementation of the `serve` command.

use anyhow::{Context, Result};
use horarium::metadata::RedbQueryMetadataDao;
use horarium::storage::RedbPeriodicQueryResultStorage;
use horarium::transport::{KafkaCommandSubscriber, KafkaResultExporter};
use horarium::{PeriodicNotificationService, PeriodicServiceConfig, ServiceComponents};
use std::sync::Arc;
use tracing::{info, warn};

/// Run the service until ctrl-c.
pub async fn run(config: PeriodicServiceConfig) -> Result<()> {
    let storage = match config.storage_path() {
        Some(path) => {
            info!(path = %path.display(), "Opening result store");
            RedbPeriodicQueryResultStorage::open(path, config.table_prefix())
        }
        None => {
            warn!("No storage path configured, results will not survive a restart");
            RedbPeriodicQueryResultStorage::open_in_memory(config.table_prefix())
        }
    }
    .context("Failed to open result store")?;
    let metadata = RedbQueryMetadataDao::new(storage.database())
        .context("Failed to open query metadata")?;

    let exporter = KafkaResultExporter::new(config.bootstrap_servers(), config.publish_timeout())
        .context("Failed to create result exporter")?;
    let subscriber = KafkaCommandSubscriber::new(
        config.bootstrap_servers(),
        config.consumer_group(),
        config.command_topic(),
    )
    .context("Failed to subscribe to command topic")?;

    let service = PeriodicNotificationService::new(
        config,
        ServiceComponents::new(
            Arc::new(storage),
            Arc::new(metadata),
            Arc::new(exporter),
            Box::new(subscriber),
        ),
    );

    let report = service.start().await.context("Failed to start service")?;
    info!(
        scheduled = report.scheduled.len(),
        already_scheduled = report.already_scheduled.len(),
        "Service running, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    service.shutdown().await.context("Shutdown failed")?;
    Ok(())
}
