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


//! Implementation of the `notify add` and `notify delete` commands.

use anyhow::{Context, Result};
use horarium::transport::KafkaCommandPublisher;
use horarium::{
    NotificationRegistrationClient, PeriodicNotification, PeriodicServiceConfig, TimeUnit,
};
use std::sync::Arc;
use tracing::info;

fn client(config: &PeriodicServiceConfig) -> Result<NotificationRegistrationClient> {
    let publisher = KafkaCommandPublisher::new(
        config.bootstrap_servers(),
        config.command_topic(),
        config.publish_timeout(),
    )
    .context("Failed to create command publisher")?;
    Ok(NotificationRegistrationClient::new(Arc::new(publisher)))
}

pub async fn add(
    config: &PeriodicServiceConfig,
    id: &str,
    period: u64,
    time_unit: TimeUnit,
    delay: u64,
) -> Result<()> {
    let notification = PeriodicNotification::builder()
        .id(id)
        .period(period)
        .time_unit(time_unit)
        .initial_delay(delay)
        .build()
        .context("Invalid notification")?;

    let client = client(config)?;
    client
        .add_notification(notification)
        .await
        .with_context(|| format!("Failed to send ADD for '{}'", id))?;
    client.close().await.context("Failed to flush command")?;

    info!(id = %id, period, time_unit = %time_unit, delay, "Sent ADD");
    Ok(())
}

pub async fn delete(config: &PeriodicServiceConfig, id: &str) -> Result<()> {
    let client = client(config)?;
    client
        .delete_notification(id)
        .await
        .with_context(|| format!("Failed to send DELETE for '{}'", id))?;
    client.close().await.context("Failed to flush command")?;

    info!(id = %id, "Sent DELETE");
    Ok(())
}
