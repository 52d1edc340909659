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

//! Background task feeding transport commands into the coordinator.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::NotificationCoordinator;
use crate::error::TransportError;
use crate::transport::CommandSubscriber;

/// Pause after a consume failure before polling again.
const CONSUME_BACKOFF: Duration = Duration::from_secs(1);

/// Spawns a task that drains `subscriber` into the coordinator.
///
/// Rejected commands and undecodable messages are logged and skipped. The
/// task ends when the subscriber is exhausted or `shutdown` fires.
pub fn spawn_command_consumer(
    coordinator: Arc<NotificationCoordinator>,
    mut subscriber: Box<dyn CommandSubscriber>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Command consumer started");
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Command consumer shutdown requested");
                    break;
                }
                next = subscriber.next_command() => next,
            };

            match next {
                Ok(Some(command)) => {
                    let description = command.to_string();
                    if let Err(e) = coordinator.process_next_command_notification(command) {
                        warn!(command = %description, error = %e, "Rejected command notification");
                    }
                }
                Ok(None) => {
                    info!("Command stream ended");
                    break;
                }
                Err(TransportError::Codec(message)) => {
                    warn!(error = %message, "Skipping undecodable command");
                }
                Err(e) => {
                    error!(error = %e, "Failed to consume commands");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(CONSUME_BACKOFF) => {}
                    }
                }
            }
        }
    })
}
