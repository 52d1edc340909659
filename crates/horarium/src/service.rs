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

//! The periodic notification service: coordinator, recovery and command
//! consumption wired together.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::PeriodicServiceConfig;
use crate::coordinator::{spawn_command_consumer, BinPublisher, NotificationCoordinator};
use crate::error::{ServiceError, TransportError};
use crate::metadata::QueryMetadataDao;
use crate::model::TimestampedNotification;
use crate::recovery::{PeriodicNotificationProvider, RecoveryReport};
use crate::storage::PeriodicQueryResultStorage;
use crate::transport::{CommandSubscriber, ResultExporter};

/// Collaborators the service runs against.
pub struct ServiceComponents {
    pub storage: Arc<dyn PeriodicQueryResultStorage>,
    pub metadata: Arc<dyn QueryMetadataDao>,
    pub exporter: Arc<dyn ResultExporter>,
    pub subscriber: Box<dyn CommandSubscriber>,
    pub clock: Arc<dyn Clock>,
    pub observer: Option<mpsc::UnboundedSender<TimestampedNotification>>,
}

impl ServiceComponents {
    /// Components using the system clock and no fire observer.
    pub fn new(
        storage: Arc<dyn PeriodicQueryResultStorage>,
        metadata: Arc<dyn QueryMetadataDao>,
        exporter: Arc<dyn ResultExporter>,
        subscriber: Box<dyn CommandSubscriber>,
    ) -> Self {
        Self {
            storage,
            metadata,
            exporter,
            subscriber,
            clock: Arc::new(SystemClock),
            observer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<TimestampedNotification>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Handles of the background command consumer.
struct RuntimeHandles {
    consumer_handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

/// Runs periodic delivery for every registered query.
pub struct PeriodicNotificationService {
    config: PeriodicServiceConfig,
    coordinator: Arc<NotificationCoordinator>,
    provider: PeriodicNotificationProvider,
    subscriber: Mutex<Option<Box<dyn CommandSubscriber>>>,
    runtime_handles: RwLock<RuntimeHandles>,
}

impl PeriodicNotificationService {
    pub fn new(config: PeriodicServiceConfig, components: ServiceComponents) -> Self {
        let publisher = Arc::new(BinPublisher::new(components.storage, components.exporter));
        let mut coordinator =
            NotificationCoordinator::new(config.coordinator_config(), publisher, components.clock);
        if let Some(observer) = components.observer {
            coordinator = coordinator.with_observer(observer);
        }
        let provider =
            PeriodicNotificationProvider::new(components.metadata, config.recovery_stagger());

        Self {
            config,
            coordinator: Arc::new(coordinator),
            provider,
            subscriber: Mutex::new(Some(components.subscriber)),
            runtime_handles: RwLock::new(RuntimeHandles {
                consumer_handle: None,
                shutdown_sender: None,
            }),
        }
    }

    pub fn config(&self) -> &PeriodicServiceConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<NotificationCoordinator> {
        &self.coordinator
    }

    /// Starts the coordinator, recovers registered queries and begins
    /// consuming commands.
    ///
    /// Returns the recovery outcome; it is empty when recovery is disabled.
    /// If recovery fails the coordinator is stopped again and the service
    /// can be started once more.
    pub async fn start(&self) -> Result<RecoveryReport, ServiceError> {
        let mut handles = self.runtime_handles.write().await;
        if handles.shutdown_sender.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }
        if self.subscriber.lock().is_none() {
            return Err(ServiceError::Transport(TransportError::Closed));
        }

        self.coordinator.start();

        let report = if self.config.enable_recovery() {
            match self
                .provider
                .process_registered_notifications(&self.coordinator)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "Startup recovery failed, stopping coordinator");
                    self.coordinator.stop().await;
                    return Err(e.into());
                }
            }
        } else {
            info!("Startup recovery disabled");
            RecoveryReport::default()
        };

        let Some(subscriber) = self.subscriber.lock().take() else {
            self.coordinator.stop().await;
            return Err(ServiceError::Transport(TransportError::Closed));
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = spawn_command_consumer(self.coordinator.clone(), subscriber, shutdown_rx);

        handles.consumer_handle = Some(consumer);
        handles.shutdown_sender = Some(shutdown_tx);
        info!(
            command_topic = %self.config.command_topic(),
            recovered = report.scheduled.len(),
            "Periodic notification service started"
        );
        Ok(report)
    }

    /// Stops command consumption and every live timer.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let mut handles = self.runtime_handles.write().await;

        if let Some(sender) = handles.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = handles.consumer_handle.take() {
            let _ = handle.await;
        }

        self.coordinator.stop().await;
        info!("Periodic notification service stopped");
        Ok(())
    }
}
