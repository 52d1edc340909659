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

//! Configuration for the periodic notification service.
//!
//! [`PeriodicServiceConfig`] is the validated, immutable configuration the
//! service runs with. It is built in code through
//! [`PeriodicServiceConfig::builder()`] or loaded from a TOML file through
//! [`ConfigLoader`].
//!
//! ```rust,ignore
//! let config = PeriodicServiceConfig::builder()
//!     .bootstrap_servers("kafka-1:9092,kafka-2:9092")
//!     .recovery_stagger(Duration::from_secs(2))
//!     .build();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod loader;

pub use loader::{ConfigLoader, CoordinatorSection, KafkaSection, ServiceFileConfig, StorageSection};

use crate::coordinator::CoordinatorConfig;

/// Configuration for [`PeriodicNotificationService`](crate::PeriodicNotificationService).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PeriodicServiceConfig {
    command_topic: String,
    consumer_group: String,
    bootstrap_servers: String,
    storage_path: Option<PathBuf>,
    table_prefix: String,
    recovery_stagger: Duration,
    enable_recovery: bool,
    shutdown_timeout: Duration,
    publish_timeout: Duration,
    sweep_stale_bins: bool,
}

impl PeriodicServiceConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> PeriodicServiceConfigBuilder {
        PeriodicServiceConfigBuilder::default()
    }

    /// Topic carrying ADD/DELETE commands.
    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Consumer group the command subscriber joins.
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    /// Database file for the embedded store. `None` keeps everything in memory.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Prefix of every periodic query result table name.
    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Delay added per recovered notification.
    pub fn recovery_stagger(&self) -> Duration {
        self.recovery_stagger
    }

    pub fn enable_recovery(&self) -> bool {
        self.enable_recovery
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Upper bound on a single transport send.
    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    pub fn sweep_stale_bins(&self) -> bool {
        self.sweep_stale_bins
    }

    /// The coordinator settings carried by this configuration.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            shutdown_timeout: self.shutdown_timeout,
            sweep_stale_bins: self.sweep_stale_bins,
        }
    }
}

impl Default for PeriodicServiceConfig {
    fn default() -> Self {
        PeriodicServiceConfigBuilder::default().build()
    }
}

/// Builder for [`PeriodicServiceConfig`].
#[derive(Debug, Clone)]
pub struct PeriodicServiceConfigBuilder {
    config: PeriodicServiceConfig,
}

impl Default for PeriodicServiceConfigBuilder {
    fn default() -> Self {
        Self {
            config: PeriodicServiceConfig {
                command_topic: "notifications".to_string(),
                consumer_group: "horarium".to_string(),
                bootstrap_servers: "localhost:9092".to_string(),
                storage_path: None,
                table_prefix: "rya_".to_string(),
                recovery_stagger: Duration::from_secs(5),
                enable_recovery: true,
                shutdown_timeout: Duration::from_secs(10),
                publish_timeout: Duration::from_secs(5),
                sweep_stale_bins: true,
            },
        }
    }
}

impl PeriodicServiceConfigBuilder {
    pub fn command_topic(mut self, value: impl Into<String>) -> Self {
        self.config.command_topic = value.into();
        self
    }

    pub fn consumer_group(mut self, value: impl Into<String>) -> Self {
        self.config.consumer_group = value.into();
        self
    }

    pub fn bootstrap_servers(mut self, value: impl Into<String>) -> Self {
        self.config.bootstrap_servers = value.into();
        self
    }

    pub fn storage_path(mut self, value: Option<PathBuf>) -> Self {
        self.config.storage_path = value;
        self
    }

    pub fn table_prefix(mut self, value: impl Into<String>) -> Self {
        self.config.table_prefix = value.into();
        self
    }

    pub fn recovery_stagger(mut self, value: Duration) -> Self {
        self.config.recovery_stagger = value;
        self
    }

    /// Enables or disables startup recovery.
    pub fn enable_recovery(mut self, value: bool) -> Self {
        self.config.enable_recovery = value;
        self
    }

    pub fn shutdown_timeout(mut self, value: Duration) -> Self {
        self.config.shutdown_timeout = value;
        self
    }

    pub fn publish_timeout(mut self, value: Duration) -> Self {
        self.config.publish_timeout = value;
        self
    }

    pub fn sweep_stale_bins(mut self, value: bool) -> Self {
        self.config.sweep_stale_bins = value;
        self
    }

    pub fn build(self) -> PeriodicServiceConfig {
        self.config
    }
}
