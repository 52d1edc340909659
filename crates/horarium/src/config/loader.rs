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

//! TOML configuration files.
//!
//! A file is located from, in order: an explicit path, `$HORARIUM_CONFIG`,
//! or the first existing default search path. Before parsing, `${VAR}`,
//! `${VAR:-default}` and `${VAR:?message}` references are replaced with
//! environment values.
//!
//! ```toml
//! [kafka]
//! bootstrap_servers = "${KAFKA_BROKERS:-localhost:9092}"
//! command_topic = "notifications"
//!
//! [storage]
//! path = "/var/lib/horarium/periodic.redb"
//!
//! [coordinator]
//! recovery_stagger_ms = 5000
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::PeriodicServiceConfig;
use crate::error::ConfigError;

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Failed to compile regex"));

/// On-disk shape of the service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceFileConfig {
    pub kafka: KafkaSection,
    pub storage: StorageSection,
    pub coordinator: CoordinatorSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaSection {
    pub bootstrap_servers: String,
    pub command_topic: String,
    pub consumer_group: String,
    pub publish_timeout_ms: u64,
}

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            command_topic: "notifications".to_string(),
            consumer_group: "horarium".to_string(),
            publish_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub table_prefix: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: None,
            table_prefix: "rya_".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorSection {
    pub enable_recovery: bool,
    pub recovery_stagger_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub sweep_stale_bins: bool,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            enable_recovery: true,
            recovery_stagger_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            sweep_stale_bins: true,
        }
    }
}

impl ServiceFileConfig {
    /// Validates the file contents and converts them to a service config.
    pub fn into_service_config(self) -> Result<PeriodicServiceConfig, ConfigError> {
        let mut problems = Vec::new();
        if self.kafka.bootstrap_servers.trim().is_empty() {
            problems.push("kafka.bootstrap_servers must not be empty");
        }
        if self.kafka.command_topic.trim().is_empty() {
            problems.push("kafka.command_topic must not be empty");
        }
        if self.kafka.consumer_group.trim().is_empty() {
            problems.push("kafka.consumer_group must not be empty");
        }
        if self.kafka.publish_timeout_ms == 0 {
            problems.push("kafka.publish_timeout_ms must be positive");
        }
        if self.coordinator.shutdown_timeout_ms == 0 {
            problems.push("coordinator.shutdown_timeout_ms must be positive");
        }
        if !problems.is_empty() {
            return Err(ConfigError::Validation(problems.join("; ")));
        }

        Ok(PeriodicServiceConfig::builder()
            .bootstrap_servers(self.kafka.bootstrap_servers)
            .command_topic(self.kafka.command_topic)
            .consumer_group(self.kafka.consumer_group)
            .publish_timeout(Duration::from_millis(self.kafka.publish_timeout_ms))
            .storage_path(self.storage.path)
            .table_prefix(self.storage.table_prefix)
            .enable_recovery(self.coordinator.enable_recovery)
            .recovery_stagger(Duration::from_millis(self.coordinator.recovery_stagger_ms))
            .shutdown_timeout(Duration::from_millis(self.coordinator.shutdown_timeout_ms))
            .sweep_stale_bins(self.coordinator.sweep_stale_bins)
            .build())
    }
}

/// Locates and parses configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./horarium.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("horarium").join("config.toml"));
        }
        search_paths.push(PathBuf::from("/etc/horarium/config.toml"));
        Self { search_paths }
    }

    /// Create a config loader with custom search paths
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Load configuration from the specified file or auto-discover
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<ServiceFileConfig, ConfigError> {
        let config_path = if let Some(path) = config_file {
            path.to_path_buf()
        } else if let Ok(env_config) = env::var("HORARIUM_CONFIG") {
            PathBuf::from(env_config)
        } else {
            self.find_config_file().ok_or(ConfigError::ConfigNotFound)?
        };

        self.load_config_from_file(&config_path)
    }

    /// Load configuration from a specific file
    pub fn load_config_from_file(&self, path: &Path) -> Result<ServiceFileConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => self.parse(&content),
            Some(ext) => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    /// Parse TOML content after environment substitution
    pub fn parse(&self, content: &str) -> Result<ServiceFileConfig, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        Ok(toml::from_str(&substituted)?)
    }

    /// Find the first existing configuration file in search paths
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(content.len());
    let mut last = 0;
    for cap in ENV_REFERENCE.captures_iter(content) {
        let Some(full) = cap.get(0) else { continue };
        result.push_str(&content[last..full.start()]);
        result.push_str(&process_var_expression(&cap[1])?);
        last = full.end();
    }
    result.push_str(&content[last..]);
    Ok(result)
}

/// Process a variable expression like "VAR", "VAR:-default", or "VAR:?error"
fn process_var_expression(expr: &str) -> Result<String, ConfigError> {
    if let Some((var_name, default_value)) = expr.split_once(":-") {
        Ok(env::var(var_name).unwrap_or_else(|_| default_value.to_string()))
    } else if let Some((var_name, error_msg)) = expr.split_once(":?") {
        env::var(var_name).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set: {}",
                var_name, error_msg
            ))
        })
    } else {
        env::var(expr).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set",
                expr
            ))
        })
    }
}
