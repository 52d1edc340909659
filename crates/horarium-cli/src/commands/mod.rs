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


//! CLI command implementations.

use anyhow::{Context, Result};
use horarium::{ConfigError, ConfigLoader, PeriodicServiceConfig};
use std::path::Path;
use tracing::{info, warn};

pub mod notify;
pub mod query;
pub mod serve;

/// Loads the service configuration.
///
/// An explicitly named file must exist. Without one, a missing file in every
/// search path falls back to the defaults.
pub fn load_config(path: Option<&Path>) -> Result<PeriodicServiceConfig> {
    let loader = ConfigLoader::new();
    let file_config = match loader.load_config(path) {
        Ok(file_config) => file_config,
        Err(ConfigError::ConfigNotFound) if path.is_none() => {
            warn!(
                "No configuration file found in {:?}, using defaults",
                loader.search_paths()
            );
            Default::default()
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };
    let config = file_config
        .into_service_config()
        .context("Invalid configuration")?;
    info!(
        bootstrap_servers = %config.bootstrap_servers(),
        command_topic = %config.command_topic(),
        "Configuration loaded"
    );
    Ok(config)
}
