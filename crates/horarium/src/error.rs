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

//! Error types for the periodic notification subsystem.
//!
//! Each collaborator surface has its own error enum so callers can react to
//! the failure class they care about:
//!
//! - [`StorageError`] for the periodic query result store and query metadata
//! - [`RegistrationError`] for ADD/DELETE command handling
//! - [`TransportError`] for command and result transport
//! - [`PublishError`] for a single fire of a periodic timer
//! - [`RecoveryError`] for startup recovery
//! - [`ConfigError`] for loading service configuration
//!
//! There is no variant for deleting an unknown notification id. That is a
//! no-op, not an error.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the periodic query result store and the query metadata store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Periodic query not found: {0}")]
    QueryNotFound(String),

    #[error(
        "Periodic query {query_id} already exists with variable order [{existing}], requested [{requested}]"
    )]
    ConflictingMetadata {
        query_id: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid variable order: {0}")]
    InvalidVariableOrder(String),

    #[error("Malformed periodic query: {0}")]
    MalformedQuery(String),

    #[error("Result for periodic query {0} does not carry a bin id")]
    MissingBinId(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Backend(format!("blocking storage task failed: {}", e))
    }
}

/// Errors raised while validating or applying ADD/DELETE commands.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Malformed registration for '{id}': {reason}")]
    Malformed { id: String, reason: String },

    #[error("Periodic notification '{0}' is already scheduled")]
    Duplicate(String),

    #[error("Notification coordinator is not running")]
    NotRunning,

    #[error("Failed to send command: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised by command and result transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to publish to '{topic}': {message}")]
    Publish { topic: String, message: String },

    #[error("Failed to consume commands: {0}")]
    Consume(String),

    #[error("Failed to encode or decode message: {0}")]
    Codec(String),

    #[error("Transport is closed")]
    Closed,
}

/// Failure of one publish-and-clear cycle for a single (query, bin) pair.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Storage error while publishing: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error while publishing: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised while reconstructing notifications from durable metadata.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Failed to read query metadata: {0}")]
    Metadata(#[from] StorageError),

    #[error("Cannot resolve query id for node '{node_id}': {reason}")]
    BrokenParentChain { node_id: String, reason: String },

    #[error("Failed to build recovered notification: {0}")]
    Registration(#[from] RegistrationError),
}

/// Errors surfaced by the administrative API.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Errors surfaced while starting or stopping the notification service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service is already running")]
    AlreadyRunning,

    #[error("Recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised while loading or validating service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in any search location")]
    ConfigNotFound,

    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Environment variable substitution failed: {0}")]
    EnvSubstitutionError(String),

    #[error("Unsupported configuration file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
