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

//! # Horarium
//!
//! Windowed, periodic delivery of continuous query results.
//!
//! A client registers a continuous query together with a window and a period.
//! New results are assigned to time bins as they arrive; every period the bin
//! that just closed is read from storage, published and cleared. Registered
//! queries survive restarts: on startup their timers are rebuilt from durable
//! metadata.
//!
//! ## Key Components
//!
//! - [`binning`]: bin arithmetic for events arriving early, on time or late
//! - [`storage`]: per-query, per-bin result storage (in memory or on redb)
//! - [`model`]: notifications, commands and result tuples
//! - [`registration`]: stateless ADD/DELETE command producer
//! - [`coordinator`]: live timers that publish each closed bin
//! - [`recovery`]: rebuilds the live schedule from query metadata
//! - [`admin`]: add, list and delete periodic queries
//! - [`service`]: everything wired together behind start/shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use horarium::prelude::*;
//!
//! let storage = Arc::new(InMemoryPeriodicQueryResultStorage::default());
//! let (exporter, mut published) = ChannelResultExporter::new();
//! let (commands, subscriber) = command_channel();
//!
//! let service = PeriodicNotificationService::new(
//!     PeriodicServiceConfig::default(),
//!     ServiceComponents::new(storage, metadata, Arc::new(exporter), Box::new(subscriber)),
//! );
//! service.start().await?;
//!
//! let client = NotificationRegistrationClient::new(Arc::new(commands));
//! client
//!     .add_notification(
//!         PeriodicNotification::builder()
//!             .id("q1")
//!             .period(15)
//!             .time_unit(TimeUnit::Seconds)
//!             .build()?,
//!     )
//!     .await?;
//! ```

pub mod admin;
pub mod binning;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metadata;
pub mod model;
pub mod recovery;
pub mod registration;
pub mod service;
pub mod sparql;
pub mod storage;
pub mod transport;
pub mod updater;

pub use admin::{PeriodicQueryAdmin, PeriodicQuerySummary};
pub use binning::{bins_for, left_bin_edge, right_bin_edge, BinCalculator};
pub use clock::{AnchoredClock, Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, PeriodicServiceConfig, ServiceFileConfig};
pub use coordinator::{BinPublisher, CoordinatorConfig, CoordinatorState, NotificationCoordinator};
pub use error::{
    AdminError, ConfigError, PublishError, RecoveryError, RegistrationError, ServiceError,
    StorageError, TransportError,
};
pub use model::{
    BindingSet, Command, CommandNotification, NodeBin, Notification, PeriodicNotification,
    TimeUnit, TimestampedNotification, Value, VariableOrder, VisibilityBindingSet,
    PERIODIC_BIN_ID,
};
pub use recovery::{PeriodicNotificationProvider, RecoveryReport};
pub use registration::NotificationRegistrationClient;
pub use service::{PeriodicNotificationService, ServiceComponents};
pub use storage::{PeriodicQueryResultStorage, PeriodicQueryStorageMetadata};
pub use updater::PeriodicBinUpdater;

/// Commonly used types.
pub mod prelude {
    pub use crate::admin::PeriodicQueryAdmin;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::PeriodicServiceConfig;
    pub use crate::metadata::{InMemoryQueryMetadataDao, QueryMetadataDao};
    pub use crate::model::{
        BindingSet, CommandNotification, PeriodicNotification, TimeUnit, Value,
        VisibilityBindingSet,
    };
    pub use crate::registration::NotificationRegistrationClient;
    pub use crate::service::{PeriodicNotificationService, ServiceComponents};
    pub use crate::storage::{InMemoryPeriodicQueryResultStorage, PeriodicQueryResultStorage};
    pub use crate::transport::{command_channel, ChannelResultExporter};
    pub use std::sync::Arc;
}
