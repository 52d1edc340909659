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

//! Command and result transports.
//!
//! Two logical streams cross process boundaries: the command stream carrying
//! [`CommandNotification`]s keyed by query id, and one result stream per
//! query carrying published rows keyed by bin id. The coordinator depends only
//! on the traits here; concrete transports are in-process channels and Kafka.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::model::{BindingSet, CommandNotification};

pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use channel::{
    command_channel, ChannelCommandPublisher, ChannelCommandSubscriber, ChannelResultExporter,
};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaCommandPublisher, KafkaCommandSubscriber, KafkaResultExporter};

/// Sends ADD/DELETE commands.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, command: &CommandNotification) -> Result<(), TransportError>;

    /// Flushes pending sends and releases the underlying handle.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Receives ADD/DELETE commands.
#[async_trait]
pub trait CommandSubscriber: Send {
    /// Waits for the next command.
    ///
    /// Returns `Ok(None)` once the stream has ended. A
    /// [`TransportError::Codec`] error means one message was skipped and the
    /// stream can still be polled.
    async fn next_command(&mut self) -> Result<Option<CommandNotification>, TransportError>;
}

/// One row published for a closed bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedResult {
    pub query_id: String,
    pub bin: i64,
    pub binding_set: BindingSet,
}

/// Publishes the rows of a closed bin.
#[async_trait]
pub trait ResultExporter: Send + Sync {
    async fn export(
        &self,
        query_id: &str,
        bin: i64,
        rows: Vec<BindingSet>,
    ) -> Result<(), TransportError>;
}
