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

//! In-process transports built on tokio channels.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CommandPublisher, CommandSubscriber, ExportedResult, ResultExporter};
use crate::error::TransportError;
use crate::model::{BindingSet, CommandNotification};

/// Creates a connected command publisher and subscriber.
pub fn command_channel() -> (ChannelCommandPublisher, ChannelCommandSubscriber) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelCommandPublisher { tx },
        ChannelCommandSubscriber { rx },
    )
}

#[derive(Debug, Clone)]
pub struct ChannelCommandPublisher {
    tx: mpsc::UnboundedSender<CommandNotification>,
}

#[async_trait]
impl CommandPublisher for ChannelCommandPublisher {
    async fn publish(&self, command: &CommandNotification) -> Result<(), TransportError> {
        self.tx
            .send(command.clone())
            .map_err(|_| TransportError::Closed)
    }
}

#[derive(Debug)]
pub struct ChannelCommandSubscriber {
    rx: mpsc::UnboundedReceiver<CommandNotification>,
}

#[async_trait]
impl CommandSubscriber for ChannelCommandSubscriber {
    async fn next_command(&mut self) -> Result<Option<CommandNotification>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Exporter that forwards every published row to a channel.
#[derive(Debug, Clone)]
pub struct ChannelResultExporter {
    tx: mpsc::UnboundedSender<ExportedResult>,
}

impl ChannelResultExporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExportedResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultExporter for ChannelResultExporter {
    async fn export(
        &self,
        query_id: &str,
        bin: i64,
        rows: Vec<BindingSet>,
    ) -> Result<(), TransportError> {
        for binding_set in rows {
            self.tx
                .send(ExportedResult {
                    query_id: query_id.to_string(),
                    bin,
                    binding_set,
                })
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }
}
