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

//! Client for registering and removing periodic notifications.

use std::sync::Arc;
use tracing::info;

use crate::error::RegistrationError;
use crate::model::{CommandNotification, PeriodicNotification};
use crate::transport::CommandPublisher;

/// Stateless producer of ADD/DELETE commands.
///
/// The coordinator is the only source of truth for what is scheduled; this
/// client keeps nothing between calls.
#[derive(Clone)]
pub struct NotificationRegistrationClient {
    publisher: Arc<dyn CommandPublisher>,
}

impl std::fmt::Debug for NotificationRegistrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistrationClient")
            .finish_non_exhaustive()
    }
}

impl NotificationRegistrationClient {
    pub fn new(publisher: Arc<dyn CommandPublisher>) -> Self {
        Self { publisher }
    }

    /// Publishes an ADD command for `notification`.
    pub async fn add_notification(
        &self,
        notification: PeriodicNotification,
    ) -> Result<(), RegistrationError> {
        notification.validate()?;
        let command = CommandNotification::add(notification);
        self.publisher.publish(&command).await?;
        info!(notification_id = %command.id(), "Sent ADD command");
        Ok(())
    }

    /// Publishes a DELETE command for `id`.
    pub async fn delete_notification(&self, id: &str) -> Result<(), RegistrationError> {
        let command = CommandNotification::delete(id);
        self.publisher.publish(&command).await?;
        info!(notification_id = %id, "Sent DELETE command");
        Ok(())
    }

    /// Releases the underlying transport.
    pub async fn close(&self) -> Result<(), RegistrationError> {
        self.publisher.close().await?;
        Ok(())
    }
}
