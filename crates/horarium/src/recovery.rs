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

//! Rebuilding the live schedule from durable query metadata.
//!
//! After a restart no timers exist. The provider scans the query metadata
//! graph for periodic query nodes, resolves the query id each belongs to and
//! produces one ADD command per query. Initial delays are staggered so that
//! the recovered timers do not all hit the store and transport at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::coordinator::NotificationCoordinator;
use crate::error::{RecoveryError, RegistrationError};
use crate::metadata::{resolve_query_id, QueryMetadataDao};
use crate::model::{CommandNotification, PeriodicNotification, TimeUnit};

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Ids newly scheduled by this pass.
    pub scheduled: Vec<String>,
    /// Ids that were already live and left untouched.
    pub already_scheduled: Vec<String>,
}

/// Produces the notifications that should be live given the stored metadata.
#[derive(Clone)]
pub struct PeriodicNotificationProvider {
    dao: Arc<dyn QueryMetadataDao>,
    stagger: Duration,
}

impl std::fmt::Debug for PeriodicNotificationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicNotificationProvider")
            .field("stagger", &self.stagger)
            .finish_non_exhaustive()
    }
}

impl PeriodicNotificationProvider {
    pub fn new(dao: Arc<dyn QueryMetadataDao>, stagger: Duration) -> Self {
        Self { dao, stagger }
    }

    /// One notification per registered periodic query.
    ///
    /// The i-th notification (counting from 1, ordered by node id) starts
    /// after `i * stagger`. Nodes whose parent chain cannot be resolved, or
    /// whose stored schedule is not a valid notification, are logged and
    /// skipped.
    pub async fn get_notifications(&self) -> Result<Vec<PeriodicNotification>, RecoveryError> {
        let nodes = self.dao.nodes().await?;
        let periodic = self.dao.periodic_query_nodes().await?;
        let stagger_ms = u64::try_from(self.stagger.as_millis()).unwrap_or(u64::MAX);

        let mut seen = HashSet::new();
        let mut notifications = Vec::with_capacity(periodic.len());
        for node in periodic {
            let query_id = match resolve_query_id(&nodes, &node.node_id) {
                Ok(query_id) => query_id,
                Err(e) => {
                    warn!(node_id = %node.node_id, error = %e, "Skipping unrecoverable periodic query node");
                    continue;
                }
            };
            if !seen.insert(query_id.clone()) {
                warn!(query_id = %query_id, node_id = %node.node_id, "Query has more than one periodic node, keeping the first");
                continue;
            }

            let Ok(period) = u64::try_from(node.period_ms) else {
                warn!(query_id = %query_id, period_ms = node.period_ms, "Skipping periodic query with a negative period");
                continue;
            };
            let index = notifications.len() as u64 + 1;
            let built = PeriodicNotification::builder()
                .id(query_id.clone())
                .period(period)
                .time_unit(TimeUnit::Milliseconds)
                .initial_delay(index.saturating_mul(stagger_ms))
                .build();
            match built {
                Ok(notification) => notifications.push(notification),
                Err(e) => {
                    warn!(query_id = %query_id, error = %e, "Skipping periodic query with an invalid schedule");
                }
            }
        }
        Ok(notifications)
    }

    /// Feeds an ADD for every recovered notification into `coordinator`.
    ///
    /// Notifications whose id is already live are left alone, so running this
    /// twice never duplicates a timer. A notification the coordinator rejects
    /// as malformed is skipped; only a stopped coordinator aborts the pass.
    pub async fn process_registered_notifications(
        &self,
        coordinator: &NotificationCoordinator,
    ) -> Result<RecoveryReport, RecoveryError> {
        let mut report = RecoveryReport::default();
        for notification in self.get_notifications().await? {
            let id = notification.id().to_string();
            match coordinator.process_next_command_notification(CommandNotification::add(notification)) {
                Ok(()) => report.scheduled.push(id),
                Err(RegistrationError::Duplicate(_)) => report.already_scheduled.push(id),
                Err(e @ RegistrationError::Malformed { .. }) => {
                    warn!(query_id = %id, error = %e, "Skipping recovered notification");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(
            scheduled = report.scheduled.len(),
            already_scheduled = report.already_scheduled.len(),
            "Recovered periodic notifications"
        );
        Ok(report)
    }
}
