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

//! Administrative operations on periodic queries.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AdminError, StorageError};
use crate::metadata::{resolve_query_id, QueryMetadataDao, QueryNode, PERIODIC_QUERY_PREFIX, QUERY_PREFIX};
use crate::model::{PeriodicNotification, TimeUnit};
use crate::registration::NotificationRegistrationClient;
use crate::sparql::PeriodicFilter;
use crate::storage::PeriodicQueryResultStorage;

/// A registered periodic query as seen by operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicQuerySummary {
    pub query_id: String,
    pub sparql: String,
    pub period_ms: i64,
    pub window_ms: i64,
}

/// Registers, lists and removes periodic queries.
///
/// Registration writes the result area and metadata graph first and sends
/// the ADD command last, so a restart between the two still recovers the
/// query.
#[derive(Clone)]
pub struct PeriodicQueryAdmin {
    storage: Arc<dyn PeriodicQueryResultStorage>,
    dao: Arc<dyn QueryMetadataDao>,
    registration: NotificationRegistrationClient,
}

impl std::fmt::Debug for PeriodicQueryAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicQueryAdmin").finish_non_exhaustive()
    }
}

impl PeriodicQueryAdmin {
    pub fn new(
        storage: Arc<dyn PeriodicQueryResultStorage>,
        dao: Arc<dyn QueryMetadataDao>,
        registration: NotificationRegistrationClient,
    ) -> Self {
        Self {
            storage,
            dao,
            registration,
        }
    }

    /// Registers `sparql` as a periodic query and returns its new id.
    pub async fn add_periodic_query(&self, sparql: &str) -> Result<String, AdminError> {
        let filter = PeriodicFilter::parse(sparql)?;
        let query_id = uuid::Uuid::new_v4().simple().to_string();

        self.storage
            .create_periodic_query(&query_id, sparql, None)
            .await?;

        if let Err(e) = self.register(&query_id, &filter).await {
            warn!(query_id = %query_id, error = %e, "Registration failed, rolling back");
            if let Err(cleanup) = self.remove_state(&query_id).await {
                warn!(query_id = %query_id, error = %cleanup, "Rollback incomplete");
            }
            return Err(e);
        }

        info!(
            query_id = %query_id,
            period_ms = filter.period_ms,
            window_ms = filter.window_ms,
            "Registered periodic query"
        );
        Ok(query_id)
    }

    async fn register(&self, query_id: &str, filter: &PeriodicFilter) -> Result<(), AdminError> {
        let root = format!("{}{}", QUERY_PREFIX, query_id);
        self.dao
            .put_node(
                &root,
                QueryNode::Query {
                    pcj_id: query_id.to_string(),
                },
            )
            .await?;
        self.dao
            .put_node(
                &format!("{}{}", PERIODIC_QUERY_PREFIX, query_id),
                QueryNode::PeriodicQuery {
                    parent: root,
                    period_ms: filter.period_ms,
                    window_ms: filter.window_ms,
                    temporal_variable: filter.temporal_variable.clone(),
                },
            )
            .await?;

        let period = u64::try_from(filter.period_ms).map_err(|_| {
            StorageError::MalformedQuery(format!("invalid period {} ms", filter.period_ms))
        })?;
        let notification = PeriodicNotification::builder()
            .id(query_id)
            .period(period)
            .time_unit(TimeUnit::Milliseconds)
            .build()?;
        self.registration.add_notification(notification).await?;
        Ok(())
    }

    /// Every registered periodic query, ordered by id.
    pub async fn list_periodic_queries(&self) -> Result<Vec<PeriodicQuerySummary>, AdminError> {
        let nodes = self.dao.nodes().await?;
        let mut summaries = Vec::new();
        for node in self.dao.periodic_query_nodes().await? {
            let query_id = match resolve_query_id(&nodes, &node.node_id) {
                Ok(query_id) => query_id,
                Err(e) => {
                    warn!(node_id = %node.node_id, error = %e, "Skipping unresolvable periodic node");
                    continue;
                }
            };
            let sparql = match self.storage.get_periodic_query_metadata(&query_id).await {
                Ok(metadata) => metadata.sparql,
                Err(StorageError::QueryNotFound(_)) => String::new(),
                Err(e) => return Err(e.into()),
            };
            summaries.push(PeriodicQuerySummary {
                query_id,
                sparql,
                period_ms: node.period_ms,
                window_ms: node.window_ms,
            });
        }
        summaries.sort_by(|a, b| a.query_id.cmp(&b.query_id));
        Ok(summaries)
    }

    /// Stops and removes a periodic query. Unknown ids succeed.
    pub async fn delete_periodic_query(&self, query_id: &str) -> Result<(), AdminError> {
        self.registration.delete_notification(query_id).await?;
        self.remove_state(query_id).await?;
        info!(query_id = %query_id, "Deleted periodic query");
        Ok(())
    }

    async fn remove_state(&self, query_id: &str) -> Result<(), AdminError> {
        self.storage.delete_periodic_query(query_id).await?;
        self.dao.remove_query(query_id).await?;
        Ok(())
    }
}
