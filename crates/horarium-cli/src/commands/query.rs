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

//! Implementation of the `query add`, `query list` and `query delete` commands.
//!
//! These open the embedded store directly, so they run while `serve` is
//! stopped. Queries added here are scheduled by recovery on the next start.

use anyhow::{anyhow, Context, Result};
use horarium::metadata::RedbQueryMetadataDao;
use horarium::storage::RedbPeriodicQueryResultStorage;
use horarium::transport::{command_channel, ChannelCommandSubscriber};
use horarium::{
    NotificationRegistrationClient, PeriodicQueryAdmin, PeriodicQuerySummary,
    PeriodicServiceConfig,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Opens the configured store. The returned subscriber must outlive the admin.
fn admin(config: &PeriodicServiceConfig) -> Result<(PeriodicQueryAdmin, ChannelCommandSubscriber)> {
    let path = config
        .storage_path()
        .ok_or_else(|| anyhow!("storage.path must be set to administer periodic queries"))?;
    let storage = RedbPeriodicQueryResultStorage::open(path, config.table_prefix())
        .with_context(|| format!("Failed to open result store {}", path.display()))?;
    let metadata = RedbQueryMetadataDao::new(storage.database())
        .context("Failed to open query metadata")?;

    let (publisher, subscriber) = command_channel();
    let admin = PeriodicQueryAdmin::new(
        Arc::new(storage),
        Arc::new(metadata),
        NotificationRegistrationClient::new(Arc::new(publisher)),
    );
    Ok((admin, subscriber))
}

/// Registers `sparql` and returns the new query id.
pub async fn add(config: &PeriodicServiceConfig, sparql: &str) -> Result<String> {
    let (admin, _subscriber) = admin(config)?;
    let query_id = admin
        .add_periodic_query(sparql)
        .await
        .context("Failed to register periodic query")?;
    if !config.enable_recovery() {
        warn!(query_id = %query_id, "Recovery is disabled, the query will not be scheduled on start");
    }
    info!(query_id = %query_id, "Registered periodic query");
    Ok(query_id)
}

pub async fn list(config: &PeriodicServiceConfig) -> Result<Vec<PeriodicQuerySummary>> {
    let (admin, _subscriber) = admin(config)?;
    admin
        .list_periodic_queries()
        .await
        .context("Failed to list periodic queries")
}

pub async fn delete(config: &PeriodicServiceConfig, query_id: &str) -> Result<()> {
    let (admin, _subscriber) = admin(config)?;
    admin
        .delete_periodic_query(query_id)
        .await
        .with_context(|| format!("Failed to delete periodic query '{}'", query_id))?;
    info!(query_id = %query_id, "Deleted periodic query");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const QUERY: &str = "prefix function: <http://org.apache.rya/function#> \
        prefix time: <http://www.w3.org/2006/time#> \
        select ?id ?time where { \
        Filter(function:periodic(?time, 1, .25, time:minutes)) \
        ?obs <uri:hasTime> ?time. ?obs <uri:hasId> ?id }";

    fn config(dir: &TempDir) -> PeriodicServiceConfig {
        PeriodicServiceConfig::builder()
            .storage_path(Some(dir.path().join("horarium.redb")))
            .build()
    }

    #[tokio::test]
    async fn test_add_list_delete() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let query_id = add(&config, QUERY).await.unwrap();
        let queries = list(&config).await.unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].query_id, query_id);
        assert_eq!(queries[0].period_ms, 15_000);
        assert_eq!(queries[0].window_ms, 60_000);

        delete(&config, &query_id).await.unwrap();
        assert!(list(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requires_storage_path() {
        let err = list(&PeriodicServiceConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("storage.path"));
    }

    #[tokio::test]
    async fn test_rejects_query_without_periodic_filter() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        assert!(add(&config, "select ?id where { ?obs <uri:hasId> ?id }")
            .await
            .is_err());
        assert!(list(&config).await.unwrap().is_empty());
    }
}
