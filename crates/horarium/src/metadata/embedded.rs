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

//! Query metadata graph persisted in the embedded redb database.

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::sync::Arc;

use super::{QueryMetadataDao, QueryNode};
use crate::error::StorageError;

const QUERY_NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("query_nodes");

/// Metadata graph stored in a `query_nodes` table, JSON encoded.
///
/// Usually shares its database with
/// [`RedbPeriodicQueryResultStorage`](crate::storage::RedbPeriodicQueryResultStorage).
#[derive(Clone)]
pub struct RedbQueryMetadataDao {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbQueryMetadataDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbQueryMetadataDao").finish_non_exhaustive()
    }
}

impl RedbQueryMetadataDao {
    pub fn new(db: Arc<Database>) -> Result<Self, StorageError> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(QUERY_NODES)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl QueryMetadataDao for RedbQueryMetadataDao {
    async fn put_node(&self, node_id: &str, node: QueryNode) -> Result<(), StorageError> {
        let node_id = node_id.to_string();
        let bytes = serde_json::to_vec(&node)?;
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(QUERY_NODES)?;
                table.insert(node_id.as_str(), bytes.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn node(&self, node_id: &str) -> Result<Option<QueryNode>, StorageError> {
        let node_id = node_id.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(QUERY_NODES)?;
            let node = match table.get(node_id.as_str())? {
                Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
                None => None,
            };
            Ok(node)
        })
        .await
    }

    async fn nodes(&self) -> Result<HashMap<String, QueryNode>, StorageError> {
        self.blocking(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(QUERY_NODES)?;
            let mut nodes = HashMap::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                nodes.insert(key.value().to_string(), serde_json::from_slice(value.value())?);
            }
            Ok(nodes)
        })
        .await
    }

    async fn remove_nodes(&self, node_ids: &[String]) -> Result<(), StorageError> {
        let node_ids = node_ids.to_vec();
        self.blocking(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(QUERY_NODES)?;
                for node_id in &node_ids {
                    table.remove(node_id.as_str())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }
}
