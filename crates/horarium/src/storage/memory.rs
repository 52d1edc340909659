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

//! In-memory result storage.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use super::{
    check_existing, resolve_variable_order, row_bins, KeyedResultStream,
    PeriodicQueryResultStorage, PeriodicQueryStorageMetadata, PeriodicQueryTableNameFactory,
    RowKey,
};
use crate::error::StorageError;
use crate::model::{VariableOrder, VisibilityBindingSet};

#[derive(Debug)]
struct QueryTable {
    metadata: PeriodicQueryStorageMetadata,
    rows: BTreeMap<RowKey, VisibilityBindingSet>,
    next_row: u128,
}

/// Result storage held entirely in process memory.
#[derive(Debug)]
pub struct InMemoryPeriodicQueryResultStorage {
    names: PeriodicQueryTableNameFactory,
    tables: RwLock<HashMap<String, QueryTable>>,
}

impl Default for InMemoryPeriodicQueryResultStorage {
    fn default() -> Self {
        Self::new("")
    }
}

impl InMemoryPeriodicQueryResultStorage {
    pub fn new(table_prefix: impl Into<String>) -> Self {
        Self {
            names: PeriodicQueryTableNameFactory::new(table_prefix),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Number of rows currently stored for `query_id`.
    pub fn row_count(&self, query_id: &str) -> usize {
        self.tables
            .read()
            .get(query_id)
            .map(|table| table.rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PeriodicQueryResultStorage for InMemoryPeriodicQueryResultStorage {
    async fn create_periodic_query(
        &self,
        query_id: &str,
        sparql: &str,
        variable_order: Option<VariableOrder>,
    ) -> Result<(), StorageError> {
        let variable_order = resolve_variable_order(sparql, variable_order)?;
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(query_id) {
            return check_existing(query_id, &existing.metadata, &variable_order);
        }
        tables.insert(
            query_id.to_string(),
            QueryTable {
                metadata: PeriodicQueryStorageMetadata::new(sparql, variable_order),
                rows: BTreeMap::new(),
                next_row: 0,
            },
        );
        debug!(query_id = %query_id, "Created periodic query result table");
        Ok(())
    }

    async fn get_periodic_query_metadata(
        &self,
        query_id: &str,
    ) -> Result<PeriodicQueryStorageMetadata, StorageError> {
        self.tables
            .read()
            .get(query_id)
            .map(|table| table.metadata.clone())
            .ok_or_else(|| StorageError::QueryNotFound(query_id.to_string()))
    }

    async fn add_periodic_query_results(
        &self,
        query_id: &str,
        results: Vec<VisibilityBindingSet>,
    ) -> Result<(), StorageError> {
        let bins = row_bins(query_id, &results)?;
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(query_id)
            .ok_or_else(|| StorageError::QueryNotFound(query_id.to_string()))?;
        for (bin, row) in bins.into_iter().zip(results) {
            let uniquifier = table.next_row;
            table.next_row += 1;
            table.rows.insert((bin, uniquifier), row);
        }
        Ok(())
    }

    async fn delete_periodic_query_results(
        &self,
        query_id: &str,
        bin: i64,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(query_id)
            .ok_or_else(|| StorageError::QueryNotFound(query_id.to_string()))?;
        table.rows.retain(|(row_bin, _), _| *row_bin != bin);
        Ok(())
    }

    async fn delete_periodic_query_rows(
        &self,
        query_id: &str,
        keys: &[RowKey],
    ) -> Result<usize, StorageError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(query_id)
            .ok_or_else(|| StorageError::QueryNotFound(query_id.to_string()))?;
        Ok(keys
            .iter()
            .filter(|key| table.rows.remove(key).is_some())
            .count())
    }

    async fn delete_periodic_query(&self, query_id: &str) -> Result<(), StorageError> {
        if self.tables.write().remove(query_id).is_some() {
            debug!(query_id = %query_id, "Deleted periodic query result table");
        }
        Ok(())
    }

    async fn list_keyed_results(
        &self,
        query_id: &str,
        bin: Option<i64>,
    ) -> Result<KeyedResultStream, StorageError> {
        let tables = self.tables.read();
        let table = tables
            .get(query_id)
            .ok_or_else(|| StorageError::QueryNotFound(query_id.to_string()))?;
        let rows: Vec<(RowKey, VisibilityBindingSet)> = match bin {
            Some(bin) => table
                .rows
                .range((bin, 0)..=(bin, u128::MAX))
                .map(|(key, row)| (*key, row.clone()))
                .collect(),
            None => table
                .rows
                .iter()
                .map(|(key, row)| (*key, row.clone()))
                .collect(),
        };
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn list_bins(&self, query_id: &str) -> Result<BTreeSet<i64>, StorageError> {
        let tables = self.tables.read();
        let table = tables
            .get(query_id)
            .ok_or_else(|| StorageError::QueryNotFound(query_id.to_string()))?;
        Ok(table.rows.keys().map(|(bin, _)| *bin).collect())
    }

    async fn list_periodic_tables(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .keys()
            .map(|query_id| self.names.make_table_name(query_id))
            .collect();
        names.sort();
        Ok(names)
    }
}
