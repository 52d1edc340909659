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

//! Periodic query result storage.
//!
//! Each registered periodic query owns a result area holding rows keyed by
//! `(bin id, uniquifier)`, plus a metadata record with the query text and the
//! column order of its rows. The external join engine appends rows tagged
//! with [`PERIODIC_BIN_ID`](crate::model::PERIODIC_BIN_ID); the coordinator
//! lists a bin and then deletes exactly the rows it listed, so rows appended
//! to the bin in the meantime survive until the next publication.
//!
//! Two implementations are provided:
//!
//! - [`InMemoryPeriodicQueryResultStorage`] for tests and in-process wiring
//! - [`RedbPeriodicQueryResultStorage`] (feature `embedded`), durable on disk

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::StorageError;
use crate::model::{VariableOrder, VisibilityBindingSet};
use crate::sparql::projection_variables;

#[cfg(feature = "embedded")]
pub mod embedded;
pub mod memory;
pub mod names;

#[cfg(feature = "embedded")]
pub use embedded::RedbPeriodicQueryResultStorage;
pub use memory::InMemoryPeriodicQueryResultStorage;
pub use names::PeriodicQueryTableNameFactory;

/// Lazily produced result rows.
///
/// Each call to [`PeriodicQueryResultStorage::list_results`] opens a fresh
/// stream. Dropping the stream releases any underlying cursor.
pub type ResultStream = BoxStream<'static, Result<VisibilityBindingSet, StorageError>>;

/// Storage key of one row: its bin id and a per-row uniquifier.
pub type RowKey = (i64, u128);

/// Result rows together with their storage keys, in key order.
pub type KeyedResultStream =
    BoxStream<'static, Result<(RowKey, VisibilityBindingSet), StorageError>>;

/// Durable description of a registered periodic query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicQueryStorageMetadata {
    pub sparql: String,
    pub variable_order: VariableOrder,
}

impl PeriodicQueryStorageMetadata {
    pub fn new(sparql: impl Into<String>, variable_order: VariableOrder) -> Self {
        Self {
            sparql: sparql.into(),
            variable_order,
        }
    }
}

/// Storage contract for per-query, per-bin result rows.
#[async_trait]
pub trait PeriodicQueryResultStorage: Send + Sync {
    /// Creates the result area and metadata record for `query_id`.
    ///
    /// Without an explicit `variable_order` the order is derived from the
    /// query's SELECT projection. The stored order always starts with the bin
    /// id. Creating the same query twice with the same order is a no-op; a
    /// different order fails with [`StorageError::ConflictingMetadata`].
    async fn create_periodic_query(
        &self,
        query_id: &str,
        sparql: &str,
        variable_order: Option<VariableOrder>,
    ) -> Result<(), StorageError>;

    /// Creates a periodic query under a freshly generated id and returns it.
    async fn create_periodic_query_with_new_id(&self, sparql: &str) -> Result<String, StorageError> {
        let query_id = uuid::Uuid::new_v4().simple().to_string();
        self.create_periodic_query(&query_id, sparql, None).await?;
        Ok(query_id)
    }

    async fn get_periodic_query_metadata(
        &self,
        query_id: &str,
    ) -> Result<PeriodicQueryStorageMetadata, StorageError>;

    /// Appends rows in one atomic batch. Every row must carry a bin id.
    async fn add_periodic_query_results(
        &self,
        query_id: &str,
        results: Vec<VisibilityBindingSet>,
    ) -> Result<(), StorageError>;

    /// Removes exactly the rows of one bin.
    async fn delete_periodic_query_results(&self, query_id: &str, bin: i64)
        -> Result<(), StorageError>;

    /// Removes the rows stored under `keys` and returns how many existed.
    ///
    /// Keys that are no longer present are ignored.
    async fn delete_periodic_query_rows(
        &self,
        query_id: &str,
        keys: &[RowKey],
    ) -> Result<usize, StorageError>;

    /// Removes all rows and the metadata of a query. Unknown ids are a no-op.
    async fn delete_periodic_query(&self, query_id: &str) -> Result<(), StorageError>;

    /// Lists rows with their keys, restricted to one bin when `bin` is given.
    async fn list_keyed_results(
        &self,
        query_id: &str,
        bin: Option<i64>,
    ) -> Result<KeyedResultStream, StorageError>;

    /// Lists the rows of a query, restricted to one bin when `bin` is given.
    async fn list_results(
        &self,
        query_id: &str,
        bin: Option<i64>,
    ) -> Result<ResultStream, StorageError> {
        Ok(self
            .list_keyed_results(query_id, bin)
            .await?
            .map_ok(|(_, row)| row)
            .boxed())
    }

    /// Distinct bin ids that currently hold at least one row.
    async fn list_bins(&self, query_id: &str) -> Result<BTreeSet<i64>, StorageError>;

    /// Names of every result area currently holding periodic query data.
    async fn list_periodic_tables(&self) -> Result<Vec<String>, StorageError>;
}

/// Variable order to store for a new query.
pub(crate) fn resolve_variable_order(
    sparql: &str,
    variable_order: Option<VariableOrder>,
) -> Result<VariableOrder, StorageError> {
    let order = match variable_order {
        Some(order) => order,
        None => projection_variables(sparql)?,
    };
    Ok(order.with_bin_id_first())
}

/// Checks a create request against an existing metadata record.
pub(crate) fn check_existing(
    query_id: &str,
    existing: &PeriodicQueryStorageMetadata,
    requested: &VariableOrder,
) -> Result<(), StorageError> {
    if &existing.variable_order == requested {
        Ok(())
    } else {
        Err(StorageError::ConflictingMetadata {
            query_id: query_id.to_string(),
            existing: existing.variable_order.to_string(),
            requested: requested.to_string(),
        })
    }
}

/// Bin id of each row, failing on the first row without one.
pub(crate) fn row_bins(
    query_id: &str,
    results: &[VisibilityBindingSet],
) -> Result<Vec<i64>, StorageError> {
    results
        .iter()
        .map(|row| {
            row.bin_id()
                .ok_or_else(|| StorageError::MissingBinId(query_id.to_string()))
        })
        .collect()
}
