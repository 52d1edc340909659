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

//! Durable result storage on an embedded `redb` database.
//!
//! Layout:
//!
//! - `periodic_query_metadata`: query id → JSON [`PeriodicQueryStorageMetadata`]
//! - one table per query, named by [`PeriodicQueryTableNameFactory`], keyed
//!   by `(bin id, uniquifier)` with JSON rows as values
//!
//! All redb calls block, so every operation runs on the blocking pool.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    check_existing, resolve_variable_order, row_bins, KeyedResultStream,
    PeriodicQueryResultStorage, PeriodicQueryStorageMetadata, PeriodicQueryTableNameFactory,
    RowKey,
};
use crate::error::StorageError;
use crate::model::{VariableOrder, VisibilityBindingSet};

const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("periodic_query_metadata");

/// Rows fetched per read transaction when streaming results.
const PAGE_SIZE: usize = 256;

fn results_table(name: &str) -> TableDefinition<'_, RowKey, &'static [u8]> {
    TableDefinition::new(name)
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Opens (or creates) a redb database file.
pub fn open_database(path: impl AsRef<Path>) -> Result<Arc<Database>, StorageError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Backend(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    let db = Database::create(path)?;
    info!(path = %path.display(), "Opened embedded periodic query store");
    Ok(Arc::new(db))
}

/// Creates a database that lives only in memory.
pub fn open_in_memory_database() -> Result<Arc<Database>, StorageError> {
    let backend = redb::backends::InMemoryBackend::new();
    let db = Database::builder().create_with_backend(backend)?;
    Ok(Arc::new(db))
}

/// Result storage backed by redb.
#[derive(Clone)]
pub struct RedbPeriodicQueryResultStorage {
    db: Arc<Database>,
    names: PeriodicQueryTableNameFactory,
}

impl std::fmt::Debug for RedbPeriodicQueryResultStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbPeriodicQueryResultStorage")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl RedbPeriodicQueryResultStorage {
    /// Wraps an open database, creating the metadata table if needed.
    pub fn new(db: Arc<Database>, table_prefix: impl Into<String>) -> Result<Self, StorageError> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(METADATA)?;
        write_txn.commit()?;
        Ok(Self {
            db,
            names: PeriodicQueryTableNameFactory::new(table_prefix),
        })
    }

    pub fn open(path: impl AsRef<Path>, table_prefix: impl Into<String>) -> Result<Self, StorageError> {
        Self::new(open_database(path)?, table_prefix)
    }

    pub fn open_in_memory(table_prefix: impl Into<String>) -> Result<Self, StorageError> {
        Self::new(open_in_memory_database()?, table_prefix)
    }

    /// The underlying database, for sharing with the query metadata store.
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &PeriodicQueryTableNameFactory) -> Result<T, StorageError>
            + Send
            + 'static,
    {
        let db = Arc::clone(&self.db);
        let names = self.names.clone();
        tokio::task::spawn_blocking(move || f(&db, &names)).await?
    }
}

fn read_metadata(
    db: &Database,
    query_id: &str,
) -> Result<Option<PeriodicQueryStorageMetadata>, StorageError> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(METADATA)?;
    let metadata = match table.get(query_id)? {
        Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
        None => None,
    };
    Ok(metadata)
}

/// Reads one page of rows strictly after `after`, bounded by `bin`.
fn read_page(
    db: &Database,
    table_name: &str,
    query_id: &str,
    bin: Option<i64>,
    after: Option<RowKey>,
) -> Result<Vec<(RowKey, VisibilityBindingSet)>, StorageError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(results_table(table_name)) {
        Ok(table) => table,
        Err(redb::TableError::TableDoesNotExist(_)) => {
            return Err(StorageError::QueryNotFound(query_id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let lower = match (after, bin) {
        (Some(key), _) => Bound::Excluded(key),
        (None, Some(bin)) => Bound::Included((bin, 0)),
        (None, None) => Bound::Unbounded,
    };
    let upper = match bin {
        Some(bin) => Bound::Included((bin, u128::MAX)),
        None => Bound::Unbounded,
    };

    let mut page = Vec::new();
    for entry in table.range::<RowKey>((lower, upper))?.take(PAGE_SIZE) {
        let (key, value) = entry?;
        page.push((key.value(), serde_json::from_slice(value.value())?));
    }
    Ok(page)
}

#[async_trait]
impl PeriodicQueryResultStorage for RedbPeriodicQueryResultStorage {
    async fn create_periodic_query(
        &self,
        query_id: &str,
        sparql: &str,
        variable_order: Option<VariableOrder>,
    ) -> Result<(), StorageError> {
        let variable_order = resolve_variable_order(sparql, variable_order)?;
        let query_id = query_id.to_string();
        let sparql = sparql.to_string();

        self.blocking(move |db, names| {
            let write_txn = db.begin_write()?;
            {
                let mut metadata = write_txn.open_table(METADATA)?;
                let existing: Option<PeriodicQueryStorageMetadata> =
                    match metadata.get(query_id.as_str())? {
                        Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
                        None => None,
                    };
                if let Some(existing) = existing {
                    return check_existing(&query_id, &existing, &variable_order);
                }

                let record = PeriodicQueryStorageMetadata::new(sparql, variable_order);
                let bytes = serde_json::to_vec(&record)?;
                metadata.insert(query_id.as_str(), bytes.as_slice())?;

                let table_name = names.make_table_name(&query_id);
                write_txn.open_table(results_table(&table_name))?;
            }
            write_txn.commit()?;
            debug!(query_id = %query_id, "Created periodic query result table");
            Ok(())
        })
        .await
    }

    async fn get_periodic_query_metadata(
        &self,
        query_id: &str,
    ) -> Result<PeriodicQueryStorageMetadata, StorageError> {
        let query_id = query_id.to_string();
        self.blocking(move |db, _| {
            read_metadata(db, &query_id)?.ok_or(StorageError::QueryNotFound(query_id))
        })
        .await
    }

    async fn add_periodic_query_results(
        &self,
        query_id: &str,
        results: Vec<VisibilityBindingSet>,
    ) -> Result<(), StorageError> {
        let bins = row_bins(query_id, &results)?;
        let query_id = query_id.to_string();

        self.blocking(move |db, names| {
            let write_txn = db.begin_write()?;
            {
                let metadata = write_txn.open_table(METADATA)?;
                if metadata.get(query_id.as_str())?.is_none() {
                    return Err(StorageError::QueryNotFound(query_id));
                }
                let table_name = names.make_table_name(&query_id);
                let mut table = write_txn.open_table(results_table(&table_name))?;
                for (bin, row) in bins.into_iter().zip(results) {
                    let bytes = serde_json::to_vec(&row)?;
                    let key: RowKey = (bin, uuid::Uuid::new_v4().as_u128());
                    table.insert(key, bytes.as_slice())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_periodic_query_results(
        &self,
        query_id: &str,
        bin: i64,
    ) -> Result<(), StorageError> {
        let query_id = query_id.to_string();

        self.blocking(move |db, names| {
            let write_txn = db.begin_write()?;
            let removed = {
                let metadata = write_txn.open_table(METADATA)?;
                if metadata.get(query_id.as_str())?.is_none() {
                    return Err(StorageError::QueryNotFound(query_id));
                }
                let table_name = names.make_table_name(&query_id);
                let mut table = write_txn.open_table(results_table(&table_name))?;
                let keys = table
                    .range::<RowKey>((bin, 0)..=(bin, u128::MAX))?
                    .map(|entry| entry.map(|(key, _)| key.value()))
                    .collect::<Result<Vec<RowKey>, redb::StorageError>>()?;
                for key in &keys {
                    table.remove(key)?;
                }
                keys.len()
            };
            write_txn.commit()?;
            debug!(query_id = %query_id, bin, rows = removed, "Deleted periodic bin results");
            Ok(())
        })
        .await
    }

    async fn delete_periodic_query_rows(
        &self,
        query_id: &str,
        keys: &[RowKey],
    ) -> Result<usize, StorageError> {
        let query_id = query_id.to_string();
        let keys = keys.to_vec();

        self.blocking(move |db, names| {
            let write_txn = db.begin_write()?;
            let removed = {
                let metadata = write_txn.open_table(METADATA)?;
                if metadata.get(query_id.as_str())?.is_none() {
                    return Err(StorageError::QueryNotFound(query_id));
                }
                let table_name = names.make_table_name(&query_id);
                let mut table = write_txn.open_table(results_table(&table_name))?;
                let mut removed = 0;
                for key in &keys {
                    if table.remove(key)?.is_some() {
                        removed += 1;
                    }
                }
                removed
            };
            write_txn.commit()?;
            debug!(query_id = %query_id, rows = removed, "Deleted published result rows");
            Ok(removed)
        })
        .await
    }

    async fn delete_periodic_query(&self, query_id: &str) -> Result<(), StorageError> {
        let query_id = query_id.to_string();

        self.blocking(move |db, names| {
            let write_txn = db.begin_write()?;
            let existed = {
                let mut metadata = write_txn.open_table(METADATA)?;
                let existed = metadata.remove(query_id.as_str())?.is_some();
                let table_name = names.make_table_name(&query_id);
                write_txn.delete_table(results_table(&table_name))?;
                existed
            };
            write_txn.commit()?;
            if existed {
                debug!(query_id = %query_id, "Deleted periodic query result table");
            }
            Ok(())
        })
        .await
    }

    async fn list_keyed_results(
        &self,
        query_id: &str,
        bin: Option<i64>,
    ) -> Result<KeyedResultStream, StorageError> {
        // Surface unknown queries eagerly rather than on first poll.
        self.get_periodic_query_metadata(query_id).await?;

        let this = self.clone();
        let query_id = query_id.to_string();
        let pages = stream::try_unfold(Some(None), move |cursor: Option<Option<RowKey>>| {
            let this = this.clone();
            let query_id = query_id.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok(None);
                };
                let page = this
                    .blocking(move |db, names| {
                        let table_name = names.make_table_name(&query_id);
                        read_page(db, &table_name, &query_id, bin, after)
                    })
                    .await?;
                let next = if page.len() < PAGE_SIZE {
                    None
                } else {
                    page.last().map(|(key, _)| Some(*key))
                };
                let rows: Vec<Result<(RowKey, VisibilityBindingSet), StorageError>> =
                    page.into_iter().map(Ok).collect();
                Ok::<_, StorageError>(Some((stream::iter(rows), next)))
            }
        });
        Ok(pages.try_flatten().boxed())
    }

    async fn list_bins(&self, query_id: &str) -> Result<BTreeSet<i64>, StorageError> {
        let query_id = query_id.to_string();

        self.blocking(move |db, names| {
            let read_txn = db.begin_read()?;
            let table_name = names.make_table_name(&query_id);
            let table = match read_txn.open_table(results_table(&table_name)) {
                Ok(table) => table,
                Err(redb::TableError::TableDoesNotExist(_)) => {
                    return Err(StorageError::QueryNotFound(query_id))
                }
                Err(e) => return Err(e.into()),
            };

            // Skip from one bin to the next instead of reading every row.
            let mut bins = BTreeSet::new();
            let mut lower = Bound::Unbounded;
            loop {
                let first = table
                    .range::<RowKey>((lower, Bound::Unbounded))?
                    .next()
                    .map(|entry| entry.map(|(key, _)| key.value()))
                    .transpose()?;
                let Some((bin, _)) = first else {
                    break;
                };
                bins.insert(bin);
                match bin.checked_add(1) {
                    Some(next) => lower = Bound::Included((next, 0)),
                    None => break,
                }
            }
            Ok(bins)
        })
        .await
    }

    async fn list_periodic_tables(&self) -> Result<Vec<String>, StorageError> {
        self.blocking(|db, names| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(METADATA)?;
            let mut tables = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                tables.push(names.make_table_name(key.value()));
            }
            tables.sort();
            Ok(tables)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BindingSet, Value, PERIODIC_BIN_ID};
    use tempfile::TempDir;

    const QUERY: &str = "select ?id (count(?obs) as ?total) where { ?obs <uri:hasId> ?id } group by ?id";

    fn row(id: &str, bin: i64) -> VisibilityBindingSet {
        VisibilityBindingSet::new(
            BindingSet::new()
                .with("id", Value::literal(id))
                .with("total", Value::Integer(1))
                .with(PERIODIC_BIN_ID, Value::Integer(bin)),
            "U",
        )
    }

    async fn collect(
        storage: &RedbPeriodicQueryResultStorage,
        query_id: &str,
        bin: Option<i64>,
    ) -> Vec<VisibilityBindingSet> {
        storage
            .list_results(query_id, bin)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_detects_conflicts() {
        let storage = RedbPeriodicQueryResultStorage::open_in_memory("rya_").unwrap();
        storage.create_periodic_query("q1", QUERY, None).await.unwrap();
        storage.create_periodic_query("q1", QUERY, None).await.unwrap();

        let metadata = storage.get_periodic_query_metadata("q1").await.unwrap();
        assert_eq!(metadata.sparql, QUERY);
        assert_eq!(metadata.variable_order.to_string(), "periodicBinId;id;total");

        let other = VariableOrder::new(["id"]).unwrap();
        let err = storage
            .create_periodic_query("q1", QUERY, Some(other))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ConflictingMetadata { .. }));
    }

    #[tokio::test]
    async fn test_bins_are_isolated() {
        let storage = RedbPeriodicQueryResultStorage::open_in_memory("rya_").unwrap();
        storage.create_periodic_query("q1", QUERY, None).await.unwrap();
        storage
            .add_periodic_query_results("q1", vec![row("a", 15), row("a", 15), row("b", 30)])
            .await
            .unwrap();

        assert_eq!(collect(&storage, "q1", Some(15)).await.len(), 2);
        assert_eq!(collect(&storage, "q1", Some(30)).await, vec![row("b", 30)]);
        assert!(collect(&storage, "q1", Some(45)).await.is_empty());

        storage.delete_periodic_query_results("q1", 15).await.unwrap();
        assert_eq!(collect(&storage, "q1", None).await, vec![row("b", 30)]);
    }

    #[tokio::test]
    async fn test_delete_listed_rows_and_list_bins() {
        let storage = RedbPeriodicQueryResultStorage::open_in_memory("rya_").unwrap();
        storage.create_periodic_query("q1", QUERY, None).await.unwrap();
        storage
            .add_periodic_query_results("q1", vec![row("a", -15), row("a", 15), row("b", 15), row("c", 45)])
            .await
            .unwrap();
        assert_eq!(
            storage.list_bins("q1").await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![-15, 15, 45]
        );

        let listed: Vec<(RowKey, VisibilityBindingSet)> = storage
            .list_keyed_results("q1", Some(15))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        storage
            .add_periodic_query_results("q1", vec![row("d", 15)])
            .await
            .unwrap();

        let keys: Vec<RowKey> = listed.iter().map(|(key, _)| *key).collect();
        assert_eq!(storage.delete_periodic_query_rows("q1", &keys).await.unwrap(), 2);
        assert_eq!(collect(&storage, "q1", Some(15)).await, vec![row("d", 15)]);
        assert!(matches!(
            storage.list_bins("nope").await,
            Err(StorageError::QueryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_spans_pages() {
        let storage = RedbPeriodicQueryResultStorage::open_in_memory("rya_").unwrap();
        storage.create_periodic_query("q1", QUERY, None).await.unwrap();
        let rows: Vec<_> = (0..(PAGE_SIZE * 2 + 3)).map(|i| row(&format!("id_{}", i), 15)).collect();
        storage.add_periodic_query_results("q1", rows).await.unwrap();

        assert_eq!(collect(&storage, "q1", Some(15)).await.len(), PAGE_SIZE * 2 + 3);
        assert_eq!(collect(&storage, "q1", None).await.len(), PAGE_SIZE * 2 + 3);
    }

    #[tokio::test]
    async fn test_delete_query_twice_and_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("periodic.redb");

        {
            let storage = RedbPeriodicQueryResultStorage::open(&path, "rya_").unwrap();
            storage.create_periodic_query("q1", QUERY, None).await.unwrap();
            storage.create_periodic_query("q2", QUERY, None).await.unwrap();
            storage
                .add_periodic_query_results("q2", vec![row("a", 15)])
                .await
                .unwrap();
            storage.delete_periodic_query("q1").await.unwrap();
            storage.delete_periodic_query("q1").await.unwrap();
        }

        let reopened = RedbPeriodicQueryResultStorage::open(&path, "rya_").unwrap();
        assert_eq!(
            reopened.list_periodic_tables().await.unwrap(),
            vec!["rya_PERIODIC_QUERY_q2"]
        );
        assert_eq!(collect(&reopened, "q2", Some(15)).await.len(), 1);
        assert!(matches!(
            reopened.list_results("q1", None).await,
            Err(StorageError::QueryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_bin_id_is_rejected() {
        let storage = RedbPeriodicQueryResultStorage::open_in_memory("rya_").unwrap();
        storage.create_periodic_query("q1", QUERY, None).await.unwrap();
        let unbinned: VisibilityBindingSet = BindingSet::new().with("id", Value::literal("a")).into();
        let err = storage
            .add_periodic_query_results("q1", vec![unbinned])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingBinId(_)));
    }
}
