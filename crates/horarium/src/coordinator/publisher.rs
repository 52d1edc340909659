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

//! Publish-and-clear of a single closed bin.

use futures::TryStreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PublishError, StorageError};
use crate::model::{BindingSet, VisibilityBindingSet};
use crate::storage::{PeriodicQueryResultStorage, RowKey};
use crate::transport::ResultExporter;

/// Reads a bin from storage, exports it, then deletes the exported rows.
///
/// Rows are only deleted after a successful export, so a failed cycle
/// leaves them in place for a later retry. Only the rows that were listed
/// are deleted; anything written to the bin during the export stays stored.
#[derive(Clone)]
pub struct BinPublisher {
    storage: Arc<dyn PeriodicQueryResultStorage>,
    exporter: Arc<dyn ResultExporter>,
}

impl std::fmt::Debug for BinPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinPublisher").finish_non_exhaustive()
    }
}

impl BinPublisher {
    pub fn new(
        storage: Arc<dyn PeriodicQueryResultStorage>,
        exporter: Arc<dyn ResultExporter>,
    ) -> Self {
        Self { storage, exporter }
    }

    pub fn storage(&self) -> &Arc<dyn PeriodicQueryResultStorage> {
        &self.storage
    }

    /// Publishes one bin, returning the number of rows exported.
    ///
    /// Empty bins are not exported.
    pub async fn publish_bin(&self, query_id: &str, bin: i64) -> Result<usize, PublishError> {
        let listed: Vec<(RowKey, VisibilityBindingSet)> = self
            .storage
            .list_keyed_results(query_id, Some(bin))
            .await?
            .try_collect()
            .await?;
        let count = listed.len();
        if count == 0 {
            debug!(query_id = %query_id, bin, "Periodic bin is empty");
            return Ok(0);
        }

        let (keys, rows): (Vec<RowKey>, Vec<VisibilityBindingSet>) = listed.into_iter().unzip();
        let binding_sets: Vec<BindingSet> = rows
            .into_iter()
            .map(VisibilityBindingSet::into_binding_set)
            .collect();
        self.exporter.export(query_id, bin, binding_sets).await?;

        self.storage
            .delete_periodic_query_rows(query_id, &keys)
            .await?;
        debug!(query_id = %query_id, bin, rows = count, "Published periodic bin");
        Ok(count)
    }

    /// Distinct bins holding rows that are strictly older than `before`.
    pub async fn stale_bins(
        &self,
        query_id: &str,
        before: i64,
    ) -> Result<BTreeSet<i64>, StorageError> {
        let mut bins = self.storage.list_bins(query_id).await?;
        bins.retain(|bin| *bin < before);
        Ok(bins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Value, PERIODIC_BIN_ID};
    use crate::error::TransportError;
    use crate::storage::InMemoryPeriodicQueryResultStorage;
    use crate::transport::{ChannelResultExporter, ExportedResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Appends a row to the bin being exported before forwarding the export.
    struct AppendingExporter {
        storage: Arc<InMemoryPeriodicQueryResultStorage>,
        inner: ChannelResultExporter,
        appended: AtomicBool,
    }

    #[async_trait]
    impl ResultExporter for AppendingExporter {
        async fn export(
            &self,
            query_id: &str,
            bin: i64,
            rows: Vec<BindingSet>,
        ) -> Result<(), TransportError> {
            if !self.appended.swap(true, Ordering::SeqCst) {
                self.storage
                    .add_periodic_query_results(query_id, vec![row("late", bin)])
                    .await
                    .map_err(|e| TransportError::Publish {
                        topic: query_id.to_string(),
                        message: e.to_string(),
                    })?;
            }
            self.inner.export(query_id, bin, rows).await
        }
    }

    fn row(id: &str, bin: i64) -> VisibilityBindingSet {
        BindingSet::new()
            .with("id", Value::literal(id))
            .with(PERIODIC_BIN_ID, Value::Integer(bin))
            .into()
    }

    async fn setup() -> (
        Arc<InMemoryPeriodicQueryResultStorage>,
        BinPublisher,
        UnboundedReceiver<ExportedResult>,
    ) {
        let storage = Arc::new(InMemoryPeriodicQueryResultStorage::default());
        storage
            .create_periodic_query("q1", "select ?id where { }", None)
            .await
            .unwrap();
        let (exporter, rx) = ChannelResultExporter::new();
        let publisher = BinPublisher::new(storage.clone(), Arc::new(exporter));
        (storage, publisher, rx)
    }

    #[tokio::test]
    async fn test_publish_exports_then_clears() {
        let (storage, publisher, mut rx) = setup().await;
        storage
            .add_periodic_query_results("q1", vec![row("a", 15), row("b", 15), row("c", 30)])
            .await
            .unwrap();

        assert_eq!(publisher.publish_bin("q1", 15).await.unwrap(), 2);
        assert_eq!(storage.row_count("q1"), 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.query_id, "q1");
        assert_eq!(first.bin, 15);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_export_keeps_rows() {
        let (storage, publisher, rx) = setup().await;
        storage
            .add_periodic_query_results("q1", vec![row("a", 15)])
            .await
            .unwrap();
        drop(rx);

        let err = publisher.publish_bin("q1", 15).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport(_)));
        assert_eq!(storage.row_count("q1"), 1);
    }

    #[tokio::test]
    async fn test_row_written_during_export_survives() {
        let storage = Arc::new(InMemoryPeriodicQueryResultStorage::default());
        storage
            .create_periodic_query("q1", "select ?id where { }", None)
            .await
            .unwrap();
        let (inner, mut rx) = ChannelResultExporter::new();
        let exporter = AppendingExporter {
            storage: storage.clone(),
            inner,
            appended: AtomicBool::new(false),
        };
        let publisher = BinPublisher::new(storage.clone(), Arc::new(exporter));
        storage
            .add_periodic_query_results("q1", vec![row("a", 15)])
            .await
            .unwrap();

        assert_eq!(publisher.publish_bin("q1", 15).await.unwrap(), 1);
        assert_eq!(storage.row_count("q1"), 1);
        assert_eq!(rx.recv().await.unwrap().binding_set.get("id"), Some(&Value::literal("a")));

        assert_eq!(publisher.publish_bin("q1", 15).await.unwrap(), 1);
        assert_eq!(storage.row_count("q1"), 0);
        assert_eq!(
            rx.recv().await.unwrap().binding_set.get("id"),
            Some(&Value::literal("late"))
        );
    }

    #[tokio::test]
    async fn test_stale_bins() {
        let (storage, publisher, _rx) = setup().await;
        storage
            .add_periodic_query_results(
                "q1",
                vec![row("a", 15), row("b", 15), row("c", 30), row("d", 45)],
            )
            .await
            .unwrap();

        let stale = publisher.stale_bins("q1", 45).await.unwrap();
        assert_eq!(stale.into_iter().collect::<Vec<_>>(), vec![15, 30]);
    }
}
