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

//! Ingest side of periodic queries: assigning new results to bins.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

use crate::binning::BinCalculator;
use crate::error::StorageError;
use crate::metadata::PeriodicQueryMetadata;
use crate::model::{Value, VisibilityBindingSet, PERIODIC_BIN_ID};
use crate::storage::PeriodicQueryResultStorage;

/// Writes a freshly computed result into every bin it belongs to.
#[derive(Clone)]
pub struct PeriodicBinUpdater {
    storage: Arc<dyn PeriodicQueryResultStorage>,
    calculator: BinCalculator,
}

impl std::fmt::Debug for PeriodicBinUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicBinUpdater")
            .field("calculator", &self.calculator)
            .finish_non_exhaustive()
    }
}

impl PeriodicBinUpdater {
    pub fn new(storage: Arc<dyn PeriodicQueryResultStorage>, calculator: BinCalculator) -> Self {
        Self {
            storage,
            calculator,
        }
    }

    /// Copies `result` once per bin, tags each copy with its bin id and
    /// appends all copies in one batch.
    ///
    /// Returns the bins written. A result whose temporal variable is missing
    /// or not a timestamp is dropped and yields an empty set.
    pub async fn update_periodic_bin_results(
        &self,
        query_id: &str,
        metadata: &PeriodicQueryMetadata,
        result: &VisibilityBindingSet,
    ) -> Result<BTreeSet<i64>, StorageError> {
        let bins = self.calculator.bins_for_binding_set(
            result.binding_set(),
            &metadata.temporal_variable,
            metadata.window_ms,
            metadata.period_ms,
        );
        if bins.is_empty() {
            return Ok(bins);
        }

        let rows: Vec<VisibilityBindingSet> = bins
            .iter()
            .map(|bin| {
                let mut row = result.clone();
                row.binding_set_mut()
                    .insert(PERIODIC_BIN_ID, Value::Integer(*bin));
                row
            })
            .collect();
        self.storage.add_periodic_query_results(query_id, rows).await?;
        trace!(query_id = %query_id, bins = ?bins, "Added result to periodic bins");
        Ok(bins)
    }
}
