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

//! Query metadata graph.
//!
//! A registered query is stored as a tree of nodes whose children point at
//! their parents. The root is either a `QUERY_` node carrying the external
//! query id or a `CONSTRUCT_` node whose own id encodes it. Periodic query
//! nodes sit below filters and aggregations and carry the schedule.
//!
//! Recovery starts from the periodic nodes and walks parent pointers up to
//! the root to learn which query id each schedule belongs to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RecoveryError, StorageError};

#[cfg(feature = "embedded")]
pub mod embedded;
pub mod memory;

#[cfg(feature = "embedded")]
pub use embedded::RedbQueryMetadataDao;
pub use memory::InMemoryQueryMetadataDao;

pub const QUERY_PREFIX: &str = "QUERY_";
pub const CONSTRUCT_PREFIX: &str = "CONSTRUCT_";
pub const FILTER_PREFIX: &str = "FILTER_";
pub const AGGREGATION_PREFIX: &str = "AGGREGATION_";
pub const PERIODIC_QUERY_PREFIX: &str = "PERIODIC_QUERY_";

/// A node in the query metadata graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryNode {
    /// Root of a SELECT query; `pcj_id` is the externally visible query id.
    Query { pcj_id: String },
    /// Root of a CONSTRUCT query; the query id is the node id minus its prefix.
    Construct,
    Filter { parent: String },
    Aggregation { parent: String },
    PeriodicQuery {
        parent: String,
        period_ms: i64,
        window_ms: i64,
        temporal_variable: String,
    },
}

impl QueryNode {
    pub fn parent(&self) -> Option<&str> {
        match self {
            QueryNode::Query { .. } | QueryNode::Construct => None,
            QueryNode::Filter { parent }
            | QueryNode::Aggregation { parent }
            | QueryNode::PeriodicQuery { parent, .. } => Some(parent),
        }
    }
}

/// Schedule parameters of a periodic query node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicQueryMetadata {
    pub node_id: String,
    pub period_ms: i64,
    pub window_ms: i64,
    pub temporal_variable: String,
}

/// Access to the persisted query metadata graph.
#[async_trait]
pub trait QueryMetadataDao: Send + Sync {
    async fn put_node(&self, node_id: &str, node: QueryNode) -> Result<(), StorageError>;

    async fn node(&self, node_id: &str) -> Result<Option<QueryNode>, StorageError>;

    /// Every node in the graph, keyed by node id.
    async fn nodes(&self) -> Result<HashMap<String, QueryNode>, StorageError>;

    async fn remove_nodes(&self, node_ids: &[String]) -> Result<(), StorageError>;

    /// All periodic query nodes, sorted by node id.
    async fn periodic_query_nodes(&self) -> Result<Vec<PeriodicQueryMetadata>, StorageError> {
        let mut periodic: Vec<PeriodicQueryMetadata> = self
            .nodes()
            .await?
            .into_iter()
            .filter_map(|(node_id, node)| match node {
                QueryNode::PeriodicQuery {
                    period_ms,
                    window_ms,
                    temporal_variable,
                    ..
                } => Some(PeriodicQueryMetadata {
                    node_id,
                    period_ms,
                    window_ms,
                    temporal_variable,
                }),
                _ => None,
            })
            .collect();
        periodic.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(periodic)
    }

    /// Removes every node that resolves to `query_id`.
    ///
    /// Nodes whose parent chain is broken are left alone.
    async fn remove_query(&self, query_id: &str) -> Result<usize, StorageError> {
        let nodes = self.nodes().await?;
        let doomed: Vec<String> = nodes
            .keys()
            .filter(|node_id| {
                resolve_query_id(&nodes, node_id)
                    .map(|resolved| resolved == query_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        self.remove_nodes(&doomed).await?;
        Ok(doomed.len())
    }
}

/// Resolves the query id that `node_id` belongs to.
pub async fn query_id_for_node(
    dao: &dyn QueryMetadataDao,
    node_id: &str,
) -> Result<String, RecoveryError> {
    let nodes = dao.nodes().await?;
    resolve_query_id(&nodes, node_id)
}

/// Walks parent pointers from `node_id` to the root of its query.
///
/// The walk is bounded by the number of nodes, so a cycle is reported as a
/// broken chain instead of recursing forever.
pub fn resolve_query_id(
    nodes: &HashMap<String, QueryNode>,
    node_id: &str,
) -> Result<String, RecoveryError> {
    resolve_from(nodes, node_id, node_id, nodes.len())
}

fn resolve_from(
    nodes: &HashMap<String, QueryNode>,
    origin: &str,
    node_id: &str,
    remaining: usize,
) -> Result<String, RecoveryError> {
    let broken = |reason: String| RecoveryError::BrokenParentChain {
        node_id: origin.to_string(),
        reason,
    };

    if remaining == 0 {
        return Err(broken("parent chain contains a cycle".to_string()));
    }

    let node = nodes
        .get(node_id)
        .ok_or_else(|| broken(format!("node '{}' does not exist", node_id)))?;

    match node {
        QueryNode::Query { pcj_id } => Ok(pcj_id.clone()),
        QueryNode::Construct => node_id
            .strip_prefix(CONSTRUCT_PREFIX)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                broken(format!(
                    "construct node '{}' lacks the {} prefix",
                    node_id, CONSTRUCT_PREFIX
                ))
            }),
        QueryNode::Filter { parent }
        | QueryNode::Aggregation { parent }
        | QueryNode::PeriodicQuery { parent, .. } => {
            resolve_from(nodes, origin, parent, remaining - 1)
        }
    }
}
