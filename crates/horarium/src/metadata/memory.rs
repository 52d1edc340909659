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

//! In-memory query metadata graph.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{QueryMetadataDao, QueryNode};
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct InMemoryQueryMetadataDao {
    nodes: RwLock<HashMap<String, QueryNode>>,
}

impl InMemoryQueryMetadataDao {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryMetadataDao for InMemoryQueryMetadataDao {
    async fn put_node(&self, node_id: &str, node: QueryNode) -> Result<(), StorageError> {
        self.nodes.write().insert(node_id.to_string(), node);
        Ok(())
    }

    async fn node(&self, node_id: &str) -> Result<Option<QueryNode>, StorageError> {
        Ok(self.nodes.read().get(node_id).cloned())
    }

    async fn nodes(&self) -> Result<HashMap<String, QueryNode>, StorageError> {
        Ok(self.nodes.read().clone())
    }

    async fn remove_nodes(&self, node_ids: &[String]) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write();
        for node_id in node_ids {
            nodes.remove(node_id);
        }
        Ok(())
    }
}
