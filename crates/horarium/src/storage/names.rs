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

//! Naming of per-query result areas.

const PERIODIC_QUERY_SEGMENT: &str = "PERIODIC_QUERY_";

/// Builds and parses the names of periodic query result tables.
///
/// A table is named `<prefix>PERIODIC_QUERY_<query id without dashes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicQueryTableNameFactory {
    prefix: String,
}

impl PeriodicQueryTableNameFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn make_table_name(&self, query_id: &str) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            PERIODIC_QUERY_SEGMENT,
            query_id.replace('-', "")
        )
    }

    /// Query id a table name was built from, if it was built by this factory.
    pub fn periodic_query_id(&self, table_name: &str) -> Option<String> {
        table_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(PERIODIC_QUERY_SEGMENT)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}
