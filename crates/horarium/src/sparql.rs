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

//! Helpers for reading periodic queries.
//!
//! A periodic query declares its schedule through a filter of the form
//! `FILTER(function:periodic(?time, 1, .25, time:minutes))`: the temporal
//! variable, the window size, the period, and the unit both are expressed in.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::StorageError;
use crate::model::VariableOrder;

static PERIODIC_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\w+:periodic|<[^>]*#periodic>)\s*\(\s*[?$](\w+)\s*,\s*([0-9]*\.?[0-9]+)\s*,\s*([0-9]*\.?[0-9]+)\s*,\s*(?:\w+:|<[^>]*#)(\w+)>?\s*\)",
    )
    .expect("Failed to compile regex")
});

static SELECT_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bSELECT\b(.*?)(?:\bWHERE\b|\{)").expect("Failed to compile regex")
});

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?$](\w+)").expect("Failed to compile regex"));

static ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bAS\s+[?$](\w+)").expect("Failed to compile regex"));

/// Schedule parameters declared by a periodic query's filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicFilter {
    pub temporal_variable: String,
    pub window_ms: i64,
    pub period_ms: i64,
}

impl PeriodicFilter {
    /// Extracts the periodic filter from `sparql`.
    pub fn parse(sparql: &str) -> Result<Self, StorageError> {
        let captures = PERIODIC_FILTER.captures(sparql).ok_or_else(|| {
            StorageError::MalformedQuery("query does not contain a periodic filter".to_string())
        })?;

        let unit_millis = match captures[4].to_ascii_lowercase().as_str() {
            "seconds" => 1_000.0,
            "minutes" => 60_000.0,
            "hours" => 3_600_000.0,
            "days" => 86_400_000.0,
            other => {
                return Err(StorageError::MalformedQuery(format!(
                    "unsupported periodic time unit '{}'",
                    other
                )))
            }
        };

        let window_ms = to_millis(&captures[2], unit_millis)?;
        let period_ms = to_millis(&captures[3], unit_millis)?;
        if period_ms <= 0 {
            return Err(StorageError::MalformedQuery(
                "periodic query period must be positive".to_string(),
            ));
        }
        if window_ms < period_ms {
            return Err(StorageError::MalformedQuery(format!(
                "window ({} ms) must not be shorter than period ({} ms)",
                window_ms, period_ms
            )));
        }
        if window_ms % period_ms != 0 {
            return Err(StorageError::MalformedQuery(format!(
                "window ({} ms) must be a whole multiple of period ({} ms)",
                window_ms, period_ms
            )));
        }

        Ok(Self {
            temporal_variable: captures[1].to_string(),
            window_ms,
            period_ms,
        })
    }
}

fn to_millis(amount: &str, unit_millis: f64) -> Result<i64, StorageError> {
    let amount: f64 = amount
        .parse()
        .map_err(|_| StorageError::MalformedQuery(format!("invalid duration '{}'", amount)))?;
    let millis = (amount * unit_millis).round();
    if !millis.is_finite() || millis > i64::MAX as f64 {
        return Err(StorageError::MalformedQuery(format!(
            "duration '{}' is out of range",
            amount
        )));
    }
    Ok(millis as i64)
}

/// Variables projected by the query's SELECT clause, in declaration order.
///
/// Plain variables contribute their own name and `(expr AS ?alias)`
/// contributes the alias. `SELECT *` has no fixed column order and is
/// rejected.
pub fn projection_variables(sparql: &str) -> Result<VariableOrder, StorageError> {
    let clause = SELECT_CLAUSE
        .captures(sparql)
        .and_then(|c| c.get(1))
        .ok_or_else(|| StorageError::MalformedQuery("query has no SELECT clause".to_string()))?
        .as_str();

    let mut variables = Vec::new();
    let mut depth = 0usize;
    let mut segment = String::new();

    for ch in clause.chars() {
        match ch {
            '(' => {
                if depth == 0 {
                    collect_plain(&segment, &mut variables)?;
                    segment.clear();
                } else {
                    segment.push(ch);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let alias = ALIAS
                        .captures_iter(&segment)
                        .last()
                        .map(|c| c[1].to_string())
                        .ok_or_else(|| {
                            StorageError::MalformedQuery(format!(
                                "projected expression '({})' has no alias",
                                segment.trim()
                            ))
                        })?;
                    variables.push(alias);
                    segment.clear();
                } else {
                    segment.push(ch);
                }
            }
            _ => segment.push(ch),
        }
    }
    if depth != 0 {
        return Err(StorageError::MalformedQuery(
            "unbalanced parentheses in SELECT clause".to_string(),
        ));
    }
    collect_plain(&segment, &mut variables)?;

    if variables.is_empty() {
        return Err(StorageError::MalformedQuery(
            "SELECT clause projects no variables".to_string(),
        ));
    }
    VariableOrder::new(variables)
}

fn collect_plain(segment: &str, variables: &mut Vec<String>) -> Result<(), StorageError> {
    if segment.contains('*') {
        return Err(StorageError::MalformedQuery(
            "SELECT * has no fixed variable order".to_string(),
        ));
    }
    variables.extend(VARIABLE.captures_iter(segment).map(|c| c[1].to_string()));
    Ok(())
}
