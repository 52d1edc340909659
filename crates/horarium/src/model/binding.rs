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

//! Result tuples ("binding sets") and the column order they are stored in.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StorageError;

/// Name of the binding that carries the bin id of a periodic result row.
pub const PERIODIC_BIN_ID: &str = "periodicBinId";

/// Datatype IRI of `xsd:dateTime` literals.
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// A single bound value in a result tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// An IRI reference.
    Iri(String),
    /// A literal with an optional datatype IRI.
    Literal {
        lexical: String,
        datatype: Option<String>,
    },
    /// An integer literal.
    Integer(i64),
    /// A timestamp literal.
    DateTime(DateTime<FixedOffset>),
}

impl Value {
    /// Creates a plain string literal.
    pub fn literal(lexical: impl Into<String>) -> Self {
        Value::Literal {
            lexical: lexical.into(),
            datatype: None,
        }
    }

    /// Creates a typed literal.
    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Value::Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
        }
    }

    /// Epoch milliseconds of a temporal value.
    ///
    /// Returns `None` for anything that is not a timestamp or an
    /// `xsd:dateTime` literal with a parseable RFC 3339 lexical form.
    pub fn epoch_millis(&self) -> Option<i64> {
        match self {
            Value::DateTime(dt) => Some(dt.timestamp_millis()),
            Value::Literal {
                lexical,
                datatype: Some(datatype),
            } if datatype == XSD_DATE_TIME => DateTime::parse_from_rfc3339(lexical)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Iri(iri) => write!(f, "<{}>", iri),
            Value::Literal {
                lexical,
                datatype: None,
            } => write!(f, "\"{}\"", lexical),
            Value::Literal {
                lexical,
                datatype: Some(datatype),
            } => write!(f, "\"{}\"^^<{}>", lexical, datatype),
            Value::Integer(value) => write!(f, "{}", value),
            Value::DateTime(dt) => write!(f, "\"{}\"^^<{}>", dt.to_rfc3339(), XSD_DATE_TIME),
        }
    }
}

/// One row of query output: a mapping from variable name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingSet {
    bindings: BTreeMap<String, Value>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding, consuming and returning the set.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a binding, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.bindings.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// The bin id this row was assigned to, if any.
    pub fn bin_id(&self) -> Option<i64> {
        self.get(PERIODIC_BIN_ID).and_then(Value::as_integer)
    }
}

impl fmt::Display for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "]")
    }
}

/// A binding set together with the visibility expression that guards it.
///
/// An empty visibility means the row is readable by everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibilityBindingSet {
    binding_set: BindingSet,
    #[serde(default)]
    visibility: String,
}

impl VisibilityBindingSet {
    pub fn new(binding_set: BindingSet, visibility: impl Into<String>) -> Self {
        Self {
            binding_set,
            visibility: visibility.into(),
        }
    }

    pub fn binding_set(&self) -> &BindingSet {
        &self.binding_set
    }

    pub fn binding_set_mut(&mut self) -> &mut BindingSet {
        &mut self.binding_set
    }

    pub fn into_binding_set(self) -> BindingSet {
        self.binding_set
    }

    pub fn visibility(&self) -> &str {
        &self.visibility
    }

    pub fn bin_id(&self) -> Option<i64> {
        self.binding_set.bin_id()
    }
}

impl From<BindingSet> for VisibilityBindingSet {
    fn from(binding_set: BindingSet) -> Self {
        Self::new(binding_set, "")
    }
}

/// The ordered variable names that make up a stored result tuple.
///
/// Never empty and never contains a variable twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct VariableOrder(Vec<String>);

impl VariableOrder {
    pub fn new<I, S>(variables: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variables: Vec<String> = variables.into_iter().map(Into::into).collect();
        if variables.is_empty() {
            return Err(StorageError::InvalidVariableOrder(
                "variable order must not be empty".to_string(),
            ));
        }
        for (i, variable) in variables.iter().enumerate() {
            if variable.is_empty() {
                return Err(StorageError::InvalidVariableOrder(
                    "variable names must not be empty".to_string(),
                ));
            }
            if variables[..i].contains(variable) {
                return Err(StorageError::InvalidVariableOrder(format!(
                    "variable '{}' appears more than once",
                    variable
                )));
            }
        }
        Ok(Self(variables))
    }

    /// Returns this order with [`PERIODIC_BIN_ID`] as its first column.
    pub fn with_bin_id_first(&self) -> Self {
        let mut variables = Vec::with_capacity(self.0.len() + 1);
        variables.push(PERIODIC_BIN_ID.to_string());
        variables.extend(
            self.0
                .iter()
                .filter(|variable| variable.as_str() != PERIODIC_BIN_ID)
                .cloned(),
        );
        Self(variables)
    }

    pub fn variables(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for VariableOrder {
    type Error = StorageError;

    fn try_from(variables: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(variables)
    }
}

impl From<VariableOrder> for Vec<String> {
    fn from(order: VariableOrder) -> Self {
        order.0
    }
}

impl fmt::Display for VariableOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(";"))
    }
}
