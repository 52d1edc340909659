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

//! Periodic notifications and the commands that mutate the live schedule.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RegistrationError, TransportError};

/// Unit in which a notification's period and initial delay are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Number of milliseconds in one unit.
    pub fn millis(self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
        }
    }

    /// Converts `amount` of this unit to milliseconds, saturating on overflow.
    pub fn to_millis(self, amount: u64) -> u64 {
        amount.saturating_mul(self.millis())
    }

    pub fn to_duration(self, amount: u64) -> Duration {
        Duration::from_millis(self.to_millis(amount))
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
        };
        f.write_str(name)
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MILLISECONDS" | "MS" => Ok(TimeUnit::Milliseconds),
            "SECONDS" | "S" => Ok(TimeUnit::Seconds),
            "MINUTES" | "M" => Ok(TimeUnit::Minutes),
            "HOURS" | "H" => Ok(TimeUnit::Hours),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

/// Schedule of a registered periodic query.
///
/// Immutable once built. Use [`PeriodicNotification::builder`] to construct
/// one; `build()` rejects an empty id and a zero period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodicNotification {
    id: String,
    period: u64,
    time_unit: TimeUnit,
    #[serde(default)]
    initial_delay: u64,
}

impl PeriodicNotification {
    pub fn builder() -> PeriodicNotificationBuilder {
        PeriodicNotificationBuilder::default()
    }

    /// Checks the invariants `build()` enforces.
    ///
    /// Deserialized notifications bypass the builder, so consumers call this
    /// before scheduling.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.id.trim().is_empty() {
            return Err(RegistrationError::Malformed {
                id: self.id.clone(),
                reason: "notification id must not be empty".to_string(),
            });
        }
        if self.period == 0 {
            return Err(RegistrationError::Malformed {
                id: self.id.clone(),
                reason: "period must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn initial_delay(&self) -> u64 {
        self.initial_delay
    }

    pub fn period_millis(&self) -> u64 {
        self.time_unit.to_millis(self.period)
    }

    pub fn period_duration(&self) -> Duration {
        self.time_unit.to_duration(self.period)
    }

    pub fn initial_delay_duration(&self) -> Duration {
        self.time_unit.to_duration(self.initial_delay)
    }
}

/// Builder for [`PeriodicNotification`].
#[derive(Debug, Clone)]
pub struct PeriodicNotificationBuilder {
    id: String,
    period: u64,
    time_unit: TimeUnit,
    initial_delay: u64,
}

impl Default for PeriodicNotificationBuilder {
    fn default() -> Self {
        Self {
            id: String::new(),
            period: 0,
            time_unit: TimeUnit::Milliseconds,
            initial_delay: 0,
        }
    }
}

impl PeriodicNotificationBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    pub fn time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn initial_delay(mut self, initial_delay: u64) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn build(self) -> Result<PeriodicNotification, RegistrationError> {
        let notification = PeriodicNotification {
            id: self.id,
            period: self.period,
            time_unit: self.time_unit,
            initial_delay: self.initial_delay,
        };
        notification.validate()?;
        Ok(notification)
    }
}

/// A periodic notification stamped with the moment its timer fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedNotification {
    pub notification: PeriodicNotification,
    /// Fire time in epoch milliseconds.
    pub fired_at: i64,
    /// Bin that had just closed at `fired_at`.
    pub bin: i64,
}

/// Mutation applied to the live schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Add,
    Delete,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Add => f.write_str("ADD"),
            Command::Delete => f.write_str("DELETE"),
        }
    }
}

/// Payload of a command. DELETE only needs the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Basic { id: String },
    Periodic(PeriodicNotification),
}

impl Notification {
    pub fn id(&self) -> &str {
        match self {
            Notification::Basic { id } => id,
            Notification::Periodic(notification) => notification.id(),
        }
    }
}

/// An ADD or DELETE instruction keyed by notification id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandNotification {
    command: Command,
    notification: Notification,
}

impl CommandNotification {
    pub fn new(command: Command, notification: Notification) -> Self {
        Self {
            command,
            notification,
        }
    }

    pub fn add(notification: PeriodicNotification) -> Self {
        Self::new(Command::Add, Notification::Periodic(notification))
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::new(Command::Delete, Notification::Basic { id: id.into() })
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    pub fn id(&self) -> &str {
        self.notification.id()
    }

    /// JSON encoding used on the command transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Codec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }
}

impl fmt::Display for CommandNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command, self.id())
    }
}

/// A query id paired with one of its bins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeBin {
    pub node_id: String,
    pub bin: i64,
}

impl NodeBin {
    pub fn new(node_id: impl Into<String>, bin: i64) -> Self {
        Self {
            node_id: node_id.into(),
            bin,
        }
    }
}
