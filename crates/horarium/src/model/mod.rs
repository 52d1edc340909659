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

//! Domain types for periodic notifications and query results.

pub mod binding;
pub mod notification;

pub use binding::{
    BindingSet, Value, VariableOrder, VisibilityBindingSet, PERIODIC_BIN_ID, XSD_DATE_TIME,
};
pub use notification::{
    Command, CommandNotification, NodeBin, Notification, PeriodicNotification,
    PeriodicNotificationBuilder, TimeUnit, TimestampedNotification,
};
