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

//! Coordinator that turns registered periodic notifications into live timers.
//!
//! Each registered notification owns one tokio task. On every tick the task
//! works out which bin has just closed, then publishes and clears it through
//! the [`BinPublisher`]. Every older bin still holding rows is published in
//! the same tick, which covers late rows written into a bin after its own
//! publication and rows left behind by an earlier run. Bins whose publication
//! fails stay pending and are retried, oldest first, on the next tick.
//!
//! The live timer map is guarded by a mutex that is only held for map
//! operations and task spawning. No storage or transport I/O happens under it.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::binning::left_bin_edge;
use crate::clock::Clock;
use crate::error::{PublishError, RegistrationError, StorageError};
use crate::model::{Command, CommandNotification, Notification, PeriodicNotification, TimestampedNotification};

pub mod consumer;
pub mod publisher;

pub use consumer::spawn_command_consumer;
pub use publisher::BinPublisher;

/// Tuning knobs for [`NotificationCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long `stop()` waits for in-flight fires before aborting them.
    pub shutdown_timeout: Duration,
    /// Whether every fire also publishes stored bins older than the current one.
    pub sweep_stale_bins: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            sweep_stale_bins: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Stopped,
    Running,
}

struct ScheduledTimer {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
    notification: PeriodicNotification,
}

/// Everything a timer task needs, shared across all timers.
#[derive(Clone)]
struct FireContext {
    publisher: Arc<BinPublisher>,
    clock: Arc<dyn Clock>,
    observer: Option<mpsc::UnboundedSender<TimestampedNotification>>,
    sweep_stale_bins: bool,
}

/// Owns the set of live periodic timers.
pub struct NotificationCoordinator {
    config: CoordinatorConfig,
    context: FireContext,
    state: RwLock<CoordinatorState>,
    timers: Mutex<HashMap<String, ScheduledTimer>>,
}

impl std::fmt::Debug for NotificationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live_timers = self.timers.lock().len();
        let state = self.state();
        f.debug_struct("NotificationCoordinator")
            .field("config", &self.config)
            .field("state", &state)
            .field("live_timers", &live_timers)
            .finish()
    }
}

impl NotificationCoordinator {
    pub fn new(config: CoordinatorConfig, publisher: Arc<BinPublisher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            context: FireContext {
                publisher,
                clock,
                observer: None,
                sweep_stale_bins: config.sweep_stale_bins,
            },
            config,
            state: RwLock::new(CoordinatorState::Stopped),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Emits a [`TimestampedNotification`] to `observer` on every fire.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<TimestampedNotification>) -> Self {
        self.context.observer = Some(observer);
        self
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Starts accepting commands. Calling it while running is a no-op.
    pub fn start(&self) {
        let mut state = self.state.write();
        if *state == CoordinatorState::Running {
            debug!("Notification coordinator already running");
            return;
        }
        *state = CoordinatorState::Running;
        info!("Notification coordinator started");
    }

    /// Applies one ADD or DELETE command.
    ///
    /// ADD fails if the notification is malformed, if a timer with the same id
    /// is already live, or if the coordinator is stopped. DELETE of an unknown
    /// id is logged and ignored.
    pub fn process_next_command_notification(
        &self,
        command: CommandNotification,
    ) -> Result<(), RegistrationError> {
        debug!(command = %command, "Processing command notification");
        match (command.command(), command.notification()) {
            (Command::Add, Notification::Periodic(notification)) => {
                self.add_notification(notification.clone())
            }
            (Command::Add, Notification::Basic { id }) => Err(RegistrationError::Malformed {
                id: id.clone(),
                reason: "ADD requires a periodic notification".to_string(),
            }),
            (Command::Delete, notification) => {
                let mut timers = self.timers.lock();
                self.ensure_running()?;
                self.cancel_locked(&mut timers, notification.id());
                Ok(())
            }
        }
    }

    fn ensure_running(&self) -> Result<(), RegistrationError> {
        match *self.state.read() {
            CoordinatorState::Running => Ok(()),
            CoordinatorState::Stopped => Err(RegistrationError::NotRunning),
        }
    }

    fn add_notification(&self, notification: PeriodicNotification) -> Result<(), RegistrationError> {
        notification.validate()?;

        let mut timers = self.timers.lock();
        self.ensure_running()?;
        if timers.contains_key(notification.id()) {
            warn!(notification_id = %notification.id(), "Rejecting duplicate registration");
            return Err(RegistrationError::Duplicate(notification.id().to_string()));
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(
            self.context.clone(),
            notification.clone(),
            cancel_rx,
        ));
        info!(
            notification_id = %notification.id(),
            period_ms = notification.period_millis(),
            initial_delay = notification.initial_delay(),
            time_unit = %notification.time_unit(),
            "Scheduled periodic notification"
        );
        timers.insert(
            notification.id().to_string(),
            ScheduledTimer {
                cancel,
                handle,
                notification,
            },
        );
        metrics::gauge!("horarium_live_timers").set(timers.len() as f64);
        Ok(())
    }

    fn cancel_locked(&self, timers: &mut HashMap<String, ScheduledTimer>, id: &str) {
        match timers.remove(id) {
            Some(timer) => {
                let _ = timer.cancel.send(true);
                metrics::gauge!("horarium_live_timers").set(timers.len() as f64);
                info!(notification_id = %id, "Cancelled periodic notification");
            }
            None => {
                debug!(notification_id = %id, "Ignoring DELETE for unknown notification");
            }
        }
    }

    /// Cancels every timer and waits up to the shutdown timeout for in-flight
    /// fires to finish. Remaining tasks are aborted.
    pub async fn stop(&self) {
        *self.state.write() = CoordinatorState::Stopped;
        let drained: Vec<(String, ScheduledTimer)> = self.timers.lock().drain().collect();
        metrics::gauge!("horarium_live_timers").set(0.0);

        if drained.is_empty() {
            info!("Notification coordinator stopped");
            return;
        }

        let mut handles = Vec::with_capacity(drained.len());
        for (_, timer) in drained {
            let _ = timer.cancel.send(true);
            handles.push(timer.handle);
        }
        let count = handles.len();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let wait = futures::future::join_all(handles);
        if tokio::time::timeout(self.config.shutdown_timeout, wait)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Timed out waiting for periodic timers, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!(timers = count, "Notification coordinator stopped");
    }

    /// Ids of all live timers, sorted.
    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.timers.lock().contains_key(id)
    }

    /// Schedule of a live timer.
    pub fn scheduled_notification(&self, id: &str) -> Option<PeriodicNotification> {
        self.timers
            .lock()
            .get(id)
            .map(|timer| timer.notification.clone())
    }
}

async fn run_timer(
    context: FireContext,
    notification: PeriodicNotification,
    mut cancel: watch::Receiver<bool>,
) {
    let start = Instant::now() + notification.initial_delay_duration();
    let mut ticker = interval_at(start, notification.period_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending = BTreeSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }
        context.fire(&notification, &mut pending).await;
    }
    debug!(notification_id = %notification.id(), "Periodic timer exited");
}

impl FireContext {
    async fn fire(&self, notification: &PeriodicNotification, pending: &mut BTreeSet<i64>) {
        let query_id = notification.id();
        let period_ms = i64::try_from(notification.period_millis()).unwrap_or(i64::MAX);
        let fired_at = self.clock.now_millis();
        let bin = left_bin_edge(fired_at, period_ms);

        metrics::counter!("horarium_fires_total").increment(1);
        if let Some(observer) = &self.observer {
            let _ = observer.send(TimestampedNotification {
                notification: notification.clone(),
                fired_at,
                bin,
            });
        }

        if self.sweep_stale_bins {
            match self.publisher.stale_bins(query_id, bin).await {
                Ok(stale) => {
                    let queued = stale.iter().filter(|bin| !pending.contains(*bin)).count();
                    if queued > 0 {
                        info!(query_id = %query_id, bins = queued, "Queued unpublished older bins");
                    }
                    pending.extend(stale);
                }
                Err(StorageError::QueryNotFound(_)) => {}
                Err(e) => {
                    warn!(query_id = %query_id, error = %e, "Failed to scan for unpublished bins");
                }
            }
        }

        pending.insert(bin);
        while let Some(next) = pending.first().copied() {
            match self.publisher.publish_bin(query_id, next).await {
                Ok(rows) => {
                    pending.remove(&next);
                    metrics::counter!("horarium_rows_published_total").increment(rows as u64);
                }
                Err(PublishError::Storage(StorageError::QueryNotFound(_))) => {
                    warn!(query_id = %query_id, "No result storage for periodic query, dropping pending bins");
                    metrics::counter!("horarium_fire_failures_total").increment(1);
                    pending.clear();
                }
                Err(e) => {
                    error!(query_id = %query_id, bin = next, error = %e, "Failed to publish periodic bin, will retry");
                    metrics::counter!("horarium_fire_failures_total").increment(1);
                    break;
                }
            }
        }
    }
}
