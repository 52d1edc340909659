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

//! Bin arithmetic.
//!
//! A bin is identified by the epoch-millisecond timestamp at which it closes.
//! Bin ids are always multiples of the period. An event at `t` belongs to the
//! bin whose edge is `ceil(t / period) * period`, so an event exactly on an
//! edge belongs to that edge's bin (intervals are `(edge - period, edge]`).
//! When the window is longer than the period an event lands in several
//! consecutive bins.
//!
//! Windows close relative to wall-clock time, not event time:
//!
//! - An event whose edge is at or before the most recently closed boundary is
//!   on time or late. It is assigned to the bins that are still open and that
//!   its window overlaps, starting at that boundary.
//! - An event whose edge is still in the future is early. It seeds every bin it
//!   will eventually belong to, `window / period` of them starting at its edge.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::clock::Clock;
use crate::model::BindingSet;

/// First period boundary at or after `t`.
pub fn right_bin_edge(t: i64, period: i64) -> i64 {
    let floor = t.div_euclid(period);
    let ceil = if t.rem_euclid(period) == 0 {
        floor
    } else {
        floor + 1
    };
    ceil.saturating_mul(period)
}

/// Most recent period boundary at or before `now`.
pub fn left_bin_edge(now: i64, period: i64) -> i64 {
    now.div_euclid(period).saturating_mul(period)
}

/// Bins an event at `event_time` belongs to, given the wall-clock time `now`.
///
/// All arguments are in milliseconds. A non-positive window or period, or a
/// late event whose whole window has already closed, yields an empty set.
pub fn bins_for(event_time: i64, window: i64, period: i64, now: i64) -> BTreeSet<i64> {
    if window <= 0 || period <= 0 {
        return BTreeSet::new();
    }

    let right = right_bin_edge(event_time, period);
    let left = left_bin_edge(now, period);

    let (start, count) = if left >= right {
        let elapsed = left.saturating_sub(right);
        (left, window.saturating_sub(elapsed) / period)
    } else {
        (right, window / period)
    };

    (0..count.max(0))
        .map(|i| start.saturating_add(i.saturating_mul(period)))
        .collect()
}

/// Bin calculator bound to a clock.
#[derive(Clone)]
pub struct BinCalculator {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for BinCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinCalculator")
            .field("clock", &self.clock)
            .finish()
    }
}

impl BinCalculator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Bins for an event at `event_time`, relative to the current clock time.
    pub fn bins_for(&self, event_time: i64, window: i64, period: i64) -> BTreeSet<i64> {
        bins_for(event_time, window, period, self.clock.now_millis())
    }

    /// Bins for the timestamp bound to `temporal_variable` in `binding_set`.
    ///
    /// A missing or non-temporal value excludes the row from windowing and
    /// returns an empty set.
    pub fn bins_for_binding_set(
        &self,
        binding_set: &BindingSet,
        temporal_variable: &str,
        window: i64,
        period: i64,
    ) -> BTreeSet<i64> {
        match binding_set
            .get(temporal_variable)
            .and_then(|value| value.epoch_millis())
        {
            Some(event_time) => self.bins_for(event_time, window, period),
            None => {
                trace!(
                    temporal_variable = %temporal_variable,
                    binding_set = %binding_set,
                    "Unable to extract event time, skipping binning"
                );
                BTreeSet::new()
            }
        }
    }

    /// The bin that most recently closed.
    pub fn current_bin(&self, period: i64) -> i64 {
        left_bin_edge(self.clock.now_millis(), period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Value, XSD_DATE_TIME};

    const PERIOD: i64 = 15_000;
    const WINDOW: i64 = 60_000;

    #[test]
    fn test_edges() {
        assert_eq!(right_bin_edge(1, PERIOD), PERIOD);
        assert_eq!(right_bin_edge(PERIOD, PERIOD), PERIOD);
        assert_eq!(right_bin_edge(PERIOD + 1, PERIOD), 2 * PERIOD);
        assert_eq!(right_bin_edge(-1, PERIOD), 0);
        assert_eq!(right_bin_edge(-PERIOD - 1, PERIOD), -PERIOD);

        assert_eq!(left_bin_edge(PERIOD - 1, PERIOD), 0);
        assert_eq!(left_bin_edge(PERIOD, PERIOD), PERIOD);
        assert_eq!(left_bin_edge(-1, PERIOD), -PERIOD);
    }

    #[test]
    fn test_late_events_fill_remaining_open_bins() {
        let now = 100 * PERIOD + 100;
        let left = 100 * PERIOD;

        let bins = bins_for(now - 30_000, WINDOW, PERIOD, now);
        assert_eq!(bins.into_iter().collect::<Vec<_>>(), vec![left, left + PERIOD, left + 2 * PERIOD]);

        let bins = bins_for(now - 45_000, WINDOW, PERIOD, now);
        assert_eq!(bins.into_iter().collect::<Vec<_>>(), vec![left, left + PERIOD]);

        let bins = bins_for(now - 60_000, WINDOW, PERIOD, now);
        assert_eq!(bins.into_iter().collect::<Vec<_>>(), vec![left]);
    }

    #[test]
    fn test_event_in_current_bin_gets_full_window() {
        let left = 100 * PERIOD;
        let now = left + 100;
        let bins = bins_for(left, WINDOW, PERIOD, now);
        assert_eq!(bins.len() as i64, WINDOW / PERIOD);
        assert_eq!(bins.iter().next(), Some(&left));
    }

    #[test]
    fn test_early_event_seeds_all_future_bins() {
        let now = 100 * PERIOD + 100;
        let event = now + 10 * PERIOD;
        let bins = bins_for(event, WINDOW, PERIOD, now);

        let edge = right_bin_edge(event, PERIOD);
        let expected: BTreeSet<i64> = (0..4).map(|i| edge + i * PERIOD).collect();
        assert_eq!(bins, expected);
    }

    #[test]
    fn test_event_just_after_boundary_is_early() {
        let left = 100 * PERIOD;
        let now = left + 100;
        let bins = bins_for(left + 1, WINDOW, PERIOD, now);
        assert_eq!(bins.len(), 4);
        assert_eq!(bins.iter().next(), Some(&(left + PERIOD)));
    }

    #[test]
    fn test_bins_are_period_multiples_and_not_before_event() {
        let now = 7_777_777;
        for event in (now - 120_000..now + 120_000).step_by(997) {
            for bin in bins_for(event, WINDOW, PERIOD, now) {
                assert_eq!(bin % PERIOD, 0);
                assert!(bin >= right_bin_edge(event, PERIOD));
            }
        }
    }

    #[test]
    fn test_expired_and_degenerate_inputs() {
        let now = 100 * PERIOD;
        assert!(bins_for(now - 10 * WINDOW, WINDOW, PERIOD, now).is_empty());
        assert!(bins_for(now, 0, PERIOD, now).is_empty());
        assert!(bins_for(now, WINDOW, 0, now).is_empty());
        assert!(bins_for(now, WINDOW, -PERIOD, now).is_empty());
    }

    #[test]
    fn test_calculator_uses_binding_set_time() {
        let clock = Arc::new(ManualClock::new(1_709_251_215_100));
        let calculator = BinCalculator::new(clock);

        let bs = BindingSet::new().with(
            "time",
            Value::typed_literal("2024-03-01T00:00:15Z", XSD_DATE_TIME),
        );
        let bins = calculator.bins_for_binding_set(&bs, "time", WINDOW, PERIOD);
        assert_eq!(bins.len(), 4);
        assert_eq!(calculator.current_bin(PERIOD), 1_709_251_215_000);
    }

    #[test]
    fn test_calculator_skips_non_temporal_values() {
        let calculator = BinCalculator::new(Arc::new(ManualClock::new(0)));
        let bs = BindingSet::new().with("time", Value::literal("not a time"));
        assert!(calculator
            .bins_for_binding_set(&bs, "time", WINDOW, PERIOD)
            .is_empty());
        assert!(calculator
            .bins_for_binding_set(&BindingSet::new(), "time", WINDOW, PERIOD)
            .is_empty());
    }
}
