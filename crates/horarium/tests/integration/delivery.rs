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

//! End-to-end windowed delivery on a paused clock.

use horarium::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::fixtures::{
    event, eventually, notification, GatedExporter, Harness, EPOCH, FIRST_BIN, PERIOD_MS,
    QUERY_ID,
};

#[tokio::test(start_paused = true)]
async fn test_late_events_are_published_once_per_bin() {
    let mut harness = Harness::start(0).await;

    assert_eq!(harness.ingest(&event("a", EPOCH - 30_000)).await, 3);
    assert_eq!(harness.ingest(&event("b", EPOCH - 45_000)).await, 2);
    assert_eq!(harness.ingest(&event("c", EPOCH - 60_000)).await, 1);

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();

    let mut per_bin: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
    for _ in 0..6 {
        let row = harness.next_published().await;
        assert_eq!(row.query_id, QUERY_ID);
        assert_eq!(row.binding_set.bin_id(), Some(row.bin));
        let id = row.binding_set.get("id").cloned().unwrap();
        per_bin.entry(row.bin).or_default().push(id);
    }

    let a = Value::literal("a");
    let b = Value::literal("b");
    let c = Value::literal("c");
    let expected: BTreeMap<i64, Vec<Value>> = [
        (FIRST_BIN, vec![a.clone(), b.clone(), c]),
        (FIRST_BIN + PERIOD_MS, vec![a.clone(), b]),
        (FIRST_BIN + 2 * PERIOD_MS, vec![a]),
    ]
    .into_iter()
    .collect();
    assert_eq!(per_bin, expected);

    let mut fired_bins = Vec::new();
    for _ in 0..4 {
        fired_bins.push(harness.next_fire().await.bin);
    }
    assert_eq!(
        fired_bins,
        vec![
            FIRST_BIN,
            FIRST_BIN + PERIOD_MS,
            FIRST_BIN + 2 * PERIOD_MS,
            FIRST_BIN + 3 * PERIOD_MS,
        ]
    );

    // The fourth bin is empty, so nothing more is exported.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(harness.published.try_recv().is_err());
    assert_eq!(harness.storage.row_count(QUERY_ID), 0);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_early_event_spans_full_window() {
    let mut harness = Harness::start(0).await;

    assert_eq!(harness.ingest(&event("early", EPOCH + 20_000)).await, 4);
    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();

    let mut bins = Vec::new();
    for _ in 0..4 {
        let row = harness.next_published().await;
        assert_eq!(row.binding_set.get("id"), Some(&Value::literal("early")));
        bins.push(row.bin);
    }
    assert_eq!(
        bins,
        (2..6).map(|i| FIRST_BIN + i * PERIOD_MS).collect::<Vec<_>>()
    );

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_add_then_delete_publishes_nothing() {
    let mut harness = Harness::start(0).await;
    harness.ingest(&event("a", EPOCH - 30_000)).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 1_000))
        .await
        .unwrap();
    harness.client.delete_notification(QUERY_ID).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(harness.fires.try_recv().is_err());
    assert!(harness.published.try_recv().is_err());
    assert_eq!(harness.storage.row_count(QUERY_ID), 3);
    assert!(!harness.service.coordinator().is_scheduled(QUERY_ID));

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_export_is_retried_on_next_tick() {
    let started = Instant::now();
    let mut harness = Harness::start(1).await;
    harness.ingest(&event("a", EPOCH - 30_000)).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();

    let first = harness.next_published().await;
    assert_eq!(first.bin, FIRST_BIN);
    assert!(started.elapsed() >= Duration::from_millis(PERIOD_MS as u64));
    assert_eq!(harness.next_published().await.bin, FIRST_BIN + PERIOD_MS);
    assert_eq!(harness.next_published().await.bin, FIRST_BIN + 2 * PERIOD_MS);

    assert_eq!(harness.next_fire().await.bin, FIRST_BIN);
    assert_eq!(harness.next_fire().await.bin, FIRST_BIN + PERIOD_MS);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_bins_from_earlier_run_are_published_first() {
    let mut harness = Harness::start(0).await;
    let stale_bin = FIRST_BIN - 2 * PERIOD_MS;
    harness.store_in_bin("stale", EPOCH - 90_000, stale_bin).await;
    harness.ingest(&event("fresh", EPOCH - 60_000)).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();

    let first = harness.next_published().await;
    assert_eq!(first.bin, stale_bin);
    assert_eq!(first.binding_set.get("id"), Some(&Value::literal("stale")));
    let second = harness.next_published().await;
    assert_eq!(second.bin, FIRST_BIN);
    assert_eq!(second.binding_set.get("id"), Some(&Value::literal("fresh")));

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_event_after_fire_reaches_published_bin() {
    let mut harness = Harness::start(0).await;
    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();
    assert_eq!(harness.next_fire().await.bin, FIRST_BIN);

    // Still inside FIRST_BIN's period, after it was published empty.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.ingest(&event("late", EPOCH - 30_000)).await, 3);

    let mut bins = Vec::new();
    for _ in 0..3 {
        let row = harness.next_published().await;
        assert_eq!(row.binding_set.get("id"), Some(&Value::literal("late")));
        bins.push(row.bin);
    }
    assert_eq!(
        bins,
        vec![FIRST_BIN, FIRST_BIN + PERIOD_MS, FIRST_BIN + 2 * PERIOD_MS]
    );

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(harness.storage.row_count(QUERY_ID), 0);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_row_stored_during_export_is_published_later() {
    let (exporter, mut gate, published) = GatedExporter::new();
    let mut harness = Harness::start_with(Arc::new(exporter), published).await;
    harness.ingest(&event("a", EPOCH - 30_000)).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();
    assert_eq!(gate.entered().await, FIRST_BIN);
    harness.store_in_bin("b", EPOCH - 5_000, FIRST_BIN).await;
    gate.release(10);

    let expected = [
        (FIRST_BIN, "a"),
        (FIRST_BIN, "b"),
        (FIRST_BIN + PERIOD_MS, "a"),
        (FIRST_BIN + 2 * PERIOD_MS, "a"),
    ];
    for (bin, id) in expected {
        let row = harness.next_published().await;
        assert_eq!(row.bin, bin);
        assert_eq!(row.binding_set.get("id"), Some(&Value::literal(id)));
    }

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(harness.storage.row_count(QUERY_ID), 0);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_fire_finishes_fire_then_stops() {
    let (exporter, mut gate, published) = GatedExporter::new();
    let mut harness = Harness::start_with(Arc::new(exporter), published).await;
    harness.ingest(&event("a", EPOCH - 30_000)).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();
    assert_eq!(gate.entered().await, FIRST_BIN);

    harness.client.delete_notification(QUERY_ID).await.unwrap();
    let coordinator = harness.service.coordinator().clone();
    assert!(eventually(|| !coordinator.is_scheduled(QUERY_ID)).await);
    gate.release(10);

    let row = harness.next_published().await;
    assert_eq!(row.bin, FIRST_BIN);
    assert_eq!(row.binding_set.get("id"), Some(&Value::literal("a")));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(harness.published.try_recv().is_err());
    assert_eq!(harness.next_fire().await.bin, FIRST_BIN);
    assert!(harness.fires.try_recv().is_err());
    assert_eq!(harness.storage.row_count(QUERY_ID), 2);

    harness.service.shutdown().await.unwrap();
}
