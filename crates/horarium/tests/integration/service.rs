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

//! Service lifecycle.

use horarium::metadata::{InMemoryQueryMetadataDao, QueryMetadataDao, QueryNode};
use horarium::storage::InMemoryPeriodicQueryResultStorage;
use horarium::transport::{command_channel, ChannelResultExporter};
use horarium::{
    CoordinatorState, PeriodicNotificationService, PeriodicServiceConfig, ServiceComponents,
    ServiceError, TransportError,
};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::{event, notification, Harness, EPOCH, QUERY_ID};

async fn register(dao: &InMemoryQueryMetadataDao, query_id: &str, period_ms: i64) {
    dao.put_node(
        &format!("QUERY_{}", query_id),
        QueryNode::Query {
            pcj_id: query_id.to_string(),
        },
    )
    .await
    .unwrap();
    dao.put_node(
        &format!("PERIODIC_QUERY_{}", query_id),
        QueryNode::PeriodicQuery {
            parent: format!("QUERY_{}", query_id),
            period_ms,
            window_ms: 4 * period_ms,
            temporal_variable: "time".to_string(),
        },
    )
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_timers_and_keeps_results() {
    let mut harness = Harness::start(0).await;
    harness.ingest(&event("a", EPOCH - 30_000)).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();
    harness.next_published().await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(harness.storage.row_count(QUERY_ID), 2);

    harness.service.shutdown().await.unwrap();
    let coordinator = harness.service.coordinator();
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    assert!(coordinator.live_ids().is_empty());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(harness.published.try_recv().is_err());
    assert_eq!(harness.storage.row_count(QUERY_ID), 2);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_service_cannot_be_restarted_without_a_subscriber() {
    let harness = Harness::start(0).await;

    assert!(matches!(
        harness.service.start().await,
        Err(ServiceError::AlreadyRunning)
    ));

    harness.service.shutdown().await.unwrap();
    assert!(matches!(
        harness.service.start().await,
        Err(ServiceError::Transport(TransportError::Closed))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_add_keeps_original_schedule() {
    let mut harness = Harness::start(0).await;

    harness
        .client
        .add_notification(notification(QUERY_ID, 0))
        .await
        .unwrap();
    harness
        .client
        .add_notification(notification(QUERY_ID, 7_000))
        .await
        .unwrap();
    harness.next_fire().await;

    let scheduled = harness
        .service
        .coordinator()
        .scheduled_notification(QUERY_ID)
        .unwrap();
    assert_eq!(scheduled.initial_delay(), 0);
    assert_eq!(harness.service.coordinator().live_ids(), vec![QUERY_ID.to_string()]);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_recovery_skips_invalid_stored_schedule() {
    let dao = Arc::new(InMemoryQueryMetadataDao::new());
    register(&dao, "a_bad", 0).await;
    register(&dao, "b_good", 15_000).await;

    let (exporter, _published) = ChannelResultExporter::new();
    let (_publisher, subscriber) = command_channel();
    let service = PeriodicNotificationService::new(
        PeriodicServiceConfig::builder()
            .recovery_stagger(Duration::from_secs(5))
            .build(),
        ServiceComponents::new(
            Arc::new(InMemoryPeriodicQueryResultStorage::default()),
            dao,
            Arc::new(exporter),
            Box::new(subscriber),
        ),
    );

    let report = service.start().await.unwrap();
    assert_eq!(report.scheduled, vec!["b_good".to_string()]);
    let coordinator = service.coordinator();
    assert_eq!(coordinator.state(), CoordinatorState::Running);
    assert_eq!(coordinator.live_ids(), vec!["b_good".to_string()]);
    assert_eq!(
        coordinator
            .scheduled_notification("b_good")
            .map(|n| n.initial_delay()),
        Some(5_000)
    );

    service.shutdown().await.unwrap();
}
