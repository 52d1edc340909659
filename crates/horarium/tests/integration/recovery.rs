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


//! Restart recovery against the embedded redb store.

use horarium::metadata::RedbQueryMetadataDao;
use horarium::storage::RedbPeriodicQueryResultStorage;
use horarium::transport::{command_channel, ChannelResultExporter};
use horarium::{
    PeriodicNotificationProvider, PeriodicNotificationService, PeriodicQueryAdmin,
    PeriodicServiceConfig, ServiceComponents, TimeUnit,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::fixtures::{eventually, registration_client};

const QUERY: &str = "prefix function: <http://org.apache.rya/function#> \
    prefix time: <http://www.w3.org/2006/time#> \
    select ?id (count(?obs) as ?total) where { \
    Filter(function:periodic(?time, 1, .25, time:minutes)) \
    ?obs <uri:hasTime> ?time. ?obs <uri:hasId> ?id } group by ?id";

fn open(path: &Path) -> (Arc<RedbPeriodicQueryResultStorage>, Arc<RedbQueryMetadataDao>) {
    let storage = RedbPeriodicQueryResultStorage::open(path, "rya_")
        .expect("Failed to open result store");
    let dao = RedbQueryMetadataDao::new(storage.database()).expect("Failed to open metadata");
    (Arc::new(storage), Arc::new(dao))
}

fn config() -> PeriodicServiceConfig {
    PeriodicServiceConfig::builder()
        .recovery_stagger(Duration::from_secs(5))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
}

#[tokio::test]
async fn test_registered_query_is_rescheduled_after_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("horarium.redb");

    let query_id = {
        let (storage, dao) = open(&path);
        let (publisher, subscriber) = command_channel();
        let (exporter, _published) = ChannelResultExporter::new();
        let service = PeriodicNotificationService::new(
            config(),
            ServiceComponents::new(
                storage.clone(),
                dao.clone(),
                Arc::new(exporter),
                Box::new(subscriber),
            ),
        );
        let report = service.start().await.unwrap();
        assert!(report.scheduled.is_empty());

        let admin = PeriodicQueryAdmin::new(storage, dao, registration_client(publisher));
        let query_id = admin.add_periodic_query(QUERY).await.unwrap();
        let coordinator = service.coordinator().clone();
        assert!(eventually(|| coordinator.is_scheduled(&query_id)).await);

        service.shutdown().await.unwrap();
        query_id
    };

    let (storage, dao) = open(&path);
    let (_publisher, subscriber) = command_channel();
    let (exporter, _published) = ChannelResultExporter::new();
    let service = PeriodicNotificationService::new(
        config(),
        ServiceComponents::new(
            storage.clone(),
            dao.clone(),
            Arc::new(exporter),
            Box::new(subscriber),
        ),
    );

    let report = service.start().await.unwrap();
    assert_eq!(report.scheduled, vec![query_id.clone()]);
    assert!(report.already_scheduled.is_empty());

    let recovered = service
        .coordinator()
        .scheduled_notification(&query_id)
        .expect("query should be scheduled after recovery");
    assert_eq!(recovered.period(), 15_000);
    assert_eq!(recovered.time_unit(), TimeUnit::Milliseconds);
    assert_eq!(recovered.initial_delay(), 5_000);

    let provider = PeriodicNotificationProvider::new(dao, Duration::from_secs(5));
    let again = provider
        .process_registered_notifications(service.coordinator())
        .await
        .unwrap();
    assert!(again.scheduled.is_empty());
    assert_eq!(again.already_scheduled, vec![query_id.clone()]);
    assert_eq!(service.coordinator().live_ids(), vec![query_id]);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recovery_can_be_disabled() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("horarium.redb");

    {
        let (storage, dao) = open(&path);
        let (publisher, _subscriber) = command_channel();
        let admin = PeriodicQueryAdmin::new(storage, dao, registration_client(publisher));
        admin.add_periodic_query(QUERY).await.unwrap();
    }

    let (storage, dao) = open(&path);
    let (_publisher, subscriber) = command_channel();
    let (exporter, _published) = ChannelResultExporter::new();
    let service = PeriodicNotificationService::new(
        PeriodicServiceConfig::builder().enable_recovery(false).build(),
        ServiceComponents::new(storage, dao, Arc::new(exporter), Box::new(subscriber)),
    );

    let report = service.start().await.unwrap();
    assert!(report.scheduled.is_empty());
    assert!(service.coordinator().live_ids().is_empty());
    service.shutdown().await.unwrap();
}
