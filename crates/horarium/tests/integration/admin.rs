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


//! Periodic query administration against a running service.

use horarium::metadata::{InMemoryQueryMetadataDao, QueryMetadataDao};
use horarium::storage::InMemoryPeriodicQueryResultStorage;
use horarium::transport::{command_channel, ChannelResultExporter};
use horarium::{
    AdminError, PeriodicNotificationService, PeriodicQueryAdmin, PeriodicQueryResultStorage,
    PeriodicServiceConfig, ServiceComponents, StorageError,
};
use std::sync::Arc;

use crate::fixtures::{eventually, registration_client};

const QUERY: &str = "prefix function: <http://org.apache.rya/function#> \
    prefix time: <http://www.w3.org/2006/time#> \
    select ?id ?time where { \
    Filter(function:periodic(?time, 2, .5, time:hours)) \
    ?obs <uri:hasTime> ?time. ?obs <uri:hasId> ?id }";

struct Setup {
    service: PeriodicNotificationService,
    admin: PeriodicQueryAdmin,
    storage: Arc<InMemoryPeriodicQueryResultStorage>,
    dao: Arc<InMemoryQueryMetadataDao>,
    _published: tokio::sync::mpsc::UnboundedReceiver<horarium::transport::ExportedResult>,
}

async fn setup() -> Setup {
    let storage = Arc::new(InMemoryPeriodicQueryResultStorage::default());
    let dao = Arc::new(InMemoryQueryMetadataDao::new());
    let (publisher, subscriber) = command_channel();
    let (exporter, published) = ChannelResultExporter::new();
    let service = PeriodicNotificationService::new(
        PeriodicServiceConfig::default(),
        ServiceComponents::new(
            storage.clone(),
            dao.clone(),
            Arc::new(exporter),
            Box::new(subscriber),
        ),
    );
    service.start().await.unwrap();
    let admin = PeriodicQueryAdmin::new(storage.clone(), dao.clone(), registration_client(publisher));
    Setup {
        service,
        admin,
        storage,
        dao,
        _published: published,
    }
}

#[tokio::test]
async fn test_add_schedules_and_lists_query() {
    let setup = setup().await;

    let query_id = setup.admin.add_periodic_query(QUERY).await.unwrap();
    let coordinator = setup.service.coordinator().clone();
    assert!(eventually(|| coordinator.is_scheduled(&query_id)).await);

    let listed = setup.admin.list_periodic_queries().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].query_id, query_id);
    assert_eq!(listed[0].period_ms, 1_800_000);
    assert_eq!(listed[0].window_ms, 7_200_000);
    assert_eq!(listed[0].sparql, QUERY);

    let metadata = setup
        .storage
        .get_periodic_query_metadata(&query_id)
        .await
        .unwrap();
    assert_eq!(
        metadata.variable_order.variables(),
        &["periodicBinId".to_string(), "id".to_string(), "time".to_string()]
    );

    setup.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delete_twice_is_idempotent() {
    let setup = setup().await;

    let query_id = setup.admin.add_periodic_query(QUERY).await.unwrap();
    let coordinator = setup.service.coordinator().clone();
    assert!(eventually(|| coordinator.is_scheduled(&query_id)).await);

    setup.admin.delete_periodic_query(&query_id).await.unwrap();
    assert!(eventually(|| !coordinator.is_scheduled(&query_id)).await);
    assert!(matches!(
        setup.storage.get_periodic_query_metadata(&query_id).await,
        Err(StorageError::QueryNotFound(_))
    ));
    assert!(setup.dao.nodes().await.unwrap().is_empty());
    assert!(setup.admin.list_periodic_queries().await.unwrap().is_empty());

    setup.admin.delete_periodic_query(&query_id).await.unwrap();
    assert!(setup.storage.list_periodic_tables().await.unwrap().is_empty());

    setup.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_without_periodic_filter_is_rejected() {
    let setup = setup().await;

    let err = setup
        .admin
        .add_periodic_query("select ?id where { ?obs <uri:hasId> ?id }")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AdminError::Storage(StorageError::MalformedQuery(_))
    ));
    assert!(setup.storage.list_periodic_tables().await.unwrap().is_empty());
    assert!(setup.dao.nodes().await.unwrap().is_empty());
    assert!(setup.service.coordinator().live_ids().is_empty());

    setup.service.shutdown().await.unwrap();
}
