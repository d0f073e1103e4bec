// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in services resolved through the factory registry, the way the
//! container hosts them.

use std::sync::Arc;

use courier_core::{Service, ServiceRequestMessage};
use courier_core::api::MockUpstreamApi;
use courier_core::bus::MessageBusManager;
use courier_core::resource::{GC_SERVICE, ResourceTracer, register_gc};
use courier_core::service::ServiceFactoryRegistry;
use courier_services::{ECHO, TABLE, TEXT, register_builtin};
use serde_json::{Value, json};

async fn registry() -> (ServiceFactoryRegistry, Arc<ResourceTracer>) {
    let tracer = Arc::new(ResourceTracer::new());
    let buses = Arc::new(MessageBusManager::new(Arc::new(MockUpstreamApi::new()), None));
    let mut registry = ServiceFactoryRegistry::new();
    register_builtin(&mut registry, &tracer, buses).await;
    register_gc(&mut registry, tracer.clone());
    (registry, tracer)
}

fn request(service: &str, action: &str, args: Value) -> ServiceRequestMessage {
    ServiceRequestMessage::new("activity", service, 0, 42, "user-1", action, args)
}

#[tokio::test]
async fn test_echo_batch_keeps_order() {
    let (registry, _) = registry().await;
    let echo = registry.create(ECHO).unwrap();

    let results = echo
        .call(&[
            request(ECHO, "echo", json!({"n": 1})),
            request(ECHO, "echo", json!({"n": 2})),
        ])
        .await
        .unwrap();
    assert_eq!(results[0].data, json!({"n": 1}));
    assert_eq!(results[1].data, json!({"n": 2}));
}

#[tokio::test]
async fn test_gc_releases_tmp_text_and_table_on_finish() {
    let (registry, tracer) = registry().await;
    let text = registry.create(TEXT).unwrap();
    let table = registry.create(TABLE).unwrap();
    let gc = registry.create(GC_SERVICE).unwrap();

    let text_ref = json!(["memory_text", "draft", {}, true]);
    let table_ref = json!({"type": "memory_table", "name": "rows", "tmp": true});
    let kept_ref = json!(["memory_table", "kept"]);

    let declared = table
        .call(&[
            request(TABLE, "declare", json!({"table": table_ref, "columns": ["a"]})),
            request(TABLE, "declare", json!({"table": kept_ref, "columns": ["a"]})),
        ])
        .await
        .unwrap();
    assert!(declared.iter().all(|r| r.is_ok()));
    let declared = text
        .call(&[request(TEXT, "declare", json!({"text": text_ref}))])
        .await
        .unwrap();
    assert!(declared[0].is_ok());
    assert_eq!(tracer.traced(42, "user-1").await.len(), 2);

    let results = gc
        .call(&[request(GC_SERVICE, "event", json!({"event": "finished"}))])
        .await
        .unwrap();
    assert!(results[0].is_ok());
    assert!(tracer.traced(42, "user-1").await.is_empty());

    let read = text
        .call(&[request(TEXT, "read", json!({"text": text_ref}))])
        .await
        .unwrap();
    assert_eq!(read[0].error_code, "not_found");

    let lists = table
        .call(&[
            request(TABLE, "to_list", json!({"table": table_ref})),
            request(TABLE, "to_list", json!({"table": kept_ref})),
        ])
        .await
        .unwrap();
    assert_eq!(lists[0].error_code, "not_found");
    assert_eq!(lists[1].data, json!({"list": []}));
}
