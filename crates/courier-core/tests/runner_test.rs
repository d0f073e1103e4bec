// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service runner iteration tests against a mock engine and memory buses.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{FailingBus, Harness, StalledBus, fast_runner_config, request, request_from};
use courier_core::bus::{MemoryMessageBus, MessageBus};
use courier_core::config::RunnerConfig;
use courier_core::message::{Message, RawMessage};
use courier_core::result::ResultStatus;
use courier_core::runner::DeliveryReport;

fn response(message: &Message) -> &courier_core::ServiceResponseMessage {
    match message {
        Message::Response(r) => r,
        other => panic!("expected response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_round_trip_through_runner() {
    let harness = Harness::new(fast_runner_config()).await;
    harness.push(vec![request("echo", 5)]).await;

    let delivered = harness.run_until_delivered(1).await;
    assert_eq!(delivered.len(), 1);

    let response = response(&delivered[0]);
    assert_eq!(response.status(), ResultStatus::Ok);
    assert_eq!(response.result().data, json!({"v": 5}));
    assert_eq!(response.receiver(), "activity");
    assert_eq!(response.activity_id(), 1);
    assert_eq!(response.domain_id(), "d");
}

#[tokio::test]
async fn test_ignored_requests_produce_no_response() {
    let harness = Harness::new(fast_runner_config()).await;
    harness
        .push(vec![
            request("echo", 1).with_ignore_result(true),
            request("echo", 2),
            request("echo", 3).with_ignore_result(true),
        ])
        .await;

    let delivered = harness.run_until_delivered(1).await;
    harness.executor.close().await;
    harness.runner.handle_responses().await;
    let late = harness.out.read(usize::MAX).await.unwrap();

    assert_eq!(delivered.len() + late.len(), 1);
    assert_eq!(response(&delivered[0]).result().data, json!({"v": 2}));
}

#[tokio::test]
async fn test_fetch_limit_is_respected() {
    let config = RunnerConfig {
        fetch_requests_num: 2,
        ..fast_runner_config()
    };
    let harness = Harness::new(config).await;
    harness
        .push((0..5).map(|i| request("echo", i)).collect())
        .await;

    assert_eq!(harness.runner.handle_requests().await.unwrap(), 2);
    assert_eq!(harness.runner.handle_requests().await.unwrap(), 2);
    assert_eq!(harness.runner.handle_requests().await.unwrap(), 1);
    assert_eq!(harness.runner.handle_requests().await.unwrap(), 0);
}

#[tokio::test]
async fn test_requests_for_unknown_service_are_dropped() {
    let harness = Harness::new(fast_runner_config()).await;
    harness
        .push(vec![request("nope", 1), request("echo", 2)])
        .await;

    assert_eq!(harness.runner.handle_requests().await.unwrap(), 1);
}

#[tokio::test]
async fn test_non_request_messages_are_skipped() {
    let harness = Harness::new(fast_runner_config()).await;
    let event = Message::Other(RawMessage::new("evt", "x", "echo", Default::default(), 0));
    harness.input.write(&[event]).await.unwrap();
    harness.push(vec![request("echo", 1)]).await;

    assert_eq!(harness.runner.handle_requests().await.unwrap(), 1);
}

#[tokio::test]
async fn test_only_refresh_never_dispatches() {
    let config = RunnerConfig {
        only_refresh: true,
        ..fast_runner_config()
    };
    let harness = Harness::new(config).await;
    harness.push(vec![request("echo", 1)]).await;

    harness.runner.run_once().await.unwrap();
    harness.runner.run_once().await.unwrap();

    assert_eq!(harness.api.refresh_counts().await, (2, 2));
    assert_eq!(harness.input.read(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_refresh_failure_aborts_iteration() {
    let harness = Harness::new(fast_runner_config()).await;
    harness.push(vec![request("echo", 1)]).await;
    harness.api.set_fail_refresh(true).await;

    assert!(harness.runner.run_once().await.is_err());
    // Nothing was fetched.
    assert_eq!(harness.input.read(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delivery_timeout_drops_responses() {
    let config = RunnerConfig {
        send_response_timeout_ms: 50,
        ..fast_runner_config()
    };
    let stalled = Arc::new(StalledBus::new("slow", Duration::from_secs(5)));
    let out = Arc::new(MemoryMessageBus::named("unused"));
    let harness = Harness::with_output_bus(config, stalled, out).await;

    harness.push(vec![request("echo", 1), request("echo", 2)]).await;
    harness.runner.handle_requests().await.unwrap();
    harness.executor.close().await;

    let report = harness.runner.handle_responses().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.dropped, 2);

    // Timed-out responses are not re-buffered.
    let next = harness.runner.handle_responses().await;
    assert_eq!(next.delivered + next.dropped, 0);
}

#[tokio::test]
async fn test_delivery_timeout_does_not_block_intake() {
    let config = RunnerConfig {
        send_response_timeout_ms: 50,
        ..fast_runner_config()
    };
    let stalled = Arc::new(StalledBus::new("slow", Duration::from_secs(5)));
    let out = Arc::new(MemoryMessageBus::named("unused"));
    let harness = Harness::with_output_bus(config, stalled, out).await;

    harness.push(vec![request("echo", 1)]).await;
    harness.runner.handle_requests().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.push(vec![request("echo", 2)]).await;
    let started = std::time::Instant::now();
    harness.runner.run_once().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(harness.input.read(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_write_drops_only_its_group() {
    let harness = Harness::new(fast_runner_config()).await;
    harness.route("watcher", Arc::new(FailingBus::new("broken"))).await;

    harness
        .push(vec![request("echo", 1), request_from("watcher", "echo", 2)])
        .await;
    assert_eq!(harness.runner.handle_requests().await.unwrap(), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = harness.runner.handle_responses().await;
    assert_eq!(
        report,
        DeliveryReport {
            delivered: 1,
            dropped: 1,
            failed: 1,
        }
    );

    let delivered = harness.out.read(usize::MAX).await.unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(response(&delivered[0]).result().data, json!({"v": 1}));

    // Failed responses are not re-buffered.
    let next = harness.runner.handle_responses().await;
    assert_eq!(next, DeliveryReport::default());
}

#[tokio::test]
async fn test_failed_write_does_not_block_intake() {
    let harness = Harness::new(fast_runner_config()).await;
    harness.route("watcher", Arc::new(FailingBus::new("broken"))).await;

    harness
        .push(vec![request("echo", 1), request_from("watcher", "echo", 2)])
        .await;
    harness.runner.handle_requests().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.push(vec![request("echo", 3)]).await;
    harness.runner.run_once().await.unwrap();

    // The healthy bus got its response and the pending request was read.
    let delivered = harness.out.read(usize::MAX).await.unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(response(&delivered[0]).result().data, json!({"v": 1}));
    assert!(harness.input.read(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_loop_stops_on_close() {
    let harness = Harness::new(fast_runner_config()).await;
    let runner = harness.runner.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    harness.push(vec![request("echo", 7)]).await;
    let mut delivered = Vec::new();
    for _ in 0..200 {
        delivered.extend(harness.out.read(usize::MAX).await.unwrap());
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered.len(), 1);

    harness.runner.close();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(harness.executor.is_closed());
}
