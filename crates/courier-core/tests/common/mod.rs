// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for courier-core integration tests.
//!
//! [`Harness`] wires a runner to a mock engine, an in-memory input bus `in`
//! and an in-memory output bus `out` that the `activity` consumer listens on.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use courier_core::api::{BusDescriptor, MockUpstreamApi};
use courier_core::bus::{BusError, BusInfo, MemoryMessageBus, MessageBus, MessageBusManager};
use courier_core::config::{InputBusConfig, RunnerConfig};
use courier_core::executor::ServiceExecutor;
use courier_core::message::Message;
use courier_core::meta::{ServiceMeta, ServiceMetaManager};
use courier_core::runner::ServiceRunner;
use courier_core::service::{Service, ServiceError, service_fn};
use courier_core::{ServiceRequestMessage, ServiceResult};

/// `ok({"v": args.x})` for every request.
pub fn echo_service() -> Arc<dyn Service> {
    Arc::new(service_fn(|requests: Vec<ServiceRequestMessage>| async move {
        Ok::<_, ServiceError>(
            requests
                .iter()
                .map(|r| {
                    let x = r.arg("x").cloned().unwrap_or(Value::Null);
                    ServiceResult::ok_with(json!({ "v": x }))
                })
                .collect(),
        )
    }))
}

/// Request from `activity` to `receiver` carrying `{"x": x}`.
pub fn request(receiver: &str, x: i64) -> ServiceRequestMessage {
    ServiceRequestMessage::new("activity", receiver, 0, 1, "d", "run", json!({ "x": x }))
}

/// Bus descriptor as the engine would list it.
pub fn descriptor(name: &str, class: &str) -> BusDescriptor {
    BusDescriptor {
        name: name.to_string(),
        class: class.to_string(),
        alive: true,
        opened: true,
        available: true,
        config: json!({}),
    }
}

/// Runner tuned for fast tests.
pub fn fast_runner_config() -> RunnerConfig {
    RunnerConfig {
        sleep_ms: 10,
        send_response_timeout_ms: 500,
        ..RunnerConfig::default()
    }
}

/// A bus whose writes take `delay` to complete.
pub struct StalledBus {
    info: BusInfo,
    delay: Duration,
}

impl StalledBus {
    pub fn new(name: &str, delay: Duration) -> Self {
        let info = BusInfo::new(name, "memory", json!({}));
        info.set_flags(true, true, true);
        Self { info, delay }
    }
}

#[async_trait]
impl MessageBus for StalledBus {
    fn info(&self) -> &BusInfo {
        &self.info
    }

    async fn write(&self, _messages: &[Message]) -> Result<(), BusError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn read(&self, _max: usize) -> Result<Vec<Message>, BusError> {
        Ok(Vec::new())
    }
}

/// A bus whose writes are answered with HTTP 503.
pub struct FailingBus {
    info: BusInfo,
}

impl FailingBus {
    pub fn new(name: &str) -> Self {
        let info = BusInfo::new(name, "memory", json!({}));
        info.set_flags(true, true, true);
        Self { info }
    }
}

#[async_trait]
impl MessageBus for FailingBus {
    fn info(&self) -> &BusInfo {
        &self.info
    }

    async fn write(&self, _messages: &[Message]) -> Result<(), BusError> {
        Err(BusError::Status {
            bus: self.info.name().to_string(),
            status: 503,
            body: "unavailable".to_string(),
        })
    }

    async fn read(&self, _max: usize) -> Result<Vec<Message>, BusError> {
        Ok(Vec::new())
    }
}

/// Request from `sender` to `receiver` carrying `{"x": x}`.
pub fn request_from(sender: &str, receiver: &str, x: i64) -> ServiceRequestMessage {
    ServiceRequestMessage::new(sender, receiver, 0, 1, "d", "run", json!({ "x": x }))
}

/// Runner plus the collaborators it was built from.
pub struct Harness {
    pub api: MockUpstreamApi,
    pub buses: Arc<MessageBusManager>,
    pub metas: Arc<ServiceMetaManager>,
    pub executor: Arc<ServiceExecutor>,
    pub input: Arc<dyn MessageBus>,
    pub out: Arc<MemoryMessageBus>,
    pub output: Arc<dyn MessageBus>,
    pub runner: Arc<ServiceRunner>,
}

impl Harness {
    /// Harness with `echo` hosted locally and `activity` routed to `out`.
    pub async fn new(config: RunnerConfig) -> Self {
        let out = Arc::new(MemoryMessageBus::named("out"));
        Self::with_output_bus(config, out.clone(), out).await
    }

    /// Like [`Harness::new`] but `activity` is routed to `output`.
    pub async fn with_output_bus(
        config: RunnerConfig,
        output: Arc<dyn MessageBus>,
        out: Arc<MemoryMessageBus>,
    ) -> Self {
        let api = MockUpstreamApi::new();
        let input_config = InputBusConfig {
            name: "in".to_string(),
            class: "memory".to_string(),
            options: Map::new(),
        };

        let buses = Arc::new(MessageBusManager::new(
            Arc::new(api.clone()),
            Some(input_config),
        ));
        let input = buses
            .register_input_message_bus()
            .await
            .unwrap()
            .unwrap();
        buses.insert(output.clone()).await;
        api.set_buses(vec![
            descriptor("in", "memory"),
            descriptor(output.name(), "memory"),
        ])
        .await;

        let metas = Arc::new(ServiceMetaManager::new(Arc::new(api.clone())));
        metas
            .register_local_service(ServiceMeta::new("echo", "in", json!({})), echo_service())
            .await
            .unwrap();
        api.set_services(vec![ServiceMeta::new(
            "activity",
            output.name(),
            json!({}),
        )])
        .await;

        let executor = Arc::new(ServiceExecutor::new(config.executor_workers));
        let runner = Arc::new(ServiceRunner::new(
            config,
            buses.clone(),
            metas.clone(),
            executor.clone(),
        ));

        Self {
            api,
            buses,
            metas,
            executor,
            input,
            out,
            output,
            runner,
        }
    }

    /// Route responses for `receiver` to `bus`, keeping `activity` on the
    /// harness output bus.
    pub async fn route(&self, receiver: &str, bus: Arc<dyn MessageBus>) {
        self.buses.insert(bus.clone()).await;
        self.api
            .set_buses(vec![
                descriptor("in", "memory"),
                descriptor(self.output.name(), "memory"),
                descriptor(bus.name(), "memory"),
            ])
            .await;
        self.api
            .set_services(vec![
                ServiceMeta::new("activity", self.output.name(), json!({})),
                ServiceMeta::new(receiver, bus.name(), json!({})),
            ])
            .await;
        self.metas.refresh_all().await.unwrap();
    }

    /// Push requests onto the input bus.
    pub async fn push(&self, requests: Vec<ServiceRequestMessage>) {
        let messages: Vec<Message> = requests.into_iter().map(Message::from).collect();
        self.input.write(&messages).await.unwrap();
    }

    /// Run iterations until `out` has received `expected` messages.
    pub async fn run_until_delivered(&self, expected: usize) -> Vec<Message> {
        let mut received = Vec::new();
        for _ in 0..200 {
            self.runner.run_once().await.unwrap();
            received.extend(self.out.read(usize::MAX).await.unwrap());
            if received.len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        received
    }
}
