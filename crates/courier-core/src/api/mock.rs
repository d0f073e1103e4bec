// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory upstream API for tests and embedded use.
//!
//! Behaves like a minimal engine: registering a bus lists it as closed,
//! opening it flips it to opened/available, and registering a service adds
//! it to the service list.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{ALREADY_OPENED, ApiError, BusDescriptor, UpstreamApi};
use crate::meta::ServiceMeta;

#[derive(Debug, Default)]
struct MockState {
    buses: Vec<BusDescriptor>,
    services: Vec<ServiceMeta>,
    registered_buses: Vec<Value>,
    registered_services: Vec<ServiceMeta>,
    fail_register: bool,
    fail_refresh: bool,
    bus_refreshes: usize,
    service_refreshes: usize,
}

/// Mock upstream engine.
#[derive(Debug, Clone, Default)]
pub struct MockUpstreamApi {
    state: Arc<Mutex<MockState>>,
}

fn rejected(operation: &'static str, error_code: &str) -> ApiError {
    ApiError::Rejected {
        operation,
        status: "fail".to_string(),
        error_code: error_code.to_string(),
        message: String::new(),
    }
}

impl MockUpstreamApi {
    /// Create an empty mock engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bus list returned by refreshes.
    pub async fn set_buses(&self, buses: Vec<BusDescriptor>) {
        self.state.lock().await.buses = buses;
    }

    /// Replace the service list returned by refreshes.
    pub async fn set_services(&self, services: Vec<ServiceMeta>) {
        self.state.lock().await.services = services;
    }

    /// Make registrations fail with `register_error`.
    pub async fn set_fail_register(&self, fail: bool) {
        self.state.lock().await.fail_register = fail;
    }

    /// Make list calls fail with `refresh_error`.
    pub async fn set_fail_refresh(&self, fail: bool) {
        self.state.lock().await.fail_refresh = fail;
    }

    /// Bus configs passed to `register_message_bus`.
    pub async fn registered_buses(&self) -> Vec<Value> {
        self.state.lock().await.registered_buses.clone()
    }

    /// Metas passed to `register_service_meta`.
    pub async fn registered_services(&self) -> Vec<ServiceMeta> {
        self.state.lock().await.registered_services.clone()
    }

    /// Number of successful `(bus, service)` list calls.
    pub async fn refresh_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.bus_refreshes, state.service_refreshes)
    }
}

#[async_trait]
impl UpstreamApi for MockUpstreamApi {
    async fn register_message_bus(&self, config: &Value) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        if state.fail_register {
            return Err(rejected("register_message_bus", "register_error"));
        }
        state.registered_buses.push(config.clone());

        let name = config
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let class = config
            .get("class")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !state.buses.iter().any(|b| b.name == name) {
            state.buses.push(BusDescriptor {
                name,
                class,
                alive: true,
                opened: false,
                available: false,
                config: config.clone(),
            });
        }
        Ok(())
    }

    async fn open_message_bus(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let Some(bus) = state.buses.iter_mut().find(|b| b.name == name) else {
            return Err(rejected("open_message_bus", "not_found"));
        };
        if bus.opened {
            return Err(rejected("open_message_bus", ALREADY_OPENED));
        }
        bus.opened = true;
        bus.available = bus.alive;
        Ok(())
    }

    async fn all_message_buses(&self) -> Result<Vec<BusDescriptor>, ApiError> {
        let mut state = self.state.lock().await;
        if state.fail_refresh {
            return Err(rejected("all_message_buses", "refresh_error"));
        }
        state.bus_refreshes += 1;
        Ok(state.buses.clone())
    }

    async fn register_service_meta(&self, meta: &ServiceMeta) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        if state.fail_register {
            return Err(rejected("register_service_meta", "register_error"));
        }
        state.registered_services.push(meta.clone());
        state.services.retain(|s| s.name != meta.name);
        state.services.push(meta.clone());
        Ok(())
    }

    async fn all_service_metas(&self) -> Result<Vec<ServiceMeta>, ApiError> {
        let mut state = self.state.lock().await;
        if state.fail_refresh {
            return Err(rejected("all_service_metas", "refresh_error"));
        }
        state.service_refreshes += 1;
        Ok(state.services.clone())
    }
}
