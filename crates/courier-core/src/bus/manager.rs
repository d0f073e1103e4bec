// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry of every message bus the container knows about.
//!
//! Two kinds of entries live here:
//!
//! - the **input bus**, built locally first so its receive hook can be
//!   served, then registered and opened with the engine at startup (the hook
//!   fills the buffer the runner reads);
//! - **remote buses** discovered by [`MessageBusManager::refresh_all`], used
//!   as write targets for responses.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{BusClass, BusInfo, HttpMessageBus, MemoryMessageBus, MessageBus};
use crate::api::{ALREADY_OPENED, ApiError, BusDescriptor, UpstreamApi};
use crate::config::InputBusConfig;
use crate::error::{RegistryError, Result};

/// Tracks known buses, their flags, and the input bus.
pub struct MessageBusManager {
    api: Arc<dyn UpstreamApi>,
    input_config: Option<InputBusConfig>,
    client: reqwest::Client,
    buses: RwLock<HashMap<String, Arc<dyn MessageBus>>>,
    built_input: RwLock<Option<Arc<dyn MessageBus>>>,
    input: RwLock<Option<Arc<dyn MessageBus>>>,
}

impl MessageBusManager {
    /// Create a manager; `input_config` declares this process's input bus.
    pub fn new(api: Arc<dyn UpstreamApi>, input_config: Option<InputBusConfig>) -> Self {
        Self {
            api,
            input_config,
            client: reqwest::Client::new(),
            buses: RwLock::new(HashMap::new()),
            built_input: RwLock::new(None),
            input: RwLock::new(None),
        }
    }

    /// Use `client` for HTTP bus writes.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Name of the configured input bus, if any.
    pub fn input_bus_name(&self) -> Option<&str> {
        self.input_config.as_ref().map(|c| c.name.as_str())
    }

    /// Build the input bus locally without telling the engine about it.
    ///
    /// Its receive hook can be served before registration so nothing the
    /// engine pushes after opening the bus is refused. Returns `Ok(None)`
    /// when no input bus is configured; later calls return the same bus.
    pub async fn build_input_message_bus(&self) -> Result<Option<Arc<dyn MessageBus>>> {
        let Some(config) = &self.input_config else {
            debug!("No input message bus configured");
            return Ok(None);
        };

        let mut built = self.built_input.write().await;
        if let Some(existing) = built.as_ref() {
            return Ok(Some(existing.clone()));
        }

        let info = BusInfo::new(config.name.clone(), config.class.clone(), config.to_value());
        let bus: Arc<dyn MessageBus> = match BusClass::parse(&config.class) {
            Some(BusClass::Http) => Arc::new(HttpMessageBus::new(info, self.client.clone())?),
            Some(BusClass::Memory) => Arc::new(MemoryMessageBus::new(info)),
            None => return Err(RegistryError::UnknownBusClass(config.class.clone()).into()),
        };

        *built = Some(bus.clone());
        debug!(bus = %config.name, class = %config.class, "Built input message bus");
        Ok(Some(bus))
    }

    /// Register and open the input bus with the engine.
    ///
    /// Builds the bus first if [`build_input_message_bus`](Self::build_input_message_bus)
    /// has not run. Returns `Ok(None)` when no input bus is configured.
    /// Calling this again after a successful registration returns the
    /// existing bus. An `already_opened` reply from the engine counts as
    /// success; any other rejection is returned and leaves the bus
    /// unregistered.
    pub async fn register_input_message_bus(&self) -> Result<Option<Arc<dyn MessageBus>>> {
        let Some(bus) = self.build_input_message_bus().await? else {
            return Ok(None);
        };

        if let Some(existing) = self.input.read().await.as_ref() {
            if existing.name() != bus.name() {
                return Err(RegistryError::InputBusConflict(existing.name().to_string()).into());
            }
            return Ok(Some(existing.clone()));
        }

        let value = bus.info().config().clone();
        self.api.register_message_bus(&value).await?;
        match self.api.open_message_bus(bus.name()).await {
            Ok(()) => {}
            Err(e) if e.error_code() == Some(ALREADY_OPENED) => {
                debug!(bus = %bus.name(), "Input message bus already opened");
            }
            Err(e) => return Err(e.into()),
        }

        bus.info().set_flags(true, true, true);
        self.buses
            .write()
            .await
            .insert(bus.name().to_string(), bus.clone());
        *self.input.write().await = Some(bus.clone());

        info!(bus = %bus.name(), class = %bus.info().class(), "Registered input message bus");
        Ok(Some(bus))
    }

    /// The registered input bus.
    pub async fn input_message_bus(&self) -> Option<Arc<dyn MessageBus>> {
        self.input.read().await.clone()
    }

    /// Add a locally constructed bus to the registry.
    ///
    /// The bus stays only as long as the engine keeps listing it.
    pub async fn insert(&self, bus: Arc<dyn MessageBus>) {
        self.buses
            .write()
            .await
            .insert(bus.name().to_string(), bus);
    }

    /// Reconcile the registry with the engine's bus list.
    ///
    /// Known buses get their flags overwritten, new HTTP buses get a local
    /// proxy, and buses missing from the list are dropped.
    pub async fn refresh_all(&self) -> std::result::Result<(), ApiError> {
        let snapshot = self.api.all_message_buses().await?;

        let mut buses = self.buses.write().await;
        buses.retain(|name, _| {
            let keep = snapshot.iter().any(|d| &d.name == name);
            if !keep {
                info!(bus = %name, "Removed message bus");
            }
            keep
        });

        for descriptor in snapshot {
            if let Some(bus) = buses.get(&descriptor.name) {
                if bus
                    .info()
                    .set_flags(descriptor.alive, descriptor.opened, descriptor.available)
                {
                    debug!(
                        bus = %descriptor.name,
                        alive = descriptor.alive,
                        opened = descriptor.opened,
                        available = descriptor.available,
                        "Message bus flags changed"
                    );
                }
                continue;
            }

            if let Some(bus) = self.build_remote(descriptor) {
                info!(bus = %bus.name(), class = %bus.info().class(), "Discovered message bus");
                buses.insert(bus.name().to_string(), bus);
            }
        }

        Ok(())
    }

    fn build_remote(&self, descriptor: BusDescriptor) -> Option<Arc<dyn MessageBus>> {
        if BusClass::parse(&descriptor.class) != Some(BusClass::Http) {
            debug!(bus = %descriptor.name, class = %descriptor.class, "Skipping message bus of unsupported class");
            return None;
        }

        let info = BusInfo::new(descriptor.name, descriptor.class, descriptor.config);
        info.set_flags(descriptor.alive, descriptor.opened, descriptor.available);
        match HttpMessageBus::new(info, self.client.clone()) {
            Ok(bus) => Some(Arc::new(bus)),
            Err(e) => {
                warn!(error = %e, "Skipping message bus with invalid config");
                None
            }
        }
    }

    /// Look up a bus by name.
    pub async fn get_message_bus(&self, name: &str) -> std::result::Result<Arc<dyn MessageBus>, RegistryError> {
        self.buses
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownMessageBus(name.to_string()))
    }

    /// Names of all known buses, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buses.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
