// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message buses.
//!
//! A bus is a named transport with independent read and write paths. Reads
//! never block: they return whatever is already buffered, up to a limit.
//! Writes hand a batch to the transport and report failures to the caller
//! without retrying.
//!
//! | Class | Implementation | Notes |
//! |-------|----------------|-------|
//! | `http` | [`HttpMessageBus`] | writes POST to `config.url`, reads drain the receive-hook buffer |
//! | `memory` | [`MemoryMessageBus`] | in-process queue |

pub mod http;
pub mod manager;
pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::message::Message;

pub use http::HttpMessageBus;
pub use manager::MessageBusManager;
pub use memory::MemoryMessageBus;

/// Class identifier of [`HttpMessageBus`].
pub const CLASS_HTTP: &str = "http";
/// Class identifier of [`MemoryMessageBus`].
pub const CLASS_MEMORY: &str = "memory";

/// Bus implementations this process knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusClass {
    /// HTTP push transport.
    Http,
    /// In-process queue.
    Memory,
}

impl BusClass {
    /// Resolve a class identifier.
    ///
    /// The engine reports HTTP buses by their qualified class name, so any
    /// identifier ending in `HttpMessageBus` is accepted as `http`.
    pub fn parse(class: &str) -> Option<Self> {
        match class {
            CLASS_HTTP => Some(BusClass::Http),
            CLASS_MEMORY => Some(BusClass::Memory),
            c if c.ends_with("HttpMessageBus") => Some(BusClass::Http),
            _ => None,
        }
    }
}

/// Errors from bus transports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// The HTTP exchange failed.
    #[error("message bus {bus}: request failed: {source}")]
    Http {
        /// Bus name.
        bus: String,
        /// Underlying error.
        source: reqwest::Error,
    },

    /// The remote end answered with a non-success HTTP status.
    #[error("message bus {bus}: HTTP {status}: {body}")]
    Status {
        /// Bus name.
        bus: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The bus configuration is unusable.
    #[error("message bus {bus}: invalid config: {reason}")]
    InvalidConfig {
        /// Bus name.
        bus: String,
        /// What is wrong.
        reason: String,
    },

    /// The bus buffer is gone.
    #[error("message bus {0} is closed")]
    Closed(String),
}

/// Identity, configuration and health flags of a bus.
///
/// Flags are atomics so a registry refresh can update a bus in place while
/// delivery tasks hold references to it.
#[derive(Debug)]
pub struct BusInfo {
    name: String,
    class: String,
    config: Value,
    alive: AtomicBool,
    opened: AtomicBool,
    available: AtomicBool,
}

impl BusInfo {
    /// New bus info with all flags cleared.
    pub fn new(name: impl Into<String>, class: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            config,
            alive: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            available: AtomicBool::new(false),
        }
    }

    /// Unique bus name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation class identifier.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Implementation-specific configuration.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// String option from the configuration.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Bus process reachable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Bus accepting traffic.
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Bus usable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Overwrite all flags, returning whether any changed.
    pub fn set_flags(&self, alive: bool, opened: bool, available: bool) -> bool {
        let a = self.alive.swap(alive, Ordering::AcqRel);
        let o = self.opened.swap(opened, Ordering::AcqRel);
        let v = self.available.swap(available, Ordering::AcqRel);
        a != alive || o != opened || v != available
    }
}

/// A message transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Identity and flags.
    fn info(&self) -> &BusInfo;

    /// Unique bus name.
    fn name(&self) -> &str {
        self.info().name()
    }

    /// Deliver `messages`. An empty batch is a no-op.
    async fn write(&self, messages: &[Message]) -> Result<(), BusError>;

    /// Take up to `max` already-buffered messages without waiting.
    async fn read(&self, max: usize) -> Result<Vec<Message>, BusError>;

    /// HTTP routes that push messages into this bus, if it accepts pushes.
    fn receive_router(&self) -> Option<axum::Router> {
        None
    }
}

/// Unbounded in-process message queue shared by the bus implementations.
#[derive(Debug)]
pub(crate) struct MessageBuffer {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl MessageBuffer {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.tx.clone()
    }

    pub(crate) fn push(&self, bus: &str, messages: impl IntoIterator<Item = Message>) -> Result<(), BusError> {
        for message in messages {
            self.tx
                .send(message)
                .map_err(|_| BusError::Closed(bus.to_string()))?;
        }
        Ok(())
    }

    pub(crate) async fn drain(&self, max: usize) -> Vec<Message> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();
        while out.len() < max {
            match rx.try_recv() {
                Ok(message) => out.push(message),
                Err(_) => break,
            }
        }
        out
    }
}
