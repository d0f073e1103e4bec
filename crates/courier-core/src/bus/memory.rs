// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process queue bus.

use async_trait::async_trait;
use serde_json::Value;

use super::{BusError, BusInfo, CLASS_MEMORY, MessageBuffer, MessageBus};
use crate::message::Message;

/// Queue-backed bus: `write` enqueues, `read` drains.
#[derive(Debug)]
pub struct MemoryMessageBus {
    info: BusInfo,
    buffer: MessageBuffer,
}

impl MemoryMessageBus {
    /// Build a bus from its info.
    pub fn new(info: BusInfo) -> Self {
        Self {
            info,
            buffer: MessageBuffer::new(),
        }
    }

    /// Standalone bus that is alive, opened and available.
    pub fn named(name: impl Into<String>) -> Self {
        let info = BusInfo::new(name, CLASS_MEMORY, Value::Object(Default::default()));
        info.set_flags(true, true, true);
        Self::new(info)
    }
}

#[async_trait]
impl MessageBus for MemoryMessageBus {
    fn info(&self) -> &BusInfo {
        &self.info
    }

    async fn write(&self, messages: &[Message]) -> Result<(), BusError> {
        self.buffer.push(self.info.name(), messages.iter().cloned())
    }

    async fn read(&self, max: usize) -> Result<Vec<Message>, BusError> {
        Ok(self.buffer.drain(max).await)
    }
}
