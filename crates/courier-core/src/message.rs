// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message envelopes carried by message buses.
//!
//! Every message travels as the same JSON envelope:
//!
//! ```json
//! {"type": "req", "sender": "activity", "receiver": "echo", "attr": {...}, "time": 1700000000000}
//! ```
//!
//! The `type` discriminator selects the typed view: `req` decodes into a
//! [`ServiceRequestMessage`], `res` into a [`ServiceResponseMessage`], and
//! anything else is kept as a [`RawMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::result::{ResultStatus, ServiceResult};

/// `type` of a service request envelope.
pub const TYPE_REQUEST: &str = "req";
/// `type` of a service response envelope.
pub const TYPE_RESPONSE: &str = "res";

const ATTR_ACTIVITY: &str = "activity";
const ATTR_DOMAIN: &str = "domain";
const ATTR_ACTION: &str = "action";
const ATTR_ARGS: &str = "args";
const ATTR_IGNORE_RESULT: &str = "ignore_result";
const ATTR_STATUS: &str = "status";
const ATTR_ERROR_CODE: &str = "error_code";
const ATTR_MESSAGE: &str = "message";
const ATTR_DATA: &str = "data";

/// Errors raised while decoding a typed envelope.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum MessageError {
    /// A required attribute is absent.
    #[error("missing message attribute: {0}")]
    MissingAttr(&'static str),

    /// An attribute has the wrong JSON type.
    #[error("invalid message attribute {name}: expected {expected}")]
    InvalidAttr {
        /// Attribute name.
        name: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },
}

/// Current wall clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Untyped message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender identifier.
    #[serde(default)]
    pub sender: String,
    /// Receiver identifier.
    #[serde(default)]
    pub receiver: String,
    /// Attribute mapping.
    #[serde(default)]
    pub attr: Map<String, Value>,
    /// Timestamp in milliseconds since the epoch.
    #[serde(default)]
    pub time: i64,
}

impl RawMessage {
    /// Build an envelope.
    pub fn new(
        kind: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        attr: Map<String, Value>,
        time: i64,
    ) -> Self {
        Self {
            kind: kind.into(),
            sender: sender.into(),
            receiver: receiver.into(),
            attr,
            time,
        }
    }
}

fn required<'a>(attr: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, MessageError> {
    attr.get(name).ok_or(MessageError::MissingAttr(name))
}

fn required_i64(attr: &Map<String, Value>, name: &'static str) -> Result<i64, MessageError> {
    required(attr, name)?.as_i64().ok_or(MessageError::InvalidAttr {
        name,
        expected: "integer",
    })
}

fn required_str(attr: &Map<String, Value>, name: &'static str) -> Result<String, MessageError> {
    required(attr, name)?
        .as_str()
        .map(str::to_string)
        .ok_or(MessageError::InvalidAttr {
            name,
            expected: "string",
        })
}

fn optional_str(attr: &Map<String, Value>, name: &'static str) -> Result<String, MessageError> {
    match attr.get(name) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(MessageError::InvalidAttr {
            name,
            expected: "string",
        }),
    }
}

/// A request for a service, produced by an activity thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequestMessage {
    sender: String,
    receiver: String,
    time: i64,
    activity_id: i64,
    domain_id: String,
    action: String,
    args: Value,
    ignore_result: bool,
}

impl ServiceRequestMessage {
    /// Build a request whose result is expected back.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        time: i64,
        activity_id: i64,
        domain_id: impl Into<String>,
        action: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            time,
            activity_id,
            domain_id: domain_id.into(),
            action: action.into(),
            args,
            ignore_result: false,
        }
    }

    /// Mark whether the caller wants a response at all.
    pub fn with_ignore_result(mut self, ignore_result: bool) -> Self {
        self.ignore_result = ignore_result;
        self
    }

    /// The service consumer that sent the request.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The target service name.
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Request timestamp in milliseconds.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Activity that owns the requesting thread.
    pub fn activity_id(&self) -> i64 {
        self.activity_id
    }

    /// Domain of the requesting thread.
    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    /// Operation requested from the service.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Service-specific arguments.
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Look up a named argument.
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// When true no response is produced for this request.
    pub fn ignore_result(&self) -> bool {
        self.ignore_result
    }

    /// Attribute mapping as it appears on the wire.
    pub fn attr(&self) -> Map<String, Value> {
        let mut attr = Map::new();
        attr.insert(ATTR_ACTIVITY.into(), Value::from(self.activity_id));
        attr.insert(ATTR_DOMAIN.into(), Value::from(self.domain_id.clone()));
        attr.insert(ATTR_ACTION.into(), Value::from(self.action.clone()));
        attr.insert(ATTR_ARGS.into(), self.args.clone());
        attr.insert(ATTR_IGNORE_RESULT.into(), Value::from(self.ignore_result));
        attr
    }
}

impl TryFrom<RawMessage> for ServiceRequestMessage {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let attr = &raw.attr;
        let ignore_result = match attr.get(ATTR_IGNORE_RESULT) {
            None | Some(Value::Null) => false,
            Some(v) => v.as_bool().ok_or(MessageError::InvalidAttr {
                name: ATTR_IGNORE_RESULT,
                expected: "boolean",
            })?,
        };
        Ok(Self {
            activity_id: required_i64(attr, ATTR_ACTIVITY)?,
            domain_id: required_str(attr, ATTR_DOMAIN)?,
            action: required_str(attr, ATTR_ACTION)?,
            args: required(attr, ATTR_ARGS)?.clone(),
            ignore_result,
            sender: raw.sender,
            receiver: raw.receiver,
            time: raw.time,
        })
    }
}

impl From<ServiceRequestMessage> for RawMessage {
    fn from(msg: ServiceRequestMessage) -> Self {
        let attr = msg.attr();
        RawMessage::new(TYPE_REQUEST, msg.sender, msg.receiver, attr, msg.time)
    }
}

/// The outcome of one request, addressed back to its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponseMessage {
    sender: String,
    receiver: String,
    time: i64,
    activity_id: i64,
    domain_id: String,
    action: String,
    result: ServiceResult,
}

impl ServiceResponseMessage {
    /// Build the response for `request`, stamped with `time`.
    ///
    /// Sender and receiver are swapped relative to the request; the
    /// correlation attributes are echoed.
    pub fn from_result(time: i64, request: &ServiceRequestMessage, result: ServiceResult) -> Self {
        Self {
            sender: request.receiver.clone(),
            receiver: request.sender.clone(),
            time,
            activity_id: request.activity_id,
            domain_id: request.domain_id.clone(),
            action: request.action.clone(),
            result,
        }
    }

    /// The service that produced the response.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The service consumer the response is delivered to.
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Completion timestamp in milliseconds.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Activity of the originating request.
    pub fn activity_id(&self) -> i64 {
        self.activity_id
    }

    /// Domain of the originating request.
    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    /// Action of the originating request.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The carried result.
    pub fn result(&self) -> &ServiceResult {
        &self.result
    }

    /// Shorthand for `result().status`.
    pub fn status(&self) -> ResultStatus {
        self.result.status
    }

    /// Attribute mapping as it appears on the wire.
    pub fn attr(&self) -> Map<String, Value> {
        let mut attr = Map::new();
        attr.insert(ATTR_ACTIVITY.into(), Value::from(self.activity_id));
        attr.insert(ATTR_DOMAIN.into(), Value::from(self.domain_id.clone()));
        attr.insert(ATTR_ACTION.into(), Value::from(self.action.clone()));
        attr.insert(ATTR_STATUS.into(), Value::from(self.result.status.as_str()));
        attr.insert(
            ATTR_ERROR_CODE.into(),
            Value::from(self.result.error_code.clone()),
        );
        attr.insert(ATTR_MESSAGE.into(), Value::from(self.result.message.clone()));
        attr.insert(ATTR_DATA.into(), self.result.data.clone());
        attr
    }
}

impl TryFrom<RawMessage> for ServiceResponseMessage {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let attr = &raw.attr;
        let status: ResultStatus = serde_json::from_value(required(attr, ATTR_STATUS)?.clone())
            .map_err(|_| MessageError::InvalidAttr {
                name: ATTR_STATUS,
                expected: "ok|fail|ignore|timeout",
            })?;
        let result = ServiceResult {
            status,
            error_code: optional_str(attr, ATTR_ERROR_CODE)?,
            message: optional_str(attr, ATTR_MESSAGE)?,
            data: Value::Null,
        }
        .with_data(attr.get(ATTR_DATA).cloned().unwrap_or(Value::Null));
        Ok(Self {
            activity_id: required_i64(attr, ATTR_ACTIVITY)?,
            domain_id: required_str(attr, ATTR_DOMAIN)?,
            action: required_str(attr, ATTR_ACTION)?,
            result,
            sender: raw.sender,
            receiver: raw.receiver,
            time: raw.time,
        })
    }
}

impl From<ServiceResponseMessage> for RawMessage {
    fn from(msg: ServiceResponseMessage) -> Self {
        let attr = msg.attr();
        RawMessage::new(TYPE_RESPONSE, msg.sender, msg.receiver, attr, msg.time)
    }
}

/// Any message a bus can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum Message {
    /// Service request (`type = "req"`).
    Request(ServiceRequestMessage),
    /// Service response (`type = "res"`).
    Response(ServiceResponseMessage),
    /// Any other envelope, kept verbatim.
    Other(RawMessage),
}

impl Message {
    /// Type discriminator.
    pub fn kind(&self) -> &str {
        match self {
            Message::Request(_) => TYPE_REQUEST,
            Message::Response(_) => TYPE_RESPONSE,
            Message::Other(raw) => &raw.kind,
        }
    }

    /// Sender identifier.
    pub fn sender(&self) -> &str {
        match self {
            Message::Request(m) => m.sender(),
            Message::Response(m) => m.sender(),
            Message::Other(raw) => &raw.sender,
        }
    }

    /// Receiver identifier.
    pub fn receiver(&self) -> &str {
        match self {
            Message::Request(m) => m.receiver(),
            Message::Response(m) => m.receiver(),
            Message::Other(raw) => &raw.receiver,
        }
    }

    /// Timestamp in milliseconds.
    pub fn time(&self) -> i64 {
        match self {
            Message::Request(m) => m.time(),
            Message::Response(m) => m.time(),
            Message::Other(raw) => raw.time,
        }
    }

    /// Attribute mapping.
    pub fn attr(&self) -> Map<String, Value> {
        match self {
            Message::Request(m) => m.attr(),
            Message::Response(m) => m.attr(),
            Message::Other(raw) => raw.attr.clone(),
        }
    }

    /// The request view, if this is a request.
    pub fn into_request(self) -> Option<ServiceRequestMessage> {
        match self {
            Message::Request(m) => Some(m),
            _ => None,
        }
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            TYPE_REQUEST => Ok(Message::Request(raw.try_into()?)),
            TYPE_RESPONSE => Ok(Message::Response(raw.try_into()?)),
            _ => Ok(Message::Other(raw)),
        }
    }
}

impl From<Message> for RawMessage {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Request(m) => m.into(),
            Message::Response(m) => m.into(),
            Message::Other(raw) => raw,
        }
    }
}

impl From<ServiceRequestMessage> for Message {
    fn from(msg: ServiceRequestMessage) -> Self {
        Message::Request(msg)
    }
}

impl From<ServiceResponseMessage> for Message {
    fn from(msg: ServiceResponseMessage) -> Self {
        Message::Response(msg)
    }
}
