//! Downstream and upstream message models
//!
//! Downstream messages are what the client sends: [`StreamingMessage`] over
//! the streaming connection and [`HttpMessage`] over the unary path.
//! Upstream messages are what the streaming server sends back, decoded from
//! the flat [`CcsMessage`] envelope into the [`UpstreamMessage`] variants the
//! router works with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Error code / control type announcing that the server will drop the connection
pub const CONNECTION_DRAINING: &str = "CONNECTION_DRAINING";

/// Per-recipient error codes that are worth retrying
pub const RETRYABLE_RESULT_ERRORS: &[&str] = &["Unavailable", "InternalServerError"];

/// Free-form data payload
pub type Data = HashMap<String, Value>;

/// Notification payload displayed by the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_loc_args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_args: Option<String>,
}

/// Delivery priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

/// Message sent over the streaming connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingMessage {
    /// Registration token or topic
    pub to: String,
    /// Caller chosen id, echoed in acknowledgements
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_while_idle: Option<bool>,
    /// Seconds the server keeps the message for an offline device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_receipt_requested: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

/// Message sent over the HTTP endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpMessage {
    /// Single recipient, mutually exclusive with `registration_ids`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Multicast recipients
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub registration_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_while_idle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

/// Response of the HTTP endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpResponse {
    pub multicast_id: i64,
    pub success: u32,
    pub failure: u32,
    pub canonical_ids: u32,
    /// One entry per recipient, in request order
    pub results: Vec<HttpResult>,
}

/// Outcome for one recipient of an HTTP send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Canonical registration id, when the device token changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Acknowledgement of a streaming send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Id of the message that was written
    pub message_id: String,
    /// Transport specific status (bytes written for frame based transports)
    pub status: u64,
}

/// Raw upstream envelope as sent by the streaming server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcsMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
}

/// Inbound message from the streaming server
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    /// Server accepted a downstream message
    Ack(Acknowledgement),
    /// Server rejected a downstream message
    Nack(NegativeAcknowledgement),
    /// Connection lifecycle signal
    Control(ControlSignal),
    /// Anything else, usually a device-to-server message or a receipt
    Payload(UpstreamPayload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub message_id: String,
    pub from: Option<String>,
    pub registration_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeAcknowledgement {
    pub message_id: String,
    pub from: Option<String>,
    /// Error code, e.g. `BAD_REGISTRATION` or `CONNECTION_DRAINING`
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSignal {
    pub control_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamPayload {
    pub from: Option<String>,
    pub message_id: Option<String>,
    pub message_type: Option<String>,
    pub category: Option<String>,
    pub data: Data,
}

impl UpstreamMessage {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamMessage::Ack(_) => "ack",
            UpstreamMessage::Nack(_) => "nack",
            UpstreamMessage::Control(_) => "control",
            UpstreamMessage::Payload(_) => "payload",
        }
    }

    /// Id of the downstream or upstream message this refers to
    pub fn message_id(&self) -> Option<&str> {
        match self {
            UpstreamMessage::Ack(ack) => Some(&ack.message_id),
            UpstreamMessage::Nack(nack) => Some(&nack.message_id),
            UpstreamMessage::Control(_) => None,
            UpstreamMessage::Payload(payload) => payload.message_id.as_deref(),
        }
    }

    /// Whether the server announced it is draining this connection
    pub fn is_connection_draining(&self) -> bool {
        match self {
            UpstreamMessage::Nack(nack) => nack.error.as_deref() == Some(CONNECTION_DRAINING),
            UpstreamMessage::Control(control) => control.control_type == CONNECTION_DRAINING,
            _ => false,
        }
    }
}

impl From<CcsMessage> for UpstreamMessage {
    fn from(ccs: CcsMessage) -> Self {
        match ccs.message_type.as_deref() {
            Some("ack") => UpstreamMessage::Ack(Acknowledgement {
                message_id: ccs.message_id.unwrap_or_default(),
                from: ccs.from,
                registration_id: ccs.registration_id,
            }),
            Some("nack") => UpstreamMessage::Nack(NegativeAcknowledgement {
                message_id: ccs.message_id.unwrap_or_default(),
                from: ccs.from,
                error: ccs.error,
                error_description: ccs.error_description,
            }),
            Some("control") => UpstreamMessage::Control(ControlSignal {
                control_type: ccs.control_type.unwrap_or_default(),
            }),
            _ => UpstreamMessage::Payload(UpstreamPayload {
                from: ccs.from,
                message_id: ccs.message_id,
                message_type: ccs.message_type,
                category: ccs.category,
                data: ccs.data.unwrap_or_default(),
            }),
        }
    }
}

impl HttpMessage {
    /// Recipients in request order
    pub fn targets(&self) -> Vec<String> {
        match &self.to {
            Some(to) => vec![to.clone()],
            None => self.registration_ids.clone(),
        }
    }

    /// Copy of this message addressed to `targets` only
    pub fn retarget(&self, targets: &[String]) -> Self {
        let mut message = self.clone();
        if self.to.is_some() && targets.len() == 1 {
            message.to = Some(targets[0].clone());
            message.registration_ids.clear();
        } else {
            message.to = None;
            message.registration_ids = targets.to_vec();
        }
        message
    }
}

impl HttpResult {
    pub fn is_retryable(&self) -> bool {
        self.error
            .as_deref()
            .map(|e| RETRYABLE_RESULT_ERRORS.contains(&e))
            .unwrap_or(false)
    }
}
