//! Google Cloud Messaging client with connection resilience
//!
//! Two send paths share one [`Client`]:
//!
//! - a long-lived streaming connection that also receives acks, nacks,
//!   control signals and upstream messages, kept alive by the
//!   [`Supervisor`](supervisor::Supervisor);
//! - stateless HTTP sends retried on an exponential [`Backoff`].
//!
//! The streaming protocol itself is pluggable through
//! [`Connector`](transport::Connector) and
//! [`StreamingConnection`](transport::StreamingConnection).

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod message;
pub mod metrics;
pub mod router;
pub mod serde_utils;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use client::Client;
pub use config::{BackoffConfig, ClientConfig, Credentials, Environment, KeepAliveConfig};
pub use error::{ConfigurationError, ConnectionError, GcmError, GcmResult, HandlerError, HttpError};
pub use http::HttpTransport;
pub use message::{
    HttpMessage, HttpResponse, HttpResult, Notification, Priority, SendReceipt, StreamingMessage,
    UpstreamMessage,
};
pub use supervisor::{ConnectionHealth, ConnectionStatus, GenerationState, Replacement, Supervisor};
pub use transport::{Connector, MessageHandler, StreamingConnection, UnaryTransport};
