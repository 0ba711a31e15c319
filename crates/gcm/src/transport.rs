//! Transport abstractions consumed by the client
//!
//! The streaming protocol framing lives behind [`Connector`] and
//! [`StreamingConnection`]; the supervisor only needs to connect, listen,
//! send, ping and close. The unary path is behind [`UnaryTransport`], with
//! [`HttpTransport`](crate::http::HttpTransport) as the default implementation.

use crate::backoff::Backoff;
use crate::config::{Credentials, Environment};
use crate::error::{ConnectionError, GcmResult, HandlerError};
use crate::message::{HttpMessage, HttpResponse, SendReceipt, StreamingMessage, UpstreamMessage};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Consumer of inbound messages
///
/// An error returned here travels back to whichever receive loop delivered
/// the message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: UpstreamMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(UpstreamMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: UpstreamMessage) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

/// Shared handle to a message handler
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Factory for streaming connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: StreamingConnection;

    /// Open and authenticate a new connection
    async fn connect(
        &self,
        environment: Environment,
        credentials: &Credentials,
        debug: bool,
    ) -> Result<Self::Connection, ConnectionError>;
}

/// One physical streaming session
///
/// Implementations are shared between the receive loop, the supervision loop
/// and senders, so every method takes `&self`.
#[async_trait]
pub trait StreamingConnection: Send + Sync + 'static {
    /// Deliver inbound messages to `sink` until the connection ends.
    ///
    /// Returns `Ok(())` when the connection was closed gracefully.
    async fn listen(&self, sink: SharedHandler) -> Result<(), ConnectionError>;

    /// Write one message to the connection
    async fn send(&self, message: &StreamingMessage) -> Result<SendReceipt, ConnectionError>;

    /// Ping every `interval`, failing when an answer takes longer than `timeout`.
    ///
    /// Returns `Ok(())` only once the connection has been closed cleanly.
    async fn ping_periodically(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), ConnectionError>;

    /// Finish in-flight work and close the connection
    async fn graceful_close(&self);
}

/// Stateless request/response sender
#[async_trait]
pub trait UnaryTransport: Send + Sync + 'static {
    /// Send `message`, retrying on `backoff` until it gives up
    async fn send(&self, message: &HttpMessage, backoff: &mut Backoff) -> GcmResult<HttpResponse>;
}
