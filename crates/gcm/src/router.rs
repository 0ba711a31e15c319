//! First-line routing of inbound messages
//!
//! Connection draining is a server-initiated, graceful migration: the old
//! connection keeps working while a new one is brought up. The router spots
//! drain signals, waits for the supervisor's first handoff attempt, and then
//! passes everything the caller has to see on to the caller's handler.

use crate::error::HandlerError;
use crate::message::UpstreamMessage;
use crate::metrics::UPSTREAM_MESSAGES;
use crate::transport::{MessageHandler, SharedHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::*;

/// What to do with one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Hand to the caller unchanged
    Forward,
    /// Start a drain handoff and swallow the message
    DrainAndConsume,
    /// Start a drain handoff and still hand the message to the caller
    DrainAndForward,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Forward => "forward",
            Route::DrainAndConsume => "drain_consume",
            Route::DrainAndForward => "drain_forward",
        }
    }
}

/// Decide how an inbound message is handled.
///
/// A drain control signal carries no reply obligation and is consumed. A
/// drain nack refers to a specific downstream message the caller may want to
/// resend, so it is forwarded.
pub fn classify(message: &UpstreamMessage) -> Route {
    if !message.is_connection_draining() {
        return Route::Forward;
    }
    match message {
        UpstreamMessage::Control(_) => Route::DrainAndConsume,
        _ => Route::DrainAndForward,
    }
}

/// Receiver of drain notifications
#[async_trait]
pub trait DrainSignal: Send + Sync + 'static {
    /// The server announced it is draining connection `generation`.
    ///
    /// Returns once the first handoff attempt has finished, so anything the
    /// caller does next already goes to the new connection.
    async fn connection_draining(&self, generation: u64);
}

/// Sink installed on one connection generation
pub struct UpstreamRouter {
    generation: u64,
    drain: Arc<dyn DrainSignal>,
    handler: SharedHandler,
}

impl UpstreamRouter {
    pub fn new(generation: u64, drain: Arc<dyn DrainSignal>, handler: SharedHandler) -> Self {
        Self {
            generation,
            drain,
            handler,
        }
    }
}

#[async_trait]
impl MessageHandler for UpstreamRouter {
    async fn handle(&self, message: UpstreamMessage) -> Result<(), HandlerError> {
        let route = classify(&message);
        UPSTREAM_MESSAGES
            .with_label_values(&[message.kind(), route.as_str()])
            .inc();

        match route {
            Route::Forward => self.handler.handle(message).await,
            Route::DrainAndConsume => {
                warn!(
                    generation = self.generation,
                    "server is draining the connection, replacing it"
                );
                self.drain.connection_draining(self.generation).await;
                Ok(())
            }
            Route::DrainAndForward => {
                warn!(
                    generation = self.generation,
                    message_id = message.message_id().unwrap_or_default(),
                    "message rejected because the connection is draining, replacing it"
                );
                self.drain.connection_draining(self.generation).await;
                self.handler.handle(message).await
            }
        }
    }
}
