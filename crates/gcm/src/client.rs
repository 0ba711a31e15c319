//! Client façade
//!
//! Bundles the streaming supervisor and the unary transport behind one
//! handle. Streaming sends go to whichever connection is current at the
//! moment of the call; unary sends get a fresh backoff per call.

use crate::backoff::Backoff;
use crate::config::{ClientConfig, Credentials};
use crate::error::{GcmError, GcmResult};
use crate::http::HttpTransport;
use crate::message::{HttpMessage, HttpResponse, SendReceipt, StreamingMessage};
use crate::supervisor::{ConnectionStatus, Supervisor};
use crate::transport::{Connector, MessageHandler, SharedHandler, UnaryTransport};
use std::sync::Arc;
use tracing::*;

pub struct Client<C: Connector, U: UnaryTransport = HttpTransport> {
    config: ClientConfig,
    supervisor: Supervisor<C>,
    unary: U,
}

impl<C: Connector> Client<C, HttpTransport> {
    /// Validate the configuration, build the HTTP transport and open the
    /// first streaming connection.
    ///
    /// Fails if the first streaming connection cannot be established.
    pub async fn create<H: MessageHandler>(
        config: ClientConfig,
        credentials: Credentials,
        connector: C,
        handler: H,
    ) -> GcmResult<Self> {
        let unary = HttpTransport::new(&config, &credentials)?;
        Self::create_with_unary(config, credentials, connector, unary, handler).await
    }
}

impl<C: Connector, U: UnaryTransport> Client<C, U> {
    /// Same as [`Client::create`] with a caller-supplied unary transport
    pub async fn create_with_unary<H: MessageHandler>(
        config: ClientConfig,
        credentials: Credentials,
        connector: C,
        unary: U,
        handler: H,
    ) -> GcmResult<Self> {
        config.validate()?;
        credentials.validate()?;
        info!(
            environment = %config.environment,
            sender_id = %credentials.sender_id,
            "starting gcm client"
        );

        let handler: SharedHandler = Arc::new(handler);
        let supervisor = Supervisor::start(connector, &config, credentials, handler).await?;

        Ok(Self {
            config,
            supervisor,
            unary,
        })
    }

    /// Send on the current streaming connection. Not retried.
    pub async fn send_streaming(&self, message: &StreamingMessage) -> GcmResult<SendReceipt> {
        if self.supervisor.is_closed() {
            return Err(GcmError::Closed);
        }
        self.supervisor.send(message).await
    }

    /// Send over the unary transport, retrying until the backoff gives up
    pub async fn send_unary(&self, message: &HttpMessage) -> GcmResult<HttpResponse> {
        if self.supervisor.is_closed() {
            return Err(GcmError::Closed);
        }
        let mut backoff = Backoff::from_config(&self.config.backoff);
        self.unary.send(message, &mut backoff).await
    }

    pub async fn status(&self) -> Option<ConnectionStatus> {
        self.supervisor.status().await
    }

    pub fn supervisor(&self) -> &Supervisor<C> {
        &self.supervisor
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close all streaming connections. Further sends fail with
    /// [`GcmError::Closed`].
    pub async fn close(&self) -> GcmResult<()> {
        self.supervisor.close().await
    }
}
