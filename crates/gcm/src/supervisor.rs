//! Connection supervisor for the streaming transport
//!
//! Keeps exactly one streaming connection current and swaps it for a fresh
//! one when it stops answering health checks or when the server announces it
//! is draining. Each connection lifetime is a *generation*:
//!
//! ```text
//! Connecting -> Listening -> Draining -> Replaced -> Closed
//!                         -> TimedOut -> Replaced -> Closed
//!                         -> Closed
//! ```
//!
//! Every generation gets two background tasks, a receive loop and a
//! supervision loop. Both live in a task set owned by the supervisor and are
//! tied to a cancellation token, so [`Supervisor::close`] can stop and join
//! all of them.
//!
//! The current generation sits behind an `RwLock`; senders take a read lock
//! and clone the handle, and replacements are serialized so only one writer
//! swaps it at a time.

use crate::config::{ClientConfig, Credentials, Environment, KeepAliveConfig};
use crate::error::{ConnectionError, GcmError, GcmResult};
use crate::message::{SendReceipt, StreamingMessage};
use crate::metrics::{CONNECTION_REPLACEMENTS, CURRENT_GENERATION, PING_TIMEOUTS, STREAMING_SENDS};
use crate::router::{DrainSignal, UpstreamRouter};
use crate::transport::{Connector, SharedHandler, StreamingConnection};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Lifecycle state of one connection generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Connecting,
    Listening,
    /// Server announced a drain, handoff in progress, still usable
    Draining,
    /// Health check went unanswered, presumed dead
    TimedOut,
    /// Swapped out for a newer generation
    Replaced,
    Closed,
}

/// Health of the current connection as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// Answering health checks
    Healthy,
    /// Working, but the server asked for a new connection
    Draining,
    /// Presumed dead and no replacement has succeeded yet
    Degraded,
}

/// Snapshot of the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub generation: u64,
    pub state: GenerationState,
    pub health: ConnectionHealth,
}

/// Outcome of a replacement request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// A new generation is current
    Swapped { previous: Option<u64>, current: u64 },
    /// The generation the request was made for had already been replaced
    Stale { current: Option<u64> },
}

#[derive(Debug, Clone, Copy)]
enum ReplaceReason {
    Timeout,
    Draining,
    Manual,
}

impl ReplaceReason {
    fn as_str(&self) -> &'static str {
        match self {
            ReplaceReason::Timeout => "timeout",
            ReplaceReason::Draining => "draining",
            ReplaceReason::Manual => "manual",
        }
    }
}

/// One connection lifetime
pub(crate) struct Generation<T> {
    pub(crate) id: u64,
    pub(crate) connection: T,
    state: Mutex<GenerationState>,
    token: CancellationToken,
    draining: AtomicBool,
    closed: AtomicBool,
}

impl<T: StreamingConnection> Generation<T> {
    fn new(id: u64, connection: T, token: CancellationToken) -> Self {
        Self {
            id,
            connection,
            state: Mutex::new(GenerationState::Connecting),
            token,
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> GenerationState {
        *lock(&self.state)
    }

    fn set_state(&self, state: GenerationState) {
        *lock(&self.state) = state;
    }

    /// Close the connection once, then stop its background tasks
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(generation = self.id, "closing connection");
        self.connection.graceful_close().await;
        self.token.cancel();
        self.set_state(GenerationState::Closed);
    }
}

struct Inner<C: Connector> {
    connector: C,
    environment: Environment,
    credentials: Credentials,
    debug: bool,
    keep_alive: KeepAliveConfig,
    handler: SharedHandler,
    current: RwLock<Option<Arc<Generation<C::Connection>>>>,
    /// Drained generations still finishing in-flight traffic
    retired: Mutex<Vec<Arc<Generation<C::Connection>>>>,
    replace_lock: AsyncMutex<()>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
    generations: AtomicU64,
}

/// Owner of the current streaming connection
pub struct Supervisor<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Supervisor<C> {
    /// Connect the first generation and start supervising it.
    ///
    /// A failed initial connect is returned to the caller and not retried.
    pub async fn start(
        connector: C,
        config: &ClientConfig,
        credentials: Credentials,
        handler: SharedHandler,
    ) -> GcmResult<Self> {
        let inner = Arc::new(Inner {
            connector,
            environment: config.environment,
            credentials,
            debug: config.debug,
            keep_alive: config.keep_alive.clone(),
            handler,
            current: RwLock::new(None),
            retired: Mutex::new(Vec::new()),
            replace_lock: AsyncMutex::new(()),
            tasks: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
            generations: AtomicU64::new(0),
        });

        let generation = inner.connect_generation().await?;
        *inner.current.write().await = Some(generation.clone());
        CURRENT_GENERATION.set(generation.id as i64);
        info!(
            generation = generation.id,
            endpoint = inner.environment.streaming_endpoint(),
            "streaming connection established"
        );
        inner.spawn(inner.clone().supervise(generation));

        Ok(Self { inner })
    }

    /// Send on the current connection. No retry.
    pub async fn send(&self, message: &StreamingMessage) -> GcmResult<SendReceipt> {
        let generation = self.inner.current().await?;
        match generation.connection.send(message).await {
            Ok(receipt) => {
                STREAMING_SENDS.with_label_values(&["success"]).inc();
                Ok(receipt)
            }
            Err(err) => {
                STREAMING_SENDS.with_label_values(&["failure"]).inc();
                debug!(
                    generation = generation.id,
                    message_id = %message.message_id,
                    error = %err,
                    "streaming send failed"
                );
                Err(err.into())
            }
        }
    }

    /// Connect a new generation and make it current.
    ///
    /// With `close_old` the previous generation is closed before this
    /// returns; otherwise it stays open until its own supervision or
    /// [`close`](Self::close) closes it. On failure the previous generation
    /// stays current.
    pub async fn replace(&self, close_old: bool) -> GcmResult<Replacement> {
        self.inner
            .replace_from(None, close_old, ReplaceReason::Manual)
            .await
    }

    /// Current generation number, if any
    pub async fn generation(&self) -> Option<u64> {
        self.inner.current.read().await.as_ref().map(|g| g.id)
    }

    pub async fn status(&self) -> Option<ConnectionStatus> {
        let current = self.inner.current.read().await.clone()?;
        let state = current.state();
        let health = match state {
            GenerationState::Connecting | GenerationState::Listening => ConnectionHealth::Healthy,
            GenerationState::Draining | GenerationState::Replaced => ConnectionHealth::Draining,
            GenerationState::TimedOut | GenerationState::Closed => ConnectionHealth::Degraded,
        };
        Some(ConnectionStatus {
            generation: current.id,
            state,
            health,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Close every connection and stop replacing them.
    ///
    /// Pending health check and reconnect waits are released, receive loops
    /// exit without error, and all background tasks are joined.
    pub async fn close(&self) -> GcmResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(());
        }
        info!("closing streaming connection");
        self.inner.shutdown.cancel();

        let (current, retired) = {
            let _guard = self.inner.replace_lock.lock().await;
            let current = self.inner.current.write().await.take();
            let retired = std::mem::take(&mut *lock(&self.inner.retired));
            (current, retired)
        };
        join_all(current.iter().chain(retired.iter()).map(|g| g.close())).await;
        CURRENT_GENERATION.set(0);

        let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        while let Some(result) = tasks.join_next().await {
            log_join_error(result);
        }
        debug!("streaming supervisor stopped");
        Ok(())
    }
}

impl<C: Connector> Drop for Supervisor<C> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<C: Connector> Inner<C> {
    async fn current(&self) -> GcmResult<Arc<Generation<C::Connection>>> {
        self.current.read().await.clone().ok_or(GcmError::Closed)
    }

    async fn is_current(&self, id: u64) -> bool {
        self.current.read().await.as_ref().map(|g| g.id) == Some(id)
    }

    fn forget_retired(&self, id: u64) {
        lock(&self.retired).retain(|g| g.id != id);
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.tasks);
        if self.shutdown.is_cancelled() {
            return;
        }
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
        tasks.spawn(task);
    }

    /// Sleep unless shut down first. Returns false on shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Connect and start the receive loop of a new generation
    async fn connect_generation(self: &Arc<Self>) -> GcmResult<Arc<Generation<C::Connection>>> {
        let connection = self
            .connector
            .connect(self.environment, &self.credentials, self.debug)
            .await?;
        let id = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::new(Generation::new(id, connection, self.shutdown.child_token()));

        let drain: Arc<dyn DrainSignal> = Arc::new(DrainHandoff {
            inner: Arc::downgrade(self),
            generation: Arc::downgrade(&generation),
        });
        let router: SharedHandler = Arc::new(UpstreamRouter::new(id, drain, self.handler.clone()));

        generation.set_state(GenerationState::Listening);
        self.spawn(listen(generation.clone(), router).map(drop));
        Ok(generation)
    }

    async fn replace_from(
        self: &Arc<Self>,
        expected: Option<u64>,
        close_old: bool,
        reason: ReplaceReason,
    ) -> GcmResult<Replacement> {
        let _guard = self.replace_lock.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(GcmError::Closed);
        }

        let previous = self.current.read().await.clone();
        let previous_id = previous.as_ref().map(|g| g.id);
        if let Some(expected) = expected {
            if previous_id != Some(expected) {
                debug!(expected, current = ?previous_id, "connection was already replaced");
                return Ok(Replacement::Stale {
                    current: previous_id,
                });
            }
        }

        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(GcmError::Closed),
            connected = self.connect_generation() => connected,
        };
        let next = match connected {
            Ok(next) => next,
            Err(err) => {
                CONNECTION_REPLACEMENTS
                    .with_label_values(&[reason.as_str(), "failure"])
                    .inc();
                return Err(err);
            }
        };
        if self.shutdown.is_cancelled() {
            next.close().await;
            return Err(GcmError::Closed);
        }

        *self.current.write().await = Some(next.clone());
        CURRENT_GENERATION.set(next.id as i64);
        CONNECTION_REPLACEMENTS
            .with_label_values(&[reason.as_str(), "success"])
            .inc();
        self.spawn(self.clone().supervise(next.clone()));
        info!(
            previous = ?previous_id,
            current = next.id,
            reason = reason.as_str(),
            "streaming connection replaced"
        );

        if let Some(previous) = previous {
            previous.set_state(GenerationState::Replaced);
            if close_old {
                previous.close().await;
            } else {
                lock(&self.retired).push(previous);
            }
        }

        Ok(Replacement::Swapped {
            previous: previous_id,
            current: next.id,
        })
    }

    /// Health-check one generation and replace it when it stops answering
    fn supervise(self: Arc<Self>, generation: Arc<Generation<C::Connection>>) -> BoxFuture<'static, ()> {
        async move {
            let KeepAliveConfig {
                ping_interval,
                ping_timeout,
                reconnect_delay,
            } = self.keep_alive.clone();

            let outcome = tokio::select! {
                _ = generation.token.cancelled() => return,
                outcome = generation.connection.ping_periodically(ping_timeout, ping_interval) => outcome,
            };
            let err = match outcome {
                Ok(()) => {
                    debug!(generation = generation.id, "connection closed, supervision finished");
                    generation.set_state(GenerationState::Closed);
                    self.forget_retired(generation.id);
                    return;
                }
                Err(err) => err,
            };

            if !self.is_current(generation.id).await {
                debug!(
                    generation = generation.id,
                    error = %err,
                    "retired connection stopped answering, closing it"
                );
                generation.close().await;
                self.forget_retired(generation.id);
                return;
            }

            PING_TIMEOUTS.inc();
            warn!(
                generation = generation.id,
                error = %err,
                "ping timed out, creating new streaming connection"
            );
            generation.set_state(GenerationState::TimedOut);

            loop {
                match self
                    .replace_from(Some(generation.id), true, ReplaceReason::Timeout)
                    .await
                {
                    Ok(Replacement::Swapped { .. }) | Err(GcmError::Closed) => return,
                    Ok(Replacement::Stale { .. }) => {
                        // swapped out by a drain handoff while we were waiting
                        generation.close().await;
                        self.forget_retired(generation.id);
                        return;
                    }
                    Err(err) => {
                        error!(
                            generation = generation.id,
                            error = %err,
                            "failed to replace unresponsive connection, retrying in {:?}",
                            reconnect_delay
                        );
                        if !self.pause(reconnect_delay).await {
                            return;
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Keep retrying a failed drain handoff while the draining generation
    /// stays current and in service
    async fn retry_drain(self: Arc<Self>, generation: Arc<Generation<C::Connection>>) {
        loop {
            if !self.pause(self.keep_alive.reconnect_delay).await {
                return;
            }
            if !self.is_current(generation.id).await {
                return;
            }
            match self
                .replace_from(Some(generation.id), false, ReplaceReason::Draining)
                .await
            {
                Ok(_) | Err(GcmError::Closed) => return,
                Err(err) => error!(
                    generation = generation.id,
                    error = %err,
                    "failed to replace draining connection, it stays in service"
                ),
            }
        }
    }
}

/// Drain notifications from one generation's router
struct DrainHandoff<C: Connector> {
    inner: Weak<Inner<C>>,
    generation: Weak<Generation<C::Connection>>,
}

#[async_trait]
impl<C: Connector> DrainSignal for DrainHandoff<C> {
    async fn connection_draining(&self, generation_id: u64) {
        let (Some(inner), Some(generation)) = (self.inner.upgrade(), self.generation.upgrade())
        else {
            return;
        };
        if generation.draining.swap(true, Ordering::SeqCst) {
            debug!(generation = generation_id, "drain handoff already started");
            return;
        }
        if generation.state() == GenerationState::Listening {
            generation.set_state(GenerationState::Draining);
        }

        match inner
            .replace_from(Some(generation.id), false, ReplaceReason::Draining)
            .await
        {
            Ok(_) | Err(GcmError::Closed) => {}
            Err(err) => {
                error!(
                    generation = generation.id,
                    error = %err,
                    "failed to replace draining connection, it stays in service"
                );
                inner.spawn(inner.clone().retry_drain(generation));
            }
        }
    }
}

/// Receive loop of one generation. Stopping the generation ends it with `Ok`,
/// even when the connection itself never returns.
async fn listen<T: StreamingConnection>(
    generation: Arc<Generation<T>>,
    sink: SharedHandler,
) -> Result<(), ConnectionError> {
    let result = tokio::select! {
        _ = generation.token.cancelled() => Ok(()),
        result = generation.connection.listen(sink) => result,
    };
    match &result {
        Ok(()) => debug!(generation = generation.id, "listen finished"),
        Err(err) => error!(generation = generation.id, error = %err, "listen failed"),
    }
    result
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_join_error(result: Result<(), JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(error = %err, "supervisor task panicked");
        }
    }
}
