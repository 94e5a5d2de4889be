//! RPC client: the dispatcher and waiter facing callers.
//!
//! ## Flow
//!
//! 1. `send` generates a correlation id and registers it.
//! 2. The request is published with `reply_to` set to the session's
//!    reply destination (one reconnect and retry on a broken link).
//! 3. The reply pump routes the matching reply into the registry.
//! 4. `await_response` or `get_response` hands the payload back.

use crate::adapters::AmqpConnector;
use crate::domain::{
    ClientConfig, CorrelationId, CorrelationRegistry, OutboundMessage, RegistryStats, Reply,
    RpcError, Target, TransportError, JSON_CONTENT_TYPE,
};
use crate::ports::BrokerConnector;
use crate::service::connection::ConnectionManager;
use crate::service::pump::ReplyPump;
use crate::service::reaper::reaper_task;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Request/reply client over a publish/subscribe broker.
///
/// Safe to share between tasks (`Arc<RpcClient>`): sends are serialised
/// on the connection, waits on different ids proceed independently.
///
/// Call [`close`](Self::close) before dropping. Dropping only stops the
/// background tasks; the broker connection and its reply queue stay open.
pub struct RpcClient {
    connection: ConnectionManager,
    registry: Arc<CorrelationRegistry>,
    config: ClientConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RpcClient {
    /// Connect to the AMQP broker named in `config`.
    ///
    /// # Errors
    ///
    /// `RpcError::Config` for an invalid configuration and
    /// `RpcError::Connection` if the broker cannot be reached.
    pub async fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let connector = AmqpConnector::new(&config)?;
        Self::with_connector(Arc::new(connector), config).await
    }

    /// Connect through any broker implementation.
    pub async fn with_connector(
        connector: Arc<dyn BrokerConnector>,
        config: ClientConfig,
    ) -> Result<Self, RpcError> {
        config.validate()?;

        let (connection, streams) = ConnectionManager::connect(connector).await?;
        let registry = Arc::new(CorrelationRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = ReplyPump::new(Arc::clone(&registry), streams, shutdown_rx.clone()).spawn();
        let reaper = tokio::spawn(reaper_task(
            Arc::clone(&registry),
            config.pending_ttl,
            config.reap_interval,
            shutdown_rx,
        ));

        info!(
            connection_name = %config.connection_name,
            reply_queue = %connection.reply_destination().await.unwrap_or_default(),
            "RPC client ready"
        );

        Ok(Self {
            connection,
            registry,
            config,
            shutdown_tx,
            tasks: Mutex::new(vec![pump, reaper]),
            closed: AtomicBool::new(false),
        })
    }

    /// Publish `payload` to `target` and return the id to wait on.
    ///
    /// The id is registered before the publish, so a reply that beats
    /// this call back to the client is never lost.
    ///
    /// # Errors
    ///
    /// `RpcError::Transport` if publishing fails even after one reconnect;
    /// the registration is removed in that case.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        target: impl Into<Target>,
    ) -> Result<CorrelationId, RpcError> {
        self.dispatch(payload.into(), target.into(), None).await
    }

    /// Serialize `body` as JSON and send it with an `application/json`
    /// content type.
    pub async fn send_json<T>(
        &self,
        body: &T,
        target: impl Into<Target>,
    ) -> Result<CorrelationId, RpcError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body).map_err(RpcError::Encode)?;
        self.dispatch(
            Bytes::from(payload),
            target.into(),
            Some(JSON_CONTENT_TYPE.to_string()),
        )
        .await
    }

    async fn dispatch(
        &self,
        payload: Bytes,
        target: Target,
        content_type: Option<String>,
    ) -> Result<CorrelationId, RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed.into());
        }

        let id = CorrelationId::new();
        self.registry.register(id)?;

        let published = self
            .connection
            .publish_with(|reply_to| OutboundMessage {
                payload: payload.clone(),
                correlation_id: id,
                reply_to: reply_to.to_string(),
                target: target.clone(),
                content_type: content_type.clone(),
            })
            .await;

        match published {
            Ok(()) => {
                debug!(correlation_id = %id, target = %target, "Request sent");
                Ok(id)
            }
            Err(e) => {
                self.registry.remove(&id);
                error!(correlation_id = %id, target = %target, error = %e, "Request not sent");
                Err(e.into())
            }
        }
    }

    /// Wait up to `timeout` for the reply to `id`.
    ///
    /// `None` on timeout, or if `id` is unknown or already consumed. A
    /// timed-out call stays registered until the TTL reaper or `release`
    /// removes it, so `get_response` can still collect a late reply.
    pub async fn await_response(&self, id: &CorrelationId, timeout: Duration) -> Option<Bytes> {
        self.await_reply(id, timeout).await.map(|reply| reply.payload)
    }

    /// Like [`await_response`](Self::await_response) but keeps the round-trip time.
    pub async fn await_reply(&self, id: &CorrelationId, timeout: Duration) -> Option<Reply> {
        self.registry.wait(id, timeout).await
    }

    /// Wait with the configured default timeout.
    pub async fn await_default(&self, id: &CorrelationId) -> Option<Bytes> {
        self.await_response(id, self.config.default_timeout).await
    }

    /// Wait and decode the reply as JSON. `Ok(None)` on timeout.
    pub async fn await_json<R>(
        &self,
        id: &CorrelationId,
        timeout: Duration,
    ) -> Result<Option<R>, RpcError>
    where
        R: DeserializeOwned,
    {
        match self.await_response(id, timeout).await {
            Some(payload) => serde_json::from_slice(&payload)
                .map(Some)
                .map_err(RpcError::Decode),
            None => Ok(None),
        }
    }

    /// Non-blocking poll. Consumes the reply if it has arrived.
    pub fn get_response(&self, id: &CorrelationId) -> Option<Bytes> {
        self.registry.take(id).map(|reply| reply.payload)
    }

    /// Forget `id`; a reply arriving later is discarded.
    pub fn release(&self, id: &CorrelationId) -> bool {
        self.registry.remove(id)
    }

    /// Calls registered and not yet consumed, released or evicted.
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    pub fn stats(&self) -> &RegistryStats {
        self.registry.stats()
    }

    /// Successful reconnects since the client was created.
    pub fn reconnects(&self) -> u64 {
        self.connection.reconnects()
    }

    /// Reply destination of the current session, `None` once closed.
    pub async fn reply_destination(&self) -> Option<String> {
        self.connection.reply_destination().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the pump and reaper, then close the broker link.
    ///
    /// Pending waiters run into their timeouts. Calling `close` twice is a
    /// no-op.
    pub async fn close(&self) -> Result<(), RpcError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Closing RPC client");
        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.connection.close().await?;
        info!(pending = self.registry.pending_count(), "RPC client closed");
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(
                connection_name = %self.config.connection_name,
                "RPC client dropped without close(), broker connection left open"
            );
        }
        // Background tasks exit on their own once they see the flag.
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .field("pending", &self.registry.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
