//! Connection Manager - owns the one broker link.
//!
//! The link sits behind an async mutex which doubles as the publish lock.
//! Lock order: whenever both are needed, this lock is taken before the
//! registry lock. The dispatcher never nests them; it registers first and
//! publishes afterwards.

use crate::domain::{ConnectionError, OutboundMessage, TransportError};
use crate::ports::{BrokerConnector, BrokerLink, DeliveryStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// Owns the broker link and replaces it on reconnect.
///
/// Each new session's delivery stream is handed to the reply pump through
/// the channel returned by [`ConnectionManager::connect`].
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    link: Mutex<Option<Box<dyn BrokerLink>>>,
    deliveries_tx: mpsc::UnboundedSender<DeliveryStream>,
    reconnects: AtomicU64,
}

impl ConnectionManager {
    /// Open the first session.
    ///
    /// # Errors
    ///
    /// `ConnectionError` if the broker is unreachable, rejects the
    /// credentials, or the reply destination cannot be set up.
    pub async fn connect(
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeliveryStream>), ConnectionError> {
        let session = connector.connect().await?;
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        // The receiver is alive right here, so this cannot fail.
        let _ = deliveries_tx.send(session.deliveries);

        let manager = Self {
            connector,
            link: Mutex::new(Some(session.link)),
            deliveries_tx,
            reconnects: AtomicU64::new(0),
        };
        Ok((manager, deliveries_rx))
    }

    /// Current reply destination, `None` once closed.
    pub async fn reply_destination(&self) -> Option<String> {
        self.link
            .lock()
            .await
            .as_deref()
            .map(|link| link.reply_destination().to_string())
    }

    /// Number of successful reconnects.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Publish the message `build` produces for the current reply destination.
    ///
    /// A broken link, or a publish failure on a link that looked healthy,
    /// triggers exactly one reconnect and one retry. The message is rebuilt
    /// for the retry because the new session has a new reply destination.
    pub async fn publish_with<F>(&self, build: F) -> Result<(), TransportError>
    where
        F: Fn(&str) -> OutboundMessage + Send + Sync,
    {
        let mut guard = self.link.lock().await;
        let link = guard.as_deref().ok_or(TransportError::Closed)?;

        if link.is_connected() {
            match link.publish(&build(link.reply_destination())).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "Publish failed, reconnecting once"),
            }
        } else {
            warn!("Broker connection lost, reconnecting before publish");
        }

        let replacement = self.open_replacement().await?;
        if let Some(old) = guard.replace(replacement) {
            if let Err(e) = old.close().await {
                warn!(error = %e, "Failed to close stale broker link");
            }
        }

        let link = guard.as_deref().ok_or(TransportError::Closed)?;
        link.publish(&build(link.reply_destination())).await
    }

    /// Open a new session and hand its deliveries to the pump.
    async fn open_replacement(&self) -> Result<Box<dyn BrokerLink>, TransportError> {
        let session = self.connector.connect().await.map_err(|e| {
            error!(error = %e, "Reconnect to broker failed");
            TransportError::Reconnect(e)
        })?;

        if self.deliveries_tx.send(session.deliveries).is_err() {
            warn!("Reply pump is gone; replies on the new session will not be routed");
        }

        self.reconnects.fetch_add(1, Ordering::Relaxed);
        info!(
            reply_queue = %session.link.reply_destination(),
            "Reconnected to broker"
        );
        Ok(session.link)
    }

    /// Close the link. Later publishes fail with `TransportError::Closed`.
    pub async fn close(&self) -> Result<(), TransportError> {
        let link = self.link.lock().await.take();
        match link {
            Some(link) => link.close().await,
            None => Ok(()),
        }
    }
}
