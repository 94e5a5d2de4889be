//! Reply pump.
//!
//! A dedicated task that drains the reply destination and routes each
//! delivery to the registry by correlation id. It follows the connection
//! manager across reconnects by switching to whichever delivery stream was
//! handed over last, and stops when the shutdown signal flips.

use crate::domain::{CorrelationId, CorrelationRegistry, TransportError};
use crate::ports::{DeliveryStream, InboundMessage};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Routes replies into the registry.
pub struct ReplyPump {
    registry: Arc<CorrelationRegistry>,
    streams: mpsc::UnboundedReceiver<DeliveryStream>,
    shutdown: watch::Receiver<bool>,
}

impl ReplyPump {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        streams: mpsc::UnboundedReceiver<DeliveryStream>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            streams,
            shutdown,
        }
    }

    /// Run on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Pump until shutdown.
    ///
    /// Malformed deliveries and acknowledgement failures are logged and
    /// skipped. A stream that ends (broker went away) leaves the pump idle
    /// until the next reconnect hands over a fresh one.
    pub async fn run(mut self) {
        info!("Reply pump started");

        let mut current: Option<DeliveryStream> = None;
        let mut streams_open = true;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    // A dropped sender means the client is gone.
                    if changed.is_err() {
                        break;
                    }
                }

                stream = self.streams.recv(), if streams_open => match stream {
                    Some(stream) => {
                        debug!("Reply pump switched to a new delivery stream");
                        current = Some(stream);
                    }
                    None => streams_open = false,
                },

                delivery = next_delivery(&mut current) => match delivery {
                    Some(Ok(message)) => route(&self.registry, message).await,
                    Some(Err(e)) => warn!(error = %e, "Error receiving reply, continuing"),
                    None => {
                        warn!("Reply stream ended, waiting for reconnect");
                        current = None;
                        if !streams_open {
                            break;
                        }
                    }
                },
            }
        }

        info!("Reply pump stopped");
    }
}

async fn next_delivery(
    current: &mut Option<DeliveryStream>,
) -> Option<Result<InboundMessage, TransportError>> {
    match current {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Store the payload and wake the waiter, then acknowledge.
async fn route(registry: &CorrelationRegistry, message: InboundMessage) {
    let InboundMessage {
        correlation_id,
        payload,
        ack,
    } = message;

    match correlation_id.as_deref().map(CorrelationId::parse) {
        Some(Ok(id)) => {
            if registry.fulfil(&id, payload) {
                debug!(correlation_id = %id, "Routed reply");
            }
        }
        Some(Err(e)) => warn!(error = %e, "Discarding reply with malformed correlation id"),
        None => warn!("Discarding reply without correlation id"),
    }

    if let Err(e) = ack.ack().await {
        error!(error = %e, "Failed to acknowledge reply");
    }
}
