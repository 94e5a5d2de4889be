//! In-process broker.
//!
//! Stands in for RabbitMQ in tests and local runs. Every session gets its own
//! reply queue; published requests land in a single inbox that a simulated
//! responder drains, and replies are routed by reply-queue name exactly like
//! a direct publish to the default exchange would be.
//!
//! Failure injection: `drop_connections()` severs every open session the way
//! a broker restart would (reply queues are auto-deleted),
//! `refuse_connections(true)` makes subsequent connects fail, and
//! `fail_next_publishes(n)` makes publishes on healthy-looking links fail,
//! like a dead socket that is only noticed on write.

use crate::domain::{ConnectionError, OutboundMessage, TransportError};
use crate::ports::{
    BrokerConnector, BrokerLink, BrokerSession, DeliveryAck, DeliveryStream, InboundMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

type DeliverySender = mpsc::UnboundedSender<Result<InboundMessage, TransportError>>;

struct ReplyQueue {
    sender: DeliverySender,
    connected: Arc<AtomicBool>,
}

struct BrokerState {
    queues: Mutex<HashMap<String, ReplyQueue>>,
    requests_tx: mpsc::UnboundedSender<OutboundMessage>,
    requests_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>,
    refuse_connections: AtomicBool,
    failing_publishes: AtomicU64,
    sessions_opened: AtomicU64,
    published: AtomicU64,
    acked: AtomicU64,
}

impl BrokerState {
    fn take_publish_failure(&self) -> bool {
        self.failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// In-memory broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(BrokerState {
                queues: Mutex::new(HashMap::new()),
                requests_tx,
                requests_rx: Mutex::new(Some(requests_rx)),
                refuse_connections: AtomicBool::new(false),
                failing_publishes: AtomicU64::new(0),
                sessions_opened: AtomicU64::new(0),
                published: AtomicU64::new(0),
                acked: AtomicU64::new(0),
            }),
        }
    }

    /// Take the inbox of published requests. Only the first call gets it.
    pub fn take_requests(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.state.requests_rx.lock().take()
    }

    /// Reply to `request` on its reply destination, echoing its correlation id.
    pub fn respond(&self, request: &OutboundMessage, payload: impl Into<Bytes>) -> bool {
        self.deliver(
            &request.reply_to,
            Some(request.correlation_id.to_string()),
            payload,
        )
    }

    /// Push a raw delivery onto a reply queue.
    ///
    /// Returns `false` if the queue no longer exists.
    pub fn deliver(
        &self,
        reply_to: &str,
        correlation_id: Option<String>,
        payload: impl Into<Bytes>,
    ) -> bool {
        let message = InboundMessage {
            correlation_id,
            payload: payload.into(),
            ack: Box::new(MemoryAck {
                state: Arc::clone(&self.state),
            }),
        };
        self.push(reply_to, Ok(message))
    }

    /// Push a receive error onto a reply queue.
    pub fn inject_error(&self, reply_to: &str, error: TransportError) -> bool {
        self.push(reply_to, Err(error))
    }

    fn push(&self, reply_to: &str, item: Result<InboundMessage, TransportError>) -> bool {
        let queues = self.state.queues.lock();
        match queues.get(reply_to) {
            Some(queue) => queue.sender.send(item).is_ok(),
            None => {
                debug!(reply_to = reply_to, "Delivery to missing reply queue dropped");
                false
            }
        }
    }

    /// Sever every open session. Reply queues are deleted and their
    /// delivery streams end.
    pub fn drop_connections(&self) {
        let dropped: Vec<_> = self.state.queues.lock().drain().collect();
        for (name, queue) in &dropped {
            queue.connected.store(false, Ordering::SeqCst);
            debug!(reply_queue = %name, "Dropped broker session");
        }
    }

    /// Make subsequent connects fail (`true`) or succeed again (`false`).
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Fail the next `count` publishes with `PublishFailed`, whatever link
    /// they go through. Links keep reporting themselves connected.
    pub fn fail_next_publishes(&self, count: u64) {
        self.state.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Names of the reply queues that currently exist.
    pub fn reply_destinations(&self) -> Vec<String> {
        self.state.queues.lock().keys().cloned().collect()
    }

    /// Sessions opened so far, reconnects included.
    pub fn sessions_opened(&self) -> u64 {
        self.state.sessions_opened.load(Ordering::Relaxed)
    }

    /// Requests published so far.
    pub fn published(&self) -> u64 {
        self.state.published.load(Ordering::Relaxed)
    }

    /// Deliveries acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.state.acked.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<BrokerSession, ConnectionError> {
        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable(
                "in-memory broker is refusing connections".into(),
            ));
        }

        let reply_queue = format!("amq.gen-{}", Uuid::new_v4().simple());
        let connected = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = mpsc::unbounded_channel();

        self.state.queues.lock().insert(
            reply_queue.clone(),
            ReplyQueue {
                sender,
                connected: Arc::clone(&connected),
            },
        );
        self.state.sessions_opened.fetch_add(1, Ordering::Relaxed);
        debug!(reply_queue = %reply_queue, "Opened in-memory session");

        let deliveries: DeliveryStream = UnboundedReceiverStream::new(receiver).boxed();
        Ok(BrokerSession {
            link: Box::new(MemoryLink {
                state: Arc::clone(&self.state),
                reply_queue,
                connected,
            }),
            deliveries,
        })
    }
}

struct MemoryLink {
    state: Arc<BrokerState>,
    reply_queue: String,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerLink for MemoryLink {
    fn reply_destination(&self) -> &str {
        &self.reply_queue
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if self.state.take_publish_failure() {
            return Err(TransportError::PublishFailed("injected write failure".into()));
        }

        self.state.published.fetch_add(1, Ordering::Relaxed);
        if self.state.requests_tx.send(message.clone()).is_err() {
            // Nobody drains the inbox: the request is lost, like a publish to
            // an exchange without bound queues.
            warn!(
                correlation_id = %message.correlation_id,
                target = %message.target,
                "Request dropped (no responder attached)"
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.queues.lock().remove(&self.reply_queue);
        Ok(())
    }
}

struct MemoryAck {
    state: Arc<BrokerState>,
}

#[async_trait]
impl DeliveryAck for MemoryAck {
    async fn ack(&self) -> Result<(), TransportError> {
        self.state.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
