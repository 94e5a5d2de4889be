//! AMQP 0-9-1 adapter (RabbitMQ) built on `lapin`.
//!
//! Each session opens one connection and one channel, declares a
//! server-named queue that is exclusive and auto-deleting, and consumes it
//! with manual acknowledgements. Requests are published with the
//! `correlation_id` and `reply_to` properties set, and each publish waits
//! for the broker's confirm.

use crate::domain::{ClientConfig, ConnectionError, OutboundMessage, TransportError};
use crate::ports::{
    BrokerConnector, BrokerLink, BrokerSession, DeliveryAck, DeliveryStream, InboundMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

/// Reply code sent with a normal connection close.
const REPLY_SUCCESS: u16 = 200;

/// Opens sessions against the broker named by the connection string.
pub struct AmqpConnector {
    uri: AMQPUri,
    connection_name: String,
    prefetch: u16,
}

impl AmqpConnector {
    /// Parse the connection string. No socket is opened yet.
    pub fn new(config: &ClientConfig) -> Result<Self, ConnectionError> {
        let uri = config
            .dsn
            .parse::<AMQPUri>()
            .map_err(ConnectionError::InvalidDsn)?;

        Ok(Self {
            uri,
            connection_name: config.connection_name.clone(),
            prefetch: config.prefetch,
        })
    }

    fn consumer_tag(&self) -> String {
        format!("{}-replies", self.connection_name)
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<BrokerSession, ConnectionError> {
        let properties =
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into());

        let connection = Connection::connect_uri(self.uri.clone(), properties)
            .await
            .map_err(connect_failed)?;

        let channel = connection
            .create_channel()
            .await
            .map_err(reply_setup_failed)?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(reply_setup_failed)?;

        // Publisher confirms: a broker-side rejection must fail the publish
        // instead of surfacing later as an asynchronous channel close.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(reply_setup_failed)?;

        // Empty name: the broker picks a unique one scoped to this connection.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(reply_setup_failed)?;
        let reply_queue = queue.name().as_str().to_string();

        let consumer = channel
            .basic_consume(
                &reply_queue,
                &self.consumer_tag(),
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(reply_setup_failed)?;

        info!(
            host = %self.uri.authority.host,
            vhost = %self.uri.vhost,
            connection_name = %self.connection_name,
            reply_queue = %reply_queue,
            "Connected to broker"
        );

        let deliveries: DeliveryStream = consumer
            .map(|delivery| {
                let delivery = delivery.map_err(|e| TransportError::Receive(e.to_string()))?;
                let correlation_id = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string());
                Ok(InboundMessage {
                    correlation_id,
                    payload: Bytes::from(delivery.data),
                    ack: Box::new(AmqpAck(delivery.acker)),
                })
            })
            .boxed();

        Ok(BrokerSession {
            link: Box::new(AmqpLink {
                connection,
                channel,
                reply_queue,
            }),
            deliveries,
        })
    }
}

/// One open connection/channel pair.
struct AmqpLink {
    connection: Connection,
    channel: Channel,
    reply_queue: String,
}

#[async_trait]
impl BrokerLink for AmqpLink {
    fn reply_destination(&self) -> &str {
        &self.reply_queue
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let mut properties = BasicProperties::default()
            .with_correlation_id(message.correlation_id.to_string().into())
            .with_reply_to(message.reply_to.clone().into());
        if let Some(content_type) = &message.content_type {
            properties = properties.with_content_type(content_type.clone().into());
        }

        let confirm = self
            .channel
            .basic_publish(
                &message.target.exchange,
                &message.target.routing_key,
                BasicPublishOptions::default(),
                &message.payload[..],
                properties,
            )
            .await
            .map_err(publish_failed)?;
        check_confirmation(confirm.await)?;

        debug!(
            correlation_id = %message.correlation_id,
            exchange = %message.target.exchange,
            routing_key = %message.target.routing_key,
            bytes = message.payload.len(),
            "Published request"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Ok(());
        }
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "client closing").await {
            warn!(error = %e, "Failed to close channel cleanly");
        }
        self.connection
            .close(REPLY_SUCCESS, "client closing")
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }
}

struct AmqpAck(Acker);

#[async_trait]
impl DeliveryAck for AmqpAck {
    async fn ack(&self) -> Result<(), TransportError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::AckFailed(e.to_string()))
    }
}

fn connect_failed(error: lapin::Error) -> ConnectionError {
    match error {
        lapin::Error::ProtocolError(e) => ConnectionError::Rejected(e.to_string()),
        other => ConnectionError::Unreachable(other.to_string()),
    }
}

fn reply_setup_failed(error: lapin::Error) -> ConnectionError {
    ConnectionError::ReplyDestination(error.to_string())
}

fn publish_failed(error: lapin::Error) -> TransportError {
    TransportError::PublishFailed(error.to_string())
}

/// Only a broker ack counts as published.
fn check_confirmation(
    confirmation: Result<Confirmation, lapin::Error>,
) -> Result<(), TransportError> {
    match confirmation.map_err(publish_failed)? {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(TransportError::PublishFailed(
            "broker nacked the publish".into(),
        )),
        Confirmation::NotRequested => Err(TransportError::PublishFailed(
            "channel is not in confirm mode".into(),
        )),
    }
}
