//! AMQP transport for the worker, built on `lapin`.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use worker::{Acknowledger, BrokerError, BrokerFuture, Delivery, Publisher};

use crate::config::RabbitConfig;

/// Persistent delivery mode for published messages.
const PERSISTENT: u8 = 2;

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

pub type ProbeStream = Pin<Box<dyn Stream<Item = Result<(), BrokerError>> + Send>>;

/// One broker connection. Jobs and callbacks share `channel`; the heartbeat
/// side-channel gets its own channel on the same connection.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    pub async fn connect(config: &RabbitConfig) -> Result<Self, BrokerError> {
        let uri = AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.user.clone(),
                    password: config.password.clone(),
                },
                host: config.host.clone(),
                port: config.port,
            },
            ..Default::default()
        };

        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(connection_error)?;
        let channel = connection.create_channel().await.map_err(connection_error)?;

        tracing::info!(host = %config.host, port = config.port, "connected to broker");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declare `queue` durable, limit unacknowledged deliveries to `prefetch`
    /// and start consuming it.
    pub async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<DeliveryStream, BrokerError> {
        declare(&self.channel, queue).await?;
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(connection_error)?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                "storage-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(connection_error)?;

        tracing::info!(queue, prefetch, "consuming job queue");
        Ok(Box::pin(consumer.map(|delivery| {
            delivery.map(into_delivery).map_err(connection_error)
        })))
    }

    /// Stream of heartbeat probes from `ping`, acknowledged on receipt.
    pub async fn probes(&self, ping: &str) -> Result<ProbeStream, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(connection_error)?;
        declare(&channel, ping).await?;

        let consumer = channel
            .basic_consume(
                ping,
                "storage-worker-heartbeat",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(connection_error)?;

        Ok(Box::pin(consumer.then(|delivery| async move {
            let delivery = delivery.map_err(connection_error)?;
            delivery
                .acker
                .ack(BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|e| BrokerError::Ack(e.to_string()))
        })))
    }
}

impl Publisher for AmqpBroker {
    fn declare_durable<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(declare(&self.channel, queue))
    }

    fn publish<'a>(&'a self, queue: &'a str, payload: &'a [u8]) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let publish_error = |e: lapin::Error| BrokerError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            };
            self.channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default().with_delivery_mode(PERSISTENT),
                )
                .await
                .map_err(publish_error)?
                .await
                .map_err(publish_error)?;
            Ok(())
        })
    }
}

async fn declare(channel: &Channel, queue: &str) -> Result<(), BrokerError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Declare {
            queue: queue.to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

struct AmqpAck(lapin::acker::Acker);

impl Acknowledger for AmqpAck {
    fn ack(self: Box<Self>) -> BrokerFuture<'static, ()> {
        Box::pin(async move {
            self.0
                .ack(BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|e| BrokerError::Ack(e.to_string()))
        })
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let lapin::message::Delivery { data, acker, .. } = delivery;
    Delivery::new(data, AmqpAck(acker))
}

fn connection_error(error: lapin::Error) -> BrokerError {
    BrokerError::Connection(error.to_string())
}
