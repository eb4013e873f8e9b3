use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Consumer,
};

use super::{BusError, MessageBus, RelayMessage};
use crate::timeout::{with_timeout, BUS_PUBLISH_TIMEOUT};

const EXCHANGE_NAME: &str = "parley.signals";

/// Primary relay bus on an AMQP topic exchange. Routing keys are
/// `{topic}.{key}`, so consumers bind per topic (`router_commands.*`) or
/// per resource (`router_commands.sfu-1`).
#[derive(Clone)]
pub struct AmqpBus {
    channel: Channel,
}

impl AmqpBus {
    pub async fn connect(url: &str) -> Result<Self, lapin::Error> {
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(url = %url, exchange = EXCHANGE_NAME, "connected to AMQP bus");
        Ok(Self { channel })
    }

    pub fn routing_key(topic: &str, key: &str) -> String {
        format!("{topic}.{key}")
    }

    pub fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }

    /// Declare a durable queue bound to the given routing keys and start
    /// consuming from it.
    pub async fn subscribe(
        &self,
        queue_name: &str,
        binding_keys: &[&str],
    ) -> Result<Consumer, lapin::Error> {
        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for key in binding_keys {
            self.channel
                .queue_bind(
                    queue_name,
                    EXCHANGE_NAME,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer = self
            .channel
            .basic_consume(
                queue_name,
                &format!("{queue_name}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            queue = %queue_name,
            bindings = ?binding_keys,
            "subscribed to AMQP queue"
        );

        Ok(consumer)
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        message: &RelayMessage,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(message)?;
        let routing_key = Self::routing_key(topic, key);

        let confirm = with_timeout("AMQP publish", BUS_PUBLISH_TIMEOUT, async {
            self.channel
                .basic_publish(
                    EXCHANGE_NAME,
                    &routing_key,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default()
                        .with_content_type("application/json".into())
                        .with_delivery_mode(2), // persistent
                )
                .await?
                .await
        })
        .await
        .map_err(|_| BusError::Timeout)?;
        confirm?;

        tracing::debug!(routing_key = %routing_key, "bus message published");
        Ok(())
    }
}
