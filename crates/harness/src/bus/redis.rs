use core::fmt;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::info;

use super::{Broker, BusMessage, BusStream};
use crate::error::HarnessError;

pub const DEFAULT_URL: &str = "redis+unix:///tmp/redis.sock";

/// Broker backed by the Redis instance the router firmware connects to.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    publisher: MultiplexedConnection,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connection", self.client.get_connection_info())
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, HarnessError> {
        let client = Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;

        info!(%url, "Connected to message bus");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, HarnessError> {
        let mut publisher = self.publisher.clone();

        let receivers: usize = publisher.publish(topic, payload).await?;

        Ok(receivers)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, HarnessError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        let messages = pubsub.into_on_message().map(|msg| BusMessage {
            topic: msg.get_channel_name().to_owned(),
            payload: msg.get_payload_bytes().to_vec(),
        });

        Ok(messages.boxed())
    }
}
