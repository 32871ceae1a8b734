//! Pub/sub bridge between the harness and the router processes.
//!
//! Every router talks to the broker on channels prefixed with its own
//! address: `<address>/<type>:<port>:<destination>:<source>`. The harness
//! listens on `<address>/*` for each router it spawned and injects outbound
//! traffic on the sender's prefix.

use core::fmt;
use core::str::FromStr;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::address::Address;
use crate::error::HarnessError;
use crate::state::{ReceivedMessage, SharedDirectory, SharedRouterState};

mod memory;
mod redis;

pub use memory::MemoryBroker;
pub use self::redis::{RedisBroker, DEFAULT_URL as REDIS_URL};

pub const DEFAULT_PORT: u8 = 15;

const LOCAL: &str = "self";

/// Subscribers the harness itself keeps on a spawned router's prefix.
const HARNESS_RECEIVERS: usize = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub type BusStream = BoxStream<'static, BusMessage>;

/// The external pub/sub transport.
#[async_trait]
pub trait Broker: fmt::Debug + Send + Sync {
    /// Returns how many subscribers received the message.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, HarnessError>;

    /// The subscription is active once this returns.
    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, HarnessError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicKind {
    Network,
    Undelivered,
    Other(String),
}

impl From<&str> for TopicKind {
    fn from(kind: &str) -> Self {
        match kind {
            "network" => Self::Network,
            "undelivered" => Self::Undelivered,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Either side of a topic, from the publishing router's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Local,
    Remote(Address),
}

impl FromStr for Endpoint {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == LOCAL {
            return Ok(Self::Local);
        }

        s.parse().map(Self::Remote)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str(LOCAL),
            Self::Remote(address) => write!(f, "{address}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topic {
    pub kind: TopicKind,
    pub port: u8,
    pub destination: Endpoint,
    pub source: Endpoint,
}

impl Topic {
    /// Channel a router process picks data frames up from.
    #[must_use]
    pub fn outbound(source: Address, destination: Address, port: u8) -> String {
        format!("{source}/network:{port}:{destination}:{LOCAL}")
    }

    #[must_use]
    pub fn pattern(address: Address) -> String {
        format!("{address}/*")
    }

    pub fn parse(channel: &str) -> Option<Self> {
        let mut parts = channel.split(':');

        let kind = parts.next()?;
        let kind = kind.split_once('/').map_or(kind, |(_, kind)| kind);
        let port = parts.next()?.parse().ok()?;
        let destination = parts.next()?.parse().ok()?;
        let source = parts.next()?.parse().ok()?;

        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            kind: kind.into(),
            port,
            destination,
            source,
        })
    }
}

/// Publishes `payload` as if `source` had sent it to `destination`.
///
/// Fire and forget: the result only says whether the router process picked
/// it up. The harness's own bridge for `source` always hears the publish
/// too, so it does not count.
pub async fn send(
    broker: &dyn Broker,
    source: Address,
    destination: Address,
    port: u8,
    payload: &[u8],
) -> Result<bool, HarnessError> {
    let topic = Topic::outbound(source, destination, port);
    let receivers = broker.publish(&topic, payload).await?;

    debug!(%topic, receivers, "Published message");

    Ok(receivers > HARNESS_RECEIVERS)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeSummary {
    pub received: usize,
    pub ignored: usize,
}

/// Subscription side of the bridge for one router.
#[derive(Debug)]
pub struct Bridge {
    router: String,
    state: SharedRouterState,
    directory: SharedDirectory,
}

impl Bridge {
    #[must_use]
    pub const fn new(router: String, state: SharedRouterState, directory: SharedDirectory) -> Self {
        Self {
            router,
            state,
            directory,
        }
    }

    /// Applies one bus message to the router's state.
    ///
    /// Returns whether the message was recorded.
    pub fn handle(&self, message: &BusMessage) -> bool {
        let Some(topic) = Topic::parse(&message.topic) else {
            debug!(router = %self.router, topic = %message.topic, "Ignoring malformed topic");
            return false;
        };

        match (&topic.kind, topic.destination, topic.source) {
            (TopicKind::Network, Endpoint::Local, Endpoint::Remote(source)) => {
                let Some(source) = self.directory.read().name_of(source).map(str::to_owned)
                else {
                    debug!(router = %self.router, %source, "Message from unknown address");
                    return false;
                };

                debug!(router = %self.router, %source, port = topic.port, "Message received");

                self.state.write().messages.push(ReceivedMessage {
                    source,
                    port: topic.port,
                    payload: message.payload.clone(),
                });

                true
            }
            (TopicKind::Undelivered, _, _) => {
                debug!(router = %self.router, "Message bounced back");

                self.state
                    .write()
                    .undelivered
                    .push(message.payload.clone());

                true
            }
            _ => false,
        }
    }

    /// Drains `messages` until the subscription ends or `cancel` fires.
    pub async fn run(self, mut messages: BusStream, cancel: CancellationToken) -> BridgeSummary {
        let mut summary = BridgeSummary::default();

        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = messages.next() => message,
            };

            let Some(message) = message else {
                info!(router = %self.router, "Subscription closed by broker");
                break;
            };

            if self.handle(&message) {
                summary.received = summary.received.saturating_add(1);
            } else {
                summary.ignored = summary.ignored.saturating_add(1);
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::Directory;

    fn addr(value: u8) -> Address {
        Address::new(value).unwrap()
    }

    fn message(topic: &str, payload: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_owned(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    fn bridge_for(name: &str, directory: &SharedDirectory) -> (Bridge, SharedRouterState) {
        let state = Arc::clone(&directory.read().get(name).unwrap().state);
        let bridge = Bridge::new(name.to_owned(), Arc::clone(&state), Arc::clone(directory));
        (bridge, state)
    }

    fn directory() -> SharedDirectory {
        let directory = Directory::shared();
        for name in ["alpha", "beta"] {
            let _entry = directory.write().register(name).unwrap();
        }
        directory
    }

    #[test]
    fn test_parse_topic() {
        let topic = Topic::parse("2/network:15:self:1").unwrap();

        assert_eq!(
            topic,
            Topic {
                kind: TopicKind::Network,
                port: 15,
                destination: Endpoint::Local,
                source: Endpoint::Remote(addr(1)),
            }
        );

        assert_eq!(
            Topic::parse("2/stats:0:self:self").unwrap().kind,
            TopicKind::Other("stats".to_owned())
        );
        assert!(Topic::parse("2/network:15:self").is_none());
        assert!(Topic::parse("2/network:port:self:1").is_none());
        assert!(Topic::parse("2/network:15:self:1:extra").is_none());
    }

    #[test]
    fn test_outbound_topic_round_trips_through_parse() {
        let topic = Topic::outbound(addr(1), addr(2), DEFAULT_PORT);

        assert_eq!(topic, "1/network:15:2:self");

        let parsed = Topic::parse(&topic).unwrap();
        assert_eq!(parsed.destination, Endpoint::Remote(addr(2)));
        assert_eq!(parsed.source, Endpoint::Local);
    }

    #[test]
    fn test_network_message_resolves_source_name() {
        let directory = directory();
        let (bridge, state) = bridge_for("beta", &directory);

        assert!(bridge.handle(&message("2/network:15:self:1", "hello")));

        assert!(state.read().has_message("alpha", 15, b"hello"));
    }

    #[test]
    fn test_own_and_outbound_traffic_is_ignored() {
        let directory = directory();
        let (bridge, state) = bridge_for("alpha", &directory);

        assert!(!bridge.handle(&message("1/network:15:2:self", "outbound")));
        assert!(!bridge.handle(&message("1/network:15:self:self", "loop")));
        assert!(!bridge.handle(&message("1/network:15:self:9", "stranger")));
        assert!(!bridge.handle(&message("1/graph:0:self:self", "ignored")));
        assert!(!bridge.handle(&message("garbage", "ignored")));

        assert!(state.read().messages.is_empty());
    }

    #[test]
    fn test_undelivered_is_recorded() {
        let directory = directory();
        let (bridge, state) = bridge_for("alpha", &directory);

        assert!(bridge.handle(&message("1/undelivered:15:2:self", "lost")));

        assert!(state.read().has_undelivered(b"lost"));
    }

    #[tokio::test]
    async fn test_bridge_run_until_cancelled() {
        let broker = MemoryBroker::new();
        let directory = directory();
        let (bridge, state) = bridge_for("beta", &directory);
        let cancel = CancellationToken::new();

        let subscription = broker.psubscribe(&Topic::pattern(addr(2))).await.unwrap();
        let task = tokio::spawn(bridge.run(subscription, cancel.clone()));

        assert_eq!(broker.publish("2/network:15:self:1", b"one").await.unwrap(), 1);
        assert_eq!(broker.publish("2/misc:0:self:self", b"two").await.unwrap(), 1);
        assert_eq!(broker.publish("1/network:15:self:2", b"three").await.unwrap(), 0);

        crate::wait::wait_or_fail("bridge idle", crate::wait::WaitOptions::default(), || {
            state.read().has_message("alpha", 15, b"one")
        })
        .await
        .unwrap();

        cancel.cancel();
        let summary = task.await.unwrap();

        assert_eq!(summary.received, 1);
        assert!(!state.read().has_message("beta", 15, b"three"));
    }

    #[tokio::test]
    async fn test_send_ignores_the_harness_bridge() {
        let broker = MemoryBroker::new();

        assert!(!send(&broker, addr(1), addr(2), DEFAULT_PORT, b"hello").await.unwrap());

        let _bridge = broker.psubscribe(&Topic::pattern(addr(1))).await.unwrap();

        assert!(!send(&broker, addr(1), addr(2), DEFAULT_PORT, b"hello").await.unwrap());

        let _firmware = broker.psubscribe("1/network:*:*:self").await.unwrap();

        assert!(send(&broker, addr(1), addr(2), DEFAULT_PORT, b"hello").await.unwrap());
    }
}
