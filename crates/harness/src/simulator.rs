//! Narrow interface to the physical-layer simulator.
//!
//! The simulator decides which frames reach which neighbours. The harness
//! only needs to know the nodes, their device paths, the current adjacency
//! and a feed of every frame put on the air.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::HarnessError;

/// A frame put on the air by `source`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transmission {
    pub source: String,
    /// `None` for a broadcast.
    pub destination: Option<String>,
    pub frame: Vec<u8>,
}

pub type Adjacency = BTreeMap<String, BTreeSet<String>>;

pub trait PhysicalLayer: core::fmt::Debug + Send + Sync {
    /// Node names, in the simulator's order.
    fn nodes(&self) -> Vec<String>;

    /// Device the router for `node` should open, once the simulator made it.
    fn tty(&self, node: &str) -> Option<Utf8PathBuf>;

    /// Which nodes currently hear which.
    fn adjacency(&self) -> Adjacency;

    fn set_time(&self, time: u64) -> Result<(), HarnessError>;

    /// Cuts the transmission power of `node` to zero.
    fn power_down(&self, node: &str) -> Result<(), HarnessError>;

    /// The transmission feed. Can be taken once.
    fn take_transmissions(&self) -> Option<mpsc::UnboundedReceiver<Transmission>>;
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFixture {
    pub nodes: Vec<NodeFixture>,
    #[serde(default)]
    pub links: Vec<(String, String)>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFixture {
    pub name: String,
    pub tty: Option<Utf8PathBuf>,
}

/// Nodes that are powered down from a given simulated time onwards.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFixture {
    #[serde(default)]
    pub time_points: BTreeMap<u64, TimePoint>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePoint {
    #[serde(default)]
    pub down: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct FixtureState {
    time: u64,
    down: BTreeSet<String>,
}

/// Static network described by fixture files.
///
/// Frames are not simulated; whoever drives the radio side pushes them
/// through [`FixtureNetwork::transmitter`].
#[derive(Debug)]
pub struct FixtureNetwork {
    network: NetworkFixture,
    environment: EnvironmentFixture,
    state: Mutex<FixtureState>,
    transmitter: mpsc::UnboundedSender<Transmission>,
    transmissions: Mutex<Option<mpsc::UnboundedReceiver<Transmission>>>,
}

impl FixtureNetwork {
    pub fn new(
        network: NetworkFixture,
        environment: EnvironmentFixture,
    ) -> Result<Self, HarnessError> {
        let names: BTreeSet<&str> = network.nodes.iter().map(|n| n.name.as_str()).collect();

        if names.len() != network.nodes.len() {
            return Err(HarnessError::Fixture("duplicate node name".to_owned()));
        }

        let referenced = network
            .links
            .iter()
            .flat_map(|(a, b)| [a, b])
            .chain(environment.time_points.values().flat_map(|p| &p.down));

        for name in referenced {
            if !names.contains(name.as_str()) {
                return Err(HarnessError::UnknownNode(name.clone()));
            }
        }

        let (transmitter, transmissions) = mpsc::unbounded_channel();

        let network = Self {
            network,
            environment,
            state: Mutex::default(),
            transmitter,
            transmissions: Mutex::new(Some(transmissions)),
        };

        network.set_time(0)?;

        Ok(network)
    }

    /// Loads `<dir>/<network>.network.json` and, if given,
    /// `<dir>/<environment>.environment.json`.
    pub async fn load(
        dir: &Utf8Path,
        network: &str,
        environment: Option<&str>,
    ) -> Result<Self, HarnessError> {
        let path = dir.join(format!("{network}.network.json"));
        let network: NetworkFixture = serde_json::from_slice(&tokio::fs::read(&path).await?)?;

        let environment = match environment {
            Some(name) => {
                let path = dir.join(format!("{name}.environment.json"));
                serde_json::from_slice(&tokio::fs::read(&path).await?)?
            }
            None => EnvironmentFixture::default(),
        };

        info!(%path, nodes = network.nodes.len(), "Loaded network fixture");

        Self::new(network, environment)
    }

    #[must_use]
    pub fn transmitter(&self) -> mpsc::UnboundedSender<Transmission> {
        self.transmitter.clone()
    }

    #[must_use]
    pub fn time(&self) -> u64 {
        self.state.lock().time
    }

    fn check_node(&self, node: &str) -> Result<(), HarnessError> {
        if self.network.nodes.iter().any(|n| n.name == node) {
            Ok(())
        } else {
            Err(HarnessError::UnknownNode(node.to_owned()))
        }
    }
}

impl PhysicalLayer for FixtureNetwork {
    fn nodes(&self) -> Vec<String> {
        self.network.nodes.iter().map(|n| n.name.clone()).collect()
    }

    fn tty(&self, node: &str) -> Option<Utf8PathBuf> {
        self.network
            .nodes
            .iter()
            .find(|n| n.name == node)
            .and_then(|n| n.tty.clone())
    }

    fn adjacency(&self) -> Adjacency {
        let state = self.state.lock();

        let mut adjacency: Adjacency = self
            .network
            .nodes
            .iter()
            .map(|n| (n.name.clone(), BTreeSet::new()))
            .collect();

        for (a, b) in &self.network.links {
            if a == b || state.down.contains(a) || state.down.contains(b) {
                continue;
            }

            for (node, neighbour) in [(a, b), (b, a)] {
                if let Some(neighbours) = adjacency.get_mut(node) {
                    let _ = neighbours.insert(neighbour.clone());
                }
            }
        }

        adjacency
    }

    fn set_time(&self, time: u64) -> Result<(), HarnessError> {
        let down = self
            .environment
            .time_points
            .range(..=time)
            .next_back()
            .map(|(_, point)| point.down.clone())
            .unwrap_or_default();

        let mut state = self.state.lock();
        state.time = time;
        state.down = down;

        Ok(())
    }

    fn power_down(&self, node: &str) -> Result<(), HarnessError> {
        self.check_node(node)?;

        let _ = self.state.lock().down.insert(node.to_owned());

        info!(%node, "Node powered down");

        Ok(())
    }

    fn take_transmissions(&self) -> Option<mpsc::UnboundedReceiver<Transmission>> {
        self.transmissions.lock().take()
    }
}
