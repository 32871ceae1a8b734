//! Everything one scenario needs, created fresh at its start.
//!
//! Holds the routers spawned so far, the payloads tracked across the network,
//! the simulator handle and the default wait timeout. Every assertion is a
//! predicate over router state handed to [`wait_or_fail`].

use core::time::Duration;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{self, Broker, DEFAULT_PORT};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::frames::{DataPattern, FrameKind, PacketKind};
use crate::simulator::{PhysicalLayer, Transmission};
use crate::state::{
    Directory, Message, MessageTable, RouterEntry, SharedDirectory, SharedMessageTable,
    SharedRouterState, Transmit,
};
use crate::supervisor::{ProcessSupervisor, TeardownReport};
use crate::topology::{expected_topology, RouteTemplate};
use crate::wait::{wait_or_fail, WaitOptions};

pub struct TestContext {
    wait: WaitOptions,
    fleet_startup: WaitOptions,
    broker: Arc<dyn Broker>,
    directory: SharedDirectory,
    messages: SharedMessageTable,
    supervisor: ProcessSupervisor,
    simulator: Option<Arc<dyn PhysicalLayer>>,
    feed: Option<Feed>,
}

struct Feed {
    cancel: CancellationToken,
    task: JoinHandle<usize>,
}

impl core::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TestContext")
            .field("wait", &self.wait)
            .field("routers", &self.directory.read().len())
            .field("simulator", &self.simulator)
            .finish_non_exhaustive()
    }
}

impl TestContext {
    pub fn new(config: HarnessConfig, broker: Arc<dyn Broker>) -> Self {
        let directory = Directory::shared();

        let supervisor = ProcessSupervisor::new(
            config.router,
            config.logs_dir,
            Arc::clone(&broker),
            Arc::clone(&directory),
        );

        Self {
            wait: config.wait.options(),
            fleet_startup: config.wait.fleet_startup(),
            broker,
            directory,
            messages: MessageTable::shared(),
            supervisor,
            simulator: None,
            feed: None,
        }
    }

    /// Uses `simulator` for this scenario and starts consuming its
    /// transmission feed.
    pub fn attach_simulator(&mut self, simulator: Arc<dyn PhysicalLayer>) -> Result<(), HarnessError> {
        let transmissions = simulator
            .take_transmissions()
            .ok_or(HarnessError::FeedTaken)?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consume_transmissions(
            transmissions,
            Arc::clone(&self.directory),
            Arc::clone(&self.messages),
            cancel.clone(),
        ));

        if let Some(previous) = self.feed.replace(Feed { cancel, task }) {
            previous.cancel.cancel();
        }

        self.simulator = Some(simulator);

        Ok(())
    }

    pub fn simulator(&self) -> Result<&Arc<dyn PhysicalLayer>, HarnessError> {
        self.simulator.as_ref().ok_or(HarnessError::NoSimulation)
    }

    /// Waits until the simulator created a device for every node.
    pub async fn wait_for_network(&self) -> Result<(), HarnessError> {
        let simulator = self.simulator()?;

        wait_or_fail("Could not simulate network", self.wait, || {
            simulator
                .nodes()
                .iter()
                .all(|node| simulator.tty(node).is_some())
        })
        .await
    }

    pub fn set_time(&self, time: u64) -> Result<(), HarnessError> {
        self.simulator()?.set_time(time)
    }

    pub fn power_down(&self, node: &str) -> Result<(), HarnessError> {
        self.simulator()?.power_down(node)
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.wait.timeout = timeout;
    }

    #[must_use]
    pub const fn wait_options(&self) -> WaitOptions {
        self.wait
    }

    pub fn router(&self, name: &str) -> Result<SharedRouterState, HarnessError> {
        Ok(Arc::clone(&self.directory.read().entry(name)?.state))
    }

    #[must_use]
    pub fn message(&self, payload: &[u8]) -> Option<Message> {
        self.messages.read().get(payload).cloned()
    }

    pub async fn spawn_router(&mut self, name: &str) -> Result<RouterEntry, HarnessError> {
        let device = self
            .simulator()?
            .tty(name)
            .ok_or_else(|| HarnessError::MissingDevice(name.to_owned()))?;

        self.supervisor.spawn(name, &device).await
    }

    /// Spawns `name` and waits for its ready signal.
    pub async fn start_router(&mut self, name: &str) -> Result<(), HarnessError> {
        let entry = self.spawn_router(name).await?;

        wait_or_fail("Could not start router", self.wait, || {
            entry.state.read().is_alive()
        })
        .await
        .map_err(|_| HarnessError::StartupFailure {
            router: name.to_owned(),
        })
    }

    /// Spawns a router for every simulated node not spawned yet and waits
    /// for the whole fleet to become ready.
    pub async fn start_every_router(&mut self) -> Result<(), HarnessError> {
        let nodes = self.simulator()?.nodes();

        for node in nodes {
            if self.directory.read().get(&node).is_some() {
                continue;
            }

            let _entry = self.spawn_router(&node).await?;
        }

        let directory = Arc::clone(&self.directory);

        wait_or_fail("Could not start every router", self.fleet_startup, || {
            directory.read().all_alive()
        })
        .await
        .map_err(|_| HarnessError::StartupFailure {
            router: self.not_alive().join(", "),
        })
    }

    fn not_alive(&self) -> Vec<String> {
        self.directory
            .read()
            .entries()
            .filter(|(_, entry)| !entry.state.read().is_alive())
            .map(|(name, _)| name.to_owned())
            .collect()
    }

    /// Waits until every router discovered exactly the adjacency the
    /// simulator produces right now.
    pub async fn wait_topology_discovered(&self) -> Result<(), HarnessError> {
        let adjacency = self.simulator()?.adjacency();
        let expected = expected_topology(&adjacency, &self.directory.read())?;

        debug!(?expected, "Waiting for topology");

        let routers: Vec<SharedRouterState> = self
            .directory
            .read()
            .entries()
            .map(|(_, entry)| Arc::clone(&entry.state))
            .collect();

        wait_or_fail("Topology not discovered", self.wait, || {
            routers
                .iter()
                .all(|router| router.read().topology == expected)
        })
        .await
    }

    /// Injects `payload` from `source` to `destination` on the default port.
    pub async fn send_message(
        &self,
        source: &str,
        destination: &str,
        payload: &[u8],
    ) -> Result<bool, HarnessError> {
        self.send_message_on(source, destination, DEFAULT_PORT, payload)
            .await
    }

    pub async fn send_message_on(
        &self,
        source: &str,
        destination: &str,
        port: u8,
        payload: &[u8],
    ) -> Result<bool, HarnessError> {
        let (source_address, destination_address) = {
            let directory = self.directory.read();
            (directory.address_of(source)?, directory.address_of(destination)?)
        };

        self.messages.write().record_hop(payload, source);

        bus::send(
            self.broker.as_ref(),
            source_address,
            destination_address,
            port,
            payload,
        )
        .await
    }

    pub async fn wait_for_ack(&self, router: &str, from: &str) -> Result<(), HarnessError> {
        let state = self.router(router)?;

        wait_or_fail("Acknowledge not received within time", self.wait, || {
            state.read().has_ack_from(from)
        })
        .await
    }

    pub async fn wait_for_message(
        &self,
        router: &str,
        from: &str,
        port: u8,
        payload: &[u8],
    ) -> Result<(), HarnessError> {
        let state = self.router(router)?;

        wait_or_fail("Message not received within time", self.wait, || {
            state.read().has_message(from, port, payload)
        })
        .await
    }

    pub async fn wait_for_undelivered(&self, router: &str, payload: &[u8]) -> Result<(), HarnessError> {
        let state = self.router(router)?;

        wait_or_fail("Message not received back within time", self.wait, || {
            state.read().has_undelivered(payload)
        })
        .await
    }

    /// Checks the hops recorded for `payload` against `template`.
    pub fn assert_route(&self, payload: &[u8], template: &RouteTemplate) -> Result<(), HarnessError> {
        let hops = self.message(payload).map(|m| m.hops).unwrap_or_default();

        if template.matches(&hops) {
            Ok(())
        } else {
            Err(HarnessError::RouteMismatch { hops })
        }
    }

    /// Waits for `source` to transmit a frame matching `pattern`, to
    /// `destination` or, when that is `None`, to anyone.
    pub async fn wait_for_data(
        &self,
        source: &str,
        destination: Option<&str>,
        pattern: &str,
    ) -> Result<(), HarnessError> {
        let (state, pattern) = {
            let directory = self.directory.read();
            let entry = directory.entry(source)?;
            let destination = destination.and_then(|d| directory.address_of(d).ok());

            (
                Arc::clone(&entry.state),
                DataPattern::compile(pattern, entry.address, destination)?,
            )
        };

        wait_or_fail("Data not sent within time", self.wait, || {
            state.read().transmits.iter().any(|transmit| {
                (destination.is_none() || transmit.destination.as_deref() == destination)
                    && pattern.matches(&transmit.frame)
            })
        })
        .await
    }

    /// Waits for `node` to broadcast a packet of `kind`.
    ///
    /// An unknown kind fails right away.
    pub async fn wait_for_broadcast(&self, kind: &str, node: &str) -> Result<(), HarnessError> {
        let kind: PacketKind = kind.parse()?;

        self.wait_for_data(node, None, kind.pattern()).await
    }

    /// Kills every router and joins every background task.
    pub async fn teardown(mut self) -> TeardownReport {
        if let Some(feed) = self.feed.take() {
            feed.cancel.cancel();
            match feed.task.await {
                Ok(count) => debug!(count, "Transmission feed stopped"),
                Err(err) => warn!(%err, "Transmission feed failed"),
            }
        }

        let report = self.supervisor.kill_all().await;

        info!(
            routers = report.routers.len(),
            warnings = report.warnings().count(),
            "Scenario torn down"
        );

        report
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(feed) = &self.feed {
            feed.cancel.cancel();
        }
    }
}

async fn consume_transmissions(
    mut transmissions: mpsc::UnboundedReceiver<Transmission>,
    directory: SharedDirectory,
    messages: SharedMessageTable,
    cancel: CancellationToken,
) -> usize {
    let mut count: usize = 0;

    loop {
        let transmission = tokio::select! {
            () = cancel.cancelled() => break,
            transmission = transmissions.recv() => transmission,
        };

        let Some(transmission) = transmission else {
            break;
        };

        record_transmission(&directory.read(), &messages, transmission);
        count = count.saturating_add(1);
    }

    count
}

fn record_transmission(
    directory: &Directory,
    messages: &SharedMessageTable,
    transmission: Transmission,
) {
    let Transmission {
        source,
        destination,
        frame,
    } = transmission;

    match FrameKind::of(&frame) {
        FrameKind::Data { payload } => {
            if let Some(destination) = &destination {
                messages.write().record_hop(payload, destination);
            }
        }
        FrameKind::Ack => {
            if let Some(router) = destination.as_deref().and_then(|d| directory.get(d)) {
                router.state.write().acks.push(source.clone());
            }
        }
        FrameKind::Other => {}
    }

    match directory.get(&source) {
        Some(router) => router
            .state
            .write()
            .transmits
            .push(Transmit { destination, frame }),
        None => debug!(%source, "Transmission from a node without router"),
    }
}

#[cfg(test)]
mod tests;
