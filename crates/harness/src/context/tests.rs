//! Scenario-level tests against fake router executables.
//!
//! Router processes are small shell scripts printing the control lines the
//! firmware prints. Radio forwarding between routers is played by an
//! in-test relay on the in-memory broker.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use camino::Utf8PathBuf;
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::time::Instant;

use super::*;
use crate::address::Address;
use crate::bus::{Endpoint, MemoryBroker, Topic};
use crate::config::{RouterConfig, WaitConfig};
use crate::simulator::{EnvironmentFixture, FixtureNetwork, NetworkFixture, NodeFixture};

const CONVERGED: &str = "echo ROUTER RUN\necho EDGE 1 2\necho '  EDGE 2 3'\nexec sleep 30";

struct Harness {
    ctx: TestContext,
    broker: MemoryBroker,
    network: Arc<FixtureNetwork>,
    _dir: TempDir,
}

fn addr(value: u8) -> Address {
    Address::new(value).unwrap()
}

/// Nodes `a`, `b`, `c` in a line.
fn line_network() -> FixtureNetwork {
    let nodes = ["a", "b", "c"]
        .iter()
        .enumerate()
        .map(|(i, name)| NodeFixture {
            name: (*name).to_owned(),
            tty: Some(format!("/dev/pts/{}", i + 10).into()),
        })
        .collect();

    let network = NetworkFixture {
        nodes,
        links: vec![
            ("a".to_owned(), "b".to_owned()),
            ("b".to_owned(), "c".to_owned()),
        ],
    };

    FixtureNetwork::new(network, EnvironmentFixture::default()).unwrap()
}

fn harness(script: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("router");
    fs::write(&binary, format!("#!/bin/sh\n{script}\n")).unwrap();
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = HarnessConfig::new(RouterConfig::new(
        Utf8PathBuf::from_path_buf(binary).unwrap(),
    ));
    config.wait = WaitConfig {
        timeout_ms: 1_000,
        delay_ms: 20,
        fleet_startup_timeout_ms: 5_000,
    };

    let broker = MemoryBroker::new();
    let network = Arc::new(line_network());

    let simulator: Arc<dyn PhysicalLayer> = network.clone();

    let mut ctx = TestContext::new(config, Arc::new(broker.clone()));
    ctx.attach_simulator(simulator).unwrap();

    Harness {
        ctx,
        broker,
        network,
        _dir: dir,
    }
}

/// Plays the radio for `address`: forwards its outbound frames to the
/// destination if that one is reachable, bounces them back otherwise.
async fn relay(broker: &MemoryBroker, address: Address, reachable: Vec<Address>) -> JoinHandle<()> {
    let mut outbound = broker
        .psubscribe(&format!("{address}/network:*:*:self"))
        .await
        .unwrap();
    let broker = broker.clone();

    tokio::spawn(async move {
        while let Some(message) = outbound.next().await {
            let topic = Topic::parse(&message.topic).unwrap();
            let Endpoint::Remote(destination) = topic.destination else {
                continue;
            };

            let channel = if reachable.contains(&destination) {
                format!("{destination}/network:{}:self:{address}", topic.port)
            } else {
                format!("{address}/undelivered:{}:{destination}:self", topic.port)
            };

            let _receivers = broker.publish(&channel, &message.payload).await.unwrap();
        }
    })
}

fn data_frame(destination: u8, source: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x01, destination, source, 0x01, DEFAULT_PORT, 0x00];
    frame.extend_from_slice(payload);
    frame
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_router_alive_with_sequential_addresses() {
    let mut h = harness(CONVERGED);

    h.ctx.start_every_router().await.unwrap();

    for (name, address) in [("a", 1), ("b", 2), ("c", 3)] {
        let router = h.ctx.router(name).unwrap();
        let router = router.read();
        assert_eq!(router.address, addr(address));
        assert!(router.is_alive(), "{name} is not alive");
    }

    // already spawned routers are left alone
    h.ctx.start_every_router().await.unwrap();
    assert!(matches!(
        h.ctx.spawn_router("a").await,
        Err(HarnessError::DuplicateRouter(_))
    ));

    let report = h.ctx.teardown().await;
    assert_eq!(report.routers.len(), 3);
    assert_eq!(report.warnings().count(), 0);
    assert_eq!(h.broker.subscriber_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_router_without_ready_signal_fails_to_start() {
    let mut h = harness("echo booting\nexec sleep 30");

    let err = h.ctx.start_router("b").await.unwrap_err();

    assert!(matches!(err, HarnessError::StartupFailure { router } if router == "b"));

    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_topology_discovered() {
    let mut h = harness(CONVERGED);

    h.ctx.start_every_router().await.unwrap();
    h.ctx.wait_topology_discovered().await.unwrap();

    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_topology_not_discovered_while_a_router_differs() {
    let mut h = harness(
        "echo ROUTER RUN\necho EDGE 1 2\n[ \"$2\" = 3 ] || echo EDGE 2 3\nexec sleep 30",
    );

    h.ctx.start_every_router().await.unwrap();
    let err = h.ctx.wait_topology_discovered().await.unwrap_err();

    assert!(
        matches!(&err, HarnessError::SyncTimeout { message } if message == "Topology not discovered")
    );

    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_topology_follows_powered_down_node() {
    let mut h = harness("echo ROUTER RUN\necho EDGE 1 2\nexec sleep 30");

    h.ctx.start_every_router().await.unwrap();
    assert!(h.ctx.wait_topology_discovered().await.is_err());

    h.ctx.power_down("c").unwrap();
    h.ctx.wait_topology_discovered().await.unwrap();

    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_message_delivered_end_to_end() {
    let mut h = harness(CONVERGED);
    h.ctx.start_every_router().await.unwrap();
    let relay = relay(&h.broker, addr(1), vec![addr(2), addr(3)]).await;

    // picked up by the relay standing in for a's firmware
    assert!(h.ctx.send_message("a", "b", b"hello").await.unwrap());

    h.ctx.wait_for_message("b", "a", 15, b"hello").await.unwrap();
    assert!(h.ctx.wait_for_message("c", "a", 15, b"hello").await.is_err());

    relay.abort();
    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_message_not_received_without_forwarding() {
    let mut h = harness(CONVERGED);
    h.ctx.start_every_router().await.unwrap();

    assert!(!h.ctx.send_message("a", "b", b"hello").await.unwrap());
    let err = h.ctx.wait_for_message("b", "a", 15, b"hello").await.unwrap_err();

    assert_eq!(err.to_string(), "Message not received within time");

    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_message_bounces_back() {
    let mut h = harness(CONVERGED);
    h.ctx.start_every_router().await.unwrap();
    let relay = relay(&h.broker, addr(1), vec![addr(2)]).await;

    let _sent = h.ctx.send_message("a", "c", b"lost").await.unwrap();

    h.ctx.wait_for_undelivered("a", b"lost").await.unwrap();
    assert!(h.ctx.wait_for_undelivered("b", b"lost").await.is_err());

    relay.abort();
    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transmission_feed() {
    let mut h = harness(CONVERGED);
    h.ctx.start_every_router().await.unwrap();
    let air = h.network.transmitter();

    let _sent = h.ctx.send_message("a", "c", b"hello").await.unwrap();

    for (source, destination, frame) in [
        ("a", Some("b"), data_frame(3, 1, b"hello")),
        ("b", Some("c"), data_frame(3, 1, b"hello")),
        ("c", Some("a"), vec![0x03, 0x01, 0x03, 0x01, 0x03, 0x00]),
        ("b", None, vec![0xFE, 0x02]),
        ("c", None, vec![0xFB, 0x01, 0x02, 0x02, 0x03]),
    ] {
        air.send(Transmission {
            source: source.to_owned(),
            destination: destination.map(str::to_owned),
            frame,
        })
        .unwrap();
    }

    h.ctx.wait_for_ack("a", "c").await.unwrap();
    h.ctx.wait_for_data("a", Some("b"), "01 TT SS").await.unwrap_err();
    h.ctx.wait_for_data("a", Some("b"), "01 03 SS").await.unwrap();
    h.ctx.wait_for_broadcast("node", "b").await.unwrap();
    h.ctx.wait_for_broadcast("graph", "c").await.unwrap();
    assert!(h.ctx.wait_for_broadcast("node", "a").await.is_err());

    h.ctx
        .assert_route(b"hello", &RouteTemplate::parse("a, [b, d], c").unwrap())
        .unwrap();

    let err = h
        .ctx
        .assert_route(b"hello", &RouteTemplate::parse("a, c").unwrap())
        .unwrap_err();
    assert!(matches!(err, HarnessError::RouteMismatch { hops } if hops == ["a", "b", "c"]));

    let _report = h.ctx.teardown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_packet_type_fails_without_waiting() {
    let mut h = harness(CONVERGED);
    h.ctx.start_router("a").await.unwrap();

    let start = Instant::now();
    let err = h.ctx.wait_for_broadcast("mesh", "a").await.unwrap_err();

    assert!(matches!(err, HarnessError::UnrecognizedPacketType(kind) if kind == "mesh"));
    assert!(start.elapsed() < h.ctx.wait_options().delay);

    let _report = h.ctx.teardown().await;
}

#[tokio::test]
async fn test_operations_need_a_simulation() {
    let config = HarnessConfig::new(RouterConfig::new("bin/router".into()));
    let mut ctx = TestContext::new(config, Arc::new(MemoryBroker::new()));

    assert!(matches!(ctx.start_router("a").await, Err(HarnessError::NoSimulation)));
    assert!(matches!(ctx.set_time(3), Err(HarnessError::NoSimulation)));
    assert!(matches!(
        ctx.wait_for_ack("a", "b").await,
        Err(HarnessError::UnknownRouter(_))
    ));

    ctx.set_default_timeout(Duration::from_secs(1));
    assert_eq!(ctx.wait_options().timeout, Duration::from_secs(1));

    let report = ctx.teardown().await;
    assert!(report.routers.is_empty());
}
