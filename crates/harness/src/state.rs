//! Per-router records written by the background tasks and read by waits.
//!
//! Background tasks only ever append to (or set) a field under the router's
//! lock; the scenario flow only reads. A reader that observes a record
//! mid-update simply polls again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::address::{Address, AddressAllocator};
use crate::error::HarnessError;

pub type SharedRouterState = Arc<RwLock<RouterState>>;
pub type SharedDirectory = Arc<RwLock<Directory>>;
pub type SharedMessageTable = Arc<RwLock<MessageTable>>;

/// Discovered or expected adjacency, neighbour lists kept sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology(BTreeMap<Address, Vec<Address>>);

impl Topology {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Records `a <-> b`. Re-adding a known edge changes nothing.
    pub fn insert_edge(&mut self, a: Address, b: Address) {
        self.insert_neighbour(a, b);
        self.insert_neighbour(b, a);
    }

    fn insert_neighbour(&mut self, node: Address, neighbour: Address) {
        let neighbours = self.0.entry(node).or_default();
        if let Err(at) = neighbours.binary_search(&neighbour) {
            neighbours.insert(at, neighbour);
        }
    }

    #[must_use]
    pub fn neighbours(&self, node: Address) -> &[Address] {
        self.0.get(&node).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Vec<Address>)> {
        self.0.iter()
    }
}

impl FromIterator<(Address, Address)> for Topology {
    fn from_iter<I: IntoIterator<Item = (Address, Address)>>(iter: I) -> Self {
        let mut topology = Self::new();
        for (a, b) in iter {
            topology.insert_edge(a, b);
        }
        topology
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub source: String,
    pub port: u8,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transmit {
    /// `None` for a broadcast.
    pub destination: Option<String>,
    pub frame: Vec<u8>,
}

#[derive(Debug)]
pub struct RouterState {
    pub name: String,
    pub address: Address,
    alive: bool,
    pub topology: Topology,
    pub messages: Vec<ReceivedMessage>,
    pub transmits: Vec<Transmit>,
    pub acks: Vec<String>,
    pub undelivered: Vec<Vec<u8>>,
}

impl RouterState {
    #[must_use]
    pub const fn new(name: String, address: Address) -> Self {
        Self {
            name,
            address,
            alive: false,
            topology: Topology::new(),
            messages: Vec::new(),
            transmits: Vec::new(),
            acks: Vec::new(),
            undelivered: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// One-way: a router never goes back to not alive.
    pub fn mark_alive(&mut self) {
        self.alive = true;
    }

    #[must_use]
    pub fn has_message(&self, source: &str, port: u8, payload: &[u8]) -> bool {
        self.messages
            .iter()
            .any(|m| m.source == source && m.port == port && m.payload == payload)
    }

    #[must_use]
    pub fn has_ack_from(&self, source: &str) -> bool {
        self.acks.iter().any(|a| a == source)
    }

    #[must_use]
    pub fn has_undelivered(&self, payload: &[u8]) -> bool {
        self.undelivered.iter().any(|p| p == payload)
    }
}

#[derive(Clone, Debug)]
pub struct RouterEntry {
    pub address: Address,
    pub state: SharedRouterState,
}

/// Every router known to one test context, by name and by address.
#[derive(Debug, Default)]
pub struct Directory {
    allocator: AddressAllocator,
    by_name: HashMap<String, RouterEntry>,
    by_address: BTreeMap<Address, String>,
}

impl Directory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> SharedDirectory {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Allocates the next address for `name`.
    pub fn register(&mut self, name: &str) -> Result<RouterEntry, HarnessError> {
        if self.by_name.contains_key(name) {
            return Err(HarnessError::DuplicateRouter(name.to_owned()));
        }

        let address = self
            .allocator
            .next()
            .ok_or(HarnessError::AddressSpaceExhausted)?;

        let entry = RouterEntry {
            address,
            state: Arc::new(RwLock::new(RouterState::new(name.to_owned(), address))),
        };

        drop(self.by_name.insert(name.to_owned(), entry.clone()));
        drop(self.by_address.insert(address, name.to_owned()));

        Ok(entry)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RouterEntry> {
        self.by_name.get(name)
    }

    pub fn entry(&self, name: &str) -> Result<&RouterEntry, HarnessError> {
        self.get(name)
            .ok_or_else(|| HarnessError::UnknownRouter(name.to_owned()))
    }

    pub fn address_of(&self, name: &str) -> Result<Address, HarnessError> {
        self.entry(name).map(|entry| entry.address)
    }

    #[must_use]
    pub fn name_of(&self, address: Address) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Entries in address (spawn) order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RouterEntry)> {
        self.by_address
            .values()
            .filter_map(|name| Some((name.as_str(), self.by_name.get(name)?)))
    }

    #[must_use]
    pub fn all_alive(&self) -> bool {
        self.by_name.values().all(|entry| entry.state.read().is_alive())
    }
}

/// A payload tracked across the network: origin first, then each hop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub hops: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MessageTable {
    messages: HashMap<Vec<u8>, Message>,
}

impl MessageTable {
    #[must_use]
    pub fn shared() -> SharedMessageTable {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Appends a hop; hops are never reordered or deduplicated.
    pub fn record_hop(&mut self, payload: &[u8], router: &str) {
        self.messages
            .entry(payload.to_vec())
            .or_default()
            .hops
            .push(router.to_owned());
    }

    #[must_use]
    pub fn get(&self, payload: &[u8]) -> Option<&Message> {
        self.messages.get(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(value: u8) -> Address {
        Address::new(value).unwrap()
    }

    #[test]
    fn test_edge_insertion_is_idempotent() {
        let mut once = Topology::new();
        once.insert_edge(addr(1), addr(2));

        let mut twice = Topology::new();
        twice.insert_edge(addr(1), addr(2));
        twice.insert_edge(addr(1), addr(2));
        twice.insert_edge(addr(2), addr(1));

        assert_eq!(once, twice);
        assert_eq!(twice.neighbours(addr(1)), &[addr(2)]);
        assert_eq!(twice.neighbours(addr(2)), &[addr(1)]);
    }

    #[test]
    fn test_neighbours_stay_sorted() {
        let topology: Topology = [(addr(2), addr(5)), (addr(2), addr(1)), (addr(2), addr(3))]
            .into_iter()
            .collect();

        assert_eq!(topology.neighbours(addr(2)), &[addr(1), addr(3), addr(5)]);
        assert!(topology.neighbours(addr(4)).is_empty());
    }

    #[test]
    fn test_directory_assigns_addresses_in_spawn_order() {
        let mut directory = Directory::new();

        for name in ["alpha", "beta", "gamma"] {
            let _entry = directory.register(name).unwrap();
        }

        let order: Vec<(String, u8)> = directory
            .entries()
            .map(|(name, entry)| (name.to_owned(), entry.address.get()))
            .collect();

        assert_eq!(
            order,
            vec![
                ("alpha".to_owned(), 1),
                ("beta".to_owned(), 2),
                ("gamma".to_owned(), 3)
            ]
        );
        assert_eq!(directory.name_of(addr(2)), Some("beta"));
    }

    #[test]
    fn test_directory_rejects_duplicates_without_consuming_address() {
        let mut directory = Directory::new();
        let _alpha = directory.register("alpha").unwrap();

        let err = directory.register("alpha").unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateRouter(name) if name == "alpha"));

        let beta = directory.register("beta").unwrap();
        assert_eq!(beta.address, addr(2));
    }

    #[test]
    fn test_alive_is_one_way() {
        let mut state = RouterState::new("alpha".to_owned(), addr(1));
        assert!(!state.is_alive());

        state.mark_alive();
        state.mark_alive();

        assert!(state.is_alive());
    }

    #[test]
    fn test_message_hops_keep_order_and_duplicates() {
        let mut table = MessageTable::default();

        for hop in ["a", "b", "a", "c"] {
            table.record_hop(b"hello", hop);
        }

        assert_eq!(table.get(b"hello").unwrap().hops, vec!["a", "b", "a", "c"]);
        assert!(table.get(b"other").is_none());
    }
}
