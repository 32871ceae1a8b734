//! End-to-end harness for mesh router firmware.
//!
//! Spawns one firmware process per simulated node, follows their output and
//! their pub/sub traffic, and turns both into per-router state that scenario
//! steps poll through [`TestContext`].

pub mod address;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod frames;
pub mod log;
pub mod simulator;
pub mod state;
pub mod supervisor;
pub mod topology;
pub mod wait;

pub use address::Address;
pub use config::HarnessConfig;
pub use context::TestContext;
pub use error::HarnessError;
