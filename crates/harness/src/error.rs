use std::io;

use thiserror::Error;

use crate::address::Address;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// A router never printed its ready line.
    #[error("Could not start router '{router}'")]
    StartupFailure { router: String },

    #[error("{message}")]
    SyncTimeout { message: String },

    #[error("Different route - {}", hops.join(", "))]
    RouteMismatch { hops: Vec<String> },

    #[error("Unknown packet type '{0}'")]
    UnrecognizedPacketType(String),

    #[error("Invalid route template '{template}': {reason}")]
    InvalidRouteTemplate { template: String, reason: String },

    #[error("Invalid data pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Unknown router '{0}'")]
    UnknownRouter(String),

    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("No router with address {0}")]
    UnknownAddress(Address),

    #[error("Router '{0}' was already spawned")]
    DuplicateRouter(String),

    #[error("Node '{0}' has no device path yet")]
    MissingDevice(String),

    #[error("Every router address is already in use")]
    AddressSpaceExhausted,

    #[error("No network is simulated")]
    NoSimulation,

    #[error("Transmission feed was already taken")]
    FeedTaken,

    #[error("Failed to spawn router '{router}'")]
    Spawn {
        router: String,
        #[source]
        source: io::Error,
    },

    #[error("Message bus error")]
    Bus(#[source] BoxedError),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn bus<E>(err: E) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::Bus(err.into())
    }

    /// Whether the failure means "the expected thing did not happen", as
    /// opposed to a malformed step or a broken environment.
    #[must_use]
    pub const fn is_negative_outcome(&self) -> bool {
        matches!(
            self,
            Self::SyncTimeout { .. } | Self::StartupFailure { .. } | Self::RouteMismatch { .. }
        )
    }
}

impl From<redis::RedisError> for HarnessError {
    fn from(err: redis::RedisError) -> Self {
        Self::bus(err)
    }
}
