use core::time::Duration;
use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::bus::RedisBroker;
use crate::error::HarnessError;
use crate::wait::{WaitOptions, DEFAULT_DELAY, DEFAULT_TIMEOUT};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    pub router: RouterConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    /// Router output goes to `<logs_dir>/<name>.router.log` when set.
    #[serde(default)]
    pub logs_dir: Option<Utf8PathBuf>,
}

impl HarnessConfig {
    #[must_use]
    pub fn new(router: RouterConfig) -> Self {
        Self {
            router,
            bus: BusConfig::default(),
            wait: WaitConfig::default(),
            logs_dir: None,
        }
    }

    pub async fn load(path: &Utf8Path) -> Result<Self, HarnessError> {
        let bytes = tokio::fs::read(path).await?;

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub binary: Utf8PathBuf,
    /// Exported as both `LD_LIBRARY_PATH` and `DYLD_LIBRARY_PATH`.
    #[serde(default)]
    pub library_paths: Vec<Utf8PathBuf>,
    /// Extra variables, applied after the ones the harness sets.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RouterConfig {
    #[must_use]
    pub fn new(binary: Utf8PathBuf) -> Self {
        Self {
            binary,
            library_paths: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    pub url: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: crate::bus::REDIS_URL.to_owned(),
        }
    }
}

impl BusConfig {
    pub async fn connect(&self) -> Result<RedisBroker, HarnessError> {
        RedisBroker::connect(&self.url).await
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitConfig {
    pub timeout_ms: u64,
    pub delay_ms: u64,
    /// Bound for bringing up every router at once.
    pub fleet_startup_timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: duration_ms(DEFAULT_TIMEOUT),
            delay_ms: duration_ms(DEFAULT_DELAY),
            fleet_startup_timeout_ms: 10_000,
        }
    }
}

impl WaitConfig {
    #[must_use]
    pub const fn options(&self) -> WaitOptions {
        WaitOptions::new(Duration::from_millis(self.timeout_ms))
            .with_delay(Duration::from_millis(self.delay_ms))
    }

    #[must_use]
    pub const fn fleet_startup(&self) -> WaitOptions {
        WaitOptions::new(Duration::from_millis(self.fleet_startup_timeout_ms))
            .with_delay(Duration::from_millis(self.delay_ms))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
