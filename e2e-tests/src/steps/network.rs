use core::time::Duration;
use std::sync::Arc;

use eyre::Result as EyreResult;
use mesh_harness::simulator::FixtureNetwork;
use serde::{Deserialize, Serialize};

use crate::driver::{ScenarioContext, Test};

/// Loads `<network>.network.json` (and the environment, if named) from the
/// fixtures directory and waits for every node's device.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateStep {
    pub network: String,
    #[serde(default)]
    pub environment: Option<String>,
}

impl Test for SimulateStep {
    fn display_name(&self) -> String {
        match &self.environment {
            Some(environment) => format!(
                "simulation of {} network in {environment} environment",
                self.network
            ),
            None => format!("simulation of {} network", self.network),
        }
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        let network = FixtureNetwork::load(
            ctx.fixtures_dir,
            &self.network,
            self.environment.as_deref(),
        )
        .await?;

        ctx.harness.attach_simulator(Arc::new(network))?;
        ctx.harness.wait_for_network().await?;

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStep {
    pub at: u64,
}

impl Test for TimeStep {
    fn display_name(&self) -> String {
        format!("time is {}", self.at)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        ctx.harness.set_time(self.at)?;

        Ok(())
    }
}

/// Default timeout of every later wait in the scenario.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutStep {
    pub duration_ms: u64,
}

impl Test for TimeoutStep {
    fn display_name(&self) -> String {
        format!("timeout is {} ms", self.duration_ms)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        ctx.harness
            .set_default_timeout(Duration::from_millis(self.duration_ms));

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDownStep {
    pub node: String,
}

impl Test for NodeDownStep {
    fn display_name(&self) -> String {
        format!("node {} is down", self.node)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        ctx.harness.power_down(&self.node)?;

        Ok(())
    }
}
