use eyre::{bail, Result as EyreResult};
use mesh_harness::HarnessError;
use serde::{Deserialize, Serialize};

use crate::driver::{ScenarioContext, Test};

mod messages;
mod network;
mod routers;
mod transmits;

use messages::{ReceivesAckStep, ReceivesBackStep, ReceivesStep, RouteStep, SendStep};
use network::{NodeDownStep, SimulateStep, TimeStep, TimeoutStep};
use routers::RouterAliveStep;
use transmits::{BroadcastedStep, BroadcastsStep, TransmitsStep};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestScenario {
    pub steps: Box<[TestStep]>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStep {
    Simulate(SimulateStep),
    Time(TimeStep),
    Timeout(TimeoutStep),
    NodeDown(NodeDownStep),
    RouterAlive(RouterAliveStep),
    EveryRouterAlive,
    TopologyDiscovered,
    Send(SendStep),
    ReceivesAck(ReceivesAckStep),
    Receives(ReceivesStep),
    ReceivesBack(ReceivesBackStep),
    Route(RouteStep),
    Broadcasts(BroadcastsStep),
    Transmits(TransmitsStep),
    Broadcasted(BroadcastedStep),
    /// Passes only if the inner step fails because what it waits for did
    /// not happen.
    Not(Box<TestStep>),
}

impl Test for TestStep {
    fn display_name(&self) -> String {
        match self {
            Self::Simulate(step) => step.display_name(),
            Self::Time(step) => step.display_name(),
            Self::Timeout(step) => step.display_name(),
            Self::NodeDown(step) => step.display_name(),
            Self::RouterAlive(step) => step.display_name(),
            Self::EveryRouterAlive => "every router is alive".to_owned(),
            Self::TopologyDiscovered => "topology is discovered".to_owned(),
            Self::Send(step) => step.display_name(),
            Self::ReceivesAck(step) => step.display_name(),
            Self::Receives(step) => step.display_name(),
            Self::ReceivesBack(step) => step.display_name(),
            Self::Route(step) => step.display_name(),
            Self::Broadcasts(step) => step.display_name(),
            Self::Transmits(step) => step.display_name(),
            Self::Broadcasted(step) => step.display_name(),
            Self::Not(step) => format!("not ({})", step.display_name()),
        }
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        match self {
            Self::Simulate(step) => step.run_assert(ctx).await,
            Self::Time(step) => step.run_assert(ctx).await,
            Self::Timeout(step) => step.run_assert(ctx).await,
            Self::NodeDown(step) => step.run_assert(ctx).await,
            Self::RouterAlive(step) => step.run_assert(ctx).await,
            Self::EveryRouterAlive => Ok(ctx.harness.start_every_router().await?),
            Self::TopologyDiscovered => Ok(ctx.harness.wait_topology_discovered().await?),
            Self::Send(step) => step.run_assert(ctx).await,
            Self::ReceivesAck(step) => step.run_assert(ctx).await,
            Self::Receives(step) => step.run_assert(ctx).await,
            Self::ReceivesBack(step) => step.run_assert(ctx).await,
            Self::Route(step) => step.run_assert(ctx).await,
            Self::Broadcasts(step) => step.run_assert(ctx).await,
            Self::Transmits(step) => step.run_assert(ctx).await,
            Self::Broadcasted(step) => step.run_assert(ctx).await,
            Self::Not(step) => {
                let Err(err) = Box::pin(step.run_assert(ctx)).await else {
                    bail!("Somehow '{}' succeeded", step.display_name());
                };

                match err.downcast_ref::<HarnessError>() {
                    Some(cause) if cause.is_negative_outcome() => {
                        ctx.output_writer
                            .write_str(&format!("Failed as expected: {cause}"));
                        Ok(())
                    }
                    _ => Err(err),
                }
            }
        }
    }
}
