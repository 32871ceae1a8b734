use eyre::Result as EyreResult;
use mesh_harness::bus::DEFAULT_PORT;
use mesh_harness::topology::RouteTemplate;
use serde::{Deserialize, Serialize};

use crate::driver::{ScenarioContext, Test};

const fn default_port() -> u8 {
    DEFAULT_PORT
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStep {
    pub from: String,
    pub to: String,
    pub payload: String,
    #[serde(default = "default_port")]
    pub port: u8,
}

impl Test for SendStep {
    fn display_name(&self) -> String {
        format!("{} sends to {} message {:?}", self.from, self.to, self.payload)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        let heard = ctx
            .harness
            .send_message_on(&self.from, &self.to, self.port, self.payload.as_bytes())
            .await?;

        if !heard {
            ctx.output_writer
                .write_str(&format!("Nobody was subscribed for {}", self.from));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivesAckStep {
    pub router: String,
    pub from: String,
}

impl Test for ReceivesAckStep {
    fn display_name(&self) -> String {
        format!("{} receives acknowledge from {}", self.router, self.from)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        Ok(ctx.harness.wait_for_ack(&self.router, &self.from).await?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivesStep {
    pub router: String,
    pub from: String,
    pub payload: String,
    #[serde(default = "default_port")]
    pub port: u8,
}

impl Test for ReceivesStep {
    fn display_name(&self) -> String {
        format!(
            "{} receives from {} message {:?}",
            self.router, self.from, self.payload
        )
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        Ok(ctx
            .harness
            .wait_for_message(&self.router, &self.from, self.port, self.payload.as_bytes())
            .await?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivesBackStep {
    pub router: String,
    pub payload: String,
}

impl Test for ReceivesBackStep {
    fn display_name(&self) -> String {
        format!("{} receives back message {:?}", self.router, self.payload)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        Ok(ctx
            .harness
            .wait_for_undelivered(&self.router, self.payload.as_bytes())
            .await?)
    }
}

/// `hops` uses the route notation, e.g. `a, [b, c], d`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    pub payload: String,
    pub hops: String,
}

impl Test for RouteStep {
    fn display_name(&self) -> String {
        format!("{:?} route is {}", self.payload, self.hops)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        let template = RouteTemplate::parse(&self.hops)?;

        Ok(ctx.harness.assert_route(self.payload.as_bytes(), &template)?)
    }
}
