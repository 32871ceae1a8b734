use eyre::Result as EyreResult;
use serde::{Deserialize, Serialize};

use crate::driver::{ScenarioContext, Test};

/// `node` put a frame starting with `data` on the air, to anyone.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastsStep {
    pub node: String,
    pub data: String,
}

impl Test for BroadcastsStep {
    fn display_name(&self) -> String {
        format!("{} broadcasts data {}", self.node, self.data)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        Ok(ctx.harness.wait_for_data(&self.node, None, &self.data).await?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmitsStep {
    pub from: String,
    pub to: String,
    pub data: String,
}

impl Test for TransmitsStep {
    fn display_name(&self) -> String {
        format!("{} transmits to {} data {}", self.from, self.to, self.data)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        Ok(ctx
            .harness
            .wait_for_data(&self.from, Some(self.to.as_str()), &self.data)
            .await?)
    }
}

/// `kind` is `node` or `graph`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastedStep {
    pub kind: String,
    pub node: String,
}

impl Test for BroadcastedStep {
    fn display_name(&self) -> String {
        format!("{} is broadcasted from {}", self.kind, self.node)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        Ok(ctx.harness.wait_for_broadcast(&self.kind, &self.node).await?)
    }
}
