use eyre::Result as EyreResult;
use serde::{Deserialize, Serialize};

use crate::driver::{ScenarioContext, Test};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterAliveStep {
    pub router: String,
}

impl Test for RouterAliveStep {
    fn display_name(&self) -> String {
        format!("router {} is alive", self.router)
    }

    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()> {
        ctx.harness.start_router(&self.router).await?;

        let address = ctx.harness.router(&self.router)?.read().address;

        ctx.output_writer
            .write_str(&format!("Router {} runs at address {address}", self.router));

        Ok(())
    }
}
