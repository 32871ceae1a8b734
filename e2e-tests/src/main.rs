use std::env::var;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use const_format::concatcp;
use eyre::{Result as EyreResult, WrapErr};
use mesh_harness::bus::{Broker, MemoryBroker};
use mesh_harness::HarnessConfig;
use tokio::fs::create_dir_all;
use tracing::info;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, EnvFilter};

use crate::driver::Driver;
use crate::output::{OutputFormat, OutputWriter};

mod driver;
mod output;
mod steps;

const DEFAULT_DIRECTIVES: &str = concatcp!(env!("CARGO_CRATE_NAME"), "=info,mesh_harness=info");

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory containing the `config.json`, the `fixtures` and the
    /// `scenarios` to run
    #[arg(long, value_name = "PATH", env = "MESH_E2E_INPUT_DIR")]
    pub input_dir: Utf8PathBuf,

    /// Directory for router logs and the report
    #[arg(long, value_name = "PATH", env = "MESH_E2E_OUTPUT_DIR")]
    pub output_dir: Utf8PathBuf,

    /// Harness configuration, defaults to `<input-dir>/config.json`
    #[arg(long, value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Overrides the bus URL of the configuration
    #[arg(long, value_name = "URL", env = "MESH_E2E_BUS_URL")]
    pub bus_url: Option<String>,

    /// Uses an in-process bus instead of connecting to Redis
    #[arg(long, conflicts_with = "bus_url")]
    pub in_memory_bus: bool,

    /// Only runs scenarios whose name contains this
    #[arg(long, value_name = "NAME")]
    pub filter: Option<String>,

    #[arg(long, value_enum, default_value_t)]
    pub output_format: OutputFormat,
}

#[derive(Debug)]
pub struct TestEnvironment {
    pub input_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub logs_dir: Utf8PathBuf,
    pub filter: Option<String>,
    pub output_writer: OutputWriter,
}

impl From<&Args> for TestEnvironment {
    fn from(args: &Args) -> Self {
        Self {
            input_dir: args.input_dir.clone(),
            output_dir: args.output_dir.clone(),
            logs_dir: args.output_dir.join("logs"),
            filter: args.filter.clone(),
            output_writer: OutputWriter::new(args.output_format),
        }
    }
}

impl TestEnvironment {
    pub fn fixtures_dir(&self) -> Utf8PathBuf {
        self.input_dir.join("fixtures")
    }

    pub fn scenarios_dir(&self) -> Utf8PathBuf {
        self.input_dir.join("scenarios")
    }

    async fn init(&self) -> EyreResult<()> {
        create_dir_all(&self.logs_dir).await?;

        Ok(())
    }
}

#[tokio::main]
async fn main() -> EyreResult<()> {
    setup()?;

    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.input_dir.join("config.json"));

    let mut config = HarnessConfig::load(&config_path)
        .await
        .wrap_err_with(|| format!("failed to load harness config from {config_path}"))?;

    if let Some(url) = &args.bus_url {
        config.bus.url.clone_from(url);
    }

    let broker: Arc<dyn Broker> = if args.in_memory_bus {
        info!("Using the in-process bus");
        Arc::new(MemoryBroker::new())
    } else {
        info!(url = %config.bus.url, "Connecting to the bus");
        Arc::new(config.bus.connect().await?)
    };

    let environment = TestEnvironment::from(&args);
    environment.init().await?;

    Driver::new(environment, config, broker).run().await
}

fn setup() -> EyreResult<()> {
    let directives = match var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => DEFAULT_DIRECTIVES.to_owned(),
    };

    registry()
        .with(EnvFilter::builder().parse(directives)?)
        .with(layer())
        .init();

    color_eyre::install()
}
