use core::fmt::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{bail, Result as EyreResult, WrapErr};
use mesh_harness::bus::Broker;
use mesh_harness::{HarnessConfig, TestContext};
use serde_json::from_slice;
use tokio::fs::{read, read_dir, write};
use tracing::info;

use crate::output::OutputWriter;
use crate::steps::TestScenario;
use crate::TestEnvironment;

const SCENARIO_FILE: &str = "scenario.json";

/// What a step sees while it runs: the scenario's own harness context.
pub struct ScenarioContext<'a> {
    pub harness: TestContext,
    pub fixtures_dir: &'a Utf8Path,
    pub output_writer: OutputWriter,
}

pub trait Test {
    async fn run_assert(&self, ctx: &mut ScenarioContext<'_>) -> EyreResult<()>;
    fn display_name(&self) -> String;
}

pub struct Driver {
    environment: TestEnvironment,
    config: HarnessConfig,
    broker: Arc<dyn Broker>,
}

impl Driver {
    pub fn new(environment: TestEnvironment, config: HarnessConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            environment,
            config,
            broker,
        }
    }

    pub async fn run(&self) -> EyreResult<()> {
        let mut report = TestRunReport::default();

        for (name, path) in self.scenarios().await? {
            let scenario_report = self.run_scenario(&name, &path).await?;
            report.scenarios.push(scenario_report);
        }

        if let Err(e) = report.result() {
            self.environment
                .output_writer
                .write_str("Error occurred during test run:");
            self.environment.output_writer.write_str(&e.to_string());
        }

        let report_file = report.store_to_file(&self.environment.output_dir).await?;

        self.environment
            .output_writer
            .write_str(&format!("Report file: {report_file}"));

        report.result()
    }

    /// Scenario directories holding a scenario file, sorted by name.
    async fn scenarios(&self) -> EyreResult<Vec<(String, Utf8PathBuf)>> {
        let scenarios_dir = self.environment.scenarios_dir();
        let mut entries = read_dir(&scenarios_dir)
            .await
            .wrap_err_with(|| format!("failed to read {scenarios_dir}"))?;

        let mut scenarios = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };

            let file = path.join(SCENARIO_FILE);
            let Some(name) = path.file_name() else {
                continue;
            };

            if !file.is_file() {
                continue;
            }

            if let Some(filter) = &self.environment.filter {
                if !name.contains(filter.as_str()) {
                    continue;
                }
            }

            scenarios.push((name.to_owned(), file));
        }

        scenarios.sort();

        Ok(scenarios)
    }

    async fn run_scenario(&self, name: &str, file_path: &Utf8Path) -> EyreResult<TestScenarioReport> {
        let output = self.environment.output_writer;

        output.write_header(&format!("Running scenario {name}"), 2);

        let scenario: TestScenario = from_slice(&read(file_path).await?)
            .wrap_err_with(|| format!("failed to parse {file_path}"))?;

        output.write_str(&format!("Source file: {file_path}"));
        output.write_str(&format!("Steps count: {}", scenario.steps.len()));

        let mut config = self.config.clone();
        config.logs_dir = Some(self.environment.logs_dir.join(name));

        let fixtures_dir = self.environment.fixtures_dir();

        let mut ctx = ScenarioContext {
            harness: TestContext::new(config, Arc::clone(&self.broker)),
            fixtures_dir: &fixtures_dir,
            output_writer: output,
        };

        let mut report = TestScenarioReport::new(name.to_owned());

        let mut scenario_failed = false;
        for (i, step) in scenario.steps.iter().enumerate() {
            let step_name = format!("{}. {}", i.saturating_add(1), step.display_name());

            if scenario_failed {
                report.steps.push(TestStepReport {
                    step_name,
                    result: None,
                });
                continue;
            }

            output.write_header("Running test step", 3);
            output.write_str("Step definition:");
            output.write_json(&step)?;

            let result = step.run_assert(&mut ctx).await;

            if let Err(err) = &result {
                scenario_failed = true;
                output.write_str(&format!("Error: {err:?}"));
            }

            report.steps.push(TestStepReport {
                step_name,
                result: Some(result),
            });
        }

        let teardown = ctx.harness.teardown().await;

        output.write_header("Teardown", 3);
        output.write_teardown(&teardown);

        info!(
            scenario = name,
            passed = !scenario_failed,
            warnings = teardown.warnings().count(),
            "Scenario finished"
        );

        Ok(report)
    }
}

#[derive(Default)]
struct TestRunReport {
    scenarios: Vec<TestScenarioReport>,
}

impl TestRunReport {
    fn result(&self) -> EyreResult<()> {
        let errors: Vec<String> = self
            .scenarios
            .iter()
            .flat_map(|scenario| {
                scenario.steps.iter().filter_map(|step| match &step.result {
                    Some(Err(e)) => Some(format!("{}: {e}", scenario.scenario_name)),
                    _ => None,
                })
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            bail!("Errors occurred during test run: {:?}", errors)
        }
    }

    async fn store_to_file(&self, folder: &Utf8Path) -> EyreResult<Utf8PathBuf> {
        let markdown = self.to_markdown()?;
        let report_file = folder.join("report.md");
        write(&report_file, markdown).await?;
        Ok(report_file)
    }

    fn to_markdown(&self) -> EyreResult<String> {
        let mut markdown = String::new();

        writeln!(&mut markdown, "## E2E tests report")?;

        for scenario in &self.scenarios {
            writeln!(&mut markdown, "### Scenario: {}", scenario.scenario_name)?;
            writeln!(&mut markdown, "| Step | Result |")?;
            writeln!(&mut markdown, "| :--- | :---: |")?;

            for step in &scenario.steps {
                let result = step
                    .result
                    .as_ref()
                    .map_or(":fast_forward:", |result| match result {
                        Ok(()) => ":white_check_mark:",
                        Err(_) => ":x:",
                    });

                writeln!(&mut markdown, "| {} | {result} |", step.step_name)?;
            }

            writeln!(&mut markdown)?;
        }

        Ok(markdown)
    }
}

struct TestScenarioReport {
    scenario_name: String,
    steps: Vec<TestStepReport>,
}

impl TestScenarioReport {
    const fn new(scenario_name: String) -> Self {
        Self {
            scenario_name,
            steps: Vec::new(),
        }
    }
}

struct TestStepReport {
    step_name: String,
    /// `None` when skipped after an earlier failure.
    result: Option<EyreResult<()>>,
}
