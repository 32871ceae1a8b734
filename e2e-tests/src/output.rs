use clap::ValueEnum;
use eyre::Result as EyreResult;
use mesh_harness::supervisor::{RouterExit, TaskExit, TeardownReport, Termination};
use serde::Serialize;

#[derive(Clone, Copy, Debug)]
pub struct OutputWriter {
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    Markdown,
    #[default]
    PlainText,
}

impl OutputWriter {
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn write_str(self, line: &str) {
        println!("{}", self.line(line));
    }

    pub fn write_header(self, header: &str, level: usize) {
        println!("{}", self.header(header, level));
    }

    pub fn write_json<T>(self, json: &T) -> EyreResult<()>
    where
        T: ?Sized + Serialize,
    {
        println!("{}", self.json(json)?);

        Ok(())
    }

    /// Markdown needs two trailing spaces to keep console lines apart.
    fn line(self, line: &str) -> String {
        match self.format {
            OutputFormat::Markdown => format!("{line}  "),
            OutputFormat::PlainText => line.to_owned(),
        }
    }

    fn header(self, header: &str, level: usize) -> String {
        match self.format {
            OutputFormat::Markdown => self.line(&format!("{} {header}", "#".repeat(level))),
            OutputFormat::PlainText => {
                let rule = "-".repeat(level.saturating_mul(5));
                format!("{rule}{header}{rule}")
            }
        }
    }

    fn json<T>(self, json: &T) -> EyreResult<String>
    where
        T: ?Sized + Serialize,
    {
        Ok(match self.format {
            OutputFormat::Markdown => format!("```json\n{}\n```", serde_json::to_string_pretty(json)?),
            OutputFormat::PlainText => serde_json::to_string(json)?,
        })
    }

    /// One line per router: how it was stopped and how its tasks ended.
    pub fn write_teardown(self, report: &TeardownReport) {
        for exit in &report.routers {
            self.write_str(&router_exit(exit));
        }
    }
}

fn router_exit(exit: &RouterExit) -> String {
    let termination = match &exit.termination {
        Termination::Killed => "killed".to_owned(),
        Termination::AlreadyExited(Some(code)) => format!("died early with code {code}"),
        Termination::AlreadyExited(None) => "died early".to_owned(),
        Termination::Failed(err) => format!("could not be killed: {err}"),
    };

    let ingest = match &exit.ingest {
        TaskExit::Completed(summary) => format!("{} lines, {} edges", summary.lines, summary.edges),
        other => task_exit(other),
    };

    let bridge = match &exit.bridge {
        TaskExit::Completed(summary) => {
            format!("{} received, {} ignored", summary.received, summary.ignored)
        }
        other => task_exit(other),
    };

    format!(
        "Router {}: {termination} (output: {ingest}; bus: {bridge})",
        exit.name
    )
}

fn task_exit<T>(exit: &TaskExit<T>) -> String {
    match exit {
        TaskExit::Completed(_) => "completed".to_owned(),
        TaskExit::Cancelled => "cancelled".to_owned(),
        TaskExit::Panicked(err) => format!("panicked: {err}"),
    }
}
