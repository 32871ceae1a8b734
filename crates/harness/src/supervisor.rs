//! Lifecycle of the router processes and their background tasks.
//!
//! Every router gets two supervised tasks: one ingesting its combined
//! output (stdout and stderr on a single pipe), one bridging its bus traffic. Teardown kills the processes first,
//! then cancels and joins every task so nothing outlives the scenario.

use core::time::Duration;
use std::process::Stdio;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::bus::{Bridge, BridgeSummary, Broker, Topic};
use crate::config::RouterConfig;
use crate::error::HarnessError;
use crate::events::{ingest, lines, IngestSummary};
use crate::log::RouterLog;
use crate::state::{RouterEntry, SharedDirectory};

/// How long a killed router gets to close its output before the ingestion
/// task is aborted.
const DRAIN_GRACE: Duration = Duration::from_secs(1);
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProcessSupervisor {
    config: RouterConfig,
    logs_dir: Option<Utf8PathBuf>,
    broker: Arc<dyn Broker>,
    directory: SharedDirectory,
    processes: Vec<RouterProcess>,
}

impl core::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("binary", &self.config.binary)
            .field("routers", &self.processes.len())
            .finish_non_exhaustive()
    }
}

struct RouterProcess {
    name: String,
    child: Child,
    cancel: CancellationToken,
    ingest: JoinHandle<IngestSummary>,
    bridge: JoinHandle<BridgeSummary>,
}

impl ProcessSupervisor {
    pub fn new(
        config: RouterConfig,
        logs_dir: Option<Utf8PathBuf>,
        broker: Arc<dyn Broker>,
        directory: SharedDirectory,
    ) -> Self {
        Self {
            config,
            logs_dir,
            broker,
            directory,
            processes: Vec::new(),
        }
    }

    /// Variables every router process is started with.
    #[must_use]
    pub fn environment(&self, address: Address) -> Vec<(String, String)> {
        let library_paths = self
            .config
            .library_paths
            .iter()
            .map(|path| path.as_str())
            .collect::<Vec<_>>()
            .join(":");

        let mut env = vec![
            ("REDIS_DATABASE".to_owned(), address.to_string()),
            ("GLOG_logtostderr".to_owned(), "1".to_owned()),
            ("IN_SIMULATOR".to_owned(), "1".to_owned()),
            ("DYLD_LIBRARY_PATH".to_owned(), library_paths.clone()),
            ("LD_LIBRARY_PATH".to_owned(), library_paths),
        ];

        env.extend(
            self.config
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        env
    }

    /// Starts the router process for `name` on `device`.
    ///
    /// The bus subscription is in place before the process starts, so no
    /// traffic the router publishes early is missed.
    pub async fn spawn(&mut self, name: &str, device: &Utf8Path) -> Result<RouterEntry, HarnessError> {
        let entry = self.directory.write().register(name)?;
        let address = entry.address;

        let subscription = self.broker.psubscribe(&Topic::pattern(address)).await?;

        let log = match &self.logs_dir {
            Some(dir) => RouterLog::create(name.to_owned(), dir).await?,
            None => RouterLog::discard(name.to_owned()),
        };

        // stdout and stderr share one pipe so lines keep the order the
        // router wrote them in
        let (writer, output) = pipe::pipe()?;
        let stdout = writer.into_blocking_fd()?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(&self.config.binary);
        let _ignored = command
            .arg(device.as_str())
            .arg(address.to_string())
            .envs(self.environment(address))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        info!(router = %name, %address, %device, binary = %self.config.binary, "Spawning router");

        let spawned = command.spawn();

        // the write ends must only live in the child, or the output never ends
        drop(command);

        let child = spawned.map_err(|source| HarnessError::Spawn {
            router: name.to_owned(),
            source,
        })?;

        let output = lines(output);

        let cancel = CancellationToken::new();

        let ingest = tokio::spawn(ingest(output, Arc::clone(&entry.state), log));

        let bridge = Bridge::new(
            name.to_owned(),
            Arc::clone(&entry.state),
            Arc::clone(&self.directory),
        );
        let bridge = tokio::spawn(bridge.run(subscription, cancel.clone()));

        self.processes.push(RouterProcess {
            name: name.to_owned(),
            child,
            cancel,
            ingest,
            bridge,
        });

        Ok(entry)
    }

    /// Names of routers whose process exited on its own.
    pub fn exited(&mut self) -> Vec<String> {
        self.processes
            .iter_mut()
            .filter_map(|p| {
                matches!(p.child.try_wait(), Ok(Some(_))).then(|| p.name.clone())
            })
            .collect()
    }

    /// Kills every router, then cancels and joins every background task.
    ///
    /// A router that already exited is reported as a warning, never as an
    /// error.
    pub async fn kill_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for mut process in self.processes.drain(..) {
            let termination = terminate(&mut process.child).await;

            match &termination {
                Termination::Killed => debug!(router = %process.name, "Router killed"),
                Termination::AlreadyExited(code) => {
                    warn!(router = %process.name, ?code, "Router died prematurely");
                }
                Termination::Failed(err) => {
                    warn!(router = %process.name, %err, "Could not kill router");
                }
            }

            process.cancel.cancel();
            let bridge = join(process.bridge, None).await;
            let ingest = join(process.ingest, Some(DRAIN_GRACE)).await;

            debug!(router = %process.name, ?ingest, ?bridge, "Router tasks joined");

            report.routers.push(RouterExit {
                name: process.name,
                termination,
                ingest,
                bridge,
            });
        }

        report
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        for process in &self.processes {
            process.cancel.cancel();
            process.ingest.abort();
            process.bridge.abort();
        }
    }
}

async fn terminate(child: &mut Child) -> Termination {
    match child.try_wait() {
        Ok(Some(status)) => return Termination::AlreadyExited(status.code()),
        Ok(None) => {}
        Err(err) => return Termination::Failed(err.to_string()),
    }

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return Termination::AlreadyExited(None);
    };

    match signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Termination::AlreadyExited(None),
        Err(err) => return Termination::Failed(err.to_string()),
    }

    match timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(_)) => Termination::Killed,
        Ok(Err(err)) => Termination::Failed(err.to_string()),
        Err(_) => Termination::Failed("not reaped in time".to_owned()),
    }
}

async fn join<T>(mut handle: JoinHandle<T>, grace: Option<Duration>) -> TaskExit<T> {
    let result = match grace {
        Some(grace) => match timeout(grace, &mut handle).await {
            Ok(result) => result,
            Err(_) => {
                handle.abort();
                handle.await
            }
        },
        None => handle.await,
    };

    match result {
        Ok(value) => TaskExit::Completed(value),
        Err(err) if err.is_cancelled() => TaskExit::Cancelled,
        Err(err) => TaskExit::Panicked(err.to_string()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Killed,
    /// The process was gone before the kill signal; carries its exit code.
    AlreadyExited(Option<i32>),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskExit<T> {
    Completed(T),
    Cancelled,
    Panicked(String),
}

#[derive(Clone, Debug)]
pub struct RouterExit {
    pub name: String,
    pub termination: Termination,
    pub ingest: TaskExit<IngestSummary>,
    pub bridge: TaskExit<BridgeSummary>,
}

#[derive(Clone, Debug, Default)]
pub struct TeardownReport {
    pub routers: Vec<RouterExit>,
}

impl TeardownReport {
    /// Routers that could not be killed because they were already gone, or
    /// for any other reason.
    pub fn warnings(&self) -> impl Iterator<Item = &RouterExit> {
        self.routers
            .iter()
            .filter(|exit| exit.termination != Termination::Killed)
    }
}
