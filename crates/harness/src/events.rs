//! Classification of a router's combined output stream.
//!
//! The firmware prints two control lines on its output: `ROUTER RUN` once it
//! is ready and `EDGE <a> <b>` for every topology edge it discovers.
//! Everything else is diagnostics and goes to the router log untouched.

use std::io;

use futures_util::{stream, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::log::RouterLog;
use crate::state::SharedRouterState;

const READY_LINE: &str = "ROUTER RUN";
const EDGE_PREFIX: &str = "EDGE";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouterEvent {
    RouterRunning,
    EdgeDiscovered(Address, Address),
    LogLine(String),
}

impl RouterEvent {
    /// Never fails: anything that is not a control line is a log line.
    #[must_use]
    pub fn classify(line: &str) -> Self {
        let trimmed = line.trim();

        if trimmed == READY_LINE {
            return Self::RouterRunning;
        }

        if let Some((a, b)) = parse_edge(trimmed) {
            return Self::EdgeDiscovered(a, b);
        }

        Self::LogLine(line.to_owned())
    }
}

fn parse_edge(line: &str) -> Option<(Address, Address)> {
    let mut parts = line.split(' ');

    if parts.next()? != EDGE_PREFIX {
        return None;
    }

    let a = parts.next()?;
    let b = parts.next()?;

    if parts.next().is_some() || !is_digits(a) || !is_digits(b) {
        return None;
    }

    Some((a.parse().ok()?, b.parse().ok()?))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// What an ingestion task saw before its stream closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: usize,
    pub edges: usize,
    pub ready: bool,
}

/// Turns any byte stream into the line stream [`ingest`] consumes.
///
/// Lines are split on raw bytes and decoded lossily: the firmware echoes
/// payloads that need not be UTF-8.
pub fn lines<R>(reader: R) -> impl Stream<Item = io::Result<String>>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut line = Vec::new();

        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(decode_line(&line)), reader)),
            Err(err) => Some((Err(err), reader)),
        }
    })
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    String::from_utf8_lossy(line).into_owned()
}

/// Reads `lines` until the stream closes, applying each event to `state`.
pub async fn ingest<S>(lines: S, state: SharedRouterState, mut log: RouterLog) -> IngestSummary
where
    S: Stream<Item = io::Result<String>>,
{
    let mut summary = IngestSummary::default();
    let mut lines = core::pin::pin!(lines);

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "Failed reading router output");
                break;
            }
        };

        summary.lines = summary.lines.saturating_add(1);

        match RouterEvent::classify(&line) {
            RouterEvent::RouterRunning => {
                let mut state = state.write();
                info!(router = %state.name, address = %state.address, "Router is running");
                state.mark_alive();
                summary.ready = true;
            }
            RouterEvent::EdgeDiscovered(a, b) => {
                let mut state = state.write();
                debug!(router = %state.name, %a, %b, "Edge discovered");
                state.topology.insert_edge(a, b);
                summary.edges = summary.edges.saturating_add(1);
            }
            RouterEvent::LogLine(_) => {}
        }

        if let Err(err) = log.write_line(&line).await {
            warn!(%err, "Failed writing router log");
        }
    }

    if let Err(err) = log.flush().await {
        warn!(%err, "Failed flushing router log");
    }

    summary
}
