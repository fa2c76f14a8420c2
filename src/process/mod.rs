//! Spawning and supervising child processes.
//!
//! - **[`runner`]**: `run(command, options)` spawns `<shell> <args> <prefix><command>`
//!   and returns immediately.
//! - **[`ProcessHandle`]**: awaitable handle with chaining (`quiet`, `nothrow`,
//!   `timeout`, `pipe`).
//! - **[`capture`]**: stdout/stderr capture, echo, and fan-out to pipe sinks.
//! - **[`pipeline`]**: joining handles and attributing stage failures.
//! - **[`stdin`]**: single-lease forwarding of the parent's stdin.

mod capture;
mod handle;
pub mod pipeline;
mod result;
pub mod runner;
mod signal;
pub mod stdin;

pub use handle::{PipeTarget, ProcessHandle};
pub use pipeline::PipeFailure;
pub use result::ProcessResult;
pub use runner::run;
pub use signal::Signal;
pub use stdin::{StdinLease, StdinSource};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quote::Dialect;

/// Where a child's stdin comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdinMode {
    /// A pipe the caller writes to; closing it (or awaiting the handle) ends input.
    #[default]
    Buffered,
    /// The shared [`StdinSource`] is forwarded chunk by chunk under a lease.
    Forward,
    /// The child reads the parent's stdin directly.
    Inherit,
    /// `/dev/null`.
    Null,
}

impl FromStr for StdinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" | "pipe" => Ok(StdinMode::Buffered),
            "forward" | "async" => Ok(StdinMode::Forward),
            "inherit" => Ok(StdinMode::Inherit),
            "null" => Ok(StdinMode::Null),
            other => Err(format!("unknown stdin mode: {other}")),
        }
    }
}

/// Configuration snapshot taken when a process is spawned.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub shell: PathBuf,
    /// Arguments between the shell path and the command text (e.g. `-c`).
    pub shell_args: Vec<String>,
    /// Code prepended to every command.
    pub prefix: String,
    pub dialect: Dialect,
    pub cwd: Option<PathBuf>,
    /// Added to (and overriding) the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Echo `$ <command>` to stderr before spawning.
    pub verbose: bool,
    /// Capture output without echoing it.
    pub quiet: bool,
    /// Settle failures as results instead of errors.
    pub nothrow: bool,
    pub timeout: Option<Duration>,
    /// Signal sent when `timeout` expires.
    pub kill_signal: Signal,
    /// Wait after `kill_signal` before escalating to SIGKILL.
    pub grace_period: Duration,
    pub stdin: StdinMode,
    /// Source for [`StdinMode::Forward`]; the parent's stdin when `None`.
    pub stdin_source: Option<Arc<StdinSource>>,
    pub pipe_failure: PipeFailure,
    /// Append settled commands to the history log.
    pub history: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        let dialect = Dialect::default();
        Self {
            shell: PathBuf::from(dialect.default_shell()),
            shell_args: dialect.invocation_args(),
            prefix: dialect.default_prefix().to_string(),
            dialect,
            cwd: None,
            env: BTreeMap::new(),
            verbose: false,
            quiet: false,
            nothrow: false,
            timeout: None,
            kill_signal: Signal::Term,
            grace_period: Duration::from_secs(2),
            stdin: StdinMode::default(),
            stdin_source: None,
            pipe_failure: PipeFailure::default(),
            history: false,
        }
    }
}

impl ProcessOptions {
    /// Options for a stage spawned to receive another stage's stdout.
    pub(crate) fn for_pipe_sink(&self) -> Self {
        Self {
            stdin: StdinMode::Buffered,
            timeout: None,
            ..self.clone()
        }
    }
}
