use std::fmt;
use std::future::IntoFuture;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;

use super::runner::{self, Proc};
use super::{PipeFailure, ProcessResult, Signal, StdinSource, pipeline};
use crate::classify;
use crate::command::{Arg, QuotedCommand};
use crate::error::ExecError;

/// A running (or settled) command, possibly the tail of a pipeline.
///
/// Await it to get the [`ProcessResult`], or an [`ExecError`] when the
/// command failed and was not marked [`nothrow`](Self::nothrow). Chaining
/// calls take effect immediately, even though the process is already
/// running; on a pipeline they apply to every stage.
pub struct ProcessHandle {
    stage: Arc<Proc>,
    upstream: Vec<Arc<Proc>>,
    pipe_failure: PipeFailure,
    /// Stage indices whose stdin could not be wired to the previous stage.
    unwired: Vec<usize>,
}

/// What [`ProcessHandle::pipe`] connects to.
pub enum PipeTarget {
    /// An already running process; its stdin must still be an open pipe.
    Handle(ProcessHandle),
    /// Spawned with the source's options.
    Command(QuotedCommand),
}

impl From<ProcessHandle> for PipeTarget {
    fn from(handle: ProcessHandle) -> Self {
        PipeTarget::Handle(handle)
    }
}

impl From<QuotedCommand> for PipeTarget {
    fn from(command: QuotedCommand) -> Self {
        PipeTarget::Command(command)
    }
}

impl ProcessHandle {
    pub(crate) fn from_proc(stage: Arc<Proc>) -> Self {
        Self {
            pipe_failure: stage.options.pipe_failure,
            stage,
            upstream: Vec::new(),
            unwired: Vec::new(),
        }
    }

    fn stages(&self) -> impl Iterator<Item = &Arc<Proc>> {
        self.upstream.iter().chain(std::iter::once(&self.stage))
    }

    fn first(&self) -> &Arc<Proc> {
        self.upstream.first().unwrap_or(&self.stage)
    }

    /// Number of processes behind this handle.
    pub fn stage_count(&self) -> usize {
        self.upstream.len() + 1
    }

    /// PID of the last stage, `None` if its shell never started.
    pub fn pid(&self) -> Option<u32> {
        self.stage.pid
    }

    /// Command text of the last stage.
    pub fn command(&self) -> &QuotedCommand {
        &self.stage.command
    }

    pub fn is_settled(&self) -> bool {
        self.stages().all(|p| p.is_settled())
    }

    /// The last stage's result if it has settled, without classifying it.
    pub fn try_result(&self) -> Option<ProcessResult> {
        self.stage.try_settled().map(|s| (*s.result).clone())
    }

    /// Stop echoing output; it is still captured.
    pub fn quiet(self) -> Self {
        for proc in self.stages() {
            proc.control.set_quiet();
        }
        self
    }

    /// Settle nonzero exits, signal deaths and timeouts as results.
    pub fn nothrow(self) -> Self {
        for proc in self.stages() {
            proc.control.set_nothrow();
        }
        self
    }

    /// Terminate with the configured kill signal if still running after
    /// `after`, counted from now.
    pub fn timeout(self, after: Duration) -> Self {
        let signal = self.stage.options.kill_signal;
        self.timeout_with(after, signal)
    }

    pub fn timeout_with(self, after: Duration, signal: Signal) -> Self {
        for proc in self.stages() {
            proc.arm_timeout(after, signal);
        }
        self
    }

    /// How a failing pipeline is reported.
    pub fn pipe_failure(mut self, policy: PipeFailure) -> Self {
        self.pipe_failure = policy;
        self
    }

    /// Send `signal` to every stage still running.
    pub fn kill(&self, signal: Signal) {
        for proc in self.stages() {
            proc.signal(signal);
        }
    }

    /// Connect this handle's stdout to the stdin of `target`.
    ///
    /// Output the source produced before the call is replayed into the
    /// target first. The returned handle settles when every stage has.
    pub fn pipe(self, target: impl Into<PipeTarget>) -> ProcessHandle {
        let sink = match target.into() {
            PipeTarget::Handle(handle) => handle,
            PipeTarget::Command(command) => {
                runner::run(command, self.stage.options.for_pipe_sink())
            }
        };
        let offset = self.stage_count();
        let mut unwired = self.unwired;
        if !pipeline::connect(&self.stage, sink.first()) {
            unwired.push(offset);
        }
        unwired.extend(sink.unwired.iter().map(|i| i + offset));

        let mut upstream = self.upstream;
        upstream.push(self.stage);
        upstream.extend(sink.upstream);
        ProcessHandle {
            stage: sink.stage,
            upstream,
            pipe_failure: self.pipe_failure,
            unwired,
        }
    }

    /// Write to the first stage's stdin.
    pub async fn write_stdin(&self, data: impl AsRef<[u8]>) -> Result<(), ExecError> {
        let first = self.first();
        let stdin_error = |source| ExecError::Stdin {
            command: first.command.to_string(),
            source,
        };
        let Some(stdin) = first.stdin_writer() else {
            return Err(stdin_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdin is closed or not a pipe",
            )));
        };
        let mut stdin = stdin.lock().await;
        stdin.write_all(data.as_ref()).await.map_err(stdin_error)?;
        stdin.flush().await.map_err(stdin_error)
    }

    /// Close the first stage's stdin so it sees end of input.
    pub fn close_stdin(&self) {
        self.first().close_stdin();
    }

    /// Forward `source` into the first stage's stdin. Fails with
    /// [`ExecError::StdinBusy`] when another process holds its lease.
    pub fn forward_stdin(&self, source: &Arc<StdinSource>) -> Result<(), ExecError> {
        self.first().forward_from(source.clone(), false)
    }

    /// Wait for the last stage and return its exit code, ignoring `nothrow`.
    pub async fn exit_code(&self) -> Option<i32> {
        self.stage.settled().await.result.exit_code()
    }

    /// Wait for every stage and classify the outcome.
    pub async fn wait(self) -> Result<ProcessResult, ExecError> {
        for proc in self.stages() {
            proc.close_stdin();
        }
        if self.upstream.is_empty() {
            let settled = self.stage.settled().await;
            return classify::classify(&settled, &self.stage.options, self.stage.control.nothrow());
        }
        pipeline::settle(&self.upstream, &self.stage, self.pipe_failure, &self.unwired).await
    }
}

impl IntoFuture for ProcessHandle {
    type Output = Result<ProcessResult, ExecError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let commands: Vec<&str> = self.stages().map(|p| p.command.as_str()).collect();
        f.debug_struct("ProcessHandle")
            .field("commands", &commands)
            .field("pid", &self.pid())
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Trimmed stdout of the last stage once settled, empty before.
impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage.try_settled() {
            Some(settled) => fmt::Display::fmt(&*settled.result, f),
            None => Ok(()),
        }
    }
}

impl From<&ProcessHandle> for Arg {
    fn from(handle: &ProcessHandle) -> Self {
        match handle.stage.try_settled() {
            Some(settled) => Arg::from(&*settled.result),
            None => Arg::pending(handle.command().as_str()),
        }
    }
}
