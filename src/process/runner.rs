//! Spawning a quoted command under the configured shell.
//!
//! [`run`] never blocks and never fails synchronously: the child is spawned
//! on the spot, its streams are handed to background pumps, and a supervisor
//! task settles the handle once the child exits and its output is drained.
//! A shell that cannot be started settles the handle immediately with the
//! OS error attached.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;

use super::capture::{self, Control, Stream, Tap, lock};
use super::{ProcessHandle, ProcessOptions, ProcessResult, Signal, StdinMode, StdinSource};
use crate::command::QuotedCommand;
use crate::logging;

/// Final state of one process.
#[derive(Debug, Clone)]
pub(crate) struct Settled {
    pub(crate) result: Arc<ProcessResult>,
    pub(crate) spawn_error: Option<Arc<io::Error>>,
    pub(crate) finished: Instant,
}

impl Settled {
    /// Stand-in when the supervisor vanished (runtime shut down) before
    /// reporting.
    fn lost(command: &str) -> Self {
        Settled {
            result: Arc::new(ProcessResult::unstarted(command.to_string(), Duration::ZERO)),
            spawn_error: Some(Arc::new(io::Error::other(
                "process supervisor stopped before the process settled",
            ))),
            finished: Instant::now(),
        }
    }
}

pub(crate) type SharedStdin = Arc<AsyncMutex<ChildStdin>>;

#[derive(Debug)]
enum StdinSlot {
    Open(SharedStdin),
    /// Taken by a pipe feeder or the stdin forwarder.
    Claimed,
    Closed,
    /// Inherited, null, or never spawned.
    Unavailable,
}

/// One spawned (or failed) process and everything needed to steer it.
#[derive(Debug)]
pub(crate) struct Proc {
    pub(crate) command: QuotedCommand,
    pub(crate) pid: Option<u32>,
    pub(crate) options: ProcessOptions,
    pub(crate) control: Arc<Control>,
    pub(crate) stdout: Arc<Tap>,
    stdin: Mutex<StdinSlot>,
    kill_tx: mpsc::UnboundedSender<Signal>,
    settled: watch::Receiver<Option<Settled>>,
}

/// Resolves once a settlement has been published.
pub(crate) async fn until_settled(rx: &mut watch::Receiver<Option<Settled>>) {
    let _ = rx.wait_for(Option::is_some).await;
}

async fn settled_within(mut rx: watch::Receiver<Option<Settled>>, limit: Duration) -> bool {
    tokio::time::timeout(limit, until_settled(&mut rx)).await.is_ok()
}

impl Proc {
    pub(crate) fn is_settled(&self) -> bool {
        self.settled.borrow().is_some()
    }

    pub(crate) fn try_settled(&self) -> Option<Settled> {
        self.settled.borrow().clone()
    }

    pub(crate) async fn settled(&self) -> Settled {
        let mut rx = self.settled.clone();
        until_settled(&mut rx).await;
        let value = rx.borrow().clone();
        value.unwrap_or_else(|| Settled::lost(self.command.as_str()))
    }

    /// Ask the supervisor to deliver `signal`. False once settled.
    pub(crate) fn signal(&self, signal: Signal) -> bool {
        !self.is_settled() && self.kill_tx.send(signal).is_ok()
    }

    /// Send `signal` if still running after `after`, then SIGKILL if still
    /// running after the grace period. The handle settles as timed out
    /// whatever the child does once the first signal is sent.
    pub(crate) fn arm_timeout(&self, after: Duration, signal: Signal) {
        if self.is_settled() {
            return;
        }
        let kill = self.kill_tx.clone();
        let settled = self.settled.clone();
        let control = self.control.clone();
        let grace = self.options.grace_period;
        let command = self.command.to_string();
        tokio::spawn(async move {
            if settled_within(settled.clone(), after).await {
                return;
            }
            debug!("`{command}` exceeded {after:?}; sending {signal}");
            control.mark_timed_out(after);
            let _ = kill.send(signal);
            if signal != Signal::Kill && !settled_within(settled, grace).await {
                debug!("`{command}` survived {signal} for {grace:?}; sending SIGKILL");
                let _ = kill.send(Signal::Kill);
            }
        });
    }

    /// Take exclusive ownership of the stdin pipe.
    pub(crate) fn take_stdin(&self) -> Option<SharedStdin> {
        let mut slot = lock(&self.stdin);
        match std::mem::replace(&mut *slot, StdinSlot::Claimed) {
            StdinSlot::Open(stdin) => Some(stdin),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// A writer for the stdin pipe while it is still open and unclaimed.
    pub(crate) fn stdin_writer(&self) -> Option<SharedStdin> {
        match &*lock(&self.stdin) {
            StdinSlot::Open(stdin) => Some(stdin.clone()),
            _ => None,
        }
    }

    /// Drop our end of an unclaimed stdin pipe so the child sees EOF.
    pub(crate) fn close_stdin(&self) {
        let mut slot = lock(&self.stdin);
        if matches!(*slot, StdinSlot::Open(_)) {
            *slot = StdinSlot::Closed;
        }
    }

    /// Forward `source` into this child's stdin under the source's lease.
    /// With `wait_for_lease` false a busy source is an error.
    pub(crate) fn forward_from(
        &self,
        source: Arc<StdinSource>,
        wait_for_lease: bool,
    ) -> Result<(), crate::error::ExecError> {
        let early = if wait_for_lease {
            None
        } else {
            Some(source.try_lease()?)
        };
        let Some(stdin) = self.take_stdin() else {
            return Err(crate::error::ExecError::Stdin {
                command: self.command.to_string(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "stdin is not an open pipe"),
            });
        };
        let mut settled = self.settled.clone();
        let command = self.command.to_string();
        tokio::spawn(async move {
            let lease = match early {
                Some(lease) => lease,
                None => tokio::select! {
                    lease = source.lease() => lease,
                    () = until_settled(&mut settled) => return,
                },
            };
            let mut sink = stdin.lock().await;
            match lease.forward(&mut *sink, until_settled(&mut settled)).await {
                Ok(n) => debug!("forwarded {n} bytes of {} into `{command}`", source.name()),
                Err(e) => debug!("forwarding {} into `{command}` stopped: {e}", source.name()),
            }
        });
        Ok(())
    }
}

/// Spawn `command` and return a live handle without waiting for it.
///
/// Must be called from inside a tokio runtime.
pub fn run(command: QuotedCommand, options: ProcessOptions) -> ProcessHandle {
    ProcessHandle::from_proc(spawn(command, options))
}

fn shell_command(command: &QuotedCommand, options: &ProcessOptions) -> Command {
    let mut cmd = Command::new(&options.shell);
    cmd.args(&options.shell_args);
    cmd.arg(format!("{}{}", options.prefix, command));
    if let Some(dir) = &options.cwd {
        cmd.current_dir(dir);
    }
    cmd.envs(&options.env);
    cmd.stdin(match options.stdin {
        StdinMode::Buffered | StdinMode::Forward => Stdio::piped(),
        StdinMode::Inherit => Stdio::inherit(),
        StdinMode::Null => Stdio::null(),
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // Own process group, so signals reach whatever the shell started.
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

pub(crate) fn spawn(command: QuotedCommand, options: ProcessOptions) -> Arc<Proc> {
    if options.verbose {
        logging::echo_command(command.as_str());
    }
    let control = Arc::new(Control::new(options.quiet, options.nothrow));
    let stdout_tap = Arc::new(Tap::default());
    let stderr_tap = Arc::new(Tap::default());
    let (settled_tx, settled_rx) = watch::channel(None);
    let (kill_tx, kill_rx) = mpsc::unbounded_channel();
    let started = Instant::now();

    let mut child = match shell_command(&command, &options).spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to start {}: {e}", options.shell.display());
            let result = ProcessResult::unstarted(command.to_string(), started.elapsed());
            settled_tx.send_replace(Some(Settled {
                result: Arc::new(result),
                spawn_error: Some(Arc::new(e)),
                finished: Instant::now(),
            }));
            return Arc::new(Proc {
                command,
                pid: None,
                options,
                control,
                stdout: stdout_tap,
                stdin: Mutex::new(StdinSlot::Unavailable),
                kill_tx,
                settled: settled_rx,
            });
        }
    };

    let pid = child.id();
    debug!("spawned pid {pid:?}: {command}");

    let stdout_task = child.stdout.take().map(|out| {
        let tap = stdout_tap.clone();
        let control = control.clone();
        tokio::spawn(async move { capture::pump(out, &tap, Stream::Stdout, &control).await })
    });
    let stderr_task = child.stderr.take().map(|err| {
        let tap = stderr_tap.clone();
        let control = control.clone();
        tokio::spawn(async move { capture::pump(err, &tap, Stream::Stderr, &control).await })
    });
    let stdin = match child.stdin.take() {
        Some(stdin) => StdinSlot::Open(Arc::new(AsyncMutex::new(stdin))),
        None => StdinSlot::Unavailable,
    };

    tokio::spawn(supervise(Supervisor {
        child,
        pid,
        command: command.to_string(),
        started,
        pumps: [stdout_task, stderr_task],
        stdout: stdout_tap.clone(),
        stderr: stderr_tap,
        control: control.clone(),
        kill_rx,
        settled_tx,
        history: options.history,
    }));

    let proc = Arc::new(Proc {
        command,
        pid,
        options,
        control,
        stdout: stdout_tap,
        stdin: Mutex::new(stdin),
        kill_tx,
        settled: settled_rx,
    });

    if proc.options.stdin == StdinMode::Forward {
        let source = proc
            .options
            .stdin_source
            .clone()
            .unwrap_or_else(StdinSource::parent);
        if let Err(e) = proc.forward_from(source, true) {
            warn!("stdin forwarding not started: {e}");
        }
    }
    if let Some(after) = proc.options.timeout {
        proc.arm_timeout(after, proc.options.kill_signal);
    }
    proc
}

struct Supervisor {
    child: Child,
    pid: Option<u32>,
    command: String,
    started: Instant,
    pumps: [Option<JoinHandle<()>>; 2],
    stdout: Arc<Tap>,
    stderr: Arc<Tap>,
    control: Arc<Control>,
    kill_rx: mpsc::UnboundedReceiver<Signal>,
    settled_tx: watch::Sender<Option<Settled>>,
    history: bool,
}

async fn supervise(mut s: Supervisor) {
    let status = loop {
        tokio::select! {
            status = s.child.wait() => break status,
            Some(signal) = s.kill_rx.recv() => {
                deliver(&mut s.child, s.pid, signal);
            }
        }
    };
    // Background jobs can hold the pipes open after the shell is gone; their
    // group must still be reachable until the output is drained.
    let drained = drain(std::mem::take(&mut s.pumps), s.command.clone());
    tokio::pin!(drained);
    loop {
        tokio::select! {
            () = &mut drained => break,
            Some(signal) = s.kill_rx.recv() => {
                deliver(&mut s.child, s.pid, signal);
            }
        }
    }

    let (exit_code, signal) = match status {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            warn!("waiting for `{}` failed: {e}", s.command);
            (None, None)
        }
    };
    let result = ProcessResult::new(
        s.command,
        s.pid,
        s.stdout.contents(),
        s.stderr.contents(),
        exit_code,
        signal,
        s.started.elapsed(),
        s.control.timed_out(),
    );
    debug!(
        "pid {:?} settled: code={exit_code:?} signal={signal:?} in {:?}",
        s.pid,
        result.duration()
    );
    if s.history {
        logging::append_history(&result);
    }
    s.settled_tx.send_replace(Some(Settled {
        result: Arc::new(result),
        spawn_error: None,
        finished: Instant::now(),
    }));
}

async fn drain(pumps: [Option<JoinHandle<()>>; 2], command: String) {
    for pump in pumps.into_iter().flatten() {
        if let Err(e) = pump.await {
            warn!("output pump for `{command}` failed: {e}");
        }
    }
}

/// Signal the child's process group. False when nothing was sent.
fn deliver(child: &mut Child, pid: Option<u32>, signal: Signal) -> bool {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(sig) = signal.to_nix() else {
            warn!("{signal} is not deliverable here; process group {pid} left running");
            return false;
        };
        return match killpg(Pid::from_raw(pid as i32), sig) {
            Ok(()) => {
                debug!("sent {signal} to process group {pid}");
                true
            }
            Err(e) => {
                debug!("sending {signal} to process group {pid} failed: {e}");
                false
            }
        };
    }
    let _ = pid;
    // No signals here: anything we are asked to send becomes a kill.
    match child.start_kill() {
        Ok(()) => true,
        Err(e) => {
            debug!("killing child for {signal} failed: {e}");
            false
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<Signal> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(Signal::from_raw)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<Signal> {
    None
}
