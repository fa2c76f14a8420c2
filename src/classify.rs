//! Turning a settled process into success or a structured failure.
//!
//! Precedence when several apply: spawn failure, then timeout, then signal,
//! then nonzero exit. Only the last three can be suppressed with `nothrow`.

use std::fmt::Write as _;
use std::time::Duration;

use crate::error::ExecError;
use crate::process::runner::Settled;
use crate::process::{ProcessOptions, ProcessResult, Signal};

/// What a settled process amounts to, before `nothrow` is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Exit(i32),
    Signal(Signal),
    Timeout(Duration),
}

pub fn verdict(result: &ProcessResult) -> Verdict {
    if let Some(after) = result.timed_out() {
        return Verdict::Timeout(after);
    }
    if let Some(signal) = result.signal() {
        return Verdict::Signal(signal);
    }
    match result.exit_code() {
        Some(0) => Verdict::Success,
        Some(code) => Verdict::Exit(code),
        // Status could not be collected.
        None => Verdict::Exit(1),
    }
}

pub(crate) fn classify(
    settled: &Settled,
    options: &ProcessOptions,
    nothrow: bool,
) -> Result<ProcessResult, ExecError> {
    let result = (*settled.result).clone();
    if let Some(source) = &settled.spawn_error {
        return Err(ExecError::Spawn {
            shell: options.shell.display().to_string(),
            source: source.clone(),
            output: Box::new(result),
        });
    }
    if nothrow {
        return Ok(result);
    }
    match verdict(&result) {
        Verdict::Success => Ok(result),
        Verdict::Exit(code) => Err(ExecError::CommandFailure {
            code,
            output: Box::new(result),
        }),
        Verdict::Signal(signal) => Err(ExecError::SignalTermination {
            signal: signal.name(),
            output: Box::new(result),
        }),
        Verdict::Timeout(after) => Err(ExecError::Timeout {
            after,
            output: Box::new(result),
        }),
    }
}

/// Conventional meaning of a shell exit code.
pub fn exit_code_description(code: i32) -> Option<&'static str> {
    Some(match code {
        1 => "General error",
        2 => "Misuse of shell builtins",
        126 => "Invoked command cannot execute",
        127 => "Command not found",
        128 => "Invalid exit argument",
        129 => "Hangup",
        130 => "Interrupt",
        131 => "Quit and dump core",
        132 => "Illegal instruction",
        133 => "Trace/breakpoint trap",
        134 => "Process aborted",
        135 => "Bus error: \"access to undefined portion of memory object\"",
        136 => "Floating point exception: \"erroneous arithmetic operation\"",
        137 => "Kill (terminate immediately)",
        138 => "User-defined 1",
        139 => "Segmentation violation",
        140 => "User-defined 2",
        141 => "Write to pipe with no one reading",
        142 => "Signal raised by alarm",
        143 => "Termination (request to terminate)",
        145 => "Child process terminated, stopped (or continued*)",
        146 => "Continue if stopped",
        147 => "Stop executing temporarily",
        148 => "Terminal stop signal",
        149 => "Background process attempting to read from tty (\"in\")",
        150 => "Background process attempting to write to tty (\"out\")",
        151 => "Urgent data available on socket",
        152 => "CPU time limit exceeded",
        153 => "File size limit exceeded",
        154 => "Signal raised by timer counting virtual time: \"virtual timer expired\"",
        155 => "Profiling timer expired",
        157 => "Pollable event",
        159 => "Bad syscall",
        _ => return None,
    })
}

fn render(headline: String, output: &ProcessResult) -> String {
    let mut text = headline;
    let _ = write!(text, "\n  command: {}", output.command());
    let stderr = output.stderr();
    let stderr = stderr.trim_end();
    if !stderr.is_empty() {
        let _ = write!(text, "\n  stderr:\n{stderr}");
    }
    text
}

pub(crate) fn describe_exit(code: &i32, output: &ProcessResult) -> String {
    let headline = match exit_code_description(*code) {
        Some(meaning) => format!("command failed with exit code {code} ({meaning})"),
        None => format!("command failed with exit code {code}"),
    };
    render(headline, output)
}

pub(crate) fn describe_signal(signal: &str, output: &ProcessResult) -> String {
    render(format!("command terminated by {signal}"), output)
}

pub(crate) fn describe_timeout(after: &Duration, output: &ProcessResult) -> String {
    render(format!("command timed out after {after:?}"), output)
}
