//! Error taxonomy for command construction and execution.
//!
//! Construction problems ([`QuotingError`]) and spawn failures are always
//! raised. Nonzero exits, signal deaths and timeouts are raised only when the
//! invocation is not `nothrow`; see [`crate::classify`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{describe_exit, describe_signal, describe_timeout};
use crate::process::ProcessResult;
use crate::quote::Dialect;

/// `sysexits.h` codes used when there is no child exit code to forward.
pub mod exit {
    /// Command line usage error.
    pub const USAGE: i32 = 64;
    /// Value could not be quoted.
    pub const DATAERR: i32 = 65;
    /// Script could not be loaded.
    pub const NOINPUT: i32 = 66;
    /// Internal wiring error (e.g. pipe sink already claimed).
    pub const SOFTWARE: i32 = 70;
    /// Shell could not be started.
    pub const OSERR: i32 = 71;
    /// Reading or writing a child stream failed.
    pub const IOERR: i32 = 74;
    /// Stdin forwarding lease was busy.
    pub const TEMPFAIL: i32 = 75;
    /// Configuration file unreadable or invalid.
    pub const CONFIG: i32 = 78;
    /// Conventional exit code of `timeout(1)`.
    pub const TIMEOUT: i32 = 124;
}

/// A value that cannot be turned into a safe shell token, or a template
/// that does not line up with its values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotingError {
    #[error("value contains a NUL byte at offset {offset}; {dialect} arguments cannot carry it")]
    Nul { offset: usize, dialect: Dialect },

    #[error("template has {slots} slot(s) but {args} value(s) were supplied")]
    Arity { slots: usize, args: usize },

    #[error("unmatched `{brace}` at offset {offset} in template")]
    StrayBrace { brace: char, offset: usize },

    #[error("output of `{command}` interpolated before the process settled")]
    Unsettled { command: String },
}

/// One failing stage of a pipeline, reported by [`ExecError::PipelineStages`].
#[derive(Debug)]
pub struct StageFailure {
    pub index: usize,
    pub error: ExecError,
}

/// Everything that can go wrong between building a command and awaiting it.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Quoting(#[from] QuotingError),

    #[error("failed to start shell `{shell}`: {source}\n  command: {}", .output.command())]
    Spawn {
        shell: String,
        #[source]
        source: Arc<io::Error>,
        output: Box<ProcessResult>,
    },

    #[error("{}", describe_exit(.code, .output))]
    CommandFailure { code: i32, output: Box<ProcessResult> },

    #[error("{}", describe_signal(.signal, .output))]
    SignalTermination {
        signal: String,
        output: Box<ProcessResult>,
    },

    #[error("{}", describe_timeout(.after, .output))]
    Timeout {
        after: Duration,
        output: Box<ProcessResult>,
    },

    #[error("pipeline stage {index} failed: {source}")]
    PipelineStage {
        index: usize,
        #[source]
        source: Box<ExecError>,
    },

    #[error("{} pipeline stages failed:\n{}", .failures.len(), render_stages(.failures))]
    PipelineStages { failures: Vec<StageFailure> },

    #[error("writing to stdin of `{command}`: {source}")]
    Stdin {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("stdin forwarding is leased to another process")]
    StdinBusy,

    #[error("stdin of pipeline stage {index} is not available for piping")]
    PipeUnavailable { index: usize },
}

fn render_stages(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  [{}] {}", f.index, f.error))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ExecError {
    /// The settled result behind this error, if the process got that far.
    ///
    /// For pipeline errors this is the result of the stage the failure is
    /// attributed to (the first one for [`ExecError::PipelineStages`]).
    pub fn output(&self) -> Option<&ProcessResult> {
        match self {
            ExecError::Spawn { output, .. }
            | ExecError::CommandFailure { output, .. }
            | ExecError::SignalTermination { output, .. }
            | ExecError::Timeout { output, .. } => Some(&**output),
            ExecError::PipelineStage { source, .. } => source.output(),
            ExecError::PipelineStages { failures } => {
                failures.first().and_then(|f| f.error.output())
            }
            ExecError::Quoting(_)
            | ExecError::Stdin { .. }
            | ExecError::StdinBusy
            | ExecError::PipeUnavailable { .. } => None,
        }
    }

    /// Exit code a hosting script should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::Quoting(_) => exit::DATAERR,
            ExecError::Spawn { .. } => exit::OSERR,
            ExecError::CommandFailure { code, .. } => *code,
            ExecError::SignalTermination { output, .. } => output
                .signal()
                .map(|s| 128 + s.number())
                .unwrap_or(1),
            ExecError::Timeout { .. } => exit::TIMEOUT,
            ExecError::PipelineStage { source, .. } => source.exit_code(),
            ExecError::PipelineStages { failures } => failures
                .first()
                .map(|f| f.error.exit_code())
                .unwrap_or(1),
            ExecError::Stdin { .. } => exit::IOERR,
            ExecError::StdinBusy => exit::TEMPFAIL,
            ExecError::PipeUnavailable { .. } => exit::SOFTWARE,
        }
    }

    /// True for failures `nothrow` could have suppressed.
    pub fn is_suppressible(&self) -> bool {
        matches!(
            self,
            ExecError::CommandFailure { .. }
                | ExecError::SignalTermination { .. }
                | ExecError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Signal;

    fn result(code: Option<i32>, signal: Option<Signal>) -> ProcessResult {
        ProcessResult::for_test("false", b"", b"boom\n", code, signal)
    }

    #[test]
    fn command_failure_display_names_command_and_stderr() {
        let err = ExecError::CommandFailure {
            code: 127,
            output: Box::new(result(Some(127), None)),
        };
        let text = err.to_string();
        assert!(text.contains("exit code 127 (Command not found)"), "{text}");
        assert!(text.contains("command: false"), "{text}");
        assert!(text.contains("boom"), "{text}");
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn signal_exit_code_is_128_plus_number() {
        let err = ExecError::SignalTermination {
            signal: "SIGKILL".into(),
            output: Box::new(result(None, Some(Signal::Kill))),
        };
        assert_eq!(err.exit_code(), 128 + Signal::Kill.number());
    }

    #[test]
    fn stage_error_exposes_inner_output() {
        let err = ExecError::PipelineStage {
            index: 0,
            source: Box::new(ExecError::CommandFailure {
                code: 3,
                output: Box::new(result(Some(3), None)),
            }),
        };
        assert_eq!(err.output().and_then(|o| o.exit_code()), Some(3));
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().starts_with("pipeline stage 0 failed"));
    }

    #[test]
    fn construction_errors_are_not_suppressible() {
        let err = ExecError::from(QuotingError::Arity { slots: 1, args: 2 });
        assert!(!err.is_suppressible());
        assert!(err.output().is_none());
        assert_eq!(err.exit_code(), exit::DATAERR);
    }
}
