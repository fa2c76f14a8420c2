use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use super::Signal;
use crate::command::Arg;

/// Everything a settled process left behind. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    command: String,
    pid: Option<u32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    signal: Option<Signal>,
    duration: Duration,
    timed_out: Option<Duration>,
}

impl ProcessResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        command: String,
        pid: Option<u32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: Option<i32>,
        signal: Option<Signal>,
        duration: Duration,
        timed_out: Option<Duration>,
    ) -> Self {
        Self {
            command,
            pid,
            stdout,
            stderr,
            exit_code,
            signal,
            duration,
            timed_out,
        }
    }

    /// Result for a process that never started.
    pub(crate) fn unstarted(command: String, duration: Duration) -> Self {
        Self::new(command, None, Vec::new(), Vec::new(), None, None, duration, None)
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        command: &str,
        stdout: &[u8],
        stderr: &[u8],
        exit_code: Option<i32>,
        signal: Option<Signal>,
    ) -> Self {
        Self::new(
            command.to_string(),
            Some(1),
            stdout.to_vec(),
            stderr.to_vec(),
            exit_code,
            signal,
            Duration::from_millis(5),
            None,
        )
    }

    /// The command line as handed to the shell (without the prefix).
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Captured stdout, decoded lossily.
    pub fn stdout(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stdout_bytes(&self) -> &[u8] {
        &self.stdout
    }

    /// Captured stderr, decoded lossily.
    pub fn stderr(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    pub fn stderr_bytes(&self) -> &[u8] {
        &self.stderr
    }

    /// Exit code; `None` when the process died from a signal or never ran.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn signal(&self) -> Option<Signal> {
        self.signal
    }

    /// Wall-clock time from spawn to settlement.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The configured limit, when the process was stopped for exceeding it.
    pub fn timed_out(&self) -> Option<Duration> {
        self.timed_out
    }

    /// Exited with code 0, untouched by signals or timeouts.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none() && self.timed_out.is_none()
    }

    /// Stdout minus one trailing newline: the form used for interpolation.
    pub fn trimmed_stdout(&self) -> String {
        trim_newline(&self.stdout()).to_string()
    }
}

pub(crate) fn trim_newline(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(trim_newline(&self.stdout()))
    }
}

impl Serialize for ProcessResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ProcessResult", 8)?;
        s.serialize_field("command", &self.command)?;
        s.serialize_field("pid", &self.pid)?;
        s.serialize_field("stdout", &self.stdout())?;
        s.serialize_field("stderr", &self.stderr())?;
        s.serialize_field("exit_code", &self.exit_code)?;
        s.serialize_field("signal", &self.signal)?;
        s.serialize_field("duration_ms", &(self.duration.as_millis() as u64))?;
        s.serialize_field(
            "timed_out_ms",
            &self.timed_out.map(|d| d.as_millis() as u64),
        )?;
        s.end()
    }
}

impl From<&ProcessResult> for Arg {
    fn from(result: &ProcessResult) -> Self {
        Arg::output(result.trimmed_stdout())
    }
}

impl From<ProcessResult> for Arg {
    fn from(result: ProcessResult) -> Self {
        Arg::from(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_trims_one_newline() {
        let r = ProcessResult::for_test("printf", b"a\n\n", b"", Some(0), None);
        assert_eq!(r.to_string(), "a\n");
        let r = ProcessResult::for_test("printf", b"a\r\n", b"", Some(0), None);
        assert_eq!(r.trimmed_stdout(), "a\r");
        assert_eq!(Arg::from(&r), Arg::output("a\r"));
    }

    #[test]
    fn success_requires_zero_exit() {
        assert!(ProcessResult::for_test("true", b"", b"", Some(0), None).success());
        assert!(!ProcessResult::for_test("false", b"", b"", Some(1), None).success());
        assert!(!ProcessResult::for_test("x", b"", b"", None, Some(Signal::Term)).success());
    }

    #[test]
    fn serializes_text_fields() {
        let r = ProcessResult::for_test("echo hi", b"hi\n", b"", Some(0), None);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["stdout"], "hi\n");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["signal"], serde_json::Value::Null);
        assert_eq!(json["duration_ms"], 5);
    }
}
