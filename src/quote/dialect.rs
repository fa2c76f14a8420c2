use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Quoting and invocation rules of the shell a command is handed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// bash/zsh/ksh: ANSI-C `$'...'` strings.
    #[default]
    Bash,
    /// Plain POSIX `sh` (dash, busybox): single quotes only.
    Posix,
    /// PowerShell (`pwsh`, `powershell.exe`).
    #[serde(alias = "pwsh")]
    PowerShell,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Bash => "bash",
            Dialect::Posix => "posix",
            Dialect::PowerShell => "powershell",
        }
    }

    /// Arguments placed between the shell path and the command text.
    pub fn invocation_args(self) -> Vec<String> {
        match self {
            Dialect::Bash | Dialect::Posix => vec!["-c".into()],
            Dialect::PowerShell => vec![
                "-NoProfile".into(),
                "-NonInteractive".into(),
                "-Command".into(),
            ],
        }
    }

    /// Code run before every command unless configured otherwise.
    pub fn default_prefix(self) -> &'static str {
        match self {
            Dialect::Bash => "set -euo pipefail;",
            Dialect::Posix => "set -eu;",
            Dialect::PowerShell => "$ErrorActionPreference = 'Stop';",
        }
    }

    /// Shell looked up on `PATH` when none is configured.
    pub fn default_shell(self) -> &'static str {
        match self {
            Dialect::Bash => "bash",
            Dialect::Posix => "sh",
            Dialect::PowerShell => "pwsh",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bash" | "zsh" | "ksh" => Ok(Dialect::Bash),
            "posix" | "sh" | "dash" => Ok(Dialect::Posix),
            "powershell" | "pwsh" => Ok(Dialect::PowerShell),
            other => Err(format!("unknown shell dialect: {other}")),
        }
    }
}
