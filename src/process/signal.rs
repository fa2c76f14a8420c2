use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// A signal that can be sent to a child, or that a child died from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Hup,
    Int,
    Quit,
    Kill,
    Usr1,
    Usr2,
    Pipe,
    Alrm,
    Term,
    /// Anything else, by raw number.
    Other(i32),
}

impl Signal {
    /// Conventional `SIG*` name.
    pub fn name(self) -> String {
        match self {
            Signal::Hup => "SIGHUP".into(),
            Signal::Int => "SIGINT".into(),
            Signal::Quit => "SIGQUIT".into(),
            Signal::Kill => "SIGKILL".into(),
            Signal::Usr1 => "SIGUSR1".into(),
            Signal::Usr2 => "SIGUSR2".into(),
            Signal::Pipe => "SIGPIPE".into(),
            Signal::Alrm => "SIGALRM".into(),
            Signal::Term => "SIGTERM".into(),
            Signal::Other(n) => other_name(n),
        }
    }

    /// Platform signal number.
    pub fn number(self) -> i32 {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal as Nix;
            match self {
                Signal::Hup => Nix::SIGHUP as i32,
                Signal::Int => Nix::SIGINT as i32,
                Signal::Quit => Nix::SIGQUIT as i32,
                Signal::Kill => Nix::SIGKILL as i32,
                Signal::Usr1 => Nix::SIGUSR1 as i32,
                Signal::Usr2 => Nix::SIGUSR2 as i32,
                Signal::Pipe => Nix::SIGPIPE as i32,
                Signal::Alrm => Nix::SIGALRM as i32,
                Signal::Term => Nix::SIGTERM as i32,
                Signal::Other(n) => n,
            }
        }
        #[cfg(not(unix))]
        {
            match self {
                Signal::Hup => 1,
                Signal::Int => 2,
                Signal::Quit => 3,
                Signal::Kill => 9,
                Signal::Usr1 => 10,
                Signal::Usr2 => 12,
                Signal::Pipe => 13,
                Signal::Alrm => 14,
                Signal::Term => 15,
                Signal::Other(n) => n,
            }
        }
    }

    /// Map a raw number (e.g. from an exit status) back to a signal.
    pub fn from_raw(number: i32) -> Self {
        [
            Signal::Hup,
            Signal::Int,
            Signal::Quit,
            Signal::Kill,
            Signal::Usr1,
            Signal::Usr2,
            Signal::Pipe,
            Signal::Alrm,
            Signal::Term,
        ]
        .into_iter()
        .find(|s| s.number() == number)
        .unwrap_or(Signal::Other(number))
    }

    #[cfg(unix)]
    pub(crate) fn to_nix(self) -> Option<nix::sys::signal::Signal> {
        nix::sys::signal::Signal::try_from(self.number()).ok()
    }
}

#[cfg(unix)]
fn other_name(n: i32) -> String {
    nix::sys::signal::Signal::try_from(n)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{n}"))
}

#[cfg(not(unix))]
fn other_name(n: i32) -> String {
    format!("SIG{n}")
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Signal {
    type Err = String;

    /// Accepts `SIGTERM`, `TERM`, `term`, or a number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<i32>() {
            return Ok(Signal::from_raw(n));
        }
        let upper = trimmed.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "HUP" => Ok(Signal::Hup),
            "INT" => Ok(Signal::Int),
            "QUIT" => Ok(Signal::Quit),
            "KILL" => Ok(Signal::Kill),
            "USR1" => Ok(Signal::Usr1),
            "USR2" => Ok(Signal::Usr2),
            "PIPE" => Ok(Signal::Pipe),
            "ALRM" => Ok(Signal::Alrm),
            "TERM" => Ok(Signal::Term),
            _ => Err(format!("unknown signal: {s}")),
        }
    }
}

impl Serialize for Signal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}
