//! The context commands are spawned from.
//!
//! A [`Shell`] owns the baseline [`ProcessOptions`]. Overrides return a new
//! `Shell`, so the process-wide default from [`Shell::global`] is never
//! mutated after it is first read.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::warn;

use crate::command::{self, Arg, QuotedCommand, Template};
use crate::config::{self, Config, ConfigError};
use crate::error::{ExecError, QuotingError};
use crate::process::{
    self, PipeFailure, ProcessHandle, ProcessOptions, Signal, StdinMode, StdinSource,
};
use crate::quote::{self, Dialect};

#[derive(Debug, Clone, Default)]
pub struct Shell {
    options: ProcessOptions,
}

impl Shell {
    pub fn new(options: ProcessOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.to_options().map(Self::new)
    }

    /// Process-wide default, built from [`Config::load`] on first use.
    /// A broken user config is reported and the embedded defaults are used.
    pub fn global() -> &'static Shell {
        static GLOBAL: OnceLock<Shell> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Config::load().unwrap_or_else(|e| {
                warn!("ignoring user config: {e}");
                Config::default_config()
            });
            Shell::from_config(&config).unwrap_or_else(|e| {
                warn!("ignoring user config: {e}");
                Shell::default()
            })
        })
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    pub fn dialect(&self) -> Dialect {
        self.options.dialect
    }

    fn with(&self, f: impl FnOnce(&mut ProcessOptions)) -> Shell {
        let mut options = self.options.clone();
        f(&mut options);
        Shell { options }
    }

    pub fn with_cwd(&self, dir: impl Into<PathBuf>) -> Shell {
        let dir = dir.into();
        self.with(|o| o.cwd = Some(dir))
    }

    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Shell {
        let (key, value) = (key.into(), value.into());
        self.with(|o| {
            o.env.insert(key, value);
        })
    }

    pub fn with_prefix(&self, prefix: impl Into<String>) -> Shell {
        let prefix = prefix.into();
        self.with(|o| o.prefix = prefix)
    }

    /// Use another binary with the same dialect and invocation.
    pub fn with_shell(&self, path: impl Into<PathBuf>) -> Shell {
        let path = path.into();
        self.with(|o| o.shell = path)
    }

    /// Switch dialect along with its usual shell, arguments and prefix.
    pub fn with_dialect(&self, dialect: Dialect) -> Shell {
        self.with(|o| {
            o.dialect = dialect;
            o.shell = config::resolve_shell("", dialect);
            o.shell_args = dialect.invocation_args();
            o.prefix = dialect.default_prefix().to_string();
        })
    }

    pub fn quiet(&self) -> Shell {
        self.with(|o| o.quiet = true)
    }

    pub fn verbose(&self) -> Shell {
        self.with(|o| o.verbose = true)
    }

    pub fn nothrow(&self) -> Shell {
        self.with(|o| o.nothrow = true)
    }

    pub fn with_timeout(&self, after: Duration) -> Shell {
        self.with(|o| o.timeout = Some(after))
    }

    pub fn with_kill_signal(&self, signal: Signal) -> Shell {
        self.with(|o| o.kill_signal = signal)
    }

    pub fn with_stdin(&self, mode: StdinMode) -> Shell {
        self.with(|o| o.stdin = mode)
    }

    /// Forward `source` into every child spawned from the new context.
    pub fn with_stdin_source(&self, source: Arc<StdinSource>) -> Shell {
        self.with(|o| {
            o.stdin = StdinMode::Forward;
            o.stdin_source = Some(source);
        })
    }

    pub fn with_pipe_failure(&self, policy: PipeFailure) -> Shell {
        self.with(|o| o.pipe_failure = policy)
    }

    pub fn quote<'a>(&self, value: &'a str) -> Result<Cow<'a, str>, QuotingError> {
        quote::quote(value, self.options.dialect)
    }

    /// Fill a `{}` template with quoted values, without spawning.
    pub fn build<I>(&self, template: &str, args: I) -> Result<QuotedCommand, QuotingError>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let template = Template::parse(template)?;
        command::build(&template, args, self.options.dialect)
    }

    /// Build and spawn. Errors only for templates that cannot be built;
    /// everything after that is reported by awaiting the handle.
    pub fn cmd<I>(&self, template: &str, args: I) -> Result<ProcessHandle, ExecError>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        Ok(self.run(self.build(template, args)?))
    }

    /// Spawn an argv, quoting every element.
    pub fn args<I>(&self, argv: I) -> Result<ProcessHandle, ExecError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let command = command::from_argv(argv, self.options.dialect)?;
        Ok(self.run(command))
    }

    pub fn run(&self, command: QuotedCommand) -> ProcessHandle {
        process::run(command, self.options.clone())
    }
}

/// Build and spawn a command from a `{}` template.
///
/// ```no_run
/// # async fn demo() -> Result<(), shx::ExecError> {
/// use shx::{Shell, sh};
///
/// let name = "it's here";
/// let out = sh!("printf '%s' {}", name)?.await?;
/// assert_eq!(out.stdout(), "it's here");
///
/// let quiet = Shell::global().quiet();
/// let files = sh!(quiet => "ls {}", ["-l", "/tmp"])?.await?;
/// # let _ = files;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! sh {
    ($template:literal $(, $arg:expr)* $(,)?) => {
        $crate::sh!($crate::Shell::global() => $template $(, $arg)*)
    };
    ($shell:expr => $template:literal $(, $arg:expr)* $(,)?) => {{
        let args: ::std::vec::Vec<$crate::Arg> = ::std::vec![$($crate::Arg::from($arg)),*];
        $shell.cmd($template, args)
    }};
}
