//! shx: run shell commands from async Rust without quoting bugs.
//!
//! Commands are written as `{}` templates. Every interpolated value is
//! quoted for the target shell before it is spliced in, the command is
//! spawned at once, and the returned [`ProcessHandle`] can be awaited,
//! piped into another command, or tuned with `quiet`/`nothrow`/`timeout`
//! while it runs.
//!
//! ```no_run
//! # async fn demo() -> Result<(), shx::ExecError> {
//! let branch = shx::sh!("git branch --show-current")?.await?;
//! let count = shx::sh!("git log --oneline {}", &branch)?
//!     .pipe(shx::Shell::global().build("wc -l", Vec::<shx::Arg>::new())?)
//!     .await?;
//! println!("{branch}: {count} commits");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **[`quote`]**: Dialect-aware quoting (bash `$'..'`, POSIX `'..'`, PowerShell).
//! - **[`command`]**: Templates and typed values resolved into a [`QuotedCommand`].
//! - **[`process`]**: Spawning, output capture, handles, pipelines, stdin forwarding.
//! - **[`classify`]**: Settled process to success or [`ExecError`].
//! - **[`shell`]**: The [`Shell`] context carrying default options, and [`sh!`].
//! - **[`config`]**: Configuration loading: embedded defaults + user overlay merge.
//! - **[`script`]**: Loading script files and markdown into runnable units.
//! - **[`logging`]**: Stderr logger, verbose echo, `~/.local/share/shx/history.log`.

/// Exit-status classification and failure messages.
pub mod classify;
/// Templates, interpolated values, and quoted command lines.
pub mod command;
/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Error types.
pub mod error;
/// Diagnostics and command history.
pub mod logging;
/// Child processes and their handles.
pub mod process;
/// Shell quoting per dialect.
pub mod quote;
/// Script and markdown loading.
pub mod script;
/// Spawn context with per-call overrides.
pub mod shell;

pub use command::{Arg, QuotedCommand, Template};
pub use error::{ExecError, QuotingError};
pub use process::{PipeFailure, ProcessHandle, ProcessResult, Signal, StdinMode};
pub use quote::Dialect;
pub use shell::Shell;
