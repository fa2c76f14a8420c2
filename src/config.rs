use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::process::{PipeFailure, ProcessOptions, Signal, StdinMode};
use crate::quote::Dialect;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Failure to read, parse or apply a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

// ── Final (merged) config types ──

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ShellConfig {
    /// Shell binary; empty means the dialect's usual shell.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub dialect: Dialect,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProcessConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub nothrow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// 0 disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,
    #[serde(default)]
    pub grace_period_ms: u64,
    #[serde(default)]
    pub stdin: StdinMode,
    #[serde(default)]
    pub pipe_failure: PipeFailure,
}

fn default_kill_signal() -> String {
    "SIGTERM".into()
}

/// Variables added to every child's inherited environment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EnvConfig {
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub history: bool,
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    #[serde(default)]
    shell: ShellOverlay,
    #[serde(default)]
    process: ProcessOverlay,
    #[serde(default)]
    env: EnvOverlay,
    #[serde(default)]
    logging: LoggingOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct ShellOverlay {
    path: Option<String>,
    args: Option<Vec<String>>,
    prefix: Option<String>,
    dialect: Option<Dialect>,
}

#[derive(Debug, Deserialize, Default)]
struct ProcessOverlay {
    verbose: Option<bool>,
    quiet: Option<bool>,
    nothrow: Option<bool>,
    cwd: Option<String>,
    timeout_ms: Option<u64>,
    kill_signal: Option<String>,
    grace_period_ms: Option<u64>,
    stdin: Option<StdinMode>,
    pipe_failure: Option<PipeFailure>,
}

#[derive(Debug, Deserialize, Default)]
struct EnvOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    vars: BTreeMap<String, String>,
    #[serde(default)]
    remove_vars: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingOverlay {
    level: Option<String>,
    history: Option<bool>,
}

// ── Merge logic ──

/// Merge a user table into a default table.
/// In replace mode: user table replaces default entirely.
/// In merge mode: remove keys first, then insert additions (user wins).
fn merge_map(
    base: &mut BTreeMap<String, String>,
    add: BTreeMap<String, String>,
    remove: &[String],
    replace: bool,
) {
    if replace {
        *base = add;
    } else {
        base.retain(|key, _| !remove.contains(key));
        base.extend(add);
    }
}

impl Config {
    /// Load the default embedded configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Embedded defaults with ~/.config/shx/config.toml merged on top, if
    /// it exists.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::user_config_path() {
            Some(path) if path.is_file() => Self::load_from(&path),
            _ => Ok(Self::default_config()),
        }
    }

    /// Embedded defaults with the overlay at `path` merged on top.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let overlay = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("applying config overlay {}", path.display());
        let mut config = Self::default_config();
        config.apply_overlay(overlay);
        Ok(config)
    }

    fn user_config_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(Path::new(&home).join(".config/shx/config.toml"))
    }

    /// Apply an overlay on top of this config (merge semantics).
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        // Shell: switching dialect resets whatever the overlay leaves unset.
        let s = overlay.shell;
        if let Some(dialect) = s.dialect {
            self.shell.dialect = dialect;
            self.shell.path = s.path.clone().unwrap_or_default();
            self.shell.args = dialect.invocation_args();
            self.shell.prefix = dialect.default_prefix().to_string();
        }
        if let Some(v) = s.path {
            self.shell.path = v;
        }
        if let Some(v) = s.args {
            self.shell.args = v;
        }
        if let Some(v) = s.prefix {
            self.shell.prefix = v;
        }

        // Process: scalar overrides
        let p = overlay.process;
        if let Some(v) = p.verbose {
            self.process.verbose = v;
        }
        if let Some(v) = p.quiet {
            self.process.quiet = v;
        }
        if let Some(v) = p.nothrow {
            self.process.nothrow = v;
        }
        if let Some(v) = p.cwd {
            self.process.cwd = Some(v);
        }
        if let Some(v) = p.timeout_ms {
            self.process.timeout_ms = v;
        }
        if let Some(v) = p.kill_signal {
            self.process.kill_signal = v;
        }
        if let Some(v) = p.grace_period_ms {
            self.process.grace_period_ms = v;
        }
        if let Some(v) = p.stdin {
            self.process.stdin = v;
        }
        if let Some(v) = p.pipe_failure {
            self.process.pipe_failure = v;
        }

        // Env
        let e = overlay.env;
        merge_map(&mut self.env.vars, e.vars, &e.remove_vars, e.replace);

        // Logging
        let l = overlay.logging;
        if let Some(v) = l.level {
            self.logging.level = v;
        }
        if let Some(v) = l.history {
            self.logging.history = v;
        }
    }

    /// Apply an overlay from a TOML string. Used for testing.
    #[cfg(test)]
    fn apply_overlay_str(&mut self, toml_str: &str) {
        let overlay: ConfigOverlay = toml::from_str(toml_str).unwrap();
        self.apply_overlay(overlay);
    }

    /// Render as TOML, for `--dump-config`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            field: "config",
            message: e.to_string(),
        })
    }

    /// Log level from `[logging] level`; unknown names fall back to `warn`.
    pub fn log_level(&self) -> log::LevelFilter {
        self.logging.level.parse().unwrap_or(log::LevelFilter::Warn)
    }

    /// Resolve paths and names into the options every spawn starts from.
    pub fn to_options(&self) -> Result<ProcessOptions, ConfigError> {
        let dialect = self.shell.dialect;
        let kill_signal: Signal =
            self.process
                .kill_signal
                .parse()
                .map_err(|message| ConfigError::Invalid {
                    field: "process.kill_signal",
                    message,
                })?;
        let args = if self.shell.args.is_empty() {
            dialect.invocation_args()
        } else {
            self.shell.args.clone()
        };
        Ok(ProcessOptions {
            shell: resolve_shell(&self.shell.path, dialect),
            shell_args: args,
            prefix: self.shell.prefix.clone(),
            dialect,
            cwd: self.process.cwd.as_deref().map(expand_path),
            env: self.env.vars.clone(),
            verbose: self.process.verbose,
            quiet: self.process.quiet,
            nothrow: self.process.nothrow,
            timeout: (self.process.timeout_ms > 0)
                .then(|| Duration::from_millis(self.process.timeout_ms)),
            kill_signal,
            grace_period: Duration::from_millis(self.process.grace_period_ms),
            stdin: self.process.stdin,
            stdin_source: None,
            pipe_failure: self.process.pipe_failure,
            history: self.logging.history,
        })
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Absolute path for a bare shell name when it is on PATH. Otherwise the
/// name is kept and a missing shell surfaces as a spawn failure.
pub fn resolve_shell(path: &str, dialect: Dialect) -> PathBuf {
    let path = if path.is_empty() {
        dialect.default_shell()
    } else {
        path
    };
    let expanded = expand_path(path);
    if expanded.components().count() > 1 {
        return expanded;
    }
    match which::which(&expanded) {
        Ok(found) => found,
        Err(e) => {
            debug!("shell {} not found on PATH: {e}", expanded.display());
            expanded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = Config::default_config();
        assert_eq!(config.shell.path, "bash");
        assert_eq!(config.shell.args, vec!["-c"]);
        assert_eq!(config.shell.prefix, "set -euo pipefail;");
        assert_eq!(config.shell.dialect, Dialect::Bash);
        assert_eq!(config.process.kill_signal, "SIGTERM");
        assert_eq!(config.process.grace_period_ms, 2000);
        assert!(config.env.vars.is_empty());
        assert!(!config.logging.history);
    }

    #[test]
    fn default_options_have_no_timeout() {
        let options = Config::default_config().to_options().unwrap();
        assert_eq!(options.timeout, None);
        assert_eq!(options.kill_signal, Signal::Term);
        assert_eq!(options.grace_period, Duration::from_secs(2));
        assert_eq!(options.stdin, StdinMode::Buffered);
    }

    // ── Merge semantics ──

    #[test]
    fn overlay_overrides_scalars() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [process]
            nothrow = true
            timeout_ms = 1500
            kill_signal = "SIGINT"
        "#,
        );
        assert!(config.process.nothrow);
        let options = config.to_options().unwrap();
        assert_eq!(options.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.kill_signal, Signal::Int);
        // Untouched scalars keep their defaults
        assert!(!config.process.quiet);
    }

    #[test]
    fn overlay_extends_env() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [env]
            vars = { FOO = "1", BAR = "2" }
        "#,
        );
        config.apply_overlay_str(
            r#"
            [env]
            vars = { BAZ = "3" }
            remove_vars = ["BAR"]
        "#,
        );
        let keys: Vec<&str> = config.env.vars.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["BAZ", "FOO"]);
    }

    #[test]
    fn overlay_replace_env() {
        let mut config = Config::default_config();
        config.apply_overlay_str(r#"env.vars = { A = "a" }"#);
        config.apply_overlay_str(
            r#"
            [env]
            replace = true
            vars = { B = "b" }
        "#,
        );
        assert_eq!(config.env.vars.len(), 1);
        assert_eq!(config.env.vars["B"], "b");
    }

    #[test]
    fn overlay_dialect_switch_resets_invocation() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [shell]
            dialect = "posix"
        "#,
        );
        assert_eq!(config.shell.prefix, "set -eu;");
        assert_eq!(config.shell.args, vec!["-c"]);
        assert!(config.shell.path.is_empty());
    }

    #[test]
    fn overlay_dialect_keeps_explicit_fields() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [shell]
            dialect = "posix"
            path = "/bin/dash"
            prefix = ""
        "#,
        );
        let options = config.to_options().unwrap();
        assert_eq!(options.shell, PathBuf::from("/bin/dash"));
        assert_eq!(options.prefix, "");
        assert_eq!(options.dialect, Dialect::Posix);
    }

    #[test]
    fn bad_kill_signal_is_rejected() {
        let mut config = Config::default_config();
        config.apply_overlay_str(
            r#"
            [process]
            kill_signal = "SIGNOPE"
        "#,
        );
        let err = config.to_options().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "process.kill_signal",
                ..
            }
        ));
    }

    #[test]
    fn unknown_stdin_mode_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[process]\nstdin = \"tty\"\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn load_from_applies_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\nhistory = true\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
        assert!(config.to_options().unwrap().history);
    }

    #[test]
    fn tilde_cwd_is_expanded() {
        let mut config = Config::default_config();
        config.apply_overlay_str("process.cwd = \"~/work\"");
        let cwd = config.to_options().unwrap().cwd.unwrap();
        assert!(!cwd.starts_with("~"), "{}", cwd.display());
        assert!(cwd.ends_with("work"));
    }

    #[test]
    fn empty_overlay_changes_nothing() {
        let mut config = Config::default_config();
        config.apply_overlay_str("");
        assert_eq!(config.shell.prefix, "set -euo pipefail;");
        assert!(config.env.vars.is_empty());
    }

    #[test]
    fn dump_round_trips() {
        let config = Config::default_config();
        let text = config.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.shell.prefix, config.shell.prefix);
    }
}
