//! Diagnostics, the verbose command echo, and the command history log.

use std::io::Write;
use std::path::PathBuf;

use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use crate::process::ProcessResult;

/// Route `log` records to stderr. Calling it twice keeps the first logger.
pub fn init(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}

/// Print `$ <command>` to stderr, the way a shell with `set -x` would.
pub fn echo_command(command: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "$ {command}");
}

pub fn history_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".local/share/shx/history.log"))
}

/// Append a settled command to ~/.local/share/shx/history.log.
/// Best-effort: failures are silently ignored.
pub fn append_history(result: &ProcessResult) {
    let Some(log_path) = history_path() else {
        return;
    };
    if let Some(dir) = log_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    else {
        return;
    };
    let _ = writeln!(file, "{}", history_line(result, &timestamp_now()));
}

fn history_line(result: &ProcessResult, ts: &str) -> String {
    let status = match (result.exit_code(), result.signal()) {
        (_, Some(signal)) => signal.name(),
        (Some(code), None) => code.to_string(),
        (None, None) => "-".to_string(),
    };
    // One line per command: flatten newlines.
    let cmd: String = result
        .command()
        .chars()
        .take(200)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    format!(
        "{ts}\t{status}\t{ms}\t{cmd}",
        ms = result.duration().as_millis()
    )
}

/// Simple UTC timestamp without external deps.
fn timestamp_now() -> String {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_timestamp(dur.as_secs())
}

fn format_timestamp(secs: u64) -> String {
    let days = secs / 86400;
    let rem = secs % 86400;
    let h = rem / 3600;
    let m = (rem % 3600) / 60;
    let s = rem % 60;
    let (year, month, day) = epoch_days_to_date(days);
    format!("{year:04}-{month:02}-{day:02}T{h:02}:{m:02}:{s:02}Z")
}

/// Convert days since Unix epoch to (year, month, day).
fn epoch_days_to_date(days: u64) -> (u64, u64, u64) {
    // Civil calendar from days algorithm (Howard Hinnant)
    let z = days + 719468;
    let era = z / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
