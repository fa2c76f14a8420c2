//! Script loading: turning a file into the shell snippets to run.
//!
//! Markdown files contribute every fenced `sh`/`bash`/`shell` block; any
//! other file is one snippet with its shebang removed. Loading failures are
//! [`LoadError`]s and never look like command failures.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Where a snippet came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    /// 1-based line of the snippet's first line.
    pub line: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// One piece of shell source, run as a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub location: Location,
    pub source: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{location}: code block is never closed")]
    UnterminatedFence { location: Location },

    #[error("{}: no sh, bash or shell code blocks", .path.display())]
    NoBlocks { path: PathBuf },
}

const SHELL_LANGS: &[&str] = &["sh", "bash", "shell"];

/// Load `path` (`-` for stdin) into runnable units.
pub fn load(path: &Path) -> Result<Vec<Unit>, LoadError> {
    let read_error = |source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    };
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(read_error)?;
        text
    } else {
        std::fs::read_to_string(path).map_err(read_error)?
    };
    parse(&text, path)
}

/// Split already loaded source text, using `origin` to pick the format and
/// to label locations.
pub fn parse(text: &str, origin: &Path) -> Result<Vec<Unit>, LoadError> {
    let is_markdown = origin
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"));
    if is_markdown {
        let units = markdown_units(text, origin)?;
        if units.is_empty() {
            return Err(LoadError::NoBlocks {
                path: origin.to_path_buf(),
            });
        }
        return Ok(units);
    }
    Ok(vec![plain_unit(text, origin)])
}

fn plain_unit(text: &str, origin: &Path) -> Unit {
    let (source, line) = match text.strip_prefix("#!") {
        Some(rest) => (rest.split_once('\n').map_or("", |(_, body)| body), 2),
        None => (text, 1),
    };
    Unit {
        location: Location {
            path: origin.to_path_buf(),
            line,
        },
        source: source.to_string(),
    }
}

struct Fence {
    marker: char,
    len: usize,
    start: usize,
    runnable: bool,
    body: Vec<String>,
}

/// Opening or closing fence: at most three spaces of indent, then three or
/// more backticks or tildes.
fn fence_marker(line: &str) -> Option<(char, usize, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    (len >= 3).then(|| (marker, len, rest[len..].trim()))
}

fn markdown_units(text: &str, origin: &Path) -> Result<Vec<Unit>, LoadError> {
    let mut units = Vec::new();
    let mut open: Option<Fence> = None;
    for (i, line) in text.lines().enumerate() {
        let lineno = i + 1;
        match open.as_mut() {
            None => {
                if let Some((marker, len, info)) = fence_marker(line) {
                    let lang = info.split_whitespace().next().unwrap_or("");
                    open = Some(Fence {
                        marker,
                        len,
                        start: lineno + 1,
                        runnable: SHELL_LANGS.contains(&lang.to_ascii_lowercase().as_str()),
                        body: Vec::new(),
                    });
                }
            }
            Some(fence) => {
                let closes = fence_marker(line)
                    .is_some_and(|(m, n, rest)| m == fence.marker && n >= fence.len && rest.is_empty());
                if !closes {
                    fence.body.push(line.to_string());
                    continue;
                }
                if let Some(fence) = open.take()
                    && fence.runnable
                {
                    units.push(Unit {
                        location: Location {
                            path: origin.to_path_buf(),
                            line: fence.start,
                        },
                        source: fence.body.join("\n"),
                    });
                }
            }
        }
    }
    match open {
        Some(fence) => Err(LoadError::UnterminatedFence {
            location: Location {
                path: origin.to_path_buf(),
                line: fence.start - 1,
            },
        }),
        None => Ok(units),
    }
}
