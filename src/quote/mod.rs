//! Turning raw values into tokens the target shell reads back verbatim.
//!
//! [`quote`] is pure: the same value and dialect always produce the same
//! token. Words made only of `[A-Za-z0-9/_.\-@:=]` pass through bare unless
//! they start with `=` (zsh path expansion) or `@` (PowerShell splatting);
//! anything else is wrapped in the dialect's strongest quoting form. NUL cannot travel
//! through `argv` in any dialect and is rejected instead of truncated.

mod dialect;

pub use dialect::Dialect;

use std::borrow::Cow;

use crate::error::QuotingError;

/// Characters that never need quoting in any supported dialect.
fn is_safe_word(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(['=', '@'])
        && s.chars().all(|c| {
            matches!(c,
                'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '_' | '.' | '-' | '@' | ':' | '=')
        })
}

/// Quote `value` so that `dialect` parses it back as exactly one argument.
pub fn quote(value: &str, dialect: Dialect) -> Result<Cow<'_, str>, QuotingError> {
    if let Some(offset) = value.find('\0') {
        return Err(QuotingError::Nul { offset, dialect });
    }
    if is_safe_word(value) {
        return Ok(Cow::Borrowed(value));
    }
    let quoted = match dialect {
        Dialect::Bash => quote_ansi_c(value),
        Dialect::Posix => quote_single(value),
        Dialect::PowerShell => quote_powershell(value),
    };
    Ok(Cow::Owned(quoted))
}

/// Quote every element and join with single spaces.
///
/// An empty sequence yields an empty string (no argument at all), unlike an
/// empty element which yields an explicit empty argument.
pub fn quote_all<I, S>(values: I, dialect: Dialect) -> Result<String, QuotingError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&quote(value.as_ref(), dialect)?);
    }
    Ok(out)
}

/// bash `$'...'`: backslash escapes keep newlines and control characters
/// readable and unambiguous.
fn quote_ansi_c(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 3);
    out.push_str("$'");
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{b}' => out.push_str("\\v"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// POSIX single quotes: nothing is special inside, so a literal `'` closes,
/// emits an escaped quote, and reopens.
fn quote_single(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// PowerShell verbatim strings. PowerShell also accepts the typographic
/// single quotes as delimiters, so those are doubled as well.
fn quote_powershell(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{201b}') {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Split a POSIX command line into words using shlex.
///
/// Returns `None` for input shlex cannot parse (unbalanced quotes). ANSI-C
/// `$'...'` strings are a bash extension and are not understood here.
pub fn tokenize(command: &str) -> Option<Vec<String>> {
    shlex::split(command)
}
