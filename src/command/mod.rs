//! Command construction: templates plus typed values in, one fully quoted
//! command line out. Nothing here spawns or touches the environment.

mod template;

pub use template::Template;

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::QuotingError;
use crate::quote::{self, Dialect};

/// A fully resolved command line, ready for the shell. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct QuotedCommand(String);

impl QuotedCommand {
    /// Wrap text the caller vouches for as already quoted.
    pub fn raw(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// POSIX word split of the command line (see [`quote::tokenize`]).
    pub fn words(&self) -> Option<Vec<String>> {
        quote::tokenize(&self.0)
    }
}

impl fmt::Display for QuotedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QuotedCommand {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgKind {
    Value(String),
    List(Vec<String>),
    Raw(String),
    Output(String),
    Pending(String),
}

/// One interpolated value.
///
/// Scalars become one token, sequences become one token per element, the
/// output of a settled process becomes one token holding its stdout. Only
/// [`Arg::raw`] reaches the shell unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg(ArgKind);

impl Arg {
    pub fn value(value: impl Into<String>) -> Self {
        Arg(ArgKind::Value(value.into()))
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Arg(ArgKind::List(
            values.into_iter().map(|s| s.as_ref().to_string()).collect(),
        ))
    }

    /// Opt out of quoting: the text is inserted exactly as given.
    pub fn raw(text: impl Into<String>) -> Self {
        Arg(ArgKind::Raw(text.into()))
    }

    /// Captured stdout of an earlier command, already trimmed.
    pub(crate) fn output(stdout: impl Into<String>) -> Self {
        Arg(ArgKind::Output(stdout.into()))
    }

    /// Output of a command that has not settled; fails at build time.
    pub(crate) fn pending(command: impl Into<String>) -> Self {
        Arg(ArgKind::Pending(command.into()))
    }

    fn render(&self, dialect: Dialect) -> Result<Cow<'_, str>, QuotingError> {
        match &self.0 {
            ArgKind::Value(s) | ArgKind::Output(s) => quote::quote(s, dialect),
            ArgKind::List(items) => quote::quote_all(items, dialect).map(Cow::Owned),
            ArgKind::Raw(s) => Ok(Cow::Borrowed(s)),
            ArgKind::Pending(command) => Err(QuotingError::Unsettled {
                command: command.clone(),
            }),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::value(s)
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::value(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Arg::value(s.as_str())
    }
}

impl From<Cow<'_, str>> for Arg {
    fn from(s: Cow<'_, str>) -> Self {
        Arg::value(s.into_owned())
    }
}

impl From<&Path> for Arg {
    fn from(p: &Path) -> Self {
        Arg::value(p.to_string_lossy())
    }
}

impl From<PathBuf> for Arg {
    fn from(p: PathBuf) -> Self {
        Arg::from(p.as_path())
    }
}

impl From<&PathBuf> for Arg {
    fn from(p: &PathBuf) -> Self {
        Arg::from(p.as_path())
    }
}

impl<T: AsRef<str>> From<Vec<T>> for Arg {
    fn from(v: Vec<T>) -> Self {
        Arg::list(v)
    }
}

impl<T: AsRef<str>> From<&Vec<T>> for Arg {
    fn from(v: &Vec<T>) -> Self {
        Arg::list(v)
    }
}

impl<T: AsRef<str>> From<&[T]> for Arg {
    fn from(v: &[T]) -> Self {
        Arg::list(v)
    }
}

impl<T: AsRef<str>, const N: usize> From<[T; N]> for Arg {
    fn from(v: [T; N]) -> Self {
        Arg::list(v)
    }
}

macro_rules! arg_from_display {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(v: $t) -> Self {
                Arg::value(v.to_string())
            }
        })*
    };
}

arg_from_display!(char, bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Resolve a template and its values into one command line.
///
/// Slots are filled in source order; literal fragments are copied verbatim.
pub fn build<I>(template: &Template, args: I, dialect: Dialect) -> Result<QuotedCommand, QuotingError>
where
    I: IntoIterator,
    I::Item: Into<Arg>,
{
    let args: Vec<Arg> = args.into_iter().map(Into::into).collect();
    if args.len() != template.slots() {
        return Err(QuotingError::Arity {
            slots: template.slots(),
            args: args.len(),
        });
    }
    let mut line = String::new();
    for (i, fragment) in template.fragments().iter().enumerate() {
        line.push_str(fragment);
        if let Some(arg) = args.get(i) {
            line.push_str(&arg.render(dialect)?);
        }
    }
    Ok(QuotedCommand(line))
}

/// Quote every element of an argv and join it into a command line.
pub fn from_argv<I>(argv: I, dialect: Dialect) -> Result<QuotedCommand, QuotingError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    quote::quote_all(argv, dialect).map(QuotedCommand)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash(template: &str, args: Vec<Arg>) -> String {
        build(&Template::parse(template).unwrap(), args, Dialect::Bash)
            .unwrap()
            .into_string()
    }

    #[test]
    fn scalars_are_quoted() {
        assert_eq!(
            bash("echo {}", vec![Arg::from("f\"o\"o")]),
            "echo $'f\"o\"o'"
        );
        assert_eq!(bash("echo {}", vec![Arg::from(42)]), "echo 42");
    }

    #[test]
    fn sequences_expand_to_several_tokens() {
        assert_eq!(
            bash("touch {}", vec![Arg::from(vec!["a b", "c"])]),
            "touch $'a b' c"
        );
    }

    #[test]
    fn raw_bypasses_quoting() {
        assert_eq!(
            bash("ls {} | wc -l", vec![Arg::raw("*.rs")]),
            "ls *.rs | wc -l"
        );
    }

    #[test]
    fn injection_stays_data() {
        let line = build(
            &Template::parse("echo {}").unwrap(),
            ["; rm -rf /"],
            Dialect::Posix,
        )
        .unwrap();
        assert_eq!(
            line.words(),
            Some(vec!["echo".to_string(), "; rm -rf /".to_string()])
        );
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let err = build(&Template::parse("echo {} {}").unwrap(), ["x"], Dialect::Bash)
            .unwrap_err();
        assert_eq!(err, QuotingError::Arity { slots: 2, args: 1 });
    }

    #[test]
    fn pending_output_is_rejected() {
        let err = build(
            &Template::parse("echo {}").unwrap(),
            [Arg::pending("sleep 1")],
            Dialect::Bash,
        )
        .unwrap_err();
        assert!(matches!(err, QuotingError::Unsettled { .. }));
    }

    #[test]
    fn fragments_api_matches_parse() {
        let from_parts = build(
            &Template::from_fragments(["git log ", " -- ", ""]),
            [Arg::from("main"), Arg::from("src dir")],
            Dialect::Posix,
        )
        .unwrap();
        assert_eq!(from_parts.as_str(), "git log main -- 'src dir'");
    }

    #[test]
    fn argv_joins_quoted_words() {
        assert_eq!(
            from_argv(["echo", "f\"o\"o"], Dialect::Bash).unwrap().as_str(),
            "echo $'f\"o\"o'"
        );
    }
}
