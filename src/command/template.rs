use crate::error::QuotingError;

/// Literal fragments around interpolation slots.
///
/// A template with `n` slots always holds `n + 1` fragments; fragment `i` is
/// emitted verbatim before slot `i`, whitespace included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    fragments: Vec<String>,
}

impl Template {
    /// A template with no slots: the text is the whole command.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![text.into()],
        }
    }

    /// Build from explicit fragments. An empty list is one empty fragment.
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fragments: Vec<String> = fragments.into_iter().map(Into::into).collect();
        if fragments.is_empty() {
            fragments.push(String::new());
        }
        Self { fragments }
    }

    /// Parse `{}` slots out of a format-like string.
    ///
    /// `{{` and `}}` emit literal braces. Any other brace is an error, so a
    /// shell brace expansion has to be written `{{a,b}}`.
    pub fn parse(input: &str) -> Result<Self, QuotingError> {
        let mut fragments = Vec::new();
        let mut lit = String::new();
        let mut chars = input.char_indices().peekable();
        while let Some((offset, c)) = chars.next() {
            match c {
                '{' => match chars.peek() {
                    Some((_, '{')) => {
                        chars.next();
                        lit.push('{');
                    }
                    Some((_, '}')) => {
                        chars.next();
                        fragments.push(std::mem::take(&mut lit));
                    }
                    _ => return Err(QuotingError::StrayBrace { brace: '{', offset }),
                },
                '}' => match chars.peek() {
                    Some((_, '}')) => {
                        chars.next();
                        lit.push('}');
                    }
                    _ => return Err(QuotingError::StrayBrace { brace: '}', offset }),
                },
                c => lit.push(c),
            }
        }
        fragments.push(lit);
        Ok(Self { fragments })
    }

    /// Number of interpolation slots.
    pub fn slots(&self) -> usize {
        self.fragments.len() - 1
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }
}
