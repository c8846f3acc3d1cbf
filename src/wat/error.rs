//! Error types for WAT parsing.

use super::token::Span;
use std::fmt;

/// Lines of context shown on each side of the offending line.
const LINES_AROUND_POINTER: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

impl std::error::Error for LexError {}

/// A syntax error. Parsing stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// The source lines around the error with a `^` marker under the
    /// offending token.
    pub fn code_frame(&self, source: &str) -> String {
        let line = self.span.line;
        let column = self.span.column as usize;
        let width = source
            .get(self.span.start..self.span.end)
            .map(|s| s.chars().count())
            .unwrap_or(0)
            .max(1);

        let mut frame = String::new();
        for (index, text) in source.split('\n').enumerate() {
            let n = index as u32 + 1;
            if n + LINES_AROUND_POINTER > line && n < line + LINES_AROUND_POINTER {
                frame.push_str(text);
                frame.push('\n');
            }
            if n == line {
                frame.push_str(&" ".repeat(column.saturating_sub(1)));
                frame.push_str(&"^".repeat(width));
                frame.push('\n');
            }
        }
        frame
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.message, self.span.line, self.span.column
        )
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self {
            message: e.message,
            span: e.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_location() {
        let err = ParseError::new("unexpected token", Span::new(10, 11, 3, 5));
        assert_eq!(err.to_string(), "unexpected token at line 3, column 5");
        let lex = LexError::new("bad char", Span::new(0, 1, 1, 1));
        assert_eq!(ParseError::from(lex).to_string(), "bad char at line 1, column 1");
    }

    #[test]
    fn code_frame_points_at_token() {
        let source = "(module\n  (func (foo)))";
        let start = source.find("foo").unwrap();
        let err = ParseError::new("unknown instruction", Span::new(start, start + 3, 2, 10));
        assert_eq!(err.code_frame(source), "(module\n  (func (foo)))\n         ^^^\n");
    }
}
