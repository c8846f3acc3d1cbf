//! Lexer for the WebAssembly text format.
//!
//! Produces tokens lazily through `Iterator`. Whitespace, line comments (`;;`)
//! and block comments (`(; ... ;)`, nestable) are skipped between tokens.

use super::cursor::{Cursor, Position};
use super::error::LexError;
use super::token::{self, Token, TokenKind};

pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// All tokens of `source`, or the first error.
    pub fn tokenise(source: &str) -> Result<Vec<Token>, LexError> {
        Lexer::new(source).collect()
    }

    fn error(&self, message: impl Into<String>, pos: Position) -> LexError {
        LexError::new(message, pos.span_here())
    }

    fn error_span(&self, message: impl Into<String>, start: Position) -> LexError {
        LexError::new(message, start.span_to(&self.cursor.position()))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.skip_whitespace_and_comments() {
            return Some(Err(e));
        }
        let start = self.cursor.position();
        let c = self.cursor.peek()?;
        let kind = match self.lex_token(c) {
            Ok(kind) => kind,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(Token::new(kind, start.span_to(&self.cursor.position()))))
    }
}

impl<'a> Lexer<'a> {
    fn lex_token(&mut self, c: char) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        match c {
            '(' => {
                self.cursor.advance();
                Ok(TokenKind::LeftParen)
            }
            ')' => {
                self.cursor.advance();
                Ok(TokenKind::RightParen)
            }
            '"' => {
                let kind = self.lex_string()?;
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            '$' => {
                self.cursor.advance();
                let name = self.cursor.take_while(is_idchar);
                if name.is_empty() {
                    return Err(self.error_span("expected identifier after '$'", start));
                }
                Ok(TokenKind::Id(name.to_string()))
            }
            c if is_idchar(c) => {
                let text = self.cursor.take_while(is_idchar);
                self.check_token_boundary(start)?;
                classify_word(text).ok_or_else(|| self.error_span(format!("invalid number literal: {}", text), start))
            }
            c => {
                self.cursor.advance();
                Err(self.error(format!("unexpected character: {:?}", c), start))
            }
        }
    }

    /// WAT needs whitespace, a paren or a comment between non-paren tokens.
    fn check_token_boundary(&self, start: Position) -> Result<(), LexError> {
        match self.cursor.peek() {
            None | Some('(') | Some(')') | Some(';') => Ok(()),
            Some(c) if c.is_ascii_whitespace() => Ok(()),
            Some(c) => Err(self.error_span(format!("unexpected character after token: {:?}", c), start)),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            self.cursor.skip_while(|c| c.is_ascii_whitespace());
            match (self.cursor.peek(), self.cursor.peek_second()) {
                (Some(';'), Some(';')) => self.cursor.skip_while(|c| c != '\n'),
                (Some('('), Some(';')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.cursor.position();
        self.cursor.advance();
        self.cursor.advance();

        let mut depth = 1;
        while depth > 0 {
            match (self.cursor.peek(), self.cursor.peek_second()) {
                (None, _) => return Err(self.error_span("unterminated block comment", start)),
                (Some('('), Some(';')) => {
                    self.cursor.advance();
                    self.cursor.advance();
                    depth += 1;
                }
                (Some(';'), Some(')')) => {
                    self.cursor.advance();
                    self.cursor.advance();
                    depth -= 1;
                }
                _ => {
                    self.cursor.advance();
                }
            }
        }
        Ok(())
    }
}

// Strings ---------------------------------------------------------------------

impl<'a> Lexer<'a> {
    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        self.cursor.advance();

        let mut bytes = Vec::new();
        loop {
            match self.cursor.advance() {
                None => return Err(self.error_span("unterminated string literal", start)),
                Some('"') => break,
                Some('\\') => self.lex_escape(&mut bytes)?,
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        Ok(TokenKind::String(bytes))
    }

    fn lex_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexError> {
        let pos = self.cursor.position();
        let c = match self.cursor.advance() {
            Some(c) => c,
            None => return Err(self.error("unterminated escape sequence", pos)),
        };
        match c {
            't' => bytes.push(b'\t'),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            '"' => bytes.push(b'"'),
            '\'' => bytes.push(b'\''),
            '\\' => bytes.push(b'\\'),
            'u' => self.lex_unicode_escape(bytes)?,
            high => {
                let low = self.cursor.advance();
                match (high.to_digit(16), low.and_then(|l| l.to_digit(16))) {
                    (Some(h), Some(l)) => bytes.push((h << 4 | l) as u8),
                    _ => return Err(self.error_span(format!("invalid escape sequence: \\{}", high), pos)),
                }
            }
        }
        Ok(())
    }

    fn lex_unicode_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexError> {
        let pos = self.cursor.position();
        if self.cursor.advance() != Some('{') {
            return Err(self.error("expected '{' after \\u", pos));
        }
        let digits = self.cursor.take_while(|c| c.is_ascii_hexdigit());
        if self.cursor.advance() != Some('}') {
            return Err(self.error_span("unterminated unicode escape", pos));
        }
        let c = u32::from_str_radix(digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error_span(format!("invalid unicode escape: {}", digits), pos))?;
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }
}

/// Numbers start with a digit or a sign, or spell `inf`/`nan`; anything else
/// is a keyword. `None` for words shaped like a number but malformed.
fn classify_word(text: &str) -> Option<TokenKind> {
    let unsigned = text.trim_start_matches(|c: char| c == '+' || c == '-');
    let numeric = unsigned.starts_with(|c: char| c.is_ascii_digit())
        || unsigned == "inf"
        || unsigned == "nan"
        || unsigned.starts_with("nan:");
    if numeric || unsigned.len() != text.len() {
        if token::is_number(text) {
            return Some(TokenKind::Number(text.to_string()));
        }
        if numeric {
            return None;
        }
    }
    Some(TokenKind::Keyword(text.to_string()))
}

fn is_idchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '.'
                | '/'
                | ':'
                | '<'
                | '='
                | '>'
                | '?'
                | '@'
                | '\\'
                | '^'
                | '_'
                | '`'
                | '|'
                | '~'
        )
}
