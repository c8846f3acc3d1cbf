//! Character cursor over WAT source, tracking line and column.

use super::token::Span;

/// A saved position in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: usize,
    /// 1-indexed.
    pub line: u32,
    /// 1-indexed, counting characters rather than bytes.
    pub column: u32,
}

impl Position {
    pub fn span_to(self, end: &Position) -> Span {
        Span::new(self.offset, end.offset, self.line, self.column)
    }

    pub fn span_here(self) -> Span {
        Span::new(self.offset, self.offset, self.line, self.column)
    }
}

pub struct Cursor<'a> {
    source: &'a str,
    pos: Position,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: Position {
                offset: 0,
                line: 1,
                column: 1,
            },
        }
    }

    pub fn position(&self) -> Position {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos.offset..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    pub fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos.offset += c.len_utf8();
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }

    pub fn skip_while(&mut self, predicate: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.advance();
        }
    }

    /// Consumes characters while `predicate` holds and returns them as a slice.
    pub fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        self.skip_while(predicate);
        self.slice_from(&start)
    }

    pub fn slice_from(&self, start: &Position) -> &'a str {
        &self.source[start.offset..self.pos.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_lines_and_columns() {
        let mut cursor = Cursor::new("a\nbc");
        cursor.advance();
        assert_eq!(cursor.position().column, 2);
        cursor.advance();
        assert_eq!(cursor.position().line, 2);
        assert_eq!(cursor.position().column, 1);
        assert_eq!(cursor.peek(), Some('b'));
        assert_eq!(cursor.peek_second(), Some('c'));
    }

    #[test]
    fn columns_count_characters() {
        let mut cursor = Cursor::new("\u{e9}x");
        cursor.advance();
        assert_eq!(cursor.position().offset, 2);
        assert_eq!(cursor.position().column, 2);
    }

    #[test]
    fn take_while_returns_slice() {
        let mut cursor = Cursor::new("abc def");
        let start = cursor.position();
        assert_eq!(cursor.take_while(|c| c != ' '), "abc");
        let span = start.span_to(&cursor.position());
        assert_eq!((span.start, span.end), (0, 3));
        assert_eq!(cursor.peek(), Some(' '));
    }
}
