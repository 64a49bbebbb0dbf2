//! Character cursor over WAT source.
//!
//! Walks the text one `char` at a time and keeps the byte offset, line and
//! column in step so the lexer never has to recompute positions.

use super::token::Span;

/// A saved point in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}

impl Position {
    /// Span from this position up to `end`.
    #[must_use]
    pub fn span_to(self, end: Position) -> Span {
        Span::new(self.offset, end.offset, self.line, self.column)
    }

    /// Zero-length span at this position.
    #[must_use]
    pub fn span_here(self) -> Span {
        Span::new(self.offset, self.offset, self.line, self.column)
    }
}

#[derive(Debug, Clone)]
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

    pub fn is_eof(&self) -> bool {
        self.pos.offset >= self.source.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    /// Consume one character.
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

    /// Consume `n` characters (fewer at end of input).
    pub fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            if self.advance().is_none() {
                break;
            }
        }
    }

    pub fn skip_while(&mut self, predicate: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&predicate) {
            self.advance();
        }
    }

    /// Consume characters while `predicate` holds and return them.
    pub fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        self.skip_while(predicate);
        self.slice_from(start)
    }

    /// Source text between `start` and the current position.
    pub fn slice_from(&self, start: Position) -> &'a str {
        &self.source[start.offset..self.pos.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_line_one_column_one() {
        let cursor = Cursor::new("func");
        assert_eq!(
            cursor.position(),
            Position {
                offset: 0,
                line: 1,
                column: 1
            }
        );
        assert!(!cursor.is_eof());
        assert!(Cursor::new("").is_eof());
    }

    #[test]
    fn peek_does_not_consume() {
        let cursor = Cursor::new("ab");
        assert_eq!(cursor.peek(), Some('a'));
        assert_eq!(cursor.peek_second(), Some('b'));
        assert_eq!(cursor.position().offset, 0);
    }

    #[test]
    fn newline_resets_column() {
        let mut cursor = Cursor::new("a\nbc");
        cursor.advance_by(3);
        let pos = cursor.position();
        assert_eq!((pos.line, pos.column, pos.offset), (2, 2, 3));
    }

    #[test]
    fn columns_count_chars_not_bytes() {
        let mut cursor = Cursor::new("\u{00e9}x");
        cursor.advance();
        assert_eq!(cursor.position().offset, 2);
        assert_eq!(cursor.position().column, 2);
    }

    #[test]
    fn take_while_returns_slice() {
        let mut cursor = Cursor::new("f64.add rest");
        assert_eq!(cursor.take_while(|c| !c.is_whitespace()), "f64.add");
        assert_eq!(cursor.peek(), Some(' '));
    }

    #[test]
    fn advance_by_stops_at_eof() {
        let mut cursor = Cursor::new("ab");
        cursor.advance_by(10);
        assert!(cursor.is_eof());
        assert_eq!(cursor.advance(), None);
    }

    #[test]
    fn span_between_positions() {
        let mut cursor = Cursor::new("(param)");
        cursor.advance();
        let start = cursor.position();
        cursor.advance_by(5);
        let span = start.span_to(cursor.position());
        assert_eq!((span.start, span.end, span.column), (1, 6, 2));
        assert_eq!(cursor.slice_from(start), "param");
    }
}
