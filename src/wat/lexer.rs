//! Lexer for WebAssembly Text Format.
//!
//! The lexer is a lazy iterator of `Result<Token, LexError>`. It is `Clone`,
//! so a caller can snapshot it and restart from any point.
//!
//! ```
//! use watlite::wat::{Lexer, TokenKind};
//!
//! let tokens = Lexer::tokenise("(func $f (result f64) f64.const 1.5)").unwrap();
//! assert!(matches!(tokens[0].kind, TokenKind::LeftParen));
//! assert!(matches!(tokens[2].kind, TokenKind::Id(ref id) if id == "f"));
//! ```

use super::cursor::{Cursor, Position};
use super::error::LexError;
use super::token::{FloatLit, IntLit, Token, TokenKind};

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
            failed: false,
        }
    }

    /// Tokenise the entire source, returning all tokens or the first error.
    pub fn tokenise(source: &str) -> Result<Vec<Token>, LexError> {
        Lexer::new(source).collect()
    }

    fn error_at(&self, message: impl Into<String>, pos: Position) -> LexError {
        LexError::new(message, pos.span_here())
    }

    fn error_from(&self, message: impl Into<String>, start: Position) -> LexError {
        LexError::new(message, start.span_to(self.cursor.position()))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Iteration ends after the first error
        if self.failed {
            return None;
        }
        let result = self.skip_trivia().and_then(|()| {
            if self.cursor.is_eof() {
                return Ok(None);
            }
            let start = self.cursor.position();
            let kind = self.lex_token()?;
            Ok(Some(Token::new(kind, start.span_to(self.cursor.position()))))
        });
        match result {
            Ok(token) => token.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

impl<'a> Lexer<'a> {
    fn lex_token(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        let Some(first) = self.cursor.peek() else {
            return Err(self.error_at("unexpected end of input", start));
        };

        let kind = match first {
            '(' => {
                self.cursor.advance();
                return Ok(TokenKind::LeftParen);
            }
            ')' => {
                self.cursor.advance();
                return Ok(TokenKind::RightParen);
            }
            '"' => self.lex_string()?,
            '$' => self.lex_id()?,
            '+' | '-' => {
                let looks_numeric = matches!(
                    self.cursor.peek_second(),
                    Some(c) if c.is_ascii_digit() || c == 'i' || c == 'n'
                );
                if looks_numeric {
                    let negative = self.cursor.advance() == Some('-');
                    self.lex_number(negative)?
                } else {
                    self.lex_keyword()?
                }
            }
            c if c.is_ascii_digit() => self.lex_number(false)?,
            c if is_idchar(c) => self.lex_keyword()?,
            c => {
                self.cursor.advance();
                return Err(self.error_at(format!("unexpected character: {:?}", c), start));
            }
        };

        self.check_boundary(start)?;
        Ok(kind)
    }

    /// Keywords are bare idchar runs. `inf` and `nan` are floats.
    fn lex_keyword(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        let text = self.cursor.take_while(is_idchar);
        let (negative, unsigned) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        match special_float(unsigned, negative) {
            Some(lit) => Ok(TokenKind::Float(lit)),
            None if unsigned.starts_with("nan:") => Err(self.error_from(format!("invalid number: {}", text), start)),
            None => Ok(TokenKind::Keyword(text.to_string())),
        }
    }

    /// Tokens other than parens must be followed by whitespace, a paren,
    /// a comment or end of input: `1x` and `$a"b"` are errors.
    fn check_boundary(&self, start: Position) -> Result<(), LexError> {
        match self.cursor.peek() {
            None | Some('(' | ')' | ';') => Ok(()),
            Some(c) if c.is_ascii_whitespace() => Ok(()),
            Some(c) => Err(self.error_from(format!("unexpected character {:?} after token", c), start)),
        }
    }
}

// ============================================================================
// Whitespace and comments
// ============================================================================

impl<'a> Lexer<'a> {
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            self.cursor.skip_while(|c| c.is_ascii_whitespace());
            match (self.cursor.peek(), self.cursor.peek_second()) {
                (Some(';'), Some(';')) => self.cursor.skip_while(|c| c != '\n'),
                (Some('('), Some(';')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    /// Skip `(; ... ;)`, which may nest.
    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.cursor.position();
        self.cursor.advance_by(2);
        let mut depth = 1usize;

        while depth > 0 {
            match (self.cursor.peek(), self.cursor.peek_second()) {
                (None, _) => return Err(self.error_from("unterminated block comment", start)),
                (Some('('), Some(';')) => {
                    self.cursor.advance_by(2);
                    depth += 1;
                }
                (Some(';'), Some(')')) => {
                    self.cursor.advance_by(2);
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

// ============================================================================
// Identifiers and strings
// ============================================================================

impl<'a> Lexer<'a> {
    fn lex_id(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        self.cursor.advance();
        let name = self.cursor.take_while(is_idchar);
        if name.is_empty() {
            return Err(self.error_from("expected identifier after '$'", start));
        }
        Ok(TokenKind::Id(name.to_string()))
    }

    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();
        self.cursor.advance();
        let mut bytes = Vec::new();

        loop {
            match self.cursor.advance() {
                None | Some('\n') => return Err(self.error_from("unterminated string literal", start)),
                Some('"') => return Ok(TokenKind::String(bytes)),
                Some('\\') => self.lex_escape(&mut bytes)?,
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    /// Decode one escape sequence; the backslash is already consumed.
    fn lex_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexError> {
        let pos = self.cursor.position();
        let Some(c) = self.cursor.advance() else {
            return Err(self.error_at("unterminated escape sequence", pos));
        };

        match c {
            't' => bytes.push(b'\t'),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            '"' => bytes.push(b'"'),
            '\'' => bytes.push(b'\''),
            '\\' => bytes.push(b'\\'),
            'u' => self.lex_unicode_escape(bytes)?,
            high if high.is_ascii_hexdigit() => {
                let low = self
                    .cursor
                    .advance()
                    .and_then(|c| c.to_digit(16))
                    .ok_or_else(|| self.error_at("invalid hex escape", pos))?;
                let high = high.to_digit(16).unwrap_or(0);
                bytes.push(((high << 4) | low) as u8);
            }
            other => return Err(self.error_at(format!("invalid escape sequence: \\{}", other), pos)),
        }
        Ok(())
    }

    /// `\u{XXXX}`, appended as UTF-8.
    fn lex_unicode_escape(&mut self, bytes: &mut Vec<u8>) -> Result<(), LexError> {
        let pos = self.cursor.position();
        if self.cursor.advance() != Some('{') {
            return Err(self.error_at("expected '{' after \\u", pos));
        }
        let digits = self.cursor.take_while(|c| c.is_ascii_hexdigit());
        if self.cursor.advance() != Some('}') {
            return Err(self.error_from("expected '}' to close unicode escape", pos));
        }
        let c = u32::from_str_radix(digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error_from(format!("invalid unicode escape: {}", digits), pos))?;
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }
}

// ============================================================================
// Numbers
// ============================================================================

impl<'a> Lexer<'a> {
    /// Lex a number whose sign, if any, has been consumed.
    fn lex_number(&mut self, negative: bool) -> Result<TokenKind, LexError> {
        let start = self.cursor.position();

        if matches!(self.cursor.peek(), Some('i' | 'n')) {
            let text = self.cursor.take_while(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_');
            return special_float(text, negative)
                .map(TokenKind::Float)
                .ok_or_else(|| self.error_from(format!("invalid number: {}", text), start));
        }

        let hex = self.cursor.peek() == Some('0') && matches!(self.cursor.peek_second(), Some('x' | 'X'));
        if hex {
            self.cursor.advance_by(2);
        }
        let is_digit = move |c: char| if hex { c.is_ascii_hexdigit() } else { c.is_ascii_digit() };

        let body_start = self.cursor.position();
        self.cursor.skip_while(|c| is_digit(c) || c == '_');
        let mut is_float = false;

        if self.cursor.peek() == Some('.') {
            is_float = true;
            self.cursor.advance();
            self.cursor.skip_while(|c| is_digit(c) || c == '_');
        }

        let exponent = if hex { ['p', 'P'] } else { ['e', 'E'] };
        if self.cursor.peek().is_some_and(|c| exponent.contains(&c)) {
            is_float = true;
            self.cursor.advance();
            if matches!(self.cursor.peek(), Some('+' | '-')) {
                self.cursor.advance();
            }
            let exp_digits = self.cursor.take_while(|c| c.is_ascii_digit() || c == '_');
            if exp_digits.is_empty() {
                return Err(self.error_from("missing exponent digits", start));
            }
        }

        let body = self.cursor.slice_from(body_start);
        if !valid_underscores(body, hex) || body.starts_with('.') || body.is_empty() {
            return Err(self.error_from(format!("invalid numeric literal: {}", self.cursor.slice_from(start)), start));
        }
        let clean: String = body.chars().filter(|&c| c != '_').collect();

        if is_float {
            return Ok(TokenKind::Float(if hex {
                FloatLit::Hex {
                    negative,
                    digits: format!("0x{}", clean),
                }
            } else {
                FloatLit::Decimal { negative, digits: clean }
            }));
        }

        let radix = if hex { 16 } else { 10 };
        u64::from_str_radix(&clean, radix)
            .map(|magnitude| TokenKind::Integer(IntLit::new(magnitude, negative)))
            .map_err(|_| self.error_from("integer literal out of range", start))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// An underscore must sit between two digits.
fn valid_underscores(text: &str, hex: bool) -> bool {
    let bytes = text.as_bytes();
    let mut in_exponent = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'_' => {
                let digit = |b: u8| {
                    if hex && !in_exponent {
                        b.is_ascii_hexdigit()
                    } else {
                        b.is_ascii_digit()
                    }
                };
                let before = i.checked_sub(1).map(|j| bytes[j]);
                let after = bytes.get(i + 1).copied();
                if !before.is_some_and(digit) || !after.is_some_and(digit) {
                    return false;
                }
            }
            b'p' | b'P' => in_exponent = true,
            b'e' | b'E' if !hex => in_exponent = true,
            _ => {}
        }
    }
    true
}

/// Characters allowed in keywords and `$` identifiers.
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

/// `inf`, `nan` and `nan:0xPAYLOAD`.
fn special_float(text: &str, negative: bool) -> Option<FloatLit> {
    match text {
        "inf" => Some(FloatLit::Inf { negative }),
        "nan" => Some(FloatLit::Nan {
            negative,
            payload: None,
        }),
        _ => {
            let hex = text.strip_prefix("nan:0x")?;
            if hex.is_empty() || !valid_underscores(hex, true) {
                return None;
            }
            let clean: String = hex.chars().filter(|&c| c != '_').collect();
            let payload = u64::from_str_radix(&clean, 16).ok().filter(|&p| p != 0)?;
            Some(FloatLit::Nan {
                negative,
                payload: Some(payload),
            })
        }
    }
}
