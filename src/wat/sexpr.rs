//! S-expression trees for WAT.
//!
//! Reading happens in two phases:
//!
//! 1. **Tokens -> S-expression tree**: parentheses are matched and atoms are
//!    grouped. Only syntax is checked here.
//! 2. **Tree -> module**: [`super::builder`] walks the tree and gives it
//!    meaning.
//!
//! The tree is built with an explicit stack of open lists and dropped
//! iteratively, so nesting depth is limited by memory and not by the call
//! stack.
//!
//! ```
//! use watlite::wat::sexpr::read;
//!
//! let sexpr = read("(func $add (param i32 i32) (result i32))").unwrap();
//! let list = sexpr.as_list().unwrap();
//! assert_eq!(list.head_keyword(), Some("func"));
//! assert_eq!(list.len(), 4);
//! ```

use super::error::WatError;
use super::lexer::Lexer;
use super::token::{Span, Token, TokenKind};
use std::fmt;

// ============================================================================
// S-Expression Types
// ============================================================================

/// Either a single token or a parenthesised list.
///
/// Reading, dropping and `Display` are iterative, so nesting depth is bounded
/// only by memory. The derived `Debug` recurses and is meant for shallow
/// trees in tests.
#[derive(Debug)]
pub enum SExpr {
    Atom(Token),

    /// The span covers both parentheses.
    List { span: Span, items: Vec<SExpr> },
}

impl Drop for SExpr {
    fn drop(&mut self) {
        let SExpr::List { items, .. } = self else {
            return;
        };
        let mut pending = std::mem::take(items);
        while let Some(mut child) = pending.pop() {
            if let SExpr::List { items, .. } = &mut child {
                pending.append(items);
            }
        }
    }
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(token) => token.span,
            SExpr::List { span, .. } => *span,
        }
    }

    pub fn as_atom(&self) -> Option<&Token> {
        match self {
            SExpr::Atom(token) => Some(token),
            SExpr::List { .. } => None,
        }
    }

    pub fn as_list(&self) -> Option<SExprList<'_>> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List { span, items } => Some(SExprList { span: *span, items }),
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self.as_atom()?.kind {
            TokenKind::Keyword(ref kw) => Some(kw),
            _ => None,
        }
    }

    /// The identifier without its `$`.
    pub fn as_id(&self) -> Option<&str> {
        match self.as_atom()?.kind {
            TokenKind::Id(ref id) => Some(id),
            _ => None,
        }
    }

    pub fn is_list_headed_by(&self, keyword: &str) -> bool {
        self.as_list().is_some_and(|list| list.head_keyword() == Some(keyword))
    }

    /// Short description used in "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match self {
            SExpr::Atom(token) => format!("{} '{}'", token.kind.describe(), token.kind),
            SExpr::List { items, .. } => match items.first().and_then(SExpr::as_keyword) {
                Some(kw) => format!("'({} ...)'", kw),
                None => "list".to_string(),
            },
        }
    }
}

// ============================================================================
// List View
// ============================================================================

/// A borrowed view of a list with helpers for the `(keyword arg ...)` shape
/// most WAT constructs take.
#[derive(Debug, Clone, Copy)]
pub struct SExprList<'a> {
    pub span: Span,
    pub items: &'a [SExpr],
}

impl<'a> SExprList<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn head(&self) -> Option<&'a SExpr> {
        self.items.first()
    }

    pub fn get(&self, index: usize) -> Option<&'a SExpr> {
        self.items.get(index)
    }

    pub fn head_keyword(&self) -> Option<&'a str> {
        self.head().and_then(SExpr::as_keyword)
    }

    /// Items from `start` onwards.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &'a SExpr> {
        self.items.iter().skip(start)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Read exactly one S-expression.
///
/// # Errors
///
/// [`WatError::Lex`] for malformed tokens, [`WatError::Parse`] for
/// unbalanced parentheses, empty input, or anything after the expression.
pub fn read(source: &str) -> Result<SExpr, WatError> {
    let mut forms = read_all(source)?;
    match forms.len() {
        0 => Err(WatError::parse("unexpected end of input", end_of_input(source))),
        1 => Ok(forms.remove(0)),
        _ => Err(WatError::parse("unexpected token after expression", forms[1].span())),
    }
}

/// Read every top-level form in the source.
///
/// ```
/// use watlite::wat::sexpr::read_all;
///
/// let forms = read_all("(func $a) (func $b)").unwrap();
/// assert_eq!(forms.len(), 2);
/// ```
pub fn read_all(source: &str) -> Result<Vec<SExpr>, WatError> {
    // Open lists, innermost last: (opening paren span, items so far)
    let mut open: Vec<(Span, Vec<SExpr>)> = Vec::new();
    let mut forms = Vec::new();

    for token in Lexer::new(source) {
        let token = token?;
        match token.kind {
            TokenKind::LeftParen => open.push((token.span, Vec::new())),
            TokenKind::RightParen => {
                let Some((start, items)) = open.pop() else {
                    return Err(WatError::parse("unexpected ')'", token.span));
                };
                let list = SExpr::List {
                    span: start.to(token.span),
                    items,
                };
                match open.last_mut() {
                    Some((_, parent)) => parent.push(list),
                    None => forms.push(list),
                }
            }
            _ => match open.last_mut() {
                Some((_, parent)) => parent.push(SExpr::Atom(token)),
                None => forms.push(SExpr::Atom(token)),
            },
        }
    }

    if let Some((start, _)) = open.last() {
        return Err(WatError::parse(
            format!("unexpected end of input: unclosed '(' opened at {}", start),
            end_of_input(source),
        ));
    }

    tracing::trace!(forms = forms.len(), "read s-expressions");
    Ok(forms)
}

/// Zero-length span just past the last character.
fn end_of_input(source: &str) -> Span {
    let line = source.matches('\n').count() as u32 + 1;
    let last_line = source.rsplit('\n').next().unwrap_or("");
    Span::new(source.len(), source.len(), line, last_line.chars().count() as u32 + 1)
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        enum Task<'a> {
            Write(&'a SExpr),
            Space,
            Close,
        }

        let mut tasks = vec![Task::Write(self)];
        while let Some(task) = tasks.pop() {
            match task {
                Task::Write(SExpr::Atom(token)) => write!(f, "{}", token.kind)?,
                Task::Write(SExpr::List { items, .. }) => {
                    write!(f, "(")?;
                    tasks.push(Task::Close);
                    for (i, item) in items.iter().enumerate().rev() {
                        tasks.push(Task::Write(item));
                        if i > 0 {
                            tasks.push(Task::Space);
                        }
                    }
                }
                Task::Space => write!(f, " ")?,
                Task::Close => write!(f, ")")?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wat::error::ErrorKind;

    // ------------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------------

    #[test]
    fn read_atoms() {
        assert_eq!(read("func").unwrap().as_keyword(), Some("func"));
        assert_eq!(read("$real").unwrap().as_id(), Some("real"));
        assert!(matches!(read("42").unwrap().as_atom().unwrap().kind, TokenKind::Integer(_)));
    }

    #[test]
    fn read_nested() {
        let sexpr = read("(func (param f64) (result f64))").unwrap();
        let func = sexpr.as_list().unwrap();
        assert_eq!(func.len(), 3);
        assert!(func.get(1).unwrap().is_list_headed_by("param"));
        assert!(func.get(2).unwrap().is_list_headed_by("result"));
        assert!(!sexpr.is_list_headed_by("param"));
    }

    #[test]
    fn read_empty_list() {
        let sexpr = read("()").unwrap();
        assert!(sexpr.as_list().unwrap().is_empty());
        assert_eq!(sexpr.describe(), "list");
    }

    #[test]
    fn read_all_forms_in_order() {
        let forms = read_all("(func $a) (func $b) (func $c)").unwrap();
        let names: Vec<_> = forms
            .iter()
            .map(|f| f.as_list().unwrap().get(1).unwrap().as_id().unwrap())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn read_all_empty_source() {
        assert!(read_all("  ;; nothing\n").unwrap().is_empty());
    }

    #[test]
    fn very_deep_nesting() {
        let depth = 200_000;
        let source = format!("{}{}", "(a ".repeat(depth), ")".repeat(depth));
        let sexpr = read(&source).unwrap();
        let mut current = sexpr.as_list().unwrap();
        let mut seen = 1;
        while let Some(inner) = current.get(1).and_then(SExpr::as_list) {
            current = inner;
            seen += 1;
        }
        assert_eq!(seen, depth);
    }

    // ------------------------------------------------------------------------
    // Spans
    // ------------------------------------------------------------------------

    #[test]
    fn list_span_covers_parens() {
        let sexpr = read("(a (b c))").unwrap();
        let outer = sexpr.as_list().unwrap();
        assert_eq!((outer.span.start, outer.span.end), (0, 9));
        let inner = outer.get(1).unwrap().as_list().unwrap();
        assert_eq!((inner.span.start, inner.span.end), (3, 8));
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    #[test]
    fn unclosed_paren_reports_end_of_input() {
        let err = read_all("(func $f\n  (param $x i32)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.message().contains("unexpected end of input"));
        assert_eq!((err.span().line, err.span().column), (2, 17));
    }

    #[test]
    fn stray_close_paren() {
        let err = read_all("(func))").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.span().start, 6);
    }

    #[test]
    fn read_rejects_trailing_forms() {
        let err = read("(func) extra").unwrap_err();
        assert!(err.message().contains("after expression"));
    }

    #[test]
    fn read_rejects_empty_input() {
        assert_eq!(read("").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn lex_errors_pass_through() {
        assert_eq!(read("(export \"open").unwrap_err().kind(), ErrorKind::Lex);
    }

    // ------------------------------------------------------------------------
    // Display
    // ------------------------------------------------------------------------

    #[test]
    fn display_normalises_whitespace() {
        let sexpr = read("(func   $f\n (export \"f\")  (result f64))").unwrap();
        assert_eq!(sexpr.to_string(), "(func $f (export \"f\") (result f64))");
        assert_eq!(read("()").unwrap().to_string(), "()");
    }

    #[test]
    fn display_very_deep_nesting() {
        let depth = 200_000;
        let source = format!("{}{}", "(a ".repeat(depth), ")".repeat(depth));
        let expected = format!("{}(a){}", "(a ".repeat(depth - 1), ")".repeat(depth - 1));
        assert_eq!(read(&source).unwrap().to_string(), expected);
    }
}
