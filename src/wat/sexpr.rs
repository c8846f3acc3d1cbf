//! S-expression reader.
//!
//! Parentheses are matched first so that the module parser can look at a
//! whole list (its head keyword, its remaining items) without speculative
//! token consumption.

use super::error::ParseError;
use super::lexer::Lexer;
use super::token::{Span, Token, TokenKind};
use crate::parser::MAX_NESTING;

/// Deepest list nesting accepted. Leaves room for the module and function
/// lists and for folded operands around the innermost blocks.
pub const MAX_LIST_DEPTH: usize = MAX_NESTING * 2;

#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Atom(Token),
    /// The span covers both parentheses.
    List { span: Span, items: Vec<SExpr> },
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(token) => token.span,
            SExpr::List { span, .. } => *span,
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) => Some(k.as_str()),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::Id(id),
                ..
            }) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&str> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::Number(n),
                ..
            }) => Some(n.as_str()),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            SExpr::Atom(Token {
                kind: TokenKind::String(s),
                ..
            }) => Some(s.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List { items, .. } => Some(items),
            SExpr::Atom(_) => None,
        }
    }

    /// The head keyword of a list: `func` for `(func ...)`.
    pub fn head(&self) -> Option<&str> {
        self.as_list().and_then(|items| items.first()).and_then(SExpr::as_keyword)
    }

    pub fn is_list_headed_by(&self, keyword: &str) -> bool {
        self.head() == Some(keyword)
    }
}

impl std::fmt::Display for SExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SExpr::Atom(token) => write!(f, "{}", token.kind),
            SExpr::List { items, .. } => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Reads every top-level S-expression of `source`.
pub fn read_all(source: &str) -> Result<Vec<SExpr>, ParseError> {
    let tokens = Lexer::tokenise(source)?;
    let mut stack: Vec<(Span, Vec<SExpr>)> = Vec::new();
    let mut top = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::LeftParen => {
                if stack.len() >= MAX_LIST_DEPTH {
                    return Err(ParseError::new(
                        format!("lists nested deeper than {}", MAX_LIST_DEPTH),
                        token.span,
                    ));
                }
                stack.push((token.span, Vec::new()));
            }
            TokenKind::RightParen => {
                let (open, items) = match stack.pop() {
                    Some(list) => list,
                    None => return Err(ParseError::new("unexpected ')'", token.span)),
                };
                let span = Span::new(open.start, token.span.end, open.line, open.column);
                let list = SExpr::List { span, items };
                match stack.last_mut() {
                    Some((_, parent)) => parent.push(list),
                    None => top.push(list),
                }
            }
            _ => match stack.last_mut() {
                Some((_, parent)) => parent.push(SExpr::Atom(token)),
                None => top.push(SExpr::Atom(token)),
            },
        }
    }

    match stack.pop() {
        Some((open, _)) => Err(ParseError::new("unclosed '('", open)),
        None => Ok(top),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_lists() {
        let exprs = read_all("(module (func $f (nop)))").unwrap();
        assert_eq!(exprs.len(), 1);
        assert!(exprs[0].is_list_headed_by("module"));
        let items = exprs[0].as_list().unwrap();
        assert!(items[1].is_list_headed_by("func"));
        assert_eq!(items[1].as_list().unwrap()[1].as_id(), Some("f"));
        assert_eq!(exprs[0].to_string(), "(module (func $f (nop)))");
    }

    #[test]
    fn list_span_covers_parens() {
        let exprs = read_all("  (a\n b)").unwrap();
        let span = exprs[0].span();
        assert_eq!((span.start, span.end, span.line, span.column), (2, 8, 1, 3));
    }

    #[test]
    fn unbalanced() {
        assert_eq!(read_all("(a (b)").unwrap_err().message, "unclosed '('");
        assert_eq!(read_all("a)").unwrap_err().message, "unexpected ')'");
    }

    #[test]
    fn list_depth_is_bounded() {
        let nested = |depth: usize| format!("{}{}", "(".repeat(depth), ")".repeat(depth));
        assert!(read_all(&nested(MAX_LIST_DEPTH)).is_ok());
        let err = read_all(&nested(100_000)).unwrap_err();
        assert_eq!(err.message, format!("lists nested deeper than {}", MAX_LIST_DEPTH));
        assert_eq!(err.span.column as usize, MAX_LIST_DEPTH + 1);
    }
}
