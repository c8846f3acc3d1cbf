//! WebAssembly Text Format (WAT) support.
//!
//! Source is lexed into tokens, matched into S-expressions, then parsed into
//! the same [`Program`](crate::ast::Program) tree the binary decoder builds.
//!
//! # Example
//!
//! ```
//! use webasm::wat::{Lexer, TokenKind};
//!
//! let source = "(module (func $main (result i32) (i32.const 42)))";
//! let tokens: Vec<_> = Lexer::new(source).collect::<Result<_, _>>().unwrap();
//!
//! assert!(matches!(tokens[0].kind, TokenKind::LeftParen));
//! assert!(matches!(tokens[1].kind, TokenKind::Keyword(ref k) if k == "module"));
//! ```
//!
//! # Error Handling
//!
//! Parsing stops at the first error. [`ParseError`] carries the line and column
//! of the offending token and can render a code frame around it:
//!
//! ```
//! use webasm::wat;
//!
//! let source = "(module\n  (func (i32.nope)))";
//! let err = wat::parse(source).unwrap_err();
//! assert_eq!(err.span.line, 2);
//! assert!(err.code_frame(source).contains('^'));
//! ```

mod cursor;
mod error;
mod lexer;
mod parser;
mod sexpr;
mod token;

pub use error::{LexError, ParseError};
pub use lexer::Lexer;
pub use parser::parse;
pub use token::{Span, Token, TokenKind};
