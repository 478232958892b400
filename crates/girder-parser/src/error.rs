use crate::span::Span;
use thiserror::Error;

/// A lexical or syntactical error, recorded while the parser keeps going.
/// The parser resynchronizes at the next top-level statement and returns
/// the best-effort partial AST alongside these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// Offending token; resolve through the source map for file:line:col.
    pub span: Span,
}
