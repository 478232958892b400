use crate::lexer::TokenKind;
use crate::span::Span;

/// A token is a kind plus the span of its text in the source space.
/// Token identity implies file location: the span is the provenance.
#[derive(Clone, Copy, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Set when at least one newline was scanned since the previous token.
    /// The parser uses this to stop `x[...]` chains at line breaks.
    pub newline_since_last: bool,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, span: Span) -> Self {
        Self {
            kind,
            span,
            newline_since_last: false,
        }
    }
}
