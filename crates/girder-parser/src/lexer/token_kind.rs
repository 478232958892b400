use std::fmt;

/// The kinds of token the BUILD-file subset knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    Percent,
    Pipe,
    Assign,
    Lt,
    Gt,
    Bang,

    // Two-character compounds.
    FloorDiv, // `//`, integer division
    EqEq,
    NotEq,
    Le,
    Ge,
    ShiftLeft,
    ShiftRight,

    Identifier,
    StringLiteral,
    NumberLiteral,
    /// A whole `def ...:` block, consumed opaquely up to the next
    /// non-indented line. Function definitions are never parsed.
    DefBlock,

    Not,
    For,
    In,
    /// The two-word keyword `not in`.
    NotIn,
    And,
    Or,
    If,
    Else,

    Error,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Dot => ".",
            TokenKind::Percent => "%",
            TokenKind::Pipe => "|",
            TokenKind::Assign => "=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Bang => "!",
            TokenKind::FloorDiv => "//",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::ShiftLeft => "<<",
            TokenKind::ShiftRight => ">>",
            TokenKind::Identifier => "ident",
            TokenKind::StringLiteral => "string",
            TokenKind::NumberLiteral => "number",
            TokenKind::DefBlock => "def...",
            TokenKind::Not => "not",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::NotIn => "not in",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Error => "<<ERROR>>",
            TokenKind::Eof => "<<EOF>>",
        };
        f.write_str(s)
    }
}
