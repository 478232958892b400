//! Front end for the Starlark subset found in Bazel-style `BUILD` files:
//! scanner, error-resilient recursive-descent parser, arena AST, and the
//! span/source bookkeeping that maps any interesting substring of the
//! result back to `(file, line, column)` — including strings synthesized
//! later by constant evaluation.

mod arena;
pub mod ast;
mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
mod source;
mod span;
#[cfg(test)]
mod tests;

pub use crate::arena::{NodeArena, NodeId};
pub use crate::ast::{ListKind, Node};
pub use crate::error::ParseError;
pub use crate::lexer::{Scanner, Token, TokenKind};
pub use crate::parser::{int_from_literal, Parser};
pub use crate::printer::Printer;
pub use crate::source::{LineIndex, SourceId, SourceMap};
pub use crate::span::{FileLocation, LineColumn, LineColumnRange, Span};
