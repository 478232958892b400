//! Canonical re-printing of the AST.
//!
//! The output is defined so that printing and re-parsing yields an equal
//! tree; every parser test round-trips through here. Elaboration tests
//! also compare printed trees, so the format is deliberately stable.

use std::fmt::Write;

use crate::arena::{NodeArena, NodeId};
use crate::ast::{ListKind, Node};
use crate::lexer::TokenKind;
use crate::source::SourceMap;

const INDENT_SPACES: usize = 4;

pub struct Printer<'a> {
    arena: &'a NodeArena,
    sources: &'a SourceMap,
    out: String,
    indent: usize,
}

impl<'a> Printer<'a> {
    pub fn new(arena: &'a NodeArena, sources: &'a SourceMap) -> Self {
        Self {
            arena,
            sources,
            out: String::new(),
            indent: 0,
        }
    }

    /// Print one node (sub)tree.
    pub fn print(mut self, node: NodeId) -> String {
        self.walk(Some(node));
        self.out
    }

    /// Print a file's top-level list, one statement per line.
    pub fn print_statements(mut self, top_level: NodeId) -> String {
        if let Node::List { items, .. } = self.arena.get(top_level) {
            for statement in items.clone() {
                self.walk(Some(statement));
                self.out.push('\n');
            }
        }
        self.out
    }

    fn walk(&mut self, node: Option<NodeId>) -> bool {
        let Some(id) = node else { return false };
        match self.arena.get(id).clone() {
            Node::Identifier { span } => {
                self.out.push_str(self.sources.text(span));
            }
            Node::IntScalar { span, value } => {
                // Keep the original representation intact if available.
                let text = self.sources.text(span);
                if text.is_empty() {
                    let _ = write!(self.out, "{value}");
                } else {
                    self.out.push_str(text);
                }
            }
            Node::StringScalar {
                span,
                is_triple_quoted,
                is_raw,
            } => {
                let content = self.sources.text(span);
                if is_raw {
                    self.out.push('r');
                }
                // Minimal-effort quote choice: fall back to single quotes
                // if the content itself contains a double quote.
                let quote = if content.contains('"') { '\'' } else { '"' };
                let quotes = if is_triple_quoted { 3 } else { 1 };
                for _ in 0..quotes {
                    self.out.push(quote);
                }
                self.out.push_str(content);
                for _ in 0..quotes {
                    self.out.push(quote);
                }
            }
            Node::List { kind, items } => self.print_list(kind, &items),
            Node::Unary { op, operand, .. } => {
                let _ = write!(self.out, "{op}");
                if op == TokenKind::Not {
                    self.out.push(' ');
                }
                self.walk(operand);
            }
            Node::BinOp {
                op, left, right, ..
            } => {
                self.walk(left);
                if op == TokenKind::Dot || op == TokenKind::LBracket {
                    let _ = write!(self.out, "{op}");
                } else {
                    let _ = write!(self.out, " {op} ");
                }
                self.walk(right);
                if op == TokenKind::LBracket {
                    self.out.push(']');
                }
            }
            Node::Assignment { lhs, rhs, .. } => {
                self.walk(Some(lhs));
                self.out.push_str(" = ");
                if !self.walk(rhs) {
                    self.out.push_str("NIL");
                }
            }
            Node::FunCall { callee, args } => {
                self.walk(Some(callee));
                self.walk(Some(args));
            }
            Node::Comprehension { kind, for_node } => {
                self.open_list(kind);
                self.walk(Some(for_node));
                self.close_list(kind);
            }
            Node::Ternary {
                condition,
                positive,
                negative,
            } => {
                self.walk(Some(positive));
                self.out.push_str(" if ");
                self.walk(Some(condition));
                if negative.is_some() {
                    self.out.push_str(" else ");
                    self.walk(negative);
                }
            }
        }
        true
    }

    fn open_list(&mut self, kind: ListKind) {
        self.out.push(match kind {
            ListKind::List => '[',
            ListKind::Map => '{',
            ListKind::Tuple => '(',
        });
    }

    fn close_list(&mut self, kind: ListKind) {
        self.out.push(match kind {
            ListKind::List => ']',
            ListKind::Map => '}',
            ListKind::Tuple => ')',
        });
    }

    fn print_list(&mut self, kind: ListKind, items: &[NodeId]) {
        self.open_list(kind);
        let needs_multiline = items.len() > 1;
        if needs_multiline {
            self.out.push('\n');
        }
        self.indent += INDENT_SPACES;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(",\n");
            }
            if needs_multiline {
                for _ in 0..self.indent {
                    self.out.push(' ');
                }
            }
            if !self.walk(Some(*item)) {
                self.out.push_str("NIL");
            }
        }
        // A one-element tuple needs the trailing ',' to disambiguate from
        // a parenthesized expression.
        if kind == ListKind::Tuple && items.len() == 1 {
            self.out.push(',');
        }
        self.indent -= INDENT_SPACES;
        if needs_multiline {
            self.out.push('\n');
            for _ in 0..self.indent {
                self.out.push(' ');
            }
        }
        self.close_list(kind);
    }
}

/// Convenience: print a single node.
pub fn to_string(arena: &NodeArena, sources: &SourceMap, node: NodeId) -> String {
    Printer::new(arena, sources).print(node)
}
