//! The AST of the BUILD-file subset.
//!
//! One sum type covers all nodes. Lists, maps and tuples share a variant
//! distinguished by [`ListKind`]; map entries are `:`-binops; an
//! assignment is structurally a binop with `=` but kept as its own
//! variant because so much of the analysis fishes for it. Children are
//! `Option<NodeId>` where the grammar genuinely allows absence (open
//! slice ends, error recovery); lists hold only present children.

use crate::arena::{NodeArena, NodeId};
use crate::lexer::TokenKind;
use crate::span::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    List,
    Map,
    Tuple,
}

#[derive(Clone, Debug)]
pub enum Node {
    Identifier {
        span: Span,
    },
    /// Integer; `span` keeps the literal as written (`0x1f`, `True`) and
    /// is dummy for values synthesized by evaluation.
    IntScalar {
        span: Span,
        value: i64,
    },
    /// String; `span` covers the content without quotes, escapes intact.
    StringScalar {
        span: Span,
        is_triple_quoted: bool,
        is_raw: bool,
    },
    List {
        kind: ListKind,
        items: Vec<NodeId>,
    },
    Unary {
        op: TokenKind,
        span: Span,
        operand: Option<NodeId>,
    },
    /// Also covers member access (`.`), array access (`[`, right side is
    /// the index or a `:`-slice), map entries (`:`), and the `for`/`in`
    /// chains of comprehensions.
    BinOp {
        op: TokenKind,
        /// Operator token; the best-effort location of the expression.
        span: Span,
        left: Option<NodeId>,
        right: Option<NodeId>,
    },
    Assignment {
        span: Span,
        /// Identifier, or a tuple/list of identifiers for unpacking.
        lhs: NodeId,
        rhs: Option<NodeId>,
    },
    FunCall {
        /// Always an `Identifier` node.
        callee: NodeId,
        /// Always a `Tuple` list holding positional args and kw-assignments.
        args: NodeId,
    },
    Comprehension {
        kind: ListKind,
        /// Left-recursive `for`-binop chain built by the parser.
        for_node: NodeId,
    },
    Ternary {
        condition: NodeId,
        positive: NodeId,
        negative: Option<NodeId>,
    },
}

impl Node {
    pub fn as_identifier(&self) -> Option<Span> {
        match self {
            Node::Identifier { span } => Some(*span),
            _ => None,
        }
    }
}

/// Narrowing helpers, the moral equivalent of the usual `cast_as_*`
/// accessors on a node hierarchy.
impl NodeArena {
    pub fn identifier_span(&self, id: NodeId) -> Option<Span> {
        self.get(id).as_identifier()
    }

    pub fn string_span(&self, id: NodeId) -> Option<Span> {
        match self.get(id) {
            Node::StringScalar { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub fn int_value(&self, id: NodeId) -> Option<i64> {
        match self.get(id) {
            Node::IntScalar { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_scalar(&self, id: NodeId) -> bool {
        matches!(
            self.get(id),
            Node::IntScalar { .. } | Node::StringScalar { .. }
        )
    }

    pub fn list_of(&self, id: NodeId, kind: ListKind) -> Option<&[NodeId]> {
        match self.get(id) {
            Node::List { kind: k, items } if *k == kind => Some(items),
            _ => None,
        }
    }

    pub fn any_list(&self, id: NodeId) -> Option<(ListKind, &[NodeId])> {
        match self.get(id) {
            Node::List { kind, items } => Some((*kind, items)),
            _ => None,
        }
    }

    /// The `(lhs, rhs)` of an assignment node.
    pub fn assignment(&self, id: NodeId) -> Option<(NodeId, Option<NodeId>)> {
        match self.get(id) {
            Node::Assignment { lhs, rhs, .. } => Some((*lhs, *rhs)),
            _ => None,
        }
    }

    pub fn fun_call(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        match self.get(id) {
            Node::FunCall { callee, args } => Some((*callee, *args)),
            _ => None,
        }
    }

    pub fn binop(&self, id: NodeId) -> Option<(TokenKind, Span, Option<NodeId>, Option<NodeId>)> {
        match self.get(id) {
            Node::BinOp {
                op,
                span,
                left,
                right,
            } => Some((*op, *span, *left, *right)),
            _ => None,
        }
    }
}
