//! Recursive descent parser with a fixed precedence ladder.
//!
//! Produces arena nodes whose spans all point into the scanned source, so
//! every interesting substring of the result can be located later. Parse
//! errors don't abort: they are recorded and parsing resumes at the next
//! token that starts a line and looks like a statement.

use crate::arena::{NodeArena, NodeId};
use crate::ast::{ListKind, Node};
use crate::error::ParseError;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::span::Span;

// Binding strengths, strongest to weakest. Index 0 is handled by
// parse_atom(); assignment only exists at specific statement positions.
const PRECEDENCE: &[&[TokenKind]] = &[
    &[],
    &[TokenKind::Dot],
    &[
        TokenKind::Star,
        TokenKind::Slash,
        TokenKind::FloorDiv,
        TokenKind::Percent,
    ],
    &[TokenKind::Plus, TokenKind::Minus],
    &[TokenKind::ShiftLeft, TokenKind::ShiftRight],
    &[TokenKind::Pipe],
    &[
        TokenKind::Lt,
        TokenKind::Le,
        TokenKind::EqEq,
        TokenKind::Ge,
        TokenKind::Gt,
        TokenKind::NotEq,
        TokenKind::In,
        TokenKind::NotIn,
    ],
    &[TokenKind::And],
    &[TokenKind::Or],
];

// What each list-ish element position accepts.
#[derive(Clone, Copy, PartialEq)]
enum Elem {
    Expr,
    ExprOrAssign,
    OptionalIdent,
    MapTuple,
}

pub struct Parser<'s, 'a> {
    scanner: &'s mut Scanner<'a>,
    arena: &'s mut NodeArena,
    errors: Vec<ParseError>,
}

impl<'s, 'a> Parser<'s, 'a> {
    pub fn new(scanner: &'s mut Scanner<'a>, arena: &'s mut NodeArena) -> Self {
        Self {
            scanner,
            arena,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    /// Parse a file: a list of assignments, function calls, and bare
    /// lists. Always returns a (possibly partial) top-level list.
    pub fn parse(&mut self) -> NodeId {
        let mut statements = Vec::new();
        loop {
            let errors_before = self.errors.len();
            let tok = self.scanner.next_token();
            match tok.kind {
                TokenKind::Eof => break,
                // Pythonism: toplevel doc string has no effect.
                TokenKind::StringLiteral => continue,
                // 'def' blocks are left unparsed; only found in *.bzl files.
                TokenKind::DefBlock => continue,
                TokenKind::LBracket => {
                    if let Some(stmt) = self.toplevel_bracketed(tok) {
                        statements.push(stmt);
                    }
                }
                TokenKind::LParen => {
                    if let Some(stmt) = self.toplevel_tuple(tok) {
                        statements.push(stmt);
                    }
                }
                TokenKind::Identifier => {
                    if let Some(stmt) = self.toplevel_identifier(tok) {
                        statements.push(stmt);
                    }
                }
                _ => {
                    self.err_at(tok, "expected identifier");
                }
            }
            if self.errors.len() > errors_before {
                self.synchronize();
            }
        }
        self.arena.alloc(Node::List {
            kind: ListKind::List,
            items: statements,
        })
    }

    // `[...]` at the top: either a bare list (e.g. a comprehension
    // producing rules) or the lhs of a list-unpack assignment.
    fn toplevel_bracketed(&mut self, open: Token) -> Option<NodeId> {
        let lhs = self.parse_list_or_comprehension(ListKind::List, Elem::Expr)?;
        if self.scanner.peek().kind == TokenKind::Assign {
            let assign = self.scanner.next_token();
            return Some(self.finish_assignment(lhs, open.span, assign.span));
        }
        Some(lhs)
    }

    // `(...)` at the top: tuple assignment, rarely a bare tuple.
    fn toplevel_tuple(&mut self, open: Token) -> Option<NodeId> {
        let (items, _) = self.parse_list_items(Vec::new(), Elem::ExprOrAssign, TokenKind::RParen);
        let lhs = self.arena.alloc(Node::List {
            kind: ListKind::Tuple,
            items,
        });
        if self.scanner.peek().kind == TokenKind::Assign {
            let assign = self.scanner.next_token();
            return Some(self.finish_assignment(lhs, open.span, assign.span));
        }
        Some(lhs)
    }

    fn toplevel_identifier(&mut self, ident: Token) -> Option<NodeId> {
        let after = self.scanner.next_token();
        match after.kind {
            TokenKind::Assign => {
                let id = self.arena.alloc(Node::Identifier { span: ident.span });
                Some(self.finish_assignment(id, ident.span, after.span))
            }
            TokenKind::Comma => {
                // Toplevel unpack: `a, b = ...`; lhs list ends at the `=`.
                let first = self.arena.alloc(Node::Identifier { span: ident.span });
                let (items, assign) =
                    self.parse_list_items(vec![first], Elem::OptionalIdent, TokenKind::Assign);
                let lhs = self.arena.alloc(Node::List {
                    kind: ListKind::Tuple,
                    items,
                });
                let assign_span = assign.map_or(after.span, |t| t.span);
                Some(self.finish_assignment(lhs, ident.span, assign_span))
            }
            TokenKind::LParen => Some(self.parse_fun_call(ident)),
            TokenKind::Dot => {
                let id = self.arena.alloc(Node::Identifier { span: ident.span });
                let rhs = self.parse_expression(false);
                Some(self.arena.alloc(Node::BinOp {
                    op: TokenKind::Dot,
                    span: after.span,
                    left: Some(id),
                    right: rhs,
                }))
            }
            _ => {
                self.err_at(after, "expected `(` or `=`");
                None
            }
        }
    }

    // '=' already consumed; covers `from` (statement start) to `to` (the
    // '=' token), the best-effort range of the whole statement.
    fn finish_assignment(&mut self, lhs: NodeId, from: Span, to: Span) -> NodeId {
        let rhs = self.parse_expression(false);
        self.arena.alloc(Node::Assignment {
            span: Span::new(from.start, to.end),
            lhs,
            rhs,
        })
    }

    fn parse_element(&mut self, elem: Elem) -> Option<NodeId> {
        match elem {
            Elem::Expr => self.parse_expression(false),
            Elem::ExprOrAssign => self.expression_or_assignment(),
            Elem::OptionalIdent => {
                if self.scanner.peek().kind == TokenKind::Identifier {
                    let tok = self.scanner.next_token();
                    Some(self.arena.alloc(Node::Identifier { span: tok.span }))
                } else {
                    None
                }
            }
            Elem::MapTuple => self.parse_map_tuple(),
        }
    }

    fn expression_or_assignment(&mut self) -> Option<NodeId> {
        let value = self.parse_expression(false)?;
        let upcoming = self.scanner.peek();
        if upcoming.kind == TokenKind::Assign {
            if let Some(span) = self.arena.identifier_span(value) {
                self.scanner.next_token();
                return Some(self.finish_assignment(value, span, upcoming.span));
            }
        }
        Some(value)
    }

    // Parse elements up to and including `end`. Returns the collected
    // items and the closing token if it was reached.
    fn parse_list_items(
        &mut self,
        mut items: Vec<NodeId>,
        elem: Elem,
        end: TokenKind,
    ) -> (Vec<NodeId>, Option<Token>) {
        let mut upcoming = self.scanner.peek();
        while upcoming.kind != end {
            if upcoming.kind == TokenKind::Eof {
                self.err_at(upcoming, &format!("expected closing `{end}`"));
                return (items, None);
            }
            if let Some(element) = self.parse_element(elem) {
                items.push(element);
            }
            upcoming = self.scanner.peek();
            if upcoming.kind == TokenKind::Comma {
                self.scanner.next_token();
                upcoming = self.scanner.peek();
            } else if upcoming.kind != end {
                let tok = self.scanner.next_token();
                self.err_at(tok, &format!("expected `,` or closing `{end}`"));
                return (items, None);
            }
        }
        let closing = self.scanner.next_token();
        (items, Some(closing))
    }

    // Opening '(' of the argument list already consumed.
    fn parse_fun_call(&mut self, identifier: Token) -> NodeId {
        let (items, _) = self.parse_list_items(Vec::new(), Elem::ExprOrAssign, TokenKind::RParen);
        let callee = self.arena.alloc(Node::Identifier {
            span: identifier.span,
        });
        let args = self.arena.alloc(Node::List {
            kind: ListKind::Tuple,
            items,
        });
        self.arena.alloc(Node::FunCall { callee, args })
    }

    // 'if' seen but not consumed.
    fn parse_if_else(&mut self, if_branch: Option<NodeId>) -> Option<NodeId> {
        let if_tok = self.scanner.next_token();
        debug_assert_eq!(if_tok.kind, TokenKind::If);
        let positive = match if_branch {
            Some(n) => n,
            None => {
                self.err_at(if_tok, "`if` without a value before it");
                return None;
            }
        };
        let condition = self.parse_expression(false)?;
        let mut negative = None;
        if self.scanner.peek().kind == TokenKind::Else {
            self.scanner.next_token();
            negative = self.parse_expression(false);
        }
        Some(self.arena.alloc(Node::Ternary {
            condition,
            positive,
            negative,
        }))
    }

    // Inside `x[...]`: a plain index or a `a:b` slice, either side of the
    // colon optional. Returns the node representing the access argument.
    fn parse_array_or_slice_access(&mut self) -> Option<NodeId> {
        let index = self.parse_expression(true);
        let sep_or_end = self.scanner.next_token();
        match sep_or_end.kind {
            TokenKind::RBracket => {
                if index.is_none() {
                    self.err_at(sep_or_end, "can not have an empty array access");
                }
                index
            }
            TokenKind::Colon => {
                let rhs = self.parse_expression(true);
                let end = self.scanner.next_token();
                if end.kind != TokenKind::RBracket {
                    self.err_at(end, "expected closing `]` of array access");
                    return None;
                }
                if index.is_none() && rhs.is_none() {
                    self.err_at(end, "expected an expression before or after the `:`");
                    return None;
                }
                Some(self.arena.alloc(Node::BinOp {
                    op: TokenKind::Colon,
                    span: sep_or_end.span,
                    left: index,
                    right: rhs,
                }))
            }
            _ => {
                self.err_at(sep_or_end, "expected `:` or `]`");
                None
            }
        }
    }

    fn parse_value_or_identifier(&mut self, can_be_optional: bool) -> Option<NodeId> {
        let tok = self.scanner.peek();
        match tok.kind {
            TokenKind::StringLiteral => {
                let tok = self.scanner.next_token();
                Some(self.string_scalar_from_literal(tok))
            }
            TokenKind::NumberLiteral => {
                let tok = self.scanner.next_token();
                self.int_scalar_from_token(tok)
            }
            TokenKind::Identifier => {
                self.scanner.next_token();
                let upcoming = self.scanner.peek();
                if upcoming.kind == TokenKind::LParen && !upcoming.newline_since_last {
                    self.scanner.next_token();
                    return Some(self.parse_fun_call(tok));
                }
                let text = self.scanner.text(tok.span);
                if text == "True" || text == "False" {
                    return self.int_scalar_from_token(tok);
                }
                Some(self.arena.alloc(Node::Identifier { span: tok.span }))
            }
            TokenKind::LBracket => {
                self.scanner.next_token();
                self.parse_list_or_comprehension(ListKind::List, Elem::Expr)
            }
            TokenKind::LBrace => {
                self.scanner.next_token();
                self.parse_list_or_comprehension(ListKind::Map, Elem::MapTuple)
            }
            _ => {
                // Leave the token in the scanner.
                if !can_be_optional {
                    self.err_at(tok, "expected value of sorts");
                }
                None
            }
        }
    }

    fn parse_atom(&mut self, can_be_optional: bool) -> Option<NodeId> {
        let mut node = match self.scanner.peek().kind {
            TokenKind::Minus | TokenKind::Not => {
                let tok = self.scanner.next_token();
                let operand = self.parse_atom(can_be_optional);
                Some(self.arena.alloc(Node::Unary {
                    op: tok.kind,
                    span: tok.span,
                    operand,
                }))
            }
            TokenKind::LParen => self.parse_paren_expression_or_tuple(),
            _ => self.parse_value_or_identifier(can_be_optional),
        };

        let mut upcoming = self.scanner.peek();
        if upcoming.kind == TokenKind::If {
            return self.parse_if_else(node);
        }

        // Suffix array accesses bind strongest; a line break ends the
        // chain because the next `[` starts a new toplevel construct.
        while upcoming.kind == TokenKind::LBracket && !upcoming.newline_since_last {
            let op = self.scanner.next_token();
            let access = self.parse_array_or_slice_access();
            node = Some(self.arena.alloc(Node::BinOp {
                op: TokenKind::LBracket,
                span: op.span,
                left: node,
                right: access,
            }));
            upcoming = self.scanner.peek();
        }
        node
    }

    fn parse_with_precedence(&mut self, prec: usize, can_be_optional: bool) -> Option<NodeId> {
        if prec == 0 {
            return self.parse_atom(can_be_optional);
        }
        let mut node = self.parse_with_precedence(prec - 1, can_be_optional)?;
        loop {
            let upcoming = self.scanner.peek();
            if !PRECEDENCE[prec].contains(&upcoming.kind) {
                return Some(node);
            }
            let op = self.scanner.next_token();
            let right = self.parse_with_precedence(prec - 1, false);
            node = self.arena.alloc(Node::BinOp {
                op: op.kind,
                span: op.span,
                left: Some(node),
                right,
            });
        }
    }

    fn parse_expression(&mut self, can_be_optional: bool) -> Option<NodeId> {
        self.parse_with_precedence(PRECEDENCE.len() - 1, can_be_optional)
    }

    fn parse_paren_expression_or_tuple(&mut self) -> Option<NodeId> {
        let open = self.scanner.next_token();
        debug_assert_eq!(open.kind, TokenKind::LParen);

        // Expression may be absent: this could be an empty tuple.
        let exp = self.parse_expression(true);
        if exp.is_some() && self.scanner.peek().kind == TokenKind::RParen {
            self.scanner.next_token();
            return exp; // parenthesized expression
        }

        let mut items = Vec::new();
        match exp {
            None => {
                let p = self.scanner.next_token();
                if p.kind != TokenKind::RParen {
                    self.err_at(p, "looks like an empty tuple, but `)` is missing");
                }
            }
            Some(first) => {
                items.push(first);
                loop {
                    let separator = self.scanner.next_token();
                    if separator.kind == TokenKind::RParen {
                        break;
                    }
                    if separator.kind != TokenKind::Comma {
                        self.err_at(separator, "expected `,` as tuple separator");
                        break;
                    }
                    if self.scanner.peek().kind == TokenKind::RParen {
                        self.scanner.next_token(); // trailing comma at end
                        break;
                    }
                    if let Some(item) = self.parse_expression(false) {
                        items.push(item);
                    } else {
                        break;
                    }
                }
            }
        }
        Some(self.arena.alloc(Node::List {
            kind: ListKind::Tuple,
            items,
        }))
    }

    fn parse_map_tuple(&mut self) -> Option<NodeId> {
        let key = self.parse_expression(false)?;
        let separator = self.scanner.next_token();
        if separator.kind != TokenKind::Colon {
            self.err_at(separator, "expected `:` in map-tuple");
            return None;
        }
        let value = self.parse_expression(false);
        Some(self.arena.alloc(Node::BinOp {
            op: TokenKind::Colon,
            span: separator.span,
            left: Some(key),
            right: value,
        }))
    }

    // Opening brace consumed. The token after the first expression
    // distinguishes list from comprehension.
    fn parse_list_or_comprehension(&mut self, kind: ListKind, elem: Elem) -> Option<NodeId> {
        let close = end_token_for(kind);
        if self.scanner.peek().kind == close {
            self.scanner.next_token();
            return Some(self.arena.alloc(Node::List {
                kind,
                items: Vec::new(),
            }));
        }
        let first = self.parse_element(elem)?;

        match self.scanner.peek().kind {
            TokenKind::For => return self.parse_comprehension(kind, first),
            TokenKind::Comma => {
                self.scanner.next_token();
            }
            k if k == close => {} // good, one-element list
            _ => {
                let tok = self.scanner.peek();
                self.err_at(tok, &format!("expected `for`, `{close}`, or `,`"));
            }
        }

        let (items, _) = self.parse_list_items(vec![first], elem, close);
        Some(self.arena.alloc(Node::List { kind, items }))
    }

    // Read `for ... in ...` clauses until `end` is hit. Builds a
    // left-recursive tree of `for` binops: iteration subject on the left,
    // the `in` binop (variable tuple, iterable) on the right. Nested
    // loops keep the previous `for` on their left.
    fn parse_comprehension(&mut self, kind: ListKind, subject: NodeId) -> Option<NodeId> {
        let end = end_token_for(kind);
        let mut iterate_target = subject;
        let mut for_tree = None;

        while self.scanner.peek().kind == TokenKind::For {
            let for_tok = self.scanner.next_token();

            // Variables come as `i, j` or as a tuple `(i, j)`, followed
            // by `in` either way.
            let variables = if self.scanner.peek().kind == TokenKind::LParen {
                self.scanner.next_token();
                let (vars, _) =
                    self.parse_list_items(Vec::new(), Elem::OptionalIdent, TokenKind::RParen);
                let expect_in = self.scanner.next_token();
                if expect_in.kind != TokenKind::In {
                    self.err_at(expect_in, "expected `in` after variable tuple");
                }
                vars
            } else {
                let (vars, _) = self.parse_list_items(Vec::new(), Elem::OptionalIdent, TokenKind::In);
                vars
            };
            let variable_tuple = self.arena.alloc(Node::List {
                kind: ListKind::Tuple,
                items: variables,
            });

            let iterable = self.parse_expression(false);
            let after = self.scanner.peek();
            let range = Span::new(for_tok.span.end, after.span.start);
            let in_node = self.arena.alloc(Node::BinOp {
                op: TokenKind::In,
                span: range,
                left: Some(variable_tuple),
                right: iterable,
            });
            let tree = self.arena.alloc(Node::BinOp {
                op: TokenKind::For,
                span: for_tok.span,
                left: Some(iterate_target),
                right: Some(in_node),
            });
            for_tree = Some(tree);
            iterate_target = tree;
        }

        let end_tok = self.scanner.next_token();
        if end_tok.kind != end {
            self.err_at(end_tok, &format!("expected `{end}` at end of comprehension"));
            return None;
        }
        let for_node = for_tree?;
        Some(self.arena.alloc(Node::Comprehension { kind, for_node }))
    }

    // Strip quotes (and prefixes) off a string literal token; the
    // resulting span still points into the file, escapes preserved.
    fn string_scalar_from_literal(&mut self, tok: Token) -> NodeId {
        let text = self.scanner.text(tok.span);
        let is_raw = text.starts_with('r') || text.starts_with('R');
        let body = if is_raw { &text[1..] } else { text };
        let is_triple_quoted = body.len() >= 6 && {
            let q = body.as_bytes()[0];
            body.as_bytes()[1] == q && body.as_bytes()[2] == q
        };
        let quotes = if is_triple_quoted { 3 } else { 1 };
        let prefix = (is_raw as usize) + quotes;
        let from = prefix.min(text.len());
        let to = text.len().saturating_sub(quotes).max(from);
        self.arena.alloc(Node::StringScalar {
            span: tok.span.slice(from, to),
            is_triple_quoted,
            is_raw,
        })
    }

    fn int_scalar_from_token(&mut self, tok: Token) -> Option<NodeId> {
        let text = self.scanner.text(tok.span);
        match int_from_literal(text) {
            Some(value) => Some(self.arena.alloc(Node::IntScalar {
                span: tok.span,
                value,
            })),
            None => {
                self.err_at(tok, "error parsing int literal");
                None
            }
        }
    }

    fn err_at(&mut self, tok: Token, message: &str) {
        let text = self.scanner.text(tok.span);
        self.errors.push(ParseError {
            message: format!("got '{text}'; {message}"),
            span: tok.span,
        });
    }

    // After an error: skip to the next token that starts a line and can
    // start a statement.
    fn synchronize(&mut self) {
        let mut first = true;
        loop {
            let tok = self.scanner.peek();
            match tok.kind {
                TokenKind::Eof => return,
                TokenKind::Identifier
                | TokenKind::LBracket
                | TokenKind::LParen
                | TokenKind::StringLiteral
                | TokenKind::DefBlock
                    if tok.newline_since_last && !first =>
                {
                    return;
                }
                _ => {
                    self.scanner.next_token();
                }
            }
            first = false;
        }
    }
}

fn end_token_for(kind: ListKind) -> TokenKind {
    match kind {
        ListKind::List => TokenKind::RBracket,
        ListKind::Tuple => TokenKind::RParen,
        ListKind::Map => TokenKind::RBrace,
    }
}

/// Integer conversion for all literal spellings that reach the parser,
/// including the `True`/`False` identifiers.
pub fn int_from_literal(text: &str) -> Option<i64> {
    match text {
        "True" => return Some(1),
        "False" => return Some(0),
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        return i64::from_str_radix(oct, 8).ok();
    }
    if text.contains('.') {
        return None; // floats are not a thing in this subset
    }
    text.parse().ok()
}
