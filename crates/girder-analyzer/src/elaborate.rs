//! Constant evaluation of the AST: variable substitution, string and
//! list operations, format strings, ternaries, indexing and slicing,
//! `select()`, `glob()`, and (via [`crate::macros`]) user macro
//! templates.
//!
//! Only const-reducible fragments are evaluated; anything else stays as
//! residual AST. Rewriting is copy-on-write at node granularity: a
//! subtree without elaborable constructs keeps its `NodeId`, which keeps
//! its source locations. Strings assembled by evaluation are registered
//! as synthetic ranges that report the location of the operation that
//! produced them.

use std::path::PathBuf;

use girder_parser::{FileLocation, ListKind, Node, NodeArena, NodeId, SourceMap, Span, TokenKind};

use crate::collections::{HashSet, IndexMap};
use crate::glob::GlobMatchBuilder;
use crate::label::Package;
use crate::macros;
use crate::project::Project;
use crate::query;
use crate::session::Session;

#[derive(Clone, Copy, Debug, Default)]
pub struct ElaborationOptions {
    /// Expand registered macros before evaluating.
    pub macro_expansion: bool,
}

/// Elaborate every parsed package of the project.
pub fn elaborate(session: &mut Session, project: &mut Project, options: &ElaborationOptions) {
    let packages: Vec<Package> = project.parsed_files().map(|(p, _)| p.clone()).collect();
    for package in packages {
        elaborate_package(session, project, &package, options);
    }
}

/// Elaborate one package's file in place. Statements are processed in
/// source order; toplevel assignments become visible to later statements
/// of the same file.
pub fn elaborate_package(
    session: &mut Session,
    project: &mut Project,
    package: &Package,
    options: &ElaborationOptions,
) {
    let Some(file) = project.find_parsed(package) else {
        return;
    };
    let Some(ast) = file.ast else { return };

    let timer = std::time::Instant::now();

    if options.macro_expansion {
        let macros_by_name = project.macros().clone();
        let (arena, sources) = project.mutable_parts();
        let (substituted, _count) = macros::macro_substitute(arena, sources, &macros_by_name, ast);
        debug_assert_eq!(substituted, ast, "toplevel list never replaced");
    }

    let custom_flags = session.flags().custom_flags.clone();
    let package_dir = project.package_dir(package);
    let (arena, sources) = project.mutable_parts();
    let mut elaborator = Elaborator {
        arena,
        sources,
        package_dir,
        custom_flags,
        globals: IndexMap::default(),
        nest_level: 0,
        glob_checked_files: 0,
    };
    let result = elaborator.fold(ast);
    debug_assert_eq!(result, ast, "toplevel list never replaced");

    let glob_files = elaborator.glob_checked_files;
    let stats = session.stats_for("Elaborated", "packages");
    stats.count += 1;
    stats.duration += timer.elapsed();
    if glob_files > 0 {
        session.stats_for("  - of which glob() walking", "files").count += glob_files;
    }
}

/// A fully evaluated scalar.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Const {
    Int(i64),
    Str(String),
}

impl Const {
    fn stringified(&self) -> String {
        match self {
            Const::Int(v) => v.to_string(),
            Const::Str(s) => s.clone(),
        }
    }
}

struct Elaborator<'a> {
    arena: &'a mut NodeArena,
    sources: &'a mut SourceMap,
    package_dir: Option<PathBuf>,
    custom_flags: HashSet<String>,
    /// Toplevel assignments seen so far; values are already elaborated.
    globals: IndexMap<String, NodeId>,
    nest_level: u32,
    glob_checked_files: usize,
}

impl Elaborator<'_> {
    fn fold(&mut self, id: NodeId) -> NodeId {
        match self.arena.get(id).clone() {
            Node::Identifier { span } => {
                let name = self.sources.text(span);
                match self.globals.get(name) {
                    Some(&value) => value,
                    None => id,
                }
            }
            Node::IntScalar { .. } | Node::StringScalar { .. } => id,
            Node::List { items, .. } => {
                for (i, &item) in items.iter().enumerate() {
                    let folded = self.fold(item);
                    if folded != item {
                        if let Node::List { items, .. } = self.arena.get_mut(id) {
                            items[i] = folded;
                        }
                    }
                }
                id
            }
            Node::Assignment { lhs, rhs, .. } => {
                if let Some(rhs_node) = rhs {
                    let folded = self.fold(rhs_node);
                    if folded != rhs_node {
                        if let Node::Assignment { rhs, .. } = self.arena.get_mut(id) {
                            *rhs = Some(folded);
                        }
                    }
                    if self.nest_level == 0 {
                        self.bind_assignment(lhs, folded);
                    }
                }
                id
            }
            Node::FunCall { callee, args } => {
                self.nest_level += 1;
                self.fold(args);
                let result = self.eval_fun_call(id, callee, args);
                self.nest_level -= 1;
                result
            }
            Node::Unary { op, operand, .. } => {
                let folded = operand.map(|n| self.fold(n));
                if folded != operand {
                    if let Node::Unary { operand, .. } = self.arena.get_mut(id) {
                        *operand = folded;
                    }
                }
                self.eval_unary(id, op, folded)
            }
            Node::BinOp {
                op,
                span,
                left,
                right,
            } => {
                let left_prime = left.map(|n| self.fold(n));
                let right_prime = right.map(|n| self.fold(n));
                if left_prime != left || right_prime != right {
                    if let Node::BinOp { left, right, .. } = self.arena.get_mut(id) {
                        *left = left_prime;
                        *right = right_prime;
                    }
                }
                self.eval_binop(id, op, span, left_prime, right_prime)
            }
            Node::Comprehension { kind, for_node } => self.eval_comprehension(id, kind, for_node),
            Node::Ternary {
                condition,
                positive,
                negative,
            } => {
                let condition_prime = self.fold(condition);
                let positive_prime = self.fold(positive);
                let negative_prime = negative.map(|n| self.fold(n));
                if condition_prime != condition
                    || positive_prime != positive
                    || negative_prime != negative
                {
                    if let Node::Ternary {
                        condition,
                        positive,
                        negative,
                    } = self.arena.get_mut(id)
                    {
                        *condition = condition_prime;
                        *positive = positive_prime;
                        *negative = negative_prime;
                    }
                }
                match self.truthiness(condition_prime) {
                    Some(true) => positive_prime,
                    Some(false) => negative_prime.unwrap_or(id),
                    None => id,
                }
            }
        }
    }

    // -- toplevel variable binding, including pairwise tuple unpack.

    fn bind_assignment(&mut self, lhs: NodeId, value: NodeId) {
        if let Some(span) = self.arena.identifier_span(lhs) {
            let name = self.sources.text(span).to_string();
            self.globals.insert(name, value);
            return;
        }
        let (Some((_, lhs_items)), Some((_, value_items))) =
            (self.arena.any_list(lhs), self.arena.any_list(value))
        else {
            return;
        };
        let pairs: Vec<(NodeId, NodeId)> = lhs_items
            .iter()
            .zip(value_items.iter())
            .map(|(l, v)| (*l, *v))
            .collect();
        for (l, v) in pairs {
            if let Some(span) = self.arena.identifier_span(l) {
                let name = self.sources.text(span).to_string();
                self.globals.insert(name, v);
            }
        }
    }

    // -- scalar helpers

    fn const_of(&self, id: NodeId) -> Option<Const> {
        match self.arena.get(id) {
            Node::IntScalar { value, .. } => Some(Const::Int(*value)),
            Node::StringScalar { span, .. } => Some(Const::Str(self.sources.text(*span).to_string())),
            _ => None,
        }
    }

    fn truthiness(&self, id: NodeId) -> Option<bool> {
        if let Some(c) = self.const_of(id) {
            return Some(match c {
                Const::Int(v) => v != 0,
                Const::Str(s) => !s.is_empty(),
            });
        }
        // A fully-elaborated list is also a usable condition.
        match self.arena.get(id) {
            Node::List { items, .. } => Some(!items.is_empty()),
            _ => None,
        }
    }

    fn synth_int(&mut self, value: i64) -> NodeId {
        self.arena.alloc(Node::IntScalar {
            span: Span::dummy(),
            value,
        })
    }

    fn synth_bool(&mut self, value: bool) -> NodeId {
        let span = if value {
            self.sources.true_span()
        } else {
            self.sources.false_span()
        };
        self.arena.alloc(Node::IntScalar {
            span,
            value: value as i64,
        })
    }

    fn location_of(&self, span: Span) -> FileLocation {
        self.sources.location(span).unwrap_or_else(|| FileLocation {
            file: "(unknown)".to_string(),
            range: Default::default(),
        })
    }

    // Whoever asks where this string comes from is told the location of
    // the operation that produced it.
    fn synth_string(&mut self, text: String, produced_at: Span) -> NodeId {
        let location = self.location_of(produced_at);
        let span = self.sources.add_synthetic(text, location);
        self.arena.alloc(Node::StringScalar {
            span,
            is_triple_quoted: false,
            is_raw: false,
        })
    }

    fn string_content(&self, id: NodeId) -> Option<(Span, String)> {
        let span = self.arena.string_span(id)?;
        Some((span, self.sources.text(span).to_string()))
    }

    // -- function calls: glob(), select(), len()

    fn eval_fun_call(&mut self, id: NodeId, callee: NodeId, args: NodeId) -> NodeId {
        let Some(callee_span) = self.arena.identifier_span(callee) else {
            return id;
        };
        match self.sources.text(callee_span) {
            "glob" => self.eval_glob(id, callee_span, args),
            "select" => self.eval_select(id, args),
            "len" => self.eval_len(id, args),
            _ => id,
        }
    }

    fn eval_len(&mut self, id: NodeId, args: NodeId) -> NodeId {
        let arg = match self.arena.any_list(args) {
            Some((_, [arg])) => *arg,
            _ => return id,
        };
        let length = match self.arena.get(arg) {
            Node::StringScalar { span, .. } => Some(self.sources.text(*span).len() as i64),
            Node::List { items, .. } => Some(items.len() as i64),
            _ => None,
        };
        match length {
            Some(len) => self.synth_int(len),
            None => id,
        }
    }

    // If one of the keys is in the configured flag set, its value wins;
    // otherwise the `//conditions:default` branch; otherwise the call
    // stays, to be looked at by a human.
    fn eval_select(&mut self, id: NodeId, args: NodeId) -> NodeId {
        let Some((_, arg_items)) = self.arena.any_list(args) else {
            return id;
        };
        let mut default_node = id;
        for arg in arg_items.to_vec() {
            let Some(map_items) = self.arena.list_of(arg, ListKind::Map) else {
                continue;
            };
            for item in map_items.to_vec() {
                let Some((TokenKind::Colon, _, Some(key), Some(value))) = self.arena.binop(item)
                else {
                    continue;
                };
                let Some((_, key_text)) = self.string_content(key) else {
                    continue;
                };
                if self.custom_flags.contains(&key_text) {
                    return value;
                }
                if key_text == "//conditions:default" {
                    default_node = value;
                }
            }
        }
        default_node
    }

    fn eval_glob(&mut self, id: NodeId, callee_span: Span, args: NodeId) -> NodeId {
        // include may be a positional list parameter or the include= kwarg.
        let mut include_list = None;
        let mut exclude_list = None;
        let Some((_, arg_items)) = self.arena.any_list(args) else {
            return id;
        };
        for arg in arg_items {
            if self.arena.any_list(*arg).is_some() {
                include_list = Some(*arg);
                continue;
            }
            if let Some((lhs, Some(rhs))) = self.arena.assignment(*arg) {
                if let Some(kw_span) = self.arena.identifier_span(lhs) {
                    match self.sources.text(kw_span) {
                        "include" => include_list = Some(rhs),
                        "exclude" => exclude_list = Some(rhs),
                        _ => {}
                    }
                }
            }
        }

        let mut builder = GlobMatchBuilder::default();
        for pattern in query::string_texts(self.arena, self.sources, include_list) {
            builder.add_include_pattern(&pattern);
        }
        for pattern in query::string_texts(self.arena, self.sources, exclude_list) {
            builder.add_exclude_pattern(&pattern);
        }

        let relative_files = self.walk_glob(&builder);

        // All result strings go into one arena-owned blob, registered to
        // point back at the glob() callsite.
        let blob_len: usize = relative_files.iter().map(|f| f.len()).sum();
        let mut blob = String::with_capacity(blob_len);
        for f in &relative_files {
            blob.push_str(f);
        }
        let location = self.location_of(callee_span);
        let blob_span = self.sources.add_synthetic(blob, location);

        let mut result_items = Vec::with_capacity(relative_files.len());
        let mut offset = 0;
        for f in &relative_files {
            let span = blob_span.slice(offset, offset + f.len());
            offset += f.len();
            result_items.push(self.arena.alloc(Node::StringScalar {
                span,
                is_triple_quoted: false,
                is_raw: false,
            }));
        }
        self.arena.alloc(Node::List {
            kind: ListKind::List,
            items: result_items,
        })
    }

    // Walk the package directory once, pruned by the directory predicate
    // so unrelated subtrees are never entered. Returns sorted relative
    // paths.
    fn walk_glob(&mut self, builder: &GlobMatchBuilder) -> Vec<String> {
        let Some(root) = self.package_dir.clone() else {
            return Vec::new();
        };
        let dir_matcher = builder.build_directory_match_predicate();
        let file_matcher = builder.build_file_match_predicate();
        let mut checked = 0usize;
        let mut result: Vec<String> = crate::fsutil::collect_files_recursive(
            &None,
            &root,
            |dir| {
                dir.strip_prefix(&root)
                    .ok()
                    .and_then(|p| p.to_str())
                    .is_some_and(&dir_matcher)
            },
            |file| {
                checked += 1;
                file.strip_prefix(&root)
                    .ok()
                    .and_then(|p| p.to_str())
                    .is_some_and(&file_matcher)
            },
        )
        .iter()
        .filter_map(|p| p.strip_prefix(&root).ok())
        .filter_map(|p| p.to_str().map(str::to_string))
        .collect();
        self.glob_checked_files += checked;
        result.sort();
        result
    }

    // -- unary and binary expressions

    fn eval_unary(&mut self, id: NodeId, op: TokenKind, operand: Option<NodeId>) -> NodeId {
        let Some(operand) = operand else { return id };
        let Some(Const::Int(value)) = self.const_of(operand) else {
            return id;
        };
        match op {
            TokenKind::Minus => self.synth_int(-value),
            TokenKind::Not => self.synth_bool(value == 0),
            _ => id,
        }
    }

    fn eval_binop(
        &mut self,
        id: NodeId,
        op: TokenKind,
        span: Span,
        left: Option<NodeId>,
        right: Option<NodeId>,
    ) -> NodeId {
        let (Some(left), Some(right)) = (left, right) else {
            return id;
        };
        match op {
            TokenKind::Plus => self.eval_plus(id, span, left, right),
            TokenKind::Minus | TokenKind::Star | TokenKind::Slash | TokenKind::FloorDiv => {
                self.eval_int_arith(id, op, left, right)
            }
            TokenKind::Percent => self.eval_percent(id, span, left, right),
            TokenKind::Pipe => self.eval_map_merge(id, left, right),
            TokenKind::Dot => self.eval_method_call(id, span, left, right),
            TokenKind::LBracket => self.eval_index_or_slice(id, left, right),
            TokenKind::In => self.eval_membership(id, left, right, false),
            TokenKind::NotIn => self.eval_membership(id, left, right, true),
            _ => id,
        }
    }

    fn eval_plus(&mut self, id: NodeId, span: Span, left: NodeId, right: NodeId) -> NodeId {
        {
            let left_list = self.arena.any_list(left);
            let right_list = self.arena.any_list(right);
            match (left_list, right_list) {
                // An undefined side makes the known side the best result
                // for everything downstream.
                (Some(_), None) => return left,
                (None, Some(_)) => return right,
                (Some((lk, li)), Some((rk, ri))) if lk == rk => {
                    let mut items = li.to_vec();
                    items.extend_from_slice(ri);
                    let kind = lk;
                    return self.arena.alloc(Node::List { kind, items });
                }
                _ => {}
            }
        }
        match (self.const_of(left), self.const_of(right)) {
            (Some(Const::Str(l)), Some(Const::Str(r))) => self.synth_string(l + &r, span),
            (Some(Const::Int(l)), Some(Const::Int(r))) => match l.checked_add(r) {
                Some(v) => self.synth_int(v),
                None => id,
            },
            _ => id,
        }
    }

    fn eval_int_arith(&mut self, id: NodeId, op: TokenKind, left: NodeId, right: NodeId) -> NodeId {
        let (Some(Const::Int(l)), Some(Const::Int(r))) = (self.const_of(left), self.const_of(right))
        else {
            return id;
        };
        let result = match op {
            TokenKind::Minus => l.checked_sub(r),
            TokenKind::Star => l.checked_mul(r),
            TokenKind::Slash | TokenKind::FloorDiv => l.checked_div(r),
            _ => None,
        };
        match result {
            Some(v) => self.synth_int(v),
            None => id,
        }
    }

    // `"fmt with %s" % arg` string formatting, or integer modulo.
    fn eval_percent(&mut self, id: NodeId, span: Span, left: NodeId, right: NodeId) -> NodeId {
        if let (Some(Const::Int(l)), Some(Const::Int(r))) =
            (self.const_of(left), self.const_of(right))
        {
            return match l.checked_rem(r) {
                Some(v) => self.synth_int(v),
                None => id,
            };
        }
        let Some((_, format)) = self.string_content(left) else {
            return id;
        };
        // Right side: a tuple of values or a single scalar.
        let mut args = Vec::new();
        if let Some(items) = self.arena.list_of(right, ListKind::Tuple) {
            for item in items {
                match self.const_of(*item) {
                    Some(c) => args.push(c),
                    None => return id,
                }
            }
        } else {
            match self.const_of(right) {
                Some(c) => args.push(c),
                None => return id,
            }
        }

        let mut out = String::new();
        let mut arg_iter = args.iter();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some('s') | Some('d') => match arg_iter.next() {
                    Some(arg) => out.push_str(&arg.stringified()),
                    None => return id, // more placeholders than arguments
                },
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => break,
            }
        }
        self.synth_string(out, span)
    }

    fn map_entries(&self, map: NodeId) -> Option<Vec<(Const, NodeId, NodeId, NodeId)>> {
        let items = self.arena.list_of(map, ListKind::Map)?;
        let mut entries = Vec::with_capacity(items.len());
        for &item in items {
            let (TokenKind::Colon, _, Some(key), Some(value)) = self.arena.binop(item)? else {
                return None;
            };
            entries.push((self.const_of(key)?, item, key, value));
        }
        Some(entries)
    }

    // Right-wins merge preserving insertion order: keys of the left side
    // keep their position (with the right side's entry when overridden),
    // right-only keys append in their own order.
    fn eval_map_merge(&mut self, id: NodeId, left: NodeId, right: NodeId) -> NodeId {
        let (Some(left_entries), Some(right_entries)) =
            (self.map_entries(left), self.map_entries(right))
        else {
            return id;
        };
        let mut items = Vec::with_capacity(left_entries.len() + right_entries.len());
        for (key, item, _, _) in &left_entries {
            let winner = right_entries
                .iter()
                .find(|(rk, _, _, _)| rk == key)
                .map(|(_, ritem, _, _)| *ritem)
                .unwrap_or(*item);
            items.push(winner);
        }
        for (key, item, _, _) in &right_entries {
            if !left_entries.iter().any(|(lk, _, _, _)| lk == key) {
                items.push(*item);
            }
        }
        self.arena.alloc(Node::List {
            kind: ListKind::Map,
            items,
        })
    }

    // -- `.method()` calls on strings and maps

    fn eval_method_call(&mut self, id: NodeId, span: Span, left: NodeId, right: NodeId) -> NodeId {
        let Some((method_callee, method_args)) = self.arena.fun_call(right) else {
            return id;
        };
        let Some(method_span) = self.arena.identifier_span(method_callee) else {
            return id;
        };
        let Some((_, args)) = self.arena.any_list(method_args) else {
            return id;
        };
        let args = args.to_vec();
        match self.sources.text(method_span) {
            "format" => self.eval_format(id, span, left, &args),
            "join" => self.eval_join(id, span, left, &args),
            "split" => self.eval_split(id, left, &args, false),
            "rsplit" => self.eval_split(id, left, &args, true),
            "get" => self.eval_map_get(id, left, &args),
            "keys" => self.eval_map_iterate(id, left, &args, MapPart::Keys),
            "values" => self.eval_map_iterate(id, left, &args, MapPart::Values),
            "items" => self.eval_map_iterate(id, left, &args, MapPart::Items),
            _ => id,
        }
    }

    // `{}`, `{n}` and `{name}` placeholders. All arguments (including
    // keyword values, which are also positionally addressable) must be
    // const; otherwise the expression is left alone. An out-of-range
    // explicit index truncates the result; an exhausted auto index keeps
    // the braces literally.
    fn eval_format(&mut self, id: NodeId, span: Span, left: NodeId, args: &[NodeId]) -> NodeId {
        let Some((_, format)) = self.string_content(left) else {
            return id;
        };
        let mut positional = Vec::new();
        let mut by_name: IndexMap<String, Const> = IndexMap::default();
        for &arg in args {
            if let Some((lhs, Some(rhs))) = self.arena.assignment(arg) {
                let Some(c) = self.const_of(rhs) else { return id };
                if let Some(name_span) = self.arena.identifier_span(lhs) {
                    by_name.insert(self.sources.text(name_span).to_string(), c.clone());
                }
                positional.push(c);
            } else {
                let Some(c) = self.const_of(arg) else { return id };
                positional.push(c);
            }
        }

        let mut out = String::new();
        let mut rest = format.as_str();
        let mut placeholder_count = 0usize;
        loop {
            let Some(open) = rest.find('{') else {
                out.push_str(rest);
                break;
            };
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('}') else {
                out.push_str(&rest[open..]);
                break;
            };
            let inner = &after_open[..close];
            rest = &after_open[close + 1..];

            if inner.is_empty() {
                match positional.get(placeholder_count) {
                    Some(arg) => out.push_str(&arg.stringified()),
                    None => out.push_str("{}"), // exhausted, keep literal
                }
            } else if let Ok(index) = inner.parse::<usize>() {
                match positional.get(index) {
                    Some(arg) => out.push_str(&arg.stringified()),
                    None => break, // invalid index: truncate here
                }
            } else {
                match by_name.get(inner) {
                    Some(arg) => out.push_str(&arg.stringified()),
                    None => {
                        out.push('{');
                        out.push_str(inner);
                        out.push('}');
                    }
                }
            }
            placeholder_count += 1;
        }
        self.synth_string(out, span)
    }

    fn eval_join(&mut self, id: NodeId, span: Span, left: NodeId, args: &[NodeId]) -> NodeId {
        let Some((_, separator)) = self.string_content(left) else {
            return id;
        };
        let [seq] = args else { return id };
        let Some((kind, items)) = self.arena.any_list(*seq) else {
            return id;
        };
        if kind == ListKind::Map {
            return id;
        }
        let mut parts = Vec::with_capacity(items.len());
        for &item in items {
            match self.const_of(item) {
                Some(c) => parts.push(c.stringified()),
                None => return id, // not fully const
            }
        }
        self.synth_string(parts.join(&separator), span)
    }

    // `split()`/`rsplit()`: optional separator (whitespace without), and
    // an optional maximum split count where negative means unlimited.
    // The pieces are substrings, so they keep pointing into the original
    // content.
    fn eval_split(&mut self, id: NodeId, left: NodeId, args: &[NodeId], from_right: bool) -> NodeId {
        let Some((string_span, content)) = self.string_content(left) else {
            return id;
        };
        let (separator, max_splits) = match args {
            [] => (None, None),
            [sep] => match self.const_of(*sep) {
                Some(Const::Str(s)) => (Some(s), None),
                _ => return id,
            },
            [sep, limit] => match (self.const_of(*sep), self.const_of(*limit)) {
                (Some(Const::Str(s)), Some(Const::Int(n))) => {
                    (Some(s), if n < 0 { None } else { Some(n as usize) })
                }
                _ => return id,
            },
            _ => return id,
        };

        let ranges = match &separator {
            None => whitespace_split_ranges(&content),
            Some(sep) => separator_split_ranges(&content, sep, max_splits, from_right),
        };

        let items: Vec<NodeId> = ranges
            .into_iter()
            .map(|(from, to)| {
                self.arena.alloc(Node::StringScalar {
                    span: string_span.slice(from, to),
                    is_triple_quoted: false,
                    is_raw: false,
                })
            })
            .collect();
        self.arena.alloc(Node::List {
            kind: ListKind::List,
            items,
        })
    }

    fn eval_map_get(&mut self, id: NodeId, left: NodeId, args: &[NodeId]) -> NodeId {
        let Some(entries) = self.map_entries(left) else {
            return id;
        };
        let (key, default) = match args {
            [key] => (key, None),
            [key, default] => (key, Some(*default)),
            _ => return id,
        };
        let Some(wanted) = self.const_of(*key) else {
            return id;
        };
        match entries.iter().find(|(k, _, _, _)| *k == wanted) {
            Some((_, _, _, value)) => *value,
            None => default.unwrap_or(id),
        }
    }

    fn eval_map_iterate(&mut self, id: NodeId, left: NodeId, args: &[NodeId], part: MapPart) -> NodeId {
        if !args.is_empty() {
            return id;
        }
        let Some(entries) = self.map_entries(left) else {
            return id;
        };
        let mut items = Vec::with_capacity(entries.len());
        for (_, _, key, value) in entries {
            items.push(match part {
                MapPart::Keys => key,
                MapPart::Values => value,
                MapPart::Items => self.arena.alloc(Node::List {
                    kind: ListKind::Tuple,
                    items: vec![key, value],
                }),
            });
        }
        self.arena.alloc(Node::List {
            kind: ListKind::List,
            items,
        })
    }

    // -- indexing and slicing

    fn eval_index_or_slice(&mut self, id: NodeId, left: NodeId, right: NodeId) -> NodeId {
        // A `:`-binop on the right is a slice, anything else an index.
        if let Some((TokenKind::Colon, _, from, to)) = self.arena.binop(right) {
            return self.eval_slice(id, left, from, to);
        }

        // Map access works with any const key.
        if let Some(entries) = self.map_entries(left) {
            let Some(wanted) = self.const_of(right) else {
                return id;
            };
            return match entries.iter().find(|(k, _, _, _)| *k == wanted) {
                Some((_, _, _, value)) => *value,
                None => id, // key not found: keep expression as-is
            };
        }

        let Some(Const::Int(index)) = self.const_of(right) else {
            return id;
        };

        if let Some((string_span, content)) = self.string_content(left) {
            let Some(at) = normalize_index(index, content.len()) else {
                // Graceful out-of-bounds: empty string.
                return self.arena.alloc(Node::StringScalar {
                    span: string_span.slice(0, 0),
                    is_triple_quoted: false,
                    is_raw: false,
                });
            };
            let end = next_char_boundary(&content, at);
            return self.arena.alloc(Node::StringScalar {
                span: string_span.slice(at, end),
                is_triple_quoted: false,
                is_raw: false,
            });
        }

        match self.arena.any_list(left) {
            Some((kind, items)) if kind != ListKind::Map => {
                match normalize_index(index, items.len()) {
                    Some(at) => items[at],
                    None => id, // out of range: residual
                }
            }
            _ => id,
        }
    }

    fn eval_slice(
        &mut self,
        id: NodeId,
        left: NodeId,
        from: Option<NodeId>,
        to: Option<NodeId>,
    ) -> NodeId {
        let from_index = match from {
            None => None,
            Some(n) => match self.const_of(n) {
                Some(Const::Int(v)) => Some(v),
                _ => return id,
            },
        };
        let to_index = match to {
            None => None,
            Some(n) => match self.const_of(n) {
                Some(Const::Int(v)) => Some(v),
                _ => return id,
            },
        };

        if let Some((string_span, content)) = self.string_content(left) {
            let (begin, end) = clamp_slice(from_index, to_index, content.len());
            if !content.is_char_boundary(begin) || !content.is_char_boundary(end) {
                return id;
            }
            return self.arena.alloc(Node::StringScalar {
                span: string_span.slice(begin, end),
                is_triple_quoted: false,
                is_raw: false,
            });
        }
        match self.arena.any_list(left) {
            Some((kind, items)) if kind != ListKind::Map => {
                let (begin, end) = clamp_slice(from_index, to_index, items.len());
                let items = items[begin..end].to_vec();
                self.arena.alloc(Node::List {
                    kind: ListKind::List,
                    items,
                })
            }
            _ => id,
        }
    }

    // -- membership

    fn eval_membership(&mut self, id: NodeId, left: NodeId, right: NodeId, negate: bool) -> NodeId {
        let Some(needle) = self.const_of(left) else {
            return id;
        };
        let contained = match self.arena.get(right) {
            Node::List { items, .. } => {
                let items = items.clone();
                let mut any_unknown = false;
                let mut found = false;
                for item in items {
                    match self.const_of(item) {
                        Some(c) => {
                            if c == needle {
                                found = true;
                                break;
                            }
                        }
                        None => any_unknown = true,
                    }
                }
                if !found && any_unknown {
                    // An unevaluated element could change the answer.
                    return id;
                }
                found
            }
            Node::StringScalar { span, .. } => {
                let haystack = self.sources.text(*span);
                match &needle {
                    Const::Str(s) => haystack.contains(s.as_str()),
                    Const::Int(_) => return id,
                }
            }
            _ => return id,
        };
        self.synth_bool(contained != negate)
    }

    // -- list comprehensions

    // Multi-`for` comprehensions are expanded to a single flat list, the
    // first written loop being the outermost.
    fn eval_comprehension(&mut self, id: NodeId, kind: ListKind, for_node: NodeId) -> NodeId {
        // The parser builds the chain left-recursively with the *last*
        // loop at the root; collect and reverse.
        let mut clauses = Vec::new();
        let mut cursor = for_node;
        let subject = loop {
            match self.arena.binop(cursor) {
                Some((TokenKind::For, _, Some(left), Some(right))) => {
                    clauses.push(right);
                    cursor = left;
                }
                _ => break cursor,
            }
        };
        clauses.reverse();

        // Each clause: variables and a fully-evaluated iterable.
        let mut levels: Vec<(Vec<String>, Vec<NodeId>)> = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let Some((TokenKind::In, _, Some(vars), Some(iterable))) = self.arena.binop(clause)
            else {
                return id;
            };
            let folded = self.fold(iterable);
            let Some((iter_kind, items)) = self.arena.any_list(folded) else {
                return id; // not (yet) iterable: keep as-is
            };
            if iter_kind == ListKind::Map {
                return id;
            }
            let items = items.to_vec();
            let Some((_, var_nodes)) = self.arena.any_list(vars) else {
                return id;
            };
            let mut names = Vec::with_capacity(var_nodes.len());
            for var in var_nodes.to_vec() {
                let Some(span) = self.arena.identifier_span(var) else {
                    return id;
                };
                names.push(self.sources.text(span).to_string());
            }
            levels.push((names, items));
        }
        if levels.is_empty() {
            return id;
        }

        let mut results = Vec::new();
        let mut bindings = IndexMap::default();
        if !self.expand_levels(&levels, 0, subject, &mut bindings, &mut results) {
            return id;
        }
        self.arena.alloc(Node::List {
            kind,
            items: results,
        })
    }

    fn expand_levels(
        &mut self,
        levels: &[(Vec<String>, Vec<NodeId>)],
        depth: usize,
        subject: NodeId,
        bindings: &mut IndexMap<String, NodeId>,
        results: &mut Vec<NodeId>,
    ) -> bool {
        if depth == levels.len() {
            let substituted = macros::substitute_copy(self.arena, self.sources, bindings, subject);
            let folded = self.fold(substituted);
            results.push(folded);
            return true;
        }
        let (names, items) = &levels[depth];
        for &item in items {
            if names.len() == 1 {
                bindings.insert(names[0].clone(), item);
            } else {
                // Unpack a tuple/list element pairwise into the variables.
                let Some((_, elements)) = self.arena.any_list(item) else {
                    return false;
                };
                if elements.len() != names.len() {
                    return false;
                }
                let elements = elements.to_vec();
                for (name, element) in names.iter().zip(elements) {
                    bindings.insert(name.clone(), element);
                }
            }
            if !self.expand_levels(levels, depth + 1, subject, bindings, results) {
                return false;
            }
        }
        true
    }
}

enum MapPart {
    Keys,
    Values,
    Items,
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let normalized = if index < 0 { len + index } else { index };
    (0..len).contains(&normalized).then_some(normalized as usize)
}

// Python-style slice clamping: negative indices count from the end, out
// of range clips, crossed bounds yield the empty range.
fn clamp_slice(from: Option<i64>, to: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { len + v } else { v };
        v.clamp(0, len)
    };
    let begin = clamp(from.unwrap_or(0));
    let end = clamp(to.unwrap_or(len)).max(begin);
    (begin as usize, end as usize)
}

fn next_char_boundary(s: &str, at: usize) -> usize {
    let mut end = at + 1;
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    end
}

fn whitespace_split_ranges(s: &str) -> Vec<(usize, usize)> {
    let base = s.as_ptr() as usize;
    s.split_whitespace()
        .map(|piece| {
            let start = piece.as_ptr() as usize - base;
            (start, start + piece.len())
        })
        .collect()
}

fn separator_split_ranges(
    s: &str,
    separator: &str,
    max_splits: Option<usize>,
    from_right: bool,
) -> Vec<(usize, usize)> {
    if separator.is_empty() {
        return vec![(0, s.len())];
    }
    let mut cut_points: Vec<usize> = s.match_indices(separator).map(|(i, _)| i).collect();
    if let Some(max) = max_splits {
        if cut_points.len() > max {
            if from_right {
                cut_points = cut_points.split_off(cut_points.len() - max);
            } else {
                cut_points.truncate(max);
            }
        }
    }
    let mut ranges = Vec::with_capacity(cut_points.len() + 1);
    let mut begin = 0;
    for cut in cut_points {
        if cut < begin {
            continue; // overlapping separator occurrences
        }
        ranges.push((begin, cut));
        begin = cut + separator.len();
    }
    ranges.push((begin, s.len()));
    ranges
}
