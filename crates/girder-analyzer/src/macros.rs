//! User-macro expansion: a registered `name = body` template replaces a
//! call `name(k = v, ...)` by a copy of the body with the kw-args bound.
//! Runs before constant evaluation so that the expanded rules take part
//! in it.

use girder_parser::{Node, NodeArena, NodeId, SourceMap};

use crate::collections::{HashMap, IndexMap};
use crate::query;

/// Sentinel body: `girder_forward_args(inner_call(...))` forwards the
/// macro call's kw-args as prepended arguments into each call found one
/// level inside the sentinel, instead of binding them as variables.
pub const FORWARD_ARGS_MACRO: &str = "girder_forward_args";

/// Deep-copy `node` with identifiers bound in `varmap` replaced by their
/// values. Copy-on-write at node granularity: unchanged subtrees are
/// returned as-is, which preserves their source locations.
pub(crate) fn substitute_copy(
    arena: &mut NodeArena,
    sources: &SourceMap,
    varmap: &IndexMap<String, NodeId>,
    id: NodeId,
) -> NodeId {
    match arena.get(id).clone() {
        Node::Identifier { span } => match varmap.get(sources.text(span)) {
            Some(value) => *value,
            None => id,
        },
        Node::IntScalar { .. } | Node::StringScalar { .. } => id,
        Node::Assignment { span, lhs, rhs } => {
            // The lhs is regarded immutable; only values substitute.
            let rhs_prime = rhs.map(|r| substitute_copy(arena, sources, varmap, r));
            if rhs_prime == rhs {
                id
            } else {
                arena.alloc(Node::Assignment {
                    span,
                    lhs,
                    rhs: rhs_prime,
                })
            }
        }
        Node::FunCall { callee, args } => {
            let args_prime = substitute_copy(arena, sources, varmap, args);
            if args_prime == args {
                id
            } else {
                arena.alloc(Node::FunCall {
                    callee,
                    args: args_prime,
                })
            }
        }
        Node::List { kind, items } => {
            let mut all_same = true;
            let mut new_items = Vec::with_capacity(items.len());
            for item in &items {
                let item_prime = substitute_copy(arena, sources, varmap, *item);
                all_same &= item_prime == *item;
                new_items.push(item_prime);
            }
            if all_same {
                id
            } else {
                arena.alloc(Node::List {
                    kind,
                    items: new_items,
                })
            }
        }
        Node::Unary { op, span, operand } => {
            let operand_prime = operand.map(|n| substitute_copy(arena, sources, varmap, n));
            if operand_prime == operand {
                id
            } else {
                arena.alloc(Node::Unary {
                    op,
                    span,
                    operand: operand_prime,
                })
            }
        }
        Node::BinOp {
            op,
            span,
            left,
            right,
        } => {
            let left_prime = left.map(|n| substitute_copy(arena, sources, varmap, n));
            let right_prime = right.map(|n| substitute_copy(arena, sources, varmap, n));
            if left_prime == left && right_prime == right {
                id
            } else {
                arena.alloc(Node::BinOp {
                    op,
                    span,
                    left: left_prime,
                    right: right_prime,
                })
            }
        }
        Node::Comprehension { kind, for_node } => {
            let for_prime = substitute_copy(arena, sources, varmap, for_node);
            if for_prime == for_node {
                id
            } else {
                arena.alloc(Node::Comprehension {
                    kind,
                    for_node: for_prime,
                })
            }
        }
        Node::Ternary {
            condition,
            positive,
            negative,
        } => {
            let condition_prime = substitute_copy(arena, sources, varmap, condition);
            let positive_prime = substitute_copy(arena, sources, varmap, positive);
            let negative_prime = negative.map(|n| substitute_copy(arena, sources, varmap, n));
            if condition_prime == condition
                && positive_prime == positive
                && negative_prime == negative
            {
                id
            } else {
                arena.alloc(Node::Ternary {
                    condition: condition_prime,
                    positive: positive_prime,
                    negative: negative_prime,
                })
            }
        }
    }
}

struct MacroSubstitutor<'a> {
    arena: &'a mut NodeArena,
    sources: &'a SourceMap,
    macros: &'a HashMap<String, NodeId>,
    nest_level: u32,
    substitution_count: usize,
}

impl MacroSubstitutor<'_> {
    fn fold(&mut self, id: NodeId) -> NodeId {
        match self.arena.get(id).clone() {
            Node::FunCall { callee, args } => {
                self.nest_level += 1;
                let result = self.fold_call(id, callee, args);
                self.nest_level -= 1;
                result
            }
            Node::List { items, .. } => {
                for (i, item) in items.iter().enumerate() {
                    let folded = self.fold(*item);
                    if folded != *item {
                        if let Node::List { items, .. } = self.arena.get_mut(id) {
                            items[i] = folded;
                        }
                    }
                }
                id
            }
            Node::Assignment { rhs, .. } => {
                if let Some(rhs) = rhs {
                    let folded = self.fold(rhs);
                    if folded != rhs {
                        if let Node::Assignment { rhs, .. } = self.arena.get_mut(id) {
                            *rhs = Some(folded);
                        }
                    }
                }
                id
            }
            Node::BinOp { left, right, .. } => {
                let left_prime = left.map(|n| self.fold(n));
                let right_prime = right.map(|n| self.fold(n));
                if left_prime != left || right_prime != right {
                    if let Node::BinOp { left, right, .. } = self.arena.get_mut(id) {
                        *left = left_prime;
                        *right = right_prime;
                    }
                }
                id
            }
            _ => id,
        }
    }

    // Only calls at the toplevel are macro candidates; nested calls are
    // arguments of rules and stay untouched.
    fn fold_call(&mut self, id: NodeId, callee: NodeId, args: NodeId) -> NodeId {
        if self.nest_level != 1 {
            return id;
        }
        let Some(name_span) = self.arena.identifier_span(callee) else {
            return id;
        };
        let Some(&macro_body) = self.macros.get(self.sources.text(name_span)) else {
            return id; // no such macro, call is left as-is
        };
        self.substitution_count += 1;

        // A forwarding macro fills every call inside with our kw-args.
        if let Some((macro_callee, macro_args)) = self.arena.fun_call(macro_body) {
            let forward = self
                .arena
                .identifier_span(macro_callee)
                .is_some_and(|span| self.sources.text(span) == FORWARD_ARGS_MACRO);
            if forward {
                let inner = self
                    .arena
                    .any_list(macro_args)
                    .map(|(_, items)| items.to_vec())
                    .unwrap_or_default();
                let call_args = self
                    .arena
                    .any_list(args)
                    .map(|(_, items)| items.to_vec())
                    .unwrap_or_default();
                // A single call is used directly; several become a tuple.
                if inner.len() == 1 {
                    return self.forward_into(inner[0], &call_args);
                }
                let new_items: Vec<NodeId> = inner
                    .iter()
                    .map(|n| self.forward_into(*n, &call_args))
                    .collect();
                return self.arena.alloc(Node::List {
                    kind: girder_parser::ListKind::Tuple,
                    items: new_items,
                });
            }
        }

        // Otherwise the kw-args are variables resolved inside the body.
        let call_params = query::extract_kwargs(self.arena, self.sources, id);
        substitute_copy(self.arena, self.sources, &call_params, macro_body)
    }

    // Prepend `kwargs` into a call's argument list. A tuple body gets
    // every contained call filled; anything else passes through.
    fn forward_into(&mut self, node: NodeId, kwargs: &[NodeId]) -> NodeId {
        if let Some((kind, items)) = self.arena.any_list(node) {
            let items = items.to_vec();
            let new_items: Vec<NodeId> = items
                .iter()
                .map(|n| self.forward_into(*n, kwargs))
                .collect();
            return self.arena.alloc(Node::List {
                kind,
                items: new_items,
            });
        }
        let Some((callee, args)) = self.arena.fun_call(node) else {
            return node;
        };
        let mut new_items: Vec<NodeId> = kwargs.to_vec();
        if let Some((_, items)) = self.arena.any_list(args) {
            new_items.extend_from_slice(items);
        }
        let new_args = self.arena.alloc(Node::List {
            kind: girder_parser::ListKind::Tuple,
            items: new_items,
        });
        self.arena.alloc(Node::FunCall {
            callee,
            args: new_args,
        })
    }
}

/// Expand all macro calls in `ast`; returns the (toplevel) node and how
/// many substitutions happened.
pub fn macro_substitute(
    arena: &mut NodeArena,
    sources: &SourceMap,
    macros: &HashMap<String, NodeId>,
    ast: NodeId,
) -> (NodeId, usize) {
    let mut substitutor = MacroSubstitutor {
        arena,
        sources,
        macros,
        nest_level: 0,
        substitution_count: 0,
    };
    let result = substitutor.fold(ast);
    (result, substitutor.substitution_count)
}

#[cfg(test)]
mod tests {
    use crate::project::testutil::TestProject;
    use girder_parser::Printer;
    use pretty_assertions::assert_eq;

    // Substitute macros in `input` and compare the print against the
    // (parsed and re-printed) expectation.
    fn check(tp: &mut TestProject, input: &str, expected: &str) {
        let package = tp.add("//substitute", input);
        let expect_package = tp.add("//expect", expected);

        let project = tp.project_mut();
        let ast = project.find_parsed(&package).unwrap().ast.unwrap();
        let macros = project.macros().clone();
        let (arena, sources) = project.mutable_parts();
        let (result, _) = super::macro_substitute(arena, sources, &macros, ast);

        let project = tp.project();
        let substituted =
            Printer::new(project.arena(), project.sources()).print_statements(result);
        let expect_ast = project.find_parsed(&expect_package).unwrap().ast.unwrap();
        let expect_print =
            Printer::new(project.arena(), project.sources()).print_statements(expect_ast);
        assert_eq!(substituted, expect_print);
    }

    #[test]
    fn macro_body_is_fun_call() {
        let mut tp = TestProject::new();
        tp.set_macro_content(
            r#"
some_macro_rule = cc_library(
     name = name,
     deps = ["a", "b", some_dep] + some_list,
   )
"#,
        );
        check(
            &mut tp,
            r#"
some_macro_rule(
   name = "foobar",
   some_dep = "baz",
   some_list = [ "x", "y", "z" ],
)
"#,
            r#"
cc_library(
    name = "foobar",
    deps = ["a", "b", "baz"] + ["x", "y", "z"],
)
"#,
        );
    }

    #[test]
    fn macro_body_is_tuple() {
        let mut tp = TestProject::new();
        tp.set_macro_content(
            r#"
some_macro_rule = (
   genrule(name = name + "-gen"),
   cc_library(
     name = name,
     deps = ["a", "b", some_dep],
   ),
)
"#,
        );
        check(
            &mut tp,
            r#"
some_macro_rule(
   name = "foobar",
   some_dep = "baz",
)
"#,
            r#"
( # expanded into a tuple
  genrule(name = "foobar" + "-gen"),
  cc_library(
     name = "foobar",
     deps = ["a", "b", "baz"],
  ),
)
"#,
        );
    }

    #[test]
    fn forward_args_into_single_call() {
        let mut tp = TestProject::new();
        tp.set_macro_content(
            r#"
some_macro_rule = girder_forward_args(
    cc_library(
      visibility = "//visibility:public",
    )
  )
"#,
        );
        check(
            &mut tp,
            r#"
some_macro_rule(
   name = "foobar",
   deps = ["baz"],
)
"#,
            r#"
cc_library(
    name = "foobar",
    deps = ["baz"],
    visibility = "//visibility:public",
)
"#,
        );
    }

    #[test]
    fn forward_args_into_tuple_of_calls() {
        let mut tp = TestProject::new();
        tp.set_macro_content(
            r#"
some_macro_rule = girder_forward_args((
    cc_library(kind = "one"),
    cc_test(kind = "two"),
  ))
"#,
        );
        check(
            &mut tp,
            "some_macro_rule(name = \"x\")\n",
            r#"
(
  cc_library(name = "x", kind = "one"),
  cc_test(name = "x", kind = "two"),
)
"#,
        );
    }

    #[test]
    fn non_macro_calls_are_untouched() {
        let mut tp = TestProject::new();
        tp.set_macro_content("some_macro_rule = cc_library(name = name)\n");
        check(
            &mut tp,
            "cc_library(name = \"plain\")\n",
            "cc_library(name = \"plain\")\n",
        );
    }
}
