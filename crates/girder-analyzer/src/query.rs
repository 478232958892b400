//! Query helpers over the AST: find call-sites of rules of interest and
//! collect the keyword arguments the tools care about into one flat
//! struct, with spans preserved so every value can be located.

use girder_parser::{Node, NodeArena, NodeId, SourceMap, Span};

use crate::collections::IndexMap;

/// A string value plus where it came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpannedStr {
    pub text: String,
    pub span: Span,
}

/// The smorgasbord of keyword parameters found on rules we look at.
/// Rules typically have a name and various lists with sources and
/// dependencies; only what a caller needs is ever filled in.
#[derive(Clone, Debug, Default)]
pub struct RuleInfo {
    /// The rule call itself.
    pub call: Option<NodeId>,
    pub rule: String,
    pub name: SpannedStr,
    /// For aliases.
    pub actual: Option<SpannedStr>,
    /// For workspace rules (`bazel_dep`, `http_archive`).
    pub version: Option<SpannedStr>,
    pub repo_name: Option<SpannedStr>,

    pub srcs: Option<NodeId>,
    pub hdrs: Option<NodeId>,
    pub textual_hdrs: Option<NodeId>,
    pub public_hdrs: Option<NodeId>,
    pub deps: Option<NodeId>,
    pub data: Option<NodeId>,
    pub tools: Option<NodeId>,
    /// genrule outputs.
    pub outs: Option<NodeId>,
    /// From the rule or the package's default_visibility.
    pub visibility: Option<NodeId>,

    // Various ways the paths of files from hdrs are manipulated.
    pub includes: Option<NodeId>,
    pub include_prefix: Option<SpannedStr>,
    pub strip_include_prefix: Option<SpannedStr>,
    /// Similar, used in proto_library.
    pub strip_import_prefix: Option<SpannedStr>,

    pub alwayslink: bool,
    pub testonly: bool,
}

pub type RuleCallback<'c> = dyn FnMut(&RuleInfo) + 'c;

/// Walk `ast` and report every call of one of `rules_of_interest` (all
/// rules when empty). Rules without a `name` are skipped.
pub fn find_rules(
    arena: &NodeArena,
    sources: &SourceMap,
    ast: NodeId,
    rules_of_interest: &[&str],
    cb: &mut RuleCallback,
) {
    RuleFinder::new(arena, sources, rules_of_interest, false, cb).walk(Some(ast));
}

/// Same, but also report rules without a name (e.g. `package()`).
pub fn find_rules_allow_empty_name(
    arena: &NodeArena,
    sources: &SourceMap,
    ast: NodeId,
    rules_of_interest: &[&str],
    cb: &mut RuleCallback,
) {
    RuleFinder::new(arena, sources, rules_of_interest, true, cb).walk(Some(ast));
}

#[derive(PartialEq, Clone, Copy)]
enum Relevancy {
    NotRelevant,
    UserQuery,
    /// `package()` carries the default visibility for the file.
    PackageInfo,
}

struct RuleFinder<'a, 'c> {
    arena: &'a NodeArena,
    sources: &'a SourceMap,
    of_interest: &'a [&'a str],
    allow_empty_name: bool,
    cb: &'a mut RuleCallback<'c>,

    in_relevant_call: Relevancy,
    current: RuleInfo,
    // The package() call comes early in the file, so the default
    // visibility is gathered before the rules needing it.
    package_default_visibility: Option<NodeId>,
}

impl<'a, 'c> RuleFinder<'a, 'c> {
    fn new(
        arena: &'a NodeArena,
        sources: &'a SourceMap,
        of_interest: &'a [&'a str],
        allow_empty_name: bool,
        cb: &'a mut RuleCallback<'c>,
    ) -> Self {
        Self {
            arena,
            sources,
            of_interest,
            allow_empty_name,
            cb,
            in_relevant_call: Relevancy::NotRelevant,
            current: RuleInfo::default(),
            package_default_visibility: None,
        }
    }

    fn relevancy(&self, name: &str) -> Relevancy {
        if name == "package" {
            return Relevancy::PackageInfo;
        }
        if self.of_interest.is_empty() || self.of_interest.contains(&name) {
            Relevancy::UserQuery
        } else {
            Relevancy::NotRelevant
        }
    }

    fn walk(&mut self, node: Option<NodeId>) {
        let Some(id) = node else { return };
        match self.arena.get(id) {
            Node::FunCall { callee, args } => {
                if self.in_relevant_call != Relevancy::NotRelevant {
                    self.walk(Some(*args)); // nesting
                    return;
                }
                let fun_name = self.sources.text(self.arena.get(*callee).as_identifier().unwrap_or(Span::dummy()));
                let relevancy = self.relevancy(fun_name);
                if relevancy == Relevancy::NotRelevant {
                    return;
                }
                self.in_relevant_call = relevancy;
                self.current = RuleInfo {
                    call: Some(id),
                    rule: fun_name.to_string(),
                    ..RuleInfo::default()
                };
                self.walk(Some(*args));
                if self.in_relevant_call == Relevancy::UserQuery {
                    self.inform_caller();
                }
                self.in_relevant_call = Relevancy::NotRelevant;
            }
            Node::Assignment { lhs, rhs, .. } => match self.in_relevant_call {
                Relevancy::PackageInfo => self.extract_package_info(*lhs, *rhs),
                Relevancy::UserQuery => self.extract_query_info(*lhs, *rhs),
                Relevancy::NotRelevant => {}
            },
            Node::List { items, .. } => {
                for &item in items {
                    self.walk(Some(item));
                }
            }
            Node::BinOp { left, right, .. } => {
                self.walk(*left);
                self.walk(*right);
            }
            Node::Unary { operand, .. } => self.walk(*operand),
            Node::Comprehension { for_node, .. } => self.walk(Some(*for_node)),
            Node::Ternary {
                condition,
                positive,
                negative,
            } => {
                self.walk(Some(*condition));
                self.walk(Some(*positive));
                self.walk(*negative);
            }
            Node::Identifier { .. } | Node::IntScalar { .. } | Node::StringScalar { .. } => {}
        }
    }

    fn extract_package_info(&mut self, lhs: NodeId, rhs: Option<NodeId>) {
        let Some(span) = self.arena.identifier_span(lhs) else {
            return;
        };
        let Some(rhs) = rhs else { return };
        if self.sources.text(span) == "default_visibility"
            && self.arena.any_list(rhs).is_some()
        {
            self.package_default_visibility = Some(rhs);
        }
    }

    fn extract_query_info(&mut self, lhs: NodeId, rhs: Option<NodeId>) {
        let Some(span) = self.arena.identifier_span(lhs) else {
            return;
        };
        let Some(rhs) = rhs else { return };
        let keyword = self.sources.text(span);

        if let Some(value_span) = self.arena.string_span(rhs) {
            let value = SpannedStr {
                text: self.sources.text(value_span).to_string(),
                span: value_span,
            };
            match keyword {
                "name" => self.current.name = value,
                "actual" => self.current.actual = Some(value),
                "version" => self.current.version = Some(value),
                "repo_name" => self.current.repo_name = Some(value),
                "include_prefix" => self.current.include_prefix = Some(value),
                "strip_include_prefix" => self.current.strip_include_prefix = Some(value),
                "strip_import_prefix" => self.current.strip_import_prefix = Some(value),
                _ => {}
            }
        } else if let Some(value) = self.arena.int_value(rhs) {
            match keyword {
                "alwayslink" => self.current.alwayslink = value != 0,
                "testonly" => self.current.testonly = value != 0,
                _ => {}
            }
        } else if self.arena.any_list(rhs).is_some() {
            let slot = match keyword {
                "srcs" => &mut self.current.srcs,
                "hdrs" => &mut self.current.hdrs,
                "textual_hdrs" => &mut self.current.textual_hdrs,
                "public_hdrs" => &mut self.current.public_hdrs,
                "deps" => &mut self.current.deps,
                "data" => &mut self.current.data,
                "tools" => &mut self.current.tools,
                "outs" => &mut self.current.outs,
                "includes" => &mut self.current.includes,
                "visibility" => &mut self.current.visibility,
                _ => return,
            };
            *slot = Some(rhs);
        }
    }

    fn inform_caller(&mut self) {
        if !self.allow_empty_name && self.current.name.text.is_empty() {
            return;
        }
        // A cc_library without a hdrs list (or one we couldn't evaluate)
        // is conservatively treated as alwayslink, so DWYU won't suggest
        // removing it (think :gtest_main).
        if self.current.rule == "cc_library" {
            let empty = match self.current.hdrs {
                None => true,
                Some(list) => self
                    .arena
                    .any_list(list)
                    .is_some_and(|(_, items)| items.is_empty()),
            };
            if empty {
                self.current.alwayslink = true;
            }
        }
        if self.current.visibility.is_none() {
            self.current.visibility = self.package_default_visibility;
        }
        (self.cb)(&self.current);
    }
}

/// All keyword arguments of a function call, in call order.
pub fn extract_kwargs(
    arena: &NodeArena,
    sources: &SourceMap,
    call: NodeId,
) -> IndexMap<String, NodeId> {
    let mut result = IndexMap::default();
    let Some((_, args)) = arena.fun_call(call) else {
        return result;
    };
    let Some((_, items)) = arena.any_list(args) else {
        return result;
    };
    for item in items {
        if let Some((lhs, Some(rhs))) = arena.assignment(*item) {
            if let Some(span) = arena.identifier_span(lhs) {
                result.entry(sources.text(span).to_string()).or_insert(rhs);
            }
        }
    }
    result
}

/// The node assigned to `keyword` in a function call, if any.
pub fn find_kwarg(
    arena: &NodeArena,
    sources: &SourceMap,
    call: NodeId,
    keyword: &str,
) -> Option<NodeId> {
    let (_, args) = arena.fun_call(call)?;
    let (_, items) = arena.any_list(args)?;
    for item in items {
        if let Some((lhs, Some(rhs))) = arena.assignment(*item) {
            if let Some(span) = arena.identifier_span(lhs) {
                if sources.text(span) == keyword {
                    return Some(rhs);
                }
            }
        }
    }
    None
}

/// Append the non-empty strings of a list node. Spans point at the
/// original data, so file locations are recoverable for display.
pub fn append_string_list(
    arena: &NodeArena,
    sources: &SourceMap,
    list: Option<NodeId>,
    append_to: &mut Vec<SpannedStr>,
) {
    let Some(list) = list else { return };
    let Some((_, items)) = arena.any_list(list) else {
        return;
    };
    for item in items {
        let Some(span) = arena.string_span(*item) else {
            continue;
        };
        let text = sources.text(span);
        if !text.is_empty() {
            append_to.push(SpannedStr {
                text: text.to_string(),
                span,
            });
        }
    }
}

pub fn extract_string_list(
    arena: &NodeArena,
    sources: &SourceMap,
    list: Option<NodeId>,
) -> Vec<SpannedStr> {
    let mut result = Vec::new();
    append_string_list(arena, sources, list, &mut result);
    result
}

/// Strings of a tuple/list/map-free list node irrespective of kind; used
/// where a plain `&[&str]`-ish view is all that is needed.
pub fn string_texts(arena: &NodeArena, sources: &SourceMap, list: Option<NodeId>) -> Vec<String> {
    extract_string_list(arena, sources, list)
        .into_iter()
        .map(|s| s.text)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::testutil::TestProject;

    #[test]
    fn finds_rules_and_kwargs() {
        let mut tp = TestProject::new();
        let file = tp.add(
            "//lib",
            r#"
package(default_visibility = ["//visibility:public"])

cc_library(
    name = "foo",
    srcs = ["foo.cc"],
    hdrs = ["foo.h"],
    deps = [":bar"],
)

cc_library(
    name = "headerless",
    srcs = ["headerless.cc"],
    visibility = ["//lib:__pkg__"],
)
"#,
        );
        let project = tp.project();
        let ast = project.find_parsed(&file).unwrap().ast.unwrap();

        let mut seen = Vec::new();
        find_rules(
            project.arena(),
            project.sources(),
            ast,
            &["cc_library"],
            &mut |rule| {
                seen.push((
                    rule.name.text.clone(),
                    rule.alwayslink,
                    rule.visibility.is_some(),
                ));
                if rule.name.text == "foo" {
                    let srcs =
                        extract_string_list(project.arena(), project.sources(), rule.srcs);
                    assert_eq!(srcs.len(), 1);
                    assert_eq!(srcs[0].text, "foo.cc");
                    // The span places the string in the file.
                    assert_eq!(project.sources().text(srcs[0].span), "foo.cc");
                }
            },
        );
        // Both found; the hdrs-less library is conservatively alwayslink;
        // package default visibility fills in where none is given.
        assert_eq!(
            seen,
            vec![
                ("foo".to_string(), false, true),
                ("headerless".to_string(), true, true)
            ]
        );
    }

    #[test]
    fn kwargs_of_call() {
        let mut tp = TestProject::new();
        let file = tp.add("//m", "myrule(name = \"x\", deps = [\":y\"], count = 3)\n");
        let project = tp.project();
        let ast = project.find_parsed(&file).unwrap().ast.unwrap();
        let mut call = None;
        find_rules(
            project.arena(),
            project.sources(),
            ast,
            &[],
            &mut |rule| call = rule.call,
        );
        let kwargs = extract_kwargs(project.arena(), project.sources(), call.unwrap());
        assert_eq!(kwargs.len(), 3);
        assert!(find_kwarg(project.arena(), project.sources(), call.unwrap(), "deps").is_some());
        assert!(find_kwarg(project.arena(), project.sources(), call.unwrap(), "nope").is_none());
    }
}
