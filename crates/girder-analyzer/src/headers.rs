//! The header-provider index: which library exports which header path,
//! taking `include_prefix`, `strip_include_prefix` and `includes`
//! rewrites into account, with proto rules expanded cooperatively; plus
//! the genrule-output index and a reversed-path suffix lookup for fuzzy
//! queries.

use std::collections::BTreeSet;

use crate::collections::{OneToNSet, OneToOne};
use crate::label::Target;
use crate::pattern::TargetMatcher;
use crate::project::{ParsedBuildFile, Project};
use crate::query::{self, SpannedStr};
use crate::session::Session;
use crate::table::TableSink;

/// header path (as `#include`d) -> the libraries providing it. Multiple
/// libraries may legitimately (or not) provide the same header.
pub type ProvidedFromTargetSet = OneToNSet<String, Target>;

/// generated file -> the one rule producing it.
pub type ProvidedFromTarget = OneToOne<String, Target>;

fn record_provider(
    project: &Project,
    build_file: &ParsedBuildFile,
    header_loc: &SpannedStr,
    header_fqn: String,
    provider: Target,
    session: &mut Session,
    result: &mut ProvidedFromTargetSet,
) {
    let providers = result.entry(header_fqn.clone()).or_default();
    if !providers.is_empty() && !providers.contains(&provider) {
        // In-project collisions are actionable; external ones are noise.
        if build_file.package.project.is_empty() {
            let other = providers.iter().next().unwrap().clone();
            let _ = writeln!(
                session.error(),
                "{} Header '{}' in {} already provided by {}",
                project.loc(header_loc.span),
                header_fqn,
                provider,
                other
            );
        }
    }
    providers.insert(provider);
}

// Every header a cc_library exports, under each path it is reachable as:
//  1. With include_prefix, the library dictates the one path.
//  2. Otherwise the package-qualified path; additionally with
//     strip_include_prefix removed; and once more for every `includes`
//     entry that is a proper directory prefix.
fn append_cc_library_headers(
    project: &Project,
    build_file: &ParsedBuildFile,
    session: &mut Session,
    result: &mut ProvidedFromTargetSet,
) {
    let Some(ast) = build_file.ast else { return };
    let mut pending: Vec<(SpannedStr, String, Target)> = Vec::new();
    query::find_rules(
        project.arena(),
        project.sources(),
        ast,
        &["cc_library"],
        &mut |rule| {
            let Some(library) = Target::parse(&rule.name.text, &build_file.package) else {
                return;
            };
            let include_dirs = query::extract_string_list(project.arena(), project.sources(), rule.includes);
            let headers = query::extract_string_list(project.arena(), project.sources(), rule.hdrs);

            for header in &headers {
                if let Some(prefix) = &rule.include_prefix {
                    // The library dictates where the header is found.
                    // "." and "./" mean: at the bare header name.
                    let prefix_text = prefix.text.trim_end_matches('/').trim_end_matches('.');
                    let exported = if prefix_text.is_empty() {
                        header.text.clone()
                    } else {
                        format!("{}/{}", prefix_text.trim_end_matches('/'), header.text)
                    };
                    pending.push((header.clone(), exported, library.clone()));
                    continue;
                }

                // The name as it can be #include'd from the project root.
                let header_fqn = build_file.package.qualified_file(&header.text);

                // In some projects strip_include_prefix starts or ends
                // with '/'; trim before use.
                let strip_prefix = rule
                    .strip_include_prefix
                    .as_ref()
                    .map(|s| s.text.trim_matches('/'))
                    .unwrap_or("");
                if !strip_prefix.is_empty()
                    && header_fqn.len() > strip_prefix.len() + 1
                    && header_fqn.starts_with(strip_prefix)
                    && header_fqn.as_bytes()[strip_prefix.len()] == b'/'
                {
                    pending.push((
                        header.clone(),
                        header_fqn[strip_prefix.len() + 1..].to_string(),
                        library.clone(),
                    ));
                } else {
                    pending.push((header.clone(), header_fqn.clone(), library.clone()));
                }

                // The same header can be reachable under shorter paths,
                // one per -I directory in includes=[...].
                for dir in &include_dirs {
                    let mut prefix = dir.text.clone();
                    if !prefix.ends_with('/') {
                        prefix.push('/');
                    }
                    if header_fqn.starts_with(&prefix) {
                        pending.push((
                            header.clone(),
                            header_fqn[prefix.len()..].to_string(),
                            library.clone(),
                        ));
                    }
                }
            }
        },
    );
    for (header_loc, header_fqn, provider) in pending {
        record_provider(
            project,
            build_file,
            &header_loc,
            header_fqn,
            provider,
            session,
            result,
        );
    }
}

// proto_library() and the cc/grpc wrappers around it. We never look into
// the *.bzl rule definitions, so the generated header names are
// assembled here: the header derives from the *.proto in the
// proto_library(), but the library providing it is the cc_proto_library
// (or cc_grpc_library) depending on it.
fn append_proto_library_headers(
    project: &Project,
    build_file: &ParsedBuildFile,
    result: &mut ProvidedFromTargetSet,
) {
    let Some(ast) = build_file.ast else { return };

    // Which proto_library is consumed by which wrapper, per flavor.
    let mut proto_to_cc: OneToOne<Target, Target> = OneToOne::new();
    let mut proto_to_grpc: OneToOne<Target, Target> = OneToOne::new();
    query::find_rules(
        project.arena(),
        project.sources(),
        ast,
        &["cc_proto_library", "cc_grpc_library"],
        &mut |rule| {
            let Some(wrapper) = Target::parse(&rule.name.text, &build_file.package) else {
                return;
            };
            let mut referenced =
                query::extract_string_list(project.arena(), project.sources(), rule.deps);
            // cc_grpc_library() sometimes names the proto lib in srcs.
            referenced.extend(query::extract_string_list(
                project.arena(),
                project.sources(),
                rule.srcs,
            ));
            for dep in referenced {
                let Some(proto_lib) = Target::parse(&dep.text, &build_file.package) else {
                    continue;
                };
                if rule.rule == "cc_proto_library" {
                    proto_to_cc.insert(proto_lib, wrapper.clone());
                } else {
                    proto_to_grpc.insert(proto_lib, wrapper.clone());
                }
            }
        },
    );

    query::find_rules(
        project.arena(),
        project.sources(),
        ast,
        &["proto_library"],
        &mut |rule| {
            let Some(proto_lib) = Target::parse(&rule.name.text, &build_file.package) else {
                return;
            };
            let cc_wrapper = proto_to_cc.get(&proto_lib);
            let grpc_wrapper = proto_to_grpc.get(&proto_lib);
            if cc_wrapper.is_none() && grpc_wrapper.is_none() {
                return; // probably used for some other language
            }
            let srcs = query::extract_string_list(project.arena(), project.sources(), rule.srcs);
            for proto in srcs {
                let Some(stem) = proto
                    .text
                    .strip_prefix(':')
                    .unwrap_or(&proto.text)
                    .strip_suffix(".proto")
                else {
                    continue; // possibly a file list; not handled
                };
                if let Some(wrapper) = cc_wrapper {
                    for suffix in [".pb.h", ".proto.h"] {
                        let header = build_file.package.qualified_file(&format!("{stem}{suffix}"));
                        result.entry(header).or_default().insert(wrapper.clone());
                    }
                }
                if let Some(wrapper) = grpc_wrapper {
                    let header = build_file.package.qualified_file(&format!("{stem}.grpc.pb.h"));
                    result.entry(header).or_default().insert(wrapper.clone());
                }
            }
        },
    );
}

/// Build the header -> providing-libraries map over the whole elaborated
/// project.
pub fn extract_header_to_lib_mapping(
    session: &mut Session,
    project: &Project,
) -> ProvidedFromTargetSet {
    let mut result = ProvidedFromTargetSet::new();
    for (_, build_file) in project.parsed_files() {
        append_cc_library_headers(project, build_file, session, &mut result);
        append_proto_library_headers(project, build_file, &mut result);
    }
    result
}

/// Plain file -> providing-target map for srcs/hdrs/data queries.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ExtractComponent {
    Srcs,
    Hdrs,
    Data,
}

pub fn extract_component_to_target_mapping(
    project: &Project,
    component: ExtractComponent,
    only_physical_files: bool,
) -> ProvidedFromTargetSet {
    let mut result = ProvidedFromTargetSet::new();
    for (_, build_file) in project.parsed_files() {
        let Some(ast) = build_file.ast else { continue };
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &[],
            &mut |rule| {
                let Some(target) = Target::parse(&rule.name.text, &build_file.package) else {
                    return;
                };
                let list = match component {
                    ExtractComponent::Srcs => rule.srcs,
                    ExtractComponent::Hdrs => rule.hdrs,
                    ExtractComponent::Data => rule.data,
                };
                for entry in query::extract_string_list(project.arena(), project.sources(), list) {
                    let qualified = build_file.package.qualified_file(&entry.text);
                    if only_physical_files {
                        let path = project.root_dir().join(&qualified);
                        if !path.is_file() {
                            continue;
                        }
                    }
                    result.entry(qualified).or_default().insert(target.clone());
                }
            },
        );
    }
    result
}

/// Every file generated by a genrule, mapped to the rule. Collisions on
/// in-project rules are reported; first writer wins.
pub fn extract_generated_from_genrule(
    session: &mut Session,
    project: &Project,
) -> ProvidedFromTarget {
    let mut result = ProvidedFromTarget::new();
    for (_, build_file) in project.parsed_files() {
        let Some(ast) = build_file.ast else { continue };
        let mut pending: Vec<(SpannedStr, String, Target)> = Vec::new();
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &["genrule"],
            &mut |rule| {
                let Some(target) = Target::parse(&rule.name.text, &build_file.package) else {
                    return;
                };
                for generated in
                    query::extract_string_list(project.arena(), project.sources(), rule.outs)
                {
                    let gen_fqn = build_file.package.qualified_file(&generated.text);
                    pending.push((generated, gen_fqn, target.clone()));
                }
            },
        );
        for (generated, gen_fqn, target) in pending {
            if let Some(existing) = result.get(&gen_fqn) {
                if *existing != target && build_file.package.project.is_empty() {
                    let _ = writeln!(
                        session.error(),
                        "{} '{}' in {} also created by {}",
                        project.loc(generated.span),
                        gen_fqn,
                        target,
                        existing
                    );
                }
                continue;
            }
            result.insert(gen_fqn, target);
        }
    }
    result
}

/// Index keyed by reversed header path (with a `/` sentinel) for fuzzy
/// lookups by path suffix.
pub type SuffixIndex = OneToNSet<String, Target>;

fn reversed_key(path: &str) -> String {
    let mut key: String = path.chars().rev().collect();
    key.push('/');
    key
}

pub fn build_suffix_index(header_map: &ProvidedFromTargetSet) -> SuffixIndex {
    let mut index = SuffixIndex::new();
    for (header, targets) in header_map {
        index.insert(reversed_key(header), targets.clone());
    }
    index
}

pub struct FindResult<'a> {
    /// 0 for a full match; otherwise the number of whole path elements
    /// that matched from the end.
    pub fuzzy_score: u32,
    pub target_set: &'a BTreeSet<Target>,
}

/// Find the provider whose indexed path shares the longest suffix with
/// `path`. A fuzzy match must cover at least `min_elements` whole path
/// elements.
pub fn find_by_suffix<'a>(
    index: &'a SuffixIndex,
    path: &str,
    min_elements: u32,
) -> Option<FindResult<'a>> {
    let query = reversed_key(path);
    if let Some(targets) = index.get(&query) {
        return Some(FindResult {
            fuzzy_score: 0,
            target_set: targets,
        });
    }

    let common_prefix_len =
        |key: &str| -> usize {
            key.bytes()
                .zip(query.bytes())
                .take_while(|(a, b)| a == b)
                .count()
        };

    // Only the nearest neighbors of the insertion point can share the
    // longest prefix.
    let after = index.range(query.clone()..).next();
    let before = index.range(..query.clone()).next_back();
    let best = [before, after]
        .into_iter()
        .flatten()
        .map(|(key, targets)| (common_prefix_len(key), targets))
        .max_by_key(|(len, _)| *len)?;

    let matched_elements = query.as_bytes()[..best.0]
        .iter()
        .filter(|b| **b == b'/')
        .count() as u32;
    if matched_elements < min_elements {
        return None;
    }
    Some(FindResult {
        fuzzy_score: matched_elements,
        target_set: best.1,
    })
}

/// Emit a provided-files table filtered by pattern.
pub fn print_provided_sources(
    pattern: &dyn TargetMatcher,
    provided: &ProvidedFromTargetSet,
    sink: &mut dyn TableSink,
) {
    for (provided_file, targets) in provided {
        let matching: Vec<String> = targets
            .iter()
            .filter(|t| pattern.matches_target(t))
            .map(|t| t.to_string())
            .collect();
        if matching.is_empty() {
            continue;
        }
        sink.add_row_with_repeated_last_column(&[provided_file.clone()], &matching);
    }
    sink.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Package;
    use crate::project::testutil::TestProject;
    use crate::session::Flags;

    fn target(s: &str) -> Target {
        Target::parse(s, &Package::default()).unwrap()
    }

    fn targets(s: &str) -> BTreeSet<Target> {
        BTreeSet::from([target(s)])
    }

    fn header_map(tp: &TestProject) -> ProvidedFromTargetSet {
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());
        extract_header_to_lib_mapping(&mut session, tp.project())
    }

    #[test]
    fn cc_rule_extraction() {
        let mut tp = TestProject::new();
        tp.add(
            "//some/path",
            r#"
cc_library(
  name = "foo",
  srcs = ["foo.cc"],
  hdrs = ["foo.h"]
)
"#,
        );
        tp.add(
            "//other/path",
            r#"
cc_library(
  name = "bar",
  hdrs = ["bar.h"]
)
"#,
        );
        tp.add(
            "//prefix/dir",
            r#"
cc_library(
  name = "foo",
  hdrs = ["foo.h"],
  include_prefix = "yolo"            # lib says where the header lives
)
cc_library(
  name = "bar",
  hdrs = ["bar.h"],
  strip_include_prefix = "prefix",   # remove prefix from current package
)
cc_library(
  name = "baz",
  hdrs = ["subdir/baz.h"],
  includes = [                       # allow -I without that subdir
     "prefix/dir/subdir",
     "prefix/dir/",                  # trailing slash should not trip
  ],
)
"#,
        );
        let map = header_map(&tp);
        assert_eq!(map.get("some/path/foo.h"), Some(&targets("//some/path:foo")));
        assert_eq!(map.get("other/path/bar.h"), Some(&targets("//other/path:bar")));
        assert_eq!(map.get("yolo/foo.h"), Some(&targets("//prefix/dir:foo")));
        // include_prefix dictates the only path.
        assert!(map.get("prefix/dir/foo.h").is_none());
        assert_eq!(map.get("dir/bar.h"), Some(&targets("//prefix/dir:bar")));

        // The includes=[...] header is reachable under several paths.
        assert_eq!(map.get("baz.h"), Some(&targets("//prefix/dir:baz")));
        assert_eq!(map.get("subdir/baz.h"), Some(&targets("//prefix/dir:baz")));
        assert_eq!(
            map.get("prefix/dir/subdir/baz.h"),
            Some(&targets("//prefix/dir:baz"))
        );
    }

    #[test]
    fn dot_include_prefix_is_canonicalized() {
        let mut tp = TestProject::new();
        tp.add(
            "//",
            r#"
cc_library(
  name = "foo",
  srcs = ["foo.cc"],
  include_prefix = ".",
  hdrs = ["foo.h"]
)
cc_library(
  name = "bar",
  srcs = ["bar.cc"],
  include_prefix = "./",
  hdrs = ["bar.h"]
)
"#,
        );
        let map = header_map(&tp);
        assert_eq!(map.get("foo.h"), Some(&targets("//:foo")));
        assert_eq!(map.get("bar.h"), Some(&targets("//:bar")));
    }

    #[test]
    fn multiple_libs_provide_same_header() {
        let mut tp = TestProject::new();
        tp.add(
            "//some/path",
            r#"
cc_library(
  name = "foo",
  srcs = ["foo.cc"],
  hdrs = ["foo.h"]
)
cc_library(
  name = "bar",
  srcs = ["bar.cc"],
  hdrs = ["foo.h"]
)
"#,
        );
        let map = header_map(&tp);
        let expected = BTreeSet::from([target("//some/path:foo"), target("//some/path:bar")]);
        assert_eq!(map.get("some/path/foo.h"), Some(&expected));
    }

    #[test]
    fn proto_library_chaining() {
        let mut tp = TestProject::new();
        tp.add(
            "//ptest",
            r#"
proto_library(
   name = "all_protos",
   srcs = [                   # derived from these are the header names ...
      "data.proto",
      ":general.proto",       # a prefix ':' also works
   ]
)
cc_proto_library(
  name = "foo",               # ... and this is the cc_library they show up as
  deps = [":all_protos"],
)

cc_grpc_library(              # GRPC flavor of a proto library
  name = "grpc_foo",
  srcs = [":all_protos"],
)
"#,
        );
        let map = header_map(&tp);
        assert_eq!(map.get("ptest/data.pb.h"), Some(&targets("//ptest:foo")));
        assert_eq!(map.get("ptest/general.pb.h"), Some(&targets("//ptest:foo")));
        // Another possible suffix.
        assert_eq!(map.get("ptest/general.proto.h"), Some(&targets("//ptest:foo")));
        // grpc header references.
        assert_eq!(
            map.get("ptest/data.grpc.pb.h"),
            Some(&targets("//ptest:grpc_foo"))
        );
        assert_eq!(
            map.get("ptest/general.grpc.pb.h"),
            Some(&targets("//ptest:grpc_foo"))
        );
    }

    #[test]
    fn genrule_extraction() {
        let mut tp = TestProject::new();
        tp.add(
            "//gen/ai",
            r#"
genrule(
  name = "llm",
  outs = [
    "useful.txt",
    "hallucination.txt",
  ],
)
"#,
        );
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());
        let map = extract_generated_from_genrule(&mut session, tp.project());
        assert_eq!(map.get("gen/ai/useful.txt"), Some(&target("//gen/ai:llm")));
        assert_eq!(
            map.get("gen/ai/hallucination.txt"),
            Some(&target("//gen/ai:llm"))
        );
    }

    #[test]
    fn find_by_suffix_scoring() {
        let mut index = SuffixIndex::new();
        index.insert(reversed_key("foo/bar/baz/qux.h"), targets("//foo"));
        index.insert(reversed_key("baz/qux.h"), targets("//bar"));

        // Exact matches return only that element, score 0.
        let result = find_by_suffix(&index, "foo/bar/baz/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 0);
        assert_eq!(result.target_set, &targets("//foo"));

        let result = find_by_suffix(&index, "baz/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 0);
        assert_eq!(result.target_set, &targets("//bar"));

        // Fuzzy matches with a required number of whole path elements.
        assert!(find_by_suffix(&index, "qux.h", 2).is_none());
        assert!(find_by_suffix(&index, "qux.h", 1).is_some());
        assert!(find_by_suffix(&index, "ux.h", 1).is_none());

        // Matches shorter than a whole path element don't count.
        assert!(find_by_suffix(&index, "bar/xqux.h", 1).is_none());

        let result = find_by_suffix(&index, "az/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 1);
        assert_eq!(result.target_set, &targets("//bar"));

        let result = find_by_suffix(&index, "r/baz/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 2);
        assert_eq!(result.target_set, &targets("//foo"));

        let result = find_by_suffix(&index, "bar/baz/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 3);
        assert_eq!(result.target_set, &targets("//foo"));

        // Longer than anything indexed, same suffix: candidate is the
        // neighbor before the insertion point.
        let result = find_by_suffix(&index, "hello/foo/bar/baz/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 4);
        assert_eq!(result.target_set, &targets("//foo"));

        // An adjacent later entry doesn't shadow it.
        index.insert(reversed_key("foo/bar/baz/rux.h"), targets("//rux"));
        let result = find_by_suffix(&index, "hello/foo/bar/baz/qux.h", 1).unwrap();
        assert_eq!(result.fuzzy_score, 4);
        assert_eq!(result.target_set, &targets("//foo"));
    }
}
