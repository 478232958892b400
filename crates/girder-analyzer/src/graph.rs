//! Dependency-graph builder: starting from a target pattern, follow
//! `deps` (plus files provided by genrules, data/tools entries, and
//! alias `actual` edges), pulling further packages into the project on
//! demand until fixpoint or the depth budget runs out.

use std::collections::BTreeSet;

use crate::collections::{OneToN, OneToOne};
use crate::elaborate::{self, ElaborationOptions};
use crate::label::{Package, Target};
use crate::pattern::TargetMatcher;
use crate::project::Project;
use crate::query::{self, SpannedStr};
use crate::session::Session;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    pub depends_on: OneToN<Target, Target>,
    pub has_dependents: OneToN<Target, Target>,
}

// Parse-and-elaborate every package of `want` not yet in the project.
// Packages whose BUILD file can't be found end up in `error_packages`.
fn find_and_parse_missing_packages(
    session: &mut Session,
    want: &BTreeSet<Package>,
    error_packages: &mut BTreeSet<Package>,
    project: &mut Project,
) {
    for package in want {
        if project.find_parsed(package).is_some() {
            continue; // have it already
        }
        let Some(build_file) = project.build_file_for_package(package) else {
            error_packages.insert(package.clone());
            continue;
        };
        if project
            .add_build_file_for_package(session, &build_file, package)
            .is_none()
        {
            error_packages.insert(package.clone());
            continue;
        }
        // New packages always get elaborated; they might expand into
        // more dependencies.
        let options = ElaborationOptions {
            macro_expansion: true,
        };
        elaborate::elaborate_package(session, project, package, &options);
    }
}

// Entries of srcs/hdrs/data/tools can be plain files in the source tree
// (no edge), files generated by a genrule (edge to the genrule), or, if
// `fallback_is_target`, target labels.
fn append_possible_file_dependencies(
    project: &Project,
    entries: &[SpannedStr],
    context_package: &Package,
    generated_by_target: &OneToOne<String, String>,
    fallback_is_target: bool,
    append_to: &mut Vec<String>,
) {
    for path_or_label in entries {
        let as_filename = context_package.fully_qualified_file(project.workspace(), &path_or_label.text);
        if project.root_dir().join(&as_filename).is_file() {
            continue; // regular file existing in the source tree
        }

        // Resolving as a target is also a way to refer to a file.
        let Some(as_target) = Target::parse(&path_or_label.text, context_package) else {
            continue; // will fail downstream anyway
        };
        let path_in_src_tree = if as_target.package.path.is_empty() {
            as_target.name.clone()
        } else {
            format!("{}/{}", as_target.package.path, as_target.name)
        };
        if project.root_dir().join(&path_in_src_tree).is_file() {
            continue; // fully qualified name of an actual file
        }

        if let Some(genrule) = generated_by_target.get(&path_in_src_tree) {
            append_to.push(genrule.clone());
            continue;
        }

        if fallback_is_target {
            append_to.push(path_or_label.text.clone());
        }
    }
}

// Owned snapshot of the fields edge extraction needs, so the project can
// be mutated between rounds.
struct TargetEdges {
    target: Target,
    follow: Vec<String>,
}

fn collect_package_edges(
    project: &Project,
    package: &Package,
    generated_by_target: &OneToOne<String, String>,
    rules_of_interest: &[&str],
) -> Vec<TargetEdges> {
    let Some(parsed) = project.find_parsed(package) else {
        return Vec::new();
    };
    let Some(ast) = parsed.ast else {
        return Vec::new();
    };
    let mut result = Vec::new();
    query::find_rules(
        project.arena(),
        project.sources(),
        ast,
        rules_of_interest,
        &mut |rule| {
            let Some(target) = package.qualified_target(&rule.name.text) else {
                return;
            };
            // deps=[] are the obvious edges ...
            let mut follow: Vec<String> =
                query::extract_string_list(project.arena(), project.sources(), rule.deps)
                    .into_iter()
                    .map(|s| s.text)
                    .collect();

            // ... but files from hdrs/srcs may be genrule outputs ...
            for list in [rule.hdrs, rule.srcs] {
                let entries = query::extract_string_list(project.arena(), project.sources(), list);
                append_possible_file_dependencies(
                    project,
                    &entries,
                    package,
                    generated_by_target,
                    false,
                    &mut follow,
                );
            }
            // ... and data/tools entries can be files or targets.
            for list in [rule.data, rule.tools] {
                let entries = query::extract_string_list(project.arena(), project.sources(), list);
                append_possible_file_dependencies(
                    project,
                    &entries,
                    package,
                    generated_by_target,
                    true,
                    &mut follow,
                );
            }
            // Aliases forward through their actual target.
            if let Some(actual) = &rule.actual {
                follow.push(actual.text.clone());
            }
            result.push(TargetEdges { target, follow });
        },
    );
    result
}

/// Build forward and reverse adjacency starting from all loaded targets
/// matching `pattern`. `nesting_depth` bounds the rounds of expansion:
/// 0 (or 1) processes only the seed targets, `i32::MAX` runs to
/// fixpoint. Unresolved targets are reported at the end, not fatal.
pub fn build_dependency_graph(
    session: &mut Session,
    pattern: &dyn TargetMatcher,
    nesting_depth: i32,
    project: &mut Project,
) -> DependencyGraph {
    // Follow all rules for now.
    let rules_of_interest: [&str; 0] = [];

    let mut error_packages: BTreeSet<Package> = BTreeSet::new();
    // lhs: dependency to resolve; rhs: one example requester.
    let mut error_target_example: OneToOne<Target, Target> = OneToOne::new();
    let mut todo: OneToOne<Target, Target> = OneToOne::new();

    let timer = std::time::Instant::now();

    // Genrule index flattened to strings. Would need re-extraction as
    // packages widen, but genrules typically sit next to their users.
    let generated_by_target: OneToOne<String, String> =
        crate::headers::extract_generated_from_genrule(session, project)
            .into_iter()
            .map(|(file, target)| (file, target.to_string()))
            .collect();

    // Seed from everything currently loaded that matches.
    let root_request = Target::default();
    for (package, parsed) in project.parsed_files() {
        if !pattern.matches_package(package) {
            continue;
        }
        let Some(ast) = parsed.ast else { continue };
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &rules_of_interest,
            &mut |rule| {
                let Some(target) = package.qualified_target(&rule.name.text) else {
                    return;
                };
                if pattern.matches_target(&target) {
                    todo.insert(target, root_request.clone());
                }
            },
        );
    }

    let max_rounds: i64 = if nesting_depth == i32::MAX {
        i64::MAX
    } else {
        (nesting_depth as i64).max(1)
    };

    let mut graph = DependencyGraph::default();
    let mut rounds = 0i64;
    while !todo.is_empty() && rounds < max_rounds {
        rounds += 1;

        // All these targets boil down to a set of packages that must be
        // present (and parsed) in the project.
        let scan_packages: BTreeSet<Package> =
            todo.keys().map(|t| t.package.clone()).collect();
        find_and_parse_missing_packages(session, &scan_packages, &mut error_packages, project);

        let mut next_todo: OneToOne<Target, Target> = OneToOne::new();
        for package in &scan_packages {
            let edges =
                collect_package_edges(project, package, &generated_by_target, &rules_of_interest);
            for TargetEdges { target, follow } in edges {
                if todo.remove(&target).is_none() {
                    continue; // present in package, but not asked for
                }
                graph.depends_on.entry(target.clone()).or_default();
                for dep in follow {
                    let Some(dependency) = Target::parse(&dep, package) else {
                        continue;
                    };
                    // Not seen yet and not scheduled: follow next round.
                    if !graph.depends_on.contains_key(&dependency)
                        && !todo.contains_key(&dependency)
                    {
                        next_todo.entry(dependency.clone()).or_insert(target.clone());
                    }
                    graph
                        .depends_on
                        .entry(target.clone())
                        .or_default()
                        .push(dependency.clone());
                    graph
                        .has_dependents
                        .entry(dependency)
                        .or_default()
                        .push(target.clone());
                }
            }
        }

        // Leftovers could not be resolved in their packages.
        error_target_example.append(&mut todo);
        todo = next_todo;
    }

    let stats = session.stats_for("Dependency follow iterations", "rounds");
    stats.count += rounds as usize;
    stats.duration += timer.elapsed();

    if session.verbose() {
        if !error_packages.is_empty() {
            let _ = writeln!(session.info(), "Dependency graph: did not find these packages");
            for package in &error_packages {
                let _ = writeln!(session.info(), "\t{package}");
            }
        }
        if !error_target_example.is_empty() {
            let _ = writeln!(
                session.info(),
                "Dependency graph: did not find these targets\n[--- Dependency ---]\t[--- Example Needed By ---]"
            );
            for (dep, example) in &error_target_example {
                let _ = writeln!(session.info(), "{dep}\t{example}");
            }
        }
    }

    graph
}
