//! Command dispatch: keyword resolution by unique prefix, and the
//! per-command wiring of project loading, elaboration, graph building
//! and output.

use std::path::Path;

use girder_analyzer::dwyu::{self, FileSystemOpener};
use girder_analyzer::elaborate::ElaborationOptions;
use girder_analyzer::headers::{self, ExtractComponent, ProvidedFromTargetSet};
use girder_analyzer::{
    aliases, build_dependency_graph, canonicalize, compiledb, elaborate, load_workspace,
    print_project, query, workspace, DependencyGraph, Package, Pattern, PatternBundle, Project,
    Session, Target, TargetMatcher,
};
use regex::Regex;

use crate::output::{make_table_sink, BuildozerWriter};

/// Exit status handed back to `main()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliStatus {
    ExitSuccess = 0,
    ExitFailure = 1,
    /// The invocation needs clarification (bad command, ambiguous
    /// prefix); usage is printed.
    ExitCommandlineClarification = 2,
    /// An edit script with findings was emitted.
    ExitCleanupFindings = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Parse,
    Print,
    ListPackages,
    ListTargets,
    ListLeafs,
    ListWorkspace,
    TargetHdrs,
    TargetSrcs,
    TargetData,
    LibraryHeaders,
    AliasedBy,
    GenruleOutputs,
    Dwyu,
    CompilationDb,
    CompileFlags,
    CanonicalizeDeps,
    HasDependents,
    DependsOn,
}

// Sorted by name; unique-prefix matching walks this table.
const COMMANDS: [(&str, Command); 18] = [
    ("aliased-by", Command::AliasedBy),
    ("canonicalize", Command::CanonicalizeDeps),
    ("compilation-db", Command::CompilationDb),
    ("compile-flags", Command::CompileFlags),
    ("depends-on", Command::DependsOn),
    ("dwyu", Command::Dwyu),
    ("genrule-outputs", Command::GenruleOutputs),
    ("has-dependents", Command::HasDependents),
    ("lib-headers", Command::LibraryHeaders),
    ("list-leafs", Command::ListLeafs),
    ("list-packages", Command::ListPackages),
    ("list-targets", Command::ListTargets),
    ("parse", Command::Parse),
    ("print", Command::Print),
    ("target-data", Command::TargetData),
    ("target-hdrs", Command::TargetHdrs),
    ("target-srcs", Command::TargetSrcs),
    ("workspace", Command::ListWorkspace),
];

fn resolve_command(session: &mut Session, word: &str) -> Option<Command> {
    let matches: Vec<&(&str, Command)> = COMMANDS
        .iter()
        .filter(|(name, _)| name.starts_with(word))
        .collect();
    match matches.as_slice() {
        [] => {
            let _ = writeln!(session.error(), "Unknown command prefix '{word}'");
            None
        }
        [(_, command)] => Some(*command),
        multiple => {
            // An exact name wins even if it prefixes another command.
            if let Some(entry) = multiple.iter().find(|(name, _)| *name == word) {
                return Some(entry.1);
            }
            let names: Vec<&str> = multiple.iter().map(|(name, _)| *name).collect();
            let _ = writeln!(
                session.error(),
                "Command '{word}' too short and ambiguous: [{}]",
                names.join(", ")
            );
            None
        }
    }
}

/// Entry point below flag parsing: `args` is the command keyword
/// followed by bazel patterns.
pub fn run_cli_command(session: &mut Session, args: &[String]) -> CliStatus {
    let Some(command_word) = args.first() else {
        let _ = writeln!(session.error(), "Command expected");
        return CliStatus::ExitCommandlineClarification;
    };
    let Some(command) = resolve_command(session, command_word) else {
        return CliStatus::ExitCommandlineClarification;
    };

    let mut patterns = PatternBundle::default();
    for arg in &args[1..] {
        match Pattern::parse(arg) {
            Some(pattern) => patterns.add_pattern(pattern),
            None => {
                let _ = writeln!(session.error(), "Invalid bazel pattern {arg}");
                return CliStatus::ExitFailure;
            }
        }
    }
    patterns.finish();

    if let Some(status) = run_debug_command(session, command) {
        return status;
    }

    // Don't look through everything for these.
    if matches!(
        command,
        Command::CanonicalizeDeps | Command::Dwyu | Command::Print
    ) && !patterns.has_filter()
    {
        let _ = writeln!(
            session.error(),
            "Please provide a bazel pattern for this command.\nExamples: //... or //foo/bar:baz"
        );
        return CliStatus::ExitFailure;
    }

    run_command(session, command, &patterns)
}

// `-F <filename>`: parse (and optionally print) one file outside any
// project context; a debugging aid.
fn run_debug_command(session: &mut Session, command: Command) -> Option<CliStatus> {
    let filename = session.flags().direct_filename.clone()?;
    if !matches!(command, Command::Parse | Command::Print) {
        let _ = writeln!(
            session.error(),
            "-F <filename> only works for 'parse' or 'print'"
        );
        return Some(CliStatus::ExitFailure);
    }

    let mut project = Project::new(Default::default());
    let path = Path::new(&filename);
    let package = Package::new(
        "",
        path.parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    if project
        .add_build_file_for_package(session, path, &package)
        .is_none()
    {
        return Some(CliStatus::ExitFailure);
    }
    if session.flags().elaborate {
        let options = ElaborationOptions {
            macro_expansion: session.flags().macro_expand,
        };
        elaborate::elaborate_package(session, &mut project, &package, &options);
    }
    if command == Command::Print {
        print_project(session, &PatternBundle::match_all(), &project);
    }
    Some(CliStatus::ExitSuccess)
}

fn needs_project_populated(command: Command, patterns: &PatternBundle) -> bool {
    // No need to even parse the project if we just print the workspace.
    !(command == Command::ListWorkspace && !patterns.has_filter())
}

fn print_one_to_n(
    session: &mut Session,
    pattern: &dyn TargetMatcher,
    table: &girder_analyzer::collections::OneToN<Target, Target>,
    header1: &str,
    header2: &str,
) {
    let format = session.flags().output_format;
    let mut rows: Vec<(String, Vec<String>)> = Vec::new();
    for (key, values) in table {
        if !pattern.matches_target(key) {
            continue;
        }
        rows.push((
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
    }
    let mut sink = make_table_sink(session.out(), format, &[header1, header2]);
    for (key, values) in rows {
        sink.add_row_with_repeated_last_column(&[key], &values);
    }
    sink.finish();
}

fn print_provided(
    session: &mut Session,
    pattern: &dyn TargetMatcher,
    header: &str,
    provided: &ProvidedFromTargetSet,
) {
    let format = session.flags().output_format;
    let mut sink = make_table_sink(session.out(), format, &[header, "providing-rule"]);
    headers::print_provided_sources(pattern, provided, sink.as_mut());
}

fn print_workspace(session: &mut Session, project: &Project, patterns: &PatternBundle) {
    // With a filter: only the external projects referenced from deps of
    // matching targets. Without: everything known.
    let mut interesting: Option<std::collections::BTreeSet<String>> = None;
    if patterns.has_filter() {
        let mut referenced = std::collections::BTreeSet::new();
        for (package, parsed) in project.parsed_files() {
            let Some(ast) = parsed.ast else { continue };
            query::find_rules(project.arena(), project.sources(), ast, &[], &mut |rule| {
                let Some(target) = package.qualified_target(&rule.name.text) else {
                    return;
                };
                if !patterns.matches_target(&target) {
                    return;
                }
                for dep in query::extract_string_list(project.arena(), project.sources(), rule.deps)
                {
                    if let Some(dep_target) = Target::parse(&dep.text, package) {
                        if !dep_target.package.project.is_empty() {
                            referenced.insert(dep_target.package.project[1..].to_string());
                        }
                    }
                }
            });
        }
        interesting = Some(referenced);
    }

    let format = session.flags().output_format;
    let mut rows = Vec::new();
    for (versioned, path) in &project.workspace().project_location {
        if let Some(interesting) = &interesting {
            if !interesting.contains(&versioned.project) {
                continue;
            }
        }
        rows.push([
            format!("@{}", versioned.project),
            versioned.version.clone(),
            path.to_string_lossy().into_owned(),
        ]);
    }
    let mut sink = make_table_sink(session.out(), format, &["project", "version", "directory"]);
    for row in rows {
        sink.add_row(&row);
    }
    sink.finish();
}

fn run_command(session: &mut Session, command: Command, patterns: &PatternBundle) -> CliStatus {
    let root = Path::new(".");
    let Some(mut loaded_workspace) = load_workspace(session, root) else {
        let _ = writeln!(
            session.error(),
            "Didn't find any workspace file. Is this a bazel project root ?"
        );
        return CliStatus::ExitFailure;
    };
    // Projects hiding deps in *.bzl files only show up as directories.
    workspace::augment_from_external_dir(root, &mut loaded_workspace);

    // has-dependents needs to see everything to know all the things that
    // depend on the pattern.
    let match_all = PatternBundle::match_all();
    let dep_pattern: &PatternBundle = if command == Command::HasDependents {
        &match_all
    } else {
        patterns
    };

    let mut project = Project::new(loaded_workspace);
    if needs_project_populated(command, patterns) {
        let timer = std::time::Instant::now();
        let packages_added = project.fill_from_pattern(session, dep_pattern);
        if packages_added == 0 {
            let _ = writeln!(session.error(), "Pattern did not match any dir with BUILD file.");
        }
        let stats = session.stats_for("Initial load from pattern", "packages");
        stats.count += packages_added;
        stats.duration += timer.elapsed();
    }

    if session.flags().recurse_dependency_depth <= 0
        && matches!(command, Command::Dwyu | Command::HasDependents)
    {
        const REASONABLE_DEFAULT_DEPENDENCY_DEPTH: i32 = 4;
        session.flags_mut().recurse_dependency_depth = REASONABLE_DEFAULT_DEPENDENCY_DEPTH;
    }

    // For most operations and least surprises, elaborate. Only parse and
    // print give finer control.
    if !matches!(command, Command::Parse | Command::Print) {
        session.flags_mut().elaborate = true;
        session.flags_mut().macro_expand = true;
    }
    if session.flags().elaborate {
        let options = ElaborationOptions {
            macro_expansion: session.flags().macro_expand,
        };
        elaborate::elaborate(session, &mut project, &options);
    }

    let mut graph = DependencyGraph::default();
    if matches!(
        command,
        Command::Dwyu
            | Command::Parse
            | Command::TargetHdrs
            | Command::TargetData
            | Command::LibraryHeaders
            | Command::TargetSrcs
            | Command::GenruleOutputs
            | Command::ListTargets
            | Command::ListLeafs
            | Command::ListPackages
            | Command::DependsOn
            | Command::HasDependents
    ) && session.flags().recurse_dependency_depth >= 0
    {
        let depth = session.flags().recurse_dependency_depth;
        let before_build_files = project.parsed_files().count();
        graph = build_dependency_graph(session, dep_pattern, depth, &mut project);
        if session.verbose() {
            let after_build_files = project.parsed_files().count();
            let _ = writeln!(
                session.info(),
                "Dependency graph expanded build file# from initial {} to {}; {} targets and {} that depend on these.",
                before_build_files,
                after_build_files,
                graph.depends_on.len(),
                graph.has_dependents.len()
            );
        }
    }

    // With recursion chosen, everything the graph pulled in is printed;
    // otherwise just the pattern.
    let print_pattern: &PatternBundle = if session.flags().recurse_dependency_depth > 0 {
        &match_all
    } else {
        patterns
    };

    let grep = session
        .flags()
        .grep_regex
        .as_deref()
        .and_then(|re| Regex::new(re).ok());

    match command {
        Command::Print | Command::Parse => {
            let wants_output = session.flags().print_ast
                || command == Command::Print
                || session.flags().print_only_errors;
            if wants_output {
                let (count, total) = print_project(session, patterns, &project);
                let kind = if session.flags().print_ast {
                    "toplevel nodes"
                } else {
                    "rules"
                };
                let _ = writeln!(
                    session.info(),
                    "{} {} matched (from {} total)",
                    if count == 0 {
                        "No".to_string()
                    } else {
                        count.to_string()
                    },
                    kind,
                    total
                );
            }
            CliStatus::ExitSuccess
        }

        Command::LibraryHeaders => {
            let map = headers::extract_header_to_lib_mapping(session, &project);
            print_provided(session, print_pattern, "header", &map);
            CliStatus::ExitSuccess
        }

        Command::TargetSrcs | Command::TargetHdrs | Command::TargetData => {
            let (component, header) = match command {
                Command::TargetSrcs => (ExtractComponent::Srcs, "srcs"),
                Command::TargetHdrs => (ExtractComponent::Hdrs, "hdrs"),
                _ => (ExtractComponent::Data, "data"),
            };
            let map = headers::extract_component_to_target_mapping(
                &project,
                component,
                session.flags().only_physical_files,
            );
            print_provided(session, print_pattern, header, &map);
            CliStatus::ExitSuccess
        }

        Command::GenruleOutputs => {
            let map = headers::extract_generated_from_genrule(session, &project);
            let as_set: ProvidedFromTargetSet = map
                .into_iter()
                .map(|(file, target)| (file, std::collections::BTreeSet::from([target])))
                .collect();
            print_provided(session, print_pattern, "generated-file", &as_set);
            CliStatus::ExitSuccess
        }

        Command::Dwyu => {
            // Edits buffer into memory so diagnostics (info stream) and
            // the edit script (out stream) don't interleave borrows.
            let opener = FileSystemOpener::new(".");
            let mut edits_out = Vec::new();
            let count = {
                let mut writer = BuildozerWriter::new(&mut edits_out, grep);
                dwyu::create_dependency_edits(session, &project, patterns, &opener, &mut writer)
            };
            let _ = session.out().write_all(&edits_out);
            if count > 0 {
                CliStatus::ExitCleanupFindings
            } else {
                CliStatus::ExitSuccess
            }
        }

        Command::CanonicalizeDeps => {
            let mut edits_out = Vec::new();
            let count = {
                let mut writer = BuildozerWriter::new(&mut edits_out, grep);
                canonicalize::create_canonicalize_edits(session, &project, patterns, &mut writer)
            };
            let _ = session.out().write_all(&edits_out);
            if count > 0 {
                CliStatus::ExitCleanupFindings
            } else {
                CliStatus::ExitSuccess
            }
        }

        Command::ListPackages => {
            let format = session.flags().output_format;
            let rows: Vec<[String; 2]> = project
                .parsed_files()
                .map(|(package, parsed)| [parsed.name.clone(), package.to_string()])
                .collect();
            let mut sink = make_table_sink(session.out(), format, &["bazel-file", "package"]);
            for row in rows {
                sink.add_row(&row);
            }
            sink.finish();
            CliStatus::ExitSuccess
        }

        Command::ListTargets | Command::ListLeafs => {
            let format = session.flags().output_format;
            let mut rows: Vec<[String; 3]> = Vec::new();
            for (package, parsed) in project.parsed_files() {
                let Some(ast) = parsed.ast else { continue };
                query::find_rules(project.arena(), project.sources(), ast, &[], &mut |rule| {
                    let Some(target) = package.qualified_target(&rule.name.text) else {
                        return;
                    };
                    if !print_pattern.matches_target(&target) {
                        return;
                    }
                    if command == Command::ListLeafs && graph.has_dependents.contains_key(&target)
                    {
                        return;
                    }
                    rows.push([
                        project.loc(rule.name.span),
                        rule.rule.clone(),
                        target.to_string(),
                    ]);
                });
            }
            let mut sink =
                make_table_sink(session.out(), format, &["file-location", "rule", "target"]);
            for row in rows {
                sink.add_row(&row);
            }
            sink.finish();
            CliStatus::ExitSuccess
        }

        Command::ListWorkspace => {
            print_workspace(session, &project, patterns);
            CliStatus::ExitSuccess
        }

        Command::AliasedBy => {
            let aliased_by = aliases::extract_aliased_by(&project);
            print_one_to_n(session, print_pattern, &aliased_by, "actual", "aliased-by");
            CliStatus::ExitSuccess
        }

        Command::DependsOn => {
            print_one_to_n(session, print_pattern, &graph.depends_on, "library", "depends-on");
            CliStatus::ExitSuccess
        }

        Command::HasDependents => {
            // Print exactly what was requested; we implicitly had to
            // recurse through everything anyway.
            print_one_to_n(
                session,
                patterns,
                &graph.has_dependents,
                "library",
                "has-dependent",
            );
            CliStatus::ExitSuccess
        }

        Command::CompilationDb | Command::CompileFlags => {
            compiledb::write_compilation_flags(
                session,
                patterns,
                &project,
                command == Command::CompilationDb,
            );
            CliStatus::ExitSuccess
        }
    }
}

