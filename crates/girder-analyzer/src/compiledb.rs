//! Compile-flags and compilation-database emission (experimental).
//!
//! Coarse-grained on purpose: all include directories seen anywhere in
//! the project apply to every file. Good enough to make clangd happy on
//! most bazel projects without evaluating toolchains.

use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;

use crate::fsutil;
use crate::pattern::TargetMatcher;
use crate::project::Project;
use crate::query;
use crate::session::Session;

// Common typical options considered for the compiler.
const COMMON_DEFAULT_OPTIONS: [&str; 4] = ["-xc++", "-U_FORTIFY_SOURCE", "-O2", "-DNDEBUG"];

// Fish --cxxopt/--host_cxxopt values out of .bazelrc; dash-options only,
// to avoid picking up Windows-style slash options.
fn extract_cxx_options_from_bazelrc(project: &Project) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let Some(bazelrc) =
        fsutil::read_file_to_string(project.fs_events(), &project.root_dir().join(".bazelrc"))
    else {
        return result;
    };
    let re = Regex::new(r#"--(?:host_)?cxxopt\s*=?\s*['"]?(-[^\s"']+)"#).unwrap();
    for captures in re.captures_iter(&bazelrc) {
        result.insert(captures[1].to_string());
    }
    result
}

// Every workspace-external project root and every includes=[] directory
// is a candidate -I.
fn collect_include_dirs(project: &Project) -> BTreeSet<String> {
    let mut dirs = BTreeSet::new();
    dirs.insert(".".to_string());
    dirs.insert("bazel-bin".to_string());
    for (_, path) in project.workspace().project_location.iter() {
        dirs.insert(path.to_string_lossy().into_owned());
    }
    for (package, parsed) in project.parsed_files() {
        let Some(ast) = parsed.ast else { continue };
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &["cc_library"],
            &mut |rule| {
                for dir in query::extract_string_list(project.arena(), project.sources(), rule.includes)
                {
                    dirs.insert(package.qualified_file(&dir.text));
                }
            },
        );
    }
    dirs
}

fn assemble_arguments(project: &Project) -> Vec<String> {
    let mut arguments = vec!["gcc".to_string()];
    arguments.extend(COMMON_DEFAULT_OPTIONS.iter().map(|s| s.to_string()));
    arguments.extend(extract_cxx_options_from_bazelrc(project));
    for dir in collect_include_dirs(project) {
        arguments.push(format!("-I{dir}"));
    }
    arguments
}

#[derive(Serialize)]
struct CompilationDbEntry {
    file: String,
    arguments: Vec<String>,
    directory: String,
}

/// Write either a flat flags list (one option per line, for
/// `compile_flags.txt`) or a JSON compilation database covering each
/// source of every matched cc rule.
pub fn write_compilation_flags(
    session: &mut Session,
    pattern: &dyn TargetMatcher,
    project: &Project,
    as_database: bool,
) {
    let arguments = assemble_arguments(project);

    if !as_database {
        for argument in arguments.iter().skip(1) {
            let _ = writeln!(session.out(), "{argument}");
        }
        return;
    }

    let directory = std::env::current_dir()
        .map(|d| d.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_string());

    let mut already_written = BTreeSet::new();
    let mut entries = Vec::new();
    for (package, parsed) in project.parsed_files() {
        if !pattern.matches_package(package) {
            continue;
        }
        let Some(ast) = parsed.ast else { continue };
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &["cc_library", "cc_binary", "cc_test"],
            &mut |rule| {
                let mut sources =
                    query::extract_string_list(project.arena(), project.sources(), rule.srcs);
                query::append_string_list(
                    project.arena(),
                    project.sources(),
                    rule.hdrs,
                    &mut sources,
                );
                for src in sources {
                    let file = package.fully_qualified_file(project.workspace(), &src.text);
                    if !already_written.insert(file.clone()) {
                        continue;
                    }
                    let mut file_arguments = arguments.clone();
                    file_arguments.push("-c".to_string());
                    file_arguments.push(file.clone());
                    entries.push(CompilationDbEntry {
                        file,
                        arguments: file_arguments,
                        directory: directory.clone(),
                    });
                }
            },
        );
    }

    match serde_json::to_string_pretty(&entries) {
        Ok(json) => {
            let _ = writeln!(session.out(), "{json}");
        }
        Err(err) => {
            let _ = writeln!(session.error(), "compilation-db: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternBundle;
    use crate::project::testutil::TestProject;
    use crate::session::Flags;

    #[test]
    fn database_covers_each_source_once() {
        let mut tp = TestProject::new();
        tp.add(
            "//lib",
            r#"
cc_library(
    name = "a",
    srcs = ["shared.cc"],
    hdrs = ["a.h"],
)
cc_library(
    name = "b",
    srcs = ["shared.cc"],
)
"#,
        );
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());
        write_compilation_flags(
            &mut session,
            &PatternBundle::match_all(),
            tp.project(),
            true,
        );
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let entries = json.as_array().unwrap();
        // shared.cc deduplicated, a.h included.
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["file"], "lib/shared.cc");
        assert!(entries[0]["arguments"]
            .as_array()
            .unwrap()
            .iter()
            .any(|a| a == "-I."));
    }

    #[test]
    fn flags_listing_contains_defaults() {
        let tp = TestProject::new();
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());
        write_compilation_flags(
            &mut session,
            &PatternBundle::match_all(),
            tp.project(),
            false,
        );
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("-xc++"));
        assert!(text.contains("-I."));
    }
}
