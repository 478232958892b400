//! The project store: all parsed BUILD files of a workspace, the arena
//! their ASTs live in, and the source map that places every span.
//!
//! Loading is lazy and per-package: an initial fill comes from a pattern
//! walk, and the dependency-graph builder asks for further packages as
//! targets surface during traversal.

use std::path::{Path, PathBuf};

use girder_parser::{
    NodeArena, NodeId, ParseError, Parser, Printer, Scanner, SourceId, SourceMap, Span,
};
use regex::Regex;
use thiserror::Error;

/// Problems registering the macro library; build files themselves never
/// error this way, their parse problems are collected per file.
#[derive(Error, Debug)]
pub enum MacroLibraryError {
    #[error("syntax error in macro library: {0}")]
    Syntax(String),
    #[error("macro library: expected `name = body` assignments")]
    NotAnAssignment,
    #[error("multiple macros of name {0}")]
    DuplicateMacro(String),
}

use crate::collections::{HashMap, OneToOne};
use crate::fsutil::{self, FsEventsHandle};
use crate::label::Package;
use crate::pattern::{PatternBundle, TargetMatcher};
use crate::query;
use crate::session::Session;
use crate::workspace::Workspace;

pub struct ParsedBuildFile {
    pub package: Package,
    /// Filename for display.
    pub name: String,
    pub source: SourceId,
    /// Parsed AST; `None` only if the file could not be read.
    pub ast: Option<NodeId>,
    pub errors: Vec<ParseError>,
}

pub struct Project {
    arena: NodeArena,
    sources: SourceMap,
    workspace: Workspace,
    root_dir: PathBuf,
    files: OneToOne<Package, ParsedBuildFile>,
    macros: HashMap<String, NodeId>,
    error_count: usize,
    fs_events: FsEventsHandle,
}

impl Project {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            arena: NodeArena::new(),
            sources: SourceMap::new(),
            workspace,
            root_dir: PathBuf::from("."),
            files: OneToOne::new(),
            macros: HashMap::default(),
            error_count: 0,
            fs_events: None,
        }
    }

    /// Anchor all filesystem operations below `dir` instead of the
    /// current directory.
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    pub fn set_fs_events(&mut self, events: FsEventsHandle) {
        self.fs_events = events;
    }

    pub fn fs_events(&self) -> &FsEventsHandle {
        &self.fs_events
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Split borrow for the rewriting passes, which mutate nodes and
    /// register synthesized strings at the same time.
    pub fn mutable_parts(&mut self) -> (&mut NodeArena, &mut SourceMap) {
        (&mut self.arena, &mut self.sources)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn parsed_files(&self) -> impl Iterator<Item = (&Package, &ParsedBuildFile)> {
        self.files.iter()
    }

    pub fn find_parsed(&self, package: &Package) -> Option<&ParsedBuildFile> {
        self.files.get(package)
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Diagnostic prefix for any span owned by this project.
    pub fn loc(&self, span: Span) -> String {
        self.sources.loc(span)
    }

    pub fn text(&self, span: Span) -> &str {
        self.sources.text(span)
    }

    /// Directory a package lives in, through the workspace for external
    /// projects.
    pub fn package_dir(&self, package: &Package) -> Option<PathBuf> {
        let mut dir = if package.project.is_empty() {
            self.root_dir.clone()
        } else {
            let external = self.workspace.find_path_by_project(&package.project)?;
            if external.is_absolute() {
                external.clone()
            } else {
                self.root_dir.join(external)
            }
        };
        if !package.path.is_empty() {
            dir = dir.join(&package.path);
        }
        Some(dir)
    }

    /// The BUILD file of a package, probing both spellings.
    pub fn build_file_for_package(&self, package: &Package) -> Option<PathBuf> {
        let dir = self.package_dir(package)?;
        for name in ["BUILD", "BUILD.bazel"] {
            let candidate = dir.join(name);
            if fsutil::is_readable_file(&self.fs_events, &candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Collect all BUILD files matching the bundle's patterns and parse
    /// them. Returns the number of files added.
    pub fn fill_from_pattern(&mut self, session: &mut Session, bundle: &PatternBundle) -> usize {
        let mut unique_files = std::collections::BTreeSet::new();
        let mut count = 0;
        for pattern in bundle.patterns().to_vec() {
            let project_name = pattern.project().to_string();
            let search_root = match self.search_dir_for(session, &project_name, pattern.path()) {
                Some(dir) => dir,
                None => continue,
            };
            let build_files = self.collect_build_files(session, &search_root, pattern.is_recursive());
            for build_file in build_files {
                if unique_files.insert(build_file.clone()) {
                    if self.add_build_file(session, &build_file, &project_name) {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    fn search_dir_for(
        &self,
        session: &mut Session,
        project: &str,
        path: &str,
    ) -> Option<PathBuf> {
        let mut dir = if project.is_empty() {
            self.root_dir.clone()
        } else {
            match self.workspace.find_path_by_project(project) {
                Some(p) => {
                    if p.is_absolute() {
                        p.clone()
                    } else {
                        self.root_dir.join(p)
                    }
                }
                None => {
                    let _ = writeln!(session.error(), "Unknown project {project}.");
                    return None;
                }
            }
        };
        if !path.is_empty() {
            dir = dir.join(path);
        }
        Some(dir)
    }

    fn collect_build_files(
        &mut self,
        session: &mut Session,
        start: &Path,
        recursive: bool,
    ) -> Vec<PathBuf> {
        let timer = std::time::Instant::now();
        let seen = std::cell::Cell::new(0usize);
        let files = fsutil::collect_files_recursive(
            &self.fs_events,
            start,
            |dir| {
                seen.set(seen.get() + 1);
                if !recursive {
                    return false; // only looking at one level
                }
                // Skip irrelevant stuff.
                !matches!(
                    dir.file_name().and_then(|n| n.to_str()),
                    Some("_tmp") | Some(".cache") | Some(".git")
                )
            },
            |file| {
                seen.set(seen.get() + 1);
                matches!(
                    file.file_name().and_then(|n| n.to_str()),
                    Some("BUILD") | Some("BUILD.bazel")
                )
            },
        );
        let stats = session.stats_for("BUILD file glob walk", "files/directories");
        stats.count += seen.get();
        stats.duration += timer.elapsed();
        files
    }

    // Derive the package from the build file path and parse the file.
    fn add_build_file(&mut self, session: &mut Session, build_file: &Path, project: &str) -> bool {
        let base = if project.is_empty() {
            self.root_dir.clone()
        } else {
            match self.workspace.find_path_by_project(project) {
                Some(p) => {
                    if p.is_absolute() {
                        p.clone()
                    } else {
                        self.root_dir.join(p)
                    }
                }
                None => {
                    let _ = writeln!(
                        session.error(),
                        "{}: Can't determine package.",
                        build_file.display()
                    );
                    return false;
                }
            }
        };
        let package_path = build_file
            .parent()
            .and_then(|dir| dir.strip_prefix(&base).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let package = Package::new(project, package_path.trim_matches('/'));
        self.add_build_file_for_package(session, build_file, &package)
            .is_some()
    }

    /// Read and parse the build file of `package` from `path`.
    pub fn add_build_file_for_package(
        &mut self,
        session: &mut Session,
        path: &Path,
        package: &Package,
    ) -> Option<&ParsedBuildFile> {
        let Some(content) = fsutil::read_file_to_string(&self.fs_events, path) else {
            let _ = writeln!(session.info(), "Could not read {}", path.display());
            self.error_count += 1;
            return None;
        };
        Some(self.add_build_file_content(
            session,
            package.clone(),
            &path.to_string_lossy(),
            content,
        ))
    }

    /// Parse the given content as the BUILD file of `package`. The main
    /// workhorse. Re-adding an already present package reports the
    /// duplicate and keeps the first file.
    pub fn add_build_file_content(
        &mut self,
        session: &mut Session,
        package: Package,
        filename: &str,
        content: String,
    ) -> &ParsedBuildFile {
        if self.files.contains_key(&package) {
            // Can happen when both BUILD and BUILD.bazel exist; report
            // for the user to figure out.
            let existing = &self.files[&package];
            let _ = writeln!(
                session.info(),
                "{}: Package {} already seen before in {}",
                filename,
                package,
                existing.name
            );
            return &self.files[&package];
        }

        let parse_stat = session.stats_for("Parse & build AST", "BUILD files");
        let timer = std::time::Instant::now();
        let content_bytes = content.len();

        let source = self.sources.add_file(filename, content);
        let (text, base, line_index) = self.sources.scan_parts(source);
        let mut scanner = Scanner::new(text, base, line_index);
        let mut parser = Parser::new(&mut scanner, &mut self.arena);
        let ast = parser.parse();
        let errors = parser.into_errors();

        parse_stat.count += 1;
        parse_stat.add_bytes(content_bytes);
        parse_stat.duration += timer.elapsed();

        if !errors.is_empty() {
            self.error_count += 1;
            for error in &errors {
                let _ = writeln!(session.error(), "{} {}", self.sources.loc(error.span), error);
            }
        }

        let parsed = ParsedBuildFile {
            package: package.clone(),
            name: filename.to_string(),
            source,
            ast: Some(ast),
            errors,
        };
        self.files.entry(package).or_insert(parsed)
    }

    /// Content of a macro with the given name, if registered. The
    /// returned subtree must only be expanded via substitute-copy.
    pub fn find_macro(&self, name: &str) -> Option<NodeId> {
        self.macros.get(name).copied()
    }

    pub(crate) fn macros(&self) -> &HashMap<String, NodeId> {
        &self.macros
    }

    /// Register macro definitions: a file of `name = body` assignments.
    /// Typically called once with the compiled-in library, or from tests.
    pub fn set_macro_content(&mut self, content: &str) -> Result<(), MacroLibraryError> {
        let source = self
            .sources
            .add_file("(macro-library)", content.to_string());
        let (text, base, line_index) = self.sources.scan_parts(source);
        let mut scanner = Scanner::new(text, base, line_index);
        let mut parser = Parser::new(&mut scanner, &mut self.arena);
        let top = parser.parse();
        if let Some(error) = parser.errors().first() {
            return Err(MacroLibraryError::Syntax(error.to_string()));
        }
        let Some((_, statements)) = self.arena.any_list(top) else {
            return Err(MacroLibraryError::NotAnAssignment);
        };
        for statement in statements.to_vec() {
            let Some((lhs, Some(rhs))) = self.arena.assignment(statement) else {
                return Err(MacroLibraryError::NotAnAssignment);
            };
            let Some(name_span) = self.arena.identifier_span(lhs) else {
                return Err(MacroLibraryError::NotAnAssignment);
            };
            let name = self.sources.text(name_span).to_string();
            if self.macros.insert(name.clone(), rhs).is_some() {
                return Err(MacroLibraryError::DuplicateMacro(name));
            }
        }
        Ok(())
    }
}

/// Print a parsed project, recreated from the AST. With a grep regex in
/// the flags, only rules whose printed form matches are shown. Returns
/// `(printed, total)` counts.
pub fn print_project(
    session: &mut Session,
    pattern: &dyn TargetMatcher,
    project: &Project,
) -> (usize, usize) {
    let flags = session.flags().clone();
    let regex = flags
        .grep_regex
        .as_deref()
        .and_then(|re| match Regex::new(re) {
            Ok(re) => Some(re),
            Err(err) => {
                let _ = writeln!(session.error(), "Grep pattern: {err}");
                None
            }
        });
    if flags.grep_regex.is_some() && regex.is_none() {
        return (0, 0);
    }

    let mut printed = 0;
    let mut total = 0;
    for (package, file) in project.parsed_files() {
        if flags.print_only_errors && file.errors.is_empty() {
            continue;
        }
        if !pattern.matches_package(package) {
            continue;
        }
        let Some(ast) = file.ast else { continue };

        if flags.print_ast {
            // Raw statement dump of the whole file.
            if let Some((_, statements)) = project.arena().any_list(ast) {
                for statement in statements {
                    total += 1;
                    let text =
                        Printer::new(project.arena(), project.sources()).print(*statement);
                    if regex.as_ref().is_some_and(|re| !re.is_match(&text)) {
                        continue;
                    }
                    printed += 1;
                    let _ = writeln!(session.out(), "{text}");
                }
            }
            continue;
        }

        let mut rows: Vec<String> = Vec::new();
        query::find_rules_allow_empty_name(
            project.arena(),
            project.sources(),
            ast,
            &[],
            &mut |rule| {
                total += 1;
                let Some(call) = rule.call else { return };
                let target = (!rule.name.text.is_empty())
                    .then(|| package.qualified_target(&rule.name.text))
                    .flatten();
                if pattern.has_filter() {
                    match &target {
                        Some(t) if pattern.matches_target(t) => {}
                        _ => return,
                    }
                }
                let text = Printer::new(project.arena(), project.sources()).print(call);
                if regex.as_ref().is_some_and(|re| !re.is_match(&text)) {
                    return;
                }
                let mut row = format!("# {}", project.loc(rule.name.span));
                if let Some(t) = &target {
                    row += &format!(" {t}");
                }
                row.push('\n');
                row += &text;
                row.push('\n');
                rows.push(row);
            },
        );
        for row in rows {
            printed += 1;
            let _ = writeln!(session.out(), "{row}");
        }
    }
    (printed, total)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::session::Flags;

    /// Convenience to assemble an in-memory multi-package project for
    /// tests: content is added per package, parse errors are test bugs.
    pub(crate) struct TestProject {
        project: Project,
    }

    impl TestProject {
        pub fn new() -> Self {
            Self {
                project: Project::new(Workspace::default()),
            }
        }

        pub fn with_root_dir(dir: impl Into<PathBuf>) -> Self {
            Self {
                project: Project::new(Workspace::default()).with_root_dir(dir),
            }
        }

        /// Put content into `package` (e.g. `//lib`) and parse it.
        pub fn add(&mut self, package: &str, content: &str) -> Package {
            let package = Package::parse(package).expect("valid package");
            let filename = format!("{package}/BUILD");
            let mut out = Vec::new();
            let mut info = Vec::new();
            let mut session = Session::new(&mut out, &mut info, Flags::default());
            let parsed = self.project.add_build_file_content(
                &mut session,
                package.clone(),
                &filename,
                content.to_string(),
            );
            assert!(
                parsed.errors.is_empty(),
                "invalid test input: {}",
                String::from_utf8_lossy(&info)
            );
            package
        }

        pub fn set_macro_content(&mut self, content: &str) {
            self.project.set_macro_content(content).expect("macros");
        }

        pub fn project(&self) -> &Project {
            &self.project
        }

        pub fn project_mut(&mut self) -> &mut Project {
            &mut self.project
        }

        /// Printed statements of a package's file, for comparisons.
        pub fn printed(&self, package: &Package) -> String {
            let file = self.project.find_parsed(package).expect("package");
            Printer::new(self.project.arena(), self.project.sources())
                .print_statements(file.ast.expect("ast"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::TestProject;
    use super::*;
    use crate::session::Flags;

    #[test]
    fn duplicate_package_keeps_first() {
        let mut tp = TestProject::new();
        let pkg = tp.add("//dup", "cc_library(name = \"one\")\n");
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());
        tp.project_mut().add_build_file_content(
            &mut session,
            pkg.clone(),
            "//dup/BUILD.bazel",
            "cc_library(name = \"two\")\n".to_string(),
        );
        let printed = tp.printed(&pkg);
        assert!(printed.contains("one"));
        assert!(!printed.contains("two"));
        assert!(String::from_utf8_lossy(&info).contains("already seen before"));
    }

    #[test]
    fn fill_from_pattern_walks_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::create_dir_all(dir.path().join("c")).unwrap();
        std::fs::write(dir.path().join("a/BUILD"), "cc_library(name = \"a\")\n").unwrap();
        std::fs::write(
            dir.path().join("a/b/BUILD.bazel"),
            "cc_library(name = \"b\")\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("c/BUILD"), "cc_library(name = \"c\")\n").unwrap();

        let mut project = Project::new(Workspace::default()).with_root_dir(dir.path());
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());

        let mut bundle = PatternBundle::default();
        bundle.add_pattern(crate::pattern::Pattern::parse("//a/...").unwrap());
        bundle.finish();
        assert_eq!(project.fill_from_pattern(&mut session, &bundle), 2);
        assert!(project.find_parsed(&Package::new("", "a")).is_some());
        assert!(project.find_parsed(&Package::new("", "a/b")).is_some());
        assert!(project.find_parsed(&Package::new("", "c")).is_none());
    }

    #[test]
    fn nonrecursive_pattern_stays_in_one_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/BUILD"), "cc_library(name = \"a\")\n").unwrap();
        std::fs::write(dir.path().join("a/b/BUILD"), "cc_library(name = \"b\")\n").unwrap();

        let mut project = Project::new(Workspace::default()).with_root_dir(dir.path());
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());

        let mut bundle = PatternBundle::default();
        bundle.add_pattern(crate::pattern::Pattern::parse("//a:all").unwrap());
        bundle.finish();
        assert_eq!(project.fill_from_pattern(&mut session, &bundle), 1);
        assert!(project.find_parsed(&Package::new("", "a/b")).is_none());
    }

    #[test]
    fn macro_library_registration() {
        let mut project = Project::new(Workspace::default());
        project
            .set_macro_content("my_macro = cc_library(name = name)\n")
            .unwrap();
        assert!(project.find_macro("my_macro").is_some());
        assert!(project.find_macro("other").is_none());
        // Double registration of the same name is an error.
        assert!(project
            .set_macro_content("my_macro = cc_library(name = name)\n")
            .is_err());
    }
}
