//! DWYU ("depend on what you use"): per target, grep the sources for
//! quoted `#include`s, map each include back to the library providing it
//! through the header index, and emit the minimal set of add/remove
//! edits on `deps`.
//!
//! Removals are only suggested when every include is accounted for and
//! the dependency is not alwayslink; additions only when the proposed
//! dependency is visible from the target.

use std::ops::Range;
use std::path::PathBuf;

use girder_parser::LineIndex;
use regex::Regex;

use crate::aliases;
use crate::collections::{OneToN, OneToOne};
use crate::edit::{CountingSink, Edit, EditKind, EditSink};
use crate::headers::{self, ProvidedFromTarget, ProvidedFromTargetSet};
use crate::label::Target;
use crate::pattern::{Pattern, TargetMatcher};
use crate::project::{ParsedBuildFile, Project};
use crate::query::{self, RuleInfo, SpannedStr};
use crate::session::Session;
use std::collections::BTreeSet;

// Sources are looked for in the source tree first, then in the
// well-known locations of generated files.
const SOURCE_LOCATIONS: [&str; 4] = [
    "",
    "bazel-out/host/bin/",
    "bazel-bin/",
    "bazel-genfiles/",
];

/// A source file found on disk for grepping.
pub struct OpenedSource {
    pub content: String,
    /// Path relative to the working directory, for messages.
    pub path: String,
    /// Output of some other rule rather than a checked-in file.
    pub is_generated: bool,
}

/// How source files are located; overridable for tests.
pub trait SourceOpener {
    fn try_open(&self, relative_path: &str) -> Option<OpenedSource>;
}

pub struct FileSystemOpener {
    root: PathBuf,
}

impl FileSystemOpener {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceOpener for FileSystemOpener {
    fn try_open(&self, relative_path: &str) -> Option<OpenedSource> {
        for (i, location) in SOURCE_LOCATIONS.iter().enumerate() {
            let path = format!("{location}{relative_path}");
            if let Ok(content) = std::fs::read_to_string(self.root.join(&path)) {
                return Some(OpenedSource {
                    content,
                    path,
                    is_generated: i > 0,
                });
            }
        }
        None
    }
}

/// Extract the paths of quoted (not angle-bracketed) `#include`s.
/// Deliberately best-effort about strings in the source: every bare
/// quote toggles an in-string state, and includes seen inside are
/// ignored. Returned ranges are byte offsets into `content`.
pub fn extract_cc_includes(content: &str) -> Vec<(String, Range<usize>)> {
    // Also matching a lone '"' makes the toggle work; the alternation for
    // a real include consumes both of its quotes itself.
    static INCLUDE_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = INCLUDE_RE.get_or_init(|| {
        Regex::new(r#"(?m)("|^\s*#include\s+"([0-9a-zA-Z_/-]+(\.[a-zA-Z]+)*)")"#).unwrap()
    });

    let mut in_quote_toggle = false;
    let mut result = Vec::new();
    for captures in re.captures_iter(content) {
        let outer = captures.get(1).unwrap();
        if outer.as_str() == "\"" {
            in_quote_toggle = !in_quote_toggle;
        } else if !in_quote_toggle {
            if let Some(header) = captures.get(2) {
                result.push((header.as_str().to_string(), header.range()));
            }
        }
    }
    result
}

// Strike the requested dependency off the needed-alternatives list,
// remembering which dep satisfied what (to warn about duplicates and
// overlapping providers).
fn check_off(
    deps_needed: &mut Vec<BTreeSet<Target>>,
    checked_off_by: &mut OneToOne<Target, Target>,
    requested: &Target,
) -> bool {
    for (i, alternatives) in deps_needed.iter().enumerate() {
        if alternatives.contains(requested) {
            for t in alternatives {
                checked_off_by.insert(t.clone(), requested.clone());
            }
            deps_needed.remove(i); // alternatives satisfied
            return true;
        }
    }
    false
}

// Given a header, check if it is in the list of this target's own files,
// taking the package prefix into account.
fn is_header_in_list(header: &str, list: &[SpannedStr], prefix_path: &str) -> bool {
    list.iter().any(|item| {
        header.ends_with(&item.text) && format!("{}/{}", prefix_path, item.text) == *header
    })
}

struct KnownLibrary {
    alwayslink: bool,
    visibility: Option<girder_parser::NodeId>,
    package: crate::label::Package,
}

pub struct DwyuGenerator<'a> {
    project: &'a Project,
    opener: &'a dyn SourceOpener,
    headers_from_libs: ProvidedFromTargetSet,
    files_from_genrules: ProvidedFromTarget,
    aliased_by: OneToN<Target, Target>,
    known_libs: OneToOne<Target, KnownLibrary>,
}

impl<'a> DwyuGenerator<'a> {
    pub fn new(
        session: &mut Session,
        project: &'a Project,
        opener: &'a dyn SourceOpener,
    ) -> Self {
        let timer = std::time::Instant::now();
        let headers_from_libs = headers::extract_header_to_lib_mapping(session, project);
        let files_from_genrules = headers::extract_generated_from_genrule(session, project);
        let aliased_by = aliases::extract_aliased_by(project);
        let known_libs = Self::init_known_libraries(project);

        let stats = session.stats_for("DWYU preparation", "indexed targets");
        stats.count += known_libs.len();
        stats.duration += timer.elapsed();

        Self {
            project,
            opener,
            headers_from_libs,
            files_from_genrules,
            aliased_by,
            known_libs,
        }
    }

    // Only libraries we actually know about can be confidently removed;
    // remember what is needed to decide visibility and alwayslink later.
    fn init_known_libraries(project: &Project) -> OneToOne<Target, KnownLibrary> {
        let mut known = OneToOne::new();
        for (package, parsed) in project.parsed_files() {
            let Some(ast) = parsed.ast else { continue };
            query::find_rules(
                project.arena(),
                project.sources(),
                ast,
                &["cc_library", "cc_proto_library"],
                &mut |rule| {
                    let Some(target) = package.qualified_target(&rule.name.text) else {
                        return;
                    };
                    known.insert(
                        target,
                        KnownLibrary {
                            alwayslink: rule.alwayslink,
                            visibility: rule.visibility,
                            package: package.clone(),
                        },
                    );
                },
            );
        }
        known
    }

    fn is_alwayslink(&self, target: &Target) -> bool {
        match self.known_libs.get(target) {
            Some(lib) => lib.alwayslink,
            None => true, // unknown? be conservative.
        }
    }

    // A dep is visible if it lives in the same package or any entry of
    // its visibility list matches the target.
    fn can_see(&self, target: &Target, dep: &Target) -> bool {
        if target.package == dep.package {
            return true;
        }
        let Some(lib) = self.known_libs.get(dep) else {
            return true; // unknown? be bold.
        };
        let Some(visibility) = lib.visibility else {
            return true;
        };
        let entries =
            query::extract_string_list(self.project.arena(), self.project.sources(), Some(visibility));
        for entry in entries {
            let Some(vis_pattern) = Pattern::parse_visibility(&entry.text, &lib.package) else {
                continue;
            };
            if !vis_pattern.has_filter() || vis_pattern.matches_target(target) {
                return true;
            }
        }
        false
    }

    /// Analyze every matching cc rule; returns how many targets were
    /// processed.
    pub fn create_edits_for_pattern(
        &self,
        session: &mut Session,
        pattern: &dyn TargetMatcher,
        sink: &mut dyn EditSink,
    ) -> usize {
        let mut count = 0;
        for (package, parsed) in self.project.parsed_files() {
            if !pattern.matches_package(package) {
                continue;
            }
            let Some(ast) = parsed.ast else { continue };
            let mut found: Vec<(Target, RuleInfo)> = Vec::new();
            query::find_rules(
                self.project.arena(),
                self.project.sources(),
                ast,
                &["cc_library", "cc_binary", "cc_test"],
                &mut |rule| {
                    let Some(target) = package.qualified_target(&rule.name.text) else {
                        return;
                    };
                    if pattern.matches_target(&target) {
                        found.push((target, rule.clone()));
                    }
                },
            );
            for (target, rule) in found {
                count += 1;
                self.create_edits_for_target(session, &target, &rule, parsed, sink);
            }
        }
        count
    }

    fn create_edits_for_target(
        &self,
        session: &mut Session,
        target: &Target,
        details: &RuleInfo,
        build_file: &ParsedBuildFile,
        sink: &mut dyn EditSink,
    ) {
        // Sources and headers belonging to this very target.
        let mut sources =
            query::extract_string_list(self.project.arena(), self.project.sources(), details.srcs);
        query::append_string_list(
            self.project.arena(),
            self.project.sources(),
            details.hdrs,
            &mut sources,
        );

        // Map the includes the sources use back to the dependencies
        // providing them: those are the deps actually needed.
        let mut all_headers_accounted_for = true;
        let mut deps_needed = self.dependencies_needed_by_sources(
            session,
            target,
            build_file,
            &sources,
            &mut all_headers_accounted_for,
        );

        let mut checked_off_by: OneToOne<Target, Target> = OneToOne::new();

        // Walk the declared deps and strike them off the needed list;
        // whatever is not needed becomes a removal candidate.
        let deps =
            query::extract_string_list(self.project.arena(), self.project.sources(), details.deps);
        for dependency in &deps {
            let Some(requested) = Target::parse(&dependency.text, &target.package) else {
                let _ = writeln!(
                    session.info(),
                    "{} Invalid target name '{}'",
                    self.project.loc(dependency.span),
                    dependency.text
                );
                continue;
            };

            if check_off(&mut deps_needed, &mut checked_off_by, &requested) {
                continue;
            }

            if let Some(previously) = checked_off_by.get(&requested) {
                if *previously == requested {
                    let _ = writeln!(
                        session.info(),
                        "{} {} same dependency mentioned multiple times. Run buildifier",
                        self.project.loc(dependency.span),
                        dependency.text
                    );
                } else {
                    let _ = writeln!(
                        session.info(),
                        "{} {} provides headers already provided in dependency {} before. \
                         Multiple libraries providing the same headers ?",
                        self.project.loc(dependency.span),
                        dependency.text,
                        previously
                    );
                }
                continue;
            }

            // Looks unneeded. Removal is only safe when every include
            // was resolved and the library may be dropped at all.
            let removal_safe = all_headers_accounted_for && !self.is_alwayslink(&requested);
            if !removal_safe {
                continue;
            }
            // A `# keep` comment on the line vetoes, unless strict.
            if !session.flags().ignore_keep_comment {
                if let Some(line) = self.project.sources().surrounding_line(dependency.span) {
                    if line.contains("# keep") {
                        continue;
                    }
                }
            }
            sink.emit(Edit {
                kind: EditKind::Remove,
                target: target.clone(),
                before: dependency.text.clone(),
                after: String::new(),
                span: dependency.span,
            });
        }

        // Whatever remains needed must be added, if unambiguous.
        for alternatives in &deps_needed {
            if alternatives.len() > 1 {
                let _ = writeln!(
                    session.info(),
                    "{} Can't auto-decide: referenced headers in {} need exactly one of \
                     multiple choices:",
                    self.project.loc(details.name.span),
                    target
                );
                for alternative in alternatives {
                    let _ = writeln!(session.info(), "\t{alternative}");
                }
                continue;
            }
            let need_add = alternatives.iter().next().unwrap();
            if self.can_see(target, need_add) {
                sink.emit(Edit {
                    kind: EditKind::Add,
                    target: target.clone(),
                    before: String::new(),
                    after: need_add.to_string_relative_to(&target.package),
                    span: details.name.span,
                });
            } else if session.verbose() {
                let _ = writeln!(
                    session.info(),
                    "{} Would add {}, but not visible",
                    self.project.loc(details.name.span),
                    need_add
                );
            }
        }
    }

    // Grep all sources, resolve every include to the set of libraries
    // that could provide it (the target itself, the header index, or
    // aliases of providers), visibility-filtered. Clears
    // `all_headers_accounted_for` whenever a file can't be read or an
    // include can't be resolved; only then are removals unsafe.
    fn dependencies_needed_by_sources(
        &self,
        session: &mut Session,
        target: &Target,
        build_file: &ParsedBuildFile,
        sources: &[SpannedStr],
        all_headers_accounted_for: &mut bool,
    ) -> Vec<BTreeSet<Target>> {
        let timer = std::time::Instant::now();
        let mut grepped_count = 0usize;
        let mut grepped_bytes = 0usize;
        let mut result: Vec<BTreeSet<Target>> = Vec::new();

        // Already-provided targets need not be reported again.
        let mut already_provided: BTreeSet<Target> = BTreeSet::new();
        already_provided.insert(target.clone());

        let mut add_alternatives = |alternatives: &BTreeSet<Target>,
                                    result: &mut Vec<BTreeSet<Target>>| {
            let mut any_already_provided = false;
            for t in alternatives {
                any_already_provided |= !already_provided.insert(t.clone());
            }
            if any_already_provided {
                return;
            }
            let mut set = BTreeSet::new();
            // All visible alternatives, plus all aliases pointing there.
            for t in alternatives {
                if self.can_see(target, t) {
                    set.insert(t.clone());
                }
                if let Some(alias_list) = self.aliased_by.get(t) {
                    for alias in alias_list {
                        if self.can_see(target, alias) {
                            set.insert(alias.clone());
                        }
                    }
                }
            }
            if !set.is_empty() {
                result.push(set);
            }
        };

        for src in sources {
            let source_file = build_file.package.qualified_file(&src.text);
            let Some(opened) = self.opener.try_open(&source_file) else {
                let _ = writeln!(
                    session.info(),
                    "{} Can not read source '{}' referenced in {}. Missing ? Generated ?",
                    self.project.loc(src.span),
                    source_file,
                    target
                );
                *all_headers_accounted_for = false;
                continue;
            };

            grepped_count += 1;
            grepped_bytes += opened.content.len();
            let includes = extract_cc_includes(&opened.content);
            let source_locator = GreppedSource::new(&opened);

            for (include, range) in &includes {
                if is_header_in_list(include, sources, &target.package.path) {
                    continue; // our own srcs=[...], hdrs=[...]
                }

                // Included without the package prefix?
                if is_header_in_list(include, sources, "") {
                    if !opened.is_generated {
                        let _ = writeln!(
                            session.info(),
                            "{} {} header relative to this file. Consider FQN relative to \
                             project root.",
                            source_locator.loc(range.start),
                            include
                        );
                    }
                    continue; // found in our own sources; accounted for
                }

                if let Some(found) = self.headers_from_libs.get(include) {
                    add_alternatives(found, &mut result);
                    continue;
                }

                // Maybe provided relative to the package instead of the
                // project root?
                let package_relative = build_file.package.qualified_file(include);
                if let Some(found) = self.headers_from_libs.get(&package_relative) {
                    if !opened.is_generated {
                        let _ = writeln!(
                            session.info(),
                            "{} {} header relative to this file. Consider FQN relative to \
                             project root.",
                            source_locator.loc(range.start),
                            include
                        );
                    }
                    add_alternatives(found, &mut result);
                    continue;
                }

                // From here on we don't know where the header comes
                // from, so removals in this target become unsafe.
                *all_headers_accounted_for = false;

                if let Some(genrule) = self.files_from_genrules.get(include) {
                    let _ = writeln!(
                        session.info(),
                        "{} {} not accounted for; generated by genrule {}, but not in \
                         hdrs=[...] of any cc_library() we depend on.",
                        source_locator.loc(range.start),
                        include,
                        genrule
                    );
                    continue;
                }

                if session.verbose() {
                    let _ = writeln!(
                        session.info(),
                        "{} {} unaccounted for; glob()'ed ? lib missing ? bazel build needed ?",
                        source_locator.loc(range.start),
                        include
                    );
                }
            }
        }

        let stats = session.stats_for("Grep'ed", "sources");
        stats.count += grepped_count;
        stats.add_bytes(grepped_bytes);
        stats.duration += timer.elapsed();
        result
    }
}

// Line-indexed view of one grepped source, for diagnostics. These
// sources are not part of the project's span space; they only live for
// the duration of the grep.
struct GreppedSource<'a> {
    path: &'a str,
    line_index: LineIndex,
}

impl<'a> GreppedSource<'a> {
    fn new(opened: &'a OpenedSource) -> Self {
        let mut line_index = LineIndex::default();
        line_index.initialize_from(&opened.content);
        Self {
            path: &opened.path,
            line_index,
        }
    }

    fn loc(&self, offset: usize) -> String {
        let position = self.line_index.position(offset as u32);
        format!("{}:{}:", self.path, position)
    }
}

/// Facade: run DWYU over everything matching `pattern`, pushing edits
/// into `sink`. Returns the number of emitted edits.
pub fn create_dependency_edits(
    session: &mut Session,
    project: &Project,
    pattern: &dyn TargetMatcher,
    opener: &dyn SourceOpener,
    sink: &mut dyn EditSink,
) -> usize {
    let mut counting = CountingSink::new(sink);
    let generator = DwyuGenerator::new(session, project, opener);
    generator.create_edits_for_pattern(session, pattern, &mut counting);
    counting.count()
}
