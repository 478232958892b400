//! Resolving the workspace: which external projects exist, and where
//! bazel extracted them on disk.
//!
//! All of `WORKSPACE`, `WORKSPACE.bazel`, `WORKSPACE.bzlmod` and
//! `MODULE.bazel` are parsed with the regular scanner/parser; the
//! `http_archive()` and `bazel_dep()` calls found there name the
//! projects. For each one, candidate extraction directories under
//! `bazel-out/../../../external/` are probed. If bazel never ran, the
//! resolver still succeeds, but paths stay unknown.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use girder_parser::{NodeArena, Parser, Scanner, SourceMap};

use crate::collections::OneToOne;
use crate::fsutil;
use crate::query;
use crate::session::Session;

const EXTERNAL_BASE_DIR: &str = "bazel-out/../../../external";

/// How trustworthy the discovery of a project is: declared in the root
/// workspace beats being declared in workspace files, which beats only
/// having found a directory of that name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stratum {
    RootProject,
    #[default]
    WorkspaceDefined,
    DirectoryFound,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionedProject {
    pub project: String,
    pub version: String,
    pub stratum: Stratum,
}

impl VersionedProject {
    /// Parse from an extraction directory name; bzlmod encodes the
    /// version after `~`, bazel 8 appends `+`.
    pub fn parse_from_dir(dir: &str) -> Option<VersionedProject> {
        if dir.is_empty() {
            return None;
        }
        if let Some(tilde) = dir.find('~') {
            if tilde == 0 {
                return None;
            }
            return Some(VersionedProject {
                project: dir[..tilde].to_string(),
                version: dir[tilde + 1..].to_string(),
                ..VersionedProject::default()
            });
        }
        Some(VersionedProject {
            project: dir.trim_end_matches('+').to_string(),
            ..VersionedProject::default()
        })
    }
}

/// External projects and the directories they were extracted to.
#[derive(Debug, Default)]
pub struct Workspace {
    pub project_location: OneToOne<VersionedProject, PathBuf>,
}

impl Workspace {
    /// First entry matching the project name, queried with or without the
    /// leading `@`.
    pub fn find_entry_by_project(&self, name: &str) -> Option<(&VersionedProject, &PathBuf)> {
        if name.is_empty() {
            return None;
        }
        let name = name.strip_prefix('@').unwrap_or(name);
        let (project, path) = self
            .project_location
            .range(
                VersionedProject {
                    project: name.to_string(),
                    version: String::new(),
                    stratum: Stratum::RootProject,
                }..,
            )
            .next()?;
        (project.project == name).then_some((project, path))
    }

    pub fn find_path_by_project(&self, name: &str) -> Option<&PathBuf> {
        self.find_entry_by_project(name).map(|(_, path)| path)
    }
}

fn probe_project_dir(root: &Path, name: &str, version: &str) -> Option<PathBuf> {
    let base = root.join(EXTERNAL_BASE_DIR);
    let mut candidates = Vec::new();
    if !version.is_empty() {
        candidates.push(format!("{name}~{version}"));
    }
    candidates.push(name.to_string());
    // Plausible when archive_override() is used, and the bazel-8 spelling.
    candidates.push(format!("{name}~override"));
    candidates.push(format!("{name}+"));

    for candidate in &candidates {
        let path = base.join(candidate);
        if path.is_dir() {
            return Some(path);
        }
    }

    // Maybe a different version got extracted?
    let prefix = format!("{name}~");
    let mut fallbacks: Vec<PathBuf> = std::fs::read_dir(&base)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    fallbacks.sort();
    fallbacks.into_iter().next()
}

fn load_workspace_file(
    session: &mut Session,
    root: &Path,
    ws_file: &str,
    messages: &mut String,
    workspace: &mut Workspace,
) -> bool {
    let path = root.join(ws_file);
    let Some(content) = fsutil::read_file_to_string(&None, &path) else {
        return false;
    };

    // Throwaway parse; the workspace survives the AST.
    let mut sources = SourceMap::new();
    let mut arena = NodeArena::new();
    let id = sources.add_file(ws_file, content);
    let (text, base, line_index) = sources.scan_parts(id);
    let mut scanner = Scanner::new(text, base, line_index);
    let mut parser = Parser::new(&mut scanner, &mut arena);
    let ast = parser.parse();
    let errors = parser.errors().to_vec();
    drop(parser);
    drop(scanner);
    for error in &errors {
        let _ = writeln!(session.info(), "{} {}", sources.loc(error.span), error);
    }

    query::find_rules(
        &arena,
        &sources,
        ast,
        &["http_archive", "bazel_dep"],
        &mut |rule| {
            let name = &rule.name.text;
            let version = rule.version.as_ref().map(|v| v.text.as_str()).unwrap_or("");
            match probe_project_dir(root, name, version) {
                Some(path) => {
                    let project = VersionedProject {
                        // A repo_name alias is the authoritative name.
                        project: rule
                            .repo_name
                            .as_ref()
                            .map(|r| r.text.clone())
                            .unwrap_or_else(|| name.clone()),
                        version: version.to_string(),
                        stratum: Stratum::WorkspaceDefined,
                    };
                    workspace.project_location.insert(project, path);
                }
                None => {
                    let _ = writeln!(
                        messages,
                        "{} Can't find extracted project '{}'",
                        sources.loc(rule.name.span),
                        name
                    );
                }
            }
        },
    );
    true
}

/// Scan `root` for workspace files and index the external projects they
/// reference.
pub fn load_workspace(session: &mut Session, root: &Path) -> Option<Workspace> {
    let mut workspace = Workspace::default();
    let mut workspace_found = false;

    const WS_FILES: [&str; 4] = [
        "WORKSPACE",
        "WORKSPACE.bazel",
        "WORKSPACE.bzlmod",
        "MODULE.bazel",
    ];

    // Collect messages for old and new style workspaces separately; only
    // when both have issues is it likely that bazel never extracted the
    // dependencies.
    let mut old_style_messages = String::new();
    let mut new_style_messages = String::new();

    for (i, ws_file) in WS_FILES.iter().enumerate() {
        let messages = if i < 2 {
            &mut old_style_messages
        } else {
            &mut new_style_messages
        };
        workspace_found |= load_workspace_file(session, root, ws_file, messages, &mut workspace);
    }

    if !old_style_messages.is_empty() && !new_style_messages.is_empty() {
        let _ = write!(session.info(), "{old_style_messages}{new_style_messages}");
        let _ = writeln!(
            session.info(),
            "Note: need to run a bazel build at least once to extract external projects"
        );
    }
    workspace_found.then_some(workspace)
}

/// Some projects obfuscate their dependencies in various `*.bzl` files
/// instead of a simple toplevel workspace declaration. Fall back to the
/// directories such projects end up in, stored with lower stratum.
pub fn augment_from_external_dir(root: &Path, workspace: &mut Workspace) -> bool {
    let base = root.join(EXTERNAL_BASE_DIR);
    let Ok(entries) = std::fs::read_dir(&base) else {
        return false;
    };
    let mut any_found = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let dir_name = entry.file_name();
        let Some(mut project) = VersionedProject::parse_from_dir(&dir_name.to_string_lossy())
        else {
            continue;
        };
        // If any version of that project is known already, don't bother.
        if workspace.find_path_by_project(&project.project).is_none() {
            any_found = true;
            project.stratum = Stratum::DirectoryFound;
            workspace.project_location.insert(project, path);
        }
    }
    any_found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_project_from_dir() {
        let p = VersionedProject::parse_from_dir("zlib~1.3.1").unwrap();
        assert_eq!(p.project, "zlib");
        assert_eq!(p.version, "1.3.1");

        let p = VersionedProject::parse_from_dir("rules_cc+").unwrap();
        assert_eq!(p.project, "rules_cc");
        assert_eq!(p.version, "");

        assert!(VersionedProject::parse_from_dir("~odd").is_none());
        assert!(VersionedProject::parse_from_dir("").is_none());
    }

    #[test]
    fn lookup_ignores_at_and_version() {
        let mut ws = Workspace::default();
        ws.project_location.insert(
            VersionedProject {
                project: "absl".to_string(),
                version: "2024".to_string(),
                stratum: Stratum::WorkspaceDefined,
            },
            PathBuf::from("external/absl~2024"),
        );
        assert!(ws.find_path_by_project("absl").is_some());
        assert!(ws.find_path_by_project("@absl").is_some());
        assert!(ws.find_path_by_project("@abseil").is_none());
        assert!(ws.find_path_by_project("").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn workspace_files_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("MODULE.bazel"),
            r#"
module(name = "myproject")
bazel_dep(name = "zlib", version = "1.3.1")
"#,
        )
        .unwrap();
        // Model the bazel layout: bazel-out is a symlink into the output
        // base, and external/ sits three levels above its target.
        let out_base = dir.path().join("output-base");
        std::fs::create_dir_all(out_base.join("execroot/main/bazel-out")).unwrap();
        std::os::unix::fs::symlink(
            out_base.join("execroot/main/bazel-out"),
            dir.path().join("bazel-out"),
        )
        .unwrap();
        std::fs::create_dir_all(out_base.join("external/zlib~1.3.1")).unwrap();

        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Default::default());
        let ws = load_workspace(&mut session, dir.path()).expect("workspace");
        let path = ws.find_path_by_project("zlib").expect("zlib path");
        assert!(path.ends_with("external/zlib~1.3.1"));
    }

    #[test]
    fn missing_extraction_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("WORKSPACE"),
            "http_archive(name = \"nothere\")\n",
        )
        .unwrap();
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Default::default());
        let ws = load_workspace(&mut session, dir.path()).expect("workspace");
        assert!(ws.find_path_by_project("nothere").is_none());
    }
}
