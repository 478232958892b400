//! Workspace analysis for Bazel-style BUILD files.
//!
//! Layered on the `girder-parser` front end: label and pattern types,
//! workspace resolution, the lazy project store, constant elaboration
//! with macro expansion, the dependency graph, the header-provider
//! index, and the tools reading from them (DWYU, canonicalizer,
//! compile-flags emission). Output goes through the [`TableSink`] and
//! [`EditSink`](edit::EditSink) abstractions; rendering is the CLI's
//! business.

pub mod aliases;
pub mod canonicalize;
pub mod collections;
pub mod compiledb;
pub mod dwyu;
pub mod edit;
pub mod elaborate;
pub mod fsutil;
pub mod glob;
pub mod graph;
pub mod headers;
pub mod label;
pub mod macros;
pub mod pattern;
pub mod project;
pub mod query;
pub mod session;
pub mod table;
pub mod workspace;

pub use crate::edit::{Edit, EditKind, EditSink};
pub use crate::elaborate::{elaborate, elaborate_package, ElaborationOptions};
pub use crate::graph::{build_dependency_graph, DependencyGraph};
pub use crate::label::{Package, Target};
pub use crate::pattern::{Pattern, PatternBundle, TargetMatcher};
pub use crate::project::{print_project, ParsedBuildFile, Project};
pub use crate::session::{Flags, OutputFormat, Session};
pub use crate::table::TableSink;
pub use crate::workspace::{load_workspace, Workspace};
