//! Per-invocation state: output streams, command line flags, and the
//! stats that subsystems accumulate and the CLI prints at verbose level.
//! Passed around explicitly; there is no global state.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use crate::collections::{HashSet, IndexMap};

/// Output format for commands, influencing the table sink chosen by the
/// CLI. `Native` may also be interpreted per command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Native,
    SExpr,
    PList,
    Json,
    Csv,
    Graphviz,
}

/// Command line flags filled by the CLI, consumed by the tools. Some are
/// only relevant for some commands.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    pub verbose: u32,
    /// Print the AST instead of just rules.
    pub print_ast: bool,
    pub print_only_errors: bool,
    pub elaborate: bool,
    pub macro_expand: bool,
    /// Strict: emit removals even when the line carries a `# keep`.
    pub ignore_keep_comment: bool,
    /// For target-{srcs,hdrs,data}: only report files present on disk.
    pub only_physical_files: bool,
    /// 0 = don't follow; i32::MAX = exhaustive.
    pub recurse_dependency_depth: i32,
    pub output_format: OutputFormat,
    pub grep_regex: Option<String>,
    /// Custom flag attributes (`--//foo:bar`) consulted by `select()`.
    pub custom_flags: HashSet<String>,
    /// Debugging: parse just this file instead of a project.
    pub direct_filename: Option<String>,
}

/// Counters a subsystem updates while working; printed like
/// `42 packages (1.2 MiB) in 3.4ms`.
#[derive(Debug, Default)]
pub struct Stat {
    pub subject: &'static str,
    pub count: usize,
    pub bytes: Option<usize>,
    pub duration: Duration,
}

impl Stat {
    pub fn add_bytes(&mut self, bytes: usize) {
        *self.bytes.get_or_insert(0) += bytes;
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.count, self.subject)?;
        if let Some(bytes) = self.bytes {
            write!(f, " ({:.2} MiB)", bytes as f64 / (1024.0 * 1024.0))?;
        }
        write!(f, " in {:.2?}", self.duration)
    }
}

/// Output streams plus flags plus stats. The `out` stream carries the
/// primary result (tables, edit scripts); `info` carries diagnostics and
/// is also where errors go.
pub struct Session<'a> {
    out: &'a mut dyn Write,
    info: &'a mut dyn Write,
    flags: Flags,
    stats: IndexMap<&'static str, Stat>,
}

impl<'a> Session<'a> {
    pub fn new(out: &'a mut dyn Write, info: &'a mut dyn Write, flags: Flags) -> Self {
        Self {
            out,
            info,
            flags,
            stats: IndexMap::default(),
        }
    }

    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    pub fn info(&mut self) -> &mut dyn Write {
        &mut *self.info
    }

    // Currently no dedicated error stream; errors go to info.
    pub fn error(&mut self) -> &mut dyn Write {
        &mut *self.info
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    pub fn verbose(&self) -> bool {
        self.flags.verbose > 0
    }

    /// Stat to fill/update, registered on first use. Key order of first
    /// registration is preserved for printing.
    pub fn stats_for(&mut self, subsystem: &'static str, subject: &'static str) -> &mut Stat {
        self.stats.entry(subsystem).or_insert_with(|| Stat {
            subject,
            ..Stat::default()
        })
    }

    pub fn stat_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stats.keys().copied()
    }

    pub fn stat(&self, subsystem: &str) -> Option<&Stat> {
        self.stats.get(subsystem)
    }
}
