//! girder — navigation and refactoring assistant for Bazel workspaces.

mod commands;
mod output;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use girder_analyzer::{Flags, OutputFormat, Session};

use crate::commands::{run_cli_command, CliStatus};

#[derive(Parser)]
#[command(
    name = "girder",
    version,
    about = "Navigation and refactoring assistant for Bazel BUILD files.",
    after_help = "\
Commands (unique prefix sufficient):
  == Parsing ==
  print            Print rules matching pattern (-e elaborate, -a AST, -g grep)
  parse            Parse all BUILD files from pattern; emit parse errors

  == Extract facts ==  (choose output with -f)
  workspace        External projects from WORKSPACE/MODULE.bazel
  list-packages    BUILD files and the packages they define
  list-targets     Locations, rule types and names of targets
  list-leafs       Targets nothing else depends on
  aliased-by       Targets and the aliases pointing at them
  depends-on       Targets and their dependencies
  has-dependents   Targets and what depends on them
  lib-headers      Headers provided by cc_library()s
  genrule-outputs  Files written by genrule()s

  == Tools ==
  dwyu             Depend-on-what-you-use: emit buildozer edit script
  canonicalize     Emit rename edits for non-canonical dependency labels
  compile-flags    Emit compile flags (experimental)
  compilation-db   Emit a compilation database (experimental)

Custom select() flags such as --//foo:bar are picked up and used by
elaboration."
)]
struct Cli {
    /// Change to this project directory first.
    #[arg(short = 'C', value_name = "DIR")]
    chdir: Option<PathBuf>,

    /// Quiet: don't print info messages to stderr.
    #[arg(short = 'q')]
    quiet: bool,

    /// Emit primary output to this file instead of stdout.
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format: native, s-expr, plist, json, csv, graphviz
    /// (unique prefix is enough).
    #[arg(short = 'f', value_name = "FORMAT")]
    format: Option<String>,

    /// Follow dependencies recursively; an optional value limits the
    /// nesting depth (-r=2 follows two levels, bare -r to the end).
    #[arg(
        short = 'r',
        value_name = "DEPTH",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "-1"
    )]
    recurse: Option<i32>,

    /// Verbose; print stats. Repeat for more detail.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Grep: only report things matching this regex.
    #[arg(short = 'g', value_name = "REGEX")]
    grep: Option<String>,

    /// Case insensitive grep (with -g).
    #[arg(short = 'i')]
    ignore_case: bool,

    /// Elaborate: expand variables, concatenations, glob() etc.
    #[arg(short = 'e')]
    elaborate: bool,

    /// Expand macros from the macro library while elaborating.
    #[arg(short = 'm')]
    macro_expand: bool,

    /// Print the AST instead of just the rules.
    #[arg(short = 'a')]
    print_ast: bool,

    /// Only print files with parse errors.
    #[arg(short = 'E')]
    only_errors: bool,

    /// Strict: emit dependency removals even when the line has a
    /// `# keep` comment.
    #[arg(short = 'k')]
    strict_keep: bool,

    /// Debugging: parse just this file (with 'parse' or 'print').
    #[arg(short = 'F', value_name = "FILE")]
    direct_file: Option<String>,

    /// Command keyword followed by bazel target patterns.
    #[arg(value_name = "COMMAND|PATTERN")]
    args: Vec<String>,
}

const FORMAT_NAMES: [(&str, OutputFormat); 6] = [
    ("csv", OutputFormat::Csv),
    ("graphviz", OutputFormat::Graphviz),
    ("json", OutputFormat::Json),
    ("native", OutputFormat::Native),
    ("plist", OutputFormat::PList),
    ("s-expr", OutputFormat::SExpr),
];

fn parse_format(word: &str) -> Result<OutputFormat> {
    let matches: Vec<_> = FORMAT_NAMES
        .iter()
        .filter(|(name, _)| name.starts_with(word))
        .collect();
    match matches.as_slice() {
        [(_, format)] => Ok(*format),
        _ => anyhow::bail!("invalid -f format '{word}'"),
    }
}

// Bazel-style custom flags (--//foo:bar) confuse regular flag parsing;
// fish them out first, like bazel users expect.
fn extract_custom_flags(args: Vec<String>) -> (Vec<String>, Vec<String>) {
    let (custom, rest): (Vec<String>, Vec<String>) =
        args.into_iter().partition(|a| a.starts_with("--//"));
    let custom = custom
        .into_iter()
        .map(|a| a.trim_start_matches("--").to_string())
        .collect();
    (custom, rest)
}

fn run() -> Result<u8> {
    let (custom_flags, args) = extract_custom_flags(std::env::args().collect());
    let cli = Cli::parse_from(args);

    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("Can't change into directory {}", dir.display()))?;
    }

    let mut grep_regex = cli.grep.clone();
    if let Some(re) = &mut grep_regex {
        if cli.ignore_case {
            re.insert_str(0, "(?i)");
        }
        *re = format!("({re})");
    }

    let mut flags = Flags {
        verbose: cli.verbose as u32,
        print_ast: cli.print_ast,
        print_only_errors: cli.only_errors,
        elaborate: cli.elaborate,
        macro_expand: cli.macro_expand,
        ignore_keep_comment: cli.strict_keep,
        only_physical_files: false,
        recurse_dependency_depth: match cli.recurse {
            None => 0,
            Some(-1) => i32::MAX, // bare -r: follow to the end
            Some(n) => n,
        },
        output_format: OutputFormat::Native,
        grep_regex,
        custom_flags: custom_flags.into_iter().collect(),
        direct_filename: cli.direct_file.clone(),
    };
    if let Some(format) = &cli.format {
        flags.output_format = parse_format(format)?;
    }

    let mut stdout = std::io::stdout();
    let mut file_out;
    let out: &mut dyn Write = match &cli.output {
        Some(path) if path.as_os_str() != "-" => {
            file_out = File::create(path)
                .with_context(|| format!("Could not open '{}'", path.display()))?;
            &mut file_out
        }
        _ => &mut stdout,
    };

    let mut stderr = std::io::stderr();
    let mut null_sink = std::io::sink();
    let info: &mut dyn Write = if cli.quiet {
        &mut null_sink
    } else {
        &mut stderr
    };

    let verbose = flags.verbose;
    let mut session = Session::new(out, info, flags);
    let status = run_cli_command(&mut session, &cli.args);

    if verbose > 0 {
        // Explicitly asked for: printed even with -q, so to stderr
        // directly instead of the (possibly null) info stream.
        let stats: Vec<String> = session
            .stat_keys()
            .filter_map(|key| session.stat(key).map(|s| format!("{key} {s}")))
            .collect();
        for line in stats {
            eprintln!("{line}");
        }
    }

    if status == CliStatus::ExitCommandlineClarification {
        eprintln!("\nRun with --help for usage.");
    }
    Ok(status as u8)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(CliStatus::ExitFailure as u8)
        }
    }
}
