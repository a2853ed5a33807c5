//! This module provides the `clap`-based `Args` struct. This is also used for invocations of
//! sub-make using `$(MAKE)`, since `Opts::to_makeflags` renders a `MAKEFLAGS` string this same
//! parser can read back in (see `parse_makeflags`).

use std::path::PathBuf;

use clap::Parser;
use const_format::formatcp;

use omake::Opts;

/// Represents the `clap`-based arguments provided by this binary.
#[derive(Clone, Debug, Parser)]
#[clap(
    name = "make (oxidized)",
    version,
    about,
    after_help = formatcp!(
        "License:  {}\nSource:   {}", env!("CARGO_PKG_LICENSE"), env!("CARGO_PKG_REPOSITORY")
    ),
)]
pub struct Args {
    /// Target(s) (if none specified, use the default goal) and `NAME=VALUE` variable overrides,
    /// interleaved in any order.
    #[arg()]
    pub targets: Vec<String>,

    /// Read FILE as a makefile. May be given more than once; each is read in order.
    #[arg(short, long, visible_alias("makefile"), value_name = "FILE")]
    pub file: Vec<String>,

    /// Ignored for compatibility.
    #[arg(short = 'b')]
    pub b: bool,

    /// Ignored for compatibility.
    #[arg(short = 'm')]
    pub m: Option<Option<String>>,

    /// Unconditionally make all targets.
    #[arg(short = 'B', long)]
    pub always_make: bool,

    /// Change to DIR before doing anything.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub directory: Vec<String>,

    /// Ignore errors from recipes.
    #[arg(short, long)]
    pub ignore_errors: bool,

    /// Keep going as far as possible after an error in an independent subgraph.
    #[arg(short, long)]
    pub keep_going: bool,

    /// Don't execute recipes; just print them.
    #[arg(
        short = 'n',
        long = "just-print",
        visible_alias("dry-run"),
        visible_alias("recon")
    )]
    pub just_print: bool,

    /// Consider FILE to be very old and do not remake it.
    #[arg(short, long, value_name = "FILE", visible_alias("assume-old"))]
    pub old_file: Vec<String>,

    /// Consider FILE to be very new to simulate "what if" it changed.
    #[arg(
        short = 'W',
        long = "what-if",
        value_name = "FILE",
        visible_alias("new-file"),
        visible_alias("assume-new")
    )]
    pub new_file: Vec<String>,

    /// Don't echo recipe commands before running them.
    #[arg(short, long)]
    pub silent: bool,

    /// Allow N recipe commands to run at once; omitted/0 means no limit is enforced beyond 1.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Print a message entering/leaving each working directory (on by default for sub-makes).
    #[arg(short = 'w', long, overrides_with = "no_print_directory")]
    pub print_directory: bool,

    /// Turn off `--print-directory`.
    #[arg(long)]
    pub no_print_directory: bool,

    /// Print verbose debug information about internal engine state.
    #[arg(short = 'd')]
    pub verbose: bool,

    /// Redirect `-d` debug output to PATH instead of stderr.
    #[arg(long, value_name = "PATH")]
    pub debug_log: Option<PathBuf>,

    /// Write an NDJSON event trace of the build to PATH.
    #[arg(long, value_name = "PATH")]
    pub trace_log: Option<PathBuf>,

    /// Print software license.
    #[arg(long)]
    pub license: bool,
}

impl Args {
    /// Splits `targets` into actual goal names and `NAME=VALUE` command-line variable overrides,
    /// the same grammar GNU make itself uses for trailing positional arguments.
    pub fn split_targets(&self) -> (Vec<String>, Vec<(String, String)>) {
        let mut goals = Vec::new();
        let mut overrides = Vec::new();
        for arg in &self.targets {
            match arg.split_once('=') {
                Some((name, value)) if is_identifier(name) => {
                    overrides.push((name.to_string(), value.to_string()));
                }
                _ => goals.push(arg.clone()),
            }
        }
        (goals, overrides)
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl From<Args> for Opts {
    fn from(args: Args) -> Self {
        Self {
            always_make: args.always_make,
            ignore_errors: args.ignore_errors,
            just_print: args.just_print,
            old_file: args.old_file,
            new_file: args.new_file,
            keep_going: args.keep_going,
            silent: args.silent,
            jobs: args.jobs.unwrap_or(1).max(1),
            print_directory: args.print_directory && !args.no_print_directory,
            verbose: args.verbose,
            debug_log: args.debug_log,
            trace_log: args.trace_log,
            make_level: 0,
            makefiles: args.file,
        }
    }
}

/// Parses the space-separated short/long flag string a sub-make inherits via the `MAKEFLAGS`
/// environment variable (the inverse of `Opts::to_makeflags`), applying it onto `opts` before any
/// of this invocation's own CLI flags (which still take precedence, matching GNU make's rule that
/// explicit flags on the command line override inherited ones).
pub fn apply_makeflags(opts: &mut Opts, makeflags: &str) {
    for token in makeflags.split_whitespace() {
        if let Some(rest) = token.strip_prefix("--debug-log=") {
            opts.debug_log = Some(PathBuf::from(rest));
        } else if let Some(rest) = token.strip_prefix("--trace-log=") {
            opts.trace_log = Some(PathBuf::from(rest));
        } else if let Some(rest) = token.strip_prefix("-j") {
            if let Ok(n) = rest.parse() {
                opts.jobs = n;
            }
        } else if let Some(flags) = token.strip_prefix('-') {
            if flags.starts_with('-') {
                continue;
            }
            for c in flags.chars() {
                match c {
                    'k' => opts.keep_going = true,
                    'w' => opts.print_directory = true,
                    's' => opts.silent = true,
                    'n' => opts.just_print = true,
                    'd' => opts.verbose = true,
                    _ => {}
                }
            }
        }
    }
}
