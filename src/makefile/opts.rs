//! Run options derived from the CLI (or from a `MAKEFLAGS`-driven sub-make).

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct Opts {
    /// `-B`/`--always-make`: unconditionally remake all targets.
    pub always_make: bool,

    /// `-i`/`--ignore-errors`: ignore errors from recipes.
    pub ignore_errors: bool,

    /// `-n`/`--just-print`/`--dry-run`/`--recon`: print commands without executing most of them.
    pub just_print: bool,

    /// `-o`/`--old-file`/`--assume-old`: consider FILE very old and never remake it.
    pub old_file: Vec<String>,

    /// `-W`/`--what-if`/`--new-file`/`--assume-new`: consider FILE very new ("what if" changed).
    pub new_file: Vec<String>,

    /// `-k`/`--keep-going`: continue building independent subgraphs after a failure.
    pub keep_going: bool,

    /// `-s`/`--silent`: suppress command echo (and implicitly directory banners).
    pub silent: bool,

    /// `-j`/`--jobs N`: maximum number of concurrent recipe commands.
    pub jobs: usize,

    /// `-w`/`--print-directory`/`--no-print-directory`: emit Entering/Leaving directory banners.
    pub print_directory: bool,

    /// `-d`: verbose debug logging of engine internals.
    pub verbose: bool,

    /// `--debug-log PATH`: redirect verbose debug logging to a file instead of stderr.
    pub debug_log: Option<PathBuf>,

    /// `--trace-log PATH`: enable the NDJSON event tracer, writing to PATH.
    pub trace_log: Option<PathBuf>,

    /// `MAKELEVEL`, incremented for sub-makes.
    pub make_level: u32,

    /// The `-f`/`--file`/`--makefile` list; empty means "search for a default makefile name".
    pub makefiles: Vec<String>,
}

impl Opts {
    /// Renders the subset of options that must be re-derived by a sub-make from `MAKEFLAGS`, in
    /// the same terse short-flag-then-long-flag style `pymake.command.main` builds.
    pub fn to_makeflags(&self) -> String {
        let mut short_flags = String::new();
        let mut long_flags: Vec<String> = Vec::new();

        if self.keep_going {
            short_flags.push('k');
        }
        if self.print_directory {
            short_flags.push('w');
        }
        if self.silent {
            short_flags.push('s');
        }
        if self.just_print {
            short_flags.push('n');
        }
        if self.verbose {
            short_flags.push('d');
        }
        if let Some(path) = &self.debug_log {
            long_flags.push(format!("--debug-log={}", path.display()));
        }
        if self.jobs != 1 {
            long_flags.push(format!("-j{}", self.jobs));
        }
        if let Some(path) = &self.trace_log {
            long_flags.push(format!("--trace-log={}", path.display()));
        }

        let mut out = if short_flags.is_empty() {
            String::new()
        } else {
            format!("-{short_flags}")
        };
        if !long_flags.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&long_flags.join(" "));
        }
        out
    }
}
