//! # omake (Oxidized Make)
//!
//! This is an implementation of `make`, written in Rust. The goal is to provide an implementation
//! of `make` that can be used to process both BSD and GNU makefiles.

mod args;

use std::env;
use std::fs;
use std::path::PathBuf;

use clap::Parser;

use args::Args;

use omake::{init_debug_log, Context, DefaultLogger, FileTracer, Logger, Makefile, Opts, Scheduler, Vars};

/// An ordered list of filenames used to search for a makefile.
const MAKEFILE_SEARCH: [&str; 6] = [
    "makefile",
    "Makefile",
    "BSDmakefile",
    "BSDMakefile",
    "GNUmakefile",
    "GNUMakefile",
];

const LICENSE: &str = include_str!("../../../LICENSE");

/// Search for a makefile to execute.
///
/// We have to take into account that the file system may be case-insensitive. Ideally, we want to
/// return the proper casing of the makefile (so the file is properly reported when logging), and we
/// also want to support weirdly-cased makefiles on case-insensitive file systems, such as
/// `MAKEFILE`. To that end, we first get a directory listing and try to find makefiles from that
/// list, which would ensure the proper casing is returned. As a fallback, we then iterate through
/// the `MAKEFILE_SEARCH` list and try to read them from the file system, which will do a
/// case-insensitive match on case-insensitive file systems, and therefore would return improper
/// casing (e.g., `MAKEFILE` would be returned as `makefile`, since that would be the first match).
fn find_makefile() -> Option<PathBuf> {
    if let Some(cwd_files) = fs::read_dir("./").ok().map(|rd| {
        rd.flatten()
            .filter_map(|rd| rd.path().file_name().map(PathBuf::from))
            .collect::<Vec<_>>()
    }) {
        for file in MAKEFILE_SEARCH {
            let f = PathBuf::from(file);
            if cwd_files.contains(&f) && f.is_file() {
                return Some(f);
            }
        }
    }

    for file in MAKEFILE_SEARCH {
        let f = PathBuf::from(file);
        if f.is_file() {
            return Some(f);
        }
    }

    None
}

/// Print an error message and exit with code 2.
fn exit_with(msg: impl AsRef<str>, logger: &DefaultLogger, context: Option<&Context>) -> ! {
    logger.error(msg, context);
    std::process::exit(2)
}

fn main() {
    let args = Args::parse();
    let logger = DefaultLogger {};

    if args.license {
        println!("{}", LICENSE);
        return;
    }

    // Change to another directory, if specified by `-C`. Banners here follow the same
    // `-w`/`-s`/`--no-print-directory` rules as the ones the scheduler prints per recipe command.
    let print_banners = args.print_directory && !args.no_print_directory && !args.silent;

    let original_dir = if args.directory.is_empty() {
        None
    } else {
        let cwd = env::current_dir().unwrap_or_else(|e| exit_with(format!("Failed to get cwd ({}).", e), &logger, None));
        let dir = args.directory.iter().fold(PathBuf::new(), |dir, d| dir.join(d));
        if print_banners {
            println!("make: Entering directory '{}'", dir.display());
        }
        env::set_current_dir(&dir).unwrap_or_else(|e| exit_with(format!("Chdir failed: {}.", e), &logger, None));
        Some(cwd)
    };

    let make_level: u32 = env::var("MAKELEVEL").ok().and_then(|v| v.parse().ok()).unwrap_or(0);

    let mut opts: Opts = args.clone().into();
    opts.make_level = make_level + 1;
    if opts.makefiles.is_empty() {
        if let Some(default) = find_makefile() {
            opts.makefiles = vec![default.display().to_string()];
        }
    }
    if let Ok(makeflags) = env::var("MAKEFLAGS") {
        // Inherited flags apply first; this invocation's own CLI flags (already folded into
        // `opts` above) still win for anything both specify, since `apply_makeflags` only ever
        // turns a flag *on* and never clears one the CLI already set.
        args::apply_makeflags(&mut opts, &makeflags);
    }

    init_debug_log(opts.verbose, opts.debug_log.as_deref());

    let tracer = opts.trace_log.clone().map(|path| Box::new(FileTracer::new(path)) as Box<_>);

    let (goals, overrides) = args.split_targets();
    let base_vars = Vars::from_environment();

    let mut makefile = match Makefile::load(opts, Box::new(DefaultLogger {}), base_vars, tracer, &overrides) {
        Err(e) => exit_with(e.msg, &logger, Some(&e.context)),
        Ok(m) => m,
    };

    let goals = if goals.is_empty() {
        match &makefile.default_goal {
            Some(g) => vec![g.clone()],
            None => exit_with("No targets specified and no makefile found.", &logger, None),
        }
    } else {
        goals
    };

    let result = Scheduler::new(makefile.opts.jobs, makefile.opts.keep_going).run(&mut makefile, &goals);

    if let Some(t) = &makefile.tracer {
        t.onmakefinish();
    }

    if let Err(e) = result {
        if let Some(cwd) = &original_dir {
            let _ = env::set_current_dir(cwd);
        }
        exit_with(e.msg, &logger, Some(&e.context));
    }

    if let Some(cwd) = original_dir {
        if print_banners {
            println!("make: Leaving directory '{}'", cwd.display());
        }
        env::set_current_dir(&cwd).unwrap_or_else(|e| exit_with(format!("Chdir failed: {}.", e), &logger, None));
    }
}
