//! The built-in function table: `$(subst ...)`, `$(patsubst ...)`, `$(filter ...)`,
//! etc. Dispatch is a plain match over the function name rather than an open-class registry,
//! since the set of built-in functions is fixed and known at compile time.

use std::path::Path;

use crate::context::Context;
use crate::error::MakeError;
use crate::eval::{self, split_words, EvalCtx, EvalHost};
use crate::expr::Expr;
use crate::vars::Origin;

/// Expands each of `args` eagerly. Most functions want this; the few that need lazy/short-circuit
/// evaluation (`if`, `or`, `and`, `foreach`, `call`) expand their arguments themselves.
fn expand_all(args: &[Expr], ctx: &EvalCtx, host: &mut dyn EvalHost) -> Result<Vec<String>, MakeError> {
    args.iter().map(|a| eval::expand(a, ctx, host)).collect()
}

fn arity_error(name: &str, got: usize, expected: &str) -> MakeError {
    MakeError::new(
        format!("$({name} ...) expects {expected} argument(s), got {got}."),
        Context::new(),
    )
}

pub fn call(name: &str, args: &[Expr], ctx: &EvalCtx, host: &mut dyn EvalHost) -> Result<String, MakeError> {
    match name {
        "subst" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 3 {
                return Err(arity_error(name, a.len(), "3"));
            }
            Ok(a[2].replace(&a[0], &a[1]))
        }
        "patsubst" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 3 {
                return Err(arity_error(name, a.len(), "3"));
            }
            Ok(split_words(&a[2])
                .iter()
                .map(|w| patsubst_one(&a[0], &a[1], w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "strip" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(",")).join(" "))
        }
        "findstring" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            Ok(if a[1].contains(&a[0]) { a[0].clone() } else { String::new() })
        }
        "filter" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            let patterns = split_words(&a[0]);
            Ok(split_words(&a[1])
                .into_iter()
                .filter(|w| patterns.iter().any(|p| pattern_matches(p, w)))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "filter-out" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            let patterns = split_words(&a[0]);
            Ok(split_words(&a[1])
                .into_iter()
                .filter(|w| !patterns.iter().any(|p| pattern_matches(p, w)))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "sort" => {
            let a = expand_all(args, ctx, host)?;
            let mut words: Vec<String> = split_words(&a.join(",")).iter().map(|s| s.to_string()).collect();
            words.sort();
            words.dedup();
            Ok(words.join(" "))
        }
        "word" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            let n: usize = a[0]
                .trim()
                .parse()
                .map_err(|_| MakeError::new(format!("$(word ...): '{}' is not a number.", a[0]), Context::new()))?;
            if n == 0 {
                return Err(MakeError::new("$(word ...): index must be >= 1.", Context::new()));
            }
            Ok(split_words(&a[1]).get(n - 1).map(|s| s.to_string()).unwrap_or_default())
        }
        "wordlist" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 3 {
                return Err(arity_error(name, a.len(), "3"));
            }
            let start: usize = a[0].trim().parse().unwrap_or(1).max(1);
            let end: usize = a[1].trim().parse().unwrap_or(0);
            let words = split_words(&a[2]);
            if start > words.len() || end < start {
                return Ok(String::new());
            }
            Ok(words[(start - 1)..end.min(words.len())].join(" "))
        }
        "words" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(",")).len().to_string())
        }
        "firstword" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(",")).first().map(|s| s.to_string()).unwrap_or_default())
        }
        "lastword" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(",")).last().map(|s| s.to_string()).unwrap_or_default())
        }
        "dir" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(",")).iter().map(|w| dir_part(w)).collect::<Vec<_>>().join(" "))
        }
        "notdir" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(","))
                .iter()
                .map(|w| notdir_part(w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "suffix" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(","))
                .iter()
                .filter_map(|w| suffix_part(w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "basename" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(","))
                .iter()
                .map(|w| basename_part(w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "addsuffix" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            Ok(split_words(&a[1])
                .iter()
                .map(|w| format!("{}{}", w, a[0]))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "addprefix" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            Ok(split_words(&a[1])
                .iter()
                .map(|w| format!("{}{}", a[0], w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "join" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 2 {
                return Err(arity_error(name, a.len(), "2"));
            }
            let left = split_words(&a[0]);
            let right = split_words(&a[1]);
            let n = left.len().max(right.len());
            Ok((0..n)
                .map(|i| format!("{}{}", left.get(i).copied().unwrap_or(""), right.get(i).copied().unwrap_or("")))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "wildcard" => {
            let a = expand_all(args, ctx, host)?;
            let mut matches = Vec::new();
            for pattern in split_words(&a.join(",")) {
                match glob::glob(pattern) {
                    Ok(paths) => {
                        for p in paths.flatten() {
                            matches.push(p.display().to_string());
                        }
                    }
                    Err(_) => {
                        if Path::new(pattern).exists() {
                            matches.push(pattern.to_string());
                        }
                    }
                }
            }
            Ok(matches.join(" "))
        }
        "realpath" => {
            let a = expand_all(args, ctx, host)?;
            Ok(split_words(&a.join(","))
                .iter()
                .filter_map(|w| std::fs::canonicalize(w).ok().map(|p| p.display().to_string()))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "abspath" => {
            let a = expand_all(args, ctx, host)?;
            let cwd = std::env::current_dir().unwrap_or_default();
            Ok(split_words(&a.join(","))
                .iter()
                .map(|w| abspath_part(&cwd, w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "if" => {
            if args.is_empty() || args.len() > 3 {
                return Err(arity_error(name, args.len(), "2 or 3"));
            }
            let cond = eval::expand(&args[0], ctx, host)?;
            if !cond.trim().is_empty() {
                args.get(1).map(|e| eval::expand(e, ctx, host)).transpose().map(|o| o.unwrap_or_default())
            } else {
                args.get(2).map(|e| eval::expand(e, ctx, host)).transpose().map(|o| o.unwrap_or_default())
            }
        }
        "or" => {
            for arg in args {
                let v = eval::expand(arg, ctx, host)?;
                if !v.trim().is_empty() {
                    return Ok(v);
                }
            }
            Ok(String::new())
        }
        "and" => {
            let mut last = String::new();
            for arg in args {
                last = eval::expand(arg, ctx, host)?;
                if last.trim().is_empty() {
                    return Ok(String::new());
                }
            }
            Ok(last)
        }
        "foreach" => {
            if args.len() != 3 {
                return Err(arity_error(name, args.len(), "3"));
            }
            let var_name = eval::expand(&args[0], ctx, host)?;
            let list = eval::expand(&args[1], ctx, host)?;
            let mut out = Vec::new();
            for word in split_words(&list) {
                let mut loop_vars = ctx.vars.clone();
                loop_vars.set_literal(var_name.trim(), word, Origin::Automatic);
                let loop_ctx = EvalCtx {
                    vars: &loop_vars,
                    auto: ctx.auto,
                };
                out.push(eval::expand(&args[2], &loop_ctx, host)?);
            }
            Ok(out.join(" "))
        }
        "call" => {
            if args.is_empty() {
                return Err(arity_error(name, 0, "at least 1"));
            }
            let func_name = eval::expand(&args[0], ctx, host)?;
            let mut call_vars = ctx.vars.clone();
            call_vars.set_literal("0", func_name.trim(), Origin::Automatic);
            for (i, arg) in args[1..].iter().enumerate() {
                let v = eval::expand(arg, ctx, host)?;
                call_vars.set_literal(&(i + 1).to_string(), v, Origin::Automatic);
            }
            let call_ctx = EvalCtx {
                vars: &call_vars,
                auto: ctx.auto,
            };
            let var = ctx.vars.get(func_name.trim());
            match &var.value {
                crate::vars::Value::Literal(s) => Ok(s.clone()),
                crate::vars::Value::Expr(e) => eval::expand(e, &call_ctx, host),
            }
        }
        "eval" => {
            let text = eval::expand(&join_args(args, ctx, host)?, ctx, host)?;
            host.eval_statements(&text, &Context::new())?;
            Ok(String::new())
        }
        "origin" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 1 {
                return Err(arity_error(name, a.len(), "1"));
            }
            Ok(host.origin_of(ctx.vars, a[0].trim()).as_str().to_string())
        }
        "flavor" => {
            let a = expand_all(args, ctx, host)?;
            if a.len() != 1 {
                return Err(arity_error(name, a.len(), "1"));
            }
            Ok(if !ctx.vars.contains(a[0].trim()) {
                "undefined".to_string()
            } else {
                match ctx.vars.get(a[0].trim()).flavor {
                    crate::vars::Flavor::Simple => "simple",
                    crate::vars::Flavor::Recursive => "recursive",
                    crate::vars::Flavor::Appending => "recursive",
                    crate::vars::Flavor::Conditional => "recursive",
                }
                .to_string()
            })
        }
        "shell" => {
            let a = expand_all(args, ctx, host)?;
            host.shell(&a.join(","))
        }
        "error" => {
            let a = expand_all(args, ctx, host)?;
            Err(MakeError::new(a.join(","), Context::new()))
        }
        "warning" => {
            let a = expand_all(args, ctx, host)?;
            eprintln!("make: WARN  | {}", a.join(","));
            Ok(String::new())
        }
        "info" => {
            let a = expand_all(args, ctx, host)?;
            println!("{}", a.join(","));
            Ok(String::new())
        }
        _ => Err(MakeError::new(format!("Unknown function '{}'.", name), Context::new())),
    }
}

/// `$(eval ...)` and a couple of others logically take one combined argument even if the user
/// wrote a literal comma in it; GNU make re-joins a function's arguments with commas when the
/// function only cares about "the text", which is what callers pass through here.
fn join_args(args: &[Expr], _ctx: &EvalCtx, _host: &mut dyn EvalHost) -> Result<Expr, MakeError> {
    let mut joined = Expr::empty();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            joined.segments.push(crate::expr::Segment::Literal(",".to_string()));
        }
        joined.segments.extend(a.segments.clone());
    }
    Ok(joined)
}

fn patsubst_one(pattern: &str, replacement: &str, word: &str) -> String {
    match pattern.find('%') {
        None => {
            if word == pattern {
                replacement.to_string()
            } else {
                word.to_string()
            }
        }
        Some(i) => {
            let prefix = &pattern[..i];
            let suffix = &pattern[i + 1..];
            if let Some(stem) = word.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(suffix)) {
                match replacement.find('%') {
                    Some(j) => format!("{}{}{}", &replacement[..j], stem, &replacement[j + 1..]),
                    None => replacement.to_string(),
                }
            } else {
                word.to_string()
            }
        }
    }
}

/// Matches a single `%`-pattern (or plain literal) against `word`, as used by `$(filter ...)`.
pub fn pattern_matches(pattern: &str, word: &str) -> bool {
    match pattern.find('%') {
        None => pattern == word,
        Some(i) => {
            let prefix = &pattern[..i];
            let suffix = &pattern[i + 1..];
            word.starts_with(prefix) && word.len() >= prefix.len() + suffix.len() && word.ends_with(suffix)
        }
    }
}

fn dir_part(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => "./".to_string(),
    }
}

fn notdir_part(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[i + 1..].to_string(),
        None => path.to_string(),
    }
}

fn suffix_part(path: &str) -> Option<String> {
    let base = notdir_part(path);
    base.rfind('.').map(|i| base[i..].to_string())
}

fn basename_part(path: &str) -> String {
    match path.rfind('.') {
        Some(i) if path[i..].find('/').is_none() => path[..i].to_string(),
        _ => path.to_string(),
    }
}

fn abspath_part(cwd: &std::path::Path, path: &str) -> String {
    let p = std::path::Path::new(path);
    let joined = if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };

    let mut out = Vec::new();
    for component in joined.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str().to_string_lossy().to_string()),
        }
    }
    out.join("/").replacen("//", "/", 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{expand, AutoVars};
    use crate::expr::parse;
    use crate::vars::Vars;

    struct NullHost;
    impl EvalHost for NullHost {
        fn shell(&mut self, cmd: &str) -> Result<String, MakeError> {
            Ok(format!("ran:{cmd}"))
        }
        fn eval_statements(&mut self, _text: &str, _context: &Context) -> Result<(), MakeError> {
            Ok(())
        }
    }

    fn expand_str(s: &str, vars: &Vars) -> String {
        let expr = parse(s, &Context::new()).unwrap();
        let ctx = EvalCtx { vars, auto: None };
        expand(&expr, &ctx, &mut NullHost).unwrap()
    }

    fn expand_err(s: &str, vars: &Vars) -> String {
        let expr = parse(s, &Context::new()).unwrap();
        let ctx = EvalCtx { vars, auto: None };
        match expand(&expr, &ctx, &mut NullHost) {
            Err(e) => e.msg,
            Ok(v) => panic!("expected error, got {v:?}"),
        }
    }

    #[test]
    fn subst_replaces_all_occurrences() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(subst ee,EE,feet on the street)", &vars), "fEEt on the strEEt");
    }

    #[test]
    fn patsubst_rewrites_each_word_by_stem() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(patsubst %.c,%.o,foo.c bar.c baz.h)", &vars), "foo.o bar.o baz.h");
    }

    #[test]
    fn filter_and_filter_out_use_pattern_matching() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(filter %.c %.h,foo.c foo.o foo.h)", &vars), "foo.c foo.h");
        assert_eq!(expand_str("$(filter-out %.o,foo.c foo.o foo.h)", &vars), "foo.c foo.h");
    }

    #[test]
    fn sort_orders_and_dedupes() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(sort foo bar foo baz)", &vars), "bar baz foo");
    }

    #[test]
    fn word_wordlist_words_firstword_lastword() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(word 2,one two three)", &vars), "two");
        assert_eq!(expand_str("$(wordlist 2,3,one two three four)", &vars), "two three");
        assert_eq!(expand_str("$(words one two three)", &vars), "3");
        assert_eq!(expand_str("$(firstword one two three)", &vars), "one");
        assert_eq!(expand_str("$(lastword one two three)", &vars), "three");
    }

    #[test]
    fn word_rejects_zero_index() {
        let vars = Vars::new();
        let err = expand_err("$(word 0,one two)", &vars);
        assert!(err.contains(">= 1"));
    }

    #[test]
    fn dir_notdir_suffix_basename_split_paths() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(dir a/b.c d.c)", &vars), "a/ ./");
        assert_eq!(expand_str("$(notdir a/b.c d.c)", &vars), "b.c d.c");
        assert_eq!(expand_str("$(suffix a/b.c d)", &vars), ".c");
        assert_eq!(expand_str("$(basename a/b.c d.tar.gz)", &vars), "a/b d.tar");
    }

    #[test]
    fn addprefix_addsuffix_join() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(addprefix src/,a.c b.c)", &vars), "src/a.c src/b.c");
        assert_eq!(expand_str("$(addsuffix .c,a b)", &vars), "a.c b.c");
        assert_eq!(expand_str("$(join a b c,1 2)", &vars), "a1 b2 c");
    }

    #[test]
    fn if_or_and_short_circuit() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(if foo,yes,no)", &vars), "yes");
        assert_eq!(expand_str("$(if ,yes,no)", &vars), "no");
        assert_eq!(expand_str("$(or ,,third)", &vars), "third");
        assert_eq!(expand_str("$(and a,b,c)", &vars), "c");
        assert_eq!(expand_str("$(and a,,c)", &vars), "");
    }

    #[test]
    fn foreach_binds_loop_variable_per_word() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(foreach x,a b c,[$(x)])", &vars), "[a] [b] [c]");
    }

    #[test]
    fn call_binds_positional_arguments() {
        let mut vars = Vars::new();
        vars.set_recursive("reverse", parse("$(2) $(1)", &Context::new()).unwrap(), Origin::File);
        assert_eq!(expand_str("$(call reverse,first,second)", &vars), "second first");
    }

    #[test]
    fn origin_and_flavor_report_variable_state() {
        let mut vars = Vars::new();
        vars.set_literal("SIMPLE", "x", Origin::File);
        vars.set_recursive("RECUR", parse("$(SIMPLE)", &Context::new()).unwrap(), Origin::File);
        assert_eq!(expand_str("$(origin SIMPLE)", &vars), "file");
        assert_eq!(expand_str("$(origin UNSET)", &vars), "undefined");
        assert_eq!(expand_str("$(flavor SIMPLE)", &vars), "simple");
        assert_eq!(expand_str("$(flavor RECUR)", &vars), "recursive");
        assert_eq!(expand_str("$(flavor UNSET)", &vars), "undefined");
    }

    #[test]
    fn shell_delegates_to_host() {
        let vars = Vars::new();
        assert_eq!(expand_str("$(shell echo hi)", &vars), "ran:echo hi");
    }

    #[test]
    fn error_function_propagates_message() {
        let vars = Vars::new();
        let err = expand_err("$(error something broke)", &vars);
        assert_eq!(err, "something broke");
    }

    #[test]
    fn automatic_variable_lookup_is_unaffected_by_functions() {
        let vars = Vars::new();
        let auto = AutoVars {
            target: "out.o".to_string(),
            first_prereq: Some("out.c".to_string()),
            all_prereqs: vec!["out.c".to_string()],
            all_prereqs_raw: vec!["out.c".to_string()],
            newer_prereqs: vec![],
            stem: Some("out".to_string()),
        };
        let ctx = EvalCtx { vars: &vars, auto: Some(&auto) };
        let expr = parse("$(notdir $@)", &Context::new()).unwrap();
        assert_eq!(expand(&expr, &ctx, &mut NullHost).unwrap(), "out.o");
    }
}
