//! Expression evaluation: turns a parsed [`Expr`] into a `String`, given a [`Vars`] environment
//! and, for recipe expansions, the current target's automatic-variable values.
//!
//! A handful of built-ins (`$(shell ...)`, `$(eval ...)`) need capabilities that live above this
//! layer — spawning a subprocess, or re-parsing and executing statements against the owning
//! makefile. Those capabilities are abstracted behind the [`EvalHost`] trait so `eval`/`functions`
//! never need to depend on the `makefile` module directly (see DESIGN.md).

use std::collections::HashSet;

use crate::context::Context;
use crate::error::MakeError;
use crate::expr::{Expr, Segment};
use crate::functions;
use crate::vars::Vars;

/// Automatic-variable inputs computed from the current `Target` at recipe-expansion time.
#[derive(Clone, Debug, Default)]
pub struct AutoVars {
    /// `$@`
    pub target: String,
    /// `$<`
    pub first_prereq: Option<String>,
    /// `$^` — all prerequisites, de-duplicated, in first-occurrence order.
    pub all_prereqs: Vec<String>,
    /// `$+` — all prerequisites, not de-duplicated.
    pub all_prereqs_raw: Vec<String>,
    /// `$?` — prerequisites newer than the target.
    pub newer_prereqs: Vec<String>,
    /// `$*` — the stem matched by `%` in a pattern rule, or the target's basename otherwise.
    pub stem: Option<String>,
}

impl AutoVars {
    /// Looks up a single-character automatic variable (and its `D`/`F` suffixed variants, e.g.
    /// `$(@D)`/`$(@F)`). Returns `None` if `name` isn't an automatic variable at all.
    pub fn lookup(&self, name: &str) -> Option<String> {
        let (base, suffix) = if let Some(stripped) = name.strip_suffix('D') {
            (stripped, Some('D'))
        } else if let Some(stripped) = name.strip_suffix('F') {
            (stripped, Some('F'))
        } else {
            (name, None)
        };

        let value = match base {
            "@" => Some(self.target.clone()),
            "<" => self.first_prereq.clone(),
            "^" => Some(self.all_prereqs.join(" ")),
            "+" => Some(self.all_prereqs_raw.join(" ")),
            "?" => Some(self.newer_prereqs.join(" ")),
            "*" => self.stem.clone(),
            _ => None,
        }?;

        Some(match suffix {
            Some('D') => apply_to_words(&value, dir_of),
            Some('F') => apply_to_words(&value, notdir_of),
            _ => value,
        })
    }
}

fn apply_to_words(value: &str, f: impl Fn(&str) -> String) -> String {
    value.split_whitespace().map(|w| f(w)).collect::<Vec<_>>().join(" ")
}

fn dir_of(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => "./".to_string(),
    }
}

fn notdir_of(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[i + 1..].to_string(),
        None => path.to_string(),
    }
}

/// Capabilities the evaluator needs from whatever owns the `Vars` it's expanding against, beyond
/// simple variable lookup.
pub trait EvalHost {
    /// Runs `cmd` through the configured shell (used by `$(shell ...)`), returning its trimmed
    /// stdout.
    fn shell(&mut self, cmd: &str) -> Result<String, MakeError>;

    /// Re-parses `text` as makefile statements and executes them immediately against the owning
    /// makefile (used by `$(eval ...)`).
    fn eval_statements(&mut self, text: &str, context: &Context) -> Result<(), MakeError>;

    /// `$(origin NAME)` / `$(flavor NAME)` need to inspect the *actual* owning environment, which
    /// may differ from the `vars` an expansion was given (e.g. a target-local overlay); by default
    /// this just asks the same `Vars`.
    fn origin_of(&self, vars: &Vars, name: &str) -> crate::vars::Origin {
        vars.origin(name)
    }
}

/// The full context an expansion runs in: the variable environment, the current target's
/// automatic variables (absent outside of recipe expansion), and the host for shell/eval.
pub struct EvalCtx<'a> {
    pub vars: &'a Vars,
    pub auto: Option<&'a AutoVars>,
}

/// Expands `expr` to a plain string. `host` supplies `$(shell ...)`/`$(eval ...)` capabilities.
pub fn expand(expr: &Expr, ctx: &EvalCtx, host: &mut dyn EvalHost) -> Result<String, MakeError> {
    let mut stack = Vec::new();
    expand_inner(expr, ctx, host, &mut stack)
}

fn expand_inner(
    expr: &Expr,
    ctx: &EvalCtx,
    host: &mut dyn EvalHost,
    stack: &mut Vec<String>,
) -> Result<String, MakeError> {
    let mut out = String::new();
    for seg in &expr.segments {
        match seg {
            Segment::Literal(s) => out.push_str(s),
            Segment::VarRef(name_expr) => {
                let name = expand_inner(name_expr, ctx, host, stack)?;

                if let Some(auto) = ctx.auto {
                    if let Some(value) = auto.lookup(&name) {
                        out.push_str(&value);
                        continue;
                    }
                }

                if stack.iter().any(|s| s == &name) {
                    return Err(MakeError::new(
                        format!(
                            "Recursive variable expansion cycle: {} -> {}",
                            stack.join(" -> "),
                            name
                        ),
                        Context::new(),
                    ));
                }

                let var = ctx.vars.get(&name);
                match &var.value {
                    crate::vars::Value::Literal(s) => out.push_str(s),
                    crate::vars::Value::Expr(inner) => {
                        stack.push(name);
                        let expanded = expand_inner(inner, ctx, host, stack)?;
                        stack.pop();
                        out.push_str(&expanded);
                    }
                }
            }
            Segment::Func(name, args) => {
                let value = functions::call(name, args, ctx, host)?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}

/// Helper used by several functions (`$(sort)`, sort/unique helpers) to normalize whitespace the
/// way GNU make does when splitting text into "words".
pub fn split_words(s: &str) -> Vec<&str> {
    s.split_whitespace().collect()
}

/// De-duplicates a list of words, preserving first-occurrence order. Used for `$^` and
/// `$(sort ...)`'s uniqueness step shares this helper's logic but also sorts.
pub fn dedup_preserve_order(words: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for w in words {
        if seen.insert(w.clone()) {
            out.push(w.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::expr::parse;
    use crate::vars::Origin;

    struct NullHost;
    impl EvalHost for NullHost {
        fn shell(&mut self, _cmd: &str) -> Result<String, MakeError> {
            Ok(String::new())
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

    #[test]
    fn expands_simple_and_recursive_variables() {
        let mut vars = Vars::new();
        vars.set_literal("A", "value-a", Origin::File);
        assert_eq!(expand_str("$(A)", &vars), "value-a");

        vars.set_recursive("B", parse("$(A)-b", &Context::new()).unwrap(), Origin::File);
        assert_eq!(expand_str("$(B)", &vars), "value-a-b");
    }

    #[test]
    fn detects_recursive_cycle() {
        let mut vars = Vars::new();
        vars.set_recursive("A", parse("$(B)", &Context::new()).unwrap(), Origin::File);
        vars.set_recursive("B", parse("$(A)", &Context::new()).unwrap(), Origin::File);
        let err = expand_str_err("$(A)", &vars);
        assert!(err.contains("cycle"));
    }

    fn expand_str_err(s: &str, vars: &Vars) -> String {
        let expr = parse(s, &Context::new()).unwrap();
        let ctx = EvalCtx { vars, auto: None };
        match expand(&expr, &ctx, &mut NullHost) {
            Err(e) => e.msg,
            Ok(v) => panic!("expected error, got {:?}", v),
        }
    }

    #[test]
    fn automatic_variables_take_priority_and_support_dir_notdir_suffixes() {
        let vars = Vars::new();
        let auto = AutoVars {
            target: "a/b.o".to_string(),
            first_prereq: Some("a/b.c".to_string()),
            all_prereqs: vec!["a/b.c".to_string(), "h.h".to_string()],
            all_prereqs_raw: vec!["a/b.c".to_string()],
            newer_prereqs: vec![],
            stem: Some("b".to_string()),
        };
        let ctx = EvalCtx {
            vars: &vars,
            auto: Some(&auto),
        };
        let expr = parse("$@ $< $^ $(@D) $(@F)", &Context::new()).unwrap();
        let result = expand(&expr, &ctx, &mut NullHost).unwrap();
        assert_eq!(result, "a/b.o a/b.c a/b.c h.h a/ b.o");
    }
}
