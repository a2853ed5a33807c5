//! The core logic for parsing, evaluating, and executing makefiles: the `Makefile` object,
//! target resolution (delegated to [`rule_map`]), and the restart protocol.

pub mod opts;
pub mod parser;
pub mod rule_map;

pub use opts::Opts;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::context::Context;
use crate::error::MakeError;
use crate::eval::{AutoVars, EvalCtx, EvalHost};
use crate::expr::{self, Expr};
use crate::logger::Logger;
use crate::tracer::Tracer;
use crate::vars::{Origin, Vars};

use parser::{CondKind, SetFlavor, Statement};
use rule_map::{Rule, RuleMap, Target, TargetState};

/// Bounds the restart loop: re-parsing the makefile after its own remake must converge.
const MAX_RESTARTS: u32 = 32;

/// A deferred `target: VAR = value` (or pattern-specific `%.o: VAR = value`) assignment. Applied
/// lazily in `gettarget` once a matching target actually exists, since the set of targets isn't
/// known until the whole makefile has been parsed.
#[derive(Clone, Debug)]
struct TargetVarRule {
    pattern: String,
    name: Expr,
    flavor: SetFlavor,
    value: Expr,
}

/// A single, already-expanded recipe line ready to hand to the scheduler, with its echo/
/// error-ignoring/always-run modifiers (`@`, `-`, `+`) already stripped off.
#[derive(Clone, Debug)]
pub struct PreparedCommand {
    pub text: String,
    pub echo: bool,
    pub ignore_errors: bool,
    pub always_run: bool,
}

/// The primary interface for reading, parsing, and executing a set of makefiles.
pub struct Makefile {
    pub opts: Opts,
    pub logger: Box<dyn Logger>,
    pub vars: Vars,
    pub rule_map: RuleMap,
    pub targets: std::collections::HashMap<String, Target>,
    pub vpath_dirs: Vec<String>,
    pub default_goal: Option<String>,
    pub makefile_paths: Vec<PathBuf>,
    pub restart_count: u32,
    pub tracer: Option<Box<dyn Tracer>>,
    pub exported_all: bool,
    pub exported_names: HashSet<String>,
    phony_names: HashSet<String>,
    silent_all: bool,
    silent_targets: HashSet<String>,
    target_var_rules: Vec<TargetVarRule>,
    included: Vec<String>,
}

impl Makefile {
    /// Runs the full restart protocol: parse and evaluate, remake any makefile that is
    /// itself a target, and if one was actually rebuilt, discard this `Makefile` and start over.
    pub fn load(
        opts: Opts,
        logger: Box<dyn Logger>,
        base_vars: Vars,
        tracer: Option<Box<dyn Tracer>>,
        cli_overrides: &[(String, String)],
    ) -> Result<Self, MakeError> {
        let mut restart_count = 0u32;
        loop {
            let mut mf = Self::fresh(opts.clone(), logger_clone(&logger), base_vars.clone(), tracer_clone(&tracer), restart_count);

            for (name, value) in cli_overrides {
                mf.vars.set_literal(name, value.clone(), Origin::CommandLine);
            }

            let makefile_paths = if mf.opts.makefiles.is_empty() {
                vec![find_default_makefile().ok_or_else(|| {
                    MakeError::with_kind("No makefile found.", Context::new(), crate::error::ErrorKind::Data)
                })?]
            } else {
                mf.opts.makefiles.iter().map(PathBuf::from).collect()
            };

            if let Some(t) = &mf.tracer {
                t.onmakebegin(&mf.vars, &makefile_paths);
            }

            for path in &makefile_paths {
                mf.include_file(path, false)?;
            }
            mf.makefile_paths = makefile_paths;
            mf.finish_parsing();

            if mf.remake_makefiles()? {
                restart_count += 1;
                if restart_count > MAX_RESTARTS {
                    return Err(MakeError::new(
                        format!("Makefile restart limit ({MAX_RESTARTS}) exceeded; includes are not converging."),
                        Context::new(),
                    ));
                }
                mf.vars.set_literal("MAKE_RESTARTS", restart_count.to_string(), Origin::Automatic);
                continue;
            }

            return Ok(mf);
        }
    }

    fn fresh(opts: Opts, logger: Box<dyn Logger>, mut vars: Vars, tracer: Option<Box<dyn Tracer>>, restart_count: u32) -> Self {
        vars.set_literal("MAKELEVEL", opts.make_level.to_string(), Origin::Makefile);
        vars.set_literal("MAKE", "omake".to_string(), Origin::Makefile);
        vars.set_literal("MAKEFLAGS", opts.to_makeflags(), Origin::Makefile);
        vars.set_conditional(
            "SHELL",
            Expr::literal("/bin/sh"),
            Origin::Default,
        );
        vars.set_conditional(".SHELLFLAGS", Expr::literal("-c"), Origin::Default);

        Self {
            opts,
            logger,
            vars,
            rule_map: {
                let mut rm = RuleMap::new();
                rm.seed_implicit_rules();
                rm
            },
            targets: std::collections::HashMap::new(),
            vpath_dirs: vec![],
            default_goal: None,
            makefile_paths: vec![],
            restart_count,
            tracer,
            exported_all: false,
            exported_names: HashSet::new(),
            phony_names: HashSet::new(),
            silent_all: false,
            silent_targets: HashSet::new(),
            target_var_rules: vec![],
            included: vec![],
        }
    }

    /// Reads, parses, and evaluates `path` as a makefile (or included file). `optional` makes a
    /// missing file non-fatal (`-include`).
    pub fn include_file(&mut self, path: impl AsRef<Path>, optional: bool) -> Result<(), MakeError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                if optional {
                    return Ok(());
                }
                return Err(MakeError::new(
                    format!("Could not read makefile '{}' ({}).", path.display(), e),
                    Context::new(),
                ));
            }
        };
        log::debug!("makefile: reading '{}'", path.display());
        self.included.push(path.display().to_string());
        let context: Context = path.to_path_buf().into();
        let statements = parser::parse_str(&text, &context)?;
        self.eval_statement_list(&statements)
    }

    /// Evaluates a top-level statement list (either a freshly-parsed makefile, or the body of
    /// `$(eval ...)`) against this `Makefile`.
    pub fn eval_statement_list(&mut self, statements: &[Statement]) -> Result<(), MakeError> {
        let mut current_rule: Option<Rule> = None;
        self.eval_statements_inner(statements, &mut current_rule)?;
        self.finalize_rule(&mut current_rule)?;
        Ok(())
    }

    fn eval_statements_inner(&mut self, statements: &[Statement], current_rule: &mut Option<Rule>) -> Result<(), MakeError> {
        for statement in statements {
            match statement {
                Statement::Command { line, context } => {
                    let Some(rule) = current_rule.as_mut() else {
                        return Err(MakeError::syntax("Recipe command without a preceding rule.", context.clone()));
                    };
                    rule.recipe.push(line.clone());
                }
                _ => {
                    self.finalize_rule(current_rule)?;
                    self.eval_one_statement(statement, current_rule)?;
                }
            }
        }
        Ok(())
    }

    fn finalize_rule(&mut self, current_rule: &mut Option<Rule>) -> Result<(), MakeError> {
        let Some(rule) = current_rule.take() else {
            return Ok(());
        };
        if rule.targets.iter().any(|t| t == ".PHONY") {
            self.phony_names.extend(rule.prereqs.iter().cloned());
            return Ok(());
        }
        if rule.targets.iter().any(|t| t == ".SILENT") {
            if rule.prereqs.is_empty() {
                self.silent_all = true;
            } else {
                self.silent_targets.extend(rule.prereqs.iter().cloned());
            }
            return Ok(());
        }
        if self.default_goal.is_none() {
            for target in &rule.targets {
                if !target.starts_with('.') && !target.contains('%') {
                    self.default_goal = Some(target.clone());
                    break;
                }
            }
        }
        self.rule_map.insert(rule, self.logger.as_ref())
    }

    fn eval_one_statement(&mut self, statement: &Statement, current_rule: &mut Option<Rule>) -> Result<(), MakeError> {
        match statement {
            Statement::Command { .. } => unreachable!("handled by eval_statements_inner"),
            Statement::SetVariable { name, flavor, value, context } => {
                self.apply_set_variable(name, *flavor, value, context, Origin::File)
            }
            Statement::Rule { targets, prereqs, order_only, double_colon, context } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let targets_str = crate::eval::expand(targets, &ctx, self)?;
                let prereqs_str = crate::eval::expand(prereqs, &ctx, self)?;
                let order_only_str = order_only
                    .as_ref()
                    .map(|e| crate::eval::expand(e, &ctx, self))
                    .transpose()?;
                *current_rule = Some(Rule {
                    targets: crate::eval::split_words(&targets_str).iter().map(|s| s.to_string()).collect(),
                    prereqs: crate::eval::split_words(&prereqs_str).iter().map(|s| s.to_string()).collect(),
                    order_only: order_only_str
                        .map(|s| crate::eval::split_words(&s).iter().map(|w| w.to_string()).collect())
                        .unwrap_or_default(),
                    recipe: vec![],
                    double_colon: *double_colon,
                    context: context.clone(),
                });
                Ok(())
            }
            Statement::TargetVariable { targets, name, flavor, value, context } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let targets_str = crate::eval::expand(targets, &ctx, self)?;
                for target_name in crate::eval::split_words(&targets_str) {
                    self.target_var_rules.push(TargetVarRule {
                        pattern: target_name.to_string(),
                        name: name.clone(),
                        flavor: *flavor,
                        value: value.clone(),
                    });
                }
                let _ = context;
                Ok(())
            }
            Statement::Include { path, optional, context } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let path_str = crate::eval::expand(path, &ctx, self)?;
                for p in crate::eval::split_words(&path_str) {
                    self.include_file(p, *optional).map_err(|mut e| {
                        if e.context.path.is_none() {
                            e.context = context.clone();
                        }
                        e
                    })?;
                }
                Ok(())
            }
            Statement::Conditional { kind, lhs, rhs, then_branch, else_branch } => {
                let taken = self.evaluate_conditional(*kind, lhs, rhs.as_ref())?;
                if taken {
                    self.eval_statements_inner(then_branch, current_rule)
                } else {
                    self.eval_statements_inner(else_branch, current_rule)
                }
            }
            Statement::Export { names } => {
                if names.is_empty() {
                    self.exported_all = true;
                } else {
                    let snapshot = self.vars.clone();
                    let ctx = EvalCtx { vars: &snapshot, auto: None };
                    for name in names {
                        self.exported_names.insert(crate::eval::expand(name, &ctx, self)?);
                    }
                }
                Ok(())
            }
            Statement::Unexport { names } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                for name in names {
                    let n = crate::eval::expand(name, &ctx, self)?;
                    self.exported_names.remove(&n);
                }
                Ok(())
            }
            Statement::Override { inner } => {
                if let Statement::SetVariable { name, flavor, value, context } = inner.as_ref() {
                    self.apply_set_variable(name, *flavor, value, context, Origin::Override)
                } else {
                    Ok(())
                }
            }
            Statement::VPath { pattern, dirs, context } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                match (pattern, dirs) {
                    (None, None) => self.vpath_dirs.clear(),
                    (Some(_), None) => self.vpath_dirs.clear(),
                    (_, Some(dirs_expr)) => {
                        let dirs_str = crate::eval::expand(dirs_expr, &ctx, self)?;
                        for d in crate::eval::split_words(&dirs_str) {
                            self.vpath_dirs.push(d.to_string());
                        }
                    }
                }
                let _ = context;
                Ok(())
            }
            Statement::Error { message, context } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let text = crate::eval::expand(message, &ctx, self)?;
                Err(MakeError::new(text, context.clone()))
            }
            Statement::Warning { message, context } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let text = crate::eval::expand(message, &ctx, self)?;
                self.logger.warn(text, Some(context));
                Ok(())
            }
            Statement::Info { message, .. } => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let text = crate::eval::expand(message, &ctx, self)?;
                println!("{text}");
                Ok(())
            }
        }
    }

    fn apply_set_variable(
        &mut self,
        name: &Expr,
        flavor: SetFlavor,
        value: &Expr,
        context: &Context,
        origin: Origin,
    ) -> Result<(), MakeError> {
        let snapshot = self.vars.clone();
        let ctx = EvalCtx { vars: &snapshot, auto: None };
        let name_str = crate::eval::expand(name, &ctx, self)?;
        let name_str = name_str.trim();
        log::trace!("makefile: setting variable '{name_str}' ({flavor:?}, origin={origin:?})");
        match flavor {
            SetFlavor::Simple => {
                let expanded = crate::eval::expand(value, &ctx, self)?;
                self.vars.set_literal(name_str, expanded, origin);
            }
            SetFlavor::Recursive => {
                self.vars.set_recursive(name_str, value.clone(), origin);
            }
            SetFlavor::Appending => {
                self.vars.append_recursive(name_str, value.clone(), origin);
            }
            SetFlavor::Conditional => {
                self.vars.set_conditional(name_str, value.clone(), origin);
            }
        }
        if name_str == ".DEFAULT_GOAL" {
            let goal = self.vars.get(".DEFAULT_GOAL").value.as_literal().map(|s| s.to_string());
            self.default_goal = goal.filter(|s| !s.is_empty());
        }
        let _ = context;
        Ok(())
    }

    /// Applies a deferred target-specific/pattern-specific variable assignment (see
    /// [`TargetVarRule`]) onto `target_name`'s own `Vars`, which overlays the global environment
    /// only for that target's recipe expansion.
    fn apply_target_variable(
        &mut self,
        target_name: &str,
        name_str: &str,
        flavor: SetFlavor,
        value: &Expr,
    ) -> Result<(), MakeError> {
        match flavor {
            SetFlavor::Simple => {
                let snapshot = self.vars.clone();
                let ctx = EvalCtx { vars: &snapshot, auto: None };
                let expanded = crate::eval::expand(value, &ctx, self)?;
                self.targets.get_mut(target_name).unwrap().vars.set_literal(name_str, expanded, Origin::File);
            }
            SetFlavor::Recursive => {
                self.targets.get_mut(target_name).unwrap().vars.set_recursive(name_str, value.clone(), Origin::File);
            }
            SetFlavor::Appending => {
                self.targets
                    .get_mut(target_name)
                    .unwrap()
                    .vars
                    .append_recursive(name_str, value.clone(), Origin::File);
            }
            SetFlavor::Conditional => {
                self.targets
                    .get_mut(target_name)
                    .unwrap()
                    .vars
                    .set_conditional(name_str, value.clone(), Origin::File);
            }
        }
        Ok(())
    }

    fn evaluate_conditional(&mut self, kind: CondKind, lhs: &Expr, rhs: Option<&Expr>) -> Result<bool, MakeError> {
        let snapshot = self.vars.clone();
        let ctx = EvalCtx { vars: &snapshot, auto: None };
        Ok(match kind {
            CondKind::Ifdef => {
                let name = crate::eval::expand(lhs, &ctx, self)?;
                self.vars.contains(name.trim()) && !self.vars.get(name.trim()).value.as_literal().unwrap_or_default().is_empty()
            }
            CondKind::Ifndef => {
                let name = crate::eval::expand(lhs, &ctx, self)?;
                !(self.vars.contains(name.trim()) && !self.vars.get(name.trim()).value.as_literal().unwrap_or_default().is_empty())
            }
            CondKind::Ifeq => {
                let a = crate::eval::expand(lhs, &ctx, self)?;
                let b = crate::eval::expand(rhs.expect("ifeq has rhs"), &ctx, self)?;
                a == b
            }
            CondKind::Ifneq => {
                let a = crate::eval::expand(lhs, &ctx, self)?;
                let b = crate::eval::expand(rhs.expect("ifneq has rhs"), &ctx, self)?;
                a != b
            }
        })
    }

    /// Finish-parsing: default goal was already tracked incrementally; nothing else to
    /// compute in this simplified model beyond making sure a default goal exists if possible.
    pub fn finish_parsing(&mut self) {
        if self.default_goal.is_none() {
            self.default_goal = self.rule_map.explicit_targets().find(|t| !t.starts_with('.')).cloned();
        }
    }

    /// Before building requested targets, try to remake every makefile-file target. Returns
    /// `true` if any makefile was actually remade (the caller must discard this `Makefile` and
    /// restart, per ).
    fn remake_makefiles(&mut self) -> Result<bool, MakeError> {
        let mut any_remade = false;
        let paths: Vec<String> = self.makefile_paths.iter().map(|p| p.display().to_string()).collect();
        for path in paths {
            if self.rule_map.resolve(&path, &|p| Path::new(p).exists()).is_none() {
                continue;
            }
            let before = fs::metadata(&path).and_then(|m| m.modified()).ok();
            self.build_target(&path)?;
            let after = fs::metadata(&path).and_then(|m| m.modified()).ok();
            if before != after {
                any_remade = true;
            }
        }
        Ok(any_remade)
    }

    /// `gettarget(name)`: returns (creating on first call) the `Target` for `name`, running
    /// resolution including VPATH search.
    pub fn gettarget(&mut self, name: &str) -> Result<(), MakeError> {
        if self.targets.contains_key(name) {
            return Ok(());
        }
        log::trace!("makefile: resolving target '{name}'");

        let mut target = Target::new(name);
        target.phony = self.phony_names.contains(name);
        target.vpath_target = self.vpath_resolve(name);
        target.mtime = self.get_mtime(name, target.vpath_target.as_deref());

        let resolution = {
            let vpath_dirs = &self.vpath_dirs;
            self.rule_map.resolve(name, &|p| {
                Path::new(p).exists() || vpath_dirs.iter().any(|d| Path::new(d).join(p).exists())
            })
        };

        self.targets.insert(name.to_string(), target);

        match resolution {
            Some(res) => {
                log::debug!(
                    "makefile: '{name}' resolved via {} rule(s), stem={:?}",
                    res.rule_indices.len(),
                    res.stem
                );
                let target = self.targets.get_mut(name).unwrap();
                target.prereqs = res.prereqs;
                target.order_only = res.order_only;
                target.rule_indices = res.rule_indices;
                target.stem = res.stem;
                target.state = TargetState::Resolved;
            }
            None => {
                let target = self.targets.get_mut(name).unwrap();
                if target.mtime.is_some() || target.phony {
                    log::debug!("makefile: '{name}' has no rule but exists (phony={})", target.phony);
                    target.state = TargetState::Resolved;
                } else {
                    log::debug!("makefile: '{name}' has no rule and no existing file");
                }
                // Otherwise leave in `New`; failure surfaces when the scheduler tries to build
                // it ("surfaced when the target is actually requested").
            }
        }

        let var_rules = self.target_var_rules.clone();
        for rule in &var_rules {
            let matches = if rule.pattern.contains('%') {
                rule_map::match_stem(&rule.pattern, name).is_some()
            } else {
                rule.pattern == name
            };
            if !matches {
                continue;
            }
            let snapshot = self.vars.clone();
            let ctx = EvalCtx { vars: &snapshot, auto: None };
            let name_str = crate::eval::expand(&rule.name, &ctx, self)?;
            let name_str = name_str.trim().to_string();
            self.apply_target_variable(name, &name_str, rule.flavor, &rule.value)?;
        }

        for prereq in self.targets.get(name).unwrap().prereqs.clone() {
            self.gettarget(&prereq)?;
        }
        for prereq in self.targets.get(name).unwrap().order_only.clone() {
            self.gettarget(&prereq)?;
        }

        Ok(())
    }

    /// Whether `.SILENT` (globally, or naming `name` specifically) suppresses recipe-command
    /// echoing for this target, independent of the `-s`/`--silent` CLI flag.
    pub fn is_silent(&self, name: &str) -> bool {
        self.opts.silent || self.silent_all || self.silent_targets.contains(name)
    }

    /// Whether `name`'s recipe should run: no file (and not already resolved via `-o`/`-W`),
    /// a phony marker, `--always-make`, or any prerequisite that is newer or was itself just
    /// remade. Order-only prerequisites only need to exist, never force a rebuild here.
    pub fn needs_build(&self, name: &str) -> bool {
        let target = &self.targets[name];
        if self.opts.always_make || target.phony {
            return true;
        }
        let Some(t_mtime) = target.mtime else {
            return true;
        };
        for prereq in &target.prereqs {
            let Some(p) = self.targets.get(prereq) else { continue };
            if p.was_remade {
                return true;
            }
            match p.mtime {
                Some(p_mtime) if p_mtime > t_mtime => return true,
                None if !p.phony => return true,
                _ => {}
            }
        }
        false
    }

    /// Expands every recipe command for `name` (across all matching rules, in definition order —
    /// double-colon rule variants simply run one after another) against the target's own
    /// variables overlaid onto the global environment, splitting each modifier prefix (`@`, `-`,
    /// `+`) off the expanded text since variables like `$(Q)cmd` only reveal a modifier after
    /// expansion.
    pub fn prepare_commands(&mut self, name: &str) -> Result<Vec<PreparedCommand>, MakeError> {
        let target = &self.targets[name];
        let rule_indices = target.rule_indices.clone();
        let target_vars = target.vars.clone();

        let mut base_vars = self.vars.clone();
        base_vars.overlay(&target_vars);
        let auto = self.auto_vars_for(name);
        let silent_default = self.is_silent(name);

        let mut commands = Vec::new();
        for idx in rule_indices {
            let recipe = self.rule_map.get(idx).recipe.clone();
            for expr in &recipe {
                let ctx = EvalCtx { vars: &base_vars, auto: Some(&auto) };
                let expanded = crate::eval::expand(expr, &ctx, self)?;
                for line in expanded.lines() {
                    let mut rest = line;
                    let mut echo = !silent_default;
                    let mut ignore_errors = self.opts.ignore_errors;
                    let mut always_run = false;
                    loop {
                        let trimmed = rest.trim_start();
                        if let Some(stripped) = trimmed.strip_prefix('@') {
                            echo = false;
                            rest = stripped;
                        } else if let Some(stripped) = trimmed.strip_prefix('-') {
                            ignore_errors = true;
                            rest = stripped;
                        } else if let Some(stripped) = trimmed.strip_prefix('+') {
                            always_run = true;
                            rest = stripped;
                        } else {
                            rest = trimmed;
                            break;
                        }
                    }
                    if rest.is_empty() {
                        continue;
                    }
                    commands.push(PreparedCommand {
                        text: rest.to_string(),
                        echo,
                        ignore_errors,
                        always_run,
                    });
                }
            }
        }
        Ok(commands)
    }

    /// Variables that should be set in a spawned recipe command's environment (`export`ed names,
    /// plus `MAKE`/`MAKEFLAGS`/`MAKELEVEL`, which make always propagates to children).
    pub fn exported_env(&mut self) -> Result<Vec<(String, String)>, MakeError> {
        let snapshot = self.vars.clone();
        let mut result = Vec::new();
        for (k, v) in snapshot.iter() {
            if !self.is_exported(k) {
                continue;
            }
            let expanded = match &v.value {
                crate::vars::Value::Literal(s) => s.clone(),
                crate::vars::Value::Expr(e) => {
                    let ctx = EvalCtx { vars: &snapshot, auto: None };
                    crate::eval::expand(e, &ctx, self)?
                }
            };
            result.push((k.clone(), expanded));
        }
        Ok(result)
    }

    fn vpath_resolve(&self, name: &str) -> Option<String> {
        if Path::new(name).exists() {
            return None;
        }
        for dir in &self.vpath_dirs {
            let candidate = Path::new(dir).join(name);
            if candidate.exists() {
                return Some(candidate.display().to_string());
            }
        }
        None
    }

    /// Builds `name` synchronously, single-threaded (`-j1` semantics) — used by the restart
    /// protocol's makefile-remake pass. The full `-j N` scheduler lives in `scheduler.rs` and is
    /// used for the user-requested target graph.
    pub fn build_target(&mut self, name: &str) -> Result<(), MakeError> {
        crate::scheduler::Scheduler::new(1, self.opts.keep_going).run(self, &[name.to_string()])
    }

    /// Get the `mtime` of a file (or `vpath_target`, if resolved). `None` signals the file does
    /// not exist or is inaccessible; `old_file`/`new_file` (`-o`/`-W`) override the real mtime.
    pub fn get_mtime(&self, name: &str, vpath_target: Option<&str>) -> Option<SystemTime> {
        if self.opts.old_file.iter().any(|f| f == name) {
            return Some(UNIX_EPOCH);
        }
        if self.opts.new_file.iter().any(|f| f == name) {
            return Some(SystemTime::now() + Duration::from_secs(365 * 24 * 60 * 60));
        }
        let path = vpath_target.unwrap_or(name);
        fs::metadata(path).ok().and_then(|m| m.modified().ok())
    }

    pub fn is_exported(&self, name: &str) -> bool {
        matches!(name, "MAKE" | "MAKEFLAGS" | "MAKELEVEL") || self.exported_all || self.exported_names.contains(name)
    }

    /// Automatic variables for `target`'s recipe expansion.
    pub fn auto_vars_for(&self, name: &str) -> AutoVars {
        let target = &self.targets[name];
        let all_prereqs_raw = target.prereqs.clone();
        let all_prereqs = crate::eval::dedup_preserve_order(&all_prereqs_raw);
        let newer_prereqs = all_prereqs_raw
            .iter()
            .filter(|p| {
                let prereq_target = self.targets.get(p.as_str());
                match (prereq_target.and_then(|t| t.mtime), target.mtime) {
                    (Some(p_mtime), Some(t_mtime)) => p_mtime > t_mtime,
                    _ => true,
                }
            })
            .cloned()
            .collect();

        // `$*` is the pattern-rule stem when one matched; for an explicit-rule target it falls
        // back to the bare basename (suffix stripped), e.g. `foo.o` -> `foo`.
        let stem = target.stem.clone().or_else(|| Some(basename_stem(target.display_path())));

        AutoVars {
            target: target.display_path().to_string(),
            first_prereq: all_prereqs_raw.first().cloned(),
            all_prereqs,
            all_prereqs_raw,
            newer_prereqs,
            stem,
        }
    }
}

impl EvalHost for Makefile {
    fn shell(&mut self, cmd: &str) -> Result<String, MakeError> {
        let shell = self.vars.get("SHELL").value.as_literal().unwrap_or("/bin/sh").to_string();
        let output = Command::new(&shell).arg("-c").arg(cmd).output().map_err(|e| {
            MakeError::new(format!("$(shell ...) failed to launch '{shell}': {e}."), Context::new())
        })?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.trim_end_matches('\n').replace('\n', " "))
    }

    fn eval_statements(&mut self, text: &str, context: &Context) -> Result<(), MakeError> {
        let statements = parser::parse_str(text, context)?;
        self.eval_statement_list(&statements)
    }

    fn origin_of(&self, _vars: &Vars, name: &str) -> Origin {
        self.vars.origin(name)
    }
}

const MAKEFILE_SEARCH: [&str; 6] = ["makefile", "Makefile", "BSDmakefile", "BSDMakefile", "GNUmakefile", "GNUMakefile"];

fn find_default_makefile() -> Option<PathBuf> {
    MAKEFILE_SEARCH.iter().map(PathBuf::from).find(|p| p.is_file())
}

fn logger_clone(logger: &Box<dyn Logger>) -> Box<dyn Logger> {
    logger.boxed_clone()
}

fn tracer_clone(tracer: &Option<Box<dyn Tracer>>) -> Option<Box<dyn Tracer>> {
    tracer.as_ref().map(|t| t.boxed_clone())
}

/// `path` with its last `.suffix` stripped, directory components left alone (`src/foo.o` ->
/// `src/foo`). Used as `$*`'s fallback stem for explicit-rule targets, which have no pattern match
/// to take a stem from.
fn basename_stem(path: &str) -> String {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) => path[..file_start + dot].to_string(),
        None => path.to_string(),
    }
}
