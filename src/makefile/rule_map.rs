//! Rules, pattern-rule/implicit-rule matching, and the `Target` state machine.

use std::collections::HashMap;
use std::time::SystemTime;

use super::{Context, Logger, MakeError};
use crate::expr::Expr;
use crate::vars::Vars;

/// A parsed rule: either explicit (no `%` in any target), a pattern rule, or one of the small set
/// of built-in implicit rules seeded by `Makefile::new`.
#[derive(Clone, Debug)]
pub struct Rule {
    pub targets: Vec<String>,
    pub prereqs: Vec<String>,
    pub order_only: Vec<String>,
    pub recipe: Vec<Expr>,
    pub double_colon: bool,
    pub context: Context,
}

impl Rule {
    pub fn is_pattern(&self) -> bool {
        self.targets.iter().any(|t| t.contains('%'))
    }
}

/// Matches a single `%`-pattern against `name`, returning the stem if it matches.
pub fn match_stem(pattern: &str, name: &str) -> Option<String> {
    let i = pattern.find('%')?;
    let prefix = &pattern[..i];
    let suffix = &pattern[i + 1..];
    let stem = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    Some(stem.to_string())
}

/// Substitutes `%` in `pattern` with `stem`.
pub fn substitute_stem(pattern: &str, stem: &str) -> String {
    match pattern.find('%') {
        Some(i) => format!("{}{}{}", &pattern[..i], stem, &pattern[i + 1..]),
        None => pattern.to_string(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetState {
    New,
    Resolved,
    Ready,
    Running,
    Done(Outcome),
}

/// A target and everything resolution discovered about it. Created lazily on first reference by
/// `Makefile::gettarget`.
#[derive(Debug)]
pub struct Target {
    pub name: String,
    /// The file actually found via VPATH search, if different from `name`.
    pub vpath_target: Option<String>,
    pub mtime: Option<SystemTime>,
    pub prereqs: Vec<String>,
    pub order_only: Vec<String>,
    pub rule_indices: Vec<usize>,
    pub vars: Vars,
    pub phony: bool,
    pub was_remade: bool,
    pub stem: Option<String>,
    pub state: TargetState,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vpath_target: None,
            mtime: None,
            prereqs: vec![],
            order_only: vec![],
            rule_indices: vec![],
            vars: Vars::new(),
            phony: false,
            was_remade: false,
            stem: None,
            state: TargetState::New,
        }
    }

    /// `$*` — the path used for `D`/`F` suffixed automatic variables etc.
    pub fn display_path(&self) -> &str {
        self.vpath_target.as_deref().unwrap_or(&self.name)
    }
}

/// What rule resolution found for a given target name.
pub struct Resolution {
    pub prereqs: Vec<String>,
    pub order_only: Vec<String>,
    pub rule_indices: Vec<usize>,
    pub stem: Option<String>,
}

/// Holds every rule added to a makefile (explicit, pattern, and built-in implicit), partitioned
/// for the resolution order documented in DESIGN.md.
#[derive(Debug, Default)]
pub struct RuleMap {
    rules: Vec<Rule>,
    explicit: HashMap<String, Vec<usize>>,
    /// Pattern rule indices, in definition order (user-defined rules first).
    pattern: Vec<usize>,
    /// Built-in implicit rule indices, tried only after user pattern rules.
    implicit: Vec<usize>,
}

impl RuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> &Rule {
        &self.rules[index]
    }

    pub fn explicit_targets(&self) -> impl Iterator<Item = &String> {
        self.explicit.keys()
    }

    /// Inserts a user-defined rule (explicit or pattern), applying the command-conflict warning
    /// rule (documented in DESIGN.md) for repeated single-colon explicit targets.
    pub fn insert(&mut self, rule: Rule, logger: &dyn Logger) -> Result<(), MakeError> {
        let index = self.rules.len();
        let is_pattern = rule.is_pattern();
        let double_colon = rule.double_colon;
        let targets = rule.targets.clone();
        let context = rule.context.clone();
        let has_recipe = !rule.recipe.is_empty();
        self.rules.push(rule);

        if is_pattern {
            self.pattern.push(index);
            return Ok(());
        }

        for target in &targets {
            match self.explicit.get_mut(target) {
                None => {
                    self.explicit.insert(target.clone(), vec![index]);
                }
                Some(indices) => {
                    let first_double_colon = self.rules[indices[0]].double_colon;
                    if first_double_colon != double_colon {
                        return Err(MakeError::new(
                            format!("Cannot define rule '{target}' using both `:` and `::`."),
                            context.clone(),
                        ));
                    }
                    if double_colon {
                        indices.push(index);
                    } else {
                        let existing_has_recipe = indices.iter().any(|i| !self.rules[*i].recipe.is_empty());
                        if has_recipe && existing_has_recipe {
                            logger.warn(
                                format!("Overriding commands for target '{target}'."),
                                Some(&context),
                            );
                        }
                        indices.push(index);
                    }
                }
            }
        }

        Ok(())
    }

    /// Seeds the small built-in implicit rule table (a subset of GNU make's default rules),
    /// tried only after all user-defined explicit/pattern rules fail to match. Called once by
    /// `Makefile::new`.
    pub fn seed_implicit_rules(&mut self) {
        if !self.implicit.is_empty() {
            return;
        }
        let builtins: &[(&str, &str, &[&str])] = &[
            ("%.o", "%.c", &["$(CC) $(CPPFLAGS) $(CFLAGS) -c -o $@ $<"]),
            ("%.o", "%.cc", &["$(CXX) $(CPPFLAGS) $(CXXFLAGS) -c -o $@ $<"]),
            ("%.o", "%.cpp", &["$(CXX) $(CPPFLAGS) $(CXXFLAGS) -c -o $@ $<"]),
            ("%", "%.o", &["$(CC) $(LDFLAGS) -o $@ $< $(LOADLIBES) $(LDLIBS)"]),
            ("%.o", "%.s", &["$(AS) $(ASFLAGS) -o $@ $<"]),
        ];
        for (target, prereq, recipe) in builtins {
            let index = self.rules.len();
            self.rules.push(Rule {
                targets: vec![target.to_string()],
                prereqs: vec![prereq.to_string()],
                order_only: vec![],
                recipe: recipe
                    .iter()
                    .map(|s| crate::expr::parse(s, &Context::new()).expect("built-in recipe parses"))
                    .collect(),
                double_colon: false,
                context: Context::new(),
            });
            self.implicit.push(index);
        }
    }

    /// Resolves a target name per the order documented in DESIGN.md. `exists` should report whether a
    /// given name currently exists as a file (considering VPATH has already been applied by the
    /// caller for the top-level `name`, but not for candidate prerequisites — a shallow,
    /// single-level "is this buildable" check is used for pattern-rule prerequisite viability,
    /// per the scope decision recorded in DESIGN.md).
    pub fn resolve(&self, name: &str, exists: &dyn Fn(&str) -> bool) -> Option<Resolution> {
        if let Some(indices) = self.explicit.get(name) {
            let mut prereqs = Vec::new();
            let mut order_only = Vec::new();
            for &i in indices {
                for p in &self.rules[i].prereqs {
                    if !prereqs.contains(p) {
                        prereqs.push(p.clone());
                    }
                }
                for p in &self.rules[i].order_only {
                    if !order_only.contains(p) {
                        order_only.push(p.clone());
                    }
                }
            }
            return Some(Resolution {
                prereqs,
                order_only,
                rule_indices: indices.clone(),
                stem: None,
            });
        }

        let mut best: Option<(String, &Rule, usize)> = None;
        for &i in self.pattern.iter().chain(self.implicit.iter()) {
            let rule = &self.rules[i];
            for pattern in &rule.targets {
                let Some(stem) = match_stem(pattern, name) else {
                    continue;
                };
                let candidate_prereqs: Vec<String> =
                    rule.prereqs.iter().map(|p| substitute_stem(p, &stem)).collect();
                if !candidate_prereqs.iter().all(|p| exists(p) || self.explicit.contains_key(p)) {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some((best_stem, ..)) => stem.len() < best_stem.len(),
                };
                if better {
                    best = Some((stem, rule, i));
                }
                break;
            }
        }

        best.map(|(stem, rule, i)| Resolution {
            prereqs: rule.prereqs.iter().map(|p| substitute_stem(p, &stem)).collect(),
            order_only: rule.order_only.iter().map(|p| substitute_stem(p, &stem)).collect(),
            rule_indices: vec![i],
            stem: Some(stem),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::DefaultLogger;

    fn rule(targets: &[&str], prereqs: &[&str], double_colon: bool) -> Rule {
        Rule {
            targets: targets.iter().map(|s| s.to_string()).collect(),
            prereqs: prereqs.iter().map(|s| s.to_string()).collect(),
            order_only: vec![],
            recipe: vec![],
            double_colon,
            context: Context::new(),
        }
    }

    #[test]
    fn explicit_rule_resolves_directly() {
        let mut rules = RuleMap::new();
        rules.insert(rule(&["all"], &["a", "b"], false), &DefaultLogger {}).unwrap();
        let resolution = rules.resolve("all", &|_| false).unwrap();
        assert_eq!(resolution.prereqs, vec!["a", "b"]);
    }

    #[test]
    fn pattern_rule_matches_when_prereq_exists() {
        let mut rules = RuleMap::new();
        rules.insert(rule(&["%.o"], &["%.c"], false), &DefaultLogger {}).unwrap();
        let resolution = rules.resolve("foo.o", &|p| p == "foo.c").unwrap();
        assert_eq!(resolution.prereqs, vec!["foo.c"]);
        assert_eq!(resolution.stem, Some("foo".to_string()));
    }

    #[test]
    fn pattern_rule_skipped_when_prereq_unbuildable() {
        let mut rules = RuleMap::new();
        rules.insert(rule(&["%.o"], &["%.c"], false), &DefaultLogger {}).unwrap();
        assert!(rules.resolve("foo.o", &|_| false).is_none());
    }

    #[test]
    fn mixing_colon_kinds_is_an_error() {
        let mut rules = RuleMap::new();
        rules.insert(rule(&["a"], &[], false), &DefaultLogger {}).unwrap();
        let err = rules.insert(rule(&["a"], &[], true), &DefaultLogger {}).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Data);
    }

    #[test]
    fn shortest_stem_preferred_on_ties() {
        let mut rules = RuleMap::new();
        rules.insert(rule(&["%.o"], &["%.c"], false), &DefaultLogger {}).unwrap();
        rules.insert(rule(&["foo%.o"], &["foo%.c"], false), &DefaultLogger {}).unwrap();
        let resolution = rules.resolve("foobar.o", &|_| true).unwrap();
        assert_eq!(resolution.stem, Some("bar".to_string()));
    }
}
