//! A wrapper for a `HashMap` for storing makefile variables: their flavor, origin, and value.
//!
//! The only interesting behavior here is that for some special keys (like `.RECIPEPREFIX`) we
//! have default values which should be "resettable" by setting the value to blank, and that
//! calling `get` on a key that doesn't exist should return an empty `Var`. To support these
//! behaviors without polluting the underlying `HashMap` with lots of duplicate data, the `Vars`
//! struct contains fields for those heap-allocated "constant" objects. Since we always return a
//! reference to a `Var`, this is quite efficient.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::expr::Expr;

const DEFAULT_RECIPE_PREFIX: char = '\t';

/// A variable's expansion discipline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Expanded once, at assignment time (`:=`, `::=`).
    Simple,
    /// Re-expanded on every reference (`=`).
    Recursive,
    /// `+=`; behaves like `Simple` or `Recursive` depending on what it appended to.
    Appending,
    /// `?=`; only takes effect if the name is currently undefined or weakly sourced.
    Conditional,
}

/// Where a variable's current binding came from. Ordered so that a later variant always takes
/// precedence over an earlier one when both attempt to `set` the same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Undefined,
    Default,
    Environment,
    File,
    EnvironmentOverride,
    CommandLine,
    Automatic,
    Override,
    Makefile,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Undefined => "undefined",
            Origin::Default => "default",
            Origin::Environment => "environment",
            Origin::EnvironmentOverride => "environment override",
            Origin::File => "file",
            Origin::CommandLine => "command line",
            Origin::Override => "override",
            Origin::Automatic => "automatic",
            Origin::Makefile => "makefile",
        }
    }
}

/// The value backing a variable. Simple-flavored variables store a plain, already-expanded
/// string; recursive (and appending-onto-recursive) variables store the unexpanded `Expr` tree so
/// each reference can re-expand it against the current environment.
#[derive(Clone, Debug)]
pub enum Value {
    Literal(String),
    Expr(Expr),
}

impl Value {
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Value::Literal(s) => Some(s.as_str()),
            Value::Expr(e) => e.as_literal(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Var {
    pub value: Value,
    pub flavor: Flavor,
    pub origin: Origin,
}

fn blank_var() -> &'static Var {
    static CELL: OnceLock<Var> = OnceLock::new();
    CELL.get_or_init(|| Var {
        value: Value::Literal(String::new()),
        flavor: Flavor::Recursive,
        origin: Origin::Undefined,
    })
}

/// Wraps a `HashMap` of variables and a couple of cached default values, providing an easy way to
/// get/set variables while handling origin precedence and special (e.g. `.RECIPEPREFIX`) keys.
#[derive(Debug, Clone)]
pub struct Vars {
    map: HashMap<String, Var>,
    default_recipe_prefix: Var,
}

impl Default for Vars {
    fn default() -> Self {
        Self::new()
    }
}

impl Vars {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            default_recipe_prefix: Var {
                value: Value::Literal(DEFAULT_RECIPE_PREFIX.to_string()),
                flavor: Flavor::Simple,
                origin: Origin::Default,
            },
        }
    }

    /// Seeds a `Vars` from the process environment, with `Origin::Environment`. Matches the
    /// precedence rule that environment variables are consulted only for names not otherwise set
    /// by the makefile or command line.
    pub fn from_environment() -> Self {
        let mut vars = Self::new();
        for (k, v) in std::env::vars() {
            vars.map.insert(
                k,
                Var {
                    value: Value::Literal(v),
                    flavor: Flavor::Recursive,
                    origin: Origin::Environment,
                },
            );
        }
        vars
    }

    /// Public interface for getting variables. For unknown keys, a blank `Var` is returned, and
    /// some special keys have non-empty defaults.
    pub fn get(&self, k: &str) -> &Var {
        match k {
            ".RECIPEPREFIX" => match self.map.get(k) {
                None => &self.default_recipe_prefix,
                Some(var) => match &var.value {
                    Value::Literal(s) if s.is_empty() => &self.default_recipe_prefix,
                    _ => var,
                },
            },
            _ => self.map.get(k).unwrap_or_else(|| blank_var()),
        }
    }

    pub fn contains(&self, k: &str) -> bool {
        self.map.contains_key(k)
    }

    pub fn origin(&self, k: &str) -> Origin {
        self.map.get(k).map(|v| v.origin).unwrap_or(Origin::Undefined)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Var)> {
        self.map.iter()
    }

    /// Sets `name` to a literal, simple-flavor value with an explicit origin, honoring the
    /// override-precedence rule: a lower-precedence origin may never clobber an already-set
    /// higher-precedence binding.
    pub fn set_literal(&mut self, name: &str, value: impl Into<String>, origin: Origin) {
        self.set_raw(
            name,
            Var {
                value: Value::Literal(value.into()),
                flavor: Flavor::Simple,
                origin,
            },
        );
    }

    /// Sets `name` to a recursive-flavor value (re-expanded on each reference).
    pub fn set_recursive(&mut self, name: &str, expr: Expr, origin: Origin) {
        self.set_raw(
            name,
            Var {
                value: Value::Expr(expr),
                flavor: Flavor::Recursive,
                origin,
            },
        );
    }

    /// `+=`. If the variable was previously recursive (or undefined), the appended expression is
    /// concatenated (space-separated) onto the existing tree; if simple, it is folded into the
    /// literal directly when possible.
    pub fn append_recursive(&mut self, name: &str, expr: Expr, origin: Origin) {
        match self.map.get_mut(name) {
            Some(existing) if existing.origin <= origin => {
                match &mut existing.value {
                    Value::Expr(e) => e.append(expr),
                    Value::Literal(s) => {
                        if let Some(lit) = expr.as_literal() {
                            if !s.is_empty() {
                                s.push(' ');
                            }
                            s.push_str(lit);
                        } else {
                            let mut combined = Expr::literal(s.clone());
                            combined.append(expr);
                            existing.value = Value::Expr(combined);
                        }
                    }
                }
                existing.flavor = Flavor::Appending;
            }
            _ => self.set_raw(
                name,
                Var {
                    value: Value::Expr(expr),
                    flavor: Flavor::Appending,
                    origin,
                },
            ),
        }
    }

    /// `?=`. Assigns only if `name` is undefined or has a weak origin (default/environment).
    pub fn set_conditional(&mut self, name: &str, expr: Expr, origin: Origin) {
        let should_set = match self.map.get(name) {
            None => true,
            Some(existing) => {
                matches!(existing.origin, Origin::Undefined | Origin::Default | Origin::Environment)
            }
        };
        if should_set {
            self.set_raw(
                name,
                Var {
                    value: Value::Expr(expr),
                    flavor: Flavor::Conditional,
                    origin,
                },
            );
        }
    }

    /// Sets an automatic variable (`$@`, `$<`, ...). Automatic variables are always simple-flavor
    /// and are recomputed for every recipe expansion, so they always take effect.
    pub fn set_automatic(&mut self, name: &str, value: impl Into<String>) {
        self.map.insert(
            name.to_string(),
            Var {
                value: Value::Literal(value.into()),
                flavor: Flavor::Simple,
                origin: Origin::Automatic,
            },
        );
    }

    /// Overlays every binding in `other` onto `self`, unconditionally (ignoring origin
    /// precedence). Used to apply target-specific/pattern-specific variable overrides on top of
    /// the global environment for a single target's recipe expansion.
    pub fn overlay(&mut self, other: &Vars) {
        for (k, v) in other.map.iter() {
            self.map.insert(k.clone(), v.clone());
        }
    }

    fn set_raw(&mut self, name: &str, var: Var) {
        if let Some(existing) = self.map.get(name) {
            if existing.origin > var.origin {
                // Lower-precedence assignment to an already-set higher-precedence name is
                // silently ignored.
                return;
            }
        }
        self.map.insert(name.to_string(), var);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::expr::parse;

    #[test]
    fn unset_variable_is_blank() {
        let vars = Vars::new();
        assert_eq!(vars.get("UNSET").value.as_literal(), Some(""));
        assert_eq!(vars.origin("UNSET"), Origin::Undefined);
    }

    #[test]
    fn recipe_prefix_defaults_to_tab_and_resets_on_blank() {
        let mut vars = Vars::new();
        assert_eq!(vars.get(".RECIPEPREFIX").value.as_literal(), Some("\t"));
        vars.set_literal(".RECIPEPREFIX", "B", Origin::File);
        assert_eq!(vars.get(".RECIPEPREFIX").value.as_literal(), Some("B"));
        vars.set_literal(".RECIPEPREFIX", "", Origin::File);
        assert_eq!(vars.get(".RECIPEPREFIX").value.as_literal(), Some("\t"));
    }

    #[test]
    fn command_line_origin_wins_over_file() {
        let mut vars = Vars::new();
        vars.set_literal("A", "file-value", Origin::File);
        vars.set_literal("A", "cli-value", Origin::CommandLine);
        assert_eq!(vars.get("A").value.as_literal(), Some("cli-value"));

        // A later, lower-precedence `set` must not clobber the higher-precedence value.
        vars.set_literal("A", "file-value-2", Origin::File);
        assert_eq!(vars.get("A").value.as_literal(), Some("cli-value"));
    }

    #[test]
    fn conditional_set_only_applies_when_weakly_sourced() {
        let mut vars = Vars::new();
        let expr = parse("value", &Context::new()).unwrap();
        vars.set_conditional("A", expr, Origin::File);
        assert_eq!(vars.get("A").value.as_literal(), Some("value"));

        let expr2 = parse("other", &Context::new()).unwrap();
        vars.set_conditional("A", expr2, Origin::File);
        assert_eq!(vars.get("A").value.as_literal(), Some("value"));
    }

    #[test]
    fn append_onto_simple_literal() {
        let mut vars = Vars::new();
        vars.set_literal("A", "one", Origin::File);
        vars.append_recursive("A", Expr::literal("two"), Origin::File);
        assert_eq!(vars.get("A").value.as_literal(), Some("one two"));
    }
}
