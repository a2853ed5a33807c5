//! Statement lexer/parser: turns makefile text into a flat statement list.
//!
//! Parsing and evaluation are split into two passes, since the restart protocol needs to re-run a
//! statement list against a fresh `Makefile` without re-lexing text, and `$(eval ...)` needs to
//! produce a statement list from an arbitrary string at runtime. Recipe-line detection uses a
//! literal leading tab (not the live `.RECIPEPREFIX` value — see DESIGN.md).

use crate::context::Context;
use crate::error::MakeError;
use crate::expr::{self, Expr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetFlavor {
    Recursive,
    Simple,
    Appending,
    Conditional,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CondKind {
    Ifdef,
    Ifndef,
    Ifeq,
    Ifneq,
}

#[derive(Clone, Debug)]
pub enum Statement {
    SetVariable {
        name: Expr,
        flavor: SetFlavor,
        value: Expr,
        context: Context,
    },
    Rule {
        targets: Expr,
        prereqs: Expr,
        order_only: Option<Expr>,
        double_colon: bool,
        context: Context,
    },
    Command {
        line: Expr,
        context: Context,
    },
    Include {
        path: Expr,
        optional: bool,
        context: Context,
    },
    Conditional {
        kind: CondKind,
        lhs: Expr,
        rhs: Option<Expr>,
        then_branch: Vec<Statement>,
        else_branch: Vec<Statement>,
    },
    Export {
        names: Vec<Expr>,
    },
    Unexport {
        names: Vec<Expr>,
    },
    Override {
        inner: Box<Statement>,
    },
    VPath {
        pattern: Option<Expr>,
        dirs: Option<Expr>,
        context: Context,
    },
    /// `target(s): VAR = value` (or `:=`/`+=`/`?=`) — a target-specific (or, if a target pattern
    /// contains `%`, pattern-specific) variable override, applied only within that target's own
    /// recipe expansion.
    TargetVariable {
        targets: Expr,
        name: Expr,
        flavor: SetFlavor,
        value: Expr,
        context: Context,
    },
    Error {
        message: Expr,
        context: Context,
    },
    Warning {
        message: Expr,
        context: Context,
    },
    Info {
        message: Expr,
        context: Context,
    },
}

struct Line {
    text: String,
    context: Context,
    is_recipe: bool,
}

/// Parses a full makefile text (or the argument to `$(eval ...)`) into a flat statement list.
pub fn parse_str(text: &str, base_context: &Context) -> Result<Vec<Statement>, MakeError> {
    let lines = fold_lines(text, base_context)?;
    let mut pos = 0;
    let statements = parse_block(&lines, &mut pos, None)?;
    Ok(statements)
}

/// Joins backslash-continued physical lines into logical lines, stripping comments outside
/// recipes, and records which lines are recipe commands (leading tab).
fn fold_lines(text: &str, base_context: &Context) -> Result<Vec<Line>, MakeError> {
    let raw: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < raw.len() {
        let start_index = i;
        let is_recipe = raw[i].starts_with('\t');
        let mut content = if is_recipe {
            raw[i].strip_prefix('\t').unwrap().to_string()
        } else {
            strip_comment(raw[i]).to_string()
        };

        while content.ends_with('\\') && !content.ends_with("\\\\") {
            content.pop();
            i += 1;
            if i >= raw.len() {
                break;
            }
            let next = if is_recipe {
                raw[i].strip_prefix('\t').unwrap_or(raw[i])
            } else {
                strip_comment(raw[i])
            };
            if is_recipe {
                content.push('\n');
                content.push_str(next);
            } else {
                content.push(' ');
                content.push_str(next.trim_start());
            }
        }

        let mut context = base_context.clone();
        context.line_index = Some(start_index);
        context.content = Some(raw[start_index].to_string());

        out.push(Line {
            text: content,
            context,
            is_recipe,
        });
        i += 1;
    }

    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && chars[i + 1] == '#' {
            i += 2;
            continue;
        }
        if chars[i] == '#' {
            let byte_offset: usize = chars[..i].iter().map(|c| c.len_utf8()).sum();
            return &line[..byte_offset];
        }
        i += 1;
    }
    line
}

/// Parses a run of statements, stopping at end-of-input or (if `terminators` is set) at a line
/// whose keyword is `else`/`endif` — used when parsing the body of a conditional branch. Returns
/// the parsed statements; the caller inspects the line at the returned `pos` to see which
/// terminator stopped us.
fn parse_block(
    lines: &[Line],
    pos: &mut usize,
    terminators: Option<&[&str]>,
) -> Result<Vec<Statement>, MakeError> {
    let mut statements = Vec::new();
    let mut current_rule_open = false;

    while *pos < lines.len() {
        let line = &lines[*pos];

        if line.is_recipe {
            if !current_rule_open {
                return Err(MakeError::syntax("Recipe command without a preceding rule.", line.context.clone()));
            }
            if !line.text.trim().is_empty() {
                let expr = expr::parse(&line.text, &line.context)?;
                statements.push(Statement::Command {
                    line: expr,
                    context: line.context.clone(),
                });
            }
            *pos += 1;
            continue;
        }

        let trimmed = line.text.trim();
        if trimmed.is_empty() {
            *pos += 1;
            continue;
        }

        if let Some(terms) = terminators {
            let keyword = trimmed.split_whitespace().next().unwrap_or("");
            if terms.contains(&keyword) {
                current_rule_open = false;
                return Ok(statements);
            }
        }

        current_rule_open = false;

        if let Some(stmt) = parse_directive_or_conditional(lines, pos, trimmed, &line.context)? {
            statements.push(stmt);
            continue;
        }

        if let Some((rule_stmt, inline_recipe)) = try_parse_rule(trimmed, &line.context)? {
            statements.push(rule_stmt);
            if let Some(recipe_line) = inline_recipe {
                statements.push(Statement::Command {
                    line: expr::parse(recipe_line.trim_start(), &line.context)?,
                    context: line.context.clone(),
                });
            }
            current_rule_open = true;
            *pos += 1;
            continue;
        }

        statements.push(try_parse_assignment_or_fail(trimmed, &line.context)?);
        *pos += 1;
    }

    if terminators.is_some() {
        let context = lines.last().map(|l| l.context.clone()).unwrap_or_else(Context::new);
        return Err(MakeError::syntax("Unterminated conditional (missing endif).", context));
    }

    Ok(statements)
}

/// Handles directives and conditionals that consume more than their own line (`define`/`endef`,
/// `ifeq`/`endif`, ...). Returns `Ok(None)` if `trimmed` isn't one of these, in which case `*pos`
/// is left unchanged for the caller to try rule/assignment parsing.
fn parse_directive_or_conditional(
    lines: &[Line],
    pos: &mut usize,
    trimmed: &str,
    context: &Context,
) -> Result<Option<Statement>, MakeError> {
    let mut words = trimmed.splitn(2, char::is_whitespace);
    let keyword = words.next().unwrap_or("");
    let rest = words.next().unwrap_or("").trim();

    match keyword {
        "include" | "-include" | "sinclude" => {
            *pos += 1;
            Ok(Some(Statement::Include {
                path: expr::parse(rest, context)?,
                optional: keyword != "include",
                context: context.clone(),
            }))
        }
        "ifdef" | "ifndef" => {
            let kind = if keyword == "ifdef" { CondKind::Ifdef } else { CondKind::Ifndef };
            *pos += 1;
            let lhs = expr::parse(rest, context)?;
            parse_conditional_tail(lines, pos, kind, lhs, None)
        }
        "ifeq" | "ifneq" => {
            let kind = if keyword == "ifeq" { CondKind::Ifeq } else { CondKind::Ifneq };
            *pos += 1;
            let (lhs_text, rhs_text) = split_ifeq_args(rest, context)?;
            let lhs = expr::parse(&lhs_text, context)?;
            let rhs = expr::parse(&rhs_text, context)?;
            parse_conditional_tail(lines, pos, kind, lhs, Some(rhs))
        }
        "define" => {
            let name = rest.to_string();
            *pos += 1;
            let mut body = String::new();
            while *pos < lines.len() {
                let inner = &lines[*pos];
                let inner_trim = inner.text.trim();
                if inner_trim == "endef" {
                    *pos += 1;
                    break;
                }
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(&inner.text);
                *pos += 1;
            }
            Ok(Some(Statement::SetVariable {
                name: expr::parse(&name, context)?,
                flavor: SetFlavor::Recursive,
                value: expr::parse(&body, context)?,
                context: context.clone(),
            }))
        }
        "export" => {
            *pos += 1;
            if rest.is_empty() {
                Ok(Some(Statement::Export { names: vec![] }))
            } else if let Some(stmt) = try_parse_export_assignment(rest, context)? {
                Ok(Some(stmt))
            } else {
                let names = rest
                    .split_whitespace()
                    .map(|n| expr::parse(n, context))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(Statement::Export { names }))
            }
        }
        "unexport" => {
            *pos += 1;
            let names = rest
                .split_whitespace()
                .map(|n| expr::parse(n, context))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Statement::Unexport { names }))
        }
        "override" => {
            *pos += 1;
            let inner = try_parse_assignment_or_fail(rest, context)?;
            Ok(Some(Statement::Override { inner: Box::new(inner) }))
        }
        "vpath" => {
            *pos += 1;
            if rest.is_empty() {
                return Ok(Some(Statement::VPath {
                    pattern: None,
                    dirs: None,
                    context: context.clone(),
                }));
            }
            let mut parts = rest.splitn(2, char::is_whitespace);
            let pattern = parts.next().unwrap_or("");
            let dirs = parts.next().unwrap_or("").trim();
            Ok(Some(Statement::VPath {
                pattern: Some(expr::parse(pattern, context)?),
                dirs: if dirs.is_empty() { None } else { Some(expr::parse(dirs, context)?) },
                context: context.clone(),
            }))
        }
        "error" => {
            *pos += 1;
            Ok(Some(Statement::Error { message: expr::parse(rest, context)?, context: context.clone() }))
        }
        "warning" => {
            *pos += 1;
            Ok(Some(Statement::Warning { message: expr::parse(rest, context)?, context: context.clone() }))
        }
        "info" => {
            *pos += 1;
            Ok(Some(Statement::Info { message: expr::parse(rest, context)?, context: context.clone() }))
        }
        _ => Ok(None),
    }
}

fn try_parse_export_assignment(rest: &str, context: &Context) -> Result<Option<Statement>, MakeError> {
    if looks_like_assignment(rest) {
        Ok(Some(try_parse_assignment_or_fail(rest, context)?))
    } else {
        Ok(None)
    }
}

fn looks_like_assignment(line: &str) -> bool {
    for op in ["::=", ":=", "+=", "?=", "="] {
        if line.contains(op) {
            return true;
        }
    }
    false
}

fn parse_conditional_tail(
    lines: &[Line],
    pos: &mut usize,
    kind: CondKind,
    lhs: Expr,
    rhs: Option<Expr>,
) -> Result<Option<Statement>, MakeError> {
    let then_branch = parse_block(lines, pos, Some(&["else", "endif"]))?;

    let mut else_branch = Vec::new();
    if *pos < lines.len() {
        let keyword = lines[*pos].text.trim().split_whitespace().next().unwrap_or("");
        if keyword == "else" {
            let rest = lines[*pos].text.trim()[4..].trim().to_string();
            let else_context = lines[*pos].context.clone();
            if rest.is_empty() {
                // Bare `else`: its body is terminated by the matching `endif`, consumed here.
                *pos += 1;
                else_branch = parse_block(lines, pos, Some(&["endif"]))?;
                if *pos < lines.len() && lines[*pos].text.trim() == "endif" {
                    *pos += 1;
                }
            } else if let Some(nested) = parse_directive_or_conditional(lines, pos, &rest, &else_context)? {
                // `else ifeq (...)`/`else ifdef ...`: the nested conditional's own recursive
                // call already consumes the chain's single terminating `endif`; `pos` still
                // points at this `else ...` line, which that call advances past itself.
                else_branch.push(nested);
            }
        } else if keyword == "endif" {
            *pos += 1;
        }
    }

    Ok(Some(Statement::Conditional {
        kind,
        lhs,
        rhs,
        then_branch,
        else_branch,
    }))
}

/// Splits `ifeq`/`ifneq`'s argument, which is either `(a,b)` or `"a" "b"`/`'a' 'b'`.
fn split_ifeq_args(rest: &str, context: &Context) -> Result<(String, String), MakeError> {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let (a, b) = split_top_level_comma(inner);
        return Ok((a.trim().to_string(), b.trim().to_string()));
    }
    let quote = rest.chars().next();
    if matches!(quote, Some('"') | Some('\'')) {
        let q = quote.unwrap();
        let mut parts = rest.splitn(3, q);
        parts.next();
        let a = parts.next().unwrap_or("").to_string();
        let remainder = parts.next().unwrap_or("").trim();
        let remainder = remainder.trim_matches(|c| c == '"' || c == '\'');
        return Ok((a, remainder.to_string()));
    }
    Err(MakeError::syntax(
        format!("Malformed `ifeq`/`ifneq` arguments: '{}'.", rest),
        context.clone(),
    ))
}

fn split_top_level_comma(s: &str) -> (&str, &str) {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            ',' if depth == 0 => return (&s[..i], &s[i + 1..]),
            _ => {}
        }
    }
    (s, "")
}

/// Tries to parse `line` as a rule (`targets: prereqs` or `targets:: prereqs`, optionally with
/// order-only prerequisites after a `|` and/or an inline recipe after a top-level `;`, e.g.
/// `all: ; @echo hi`). Returns `Ok(None)` if there's no top-level, unescaped colon (so the caller
/// falls through to assignment parsing). On success, also returns the inline recipe text (if any)
/// for the caller to push as a separate `Command` statement immediately following the rule.
fn try_parse_rule(line: &str, context: &Context) -> Result<Option<(Statement, Option<String>)>, MakeError> {
    let Some(colon_pos) = find_top_level_colon(line) else {
        return Ok(None);
    };

    let targets_text = &line[..colon_pos];
    let mut rest = &line[colon_pos + 1..];
    let mut double_colon = false;
    if let Some(stripped) = rest.strip_prefix(':') {
        double_colon = true;
        rest = stripped;
    }

    // `target: VAR = value` looks identical to a rule up to the colon; disambiguate by checking
    // whether what follows is an assignment operator rather than a prerequisite list. `::=` is
    // ambiguous with double-colon rules followed by a `:=` assignment on no targets, which real
    // make resolves the same way: only a single `:` was consumed above, so `a:: b` already took
    // the double-colon branch and `rest` here no longer starts with `:`.
    if !double_colon {
        if let Some(assignment) = try_parse_assignment(rest.trim(), context)? {
            if let Statement::SetVariable { name, flavor, value, .. } = assignment {
                return Ok(Some((
                    Statement::TargetVariable {
                        targets: expr::parse(targets_text.trim(), context)?,
                        name,
                        flavor,
                        value,
                        context: context.clone(),
                    },
                    None,
                )));
            }
        }
    }

    let (rule_part, inline_recipe) = match find_top_level_semicolon(rest) {
        Some(i) => (&rest[..i], Some(rest[i + 1..].to_string())),
        None => (rest, None),
    };

    Ok(Some((
        Statement::Rule {
            targets: expr::parse(targets_text.trim(), context)?,
            prereqs: expr::parse(prereq_part(rule_part).trim(), context)?,
            order_only: order_only_part(rule_part).map(|s| expr::parse(s.trim(), context)).transpose()?,
            double_colon,
            context: context.clone(),
        },
        inline_recipe,
    )))
}

fn prereq_part(rest: &str) -> &str {
    match rest.find('|') {
        Some(i) => &rest[..i],
        None => rest,
    }
}

fn order_only_part(rest: &str) -> Option<&str> {
    rest.find('|').map(|i| &rest[i + 1..])
}

/// Finds a top-level (not nested inside `$(...)`/`${...}`) `;` introducing an inline recipe.
fn find_top_level_semicolon(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if i + 1 < bytes.len() && (bytes[i + 1] == b'(' || bytes[i + 1] == b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b')' | b'}' if depth > 0 => depth -= 1,
            b';' if depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn find_top_level_colon(line: &str) -> Option<usize> {
    let mut depth = 0i32;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if i + 1 < bytes.len() && (bytes[i + 1] == b'(' || bytes[i + 1] == b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b')' | b'}' if depth > 0 => depth -= 1,
            b':' if depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Tries to parse `line` as a variable assignment, returning `Ok(None)` (rather than erroring) if
/// it doesn't look like one at all.
fn try_parse_assignment(line: &str, context: &Context) -> Result<Option<Statement>, MakeError> {
    // Ordered longest-operator-first so `:=` isn't mistaken for `=` etc.
    for (op, flavor) in [
        ("::=", SetFlavor::Simple),
        (":=", SetFlavor::Simple),
        ("+=", SetFlavor::Appending),
        ("?=", SetFlavor::Conditional),
        ("=", SetFlavor::Recursive),
    ] {
        if let Some(idx) = line.find(op) {
            let name = line[..idx].trim();
            let value = line[idx + op.len()..].trim_start();
            if name.is_empty() {
                break;
            }
            return Ok(Some(Statement::SetVariable {
                name: expr::parse(name, context)?,
                flavor,
                value: expr::parse(value, context)?,
                context: context.clone(),
            }));
        }
    }

    Ok(None)
}

fn try_parse_assignment_or_fail(line: &str, context: &Context) -> Result<Statement, MakeError> {
    try_parse_assignment(line, context)?
        .ok_or_else(|| MakeError::syntax(format!("Invalid line: '{}'.", line), context.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn parses_inline_recipe_after_semicolon() {
        let text = "all: ; @echo hi\n";
        let statements = parse_str(text, &ctx()).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0], Statement::Rule { .. }));
        match &statements[1] {
            Statement::Command { line, .. } => assert_eq!(line.as_literal(), Some("@echo hi")),
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[test]
    fn parses_inline_recipe_with_prereqs_and_order_only() {
        let text = "out: src.c | dir ; @echo building\n";
        let statements = parse_str(text, &ctx()).unwrap();
        assert_eq!(statements.len(), 2);
        match &statements[0] {
            Statement::Rule { prereqs, order_only, .. } => {
                assert_eq!(prereqs.as_literal(), Some("src.c"));
                assert!(order_only.is_some());
            }
            other => panic!("expected Rule, got {other:?}"),
        }
    }

    #[test]
    fn parses_simple_rule_and_recipe() {
        let text = "all: a b\n\t@echo hi\n";
        let statements = parse_str(text, &ctx()).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0], Statement::Rule { .. }));
        assert!(matches!(statements[1], Statement::Command { .. }));
    }

    #[test]
    fn parses_order_only_prerequisites() {
        let text = "out: src.c | dir\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::Rule { order_only, .. } => assert!(order_only.is_some()),
            _ => panic!("expected rule"),
        }
    }

    #[test]
    fn parses_double_colon_rule() {
        let text = "a:: b\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::Rule { double_colon, .. } => assert!(double_colon),
            _ => panic!("expected rule"),
        }
    }

    #[test]
    fn parses_variable_assignment_flavors() {
        let text = "A = one\nB := two\nC += three\nD ?= four\n";
        let statements = parse_str(text, &ctx()).unwrap();
        assert_eq!(statements.len(), 4);
        let flavors: Vec<_> = statements
            .iter()
            .map(|s| match s {
                Statement::SetVariable { flavor, .. } => *flavor,
                _ => panic!("expected SetVariable"),
            })
            .collect();
        assert_eq!(
            flavors,
            vec![SetFlavor::Recursive, SetFlavor::Simple, SetFlavor::Appending, SetFlavor::Conditional]
        );
    }

    #[test]
    fn parses_ifeq_with_parens_and_else() {
        let text = "ifeq ($(A),foo)\nB = yes\nelse\nB = no\nendif\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::Conditional { kind, then_branch, else_branch, .. } => {
                assert_eq!(*kind, CondKind::Ifeq);
                assert_eq!(then_branch.len(), 1);
                assert_eq!(else_branch.len(), 1);
            }
            _ => panic!("expected conditional"),
        }
    }

    #[test]
    fn parses_define_endef_block() {
        let text = "define greeting\necho hello\necho world\nendef\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::SetVariable { value, .. } => {
                assert_eq!(value.as_literal(), Some("echo hello\necho world"));
            }
            _ => panic!("expected SetVariable"),
        }
    }

    #[test]
    fn recipe_without_rule_is_syntax_error() {
        let text = "\t@echo oops\n";
        let err = parse_str(text, &ctx()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Syntax);
    }

    #[test]
    fn target_specific_variable_is_distinguished_from_rule() {
        let text = "foo.o: CFLAGS := -O2\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::TargetVariable { flavor, .. } => assert_eq!(*flavor, SetFlavor::Simple),
            other => panic!("expected TargetVariable, got {other:?}"),
        }
    }

    #[test]
    fn pattern_specific_variable_assignment_parses() {
        let text = "%.o: CPPFLAGS += -DDEBUG\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::TargetVariable { targets, flavor, .. } => {
                assert_eq!(targets.as_literal(), Some("%.o"));
                assert_eq!(*flavor, SetFlavor::Appending);
            }
            other => panic!("expected TargetVariable, got {other:?}"),
        }
    }

    #[test]
    fn include_directive_parses_optional_flag() {
        let text = "-include foo.mk\n";
        let statements = parse_str(text, &ctx()).unwrap();
        match &statements[0] {
            Statement::Include { optional, .. } => assert!(optional),
            _ => panic!("expected include"),
        }
    }
}
