//! The expression model: a parsed-but-unexpanded makefile value.
//!
//! An [`Expr`] is an ordered sequence of [`Segment`]s — literal text, variable references (whose
//! *name* is itself an expression, so `$($(A)B)` parses), and function calls. Expansion into a
//! plain `String` is deferred to the `eval` module so the same tree can be re-expanded multiple
//! times (recursive-flavor variables) or expanded exactly once (simple-flavor).

use crate::context::Context;
use crate::error::MakeError;

/// One piece of a parsed expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Plain text, copied verbatim during expansion.
    Literal(String),
    /// `$x`, `$(name)`, or `${name}` — the inner `Expr` is usually a single literal, but can
    /// itself contain references (`$($(A))`).
    VarRef(Expr),
    /// `$(name arg1,arg2,...)` recognized as a call to a built-in (or user, via `$(call)`)
    /// function.
    Func(String, Vec<Expr>),
}

/// A parsed, unexpanded expression: an ordered list of segments plus the source location it was
/// parsed from (for diagnostics). Immutable after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub segments: Vec<Segment>,
}

impl Expr {
    pub fn literal(s: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Literal(s.into())],
        }
    }

    pub fn empty() -> Self {
        Self { segments: vec![] }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// If this expression is exactly one literal segment, return it as a plain string without
    /// going through the evaluator. Used by the parser to keep simple-flavor assignments cheap.
    pub fn as_literal(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [Segment::Literal(s)] => Some(s.as_str()),
            [] => Some(""),
            _ => None,
        }
    }

    /// Concatenate two expressions with a separating space, used by `+=` on recursive variables.
    pub fn append(&mut self, other: Expr) {
        if !self.segments.is_empty() && !other.segments.is_empty() {
            self.segments.push(Segment::Literal(" ".to_string()));
        }
        self.segments.extend(other.segments);
    }
}

/// Names of functions recognized by the parser. A `$(word ...)` call is only parsed as a
/// function if the identifier before the first whitespace/comma matches one of these; otherwise
/// `$(word)` is a plain variable reference named `word`, matching GNU make's disambiguation rule.
pub const FUNCTION_NAMES: &[&str] = &[
    "subst",
    "patsubst",
    "strip",
    "findstring",
    "filter",
    "filter-out",
    "sort",
    "word",
    "wordlist",
    "words",
    "firstword",
    "lastword",
    "dir",
    "notdir",
    "suffix",
    "basename",
    "addsuffix",
    "addprefix",
    "join",
    "wildcard",
    "realpath",
    "abspath",
    "if",
    "or",
    "and",
    "foreach",
    "call",
    "eval",
    "origin",
    "flavor",
    "shell",
    "error",
    "warning",
    "info",
];

/// Parses `input` (already a single logical line/value — continuations must be resolved by the
/// caller) into an [`Expr`]. `$$` is handled here as an escaped literal `$`.
pub fn parse(input: &str, context: &Context) -> Result<Expr, MakeError> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let segments = parse_segments(&chars, &mut pos, None, context)?;
    Ok(Expr { segments })
}

/// Parses segments until either the end of input or a closing delimiter is found. `closing`,
/// when set, is the delimiter that terminates this call (used for nested `$(...)`/`${...}`); if
/// the input ends without finding it, that's an unterminated-variable-reference syntax error.
fn parse_segments(
    chars: &[char],
    pos: &mut usize,
    closing: Option<char>,
    context: &Context,
) -> Result<Vec<Segment>, MakeError> {
    let mut segments = Vec::new();
    let mut literal = String::new();

    while *pos < chars.len() {
        let c = chars[*pos];

        if let Some(close) = closing {
            if c == close {
                *pos += 1;
                flush_literal(&mut segments, &mut literal);
                return Ok(segments);
            }
        }

        if c == '$' {
            *pos += 1;
            if *pos >= chars.len() {
                literal.push('$');
                break;
            }

            let next = chars[*pos];
            if next == '$' {
                // `$$` is a literal `$`.
                literal.push('$');
                *pos += 1;
                continue;
            }

            flush_literal(&mut segments, &mut literal);

            if next == '(' || next == '{' {
                let open = next;
                let close = if open == '(' { ')' } else { '}' };
                *pos += 1;
                let seg = parse_long_ref(chars, pos, open, close, context)?;
                segments.push(seg);
            } else {
                // Single-character variable reference, e.g. `$x`.
                *pos += 1;
                segments.push(Segment::VarRef(Expr {
                    segments: vec![Segment::Literal(next.to_string())],
                }));
            }
            continue;
        }

        literal.push(c);
        *pos += 1;
    }

    if closing.is_some() {
        return Err(MakeError::syntax(
            format!("Unterminated variable reference: unexpected end of input, expected '{}'.", closing.unwrap()),
            context.clone(),
        ));
    }

    flush_literal(&mut segments, &mut literal);
    Ok(segments)
}

fn flush_literal(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

/// Parses the body of a `$(...)`/`${...}` reference, starting just after the opening delimiter.
/// Decides between a plain variable reference and a function call by looking for a known
/// function name followed by whitespace before any comma/closing-delimiter at nesting depth 0.
fn parse_long_ref(
    chars: &[char],
    pos: &mut usize,
    open: char,
    close: char,
    context: &Context,
) -> Result<Segment, MakeError> {
    // Peek ahead (without consuming) to see whether this looks like `funcname ...`.
    if let Some(name) = peek_function_name(chars, *pos) {
        *pos += name.len();
        // Skip exactly one whitespace character separating the function name from its
        // arguments (GNU make allows any amount; we fold repeated space into the first arg's
        // leading trim, matching `strip`-style argument trimming done by each function).
        while *pos < chars.len() && chars[*pos].is_whitespace() {
            *pos += 1;
        }

        let args = parse_arg_list(chars, pos, open, close, context)?;
        return Ok(Segment::Func(name, args));
    }

    // Not a function: the whole span up to the matching close delimiter is a (possibly nested)
    // expression giving the variable name.
    let name_segments = parse_segments(chars, pos, Some(close), context)?;
    Ok(Segment::VarRef(Expr {
        segments: name_segments,
    }))
}

/// Returns `Some(name)` if the text at `start` begins with one of [`FUNCTION_NAMES`] followed by
/// whitespace (or immediately by the closing delimiter / a comma, for zero-arg-looking calls like
/// `$(shell)`).
fn peek_function_name(chars: &[char], start: usize) -> Option<String> {
    for &name in FUNCTION_NAMES {
        let name_chars: Vec<char> = name.chars().collect();
        let end = start + name_chars.len();
        if end > chars.len() {
            continue;
        }
        if chars[start..end] != name_chars[..] {
            continue;
        }
        match chars.get(end) {
            None => return Some(name.to_string()),
            Some(c) if c.is_whitespace() || *c == ')' || *c == '}' => {
                return Some(name.to_string())
            }
            _ => continue,
        }
    }
    None
}

/// Parses a comma-separated argument list up to (and consuming) the matching `close` delimiter.
/// Nested `$(...)`/`${...}` and bare `(`/`{` pairs inside an argument do not terminate the
/// argument early; only commas and the closing delimiter at nesting depth 0 do.
fn parse_arg_list(
    chars: &[char],
    pos: &mut usize,
    open: char,
    close: char,
    context: &Context,
) -> Result<Vec<Expr>, MakeError> {
    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut literal = String::new();
    let mut depth = 0usize;

    loop {
        if *pos >= chars.len() {
            return Err(MakeError::syntax(
                format!("Unterminated variable reference: expected '{}'.", close),
                context.clone(),
            ));
        }

        let c = chars[*pos];

        if c == close && depth == 0 {
            *pos += 1;
            flush_literal(&mut current, &mut literal);
            args.push(Expr { segments: current });
            return Ok(args);
        }

        if c == ',' && depth == 0 {
            *pos += 1;
            flush_literal(&mut current, &mut literal);
            args.push(Expr {
                segments: std::mem::take(&mut current),
            });
            continue;
        }

        if c == '$' {
            *pos += 1;
            if *pos < chars.len() && chars[*pos] == '$' {
                literal.push('$');
                *pos += 1;
                continue;
            }
            flush_literal(&mut current, &mut literal);
            if *pos < chars.len() && (chars[*pos] == '(' || chars[*pos] == '{') {
                let inner_open = chars[*pos];
                let inner_close = if inner_open == '(' { ')' } else { '}' };
                *pos += 1;
                let seg = parse_long_ref(chars, pos, inner_open, inner_close, context)?;
                current.push(seg);
            } else if *pos < chars.len() {
                let v = chars[*pos];
                *pos += 1;
                current.push(Segment::VarRef(Expr {
                    segments: vec![Segment::Literal(v.to_string())],
                }));
            }
            continue;
        }

        if c == open {
            depth += 1;
            literal.push(c);
            *pos += 1;
            continue;
        }

        if c == close {
            depth -= 1;
            literal.push(c);
            *pos += 1;
            continue;
        }

        literal.push(c);
        *pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn parses_plain_literal() {
        let e = parse("hello world", &ctx()).unwrap();
        assert_eq!(e.segments, vec![Segment::Literal("hello world".to_string())]);
    }

    #[test]
    fn parses_single_char_ref() {
        let e = parse("$x", &ctx()).unwrap();
        assert_eq!(e.segments.len(), 1);
        assert!(matches!(&e.segments[0], Segment::VarRef(_)));
    }

    #[test]
    fn parses_long_ref() {
        let e = parse("$(FOO)", &ctx()).unwrap();
        match &e.segments[0] {
            Segment::VarRef(inner) => {
                assert_eq!(inner.segments, vec![Segment::Literal("FOO".to_string())]);
            }
            _ => panic!("expected VarRef"),
        }
    }

    #[test]
    fn parses_escaped_dollar() {
        let e = parse("$$FOO", &ctx()).unwrap();
        assert_eq!(e.segments, vec![Segment::Literal("$FOO".to_string())]);
    }

    #[test]
    fn parses_function_call() {
        let e = parse("$(subst a,b,abc)", &ctx()).unwrap();
        match &e.segments[0] {
            Segment::Func(name, args) => {
                assert_eq!(name, "subst");
                assert_eq!(args.len(), 3);
            }
            _ => panic!("expected Func"),
        }
    }

    #[test]
    fn parses_nested_function_calls() {
        let e = parse("$(strip $(subst a,b,  abc  ))", &ctx()).unwrap();
        match &e.segments[0] {
            Segment::Func(name, args) => {
                assert_eq!(name, "strip");
                assert_eq!(args.len(), 1);
            }
            _ => panic!("expected Func"),
        }
    }

    #[test]
    fn unterminated_reference_is_syntax_error() {
        let err = parse("$(FOO", &ctx()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Syntax);
    }

    #[test]
    fn short_name_that_matches_function_prefix_is_still_a_variable() {
        // "sort" is a function name, but "sorted" is not - must be treated as a variable.
        let e = parse("$(sorted)", &ctx()).unwrap();
        assert!(matches!(&e.segments[0], Segment::VarRef(_)));
    }
}
