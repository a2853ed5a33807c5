//! Error type for the parser/executor.

use std::error::Error;
use std::fmt;

use crate::context::Context;

/// Coarse classification of a [`MakeError`], matching the taxonomy a caller needs to decide
/// whether a failure is fatal to the whole run or only to the target that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed makefile source: unterminated construct, misplaced recipe line, bad conditional
    /// nesting. Always fatal.
    Syntax,
    /// Semantic error after parsing: unknown function, wrong arity, variable cycle, restart-limit
    /// exceeded. Fatal unless the specific site recovers (e.g. rule-conflict warnings).
    Data,
    /// No rule (and no existing file) for a requested target. Fatal for that target only under
    /// keep-going.
    NoRule,
    /// A recipe command exited non-zero without an ignore (`-`) modifier.
    Command,
}

/// An error in the parsing or execution of a makefile.
#[derive(Debug)]
pub struct MakeError {
    pub msg: String,
    pub context: Context,
    pub kind: ErrorKind,
}

impl MakeError {
    pub fn new(msg: impl AsRef<str>, context: Context) -> Self {
        Self::with_kind(msg, context, ErrorKind::Data)
    }

    pub fn with_kind(msg: impl AsRef<str>, context: Context, kind: ErrorKind) -> Self {
        Self {
            msg: msg.as_ref().to_string(),
            context,
            kind,
        }
    }

    pub fn syntax(msg: impl AsRef<str>, context: Context) -> Self {
        Self::with_kind(msg, context, ErrorKind::Syntax)
    }

    pub fn no_rule(msg: impl AsRef<str>, context: Context) -> Self {
        Self::with_kind(msg, context, ErrorKind::NoRule)
    }

    pub fn command(msg: impl AsRef<str>, context: Context) -> Self {
        Self::with_kind(msg, context, ErrorKind::Command)
    }

    /// Per-target failures (no rule, failed command) can be swallowed under `-k`; syntax/data
    /// errors always abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Syntax | ErrorKind::Data)
    }
}

impl Error for MakeError {}

/// Not really used, but needed so `MakeError` can implement `Error`.
impl fmt::Display for MakeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{e:?}", e = &self)
    }
}
