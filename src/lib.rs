//! # omake (Oxidized Make)
//!
//! This is the library component of `omake`, generally oriented towards the main binary of this
//! crate, but should be designed to be used by other applications.

mod context;
mod error;
mod eval;
mod expr;
mod functions;
mod logger;
mod makefile;
mod scheduler;
mod tracer;
mod vars;

pub use context::Context;
pub use error::{ErrorKind, MakeError};
pub use eval::{AutoVars, EvalCtx, EvalHost};
pub use expr::Expr;
pub use logger::{init_debug_log, DefaultLogger, Logger, NullLogger, ERROR, INFO, WARN};
pub use makefile::{Makefile, Opts};
pub use scheduler::Scheduler;
pub use tracer::{FileTracer, Tracer};
pub use vars::{Flavor, Origin, Var, Vars};
