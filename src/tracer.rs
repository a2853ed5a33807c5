//! The event tracer: an optional observer receiving lifecycle callbacks from the makefile,
//! target-resolution, and scheduler layers, serialized as newline-delimited JSON records.
//!
//! Grounded in `pymake.command.Tracer` (see `examples/original_source/pymake/command.py`), which
//! guards a shared trace file with a sibling lockfile created via exclusive-create, retrying until
//! it acquires the lock. We keep that protocol but standardize on the `[TAG, timestamp, payload]`
//! triple the newer `PYMAKE_BEGIN`-rooted schema uses (see DESIGN.md), rather than the older
//! two-element `[TAG, payload]` form `pymake.command.Tracer` actually emits.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::vars::Vars;

/// Callback surface a makefile evaluation, target resolution, and the scheduler drive during a
/// run. Every method is `&self`; [`FileTracer`] is stateless between calls (each write reopens the
/// trace file), so no interior mutability is needed.
pub trait Tracer: Send {
    /// Clones this tracer behind a fresh box. Needed because the restart protocol builds a brand
    /// new `Makefile` (and therefore a brand new boxed `Tracer`) on every pass.
    fn boxed_clone(&self) -> Box<dyn Tracer>;

    fn onmakebegin(&self, vars: &Vars, makefile_paths: &[PathBuf]);
    fn onmakefinish(&self);

    fn ontargetmakebegin(&self, target: &str, vpath: Option<&str>);
    fn ontargetfinish(&self, target: &str, vpath: Option<&str>, outcome: &str);
    fn ontargetprocessrules(&self, target: &str, rule_count: usize);
    fn onrulecontextprocesscommands(&self, target: &str, rule_index: usize);
    fn oncommandrun(&self, target: &str, command: &str);

    fn onjobstart(&self, target: &str, executable: &str, argv: &[String], shell: bool);
    fn onjobfinish(&self, target: &str, success: bool, exit_code: Option<i32>);
}

/// NDJSON sink for [`Tracer`] events. Writes are guarded by a sibling `<path>.lock` file created
/// with exclusive-create (`O_CREAT|O_EXCL`) semantics, so multiple cooperating processes (a
/// parent make and its recursive sub-makes) sharing the same `--trace-log PATH` don't interleave
/// partial records.
#[derive(Clone, Debug)]
pub struct FileTracer {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileTracer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = {
            let mut s = path.as_os_str().to_os_string();
            s.push(".lock");
            PathBuf::from(s)
        };
        Self { path, lock_path }
    }

    fn write_record(&self, tag: &str, payload: Value) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let record = json!([tag, timestamp, payload]);
        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };
        self.append_locked(&line);
    }

    /// Retries acquiring the exclusive-create lockfile until it succeeds, appends one line, then
    /// removes the lockfile. Best-effort: a failure to open the trace file itself is silently
    /// dropped (tracing is diagnostic, never load-bearing for the build).
    fn append_locked(&self, line: &str) {
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&self.lock_path) {
                Ok(_lock) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                Err(_) => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
            }
        }

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{line}");
        }

        let _ = std::fs::remove_file(&self.lock_path);
    }
}

impl Tracer for FileTracer {
    fn boxed_clone(&self) -> Box<dyn Tracer> {
        Box::new(self.clone())
    }

    fn onmakebegin(&self, vars: &Vars, makefile_paths: &[PathBuf]) {
        let mut variables = serde_json::Map::new();
        for (name, var) in vars.iter() {
            variables.insert(
                name.clone(),
                json!([format!("{:?}", var.flavor), var.origin.as_str(), var.value.as_literal().unwrap_or_default()]),
            );
        }
        let included: Vec<String> = makefile_paths.iter().map(|p| p.display().to_string()).collect();
        self.write_record("MAKEFILE_BEGIN", json!({ "variables": variables, "included": included }));
        self.write_record("PYMAKE_BEGIN", json!({ "included": included }));
    }

    fn onmakefinish(&self) {
        self.write_record("MAKEFILE_FINISH", json!({}));
        self.write_record("PYMAKE_FINISH", json!({}));
    }

    fn ontargetmakebegin(&self, target: &str, vpath: Option<&str>) {
        self.write_record("TARGET_BEGIN", json!({ "target": target, "vpath": vpath }));
    }

    fn ontargetfinish(&self, target: &str, vpath: Option<&str>, outcome: &str) {
        self.write_record("TARGET_FINISH", json!({ "target": target, "vpath": vpath, "outcome": outcome }));
    }

    fn ontargetprocessrules(&self, target: &str, rule_count: usize) {
        self.write_record("TARGET_PROCESS_RULES", json!({ "target": target, "rule_count": rule_count }));
    }

    fn onrulecontextprocesscommands(&self, target: &str, rule_index: usize) {
        self.write_record("RULE_CONTEXT_PROCESS_COMMANDS", json!({ "target": target, "rule_index": rule_index }));
    }

    fn oncommandrun(&self, target: &str, command: &str) {
        self.write_record("COMMAND_RUN", json!({ "target": target, "cmd": command }));
    }

    fn onjobstart(&self, target: &str, executable: &str, argv: &[String], shell: bool) {
        self.write_record(
            "JOB_START",
            json!({ "target": target, "executable": executable, "argv": argv, "shell": shell }),
        );
    }

    fn onjobfinish(&self, target: &str, success: bool, exit_code: Option<i32>) {
        self.write_record("JOB_FINISH", json!({ "target": target, "success": success, "exit_code": exit_code }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_is_sibling_with_lock_suffix() {
        let tracer = FileTracer::new("/tmp/trace.ndjson");
        assert_eq!(tracer.lock_path, Path::new("/tmp/trace.ndjson.lock"));
    }

    #[test]
    fn writes_append_and_clean_up_lockfile() {
        let dir = std::env::temp_dir().join(format!("omake-tracer-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("trace.ndjson");
        let tracer = FileTracer::new(&path);

        tracer.oncommandrun("all", "echo hi");
        tracer.oncommandrun("all", "echo bye");

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!tracer.lock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
