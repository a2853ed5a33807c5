//! End-to-end tests that build real makefiles in `tests/scenarios/` with the compiled `omake`
//! binary and assert on stdout/stderr/exit status, the way GNU make's own test suite (and this
//! crate's teacher, `examples/gregschmit-omake/tests/system_tests.rs`) exercises the whole engine
//! rather than individual units.

mod scenarios;

use std::process::Command;

/// Path to the `omake` binary, relative to the directory a scenario test runs its process from
/// (each scenario directory is one level below `tests/scenarios/`, which is one level below the
/// crate root, so three `../` hops reach `target/debug/omake`).
const OMAKE_BIN: &str = "../../../target/debug/omake";

/// Runs the compiled `omake` binary inside `scenario_dir` (relative to `tests/scenarios/`) with
/// `args`, and asserts the captured stdout, stderr, and exit code.
pub(crate) fn run_scenario(scenario_dir: &str, args: &[&str], expected_stdout: &str, expected_stderr: &str, expected_code: i32) {
    let dir = format!("tests/scenarios/{scenario_dir}");
    let output = Command::new(OMAKE_BIN)
        .args(args)
        .current_dir(&dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run omake in {dir}: {e}"));

    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_stdout,
        "stdout mismatch for scenario '{scenario_dir}' with args {args:?}",
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stderr),
        expected_stderr,
        "stderr mismatch for scenario '{scenario_dir}' with args {args:?}",
    );
    assert_eq!(
        output.status.code(),
        Some(expected_code),
        "exit code mismatch for scenario '{scenario_dir}' with args {args:?}",
    );
}

/// Like [`run_scenario`], but only checks that stderr *contains* `expected_stderr_substring`
/// rather than matching it exactly — used for diagnostics whose exact wording (e.g. the order
/// variables appear in a reported cycle) isn't worth pinning down byte-for-byte.
pub(crate) fn run_scenario_stderr_contains(
    scenario_dir: &str,
    args: &[&str],
    expected_stdout: &str,
    expected_stderr_substring: &str,
    expected_code: i32,
) {
    let dir = format!("tests/scenarios/{scenario_dir}");
    let output = Command::new(OMAKE_BIN)
        .args(args)
        .current_dir(&dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run omake in {dir}: {e}"));

    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_stdout,
        "stdout mismatch for scenario '{scenario_dir}' with args {args:?}",
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(expected_stderr_substring),
        "expected stderr of scenario '{scenario_dir}' to contain '{expected_stderr_substring}', got: {stderr}",
    );
    assert_eq!(
        output.status.code(),
        Some(expected_code),
        "exit code mismatch for scenario '{scenario_dir}' with args {args:?}",
    );
}
