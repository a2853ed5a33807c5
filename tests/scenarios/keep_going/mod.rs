//! Spec scenarios 4 & 5 ("keep-going"): `x` fails immediately; without `-k` the build stops there
//! (only `x`'s own un-silenced recipe line is echoed before it fails), with `-k` independent
//! prerequisite `y` still runs to completion before the overall failure is reported.

#[test]
fn without_keep_going_stops_after_first_failure() {
    crate::run_scenario("keep_going", &["-j1"], "false\n", "make: ERROR | Build failed.\n", 2);
}

#[test]
fn with_keep_going_still_runs_independent_targets() {
    crate::run_scenario("keep_going", &["-j1", "-k"], "false\ny-done\n", "make: ERROR | Build failed.\n", 2);
}
