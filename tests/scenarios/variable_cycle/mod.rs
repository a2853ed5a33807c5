//! Spec scenario 6 ("recursive variable cycle"): `A = $(A)` expanded while building `all` is
//! caught before any recipe command runs, and reported as a fatal error rather than looping forever.

#[test]
fn self_referential_variable_is_a_fatal_error() {
    crate::run_scenario_stderr_contains("variable_cycle", &[], "", "cycle", 2);
}
