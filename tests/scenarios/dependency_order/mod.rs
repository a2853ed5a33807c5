//! Spec scenario 2 ("simple dependency"): with `-j1`, prerequisites run strictly in textual order
//! before their dependent, so `a`'s echo always precedes `b`'s.

#[test]
fn dash_j1_runs_prerequisites_in_order() {
    crate::run_scenario("dependency_order", &["-j1"], "A\nB\n", "", 0);
}

#[test]
fn default_jobs_is_also_one() {
    crate::run_scenario("dependency_order", &[], "A\nB\n", "", 0);
}
