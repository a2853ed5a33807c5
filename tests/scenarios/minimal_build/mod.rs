//! Spec scenario 1 ("minimal build"): `all: ; @echo hi` run with no arguments prints `hi` and
//! exits 0.

#[test]
fn minimal_build_echoes_and_succeeds() {
    crate::run_scenario("minimal_build", &[], "hi\n", "", 0);
}
