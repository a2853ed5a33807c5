//! Spec scenario 3 ("pattern rule and automatic vars"): `%.o: %.c` matched against `foo.o` with
//! `foo.c` present resolves `$<`/`$@` to `foo.c`/`foo.o`.

#[test]
fn pattern_rule_resolves_automatic_variables() {
    crate::run_scenario("pattern_rule", &["foo.o"], "foo.c -o foo.o\n", "", 0);
}
