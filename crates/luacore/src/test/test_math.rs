//! `math` library: constants, integer/float subtype preservation, and the
//! handful of functions whose behavior differs from a naive float-only port.

use super::run_ok;

#[test]
fn constants_have_expected_values_and_kinds() {
    run_ok(
        r#"
        assert(math.pi > 3.14159 and math.pi < 3.14160)
        assert(math.huge > 0 and math.huge == math.huge + 1)
        assert(math.maxinteger == 9223372036854775807)
        assert(math.mininteger == -9223372036854775808)
        assert(math.type(math.maxinteger) == "integer")
        assert(math.type(math.huge) == "float")
        "#,
    );
}

#[test]
fn floor_and_ceil_preserve_integer_subtype_when_exact() {
    run_ok(
        r#"
        assert(math.type(math.floor(3.0)) == "integer")
        assert(math.type(math.ceil(3.7)) == "integer")
        assert(math.floor(3.7) == 3)
        assert(math.ceil(3.2) == 4)
        assert(math.floor(-3.7) == -4)
        "#,
    );
}

#[test]
fn abs_keeps_integers_integer_and_floats_float() {
    run_ok(
        r#"
        assert(math.type(math.abs(-5)) == "integer")
        assert(math.abs(-5) == 5)
        assert(math.type(math.abs(-5.5)) == "float")
        assert(math.abs(-5.5) == 5.5)
        "#,
    );
}

#[test]
fn fmod_follows_truncated_division_unlike_percent_operator() {
    run_ok(
        r#"
        assert(math.fmod(-5, 3) == -2)
        assert((-5) % 3 == 1)
        assert(math.type(math.fmod(7, 2)) == "integer")
        "#,
    );
}

#[test]
fn max_and_min_scan_all_arguments() {
    run_ok(
        r#"
        assert(math.max(1, 5, 3, -2) == 5)
        assert(math.min(1, 5, 3, -2) == -2)
        "#,
    );
}

#[test]
fn tointeger_and_type_distinguish_subtypes() {
    run_ok(
        r#"
        assert(math.tointeger(3.0) == 3)
        assert(math.tointeger(3.5) == nil)
        assert(math.tointeger("4") == 4)
        assert(math.type(1) == "integer")
        assert(math.type(1.0) == "float")
        assert(math.type("1") == nil)
        "#,
    );
}

#[test]
fn sqrt_and_trig_are_plain_floats() {
    run_ok(
        r#"
        assert(math.sqrt(16) == 4.0)
        assert(math.type(math.sqrt(16)) == "float")
        local s = math.sin(0)
        assert(s == 0.0)
        "#,
    );
}

#[test]
fn random_with_range_stays_in_bounds() {
    run_ok(
        r#"
        math.randomseed(42)
        for i = 1, 50 do
            local r = math.random(1, 10)
            assert(r >= 1 and r <= 10 and math.type(r) == "integer")
        end
        local f = math.random()
        assert(f >= 0.0 and f < 1.0)
        "#,
    );
}

#[test]
fn modf_splits_integral_and_fractional_parts() {
    run_ok(
        r#"
        local ip, fp = math.modf(3.25)
        assert(ip == 3 and fp == 0.25)
        "#,
    );
}

#[test]
fn abs_rejects_non_numbers() {
    let err = super::run_err(r#"math.abs("x")"#);
    assert!(err.contains("bad argument"), "unexpected message: {err}");
}

#[test]
fn large_float_tostring_matches_format_14g() {
    run_ok(
        r#"
        assert(tostring(2.0^53) == string.format("%.14g", 2.0^53))
        assert(tostring(1e14) ~= tostring(1e13))
        assert(string.format("%.14g", 1e14) == "1e+14")
        "#,
    );
}
