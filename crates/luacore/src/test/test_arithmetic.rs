//! Numeric subtype conservation (spec.md §8 invariant 2) and related
//! arithmetic/comparison semantics.

use super::run_ok;

#[test]
fn integer_ops_stay_integer() {
    run_ok(
        r#"
        assert(math.type(1 + 1) == "integer")
        assert(math.type(7 // 2) == "integer")
        assert(7 // 2 == 3)
        assert(math.type(2 * 3) == "integer")
        assert(math.type(5 - 2) == "integer")
        "#,
    );
}

#[test]
fn float_operand_forces_float_result() {
    run_ok(
        r#"
        assert(math.type(1 + 1.0) == "float")
        assert(math.type(2.0 * 3) == "float")
        assert(math.type(1 / 1) == "float")
        assert(math.type(2 ^ 2) == "float")
        "#,
    );
}

#[test]
fn integer_float_cross_type_equality() {
    run_ok("assert(1 == 1.0)")
    ;
    run_ok("assert(1.5 ~= 1)");
}

#[test]
fn integer_overflow_wraps() {
    run_ok(
        r#"
        local max = math.maxinteger
        assert(max + 1 == math.mininteger)
        "#,
    );
}

#[test]
fn modulo_follows_floor_convention() {
    run_ok(
        r#"
        assert(-5 % 3 == 1)
        assert(5 % -3 == -1)
        "#,
    );
}

#[test]
fn integer_division_by_zero_errors() {
    let err = super::run_err("return 1 // 0");
    assert!(err.contains("n//0"), "unexpected message: {err}");
}

#[test]
fn integer_modulo_by_zero_errors() {
    let err = super::run_err("return 1 % 0");
    assert!(err.contains("n%0"), "unexpected message: {err}");
}

#[test]
fn float_division_by_zero_is_inf() {
    run_ok("assert(1 / 0 == math.huge)");
}

#[test]
fn bitwise_requires_integer_representable() {
    run_ok("assert(5 & 3 == 1)");
    let err = super::run_err("return 1.5 & 1");
    assert!(err.contains("no integer representation"), "unexpected message: {err}");
}

#[test]
fn concat_folds_a_run_into_one_pass() {
    run_ok(r#"assert("a" .. "b" .. "c" .. 1 == "abc1")"#);
}

#[test]
fn comparison_mixing_numbers_and_strings_errors() {
    let err = super::run_err(r#"return 1 < "2""#);
    assert!(err.contains("attempt to compare"), "unexpected message: {err}");
}

#[test]
fn s1_integer_vs_float_scenario() {
    let results = crate::execute(
        "return math.type(1//1), math.type(1/1), 1 == 1.0",
        "=test",
    )
    .expect("S1 should succeed");
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_str().unwrap().to_str_lossy(), "integer");
    assert_eq!(results[1].as_str().unwrap().to_str_lossy(), "float");
    assert!(matches!(results[2], crate::value::LuaValue::Boolean(true)));
}
