//! Error message shape: name hints (spec.md §7, scenario S6) and
//! source-location prefixing (spec.md §8 invariant 8).

use super::run_err;

#[test]
fn s6_global_name_hint_scenario() {
    let results = crate::execute(
        r#"
        local ok, err = pcall(function() aaa={}; return aaa+1 end)
        return err:match("global 'aaa'") ~= nil
        "#,
        "=test",
    )
    .expect("S6 should succeed");
    assert!(matches!(results[0], crate::value::LuaValue::Boolean(true)));
}

#[test]
fn local_name_hint_on_call() {
    let err = run_err(
        r#"
        local notafunction = 5
        notafunction()
        "#,
    );
    assert!(err.contains("local 'notafunction'"), "unexpected message: {err}");
}

#[test]
fn field_name_hint_on_index() {
    let err = run_err(
        r#"
        local t = {}
        return t.missing.field
        "#,
    );
    assert!(err.contains("field 'missing'"), "unexpected message: {err}");
}

#[test]
fn runtime_error_is_prefixed_with_source_and_line() {
    let err = run_err(
        r#"
        local x = nil
        return x + 1
        "#,
    );
    assert!(err.starts_with("test:"), "unexpected message: {err}");
}

#[test]
fn error_level_zero_suppresses_location() {
    let err = run_err("error('plain', 0)");
    assert_eq!(err, "plain");
}

#[test]
fn error_with_nonstring_value_is_not_prefixed() {
    let results = crate::execute(
        r#"
        local ok, err = pcall(function() error({code = 42}) end)
        return ok, err.code
        "#,
        "=test",
    )
    .expect("should succeed");
    assert!(matches!(results[0], crate::value::LuaValue::Boolean(false)));
    assert_eq!(results[1].as_integer_strict(), Some(42));
}

#[test]
fn bad_argument_shape() {
    let err = run_err("return string.rep(nil, 1)");
    assert!(err.contains("bad argument"), "unexpected message: {err}");
}
