//! Upvalue capture and sharing (spec.md §8 invariant 6, scenario S2).

use super::run_ok;

#[test]
fn s2_counter_closure_scenario() {
    let results = crate::execute(
        r#"
        local function mk() local i=0; return function() i=i+1; return i end end
        local f = mk(); return f(), f(), f()
        "#,
        "=test",
    )
    .expect("S2 should succeed");
    let nums: Vec<i64> = results.iter().map(|v| v.as_integer_strict().unwrap()).collect();
    assert_eq!(nums, vec![1, 2, 3]);
}

#[test]
fn two_closures_share_the_same_upvalue() {
    run_ok(
        r#"
        local function make_getset()
            local value = 10
            local function get() return value end
            local function set(v) value = v end
            return get, set
        end
        local get, set = make_getset()
        assert(get() == 10)
        set(20)
        assert(get() == 20)
        "#,
    );
}

#[test]
fn closure_captures_loop_variable_per_iteration() {
    run_ok(
        r#"
        local funcs = {}
        for i = 1, 3 do
            funcs[i] = function() return i end
        end
        assert(funcs[1]() == 1)
        assert(funcs[2]() == 2)
        assert(funcs[3]() == 3)
        "#,
    );
}

#[test]
fn nested_closures_capture_through_multiple_levels() {
    run_ok(
        r#"
        local function outer(x)
            return function(y)
                return function(z) return x + y + z end
            end
        end
        assert(outer(1)(2)(3) == 6)
        "#,
    );
}

#[test]
fn closed_upvalue_survives_enclosing_frame_exit() {
    run_ok(
        r#"
        local function mk()
            local v = "hi"
            return function() return v end
        end
        local f = mk()
        collectgarbage()
        assert(f() == "hi")
        "#,
    );
}
