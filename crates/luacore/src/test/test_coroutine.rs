//! Coroutine resume/yield identity (spec.md §8 invariant 7, scenario S4),
//! and yield-inside-`__close` (scenario S4's own focus).

use super::run_ok;

#[test]
fn resume_yield_round_trip_identity() {
    run_ok(
        r#"
        local co = coroutine.create(function(x)
            local y = coroutine.yield(x + 1)
            return y + 1
        end)
        local ok1, v1 = coroutine.resume(co, 10)
        assert(ok1 and v1 == 11)
        local ok2, v2 = coroutine.resume(co, 20)
        assert(ok2 and v2 == 21)
        assert(coroutine.status(co) == "dead")
        "#,
    );
}

#[test]
fn resume_after_error_marks_dead_and_returns_false() {
    run_ok(
        r#"
        local co = coroutine.create(function() error("boom") end)
        local ok, err = coroutine.resume(co)
        assert(not ok)
        assert(tostring(err):match("boom"))
        assert(coroutine.status(co) == "dead")
        "#,
    );
}

#[test]
fn wrap_propagates_errors_to_the_caller() {
    run_ok(
        r#"
        local f = coroutine.wrap(function() error("nope") end)
        local ok = pcall(f)
        assert(not ok)
        "#,
    );
}

#[test]
fn isyieldable_reflects_running_context() {
    run_ok(
        r#"
        assert(not coroutine.isyieldable())
        local co = coroutine.create(function()
            assert(coroutine.isyieldable())
        end)
        coroutine.resume(co)
        "#,
    );
}

#[test]
fn s4_yield_inside_close_scenario() {
    let results = crate::execute(
        r#"
        local function f2c(fn) return setmetatable({}, {__close=fn}) end
        local co = coroutine.wrap(function()
          local x <close> = f2c(function() coroutine.yield("in-close") end)
          return "done"
        end)
        return co(), co()
        "#,
        "=test",
    )
    .expect("S4 should succeed");
    assert_eq!(results[0].as_str().unwrap().to_str_lossy(), "in-close");
    assert_eq!(results[1].as_str().unwrap().to_str_lossy(), "done");
}
