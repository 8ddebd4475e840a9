//! To-be-closed (`<close>`) semantics: ordering (spec.md §8 invariant 4),
//! error chaining (invariant 5), and scenario S3.

use super::run_ok;

#[test]
fn close_runs_in_reverse_declaration_order_on_fallthrough() {
    run_ok(
        r#"
        local log = {}
        do
            local a <close> = setmetatable({}, {__close = function() table.insert(log, "a") end})
            local b <close> = setmetatable({}, {__close = function() table.insert(log, "b") end})
        end
        assert(log[1] == "b" and log[2] == "a")
        "#,
    );
}

#[test]
fn close_runs_on_break_and_return() {
    run_ok(
        r#"
        local log = {}
        local function mk(id) return setmetatable({}, {__close = function() table.insert(log, id) end}) end
        for i = 1, 3 do
            local c <close> = mk(i)
            if i == 2 then break end
        end
        assert(#log == 2 and log[1] == 1 and log[2] == 2)

        local function f()
            local c <close> = mk("ret")
            return 1
        end
        f()
        assert(log[3] == "ret")
        "#,
    );
}

#[test]
fn nil_or_false_close_value_is_a_no_op() {
    run_ok(
        r#"
        local ok = pcall(function()
            local a <close> = nil
            local b <close> = false
        end)
        assert(ok)
        "#,
    );
}

#[test]
fn non_closable_value_is_an_error() {
    let err = super::run_err(
        r#"
        local a <close> = {}
        "#,
    );
    assert!(err.contains("close"), "unexpected message: {err}");
}

#[test]
fn s3_close_chain_scenario() {
    let results = crate::execute(
        r#"
        local function c(id, raise) return setmetatable({}, {__close=function(_,e)
          if raise then error("@"..id) end end}) end
        local ok, err = pcall(function()
          local x <close> = c("x", false)
          local y <close> = c("y", true)
          error(4)
        end)
        return ok, tostring(err):match("@%a+")
        "#,
        "=test",
    )
    .expect("S3 should succeed");
    assert!(matches!(results[0], crate::value::LuaValue::Boolean(false)));
    assert_eq!(results[1].as_str().unwrap().to_str_lossy(), "@y");
}
