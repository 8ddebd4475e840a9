//! Table array+hash duality, float/integer key coercion, and the length
//! operator's border property (spec.md §8 invariant 3).

use super::run_ok;

#[test]
fn length_after_sequential_fill_equals_n() {
    run_ok(
        r#"
        for n = 1, 20 do
            local t = {}
            for i = 1, n do t[i] = i * 2 end
            assert(#t == n, "expected " .. n .. " got " .. #t)
        end
        "#,
    );
}

#[test]
fn float_key_equal_to_an_integer_is_stored_under_the_integer() {
    run_ok(
        r#"
        local t = {}
        t[3.0] = "three"
        assert(t[3] == "three")
        t[4] = "four"
        assert(t[4.0] == "four")
        "#,
    );
}

#[test]
fn non_integer_float_keys_use_the_hash_part() {
    run_ok(
        r#"
        local t = {}
        t[1.5] = "onefive"
        assert(t[1.5] == "onefive")
        assert(#t == 0)
        "#,
    );
}

#[test]
fn nil_key_is_rejected() {
    let err = super::run_err("local t = {}; t[nil] = 1");
    assert!(err.contains("nil"), "unexpected message: {err}");
}

#[test]
fn nan_key_is_rejected() {
    let err = super::run_err("local t = {}; t[0/0] = 1");
    assert!(err.contains("nan") || err.contains("NaN"), "unexpected message: {err}");
}

#[test]
fn table_constructor_mixes_array_and_hash_parts() {
    run_ok(
        r#"
        local t = {1, 2, 3, x = "hi", [10] = "ten"}
        assert(t[1] == 1 and t[2] == 2 and t[3] == 3)
        assert(t.x == "hi")
        assert(t[10] == "ten")
        assert(#t == 3)
        "#,
    );
}

#[test]
fn next_and_pairs_visit_every_entry_once() {
    run_ok(
        r#"
        local t = {10, 20, 30, x = "a", y = "b"}
        local seen = 0
        for k, v in pairs(t) do
            seen = seen + 1
        end
        assert(seen == 5)
        "#,
    );
}

#[test]
fn metatable_index_and_newindex_dispatch() {
    run_ok(
        r#"
        local base = {greeting = "hi"}
        local t = setmetatable({}, {__index = base})
        assert(t.greeting == "hi")

        local log = {}
        local proxy = setmetatable({}, {__newindex = function(_, k, v) log[k] = v end})
        proxy.x = 42
        assert(log.x == 42)
        assert(rawget(proxy, "x") == nil)
        "#,
    );
}

#[test]
fn table_library_insert_remove_sort_concat() {
    run_ok(
        r#"
        local t = {3, 1, 2}
        table.sort(t)
        assert(t[1] == 1 and t[2] == 2 and t[3] == 3)
        table.insert(t, 4)
        assert(#t == 4 and t[4] == 4)
        table.remove(t, 1)
        assert(t[1] == 2 and #t == 3)
        assert(table.concat(t, ",") == "2,3,4")
        "#,
    );
}
