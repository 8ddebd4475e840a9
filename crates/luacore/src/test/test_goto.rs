//! goto/label resolution rules (spec.md §4.3.4) beyond the ones already
//! exercised as compile-error scenarios in `test_syntax`.

use super::run_ok;

#[test]
fn backward_goto_loop() {
    run_ok(
        r#"
        local i = 0
        ::top::
        i = i + 1
        if i < 5 then goto top end
        assert(i == 5)
        "#,
    );
}

#[test]
fn goto_forward_past_end_of_block_is_fine_without_skipping_locals() {
    run_ok(
        r#"
        do
            goto done
            print("unreachable")
            ::done::
        end
        assert(true)
        "#,
    );
}

#[test]
fn continue_style_goto_to_end_of_loop_body() {
    run_ok(
        r#"
        local sum = 0
        for i = 1, 5 do
            if i % 2 == 0 then goto continue end
            sum = sum + i
            ::continue::
        end
        assert(sum == 9)
        "#,
    );
}

#[test]
fn label_is_not_visible_outside_its_block() {
    let err = match crate::execute("do ::inner:: end goto inner", "=test") {
        Ok(_) => panic!("expected a compile error"),
        Err(e) => e.message_string(),
    };
    assert!(err.contains("no visible label"), "unexpected message: {err}");
}
