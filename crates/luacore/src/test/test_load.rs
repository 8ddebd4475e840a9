//! Bytecode round-trip (spec.md §8 invariant 1): `load(dump(proto))`
//! behaves identically to the source it was compiled from.

use crate::value::LuaValue;
use crate::Vm;

fn compile_proto(source: &str) -> std::rc::Rc<crate::value::Proto> {
    let tokens = crate::lexer::Lexer::new(source.as_bytes(), "=test".to_string())
        .tokenize()
        .unwrap();
    let chunk = crate::parser::parse(&tokens, "=test".to_string()).unwrap();
    std::rc::Rc::new(crate::compiler::compile(&chunk, "=test".to_string()).unwrap())
}

#[test]
fn dump_then_load_round_trips_a_simple_function() {
    let proto = compile_proto("return 1 + 2 * 3");
    let bytes = crate::vm::load::dump(&proto, false);
    assert!(crate::vm::load::is_binary_chunk(&bytes));

    let mut vm = Vm::new();
    let closure = crate::vm::load::load(&mut vm, &bytes, "=chunk").unwrap();
    let results = vm.call(LuaValue::Function(closure), Vec::new()).unwrap();
    assert_eq!(results[0].as_integer_strict(), Some(7));
}

#[test]
fn dump_then_load_preserves_closures_and_upvalues() {
    let proto = compile_proto(
        r#"
        local function mk()
            local i = 0
            return function() i = i + 1; return i end
        end
        local f = mk()
        return f(), f(), f()
        "#,
    );
    let bytes = crate::vm::load::dump(&proto, false);
    let mut vm = Vm::new();
    let closure = crate::vm::load::load(&mut vm, &bytes, "=chunk").unwrap();
    let results = vm.call(LuaValue::Function(closure), Vec::new()).unwrap();
    let nums: Vec<i64> = results.iter().map(|v| v.as_integer_strict().unwrap()).collect();
    assert_eq!(nums, vec![1, 2, 3]);
}

#[test]
fn strip_mode_still_round_trips_behavior() {
    let proto = compile_proto("local x = 10; return x * x");
    let bytes = crate::vm::load::dump(&proto, true);
    let mut vm = Vm::new();
    let closure = crate::vm::load::load(&mut vm, &bytes, "=chunk").unwrap();
    let results = vm.call(LuaValue::Function(closure), Vec::new()).unwrap();
    assert_eq!(results[0].as_integer_strict(), Some(100));
}

#[test]
fn load_rejects_a_corrupted_header() {
    let mut vm = Vm::new();
    let err = crate::vm::load::load(&mut vm, b"not a chunk at all", "=bad").unwrap_err();
    assert!(err.message_string().contains("not a precompiled chunk"));
}

#[test]
fn string_dump_global_round_trips_through_load() {
    let mut vm = Vm::new();
    let results = vm
        .execute(
            r#"
            local function f(x) return x * 2 end
            local bytes = string.dump(f)
            local g = load(bytes)
            return g(21)
            "#,
            "=test",
        )
        .unwrap();
    assert_eq!(results[0].as_integer_strict(), Some(42));
}
