//! Standard library bodies (spec.md §1 "a correct implementation of the
//! core must expose the extension points those libraries use"; SPEC_FULL.md
//! §7 supplements the distilled core with working bodies so the example
//! scenarios in spec.md §8 actually run).
//!
//! Grounded on the teacher's `crates/luars/src/stdlib/*`: one file per
//! library, each exposing an `install` function that populates a table and
//! (for the basic library) the globals directly. `Vm::new` calls
//! [`install`] once, the way the teacher's `LuaVM::new` registers its
//! `lib_registry` modules.

pub mod basic;
pub mod coroutine;
pub mod debug;
pub mod io;
pub mod math;
pub mod os;
pub mod package;
pub mod string;
pub mod table;
pub mod utf8;

use crate::value::closure::{LuaFunction, NativeClosureFn, NativeFn};
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

/// Registers every standard global and library table on a freshly built
/// `Vm` (spec.md §6 "Standard globals the core publishes").
pub fn install(vm: &mut Vm) {
    basic::install(vm);
    let string_lib = string::install(vm);
    table::install(vm);
    math::install(vm);
    os::install(vm);
    io::install(vm);
    coroutine::install(vm);
    debug::install(vm);
    utf8::install(vm);
    package::install(vm);

    // Strings index into the `string` library by default (`("x"):upper()`),
    // spec.md §4.4 "metamethod dispatch" applied to the string type itself.
    let string_mt = LuaTable::new();
    string_mt.set_string_key(vm, "__index", LuaValue::Table(string_lib));
    vm.string_metatable = Some(string_mt);
}

/// Sets `table[name] = function` for a native library entry, interning
/// `name` through the VM so table lookups by Lua source and by this
/// registration path hash identically.
pub fn set_native(vm: &mut Vm, table: &LuaTable, name: &'static str, f: NativeFn) {
    let key = vm.new_string(name);
    let _ = table.raw_set(key, LuaValue::Function(LuaFunction::native(name, f)));
}

pub fn set_native_closure(vm: &mut Vm, table: &LuaTable, name: &'static str, captures: Vec<LuaValue>, f: NativeClosureFn) {
    let key = vm.new_string(name);
    let _ = table.raw_set(key, LuaValue::Function(LuaFunction::native_closure(name, captures, f)));
}

/// Creates `name` as a new global table and returns it, for library modules
/// that publish a `string`/`table`/`math`/... global (spec.md §6).
pub fn new_lib_table(vm: &mut Vm, name: &str) -> LuaTable {
    let t = LuaTable::new();
    let key = vm.new_string(name);
    let _ = vm.globals.raw_set(key, LuaValue::Table(t.clone()));
    t
}

/// Convenience extension used throughout the stdlib to set a string-keyed
/// field on any table from a `&mut Vm` (interning the key).
pub trait TableExt {
    fn set_string_key(&self, vm: &mut Vm, key: &str, value: LuaValue);
}

impl TableExt for LuaTable {
    fn set_string_key(&self, vm: &mut Vm, key: &str, value: LuaValue) {
        let k = vm.new_string(key);
        let _ = self.raw_set(k, value);
    }
}

// ---------------------------------------------------------------------
// Shared argument-checking helpers (grounded on the teacher's
// `crates/luars/src/stdlib/*`'s `checknumber`/`checkstring`/`checktable`
// family, which every library file repeats against `LuaState::get_arg`).
// ---------------------------------------------------------------------

pub fn arg(args: &[LuaValue], n: usize) -> LuaValue {
    args.get(n.wrapping_sub(1)).cloned().unwrap_or(LuaValue::Nil)
}

pub fn bad_arg(n: usize, fname: &str, expected: &str, got: &LuaValue) -> LuaError {
    if got.is_nil() && n > 0 {
        LuaError::msg(format!("bad argument #{n} to '{fname}' ({expected} expected, got no value)"))
    } else {
        LuaError::msg(format!("bad argument #{n} to '{fname}' ({expected} expected, got {})", got.type_name()))
    }
}

pub fn check_number(args: &[LuaValue], n: usize, fname: &str) -> LResult<f64> {
    let v = arg(args, n);
    v.coerce_to_number()
        .and_then(|v| v.as_float())
        .ok_or_else(|| bad_arg(n, fname, "number", &v))
}

pub fn check_integer(args: &[LuaValue], n: usize, fname: &str) -> LResult<i64> {
    let v = arg(args, n);
    if let Some(i) = v.coerce_to_number().and_then(|v| v.as_integer()) {
        return Ok(i);
    }
    if v.is_number() {
        return Err(LuaError::msg(format!("bad argument #{n} to '{fname}' (number has no integer representation)")));
    }
    Err(bad_arg(n, fname, "number", &v))
}

pub fn opt_integer(args: &[LuaValue], n: usize, fname: &str, default: i64) -> LResult<i64> {
    if arg(args, n).is_nil() {
        Ok(default)
    } else {
        check_integer(args, n, fname)
    }
}

pub fn opt_number(args: &[LuaValue], n: usize, fname: &str, default: f64) -> LResult<f64> {
    if arg(args, n).is_nil() {
        Ok(default)
    } else {
        check_number(args, n, fname)
    }
}

pub fn check_str(args: &[LuaValue], n: usize, fname: &str) -> LResult<crate::value::LuaStr> {
    match arg(args, n) {
        LuaValue::Str(s) => Ok(s),
        LuaValue::Integer(i) => Ok(crate::value::LuaStr::new(i.to_string().into_bytes().into_boxed_slice(), 0)),
        LuaValue::Float(f) => Ok(crate::value::LuaStr::new(format!("{f}").into_bytes().into_boxed_slice(), 0)),
        other => Err(bad_arg(n, fname, "string", &other)),
    }
}

pub fn opt_str(args: &[LuaValue], n: usize, fname: &str, default: &str) -> LResult<crate::value::LuaStr> {
    if arg(args, n).is_nil() {
        Ok(crate::value::LuaStr::new(default.as_bytes().to_vec().into_boxed_slice(), 0))
    } else {
        check_str(args, n, fname)
    }
}

pub fn check_table(args: &[LuaValue], n: usize, fname: &str) -> LResult<LuaTable> {
    match arg(args, n) {
        LuaValue::Table(t) => Ok(t),
        other => Err(bad_arg(n, fname, "table", &other)),
    }
}

pub fn check_function(args: &[LuaValue], n: usize, fname: &str) -> LResult<LuaValue> {
    let v = arg(args, n);
    if v.as_function().is_some() {
        Ok(v)
    } else {
        Err(bad_arg(n, fname, "function", &v))
    }
}
