//! `coroutine` library (spec.md §4.5.7, §5.3, SPEC_FULL.md §7).
//!
//! The actual resume/yield machinery lives in `vm::dispatch` (`resume_coroutine`,
//! the `yield_write` relay); this module is the thin stdlib surface the
//! teacher's `crates/luars/src/stdlib/coroutine.rs` exposes over it —
//! `create`/`resume`/`yield`/`status`/`running`/`wrap`/`isyieldable`/`close`.
//! `yield` itself needs no VM plumbing beyond what `vm/error.rs` already
//! documents: returning `LuaErrorKind::Yield` through the ordinary `NativeFn`
//! error channel is enough for it to propagate out to `resume_coroutine`.

use crate::stdlib::{arg, bad_arg, check_function, new_lib_table, set_native, set_native_closure};
use crate::value::lua_value::LuaValue;
use crate::value::thread::{LuaThread, ThreadStatus};
use crate::vm::error::{LResult, LuaError};
use crate::vm::{self, Vm};

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "coroutine");
    set_native(vm, &t, "create", co_create);
    set_native(vm, &t, "resume", co_resume);
    set_native(vm, &t, "yield", co_yield);
    set_native(vm, &t, "status", co_status);
    set_native(vm, &t, "running", co_running);
    set_native(vm, &t, "isyieldable", co_isyieldable);
    set_native(vm, &t, "close", co_close);
    set_native_closure(vm, &t, "wrap", Vec::new(), co_wrap_dispatch);
}

fn check_thread(args: &[LuaValue], n: usize, fname: &str) -> LResult<LuaThread> {
    match arg(args, n) {
        LuaValue::Thread(t) => Ok(t),
        other => Err(bad_arg(n, fname, "coroutine", &other)),
    }
}

fn co_create(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let f = check_function(args, 1, "create")?;
    let body = f.as_function().cloned().expect("check_function guarantees a function");
    Ok(vec![LuaValue::Thread(LuaThread::new_coroutine(body))])
}

fn co_resume(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let thread = check_thread(args, 1, "resume")?;
    let rest = if args.len() > 1 { args[1..].to_vec() } else { Vec::new() };
    match vm::resume_coroutine(vm, &thread, rest) {
        Ok(mut values) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.append(&mut values);
            Ok(out)
        }
        Err(e) => Ok(vec![LuaValue::Boolean(false), e.value]),
    }
}

fn co_yield(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Err(LuaError::yield_signal(args.to_vec()))
}

fn co_status(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let thread = check_thread(args, 1, "status")?;
    Ok(vec![vm.new_string(vm::thread_status_name(&thread, vm))])
}

fn co_running(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Thread(vm.current_thread.clone()), LuaValue::Boolean(vm.is_main_thread())])
}

fn co_isyieldable(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Boolean(!vm.is_main_thread())])
}

/// `coroutine.close` (spec.md §4.5.7 Non-goal note, DESIGN.md): marks a
/// suspended or already-dead coroutine `Dead`. Pending `<close>` locals on a
/// closed-while-suspended coroutine are not finalized — documented as a
/// deliberate simplification in DESIGN.md rather than left silently broken.
fn co_close(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let thread = check_thread(args, 1, "close")?;
    match thread.status() {
        ThreadStatus::Dead => Ok(vec![LuaValue::Boolean(true)]),
        ThreadStatus::Suspended => {
            thread.set_status(ThreadStatus::Dead);
            Ok(vec![LuaValue::Boolean(true)])
        }
        _ => Err(LuaError::msg("cannot close a running coroutine")),
    }
}

/// `coroutine.wrap`'s own entry point (registered as a native closure purely
/// because `set_native_closure` is what `stdlib/mod.rs` exposes for it;
/// `wrap` captures nothing itself — each *call* builds a fresh thread and
/// returns a new closure, `wrapped_resume`, that captures it).
fn co_wrap_dispatch(vm: &mut Vm, _captures: &[LuaValue], args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    co_wrap(vm, args)
}

fn co_wrap(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let f = check_function(args, 1, "wrap")?;
    let body = f.as_function().cloned().expect("check_function guarantees a function");
    let thread = LuaThread::new_coroutine(body);
    Ok(vec![LuaValue::Function(crate::value::closure::LuaFunction::native_closure(
        "wrapped coroutine",
        vec![LuaValue::Thread(thread)],
        wrapped_resume,
    ))])
}

fn wrapped_resume(vm: &mut Vm, captures: &[LuaValue], args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let thread = match &captures[0] {
        LuaValue::Thread(t) => t.clone(),
        _ => unreachable!("coroutine.wrap always captures a thread"),
    };
    vm::resume_coroutine(vm, &thread, args.to_vec())
}
