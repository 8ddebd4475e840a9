//! The instruction dispatch loop: call/return, tail calls, upvalue
//! open/close bookkeeping, to-be-closed variable handling, and coroutine
//! resume/yield (spec.md §4.3, §4.5, §5).
//!
//! Grounded on the teacher's `crates/luars/src/lua_vm/dispatcher/` (a
//! `Vec<CallInfo>`-driven loop rather than native recursion, so `yield` is
//! just "stop looping"). This implementation keeps that shape but dispatches
//! over the tagged `Instruction` enum from `opcode` instead of a packed
//! word, and represents to-be-closed variable handling as an explicit,
//! resumable `CloseChain` carried on the thread rather than Rust-stack state,
//! so a `__close` handler that yields suspends the same way any other call
//! does (see `value::thread::CloseChain`'s doc comment).

use std::rc::Rc;

use crate::opcode::{CloseMode, Instruction, NameHint, RK};
use crate::value::closure::{LuaClosure, LuaFunction, Upvalue};
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::value::proto::Proto;
use crate::value::thread::{CallFrame, CloseChain, LuaThread, PendingClose, ThreadStatus};

use super::error::{LResult, LuaError, LuaErrorKind};
use super::metamethods as mm;
use super::Vm;

/// Hard cap on how many times a `__call`/metamethod chain is allowed to
/// re-dispatch a non-callable value before giving up (mirrors
/// `metamethods::MAX_METACHAIN`, kept local since call dispatch lives here).
const MAX_CALL_CHAIN: usize = 100;

// ---------------------------------------------------------------------
// Frame setup
// ---------------------------------------------------------------------

/// Lays out `args` into `thread`'s register stack starting at `base` and
/// returns the overflow to be stored as the frame's varargs.
fn install_registers(thread: &LuaThread, base: usize, proto: &Proto, mut args: Vec<LuaValue>) -> Vec<LuaValue> {
    let want = base + proto.max_stack_size.max(proto.param_count) as usize;
    {
        let mut stack = thread.0.stack.borrow_mut();
        if stack.len() < want {
            stack.resize(want, LuaValue::Nil);
        }
    }
    let param_count = proto.param_count as usize;
    let varargs = if proto.is_vararg && args.len() > param_count {
        args.split_off(param_count)
    } else {
        Vec::new()
    };
    for (i, arg) in args.into_iter().enumerate() {
        if i >= param_count {
            break;
        }
        thread.set_register_at(base + i, arg);
    }
    varargs
}

/// Pushes the outermost frame of a fresh `Vm::call` into `thread` (spec.md
/// §4.5.3). Its results are handed straight back to the Rust caller of
/// `run_frame_loop`, never written into another frame's registers.
pub fn push_lua_call(thread: &LuaThread, func: LuaFunction, args: Vec<LuaValue>, result_dst: Option<usize>) {
    let base = thread.stack_len();
    let closure = match &func {
        LuaFunction::Lua(c) => c.clone(),
        LuaFunction::Native(_) | LuaFunction::NativeClosure(_) => {
            // Native bodies (e.g. a coroutine created over a C-style
            // function) never run through the bytecode loop; callers that
            // need this case (`resume_coroutine`) special-case it before
            // reaching here.
            thread.push_frame(CallFrame {
                func,
                base,
                pc: 0,
                nresults: None,
                is_tail_call: false,
                varargs: Vec::new(),
                result_dst,
                is_close_handler: false,
            });
            return;
        }
    };
    let varargs = install_registers(thread, base, &closure.0.proto, args);
    thread.push_frame(CallFrame {
        func: LuaFunction::Lua(closure),
        base,
        pc: 0,
        nresults: None,
        is_tail_call: false,
        varargs,
        result_dst,
        is_close_handler: false,
    });
}

fn push_lua_call_tagged(
    thread: &LuaThread,
    closure: LuaClosure,
    args: Vec<LuaValue>,
    nresults: Option<u8>,
    result_dst: Option<usize>,
    is_close_handler: bool,
) {
    let base = thread.stack_len();
    let varargs = install_registers(thread, base, &closure.0.proto, args);
    thread.push_frame(CallFrame {
        func: LuaFunction::Lua(closure),
        base,
        pc: 0,
        nresults,
        is_tail_call: false,
        varargs,
        result_dst,
        is_close_handler,
    });
}

// ---------------------------------------------------------------------
// Register / operand helpers
// ---------------------------------------------------------------------

fn rk_value(thread: &LuaThread, base: usize, proto: &Proto, rk: RK) -> LuaValue {
    match rk {
        RK::Reg(r) => thread.register_at(base + r as usize),
        RK::Const(k) => proto.constants[k as usize].clone(),
    }
}

fn find_or_open_upvalue(thread: &LuaThread, index: usize) -> Upvalue {
    {
        let open = thread.0.open_upvalues.borrow();
        for uv in open.iter() {
            if uv.points_to(thread, index) {
                return uv.clone();
            }
        }
    }
    let uv = Upvalue::open(thread.clone(), index);
    thread.0.open_upvalues.borrow_mut().push(uv.clone());
    uv
}

/// Closes (copies off the stack into owned storage) every open upvalue
/// pointing at or above `from` — run whenever a frame, block, or loop
/// iteration whose registers they reference goes out of scope.
fn close_upvalues_from(thread: &LuaThread, from: usize) {
    let mut open = thread.0.open_upvalues.borrow_mut();
    open.retain(|uv| match uv.open_index() {
        Some(idx) if idx >= from => {
            uv.close();
            false
        }
        _ => true,
    });
}

/// Entries in a proto's to-be-closed register range, highest register
/// (most recently declared) first, live at `pc` (spec.md §4.5.7).
fn collect_close_entries(proto: &Proto, frame_base: usize, min_register: u8, pc: u32) -> Vec<(usize, String)> {
    let mut entries: Vec<(u8, &str)> = proto
        .locals
        .iter()
        .filter(|l| l.is_close && l.register >= min_register && l.start_pc <= pc && pc <= l.end_pc)
        .map(|l| (l.register, l.name.as_str()))
        .collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    entries.into_iter().map(|(r, name)| (frame_base + r as usize, name.to_string())).collect()
}

fn current_proto(thread: &LuaThread) -> Option<Rc<Proto>> {
    match thread.current_closure()? {
        LuaFunction::Lua(c) => Some(c.0.proto.clone()),
        LuaFunction::Native(_) | LuaFunction::NativeClosure(_) => None,
    }
}

fn augment_hint(proto: &Proto, pc: u32, err: LuaError, rk_a: RK, a: &LuaValue, rk_b: Option<(RK, &LuaValue)>) -> LuaError {
    let LuaValue::Str(s) = &err.value else { return err };
    let text = s.to_str_lossy();
    let applies = text.ends_with("value")
        && (text.contains("perform arithmetic on")
            || text.contains("perform bitwise operation on")
            || text.contains("get length of")
            || text.contains("concatenate a"));
    if !applies {
        return err;
    }
    let (rk, bad_val) = match rk_b {
        Some((rk_b, b)) if a.coerce_to_number().is_none() => {
            if b.coerce_to_number().is_none() && a.type_name() != bad_type_from_message(&text) {
                (rk_b, b)
            } else {
                (rk_a, a)
            }
        }
        Some((rk_b, b)) => (rk_b, b),
        None => (rk_a, a),
    };
    let _ = bad_val;
    let hint = mm::describe_operand(proto, pc, rk);
    let suffix = mm::hint_suffix(&hint);
    if suffix.is_empty() {
        err
    } else {
        LuaError::msg(format!("{text}{suffix}"))
    }
}

fn bad_type_from_message(text: &str) -> &'static str {
    for ty in ["nil", "boolean", "table", "function", "userdata", "thread", "string", "number"] {
        if text.contains(&format!("a {ty} value")) {
            return ty;
        }
    }
    ""
}

// ---------------------------------------------------------------------
// The main loop
// ---------------------------------------------------------------------

/// Runs `thread` until its frame stack returns to `base_depth` (the depth it
/// had when this call started), returning that frame's results. Lua-to-Lua
/// calls never recurse into Rust here: `CALL` just pushes another
/// `CallFrame` and the same loop keeps going (spec.md Design Notes).
pub fn run_frame_loop(vm: &mut Vm, thread: &LuaThread, base_depth: usize) -> LResult<Vec<LuaValue>> {
    loop {
        if thread.frame_depth() <= base_depth {
            return Ok(Vec::new());
        }
        match run_one(vm, thread, base_depth) {
            Ok(Some(values)) => return Ok(values),
            Ok(None) => continue,
            Err(e) if e.is_yield() => return Err(e),
            Err(e) => {
                let e = locate_error(thread, e);
                let e = propagate_error(vm, thread, base_depth, e);
                return Err(e);
            }
        }
    }
}

/// Executes a single bytecode instruction of the thread's top frame.
/// `Ok(Some(values))` means the frame at `base_depth` itself returned and
/// `values` should be handed back to whoever called `run_frame_loop`.
fn run_one(vm: &mut Vm, thread: &LuaThread, base_depth: usize) -> LResult<Option<Vec<LuaValue>>> {
    let proto = match current_proto(thread) {
        Some(p) => p,
        None => return Ok(None),
    };
    let base = thread.current_frame_base();
    let pc = thread.current_frame_pc();
    let instr = proto.code[pc as usize].clone();
    thread.set_current_frame_pc(pc + 1);
    fire_line_hook(vm, thread, &proto, pc)?;

    macro_rules! reg {
        ($r:expr) => {
            thread.register_at(base + $r as usize)
        };
    }
    macro_rules! set_reg {
        ($r:expr, $v:expr) => {
            thread.set_register_at(base + $r as usize, $v)
        };
    }
    macro_rules! rk {
        ($rk:expr) => {
            rk_value(thread, base, &proto, $rk)
        };
    }

    use Instruction::*;
    match instr {
        Move { dst, src } => set_reg!(dst, reg!(src)),
        LoadK { dst, k } => set_reg!(dst, proto.constants[k as usize].clone()),
        LoadI { dst, imm } => set_reg!(dst, LuaValue::Integer(imm as i64)),
        LoadF { dst, imm } => set_reg!(dst, LuaValue::Float(imm)),
        LoadBool { dst, value, skip_next } => {
            set_reg!(dst, LuaValue::Boolean(value));
            if skip_next {
                thread.set_current_frame_pc(thread.current_frame_pc() + 1);
            }
        }
        LoadNil { dst, count } => {
            for i in 0..=count {
                set_reg!(dst + i, LuaValue::Nil);
            }
        }
        GetUpval { dst, upval } => {
            let closure = lua_closure(thread)?;
            set_reg!(dst, closure.0.upvalues[upval as usize].get());
        }
        SetUpval { upval, src } => {
            let closure = lua_closure(thread)?;
            closure.0.upvalues[upval as usize].set(reg!(src));
        }
        GetEnvField { dst, env_upval, key, hint } => {
            let closure = lua_closure(thread)?;
            let env = closure.0.upvalues[env_upval as usize].get();
            let key_val = proto.constants[key as usize].clone();
            let v = mm::index(vm, &env, &key_val, &hint)?;
            set_reg!(dst, v);
        }
        SetEnvField { env_upval, key, src, hint } => {
            let closure = lua_closure(thread)?;
            let env = closure.0.upvalues[env_upval as usize].get();
            let key_val = proto.constants[key as usize].clone();
            let v = rk!(src);
            mm::newindex(vm, &env, key_val, v, &hint)?;
        }
        NewTable { dst, narr, nhash } => {
            set_reg!(dst, LuaValue::Table(LuaTable::with_capacity(narr as usize, nhash as usize)));
        }
        GetTable { dst, table, key, hint } => {
            let obj = reg!(table);
            let key_val = rk!(key);
            let hint = if matches!(hint, NameHint::None) {
                mm::describe_register(&proto, pc, table)
            } else {
                hint
            };
            let v = mm::index(vm, &obj, &key_val, &hint)?;
            set_reg!(dst, v);
        }
        SetTable { table, key, value, hint } => {
            let obj = reg!(table);
            let key_val = rk!(key);
            let v = rk!(value);
            let hint = if matches!(hint, NameHint::None) {
                mm::describe_register(&proto, pc, table)
            } else {
                hint
            };
            mm::newindex(vm, &obj, key_val, v, &hint)?;
        }
        GetField { dst, table, key, hint: _ } => {
            let obj = reg!(table);
            let key_val = proto.constants[key as usize].clone();
            let hint = mm::describe_register(&proto, pc, table);
            let v = mm::index(vm, &obj, &key_val, &hint)?;
            set_reg!(dst, v);
        }
        SetField { table, key, value, hint: _ } => {
            let obj = reg!(table);
            let key_val = proto.constants[key as usize].clone();
            let v = rk!(value);
            let hint = mm::describe_register(&proto, pc, table);
            mm::newindex(vm, &obj, key_val, v, &hint)?;
        }
        SelfOp { dst, table, key, hint: _ } => {
            let obj = reg!(table);
            let key_val = proto.constants[key as usize].clone();
            let hint = mm::describe_register(&proto, pc, table);
            let method = mm::index(vm, &obj, &key_val, &hint)?;
            set_reg!(dst + 1, obj);
            set_reg!(dst, method);
        }
        SetList { table, start, count, block } => {
            let t = reg!(table);
            let Some(t) = t.as_table().cloned() else {
                return Err(LuaError::msg("attempt to build a list on a non-table value"));
            };
            let n = if count == 0 {
                // open-ended: consume up to the dynamic stack top
                (thread.top() as isize - (base + start as usize) as isize).max(0) as usize
            } else {
                count as usize
            };
            let first_index = (block as i64) * 50 + 1;
            for i in 0..n {
                let v = thread.register_at(base + start as usize + i);
                t.set_int(first_index + i as i64, v);
            }
        }
        Add { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::arith(vm, mm::ArithOp::Add, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Sub { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::arith(vm, mm::ArithOp::Sub, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Mul { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::arith(vm, mm::ArithOp::Mul, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Div { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::arith(vm, mm::ArithOp::Div, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        IDiv { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            mm::check_integer_divmod_zero(mm::ArithOp::IDiv, &a, &b)?;
            let v = mm::arith(vm, mm::ArithOp::IDiv, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Mod { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            mm::check_integer_divmod_zero(mm::ArithOp::Mod, &a, &b)?;
            let v = mm::arith(vm, mm::ArithOp::Mod, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Pow { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::arith(vm, mm::ArithOp::Pow, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Unm { dst, src } => {
            let a = reg!(src);
            let v = mm::unm(vm, &a).map_err(|e| augment_hint(&proto, pc, e, RK::Reg(src), &a, None))?;
            set_reg!(dst, v);
        }
        BAnd { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::bitwise(vm, mm::BitOp::And, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        BOr { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::bitwise(vm, mm::BitOp::Or, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        BXor { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::bitwise(vm, mm::BitOp::Xor, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Shl { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::bitwise(vm, mm::BitOp::Shl, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        Shr { dst, lhs, rhs } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let v = mm::bitwise(vm, mm::BitOp::Shr, &a, &b).map_err(|e| augment_hint(&proto, pc, e, lhs, &a, Some((rhs, &b))))?;
            set_reg!(dst, v);
        }
        BNot { dst, src } => {
            let a = reg!(src);
            let v = mm::bnot(vm, &a).map_err(|e| augment_hint(&proto, pc, e, RK::Reg(src), &a, None))?;
            set_reg!(dst, v);
        }
        Not { dst, src } => {
            let a = reg!(src);
            set_reg!(dst, LuaValue::Boolean(!a.is_truthy()));
        }
        Len { dst, src } => {
            let a = reg!(src);
            let v = mm::length(vm, &a).map_err(|e| augment_hint(&proto, pc, e, RK::Reg(src), &a, None))?;
            set_reg!(dst, v);
        }
        Concat { dst, first, last } => {
            let values: Vec<LuaValue> = (first..=last).map(|r| reg!(r)).collect();
            let v = mm::concat(vm, &values)?;
            set_reg!(dst, v);
        }
        Eq { lhs, rhs, expected } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let result = mm::eq(vm, &a, &b)?;
            if result != expected {
                thread.set_current_frame_pc(thread.current_frame_pc() + 1);
            }
        }
        Lt { lhs, rhs, expected } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let result = mm::lt(vm, &a, &b)?;
            if result != expected {
                thread.set_current_frame_pc(thread.current_frame_pc() + 1);
            }
        }
        Le { lhs, rhs, expected } => {
            let a = rk!(lhs);
            let b = rk!(rhs);
            let result = mm::le(vm, &a, &b)?;
            if result != expected {
                thread.set_current_frame_pc(thread.current_frame_pc() + 1);
            }
        }
        Test { src, expected } => {
            let v = reg!(src);
            if v.is_truthy() != expected {
                thread.set_current_frame_pc(thread.current_frame_pc() + 1);
            }
        }
        TestSet { dst, src, expected } => {
            let v = reg!(src);
            if v.is_truthy() == expected {
                set_reg!(dst, v);
            } else {
                thread.set_current_frame_pc(thread.current_frame_pc() + 1);
            }
        }
        Jmp { offset } => {
            let new_pc = (thread.current_frame_pc() as i64 + offset as i64) as u32;
            thread.set_current_frame_pc(new_pc);
        }
        Call { func, nargs, nresults } => {
            return do_call(vm, thread, base_depth, base, pc, &proto, func, nargs, nresults, false);
        }
        TailCall { func, nargs } => {
            return do_call(vm, thread, base_depth, base, pc, &proto, func, nargs, None, true);
        }
        Return { first, count } => {
            let values = gather_open_range(thread, base, first, count);
            return finish_return(vm, thread, base_depth, values);
        }
        Return0 => {
            return finish_return(vm, thread, base_depth, Vec::new());
        }
        Vararg { dst, count } => {
            let varargs = thread.0.frames.borrow().last().map(|f| f.varargs.clone()).unwrap_or_default();
            match count {
                Some(n) => {
                    for i in 0..n as usize {
                        set_reg!(dst + i as u8, varargs.get(i).cloned().unwrap_or(LuaValue::Nil));
                    }
                }
                None => {
                    for (i, v) in varargs.iter().enumerate() {
                        set_reg!(dst + i as u8, v.clone());
                    }
                    thread.set_top(base + dst as usize + varargs.len());
                }
            }
        }
        ForPrep { base: for_base, exit_offset } => {
            let start = reg!(for_base);
            let stop = reg!(for_base + 1);
            let step = reg!(for_base + 2);
            let (start, stop, step) = coerce_for_loop(&start, &stop, &step)?;
            match step {
                LuaValue::Integer(0) => return Err(LuaError::msg("'for' step is zero")),
                LuaValue::Float(s) if s == 0.0 => return Err(LuaError::msg("'for' step is zero")),
                _ => {}
            }
            let exhausted = for_exhausted(&start, &stop, &step);
            set_reg!(for_base, start);
            set_reg!(for_base + 1, stop);
            set_reg!(for_base + 2, step);
            if exhausted {
                let new_pc = (thread.current_frame_pc() as i64 + exit_offset as i64) as u32;
                thread.set_current_frame_pc(new_pc);
            }
        }
        ForLoop { base: for_base, body_offset } => {
            let start = reg!(for_base);
            let stop = reg!(for_base + 1);
            let step = reg!(for_base + 2);
            if let Some(next) = for_step(&start, &step) {
                if !for_exhausted(&next, &stop, &step) {
                    set_reg!(for_base, next);
                    let new_pc = (thread.current_frame_pc() as i64 + body_offset as i64) as u32;
                    thread.set_current_frame_pc(new_pc);
                }
            }
        }
        TForCall { base: iter_base, nresults } => {
            let iter_fn = reg!(iter_base);
            let state = reg!(iter_base + 1);
            let ctrl = reg!(iter_base + 2);
            let results = vm.call(iter_fn, vec![state, ctrl])?;
            for i in 0..nresults as usize {
                set_reg!(iter_base + 4 + i as u8, results.get(i).cloned().unwrap_or(LuaValue::Nil));
            }
        }
        TForLoop { base: first_var, body_offset } => {
            let v = reg!(first_var);
            if !v.is_nil() {
                set_reg!(first_var - 2, v);
                let new_pc = (thread.current_frame_pc() as i64 + body_offset as i64) as u32;
                thread.set_current_frame_pc(new_pc);
            }
        }
        Closure { dst, proto: idx } => {
            let child = proto.protos[idx as usize].clone();
            let closure = lua_closure(thread)?;
            let mut upvalues = Vec::with_capacity(child.upvalues.len());
            for desc in &child.upvalues {
                let uv = if desc.in_stack {
                    find_or_open_upvalue(thread, base + desc.index as usize)
                } else {
                    closure.0.upvalues[desc.index as usize].clone()
                };
                upvalues.push(uv);
            }
            set_reg!(dst, LuaValue::Function(LuaFunction::Lua(LuaClosure::new(child, upvalues))));
        }
        Close { from, mode } => {
            return handle_close(vm, thread, &proto, base, pc, from, mode);
        }
    }
    Ok(None)
}

fn lua_closure(thread: &LuaThread) -> LResult<LuaClosure> {
    match thread.current_closure() {
        Some(LuaFunction::Lua(c)) => Ok(c),
        _ => Err(LuaError::msg("internal error: expected a Lua frame")),
    }
}

fn gather_open_range(thread: &LuaThread, base: usize, first: u8, count: Option<u8>) -> Vec<LuaValue> {
    match count {
        Some(n) => (0..n as usize).map(|i| thread.register_at(base + first as usize + i)).collect(),
        None => {
            let top = thread.top();
            let start = base + first as usize;
            if top <= start {
                Vec::new()
            } else {
                (start..top).map(|i| thread.register_at(i)).collect()
            }
        }
    }
}

fn coerce_for_loop(start: &LuaValue, stop: &LuaValue, step: &LuaValue) -> LResult<(LuaValue, LuaValue, LuaValue)> {
    let s = start.coerce_to_number().ok_or_else(|| LuaError::msg("'for' initial value must be a number"))?;
    let e = stop.coerce_to_number().ok_or_else(|| LuaError::msg("'for' limit must be a number"))?;
    let st = step.coerce_to_number().ok_or_else(|| LuaError::msg("'for' step must be a number"))?;
    if let (LuaValue::Integer(_), LuaValue::Integer(_), LuaValue::Integer(_)) = (&s, &e, &st) {
        Ok((s, e, st))
    } else {
        let to_f = |v: &LuaValue| match v {
            LuaValue::Integer(i) => *i as f64,
            LuaValue::Float(f) => *f,
            _ => unreachable!(),
        };
        Ok((LuaValue::Float(to_f(&s)), LuaValue::Float(to_f(&e)), LuaValue::Float(to_f(&st))))
    }
}

fn for_exhausted(cur: &LuaValue, stop: &LuaValue, step: &LuaValue) -> bool {
    match (cur, stop, step) {
        (LuaValue::Integer(c), LuaValue::Integer(s), LuaValue::Integer(st)) => {
            if *st > 0 {
                c > s
            } else {
                c < s
            }
        }
        _ => {
            let c = cur.as_float().unwrap_or(f64::NAN);
            let s = stop.as_float().unwrap_or(f64::NAN);
            let st = step.as_float().unwrap_or(f64::NAN);
            if st > 0.0 {
                c > s
            } else {
                c < s
            }
        }
    }
}

fn for_step(cur: &LuaValue, step: &LuaValue) -> Option<LuaValue> {
    match (cur, step) {
        (LuaValue::Integer(c), LuaValue::Integer(st)) => c.checked_add(*st).map(LuaValue::Integer),
        _ => {
            let c = cur.as_float()?;
            let st = step.as_float()?;
            Some(LuaValue::Float(c + st))
        }
    }
}

// ---------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn do_call(
    vm: &mut Vm,
    thread: &LuaThread,
    base_depth: usize,
    base: usize,
    pc: u32,
    proto: &Proto,
    func_reg: u8,
    nargs: Option<u8>,
    nresults: Option<u8>,
    is_tail_call: bool,
) -> LResult<Option<Vec<LuaValue>>> {
    let func_val = thread.register_at(base + func_reg as usize);
    let args = gather_open_range(thread, base, func_reg + 1, nargs);

    if thread.frame_depth() >= super::MAX_CALL_DEPTH {
        return Err(LuaError::msg("stack overflow"));
    }

    let mut callee = func_val;
    let mut call_args = args;
    for _ in 0..MAX_CALL_CHAIN {
        match callee {
            LuaValue::Function(LuaFunction::Lua(closure)) => {
                if is_tail_call {
                    close_upvalues_from(thread, base);
                    let frame = thread.pop_frame().expect("tail call frame");
                    thread.truncate_stack(frame.base);
                    push_lua_call_tagged(thread, closure, call_args, frame.nresults, frame.result_dst, false);
                    fire_hook(vm, thread, super::hooks::HookEvent::TailCall, None)?;
                } else {
                    push_lua_call_tagged(thread, closure, call_args, nresults, Some(base + func_reg as usize), false);
                    fire_hook(vm, thread, super::hooks::HookEvent::Call, None)?;
                }
                return Ok(None);
            }
            LuaValue::Function(LuaFunction::Native(nf)) => {
                *thread.0.yield_write.borrow_mut() = Some((base + func_reg as usize, nresults));
                let results = (nf.func)(vm, &call_args)?;
                *thread.0.yield_write.borrow_mut() = None;
                return write_call_results(thread, base + func_reg as usize, nresults, results);
            }
            LuaValue::Function(LuaFunction::NativeClosure(nc)) => {
                *thread.0.yield_write.borrow_mut() = Some((base + func_reg as usize, nresults));
                let results = nc.call(vm, &call_args)?;
                *thread.0.yield_write.borrow_mut() = None;
                return write_call_results(thread, base + func_reg as usize, nresults, results);
            }
            other => {
                if let Some(call_mm) = vm.metamethod(&other, "__call") {
                    let mut new_args = Vec::with_capacity(call_args.len() + 1);
                    new_args.push(other);
                    new_args.append(&mut call_args);
                    callee = call_mm;
                    call_args = new_args;
                    continue;
                }
                let hint = mm::describe_register(proto, pc, func_reg);
                let suffix = mm::hint_suffix(&hint);
                return Err(LuaError::msg(format!("attempt to call a {} value{suffix}", other.type_name())));
            }
        }
    }
    Err(LuaError::msg("'__call' chain too long; possible loop"))
}

fn write_call_results(
    thread: &LuaThread,
    dst: usize,
    nresults: Option<u8>,
    mut results: Vec<LuaValue>,
) -> LResult<Option<Vec<LuaValue>>> {
    match nresults {
        Some(n) => {
            results.resize(n as usize, LuaValue::Nil);
            for (i, v) in results.into_iter().enumerate() {
                thread.set_register_at(dst + i, v);
            }
        }
        None => {
            let len = results.len();
            for (i, v) in results.into_iter().enumerate() {
                thread.set_register_at(dst + i, v);
            }
            thread.set_top(dst + len);
        }
    }
    Ok(None)
}

/// A frame has reached its `RETURN`/`RETURN0`/fully-closed tail point.
/// Pops it, closes its upvalues, and either hands the results back to the
/// Rust caller (the frame `run_frame_loop` was entered with) or writes them
/// into the caller frame that's left on top.
fn finish_return(vm: &mut Vm, thread: &LuaThread, base_depth: usize, values: Vec<LuaValue>) -> LResult<Option<Vec<LuaValue>>> {
    let frame = thread.pop_frame().expect("a running frame to return");
    close_upvalues_from(thread, frame.base);
    thread.truncate_stack(frame.base);

    if frame.is_close_handler {
        advance_close_chain(vm, thread)?;
        return Ok(None);
    }

    fire_hook(vm, thread, super::hooks::HookEvent::Return, None)?;

    match frame.result_dst {
        None => Ok(Some(values)),
        Some(dst) => {
            let _ = base_depth;
            write_call_results(thread, dst, frame.nresults, values)
        }
    }
}

// ---------------------------------------------------------------------
// To-be-closed variables
// ---------------------------------------------------------------------

fn handle_close(
    vm: &mut Vm,
    thread: &LuaThread,
    proto: &Proto,
    base: usize,
    pc: u32,
    from: u8,
    _mode: CloseMode,
) -> LResult<Option<Vec<LuaValue>>> {
    let entries = collect_close_entries(proto, base, from, pc);
    if entries.is_empty() {
        return Ok(None);
    }
    let remaining: Vec<PendingClose> = entries
        .into_iter()
        .map(|(register, _name)| PendingClose { register, value: thread.register_at(register) })
        .collect();
    thread.0.close_chains.borrow_mut().push(CloseChain { owner_depth: thread.frame_depth(), remaining, pending_error: None });
    advance_close_chain(vm, thread)?;
    Ok(None)
}

/// Drives the thread's innermost `CloseChain` forward by exactly one step:
/// either it skips already-`nil`/`false` entries and calls the next `__close`
/// handler (pushing a frame and returning, letting the ordinary instruction
/// loop run it — and, if it yields, suspend it — the same as any other
/// call), or the chain is empty and its accumulated error (if any) is
/// raised. Called both when a `CLOSE` instruction starts a fresh chain and
/// when an `is_close_handler` frame returns to it.
fn advance_close_chain(vm: &mut Vm, thread: &LuaThread) -> LResult<()> {
    loop {
        let next_value = {
            let mut chains = thread.0.close_chains.borrow_mut();
            let Some(chain) = chains.last_mut() else { return Ok(()) };
            match chain.remaining.pop() {
                Some(entry) => Some((entry.value, chain.pending_error.clone())),
                None => {
                    let chain = chains.pop().unwrap();
                    return match chain.pending_error {
                        Some(err_val) => Err(LuaError::new(err_val)),
                        None => Ok(()),
                    };
                }
            }
        };
        let (value, pending_error) = next_value.unwrap();
        if value.is_nil() || matches!(value, LuaValue::Boolean(false)) {
            continue;
        }
        let err_arg = pending_error.clone().unwrap_or(LuaValue::Nil);
        match vm.metamethod(&value, "__close") {
            Some(LuaValue::Function(LuaFunction::Lua(closure))) => {
                push_lua_call_tagged(thread, closure, vec![value, err_arg], None, None, true);
                return Ok(());
            }
            Some(other) => match vm.call(other, vec![value, err_arg]) {
                Ok(_) => continue,
                Err(e) if e.is_yield() => return Err(e),
                Err(e) => {
                    if let Some(chain) = thread.0.close_chains.borrow_mut().last_mut() {
                        chain.pending_error = Some(e.value);
                    }
                    continue;
                }
            },
            None => {
                let msg = LuaError::msg("variable has a non-closable value");
                if let Some(chain) = thread.0.close_chains.borrow_mut().last_mut() {
                    chain.pending_error = Some(msg.value);
                }
                continue;
            }
        }
    }
}

/// Unwinds `thread`'s frames down to `base_depth` after a non-yield runtime
/// error, running `__close` handlers for any live to-be-closed locals along
/// the way (spec.md §4.5.7, §7 "errors during closing"). Unlike the
/// `CLOSE`-instruction path, a `__close` handler invoked here is run
/// synchronously: a yield from inside one during error unwinding is turned
/// into a plain error rather than suspending the thread, a deliberate
/// simplification recorded in `DESIGN.md`.
/// Prefixes a not-yet-located string error with `source:line: ` using the
/// innermost still-live Lua frame (spec.md §7.1, §8 property 8), the one
/// whose instruction actually raised it. Native-function errors (no live
/// Lua frame on top, e.g. a bad argument raised straight from a stdlib
/// call) are left unprefixed, matching canonical Lua's own behavior for
/// C-function-raised errors with no calling Lua frame at all.
fn locate_error(thread: &LuaThread, mut err: LuaError) -> LuaError {
    if err.located || err.kind != LuaErrorKind::Runtime {
        return err;
    }
    if !matches!(err.value, LuaValue::Str(_)) {
        return err;
    }
    let Some(frame) = thread.0.frames.borrow().last().map(|f| (f.func.clone(), f.pc)) else { return err };
    if let LuaFunction::Lua(closure) = frame.0 {
        let line = closure.0.proto.line_at(frame.1.saturating_sub(1));
        let source = closure.0.proto.chunk_display_name();
        if let LuaValue::Str(s) = &err.value {
            let text = format!("{source}:{line}: {}", s.to_str_lossy());
            err.value = LuaValue::new_string_owned(text.into_bytes());
            err.located = true;
        }
    }
    err
}

fn propagate_error(vm: &mut Vm, thread: &LuaThread, base_depth: usize, mut err: LuaError) -> LuaError {
    while thread.frame_depth() > base_depth {
        let Some(frame) = thread.pop_frame() else { break };
        close_upvalues_from(thread, frame.base);
        if let LuaFunction::Lua(closure) = &frame.func {
            let pc_at_fault = frame.pc.saturating_sub(1);
            let entries = collect_close_entries(&closure.0.proto, frame.base, 0, pc_at_fault);
            for (register, _name) in entries {
                let value = thread.register_at(register);
                if value.is_nil() || matches!(value, LuaValue::Boolean(false)) {
                    continue;
                }
                match vm.metamethod(&value, "__close") {
                    Some(mm_fn) => {
                        let err_arg = if err.kind == LuaErrorKind::Runtime { err.value.clone() } else { LuaValue::Nil };
                        match vm.call(mm_fn, vec![value, err_arg]) {
                            Ok(_) => {}
                            Err(e) if e.is_yield() => {
                                err = LuaError::msg("attempt to yield from a close handler during error propagation");
                            }
                            Err(e) => err = e,
                        }
                    }
                    None => {}
                }
            }
        }
        thread.truncate_stack(frame.base);
    }
    err
}

// ---------------------------------------------------------------------
// Debug hooks
// ---------------------------------------------------------------------

fn fire_hook(vm: &mut Vm, thread: &LuaThread, event: super::hooks::HookEvent, line: Option<u32>) -> LResult<()> {
    let func = {
        let mut hb = thread.0.hook.borrow_mut();
        let Some(state) = hb.as_mut() else { return Ok(()) };
        if state.active {
            return Ok(());
        }
        let should_fire = match event {
            super::hooks::HookEvent::Call | super::hooks::HookEvent::TailCall => state.mask.call,
            super::hooks::HookEvent::Return => state.mask.ret,
            super::hooks::HookEvent::Line => state.mask.line,
            super::hooks::HookEvent::Count => state.mask.count,
        };
        if !should_fire {
            return Ok(());
        }
        state.active = true;
        state.func.clone()
    };
    let args = vec![
        LuaValue::new_string_owned(event.as_str().as_bytes().to_vec()),
        line.map(|l| LuaValue::Integer(l as i64)).unwrap_or(LuaValue::Nil),
    ];
    let result = vm.call(LuaValue::Function(func), args);
    if let Some(state) = thread.0.hook.borrow_mut().as_mut() {
        state.active = false;
    }
    result.map(|_| ())
}

/// Runs the count and line hooks for the instruction about to execute at
/// `pc` (spec.md §4.7). Line events only fire at statement boundaries
/// recorded in the proto's line table, not on every instruction.
fn fire_line_hook(vm: &mut Vm, thread: &LuaThread, proto: &Proto, pc: u32) -> LResult<()> {
    let needs_check = {
        let hb = thread.0.hook.borrow();
        hb.as_ref().map(|s| !s.active && (s.mask.line || s.mask.count)).unwrap_or(false)
    };
    if !needs_check {
        return Ok(());
    }
    let mut do_count = false;
    {
        let mut hb = thread.0.hook.borrow_mut();
        if let Some(state) = hb.as_mut() {
            if state.mask.count {
                state.instructions_since_last += 1;
                if state.instructions_since_last >= state.count.max(1) {
                    state.instructions_since_last = 0;
                    do_count = true;
                }
            }
        }
    }
    if do_count {
        fire_hook(vm, thread, super::hooks::HookEvent::Count, None)?;
    }
    let is_boundary = proto
        .line_events
        .iter()
        .any(|ev| ev.pc == pc && matches!(ev.kind, crate::value::proto::LineEventKind::StatementBoundary));
    if is_boundary {
        let line_hook_on = {
            let hb = thread.0.hook.borrow();
            hb.as_ref().map(|s| s.mask.line).unwrap_or(false)
        };
        if line_hook_on {
            fire_hook(vm, thread, super::hooks::HookEvent::Line, Some(proto.line_at(pc)))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Coroutines
// ---------------------------------------------------------------------

/// `coroutine.resume` (spec.md §4.5.7 / §5.3). Returns the coroutine's yield
/// values or its final return values on success; a runtime error raised
/// inside the coroutine comes back as `Err` for the caller (`coroutine.resume`
/// itself, in the stdlib) to turn into `false, message`.
pub fn resume_coroutine(vm: &mut Vm, thread: &LuaThread, args: Vec<LuaValue>) -> LResult<Vec<LuaValue>> {
    if thread.is_dead() {
        return Err(LuaError::msg("cannot resume dead coroutine"));
    }
    if thread.status() == ThreadStatus::Running || thread.status() == ThreadStatus::Normal {
        return Err(LuaError::msg("cannot resume non-suspended coroutine"));
    }

    let previous = vm.current_thread.clone();
    previous.set_status(ThreadStatus::Normal);
    vm.resume_chain.push(previous.clone());
    vm.current_thread = thread.clone();
    thread.set_status(ThreadStatus::Running);

    let first_resume = !thread.0.has_started.get();
    if first_resume {
        thread.0.has_started.set(true);
        let body = thread.0.frames.borrow().first().map(|f| f.func.clone());
        if let Some(LuaFunction::Native(nf)) = &body {
            thread.pop_frame();
            let result = (nf.func)(vm, &args);
            finish_resume(vm, thread, &previous);
            return result.map_err(|e| if e.is_yield() { LuaError::msg("attempt to yield from a coroutine body without its own frame") } else { e });
        }
        if let Some(LuaFunction::NativeClosure(nc)) = &body {
            thread.pop_frame();
            let result = nc.call(vm, &args);
            finish_resume(vm, thread, &previous);
            return result.map_err(|e| if e.is_yield() { LuaError::msg("attempt to yield from a coroutine body without its own frame") } else { e });
        }
        let base = thread.current_frame_base();
        if let Some(LuaFunction::Lua(closure)) = thread.current_closure() {
            let varargs = install_registers(thread, base, &closure.0.proto, args);
            if let Some(f) = thread.0.frames.borrow_mut().last_mut() {
                f.varargs = varargs;
            }
        }
    } else {
        let has_chain = !thread.0.close_chains.borrow().is_empty();
        if has_chain {
            // Resuming inside a `__close` chain: the yielded value becomes the
            // in-flight handler's own resume, which the generic frame loop
            // below will drive; args are simply ignored here the way a
            // generic yield's resume values are (the handler reads them via
            // `coroutine.yield`'s own return, already captured before the
            // yield).
            *thread.0.resume_values.borrow_mut() = args;
        } else if let Some((reg, count)) = thread.0.yield_write.borrow_mut().take() {
            match count {
                Some(n) => {
                    for i in 0..n as usize {
                        thread.set_register_at(reg + i, args.get(i).cloned().unwrap_or(LuaValue::Nil));
                    }
                }
                None => {
                    let len = args.len();
                    for (i, v) in args.into_iter().enumerate() {
                        thread.set_register_at(reg + i, v);
                    }
                    thread.set_top(reg + len);
                }
            }
        }
    }

    let result = run_frame_loop(vm, thread, 0);
    match &result {
        Ok(_) => thread.set_status(ThreadStatus::Dead),
        Err(e) if e.is_yield() => thread.set_status(ThreadStatus::Suspended),
        Err(_) => thread.set_status(ThreadStatus::Dead),
    }
    finish_resume(vm, thread, &previous);

    match result {
        Ok(values) => Ok(values),
        Err(e) if e.is_yield() => Ok(e.yield_values),
        Err(e) => Err(e),
    }
}

fn finish_resume(vm: &mut Vm, thread: &LuaThread, previous: &LuaThread) {
    vm.resume_chain.pop();
    vm.current_thread = previous.clone();
    if previous.status() == ThreadStatus::Normal {
        previous.set_status(ThreadStatus::Running);
    }
    let _ = thread;
}
