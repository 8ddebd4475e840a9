//! The Lua virtual machine: global state, call/return, and the entry points
//! used by the `tlua` CLI and the stdlib (spec.md §5 "Execution model").
//!
//! Grounded on the teacher's `crates/luars/src/lua_vm/mod.rs` (`LuaVM` owning
//! globals, the string table, and the current thread) generalized from the
//! teacher's arena-indexed GC objects to this crate's `Rc`-shared value
//! model. Where the teacher threads a `LuaState`/`LuaVM` split, this crate
//! keeps a single `Vm` struct: there is no separate heap arena to hand out
//! handles into.

pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod load;
mod metamethods;

use std::rc::Rc;

use crate::value::closure::{LuaClosure, LuaFunction, Upvalue};
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::value::proto::Proto;
use crate::value::thread::{LuaThread, ThreadStatus};
use crate::value::{LuaStr, StringInterner};
use error::{LResult, LuaError};

/// Hard recursion cap on non-tail Lua/native call nesting (spec.md §5.2
/// "deeply recursive but finite call chains raise a catchable error rather
/// than aborting the process"). 200 matches `LUAI_MAXCCALLS` in C Lua.
pub const MAX_CALL_DEPTH: usize = 200;

pub struct Vm {
    pub globals: LuaTable,
    pub strings: StringInterner,
    pub main_thread: LuaThread,
    /// The thread whose frames the dispatch loop is currently stepping.
    /// Swapped by `coroutine.resume`/`yield` (spec.md §5.3).
    pub current_thread: LuaThread,
    /// Threads that resumed `current_thread`, innermost last, so `resume`
    /// can mark its caller `Normal` and `yield` knows who to hand control
    /// back to (spec.md §5.3 "a coroutine resumes into at most one other").
    pub resume_chain: Vec<LuaThread>,
    pub native_call_depth: usize,
    pub string_metatable: Option<LuaTable>,
    /// Script arguments exposed as the global `arg` table (spec.md §6).
    pub script_args: Vec<String>,
    /// `math.random`'s generator state (SPEC_FULL.md §1: a self-contained
    /// xoshiro-style generator instead of pulling in the `rand` crate),
    /// per-VM rather than global per the Design Notes in spec.md §9.
    pub rng_state: std::cell::Cell<[u64; 4]>,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            globals: LuaTable::new(),
            strings: StringInterner::new(),
            main_thread: LuaThread::new_main(),
            current_thread: LuaThread::new_main(),
            resume_chain: Vec::new(),
            native_call_depth: 0,
            string_metatable: None,
            script_args: Vec::new(),
            rng_state: std::cell::Cell::new(crate::stdlib::math::seed_from_time()),
        };
        vm.current_thread = vm.main_thread.clone();
        crate::stdlib::install(&mut vm);
        vm
    }

    pub fn intern(&mut self, bytes: &[u8]) -> LuaStr {
        self.strings.intern(bytes)
    }

    pub fn new_string(&mut self, s: &str) -> LuaValue {
        LuaValue::Str(self.intern(s.as_bytes()))
    }

    /// Compiles and runs `source` as a new chunk, returning its results
    /// (spec.md §4.1 "load" / §6 "running a script").
    pub fn execute(&mut self, source: &str, chunk_name: &str) -> LResult<Vec<LuaValue>> {
        let closure = self
            .load_source(source, chunk_name)
            .map_err(|e| LuaError::msg(e.to_string()))?;
        self.call(LuaValue::Function(closure), Vec::new())
    }

    /// Lexes, parses, and compiles `source` into a callable closure over the
    /// global `_ENV` (spec.md §4.1 `load`).
    pub fn load_source(&mut self, source: &str, chunk_name: &str) -> Result<LuaFunction, String> {
        let tokens = crate::lexer::Lexer::new(source.as_bytes(), chunk_name.to_string())
            .tokenize()
            .map_err(|e| e.to_string())?;
        let chunk = crate::parser::parse(&tokens, chunk_name.to_string()).map_err(|e| e.to_string())?;
        let proto = crate::compiler::compile(&chunk, chunk_name.to_string()).map_err(|e| e.to_string())?;
        Ok(self.closure_from_root_proto(Rc::new(proto)))
    }

    /// Wraps a freshly compiled root `Proto` in a closure, binding its sole
    /// upvalue (`_ENV`) to this VM's globals table (spec.md §4.3.5).
    pub fn closure_from_root_proto(&mut self, proto: Rc<Proto>) -> LuaFunction {
        let env = Upvalue::closed(LuaValue::Table(self.globals.clone()));
        LuaFunction::Lua(LuaClosure::new(proto, vec![env]))
    }

    /// Calls any callable value (spec.md §4.5.3), dispatching through
    /// `__call` when `func` isn't directly callable. This is the single
    /// entry point native library functions use to call back into Lua
    /// (`pcall`, `table.sort`'s comparator, metamethods, iterators).
    pub fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LResult<Vec<LuaValue>> {
        self.native_call_depth += 1;
        if self.native_call_depth > MAX_CALL_DEPTH {
            self.native_call_depth -= 1;
            return Err(LuaError::msg("stack overflow"));
        }
        let result = self.call_inner(func, args);
        self.native_call_depth -= 1;
        result
    }

    fn call_inner(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LResult<Vec<LuaValue>> {
        match func {
            LuaValue::Function(LuaFunction::Native(nf)) => (nf.func)(self, &args),
            LuaValue::Function(LuaFunction::NativeClosure(nc)) => nc.call(self, &args),
            LuaValue::Function(LuaFunction::Lua(closure)) => {
                let thread = self.current_thread.clone();
                let base_depth = thread.frame_depth();
                dispatch::push_lua_call(&thread, LuaFunction::Lua(closure), args, None);
                dispatch::run_frame_loop(self, &thread, base_depth)
            }
            other => {
                if let Some(call_mm) = self.metamethod(&other, "__call") {
                    let mut new_args = Vec::with_capacity(args.len() + 1);
                    new_args.push(other);
                    new_args.extend(args);
                    self.call(call_mm, new_args)
                } else {
                    Err(LuaError::msg(format!("attempt to call a {} value", other.type_name())))
                }
            }
        }
    }

    /// Protected call (spec.md §7.2 `pcall`): runs `func(args)`, catching
    /// any runtime error (but not a coroutine yield, which must still
    /// propagate past `pcall` the way spec.md §5.3 requires).
    pub fn pcall(&mut self, func: LuaValue, args: Vec<LuaValue>) -> (bool, Vec<LuaValue>) {
        match self.call(func, args) {
            Ok(mut results) => {
                let mut out = vec![LuaValue::Boolean(true)];
                out.append(&mut results);
                (true, out)
            }
            Err(e) if e.is_yield() => {
                // handled specially by the coroutine machinery; callers that
                // reach here outside a coroutine body treat it as an error.
                (false, vec![LuaValue::Boolean(false), LuaValue::new_string_owned(b"attempt to yield from outside a coroutine".to_vec())])
            }
            Err(e) => (false, vec![LuaValue::Boolean(false), e.value]),
        }
    }

    pub fn metamethod(&self, value: &LuaValue, name: &str) -> Option<LuaValue> {
        let mt = self.metatable_of(value)?;
        let v = mt.get_str_name(name);
        if v.is_nil() {
            None
        } else {
            Some(v)
        }
    }

    pub fn metatable_of(&self, value: &LuaValue) -> Option<LuaTable> {
        match value {
            LuaValue::Table(t) => t.metatable(),
            LuaValue::UserData(u) => u.metatable(),
            LuaValue::Str(_) => self.string_metatable.clone(),
            _ => None,
        }
    }

    pub fn is_main_thread(&self) -> bool {
        self.current_thread.ptr_eq(&self.main_thread)
    }

    /// `tostring` including `__tostring`/`__name` metamethod dispatch
    /// (spec.md §7 basic library).
    pub fn tostring(&mut self, value: &LuaValue) -> LResult<LuaStr> {
        if let Some(mm) = self.metamethod(value, "__tostring") {
            let res = self.call(mm, vec![value.clone()])?;
            return match res.into_iter().next() {
                Some(LuaValue::Str(s)) => Ok(s),
                Some(other) => Ok(LuaStr::new(format!("{other}").into_bytes().into_boxed_slice(), 0)),
                None => Ok(self.intern(b"nil")),
            };
        }
        if let Some(mt) = self.metatable_of(value) {
            let name = mt.get_str_name("__name");
            if let LuaValue::Str(name) = name {
                if let LuaValue::Table(_) | LuaValue::UserData(_) = value {
                    let s = format!("{}: {:#x}", name.to_str_lossy(), value.identity());
                    return Ok(self.intern(s.as_bytes()));
                }
            }
        }
        Ok(self.intern(format!("{value}").as_bytes()))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

/// Thread status accessor used by `coroutine.status` (spec.md §5.3), exposed
/// at module level since it only needs the thread, not the whole `Vm`.
pub fn thread_status_name(thread: &LuaThread, vm: &Vm) -> &'static str {
    if thread.ptr_eq(&vm.current_thread) {
        "running"
    } else {
        thread.status().as_str()
    }
}

pub use error::{LuaErrorKind};
pub use dispatch::resume_coroutine;

pub(crate) fn thread_is_suspended(t: &LuaThread) -> bool {
    t.status() == ThreadStatus::Suspended
}
