//! Closures, native functions, and upvalues (spec.md §3 "Closure"/"Upvalue",
//! §4.3.5, §4.5.3).
//!
//! Grounded on the teacher's `CFunction = fn(&mut LuaState) -> LuaResult<usize>`
//! signature (`crates/luars/src/lua_vm/mod.rs`) and `UpvalueState::Open{stack_index}`
//! / `Closed(LuaValue)` (`crates/luars/src/gc/object_pool.rs`), generalized
//! from a single global stack to per-thread stacks: an open upvalue records
//! *which* thread's register stack it points into, since a closure's
//! captured local may outlive the coroutine that created it or be called
//! from a different one than the one currently running.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::lua_value::LuaValue;
use crate::value::proto::Proto;
use crate::value::thread::LuaThread;
use crate::vm::error::LuaError;
use crate::vm::Vm;

/// Signature for a Rust-implemented (native/"C") Lua function. Mirrors the
/// teacher's `CFunction` typedef; `args` are the values passed by the Lua
/// call, the return value is the list of results (spec.md §4.5.3 multi-value
/// return).
pub type NativeFn = fn(&mut Vm, args: &[LuaValue]) -> Result<Vec<LuaValue>, LuaError>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: &'static str, func: NativeFn) -> Self {
        NativeFunction { name, func }
    }
}

/// Signature for a native function with captured upvalues (Lua's
/// `lua_pushcclosure`), grounded on the teacher's
/// `vm.create_c_closure(f, upvalues)` (`crates/luars/src/stdlib/coroutine.rs`
/// `coroutine_wrap`): `captures` are the values bound at creation time,
/// `args` are the call's actual arguments.
pub type NativeClosureFn = fn(&mut Vm, captures: &[LuaValue], args: &[LuaValue]) -> Result<Vec<LuaValue>, LuaError>;

pub struct NativeClosureInner {
    pub name: &'static str,
    pub captures: Vec<LuaValue>,
    pub func: NativeClosureFn,
}

#[derive(Clone)]
pub struct NativeClosure(pub Rc<NativeClosureInner>);

impl NativeClosure {
    pub fn new(name: &'static str, captures: Vec<LuaValue>, func: NativeClosureFn) -> Self {
        NativeClosure(Rc::new(NativeClosureInner { name, captures, func }))
    }

    pub fn call(&self, vm: &mut Vm, args: &[LuaValue]) -> Result<Vec<LuaValue>, LuaError> {
        (self.0.func)(vm, &self.0.captures, args)
    }
}

/// An upvalue's storage state. Open upvalues alias a live register on the
/// owning thread's stack; closing copies the value out so it survives the
/// frame's exit (spec.md §4.3.5, §4.5.7 "closing upvalues on scope exit").
#[derive(Clone)]
pub enum UpvalueState {
    Open { thread: LuaThread, index: usize },
    Closed(LuaValue),
}

pub struct UpvalueInner {
    pub state: RefCell<UpvalueState>,
}

#[derive(Clone)]
pub struct Upvalue(pub Rc<UpvalueInner>);

impl Upvalue {
    pub fn open(thread: LuaThread, index: usize) -> Self {
        Upvalue(Rc::new(UpvalueInner {
            state: RefCell::new(UpvalueState::Open { thread, index }),
        }))
    }

    pub fn closed(value: LuaValue) -> Self {
        Upvalue(Rc::new(UpvalueInner {
            state: RefCell::new(UpvalueState::Closed(value)),
        }))
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.0.state.borrow(), UpvalueState::Open { .. })
    }

    pub fn points_to(&self, thread: &LuaThread, index: usize) -> bool {
        match &*self.0.state.borrow() {
            UpvalueState::Open { thread: t, index: i } => t.ptr_eq(thread) && *i == index,
            UpvalueState::Closed(_) => false,
        }
    }

    pub fn get(&self) -> LuaValue {
        match &*self.0.state.borrow() {
            UpvalueState::Open { thread, index } => thread.register_at(*index),
            UpvalueState::Closed(v) => v.clone(),
        }
    }

    pub fn set(&self, value: LuaValue) {
        match &*self.0.state.borrow() {
            UpvalueState::Open { thread, index } => {
                thread.set_register_at(*index, value);
                return;
            }
            UpvalueState::Closed(_) => {}
        }
        *self.0.state.borrow_mut() = UpvalueState::Closed(value);
    }

    /// Copies the current value out of the stack and switches to `Closed`
    /// (spec.md §4.5.7). No-op if already closed.
    pub fn close(&self) {
        let value = match &*self.0.state.borrow() {
            UpvalueState::Open { thread, index } => Some(thread.register_at(*index)),
            UpvalueState::Closed(_) => None,
        };
        if let Some(v) = value {
            *self.0.state.borrow_mut() = UpvalueState::Closed(v);
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The stack index this upvalue currently aliases, if still open. Used
    /// by the dispatch loop to decide which open upvalues a frame exit or
    /// error unwind must close (spec.md §4.5.7).
    pub fn open_index(&self) -> Option<usize> {
        match &*self.0.state.borrow() {
            UpvalueState::Open { index, .. } => Some(*index),
            UpvalueState::Closed(_) => None,
        }
    }
}

/// A Lua closure: a `Proto` paired with its captured upvalues (spec.md §3
/// "Closure": "one Proto may back many closures with different upvalue
/// sets").
pub struct LuaClosureInner {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<Upvalue>,
}

#[derive(Clone)]
pub struct LuaClosure(pub Rc<LuaClosureInner>);

impl LuaClosure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<Upvalue>) -> Self {
        LuaClosure(Rc::new(LuaClosureInner { proto, upvalues }))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Either a Lua closure or a native function — a single callable value
/// (spec.md §3 "Function").
#[derive(Clone)]
pub enum LuaFunction {
    Lua(LuaClosure),
    Native(Rc<NativeFunction>),
    NativeClosure(NativeClosure),
}

impl LuaFunction {
    pub fn native(name: &'static str, func: NativeFn) -> Self {
        LuaFunction::Native(Rc::new(NativeFunction::new(name, func)))
    }

    pub fn native_closure(name: &'static str, captures: Vec<LuaValue>, func: NativeClosureFn) -> Self {
        LuaFunction::NativeClosure(NativeClosure::new(name, captures, func))
    }

    pub fn identity(&self) -> usize {
        match self {
            LuaFunction::Lua(c) => Rc::as_ptr(&c.0) as usize,
            LuaFunction::Native(f) => Rc::as_ptr(f) as usize,
            LuaFunction::NativeClosure(f) => Rc::as_ptr(&f.0) as usize,
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaFunction::Lua(a), LuaFunction::Lua(b)) => a.ptr_eq(b),
            (LuaFunction::Native(a), LuaFunction::Native(b)) => Rc::ptr_eq(a, b),
            (LuaFunction::NativeClosure(a), LuaFunction::NativeClosure(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            LuaFunction::Lua(_) => None,
            LuaFunction::Native(f) => Some(f.name),
            LuaFunction::NativeClosure(f) => Some(f.0.name),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, LuaFunction::Native(_) | LuaFunction::NativeClosure(_))
    }
}
