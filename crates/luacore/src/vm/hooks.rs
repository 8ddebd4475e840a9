//! Debug hooks (spec.md §4.7, grounded on `debug.sethook`'s C-Lua surface
//! and the teacher's line/count-hook fields in `crates/luars/src/lua_vm/mod.rs`).
//!
//! Hooks here are plain Rust closures rather than re-entering a Lua call
//! for every hook firing's worth of VM state — this crate fires a hook by
//! calling a stored `LuaFunction` through `Vm::call`, same as the teacher.

use crate::value::closure::LuaFunction;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HookMask {
    pub call: bool,
    pub line: bool,
    pub ret: bool,
    pub count: bool,
}

impl HookMask {
    pub fn from_str(mask: &str, count: u32) -> Self {
        HookMask {
            call: mask.contains('c'),
            line: mask.contains('l'),
            ret: mask.contains('r'),
            count: count > 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.call || self.line || self.ret || self.count)
    }
}

/// Installed hook state for one thread (spec.md §4.7 "hooks are per-thread").
#[derive(Clone)]
pub struct HookState {
    pub func: LuaFunction,
    pub mask: HookMask,
    pub count: u32,
    pub instructions_since_last: u32,
    /// Set while a hook is executing, to suppress re-entrant hook calls
    /// triggered by the hook's own execution (spec.md §4.7 "hooks do not
    /// recursively hook themselves").
    pub active: bool,
}

impl HookState {
    pub fn new(func: LuaFunction, mask: HookMask, count: u32) -> Self {
        HookState { func, mask, count, instructions_since_last: 0, active: false }
    }
}

/// The event name passed as the hook's first argument (spec.md §4.7).
#[derive(Clone, Copy)]
pub enum HookEvent {
    Call,
    TailCall,
    Return,
    Line,
    Count,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Call => "call",
            HookEvent::TailCall => "tail call",
            HookEvent::Return => "return",
            HookEvent::Line => "line",
            HookEvent::Count => "count",
        }
    }
}
