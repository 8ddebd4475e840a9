//! Runtime error type (spec.md §2, §7) and the coroutine-yield signal that
//! rides the same `Result` channel.
//!
//! Unlike the teacher's `LuaError`/`LuaFullError` split (a 1-byte tag with
//! the payload stashed on the VM to keep `Result` small), this
//! implementation carries the payload inline. Values here are already
//! `Rc`-shared, so the extra `Result` size is a non-issue and inline
//! payloads make every call site self-contained — documented in DESIGN.md.
//!
//! `coroutine.yield` is modeled as a distinguished `LuaError` kind rather
//! than a separate return channel: `NativeFn`'s signature
//! (`Result<Vec<LuaValue>, LuaError>`, spec.md §4.5.3) only has one error
//! path, so threading yield through it as `LuaErrorKind::Yield` lets it
//! propagate through `?` the same way a real error would, while `pcall`,
//! the dispatch loop, and `coroutine.resume` each special-case the kind
//! where Lua's semantics require it (spec.md §5.3: yield crosses a Lua-level
//! `pcall`, but not a non-yieldable boundary).

use crate::value::lua_value::LuaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaErrorKind {
    Runtime,
    Yield,
}

#[derive(Debug, Clone)]
pub struct LuaError {
    pub kind: LuaErrorKind,
    /// The raised error value (`Runtime`) or `Nil` (`Yield`).
    pub value: LuaValue,
    /// The values passed to `coroutine.yield` (`Yield` only).
    pub yield_values: Vec<LuaValue>,
    pub traceback: Vec<String>,
    /// Whether `value` already carries a `source:line: ` prefix (spec.md
    /// §7.1). Set by [`LuaError::runtime`] and by `error(msg, level>0)`;
    /// the dispatch loop's error path only prefixes a plain `msg`/`new`
    /// error once, at the innermost frame where it originated, so
    /// `propagate_error` walking further frames doesn't prefix it again.
    pub located: bool,
}

impl LuaError {
    pub fn new(value: LuaValue) -> Self {
        LuaError { kind: LuaErrorKind::Runtime, value, yield_values: Vec::new(), traceback: Vec::new(), located: false }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        LuaError::new(LuaValue::new_string_owned(message.into().into_bytes()))
    }

    /// Prefixes `message` with `source:line: ` the way uncaught string
    /// errors raised by the VM itself are formatted (spec.md §7.1).
    pub fn runtime(source_name: &str, line: u32, message: impl std::fmt::Display) -> Self {
        let display = crate::value::proto::display_source_name(source_name);
        let mut e = LuaError::msg(format!("{display}:{line}: {message}"));
        e.located = true;
        e
    }

    pub fn yield_signal(values: Vec<LuaValue>) -> Self {
        LuaError { kind: LuaErrorKind::Yield, value: LuaValue::Nil, yield_values: values, traceback: Vec::new(), located: false }
    }

    pub fn is_yield(&self) -> bool {
        self.kind == LuaErrorKind::Yield
    }

    pub fn push_frame(&mut self, frame_desc: impl Into<String>) {
        self.traceback.push(frame_desc.into());
    }

    pub fn message_string(&self) -> String {
        match &self.value {
            LuaValue::Str(s) => s.to_str_lossy().into_owned(),
            other => format!("{other}"),
        }
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message_string())
    }
}

impl std::error::Error for LuaError {}

pub type LResult<T> = Result<T, LuaError>;
