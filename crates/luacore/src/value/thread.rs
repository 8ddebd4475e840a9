//! `LuaThread`: a coroutine with its own register stack and call frames
//! (spec.md §3 "Thread", §4.5.7 coroutines).
//!
//! Grounded on the teacher's `lua_value/lua_thread.rs` (`CoroutineStatus`,
//! yield/resume bookkeeping) and `lua_vm/call_info.rs` (`CallInfo`: base,
//! top, saved pc, expected-results count). The teacher runs every coroutine
//! through the same dispatch loop as the main thread by swapping which
//! `LuaThread`'s stack/frames the VM currently addresses; this
//! implementation keeps that shape but makes each thread's state reachable
//! through `Rc<RefCell<_>>` so a suspended coroutine's stack can be
//! referenced by open upvalues (see `closure::UpvalueState::Open`) even
//! while no one is executing it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::closure::LuaFunction;
use crate::value::lua_value::LuaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Suspended,
    Running,
    Normal,
    Dead,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

/// One to-be-closed variable still waiting for its `__close` call, queued
/// most-recently-declared-first (spec.md §4.5.7 `<close>`: closes run in
/// reverse declaration order).
pub struct PendingClose {
    pub register: usize,
    pub value: LuaValue,
}

/// An in-progress `__close` chain started by a `CLOSE` instruction or by an
/// error unwinding past a frame with live `<close>` locals (spec.md §4.5.7,
/// §7 "errors during closing"). Driven by `vm::dispatch::advance_close_chain`
/// rather than Rust recursion, so a `__close` handler calling
/// `coroutine.yield` suspends the thread the same way any other yield does
/// instead of being swallowed at a metamethod-style call boundary.
pub struct CloseChain {
    /// `thread.frame_depth()` of the frame that owns this chain: the frame
    /// whose `CLOSE` instruction (or whose unwind) started it, and whose
    /// execution resumes once every entry has been closed.
    pub owner_depth: usize,
    pub remaining: Vec<PendingClose>,
    /// The error propagating through this chain, if any: the original
    /// unwind error, later replaced if a `__close` handler itself errors.
    /// `None` for a chain started by a normal (non-erroring) scope exit.
    pub pending_error: Option<LuaValue>,
}

/// One entry of the Lua-level call stack. The dispatch loop is an explicit
/// `Vec<CallFrame>` rather than native Rust recursion, so that
/// `coroutine.yield` can simply stop looping and `resume` can re-enter where
/// it left off (spec.md Design Notes: avoids OS threads or fiber-switching
/// for coroutines).
pub struct CallFrame {
    pub func: LuaFunction,
    pub base: usize,
    pub pc: u32,
    /// How many results the caller expects (`Some(n)`, padded/truncated to
    /// `n`) or all of them (`None`, an "open" call — spec.md §4.3.1).
    /// Meaningless when `result_dst` is `None`.
    pub nresults: Option<u8>,
    pub is_tail_call: bool,
    pub varargs: Vec<LuaValue>,
    /// Absolute stack index results get written back to when this frame
    /// returns. `None` for the frame a `run_frame_loop` call was entered
    /// with — its results are handed back to that Rust caller directly
    /// rather than written into some other frame's registers.
    pub result_dst: Option<usize>,
    /// This frame was pushed by `advance_close_chain` to run one `__close`
    /// handler, not by a `CALL`/`TFORCALL` instruction: its results are
    /// discarded and its return resumes the owning chain instead of writing
    /// into `result_dst` (spec.md §4.5.7).
    pub is_close_handler: bool,
}

pub struct ThreadInner {
    pub status: RefCell<ThreadStatus>,
    pub stack: RefCell<Vec<LuaValue>>,
    pub frames: RefCell<Vec<CallFrame>>,
    pub open_upvalues: RefCell<Vec<crate::value::closure::Upvalue>>,
    pub pending_closes: RefCell<Vec<PendingClose>>,
    pub resume_values: RefCell<Vec<LuaValue>>,
    pub yield_values: RefCell<Vec<LuaValue>>,
    /// Count hook / line hook state (spec.md §4.7 debug hooks), carried
    /// per-thread since each coroutine can install its own.
    pub hook: RefCell<Option<crate::vm::hooks::HookState>>,
    pub is_main: bool,
    /// Dynamic stack top (absolute index), meaningful only right after an
    /// open-ended result-producing instruction (a `Call`/`Vararg` with no
    /// fixed count) until the next instruction that consumes it — mirrors
    /// `L->top` in canonical Lua (spec.md §4.3.1 "open" call/return shapes).
    pub top: Cell<usize>,
    /// Where a yielded native call's eventual resume values should be
    /// written (register, expected count), and whether this thread has
    /// executed its first instruction yet (first-resume parameter binding
    /// happens once, spec.md §4.5.7 coroutines).
    pub yield_write: RefCell<Option<(usize, Option<u8>)>>,
    pub has_started: Cell<bool>,
    /// Active `__close` chains, outermost first (spec.md §4.5.7). More than
    /// one can be outstanding when a `__close` handler's own scope exit (or
    /// error) starts a nested chain before the outer one finishes.
    pub close_chains: RefCell<Vec<CloseChain>>,
}

#[derive(Clone)]
pub struct LuaThread(pub Rc<ThreadInner>);

impl LuaThread {
    pub fn new_main() -> Self {
        LuaThread(Rc::new(ThreadInner {
            status: RefCell::new(ThreadStatus::Running),
            stack: RefCell::new(Vec::with_capacity(256)),
            frames: RefCell::new(Vec::with_capacity(32)),
            open_upvalues: RefCell::new(Vec::new()),
            pending_closes: RefCell::new(Vec::new()),
            resume_values: RefCell::new(Vec::new()),
            yield_values: RefCell::new(Vec::new()),
            hook: RefCell::new(None),
            is_main: true,
            top: Cell::new(0),
            yield_write: RefCell::new(None),
            has_started: Cell::new(true),
            close_chains: RefCell::new(Vec::new()),
        }))
    }

    pub fn new_coroutine(body: LuaFunction) -> Self {
        let thread = LuaThread(Rc::new(ThreadInner {
            status: RefCell::new(ThreadStatus::Suspended),
            stack: RefCell::new(Vec::with_capacity(64)),
            frames: RefCell::new(Vec::new()),
            open_upvalues: RefCell::new(Vec::new()),
            pending_closes: RefCell::new(Vec::new()),
            resume_values: RefCell::new(Vec::new()),
            yield_values: RefCell::new(Vec::new()),
            hook: RefCell::new(None),
            is_main: false,
            top: Cell::new(0),
            yield_write: RefCell::new(None),
            has_started: Cell::new(false),
            close_chains: RefCell::new(Vec::new()),
        }));
        thread.0.frames.borrow_mut().push(CallFrame {
            func: body,
            base: 0,
            pc: 0,
            nresults: None,
            is_tail_call: false,
            varargs: Vec::new(),
            result_dst: None,
            is_close_handler: false,
        });
        thread
    }

    pub fn status(&self) -> ThreadStatus {
        *self.0.status.borrow()
    }

    pub fn set_status(&self, status: ThreadStatus) {
        *self.0.status.borrow_mut() = status;
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.status(), ThreadStatus::Dead)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn register_at(&self, index: usize) -> LuaValue {
        self.0
            .stack
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(LuaValue::Nil)
    }

    pub fn set_register_at(&self, index: usize, value: LuaValue) {
        let mut stack = self.0.stack.borrow_mut();
        if index >= stack.len() {
            stack.resize(index + 1, LuaValue::Nil);
        }
        stack[index] = value;
    }

    pub fn stack_len(&self) -> usize {
        self.0.stack.borrow().len()
    }

    /// Drops register slots at and above `len`, run whenever a frame's
    /// locals go out of scope (spec.md §4.3.1 frame teardown).
    pub fn truncate_stack(&self, len: usize) {
        self.0.stack.borrow_mut().truncate(len);
    }

    pub fn frame_depth(&self) -> usize {
        self.0.frames.borrow().len()
    }

    pub fn push_frame(&self, frame: CallFrame) {
        self.0.frames.borrow_mut().push(frame);
    }

    pub fn pop_frame(&self) -> Option<CallFrame> {
        self.0.frames.borrow_mut().pop()
    }

    pub fn current_frame_pc(&self) -> u32 {
        self.0.frames.borrow().last().map(|f| f.pc).unwrap_or(0)
    }

    pub fn set_current_frame_pc(&self, pc: u32) {
        if let Some(f) = self.0.frames.borrow_mut().last_mut() {
            f.pc = pc;
        }
    }

    pub fn current_frame_base(&self) -> usize {
        self.0.frames.borrow().last().map(|f| f.base).unwrap_or(0)
    }

    pub fn current_closure(&self) -> Option<LuaFunction> {
        self.0.frames.borrow().last().map(|f| f.func.clone())
    }

    pub fn top(&self) -> usize {
        self.0.top.get()
    }

    /// `source:line` for the Lua frame `level` steps up the call stack from
    /// the function that is currently calling a native function (used by
    /// `error(msg, level)`, spec.md §7.1): `level=1` is that native
    /// function's own caller (the top Lua frame, since a native call never
    /// pushes its own frame via `do_call`), `level=2` its caller, and so on.
    /// `None` past the bottom of the stack or when a native frame is found.
    pub fn location_at_level(&self, level: usize) -> Option<(String, u32)> {
        if level == 0 {
            return None;
        }
        let frames = self.0.frames.borrow();
        let idx = frames.len().checked_sub(level)?;
        let frame = &frames[idx];
        match &frame.func {
            LuaFunction::Lua(closure) => {
                let line = closure.0.proto.line_at(frame.pc.saturating_sub(1));
                Some((closure.0.proto.chunk_display_name(), line))
            }
            LuaFunction::Native(_) | LuaFunction::NativeClosure(_) => None,
        }
    }

    pub fn set_top(&self, top: usize) {
        self.0.top.set(top);
    }
}
