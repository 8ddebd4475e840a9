//! `Proto`: the compile-time artifact produced by the compiler and executed
//! by the VM (spec.md §3 "Proto", §4.3).

use std::rc::Rc;

use crate::opcode::Instruction;
use crate::value::lua_value::LuaValue;

pub type ConstIndex = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub name: String,
    /// `true` if this upvalue captures a local register of the *directly*
    /// enclosing function; `false` if it captures one of the enclosing
    /// function's own upvalues (spec.md §4.3.5).
    pub in_stack: bool,
    pub index: u32,
}

/// Name aside; exposed because `true`/`false` alone is opaque at call sites.
impl UpvalueDesc {
    pub fn from_local(name: impl Into<String>, register: u32) -> Self {
        UpvalueDesc { name: name.into(), in_stack: true, index: register }
    }
    pub fn from_upvalue(name: impl Into<String>, index: u32) -> Self {
        UpvalueDesc { name: name.into(), in_stack: false, index }
    }
}

/// Local-variable lifetime record (spec.md §3 "Proto").
#[derive(Debug, Clone)]
pub struct LocalVarInfo {
    pub name: String,
    pub register: u8,
    pub start_pc: u32,
    pub end_pc: u32,
    pub is_const: bool,
    pub is_close: bool,
}

/// The kind of a line event (spec.md §4.3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEventKind {
    Execution,
    StatementBoundary,
}

#[derive(Debug, Clone, Copy)]
pub struct LineEvent {
    pub pc: u32,
    pub line: u32,
    pub kind: LineEventKind,
}

#[derive(Debug)]
pub struct Proto {
    pub source_name: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub param_count: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,

    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub upvalues: Vec<UpvalueDesc>,
    pub locals: Vec<LocalVarInfo>,
    pub line_events: Vec<LineEvent>,
    pub protos: Vec<Rc<Proto>>,
}

impl Proto {
    /// Looks up the source line governing a given program counter using the
    /// line-event table (the *only* source of runtime line numbers, per
    /// spec.md §4.3.6).
    pub fn line_at(&self, pc: u32) -> u32 {
        let mut line = self.line_defined;
        for ev in &self.line_events {
            if ev.pc > pc {
                break;
            }
            line = ev.line;
        }
        line
    }

    /// Formats the chunk name the way Lua error messages do (spec.md §6
    /// "source-name conventions"): `@file` prints as `file`, `=name` prints
    /// verbatim, anything else is a string-chunk snippet printed as
    /// `[string "first line"]`.
    pub fn chunk_display_name(&self) -> String {
        display_source_name(&self.source_name)
    }
}

pub fn display_source_name(source_name: &str) -> String {
    if let Some(rest) = source_name.strip_prefix('@') {
        rest.to_string()
    } else if let Some(rest) = source_name.strip_prefix('=') {
        rest.to_string()
    } else {
        let first_line = source_name.lines().next().unwrap_or("");
        const MAX: usize = 60;
        let (snippet, truncated) = if first_line.len() > MAX {
            (&first_line[..MAX], true)
        } else {
            (first_line, false)
        };
        if truncated || source_name.contains('\n') {
            format!("[string \"{}...\"]", snippet)
        } else {
            format!("[string \"{}\"]", snippet)
        }
    }
}
