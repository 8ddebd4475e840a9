//! Single-pass compiler: `ast::Chunk` -> `Proto` (spec.md §4.3).
//!
//! Structurally grounded on the teacher's `crates/luars/src/compiler/mod.rs`
//! (`FuncState`/register allocator/upvalue resolver split across
//! `func_state.rs`/`expr.rs`/`statement.rs`), generalized from the teacher's
//! tree-sitter-backed CST input to this crate's own recursive-descent AST.
//!
//! Condition compilation here always materializes the boolean result into
//! a register before branching (`Test`+`Jmp`), rather than real Lua's
//! short-circuit jump-list threading through `and`/`or`/comparison chains.
//! This trades a few redundant instructions per branch for a compiler that
//! is far easier to get right without a running interpreter to fuzz the
//! jump-patching logic against — documented as a deliberate simplification
//! in DESIGN.md; spec.md §9 requires self-consistency, not a particular
//! instruction count.

mod funcstate;
mod expr;
mod stmt;

use crate::ast::Chunk;
use crate::opcode::RK;
use crate::value::lua_value::LuaValue;
use crate::value::proto::{Proto, UpvalueDesc};
use funcstate::FuncState;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type CResult<T> = Result<T, CompileError>;

pub enum NameRef {
    Local(u8),
    Upvalue(u8),
    Global,
}

pub struct Compiler {
    pub(crate) funcs: Vec<FuncState>,
    pub(crate) source_name: String,
}

/// Compiles a parsed chunk into a root `Proto`. The root proto is always
/// vararg (spec.md §6: the main chunk receives script arguments) with a
/// single upvalue `_ENV` at index 0 (spec.md §4.3 "the root context defines
/// `_ENV` as upvalue #0").
pub fn compile(chunk: &Chunk, source_name: impl Into<String>) -> CResult<Proto> {
    let source_name = source_name.into();
    let mut c = Compiler { funcs: Vec::new(), source_name: source_name.clone() };
    c.funcs.push(FuncState::new(source_name, 0, true));
    c.funcs[0].upvalues.push(UpvalueDesc::from_upvalue("_ENV", 0));
    c.compile_block(&chunk.body)?;
    c.finish_return_if_missing();
    c.resolve_pending_gotos()?;
    c.build_proto()
}

impl Compiler {
    fn fs(&mut self) -> &mut FuncState {
        self.funcs.last_mut().unwrap()
    }

    fn level(&self) -> usize {
        self.funcs.len() - 1
    }

    fn err(&self, line: u32, message: impl Into<String>) -> CompileError {
        CompileError {
            message: format!("{}:{}: {}", crate::value::proto::display_source_name(&self.source_name), line, message.into()),
            line,
        }
    }

    fn finish_return_if_missing(&mut self) {
        let needs = !matches!(self.fs().code.last(), Some(crate::opcode::Instruction::Return0) | Some(crate::opcode::Instruction::Return { .. }));
        if needs {
            let line = self.fs().end_line;
            self.fs().emit(crate::opcode::Instruction::Return0, line);
        }
    }

    fn resolve_pending_gotos(&mut self) -> CResult<()> {
        let fs = self.fs();
        let mut errors = Vec::new();
        for g in &fs.pending_gotos {
            match fs.labels.iter().find(|l| l.name == g.name) {
                Some(l) => {
                    // handled incrementally during block exit; anything
                    // still pending at the top level is unresolved.
                    let _ = l;
                }
                None => errors.push((g.name.clone(), g.line)),
            }
        }
        if let Some((name, line)) = errors.into_iter().next() {
            return Err(self.err(line, format!("no visible label '{name}' for goto")));
        }
        Ok(())
    }

    fn build_proto(mut self) -> CResult<Proto> {
        let fs = self.funcs.pop().unwrap();
        let source_name = fs.source_name.clone();
        let line_defined = fs.line_defined;
        let end_line = fs.end_line;
        let nparams = fs.nparams;
        let is_vararg = fs.is_vararg;
        let locals = fs.local_infos();
        let (code, line_events, constants, upvalues, protos, max_stack) = fs.finish();
        Ok(Proto {
            source_name,
            line_defined,
            last_line_defined: end_line,
            param_count: nparams,
            is_vararg,
            max_stack_size: max_stack.max(2),
            code,
            constants,
            upvalues,
            locals,
            line_events,
            protos,
        })
    }

    // ---- name resolution (spec.md §4.3.5) ----

    fn resolve_name(&mut self, name: &str) -> NameRef {
        let level = self.level();
        if let Some(idx) = self.funcs[level].find_local(name) {
            return NameRef::Local(self.funcs[level].locals[idx].register);
        }
        if let Some(idx) = self.find_or_capture_upvalue(level, name) {
            return NameRef::Upvalue(idx);
        }
        NameRef::Global
    }

    /// Resolves `name` as an upvalue at `level`, threading the capture
    /// down through every intermediate function the way spec.md §4.3.5
    /// describes, memoizing already-captured upvalues by name.
    fn find_or_capture_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if let Some(idx) = self.funcs[level].find_upvalue(name) {
            return Some(idx);
        }
        if level == 0 {
            return None;
        }
        if let Some(idx) = self.funcs[level - 1].find_local(name) {
            let reg = self.funcs[level - 1].locals[idx].register as u32;
            self.funcs[level - 1].locals[idx].captured = true;
            self.funcs[level].upvalues.push(UpvalueDesc::from_local(name, reg));
            return Some((self.funcs[level].upvalues.len() - 1) as u8);
        }
        if let Some(pidx) = self.find_or_capture_upvalue(level - 1, name) {
            self.funcs[level].upvalues.push(UpvalueDesc::from_upvalue(name, pidx as u32));
            return Some((self.funcs[level].upvalues.len() - 1) as u8);
        }
        None
    }

    /// The `_ENV` upvalue index visible at the current function level,
    /// used to compile global-variable access as `GETFIELD/SETFIELD`-style
    /// field access on `_ENV` (spec.md §4.3.5).
    fn env_upvalue(&mut self) -> u8 {
        let level = self.level();
        self.find_or_capture_upvalue(level, "_ENV").expect("_ENV is always defined at the root proto")
    }

    fn str_const(&mut self, s: &str) -> u32 {
        self.fs().const_index(LuaValue::new_string(s.as_bytes().to_vec().into_boxed_slice(), crate::value::lua_string::hash_bytes(s.as_bytes())))
    }

    fn bytes_const(&mut self, b: &[u8]) -> u32 {
        self.fs().const_index(LuaValue::new_string(b.to_vec().into_boxed_slice(), crate::value::lua_string::hash_bytes(b)))
    }

    /// RK-encodes a constant-pool index, materializing it into a temp
    /// register when the index doesn't fit the RK high-bit budget
    /// (spec.md §4.3.2: "Only constant indices ≤255 may ride RK").
    fn rk_const(&mut self, idx: u32, line: u32) -> RK {
        if idx <= 255 {
            RK::Const(idx)
        } else {
            let r = self.fs().reserve_reg();
            self.fs().emit(crate::opcode::Instruction::LoadK { dst: r, k: idx }, line);
            RK::Reg(r)
        }
    }
}
