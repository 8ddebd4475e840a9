//! Per-`Proto` compiler state: register allocator, scope/local bookkeeping,
//! constant pool, upvalue resolver, goto/label tables (spec.md §4.3).

use crate::ast::LocalAttrib;
use crate::opcode::Instruction;
use crate::value::lua_value::LuaValue;
use crate::value::proto::{LineEvent, LineEventKind, LocalVarInfo, Proto, UpvalueDesc};
use std::rc::Rc;

pub struct LocalVar {
    pub name: String,
    pub register: u8,
    pub start_pc: u32,
    pub end_pc: u32,
    pub is_const: bool,
    pub is_close: bool,
    pub active: bool,
    pub captured: bool,
}

/// One lexical block. `first_local` is the index into `FuncState::locals`
/// of the first local declared in this block (locals before that index
/// belong to enclosing blocks and stay active on exit).
pub struct BlockState {
    pub scope_level: u32,
    pub first_local: usize,
    pub is_loop: bool,
    pub break_jumps: Vec<usize>,
    pub has_close: bool,
    pub labels_defined_here: Vec<String>,
}

pub struct LabelDef {
    pub name: String,
    pub pc: usize,
    pub scope_level: u32,
    pub nlocals: usize,
}

pub struct PendingGoto {
    pub name: String,
    pub jmp_pc: usize,
    pub scope_level: u32,
    pub nlocals: usize,
    pub line: u32,
}

pub struct FuncState {
    pub source_name: String,
    pub line_defined: u32,
    pub end_line: u32,
    pub nparams: u8,
    pub is_vararg: bool,

    pub code: Vec<Instruction>,
    pub line_events: Vec<LineEvent>,
    last_emitted_line: u32,

    pub constants: Vec<LuaValue>,
    pub locals: Vec<LocalVar>,
    pub blocks: Vec<BlockState>,
    pub upvalues: Vec<UpvalueDesc>,
    pub protos: Vec<Rc<Proto>>,

    pub free_reg: u8,
    pub max_stack: u8,
    scope_counter: u32,

    pub labels: Vec<LabelDef>,
    pub pending_gotos: Vec<PendingGoto>,
}

impl FuncState {
    pub fn new(source_name: String, line_defined: u32, is_vararg: bool) -> Self {
        FuncState {
            source_name,
            line_defined,
            end_line: line_defined,
            nparams: 0,
            is_vararg,
            code: Vec::new(),
            line_events: Vec::new(),
            last_emitted_line: 0,
            constants: Vec::new(),
            locals: Vec::new(),
            blocks: vec![BlockState {
                scope_level: 0,
                first_local: 0,
                is_loop: false,
                break_jumps: Vec::new(),
                has_close: false,
                labels_defined_here: Vec::new(),
            }],
            upvalues: Vec::new(),
            protos: Vec::new(),
            free_reg: 0,
            max_stack: 2,
            scope_counter: 0,
            labels: Vec::new(),
            pending_gotos: Vec::new(),
        }
    }

    // ---- registers ----

    pub fn reserve_reg(&mut self) -> u8 {
        let r = self.free_reg;
        self.free_reg = self.free_reg.checked_add(1).expect("register file overflow (function too large)");
        if self.free_reg > self.max_stack {
            self.max_stack = self.free_reg;
        }
        r
    }

    /// Releases registers back down to `to` (a stack discipline: callers
    /// only ever free from the top, spec.md §4.3.2 "with-temp scopes").
    pub fn free_to(&mut self, to: u8) {
        self.free_reg = to;
    }

    // ---- emit ----

    pub fn emit(&mut self, instr: Instruction, line: u32) -> usize {
        let pc = self.code.len() as u32;
        if line != self.last_emitted_line {
            self.line_events.push(LineEvent { pc, line, kind: LineEventKind::Execution });
            self.last_emitted_line = line;
        }
        self.code.push(instr);
        pc as usize
    }

    pub fn emit_statement_boundary(&mut self, line: u32) {
        let pc = self.code.len() as u32;
        self.line_events.push(LineEvent { pc, line, kind: LineEventKind::StatementBoundary });
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn patch_jmp_to_here(&mut self, jmp_pc: usize) {
        self.patch_jmp_to(jmp_pc, self.code.len());
    }

    /// Patches the branch-offset operand of a jump-shaped instruction at
    /// `jmp_pc` to land on `target_pc`, using the same "offset relative to
    /// the instruction following the jump" convention for every shape that
    /// carries one: `Jmp`, `ForPrep`'s exit, and `ForLoop`/`TForLoop`'s body
    /// branch (spec.md §4.3.1 loop opcodes).
    pub fn patch_jmp_to(&mut self, jmp_pc: usize, target_pc: usize) {
        let offset = (target_pc as i64 - (jmp_pc as i64 + 1)) as i32;
        match &mut self.code[jmp_pc] {
            Instruction::Jmp { offset: o } => *o = offset,
            Instruction::ForPrep { exit_offset, .. } => *exit_offset = offset,
            Instruction::ForLoop { body_offset, .. } => *body_offset = offset,
            Instruction::TForLoop { body_offset, .. } => *body_offset = offset,
            _ => panic!("patch_jmp_to called on a non-branch instruction"),
        }
    }

    // ---- constants ----

    pub fn const_index(&mut self, value: LuaValue) -> u32 {
        for (i, existing) in self.constants.iter().enumerate() {
            if const_eq(existing, &value) {
                return i as u32;
            }
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    // ---- scopes ----

    pub fn enter_block(&mut self, is_loop: bool) {
        self.scope_counter += 1;
        self.blocks.push(BlockState {
            scope_level: self.scope_counter,
            first_local: self.locals.len(),
            is_loop,
            break_jumps: Vec::new(),
            has_close: false,
            labels_defined_here: Vec::new(),
        });
    }

    /// Leaves the innermost block, deactivating its locals and removing its
    /// labels (block-scoped label visibility, spec.md §4.3.3). Returns the
    /// popped block so the caller can patch its `break` jumps and decide
    /// whether a `CLOSE` is needed.
    pub fn leave_block(&mut self) -> BlockState {
        let block = self.blocks.pop().expect("unbalanced block stack");
        for l in &self.locals[block.first_local..] {
            let _ = l;
        }
        let end_pc = self.code.len() as u32;
        for l in self.locals[block.first_local..].iter_mut() {
            l.active = false;
            l.end_pc = end_pc;
        }
        self.locals.truncate(block.first_local);
        self.labels.retain(|l| !block.labels_defined_here.contains(&l.name));
        block
    }

    pub fn current_block(&self) -> &BlockState {
        self.blocks.last().expect("no active block")
    }

    pub fn current_block_mut(&mut self) -> &mut BlockState {
        self.blocks.last_mut().expect("no active block")
    }

    pub fn declare_local(&mut self, name: String, attrib: &LocalAttrib) -> u8 {
        let reg = self.reserve_reg();
        self.locals.push(LocalVar {
            name,
            register: reg,
            start_pc: self.code.len() as u32,
            end_pc: 0,
            is_const: matches!(attrib, LocalAttrib::Const | LocalAttrib::Close),
            is_close: matches!(attrib, LocalAttrib::Close),
            active: true,
            captured: false,
        });
        if matches!(attrib, LocalAttrib::Close) {
            self.blocks.last_mut().unwrap().has_close = true;
        }
        reg
    }

    pub fn find_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().enumerate().rev().filter(|(_, l)| l.active).find(|(_, l)| l.name == name).map(|(i, _)| i)
    }

    pub fn find_upvalue(&self, name: &str) -> Option<u8> {
        self.upvalues.iter().position(|u| u.name == name).map(|i| i as u8)
    }

    /// Locals with `<close>` active anywhere at or above `from_reg`, in
    /// reverse declaration order (for `CLOSE` emission, spec.md §4.3.3).
    pub fn close_candidates_from(&self, from_reg: u8) -> bool {
        self.locals.iter().any(|l| l.active && l.is_close && l.register >= from_reg)
    }

    pub fn finish(self) -> (Vec<Instruction>, Vec<LineEvent>, Vec<LuaValue>, Vec<UpvalueDesc>, Vec<Rc<Proto>>, u8) {
        (self.code, self.line_events, self.constants, self.upvalues, self.protos, self.max_stack)
    }

    pub fn local_infos(&self) -> Vec<LocalVarInfo> {
        // Only ever-declared locals with an end_pc (i.e. those that were
        // deactivated) are complete; still-active ones belong to the outer
        // caller closing the proto and get end_pc = code length.
        self.locals
            .iter()
            .map(|l| LocalVarInfo {
                name: l.name.clone(),
                register: l.register,
                start_pc: l.start_pc,
                end_pc: if l.end_pc == 0 { self.code.len() as u32 } else { l.end_pc },
                is_const: l.is_const,
                is_close: l.is_close,
            })
            .collect()
    }
}

/// Constant-pool deduplication including numeric subtype (spec.md §4.3:
/// "constant pool (deduplicating by value equality including numeric
/// subtype)") — an integer `1` and a float `1.0` are distinct constants.
fn const_eq(a: &LuaValue, b: &LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Nil, LuaValue::Nil) => true,
        (LuaValue::Boolean(x), LuaValue::Boolean(y)) => x == y,
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x == y,
        (LuaValue::Float(x), LuaValue::Float(y)) => x.to_bits() == y.to_bits(),
        (LuaValue::Str(x), LuaValue::Str(y)) => x == y,
        _ => false,
    }
}
