//! Binary chunk dump/load (spec.md §4.6, SPEC_FULL.md §7: `string.dump` and
//! `load`'s binary-chunk path).
//!
//! spec.md §6 only requires *self-consistency* — a chunk this crate dumps
//! must load back into an equivalent `Proto` in this crate — not byte
//! compatibility with canonical Lua's own `.luac` format. The header still
//! follows the shape of canonical Lua's `lundump.c` (signature, version,
//! format byte, a short "corruption" probe, and fixed-width integer/float
//! test values) because that shape is what a reader familiar with Lua
//! expects from a `load`/`dump` implementation, but the payload that follows
//! encodes this crate's own `Instruction` enum (opcode/mod.rs's documented
//! design choice) directly — tag byte plus fields — rather than a packed
//! 32-bit word.

use std::rc::Rc;

use crate::opcode::{CloseMode, Instruction, NameHint, RK};
use crate::value::closure::{LuaClosure, LuaFunction, Upvalue};
use crate::value::lua_value::LuaValue;
use crate::value::proto::{ConstIndex, LineEvent, LineEventKind, LocalVarInfo, Proto, UpvalueDesc};
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

const SIGNATURE: &[u8; 4] = b"\x1bTLC";
const FORMAT_VERSION: u8 = 1;
/// Bytes that would be corrupted by an unwanted text-mode newline
/// translation, checked on load the way canonical Lua's `LUAC_DATA` is.
const CORRUPTION_PROBE: &[u8] = &[0x19, 0x93, b'\r', b'\n', 0x1a, b'\n'];
const INT_TEST_VALUE: i64 = 0x5678;
const FLOAT_TEST_VALUE: f64 = 370.5;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }
    fn string(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }
    fn take(&mut self, n: usize) -> LResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(LuaError::msg("truncated precompiled chunk"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
    fn u8(&mut self) -> LResult<u8> {
        Ok(self.take(1)?[0])
    }
    fn bool(&mut self) -> LResult<bool> {
        Ok(self.u8()? != 0)
    }
    fn u32(&mut self) -> LResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn i32(&mut self) -> LResult<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn i64(&mut self) -> LResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn f64(&mut self) -> LResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn bytes(&mut self) -> LResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
    fn string(&mut self) -> LResult<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Produces a self-consistent binary chunk for `proto` (spec.md §4.6 /
/// `string.dump`). `strip` discards `locals`/`line_events` the way
/// canonical Lua's `string.dump(f, true)` strips debug information.
pub fn dump(proto: &Proto, strip: bool) -> Vec<u8> {
    let mut w = Writer::new();
    w.buf.extend_from_slice(SIGNATURE);
    w.u8(FORMAT_VERSION);
    w.buf.extend_from_slice(CORRUPTION_PROBE);
    w.i64(INT_TEST_VALUE);
    w.f64(FLOAT_TEST_VALUE);
    write_proto(&mut w, proto, strip);
    w.buf
}

fn write_proto(w: &mut Writer, proto: &Proto, strip: bool) {
    w.string(&proto.source_name);
    w.u32(proto.line_defined);
    w.u32(proto.last_line_defined);
    w.u8(proto.param_count);
    w.bool(proto.is_vararg);
    w.u8(proto.max_stack_size);

    w.u32(proto.code.len() as u32);
    for instr in &proto.code {
        write_instruction(w, instr);
    }

    w.u32(proto.constants.len() as u32);
    for k in &proto.constants {
        write_constant(w, k);
    }

    w.u32(proto.upvalues.len() as u32);
    for uv in &proto.upvalues {
        w.string(&uv.name);
        w.bool(uv.in_stack);
        w.u32(uv.index);
    }

    if strip {
        w.u32(0);
        w.u32(0);
    } else {
        w.u32(proto.locals.len() as u32);
        for l in &proto.locals {
            w.string(&l.name);
            w.u8(l.register);
            w.u32(l.start_pc);
            w.u32(l.end_pc);
            w.bool(l.is_const);
            w.bool(l.is_close);
        }
        w.u32(proto.line_events.len() as u32);
        for ev in &proto.line_events {
            w.u32(ev.pc);
            w.u32(ev.line);
            w.u8(match ev.kind {
                LineEventKind::Execution => 0,
                LineEventKind::StatementBoundary => 1,
            });
        }
    }

    w.u32(proto.protos.len() as u32);
    for child in &proto.protos {
        write_proto(w, child, strip);
    }
}

fn write_rk(w: &mut Writer, rk: &RK) {
    match rk {
        RK::Reg(r) => {
            w.u8(0);
            w.u8(*r);
        }
        RK::Const(c) => {
            w.u8(1);
            w.u32(*c);
        }
    }
}

fn write_hint(w: &mut Writer, hint: &NameHint) {
    match hint {
        NameHint::None => w.u8(0),
        NameHint::Global(s) => {
            w.u8(1);
            w.string(s);
        }
        NameHint::Local(s) => {
            w.u8(2);
            w.string(s);
        }
        NameHint::Upvalue(s) => {
            w.u8(3);
            w.string(s);
        }
        NameHint::Field(s) => {
            w.u8(4);
            w.string(s);
        }
        NameHint::Method(s) => {
            w.u8(5);
            w.string(s);
        }
    }
}

fn write_close_mode(w: &mut Writer, mode: &CloseMode) {
    w.u8(match mode {
        CloseMode::ScopeExit => 0,
        CloseMode::Declaration => 1,
        CloseMode::Explicit => 2,
    });
}

/// Each arm's leading byte is the variant tag; `load_instruction` below must
/// list the same variants in the same order.
fn write_instruction(w: &mut Writer, instr: &Instruction) {
    use Instruction::*;
    match instr {
        Move { dst, src } => {
            w.u8(0);
            w.u8(*dst);
            w.u8(*src);
        }
        LoadK { dst, k } => {
            w.u8(1);
            w.u8(*dst);
            w.u32(*k);
        }
        LoadI { dst, imm } => {
            w.u8(2);
            w.u8(*dst);
            w.i32(*imm);
        }
        LoadF { dst, imm } => {
            w.u8(3);
            w.u8(*dst);
            w.f64(*imm);
        }
        LoadBool { dst, value, skip_next } => {
            w.u8(4);
            w.u8(*dst);
            w.bool(*value);
            w.bool(*skip_next);
        }
        LoadNil { dst, count } => {
            w.u8(5);
            w.u8(*dst);
            w.u8(*count);
        }
        GetUpval { dst, upval } => {
            w.u8(6);
            w.u8(*dst);
            w.u8(*upval);
        }
        SetUpval { upval, src } => {
            w.u8(7);
            w.u8(*upval);
            w.u8(*src);
        }
        GetEnvField { dst, env_upval, key, hint } => {
            w.u8(8);
            w.u8(*dst);
            w.u8(*env_upval);
            w.u32(*key);
            write_hint(w, hint);
        }
        SetEnvField { env_upval, key, src, hint } => {
            w.u8(9);
            w.u8(*env_upval);
            w.u32(*key);
            write_rk(w, src);
            write_hint(w, hint);
        }
        NewTable { dst, narr, nhash } => {
            w.u8(10);
            w.u8(*dst);
            w.u32(*narr);
            w.u32(*nhash);
        }
        GetTable { dst, table, key, hint } => {
            w.u8(11);
            w.u8(*dst);
            w.u8(*table);
            write_rk(w, key);
            write_hint(w, hint);
        }
        SetTable { table, key, value, hint } => {
            w.u8(12);
            w.u8(*table);
            write_rk(w, key);
            write_rk(w, value);
            write_hint(w, hint);
        }
        GetField { dst, table, key, hint } => {
            w.u8(13);
            w.u8(*dst);
            w.u8(*table);
            w.u32(*key);
            write_hint(w, hint);
        }
        SetField { table, key, value, hint } => {
            w.u8(14);
            w.u8(*table);
            w.u32(*key);
            write_rk(w, value);
            write_hint(w, hint);
        }
        SelfOp { dst, table, key, hint } => {
            w.u8(15);
            w.u8(*dst);
            w.u8(*table);
            w.u32(*key);
            write_hint(w, hint);
        }
        SetList { table, start, count, block } => {
            w.u8(16);
            w.u8(*table);
            w.u8(*start);
            w.u32(*count);
            w.u32(*block);
        }
        Add { dst, lhs, rhs } => {
            w.u8(17);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Sub { dst, lhs, rhs } => {
            w.u8(18);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Mul { dst, lhs, rhs } => {
            w.u8(19);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Div { dst, lhs, rhs } => {
            w.u8(20);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        IDiv { dst, lhs, rhs } => {
            w.u8(21);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Mod { dst, lhs, rhs } => {
            w.u8(22);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Pow { dst, lhs, rhs } => {
            w.u8(23);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Unm { dst, src } => {
            w.u8(24);
            w.u8(*dst);
            w.u8(*src);
        }
        BAnd { dst, lhs, rhs } => {
            w.u8(25);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        BOr { dst, lhs, rhs } => {
            w.u8(26);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        BXor { dst, lhs, rhs } => {
            w.u8(27);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Shl { dst, lhs, rhs } => {
            w.u8(28);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        Shr { dst, lhs, rhs } => {
            w.u8(29);
            w.u8(*dst);
            write_rk(w, lhs);
            write_rk(w, rhs);
        }
        BNot { dst, src } => {
            w.u8(30);
            w.u8(*dst);
            w.u8(*src);
        }
        Not { dst, src } => {
            w.u8(31);
            w.u8(*dst);
            w.u8(*src);
        }
        Len { dst, src } => {
            w.u8(32);
            w.u8(*dst);
            w.u8(*src);
        }
        Concat { dst, first, last } => {
            w.u8(33);
            w.u8(*dst);
            w.u8(*first);
            w.u8(*last);
        }
        Eq { lhs, rhs, expected } => {
            w.u8(34);
            write_rk(w, lhs);
            write_rk(w, rhs);
            w.bool(*expected);
        }
        Lt { lhs, rhs, expected } => {
            w.u8(35);
            write_rk(w, lhs);
            write_rk(w, rhs);
            w.bool(*expected);
        }
        Le { lhs, rhs, expected } => {
            w.u8(36);
            write_rk(w, lhs);
            write_rk(w, rhs);
            w.bool(*expected);
        }
        Test { src, expected } => {
            w.u8(37);
            w.u8(*src);
            w.bool(*expected);
        }
        TestSet { dst, src, expected } => {
            w.u8(38);
            w.u8(*dst);
            w.u8(*src);
            w.bool(*expected);
        }
        Jmp { offset } => {
            w.u8(39);
            w.i32(*offset);
        }
        Call { func, nargs, nresults } => {
            w.u8(40);
            w.u8(*func);
            write_opt_u8(w, *nargs);
            write_opt_u8(w, *nresults);
        }
        TailCall { func, nargs } => {
            w.u8(41);
            w.u8(*func);
            write_opt_u8(w, *nargs);
        }
        Return { first, count } => {
            w.u8(42);
            w.u8(*first);
            write_opt_u8(w, *count);
        }
        Return0 => w.u8(43),
        Vararg { dst, count } => {
            w.u8(44);
            w.u8(*dst);
            write_opt_u8(w, *count);
        }
        ForPrep { base, exit_offset } => {
            w.u8(45);
            w.u8(*base);
            w.i32(*exit_offset);
        }
        ForLoop { base, body_offset } => {
            w.u8(46);
            w.u8(*base);
            w.i32(*body_offset);
        }
        TForCall { base, nresults } => {
            w.u8(47);
            w.u8(*base);
            w.u8(*nresults);
        }
        TForLoop { base, body_offset } => {
            w.u8(48);
            w.u8(*base);
            w.i32(*body_offset);
        }
        Closure { dst, proto } => {
            w.u8(49);
            w.u8(*dst);
            w.u32(*proto);
        }
        Close { from, mode } => {
            w.u8(50);
            w.u8(*from);
            write_close_mode(w, mode);
        }
    }
}

fn write_opt_u8(w: &mut Writer, v: Option<u8>) {
    match v {
        Some(n) => {
            w.u8(1);
            w.u8(n);
        }
        None => w.u8(0),
    }
}

fn read_opt_u8(r: &mut Reader) -> LResult<Option<u8>> {
    if r.u8()? == 0 {
        Ok(None)
    } else {
        Ok(Some(r.u8()?))
    }
}

fn write_constant(w: &mut Writer, v: &LuaValue) {
    match v {
        LuaValue::Nil => w.u8(0),
        LuaValue::Boolean(b) => {
            w.u8(1);
            w.bool(*b);
        }
        LuaValue::Integer(i) => {
            w.u8(2);
            w.i64(*i);
        }
        LuaValue::Float(f) => {
            w.u8(3);
            w.f64(*f);
        }
        LuaValue::Str(s) => {
            w.u8(4);
            w.bytes(s.as_bytes());
        }
        _ => unreachable!("only nil/boolean/number/string constants are ever compiled into a Proto"),
    }
}

fn read_constant(vm: &mut Vm, r: &mut Reader) -> LResult<LuaValue> {
    match r.u8()? {
        0 => Ok(LuaValue::Nil),
        1 => Ok(LuaValue::Boolean(r.bool()?)),
        2 => Ok(LuaValue::Integer(r.i64()?)),
        3 => Ok(LuaValue::Float(r.f64()?)),
        4 => {
            let bytes = r.bytes()?;
            Ok(LuaValue::Str(vm.intern(&bytes)))
        }
        tag => Err(LuaError::msg(format!("corrupted precompiled chunk (bad constant tag {tag})"))),
    }
}

fn read_rk(r: &mut Reader) -> LResult<RK> {
    match r.u8()? {
        0 => Ok(RK::Reg(r.u8()?)),
        1 => Ok(RK::Const(r.u32()?)),
        tag => Err(LuaError::msg(format!("corrupted precompiled chunk (bad RK tag {tag})"))),
    }
}

fn read_hint(r: &mut Reader) -> LResult<NameHint> {
    Ok(match r.u8()? {
        0 => NameHint::None,
        1 => NameHint::Global(r.string()?),
        2 => NameHint::Local(r.string()?),
        3 => NameHint::Upvalue(r.string()?),
        4 => NameHint::Field(r.string()?),
        5 => NameHint::Method(r.string()?),
        tag => return Err(LuaError::msg(format!("corrupted precompiled chunk (bad name-hint tag {tag})"))),
    })
}

fn read_close_mode(r: &mut Reader) -> LResult<CloseMode> {
    Ok(match r.u8()? {
        0 => CloseMode::ScopeExit,
        1 => CloseMode::Declaration,
        2 => CloseMode::Explicit,
        tag => return Err(LuaError::msg(format!("corrupted precompiled chunk (bad close-mode tag {tag})"))),
    })
}

fn read_instruction(r: &mut Reader) -> LResult<Instruction> {
    use Instruction::*;
    Ok(match r.u8()? {
        0 => Move { dst: r.u8()?, src: r.u8()? },
        1 => LoadK { dst: r.u8()?, k: r.u32()? as ConstIndex },
        2 => LoadI { dst: r.u8()?, imm: r.i32()? },
        3 => LoadF { dst: r.u8()?, imm: r.f64()? },
        4 => LoadBool { dst: r.u8()?, value: r.bool()?, skip_next: r.bool()? },
        5 => LoadNil { dst: r.u8()?, count: r.u8()? },
        6 => GetUpval { dst: r.u8()?, upval: r.u8()? },
        7 => SetUpval { upval: r.u8()?, src: r.u8()? },
        8 => GetEnvField { dst: r.u8()?, env_upval: r.u8()?, key: r.u32()?, hint: read_hint(r)? },
        9 => SetEnvField { env_upval: r.u8()?, key: r.u32()?, src: read_rk(r)?, hint: read_hint(r)? },
        10 => NewTable { dst: r.u8()?, narr: r.u32()?, nhash: r.u32()? },
        11 => GetTable { dst: r.u8()?, table: r.u8()?, key: read_rk(r)?, hint: read_hint(r)? },
        12 => SetTable { table: r.u8()?, key: read_rk(r)?, value: read_rk(r)?, hint: read_hint(r)? },
        13 => GetField { dst: r.u8()?, table: r.u8()?, key: r.u32()?, hint: read_hint(r)? },
        14 => SetField { table: r.u8()?, key: r.u32()?, value: read_rk(r)?, hint: read_hint(r)? },
        15 => SelfOp { dst: r.u8()?, table: r.u8()?, key: r.u32()?, hint: read_hint(r)? },
        16 => SetList { table: r.u8()?, start: r.u8()?, count: r.u32()?, block: r.u32()? },
        17 => Add { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        18 => Sub { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        19 => Mul { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        20 => Div { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        21 => IDiv { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        22 => Mod { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        23 => Pow { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        24 => Unm { dst: r.u8()?, src: r.u8()? },
        25 => BAnd { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        26 => BOr { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        27 => BXor { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        28 => Shl { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        29 => Shr { dst: r.u8()?, lhs: read_rk(r)?, rhs: read_rk(r)? },
        30 => BNot { dst: r.u8()?, src: r.u8()? },
        31 => Not { dst: r.u8()?, src: r.u8()? },
        32 => Len { dst: r.u8()?, src: r.u8()? },
        33 => Concat { dst: r.u8()?, first: r.u8()?, last: r.u8()? },
        34 => Eq { lhs: read_rk(r)?, rhs: read_rk(r)?, expected: r.bool()? },
        35 => Lt { lhs: read_rk(r)?, rhs: read_rk(r)?, expected: r.bool()? },
        36 => Le { lhs: read_rk(r)?, rhs: read_rk(r)?, expected: r.bool()? },
        37 => Test { src: r.u8()?, expected: r.bool()? },
        38 => TestSet { dst: r.u8()?, src: r.u8()?, expected: r.bool()? },
        39 => Jmp { offset: r.i32()? },
        40 => Call { func: r.u8()?, nargs: read_opt_u8(r)?, nresults: read_opt_u8(r)? },
        41 => TailCall { func: r.u8()?, nargs: read_opt_u8(r)? },
        42 => Return { first: r.u8()?, count: read_opt_u8(r)? },
        43 => Return0,
        44 => Vararg { dst: r.u8()?, count: read_opt_u8(r)? },
        45 => ForPrep { base: r.u8()?, exit_offset: r.i32()? },
        46 => ForLoop { base: r.u8()?, body_offset: r.i32()? },
        47 => TForCall { base: r.u8()?, nresults: r.u8()? },
        48 => TForLoop { base: r.u8()?, body_offset: r.i32()? },
        49 => Closure { dst: r.u8()?, proto: r.u32()? },
        50 => Close { from: r.u8()?, mode: read_close_mode(r)? },
        tag => return Err(LuaError::msg(format!("corrupted precompiled chunk (bad opcode tag {tag})"))),
    })
}

fn read_proto(vm: &mut Vm, r: &mut Reader) -> LResult<Proto> {
    let source_name = r.string()?;
    let line_defined = r.u32()?;
    let last_line_defined = r.u32()?;
    let param_count = r.u8()?;
    let is_vararg = r.bool()?;
    let max_stack_size = r.u8()?;

    let code_len = r.u32()? as usize;
    let mut code = Vec::with_capacity(code_len);
    for _ in 0..code_len {
        code.push(read_instruction(r)?);
    }

    let const_len = r.u32()? as usize;
    let mut constants = Vec::with_capacity(const_len);
    for _ in 0..const_len {
        constants.push(read_constant(vm, r)?);
    }

    let upval_len = r.u32()? as usize;
    let mut upvalues = Vec::with_capacity(upval_len);
    for _ in 0..upval_len {
        let name = r.string()?;
        let in_stack = r.bool()?;
        let index = r.u32()?;
        upvalues.push(UpvalueDesc { name, in_stack, index });
    }

    let locals_len = r.u32()? as usize;
    let mut locals = Vec::with_capacity(locals_len);
    for _ in 0..locals_len {
        locals.push(LocalVarInfo {
            name: r.string()?,
            register: r.u8()?,
            start_pc: r.u32()?,
            end_pc: r.u32()?,
            is_const: r.bool()?,
            is_close: r.bool()?,
        });
    }

    let events_len = r.u32()? as usize;
    let mut line_events = Vec::with_capacity(events_len);
    for _ in 0..events_len {
        let pc = r.u32()?;
        let line = r.u32()?;
        let kind = match r.u8()? {
            0 => LineEventKind::Execution,
            1 => LineEventKind::StatementBoundary,
            tag => return Err(LuaError::msg(format!("corrupted precompiled chunk (bad line-event tag {tag})"))),
        };
        line_events.push(LineEvent { pc, line, kind });
    }

    let protos_len = r.u32()? as usize;
    let mut protos = Vec::with_capacity(protos_len);
    for _ in 0..protos_len {
        protos.push(Rc::new(read_proto(vm, r)?));
    }

    Ok(Proto { source_name, line_defined, last_line_defined, param_count, is_vararg, max_stack_size, code, constants, upvalues, locals, line_events, protos })
}

/// Parses a binary chunk produced by [`dump`] and wraps its root `Proto` in
/// a closure bound to this VM's globals, the same as `Vm::load_source` does
/// for a text chunk (spec.md §4.6 `load` accepting either chunk form).
pub fn load(vm: &mut Vm, bytes: &[u8], chunk_name: &str) -> LResult<LuaFunction> {
    let mut r = Reader::new(bytes);
    let sig = r.take(4)?;
    if sig != SIGNATURE {
        return Err(LuaError::msg(format!("{chunk_name}: not a precompiled chunk")));
    }
    let version = r.u8()?;
    if version != FORMAT_VERSION {
        return Err(LuaError::msg(format!("{chunk_name}: version mismatch in precompiled chunk")));
    }
    let probe = r.take(CORRUPTION_PROBE.len())?;
    if probe != CORRUPTION_PROBE {
        return Err(LuaError::msg(format!("{chunk_name}: corrupted precompiled chunk")));
    }
    if r.i64()? != INT_TEST_VALUE {
        return Err(LuaError::msg(format!("{chunk_name}: integer size mismatch in precompiled chunk")));
    }
    if r.f64()? != FLOAT_TEST_VALUE {
        return Err(LuaError::msg(format!("{chunk_name}: float format mismatch in precompiled chunk")));
    }

    let proto = read_proto(vm, &mut r)?;
    let proto = Rc::new(proto);
    let env = Upvalue::closed(LuaValue::Table(vm.globals.clone()));
    Ok(LuaFunction::Lua(LuaClosure::new(proto, vec![env])))
}

/// Recognizes the header bytes [`dump`] writes, used by `load`/`loadstring`
/// (spec.md §4.6) to pick the binary-chunk path over compiling as source.
pub fn is_binary_chunk(bytes: &[u8]) -> bool {
    bytes.starts_with(SIGNATURE)
}
