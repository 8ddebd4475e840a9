//! Metamethod dispatch and the arithmetic/comparison/indexing semantics
//! that consult it (spec.md §4.5.5, §3 "arithmetic rules", §4.4).
//!
//! Grounded on the teacher's `crates/luars/src/lua_vm/execute/arith.rs` and
//! `object.rs` (`index`/`newindex` chain walking), adapted to this crate's
//! `Rc`-shared `LuaValue` instead of arena handles.

use crate::opcode::{Instruction, NameHint, RK};
use crate::value::lua_value::LuaValue;
use crate::value::proto::Proto;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

/// Renders a [`NameHint`] as the `" (global 'n')"`-shaped suffix spec.md §7
/// attaches to runtime type errors; empty when there's nothing to say.
pub fn hint_suffix(hint: &NameHint) -> String {
    match hint {
        NameHint::None => String::new(),
        NameHint::Global(n) => format!(" (global '{n}')"),
        NameHint::Local(n) => format!(" (local '{n}')"),
        NameHint::Upvalue(n) => format!(" (upvalue '{n}')"),
        NameHint::Field(n) => format!(" (field '{n}')"),
        NameHint::Method(n) => format!(" (method '{n}')"),
    }
}

/// Best-effort reconstruction of "what was this register last loaded from"
/// (spec.md §7: "hint is... selected from the instruction's name
/// annotation"), mirroring canonical Lua's `getobjname`: instructions that
/// load a register from a named source (a global/field/upvalue fetch)
/// already carry a [`NameHint`]; arithmetic/compare/concat/length opcodes
/// don't (spec.md §4.3.1 lists no hint field for them), so on error the VM
/// walks the current proto's code backward from the faulting pc to find the
/// instruction that most recently defined the operand register.
pub fn describe_operand(proto: &Proto, pc: u32, rk: RK) -> NameHint {
    match rk {
        RK::Const(_) => NameHint::None,
        RK::Reg(reg) => describe_register(proto, pc, reg),
    }
}

pub fn describe_register(proto: &Proto, pc: u32, reg: u8) -> NameHint {
    if let Some(l) = proto
        .locals
        .iter()
        .find(|l| l.register == reg && l.start_pc <= pc && pc < l.end_pc)
    {
        return NameHint::Local(l.name.clone());
    }
    for i in (0..pc as usize).rev() {
        match &proto.code[i] {
            Instruction::GetEnvField { dst, hint, .. } if *dst == reg => return hint.clone(),
            Instruction::GetField { dst, hint, .. } if *dst == reg => return hint.clone(),
            Instruction::GetTable { dst, hint, .. } if *dst == reg => return hint.clone(),
            Instruction::SelfOp { dst, hint, .. } if *dst == reg => return hint.clone(),
            Instruction::GetUpval { dst, upval } if *dst == reg => {
                let name = proto.upvalues.get(*upval as usize).map(|u| u.name.clone()).unwrap_or_default();
                return NameHint::Upvalue(name);
            }
            Instruction::Move { dst, src } if *dst == reg => return describe_register(proto, i as u32, *src),
            other => {
                if instruction_writes(other, reg) {
                    break;
                }
            }
        }
    }
    NameHint::None
}

fn instruction_writes(instr: &Instruction, reg: u8) -> bool {
    use Instruction::*;
    match instr {
        Move { dst, .. }
        | LoadK { dst, .. }
        | LoadI { dst, .. }
        | LoadF { dst, .. }
        | LoadBool { dst, .. }
        | GetUpval { dst, .. }
        | GetEnvField { dst, .. }
        | NewTable { dst, .. }
        | GetTable { dst, .. }
        | GetField { dst, .. }
        | SelfOp { dst, .. }
        | Add { dst, .. }
        | Sub { dst, .. }
        | Mul { dst, .. }
        | Div { dst, .. }
        | IDiv { dst, .. }
        | Mod { dst, .. }
        | Pow { dst, .. }
        | Unm { dst, .. }
        | BAnd { dst, .. }
        | BOr { dst, .. }
        | BXor { dst, .. }
        | Shl { dst, .. }
        | Shr { dst, .. }
        | BNot { dst, .. }
        | Not { dst, .. }
        | Len { dst, .. }
        | Concat { dst, .. }
        | Closure { dst, .. } => *dst == reg,
        LoadNil { dst, count } => reg >= *dst && reg < dst + count,
        Vararg { dst, .. } => reg >= *dst,
        Call { func, .. } => reg >= *func,
        _ => false,
    }
}

const MAX_METACHAIN: usize = 100;

/// Calls a metamethod, turning a coroutine yield into a regular error
/// (spec.md §9 Open Question, decided in DESIGN.md: yielding across an
/// implicitly-invoked metamethod isn't supported — only a direct or
/// plain-call yield is).
fn call_mm(vm: &mut Vm, f: LuaValue, args: Vec<LuaValue>) -> LResult<Vec<LuaValue>> {
    vm.call(f, args).map_err(|e| {
        if e.is_yield() {
            LuaError::msg("attempt to yield across a metamethod boundary")
        } else {
            e
        }
    })
}

/// `__index` chain walk (spec.md §4.5.5): raw field first, then the
/// metatable's `__index` (a function is called, a table is indexed again).
pub fn index(vm: &mut Vm, obj: &LuaValue, key: &LuaValue, hint: &NameHint) -> LResult<LuaValue> {
    let mut cur = obj.clone();
    for _ in 0..MAX_METACHAIN {
        if let LuaValue::Table(t) = &cur {
            let raw = t.raw_get(key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            match t.metatable() {
                None => return Ok(LuaValue::Nil),
                Some(mt) => match mt.get_str_name("__index") {
                    LuaValue::Nil => return Ok(LuaValue::Nil),
                    LuaValue::Function(f) => {
                        let mut res = call_mm(vm, LuaValue::Function(f), vec![cur, key.clone()])?;
                        return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
                    }
                    next => {
                        cur = next;
                        continue;
                    }
                },
            }
        }
        if let Some(mm) = vm.metamethod(&cur, "__index") {
            match mm {
                LuaValue::Function(f) => {
                    let mut res = call_mm(vm, LuaValue::Function(f), vec![cur, key.clone()])?;
                    return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
                }
                next => {
                    cur = next;
                    continue;
                }
            }
        }
        return Err(LuaError::msg(format!("attempt to index a {} value{}", cur.type_name(), hint_suffix(hint))));
    }
    Err(LuaError::msg("'__index' chain too long; possible loop"))
}

/// `__newindex` chain walk (spec.md §4.5.5).
pub fn newindex(vm: &mut Vm, obj: &LuaValue, key: LuaValue, value: LuaValue, hint: &NameHint) -> LResult<()> {
    let mut cur = obj.clone();
    for _ in 0..MAX_METACHAIN {
        if let LuaValue::Table(t) = &cur {
            if !t.raw_get(&key).is_nil() {
                t.raw_set(key, value).map_err(|e| LuaError::msg(e.to_string()))?;
                return Ok(());
            }
            match t.metatable() {
                None => {
                    t.raw_set(key, value).map_err(|e| LuaError::msg(e.to_string()))?;
                    return Ok(());
                }
                Some(mt) => match mt.get_str_name("__newindex") {
                    LuaValue::Nil => {
                        t.raw_set(key, value).map_err(|e| LuaError::msg(e.to_string()))?;
                        return Ok(());
                    }
                    LuaValue::Function(f) => {
                        call_mm(vm, LuaValue::Function(f), vec![cur, key, value])?;
                        return Ok(());
                    }
                    next => {
                        cur = next;
                        continue;
                    }
                },
            }
        }
        if let Some(mm) = vm.metamethod(&cur, "__newindex") {
            match mm {
                LuaValue::Function(f) => {
                    call_mm(vm, LuaValue::Function(f), vec![cur, key, value])?;
                    return Ok(());
                }
                next => {
                    cur = next;
                    continue;
                }
            }
        }
        return Err(LuaError::msg(format!("attempt to index a {} value{}", cur.type_name(), hint_suffix(hint))));
    }
    Err(LuaError::msg("'__newindex' chain too long; possible loop"))
}

#[derive(Clone, Copy)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    IDiv,
    Pow,
    Div,
}

impl ArithOp {
    fn event(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Mod => "__mod",
            ArithOp::IDiv => "__idiv",
            ArithOp::Pow => "__pow",
            ArithOp::Div => "__div",
        }
    }
}

/// Arithmetic with Lua 5.4's integer/float subtype rules (spec.md §3):
/// `+ - * //` of two integers stay integer (wrapping on overflow); any
/// float operand promotes the result to float; `/` and `^` always yield
/// float. Strings coerce through `tonumber`'s rules first.
pub fn arith(vm: &mut Vm, op: ArithOp, a: &LuaValue, b: &LuaValue) -> LResult<LuaValue> {
    let na = a.coerce_to_number();
    let nb = b.coerce_to_number();
    if let (Some(na), Some(nb)) = (&na, &nb) {
        return Ok(arith_numbers(op, na, nb));
    }
    if let Some(mm) = vm.metamethod(a, op.event()).or_else(|| vm.metamethod(b, op.event())) {
        let mut res = call_mm(vm, mm, vec![a.clone(), b.clone()])?;
        return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
    }
    let bad = if na.is_none() { a } else { b };
    Err(LuaError::msg(format!("attempt to perform arithmetic on a {} value", bad.type_name())))
}

fn arith_numbers(op: ArithOp, a: &LuaValue, b: &LuaValue) -> LuaValue {
    if matches!(op, ArithOp::Div | ArithOp::Pow) {
        let x = a.as_float().unwrap();
        let y = b.as_float().unwrap();
        return LuaValue::Float(match op {
            ArithOp::Div => x / y,
            ArithOp::Pow => x.powf(y),
            _ => unreachable!(),
        });
    }
    if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (a, b) {
        let (x, y) = (*x, *y);
        return match op {
            ArithOp::Add => LuaValue::Integer(x.wrapping_add(y)),
            ArithOp::Sub => LuaValue::Integer(x.wrapping_sub(y)),
            ArithOp::Mul => LuaValue::Integer(x.wrapping_mul(y)),
            ArithOp::Mod => {
                if y == 0 {
                    // caller (dispatch) checks for this before calling for
                    // the exact "attempt to perform 'n%0'" wording; this
                    // path only runs when pre-validated or via coercion.
                    LuaValue::Integer(0)
                } else {
                    let r = x.wrapping_rem(y);
                    LuaValue::Integer(if r != 0 && (r ^ y) < 0 { r + y } else { r })
                }
            }
            ArithOp::IDiv => {
                if y == 0 {
                    LuaValue::Integer(0)
                } else {
                    let q = x.wrapping_div(y);
                    LuaValue::Integer(if (x % y != 0) && ((x ^ y) < 0) { q - 1 } else { q })
                }
            }
            _ => unreachable!(),
        };
    }
    let x = a.as_float().unwrap();
    let y = b.as_float().unwrap();
    match op {
        ArithOp::Add => LuaValue::Float(x + y),
        ArithOp::Sub => LuaValue::Float(x - y),
        ArithOp::Mul => LuaValue::Float(x * y),
        ArithOp::Mod => {
            let r = x - (x / y).floor() * y;
            LuaValue::Float(r)
        }
        ArithOp::IDiv => LuaValue::Float((x / y).floor()),
        _ => unreachable!(),
    }
}

/// Integer-domain division/modulo zero checks the dispatch loop runs before
/// calling [`arith`] for `%`/`//` on two known integers (spec.md §7 "Integer
/// domain" errors: exact wording `attempt to perform 'n%0'` / `attempt to
/// perform 'n//0'`).
pub fn check_integer_divmod_zero(op: ArithOp, a: &LuaValue, b: &LuaValue) -> LResult<()> {
    if let (LuaValue::Integer(_), LuaValue::Integer(0)) = (a, b) {
        return match op {
            ArithOp::Mod => Err(LuaError::msg("attempt to perform 'n%0'")),
            ArithOp::IDiv => Err(LuaError::msg("attempt to perform 'n//0'")),
            _ => Ok(()),
        };
    }
    Ok(())
}

pub fn unm(vm: &mut Vm, a: &LuaValue) -> LResult<LuaValue> {
    match a.coerce_to_number() {
        Some(LuaValue::Integer(i)) => Ok(LuaValue::Integer(i.wrapping_neg())),
        Some(LuaValue::Float(f)) => Ok(LuaValue::Float(-f)),
        _ => {
            if let Some(mm) = vm.metamethod(a, "__unm") {
                let mut res = call_mm(vm, mm, vec![a.clone(), a.clone()])?;
                return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
            }
            Err(LuaError::msg(format!("attempt to perform arithmetic on a {} value", a.type_name())))
        }
    }
}

fn to_bitwise_int(v: &LuaValue) -> Option<i64> {
    match v {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(_) => v.as_integer(),
        LuaValue::Str(_) => v.coerce_to_number().and_then(|n| n.as_integer()),
        _ => None,
    }
}

#[derive(Clone, Copy)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BitOp {
    fn event(self) -> &'static str {
        match self {
            BitOp::And => "__band",
            BitOp::Or => "__bor",
            BitOp::Xor => "__bxor",
            BitOp::Shl => "__shl",
            BitOp::Shr => "__shr",
        }
    }
}

/// Bitwise ops require integer-representable operands (spec.md §3, §7
/// "Integer domain"): a float operand must be an exact integer value or the
/// op fails with `number has no integer representation`.
pub fn bitwise(vm: &mut Vm, op: BitOp, a: &LuaValue, b: &LuaValue) -> LResult<LuaValue> {
    let ia = to_bitwise_int(a);
    let ib = to_bitwise_int(b);
    if let (Some(x), Some(y)) = (ia, ib) {
        return Ok(LuaValue::Integer(match op {
            BitOp::And => x & y,
            BitOp::Or => x | y,
            BitOp::Xor => x ^ y,
            BitOp::Shl => shift_left(x, y),
            BitOp::Shr => shift_left(x, -y),
        }));
    }
    if let Some(mm) = vm.metamethod(a, op.event()).or_else(|| vm.metamethod(b, op.event())) {
        let mut res = call_mm(vm, mm, vec![a.clone(), b.clone()])?;
        return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
    }
    if a.is_number() && ia.is_none() {
        return Err(LuaError::msg("number has no integer representation"));
    }
    if b.is_number() && ib.is_none() {
        return Err(LuaError::msg("number has no integer representation"));
    }
    let bad = if ia.is_none() { a } else { b };
    Err(LuaError::msg(format!("attempt to perform bitwise operation on a {} value", bad.type_name())))
}

fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> (-n)) as i64
    }
}

pub fn bnot(vm: &mut Vm, a: &LuaValue) -> LResult<LuaValue> {
    if let Some(i) = to_bitwise_int(a) {
        return Ok(LuaValue::Integer(!i));
    }
    if let Some(mm) = vm.metamethod(a, "__bnot") {
        let mut res = call_mm(vm, mm, vec![a.clone(), a.clone()])?;
        return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
    }
    if a.is_number() {
        return Err(LuaError::msg("number has no integer representation"));
    }
    Err(LuaError::msg(format!("attempt to perform bitwise operation on a {} value", a.type_name())))
}

/// `#` (spec.md §4.4): byte length for strings, a table border (possibly
/// via `__len`), else `__len` or error.
pub fn length(vm: &mut Vm, a: &LuaValue) -> LResult<LuaValue> {
    match a {
        LuaValue::Str(s) => return Ok(LuaValue::Integer(s.len() as i64)),
        LuaValue::Table(t) => {
            if let Some(mm) = vm.metamethod(a, "__len") {
                let mut res = call_mm(vm, mm, vec![a.clone()])?;
                return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
            }
            return Ok(LuaValue::Integer(t.length()));
        }
        _ => {}
    }
    if let Some(mm) = vm.metamethod(a, "__len") {
        let mut res = call_mm(vm, mm, vec![a.clone()])?;
        return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
    }
    Err(LuaError::msg(format!("attempt to get length of a {} value", a.type_name())))
}

/// `..` over a register range (spec.md §4.4): numbers stringify, strings
/// pass through, else `__concat`; folded right-to-left to match Lua's
/// right-associativity.
pub fn concat(vm: &mut Vm, values: &[LuaValue]) -> LResult<LuaValue> {
    let mut acc = values[values.len() - 1].clone();
    for v in values[..values.len() - 1].iter().rev() {
        acc = concat_pair(vm, v, &acc)?;
    }
    Ok(acc)
}

fn concat_pair(vm: &mut Vm, a: &LuaValue, b: &LuaValue) -> LResult<LuaValue> {
    let a_ok = matches!(a, LuaValue::Str(_) | LuaValue::Integer(_) | LuaValue::Float(_));
    let b_ok = matches!(b, LuaValue::Str(_) | LuaValue::Integer(_) | LuaValue::Float(_));
    if a_ok && b_ok {
        let mut bytes = Vec::new();
        append_concat_repr(a, &mut bytes);
        append_concat_repr(b, &mut bytes);
        return Ok(LuaValue::new_string_owned(bytes));
    }
    if let Some(mm) = vm.metamethod(a, "__concat").or_else(|| vm.metamethod(b, "__concat")) {
        let mut res = call_mm(vm, mm, vec![a.clone(), b.clone()])?;
        return Ok(if res.is_empty() { LuaValue::Nil } else { res.remove(0) });
    }
    let bad = if !a_ok { a } else { b };
    Err(LuaError::msg(format!("attempt to concatenate a {} value", bad.type_name())))
}

fn append_concat_repr(v: &LuaValue, out: &mut Vec<u8>) {
    match v {
        LuaValue::Str(s) => out.extend_from_slice(s.as_bytes()),
        other => out.extend_from_slice(format!("{other}").as_bytes()),
    }
}

/// `==`/`~=` (spec.md §4.4): raw equality first; `__eq` only fires when
/// both operands are tables or both userdata with differing identity.
pub fn eq(vm: &mut Vm, a: &LuaValue, b: &LuaValue) -> LResult<bool> {
    if a.raw_equal(b) {
        return Ok(true);
    }
    let both_tables = matches!((a, b), (LuaValue::Table(_), LuaValue::Table(_)));
    let both_userdata = matches!((a, b), (LuaValue::UserData(_), LuaValue::UserData(_)));
    if both_tables || both_userdata {
        if let Some(mm) = vm.metamethod(a, "__eq").or_else(|| vm.metamethod(b, "__eq")) {
            let res = call_mm(vm, mm, vec![a.clone(), b.clone()])?;
            return Ok(res.first().map(|v| v.is_truthy()).unwrap_or(false));
        }
    }
    Ok(false)
}

/// `<` (spec.md §4.4): numeric/string ordering, else `__lt`.
pub fn lt(vm: &mut Vm, a: &LuaValue, b: &LuaValue) -> LResult<bool> {
    if let (Some(x), Some(y)) = (a.as_float().filter(|_| a.is_number()), b.as_float().filter(|_| b.is_number())) {
        return Ok(x < y);
    }
    if let (LuaValue::Str(x), LuaValue::Str(y)) = (a, b) {
        return Ok(x.as_bytes() < y.as_bytes());
    }
    if let Some(mm) = vm.metamethod(a, "__lt").or_else(|| vm.metamethod(b, "__lt")) {
        let res = call_mm(vm, mm, vec![a.clone(), b.clone()])?;
        return Ok(res.first().map(|v| v.is_truthy()).unwrap_or(false));
    }
    Err(LuaError::msg(format!("attempt to compare {} with {}", a.type_name(), b.type_name())))
}

/// `<=` (spec.md §4.4): numeric/string ordering, else `__le`.
pub fn le(vm: &mut Vm, a: &LuaValue, b: &LuaValue) -> LResult<bool> {
    if let (Some(x), Some(y)) = (a.as_float().filter(|_| a.is_number()), b.as_float().filter(|_| b.is_number())) {
        return Ok(x <= y);
    }
    if let (LuaValue::Str(x), LuaValue::Str(y)) = (a, b) {
        return Ok(x.as_bytes() <= y.as_bytes());
    }
    if let Some(mm) = vm.metamethod(a, "__le").or_else(|| vm.metamethod(b, "__le")) {
        let res = call_mm(vm, mm, vec![a.clone(), b.clone()])?;
        return Ok(res.first().map(|v| v.is_truthy()).unwrap_or(false));
    }
    Err(LuaError::msg(format!("attempt to compare {} with {}", a.type_name(), b.type_name())))
}
