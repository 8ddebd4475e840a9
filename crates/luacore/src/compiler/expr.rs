//! Expression codegen (spec.md §4.3, §4.2 expression grammar).

use crate::ast::{BinOp, Expr, TableField, UnOp};
use crate::opcode::{CloseMode, Instruction, NameHint, RK};
use crate::value::lua_value::LuaValue;

use super::{CResult, Compiler, NameRef};

/// How many results an expression evaluation should produce when it sits
/// in a multi-value position (call args, return, table-constructor tail,
/// assignment RHS list): `Fixed(n)` truncates/pads to exactly `n`, `All`
/// requests every value up to the stack top (spec.md §4.5.2 `C=0`/`B=0`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Want {
    Fixed(u8),
    All,
}

impl Compiler {
    /// Compiles `expr`, leaving exactly one value in register `dst`.
    pub(super) fn compile_expr_to(&mut self, expr: &Expr, dst: u8) -> CResult<()> {
        let line = expr.line();
        match expr {
            Expr::Nil(_) => {
                self.fs().emit(Instruction::LoadNil { dst, count: 1 }, line);
            }
            Expr::True(_) => {
                self.fs().emit(Instruction::LoadBool { dst, value: true, skip_next: false }, line);
            }
            Expr::False(_) => {
                self.fs().emit(Instruction::LoadBool { dst, value: false, skip_next: false }, line);
            }
            Expr::Int(i, _) => {
                if *i >= i32::MIN as i64 && *i <= i32::MAX as i64 {
                    self.fs().emit(Instruction::LoadI { dst, imm: *i as i32 }, line);
                } else {
                    let k = self.fs().const_index(LuaValue::Integer(*i));
                    self.fs().emit(Instruction::LoadK { dst, k }, line);
                }
            }
            Expr::Float(f, _) => {
                self.fs().emit(Instruction::LoadF { dst, imm: *f }, line);
            }
            Expr::Str(bytes, _) => {
                let k = self.bytes_const(bytes);
                self.fs().emit(Instruction::LoadK { dst, k }, line);
            }
            Expr::Vararg(_) => {
                self.fs().emit(Instruction::Vararg { dst, count: Some(1) }, line);
            }
            Expr::Name(name, _) => self.compile_name_to(name, dst, line)?,
            Expr::Paren(inner, _) => self.compile_expr_to(inner, dst)?,
            Expr::Field { obj, name, line } => {
                let obj_reg = self.compile_to_temp(obj)?;
                let key = self.str_const(name);
                self.fs().emit(
                    Instruction::GetField { dst, table: obj_reg, key, hint: NameHint::Field(name.clone()) },
                    *line,
                );
                self.free_temp(obj, obj_reg);
            }
            Expr::Index { obj, key, line } => {
                let obj_reg = self.compile_to_temp(obj)?;
                let base = self.fs().free_reg;
                let rk = self.compile_rk(key)?;
                self.fs().emit(Instruction::GetTable { dst, table: obj_reg, key: rk, hint: NameHint::None }, *line);
                self.fs().free_to(base.min(self.fs().free_reg));
                self.free_temp(obj, obj_reg);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                self.compile_call_expr(expr, dst, Want::Fixed(1))?;
            }
            Expr::Function(body) => {
                self.compile_function_literal(body, dst)?;
            }
            Expr::Table { fields, line } => {
                self.compile_table(fields, dst, *line)?;
            }
            Expr::UnOp { op, expr: inner, line } => {
                self.compile_unop(*op, inner, dst, *line)?;
            }
            Expr::BinOp { op, lhs, rhs, line } => {
                self.compile_binop(*op, lhs, rhs, dst, *line)?;
            }
        }
        Ok(())
    }

    fn compile_name_to(&mut self, name: &str, dst: u8, line: u32) -> CResult<()> {
        match self.resolve_name(name) {
            NameRef::Local(reg) => {
                if reg != dst {
                    self.fs().emit(Instruction::Move { dst, src: reg }, line);
                }
            }
            NameRef::Upvalue(idx) => {
                self.fs().emit(Instruction::GetUpval { dst, upval: idx }, line);
            }
            NameRef::Global => {
                let env = self.env_upvalue();
                let key = self.str_const(name);
                self.fs().emit(Instruction::GetEnvField { dst, env_upval: env, key, hint: NameHint::Global(name.to_string()) }, line);
            }
        }
        Ok(())
    }

    /// Evaluates `expr` into a fresh temporary register, returning it. Used
    /// for sub-expressions whose register must outlive a sibling
    /// evaluation (table/object position in `Field`/`Index`/calls).
    pub(super) fn compile_to_temp(&mut self, expr: &Expr) -> CResult<u8> {
        if let Expr::Name(name, _) = expr {
            if let NameRef::Local(reg) = self.resolve_name(name) {
                return Ok(reg);
            }
        }
        let r = self.fs().reserve_reg();
        self.compile_expr_to(expr, r)?;
        Ok(r)
    }

    /// Frees `reg` only if it was a synthesized temporary (not a plain
    /// local register we merely read from).
    fn free_temp(&mut self, original: &Expr, reg: u8) {
        if let Expr::Name(name, _) = original {
            if let NameRef::Local(local_reg) = self.resolve_name(name) {
                if local_reg == reg {
                    return;
                }
            }
        }
        if reg + 1 == self.fs().free_reg {
            self.fs().free_to(reg);
        }
    }

    /// RK-encodes `expr`: constants and locals ride directly, everything
    /// else is materialized into a temp register (spec.md §4.3.2).
    pub(super) fn compile_rk(&mut self, expr: &Expr) -> CResult<RK> {
        match expr {
            Expr::Nil(_) => Ok(RK::Const(self.fs().const_index(LuaValue::Nil))),
            Expr::True(_) => Ok(RK::Const(self.fs().const_index(LuaValue::Boolean(true)))),
            Expr::False(_) => Ok(RK::Const(self.fs().const_index(LuaValue::Boolean(false)))),
            Expr::Int(i, _) => {
                let idx = self.fs().const_index(LuaValue::Integer(*i));
                Ok(self.rk_const(idx, expr.line()))
            }
            Expr::Float(f, _) => {
                let idx = self.fs().const_index(LuaValue::Float(*f));
                Ok(self.rk_const(idx, expr.line()))
            }
            Expr::Str(b, _) => {
                let idx = self.bytes_const(b);
                Ok(self.rk_const(idx, expr.line()))
            }
            Expr::Name(name, _) => {
                if let NameRef::Local(reg) = self.resolve_name(name) {
                    return Ok(RK::Reg(reg));
                }
                let r = self.fs().reserve_reg();
                self.compile_expr_to(expr, r)?;
                Ok(RK::Reg(r))
            }
            _ => {
                let r = self.fs().reserve_reg();
                self.compile_expr_to(expr, r)?;
                Ok(RK::Reg(r))
            }
        }
    }

    fn compile_unop(&mut self, op: UnOp, inner: &Expr, dst: u8, line: u32) -> CResult<()> {
        let src = self.compile_to_temp(inner)?;
        let instr = match op {
            UnOp::Neg => Instruction::Unm { dst, src },
            UnOp::Not => Instruction::Not { dst, src },
            UnOp::Len => Instruction::Len { dst, src },
            UnOp::BNot => Instruction::BNot { dst, src },
        };
        self.fs().emit(instr, line);
        self.free_temp(inner, src);
        Ok(())
    }

    fn compile_binop(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8, line: u32) -> CResult<()> {
        match op {
            BinOp::And => return self.compile_shortcircuit(false, lhs, rhs, dst, line),
            BinOp::Or => return self.compile_shortcircuit(true, lhs, rhs, dst, line),
            BinOp::Concat => return self.compile_concat(lhs, rhs, dst, line),
            _ => {}
        }
        if matches!(op, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge) {
            return self.compile_comparison_value(op, lhs, rhs, dst, line);
        }
        let base = self.fs().free_reg;
        let l = self.compile_rk(lhs)?;
        let r = self.compile_rk(rhs)?;
        let instr = match op {
            BinOp::Add => Instruction::Add { dst, lhs: l, rhs: r },
            BinOp::Sub => Instruction::Sub { dst, lhs: l, rhs: r },
            BinOp::Mul => Instruction::Mul { dst, lhs: l, rhs: r },
            BinOp::Div => Instruction::Div { dst, lhs: l, rhs: r },
            BinOp::IDiv => Instruction::IDiv { dst, lhs: l, rhs: r },
            BinOp::Mod => Instruction::Mod { dst, lhs: l, rhs: r },
            BinOp::Pow => Instruction::Pow { dst, lhs: l, rhs: r },
            BinOp::BAnd => Instruction::BAnd { dst, lhs: l, rhs: r },
            BinOp::BOr => Instruction::BOr { dst, lhs: l, rhs: r },
            BinOp::BXor => Instruction::BXor { dst, lhs: l, rhs: r },
            BinOp::Shl => Instruction::Shl { dst, lhs: l, rhs: r },
            BinOp::Shr => Instruction::Shr { dst, lhs: l, rhs: r },
            _ => unreachable!(),
        };
        self.fs().emit(instr, line);
        self.fs().free_to(base);
        Ok(())
    }

    /// `and`/`or` (spec.md §4.4): `TestSet` + `Jmp` over the alternative
    /// operand's evaluation, per this compiler's TestSet convention (see
    /// `vm::dispatch`): fires the paired `Jmp` when `truthy(src) ==
    /// jump_if`.
    fn compile_shortcircuit(&mut self, jump_if: bool, lhs: &Expr, rhs: &Expr, dst: u8, line: u32) -> CResult<()> {
        self.compile_expr_to(lhs, dst)?;
        let test_pc = self.fs().emit(Instruction::TestSet { dst, src: dst, expected: jump_if }, line);
        let jmp_pc = self.fs().emit(Instruction::Jmp { offset: 0 }, line);
        let _ = test_pc;
        self.compile_expr_to(rhs, dst)?;
        self.fs().patch_jmp_to_here(jmp_pc);
        Ok(())
    }

    /// Folds a run of `..` into one `CONCAT` over a contiguous register
    /// range (spec.md §4.3.1 `CONCAT`), flattening right-associated
    /// `Concat` nodes produced by the parser.
    fn compile_concat(&mut self, lhs: &Expr, rhs: &Expr, dst: u8, line: u32) -> CResult<()> {
        let mut operands = Vec::new();
        flatten_concat(lhs, &mut operands);
        flatten_concat(rhs, &mut operands);
        let base = self.fs().free_reg;
        let first = self.fs().reserve_reg();
        self.compile_expr_to(&operands[0], first)?;
        for operand in &operands[1..] {
            let r = self.fs().reserve_reg();
            self.compile_expr_to(operand, r)?;
        }
        let last = self.fs().free_reg - 1;
        self.fs().emit(Instruction::Concat { dst, first, last }, line);
        self.fs().free_to(base.max(dst + 1));
        Ok(())
    }

    /// Comparisons used as *values* (`local x = a < b`): materializes a
    /// boolean via the `Lt/Le/Eq` + `Jmp` + `LoadBool`×2 pattern described
    /// in `vm::dispatch`'s module doc.
    fn compile_comparison_value(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8, line: u32) -> CResult<()> {
        let base = self.fs().free_reg;
        let l = self.compile_rk(lhs)?;
        let r = self.compile_rk(rhs)?;
        let (swap, expected, is_eq) = match op {
            BinOp::Eq => (false, true, true),
            BinOp::Ne => (false, false, true),
            BinOp::Lt => (false, true, false),
            BinOp::Gt => (true, true, false),
            BinOp::Le => (false, true, false),
            BinOp::Ge => (true, true, false),
            _ => unreachable!(),
        };
        let (l, r) = if swap { (r, l) } else { (l, r) };
        let cmp_instr = match op {
            BinOp::Eq | BinOp::Ne => Instruction::Eq { lhs: l, rhs: r, expected },
            BinOp::Lt | BinOp::Gt => Instruction::Lt { lhs: l, rhs: r, expected },
            BinOp::Le | BinOp::Ge => Instruction::Le { lhs: l, rhs: r, expected },
            _ => unreachable!(),
        };
        let _ = is_eq;
        self.fs().emit(cmp_instr, line);
        let jmp_true = self.fs().emit(Instruction::Jmp { offset: 0 }, line);
        self.fs().emit(Instruction::LoadBool { dst, value: false, skip_next: true }, line);
        // Taking `jmp_true` must land exactly on the `true` LoadBool below,
        // not past it, or a matching comparison would fall through without
        // ever setting `dst`.
        self.fs().patch_jmp_to_here(jmp_true);
        self.fs().emit(Instruction::LoadBool { dst, value: true, skip_next: false }, line);
        self.fs().free_to(base.max(dst + 1));
        Ok(())
    }

    /// Compiles `expr` as a branch condition: emits the paired
    /// `Test`/comparison + `Jmp`, returning the `Jmp`'s pc for the caller
    /// to patch once the jump target is known. `jump_if` selects which
    /// truth value fires the jump.
    pub(super) fn compile_condition_jump(&mut self, expr: &Expr, jump_if: bool) -> CResult<usize> {
        if let Expr::BinOp { op, lhs, rhs, line } = expr {
            if matches!(op, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge) {
                let base = self.fs().free_reg;
                let l = self.compile_rk(lhs)?;
                let r = self.compile_rk(rhs)?;
                let (swap, same_sense) = match op {
                    BinOp::Eq => (false, true),
                    BinOp::Ne => (false, false),
                    BinOp::Lt => (false, true),
                    BinOp::Gt => (true, true),
                    BinOp::Le => (false, true),
                    BinOp::Ge => (true, true),
                    _ => unreachable!(),
                };
                let (l, r) = if swap { (r, l) } else { (l, r) };
                // jump_if=true means "fire when condition holds"; our
                // Eq/Lt/Le fire the paired Jmp when result == expected.
                let expected = if same_sense { jump_if } else { !jump_if };
                let instr = match op {
                    BinOp::Eq | BinOp::Ne => Instruction::Eq { lhs: l, rhs: r, expected },
                    BinOp::Lt | BinOp::Gt => Instruction::Lt { lhs: l, rhs: r, expected },
                    BinOp::Le | BinOp::Ge => Instruction::Le { lhs: l, rhs: r, expected },
                    _ => unreachable!(),
                };
                self.fs().emit(instr, *line);
                let jmp_pc = self.fs().emit(Instruction::Jmp { offset: 0 }, *line);
                self.fs().free_to(base);
                return Ok(jmp_pc);
            }
        }
        let base = self.fs().free_reg;
        let r = self.fs().reserve_reg();
        self.compile_expr_to(expr, r)?;
        self.fs().emit(Instruction::Test { src: r, expected: jump_if }, expr.line());
        let jmp_pc = self.fs().emit(Instruction::Jmp { offset: 0 }, expr.line());
        self.fs().free_to(base);
        Ok(jmp_pc)
    }

    fn compile_function_literal(&mut self, body: &crate::ast::FuncBody, dst: u8) -> CResult<()> {
        let proto_idx = self.compile_nested_function(body, None)?;
        self.fs().emit(Instruction::Closure { dst, proto: proto_idx }, body.line);
        Ok(())
    }

    fn compile_table(&mut self, fields: &[TableField], dst: u8, line: u32) -> CResult<()> {
        let narr = fields.iter().filter(|f| matches!(f, TableField::Positional(_))).count() as u32;
        let nhash = fields.len() as u32 - narr;
        self.fs().emit(Instruction::NewTable { dst, narr, nhash }, line);
        let base = self.fs().free_reg;
        let mut array_index: i64 = 0;
        let mut pending_start: Option<u8> = None;
        let mut pending_count: u32 = 0;
        const BATCH: u32 = 50;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) => {
                    array_index += 1;
                    let is_last = i + 1 == fields.len();
                    let want_all = is_last && value.is_multret();
                    let r = self.fs().reserve_reg();
                    if pending_start.is_none() {
                        pending_start = Some(r);
                    }
                    if want_all {
                        self.compile_call_expr(value, r, Want::All)?;
                        pending_count += 1;
                        self.fs().emit(
                            Instruction::SetList { table: dst, start: pending_start.unwrap(), count: 0, block: (array_index as u32 - pending_count) / BATCH },
                            line,
                        );
                        pending_start = None;
                        pending_count = 0;
                        self.fs().free_to(base);
                        continue;
                    }
                    self.compile_expr_to(value, r)?;
                    pending_count += 1;
                    if pending_count == BATCH {
                        self.fs().emit(
                            Instruction::SetList {
                                table: dst,
                                start: pending_start.unwrap(),
                                count: pending_count,
                                block: (array_index as u32 - pending_count) / BATCH,
                            },
                            line,
                        );
                        self.fs().free_to(base);
                        pending_start = None;
                        pending_count = 0;
                    }
                }
                TableField::Named { name, value } => {
                    let vr = self.fs().reserve_reg();
                    self.compile_expr_to(value, vr)?;
                    let key = self.str_const(name);
                    self.fs().emit(Instruction::SetField { table: dst, key, value: RK::Reg(vr), hint: NameHint::Field(name.clone()) }, line);
                    self.fs().free_to(vr);
                }
                TableField::Indexed { key, value } => {
                    let kr = self.compile_rk(key)?;
                    let vr = self.fs().reserve_reg();
                    self.compile_expr_to(value, vr)?;
                    self.fs().emit(Instruction::SetTable { table: dst, key: kr, value: RK::Reg(vr), hint: NameHint::None }, line);
                    self.fs().free_to(vr);
                }
            }
        }
        if pending_count > 0 {
            self.fs().emit(
                Instruction::SetList {
                    table: dst,
                    start: pending_start.unwrap(),
                    count: pending_count,
                    block: (array_index as u32 - pending_count) / BATCH,
                },
                line,
            );
        }
        self.fs().free_to(base);
        Ok(())
    }

    /// Compiles a (method-)call expression, placing `want` results
    /// starting at `dst` (spec.md §4.5.2).
    pub(super) fn compile_call_expr(&mut self, expr: &Expr, dst: u8, want: Want) -> CResult<()> {
        match expr {
            Expr::Call { func, args, line } => {
                let func_reg = dst;
                self.fs().free_to(dst);
                self.fs().reserve_reg();
                self.compile_expr_to(func, func_reg)?;
                let (nargs, _) = self.compile_arg_list(args, func_reg + 1)?;
                self.emit_call(func_reg, nargs, want, *line);
            }
            Expr::MethodCall { obj, method, args, line } => {
                let obj_reg = dst;
                self.fs().free_to(dst);
                self.fs().reserve_reg();
                self.compile_expr_to(obj, obj_reg)?;
                self.fs().reserve_reg(); // slot for self at dst+1
                let key = self.str_const(method);
                self.fs().emit(Instruction::SelfOp { dst: obj_reg, table: obj_reg, key, hint: NameHint::Method(method.clone()) }, *line);
                let (nargs, _) = self.compile_arg_list(args, obj_reg + 2)?;
                self.emit_call(obj_reg, nargs.map(|n| n + 1), want, *line);
            }
            _ => unreachable!("compile_call_expr on a non-call expression"),
        }
        Ok(())
    }

    fn emit_call(&mut self, func_reg: u8, nargs: Option<u8>, want: Want, line: u32) {
        let nresults = match want {
            Want::Fixed(n) => Some(n),
            Want::All => None,
        };
        self.fs().emit(Instruction::Call { func: func_reg, nargs, nresults }, line);
        match want {
            Want::Fixed(n) => self.fs().free_to(func_reg + n),
            Want::All => self.fs().free_to(func_reg + 1),
        }
    }

    /// Compiles an argument/value list starting at register `start`,
    /// letting a trailing call/vararg expand to "all" (spec.md §4.3
    /// multi-value expansion). Returns `(None, base)` when the list ends
    /// open-ended (`B=0`/`C=0` convention), else `(Some(count), base)`.
    pub(super) fn compile_arg_list(&mut self, args: &[Expr], start: u8) -> CResult<(Option<u8>, u8)> {
        self.fs().free_to(start);
        if args.is_empty() {
            return Ok((Some(0), start));
        }
        let mut reg = start;
        for (i, a) in args.iter().enumerate() {
            let is_last = i + 1 == args.len();
            if is_last && a.is_multret() {
                self.fs().free_to(reg);
                self.compile_call_expr_or_vararg_all(a, reg)?;
                return Ok((None, start));
            }
            self.fs().free_to(reg);
            self.fs().reserve_reg();
            self.compile_expr_to(a, reg)?;
            reg += 1;
        }
        self.fs().free_to(reg);
        Ok((Some(reg - start), start))
    }

    fn compile_call_expr_or_vararg_all(&mut self, expr: &Expr, dst: u8) -> CResult<()> {
        match expr {
            Expr::Vararg(line) => {
                self.fs().emit(Instruction::Vararg { dst, count: None }, *line);
                self.fs().reserve_reg();
                Ok(())
            }
            _ => self.compile_call_expr(expr, dst, Want::All),
        }
    }

    pub(super) fn str_const_rk(&mut self, s: &str, line: u32) -> RK {
        let idx = self.str_const(s);
        self.rk_const(idx, line)
    }

    pub(super) fn close_scope_locals(&mut self, from_reg: u8, mode: CloseMode, line: u32) {
        if self.fs().close_candidates_from(from_reg) {
            self.fs().emit(Instruction::Close { from: from_reg, mode }, line);
        }
    }
}

fn flatten_concat(expr: &Expr, out: &mut Vec<Expr>) {
    if let Expr::BinOp { op: BinOp::Concat, lhs, rhs, .. } = expr {
        flatten_concat(lhs, out);
        flatten_concat(rhs, out);
    } else {
        out.push(expr.clone());
    }
}
