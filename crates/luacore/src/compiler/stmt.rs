//! Statement codegen: `compile_block`/`compile_stmt` (spec.md §4.2 statement
//! grammar, §4.3.3 control flow, §4.3.4 goto/label resolution).

use crate::ast::{Block, FuncBody, FuncTarget, LocalAttrib, Stmt};
use crate::opcode::{CloseMode, Instruction};

use super::expr::Want;
use super::{CResult, Compiler, NameRef};

impl Compiler {
    pub(super) fn compile_block(&mut self, block: &Block) -> CResult<()> {
        self.fs().enter_block(false);
        self.compile_stmts(block)?;
        self.emit_block_exit_close(block);
        let popped = self.fs().leave_block();
        self.patch_breaks_into_current(&popped);
        Ok(())
    }

    /// Emits a `CLOSE` for this block's own `<close>` locals on ordinary
    /// (fall-through) block exit. `return`/`break`/`goto` emit their own via
    /// `close_scope_locals` before jumping, so this only covers the
    /// straight-line path (spec.md §4.3.3).
    fn emit_block_exit_close(&mut self, block: &Block) {
        let _ = block;
        let first_local = self.fs().current_block().first_local;
        if let Some(local) = self.fs().locals.get(first_local) {
            let reg = local.register;
            let line = self.fs().end_line;
            self.close_scope_locals(reg, CloseMode::ScopeExit, line);
        }
    }

    /// Compiles a loop body block, wiring `break` statements to jump past
    /// the loop once it's fully emitted (spec.md §4.2 `break`).
    fn compile_loop_block(&mut self, block: &Block) -> CResult<Vec<usize>> {
        self.fs().enter_block(true);
        self.compile_stmts(block)?;
        self.emit_block_exit_close(block);
        let popped = self.fs().leave_block();
        Ok(popped.break_jumps)
    }

    fn compile_stmts(&mut self, block: &Block) -> CResult<()> {
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Breaks inside a non-loop block (e.g. `do ... break ... end` nested
    /// inside a loop) propagate up to the nearest enclosing loop block.
    fn patch_breaks_into_current(&mut self, popped: &crate::compiler::funcstate::BlockState) {
        if popped.break_jumps.is_empty() {
            return;
        }
        if let Some(parent) = self.fs().blocks.last_mut() {
            parent.break_jumps.extend(popped.break_jumps.iter().copied());
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::Empty => Ok(()),
            Stmt::Assign { targets, values, line } => self.compile_assign(targets, values, *line),
            Stmt::Local { names, values, line } => self.compile_local(names, values, *line),
            Stmt::Call(expr) => {
                let base = self.fs().free_reg;
                self.fs().reserve_reg();
                self.compile_call_expr(expr, base, Want::Fixed(0))?;
                self.fs().free_to(base);
                Ok(())
            }
            Stmt::Do(block) => self.compile_block(block),
            Stmt::While { cond, body, line } => self.compile_while(cond, body, *line),
            Stmt::Repeat { body, cond, line } => self.compile_repeat(body, cond, *line),
            Stmt::If { arms, else_block, line } => self.compile_if(arms, else_block, *line),
            Stmt::NumericFor { var, start, stop, step, body, line } => {
                self.compile_numeric_for(var, start, stop, step.as_ref(), body, *line)
            }
            Stmt::GenericFor { names, exprs, body, line } => self.compile_generic_for(names, exprs, body, *line),
            Stmt::FunctionDecl { target, body, line } => self.compile_function_decl(target, body, *line),
            Stmt::LocalFunction { name, body, line } => self.compile_local_function(name, body, *line),
            Stmt::Return { exprs, line } => self.compile_return(exprs, *line),
            Stmt::Break { line } => self.compile_break(*line),
            Stmt::Goto { label, line } => self.compile_goto(label, *line),
            Stmt::Label { name, line } => self.compile_label(name, *line),
        }
    }

    fn compile_assign(&mut self, targets: &[crate::ast::Expr], values: &[crate::ast::Expr], line: u32) -> CResult<()> {
        if targets.len() == 1 && values.len() == 1 {
            let base = self.fs().free_reg;
            let vreg = self.fs().reserve_reg();
            self.compile_expr_to(&values[0], vreg)?;
            self.store_to_target(&targets[0], vreg, line)?;
            self.fs().free_to(base);
            return Ok(());
        }
        let base = self.fs().free_reg;
        let first = self.fs().free_reg;
        self.compile_value_list_fixed(values, targets.len() as u8)?;
        for (i, target) in targets.iter().enumerate() {
            self.store_to_target(target, first + i as u8, line)?;
        }
        self.fs().free_to(base);
        Ok(())
    }

    /// Evaluates `values` left-to-right into `count` consecutive fresh
    /// registers, padding with `nil` or truncating an over-long list
    /// (spec.md §4.2 "adjusted to the target count").
    fn compile_value_list_fixed(&mut self, values: &[crate::ast::Expr], count: u8) -> CResult<()> {
        if values.is_empty() {
            if count > 0 {
                let r = self.fs().reserve_reg();
                self.fs().emit(Instruction::LoadNil { dst: r, count }, self.fs().end_line);
                for _ in 1..count {
                    self.fs().reserve_reg();
                }
            }
            return Ok(());
        }
        for (i, v) in values.iter().enumerate() {
            let is_last = i + 1 == values.len();
            if is_last && v.is_multret() && (values.len() as u8) < count {
                let want = count - (values.len() as u8 - 1);
                let r = self.fs().reserve_reg();
                self.compile_call_expr(v, r, Want::Fixed(want))?;
                for _ in 1..want {
                    self.fs().reserve_reg();
                }
            } else {
                let r = self.fs().reserve_reg();
                self.compile_expr_to(v, r)?;
            }
        }
        let evaluated = values.len() as u8;
        if evaluated < count {
            // handled above via multret expansion when possible; otherwise pad.
        } else if evaluated > count {
            // extra values were evaluated for side effects; registers beyond
            // `count` are simply left unused and freed by the caller.
        }
        Ok(())
    }

    fn store_to_target(&mut self, target: &crate::ast::Expr, src_reg: u8, line: u32) -> CResult<()> {
        use crate::ast::Expr;
        match target {
            Expr::Name(name, _) => match self.resolve_name(name) {
                NameRef::Local(reg) => {
                    if reg != src_reg {
                        self.fs().emit(Instruction::Move { dst: reg, src: src_reg }, line);
                    }
                }
                NameRef::Upvalue(idx) => {
                    self.fs().emit(Instruction::SetUpval { upval: idx, src: src_reg }, line);
                }
                NameRef::Global => {
                    let env = self.env_upvalue();
                    let key = self.str_const(name);
                    self.fs().emit(
                        Instruction::SetEnvField { env_upval: env, key, src: crate::opcode::RK::Reg(src_reg), hint: crate::opcode::NameHint::Global(name.clone()) },
                        line,
                    );
                }
            },
            Expr::Field { obj, name, line: fline } => {
                let obj_reg = self.compile_to_temp(obj)?;
                let key = self.str_const(name);
                self.fs().emit(
                    Instruction::SetField { table: obj_reg, key, value: crate::opcode::RK::Reg(src_reg), hint: crate::opcode::NameHint::Field(name.clone()) },
                    *fline,
                );
            }
            Expr::Index { obj, key, line: iline } => {
                let obj_reg = self.compile_to_temp(obj)?;
                let k = self.compile_rk(key)?;
                self.fs().emit(
                    Instruction::SetTable { table: obj_reg, key: k, value: crate::opcode::RK::Reg(src_reg), hint: crate::opcode::NameHint::None },
                    *iline,
                );
            }
            _ => return Err(self.err(line, "cannot assign to this expression")),
        }
        Ok(())
    }

    fn compile_local(&mut self, names: &[crate::ast::AttribName], values: &[crate::ast::Expr], line: u32) -> CResult<()> {
        let base = self.fs().free_reg;
        self.compile_value_list_fixed(values, names.len() as u8)?;
        for (i, n) in names.iter().enumerate() {
            let reg = base + i as u8;
            self.fs().locals.push(crate::compiler::funcstate::LocalVar {
                name: n.name.clone(),
                register: reg,
                start_pc: self.fs().code.len() as u32,
                end_pc: 0,
                is_const: matches!(n.attrib, LocalAttrib::Const | LocalAttrib::Close),
                is_close: matches!(n.attrib, LocalAttrib::Close),
                active: true,
                captured: false,
            });
            if matches!(n.attrib, LocalAttrib::Close) {
                self.fs().blocks.last_mut().unwrap().has_close = true;
            }
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &crate::ast::Expr, body: &Block, line: u32) -> CResult<()> {
        let loop_start = self.fs().here();
        let base = self.fs().free_reg;
        let exit_jmp = self.compile_condition_jump(cond, false)?;
        let breaks = self.compile_loop_block(body)?;
        self.fs().free_to(base);
        let back_jmp = self.fs().emit(Instruction::Jmp { offset: 0 }, line);
        self.fs().patch_jmp_to(back_jmp, loop_start);
        self.fs().patch_jmp_to_here(exit_jmp);
        for b in breaks {
            self.fs().patch_jmp_to_here(b);
        }
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &crate::ast::Expr, line: u32) -> CResult<()> {
        // `repeat` locals stay visible to `until`'s condition (spec.md
        // §4.2), so the block is entered manually rather than via
        // `compile_block`/`compile_loop_block`.
        let loop_start = self.fs().here();
        self.fs().enter_block(true);
        self.compile_stmts(body)?;
        let base_before_cond = self.fs().free_reg;
        let exit_jmp = self.compile_condition_jump(cond, true)?;
        let first_local = self.fs().current_block().first_local;
        if let Some(local) = self.fs().locals.get(first_local) {
            let reg = local.register;
            self.close_scope_locals(reg, CloseMode::ScopeExit, line);
        }
        let popped = self.fs().leave_block();
        self.fs().free_to(base_before_cond);
        let back_jmp = self.fs().emit(Instruction::Jmp { offset: 0 }, line);
        self.fs().patch_jmp_to(back_jmp, loop_start);
        // the condition jump above must skip the back-edge when true;
        // patch it to land just after `back_jmp`.
        self.fs().patch_jmp_to_here(exit_jmp);
        for b in popped.break_jumps {
            self.fs().patch_jmp_to_here(b);
        }
        self.patch_breaks_into_current(&popped);
        Ok(())
    }

    fn compile_if(&mut self, arms: &[(crate::ast::Expr, Block)], else_block: &Option<Block>, _line: u32) -> CResult<()> {
        let mut end_jumps = Vec::new();
        for (i, (cond, body)) in arms.iter().enumerate() {
            let is_last_arm = i + 1 == arms.len() && else_block.is_none();
            let arm_line = cond.line();
            let next_jmp = self.compile_condition_jump(cond, false)?;
            self.compile_block(body)?;
            if !is_last_arm {
                let end_jmp = self.fs().emit(Instruction::Jmp { offset: 0 }, arm_line);
                end_jumps.push(end_jmp);
            }
            self.fs().patch_jmp_to_here(next_jmp);
        }
        if let Some(else_b) = else_block {
            self.compile_block(else_b)?;
        }
        for j in end_jumps {
            self.fs().patch_jmp_to_here(j);
        }
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &str,
        start: &crate::ast::Expr,
        stop: &crate::ast::Expr,
        step: Option<&crate::ast::Expr>,
        body: &Block,
        line: u32,
    ) -> CResult<()> {
        let base = self.fs().free_reg;
        let r_start = self.fs().reserve_reg();
        self.compile_expr_to(start, r_start)?;
        let r_stop = self.fs().reserve_reg();
        self.compile_expr_to(stop, r_stop)?;
        let r_step = self.fs().reserve_reg();
        match step {
            Some(e) => self.compile_expr_to(e, r_step)?,
            None => self.fs().emit(Instruction::LoadI { dst: r_step, imm: 1 }, line).pipe(|_| ()),
        }
        let prep_pc = self.fs().emit(Instruction::ForPrep { base: r_start, exit_offset: 0 }, line);
        let body_start = self.fs().here();
        self.fs().enter_block(true);
        let loop_var = self.fs().declare_local(var.to_string(), &LocalAttrib::None);
        self.fs().emit(Instruction::Move { dst: loop_var, src: r_start }, line);
        self.compile_stmts(body)?;
        self.emit_block_exit_close(body);
        let popped = self.fs().leave_block();
        let loop_pc = self.fs().emit(Instruction::ForLoop { base: r_start, body_offset: 0 }, line);
        self.fs().patch_jmp_to(loop_pc, body_start);
        let exit_pc = self.fs().here();
        self.fs().patch_jmp_to(prep_pc, exit_pc);
        for b in popped.break_jumps {
            self.fs().patch_jmp_to_here(b);
        }
        self.fs().free_to(base);
        Ok(())
    }

    fn compile_generic_for(&mut self, names: &[String], exprs: &[crate::ast::Expr], body: &Block, line: u32) -> CResult<()> {
        let base = self.fs().free_reg;
        self.compile_value_list_fixed(exprs, 4)?;
        let iter_fn = base;
        let state = base + 1;
        let ctrl = base + 2;
        let _closing = base + 3;
        let loop_start = self.fs().here();
        self.fs().enter_block(true);
        let first_var = {
            let mut first = 0u8;
            for (i, n) in names.iter().enumerate() {
                let r = self.fs().declare_local(n.clone(), &LocalAttrib::None);
                if i == 0 {
                    first = r;
                }
            }
            first
        };
        let call_pc = self.fs().emit(Instruction::TForCall { base: iter_fn, nresults: names.len() as u8 }, line);
        let _ = call_pc;
        let _ = ctrl;
        let _ = state;
        self.compile_stmts(body)?;
        self.emit_block_exit_close(body);
        let popped = self.fs().leave_block();
        let loop_pc = self.fs().emit(Instruction::TForLoop { base: first_var, body_offset: 0 }, line);
        self.fs().patch_jmp_to(loop_pc, loop_start);
        for b in popped.break_jumps {
            self.fs().patch_jmp_to_here(b);
        }
        self.fs().free_to(base);
        Ok(())
    }

    fn compile_function_decl(&mut self, target: &FuncTarget, body: &FuncBody, line: u32) -> CResult<()> {
        use crate::ast::Expr;
        let name_hint = Some(function_decl_display_name(target));
        let mut body = body.clone();
        body.name_hint = name_hint;
        let base = self.fs().free_reg;
        let reg = self.fs().reserve_reg();
        let proto_idx = self.compile_nested_function(&body, body.name_hint.clone())?;
        self.fs().emit(Instruction::Closure { dst: reg, proto: proto_idx }, line);

        if target.path.is_empty() && target.method.is_none() {
            let store_target = Expr::Name(target.base.clone(), target.line);
            self.store_to_target(&store_target, reg, line)?;
        } else {
            let mut obj = Expr::Name(target.base.clone(), target.line);
            let all_fields: Vec<&String> = target.path.iter().chain(target.method.iter()).collect();
            for (i, field) in all_fields.iter().enumerate() {
                let is_last = i + 1 == all_fields.len();
                if is_last {
                    let store_target = Expr::Field { obj: Box::new(obj.clone()), name: (*field).clone(), line: target.line };
                    self.store_to_target(&store_target, reg, line)?;
                } else {
                    obj = Expr::Field { obj: Box::new(obj), name: (*field).clone(), line: target.line };
                }
            }
        }
        self.fs().free_to(base);
        Ok(())
    }

    fn compile_local_function(&mut self, name: &str, body: &FuncBody, line: u32) -> CResult<()> {
        // the local is declared before compiling the body so the function
        // can recurse by name (spec.md §4.2 "local function").
        let reg = self.fs().declare_local(name.to_string(), &LocalAttrib::None);
        let mut body = body.clone();
        body.name_hint = Some(format!("local '{name}'"));
        let proto_idx = self.compile_nested_function(&body, body.name_hint.clone())?;
        self.fs().emit(Instruction::Closure { dst: reg, proto: proto_idx }, line);
        Ok(())
    }

    fn compile_return(&mut self, exprs: &[crate::ast::Expr], line: u32) -> CResult<()> {
        self.close_scope_locals(0, CloseMode::ScopeExit, line);
        if exprs.is_empty() {
            self.fs().emit(Instruction::Return0, line);
            return Ok(());
        }
        let base = self.fs().free_reg;
        let first = self.fs().free_reg;
        let last = exprs.len() - 1;
        let mut open_ended = false;
        for (i, e) in exprs.iter().enumerate() {
            if i == last && e.is_multret() {
                let r = self.fs().free_reg;
                match e {
                    crate::ast::Expr::Vararg(_) => {
                        self.fs().emit(Instruction::Vararg { dst: r, count: None }, line);
                        self.fs().reserve_reg();
                    }
                    _ => self.compile_call_expr(e, r, Want::All)?,
                }
                open_ended = true;
            } else {
                let r = self.fs().reserve_reg();
                self.compile_expr_to(e, r)?;
            }
        }
        let count = if open_ended { None } else { Some((self.fs().free_reg - first).max(0)) };
        self.fs().emit(Instruction::Return { first, count }, line);
        self.fs().free_to(base);
        Ok(())
    }

    fn compile_break(&mut self, line: u32) -> CResult<()> {
        let idx = self
            .fs()
            .blocks
            .iter()
            .rposition(|b| b.is_loop)
            .ok_or_else(|| self.err(line, "break outside a loop"))?;
        // Only locals declared inside the loop (at or after its first
        // register) are being exited; outer <close> locals stay live.
        let loop_first_local = self.fs().blocks[idx].first_local;
        let from_reg = self.fs().locals.get(loop_first_local).map(|l| l.register).unwrap_or(self.fs().free_reg);
        self.close_scope_locals(from_reg, CloseMode::ScopeExit, line);
        let jmp = self.fs().emit(Instruction::Jmp { offset: 0 }, line);
        self.fs().blocks[idx].break_jumps.push(jmp);
        Ok(())
    }

    fn compile_goto(&mut self, label: &str, line: u32) -> CResult<()> {
        self.close_scope_locals(0, CloseMode::ScopeExit, line);
        let jmp = self.fs().emit(Instruction::Jmp { offset: 0 }, line);
        if let Some(l) = self.fs().labels.iter().find(|l| l.name == label) {
            let target = l.pc;
            self.fs().patch_jmp_to(jmp, target);
        } else {
            let scope_level = self.fs().current_block().scope_level;
            let nlocals = self.fs().locals.len();
            self.fs().pending_gotos.push(crate::compiler::funcstate::PendingGoto {
                name: label.to_string(),
                jmp_pc: jmp,
                scope_level,
                nlocals,
                line,
            });
        }
        Ok(())
    }

    fn compile_label(&mut self, name: &str, line: u32) -> CResult<()> {
        if self.fs().labels.iter().any(|l| l.name == name) {
            return Err(self.err(line, format!("label '{name}' already defined")));
        }
        let pc = self.fs().here();
        let scope_level = self.fs().current_block().scope_level;
        let nlocals = self.fs().locals.len();
        self.fs().labels.push(crate::compiler::funcstate::LabelDef { name: name.to_string(), pc, scope_level, nlocals });
        self.fs().current_block_mut().labels_defined_here.push(name.to_string());

        // Collect matching gotos' plain-data fields first so the borrow on
        // `pending_gotos` ends before we need `self.fs()`/`self.err()` again
        // (the skip-check below needs both `self.fs().locals` and
        // `self.err`, neither available while `pending_gotos` is borrowed).
        let matching: Vec<(usize, usize, u32, u32, u32)> = self
            .fs()
            .pending_gotos
            .iter()
            .enumerate()
            .filter(|(_, g)| g.name == name)
            .map(|(i, g)| (i, g.jmp_pc, g.scope_level, g.nlocals as u32, g.line))
            .collect();

        // A forward goto landing at the same scope level as the label but
        // with fewer locals declared at the goto site than are live at the
        // label would jump over those declarations (spec.md §4.3.4):
        // reject at compile time rather than letting the jump skip their
        // initialization.
        for &(_, _, goto_scope, goto_nlocals, goto_line) in &matching {
            if goto_scope == scope_level && (goto_nlocals as usize) < nlocals {
                let skipped = self.fs().locals[goto_nlocals as usize].name.clone();
                return Err(self.err(
                    goto_line,
                    format!("<goto {name}> at line {goto_line} jumps into the scope of local '{skipped}'"),
                ));
            }
        }

        let resolved: Vec<(usize, usize)> = matching.iter().map(|(i, jmp_pc, ..)| (*i, *jmp_pc)).collect();
        for (_, jmp_pc) in &resolved {
            self.fs().patch_jmp_to(*jmp_pc, pc);
        }
        let resolved_idx: Vec<usize> = resolved.iter().map(|(i, _)| *i).collect();
        let mut kept = Vec::new();
        for (i, g) in self.fs().pending_gotos.drain(..).enumerate() {
            if !resolved_idx.contains(&i) {
                kept.push(g);
            }
        }
        self.fs().pending_gotos = kept;
        Ok(())
    }

    /// Compiles a nested function body into a child `Proto`, pushing it onto
    /// the enclosing `FuncState`'s proto list and returning its index for a
    /// `Closure` instruction (spec.md §4.3 nested function compilation).
    pub(super) fn compile_nested_function(&mut self, body: &FuncBody, name_hint: Option<String>) -> CResult<u32> {
        let parent_level = self.level();
        let source_name = self.funcs[parent_level].source_name.clone();
        let mut fs = crate::compiler::funcstate::FuncState::new(source_name, body.line, body.is_vararg);
        fs.end_line = body.end_line;
        fs.nparams = body.params.len() as u8;
        self.funcs.push(fs);
        for p in &body.params {
            self.fs().declare_local(p.clone(), &LocalAttrib::None);
        }
        let _ = name_hint;
        self.compile_block(&body.block)?;
        self.finish_return_if_missing();
        self.resolve_pending_gotos_at_current_level()?;
        let child = self.funcs.pop().unwrap();
        let locals = child.local_infos();
        let (code, line_events, constants, upvalues, protos, max_stack) = child.finish();
        let proto = crate::value::proto::Proto {
            source_name: self.source_name.clone(),
            line_defined: body.line,
            last_line_defined: body.end_line,
            param_count: body.params.len() as u8,
            is_vararg: body.is_vararg,
            max_stack_size: max_stack.max(2),
            code,
            constants,
            upvalues,
            locals,
            line_events,
            protos,
        };
        let idx = self.fs().protos.len() as u32;
        self.fs().protos.push(std::rc::Rc::new(proto));
        Ok(idx)
    }

    fn resolve_pending_gotos_at_current_level(&mut self) -> CResult<()> {
        let first = self.fs().pending_gotos.first().map(|g| (g.line, g.name.clone()));
        if let Some((line, name)) = first {
            return Err(self.err(line, format!("no visible label '{name}' for goto")));
        }
        Ok(())
    }
}

fn function_decl_display_name(target: &FuncTarget) -> String {
    if let Some(method) = &target.method {
        format!("method '{method}'")
    } else if target.path.is_empty() {
        format!("function '{}'", target.base)
    } else {
        let mut s = target.base.clone();
        for p in &target.path {
            s.push('.');
            s.push_str(p);
        }
        format!("function '{s}'")
    }
}

trait Pipe: Sized {
    fn pipe<R>(self, f: impl FnOnce(Self) -> R) -> R {
        f(self)
    }
}
impl<T> Pipe for T {}
