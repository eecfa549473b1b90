//! C7: statement lowering. Grounded in the teacher's `compile_apply` handling of
//! `if`/`let`/`set!`/`begin` special forms (`compiler.rs`), generalised from a Lisp's
//! handful of special forms to the full surface-language statement set spec.md §4
//! names: typed declarations, indexed/member assignment, the three loop shapes,
//! try/throw, and module import/export wiring.

use crate::ast::{AssignTarget, EnumVariantDecl, ExprKind, ForIter, ImportKind, RangeLoop, Stmt, UnOp};
use crate::constant::Constant;
use crate::diagnostics::{DiagCode, Diagnostic, SourceLoc};
use crate::lower::expr::{compile_expr, compile_expr_into_temp, compile_expr_to};
use crate::lower::function::FunctionCompiler;
use crate::module_manager::ExportKind;
use crate::opcode::{Op, Register};
use crate::scope::Binding;
use crate::types::{EnumType, EnumVariant, Type};

/// Compile a block of statements as a fresh lexical scope: any locals it declares are
/// released in one step on exit, and any of them a nested closure captured get an
/// explicit `CLOSE_UPVALUES` first.
pub(crate) fn compile_block(fc: &mut FunctionCompiler, stmts: &[Stmt]) {
    let mark = fc.ra.enter_scope();
    fc.scopes.enter_scope(mark);
    for stmt in stmts {
        compile_stmt(fc, stmt);
    }
    close_block_scope(fc);
}

fn close_block_scope(fc: &mut FunctionCompiler) {
    let (mark, closed) = fc.scopes.leave_scope();
    for reg in closed {
        fc.buf.append_instruction(Op::CloseUpvalues, reg, 0, 0);
    }
    fc.ra.exit_scope(mark);
}

pub(crate) fn compile_stmt(fc: &mut FunctionCompiler, stmt: &Stmt) {
    match stmt {
        Stmt::VarDecl { name, ty, mutable, is_public, init, loc } => {
            compile_var_decl(fc, name, ty, *mutable, *is_public, init, loc)
        }
        Stmt::Assign { target, value, loc } => compile_assign(fc, target, value, loc),
        Stmt::Print { args, .. } => compile_print(fc, args),
        Stmt::ExprStmt(e) => {
            let (reg, is_temp) = compile_expr(fc, e);
            if is_temp {
                fc.ra.free_temp(reg);
            }
        }
        Stmt::If { cond, then_branch, else_branch, .. } => compile_if(fc, cond, then_branch, else_branch.as_deref()),
        Stmt::While { cond, body, .. } => compile_while(fc, cond, body),
        Stmt::ForRange(range_loop) => compile_for_range(fc, range_loop),
        Stmt::ForIter(for_iter) => compile_for_iter(fc, for_iter),
        Stmt::Try { body, catch_var, catch_body, .. } => compile_try(fc, body, catch_var.as_deref(), catch_body.as_deref()),
        Stmt::Throw { value, .. } => {
            let (reg, is_temp) = compile_expr(fc, value);
            fc.buf.append_instruction(Op::Throw, reg, 0, 0);
            if is_temp {
                fc.ra.free_temp(reg);
            }
        }
        Stmt::Return { value, .. } => compile_return(fc, value.as_ref()),
        Stmt::Break { loc } => {
            let patch = crate::control_flow::emit_jump(&mut fc.buf, true);
            if fc.cf.record_break(patch).is_err() {
                fc.report(
                    Diagnostic::new(DiagCode::BreakOutsideLoop, "break outside of a loop".to_string())
                        .at(loc.clone())
                        .with_note("Compiler scope stack reports no active loops at this point."),
                );
            }
        }
        Stmt::Continue { loc } => {
            let patch = crate::control_flow::emit_jump(&mut fc.buf, true);
            if fc.cf.record_continue(patch).is_err() {
                fc.report(Diagnostic::new(DiagCode::ContinueOutsideLoop, "continue outside of a loop".to_string()).at(loc.clone()));
            }
        }
        Stmt::Import(import) => compile_import(fc, import),
        Stmt::Function(decl) => compile_function_decl(fc, decl),
        Stmt::Struct(decl) => compile_struct_decl(fc, decl),
        Stmt::Enum(decl) => compile_enum_decl(fc, decl),
        Stmt::Impl(impl_block) => compile_impl(fc, impl_block),
    }
}

fn compile_var_decl(
    fc: &mut FunctionCompiler,
    name: &str,
    ty: &Type,
    mutable: bool,
    is_public: bool,
    init: &crate::ast::Expr,
    loc: &SourceLoc,
) {
    if fc.scopes.is_declared_in_innermost_scope(name) {
        fc.report(Diagnostic::new(DiagCode::Redefinition, format!("{:?} is already declared in this scope", name)).at(loc.clone()));
    }
    let reg = if fc.is_module_init() { fc.alloc_global() } else { fc.alloc_local() };
    compile_expr_to(fc, init, reg);
    fc.scopes.declare(name, reg, mutable);

    if is_public && fc.is_module_init() {
        let mut linker = fc.module.linker.borrow_mut();
        linker.record_export(name.to_string(), ExportKind::Global, ty.clone());
        linker.set_export_metadata(name, reg, ty.clone());
    }
}

fn compile_assign(fc: &mut FunctionCompiler, target: &AssignTarget, value: &crate::ast::Expr, loc: &SourceLoc) {
    match target {
        AssignTarget::Name(name) => match fc.scopes.resolve(name) {
            Some(Binding::Local(reg)) => {
                if fc.scopes.resolve_local(name).map(|s| !s.mutable).unwrap_or(false) {
                    fc.report(Diagnostic::new(DiagCode::AssignToImmutable, format!("{:?} is not declared mut", name)).at(loc.clone()));
                }
                compile_expr_to(fc, value, reg);
            }
            Some(Binding::Upvalue(idx)) => {
                let (v_reg, v_temp) = compile_expr(fc, value);
                fc.buf.append_instruction(Op::SetUpvalueR, idx, v_reg, 0);
                if v_temp {
                    fc.ra.free_temp(v_reg);
                }
            }
            None => {
                fc.report(Diagnostic::new(DiagCode::UndefinedVariable, format!("undefined variable {:?}", name)).at(loc.clone()));
            }
        },
        AssignTarget::Index { container, index } => {
            let c = compile_expr(fc, container);
            let i = compile_expr(fc, index);
            let (v_reg, v_temp) = compile_expr(fc, value);
            fc.buf.append_instruction(Op::ArraySetR, c.0, i.0, v_reg);
            if v_temp {
                fc.ra.free_temp(v_reg);
            }
            if i.1 {
                fc.ra.free_temp(i.0);
            }
            if c.1 {
                fc.ra.free_temp(c.0);
            }
        }
        AssignTarget::Member { base, name } => {
            let idx = match base.ty.base() {
                Type::Struct(st) => st.field_index(name),
                _ => None,
            };
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    fc.report(
                        Diagnostic::new(DiagCode::UnknownStructField, format!("no field named {:?} to assign", name)).at(loc.clone()),
                    );
                    0
                }
            };
            let b = compile_expr(fc, base);
            let (v_reg, v_temp) = compile_expr(fc, value);
            fc.buf.append_instruction(Op::ArraySetR, b.0, idx as Register, v_reg);
            if v_temp {
                fc.ra.free_temp(v_reg);
            }
            if b.1 {
                fc.ra.free_temp(b.0);
            }
        }
    }
}

fn compile_print(fc: &mut FunctionCompiler, args: &[crate::ast::Expr]) {
    if args.len() == 1 {
        let (reg, is_temp) = compile_expr(fc, &args[0]);
        fc.buf.append_instruction(Op::PrintR, reg, 0, 0);
        if is_temp {
            fc.ra.free_temp(reg);
        }
        return;
    }
    let base = if args.is_empty() { fc.alloc_temp() } else { fc.alloc_consecutive_temps(args.len()) };
    for (i, a) in args.iter().enumerate() {
        compile_expr_to(fc, a, base + i as Register);
    }
    fc.buf.append_instruction(Op::PrintMultiR, base, args.len() as Register, 0);
    let freed = if args.is_empty() { 1 } else { args.len() };
    for i in (0..freed).rev() {
        fc.ra.free_temp(base + i as Register);
    }
}

fn compile_if(fc: &mut FunctionCompiler, cond: &crate::ast::Expr, then_branch: &[Stmt], else_branch: Option<&[Stmt]>) {
    let test = compile_expr_into_temp(fc, cond);
    let else_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, test, true);
    fc.ra.free_temp(test);

    compile_block(fc, then_branch);

    match else_branch {
        Some(else_stmts) => {
            let end_patch = crate::control_flow::emit_jump(&mut fc.buf, true);
            let else_start = fc.buf.current_offset();
            let r = fc.buf.patch(else_patch, else_start);
            fc.checked_patch(r);

            compile_block(fc, else_stmts);

            let end = fc.buf.current_offset();
            let r = fc.buf.patch(end_patch, end);
            fc.checked_patch(r);
        }
        None => {
            let end = fc.buf.current_offset();
            let r = fc.buf.patch(else_patch, end);
            fc.checked_patch(r);
        }
    }
}

fn compile_while(fc: &mut FunctionCompiler, cond: &crate::ast::Expr, body: &[Stmt]) {
    fc.cf.enter_loop();
    let loop_top = fc.buf.current_offset();
    let test = compile_expr_into_temp(fc, cond);
    let exit_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, test, true);
    fc.ra.free_temp(test);
    // the loop's exit test is itself treated as a `break`, so `leave_loop` patches it
    // along with any explicit `break` uniformly once the loop closes.
    let _ = fc.cf.record_break(exit_patch);

    compile_block(fc, body);

    fc.update_continue(loop_top);
    fc.emit_backward_jump(loop_top);
    fc.leave_loop();
}

fn typed_cmp_op(ty: &Type, inclusive: bool) -> Op {
    use Type::*;
    match (ty, inclusive) {
        (I32, false) => Op::LtI32, (I32, true) => Op::LeI32,
        (I64, false) => Op::LtI64, (I64, true) => Op::LeI64,
        (U32, false) => Op::LtU32, (U32, true) => Op::LeU32,
        (U64, false) => Op::LtU64, (U64, true) => Op::LeU64,
        (F64, false) => Op::LtF64, (F64, true) => Op::LeF64,
        _ => Op::LtI32,
    }
}

/// The descending-loop counterpart to `typed_cmp_op`: `i > limit` / `i >= limit`, used
/// when the range's step is known (or, for the unknown-sign case, assumed) negative.
fn typed_cmp_op_desc(ty: &Type, inclusive: bool) -> Op {
    use Type::*;
    match (ty, inclusive) {
        (I32, false) => Op::GtI32, (I32, true) => Op::GeI32,
        (I64, false) => Op::GtI64, (I64, true) => Op::GeI64,
        (U32, false) => Op::GtU32, (U32, true) => Op::GeU32,
        (U64, false) => Op::GtU64, (U64, true) => Op::GeU64,
        (F64, false) => Op::GtF64, (F64, true) => Op::GeF64,
        _ => Op::GtI32,
    }
}

fn typed_ge_op(ty: &Type) -> Op {
    use Type::*;
    match ty {
        I32 => Op::GeI32,
        I64 => Op::GeI64,
        U32 => Op::GeU32,
        U64 => Op::GeU64,
        F64 => Op::GeF64,
        _ => Op::GeI32,
    }
}

fn typed_add_op(ty: &Type) -> Op {
    use Type::*;
    match ty {
        I32 => Op::AddI32,
        I64 => Op::AddI64,
        U32 => Op::AddU32,
        U64 => Op::AddU64,
        F64 => Op::AddF64,
        _ => Op::AddI32,
    }
}

fn typed_const_load_op(ty: &Type) -> Op {
    use Type::*;
    match ty {
        I64 => Op::LoadI64Const,
        U32 => Op::LoadU32Const,
        U64 => Op::LoadU64Const,
        F64 => Op::LoadF64Const,
        _ => Op::LoadI32Const,
    }
}

fn one_constant(ty: &Type) -> Constant {
    match ty {
        Type::I64 => Constant::I64(1),
        Type::U32 => Constant::U32(1),
        Type::U64 => Constant::U64(1),
        Type::F64 => Constant::f64(1.0),
        _ => Constant::I32(1),
    }
}

fn zero_constant(ty: &Type) -> Constant {
    match ty {
        Type::I64 => Constant::I64(0),
        Type::U32 => Constant::U32(0),
        Type::U64 => Constant::U64(0),
        Type::F64 => Constant::f64(0.0),
        _ => Constant::I32(0),
    }
}

/// A range's step is "unit positive" -- eligible for the fused `INC_CMP_JMP` fast path
/// -- when it's either absent (the implicit `+1` default) or a literal `1`.
fn step_is_literal_one(step: Option<&crate::ast::Expr>) -> bool {
    match step {
        None => true,
        Some(e) => matches!(e.kind, ExprKind::IntLiteral(1, _)),
    }
}

enum StepSign {
    Positive,
    Negative,
    Unknown,
}

/// Classify a range's step expression by sign wherever it's knowable from its literal
/// shape (a literal, or a literal under unary negation); anything else -- an
/// identifier, a call, an arbitrary expression -- is `Unknown` and must be tested at
/// run time.
fn classify_step(step: Option<&crate::ast::Expr>) -> StepSign {
    match step {
        None => StepSign::Positive,
        Some(e) => match &e.kind {
            ExprKind::IntLiteral(v, _) if *v > 0 => StepSign::Positive,
            ExprKind::IntLiteral(v, _) if *v < 0 => StepSign::Negative,
            ExprKind::FloatLiteral(v) if *v > 0.0 => StepSign::Positive,
            ExprKind::FloatLiteral(v) if *v < 0.0 => StepSign::Negative,
            ExprKind::Unary { op: UnOp::Neg, operand } => match &operand.kind {
                ExprKind::IntLiteral(v, _) if *v > 0 => StepSign::Negative,
                ExprKind::IntLiteral(v, _) if *v < 0 => StepSign::Positive,
                ExprKind::FloatLiteral(v) if *v > 0.0 => StepSign::Negative,
                ExprKind::FloatLiteral(v) if *v < 0.0 => StepSign::Positive,
                _ => StepSign::Unknown,
            },
            _ => StepSign::Unknown,
        },
    }
}

/// When a range's step sign can't be determined at compile time, evaluate both the
/// ascending and descending comparisons and select between them at run time with a
/// `GE(step, 0)` predicate -- synthesised from `AndBool`/`OrBool`/`NotBool` since there
/// is no dedicated conditional-move opcode. The scratch registers this allocates stay
/// live until the loop's own scope exits: their values are dead as soon as `test` is
/// computed, but LIFO freeing can only reclaim the most recently allocated temp, and
/// this computation's natural allocation order doesn't end with the ones to free
/// first on top, so they're left for the enclosing scope's high-water-mark rewind.
fn compile_unknown_sign_test(
    fc: &mut FunctionCompiler,
    ty: &Type,
    inclusive: bool,
    var_reg: Register,
    limit_reg: Register,
    step_reg: Register,
) -> Register {
    let pos_test = fc.alloc_temp();
    fc.buf.append_instruction(typed_cmp_op(ty, inclusive), pos_test, var_reg, limit_reg);

    let neg_test = fc.alloc_temp();
    fc.buf.append_instruction(typed_cmp_op_desc(ty, inclusive), neg_test, var_reg, limit_reg);

    let zero_reg = fc.alloc_temp();
    fc.buf.set_synthetic_location();
    let zero_idx = fc.module.constants.borrow_mut().intern(zero_constant(ty));
    fc.buf.append_instruction_idx(typed_const_load_op(ty), zero_reg, zero_idx);

    let ge_step = fc.alloc_temp();
    fc.buf.append_instruction(typed_ge_op(ty), ge_step, step_reg, zero_reg);

    let not_ge = fc.alloc_temp();
    fc.buf.append_instruction(Op::NotBool, not_ge, ge_step, 0);

    let and_pos = fc.alloc_temp();
    fc.buf.append_instruction(Op::AndBool, and_pos, ge_step, pos_test);

    let and_neg = fc.alloc_temp();
    fc.buf.append_instruction(Op::AndBool, and_neg, not_ge, neg_test);

    let test = fc.alloc_temp();
    fc.buf.append_instruction(Op::OrBool, test, and_pos, and_neg);
    test
}

fn compile_for_range(fc: &mut FunctionCompiler, range_loop: &RangeLoop) {
    fc.cf.enter_loop();
    let mark = fc.ra.enter_scope();
    fc.scopes.enter_scope(mark);

    let var_reg = fc.alloc_local();
    compile_expr_to(fc, &range_loop.start, var_reg);
    fc.scopes.declare(&range_loop.var_name, var_reg, true);
    let limit_reg = fc.alloc_local();
    compile_expr_to(fc, &range_loop.end, limit_reg);

    let fast_path = range_loop.var_ty == Type::I32 && step_is_literal_one(range_loop.step.as_ref());

    if fast_path {
        if range_loop.inclusive {
            // synthesise `limit := end + 1` so the fused fast path's strict `<` test
            // still covers the inclusive endpoint.
            fc.buf.set_synthetic_location();
            fc.buf.append_instruction(Op::IncI32, limit_reg, 0, 0);
        }

        let loop_top = fc.buf.current_offset();
        let test = fc.alloc_temp();
        fc.buf.append_instruction(Op::LtI32, test, var_reg, limit_reg);
        let exit_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, test, true);
        fc.ra.free_temp(test);
        let _ = fc.cf.record_break(exit_patch);

        compile_block(fc, &range_loop.body);

        let inc_site = fc.buf.current_offset();
        fc.update_continue(inc_site);
        let r = crate::control_flow::emit_inc_cmp_jmp(&mut fc.buf, var_reg, limit_reg, loop_top);
        fc.checked_patch(r);
        fc.leave_loop();
    } else {
        let step_reg = fc.alloc_local();
        match &range_loop.step {
            Some(e) => compile_expr_to(fc, e, step_reg),
            None => {
                fc.buf.set_synthetic_location();
                let idx = fc.module.constants.borrow_mut().intern(one_constant(&range_loop.var_ty));
                fc.buf.append_instruction_idx(typed_const_load_op(&range_loop.var_ty), step_reg, idx);
            }
        }

        let sign = classify_step(range_loop.step.as_ref());

        let loop_top = fc.buf.current_offset();
        let test = match sign {
            StepSign::Positive => {
                let test = fc.alloc_temp();
                let cmp_op = typed_cmp_op(&range_loop.var_ty, range_loop.inclusive);
                fc.buf.append_instruction(cmp_op, test, var_reg, limit_reg);
                test
            }
            StepSign::Negative => {
                let test = fc.alloc_temp();
                let cmp_op = typed_cmp_op_desc(&range_loop.var_ty, range_loop.inclusive);
                fc.buf.append_instruction(cmp_op, test, var_reg, limit_reg);
                test
            }
            StepSign::Unknown => {
                compile_unknown_sign_test(fc, &range_loop.var_ty, range_loop.inclusive, var_reg, limit_reg, step_reg)
            }
        };
        let exit_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, test, true);
        fc.ra.free_temp(test);
        let _ = fc.cf.record_break(exit_patch);

        compile_block(fc, &range_loop.body);

        let inc_site = fc.buf.current_offset();
        fc.update_continue(inc_site);
        let add_op = typed_add_op(&range_loop.var_ty);
        fc.buf.append_instruction(add_op, var_reg, var_reg, step_reg);
        fc.emit_backward_jump(loop_top);
        fc.leave_loop();
    }

    close_block_scope(fc);
}

fn compile_for_iter(fc: &mut FunctionCompiler, for_iter: &ForIter) {
    fc.cf.enter_loop();
    let mark = fc.ra.enter_scope();
    fc.scopes.enter_scope(mark);

    let (container_reg, container_temp) = compile_expr(fc, &for_iter.iterable);
    let iter_reg = fc.alloc_local();
    fc.buf.append_instruction(Op::GetIterR, iter_reg, container_reg, 0);
    if container_temp {
        fc.ra.free_temp(container_reg);
    }

    let var_reg = fc.alloc_local();
    fc.scopes.declare(&for_iter.var_name, var_reg, false);

    let loop_top = fc.buf.current_offset();
    let has_next = fc.alloc_temp();
    // `IterNextR has_next, iter, value` -- writes the next element into `value` and
    // whether one existed into `has_next`, both in the same instruction.
    fc.buf.append_instruction(Op::IterNextR, has_next, iter_reg, var_reg);
    let exit_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, has_next, true);
    fc.ra.free_temp(has_next);
    let _ = fc.cf.record_break(exit_patch);

    compile_block(fc, &for_iter.body);

    let cont_site = fc.buf.current_offset();
    fc.update_continue(cont_site);
    fc.emit_backward_jump(loop_top);
    fc.leave_loop();

    close_block_scope(fc);
}

/// `try`/`catch` lowers to `TryBegin` ... body ... `TryEnd`, then an unconditional
/// jump over the catch block for the no-throw path -- the VM transfers control
/// directly to the instruction after `TryEnd` when an exception unwinds into this
/// frame, landing on the catch block, so only the fall-through path needs the jump.
fn compile_try(fc: &mut FunctionCompiler, body: &[Stmt], catch_var: Option<&str>, catch_body: Option<&[Stmt]>) {
    fc.buf.append_instruction(Op::TryBegin, 0, 0, 0);
    compile_block(fc, body);
    fc.buf.append_instruction(Op::TryEnd, 0, 0, 0);

    let Some(catch_stmts) = catch_body else { return };

    let skip_patch = crate::control_flow::emit_jump(&mut fc.buf, true);

    let mark = fc.ra.enter_scope();
    fc.scopes.enter_scope(mark);
    if let Some(var) = catch_var {
        let reg = fc.alloc_local();
        fc.scopes.declare(var, reg, false);
        fc.buf.set_synthetic_location();
        fc.buf.append_instruction(Op::Move, reg, crate::regalloc::RETURN_REG, 0);
    }
    for stmt in catch_stmts {
        compile_stmt(fc, stmt);
    }
    close_block_scope(fc);

    let end = fc.buf.current_offset();
    let r = fc.buf.patch(skip_patch, end);
    fc.checked_patch(r);
}

fn compile_return(fc: &mut FunctionCompiler, value: Option<&crate::ast::Expr>) {
    match value {
        Some(e) => {
            compile_expr_to(fc, e, crate::regalloc::RETURN_REG);
            fc.buf.append_instruction(Op::ReturnR, 0, 0, 0);
        }
        None => {
            fc.buf.append_instruction(Op::ReturnVoid, 0, 0, 0);
        }
    }
    fc.mark_returned();
}

fn compile_import(fc: &mut FunctionCompiler, import: &crate::ast::Import) {
    match &import.kind {
        ImportKind::Named(items) => {
            for item in items {
                let alias = item.alias.clone().unwrap_or_else(|| item.symbol.clone());
                import_one(fc, &import.module, &item.symbol, &alias, &import.loc);
            }
        }
        ImportKind::All => {
            let exports = match fc.module.module_manager.find_module(&import.module) {
                Some(loaded) => loaded.exports().to_vec(),
                None => {
                    fc.report(
                        Diagnostic::new(DiagCode::ModuleNotFound, format!("module {:?} not found", import.module))
                            .at(import.loc.clone()),
                    );
                    return;
                }
            };
            for entry in &exports {
                import_one(fc, &import.module, &entry.name, &entry.name, &import.loc);
            }
        }
    }
}

fn import_one(fc: &mut FunctionCompiler, module: &str, symbol: &str, alias: &str, loc: &SourceLoc) {
    let entry = match fc.module.module_manager.resolve_export(module, symbol) {
        Some(e) => e,
        None => {
            fc.report(
                Diagnostic::new(DiagCode::ExportNotFound, format!("{:?} exports no symbol named {:?}", module, symbol))
                    .at(loc.clone()),
            );
            return;
        }
    };
    let kind = entry.kind;
    let ty = entry.ty.clone();
    let exporter_register = entry.register;

    fc.module
        .linker
        .borrow_mut()
        .finalize_import_symbol(&mut fc.scopes, module, symbol, alias, kind, &ty, exporter_register);
}

fn compile_function_decl(fc: &mut FunctionCompiler, decl: &crate::ast::FunctionDecl) {
    match fc.compile_nested_function(decl) {
        Ok(index) => {
            if decl.is_public && fc.is_module_init() {
                let mut linker = fc.module.linker.borrow_mut();
                linker.record_export(decl.name.clone(), ExportKind::Function, decl.return_ty.clone());
                linker.set_export_metadata(&decl.name, index as Register, decl.return_ty.clone());
            }
        }
        Err(diag) => fc.report(diag),
    }
}

fn compile_struct_decl(fc: &mut FunctionCompiler, decl: &crate::ast::StructDecl) {
    if decl.is_public && fc.is_module_init() {
        let mut linker = fc.module.linker.borrow_mut();
        let struct_ty = Type::Struct(std::rc::Rc::new(crate::types::StructType {
            name: decl.name.clone(),
            fields: decl.fields.clone(),
        }));
        linker.record_export(decl.name.clone(), ExportKind::Struct, struct_ty.clone());
        linker.set_export_metadata(&decl.name, 0, struct_ty);
    }
}

fn compile_enum_decl(fc: &mut FunctionCompiler, decl: &crate::ast::EnumDecl) {
    let variants: Vec<EnumVariant> = decl
        .variants
        .iter()
        .map(|v: &EnumVariantDecl| EnumVariant { name: v.name.clone(), payload: v.payload.clone() })
        .collect();
    let enum_ty = std::rc::Rc::new(EnumType { name: decl.name.clone(), variants });
    fc.module.enum_types.borrow_mut().insert(decl.name.clone(), enum_ty.clone());

    if decl.is_public && fc.is_module_init() {
        let mut linker = fc.module.linker.borrow_mut();
        let ty = Type::Enum(enum_ty);
        linker.record_export(decl.name.clone(), ExportKind::Enum, ty.clone());
        linker.set_export_metadata(&decl.name, 0, ty);
    }
}

fn compile_impl(fc: &mut FunctionCompiler, impl_block: &crate::ast::ImplBlock) {
    for method in &impl_block.methods {
        let mut decl = method.clone();
        decl.owner_struct = Some(impl_block.struct_name.clone());
        compile_function_decl(fc, &decl);
    }
}
