//! C6: expression lowering. Walks one typed `Expr` node and emits the instructions
//! that leave its value in some register, returning that register plus whether it is
//! a temp the caller must free. Grounded in the teacher's `compile_apply`/
//! `compile_eval` dispatch in `compiler.rs`, generalised from an s-expression's single
//! recursive `eval` shape to the typed-opcode-family selection, struct/enum/array
//! runtime representations and module-aware call resolution spec.md §4 describes.

use crate::ast::{Expr, ExprKind, MatchArm, Pattern, UnOp};
use crate::constant::Constant;
use crate::diagnostics::{DiagCode, Diagnostic};
use crate::lower::function::FunctionCompiler;
use crate::opcode::{Op, Register};
use crate::types::Type;

/// Compile `expr`, returning the register holding its value and whether that
/// register is a temp the caller owns and must eventually free (in LIFO order with
/// any other temps it allocated around this call).
pub(crate) fn compile_expr(fc: &mut FunctionCompiler, expr: &Expr) -> (Register, bool) {
    match &expr.kind {
        ExprKind::IntLiteral(v, kind) => compile_int_literal(fc, *v, *kind),
        ExprKind::FloatLiteral(v) => {
            let dest = fc.alloc_temp();
            let idx = fc.module.constants.borrow_mut().intern(Constant::f64(*v));
            fc.buf.append_instruction_idx(Op::LoadF64Const, dest, idx);
            (dest, true)
        }
        ExprKind::BoolLiteral(b) => {
            let dest = fc.alloc_temp();
            let op = if *b { Op::LoadTrue } else { Op::LoadFalse };
            fc.buf.append_instruction(op, dest, 0, 0);
            (dest, true)
        }
        ExprKind::StringLiteral(s) => {
            let dest = fc.alloc_temp();
            let idx = fc.module.constants.borrow_mut().intern(Constant::Str(s.clone()));
            fc.buf.append_instruction_idx(Op::LoadConst, dest, idx);
            (dest, true)
        }
        ExprKind::Identifier(name) => compile_identifier(fc, name, &expr.loc),
        ExprKind::ArrayLiteral(elems) => compile_array_literal(fc, elems),
        ExprKind::ArrayFill { value, count } => compile_array_fill(fc, value, count),
        ExprKind::StructLiteral { type_name, fields } => compile_struct_literal(fc, expr, type_name, fields),
        ExprKind::EnumConstruct { type_name, variant, args } => {
            compile_enum_construct(fc, expr, type_name, variant, args)
        }
        ExprKind::Index { container, index } => compile_index(fc, container, index),
        ExprKind::Slice { array, start, end } => compile_slice(fc, array, start.as_deref(), end.as_deref()),
        ExprKind::Binary { op, lhs, rhs } => compile_binary(fc, &expr.loc, *op, lhs, rhs),
        ExprKind::Unary { op, operand } => compile_unary(fc, *op, operand),
        ExprKind::Cast { expr: inner, target } => compile_cast(fc, inner, target),
        ExprKind::Member { base, name } => compile_member(fc, expr, base, name),
        ExprKind::Call { callee, args, is_method } => compile_call(fc, &expr.loc, callee, args, *is_method),
        ExprKind::Builtin { name, args } => compile_builtin(fc, &expr.loc, name, args),
        ExprKind::Match { subject, arms } => compile_match(fc, subject, arms),
    }
}

/// Compile `expr` then land its value in exactly `dest` (moving if necessary),
/// freeing any temp the compile produced.
pub(crate) fn compile_expr_to(fc: &mut FunctionCompiler, expr: &Expr, dest: Register) {
    let (reg, is_temp) = compile_expr(fc, expr);
    if reg != dest {
        fc.buf.append_instruction(Op::Move, dest, reg, 0);
    }
    if is_temp {
        fc.ra.free_temp(reg);
    }
}

/// Compile `expr`, guaranteeing the result is in a temp register the caller owns --
/// copying a local's value out first if necessary. Used wherever a later compile step
/// (another arm's test, a loop body) might otherwise clobber a bare local reference.
pub(crate) fn compile_expr_into_temp(fc: &mut FunctionCompiler, expr: &Expr) -> Register {
    let (reg, is_temp) = compile_expr(fc, expr);
    if is_temp {
        return reg;
    }
    let t = fc.alloc_temp();
    fc.buf.append_instruction(Op::Move, t, reg, 0);
    t
}

fn compile_int_literal(fc: &mut FunctionCompiler, v: i64, kind: crate::ast::IntKind) -> (Register, bool) {
    use crate::ast::IntKind::*;
    let dest = fc.alloc_temp();
    let (op, constant) = match kind {
        I32 => (Op::LoadI32Const, Constant::I32(v as i32)),
        I64 => (Op::LoadI64Const, Constant::I64(v)),
        U32 => (Op::LoadU32Const, Constant::U32(v as u32)),
        U64 => (Op::LoadU64Const, Constant::U64(v as u64)),
    };
    let idx = fc.module.constants.borrow_mut().intern(constant);
    fc.buf.append_instruction_idx(op, dest, idx);
    (dest, true)
}

fn compile_identifier(fc: &mut FunctionCompiler, name: &str, loc: &crate::diagnostics::SourceLoc) -> (Register, bool) {
    use crate::scope::Binding;
    match fc.scopes.resolve(name) {
        Some(Binding::Local(r)) => (r, false),
        Some(Binding::Upvalue(idx)) => {
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::GetUpvalueR, dest, idx, 0);
            (dest, true)
        }
        None => {
            fc.report(
                Diagnostic::new(DiagCode::UndefinedVariable, format!("undefined variable {:?}", name))
                    .at(loc.clone()),
            );
            (0, false)
        }
    }
}

fn free_in_order(fc: &mut FunctionCompiler, regs: &[(Register, bool)]) {
    for (reg, is_temp) in regs.iter().rev() {
        if *is_temp {
            fc.ra.free_temp(*reg);
        }
    }
}

fn compile_array_literal(fc: &mut FunctionCompiler, elems: &[Expr]) -> (Register, bool) {
    if elems.is_empty() {
        let dest = fc.alloc_temp();
        fc.buf.append_instruction(Op::MakeArrayR, dest, dest, 0);
        return (dest, true);
    }
    let base = fc.alloc_consecutive_temps(elems.len());
    for (i, e) in elems.iter().enumerate() {
        compile_expr_to(fc, e, base + i as Register);
    }
    fc.buf.append_instruction(Op::MakeArrayR, base, base, elems.len() as Register);
    for i in (1..elems.len()).rev() {
        fc.ra.free_temp(base + i as Register);
    }
    (base, true)
}

/// `[value; count]` has no dedicated opcode, so it lowers to a synthesised counting
/// loop that pushes `value` `count` times -- the same shape a hand-written range loop
/// would compile to, just emitted directly rather than going through `lower::stmt`.
fn compile_array_fill(fc: &mut FunctionCompiler, value: &Expr, count: &Expr) -> (Register, bool) {
    let dest = fc.alloc_temp();
    fc.buf.append_instruction(Op::MakeArrayR, dest, dest, 0);

    let val_reg = fc.alloc_local();
    compile_expr_to(fc, value, val_reg);
    let count_reg = fc.alloc_local();
    compile_expr_to(fc, count, count_reg);
    let idx_reg = fc.alloc_local();

    fc.buf.set_synthetic_location();
    let zero_idx = fc.module.constants.borrow_mut().intern(Constant::I32(0));
    fc.buf.append_instruction_idx(Op::LoadI32Const, idx_reg, zero_idx);

    let loop_top = fc.buf.current_offset();
    let test_reg = fc.alloc_temp();
    fc.buf.append_instruction(Op::LtI32, test_reg, idx_reg, count_reg);
    let exit_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, test_reg, true);
    fc.ra.free_temp(test_reg);

    fc.buf.append_instruction(Op::ArrayPushR, dest, dest, val_reg);
    fc.buf.append_instruction(Op::IncI32, idx_reg, 0, 0);
    fc.emit_backward_jump(loop_top);

    let end = fc.buf.current_offset();
    let patch_result = fc.buf.patch(exit_patch, end);
    fc.checked_patch(patch_result);

    (dest, true)
}

fn compile_struct_literal(
    fc: &mut FunctionCompiler,
    expr: &Expr,
    type_name: &str,
    fields: &[crate::ast::StructFieldInit],
) -> (Register, bool) {
    let st = match expr.ty.base() {
        Type::Struct(st) => st.clone(),
        _ => {
            fc.report(
                Diagnostic::new(
                    DiagCode::MalformedTypedAst,
                    format!("struct literal {:?} has no resolved struct type", type_name),
                )
                .at(expr.loc.clone()),
            );
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::MakeArrayR, dest, dest, 0);
            return (dest, true);
        }
    };

    let field_count = st.fields.len();
    if field_count == 0 {
        let dest = fc.alloc_temp();
        fc.buf.append_instruction(Op::MakeArrayR, dest, dest, 0);
        return (dest, true);
    }

    let base = fc.alloc_consecutive_temps(field_count);
    for init in fields {
        match st.field_index(&init.name) {
            Some(idx) => compile_expr_to(fc, &init.value, base + idx as Register),
            None => fc.report(
                Diagnostic::new(
                    DiagCode::UnknownStructField,
                    format!("{} has no field named {:?}", st.name, init.name),
                )
                .at(init.value.loc.clone()),
            ),
        }
    }
    fc.buf.append_instruction(Op::MakeArrayR, base, base, field_count as Register);
    for i in (1..field_count).rev() {
        fc.ra.free_temp(base + i as Register);
    }
    (base, true)
}

fn compile_enum_construct(
    fc: &mut FunctionCompiler,
    expr: &Expr,
    type_name: &str,
    variant: &str,
    args: &[Expr],
) -> (Register, bool) {
    let et = match expr.ty.base() {
        Type::Enum(et) => et.clone(),
        _ => {
            fc.report(
                Diagnostic::new(
                    DiagCode::MalformedTypedAst,
                    format!("enum constructor {:?} has no resolved enum type", type_name),
                )
                .at(expr.loc.clone()),
            );
            return (fc.alloc_temp(), true);
        }
    };

    let tag = match et.variant_index(variant) {
        Some(tag) => tag,
        None => {
            fc.report(
                Diagnostic::new(
                    DiagCode::EnumArityMismatch,
                    format!("{} has no variant named {:?}", et.name, variant),
                )
                .at(expr.loc.clone()),
            );
            return (fc.alloc_temp(), true);
        }
    };

    if let Some(v) = et.variant(variant) {
        if v.payload.len() != args.len() {
            fc.report(
                Diagnostic::new(
                    DiagCode::EnumArityMismatch,
                    format!(
                        "{}.{} takes {} argument(s), found {}",
                        et.name,
                        variant,
                        v.payload.len(),
                        args.len()
                    ),
                )
                .at(expr.loc.clone()),
            );
        }
    }

    let base = if args.is_empty() { fc.alloc_temp() } else { fc.alloc_consecutive_temps(args.len()) };
    for (i, a) in args.iter().enumerate() {
        compile_expr_to(fc, a, base + i as Register);
    }
    let dest = fc.alloc_temp();
    fc.buf.append_instruction4(Op::EnumNewR, dest, tag as Register, base, args.len() as Register);

    let free_from = if args.is_empty() { 1 } else { args.len() };
    for i in (0..free_from).rev() {
        fc.ra.free_temp(base + i as Register);
    }
    (dest, true)
}

fn compile_index(fc: &mut FunctionCompiler, container: &Expr, index: &Expr) -> (Register, bool) {
    let c = compile_expr(fc, container);
    let i = compile_expr(fc, index);
    let dest = fc.alloc_temp();
    let op = if container.ty.is_string() { Op::StringIndexR } else { Op::ArrayGetR };
    fc.buf.append_instruction(op, dest, c.0, i.0);
    free_in_order(fc, &[c, i]);
    (dest, true)
}

fn compile_slice(fc: &mut FunctionCompiler, array: &Expr, start: Option<&Expr>, end: Option<&Expr>) -> (Register, bool) {
    let arr = compile_expr(fc, array);

    let start_reg = match start {
        Some(e) => compile_expr_into_temp(fc, e),
        None => {
            let t = fc.alloc_temp();
            fc.buf.set_synthetic_location();
            let idx = fc.module.constants.borrow_mut().intern(Constant::I32(0));
            fc.buf.append_instruction_idx(Op::LoadI32Const, t, idx);
            t
        }
    };
    let end_reg = match end {
        Some(e) => compile_expr_into_temp(fc, e),
        None => {
            let t = fc.alloc_temp();
            fc.buf.append_instruction(Op::ArrayLenR, t, arr.0, 0);
            t
        }
    };

    let dest = fc.alloc_temp();
    fc.buf.append_instruction4(Op::ArraySliceR, dest, arr.0, start_reg, end_reg);
    fc.ra.free_temp(end_reg);
    fc.ra.free_temp(start_reg);
    free_in_order(fc, &[arr]);
    (dest, true)
}

fn compile_binary(
    fc: &mut FunctionCompiler,
    loc: &crate::diagnostics::SourceLoc,
    op: crate::ast::BinOp,
    lhs: &Expr,
    rhs: &Expr,
) -> (Register, bool) {
    let l = compile_expr(fc, lhs);
    let r = compile_expr(fc, rhs);

    match crate::binop::plan_binop(loc, op, lhs, rhs, fc.module.options.void_as_i64_workaround) {
        Ok(plan) => {
            let dest = fc.alloc_temp();
            let (_, diag) = crate::binop::emit_binop(&mut fc.buf, &mut fc.ra, &plan, l.0, l.1, r.0, r.1, dest);
            if let Some(diag) = diag {
                fc.report(diag.at(loc.clone()));
            }
            free_in_order(fc, &[l, r]);
            (dest, true)
        }
        Err(diag) => {
            fc.report(diag);
            let dest = if l.1 { l.0 } else { fc.alloc_temp() };
            if !l.1 {
                fc.buf.append_instruction(Op::Move, dest, l.0, 0);
            }
            if r.1 {
                fc.ra.free_temp(r.0);
            }
            (dest, true)
        }
    }
}

fn compile_unary(fc: &mut FunctionCompiler, op: UnOp, operand: &Expr) -> (Register, bool) {
    let (reg, is_temp) = compile_expr(fc, operand);
    let dest = if is_temp { reg } else { fc.alloc_temp() };
    match op {
        UnOp::Neg => {
            let ty = crate::binop::resolved_operand_type(operand);
            let vm_op = match ty.base() {
                Type::I32 => Op::NegI32,
                Type::I64 => Op::NegI64,
                Type::F64 => Op::NegF64,
                other => {
                    fc.report(
                        Diagnostic::new(DiagCode::UnsupportedCast, format!("cannot negate a value of type {:?}", other))
                            .at(operand.loc.clone()),
                    );
                    Op::NegI32
                }
            };
            fc.buf.append_instruction(vm_op, dest, reg, 0);
        }
        UnOp::Not => {
            fc.buf.append_instruction(Op::NotBool, dest, reg, 0);
        }
    }
    (dest, true)
}

fn compile_cast(fc: &mut FunctionCompiler, inner: &Expr, target: &Type) -> (Register, bool) {
    let (reg, is_temp) = compile_expr(fc, inner);
    let from = crate::binop::resolved_operand_type(inner);
    if &from == target {
        return (reg, is_temp);
    }
    match crate::binop::cast_op(&from, target) {
        Some(op) => {
            let dest = if is_temp { reg } else { fc.alloc_temp() };
            fc.buf.append_instruction(op, dest, reg, 0);
            (dest, true)
        }
        None => {
            fc.report(
                Diagnostic::new(DiagCode::UnsupportedCast, format!("cannot cast {:?} to {:?}", from, target))
                    .at(inner.loc.clone()),
            );
            (reg, is_temp)
        }
    }
}

/// Struct field access lowers to `ARRAY_GET_R` at the field's constant-order index
/// (structs are boxed arrays, see DESIGN.md) -- this is the only surviving use of
/// `Member`, since named imports bind directly into scope at import time (see
/// `lower::stmt::compile_import`) rather than needing namespace-qualified access.
fn compile_member(fc: &mut FunctionCompiler, expr: &Expr, base: &Expr, name: &str) -> (Register, bool) {
    let st = match base.ty.base() {
        Type::Struct(st) => st.clone(),
        _ => {
            fc.report(
                Diagnostic::new(
                    DiagCode::MalformedTypedAst,
                    format!("member access {:?} on a non-struct-typed expression", name),
                )
                .at(expr.loc.clone()),
            );
            return (fc.alloc_temp(), true);
        }
    };
    let idx = match st.field_index(name) {
        Some(idx) => idx,
        None => {
            fc.report(
                Diagnostic::new(DiagCode::UnknownStructField, format!("{} has no field named {:?}", st.name, name))
                    .at(expr.loc.clone()),
            );
            return (fc.alloc_temp(), true);
        }
    };
    let (b_reg, b_temp) = compile_expr(fc, base);
    let dest = fc.alloc_temp();
    fc.buf.append_instruction(Op::ArrayGetR, dest, b_reg, idx as Register);
    if b_temp {
        fc.ra.free_temp(b_reg);
    }
    (dest, true)
}

/// Resolve the callee to a function-table index: a plain name, or a static
/// `Type.method` path (`Member` with `is_method == false`, the checker's signal that
/// `base` names a type rather than a value).
fn resolve_callee_name(fc: &FunctionCompiler, loc: &crate::diagnostics::SourceLoc, callee: &Expr) -> Option<String> {
    match &callee.kind {
        ExprKind::Identifier(name) => Some(name.clone()),
        ExprKind::Member { base, name } => match &base.kind {
            ExprKind::Identifier(type_name) => Some(format!("{}.{}", type_name, name)),
            _ => {
                fc.report(
                    Diagnostic::new(DiagCode::MalformedTypedAst, "unsupported static call path".to_string())
                        .at(loc.clone()),
                );
                None
            }
        },
        _ => {
            fc.report(
                Diagnostic::new(DiagCode::MalformedTypedAst, "unsupported callee expression".to_string())
                    .at(loc.clone()),
            );
            None
        }
    }
}

/// A resolved callee: either a function-table index (a plain top-level function or a
/// static/instance method, looked up by its possibly-mangled name) or a register
/// already holding a callable value (an imported function or a closure bound to a
/// local/upvalue -- both bind through `Scopes` exactly like any other variable, see
/// `lower::stmt::compile_import`).
enum Callee {
    Indexed(String),
    InRegister(Register, bool),
}

fn compile_call(
    fc: &mut FunctionCompiler,
    loc: &crate::diagnostics::SourceLoc,
    callee: &Expr,
    args: &[Expr],
    is_method: bool,
) -> (Register, bool) {
    let (resolved, base_reg, total_args, arg_start) = if is_method {
        let (recv, method_name) = match &callee.kind {
            ExprKind::Member { base, name } => (base.as_ref(), name.clone()),
            _ => {
                fc.report(
                    Diagnostic::new(DiagCode::MalformedTypedAst, "method call without a receiver".to_string())
                        .at(loc.clone()),
                );
                return (0, false);
            }
        };
        let struct_name = match recv.ty.base() {
            Type::Struct(st) => st.name.clone(),
            other => {
                fc.report(
                    Diagnostic::new(
                        DiagCode::MalformedTypedAst,
                        format!("method call on a non-struct-typed receiver ({:?})", other),
                    )
                    .at(loc.clone()),
                );
                return (0, false);
            }
        };
        let total = args.len() + 1;
        let base = fc.alloc_consecutive_temps(total);
        compile_expr_to(fc, recv, base);
        (Callee::Indexed(format!("{}.{}", struct_name, method_name)), base, total, 1)
    } else if let ExprKind::Identifier(name) = &callee.kind {
        // a plain-name callee might be a local/upvalue binding (an imported function,
        // or a closure stored in a variable) rather than this module's own top-level
        // function table -- scope resolution takes priority, same as `compile_identifier`.
        use crate::scope::Binding;
        let in_scope = fc.scopes.resolve(name);
        let resolved = match in_scope {
            Some(Binding::Local(r)) => Some(Callee::InRegister(r, false)),
            Some(Binding::Upvalue(idx)) => {
                let t = fc.alloc_temp();
                fc.buf.append_instruction(Op::GetUpvalueR, t, idx, 0);
                Some(Callee::InRegister(t, true))
            }
            None => None,
        };
        let resolved = resolved.unwrap_or_else(|| Callee::Indexed(name.clone()));
        let total = args.len();
        let base = if total == 0 { fc.alloc_temp() } else { fc.alloc_consecutive_temps(total) };
        (resolved, base, total, 0)
    } else {
        let name = match resolve_callee_name(fc, loc, callee) {
            Some(n) => n,
            None => return (0, false),
        };
        let total = args.len();
        let base = if total == 0 { fc.alloc_temp() } else { fc.alloc_consecutive_temps(total) };
        (Callee::Indexed(name), base, total, 0)
    };

    for (i, a) in args.iter().enumerate() {
        compile_expr_to(fc, a, base_reg + arg_start + i as Register);
    }

    let result = match resolved {
        Callee::InRegister(fn_reg, fn_is_temp) => {
            let dest = fc.alloc_temp();
            fc.buf.append_instruction4(Op::CallR, fn_reg, base_reg, total_args as Register, dest);
            if fn_is_temp {
                fc.ra.free_temp(fn_reg);
            }
            (dest, true)
        }
        Callee::Indexed(fn_name) => {
            let index = fc.module.function_index.borrow().get(&fn_name).copied();
            match index {
                Some(idx) => {
                    let fn_reg = fc.alloc_temp();
                    let cidx = fc.module.constants.borrow_mut().intern(Constant::Function(idx));
                    fc.buf.append_instruction_idx(Op::LoadConst, fn_reg, cidx);
                    let dest = fc.alloc_temp();
                    fc.buf.append_instruction4(Op::CallR, fn_reg, base_reg, total_args as Register, dest);
                    fc.ra.free_temp(fn_reg);
                    (dest, true)
                }
                None => {
                    fc.report(
                        Diagnostic::new(DiagCode::UndefinedVariable, format!("call to undefined function {:?}", fn_name))
                            .at(loc.clone()),
                    );
                    (0, false)
                }
            }
        }
    };

    let freed_count = if total_args == 0 { 1 } else { total_args };
    for i in (0..freed_count).rev() {
        fc.ra.free_temp(base_reg + i as Register);
    }
    result
}

fn type_from_keyword(s: &str) -> Option<Type> {
    Some(match s {
        "i32" => Type::I32,
        "i64" => Type::I64,
        "u32" => Type::U32,
        "u64" => Type::U64,
        "f64" => Type::F64,
        "bool" => Type::Bool,
        "str" => Type::Str,
        "array" => Type::Array(Box::new(Type::Any)),
        _ => return None,
    })
}

/// A compact internal tag identifying a runtime value's type, used by `typeof`/
/// `istype`. Not part of the VM's opcode encoding for anything else -- just an
/// immediate byte these two builtins agree on.
fn type_tag(ty: &Type) -> u8 {
    match ty.base() {
        Type::I32 => 0,
        Type::I64 => 1,
        Type::U32 => 2,
        Type::U64 => 3,
        Type::F64 => 4,
        Type::Bool => 5,
        Type::Str => 6,
        Type::Array(_) => 7,
        Type::Struct(_) => 8,
        Type::Enum(_) => 9,
        _ => 255,
    }
}

fn compile_builtin(fc: &mut FunctionCompiler, loc: &crate::diagnostics::SourceLoc, name: &str, args: &[Expr]) -> (Register, bool) {
    match name {
        "push" => {
            let arr = compile_expr(fc, &args[0]);
            let val = compile_expr(fc, &args[1]);
            fc.buf.append_instruction(Op::ArrayPushR, arr.0, arr.0, val.0);
            if val.1 {
                fc.ra.free_temp(val.0);
            }
            arr
        }
        "pop" => {
            let arr = compile_expr(fc, &args[0]);
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::ArrayPopR, dest, arr.0, 0);
            free_in_order(fc, &[arr]);
            (dest, true)
        }
        "len" => {
            let arr = compile_expr(fc, &args[0]);
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::ArrayLenR, dest, arr.0, 0);
            free_in_order(fc, &[arr]);
            (dest, true)
        }
        "sorted" => {
            let arr = compile_expr(fc, &args[0]);
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::ArraySortedR, dest, arr.0, 0);
            free_in_order(fc, &[arr]);
            (dest, true)
        }
        "range" => {
            let (start_reg, start_temp, end) = if args.len() == 1 {
                let t = fc.alloc_temp();
                fc.buf.set_synthetic_location();
                let idx = fc.module.constants.borrow_mut().intern(Constant::I32(0));
                fc.buf.append_instruction_idx(Op::LoadI32Const, t, idx);
                (t, true, compile_expr(fc, &args[0]))
            } else {
                let s = compile_expr(fc, &args[0]);
                (s.0, s.1, compile_expr(fc, &args[1]))
            };
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::RangeR, dest, start_reg, end.0);
            free_in_order(fc, &[end]);
            if start_temp {
                fc.ra.free_temp(start_reg);
            }
            (dest, true)
        }
        "input" => {
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::InputR, dest, 0, 0);
            (dest, true)
        }
        "int" => {
            let (reg, is_temp) = compile_expr(fc, &args[0]);
            let dest = if is_temp { reg } else { fc.alloc_temp() };
            fc.buf.append_instruction(Op::ParseIntR, dest, reg, 0);
            (dest, true)
        }
        "float" => {
            let (reg, is_temp) = compile_expr(fc, &args[0]);
            let dest = if is_temp { reg } else { fc.alloc_temp() };
            fc.buf.append_instruction(Op::ParseFloatR, dest, reg, 0);
            (dest, true)
        }
        "typeof" => {
            let arg = compile_expr(fc, &args[0]);
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::TypeOfR, dest, arg.0, 0);
            free_in_order(fc, &[arg]);
            (dest, true)
        }
        "istype" => {
            let arg = compile_expr(fc, &args[0]);
            let tag = match &args[1].kind {
                ExprKind::StringLiteral(s) => match type_from_keyword(s) {
                    Some(ty) => type_tag(&ty),
                    None => {
                        fc.report(
                            Diagnostic::new(DiagCode::MalformedTypedAst, format!("unknown type keyword {:?}", s))
                                .at(args[1].loc.clone()),
                        );
                        255
                    }
                },
                _ => {
                    fc.report(
                        Diagnostic::new(DiagCode::MalformedTypedAst, "istype's second argument must be a type name string literal".to_string())
                            .at(args[1].loc.clone()),
                    );
                    255
                }
            };
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::IsTypeR, dest, arg.0, tag);
            free_in_order(fc, &[arg]);
            (dest, true)
        }
        "assert_eq" => {
            let a = compile_expr(fc, &args[0]);
            let b = compile_expr(fc, &args[1]);
            let dest = fc.alloc_temp();
            fc.buf.append_instruction(Op::AssertEqR, dest, a.0, b.0);
            free_in_order(fc, &[a, b]);
            (dest, true)
        }
        other => {
            fc.report(Diagnostic::new(DiagCode::MalformedTypedAst, format!("unknown builtin {:?}", other)).at(loc.clone()));
            (fc.alloc_temp(), true)
        }
    }
}

fn compile_pattern_test(fc: &mut FunctionCompiler, subj_reg: Register, pattern: &Pattern, loc: &crate::diagnostics::SourceLoc) -> Register {
    match pattern {
        Pattern::IntLiteral(v) => {
            let lit = fc.alloc_temp();
            fc.buf.set_synthetic_location();
            let idx = fc.module.constants.borrow_mut().intern(Constant::I32(*v as i32));
            fc.buf.append_instruction_idx(Op::LoadI32Const, lit, idx);
            let test = fc.alloc_temp();
            fc.buf.append_instruction(Op::Eq, test, subj_reg, lit);
            fc.ra.free_temp(lit);
            test
        }
        Pattern::BoolLiteral(b) => {
            let lit = fc.alloc_temp();
            let op = if *b { Op::LoadTrue } else { Op::LoadFalse };
            fc.buf.append_instruction(op, lit, 0, 0);
            let test = fc.alloc_temp();
            fc.buf.append_instruction(Op::Eq, test, subj_reg, lit);
            fc.ra.free_temp(lit);
            test
        }
        Pattern::StringLiteral(s) => {
            let lit = fc.alloc_temp();
            let idx = fc.module.constants.borrow_mut().intern(Constant::Str(s.clone()));
            fc.buf.append_instruction_idx(Op::LoadConst, lit, idx);
            let test = fc.alloc_temp();
            fc.buf.append_instruction(Op::Eq, test, subj_reg, lit);
            fc.ra.free_temp(lit);
            test
        }
        Pattern::EnumVariant { enum_type, variant } => {
            let tag = fc
                .module
                .enum_types
                .borrow()
                .get(enum_type.as_ref())
                .and_then(|et| et.variant_index(variant));
            let tag = match tag {
                Some(t) => t,
                None => {
                    fc.report(
                        Diagnostic::new(
                            DiagCode::MalformedTypedAst,
                            format!("unknown enum variant {}.{}", enum_type, variant),
                        )
                        .at(loc.clone()),
                    );
                    0
                }
            };
            let test = fc.alloc_temp();
            fc.buf.append_instruction(Op::EnumTagEqR, test, subj_reg, tag as Register);
            test
        }
    }
}

/// Release a match arm's binding scope (the payload registers `EnumPayloadR` wrote, or
/// the catch-all binding), mirroring `lower::stmt::close_block_scope` -- duplicated
/// rather than imported since that helper is private to its module.
fn close_arm_scope(fc: &mut FunctionCompiler) {
    let (mark, closed) = fc.scopes.leave_scope();
    for reg in closed {
        fc.buf.append_instruction(Op::CloseUpvalues, reg, 0, 0);
    }
    fc.ra.exit_scope(mark);
}

fn compile_match(fc: &mut FunctionCompiler, subject: &Expr, arms: &[MatchArm]) -> (Register, bool) {
    let subj_reg = compile_expr_into_temp(fc, subject);
    let result_reg = fc.alloc_temp();
    let mut end_patches = Vec::new();
    let mut seen: Vec<Pattern> = Vec::new();

    for (i, arm) in arms.iter().enumerate() {
        let is_last = i == arms.len() - 1;
        match &arm.pattern {
            None => {
                let mark = fc.ra.enter_scope();
                fc.scopes.enter_scope(mark);
                if let Some(name) = arm.bindings.first() {
                    fc.scopes.declare(name, subj_reg, false);
                }
                compile_expr_to(fc, &arm.body, result_reg);
                close_arm_scope(fc);
                if !is_last {
                    end_patches.push(crate::control_flow::emit_jump(&mut fc.buf, true));
                }
            }
            Some(pattern) => {
                if seen.iter().any(|p| p == pattern) {
                    fc.report(
                        Diagnostic::new(DiagCode::DuplicateMatchArm, format!("duplicate match arm {:?}", pattern))
                            .at(arm.loc.clone()),
                    );
                }
                seen.push(pattern.clone());

                let test_reg = compile_pattern_test(fc, subj_reg, pattern, &arm.loc);
                let skip_patch = crate::control_flow::emit_jump_if_not(&mut fc.buf, test_reg, true);
                fc.ra.free_temp(test_reg);

                let mark = fc.ra.enter_scope();
                fc.scopes.enter_scope(mark);
                if matches!(pattern, Pattern::EnumVariant { .. }) {
                    for (idx, bname) in arm.bindings.iter().enumerate() {
                        let reg = fc.alloc_local();
                        fc.buf.append_instruction(Op::EnumPayloadR, reg, subj_reg, idx as Register);
                        fc.scopes.declare(bname, reg, false);
                    }
                }
                compile_expr_to(fc, &arm.body, result_reg);
                close_arm_scope(fc);

                if !is_last {
                    end_patches.push(crate::control_flow::emit_jump(&mut fc.buf, true));
                }

                let next_arm_start = fc.buf.current_offset();
                let patch_result = fc.buf.patch(skip_patch, next_arm_start);
                fc.checked_patch(patch_result);
            }
        }
    }

    let end = fc.buf.current_offset();
    for patch in end_patches {
        let patch_result = fc.buf.patch(patch, end);
        fc.checked_patch(patch_result);
    }

    fc.ra.free_temp(subj_reg);
    (result_reg, true)
}
