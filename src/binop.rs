//! C8: binary-operator selection and implicit numeric coercion. Grounded in the
//! teacher's per-form dispatch in `compile_apply` (`compiler.rs`) -- a match from
//! surface operator to opcode constructor -- generalised to additionally select among
//! five typed opcode families per spec.md §4.8 and insert the cast instructions the
//! promotion rules in `types.rs` call for.

use log::debug;

use crate::ast::{BinOp, Expr, ExprKind, IntKind};
use crate::bytecode::ByteCodeBuffer;
use crate::diagnostics::{DiagCode, Diagnostic, SourceLoc};
use crate::opcode::{Op, Register};
use crate::regalloc::RegisterAllocator;
use crate::types::Type;

/// The plan for lowering one binary expression: which opcode computes the result, and
/// which cast (if any) each operand needs first to reach the unified operand type.
pub struct BinOpPlan {
    pub op: Op,
    pub lhs_cast: Option<Op>,
    pub rhs_cast: Option<Op>,
    pub result_ty: Type,
}

/// Resolve an expression's operand type for arithmetic purposes, falling back to a
/// literal-shape guess (and logging the fallback) when the checker left the node
/// untyped -- spec.md §9 permits this degraded path rather than failing compilation
/// outright, since the checker is an external collaborator whose output this backend
/// must tolerate being incomplete.
pub fn resolved_operand_type(expr: &Expr) -> Type {
    if !matches!(expr.ty, Type::Unknown | Type::Error) {
        return expr.ty.clone();
    }

    let guessed = match &expr.kind {
        ExprKind::IntLiteral(_, IntKind::I32) => Type::I32,
        ExprKind::IntLiteral(_, IntKind::I64) => Type::I64,
        ExprKind::IntLiteral(_, IntKind::U32) => Type::U32,
        ExprKind::IntLiteral(_, IntKind::U64) => Type::U64,
        ExprKind::FloatLiteral(_) => Type::F64,
        ExprKind::BoolLiteral(_) => Type::Bool,
        ExprKind::StringLiteral(_) => Type::Str,
        _ => Type::I32,
    };
    debug!(
        "{:?}: operand type unresolved, falling back to {:?} guessed from literal shape",
        expr.loc, guessed
    );
    guessed
}

fn select_typed_op(op: BinOp, ty: &Type) -> Option<Op> {
    use BinOp::*;
    use Type::*;
    Some(match (op, ty) {
        (Add, I32) => Op::AddI32, (Sub, I32) => Op::SubI32, (Mul, I32) => Op::MulI32,
        (Div, I32) => Op::DivI32, (Mod, I32) => Op::ModI32,
        (Lt, I32) => Op::LtI32, (Gt, I32) => Op::GtI32, (Le, I32) => Op::LeI32, (Ge, I32) => Op::GeI32,

        (Add, I64) => Op::AddI64, (Sub, I64) => Op::SubI64, (Mul, I64) => Op::MulI64,
        (Div, I64) => Op::DivI64, (Mod, I64) => Op::ModI64,
        (Lt, I64) => Op::LtI64, (Gt, I64) => Op::GtI64, (Le, I64) => Op::LeI64, (Ge, I64) => Op::GeI64,

        (Add, U32) => Op::AddU32, (Sub, U32) => Op::SubU32, (Mul, U32) => Op::MulU32,
        (Div, U32) => Op::DivU32, (Mod, U32) => Op::ModU32,
        (Lt, U32) => Op::LtU32, (Gt, U32) => Op::GtU32, (Le, U32) => Op::LeU32, (Ge, U32) => Op::GeU32,

        (Add, U64) => Op::AddU64, (Sub, U64) => Op::SubU64, (Mul, U64) => Op::MulU64,
        (Div, U64) => Op::DivU64, (Mod, U64) => Op::ModU64,
        (Lt, U64) => Op::LtU64, (Gt, U64) => Op::GtU64, (Le, U64) => Op::LeU64, (Ge, U64) => Op::GeU64,

        (Add, F64) => Op::AddF64, (Sub, F64) => Op::SubF64, (Mul, F64) => Op::MulF64,
        (Div, F64) => Op::DivF64, (Mod, F64) => Op::ModF64,
        (Lt, F64) => Op::LtF64, (Gt, F64) => Op::GtF64, (Le, F64) => Op::LeF64, (Ge, F64) => Op::GeF64,

        _ => return None,
    })
}

pub(crate) fn cast_op(from: &Type, to: &Type) -> Option<Op> {
    use Type::*;
    Some(match (from, to) {
        (I32, I64) => Op::CastI32ToI64, (I32, U32) => Op::CastI32ToU32,
        (I32, U64) => Op::CastI32ToU64, (I32, F64) => Op::CastI32ToF64,
        (I64, I32) => Op::CastI64ToI32, (I64, U32) => Op::CastI64ToU32,
        (I64, U64) => Op::CastI64ToU64, (I64, F64) => Op::CastI64ToF64,
        (U32, I32) => Op::CastU32ToI32, (U32, I64) => Op::CastU32ToI64,
        (U32, U64) => Op::CastU32ToU64, (U32, F64) => Op::CastU32ToF64,
        (U64, I32) => Op::CastU64ToI32, (U64, I64) => Op::CastU64ToI64,
        (U64, U32) => Op::CastU64ToU32, (U64, F64) => Op::CastU64ToF64,
        (F64, I32) => Op::CastF64ToI32, (F64, I64) => Op::CastF64ToI64,
        (F64, U32) => Op::CastF64ToU32, (F64, U64) => Op::CastF64ToU64,
        _ => return None,
    })
}

/// Plan how to lower `lhs op rhs`. Comparisons and arithmetic between numeric operands
/// promote per `Type::promote`; `+` between strings (or a string and any other heap
/// value) routes to the polymorphic `AddI32R` concatenation opcode; `==`/`!=` are
/// always the untyped generic opcodes; `&&`/`||` require boolean operands.
///
/// `void_as_i64_workaround` mirrors `CodegenOptions::void_as_i64_workaround`: an
/// upstream type-checker gap occasionally leaves an operand typed VOID where I64 was
/// meant, and rather than hard-failing every such expression this backend coerces it
/// when the flag is set.
pub fn plan_binop(loc: &SourceLoc, op: BinOp, lhs: &Expr, rhs: &Expr, void_as_i64_workaround: bool) -> Result<BinOpPlan, Diagnostic> {
    let mut lhs_ty = resolved_operand_type(lhs);
    let mut rhs_ty = resolved_operand_type(rhs);

    if void_as_i64_workaround {
        if lhs_ty == Type::Void {
            debug!("{:?}: void lhs operand coerced to i64 (void_as_i64_workaround)", loc);
            lhs_ty = Type::I64;
        }
        if rhs_ty == Type::Void {
            debug!("{:?}: void rhs operand coerced to i64 (void_as_i64_workaround)", loc);
            rhs_ty = Type::I64;
        }
    }

    if op.is_logical() {
        let vm_op = if op == BinOp::And { Op::AndBool } else { Op::OrBool };
        return Ok(BinOpPlan { op: vm_op, lhs_cast: None, rhs_cast: None, result_ty: Type::Bool });
    }

    if matches!(op, BinOp::Eq | BinOp::Ne) {
        let vm_op = if op == BinOp::Eq { Op::Eq } else { Op::Ne };
        return Ok(BinOpPlan { op: vm_op, lhs_cast: None, rhs_cast: None, result_ty: Type::Bool });
    }

    if op == BinOp::Add && (lhs_ty.is_string() || rhs_ty.is_string()) {
        return Ok(BinOpPlan { op: Op::AddI32R, lhs_cast: None, rhs_cast: None, result_ty: Type::Str });
    }

    let unified = Type::promote(&lhs_ty, &rhs_ty).ok_or_else(|| {
        Diagnostic::new(
            DiagCode::UnsupportedCast,
            format!("cannot apply {:?} to operands of type {:?} and {:?}", op, lhs_ty, rhs_ty),
        )
        .at(loc.clone())
    })?;

    // spec.md §4.8 step 6: a type with no specialised opcode for a known arithmetic or
    // comparison operator still degrades to the boxed i32 variant rather than failing
    // compilation outright -- the operand values are still delivered to the VM
    // correctly, just dispatched through the generic i32 opcode family.
    let vm_op = match select_typed_op(op, &unified) {
        Some(vm_op) => vm_op,
        None => {
            debug!(
                "{:?}: no specialised opcode for {:?} on {:?}, falling back to the boxed i32 variant",
                loc, op, unified
            );
            select_typed_op(op, &Type::I32).ok_or_else(|| {
                Diagnostic::new(DiagCode::MalformedTypedAst, format!("{:?} is not an arithmetic or comparison operator", op))
                    .at(loc.clone())
            })?
        }
    };

    let result_ty = if op.is_comparison() { Type::Bool } else { unified.clone() };
    Ok(BinOpPlan {
        op: vm_op,
        lhs_cast: if lhs_ty == unified { None } else { cast_op(&lhs_ty, &unified) },
        rhs_cast: if rhs_ty == unified { None } else { cast_op(&rhs_ty, &unified) },
        result_ty,
    })
}

/// Emit a planned binary operation: cast operands that need it, compute into `dest`,
/// and free any scratch register a cast allocated (an operand register that was
/// already a temp is cast in place; a local's register is never overwritten, so
/// casting it allocates a fresh temp that is freed again immediately after use).
///
/// Returns a `RegistersExhausted` diagnostic (unlocated -- the caller attaches the
/// expression's `SourceLoc`) if a cast needed a scratch register and the frame had
/// none left; in that case the cast is skipped and the uncast register is used as-is,
/// matching `FunctionCompiler::alloc_temp`'s own degrade-and-report behaviour rather
/// than panicking (spec.md §4.13).
pub fn emit_binop(
    buf: &mut ByteCodeBuffer,
    ra: &mut RegisterAllocator,
    plan: &BinOpPlan,
    lhs_reg: Register,
    lhs_is_temp: bool,
    rhs_reg: Register,
    rhs_is_temp: bool,
    dest: Register,
) -> (Register, Option<Diagnostic>) {
    let (lhs_final, lhs_scratch, lhs_err) = apply_cast(buf, ra, plan.lhs_cast, lhs_reg, lhs_is_temp);
    let (rhs_final, rhs_scratch, rhs_err) = apply_cast(buf, ra, plan.rhs_cast, rhs_reg, rhs_is_temp);

    buf.append_instruction(plan.op, dest, lhs_final, rhs_final);

    // free in reverse allocation order to respect the allocator's stack discipline
    if let Some(r) = rhs_scratch {
        ra.free_temp(r);
    }
    if let Some(r) = lhs_scratch {
        ra.free_temp(r);
    }

    (dest, lhs_err.or(rhs_err))
}

fn apply_cast(
    buf: &mut ByteCodeBuffer,
    ra: &mut RegisterAllocator,
    cast: Option<Op>,
    reg: Register,
    is_temp: bool,
) -> (Register, Option<Register>, Option<Diagnostic>) {
    match cast {
        None => (reg, None, None),
        Some(op) if is_temp => {
            buf.append_instruction(op, reg, reg, 0);
            (reg, None, None)
        }
        Some(op) => match ra.alloc_temp() {
            Ok(scratch) => {
                buf.append_instruction(op, scratch, reg, 0);
                (scratch, Some(scratch), None)
            }
            Err(_) => {
                let diag = Diagnostic::new(DiagCode::RegistersExhausted, "no free register for a cast scratch".to_string());
                (reg, None, Some(diag))
            }
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn int_lit(v: i64, kind: IntKind) -> Expr {
        Expr::new(ExprKind::IntLiteral(v, kind), Type::Unknown, SourceLoc::synthetic())
    }

    fn typed(ty: Type) -> Expr {
        Expr::new(ExprKind::Identifier("x".into()), ty, SourceLoc::synthetic())
    }

    #[test]
    fn i32_plus_i64_promotes_and_casts_the_i32_side() {
        let loc = SourceLoc::synthetic();
        let plan = plan_binop(&loc, BinOp::Add, &typed(Type::I32), &typed(Type::I64), true).unwrap();
        assert_eq!(plan.op, Op::AddI64);
        assert_eq!(plan.lhs_cast, Some(Op::CastI32ToI64));
        assert_eq!(plan.rhs_cast, None);
        assert_eq!(plan.result_ty, Type::I64);
    }

    #[test]
    fn comparison_result_is_always_bool() {
        let loc = SourceLoc::synthetic();
        let plan = plan_binop(&loc, BinOp::Lt, &typed(Type::F64), &typed(Type::F64), true).unwrap();
        assert_eq!(plan.op, Op::LtF64);
        assert_eq!(plan.result_ty, Type::Bool);
    }

    #[test]
    fn string_concat_uses_polymorphic_opcode() {
        let loc = SourceLoc::synthetic();
        let plan = plan_binop(&loc, BinOp::Add, &typed(Type::Str), &typed(Type::Str), true).unwrap();
        assert_eq!(plan.op, Op::AddI32R);
        assert_eq!(plan.result_ty, Type::Str);
    }

    #[test]
    fn untyped_literal_falls_back_to_its_own_shape() {
        let ty = resolved_operand_type(&int_lit(1, IntKind::I64));
        assert_eq!(ty, Type::I64);
    }

    #[test]
    fn emitting_casts_local_into_a_scratch_then_frees_it() {
        let mut buf = ByteCodeBuffer::new();
        let mut ra = RegisterAllocator::new(2);
        let loc = SourceLoc::synthetic();
        let plan = plan_binop(&loc, BinOp::Add, &typed(Type::I32), &typed(Type::I64), true).unwrap();
        let before = ra.high_water();
        let dest = ra.alloc_temp().unwrap();
        let (_, diag) = emit_binop(&mut buf, &mut ra, &plan, 2, false, 3, true, dest);
        assert!(diag.is_none());
        assert_eq!(ra.high_water(), before + 1, "cast scratch register must be freed again");
    }

    #[test]
    fn mismatched_non_numeric_operands_are_a_diagnostic() {
        let loc = SourceLoc::synthetic();
        let err = plan_binop(&loc, BinOp::Add, &typed(Type::Bool), &typed(Type::I32), true);
        assert!(err.is_err());
    }

    #[test]
    fn void_operand_is_coerced_to_i64_when_the_workaround_is_enabled() {
        let loc = SourceLoc::synthetic();
        let plan = plan_binop(&loc, BinOp::Add, &typed(Type::Void), &typed(Type::I64), true).unwrap();
        assert_eq!(plan.op, Op::AddI64);
        assert_eq!(plan.result_ty, Type::I64);
    }

    #[test]
    fn void_operand_is_left_alone_when_the_workaround_is_disabled() {
        let loc = SourceLoc::synthetic();
        let err = plan_binop(&loc, BinOp::Add, &typed(Type::Void), &typed(Type::I64), false);
        assert!(err.is_err(), "VOID has no promotion rule of its own");
    }

    #[test]
    fn an_opcode_family_with_no_specialised_variant_falls_back_to_boxed_i32() {
        // BOOL has no arithmetic opcode family, so `+` on two bools degrades to the
        // boxed i32 variant rather than failing compilation (spec.md §4.8 step 6) --
        // promotion itself only errors on genuinely incompatible kinds, and BOOL ⊕ BOOL
        // picks max(kind) = BOOL, which `select_typed_op` has no entry for.
        let loc = SourceLoc::synthetic();
        let plan = plan_binop(&loc, BinOp::Add, &typed(Type::Bool), &typed(Type::Bool), true).unwrap();
        assert_eq!(plan.op, Op::AddI32);
    }
}
