//! The VM-visible opcode set. Non-exhaustive per spec.md §6, but the stable subset the
//! backend actually emits: typed arithmetic/comparison per numeric kind, the numeric
//! cast lattice, control flow (including the fused `IncCmpJmp` loop step), calls,
//! closures, arrays/structs-as-arrays, enums, iterators, and the builtin-call opcodes.
//!
//! Every instruction is an opcode byte followed by a fixed, opcode-determined number
//! of operand bytes -- the decoder is self-delimiting on the opcode alone, matching
//! spec.md §6. Most instructions use exactly three operand bytes (the `(a, b, c)` of
//! `append_instruction`); wider operands (16-bit constant indices, call argument
//! counts) are emitted as extra raw bytes by dedicated `ByteCodeBuffer::emit_*`
//! helpers, as documented on each of those helpers.

use num_derive::{FromPrimitive, ToPrimitive};

pub type Register = u8;
pub type ConstIdx = u16;
pub type JumpOffset = i16;

/// Sentinel written into an as-yet-unpatched wide jump offset, mirroring the
/// teacher's `JUMP_UNKNOWN`. Used only for debug assertions -- a successfully
/// finalised chunk must never contain this value at a reserved jump site.
pub const JUMP_UNKNOWN: JumpOffset = 0x7fff;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Op {
    NoOp = 0,

    LoadTrue,
    LoadFalse,
    LoadNil,
    LoadI32Const,
    LoadI64Const,
    LoadU32Const,
    LoadU64Const,
    LoadF64Const,
    LoadConst,
    Move,

    AddI32, SubI32, MulI32, DivI32, ModI32, LtI32, GtI32, LeI32, GeI32,
    AddI64, SubI64, MulI64, DivI64, ModI64, LtI64, GtI64, LeI64, GeI64,
    AddU32, SubU32, MulU32, DivU32, ModU32, LtU32, GtU32, LeU32, GeU32,
    AddU64, SubU64, MulU64, DivU64, ModU64, LtU64, GtU64, LeU64, GeU64,
    AddF64, SubF64, MulF64, DivF64, ModF64, LtF64, GtF64, LeF64, GeF64,

    /// String concatenation is routed through here per spec.md §4.8/§8 scenario 6.
    AddI32R,

    Eq, Ne,
    AndBool, OrBool, NotBool,

    NegI32, NegI64, NegF64,

    CastI32ToI64, CastI32ToU32, CastI32ToU64, CastI32ToF64,
    CastI64ToI32, CastI64ToU32, CastI64ToU64, CastI64ToF64,
    CastU32ToI32, CastU32ToI64, CastU32ToU64, CastU32ToF64,
    CastU64ToI32, CastU64ToI64, CastU64ToU32, CastU64ToF64,
    CastF64ToI32, CastF64ToI64, CastF64ToU32, CastF64ToU64,

    IncI32,
    AddI32Imm,
    IncCmpJmp,

    Jump,
    JumpShort,
    JumpIfNotR,
    JumpIfNotShort,
    Loop,
    LoopShort,

    CallR,
    ReturnR,
    ReturnVoid,

    GetUpvalueR,
    SetUpvalueR,
    CloseUpvalues,

    MakeArrayR,
    ArrayGetR,
    ArraySetR,
    ArrayLenR,
    ArrayPushR,
    ArrayPopR,
    ArraySliceR,
    ArraySortedR,
    StringIndexR,

    EnumNewR,
    EnumTagEqR,
    EnumPayloadR,

    GetIterR,
    IterNextR,
    RangeR,

    PrintR,
    PrintMultiR,

    TimeStamp,
    TryBegin,
    TryEnd,
    Throw,

    InputR,
    ParseIntR,
    ParseFloatR,
    TypeOfR,
    IsTypeR,
    AssertEqR,

    Halt,
}

impl Op {
    /// True for the placeholder-reserving jump opcodes that occupy a single offset
    /// byte, per spec.md §4.1.
    pub fn is_short_jump(&self) -> bool {
        matches!(self, Op::JumpShort | Op::JumpIfNotShort | Op::LoopShort)
    }

    /// True for the wide (two offset byte) jump placeholders. `IncCmpJmp` is included:
    /// its two leading register operands are appended by the caller before
    /// `ByteCodeBuffer::reserve_jump` is invoked, so only the offset width matters here.
    pub fn is_wide_jump(&self) -> bool {
        matches!(self, Op::Jump | Op::JumpIfNotR | Op::Loop | Op::IncCmpJmp)
    }

    pub fn is_jump(&self) -> bool {
        self.is_short_jump() || self.is_wide_jump()
    }

    /// True for backward (loop) jumps -- these patch to an offset already known at
    /// reservation time, so `reserve_jump` for a loop immediately follows with a
    /// `patch` rather than leaving it open.
    pub fn is_backward(&self) -> bool {
        matches!(self, Op::Loop | Op::LoopShort | Op::IncCmpJmp)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn opcode_round_trips_through_u8() {
        for op in [Op::NoOp, Op::CallR, Op::IncCmpJmp, Op::Halt] {
            let byte = op.to_u8().unwrap();
            assert_eq!(Op::from_u8(byte), Some(op));
        }
    }

    #[test]
    fn jump_classification_is_disjoint() {
        for op in [Op::Jump, Op::JumpShort, Op::JumpIfNotR, Op::JumpIfNotShort, Op::Loop, Op::LoopShort] {
            assert!(op.is_jump());
        }
        assert!(!Op::CallR.is_jump());
    }
}
