//! C1: the bytecode buffer. An append-only byte stream with parallel per-byte debug
//! arrays and jump-placeholder patching, grounded in the teacher's `InstructionStream`/
//! `ByteCode` (`bytecode.rs`) but operating at byte rather than fixed-32-bit-enum
//! granularity, since spec.md §4.1/§6 require variable-length self-delimiting
//! instructions with distinct short (1-byte) and wide (2-byte) jump encodings.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use itertools::join;

use crate::diagnostics::SourceLoc;
use crate::opcode::{ConstIdx, JumpOffset, Op, Register};

pub type PatchIndex = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PatchError {
    /// `patch` was called with an index that was never reserved, or was already
    /// patched -- spec.md §5 requires exactly one successful patch per reservation.
    UnknownOrAlreadyPatched,
    /// The computed distance does not fit the encoding this placeholder reserved.
    DistanceTooFar,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatchError::UnknownOrAlreadyPatched => {
                write!(f, "jump patch site unknown or already patched")
            }
            PatchError::DistanceTooFar => write!(f, "jump distance too far for its encoding"),
        }
    }
}

/// One pending jump reservation: which opcode it is (to know the encoding width) and
/// whether it is a backward (loop) jump, which patches relative to the *end* of the
/// placeholder rather than being queued for a later forward target.
#[derive(Copy, Clone)]
struct OpenJump {
    op: Op,
}

/// An append-only instruction stream plus parallel source-location arrays, one entry
/// per byte, as spec.md §3 requires.
pub struct ByteCodeBuffer {
    code: Vec<u8>,
    lines: Vec<u32>,
    columns: Vec<u32>,
    files: Vec<Rc<str>>,
    current_loc: SourceLoc,
    /// Every instruction's starting offset and opcode, for disassembly and the
    /// invariant checks in tests -- not part of the VM-visible encoding.
    instr_starts: Vec<(usize, Op)>,
    open_jumps: HashMap<PatchIndex, OpenJump>,
}

impl ByteCodeBuffer {
    pub fn new() -> ByteCodeBuffer {
        ByteCodeBuffer {
            code: Vec::new(),
            lines: Vec::new(),
            columns: Vec::new(),
            files: Vec::new(),
            current_loc: SourceLoc::synthetic(),
            instr_starts: Vec::new(),
            open_jumps: HashMap::new(),
        }
    }

    pub fn set_location(&mut self, loc: SourceLoc) {
        self.current_loc = loc;
    }

    pub fn set_synthetic_location(&mut self) {
        self.current_loc = SourceLoc::synthetic();
    }

    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Append a single byte, tagging it with the currently-set source location.
    pub fn append(&mut self, byte: u8) -> usize {
        let offset = self.code.len();
        self.code.push(byte);
        self.lines.push(self.current_loc.pos.line);
        self.columns.push(self.current_loc.pos.column);
        self.files.push(self.current_loc.file.clone());
        offset
    }

    fn begin_instr(&mut self, op: Op) -> usize {
        let offset = self.append(op as u8);
        self.instr_starts.push((offset, op));
        offset
    }

    /// Append a fixed-width three-register-operand instruction: `op a b c`. This
    /// covers the large majority of opcodes (moves, typed arithmetic/comparison,
    /// casts, array/enum/iterator accessors); operands that aren't needed are zero.
    pub fn append_instruction(&mut self, op: Op, a: Register, b: Register, c: Register) -> usize {
        let offset = self.begin_instr(op);
        self.append(a);
        self.append(b);
        self.append(c);
        offset
    }

    /// Append an instruction whose third/fourth operands pack a 16-bit value
    /// (constant-pool index), little-endian.
    pub fn append_instruction_idx(&mut self, op: Op, a: Register, idx: ConstIdx) -> usize {
        let bytes = idx.to_le_bytes();
        self.append_instruction(op, a, bytes[0], bytes[1])
    }

    /// Append an instruction with four plain register/immediate operands (`CALL_R`,
    /// `ENUM_NEW_R`, `ARRAY_SLICE_R`).
    pub fn append_instruction4(
        &mut self,
        op: Op,
        a: Register,
        b: Register,
        c: Register,
        d: Register,
    ) -> usize {
        let offset = self.begin_instr(op);
        self.append(a);
        self.append(b);
        self.append(c);
        self.append(d);
        offset
    }

    /// Reserve a jump placeholder. `op` determines the encoding width (1 byte for
    /// `*_SHORT` opcodes, 2 bytes otherwise). Any fixed operands preceding the offset
    /// (e.g. the test register of `JUMP_IF_NOT_R`) must be appended by the caller
    /// *before* calling this. Returns the patch index: the offset of the first
    /// reserved offset byte.
    pub fn reserve_jump(&mut self, op: Op) -> PatchIndex {
        debug_assert!(op.is_jump());
        let width = if op.is_short_jump() { 1 } else { 2 };
        let patch_index = self.current_offset();
        for _ in 0..width {
            self.append(0xFF);
        }
        self.open_jumps.insert(patch_index, OpenJump { op });
        patch_index
    }

    /// Patch a previously reserved jump placeholder so it targets `target_offset`.
    /// The stored offset is `target_offset - origin_pc`, where `origin_pc` is the
    /// program counter immediately after the placeholder bytes (i.e. where the VM's
    /// instruction pointer sits right after decoding the jump), encoded little-endian
    /// for wide jumps and as an unsigned byte (magnitude only, direction implied by
    /// the opcode) for short ones.
    pub fn patch(&mut self, patch_index: PatchIndex, target_offset: usize) -> Result<(), PatchError> {
        let open = self
            .open_jumps
            .remove(&patch_index)
            .ok_or(PatchError::UnknownOrAlreadyPatched)?;

        let width = if open.op.is_short_jump() { 1 } else { 2 };
        let origin_pc = patch_index + width;
        let delta = target_offset as i64 - origin_pc as i64;

        if open.op.is_short_jump() {
            let magnitude = if open.op.is_backward() { -delta } else { delta };
            if !(0..=255).contains(&magnitude) {
                self.open_jumps.insert(patch_index, open);
                return Err(PatchError::DistanceTooFar);
            }
            self.code[patch_index] = magnitude as u8;
        } else {
            if delta < JumpOffset::MIN as i64 || delta > JumpOffset::MAX as i64 {
                self.open_jumps.insert(patch_index, open);
                return Err(PatchError::DistanceTooFar);
            }
            let bytes = (delta as JumpOffset).to_le_bytes();
            self.code[patch_index] = bytes[0];
            self.code[patch_index + 1] = bytes[1];
        }

        Ok(())
    }

    /// Choose the backward-jump opcode for a loop, per spec.md §4.9: short when the
    /// distance fits a byte, wide otherwise.
    pub fn backward_jump_op(&self, loop_start: usize) -> Op {
        let width_if_short = 1usize;
        let origin_if_short = self.current_offset() + 1 /* opcode byte */ + width_if_short;
        let distance = origin_if_short.saturating_sub(loop_start);
        if distance <= 255 {
            Op::LoopShort
        } else {
            Op::Loop
        }
    }

    /// Emit a backward jump to `loop_start`, choosing short vs wide encoding and
    /// patching it immediately since the target is already known.
    pub fn emit_backward_jump(&mut self, loop_start: usize) -> Result<(), PatchError> {
        let op = self.backward_jump_op(loop_start);
        self.begin_instr(op);
        let patch_index = self.reserve_jump(op);
        self.patch(patch_index, loop_start)
    }

    /// True once every reservation has a matching patch -- the finalisation-time
    /// fatal-assertion invariant from spec.md §8 property 1.
    pub fn all_jumps_patched(&self) -> bool {
        self.open_jumps.is_empty()
    }

    pub fn unpatched_count(&self) -> usize {
        self.open_jumps.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    pub fn files(&self) -> &[Rc<str>] {
        &self.files
    }

    pub fn instr_starts(&self) -> &[(usize, Op)] {
        &self.instr_starts
    }

    pub fn count_opcode(&self, op: Op) -> usize {
        self.instr_starts.iter().filter(|(_, o)| *o == op).count()
    }
}

impl Default for ByteCodeBuffer {
    fn default() -> ByteCodeBuffer {
        ByteCodeBuffer::new()
    }
}

impl fmt::Display for ByteCodeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let body = join(
            self.instr_starts.iter().map(|(off, op)| format!("{:>5}: {:?}", off, op)),
            "\n",
        );
        write!(f, "{}", body)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn buf() -> ByteCodeBuffer {
        let mut b = ByteCodeBuffer::new();
        b.set_location(SourceLoc::new(Rc::from("test.or"), 1, 0));
        b
    }

    #[test]
    fn every_byte_carries_a_location() {
        let mut b = buf();
        b.append_instruction(Op::Move, 1, 2, 0);
        assert_eq!(b.code().len(), 4);
        assert_eq!(b.lines().len(), 4);
        assert_eq!(b.columns().len(), 4);
        assert_eq!(b.files().len(), 4);
    }

    #[test]
    fn forward_short_jump_round_trips() {
        let mut b = buf();
        b.begin_instr(Op::JumpShort);
        let patch = b.reserve_jump(Op::JumpShort);
        b.append_instruction(Op::NoOp, 0, 0, 0);
        let target = b.current_offset();
        b.patch(patch, target).unwrap();
        assert!(b.all_jumps_patched());
        let origin_pc = patch + 1;
        assert_eq!(b.code()[patch] as usize, target - origin_pc);
    }

    #[test]
    fn backward_jump_patches_immediately() {
        let mut b = buf();
        let loop_start = b.current_offset();
        b.append_instruction(Op::AddI32, 0, 0, 1);
        b.emit_backward_jump(loop_start).unwrap();
        assert!(b.all_jumps_patched());
        assert_eq!(b.count_opcode(Op::LoopShort), 1);
    }

    #[test]
    fn patching_twice_fails() {
        let mut b = buf();
        let patch = b.reserve_jump(Op::Jump);
        let target = b.current_offset();
        assert!(b.patch(patch, target).is_ok());
        assert_eq!(
            b.patch(patch, target),
            Err(PatchError::UnknownOrAlreadyPatched)
        );
    }

    #[test]
    fn short_jump_out_of_range_is_rejected() {
        let mut b = buf();
        let patch = b.reserve_jump(Op::JumpShort);
        // pad well past the 1-byte short-jump range
        for _ in 0..300 {
            b.append_instruction(Op::NoOp, 0, 0, 0);
        }
        let target = b.current_offset();
        assert_eq!(b.patch(patch, target), Err(PatchError::DistanceTooFar));
    }

    #[test]
    fn unpatched_jump_is_detected() {
        let mut b = buf();
        b.reserve_jump(Op::Jump);
        assert!(!b.all_jumps_patched());
        assert_eq!(b.unpatched_count(), 1);
    }
}
