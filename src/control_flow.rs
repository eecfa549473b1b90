//! C9: loop-context bookkeeping for `break`/`continue` and the fused `INC_CMP_JMP`
//! range-loop fast path. Grounded in the teacher's forward/backward jump patching in
//! `compile_apply`'s `if`/`while` handling (`compiler.rs`), generalised into an
//! explicit stack since spec.md's range loops need a distinct continue target (the
//! increment step) from a while loop's condition re-check.

use crate::bytecode::{ByteCodeBuffer, PatchError, PatchIndex};
use crate::opcode::{Op, Register};

#[derive(Debug, PartialEq, Eq)]
pub enum ControlFlowError {
    BreakOutsideLoop,
    ContinueOutsideLoop,
}

struct LoopFrame {
    break_patches: Vec<PatchIndex>,
    continue_patches: Vec<PatchIndex>,
}

/// The stack of loops currently being lowered, innermost last.
pub struct ControlFlow {
    loops: Vec<LoopFrame>,
}

impl ControlFlow {
    pub fn new() -> ControlFlow {
        ControlFlow { loops: Vec::new() }
    }

    pub fn enter_loop(&mut self) {
        self.loops.push(LoopFrame {
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
        });
    }

    pub fn loop_depth(&self) -> usize {
        self.loops.len()
    }

    /// Queue a `break`'s jump to be patched to just past the loop once it closes.
    pub fn record_break(&mut self, patch: PatchIndex) -> Result<(), ControlFlowError> {
        self.loops
            .last_mut()
            .map(|f| f.break_patches.push(patch))
            .ok_or(ControlFlowError::BreakOutsideLoop)
    }

    /// Queue a `continue`'s jump to be patched once the loop's continue target (the
    /// condition re-check for a `while`, the increment step for a range loop) is
    /// reached.
    pub fn record_continue(&mut self, patch: PatchIndex) -> Result<(), ControlFlowError> {
        self.loops
            .last_mut()
            .map(|f| f.continue_patches.push(patch))
            .ok_or(ControlFlowError::ContinueOutsideLoop)
    }

    /// Patch every `continue` queued so far in the innermost loop to `target`. Called
    /// once the lowerer reaches the loop's continue point.
    pub fn update_continue(&mut self, buf: &mut ByteCodeBuffer, target: usize) -> Result<(), PatchError> {
        if let Some(frame) = self.loops.last_mut() {
            for patch in frame.continue_patches.drain(..) {
                buf.patch(patch, target)?;
            }
        }
        Ok(())
    }

    /// Close the innermost loop: patch every queued `break` to the current offset
    /// (just past the loop) and pop its frame.
    pub fn leave_loop(&mut self, buf: &mut ByteCodeBuffer) -> Result<(), PatchError> {
        let frame = self.loops.pop().expect("leave_loop without matching enter_loop");
        let end = buf.current_offset();
        for patch in frame.break_patches {
            buf.patch(patch, end)?;
        }
        Ok(())
    }
}

impl Default for ControlFlow {
    fn default() -> ControlFlow {
        ControlFlow::new()
    }
}

/// Emit the fused range-loop fast path: increment `loop_var`, compare against `limit`,
/// and jump backward to `loop_top` if still in range -- a single instruction replacing
/// the separate `INC_I32`/`LT_I32`/`JUMP_IF_NOT` triple, per spec.md §4.9.
pub fn emit_inc_cmp_jmp(
    buf: &mut ByteCodeBuffer,
    loop_var: Register,
    limit: Register,
    loop_top: usize,
) -> Result<(), PatchError> {
    buf.append(Op::IncCmpJmp as u8);
    buf.append(loop_var);
    buf.append(limit);
    let patch = buf.reserve_jump(Op::IncCmpJmp);
    buf.patch(patch, loop_top)
}

/// Emit a conditional forward jump (`JUMP_IF_NOT_SHORT`/`JUMP_IF_NOT_R`, chosen by the
/// caller) testing `test`, leaving its target unpatched for the caller to patch later
/// (an `if`'s else-branch start, a loop's exit).
pub fn emit_jump_if_not(buf: &mut ByteCodeBuffer, test: Register, wide: bool) -> PatchIndex {
    let op = if wide { Op::JumpIfNotR } else { Op::JumpIfNotShort };
    buf.append(op as u8);
    buf.append(test);
    buf.reserve_jump(op)
}

/// Emit an unconditional forward jump (an `if`'s end-of-then skip, a `break`/`continue`).
pub fn emit_jump(buf: &mut ByteCodeBuffer, wide: bool) -> PatchIndex {
    let op = if wide { Op::Jump } else { Op::JumpShort };
    buf.append(op as u8);
    buf.reserve_jump(op)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn break_outside_loop_is_rejected() {
        let mut cf = ControlFlow::new();
        assert_eq!(cf.record_break(0), Err(ControlFlowError::BreakOutsideLoop));
    }

    #[test]
    fn continue_patches_to_increment_step_not_loop_end() {
        let mut buf = ByteCodeBuffer::new();
        let mut cf = ControlFlow::new();
        cf.enter_loop();

        let continue_patch = emit_jump(&mut buf, false);
        cf.record_continue(continue_patch).unwrap();

        let break_patch = emit_jump(&mut buf, false);
        cf.record_break(break_patch).unwrap();

        let increment_site = buf.current_offset();
        cf.update_continue(&mut buf, increment_site).unwrap();
        buf.append_instruction(Op::IncI32, 0, 0, 0);

        cf.leave_loop(&mut buf).unwrap();
        let loop_end = buf.current_offset();

        assert!(buf.all_jumps_patched());
        let continue_origin = continue_patch + 1;
        assert_eq!(buf.code()[continue_patch] as usize, increment_site - continue_origin);
        let break_origin = break_patch + 1;
        assert_eq!(buf.code()[break_patch] as usize, loop_end - break_origin);
    }

    #[test]
    fn fused_loop_step_is_a_single_backward_jump() {
        let mut buf = ByteCodeBuffer::new();
        let loop_top = buf.current_offset();
        buf.append_instruction(Op::LtI32, 0, 1, 2);
        emit_inc_cmp_jmp(&mut buf, 0, 1, loop_top).unwrap();
        assert_eq!(buf.count_opcode(Op::IncCmpJmp), 1);
        assert!(buf.all_jumps_patched());
    }
}
