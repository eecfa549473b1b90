//! C12: VM finalisation. Turns the set of per-function bytecode buffers a module
//! compiled into the `Program` the VM loads: one `Chunk` per function, constants
//! resolved, every jump confirmed patched. Grounded in the teacher's `Bytecode`
//! materialisation at the end of `compile_function` (`compiler.rs`) that packages a
//! `Function`'s `InstructionStream` plus its literals into something `vm.rs` can run.

use std::rc::Rc;

use crate::bytecode::ByteCodeBuffer;
use crate::compiler::ModuleCtx;
use crate::constant::ConstantPool;
use crate::diagnostics::{DiagCode, Diagnostic};
use crate::types::Type;

/// One compiled function, still holding its own bytecode buffer until finalisation
/// resolves it into a `Chunk`.
pub struct FunctionRecord {
    pub name: String,
    pub arity: usize,
    pub upvalue_count: usize,
    pub return_ty: Type,
    pub frame_size: u16,
    pub buf: ByteCodeBuffer,
}

/// A finalised, VM-loadable function: its instruction stream plus the frame size the
/// register allocator reported needing.
pub struct Chunk {
    pub name: Rc<str>,
    pub arity: usize,
    pub upvalue_count: usize,
    pub frame_size: u16,
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub columns: Vec<u32>,
    /// A tier-escalation hook: set once a specialised, further-optimised chunk for
    /// this function becomes available (peephole optimizer output, an external
    /// collaborator). `None` until then -- the VM always has the baseline chunk to
    /// fall back to.
    pub specialized: Option<Box<Chunk>>,
    pub hot_count: u32,
}

pub struct Program {
    pub constants: ConstantPool,
    pub functions: Vec<Chunk>,
    pub exports: Vec<crate::module_manager::ExportEntry>,
}

fn finalize_function(record: FunctionRecord) -> Result<Chunk, Diagnostic> {
    if !record.buf.all_jumps_patched() {
        return Err(Diagnostic::new(
            DiagCode::UnpatchedJump,
            format!(
                "function {:?} finished compiling with {} unpatched jump(s)",
                record.name,
                record.buf.unpatched_count()
            ),
        ));
    }

    Ok(Chunk {
        name: Rc::from(record.name.as_str()),
        arity: record.arity,
        upvalue_count: record.upvalue_count,
        frame_size: record.frame_size,
        code: record.buf.code().to_vec(),
        lines: record.buf.lines().to_vec(),
        columns: record.buf.columns().to_vec(),
        specialized: None,
        hot_count: 0,
    })
}

/// Finalise a compiled module: confirm every function's jumps are patched (spec.md §8
/// property 1 and §4.13's fatal-assertion failure mode) and materialise each into a
/// `Chunk`. Bails with the first unpatched-jump diagnostic found rather than panicking,
/// per spec.md §4.13's "internal invariant violations become diagnostics, not panics"
/// contract -- the caller is expected to have already checked `has_compilation_errors`
/// and to skip finalisation entirely when it is set.
pub fn finalize<'mm>(ctx: ModuleCtx<'mm>) -> Result<Program, Diagnostic> {
    let functions = ctx.functions.into_inner();
    let mut chunks = Vec::with_capacity(functions.len());
    for record in functions {
        chunks.push(finalize_function(record)?);
    }

    Ok(Program {
        constants: ctx.constants.into_inner(),
        functions: chunks,
        exports: ctx.linker.into_inner().exports().to_vec(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::ByteCodeBuffer;
    use crate::compiler::CodegenOptions;
    use crate::module_manager::InMemoryModuleManager;
    use crate::opcode::Op;

    #[test]
    fn unpatched_jump_is_reported_as_a_diagnostic_not_a_panic() {
        let mgr = InMemoryModuleManager::new();
        let ctx = ModuleCtx::new(&mgr, CodegenOptions::default());
        let mut buf = ByteCodeBuffer::new();
        buf.reserve_jump(Op::Jump);
        ctx.functions.borrow_mut().push(FunctionRecord {
            name: "main".into(),
            arity: 0,
            upvalue_count: 0,
            return_ty: Type::Void,
            frame_size: 0,
            buf,
        });
        let result = finalize(ctx);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, DiagCode::UnpatchedJump);
    }

    #[test]
    fn fully_patched_module_finalises_into_chunks() {
        let mgr = InMemoryModuleManager::new();
        let ctx = ModuleCtx::new(&mgr, CodegenOptions::default());
        let buf = ByteCodeBuffer::new();
        ctx.functions.borrow_mut().push(FunctionRecord {
            name: "main".into(),
            arity: 0,
            upvalue_count: 0,
            return_ty: Type::Void,
            frame_size: 4,
            buf,
        });
        let program = finalize(ctx).unwrap();
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].frame_size, 4);
    }
}
