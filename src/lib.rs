//! `orusc`: the backend code generator for the Orus language toolchain --
//! register allocation, typed opcode selection, control-flow lowering, closure and
//! module linking. The lexer/parser/type-checker/VM/module-loader/peephole-optimiser
//! are external collaborators this crate defines a contract for; `frontend` ships a
//! minimal reference implementation of the first three so the backend can be
//! exercised end-to-end without one (see `tests/end_to_end.rs`).

pub mod ast;
pub mod binop;
pub mod bytecode;
pub mod compiler;
pub mod constant;
pub mod control_flow;
pub mod diagnostics;
pub mod finalize;
pub mod frontend;
pub mod lower;
pub mod module_manager;
pub mod opcode;
pub mod regalloc;
pub mod scope;
pub mod types;

pub use compiler::{compile_module, CodegenOptions, ModuleCtx};
pub use finalize::{finalize, Chunk, Program};
