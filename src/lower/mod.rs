//! The lowering layer: everything that walks the typed AST and emits bytecode.
//! Split the way the teacher's `compiler.rs` is conceptually split (though the teacher
//! keeps it in one file): module linking (C11), the function compiler (C10) that owns
//! per-function state, and the statement/expression lowerers (C7/C6) that hang off it.

pub mod expr;
pub mod function;
pub mod module;
pub mod stmt;
