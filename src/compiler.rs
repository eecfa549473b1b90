//! The coordinating driver: owns the module-level shared state (constant pool,
//! globals, diagnostics, module linker, function table) and walks a module's
//! top-level statements, handing off to the function/statement/expression lowerers.
//! Grounded in the teacher's top-level `Compiler` entry point (`compiler.rs`'s
//! `Compiler::new`/`compile_function`), generalised from "compile one lambda body" to
//! "compile a module's top-level statement list as an implicit init function, spawning
//! nested `FunctionCompiler`s for every `fn` declaration it meets."

use std::cell::RefCell;

use crate::ast::Module;
use crate::constant::ConstantPool;
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::lower::function::FunctionCompiler;
use crate::module_manager::ModuleManager;
use crate::regalloc::GlobalRegisters;

/// Feature flags threaded explicitly through the compiler context, per DESIGN.md's
/// Open Question decision (no global mutable state, unlike the teacher's source).
#[derive(Clone, Copy, Debug)]
pub struct CodegenOptions {
    /// Treat `TYPE_VOID` as `I64` during opcode selection -- a workaround for an
    /// upstream type-checker inference gap named in spec.md §9. Kept on by default to
    /// match the existing toolchain's observed behaviour.
    pub void_as_i64_workaround: bool,
}

impl Default for CodegenOptions {
    fn default() -> CodegenOptions {
        CodegenOptions {
            void_as_i64_workaround: true,
        }
    }
}

/// Module-level state shared by every function compiled within one module, via
/// interior mutability so a `FunctionCompiler` can hold a plain shared reference to it
/// even while recursively compiling nested function declarations -- the same role the
/// teacher's `mem: &'guard MutatorView` shared-but-interior-mutable handle plays.
pub struct ModuleCtx<'mm> {
    pub constants: RefCell<ConstantPool>,
    pub globals: RefCell<GlobalRegisters>,
    pub linker: RefCell<crate::lower::module::ModuleLinker>,
    pub diagnostics: RefCell<DiagnosticBag>,
    pub options: CodegenOptions,
    pub functions: RefCell<Vec<crate::finalize::FunctionRecord>>,
    /// Maps a (possibly `Struct.method`-mangled) function name to its index in
    /// `functions`, resolved once the declaration has compiled.
    pub function_index: RefCell<std::collections::HashMap<String, u32>>,
    /// Declared enum types by name, so `match` can resolve an `EnumVariant` pattern's
    /// tag without re-deriving it from the scrutinee's own (possibly erased) type.
    pub enum_types: RefCell<std::collections::HashMap<String, std::rc::Rc<crate::types::EnumType>>>,
    pub module_manager: &'mm dyn ModuleManager,
}

impl<'mm> ModuleCtx<'mm> {
    pub fn new(module_manager: &'mm dyn ModuleManager, options: CodegenOptions) -> ModuleCtx<'mm> {
        ModuleCtx {
            constants: RefCell::new(ConstantPool::new()),
            globals: RefCell::new(GlobalRegisters::new()),
            linker: RefCell::new(crate::lower::module::ModuleLinker::new()),
            diagnostics: RefCell::new(DiagnosticBag::new()),
            options,
            functions: RefCell::new(Vec::new()),
            function_index: RefCell::new(std::collections::HashMap::new()),
            enum_types: RefCell::new(std::collections::HashMap::new()),
            module_manager,
        }
    }

    pub fn report(&self, diag: Diagnostic) {
        self.diagnostics.borrow_mut().report(diag);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.borrow().has_errors()
    }
}

/// Compile an entire module: its top-level statements run as an implicit init
/// function (module scope = that function's outermost scope), and any `fn`
/// declarations met along the way recursively spawn their own `FunctionCompiler`.
/// Returns the populated `ModuleCtx` (function table, exports, diagnostics) for the
/// caller to hand to `finalize::finalize`.
pub fn compile_module<'mm>(
    module: &Module,
    module_manager: &'mm dyn ModuleManager,
    options: CodegenOptions,
) -> ModuleCtx<'mm> {
    let ctx = ModuleCtx::new(module_manager, options);
    {
        let mut init = FunctionCompiler::new(&ctx, None, 0, None);
        init.compile_top_level(&module.stmts);
        init.finish_module_init();
    }
    ctx
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module_manager::InMemoryModuleManager;

    #[test]
    fn empty_module_compiles_without_errors() {
        let mgr = InMemoryModuleManager::new();
        let module = Module { name: "main".into(), stmts: vec![] };
        let ctx = compile_module(&module, &mgr, CodegenOptions::default());
        assert!(!ctx.has_errors());
        assert_eq!(ctx.functions.borrow().len(), 1, "the module init function itself");
    }
}
