//! C10: the function compiler. Owns one function's bytecode buffer, register
//! allocator, scope stack and loop-context stack, and drives compilation of its body
//! via the statement/expression lowerers. Grounded in the teacher's `Compiler<'parent>`
//! (`compiler.rs`): a fresh `Compiler` per lambda, carrying a reference to its
//! enclosing `Compiler`'s `Variables` for upvalue capture, generalised from "one lambda
//! body" to named functions, methods and the implicit module-init function.

use crate::ast::{FunctionDecl, Param, Stmt};
use crate::compiler::ModuleCtx;
use crate::control_flow::ControlFlow;
use crate::diagnostics::{DiagCode, Diagnostic, SourceLoc};
use crate::finalize::FunctionRecord;
use crate::module_manager::ExportKind;
use crate::opcode::{Op, Register};
use crate::regalloc::RegisterAllocator;
use crate::scope::Scopes;
use crate::types::Type;

/// The maximum number of named parameters a single frame can address, per spec.md
/// §4.10's `[256-arity..256)` parameter window -- parameters and the return/env
/// registers all have to fit inside one byte-addressed frame.
const MAX_PARAMS: usize = 250;

pub struct FunctionCompiler<'parent, 'm> {
    pub(crate) buf: crate::bytecode::ByteCodeBuffer,
    pub(crate) ra: RegisterAllocator,
    pub(crate) scopes: Scopes<'parent>,
    pub(crate) cf: ControlFlow,
    pub(crate) module: &'m ModuleCtx<'m>,
    name: String,
    pub(crate) owner_struct: Option<String>,
    arity: usize,
    pub(crate) return_ty: Type,
    had_return: bool,
    is_module_init: bool,
}

impl<'parent, 'm> FunctionCompiler<'parent, 'm> {
    pub fn new(
        module: &'m ModuleCtx<'m>,
        parent: Option<&'parent Scopes<'parent>>,
        arity: usize,
        name: Option<String>,
    ) -> FunctionCompiler<'parent, 'm> {
        let mut ra = RegisterAllocator::new(arity);
        let mut scopes = Scopes::new(parent);
        let mark = ra.enter_scope();
        scopes.enter_scope(mark);
        FunctionCompiler {
            buf: crate::bytecode::ByteCodeBuffer::new(),
            ra,
            scopes,
            cf: ControlFlow::new(),
            module,
            is_module_init: name.is_none(),
            name: name.unwrap_or_else(|| "<module>".to_string()),
            owner_struct: None,
            arity,
            return_ty: Type::Void,
            had_return: false,
        }
    }

    /// Compile a module's top-level statements as this (the implicit init) function's
    /// body.
    pub fn compile_top_level(&mut self, stmts: &[Stmt]) {
        crate::lower::stmt::compile_block(self, stmts);
    }

    /// Close out the module-init function: synthesise its implicit return and record
    /// it into the function table at index 0.
    pub fn finish_module_init(mut self) {
        self.emit_implicit_return();
        self.close_and_record();
    }

    /// Declare this function's parameters as locals occupying the
    /// `FIRST_ARG_REG..FIRST_ARG_REG+arity` window the register allocator already
    /// reserved in `new`.
    fn declare_params(&mut self, params: &[Param]) {
        for (i, p) in params.iter().enumerate() {
            let reg = crate::regalloc::FIRST_ARG_REG + i as Register;
            self.scopes.declare(&p.name, reg, false);
        }
    }

    /// Compile one `fn` declaration (free function, instance method, or nested
    /// closure) into a fresh `FunctionCompiler`, registering it into the module's
    /// function table under its (possibly mangled) name. Returns the function table
    /// index so the caller can reference it as a callable value.
    pub fn compile_nested_function(&mut self, decl: &FunctionDecl) -> Result<u32, Diagnostic> {
        if decl.params.len() > MAX_PARAMS {
            return Err(Diagnostic::new(
                DiagCode::RegistersExhausted,
                format!("function {:?} has too many parameters to address in one frame", decl.name),
            )
            .at(decl.loc.clone()));
        }

        let mangled = match &decl.owner_struct {
            Some(owner) => format!("{}.{}", owner, decl.name),
            None => decl.name.clone(),
        };

        // Reserve this function's table slot before compiling its body, so a call to
        // its own name inside that body (recursion) resolves through `function_index`
        // immediately rather than only after `close_and_record_as` runs at the end --
        // spec.md's fact(6) example depends on this name being bound before the body
        // compiles. Self-healed by `close_and_record_as`'s own insert below if another
        // top-level declaration happened to push into `functions` in between.
        let reserved_index = self.module.functions.borrow().len() as u32;
        self.module.function_index.borrow_mut().insert(mangled.clone(), reserved_index);

        let arity = decl.params.len() + if decl.is_instance_method { 1 } else { 0 };
        let mut inner = FunctionCompiler::new(self.module, Some(&self.scopes), arity, Some(mangled.clone()));
        inner.owner_struct = decl.owner_struct.clone();
        inner.return_ty = decl.return_ty.clone();

        if decl.is_instance_method {
            inner.scopes.declare("self", crate::regalloc::FIRST_ARG_REG, false);
            let shifted: Vec<Param> = decl
                .params
                .iter()
                .map(|p| Param { name: p.name.clone(), ty: p.ty.clone() })
                .collect();
            for (i, p) in shifted.iter().enumerate() {
                let reg = crate::regalloc::FIRST_ARG_REG + 1 + i as Register;
                inner.scopes.declare(&p.name, reg, false);
            }
        } else {
            inner.declare_params(&decl.params);
        }

        crate::lower::stmt::compile_block(&mut inner, &decl.body);
        inner.emit_implicit_return();

        // capture any of our own locals the nested function closed over, so this
        // function's own scope exit emits `CLOSE_UPVALUES` for them.
        let captured_from_us: Vec<String> = inner
            .scopes
            .upvalues()
            .iter()
            .filter(|uv| uv.from_parent_local)
            .map(|uv| uv.name.clone())
            .collect();
        for name in &captured_from_us {
            self.scopes.mark_captured(name);
        }

        let upvalue_count = inner.scopes.upvalues().len();
        Ok(inner.close_and_record_as(mangled, upvalue_count))
    }

    fn close_and_record(self) -> u32 {
        self.close_and_record_as(self.name.clone(), 0)
    }

    fn close_and_record_as(self, name: String, upvalue_count: usize) -> u32 {
        let frame_size = self.ra.high_water();
        let record = FunctionRecord {
            name: name.clone(),
            arity: self.arity,
            upvalue_count,
            return_ty: self.return_ty,
            frame_size,
            buf: self.buf,
        };
        let mut functions = self.module.functions.borrow_mut();
        let index = functions.len() as u32;
        functions.push(record);
        drop(functions);
        self.module.function_index.borrow_mut().insert(name, index);
        index
    }

    /// Synthesise an implicit return if the body fell off the end without one. Per
    /// spec.md §4.10, a function whose declared return type is non-`Void` but whose
    /// body is an exhaustive if/else expression chain already leaves its value in
    /// `RETURN_REG` on every path; this only covers the `Void`-returning fallthrough
    /// case plus the module-init function, which never returns a value.
    pub(crate) fn emit_implicit_return(&mut self) {
        if self.had_return {
            return;
        }
        self.buf.set_synthetic_location();
        self.buf.append_instruction(Op::ReturnVoid, 0, 0, 0);
        self.had_return = true;
    }

    pub(crate) fn mark_returned(&mut self) {
        self.had_return = true;
    }

    pub(crate) fn report(&self, diag: Diagnostic) {
        self.module.report(diag);
    }

    pub(crate) fn synthetic_loc(&self) -> SourceLoc {
        SourceLoc::synthetic()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_module_init(&self) -> bool {
        self.is_module_init
    }

    /// Allocate a temp, reporting `RegistersExhausted` (E9001) and degrading to
    /// register 0 instead of panicking when a pathological input runs the frame out
    /// of addressable registers (spec.md §4.13 -- codegen failures are diagnostics).
    pub(crate) fn alloc_temp(&mut self) -> Register {
        match self.ra.alloc_temp() {
            Ok(r) => r,
            Err(_) => {
                self.report_registers_exhausted();
                0
            }
        }
    }

    pub(crate) fn alloc_local(&mut self) -> Register {
        match self.ra.alloc_local() {
            Ok(r) => r,
            Err(_) => {
                self.report_registers_exhausted();
                0
            }
        }
    }

    /// Allocate a module-wide global register for a top-level `let`, via the shared
    /// `GlobalRegisters` pool on `ModuleCtx` rather than this function's own per-frame
    /// allocator -- spec.md §4.6 requires top-level bindings to live in the register
    /// space every importer addresses by number, not a module-init-frame-local slot.
    pub(crate) fn alloc_global(&mut self) -> Register {
        match self.module.globals.borrow_mut().reserve_global() {
            Ok(r) => r,
            Err(_) => {
                self.report_registers_exhausted();
                0
            }
        }
    }

    pub(crate) fn alloc_consecutive_temps(&mut self, count: usize) -> Register {
        match self.ra.alloc_consecutive_temps(count) {
            Ok(r) => r,
            Err(_) => {
                self.report_registers_exhausted();
                0
            }
        }
    }

    fn report_registers_exhausted(&self) {
        self.report(Diagnostic::new(
            DiagCode::RegistersExhausted,
            format!("function {:?} ran out of addressable registers", self.name),
        ));
    }

    /// Report an internal codegen invariant violation (a jump reservation/patch
    /// mismatch) as a diagnostic rather than unwrapping, per spec.md §4.13.
    pub(crate) fn checked_patch(&mut self, result: Result<(), crate::bytecode::PatchError>) {
        if let Err(e) = result {
            self.report(Diagnostic::new(
                DiagCode::UnpatchedJump,
                format!("function {:?}: {}", self.name, e),
            ));
        }
    }

    pub(crate) fn emit_backward_jump(&mut self, loop_start: usize) {
        let result = self.buf.emit_backward_jump(loop_start);
        self.checked_patch(result);
    }

    pub(crate) fn leave_loop(&mut self) {
        let result = self.cf.leave_loop(&mut self.buf);
        self.checked_patch(result);
    }

    pub(crate) fn update_continue(&mut self, target: usize) {
        let result = self.cf.update_continue(&mut self.buf, target);
        self.checked_patch(result);
    }

    pub(crate) fn export_kind_for(decl_is_fn: bool) -> ExportKind {
        if decl_is_fn { ExportKind::Function } else { ExportKind::Global }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::{Expr, ExprKind, IntKind, Module, Param, Stmt};
    use crate::compiler::{compile_module, CodegenOptions};
    use crate::module_manager::InMemoryModuleManager;

    fn loc() -> SourceLoc {
        SourceLoc::synthetic()
    }

    fn int_lit(v: i64) -> Expr {
        Expr::new(ExprKind::IntLiteral(v, IntKind::I32), Type::I32, loc())
    }

    fn ident(name: &str) -> Expr {
        Expr::new(ExprKind::Identifier(name.to_string()), Type::I32, loc())
    }

    /// `fn add(a: i32, b: i32) -> i32 { return a + b; }`, compiled as a nested function
    /// of an otherwise-empty module -- exercises `compile_nested_function` end to end
    /// through `lower::stmt::compile_block` and `lower::expr::compile_binary`.
    #[test]
    fn nested_function_compiles_without_errors_and_is_recorded() {
        let decl = FunctionDecl {
            name: "add".to_string(),
            params: vec![
                Param { name: "a".to_string(), ty: Type::I32 },
                Param { name: "b".to_string(), ty: Type::I32 },
            ],
            return_ty: Type::I32,
            body: vec![Stmt::Return {
                value: Some(Expr::new(
                    ExprKind::Binary {
                        op: crate::ast::BinOp::Add,
                        lhs: Box::new(ident("a")),
                        rhs: Box::new(ident("b")),
                    },
                    Type::I32,
                    loc(),
                )),
                loc: loc(),
            }],
            is_public: true,
            owner_struct: None,
            is_instance_method: false,
            loc: loc(),
        };

        let module = Module {
            name: "main".to_string(),
            stmts: vec![Stmt::Function(decl)],
        };

        let mgr = InMemoryModuleManager::new();
        let ctx = compile_module(&module, &mgr, CodegenOptions::default());

        assert!(!ctx.has_errors(), "{:?}", ctx.diagnostics.borrow().iter().collect::<Vec<_>>());
        assert_eq!(ctx.functions.borrow().len(), 2, "module init plus the declared function");
        assert!(ctx.function_index.borrow().contains_key("add"));
        let exported = ctx.linker.borrow().exports().iter().any(|e| e.name == "add");
        assert!(exported, "pub fn should be recorded as an export");
    }

    /// A local declared `let` (not `mut`) rejects a later assignment.
    #[test]
    fn assigning_to_an_immutable_local_is_diagnosed() {
        let module = Module {
            name: "main".to_string(),
            stmts: vec![
                Stmt::VarDecl {
                    name: "x".to_string(),
                    ty: Type::I32,
                    mutable: false,
                    is_public: false,
                    init: int_lit(1),
                    loc: loc(),
                },
                Stmt::Assign {
                    target: crate::ast::AssignTarget::Name("x".to_string()),
                    value: int_lit(2),
                    loc: loc(),
                },
            ],
        };

        let mgr = InMemoryModuleManager::new();
        let ctx = compile_module(&module, &mgr, CodegenOptions::default());
        assert!(ctx.has_errors());
    }
}
