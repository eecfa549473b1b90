//! C11: the module link layer. Export metadata recording, import resolution, and the
//! cross-module register reservation spec.md §4.11 describes. Grounded in the
//! teacher's `Function`/`get_nonlocals` export-adjacent bookkeeping (`function.rs`,
//! `compiler.rs`) for its "record now, patch the register in once known" pattern,
//! generalised to the module-export/import tables this backend's teacher has no
//! equivalent of (the teacher's Lisp has no module system).

use crate::module_manager::{ExportEntry, ExportKind};
use crate::opcode::Register;
use crate::scope::Scopes;
use crate::types::Type;

#[derive(Clone, Debug)]
pub struct ImportEntry {
    pub module: String,
    pub symbol: String,
    pub alias: String,
    pub kind: ExportKind,
    pub register: Register,
}

/// Sentinel register for an export recorded before its register is known (a function
/// or global whose initialiser hasn't compiled yet).
pub const EXPORT_REGISTER_PENDING: Register = Register::MAX;

#[derive(Default)]
pub struct ModuleLinker {
    exports: Vec<ExportEntry>,
    imports: Vec<ImportEntry>,
}

impl ModuleLinker {
    pub fn new() -> ModuleLinker {
        ModuleLinker::default()
    }

    /// Append an export entry ahead of its register being known.
    pub fn record_export(&mut self, name: impl Into<String>, kind: ExportKind, ty: Type) {
        self.exports.push(ExportEntry {
            name: name.into(),
            kind,
            register: EXPORT_REGISTER_PENDING,
            ty,
        });
    }

    /// Patch a previously recorded export's register once its declaration has
    /// compiled.
    pub fn set_export_metadata(&mut self, name: &str, reg: Register, ty: Type) {
        if let Some(entry) = self.exports.iter_mut().find(|e| e.name == name) {
            entry.register = reg;
            entry.ty = ty;
        }
    }

    /// Record an import, deduplicating by (module, symbol) so repeated references to
    /// the same imported name don't re-import it (spec.md §8 scenario 3).
    pub fn record_import(
        &mut self,
        module: impl Into<String>,
        symbol: impl Into<String>,
        alias: impl Into<String>,
        kind: ExportKind,
        register: Register,
    ) -> usize {
        let module = module.into();
        let symbol = symbol.into();
        if let Some(idx) = self
            .imports
            .iter()
            .position(|e| e.module == module && e.symbol == symbol)
        {
            return idx;
        }
        self.imports.push(ImportEntry {
            module,
            symbol,
            alias: alias.into(),
            kind,
            register,
        });
        self.imports.len() - 1
    }

    /// Bind a local symbol directly to the exporter's own register and record an
    /// import entry. Returns the already-bound register if this (module, symbol) pair
    /// was imported before. Exported register indices are a cross-module contract
    /// (spec.md §6): the codegen reserves them verbatim in the importing module so
    /// identifier loads compile to the same register number the exporter uses, rather
    /// than minting a fresh local register and remapping through it.
    pub fn finalize_import_symbol(
        &mut self,
        scopes: &mut Scopes,
        module: &str,
        symbol: &str,
        alias: &str,
        kind: ExportKind,
        ty: &Type,
        exporter_register: Register,
    ) -> Register {
        if let Some(existing) = self.imports.iter().find(|e| e.module == module && e.symbol == symbol) {
            return existing.register;
        }

        let _ = ty;
        scopes.declare(alias, exporter_register, false);
        self.record_import(module, symbol, alias, kind, exporter_register);
        exporter_register
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regalloc::RegisterAllocator;

    #[test]
    fn export_register_is_patched_after_declaration() {
        let mut linker = ModuleLinker::new();
        linker.record_export("area", ExportKind::Function, Type::I32);
        assert_eq!(linker.exports()[0].register, EXPORT_REGISTER_PENDING);
        linker.set_export_metadata("area", 4, Type::I32);
        assert_eq!(linker.exports()[0].register, 4);
    }

    #[test]
    fn repeated_import_of_same_symbol_is_not_recorded_twice() {
        let mut linker = ModuleLinker::new();
        let mut ra = RegisterAllocator::new(0);
        let mut scopes = Scopes::new(None);
        scopes.enter_scope(ra.enter_scope());

        let r1 = linker.finalize_import_symbol(&mut scopes, "math", "pi", "pi", ExportKind::Global, &Type::F64, 3);
        let r2 = linker.finalize_import_symbol(&mut scopes, "math", "pi", "pi", ExportKind::Global, &Type::F64, 3);
        assert_eq!(r1, r2);
        assert_eq!(linker.imports().len(), 1);
    }

    #[test]
    fn import_binds_directly_to_the_exporters_own_register() {
        let mut linker = ModuleLinker::new();
        let mut ra = RegisterAllocator::new(0);
        let mut scopes = Scopes::new(None);
        scopes.enter_scope(ra.enter_scope());

        let r = linker.finalize_import_symbol(&mut scopes, "math", "sqrt", "sqrt", ExportKind::Function, &Type::F64, 4);
        assert_eq!(r, 4, "no fresh register is minted; the importer reuses the exporter's index verbatim");
    }
}
