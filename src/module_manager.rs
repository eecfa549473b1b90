//! The module manager: an external collaborator (spec.md §6) that holds already-loaded
//! modules and their export metadata. This crate only defines the trait contract it
//! consumes (`find_module`/`resolve_export`) plus an in-memory reference
//! implementation used by tests and the reference frontend's integration scenarios.

use std::collections::HashMap;

use crate::opcode::Register;
use crate::types::Type;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Global,
    Function,
    Struct,
    Enum,
}

#[derive(Clone, Debug)]
pub struct ExportEntry {
    pub name: String,
    pub kind: ExportKind,
    pub register: Register,
    pub ty: Type,
}

/// A module as seen from the importing side: its name and the parallel
/// (names, kinds, registers, types) table spec.md §6 specifies.
pub struct LoadedModule {
    pub name: String,
    exports: Vec<ExportEntry>,
}

impl LoadedModule {
    pub fn new(name: impl Into<String>) -> LoadedModule {
        LoadedModule {
            name: name.into(),
            exports: Vec::new(),
        }
    }

    pub fn with_export(mut self, entry: ExportEntry) -> LoadedModule {
        self.exports.push(entry);
        self
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }
}

/// The external contract: find an already-loaded module by name, and resolve one of
/// its exported symbols. Exported register indices are part of the contract -- the
/// codegen reserves them verbatim in the importing module (spec.md §6) so identifier
/// loads compile to the same register number the exporter uses.
pub trait ModuleManager {
    fn find_module(&self, name: &str) -> Option<&LoadedModule>;

    fn resolve_export(&self, module: &str, symbol: &str) -> Option<&ExportEntry> {
        self.find_module(module)?
            .exports()
            .iter()
            .find(|e| e.name == symbol)
    }
}

/// A reference `ModuleManager` backed by an in-process map, for tests and the
/// integration scenarios exercising spec.md §8 scenario 3.
#[derive(Default)]
pub struct InMemoryModuleManager {
    modules: HashMap<String, LoadedModule>,
}

impl InMemoryModuleManager {
    pub fn new() -> InMemoryModuleManager {
        InMemoryModuleManager::default()
    }

    pub fn register(&mut self, module: LoadedModule) {
        self.modules.insert(module.name.clone(), module);
    }
}

impl ModuleManager for InMemoryModuleManager {
    fn find_module(&self, name: &str) -> Option<&LoadedModule> {
        self.modules.get(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_export_finds_a_known_symbol() {
        let mut mgr = InMemoryModuleManager::new();
        mgr.register(LoadedModule::new("math").with_export(ExportEntry {
            name: "pi".into(),
            kind: ExportKind::Global,
            register: 3,
            ty: Type::F64,
        }));

        let entry = mgr.resolve_export("math", "pi").unwrap();
        assert_eq!(entry.register, 3);
        assert_eq!(entry.ty, Type::F64);
    }

    #[test]
    fn unknown_module_or_symbol_resolves_to_none() {
        let mgr = InMemoryModuleManager::new();
        assert!(mgr.resolve_export("math", "pi").is_none());

        let mut mgr = InMemoryModuleManager::new();
        mgr.register(LoadedModule::new("math"));
        assert!(mgr.resolve_export("math", "sqrt").is_none());
    }
}
