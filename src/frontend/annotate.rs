//! Local type propagation: the symbol tables and inference rules the parser
//! (`parser.rs`) consults while it builds each node, so the typed AST it hands to
//! `compiler::compile_module` always carries a resolved `Type` rather than a second
//! tree-walking pass re-deriving what the grammar already knows bottom-up. `TypeEnv`
//! plays the role the teacher's `Variables`/`Scope` stack plays at parse time, widened
//! from "register slot" to "declared type + mutability", and `infer_binary` is the
//! parser-facing half of spec.md §4.8's promotion rules (the other half,
//! `Type::promote`, lives in `types.rs` and is shared with the codegen itself so both
//! sides of the contract agree on the same four rules).

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinOp, Module};
use crate::diagnostics::DiagnosticBag;
use crate::types::{EnumType, StructType, Type};

#[derive(Clone)]
struct VarInfo {
    ty: Type,
    mutable: bool,
}

/// The parser's running symbol table: declared variables (block-scoped), function
/// signatures, and struct/enum type definitions. Functions and types must be declared
/// before their first use within a module -- see DESIGN.md's Open Question decision on
/// this being a deliberate simplification of a throwaway reference frontend, not a
/// restriction the backend itself imposes.
pub struct TypeEnv {
    vars: Vec<HashMap<String, VarInfo>>,
    functions: HashMap<String, (Vec<Type>, Type)>,
    structs: HashMap<String, Rc<StructType>>,
    enums: HashMap<String, Rc<EnumType>>,
}

impl TypeEnv {
    pub fn new() -> TypeEnv {
        TypeEnv {
            vars: vec![HashMap::new()],
            functions: HashMap::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
        }
    }

    pub fn enter_scope(&mut self) {
        self.vars.push(HashMap::new());
    }

    pub fn exit_scope(&mut self) {
        self.vars.pop();
    }

    pub fn declare_var(&mut self, name: &str, ty: Type, mutable: bool) {
        self.vars
            .last_mut()
            .expect("TypeEnv always has at least one scope")
            .insert(name.to_string(), VarInfo { ty, mutable });
    }

    /// Returns `(type, mutable)` for an in-scope variable, searching innermost-out.
    pub fn lookup_var(&self, name: &str) -> Option<(Type, bool)> {
        for frame in self.vars.iter().rev() {
            if let Some(info) = frame.get(name) {
                return Some((info.ty.clone(), info.mutable));
            }
        }
        None
    }

    pub fn declare_function(&mut self, name: String, params: Vec<Type>, ret: Type) {
        self.functions.insert(name, (params, ret));
    }

    pub fn lookup_function(&self, name: &str) -> Option<&(Vec<Type>, Type)> {
        self.functions.get(name)
    }

    pub fn declare_struct(&mut self, st: Rc<StructType>) {
        self.structs.insert(st.name.clone(), st);
    }

    pub fn lookup_struct(&self, name: &str) -> Option<Rc<StructType>> {
        self.structs.get(name).cloned()
    }

    pub fn declare_enum(&mut self, en: Rc<EnumType>) {
        self.enums.insert(en.name.clone(), en);
    }

    pub fn lookup_enum(&self, name: &str) -> Option<Rc<EnumType>> {
        self.enums.get(name).cloned()
    }

    /// Resolve a bare type name that isn't one of the numeric/bool/string/void
    /// keywords: a previously-declared struct or enum.
    pub fn lookup_named_type(&self, name: &str) -> Option<Type> {
        if let Some(st) = self.lookup_struct(name) {
            return Some(Type::Struct(st));
        }
        if let Some(en) = self.lookup_enum(name) {
            return Some(Type::Enum(en));
        }
        None
    }
}

/// spec.md §4.8's implicit promotion rules: same-type is identity, otherwise the
/// wider of the two numeric ranks wins (`Type::promote`). Comparison and logical
/// operators always yield `bool`; anything neither operand resolves to a numeric type
/// for falls back to the left operand's type, mirroring the backend's own
/// literal-guess fallback (logged, not an error, at codegen time).
pub fn infer_binary(op: BinOp, lhs_ty: &Type, rhs_ty: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        return Type::Bool;
    }
    Type::promote(lhs_ty, rhs_ty).unwrap_or_else(|| lhs_ty.clone())
}

/// Placeholder for a second annotation pass: the reference frontend resolves types
/// inline while parsing (see `parser.rs`), so there is nothing left to do here once
/// parsing succeeds. Kept as an explicit entry point -- rather than folding this
/// responsibility silently into `parser.rs` -- so a fuller checker can be dropped in
/// later without moving the call site in `frontend::compile_source`.
pub fn annotate_module(_module: &mut Module, _diagnostics: &mut DiagnosticBag) {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_type_promotion_is_identity() {
        assert_eq!(infer_binary(BinOp::Add, &Type::I32, &Type::I32), Type::I32);
    }

    #[test]
    fn mixed_numeric_promotion_follows_the_shared_rule() {
        assert_eq!(infer_binary(BinOp::Add, &Type::I32, &Type::F64), Type::F64);
        assert_eq!(infer_binary(BinOp::Mul, &Type::U32, &Type::U64), Type::U64);
    }

    #[test]
    fn comparisons_and_logicals_are_always_bool() {
        assert_eq!(infer_binary(BinOp::Lt, &Type::I32, &Type::I64), Type::Bool);
        assert_eq!(infer_binary(BinOp::And, &Type::Bool, &Type::Bool), Type::Bool);
    }

    #[test]
    fn var_lookup_walks_scopes_innermost_out() {
        let mut env = TypeEnv::new();
        env.declare_var("x", Type::I32, false);
        env.enter_scope();
        env.declare_var("y", Type::Bool, true);
        assert_eq!(env.lookup_var("y"), Some((Type::Bool, true)));
        assert_eq!(env.lookup_var("x"), Some((Type::I32, false)));
        env.exit_scope();
        assert_eq!(env.lookup_var("y"), None);
    }
}
