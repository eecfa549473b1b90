//! Resolved types as produced by the (external) type checker. This is the contract the
//! backend consumes: `Type` is the `dataType` field spec.md refers to on typed AST nodes.

use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub struct StructType {
    pub name: String,
    /// Declared field order -- the backend must preserve this order when laying out
    /// struct literals and resolving field-access indices, since structs are
    /// represented at runtime as boxed arrays (see DESIGN.md).
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    /// Payload types for this variant, in constructor-argument order. Empty for a
    /// unit variant.
    pub payload: Vec<Type>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<EnumVariant>,
}

impl EnumType {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }

    pub fn variant(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    I32,
    I64,
    U32,
    U64,
    F64,
    Bool,
    Str,
    Void,
    Array(Box<Type>),
    Struct(Rc<StructType>),
    Enum(Rc<EnumType>),
    /// An instance of a struct or enum type named by the type checker but not
    /// further resolved at this AST node (e.g. a forward-declared type).
    Instance(Box<Type>),
    Function(Vec<Type>, Box<Type>),
    Any,
    Unknown,
    Error,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::I32 | Type::I64 | Type::U32 | Type::U64 | Type::F64
        )
    }

    /// Heap-backed values: the VM represents these as boxed/ref-counted objects rather
    /// than inline register values. Strings, arrays, structs and enums all qualify --
    /// `+` and `==`/`!=` on these route through the polymorphic opcodes.
    pub fn is_heap(&self) -> bool {
        matches!(
            self,
            Type::Str | Type::Array(_) | Type::Struct(_) | Type::Enum(_) | Type::Instance(_)
        )
    }

    pub fn base(&self) -> &Type {
        match self {
            Type::Instance(inner) => inner.base(),
            other => other,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self.base(), Type::Str)
    }

    /// Numeric promotion rank. The four explicit rules in spec.md §4.8 --
    /// i32⊕i64->i64, u32⊕u64->u64, i32⊕u32->u32, any⊕f64->f64 -- are all consistent
    /// with a single total order i32 < u32 < i64 < u64 < f64, so "pick max(kind)"
    /// for any other numeric pairing is just the same rule applied uniformly.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            Type::I32 => Some(0),
            Type::U32 => Some(1),
            Type::I64 => Some(2),
            Type::U64 => Some(3),
            Type::F64 => Some(4),
            _ => None,
        }
    }

    /// Determine the promoted type for a binary operation between two operand types.
    /// Returns `None` if neither type is numeric (caller falls back to boxed handling).
    pub fn promote(a: &Type, b: &Type) -> Option<Type> {
        if a == b {
            return Some(a.clone());
        }
        let ra = a.numeric_rank()?;
        let rb = b.numeric_rank()?;
        Some(if ra >= rb { a.clone() } else { b.clone() })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn promotion_matches_explicit_rules() {
        assert_eq!(Type::promote(&Type::I32, &Type::I64), Some(Type::I64));
        assert_eq!(Type::promote(&Type::I64, &Type::I32), Some(Type::I64));
        assert_eq!(Type::promote(&Type::U32, &Type::U64), Some(Type::U64));
        assert_eq!(Type::promote(&Type::I32, &Type::U32), Some(Type::U32));
        assert_eq!(Type::promote(&Type::I32, &Type::F64), Some(Type::F64));
        assert_eq!(Type::promote(&Type::U64, &Type::F64), Some(Type::F64));
    }

    #[test]
    fn promotion_is_order_invariant() {
        for (a, b) in [
            (Type::I32, Type::I64),
            (Type::U32, Type::U64),
            (Type::I32, Type::U32),
            (Type::I64, Type::F64),
        ] {
            assert_eq!(Type::promote(&a, &b), Type::promote(&b, &a));
        }
    }

    #[test]
    fn non_numeric_promotion_is_none() {
        assert_eq!(Type::promote(&Type::Bool, &Type::I32), None);
    }

    #[test]
    fn struct_field_index_preserves_declared_order() {
        let st = StructType {
            name: "Point".into(),
            fields: vec![
                ("x".into(), Type::I32),
                ("y".into(), Type::I32),
                ("label".into(), Type::Str),
            ],
        };
        assert_eq!(st.field_index("y"), Some(1));
        assert_eq!(st.field_index("label"), Some(2));
        assert_eq!(st.field_index("nope"), None);
    }
}
