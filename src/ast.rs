//! The typed AST: the contract produced by the (external) type checker and consumed by
//! the expression/statement lowerers (C6/C7). Every node carries its resolved `Type`
//! alongside the original-shape payload, plus the pre-computed helpers spec.md §6
//! names (enum-variant indices, match-arm payload accessors, typed call arguments,
//! inclusive/step flags on range loops).

use std::rc::Rc;

use crate::diagnostics::SourceLoc;
use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
}

/// A node in the typed expression tree. `ty` is the resolved type (possibly
/// `Type::Unknown`/`Type::Error` if the checker could not annotate it, in which case
/// the binary-op coercer falls back per spec.md §4.8/§9).
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub loc: SourceLoc,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, loc: SourceLoc) -> Expr {
        Expr { kind, ty, loc }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntKind {
    I32,
    I64,
    U32,
    U64,
}

#[derive(Clone, Debug)]
pub struct StructFieldInit {
    pub name: String,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct MatchArm {
    /// `None` for a wildcard/default arm.
    pub pattern: Option<Pattern>,
    /// Names bound from the pattern's payload, in extractor order.
    pub bindings: Vec<String>,
    pub body: Box<Expr>,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    IntLiteral(i64),
    BoolLiteral(bool),
    StringLiteral(Rc<str>),
    /// `enum_type`.`variant`, matched via `ENUM_TAG_EQ`.
    EnumVariant { enum_type: Rc<str>, variant: String },
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntLiteral(i64, IntKind),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(Rc<str>),
    Identifier(String),
    ArrayLiteral(Vec<Expr>),
    ArrayFill {
        value: Box<Expr>,
        count: Box<Expr>,
    },
    StructLiteral {
        type_name: String,
        fields: Vec<StructFieldInit>,
    },
    EnumConstruct {
        type_name: String,
        variant: String,
        args: Vec<Expr>,
    },
    Index {
        container: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        array: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        target: Type,
    },
    Member {
        base: Box<Expr>,
        name: String,
    },
    /// A call. `is_method` is set when the callee was member-access syntax
    /// (`recv.method(...)`) flagged by the checker as a method reference.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        is_method: bool,
    },
    /// A recognised built-in (`push`, `pop`, `len`, `sorted`, `range`, `input`, `int`,
    /// `float`, `typeof`, `istype`, `assert_eq`).
    Builtin {
        name: String,
        args: Vec<Expr>,
    },
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
    },
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: Type,
    pub body: Vec<Stmt>,
    pub is_public: bool,
    /// Set for methods compiled as part of an `impl` block; mangled as `Struct.method`.
    pub owner_struct: Option<String>,
    /// An instance method takes an implicit leading `self` argument.
    pub is_instance_method: bool,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    pub is_public: bool,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariantDecl>,
    pub is_public: bool,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub struct EnumVariantDecl {
    pub name: String,
    pub payload: Vec<Type>,
}

#[derive(Clone, Debug)]
pub struct ImplBlock {
    pub struct_name: String,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Clone, Debug)]
pub enum ImportKind {
    /// `use mod.{a, b as c}`
    Named(Vec<ImportItem>),
    /// `use mod` -- import every export.
    All,
}

#[derive(Clone, Debug)]
pub struct ImportItem {
    pub symbol: String,
    pub alias: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    pub kind: ImportKind,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub enum AssignTarget {
    Name(String),
    Index { container: Expr, index: Expr },
    Member { base: Expr, name: String },
}

/// Range loop bounds, with the inclusive/step flags the type checker is expected to
/// pre-compute (spec.md §6).
#[derive(Clone, Debug)]
pub struct RangeLoop {
    pub var_name: String,
    pub var_ty: Type,
    pub start: Expr,
    pub end: Expr,
    pub step: Option<Expr>,
    pub inclusive: bool,
    pub body: Vec<Stmt>,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub struct ForIter {
    pub var_name: String,
    pub iterable: Expr,
    pub body: Vec<Stmt>,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    VarDecl {
        name: String,
        ty: Type,
        mutable: bool,
        is_public: bool,
        init: Expr,
        loc: SourceLoc,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
        loc: SourceLoc,
    },
    Print {
        args: Vec<Expr>,
        loc: SourceLoc,
    },
    ExprStmt(Expr),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        loc: SourceLoc,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        loc: SourceLoc,
    },
    ForRange(RangeLoop),
    ForIter(ForIter),
    Try {
        body: Vec<Stmt>,
        catch_var: Option<String>,
        catch_body: Option<Vec<Stmt>>,
        loc: SourceLoc,
    },
    Throw {
        value: Expr,
        loc: SourceLoc,
    },
    Return {
        value: Option<Expr>,
        loc: SourceLoc,
    },
    Break {
        loc: SourceLoc,
    },
    Continue {
        loc: SourceLoc,
    },
    Import(Import),
    Function(FunctionDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Impl(ImplBlock),
}

/// A compiled module's top-level typed AST.
#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub stmts: Vec<Stmt>,
}
