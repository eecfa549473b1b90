//! Recursive-descent parser producing the typed AST directly: each node's `Type` is
//! resolved bottom-up as the grammar constructs it, consulting `annotate::TypeEnv` for
//! declared variable/function/struct/enum types the same way the teacher's
//! `parse_list`/`parse_sexpr` consult nothing at all (the teacher's language is
//! untyped) -- here every production that yields an `Expr` or binds a name also
//! updates or reads the environment, so there is no separate tree-walk needed to
//! annotate what the parser already knows.
//!
//! Two simplifications, documented as deliberate for a throwaway reference frontend in
//! DESIGN.md: struct/enum types and functions must be declared before first use within
//! a module (no forward-reference resolution pass), and `use` imports only bind names
//! when the caller supplies a `ModuleManager` to resolve them against.

use std::rc::Rc;

use crate::ast::*;
use crate::diagnostics::{DiagCode, Diagnostic, SourceLoc};
use crate::frontend::annotate::{infer_binary, TypeEnv};
use crate::frontend::lexer::{Token, TokenKind};
use crate::module_manager::{ExportKind, ModuleManager};
use crate::types::{EnumType, EnumVariant, StructType, Type};

const BUILTINS: &[&str] = &[
    "push", "pop", "len", "sorted", "range", "input", "int", "float", "typeof", "istype",
    "assert_eq",
];

pub struct Parser<'m> {
    tokens: Vec<Token>,
    pos: usize,
    env: TypeEnv,
    soft_diags: Vec<Diagnostic>,
    module_manager: Option<&'m dyn ModuleManager>,
}

impl<'m> Parser<'m> {
    pub fn new(_file: Rc<str>, tokens: Vec<Token>) -> Parser<'m> {
        Parser {
            tokens,
            pos: 0,
            env: TypeEnv::new(),
            soft_diags: Vec::new(),
            module_manager: None,
        }
    }

    /// Attach a module manager so `use` statements can resolve the real type of each
    /// imported name instead of leaving it `Type::Unknown`.
    pub fn with_module_manager(mut self, mgr: &'m dyn ModuleManager) -> Parser<'m> {
        self.module_manager = Some(mgr);
        self
    }

    /// Diagnostics accumulated by the environment while parsing (undefined names,
    /// assignments to immutable bindings, unresolved imports) -- distinct from the
    /// fatal `Err(Diagnostic)` a genuine grammar violation returns, these don't stop
    /// the parse.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.soft_diags)
    }

    fn soft_diag(&mut self, diag: Diagnostic) {
        self.soft_diags.push(diag);
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_loc(&self) -> SourceLoc {
        self.tokens[self.pos].loc.clone()
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(DiagCode::MalformedTypedAst, message.into()).at(self.peek_loc())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", kind, self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected an identifier, found {:?}", other))),
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    // ---- module & statements -------------------------------------------------

    pub fn parse_module(&mut self) -> Result<Module, Diagnostic> {
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(Module { name: "main".to_string(), stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Use => self.parse_import(),
            TokenKind::Pub => {
                self.advance();
                self.parse_pub_item()
            }
            TokenKind::Let => self.parse_var_decl(false),
            TokenKind::Fn => Ok(Stmt::Function(self.parse_function_decl(false, None)?)),
            TokenKind::Struct => self.parse_struct_decl(false),
            TokenKind::Enum => self.parse_enum_decl(false),
            TokenKind::Impl => self.parse_impl_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Throw => self.parse_throw(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let loc = self.peek_loc();
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Break { loc })
            }
            TokenKind::Continue => {
                let loc = self.peek_loc();
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Continue { loc })
            }
            TokenKind::Print => self.parse_print(),
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    fn parse_pub_item(&mut self) -> Result<Stmt, Diagnostic> {
        match self.peek().clone() {
            TokenKind::Let => self.parse_var_decl(true),
            TokenKind::Fn => Ok(Stmt::Function(self.parse_function_decl(true, None)?)),
            TokenKind::Struct => self.parse_struct_decl(true),
            TokenKind::Enum => self.parse_enum_decl(true),
            other => Err(self.error(format!("expected an item after 'pub', found {:?}", other))),
        }
    }

    fn parse_var_decl(&mut self, is_public: bool) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // let
        let mutable = if self.at(&TokenKind::Mut) {
            self.advance();
            true
        } else {
            false
        };
        let name = self.expect_ident()?;
        let annotation = if self.at(&TokenKind::Colon) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let init = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        let ty = annotation.unwrap_or_else(|| init.ty.clone());
        self.env.declare_var(&name, ty.clone(), mutable);
        Ok(Stmt::VarDecl { name, ty, mutable, is_public, init, loc })
    }

    fn parse_function_decl(
        &mut self,
        is_public: bool,
        owner_struct: Option<String>,
    ) -> Result<FunctionDecl, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // fn
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;

        self.env.enter_scope();

        let mut is_instance_method = false;
        if owner_struct.is_some() {
            if let TokenKind::Ident(n) = self.peek().clone() {
                if n == "self" {
                    self.advance();
                    is_instance_method = true;
                    if self.at(&TokenKind::Comma) {
                        self.advance();
                    }
                }
            }
        }
        if is_instance_method {
            let self_ty = owner_struct
                .as_deref()
                .and_then(|s| self.env.lookup_struct(s))
                .map(Type::Struct)
                .unwrap_or(Type::Unknown);
            self.env.declare_var("self", self_ty, false);
        }

        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let pname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let pty = self.parse_type()?;
            self.env.declare_var(&pname, pty.clone(), false);
            params.push(Param { name: pname, ty: pty });
            if self.at(&TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RParen)?;

        let return_ty = if self.at(&TokenKind::Arrow) {
            self.advance();
            self.parse_type()?
        } else {
            Type::Void
        };

        let full_name = match &owner_struct {
            Some(s) => format!("{}.{}", s, name),
            None => name.clone(),
        };
        self.env.declare_function(
            full_name,
            params.iter().map(|p| p.ty.clone()).collect(),
            return_ty.clone(),
        );

        let body = self.parse_block()?;
        self.env.exit_scope();

        Ok(FunctionDecl {
            name,
            params,
            return_ty,
            body,
            is_public,
            owner_struct,
            is_instance_method,
            loc,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(TokenKind::LBrace)?;
        self.env.enter_scope();
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        self.env.exit_scope();
        Ok(stmts)
    }

    fn parse_struct_decl(&mut self, is_public: bool) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // struct
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let fname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let fty = self.parse_type()?;
            fields.push((fname, fty));
            if self.at(&TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RBrace)?;
        let st = Rc::new(StructType { name: name.clone(), fields: fields.clone() });
        self.env.declare_struct(st);
        Ok(Stmt::Struct(StructDecl { name, fields, is_public, loc }))
    }

    fn parse_enum_decl(&mut self, is_public: bool) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // enum
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut variants = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let vname = self.expect_ident()?;
            let mut payload = Vec::new();
            if self.at(&TokenKind::LParen) {
                self.advance();
                while !self.at(&TokenKind::RParen) {
                    payload.push(self.parse_type()?);
                    if self.at(&TokenKind::Comma) {
                        self.advance();
                    }
                }
                self.expect(TokenKind::RParen)?;
            }
            variants.push(EnumVariantDecl { name: vname, payload });
            if self.at(&TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RBrace)?;
        let et = Rc::new(EnumType {
            name: name.clone(),
            variants: variants
                .iter()
                .map(|v| EnumVariant { name: v.name.clone(), payload: v.payload.clone() })
                .collect(),
        });
        self.env.declare_enum(et);
        Ok(Stmt::Enum(EnumDecl { name, variants, is_public, loc }))
    }

    fn parse_impl_block(&mut self) -> Result<Stmt, Diagnostic> {
        self.advance(); // impl
        let struct_name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let is_public = if self.at(&TokenKind::Pub) {
                self.advance();
                true
            } else {
                false
            };
            methods.push(self.parse_function_decl(is_public, Some(struct_name.clone()))?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Stmt::Impl(ImplBlock { struct_name, methods }))
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // if
        let cond = self.parse_expr_prec(false)?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.at(&TokenKind::Else) {
            self.advance();
            if self.at(&TokenKind::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_branch, else_branch, loc })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // while
        let cond = self.parse_expr_prec(false)?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body, loc })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // for
        let var_name = self.expect_ident()?;
        self.expect(TokenKind::In)?;
        let start = self.parse_expr_prec(false)?;

        if self.at(&TokenKind::DotDot) || self.at(&TokenKind::DotDotEq) {
            let inclusive = self.at(&TokenKind::DotDotEq);
            self.advance();
            let end = self.parse_expr_prec(false)?;
            let step = if self.at(&TokenKind::Step) {
                self.advance();
                Some(self.parse_expr_prec(false)?)
            } else {
                None
            };
            let var_ty = start.ty.clone();
            self.env.enter_scope();
            self.env.declare_var(&var_name, var_ty.clone(), false);
            let body = self.parse_block()?;
            self.env.exit_scope();
            Ok(Stmt::ForRange(RangeLoop {
                var_name,
                var_ty,
                start,
                end,
                step,
                inclusive,
                body,
                loc,
            }))
        } else {
            let elem_ty = match start.ty.base() {
                Type::Array(inner) => (**inner).clone(),
                _ => Type::Unknown,
            };
            self.env.enter_scope();
            self.env.declare_var(&var_name, elem_ty, false);
            let body = self.parse_block()?;
            self.env.exit_scope();
            Ok(Stmt::ForIter(ForIter { var_name, iterable: start, body, loc }))
        }
    }

    fn parse_try(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // try
        let body = self.parse_block()?;
        let (catch_var, catch_body) = if self.at(&TokenKind::Catch) {
            self.advance();
            self.expect(TokenKind::LParen)?;
            let v = self.expect_ident()?;
            self.expect(TokenKind::RParen)?;
            self.env.enter_scope();
            self.env.declare_var(&v, Type::Any, true);
            let cb = self.parse_block()?;
            self.env.exit_scope();
            (Some(v), Some(cb))
        } else {
            (None, None)
        };
        Ok(Stmt::Try { body, catch_var, catch_body, loc })
    }

    fn parse_throw(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // throw
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Throw { value, loc })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // return
        let value = if self.at(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Return { value, loc })
    }

    fn parse_print(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // print
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Print { args, loc })
    }

    fn parse_import(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // use
        let mut module = self.expect_ident()?;
        let mut kind = ImportKind::All;
        loop {
            if self.at(&TokenKind::Dot) {
                self.advance();
                if self.at(&TokenKind::LBrace) {
                    self.advance();
                    let mut items = Vec::new();
                    while !self.at(&TokenKind::RBrace) {
                        let symbol = self.expect_ident()?;
                        let alias = if self.at(&TokenKind::As) {
                            self.advance();
                            Some(self.expect_ident()?)
                        } else {
                            None
                        };
                        items.push(ImportItem { symbol, alias });
                        if self.at(&TokenKind::Comma) {
                            self.advance();
                        }
                    }
                    self.expect(TokenKind::RBrace)?;
                    kind = ImportKind::Named(items);
                    break;
                } else {
                    let seg = self.expect_ident()?;
                    module.push('.');
                    module.push_str(&seg);
                }
            } else {
                break;
            }
        }
        self.expect(TokenKind::Semicolon)?;
        self.bind_import(&module, &kind, &loc);
        Ok(Stmt::Import(Import { module, kind, loc }))
    }

    /// Best-effort binding of imported names into the environment so later
    /// references resolve to a real type instead of `UndefinedVariable`. A no-op if
    /// no `ModuleManager` was supplied -- imported names then stay unresolved, which
    /// is an acceptable gap in a reference frontend that exists to exercise the
    /// backend, not to replace a real module loader.
    fn bind_import(&mut self, module: &str, kind: &ImportKind, loc: &SourceLoc) {
        let mgr = match self.module_manager {
            Some(mgr) => mgr,
            None => return,
        };
        let Some(loaded) = mgr.find_module(module) else {
            self.soft_diag(
                Diagnostic::new(DiagCode::ModuleNotFound, format!("module `{}` not found", module))
                    .at(loc.clone()),
            );
            return;
        };
        let bind_one = |env: &mut TypeEnv, name: &str, entry: &crate::module_manager::ExportEntry| {
            match entry.kind {
                ExportKind::Function => {
                    if let Type::Function(params, ret) = &entry.ty {
                        env.declare_function(name.to_string(), params.clone(), (**ret).clone());
                    } else {
                        env.declare_function(name.to_string(), Vec::new(), entry.ty.clone());
                    }
                }
                ExportKind::Struct => {
                    if let Type::Struct(st) = &entry.ty {
                        env.declare_struct(st.clone());
                    }
                }
                ExportKind::Enum => {
                    if let Type::Enum(en) = &entry.ty {
                        env.declare_enum(en.clone());
                    }
                }
                ExportKind::Global => env.declare_var(name, entry.ty.clone(), false),
            }
        };
        match kind {
            ImportKind::All => {
                for entry in loaded.exports() {
                    bind_one(&mut self.env, &entry.name, entry);
                }
            }
            ImportKind::Named(items) => {
                for item in items {
                    match loaded.exports().iter().find(|e| e.name == item.symbol) {
                        Some(entry) => {
                            let local_name = item.alias.as_deref().unwrap_or(&item.symbol);
                            bind_one(&mut self.env, local_name, entry);
                        }
                        None => self.soft_diag(
                            Diagnostic::new(
                                DiagCode::ExportNotFound,
                                format!("module `{}` has no export `{}`", module, item.symbol),
                            )
                            .at(loc.clone()),
                        ),
                    }
                }
            }
        }
    }

    fn parse_expr_or_assign_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let loc = self.peek_loc();
        let expr = self.parse_expr()?;
        if self.at(&TokenKind::Eq) {
            self.advance();
            let target = Self::expr_to_assign_target(expr)?;
            let value = self.parse_expr()?;
            self.expect(TokenKind::Semicolon)?;
            if let AssignTarget::Name(name) = &target {
                match self.env.lookup_var(name) {
                    Some((_, mutable)) if !mutable => self.soft_diag(
                        Diagnostic::new(
                            DiagCode::AssignToImmutable,
                            format!("cannot assign to immutable variable `{}`", name),
                        )
                        .at(loc.clone()),
                    ),
                    None => self.soft_diag(
                        Diagnostic::new(DiagCode::UndefinedVariable, format!("undefined variable `{}`", name))
                            .at(loc.clone()),
                    ),
                    _ => {}
                }
            }
            Ok(Stmt::Assign { target, value, loc })
        } else {
            self.expect(TokenKind::Semicolon)?;
            Ok(Stmt::ExprStmt(expr))
        }
    }

    fn expr_to_assign_target(expr: Expr) -> Result<AssignTarget, Diagnostic> {
        match expr.kind {
            ExprKind::Identifier(name) => Ok(AssignTarget::Name(name)),
            ExprKind::Index { container, index } => {
                Ok(AssignTarget::Index { container: *container, index: *index })
            }
            ExprKind::Member { base, name } => Ok(AssignTarget::Member { base: *base, name }),
            _ => Err(Diagnostic::new(DiagCode::MalformedTypedAst, "invalid assignment target").at(expr.loc)),
        }
    }

    // ---- types ----------------------------------------------------------------

    fn parse_type(&mut self) -> Result<Type, Diagnostic> {
        match self.peek().clone() {
            TokenKind::LBracket => {
                self.advance();
                let inner = self.parse_type()?;
                self.expect(TokenKind::RBracket)?;
                Ok(Type::Array(Box::new(inner)))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(match name.as_str() {
                    "i32" => Type::I32,
                    "i64" => Type::I64,
                    "u32" => Type::U32,
                    "u64" => Type::U64,
                    "f64" => Type::F64,
                    "bool" => Type::Bool,
                    "str" | "string" => Type::Str,
                    "void" => Type::Void,
                    "any" => Type::Any,
                    other => self.env.lookup_named_type(other).unwrap_or_else(|| {
                        self.soft_diags.push(
                            Diagnostic::new(
                                DiagCode::MalformedTypedAst,
                                format!("unknown type `{}`", other),
                            )
                            .at(self.peek_loc()),
                        );
                        Type::Unknown
                    }),
                })
            }
            other => Err(self.error(format!("expected a type, found {:?}", other))),
        }
    }

    // ---- expressions ------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_expr_prec(true)
    }

    fn parse_expr_prec(&mut self, allow_struct_literal: bool) -> Result<Expr, Diagnostic> {
        self.parse_or(allow_struct_literal)
    }

    fn parse_or(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_and(allow)?;
        while self.at(&TokenKind::Or) {
            let loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_and(allow)?;
            lhs = Self::binary(BinOp::Or, lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_equality(allow)?;
        while self.at(&TokenKind::And) {
            let loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_equality(allow)?;
            lhs = Self::binary(BinOp::And, lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_relational(allow)?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            let loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_relational(allow)?;
            lhs = Self::binary(op, lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_additive(allow)?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            let loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_additive(allow)?;
            lhs = Self::binary(op, lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_multiplicative(allow)?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_multiplicative(allow)?;
            lhs = Self::binary(op, lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_unary(allow)?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_unary(allow)?;
            lhs = Self::binary(op, lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr, loc: SourceLoc) -> Expr {
        let ty = infer_binary(op, &lhs.ty, &rhs.ty);
        Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, loc)
    }

    fn parse_unary(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        match self.peek() {
            TokenKind::Minus => {
                let loc = self.peek_loc();
                self.advance();
                let operand = self.parse_unary(allow)?;
                let ty = operand.ty.clone();
                Ok(Expr::new(ExprKind::Unary { op: UnOp::Neg, operand: Box::new(operand) }, ty, loc))
            }
            TokenKind::Not => {
                let loc = self.peek_loc();
                self.advance();
                let operand = self.parse_unary(allow)?;
                Ok(Expr::new(ExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) }, Type::Bool, loc))
            }
            _ => self.parse_cast(allow),
        }
    }

    fn parse_cast(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut e = self.parse_postfix(allow)?;
        while self.at(&TokenKind::As) {
            let loc = e.loc.clone();
            self.advance();
            let target = self.parse_type()?;
            e = Expr::new(ExprKind::Cast { expr: Box::new(e), target: target.clone() }, target, loc);
        }
        Ok(e)
    }

    fn parse_postfix(&mut self, allow: bool) -> Result<Expr, Diagnostic> {
        let mut e = self.parse_primary(allow)?;
        loop {
            match self.peek().clone() {
                TokenKind::LParen => {
                    let loc = e.loc.clone();
                    self.advance();
                    let args = self.parse_call_args()?;
                    self.expect(TokenKind::RParen)?;
                    if let ExprKind::Identifier(name) = &e.kind {
                        if BUILTINS.contains(&name.as_str()) {
                            let ty = self.builtin_return_type(name, &args);
                            e = Expr::new(ExprKind::Builtin { name: name.clone(), args }, ty, loc);
                            continue;
                        }
                    }
                    let (is_method, ret_ty) = self.analyze_call(&e);
                    e = Expr::new(ExprKind::Call { callee: Box::new(e), args, is_method }, ret_ty, loc);
                }
                TokenKind::LBracket => {
                    let loc = e.loc.clone();
                    self.advance();
                    if self.at(&TokenKind::DotDot) {
                        self.advance();
                        let end = if self.at(&TokenKind::RBracket) {
                            None
                        } else {
                            Some(Box::new(self.parse_expr()?))
                        };
                        self.expect(TokenKind::RBracket)?;
                        let ty = e.ty.clone();
                        e = Expr::new(ExprKind::Slice { array: Box::new(e), start: None, end }, ty, loc);
                    } else {
                        let first = self.parse_expr()?;
                        if self.at(&TokenKind::DotDot) {
                            self.advance();
                            let end = if self.at(&TokenKind::RBracket) {
                                None
                            } else {
                                Some(Box::new(self.parse_expr()?))
                            };
                            self.expect(TokenKind::RBracket)?;
                            let ty = e.ty.clone();
                            e = Expr::new(
                                ExprKind::Slice { array: Box::new(e), start: Some(Box::new(first)), end },
                                ty,
                                loc,
                            );
                        } else {
                            self.expect(TokenKind::RBracket)?;
                            let ty = match e.ty.base() {
                                Type::Array(inner) => (**inner).clone(),
                                Type::Str => Type::Str,
                                _ => Type::Unknown,
                            };
                            e = Expr::new(
                                ExprKind::Index { container: Box::new(e), index: Box::new(first) },
                                ty,
                                loc,
                            );
                        }
                    }
                }
                TokenKind::Dot => {
                    let loc = e.loc.clone();
                    self.advance();
                    let name = self.expect_ident()?;
                    let ty = self.field_type(&e, &name);
                    e = Expr::new(ExprKind::Member { base: Box::new(e), name }, ty, loc);
                }
                TokenKind::ColonColon => {
                    let type_name = match &e.kind {
                        ExprKind::Identifier(name) => name.clone(),
                        _ => break,
                    };
                    let loc = e.loc.clone();
                    self.advance();
                    let variant = self.expect_ident()?;
                    let args = if self.at(&TokenKind::LParen) {
                        self.advance();
                        let a = self.parse_call_args()?;
                        self.expect(TokenKind::RParen)?;
                        a
                    } else {
                        Vec::new()
                    };
                    let ty = match self.env.lookup_enum(&type_name) {
                        Some(en) => Type::Enum(en),
                        None => {
                            self.soft_diag(
                                Diagnostic::new(
                                    DiagCode::UndefinedVariable,
                                    format!("unknown enum type `{}`", type_name),
                                )
                                .at(loc.clone()),
                            );
                            Type::Unknown
                        }
                    };
                    e = Expr::new(ExprKind::EnumConstruct { type_name, variant, args }, ty, loc);
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(args)
    }

    /// Returns `(is_method, return_type)` for a call whose callee has just been
    /// parsed, per the same `Identifier` (free function) / `Member{base:
    /// Identifier(type)}` (static call) / `Member{base: <value>}` (instance method)
    /// shapes `lower::expr::resolve_callee_name` and `compile_call` dispatch on.
    fn analyze_call(&mut self, callee: &Expr) -> (bool, Type) {
        match &callee.kind {
            ExprKind::Identifier(name) => {
                if let Some((_, ret)) = self.env.lookup_function(name) {
                    return (false, ret.clone());
                }
                if let Some((Type::Function(_, ret), _)) = self.env.lookup_var(name) {
                    return (false, (*ret).clone());
                }
                self.soft_diag(
                    Diagnostic::new(DiagCode::UndefinedVariable, format!("call to undefined function `{}`", name))
                        .at(callee.loc.clone()),
                );
                (false, Type::Unknown)
            }
            ExprKind::Member { base, name } => {
                if let ExprKind::Identifier(type_name) = &base.kind {
                    if self.env.lookup_var(type_name).is_none() && self.env.lookup_struct(type_name).is_some() {
                        let mangled = format!("{}.{}", type_name, name);
                        let ret = self
                            .env
                            .lookup_function(&mangled)
                            .map(|(_, r)| r.clone())
                            .unwrap_or(Type::Unknown);
                        return (false, ret);
                    }
                }
                if let Type::Struct(st) = base.ty.base() {
                    let mangled = format!("{}.{}", st.name, name);
                    let ret = self
                        .env
                        .lookup_function(&mangled)
                        .map(|(_, r)| r.clone())
                        .unwrap_or(Type::Unknown);
                    return (true, ret);
                }
                (true, Type::Unknown)
            }
            _ => (false, Type::Unknown),
        }
    }

    fn field_type(&self, base: &Expr, name: &str) -> Type {
        match base.ty.base() {
            Type::Struct(st) => st.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t.clone()).unwrap_or(Type::Unknown),
            _ => Type::Unknown,
        }
    }

    fn builtin_return_type(&self, name: &str, args: &[Expr]) -> Type {
        match name {
            "push" => Type::Void,
            "pop" => args
                .first()
                .map(|a| match a.ty.base() {
                    Type::Array(inner) => (**inner).clone(),
                    _ => Type::Unknown,
                })
                .unwrap_or(Type::Unknown),
            "len" => Type::I32,
            "sorted" => args.first().map(|a| a.ty.clone()).unwrap_or(Type::Unknown),
            "range" => Type::Array(Box::new(Type::I32)),
            "input" => Type::Str,
            "int" => Type::I32,
            "float" => Type::F64,
            "typeof" => Type::Str,
            "istype" => Type::Bool,
            "assert_eq" => Type::Void,
            _ => Type::Unknown,
        }
    }

    fn parse_primary(&mut self, allow_struct_literal: bool) -> Result<Expr, Diagnostic> {
        let loc = self.peek_loc();
        match self.peek().clone() {
            TokenKind::Int(text) => {
                self.advance();
                let (value, kind) = Self::parse_int_literal(&text, &loc)?;
                let ty = match kind {
                    IntKind::I32 => Type::I32,
                    IntKind::I64 => Type::I64,
                    IntKind::U32 => Type::U32,
                    IntKind::U64 => Type::U64,
                };
                Ok(Expr::new(ExprKind::IntLiteral(value, kind), ty, loc))
            }
            TokenKind::Float(text) => {
                self.advance();
                let value: f64 = text
                    .parse()
                    .map_err(|_| self.error(format!("invalid float literal `{}`", text)))?;
                Ok(Expr::new(ExprKind::FloatLiteral(value), Type::F64, loc))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::StringLiteral(Rc::from(s.as_str())), Type::Str, loc))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(true), Type::Bool, loc))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(false), Type::Bool, loc))
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_expr_prec(true)?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            TokenKind::LBracket => self.parse_array_expr(loc),
            TokenKind::Match => self.parse_match(),
            TokenKind::Ident(name) => {
                self.advance();
                if allow_struct_literal && self.at(&TokenKind::LBrace) && self.env.lookup_struct(&name).is_some() {
                    return self.parse_struct_literal(name, loc);
                }
                if let Some((ty, _)) = self.env.lookup_var(&name) {
                    return Ok(Expr::new(ExprKind::Identifier(name), ty, loc));
                }
                if self.env.lookup_function(&name).is_some()
                    || self.env.lookup_struct(&name).is_some()
                    || self.env.lookup_enum(&name).is_some()
                {
                    return Ok(Expr::new(ExprKind::Identifier(name), Type::Unknown, loc));
                }
                self.soft_diag(
                    Diagnostic::new(DiagCode::UndefinedVariable, format!("undefined name `{}`", name)).at(loc.clone()),
                );
                Ok(Expr::new(ExprKind::Identifier(name), Type::Unknown, loc))
            }
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_array_expr(&mut self, loc: SourceLoc) -> Result<Expr, Diagnostic> {
        self.advance(); // [
        if self.at(&TokenKind::RBracket) {
            self.advance();
            return Ok(Expr::new(ExprKind::ArrayLiteral(Vec::new()), Type::Array(Box::new(Type::Unknown)), loc));
        }
        let first = self.parse_expr_prec(true)?;
        if self.at(&TokenKind::Semicolon) {
            self.advance();
            let count = self.parse_expr_prec(true)?;
            self.expect(TokenKind::RBracket)?;
            let ty = Type::Array(Box::new(first.ty.clone()));
            return Ok(Expr::new(
                ExprKind::ArrayFill { value: Box::new(first), count: Box::new(count) },
                ty,
                loc,
            ));
        }
        let elem_ty = first.ty.clone();
        let mut items = vec![first];
        while self.at(&TokenKind::Comma) {
            self.advance();
            if self.at(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr_prec(true)?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::ArrayLiteral(items), Type::Array(Box::new(elem_ty)), loc))
    }

    fn parse_struct_literal(&mut self, type_name: String, loc: SourceLoc) -> Result<Expr, Diagnostic> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let fname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let fval = self.parse_expr_prec(true)?;
            fields.push(StructFieldInit { name: fname, value: fval });
            if self.at(&TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RBrace)?;
        let ty = self.env.lookup_struct(&type_name).map(Type::Struct).unwrap_or(Type::Unknown);
        Ok(Expr::new(ExprKind::StructLiteral { type_name, fields }, ty, loc))
    }

    fn parse_match(&mut self) -> Result<Expr, Diagnostic> {
        let loc = self.peek_loc();
        self.advance(); // match
        let subject = self.parse_expr_prec(false)?;
        let subject_ty = subject.ty.clone();
        self.expect(TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let arm_loc = self.peek_loc();
            self.env.enter_scope();
            let (pattern, bindings) = self.parse_pattern(&subject_ty)?;
            self.expect(TokenKind::FatArrow)?;
            let body = self.parse_expr_prec(true)?;
            self.env.exit_scope();
            arms.push(MatchArm { pattern, bindings, body: Box::new(body), loc: arm_loc });
            if self.at(&TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RBrace)?;
        let ty = arms.first().map(|a| a.body.ty.clone()).unwrap_or(Type::Unknown);
        Ok(Expr::new(ExprKind::Match { subject: Box::new(subject), arms }, ty, loc))
    }

    fn parse_pattern(&mut self, subject_ty: &Type) -> Result<(Option<Pattern>, Vec<String>), Diagnostic> {
        match self.peek().clone() {
            TokenKind::Ident(name) if name == "_" => {
                self.advance();
                Ok((None, Vec::new()))
            }
            TokenKind::Int(text) => {
                let loc = self.peek_loc();
                self.advance();
                let (value, _) = Self::parse_int_literal(&text, &loc)?;
                Ok((Some(Pattern::IntLiteral(value)), Vec::new()))
            }
            TokenKind::True => {
                self.advance();
                Ok((Some(Pattern::BoolLiteral(true)), Vec::new()))
            }
            TokenKind::False => {
                self.advance();
                Ok((Some(Pattern::BoolLiteral(false)), Vec::new()))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok((Some(Pattern::StringLiteral(Rc::from(s.as_str()))), Vec::new()))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.at(&TokenKind::ColonColon) {
                    self.advance();
                    let variant = self.expect_ident()?;
                    let enum_type = match subject_ty.base() {
                        Type::Enum(en) => Rc::from(en.name.as_str()),
                        _ => Rc::from(name.as_str()),
                    };
                    let mut bindings = Vec::new();
                    if self.at(&TokenKind::LParen) {
                        self.advance();
                        while !self.at(&TokenKind::RParen) {
                            bindings.push(self.expect_ident()?);
                            if self.at(&TokenKind::Comma) {
                                self.advance();
                            }
                        }
                        self.expect(TokenKind::RParen)?;
                    }
                    if let Type::Enum(en) = subject_ty.base() {
                        if let Some(v) = en.variant(&variant) {
                            for (i, bname) in bindings.iter().enumerate() {
                                let bty = v.payload.get(i).cloned().unwrap_or(Type::Unknown);
                                self.env.declare_var(bname, bty, false);
                            }
                        }
                    } else {
                        for bname in &bindings {
                            self.env.declare_var(bname, Type::Unknown, false);
                        }
                    }
                    Ok((Some(Pattern::EnumVariant { enum_type, variant }), bindings))
                } else {
                    self.env.declare_var(&name, subject_ty.clone(), false);
                    Ok((None, vec![name]))
                }
            }
            other => Err(self.error(format!("invalid match pattern, found {:?}", other))),
        }
    }

    fn parse_int_literal(text: &str, loc: &SourceLoc) -> Result<(i64, IntKind), Diagnostic> {
        let (digits, kind) = if let Some(d) = text.strip_suffix("i64") {
            (d, IntKind::I64)
        } else if let Some(d) = text.strip_suffix("u64") {
            (d, IntKind::U64)
        } else if let Some(d) = text.strip_suffix("u32") {
            (d, IntKind::U32)
        } else if let Some(d) = text.strip_suffix("i32") {
            (d, IntKind::I32)
        } else {
            (text, IntKind::I32)
        };
        let value: i64 = digits.parse().map_err(|_| {
            Diagnostic::new(DiagCode::MalformedTypedAst, format!("invalid integer literal `{}`", text))
                .at(loc.clone())
        })?;
        Ok((value, kind))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frontend::lexer::tokenize;

    fn parse(source: &str) -> (Module, Vec<Diagnostic>) {
        let tokens = tokenize(Rc::from("test"), source).unwrap();
        let mut p = Parser::new(Rc::from("test"), tokens);
        let module = p.parse_module().unwrap();
        (module, p.take_diagnostics())
    }

    #[test]
    fn parses_a_let_and_infers_its_type_from_the_initializer() {
        let (module, diags) = parse("let x = 1 + 2;");
        assert!(diags.is_empty());
        match &module.stmts[0] {
            Stmt::VarDecl { ty, .. } => assert_eq!(*ty, Type::I32),
            other => panic!("expected a VarDecl, got {:?}", other),
        }
    }

    #[test]
    fn mixed_numeric_addition_promotes_per_the_shared_rule() {
        let (module, _) = parse("let x: i64 = 1; let y = x + 2;");
        match &module.stmts[1] {
            Stmt::VarDecl { ty, .. } => assert_eq!(*ty, Type::I64),
            other => panic!("expected a VarDecl, got {:?}", other),
        }
    }

    #[test]
    fn undefined_variable_reference_is_a_soft_diagnostic() {
        let (_, diags) = parse("let x = y;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, DiagCode::UndefinedVariable);
    }

    #[test]
    fn function_call_resolves_the_declared_return_type() {
        let (module, diags) = parse("fn add(a: i32, b: i32) -> i32 { return a + b; } let x = add(1, 2);");
        assert!(diags.is_empty(), "{:?}", diags);
        match &module.stmts[1] {
            Stmt::VarDecl { ty, .. } => assert_eq!(*ty, Type::I32),
            other => panic!("expected a VarDecl, got {:?}", other),
        }
    }

    #[test]
    fn struct_field_access_resolves_its_declared_type() {
        let (module, diags) = parse(
            "struct Point { x: i32, y: i32 } let p = Point { x: 1, y: 2 }; let px = p.x;",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        match &module.stmts[2] {
            Stmt::VarDecl { ty, .. } => assert_eq!(*ty, Type::I32),
            other => panic!("expected a VarDecl, got {:?}", other),
        }
    }

    #[test]
    fn for_range_loop_parses_with_an_exclusive_bound() {
        let (module, diags) = parse("for i in 0..10 { print(i); }");
        assert!(diags.is_empty(), "{:?}", diags);
        match &module.stmts[0] {
            Stmt::ForRange(range) => {
                assert!(!range.inclusive);
                assert!(range.step.is_none());
            }
            other => panic!("expected a ForRange, got {:?}", other),
        }
    }

    #[test]
    fn assignment_to_an_immutable_binding_is_flagged() {
        let (_, diags) = parse("let x = 1; x = 2;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, DiagCode::AssignToImmutable);
    }
}
