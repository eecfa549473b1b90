//! C4: the lexical scope stack and upvalue resolution for a single function being
//! compiled. Grounded in the teacher's `Variables`/`Scope`/`Nonlocal` (`compiler.rs`),
//! generalised from a single-letter s-expression binder to named declarations with
//! mutability and visibility, and from `RuntimeError` lookups to the zero-cost
//! `Option` returns the backend's internal API favours.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::opcode::Register;
use crate::regalloc::ScopeMark;

/// A declared name's compile-time binding: the register holding it, whether it was
/// declared `mut`, and whether any nested closure has captured it as an upvalue
/// (which the function compiler uses to emit `CLOSE_UPVALUES` on scope exit).
pub struct Symbol {
    pub register: Register,
    pub mutable: bool,
    closed_over: bool,
}

impl Symbol {
    fn new(register: Register, mutable: bool) -> Symbol {
        Symbol {
            register,
            mutable,
            closed_over: false,
        }
    }

    pub fn is_closed_over(&self) -> bool {
        self.closed_over
    }
}

struct ScopeFrame {
    bindings: HashMap<String, Symbol>,
    mark: ScopeMark,
}

/// Where an inner function found a name declared in an enclosing function: which
/// upvalue slot to address it by, and whether that upvalue itself closes over the
/// immediately-enclosing function's upvalue (nested closures) or a true stack local.
#[derive(Clone)]
pub struct UpvalueRef {
    pub index: u8,
    pub from_parent_local: bool,
    /// The parent's local register (if `from_parent_local`) or the parent's own
    /// upvalue index otherwise.
    pub parent_slot: u8,
    /// The captured name, so the enclosing function compiler can call
    /// `mark_captured` on its own scope without a separate name lookup.
    pub name: String,
}

/// What `resolve` found a name bound to.
pub enum Binding {
    Local(Register),
    Upvalue(u8),
}

/// The scope stack for one function. A new `Scopes` is pushed whenever the function
/// compiler (C10) descends into a nested function body, and it carries a reference to
/// its enclosing function's `Scopes` so upvalue capture can walk outward exactly as
/// the teacher's `Variables::parent` chain does. `upvalues`/`upvalue_names` sit behind
/// a `RefCell`, mirroring the teacher's `Variables::nonlocals`, so that `resolve` can
/// recurse through an arbitrary number of enclosing frames via a plain shared
/// `&'parent Scopes` reference: each enclosing frame registers its own upvalue entry
/// on demand as the recursion unwinds, rather than requiring a `&mut` parent chain.
pub struct Scopes<'parent> {
    parent: Option<&'parent Scopes<'parent>>,
    frames: Vec<ScopeFrame>,
    upvalues: RefCell<Vec<UpvalueRef>>,
    upvalue_names: RefCell<HashMap<String, u8>>,
}

impl<'parent> Scopes<'parent> {
    pub fn new(parent: Option<&'parent Scopes<'parent>>) -> Scopes<'parent> {
        Scopes {
            parent,
            frames: Vec::new(),
            upvalues: RefCell::new(Vec::new()),
            upvalue_names: RefCell::new(HashMap::new()),
        }
    }

    pub fn enter_scope(&mut self, mark: ScopeMark) {
        self.frames.push(ScopeFrame {
            bindings: HashMap::new(),
            mark,
        });
    }

    /// Pop the innermost scope, returning the registers of any bindings a nested
    /// closure captured -- the caller emits `CLOSE_UPVALUES` for these before
    /// releasing the registers via `RegisterAllocator::exit_scope`.
    pub fn leave_scope(&mut self) -> (ScopeMark, Vec<Register>) {
        let frame = self.frames.pop().expect("leave_scope without matching enter_scope");
        let closed: Vec<Register> = frame
            .bindings
            .values()
            .filter(|s| s.closed_over)
            .map(|s| s.register)
            .collect();
        (frame.mark, closed)
    }

    pub fn declare(&mut self, name: &str, register: Register, mutable: bool) {
        let frame = self.frames.last_mut().expect("declare outside any scope");
        frame.bindings.insert(name.to_string(), Symbol::new(register, mutable));
    }

    /// True if `name` is already bound in the innermost scope -- a shadowing
    /// redeclaration in a nested block is fine, but a second declaration in the same
    /// block is a redefinition (spec.md E1001).
    pub fn is_declared_in_innermost_scope(&self, name: &str) -> bool {
        self.frames
            .last()
            .map(|f| f.bindings.contains_key(name))
            .unwrap_or(false)
    }

    /// Look up `name` in this function's own scopes only (no upvalue search).
    pub fn resolve_local(&self, name: &str) -> Option<&Symbol> {
        for frame in self.frames.iter().rev() {
            if let Some(sym) = frame.bindings.get(name) {
                return Some(sym);
            }
        }
        None
    }

    fn resolve_local_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        for frame in self.frames.iter_mut().rev() {
            if let Some(sym) = frame.bindings.get_mut(name) {
                return Some(sym);
            }
        }
        None
    }

    /// Resolve `name`, capturing it as an upvalue if it is not local to this function.
    /// When `name` lives more than one function out, this recurses into
    /// `parent.resolve`, which registers its own upvalue entry for `name` (closing
    /// over *its* parent in turn) before returning it to us to capture as well --
    /// so a name captured through two or more levels of nested closures threads an
    /// upvalue chain through every intermediate function, not just the immediate one.
    pub fn resolve(&self, name: &str) -> Option<Binding> {
        if let Some(sym) = self.resolve_local(name) {
            return Some(Binding::Local(sym.register));
        }

        if let Some(&idx) = self.upvalue_names.borrow().get(name) {
            return Some(Binding::Upvalue(idx));
        }

        let parent = self.parent?;
        let (from_parent_local, parent_slot) = match parent.resolve(name)? {
            Binding::Local(reg) => (true, reg),
            Binding::Upvalue(idx) => (false, idx),
        };

        let index = self.upvalues.borrow().len() as u8;
        self.upvalues.borrow_mut().push(UpvalueRef {
            index,
            from_parent_local,
            parent_slot,
            name: name.to_string(),
        });
        self.upvalue_names.borrow_mut().insert(name.to_string(), index);
        Some(Binding::Upvalue(index))
    }

    /// Mark a local binding as captured so its scope-exit emits `CLOSE_UPVALUES`.
    /// Called by the function compiler immediately after a nested closure's
    /// `resolve` walks outward and captures one of this function's locals.
    pub fn mark_captured(&mut self, name: &str) {
        if let Some(sym) = self.resolve_local_mut(name) {
            sym.closed_over = true;
        }
    }

    pub fn upvalues(&self) -> Vec<UpvalueRef> {
        self.upvalues.borrow().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regalloc::RegisterAllocator;

    #[test]
    fn local_resolves_without_touching_parent() {
        let mut ra = RegisterAllocator::new(0);
        let mut scopes = Scopes::new(None);
        scopes.enter_scope(ra.enter_scope());
        let reg = ra.alloc_local().unwrap();
        scopes.declare("x", reg, false);
        match scopes.resolve("x") {
            Some(Binding::Local(r)) => assert_eq!(r, reg),
            _ => panic!("expected a local binding"),
        }
    }

    #[test]
    fn nested_function_captures_outer_local_as_upvalue() {
        let mut outer_ra = RegisterAllocator::new(0);
        let mut outer = Scopes::new(None);
        outer.enter_scope(outer_ra.enter_scope());
        let reg = outer_ra.alloc_local().unwrap();
        outer.declare("counter", reg, true);

        let mut inner = Scopes::new(Some(&outer));
        let mut inner_ra = RegisterAllocator::new(0);
        inner.enter_scope(inner_ra.enter_scope());
        match inner.resolve("counter") {
            Some(Binding::Upvalue(0)) => {}
            _ => panic!("expected upvalue 0"),
        }
        assert_eq!(inner.upvalues().len(), 1);
        assert!(inner.upvalues()[0].from_parent_local);
        assert_eq!(inner.upvalues()[0].parent_slot, reg);
    }

    /// `outer` declares `counter`; `middle` never references it directly but
    /// `inner` does -- `middle` must still register its own upvalue entry for
    /// `counter` (closing over `outer`'s local) so `inner`'s upvalue can close over
    /// `middle`'s upvalue in turn, rather than failing to resolve past one hop.
    #[test]
    fn transitive_upvalue_capture_threads_through_an_intermediate_function() {
        let mut outer_ra = RegisterAllocator::new(0);
        let mut outer = Scopes::new(None);
        outer.enter_scope(outer_ra.enter_scope());
        let reg = outer_ra.alloc_local().unwrap();
        outer.declare("counter", reg, true);

        let mut middle_ra = RegisterAllocator::new(0);
        let mut middle = Scopes::new(Some(&outer));
        middle.enter_scope(middle_ra.enter_scope());

        let mut inner_ra = RegisterAllocator::new(0);
        let mut inner = Scopes::new(Some(&middle));
        inner.enter_scope(inner_ra.enter_scope());

        match inner.resolve("counter") {
            Some(Binding::Upvalue(0)) => {}
            Some(Binding::Upvalue(i)) => panic!("expected upvalue 0 on inner, got upvalue {}", i),
            Some(Binding::Local(_)) => panic!("expected an upvalue, inner resolved a local"),
            None => panic!("expected counter to resolve through middle into outer"),
        }
        assert_eq!(inner.upvalues().len(), 1);
        assert!(!inner.upvalues()[0].from_parent_local, "inner captures through middle's upvalue, not directly");

        assert_eq!(middle.upvalues().len(), 1, "middle registers its own upvalue even though its own body never uses it");
        assert!(middle.upvalues()[0].from_parent_local);
        assert_eq!(middle.upvalues()[0].parent_slot, reg);
        assert_eq!(inner.upvalues()[0].parent_slot, middle.upvalues()[0].index);
    }

    #[test]
    fn same_upvalue_is_not_captured_twice() {
        let mut outer_ra = RegisterAllocator::new(0);
        let mut outer = Scopes::new(None);
        outer.enter_scope(outer_ra.enter_scope());
        let reg = outer_ra.alloc_local().unwrap();
        outer.declare("x", reg, false);

        let mut inner = Scopes::new(Some(&outer));
        let mut inner_ra = RegisterAllocator::new(0);
        inner.enter_scope(inner_ra.enter_scope());
        inner.resolve("x");
        inner.resolve("x");
        assert_eq!(inner.upvalues().len(), 1);
    }
}
