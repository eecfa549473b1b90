//! Structured diagnostics submitted by the backend to the (external) error reporter.
//!
//! The backend never formats a user-facing report itself — it only builds
//! `Diagnostic` records and files them in a `DiagnosticBag`. Formatting and
//! arena management belong to the error reporter collaborator (out of scope).

use std::fmt;
use std::rc::Rc;

/// A position in a single source file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(line: u32, column: u32) -> SourcePos {
        SourcePos { line, column }
    }
}

/// Convenience shorthand, mirroring the teacher's `spos`.
pub fn spos(line: u32, column: u32) -> SourcePos {
    SourcePos::new(line, column)
}

/// A source location: position plus the file it occurs in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLoc {
    pub pos: SourcePos,
    pub file: Rc<str>,
}

impl SourceLoc {
    pub fn new(file: Rc<str>, line: u32, column: u32) -> SourceLoc {
        SourceLoc {
            pos: spos(line, column),
            file,
        }
    }

    /// A location with no real source correspondence, used for compiler-synthesised
    /// instructions (implicit returns, synthesised index literals, fused loop steps).
    pub fn synthetic() -> SourceLoc {
        SourceLoc {
            pos: spos(0, 0),
            file: Rc::from("<synthetic>"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// Diagnostic codes, grouped by the ranges named in the external interface contract:
/// E1xxx declaration/variable, E2xxx type, E3xxx module, E9xxx internal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagCode {
    Redefinition,
    UndefinedVariable,
    NotInitialised,
    AssignToImmutable,
    BreakOutsideLoop,
    ContinueOutsideLoop,
    DuplicateMatchArm,
    UnknownStructField,
    AssignToMethodReference,
    EnumArityMismatch,
    UnsupportedCast,
    ModuleNotFound,
    ExportNotFound,
    ImportingNonValue,
    RegistersExhausted,
    UnpatchedJump,
    MalformedTypedAst,
}

impl DiagCode {
    pub fn code_str(&self) -> &'static str {
        use DiagCode::*;
        match self {
            Redefinition => "E1001",
            UndefinedVariable => "E1002",
            NotInitialised => "E1003",
            AssignToImmutable => "E1004",
            BreakOutsideLoop => "E1005",
            ContinueOutsideLoop => "E1006",
            DuplicateMatchArm => "E1007",
            UnknownStructField => "E2001",
            AssignToMethodReference => "E2002",
            EnumArityMismatch => "E2003",
            UnsupportedCast => "E2004",
            ModuleNotFound => "E3001",
            ExportNotFound => "E3002",
            ImportingNonValue => "E3003",
            RegistersExhausted => "E9001",
            UnpatchedJump => "E9002",
            MalformedTypedAst => "E9003",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code_str())
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub code: DiagCode,
    pub severity: Severity,
    pub loc: Option<SourceLoc>,
    pub message: String,
    pub help: Option<String>,
    pub note: Option<String>,
}

impl Diagnostic {
    pub fn new(code: DiagCode, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: code.severity(),
            code,
            loc: None,
            message: message.into(),
            help: None,
            note: None,
        }
    }

    pub fn at(mut self, loc: SourceLoc) -> Diagnostic {
        self.loc = Some(loc);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Diagnostic {
        self.note = Some(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Diagnostic {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({}:{}:{})", loc.file, loc.pos.line, loc.pos.column)?;
        }
        if let Some(note) = &self.note {
            write!(f, "\n  note: {}", note)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {}", help)?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics for the duration of a single module compilation. Mirrors
/// `has_compilation_errors` from spec.md -- `has_errors()` is that flag.
#[derive(Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> DiagnosticBag {
        DiagnosticBag::default()
    }

    pub fn report(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bag_tracks_error_presence() {
        let mut bag = DiagnosticBag::new();
        assert!(!bag.has_errors());
        bag.report(Diagnostic::new(DiagCode::UndefinedVariable, "x is undefined"));
        assert!(bag.has_errors());
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn diagnostic_display_includes_code_and_note() {
        let d = Diagnostic::new(DiagCode::BreakOutsideLoop, "break outside of a loop")
            .with_note("Compiler scope stack reports no active loops at this point.");
        let s = format!("{}", d);
        assert!(s.contains("E1005"));
        assert!(s.contains("no active loops"));
    }
}
