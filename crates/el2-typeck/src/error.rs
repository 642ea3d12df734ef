use crate::types::Mono;
use el2_lexer::Span;
use smol_str::SmolStr;
use std::fmt;
use std::path::PathBuf;

// ── Unification failures ─────────────────────────────────────────

/// A failed unification, with the chain of enclosing attempts. `failed`
/// is the pair that conflicted at this level; `sub` is the deeper
/// conflict that caused it, if any.
#[derive(Debug, Clone)]
pub struct UnifyError {
    pub failed: (Mono, Mono),
    pub sub: Option<Box<UnifyError>>,
}

impl UnifyError {
    pub fn leaf(a: Mono, b: Mono) -> Self {
        Self {
            failed: (a, b),
            sub: None,
        }
    }

    pub fn wrap(self, a: Mono, b: Mono) -> Self {
        Self {
            failed: (a, b),
            sub: Some(Box::new(self)),
        }
    }

    /// The innermost conflicting pair.
    pub fn innermost(&self) -> &(Mono, Mono) {
        match &self.sub {
            Some(sub) => sub.innermost(),
            None => &self.failed,
        }
    }
}

impl fmt::Display for UnifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, b) = self.innermost();
        write!(f, "cannot unify `{}` with `{}`", a, b)?;
        if self.sub.is_some() {
            let (oa, ob) = &self.failed;
            write!(f, " while matching `{}` against `{}`", oa, ob)?;
        }
        Ok(())
    }
}

// ── Compiler errors ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Variable,
    Type,
    Field,
    Variant,
    Module,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NameKind::Variable => "variable",
            NameKind::Type => "type",
            NameKind::Field => "field",
            NameKind::Variant => "variant",
            NameKind::Module => "module",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("[{}:{}] {err}", .span.start, .span.end)]
    Unify { err: UnifyError, span: Span },

    #[error("module cycle: `{offending}` re-enters module `{from}` which is still being loaded")]
    ModuleCycle { from: SmolStr, offending: SmolStr },

    #[error("unknown {kind} `{name}`")]
    Name { kind: NameKind, name: SmolStr },

    #[error("duplicate {kind} `{name}`")]
    Duplicate { kind: NameKind, name: SmolStr },

    #[error("duplicate toplevel `{0}`")]
    DuplicateToplevel(SmolStr),

    #[error("[{}:{}] {reason}", .span.start, .span.end)]
    Pattern { reason: String, span: Span },

    #[error("type `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: SmolStr,
        expected: usize,
        got: usize,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{file}: {detail}")]
    Parse { file: String, detail: String },

    #[error("invalid module file name `{0}` (expected [a-z][a-z0-9_]*.el2)")]
    BadFileName(String),
}
