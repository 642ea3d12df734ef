pub mod error;
pub mod expand;
pub mod infer;
pub mod modules;
pub mod scc;
pub mod types;
pub mod unify;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use la_arena::{Arena, Idx};
use smol_str::SmolStr;

pub use error::{CompileError, NameKind, UnifyError};
pub use expand::{Ex, ExArm, ExKind};
pub use infer::{InstMap, Tex, TexArm, TexKind};
pub use types::{Mono, Poly, TyVarId, TypeTable, UserDef, UserInfo};

use el2_lexer::Span;

// ── Top-level bindings ───────────────────────────────────────────

pub type TopId = Idx<TopVar>;
pub type SccId = Idx<Scc>;

/// Argument shape of a binding; `Func` carries the parameter list with
/// its (possibly unknown) monotypes. Only `Func` bindings generalize.
#[derive(Debug, Clone)]
pub enum TopArgs {
    NonFunc,
    Func(Vec<(SmolStr, Mono)>),
}

#[derive(Debug)]
pub enum TopVar {
    El(ElVar),
    Extern {
        internal: SmolStr,
        external: SmolStr,
        ty: Mono,
    },
    ImplicitExtern {
        internal: SmolStr,
        external: SmolStr,
        ty: Mono,
    },
}

#[derive(Debug)]
pub struct ElVar {
    pub name: SmolStr,
    pub unique_name: SmolStr,
    pub module: SmolStr,
    pub args: TopArgs,
    pub expr: Ex,
    pub poly: Poly,
    pub typed_expr: Option<Tex>,
    /// Same-module global names referenced from `expr`; edges of the
    /// SCC graph.
    pub used_globals: Vec<SmolStr>,
    pub scc: Option<SccId>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SccState {
    Untouched,
    InChecking,
    Done,
}

/// A strongly connected component of the global-reference graph: the
/// unit of let-generalization.
#[derive(Debug)]
pub struct Scc {
    pub vars: Vec<TopId>,
    pub state: SccState,
}

// ── Modules ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ModuleEnv {
    pub name: SmolStr,
    pub filename: PathBuf,
    pub sub_modules: HashSet<SmolStr>,
    /// Opened modules, most recently opened first.
    pub opens: Vec<SmolStr>,
    pub glob_vars: HashMap<SmolStr, TopId>,
    /// Toplevel bindings in declaration order.
    pub decls: Vec<TopId>,
    /// Local type name → `repr_name`.
    pub types: HashMap<SmolStr, SmolStr>,
    /// Variant name → owning type's `repr_name`.
    pub variant_to_type: HashMap<SmolStr, SmolStr>,
    /// Field name → owning type's `repr_name`.
    pub field_to_type: HashMap<SmolStr, SmolStr>,
    /// True while the module's file is being processed; re-entry is an
    /// import cycle.
    pub in_eval: bool,
}

impl ModuleEnv {
    fn new(name: SmolStr, filename: PathBuf) -> Self {
        Self {
            name,
            filename,
            sub_modules: HashSet::new(),
            opens: Vec::new(),
            glob_vars: HashMap::new(),
            decls: Vec::new(),
            types: HashMap::new(),
            variant_to_type: HashMap::new(),
            field_to_type: HashMap::new(),
            in_eval: false,
        }
    }
}

// ── Compiler state ───────────────────────────────────────────────

/// Shared state of a compilation: the union-find table, the binding and
/// SCC arenas, user type declarations and the module map. Everything the
/// middle end mutates hangs off this value.
#[derive(Debug)]
pub struct Compiler {
    pub table: TypeTable,
    pub tops: Arena<TopVar>,
    pub sccs: Arena<Scc>,
    /// User types keyed by `repr_name`.
    pub users: HashMap<SmolStr, UserDef>,
    pub modules: HashMap<SmolStr, ModuleEnv>,
    pub root_dir: PathBuf,
    pub root_module: SmolStr,
    unique_names: HashSet<SmolStr>,
    fresh_counter: u32,
}

impl Compiler {
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            table: TypeTable::new(),
            tops: Arena::new(),
            sccs: Arena::new(),
            users: HashMap::new(),
            modules: HashMap::new(),
            root_dir,
            root_module: SmolStr::default(),
            unique_names: HashSet::new(),
            fresh_counter: 0,
        }
    }

    /// A fresh local binder name for pattern desugaring.
    pub fn fresh_local(&mut self) -> SmolStr {
        let name = SmolStr::new(format!("__{}", self.fresh_counter));
        self.fresh_counter += 1;
        name
    }

    /// Claim a compilation-unique C-level name for a binding.
    pub fn claim_unique_name(&mut self, name: &SmolStr) -> Result<(), CompileError> {
        if !self.unique_names.insert(name.clone()) {
            return Err(CompileError::DuplicateToplevel(name.clone()));
        }
        Ok(())
    }

    pub fn el(&self, id: TopId) -> &ElVar {
        match &self.tops[id] {
            TopVar::El(el) => el,
            _ => panic!("top var {:?} is not an El binding", id),
        }
    }

    pub fn el_mut(&mut self, id: TopId) -> &mut ElVar {
        match &mut self.tops[id] {
            TopVar::El(el) => el,
            _ => panic!("top var {:?} is not an El binding", id),
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────

/// Compile a root source file and everything it transitively opens.
/// On success every reachable binding is typed and generalized.
pub fn compile_file(path: &Path) -> Result<Compiler, CompileError> {
    let root_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut comp = Compiler::new(root_dir);
    let root = comp.load_file(path, "<entry>")?;
    comp.root_module = root;
    Ok(comp)
}

/// Compile from an in-memory source string as module `Main`, resolving
/// any `open`s relative to `root_dir`.
pub fn compile_source(source: &str, root_dir: &Path) -> Result<Compiler, CompileError> {
    let mut comp = Compiler::new(root_dir.to_path_buf());
    let root = comp.load_source("main.el2", source, "<entry>")?;
    comp.root_module = root;
    Ok(comp)
}
