use smol_str::SmolStr;
use std::fmt;

// ── Types ────────────────────────────────────────────────────────

pub type TyVarId = u32;

/// A monotype. `Var` and `Indir` index into the [`TypeTable`]; `Var` is a
/// named type variable (from a declaration or from generalization),
/// `Indir` is an anonymous unknown introduced during inference.
#[derive(Clone, Debug, PartialEq)]
pub enum Mono {
    Unit,
    I64,
    CInt,
    F64,
    Bool,
    Char,
    Pointer(Box<Mono>),
    Tuple(Vec<Mono>),
    /// Single parameter; multi-argument functions take a `Tuple`.
    Func(Box<Mono>, Box<Mono>),
    /// Instantiated user type, keyed by the declaration's `repr_name`.
    User { repr: SmolStr, args: Vec<Mono> },
    /// Nominal wrapper that only unifies with a structurally identical
    /// `Opaque`.
    Opaque(Box<Mono>),
    Var(SmolStr, TyVarId),
    Indir(TyVarId),
}

impl Mono {
    pub fn pointer(inner: Mono) -> Mono {
        Mono::Pointer(Box::new(inner))
    }

    pub fn func(param: Mono, ret: Mono) -> Mono {
        Mono::Func(Box::new(param), Box::new(ret))
    }

    /// The type of an argument list: `()` for zero arguments, the single
    /// type for one, a tuple otherwise.
    pub fn of_args(mut args: Vec<Mono>) -> Mono {
        match args.len() {
            0 => Mono::Unit,
            1 => args.remove(0),
            _ => Mono::Tuple(args),
        }
    }

    /// Substitute named variables by `map`, leaving everything else
    /// untouched. Purely structural; never consults the table.
    pub fn subst_named(&self, map: &[(SmolStr, Mono)]) -> Mono {
        match self {
            Mono::Var(name, _) => map
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, m)| m.clone())
                .unwrap_or_else(|| self.clone()),
            Mono::Pointer(inner) => Mono::pointer(inner.subst_named(map)),
            Mono::Tuple(elems) => {
                Mono::Tuple(elems.iter().map(|e| e.subst_named(map)).collect())
            }
            Mono::Func(param, ret) => {
                Mono::func(param.subst_named(map), ret.subst_named(map))
            }
            Mono::User { repr, args } => Mono::User {
                repr: repr.clone(),
                args: args.iter().map(|a| a.subst_named(map)).collect(),
            },
            Mono::Opaque(inner) => Mono::Opaque(Box::new(inner.subst_named(map))),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Mono {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mono::Unit => write!(f, "unit"),
            Mono::I64 => write!(f, "i64"),
            Mono::CInt => write!(f, "c_int"),
            Mono::F64 => write!(f, "f64"),
            Mono::Bool => write!(f, "bool"),
            Mono::Char => write!(f, "char"),
            Mono::Pointer(inner) => write!(f, "&{}", inner),
            Mono::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Mono::Func(param, ret) => write!(f, "({} -> {})", param, ret),
            Mono::User { repr, args } => {
                if args.is_empty() {
                    write!(f, "{}", repr)
                } else {
                    write!(f, "{}(", repr)?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", a)?;
                    }
                    write!(f, ")")
                }
            }
            Mono::Opaque(inner) => write!(f, "opaque({})", inner),
            Mono::Var(name, _) => write!(f, "'{}", name),
            Mono::Indir(id) => write!(f, "?{}", id),
        }
    }
}

// ── Polytypes ────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum Poly {
    Mono(Mono),
    ForAll(SmolStr, Box<Poly>),
}

impl Poly {
    pub fn mono(&self) -> &Mono {
        match self {
            Poly::Mono(m) => m,
            Poly::ForAll(_, rest) => rest.mono(),
        }
    }

    pub fn quantifiers(&self) -> Vec<SmolStr> {
        let mut names = Vec::new();
        let mut cur = self;
        while let Poly::ForAll(name, rest) = cur {
            names.push(name.clone());
            cur = rest;
        }
        names
    }

    pub fn is_mono(&self) -> bool {
        matches!(self, Poly::Mono(_))
    }
}

// ── User types ───────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum UserInfo {
    Alias(Mono),
    Struct(Vec<(SmolStr, Mono)>),
    Enum(Vec<(SmolStr, Option<Mono>)>),
}

/// A user type declaration. `info` is `None` only between registration
/// and elaboration of the declaration body, which lets struct fields
/// refer to the type being declared.
#[derive(Clone, Debug)]
pub struct UserDef {
    pub name: SmolStr,
    pub repr_name: SmolStr,
    pub ty_vars: Vec<SmolStr>,
    pub info: Option<UserInfo>,
}

impl UserDef {
    /// The substitution mapping declared variables to instantiation
    /// arguments. Lengths are checked at resolution time.
    pub fn subst(&self, args: &[Mono]) -> Vec<(SmolStr, Mono)> {
        self.ty_vars
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect()
    }
}

// ── The type-variable table (union-find) ─────────────────────────

/// Union-find over type variables: entry `i` is `None` while variable
/// `i` is unbound and `Some(m)` once it has been unified with `m`.
/// Binding an entry is the union operation; `resolve_shallow` is find
/// with path compression.
#[derive(Debug, Default)]
pub struct TypeTable {
    entries: Vec<Option<Mono>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_id(&mut self) -> TyVarId {
        let id = self.entries.len() as TyVarId;
        self.entries.push(None);
        id
    }

    pub fn fresh(&mut self) -> Mono {
        Mono::Indir(self.fresh_id())
    }

    pub fn lookup(&self, id: TyVarId) -> Option<&Mono> {
        self.entries[id as usize].as_ref()
    }

    pub fn is_unbound(&self, id: TyVarId) -> bool {
        self.entries[id as usize].is_none()
    }

    /// Bind an unbound variable. Bound entries are only ever rewritten
    /// through `resolve_shallow`, which keeps them pointing at a
    /// representative at least as resolved as before.
    pub fn bind(&mut self, id: TyVarId, mono: Mono) {
        debug_assert!(
            self.entries[id as usize].is_none(),
            "type variable {} bound twice",
            id
        );
        self.entries[id as usize] = Some(mono);
    }

    fn var_id(mono: &Mono) -> Option<TyVarId> {
        match mono {
            Mono::Var(_, id) | Mono::Indir(id) => Some(*id),
            _ => None,
        }
    }

    /// Follow any chain of bound variables to the terminal
    /// representative, rewriting every entry on the chain to point at it
    /// directly. Idempotent; does not allocate once the chain is flat.
    pub fn resolve_shallow(&mut self, mono: &Mono) -> Mono {
        let mut cur = mono.clone();
        let mut chain = Vec::new();
        while let Some(id) = Self::var_id(&cur) {
            match &self.entries[id as usize] {
                Some(next) => {
                    chain.push(id);
                    cur = next.clone();
                }
                None => break,
            }
        }
        for id in chain {
            self.entries[id as usize] = Some(cur.clone());
        }
        cur
    }

    /// Deep-resolve a monotype through the table without mutating it.
    pub fn apply(&self, mono: &Mono) -> Mono {
        match mono {
            Mono::Var(_, id) | Mono::Indir(id) => match &self.entries[*id as usize] {
                Some(inner) => self.apply(inner),
                None => mono.clone(),
            },
            Mono::Pointer(inner) => Mono::pointer(self.apply(inner)),
            Mono::Tuple(elems) => {
                Mono::Tuple(elems.iter().map(|e| self.apply(e)).collect())
            }
            Mono::Func(param, ret) => Mono::func(self.apply(param), self.apply(ret)),
            Mono::User { repr, args } => Mono::User {
                repr: repr.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Mono::Opaque(inner) => Mono::Opaque(Box::new(self.apply(inner))),
            _ => mono.clone(),
        }
    }

    /// Collect the ids of unbound variables in `mono`, in first-use
    /// order, after resolving through the table.
    pub fn free_vars(&self, mono: &Mono, out: &mut Vec<TyVarId>) {
        match mono {
            Mono::Var(_, id) | Mono::Indir(id) => match &self.entries[*id as usize] {
                Some(inner) => self.free_vars(&inner.clone(), out),
                None => {
                    if !out.contains(id) {
                        out.push(*id);
                    }
                }
            },
            Mono::Pointer(inner) | Mono::Opaque(inner) => self.free_vars(inner, out),
            Mono::Tuple(elems) => {
                for e in elems {
                    self.free_vars(e, out);
                }
            }
            Mono::Func(param, ret) => {
                self.free_vars(param, out);
                self.free_vars(ret, out);
            }
            Mono::User { args, .. } => {
                for a in args {
                    self.free_vars(a, out);
                }
            }
            _ => {}
        }
    }

    /// Whether variable `id` occurs in `mono` (after resolution).
    pub fn occurs_in(&self, id: TyVarId, mono: &Mono) -> bool {
        match mono {
            Mono::Var(_, other) | Mono::Indir(other) => {
                if *other == id {
                    return true;
                }
                match &self.entries[*other as usize] {
                    Some(inner) => self.occurs_in(id, inner),
                    None => false,
                }
            }
            Mono::Pointer(inner) | Mono::Opaque(inner) => self.occurs_in(id, inner),
            Mono::Tuple(elems) => elems.iter().any(|e| self.occurs_in(id, e)),
            Mono::Func(param, ret) => {
                self.occurs_in(id, param) || self.occurs_in(id, ret)
            }
            Mono::User { args, .. } => args.iter().any(|a| self.occurs_in(id, a)),
            _ => false,
        }
    }
}

/// Names for generalized type variables: `a`, `b`, …, `z`, `a1`, `b1`, …
pub fn quantifier_name(index: usize) -> SmolStr {
    let letter = (b'a' + (index % 26) as u8) as char;
    if index < 26 {
        SmolStr::new(letter.to_string())
    } else {
        SmolStr::new(format!("{}{}", letter, index / 26))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_vars_are_distinct_and_unbound() {
        let mut table = TypeTable::new();
        let a = table.fresh();
        let b = table.fresh();
        assert_ne!(a, b);
        if let Mono::Indir(id) = a {
            assert!(table.is_unbound(id));
        }
    }

    #[test]
    fn resolve_compresses_chains() {
        let mut table = TypeTable::new();
        let a = table.fresh_id();
        let b = table.fresh_id();
        let c = table.fresh_id();
        table.bind(a, Mono::Indir(b));
        table.bind(b, Mono::Indir(c));
        table.bind(c, Mono::I64);
        assert_eq!(table.resolve_shallow(&Mono::Indir(a)), Mono::I64);
        // After compression, `a` points directly at the representative.
        assert_eq!(table.lookup(a), Some(&Mono::I64));
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut table = TypeTable::new();
        let a = table.fresh_id();
        table.bind(a, Mono::Bool);
        let first = table.resolve_shallow(&Mono::Indir(a));
        let second = table.resolve_shallow(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn apply_resolves_deeply() {
        let mut table = TypeTable::new();
        let a = table.fresh_id();
        table.bind(a, Mono::I64);
        let ty = Mono::func(Mono::Indir(a), Mono::pointer(Mono::Indir(a)));
        assert_eq!(
            table.apply(&ty),
            Mono::func(Mono::I64, Mono::pointer(Mono::I64))
        );
    }

    #[test]
    fn free_vars_in_first_use_order() {
        let mut table = TypeTable::new();
        let a = table.fresh_id();
        let b = table.fresh_id();
        let ty = Mono::func(Mono::Indir(b), Mono::Tuple(vec![
            Mono::Indir(a),
            Mono::Indir(b),
        ]));
        let mut free = Vec::new();
        table.free_vars(&ty, &mut free);
        assert_eq!(free, vec![b, a]);
    }

    #[test]
    fn subst_named_replaces_only_named_vars() {
        let mut table = TypeTable::new();
        let v = table.fresh_id();
        let i = table.fresh_id();
        let ty = Mono::func(Mono::Var("a".into(), v), Mono::Indir(i));
        let out = ty.subst_named(&[("a".into(), Mono::Char)]);
        assert_eq!(out, Mono::func(Mono::Char, Mono::Indir(i)));
    }

    #[test]
    fn quantifier_names_wrap_alphabetically() {
        assert_eq!(quantifier_name(0), SmolStr::new("a"));
        assert_eq!(quantifier_name(25), SmolStr::new("z"));
        assert_eq!(quantifier_name(26), SmolStr::new("a1"));
    }
}
