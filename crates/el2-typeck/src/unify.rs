use crate::types::Mono;
use crate::Compiler;
use crate::UnifyError;
use smol_str::SmolStr;

impl Compiler {
    /// Expand a user type one step if it was declared as an alias.
    pub fn user_monify(&self, repr: &SmolStr, args: &[Mono]) -> Option<Mono> {
        let def = self.users.get(repr)?;
        match def.info.as_ref()? {
            crate::UserInfo::Alias(target) => Some(target.subst_named(&def.subst(args))),
            _ => None,
        }
    }

    /// Compute the most general unifier of `a` and `b`, destructively
    /// binding unknowns in the table, and return the resolved
    /// representative.
    pub fn unify(&mut self, a: &Mono, b: &Mono) -> Result<Mono, UnifyError> {
        let a = self.table.resolve_shallow(a);
        let b = self.table.resolve_shallow(b);
        if a == b {
            return Ok(a);
        }

        match (&a, &b) {
            // An unbound variable on either side binds to the other.
            (Mono::Var(_, id), _) | (Mono::Indir(id), _) => {
                if self.table.occurs_in(*id, &b) {
                    return Err(UnifyError::leaf(a.clone(), b.clone()));
                }
                self.table.bind(*id, b.clone());
                Ok(b)
            }
            (_, Mono::Var(_, id)) | (_, Mono::Indir(id)) => {
                if self.table.occurs_in(*id, &a) {
                    return Err(UnifyError::leaf(a.clone(), b.clone()));
                }
                self.table.bind(*id, a.clone());
                Ok(a)
            }

            (Mono::Pointer(x), Mono::Pointer(y)) => {
                let inner = self
                    .unify(x, y)
                    .map_err(|e| e.wrap(a.clone(), b.clone()))?;
                Ok(Mono::pointer(inner))
            }

            (Mono::Tuple(xs), Mono::Tuple(ys)) => {
                if xs.len() != ys.len() {
                    return Err(UnifyError::leaf(a.clone(), b.clone()));
                }
                let mut elems = Vec::with_capacity(xs.len());
                for (x, y) in xs.iter().zip(ys) {
                    elems.push(
                        self.unify(x, y)
                            .map_err(|e| e.wrap(a.clone(), b.clone()))?,
                    );
                }
                Ok(Mono::Tuple(elems))
            }

            (Mono::Func(p1, r1), Mono::Func(p2, r2)) => {
                let param = self
                    .unify(p1, p2)
                    .map_err(|e| e.wrap(a.clone(), b.clone()))?;
                let ret = self
                    .unify(r1, r2)
                    .map_err(|e| e.wrap(a.clone(), b.clone()))?;
                Ok(Mono::func(param, ret))
            }

            (
                Mono::User {
                    repr: ra,
                    args: xs,
                },
                Mono::User {
                    repr: rb,
                    args: ys,
                },
            ) if ra == rb => {
                let mut args = Vec::with_capacity(xs.len());
                for (x, y) in xs.iter().zip(ys) {
                    args.push(
                        self.unify(x, y)
                            .map_err(|e| e.wrap(a.clone(), b.clone()))?,
                    );
                }
                Ok(Mono::User {
                    repr: ra.clone(),
                    args,
                })
            }

            // Mismatched user types: expand an alias side and retry.
            (Mono::User { repr, args }, _) => {
                match self.user_monify(repr, args) {
                    Some(expanded) => self
                        .unify(&expanded, &b)
                        .map_err(|e| e.wrap(a.clone(), b.clone())),
                    None => match &b {
                        Mono::User {
                            repr: rb,
                            args: ys,
                        } => match self.user_monify(rb, ys) {
                            Some(expanded) => self
                                .unify(&a, &expanded)
                                .map_err(|e| e.wrap(a.clone(), b.clone())),
                            None => Err(UnifyError::leaf(a.clone(), b.clone())),
                        },
                        _ => Err(UnifyError::leaf(a.clone(), b.clone())),
                    },
                }
            }
            (_, Mono::User { repr, args }) => match self.user_monify(repr, args) {
                Some(expanded) => self
                    .unify(&a, &expanded)
                    .map_err(|e| e.wrap(a.clone(), b.clone())),
                None => Err(UnifyError::leaf(a.clone(), b.clone())),
            },

            (Mono::Opaque(x), Mono::Opaque(y)) => {
                let inner = self
                    .unify(x, y)
                    .map_err(|e| e.wrap(a.clone(), b.clone()))?;
                Ok(Mono::Opaque(Box::new(inner)))
            }

            _ => Err(UnifyError::leaf(a.clone(), b.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UserDef, UserInfo};
    use std::path::PathBuf;

    fn comp() -> Compiler {
        Compiler::new(PathBuf::from("."))
    }

    fn register_alias(comp: &mut Compiler, repr: &str, ty_vars: &[&str], target: Mono) {
        comp.users.insert(
            repr.into(),
            UserDef {
                name: repr.into(),
                repr_name: repr.into(),
                ty_vars: ty_vars.iter().map(|s| SmolStr::new(s)).collect(),
                info: Some(UserInfo::Alias(target)),
            },
        );
    }

    #[test]
    fn base_types_unify_with_themselves() {
        let mut c = comp();
        assert_eq!(c.unify(&Mono::I64, &Mono::I64).unwrap(), Mono::I64);
        assert!(c.unify(&Mono::I64, &Mono::Bool).is_err());
    }

    #[test]
    fn unbound_var_binds_to_other_side() {
        let mut c = comp();
        let v = c.table.fresh();
        let out = c.unify(&v, &Mono::Char).unwrap();
        assert_eq!(out, Mono::Char);
        // Both sides now resolve to the same representative.
        assert_eq!(c.table.resolve_shallow(&v), Mono::Char);
    }

    #[test]
    fn unify_makes_both_sides_equal() {
        let mut c = comp();
        let v = c.table.fresh();
        let w = c.table.fresh();
        let a = Mono::func(v.clone(), Mono::I64);
        let b = Mono::func(Mono::Bool, w.clone());
        let m = c.unify(&a, &b).unwrap();
        assert_eq!(c.table.apply(&a), c.table.apply(&b));
        assert_eq!(c.table.apply(&a), c.table.apply(&m));
    }

    #[test]
    fn unify_same_is_noop() {
        let mut c = comp();
        let t = Mono::pointer(Mono::Tuple(vec![Mono::I64, Mono::F64]));
        assert_eq!(c.unify(&t, &t).unwrap(), t);
    }

    #[test]
    fn tuple_length_mismatch_fails() {
        let mut c = comp();
        let a = Mono::Tuple(vec![Mono::I64, Mono::I64]);
        let b = Mono::Tuple(vec![Mono::I64]);
        assert!(c.unify(&a, &b).is_err());
    }

    #[test]
    fn occurs_check_rejects_infinite_type() {
        let mut c = comp();
        let v = c.table.fresh();
        let f = Mono::func(v.clone(), Mono::I64);
        assert!(c.unify(&v, &f).is_err());
    }

    #[test]
    fn nested_failure_preserves_innermost_conflict() {
        let mut c = comp();
        c.users.insert(
            "list".into(),
            UserDef {
                name: "list".into(),
                repr_name: "list".into(),
                ty_vars: vec!["a".into()],
                info: Some(UserInfo::Struct(vec![])),
            },
        );
        let a = Mono::User {
            repr: "list".into(),
            args: vec![Mono::pointer(Mono::Char)],
        };
        let b = Mono::User {
            repr: "list".into(),
            args: vec![Mono::I64],
        };
        let err = c.unify(&a, &b).unwrap_err();
        assert_eq!(
            err.innermost(),
            &(Mono::pointer(Mono::Char), Mono::I64)
        );
        assert!(err.sub.is_some());
    }

    #[test]
    fn alias_expands_against_concrete_type() {
        let mut c = comp();
        register_alias(&mut c, "str", &[], Mono::pointer(Mono::Char));
        let s = Mono::User {
            repr: "str".into(),
            args: vec![],
        };
        let out = c.unify(&s, &Mono::pointer(Mono::Char)).unwrap();
        assert_eq!(out, Mono::pointer(Mono::Char));
    }

    #[test]
    fn generic_alias_substitutes_arguments() {
        let mut c = comp();
        let v = c.table.fresh_id();
        register_alias(
            &mut c,
            "pair",
            &["a"],
            Mono::Tuple(vec![
                Mono::Var("a".into(), v),
                Mono::Var("a".into(), v),
            ]),
        );
        let p = Mono::User {
            repr: "pair".into(),
            args: vec![Mono::I64],
        };
        let out = c
            .unify(&p, &Mono::Tuple(vec![Mono::I64, Mono::I64]))
            .unwrap();
        assert_eq!(out, Mono::Tuple(vec![Mono::I64, Mono::I64]));
    }

    #[test]
    fn distinct_non_alias_user_types_do_not_unify() {
        let mut c = comp();
        for name in ["foo", "bar"] {
            c.users.insert(
                name.into(),
                UserDef {
                    name: name.into(),
                    repr_name: name.into(),
                    ty_vars: vec![],
                    info: Some(UserInfo::Struct(vec![])),
                },
            );
        }
        let a = Mono::User {
            repr: "foo".into(),
            args: vec![],
        };
        let b = Mono::User {
            repr: "bar".into(),
            args: vec![],
        };
        assert!(c.unify(&a, &b).is_err());
    }

    #[test]
    fn opaque_unifies_structurally_only() {
        let mut c = comp();
        let a = Mono::Opaque(Box::new(Mono::I64));
        let b = Mono::Opaque(Box::new(Mono::I64));
        assert!(c.unify(&a, &b).is_ok());
        assert!(c.unify(&a, &Mono::I64).is_err());
    }
}
