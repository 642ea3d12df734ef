use el2_ast::{BinOp, UnOp};
use el2_lexer::Span;
use smol_str::SmolStr;

use crate::error::{CompileError, NameKind, UnifyError};
use crate::expand::{Ex, ExKind};
use crate::types::{quantifier_name, Mono, Poly, UserInfo};
use crate::{Compiler, SccId, SccState, TopArgs, TopId, TopVar};

pub type InstMap = Vec<(SmolStr, Mono)>;

// ── Typed expressions ────────────────────────────────────────────

/// The typed IR: the expanded form with every node annotated by its
/// monotype. After an SCC reaches `Done`, resolving these monotypes
/// through the table yields ground types or quantified variables only.
#[derive(Debug, Clone)]
pub struct Tex {
    pub ty: Mono,
    pub span: Span,
    pub kind: TexKind,
}

#[derive(Debug, Clone)]
pub enum TexKind {
    Unit,
    I64(i64),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Local(SmolStr),
    /// Reference to a toplevel binding; `inst` records the solved
    /// monotype for each quantified variable of the binding's polytype.
    Glob {
        top: TopId,
        inst: Option<InstMap>,
    },
    Tuple(Vec<Tex>),
    Call {
        func: Box<Tex>,
        args: Vec<Tex>,
    },
    Let {
        name: SmolStr,
        value: Box<Tex>,
        body: Box<Tex>,
    },
    Seq(Box<Tex>, Box<Tex>),
    If {
        cond: Box<Tex>,
        then_branch: Box<Tex>,
        else_branch: Option<Box<Tex>>,
    },
    Match {
        scrutinee: Box<Tex>,
        arms: Vec<TexArm>,
    },
    Assign {
        target: Box<Tex>,
        value: Box<Tex>,
    },
    /// Fields are stored in declared-sorted order.
    Struct {
        fields: Vec<(SmolStr, Tex)>,
    },
    Enum {
        variant: SmolStr,
        payload: Option<Box<Tex>>,
    },
    FieldAccess {
        base: Box<Tex>,
        field: SmolStr,
    },
    TupleAccess {
        base: Box<Tex>,
        index: usize,
    },
    CheckVariant {
        variant: SmolStr,
        expr: Box<Tex>,
    },
    AccessEnumField {
        variant: SmolStr,
        expr: Box<Tex>,
    },
    Ref(Box<Tex>),
    Deref(Box<Tex>),
    SizeOf(Mono),
    Loop(Box<Tex>),
    Break(Option<Box<Tex>>),
    Return(Option<Box<Tex>>),
    Assert(Box<Tex>),
    Binary {
        op: BinOp,
        lhs: Box<Tex>,
        rhs: Box<Tex>,
    },
    Unary {
        op: UnOp,
        expr: Box<Tex>,
    },
}

#[derive(Debug, Clone)]
pub struct TexArm {
    pub cond: Tex,
    pub bindings: Vec<(SmolStr, Tex)>,
    pub body: Tex,
}

// ── Instantiation ────────────────────────────────────────────────

/// Strip quantifiers, substituting each by a fresh unknown. Two calls
/// on the same polytype share no variables.
pub fn inst(comp: &mut Compiler, poly: &Poly) -> (Mono, InstMap) {
    let map: InstMap = poly
        .quantifiers()
        .into_iter()
        .map(|name| (name, comp.table.fresh()))
        .collect();
    let mono = poly.mono().subst_named(&map);
    (mono, map)
}

// ── Per-SCC type checking ────────────────────────────────────────

/// Type-check one strongly connected component: assign skeletons, infer
/// every member's body against them, then generalize function bindings
/// and weaken value bindings.
pub fn check_scc(comp: &mut Compiler, scc: SccId) -> Result<(), CompileError> {
    match comp.sccs[scc].state {
        SccState::Done | SccState::InChecking => return Ok(()),
        SccState::Untouched => {}
    }
    comp.sccs[scc].state = SccState::InChecking;
    let members = comp.sccs[scc].vars.clone();

    // Fresh monotype skeletons for every member, visible to all bodies.
    for &id in &members {
        let args = match &comp.el(id).args {
            TopArgs::Func(args) => Some(args.iter().map(|(_, m)| m.clone()).collect::<Vec<_>>()),
            TopArgs::NonFunc => None,
        };
        let skeleton = match args {
            Some(params) => {
                let ret = comp.table.fresh();
                Mono::func(Mono::of_args(params), ret)
            }
            None => comp.table.fresh(),
        };
        comp.el_mut(id).poly = Poly::Mono(skeleton);
    }

    for &id in &members {
        let el = comp.el(id);
        let module = el.module.clone();
        let expr = el.expr.clone();
        let skeleton = el.poly.mono().clone();
        let (params, res_type) = match (&el.args, &skeleton) {
            (TopArgs::Func(args), Mono::Func(_, ret)) => (args.clone(), (**ret).clone()),
            _ => (Vec::new(), skeleton.clone()),
        };

        let mut infer = Infer {
            comp: &mut *comp,
            module,
            locals: params,
            res_type: res_type.clone(),
            break_types: Vec::new(),
        };
        let tex = infer.infer(&expr)?;
        let span = tex.span;
        let body_ty = tex.ty.clone();
        comp.unify(&res_type, &body_ty)
            .map_err(|err| CompileError::Unify { err, span })?;
        comp.el_mut(id).typed_expr = Some(tex);
    }

    for &id in &members {
        let is_func = matches!(comp.el(id).args, TopArgs::Func(_));
        let skeleton = comp.el(id).poly.mono().clone();
        let resolved = comp.table.apply(&skeleton);
        let poly = if is_func {
            generalize(comp, &resolved)
        } else {
            Poly::Mono(weaken(comp, &resolved))
        };
        comp.el_mut(id).poly = poly;
    }

    comp.sccs[scc].state = SccState::Done;
    Ok(())
}

/// Close over the free variables of a resolved monotype: each unknown
/// becomes a freshly named quantified variable, bound in the table so
/// that the typed expression picks up the renaming too. Named variables
/// already introduced by an earlier member of the same component are
/// adopted under their existing name rather than renamed.
fn generalize(comp: &mut Compiler, resolved: &Mono) -> Poly {
    let mut leaves = Vec::new();
    collect_free_leaves(resolved, &mut leaves);

    let mut names: Vec<SmolStr> = Vec::new();
    let mut next_index = 0;
    for leaf in leaves {
        match leaf {
            Mono::Var(name, _) => {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            Mono::Indir(id) => {
                let mut name = quantifier_name(next_index);
                next_index += 1;
                while names.contains(&name) {
                    name = quantifier_name(next_index);
                    next_index += 1;
                }
                let placeholder = comp.table.fresh_id();
                comp.table.bind(id, Mono::Var(name.clone(), placeholder));
                names.push(name);
            }
            _ => unreachable!("only variables are free leaves"),
        }
    }

    let mono = comp.table.apply(resolved);
    names
        .into_iter()
        .rev()
        .fold(Poly::Mono(mono), |acc, name| Poly::ForAll(name, Box::new(acc)))
}

/// The unbound variable leaves of a fully applied monotype, in first-use
/// order, deduplicated by id.
fn collect_free_leaves(mono: &Mono, out: &mut Vec<Mono>) {
    match mono {
        Mono::Var(_, id) | Mono::Indir(id) => {
            let seen = out.iter().any(|m| {
                matches!(m, Mono::Var(_, other) | Mono::Indir(other) if other == id)
            });
            if !seen {
                out.push(mono.clone());
            }
        }
        Mono::Pointer(inner) | Mono::Opaque(inner) => collect_free_leaves(inner, out),
        Mono::Tuple(elems) => {
            for e in elems {
                collect_free_leaves(e, out);
            }
        }
        Mono::Func(param, ret) => {
            collect_free_leaves(param, out);
            collect_free_leaves(ret, out);
        }
        Mono::User { args, .. } => {
            for a in args {
                collect_free_leaves(a, out);
            }
        }
        _ => {}
    }
}

/// The value-restriction analogue: free variables of a non-function
/// binding become fresh unknowns instead of quantifiers, keeping the
/// binding monomorphic.
fn weaken(comp: &mut Compiler, resolved: &Mono) -> Mono {
    let mut free = Vec::new();
    comp.table.free_vars(resolved, &mut free);
    for id in free {
        // Named variables must not leak out of a weakened type; rewrite
        // them (and stale unknowns) to fresh unknowns.
        let fresh = comp.table.fresh();
        comp.table.bind(id, fresh);
    }
    comp.table.apply(resolved)
}

// ── The inference engine ─────────────────────────────────────────

pub struct Infer<'a> {
    pub comp: &'a mut Compiler,
    module: SmolStr,
    locals: Vec<(SmolStr, Mono)>,
    res_type: Mono,
    break_types: Vec<Mono>,
}

impl<'a> Infer<'a> {
    fn unify_at(&mut self, a: &Mono, b: &Mono, span: Span) -> Result<Mono, CompileError> {
        self.comp
            .unify(a, b)
            .map_err(|err| CompileError::Unify { err, span })
    }

    fn lookup_local(&self, name: &SmolStr) -> Option<Mono> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.clone())
    }

    /// Type a reference to a toplevel binding. Externs have fixed types;
    /// `El` bindings are instantiated when their component is `Done` and
    /// seen at their skeleton type while it is `InChecking`.
    fn global_ref(&mut self, top: TopId, span: Span) -> Result<Tex, CompileError> {
        let scc = match &self.comp.tops[top] {
            TopVar::Extern { ty, .. } | TopVar::ImplicitExtern { ty, .. } => {
                let ty = ty.clone();
                return Ok(Tex {
                    ty,
                    span,
                    kind: TexKind::Glob { top, inst: None },
                });
            }
            TopVar::El(el) => el.scc.expect("binding scheduled before inference"),
        };
        if self.comp.sccs[scc].state == SccState::Untouched {
            check_scc(self.comp, scc)?;
        }
        match self.comp.sccs[scc].state {
            SccState::Done => {
                let poly = self.comp.el(top).poly.clone();
                let (mono, map) = inst(self.comp, &poly);
                let inst = if map.is_empty() { None } else { Some(map) };
                Ok(Tex {
                    ty: mono,
                    span,
                    kind: TexKind::Glob { top, inst },
                })
            }
            // Mutual recursion: the member is visible at its skeleton
            // type.
            SccState::InChecking => Ok(Tex {
                ty: self.comp.el(top).poly.mono().clone(),
                span,
                kind: TexKind::Glob { top, inst: None },
            }),
            SccState::Untouched => unreachable!("component just checked"),
        }
    }

    /// A numeric operand: `i64`, `c_int` or `f64`, defaulting unknowns
    /// to `i64`.
    fn numeric(&mut self, ty: &Mono, span: Span) -> Result<Mono, CompileError> {
        let r = self.comp.table.resolve_shallow(ty);
        match r {
            Mono::I64 | Mono::CInt | Mono::F64 => Ok(r),
            Mono::Var(..) | Mono::Indir(_) => self.unify_at(&r, &Mono::I64, span),
            other => Err(CompileError::Unify {
                err: UnifyError::leaf(other, Mono::I64),
                span,
            }),
        }
    }

    /// An equality operand: numeric, `bool`, `char` or a pointer,
    /// defaulting unknowns to `i64`.
    fn equatable(&mut self, ty: &Mono, span: Span) -> Result<Mono, CompileError> {
        let r = self.comp.table.resolve_shallow(ty);
        match r {
            Mono::I64
            | Mono::CInt
            | Mono::F64
            | Mono::Bool
            | Mono::Char
            | Mono::Pointer(_) => Ok(r),
            Mono::Var(..) | Mono::Indir(_) => self.unify_at(&r, &Mono::I64, span),
            other => Err(CompileError::Unify {
                err: UnifyError::leaf(other, Mono::I64),
                span,
            }),
        }
    }

    /// Look up a user type and return `(repr, args, info)` with `args`
    /// fresh for this use.
    fn fresh_user(
        &mut self,
        repr: &SmolStr,
    ) -> Result<(Mono, Vec<Mono>, UserInfo), CompileError> {
        let def = self
            .comp
            .users
            .get(repr)
            .cloned()
            .ok_or_else(|| CompileError::Name {
                kind: NameKind::Type,
                name: repr.clone(),
            })?;
        let info = def.info.clone().expect("user info set before inference");
        let args: Vec<Mono> = def.ty_vars.iter().map(|_| self.comp.table.fresh()).collect();
        let mono = Mono::User {
            repr: repr.clone(),
            args: args.clone(),
        };
        Ok((mono, args, info))
    }

    fn variant_payload(
        &mut self,
        repr: &SmolStr,
        args: &[Mono],
        info: &UserInfo,
        variant: &SmolStr,
    ) -> Result<Option<Mono>, CompileError> {
        let variants = match info {
            UserInfo::Enum(vs) => vs,
            _ => {
                return Err(CompileError::Name {
                    kind: NameKind::Variant,
                    name: variant.clone(),
                })
            }
        };
        let (_, payload) = variants
            .iter()
            .find(|(n, _)| n == variant)
            .ok_or_else(|| CompileError::Name {
                kind: NameKind::Variant,
                name: variant.clone(),
            })?;
        let def = &self.comp.users[repr];
        let map = def.subst(args);
        Ok(payload.as_ref().map(|p| p.subst_named(&map)))
    }

    /// Resolve the struct info behind a monotype, expanding aliases.
    fn struct_fields_of(
        &mut self,
        ty: &Mono,
        span: Span,
    ) -> Result<Option<(SmolStr, Vec<Mono>, Vec<(SmolStr, Mono)>)>, CompileError> {
        let mut cur = self.comp.table.resolve_shallow(ty);
        loop {
            let (repr, args) = match &cur {
                Mono::User { repr, args } => (repr.clone(), args.clone()),
                _ => return Ok(None),
            };
            if let Some(expanded) = self.comp.user_monify(&repr, &args) {
                cur = self.comp.table.resolve_shallow(&expanded);
                continue;
            }
            let def = self
                .comp
                .users
                .get(&repr)
                .ok_or_else(|| CompileError::Name {
                    kind: NameKind::Type,
                    name: repr.clone(),
                })?;
            return match def.info.as_ref() {
                Some(UserInfo::Struct(fields)) => {
                    let map = def.subst(&args);
                    let fields = fields
                        .iter()
                        .map(|(n, m)| (n.clone(), m.subst_named(&map)))
                        .collect();
                    Ok(Some((repr, args, fields)))
                }
                _ => Err(CompileError::Pattern {
                    reason: format!("type `{}` is not a struct", def.name),
                    span,
                }),
            };
        }
    }

    // ── Expression rules ──────────────────────────────────────────

    pub fn infer(&mut self, ex: &Ex) -> Result<Tex, CompileError> {
        let span = ex.span;
        match &ex.kind {
            ExKind::Unit => Ok(Tex {
                ty: Mono::Unit,
                span,
                kind: TexKind::Unit,
            }),
            ExKind::I64(v) => Ok(Tex {
                ty: Mono::I64,
                span,
                kind: TexKind::I64(*v),
            }),
            ExKind::F64(v) => Ok(Tex {
                ty: Mono::F64,
                span,
                kind: TexKind::F64(*v),
            }),
            ExKind::Bool(v) => Ok(Tex {
                ty: Mono::Bool,
                span,
                kind: TexKind::Bool(*v),
            }),
            ExKind::Char(v) => Ok(Tex {
                ty: Mono::Char,
                span,
                kind: TexKind::Char(*v),
            }),
            ExKind::Str(v) => Ok(Tex {
                ty: Mono::pointer(Mono::Char),
                span,
                kind: TexKind::Str(v.clone()),
            }),

            ExKind::Var { path, name } => {
                if path.is_empty() {
                    if let Some(ty) = self.lookup_local(name) {
                        return Ok(Tex {
                            ty,
                            span,
                            kind: TexKind::Local(name.clone()),
                        });
                    }
                }
                let module = self.module.clone();
                let top = self.comp.lookup_global(&module, path, name)?;
                self.global_ref(top, span)
            }

            ExKind::Tuple(elems) => {
                let mut texs = Vec::with_capacity(elems.len());
                for e in elems {
                    texs.push(self.infer(e)?);
                }
                let ty = Mono::Tuple(texs.iter().map(|t| t.ty.clone()).collect());
                Ok(Tex {
                    ty,
                    span,
                    kind: TexKind::Tuple(texs),
                })
            }

            ExKind::Call { func, args } => {
                let func_tex = self.infer(func)?;
                let mut arg_texs = Vec::with_capacity(args.len());
                for a in args {
                    arg_texs.push(self.infer(a)?);
                }
                let arg_ty = Mono::of_args(arg_texs.iter().map(|t| t.ty.clone()).collect());
                let ret = self.comp.table.fresh();
                self.unify_at(&func_tex.ty, &Mono::func(arg_ty, ret.clone()), span)?;
                Ok(Tex {
                    ty: ret,
                    span,
                    kind: TexKind::Call {
                        func: Box::new(func_tex),
                        args: arg_texs,
                    },
                })
            }

            ExKind::Let { name, value, body } => {
                // Local lets are never generalized.
                let value_tex = self.infer(value)?;
                self.locals.push((name.clone(), value_tex.ty.clone()));
                let body_tex = self.infer(body)?;
                self.locals.pop();
                Ok(Tex {
                    ty: body_tex.ty.clone(),
                    span,
                    kind: TexKind::Let {
                        name: name.clone(),
                        value: Box::new(value_tex),
                        body: Box::new(body_tex),
                    },
                })
            }

            ExKind::Seq(a, b) => {
                let a = self.infer(a)?;
                let b = self.infer(b)?;
                Ok(Tex {
                    ty: b.ty.clone(),
                    span,
                    kind: TexKind::Seq(Box::new(a), Box::new(b)),
                })
            }

            ExKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_tex = self.infer(cond)?;
                self.unify_at(&cond_tex.ty, &Mono::Bool, cond_tex.span)?;
                let then_tex = self.infer(then_branch)?;
                let (ty, else_tex) = match else_branch {
                    Some(e) => {
                        let else_tex = self.infer(e)?;
                        let ty = self.unify_at(&then_tex.ty, &else_tex.ty, span)?;
                        (ty, Some(Box::new(else_tex)))
                    }
                    None => {
                        self.unify_at(&then_tex.ty, &Mono::Unit, then_tex.span)?;
                        (Mono::Unit, None)
                    }
                };
                Ok(Tex {
                    ty,
                    span,
                    kind: TexKind::If {
                        cond: Box::new(cond_tex),
                        then_branch: Box::new(then_tex),
                        else_branch: else_tex,
                    },
                })
            }

            ExKind::Match { scrutinee, arms } => {
                let scrut_tex = self.infer(scrutinee)?;
                let result = self.comp.table.fresh();
                let mut out_arms = Vec::with_capacity(arms.len());
                for arm in arms {
                    let cond_tex = self.infer(&arm.cond)?;
                    self.unify_at(&cond_tex.ty, &Mono::Bool, cond_tex.span)?;
                    let depth = self.locals.len();
                    let mut bindings = Vec::with_capacity(arm.bindings.len());
                    for (name, ex) in &arm.bindings {
                        let tex = self.infer(ex)?;
                        self.locals.push((name.clone(), tex.ty.clone()));
                        bindings.push((name.clone(), tex));
                    }
                    let body_tex = self.infer(&arm.body)?;
                    self.locals.truncate(depth);
                    self.unify_at(&result, &body_tex.ty, body_tex.span)?;
                    out_arms.push(TexArm {
                        cond: cond_tex,
                        bindings,
                        body: body_tex,
                    });
                }
                Ok(Tex {
                    ty: result,
                    span,
                    kind: TexKind::Match {
                        scrutinee: Box::new(scrut_tex),
                        arms: out_arms,
                    },
                })
            }

            ExKind::Assign { target, value } => {
                let target_tex = self.infer(target)?;
                let value_tex = self.infer(value)?;
                self.unify_at(&target_tex.ty, &value_tex.ty, span)?;
                Ok(Tex {
                    ty: Mono::Unit,
                    span,
                    kind: TexKind::Assign {
                        target: Box::new(target_tex),
                        value: Box::new(value_tex),
                    },
                })
            }

            ExKind::Struct { path, name, fields } => {
                let module = self.module.clone();
                let repr = self.comp.lookup_type_name(&module, path, name)?;
                let (user_ty, args, info) = self.fresh_user(&repr)?;
                let declared = match &info {
                    UserInfo::Struct(fs) => fs.clone(),
                    _ => {
                        return Err(CompileError::Pattern {
                            reason: format!("type `{}` is not a struct", name),
                            span,
                        })
                    }
                };
                // Fields are checked against the declaration in sorted
                // order; any mismatch in names is an error.
                let mut given: Vec<(SmolStr, &Ex)> =
                    fields.iter().map(|(n, e)| (n.clone(), e)).collect();
                given.sort_by(|a, b| a.0.cmp(&b.0));
                let mut expected: Vec<(SmolStr, Mono)> = {
                    let def = &self.comp.users[&repr];
                    let map = def.subst(&args);
                    declared
                        .iter()
                        .map(|(n, m)| (n.clone(), m.subst_named(&map)))
                        .collect()
                };
                expected.sort_by(|a, b| a.0.cmp(&b.0));
                if given.len() != expected.len() {
                    return Err(CompileError::Pattern {
                        reason: format!(
                            "struct `{}` has {} field(s), literal provides {}",
                            name,
                            expected.len(),
                            given.len()
                        ),
                        span,
                    });
                }
                let mut out_fields = Vec::with_capacity(given.len());
                for ((gname, gex), (ename, ety)) in given.into_iter().zip(expected) {
                    if gname != ename {
                        return Err(CompileError::Name {
                            kind: NameKind::Field,
                            name: gname,
                        });
                    }
                    let tex = self.infer(gex)?;
                    self.unify_at(&tex.ty, &ety, tex.span)?;
                    out_fields.push((gname, tex));
                }
                Ok(Tex {
                    ty: user_ty,
                    span,
                    kind: TexKind::Struct { fields: out_fields },
                })
            }

            ExKind::Enum {
                path,
                variant,
                payload,
            } => {
                let module = self.module.clone();
                let repr = self.comp.lookup_variant(&module, path, variant)?;
                let (user_ty, args, info) = self.fresh_user(&repr)?;
                let payload_ty = self.variant_payload(&repr, &args, &info, variant)?;
                let payload_tex = match (payload, payload_ty) {
                    (Some(e), Some(pty)) => {
                        let tex = self.infer(e)?;
                        self.unify_at(&tex.ty, &pty, tex.span)?;
                        Some(Box::new(tex))
                    }
                    (None, None) => None,
                    (Some(_), None) => {
                        return Err(CompileError::Pattern {
                            reason: format!("variant `{}` takes no payload", variant),
                            span,
                        })
                    }
                    (None, Some(_)) => {
                        return Err(CompileError::Pattern {
                            reason: format!("variant `{}` requires a payload", variant),
                            span,
                        })
                    }
                };
                Ok(Tex {
                    ty: user_ty,
                    span,
                    kind: TexKind::Enum {
                        variant: variant.clone(),
                        payload: payload_tex,
                    },
                })
            }

            ExKind::FieldAccess { base, field } => {
                let base_tex = self.infer(base)?;
                let resolved = self.struct_fields_of(&base_tex.ty, span)?;
                let field_ty = match resolved {
                    Some((_, _, fields)) => fields
                        .iter()
                        .find(|(n, _)| n == field)
                        .map(|(_, m)| m.clone())
                        .ok_or_else(|| CompileError::Name {
                            kind: NameKind::Field,
                            name: field.clone(),
                        })?,
                    None => {
                        // Unknown base: pick the owning struct from the
                        // field table and constrain the base to it.
                        let module = self.module.clone();
                        let repr = self.comp.lookup_field(&module, field)?;
                        let (user_ty, args, info) = self.fresh_user(&repr)?;
                        self.unify_at(&base_tex.ty, &user_ty, base_tex.span)?;
                        let fields = match info {
                            UserInfo::Struct(fs) => fs,
                            _ => {
                                return Err(CompileError::Name {
                                    kind: NameKind::Field,
                                    name: field.clone(),
                                })
                            }
                        };
                        let def = &self.comp.users[&repr];
                        let map = def.subst(&args);
                        fields
                            .iter()
                            .find(|(n, _)| n == field)
                            .map(|(_, m)| m.subst_named(&map))
                            .ok_or_else(|| CompileError::Name {
                                kind: NameKind::Field,
                                name: field.clone(),
                            })?
                    }
                };
                Ok(Tex {
                    ty: field_ty,
                    span,
                    kind: TexKind::FieldAccess {
                        base: Box::new(base_tex),
                        field: field.clone(),
                    },
                })
            }

            ExKind::TupleAccess { base, index } => {
                let base_tex = self.infer(base)?;
                let resolved = self.comp.table.resolve_shallow(&base_tex.ty);
                let elems = match resolved {
                    Mono::Tuple(elems) => elems,
                    other => {
                        return Err(CompileError::Pattern {
                            reason: format!(
                                "tuple access on value of type `{}`",
                                other
                            ),
                            span,
                        })
                    }
                };
                if *index >= elems.len() {
                    return Err(CompileError::Pattern {
                        reason: format!(
                            "tuple access `.{}` out of bounds for {} element(s)",
                            index,
                            elems.len()
                        ),
                        span,
                    });
                }
                Ok(Tex {
                    ty: elems[*index].clone(),
                    span,
                    kind: TexKind::TupleAccess {
                        base: Box::new(base_tex),
                        index: *index,
                    },
                })
            }

            ExKind::CheckVariant {
                path,
                variant,
                expr,
            } => {
                let module = self.module.clone();
                let repr = self.comp.lookup_variant(&module, path, variant)?;
                let (user_ty, _, _) = self.fresh_user(&repr)?;
                let tex = self.infer(expr)?;
                self.unify_at(&tex.ty, &user_ty, tex.span)?;
                Ok(Tex {
                    ty: Mono::Bool,
                    span,
                    kind: TexKind::CheckVariant {
                        variant: variant.clone(),
                        expr: Box::new(tex),
                    },
                })
            }

            ExKind::AccessEnumField {
                path,
                variant,
                expr,
            } => {
                let module = self.module.clone();
                let repr = self.comp.lookup_variant(&module, path, variant)?;
                let (user_ty, args, info) = self.fresh_user(&repr)?;
                let payload_ty = self
                    .variant_payload(&repr, &args, &info, variant)?
                    .ok_or_else(|| CompileError::Pattern {
                        reason: format!("variant `{}` has no payload", variant),
                        span,
                    })?;
                let tex = self.infer(expr)?;
                self.unify_at(&tex.ty, &user_ty, tex.span)?;
                Ok(Tex {
                    ty: payload_ty,
                    span,
                    kind: TexKind::AccessEnumField {
                        variant: variant.clone(),
                        expr: Box::new(tex),
                    },
                })
            }

            ExKind::AssertStruct {
                path,
                type_name,
                expr,
            } => {
                let module = self.module.clone();
                let repr = self.comp.lookup_type_name(&module, path, type_name)?;
                let (user_ty, _, info) = self.fresh_user(&repr)?;
                if !matches!(info, UserInfo::Struct(_)) {
                    return Err(CompileError::Pattern {
                        reason: format!("type `{}` is not a struct", type_name),
                        span,
                    });
                }
                let mut tex = self.infer(expr)?;
                let ty = self.unify_at(&tex.ty, &user_ty, tex.span)?;
                tex.ty = ty;
                Ok(tex)
            }

            ExKind::AssertEmptyEnumField {
                path,
                variant,
                expr,
            } => {
                let module = self.module.clone();
                let repr = self.comp.lookup_variant(&module, path, variant)?;
                let (user_ty, args, info) = self.fresh_user(&repr)?;
                if self
                    .variant_payload(&repr, &args, &info, variant)?
                    .is_some()
                {
                    return Err(CompileError::Pattern {
                        reason: format!(
                            "variant `{}` carries a payload; pattern must bind it",
                            variant
                        ),
                        span,
                    });
                }
                let mut tex = self.infer(expr)?;
                let ty = self.unify_at(&tex.ty, &user_ty, tex.span)?;
                tex.ty = ty;
                Ok(tex)
            }

            ExKind::Ref(inner) => {
                let tex = self.infer(inner)?;
                Ok(Tex {
                    ty: Mono::pointer(tex.ty.clone()),
                    span,
                    kind: TexKind::Ref(Box::new(tex)),
                })
            }

            ExKind::Deref(inner) => {
                let tex = self.infer(inner)?;
                let elem = self.comp.table.fresh();
                self.unify_at(&tex.ty, &Mono::pointer(elem.clone()), tex.span)?;
                Ok(Tex {
                    ty: elem,
                    span,
                    kind: TexKind::Deref(Box::new(tex)),
                })
            }

            ExKind::SizeOf(mono) => Ok(Tex {
                ty: Mono::I64,
                span,
                kind: TexKind::SizeOf(mono.clone()),
            }),

            ExKind::Loop(body) => {
                let break_ty = self.comp.table.fresh();
                self.break_types.push(break_ty.clone());
                let body_tex = self.infer(body)?;
                self.break_types.pop();
                self.unify_at(&body_tex.ty, &Mono::Unit, body_tex.span)?;
                Ok(Tex {
                    ty: break_ty,
                    span,
                    kind: TexKind::Loop(Box::new(body_tex)),
                })
            }

            ExKind::Break(value) => {
                let break_ty = self
                    .break_types
                    .last()
                    .cloned()
                    .ok_or_else(|| CompileError::Pattern {
                        reason: "`break` outside of a loop".into(),
                        span,
                    })?;
                let value_tex = match value {
                    Some(e) => {
                        let tex = self.infer(e)?;
                        self.unify_at(&tex.ty, &break_ty, tex.span)?;
                        Some(Box::new(tex))
                    }
                    None => {
                        self.unify_at(&Mono::Unit, &break_ty, span)?;
                        None
                    }
                };
                Ok(Tex {
                    ty: self.comp.table.fresh(),
                    span,
                    kind: TexKind::Break(value_tex),
                })
            }

            ExKind::Return(value) => {
                let res = self.res_type.clone();
                let value_tex = match value {
                    Some(e) => {
                        let tex = self.infer(e)?;
                        self.unify_at(&tex.ty, &res, tex.span)?;
                        Some(Box::new(tex))
                    }
                    None => {
                        self.unify_at(&Mono::Unit, &res, span)?;
                        None
                    }
                };
                Ok(Tex {
                    ty: self.comp.table.fresh(),
                    span,
                    kind: TexKind::Return(value_tex),
                })
            }

            ExKind::Assert(inner) => {
                let tex = self.infer(inner)?;
                self.unify_at(&tex.ty, &Mono::Bool, tex.span)?;
                Ok(Tex {
                    ty: Mono::Unit,
                    span,
                    kind: TexKind::Assert(Box::new(tex)),
                })
            }

            ExKind::Binary { op, lhs, rhs } => {
                let lhs_tex = self.infer(lhs)?;
                let rhs_tex = self.infer(rhs)?;
                let operand = self.unify_at(&lhs_tex.ty, &rhs_tex.ty, span)?;
                let ty = match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                        self.numeric(&operand, span)?
                    }
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        let r = self.comp.table.resolve_shallow(&operand);
                        if r != Mono::Char {
                            self.numeric(&operand, span)?;
                        }
                        Mono::Bool
                    }
                    BinOp::Eq | BinOp::Ne => {
                        self.equatable(&operand, span)?;
                        Mono::Bool
                    }
                    BinOp::And | BinOp::Or => {
                        self.unify_at(&operand, &Mono::Bool, span)?;
                        Mono::Bool
                    }
                };
                Ok(Tex {
                    ty,
                    span,
                    kind: TexKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs_tex),
                        rhs: Box::new(rhs_tex),
                    },
                })
            }

            ExKind::Unary { op, expr } => {
                let tex = self.infer(expr)?;
                let ty = match op {
                    UnOp::Neg => self.numeric(&tex.ty, span)?,
                    UnOp::Not => self.unify_at(&tex.ty, &Mono::Bool, span)?,
                };
                Ok(Tex {
                    ty,
                    span,
                    kind: TexKind::Unary {
                        op: *op,
                        expr: Box::new(tex),
                    },
                })
            }

            ExKind::Typed(inner, mono) => {
                let mut tex = self.infer(inner)?;
                let ty = self.unify_at(&tex.ty, mono, span)?;
                tex.ty = ty;
                Ok(tex)
            }
        }
    }
}
