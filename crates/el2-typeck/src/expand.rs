use el2_ast::{
    BinOp, ExprId, ExprKind, LitPattern, PatternId, PatternKind, SourceFile, UnOp,
};
use el2_lexer::Span;
use smol_str::SmolStr;

use crate::error::CompileError;
use crate::types::Mono;
use crate::Compiler;

// ── Expanded expressions ─────────────────────────────────────────

/// The pattern-desugared IR. Patterns and most syntactic sugar are gone;
/// what remains is a tree of primitive operations plus the shape
/// assertions produced by desugaring.
#[derive(Debug, Clone)]
pub struct Ex {
    pub kind: ExKind,
    pub span: Span,
}

impl Ex {
    pub fn new(kind: ExKind, span: Span) -> Self {
        Self { kind, span }
    }

    fn boxed(kind: ExKind, span: Span) -> Box<Self> {
        Box::new(Self::new(kind, span))
    }

    fn local(name: SmolStr, span: Span) -> Self {
        Ex::new(
            ExKind::Var {
                path: Vec::new(),
                name,
            },
            span,
        )
    }
}

#[derive(Debug, Clone)]
pub enum ExKind {
    Unit,
    I64(i64),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Var {
        path: Vec<SmolStr>,
        name: SmolStr,
    },
    Tuple(Vec<Ex>),
    Call {
        func: Box<Ex>,
        args: Vec<Ex>,
    },
    Let {
        name: SmolStr,
        value: Box<Ex>,
        body: Box<Ex>,
    },
    Seq(Box<Ex>, Box<Ex>),
    If {
        cond: Box<Ex>,
        then_branch: Box<Ex>,
        else_branch: Option<Box<Ex>>,
    },
    /// Desugared match: each arm carries its guard condition, the
    /// binding stack for its body, and the body itself. Unmatched values
    /// trap at runtime.
    Match {
        scrutinee: Box<Ex>,
        arms: Vec<ExArm>,
    },
    Assign {
        target: Box<Ex>,
        value: Box<Ex>,
    },
    Struct {
        path: Vec<SmolStr>,
        name: SmolStr,
        fields: Vec<(SmolStr, Ex)>,
    },
    Enum {
        path: Vec<SmolStr>,
        variant: SmolStr,
        payload: Option<Box<Ex>>,
    },
    FieldAccess {
        base: Box<Ex>,
        field: SmolStr,
    },
    TupleAccess {
        base: Box<Ex>,
        index: usize,
    },
    CheckVariant {
        path: Vec<SmolStr>,
        variant: SmolStr,
        expr: Box<Ex>,
    },
    AccessEnumField {
        path: Vec<SmolStr>,
        variant: SmolStr,
        expr: Box<Ex>,
    },
    AssertStruct {
        path: Vec<SmolStr>,
        type_name: SmolStr,
        expr: Box<Ex>,
    },
    AssertEmptyEnumField {
        path: Vec<SmolStr>,
        variant: SmolStr,
        expr: Box<Ex>,
    },
    Ref(Box<Ex>),
    Deref(Box<Ex>),
    SizeOf(Mono),
    Loop(Box<Ex>),
    Break(Option<Box<Ex>>),
    Return(Option<Box<Ex>>),
    Assert(Box<Ex>),
    Binary {
        op: BinOp,
        lhs: Box<Ex>,
        rhs: Box<Ex>,
    },
    Unary {
        op: UnOp,
        expr: Box<Ex>,
    },
    /// Type ascription; pure assertion, the value is the inner one.
    Typed(Box<Ex>, Mono),
}

#[derive(Debug, Clone)]
pub struct ExArm {
    pub cond: Ex,
    pub bindings: Vec<(SmolStr, Ex)>,
    pub body: Ex,
}

// ── The expander ─────────────────────────────────────────────────

/// Desugars one toplevel's surface expression into [`Ex`], collecting
/// the set of unqualified non-local names it references (the SCC edges)
/// and triggering module loads for qualified paths.
pub struct Expander<'a> {
    pub comp: &'a mut Compiler,
    pub module: SmolStr,
    pub file: &'a SourceFile,
    locals: Vec<SmolStr>,
    used: Vec<SmolStr>,
}

impl<'a> Expander<'a> {
    pub fn new(comp: &'a mut Compiler, module: SmolStr, file: &'a SourceFile) -> Self {
        Self {
            comp,
            module,
            file,
            locals: Vec::new(),
            used: Vec::new(),
        }
    }

    /// Expand a toplevel body with `params` in scope; returns the
    /// expanded expression and the referenced global names.
    pub fn expand_toplevel(
        &mut self,
        params: &[SmolStr],
        body: ExprId,
    ) -> Result<(Ex, Vec<SmolStr>), CompileError> {
        self.locals.extend(params.iter().cloned());
        let ex = self.expand(body)?;
        self.locals.clear();
        Ok((ex, std::mem::take(&mut self.used)))
    }

    fn mark_used(&mut self, name: &SmolStr) {
        if !self.used.contains(name) {
            self.used.push(name.clone());
        }
    }

    fn is_local(&self, name: &SmolStr) -> bool {
        self.locals.iter().rev().any(|n| n == name)
    }

    fn resolve_path(&mut self, path: &[SmolStr]) -> Result<(), CompileError> {
        if !path.is_empty() {
            let module = self.module.clone();
            self.comp.resolve_module_path(&module, path)?;
        }
        Ok(())
    }

    fn resolve_type(&mut self, ty: el2_ast::TypeExprId) -> Result<Mono, CompileError> {
        let module = self.module.clone();
        self.comp.resolve_type_expr(&module, self.file, ty, &[])
    }

    // ── Expression expansion ──────────────────────────────────────

    fn expand(&mut self, id: ExprId) -> Result<Ex, CompileError> {
        let expr = &self.file.exprs[id];
        let span = expr.span;
        let kind = match &expr.kind {
            ExprKind::Unit => ExKind::Unit,
            ExprKind::Int(v) => ExKind::I64(*v),
            ExprKind::Float(v) => ExKind::F64(*v),
            ExprKind::Bool(v) => ExKind::Bool(*v),
            ExprKind::Char(v) => ExKind::Char(*v),
            ExprKind::Str(v) => ExKind::Str(v.clone()),

            ExprKind::Var { path, name } => {
                if path.is_empty() {
                    if !self.is_local(name) {
                        self.mark_used(name);
                    }
                } else {
                    self.resolve_path(path)?;
                }
                ExKind::Var {
                    path: path.clone(),
                    name: name.clone(),
                }
            }

            ExprKind::Variant {
                path,
                name,
                payload,
            } => {
                self.resolve_path(path)?;
                let payload = match payload {
                    Some(p) => Some(Box::new(self.expand(*p)?)),
                    None => None,
                };
                ExKind::Enum {
                    path: path.clone(),
                    variant: name.clone(),
                    payload,
                }
            }

            ExprKind::StructLit { path, name, fields } => {
                self.resolve_path(path)?;
                let mut out = Vec::with_capacity(fields.len());
                for (fname, value) in fields {
                    let ex = match value {
                        Some(e) => self.expand(*e)?,
                        // Shorthand `point { x }` binds the field to the
                        // variable of the same name.
                        None => {
                            if !self.is_local(fname) {
                                self.mark_used(fname);
                            }
                            Ex::local(fname.clone(), span)
                        }
                    };
                    out.push((fname.clone(), ex));
                }
                ExKind::Struct {
                    path: path.clone(),
                    name: name.clone(),
                    fields: out,
                }
            }

            ExprKind::Tuple(elems) => {
                let mut out = Vec::with_capacity(elems.len());
                for e in elems {
                    out.push(self.expand(*e)?);
                }
                ExKind::Tuple(out)
            }

            ExprKind::Call { func, args } => {
                let func = Box::new(self.expand(*func)?);
                let mut out = Vec::with_capacity(args.len());
                for a in args {
                    out.push(self.expand(*a)?);
                }
                ExKind::Call { func, args: out }
            }

            ExprKind::Lambda { .. } => {
                return Err(CompileError::Pattern {
                    reason: "`fun` is only allowed as the right-hand side of a toplevel `let`"
                        .into(),
                    span,
                });
            }

            ExprKind::Let {
                pattern,
                value,
                body,
            } => {
                let value_ex = self.expand(*value)?;
                let mut bindings = Vec::new();
                self.breakup_patterns(*pattern, value_ex, false, &mut bindings)?;
                let depth = self.locals.len();
                for (name, _) in &bindings {
                    self.locals.push(name.clone());
                }
                let body_ex = self.expand(*body)?;
                self.locals.truncate(depth);
                return Ok(nest_lets(bindings, body_ex, span));
            }

            ExprKind::Seq(a, b) => {
                let a = Box::new(self.expand(*a)?);
                let b = Box::new(self.expand(*b)?);
                ExKind::Seq(a, b)
            }

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = Box::new(self.expand(*cond)?);
                let then_branch = Box::new(self.expand(*then_branch)?);
                let else_branch = match else_branch {
                    Some(e) => Some(Box::new(self.expand(*e)?)),
                    None => None,
                };
                ExKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }

            ExprKind::Match { scrutinee, arms } => {
                return self.expand_match(*scrutinee, arms, span);
            }

            ExprKind::Assign { target, value } => {
                let target_expr = &self.file.exprs[*target];
                if !matches!(
                    target_expr.kind,
                    ExprKind::Var { .. }
                        | ExprKind::Deref(_)
                        | ExprKind::FieldAccess { .. }
                        | ExprKind::TupleAccess { .. }
                ) {
                    return Err(CompileError::Pattern {
                        reason: "invalid assignment target".into(),
                        span: target_expr.span,
                    });
                }
                let target = Box::new(self.expand(*target)?);
                let value = Box::new(self.expand(*value)?);
                ExKind::Assign { target, value }
            }

            ExprKind::FieldAccess { base, field } => ExKind::FieldAccess {
                base: Box::new(self.expand(*base)?),
                field: field.clone(),
            },

            ExprKind::TupleAccess { base, index } => ExKind::TupleAccess {
                base: Box::new(self.expand(*base)?),
                index: *index as usize,
            },

            ExprKind::Ref(inner) => ExKind::Ref(Box::new(self.expand(*inner)?)),
            ExprKind::Deref(inner) => ExKind::Deref(Box::new(self.expand(*inner)?)),

            ExprKind::SizeOf(ty) => ExKind::SizeOf(self.resolve_type(*ty)?),

            ExprKind::Loop(body) => ExKind::Loop(Box::new(self.expand(*body)?)),
            ExprKind::Break(value) => ExKind::Break(match value {
                Some(e) => Some(Box::new(self.expand(*e)?)),
                None => None,
            }),
            ExprKind::Return(value) => ExKind::Return(match value {
                Some(e) => Some(Box::new(self.expand(*e)?)),
                None => None,
            }),

            ExprKind::Assert(inner) => ExKind::Assert(Box::new(self.expand(*inner)?)),

            ExprKind::Binary { op, lhs, rhs } => ExKind::Binary {
                op: *op,
                lhs: Box::new(self.expand(*lhs)?),
                rhs: Box::new(self.expand(*rhs)?),
            },
            ExprKind::Unary { op, expr } => ExKind::Unary {
                op: *op,
                expr: Box::new(self.expand(*expr)?),
            },

            ExprKind::Ascribe { expr, ty } => {
                let mono = self.resolve_type(*ty)?;
                ExKind::Typed(Box::new(self.expand(*expr)?), mono)
            }
        };
        Ok(Ex::new(kind, span))
    }

    // ── Match compilation ─────────────────────────────────────────

    fn expand_match(
        &mut self,
        scrutinee: ExprId,
        arms: &[el2_ast::MatchArm],
        span: Span,
    ) -> Result<Ex, CompileError> {
        let scrut_ex = self.expand(scrutinee)?;
        let subject = self.comp.fresh_local();

        let depth = self.locals.len();
        self.locals.push(subject.clone());

        let mut out_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            let subject_ex = Ex::local(subject.clone(), span);
            let cond = self
                .pattern_cond(arm.pattern, &subject_ex)?
                .unwrap_or_else(|| Ex::new(ExKind::Bool(true), span));

            let mut bindings = Vec::new();
            self.breakup_patterns(arm.pattern, subject_ex, true, &mut bindings)?;

            let arm_depth = self.locals.len();
            for (name, _) in &bindings {
                self.locals.push(name.clone());
            }
            let body = self.expand(arm.body)?;
            self.locals.truncate(arm_depth);

            out_arms.push(ExArm {
                cond,
                bindings,
                body,
            });
        }
        self.locals.truncate(depth);

        let matched = Ex::new(
            ExKind::Match {
                scrutinee: Ex::boxed(
                    ExKind::Var {
                        path: Vec::new(),
                        name: subject.clone(),
                    },
                    span,
                ),
                arms: out_arms,
            },
            span,
        );
        Ok(Ex::new(
            ExKind::Let {
                name: subject,
                value: Box::new(scrut_ex),
                body: Box::new(matched),
            },
            span,
        ))
    }

    /// The boolean guard a pattern contributes, or `None` when the
    /// pattern is irrefutable. Guards are built from pure projections of
    /// `subject` so that short-circuit `&&` keeps later projections
    /// behind their variant checks.
    fn pattern_cond(
        &mut self,
        pat: PatternId,
        subject: &Ex,
    ) -> Result<Option<Ex>, CompileError> {
        let pattern = &self.file.patterns[pat];
        let span = pattern.span;
        match &pattern.kind {
            PatternKind::Var(_) | PatternKind::Unit => Ok(None),

            PatternKind::Lit(lit) => {
                let lit_ex = match lit {
                    LitPattern::Int(v) => ExKind::I64(*v),
                    LitPattern::Bool(v) => ExKind::Bool(*v),
                    LitPattern::Char(v) => ExKind::Char(*v),
                };
                Ok(Some(Ex::new(
                    ExKind::Binary {
                        op: BinOp::Eq,
                        lhs: Box::new(subject.clone()),
                        rhs: Ex::boxed(lit_ex, span),
                    },
                    span,
                )))
            }

            PatternKind::Tuple(elems) => {
                let mut cond = None;
                for (i, p) in elems.iter().enumerate() {
                    let proj = Ex::new(
                        ExKind::TupleAccess {
                            base: Box::new(subject.clone()),
                            index: i,
                        },
                        span,
                    );
                    if let Some(c) = self.pattern_cond(*p, &proj)? {
                        cond = Some(and_conds(cond, c, span));
                    }
                }
                Ok(cond)
            }

            PatternKind::Ref(inner) => {
                let deref = Ex::new(ExKind::Deref(Box::new(subject.clone())), span);
                self.pattern_cond(*inner, &deref)
            }

            PatternKind::Struct { fields, .. } => {
                let mut cond = None;
                for (fname, sub) in fields {
                    if let Some(p) = sub {
                        let proj = Ex::new(
                            ExKind::FieldAccess {
                                base: Box::new(subject.clone()),
                                field: fname.clone(),
                            },
                            span,
                        );
                        if let Some(c) = self.pattern_cond(*p, &proj)? {
                            cond = Some(and_conds(cond, c, span));
                        }
                    }
                }
                Ok(cond)
            }

            PatternKind::Variant {
                path,
                name,
                payload,
            } => {
                self.resolve_path(path)?;
                let check = Ex::new(
                    ExKind::CheckVariant {
                        path: path.clone(),
                        variant: name.clone(),
                        expr: Box::new(subject.clone()),
                    },
                    span,
                );
                let mut cond = check;
                if let Some(p) = payload {
                    let access = Ex::new(
                        ExKind::AccessEnumField {
                            path: path.clone(),
                            variant: name.clone(),
                            expr: Box::new(subject.clone()),
                        },
                        span,
                    );
                    if let Some(c) = self.pattern_cond(*p, &access)? {
                        cond = and_conds(Some(cond), c, span);
                    }
                }
                Ok(Some(cond))
            }

            PatternKind::Ascribe { pattern, .. } => self.pattern_cond(*pattern, subject),
        }
    }

    // ── Pattern breakup ───────────────────────────────────────────

    /// Rewrite a pattern match of `rhs` into a stack of single-variable
    /// bindings over primitive projections. Earlier bindings are in
    /// scope for later ones.
    pub fn breakup_patterns(
        &mut self,
        pat: PatternId,
        rhs: Ex,
        refutable_ok: bool,
        out: &mut Vec<(SmolStr, Ex)>,
    ) -> Result<(), CompileError> {
        let pattern = &self.file.patterns[pat];
        let span = pattern.span;
        match &pattern.kind {
            PatternKind::Var(name) => {
                out.push((name.clone(), rhs));
                Ok(())
            }

            PatternKind::Unit => {
                let v = self.comp.fresh_local();
                out.push((v, Ex::new(ExKind::Typed(Box::new(rhs), Mono::Unit), span)));
                Ok(())
            }

            PatternKind::Lit(_) => {
                if refutable_ok {
                    // The guard already tested the value; nothing binds.
                    Ok(())
                } else {
                    Err(CompileError::Pattern {
                        reason: "refutable pattern in `let` binding".into(),
                        span,
                    })
                }
            }

            PatternKind::Tuple(elems) => {
                let v = self.comp.fresh_local();
                out.push((v.clone(), rhs));
                for (i, p) in elems.iter().enumerate() {
                    let proj = Ex::new(
                        ExKind::TupleAccess {
                            base: Box::new(Ex::local(v.clone(), span)),
                            index: i,
                        },
                        span,
                    );
                    self.breakup_patterns(*p, proj, refutable_ok, out)?;
                }
                Ok(())
            }

            PatternKind::Ref(inner) => {
                let v = self.comp.fresh_local();
                out.push((v.clone(), rhs));
                let deref = Ex::new(
                    ExKind::Deref(Box::new(Ex::local(v.clone(), span))),
                    span,
                );
                self.breakup_patterns(*inner, deref, refutable_ok, out)
            }

            PatternKind::Struct { path, name, fields } => {
                self.resolve_path(path)?;
                let v = self.comp.fresh_local();
                out.push((
                    v.clone(),
                    Ex::new(
                        ExKind::AssertStruct {
                            path: path.clone(),
                            type_name: name.clone(),
                            expr: Box::new(rhs),
                        },
                        span,
                    ),
                ));
                for (fname, sub) in fields {
                    let proj = Ex::new(
                        ExKind::FieldAccess {
                            base: Box::new(Ex::local(v.clone(), span)),
                            field: fname.clone(),
                        },
                        span,
                    );
                    match sub {
                        Some(p) => self.breakup_patterns(*p, proj, refutable_ok, out)?,
                        None => out.push((fname.clone(), proj)),
                    }
                }
                Ok(())
            }

            PatternKind::Variant {
                path,
                name,
                payload,
            } => {
                self.resolve_path(path)?;
                match payload {
                    Some(p) => {
                        let v = self.comp.fresh_local();
                        out.push((
                            v.clone(),
                            Ex::new(
                                ExKind::AccessEnumField {
                                    path: path.clone(),
                                    variant: name.clone(),
                                    expr: Box::new(rhs),
                                },
                                span,
                            ),
                        ));
                        self.breakup_patterns(
                            *p,
                            Ex::local(v, span),
                            refutable_ok,
                            out,
                        )
                    }
                    None => {
                        let v = self.comp.fresh_local();
                        out.push((
                            v,
                            Ex::new(
                                ExKind::AssertEmptyEnumField {
                                    path: path.clone(),
                                    variant: name.clone(),
                                    expr: Box::new(rhs),
                                },
                                span,
                            ),
                        ));
                        Ok(())
                    }
                }
            }

            PatternKind::Ascribe { pattern, ty } => {
                let mono = self.resolve_type(*ty)?;
                let v = self.comp.fresh_local();
                out.push((
                    v.clone(),
                    Ex::new(ExKind::Typed(Box::new(rhs), mono), span),
                ));
                self.breakup_patterns(*pattern, Ex::local(v, span), refutable_ok, out)
            }
        }
    }
}

/// Wrap `body` in one `Let` per binding, first binding outermost.
pub fn nest_lets(bindings: Vec<(SmolStr, Ex)>, body: Ex, span: Span) -> Ex {
    bindings.into_iter().rev().fold(body, |acc, (name, value)| {
        Ex::new(
            ExKind::Let {
                name,
                value: Box::new(value),
                body: Box::new(acc),
            },
            span,
        )
    })
}

/// The unqualified global names an expanded expression references,
/// accounting for the locals its own `let`s and match arms introduce.
/// Used for toplevel value bindings, whose expressions are built after
/// the expander has run.
pub fn global_refs(ex: &Ex) -> Vec<SmolStr> {
    let mut out = Vec::new();
    let mut locals = Vec::new();
    collect_refs(ex, &mut locals, &mut out);
    out
}

fn collect_refs(ex: &Ex, locals: &mut Vec<SmolStr>, out: &mut Vec<SmolStr>) {
    match &ex.kind {
        ExKind::Var { path, name } => {
            if path.is_empty() && !locals.contains(name) && !out.contains(name) {
                out.push(name.clone());
            }
        }
        ExKind::Let { name, value, body } => {
            collect_refs(value, locals, out);
            locals.push(name.clone());
            collect_refs(body, locals, out);
            locals.pop();
        }
        ExKind::Match { scrutinee, arms } => {
            collect_refs(scrutinee, locals, out);
            for arm in arms {
                collect_refs(&arm.cond, locals, out);
                let depth = locals.len();
                for (name, value) in &arm.bindings {
                    collect_refs(value, locals, out);
                    locals.push(name.clone());
                }
                collect_refs(&arm.body, locals, out);
                locals.truncate(depth);
            }
        }
        ExKind::Tuple(elems) => {
            for e in elems {
                collect_refs(e, locals, out);
            }
        }
        ExKind::Call { func, args } => {
            collect_refs(func, locals, out);
            for a in args {
                collect_refs(a, locals, out);
            }
        }
        ExKind::Seq(a, b) => {
            collect_refs(a, locals, out);
            collect_refs(b, locals, out);
        }
        ExKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_refs(cond, locals, out);
            collect_refs(then_branch, locals, out);
            if let Some(e) = else_branch {
                collect_refs(e, locals, out);
            }
        }
        ExKind::Assign { target, value } => {
            collect_refs(target, locals, out);
            collect_refs(value, locals, out);
        }
        ExKind::Struct { fields, .. } => {
            for (_, e) in fields {
                collect_refs(e, locals, out);
            }
        }
        ExKind::Enum { payload, .. } => {
            if let Some(e) = payload {
                collect_refs(e, locals, out);
            }
        }
        ExKind::FieldAccess { base, .. } => collect_refs(base, locals, out),
        ExKind::TupleAccess { base, .. } => collect_refs(base, locals, out),
        ExKind::CheckVariant { expr, .. }
        | ExKind::AccessEnumField { expr, .. }
        | ExKind::AssertStruct { expr, .. }
        | ExKind::AssertEmptyEnumField { expr, .. } => collect_refs(expr, locals, out),
        ExKind::Ref(inner) | ExKind::Deref(inner) => collect_refs(inner, locals, out),
        ExKind::Loop(body) => collect_refs(body, locals, out),
        ExKind::Break(value) | ExKind::Return(value) => {
            if let Some(e) = value {
                collect_refs(e, locals, out);
            }
        }
        ExKind::Assert(inner) => collect_refs(inner, locals, out),
        ExKind::Binary { lhs, rhs, .. } => {
            collect_refs(lhs, locals, out);
            collect_refs(rhs, locals, out);
        }
        ExKind::Unary { expr, .. } => collect_refs(expr, locals, out),
        ExKind::Typed(inner, _) => collect_refs(inner, locals, out),
        ExKind::Unit
        | ExKind::I64(_)
        | ExKind::F64(_)
        | ExKind::Bool(_)
        | ExKind::Char(_)
        | ExKind::Str(_)
        | ExKind::SizeOf(_) => {}
    }
}

fn and_conds(acc: Option<Ex>, next: Ex, span: Span) -> Ex {
    match acc {
        None => next,
        Some(prev) => Ex::new(
            ExKind::Binary {
                op: BinOp::And,
                lhs: Box::new(prev),
                rhs: Box::new(next),
            },
            span,
        ),
    }
}
