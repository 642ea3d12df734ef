use std::path::{Path, PathBuf};

use el2_ast::{
    ExprKind, Item, LetType, Param, PatternKind, SourceFile, TypeDecl, TypeExprId,
    TypeExprKind,
};
use smol_str::SmolStr;

use crate::error::{CompileError, NameKind};
use crate::expand::{global_refs, Ex, ExKind, Expander};
use crate::infer::check_scc;
use crate::scc::schedule_module;
use crate::types::{Mono, Poly, TyVarId, UserDef, UserInfo};
use crate::{Compiler, ElVar, ModuleEnv, TopArgs, TopVar};

/// `foo_bar.el2` → `Foo_bar`.
fn module_name_of(path: &Path) -> Result<SmolStr, CompileError> {
    let bad = || CompileError::BadFileName(path.display().to_string());
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(bad)?;
    let stem = file_name.strip_suffix(".el2").ok_or_else(bad)?;
    let mut chars = stem.chars();
    let first = chars.next().ok_or_else(bad)?;
    if !first.is_ascii_lowercase()
        || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(bad());
    }
    let mut name = String::with_capacity(stem.len());
    name.push(first.to_ascii_uppercase());
    name.push_str(&stem[1..]);
    Ok(SmolStr::new(name))
}

/// `Foo_bar` → `foo_bar.el2`.
fn file_name_of(module: &SmolStr) -> String {
    let mut out = String::with_capacity(module.len() + 4);
    let mut chars = module.chars();
    if let Some(first) = chars.next() {
        out.push(first.to_ascii_lowercase());
    }
    out.extend(chars);
    out.push_str(".el2");
    out
}

impl Compiler {
    // ── Loading ───────────────────────────────────────────────────

    /// Load and fully process a module file. Re-entering a module whose
    /// processing has not finished is an import cycle.
    pub fn load_file(&mut self, path: &Path, importer: &str) -> Result<SmolStr, CompileError> {
        let name = module_name_of(path)?;
        if let Some(env) = self.modules.get(&name) {
            if env.in_eval {
                return Err(CompileError::ModuleCycle {
                    from: name,
                    offending: SmolStr::new(importer),
                });
            }
            return Ok(name);
        }
        let source = std::fs::read_to_string(path).map_err(|e| CompileError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.process_source(name, path.to_path_buf(), &source)
    }

    /// Load a module from an in-memory source string.
    pub fn load_source(
        &mut self,
        file_name: &str,
        source: &str,
        importer: &str,
    ) -> Result<SmolStr, CompileError> {
        let path = self.root_dir.join(file_name);
        let name = module_name_of(&path)?;
        if let Some(env) = self.modules.get(&name) {
            if env.in_eval {
                return Err(CompileError::ModuleCycle {
                    from: name,
                    offending: SmolStr::new(importer),
                });
            }
            return Ok(name);
        }
        self.process_source(name, path, source)
    }

    fn load_module_by_name(
        &mut self,
        module: &SmolStr,
        importer: &str,
    ) -> Result<SmolStr, CompileError> {
        let path = self.root_dir.join(file_name_of(module));
        self.load_file(&path, importer)
    }

    fn process_source(
        &mut self,
        name: SmolStr,
        path: PathBuf,
        source: &str,
    ) -> Result<SmolStr, CompileError> {
        let (file, errors) = el2_parser::parse(source);
        if !errors.is_empty() {
            let detail = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CompileError::Parse {
                file: path.display().to_string(),
                detail,
            });
        }

        let mut env = ModuleEnv::new(name.clone(), path);
        env.in_eval = true;
        self.modules.insert(name.clone(), env);

        self.process_items(&name, &file)?;

        let order = schedule_module(self, &name);
        for scc in order {
            check_scc(self, scc)?;
        }

        self.modules
            .get_mut(&name)
            .expect("module registered")
            .in_eval = false;
        Ok(name)
    }

    fn importer_file(&self, module: &SmolStr) -> String {
        self.modules[module]
            .filename
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("<unknown>")
            .to_string()
    }

    // ── Elaboration ───────────────────────────────────────────────

    fn process_items(
        &mut self,
        module: &SmolStr,
        file: &SourceFile,
    ) -> Result<(), CompileError> {
        for (item, _) in &file.items {
            match item {
                Item::Open(o) => {
                    let importer = self.importer_file(module);
                    let first = self.load_module_by_name(&o.path[0], &importer)?;
                    let mut target = first.clone();
                    for seg in &o.path[1..] {
                        target = self.sub_module(&target, seg)?;
                    }
                    let env = self.modules.get_mut(module).expect("module registered");
                    env.sub_modules.insert(first);
                    env.opens.insert(0, target);
                }

                Item::OpenFile(o) => {
                    let importer = self.importer_file(module);
                    let path = self.root_dir.join(&o.path);
                    let loaded = self.load_file(&path, &importer)?;
                    let env = self.modules.get_mut(module).expect("module registered");
                    env.sub_modules.insert(loaded.clone());
                    env.opens.insert(0, loaded);
                }

                Item::LetType(decl) => self.process_let_type(module, file, decl)?,

                Item::Extern(decl) | Item::ImplicitExtern(decl) => {
                    let ty = self.resolve_type_expr(module, file, decl.ty, &[])?;
                    let implicit = matches!(item, Item::ImplicitExtern(_));
                    let top = if implicit {
                        TopVar::ImplicitExtern {
                            internal: decl.name.clone(),
                            external: decl.external.clone(),
                            ty,
                        }
                    } else {
                        TopVar::Extern {
                            internal: decl.name.clone(),
                            external: decl.external.clone(),
                            ty,
                        }
                    };
                    let id = self.tops.alloc(top);
                    let env = self.modules.get_mut(module).expect("module registered");
                    if env.glob_vars.insert(decl.name.clone(), id).is_some() {
                        return Err(CompileError::DuplicateToplevel(decl.name.clone()));
                    }
                    env.decls.push(id);
                }

                Item::LetFn(decl) => {
                    self.process_let_fn(
                        module,
                        file,
                        &decl.name,
                        &decl.params,
                        decl.return_type,
                        decl.body,
                        decl.span,
                    )?;
                }

                Item::Let(decl) => {
                    let value = &file.exprs[decl.value];
                    if let ExprKind::Lambda { params, body } = &value.kind {
                        // `let f = fun x -> e` is a function binding.
                        let name = match &file.patterns[decl.pattern].kind {
                            PatternKind::Var(name) => name.clone(),
                            _ => {
                                return Err(CompileError::Pattern {
                                    reason: "cannot destructure a function value".into(),
                                    span: decl.span,
                                })
                            }
                        };
                        self.process_let_fn(
                            module,
                            file,
                            &name,
                            params,
                            None,
                            *body,
                            decl.span,
                        )?;
                    } else {
                        self.process_let_value(module, file, decl)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn sub_module(&self, of: &SmolStr, seg: &SmolStr) -> Result<SmolStr, CompileError> {
        let env = self.modules.get(of).ok_or_else(|| CompileError::Name {
            kind: NameKind::Module,
            name: of.clone(),
        })?;
        if env.sub_modules.contains(seg) {
            Ok(seg.clone())
        } else {
            Err(CompileError::Name {
                kind: NameKind::Module,
                name: seg.clone(),
            })
        }
    }

    fn process_let_type(
        &mut self,
        module: &SmolStr,
        file: &SourceFile,
        decl: &LetType,
    ) -> Result<(), CompileError> {
        {
            let env = &self.modules[module];
            if env.types.contains_key(&decl.name) {
                return Err(CompileError::Duplicate {
                    kind: NameKind::Type,
                    name: decl.name.clone(),
                });
            }
        }

        // Module-unique representation name; a second declaration of the
        // same source name in another module gets a qualified one.
        let repr = if self.users.contains_key(&decl.name) {
            let mut qualified = String::new();
            let file_part = file_name_of(module);
            qualified.push_str(file_part.strip_suffix(".el2").unwrap_or(&file_part));
            qualified.push('_');
            qualified.push_str(&decl.name);
            SmolStr::new(qualified)
        } else {
            decl.name.clone()
        };
        if self.users.contains_key(&repr) {
            return Err(CompileError::Duplicate {
                kind: NameKind::Type,
                name: decl.name.clone(),
            });
        }

        let mut ty_vars: Vec<(SmolStr, TyVarId)> = Vec::with_capacity(decl.ty_vars.len());
        for v in &decl.ty_vars {
            if ty_vars.iter().any(|(n, _)| n == v) {
                return Err(CompileError::Duplicate {
                    kind: NameKind::Type,
                    name: v.clone(),
                });
            }
            let id = self.table.fresh_id();
            ty_vars.push((v.clone(), id));
        }

        // Register before elaborating the body so the declaration can
        // reference itself through pointers and type arguments.
        self.users.insert(
            repr.clone(),
            UserDef {
                name: decl.name.clone(),
                repr_name: repr.clone(),
                ty_vars: decl.ty_vars.clone(),
                info: None,
            },
        );
        self.modules
            .get_mut(module)
            .expect("module registered")
            .types
            .insert(decl.name.clone(), repr.clone());

        let info = match &decl.decl {
            TypeDecl::Alias(target) => {
                UserInfo::Alias(self.resolve_type_expr(module, file, *target, &ty_vars)?)
            }
            TypeDecl::Struct(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for field in fields {
                    if out.iter().any(|(n, _): &(SmolStr, Mono)| n == &field.name) {
                        return Err(CompileError::Duplicate {
                            kind: NameKind::Field,
                            name: field.name.clone(),
                        });
                    }
                    let mono = self.resolve_type_expr(module, file, field.ty, &ty_vars)?;
                    out.push((field.name.clone(), mono));
                }
                let env = self.modules.get_mut(module).expect("module registered");
                for (fname, _) in &out {
                    env.field_to_type.insert(fname.clone(), repr.clone());
                }
                UserInfo::Struct(out)
            }
            TypeDecl::Enum(variants) => {
                let mut out = Vec::with_capacity(variants.len());
                for variant in variants {
                    if out
                        .iter()
                        .any(|(n, _): &(SmolStr, Option<Mono>)| n == &variant.name)
                    {
                        return Err(CompileError::Duplicate {
                            kind: NameKind::Variant,
                            name: variant.name.clone(),
                        });
                    }
                    let payload = match variant.payload {
                        Some(ty) => {
                            Some(self.resolve_type_expr(module, file, ty, &ty_vars)?)
                        }
                        None => None,
                    };
                    out.push((variant.name.clone(), payload));
                }
                let env = self.modules.get_mut(module).expect("module registered");
                for (vname, _) in &out {
                    env.variant_to_type.insert(vname.clone(), repr.clone());
                }
                UserInfo::Enum(out)
            }
        };

        // Set exactly once; inference only ever reads it afterwards.
        self.users
            .get_mut(&repr)
            .expect("user type registered")
            .info = Some(info);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_let_fn(
        &mut self,
        module: &SmolStr,
        file: &SourceFile,
        name: &SmolStr,
        params: &[Param],
        return_type: Option<TypeExprId>,
        body: el2_ast::ExprId,
        span: el2_lexer::Span,
    ) -> Result<(), CompileError> {
        let mut args: Vec<(SmolStr, Mono)> = Vec::with_capacity(params.len());
        for param in params {
            if args.iter().any(|(n, _)| n == &param.name) {
                return Err(CompileError::Duplicate {
                    kind: NameKind::Variable,
                    name: param.name.clone(),
                });
            }
            let mono = match param.type_ann {
                Some(ty) => self.resolve_type_expr(module, file, ty, &[])?,
                None => self.table.fresh(),
            };
            args.push((param.name.clone(), mono));
        }

        let ret_mono = match return_type {
            Some(ty) => Some(self.resolve_type_expr(module, file, ty, &[])?),
            None => None,
        };

        let param_names: Vec<SmolStr> = args.iter().map(|(n, _)| n.clone()).collect();
        let mut expander = Expander::new(self, module.clone(), file);
        let (mut expr, used_globals) = expander.expand_toplevel(&param_names, body)?;
        if let Some(ret) = ret_mono {
            let span = expr.span;
            expr = Ex::new(ExKind::Typed(Box::new(expr), ret), span);
        }

        self.alloc_el(module, name.clone(), TopArgs::Func(args), expr, used_globals, span)
    }

    fn process_let_value(
        &mut self,
        module: &SmolStr,
        file: &SourceFile,
        decl: &el2_ast::Let,
    ) -> Result<(), CompileError> {
        let mut expander = Expander::new(self, module.clone(), file);
        let (value_ex, _) = expander.expand_toplevel(&[], decl.value)?;
        let mut bindings = Vec::new();
        expander.breakup_patterns(decl.pattern, value_ex, false, &mut bindings)?;

        // Each binding of the stack becomes its own (non-function)
        // toplevel; earlier hidden bindings are ordinary globals that
        // later projections reference.
        for (name, ex) in bindings {
            let used_globals = global_refs(&ex);
            self.alloc_el(module, name, TopArgs::NonFunc, ex, used_globals, decl.span)?;
        }
        Ok(())
    }

    fn alloc_el(
        &mut self,
        module: &SmolStr,
        name: SmolStr,
        args: TopArgs,
        expr: Ex,
        used_globals: Vec<SmolStr>,
        span: el2_lexer::Span,
    ) -> Result<(), CompileError> {
        let file_part = file_name_of(module);
        let module_part = file_part.strip_suffix(".el2").unwrap_or(&file_part);
        let unique_name = SmolStr::new(format!("{}_{}", module_part, name));
        self.claim_unique_name(&unique_name)?;

        let id = self.tops.alloc(TopVar::El(ElVar {
            name: name.clone(),
            unique_name,
            module: module.clone(),
            args,
            expr,
            poly: Poly::Mono(Mono::Unit),
            typed_expr: None,
            used_globals,
            scc: None,
            span,
        }));
        let env = self.modules.get_mut(module).expect("module registered");
        if env.glob_vars.insert(name.clone(), id).is_some() {
            return Err(CompileError::DuplicateToplevel(name));
        }
        env.decls.push(id);
        Ok(())
    }

    // ── Name resolution ───────────────────────────────────────────

    /// Resolve a qualified module path from `from`, loading the head
    /// module's file on demand when it is not yet in scope.
    pub fn resolve_module_path(
        &mut self,
        from: &SmolStr,
        path: &[SmolStr],
    ) -> Result<SmolStr, CompileError> {
        let first = &path[0];
        let mut current = {
            let env = &self.modules[from];
            if env.sub_modules.contains(first) {
                first.clone()
            } else {
                let in_open = env
                    .opens
                    .iter()
                    .find(|open| self.modules[*open].sub_modules.contains(first))
                    .cloned();
                match in_open {
                    Some(_) => first.clone(),
                    None => {
                        let importer = self.importer_file(from);
                        let loaded = self.load_module_by_name(first, &importer)?;
                        self.modules
                            .get_mut(from)
                            .expect("module registered")
                            .sub_modules
                            .insert(loaded.clone());
                        loaded
                    }
                }
            }
        };
        for seg in &path[1..] {
            current = self.sub_module(&current, seg)?;
        }
        Ok(current)
    }

    /// Scope chain for unqualified names: the current module first, then
    /// each opened module, most recently opened first.
    fn scope_chain(&self, module: &SmolStr) -> Vec<SmolStr> {
        let mut chain = vec![module.clone()];
        chain.extend(self.modules[module].opens.iter().cloned());
        chain
    }

    pub fn lookup_global(
        &mut self,
        module: &SmolStr,
        path: &[SmolStr],
        name: &SmolStr,
    ) -> Result<crate::TopId, CompileError> {
        if path.is_empty() {
            for m in self.scope_chain(module) {
                if let Some(&id) = self.modules[&m].glob_vars.get(name) {
                    return Ok(id);
                }
            }
            return Err(CompileError::Name {
                kind: NameKind::Variable,
                name: name.clone(),
            });
        }
        let target = self.resolve_module_path(module, path)?;
        self.modules[&target]
            .glob_vars
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::Name {
                kind: NameKind::Variable,
                name: name.clone(),
            })
    }

    pub fn lookup_type_name(
        &mut self,
        module: &SmolStr,
        path: &[SmolStr],
        name: &SmolStr,
    ) -> Result<SmolStr, CompileError> {
        if path.is_empty() {
            for m in self.scope_chain(module) {
                if let Some(repr) = self.modules[&m].types.get(name) {
                    return Ok(repr.clone());
                }
            }
            return Err(CompileError::Name {
                kind: NameKind::Type,
                name: name.clone(),
            });
        }
        let target = self.resolve_module_path(module, path)?;
        self.modules[&target]
            .types
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::Name {
                kind: NameKind::Type,
                name: name.clone(),
            })
    }

    pub fn lookup_variant(
        &mut self,
        module: &SmolStr,
        path: &[SmolStr],
        name: &SmolStr,
    ) -> Result<SmolStr, CompileError> {
        if path.is_empty() {
            for m in self.scope_chain(module) {
                if let Some(repr) = self.modules[&m].variant_to_type.get(name) {
                    return Ok(repr.clone());
                }
            }
            return Err(CompileError::Name {
                kind: NameKind::Variant,
                name: name.clone(),
            });
        }
        let target = self.resolve_module_path(module, path)?;
        self.modules[&target]
            .variant_to_type
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::Name {
                kind: NameKind::Variant,
                name: name.clone(),
            })
    }

    pub fn lookup_field(
        &self,
        module: &SmolStr,
        field: &SmolStr,
    ) -> Result<SmolStr, CompileError> {
        for m in self.scope_chain(module) {
            if let Some(repr) = self.modules[&m].field_to_type.get(field) {
                return Ok(repr.clone());
            }
        }
        Err(CompileError::Name {
            kind: NameKind::Field,
            name: field.clone(),
        })
    }

    // ── Type expression resolution ────────────────────────────────

    pub fn resolve_type_expr(
        &mut self,
        module: &SmolStr,
        file: &SourceFile,
        id: TypeExprId,
        ty_vars: &[(SmolStr, TyVarId)],
    ) -> Result<Mono, CompileError> {
        let ty = &file.type_exprs[id];
        match &ty.kind {
            TypeExprKind::Unit => Ok(Mono::Unit),
            TypeExprKind::Pointer(inner) => Ok(Mono::pointer(
                self.resolve_type_expr(module, file, *inner, ty_vars)?,
            )),
            TypeExprKind::Tuple(elems) => {
                let mut out = Vec::with_capacity(elems.len());
                for e in elems {
                    out.push(self.resolve_type_expr(module, file, *e, ty_vars)?);
                }
                Ok(Mono::Tuple(out))
            }
            TypeExprKind::Func(param, ret) => Ok(Mono::func(
                self.resolve_type_expr(module, file, *param, ty_vars)?,
                self.resolve_type_expr(module, file, *ret, ty_vars)?,
            )),
            TypeExprKind::Opaque(inner) => Ok(Mono::Opaque(Box::new(
                self.resolve_type_expr(module, file, *inner, ty_vars)?,
            ))),
            TypeExprKind::Named { path, name, args } => {
                if path.is_empty() && args.is_empty() {
                    if let Some((_, id)) = ty_vars.iter().find(|(n, _)| n == name) {
                        return Ok(Mono::Var(name.clone(), *id));
                    }
                    match name.as_str() {
                        "unit" => return Ok(Mono::Unit),
                        "i64" => return Ok(Mono::I64),
                        "c_int" => return Ok(Mono::CInt),
                        "f64" => return Ok(Mono::F64),
                        "bool" => return Ok(Mono::Bool),
                        "char" => return Ok(Mono::Char),
                        _ => {}
                    }
                }
                let repr = self.lookup_type_name(module, path, name)?;
                let expected = self.users[&repr].ty_vars.len();
                if expected != args.len() {
                    return Err(CompileError::Arity {
                        name: name.clone(),
                        expected,
                        got: args.len(),
                    });
                }
                let mut out = Vec::with_capacity(args.len());
                for a in args {
                    out.push(self.resolve_type_expr(module, file, *a, ty_vars)?);
                }
                Ok(Mono::User { repr, args: out })
            }
        }
    }
}
