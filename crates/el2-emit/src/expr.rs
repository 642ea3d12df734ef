use el2_ast::{BinOp, UnOp};
use el2_typeck::{Mono, Tex, TexKind};
use smol_str::SmolStr;

use crate::ctype::{escape_c_char, escape_c_string, mangle};
use crate::CEmitter;

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do",
    "double", "else", "enum", "extern", "float", "for", "goto", "if", "inline",
    "int", "long", "register", "restrict", "return", "short", "signed",
    "sizeof", "static", "struct", "switch", "typedef", "union", "unsigned",
    "void", "volatile", "while", "bool", "true", "false", "main",
];

fn pad(ind: usize) -> String {
    "  ".repeat(ind)
}

impl CEmitter<'_> {
    // ── Local names ───────────────────────────────────────────────

    /// Bind a source local to a fresh C identifier, renaming on clashes
    /// with C keywords or earlier locals of the same function.
    pub(crate) fn alloc_local(&mut self, name: &SmolStr) -> SmolStr {
        let mut base = name.to_string();
        if C_KEYWORDS.contains(&base.as_str()) {
            base.push('_');
        }
        let mut candidate = SmolStr::new(&base);
        let mut n = 1;
        while !self.used_names.insert(candidate.clone()) {
            candidate = SmolStr::new(format!("{}_{}", base, n));
            n += 1;
        }
        self.locals.push((name.clone(), candidate.clone()));
        candidate
    }

    fn lookup_local(&self, name: &SmolStr) -> SmolStr {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
            .unwrap_or_else(|| name.clone())
    }

    fn fresh_tmp(&mut self) -> String {
        let name = format!("__t{}", self.tmp_counter);
        self.tmp_counter += 1;
        name
    }

    fn is_lvalue(tex: &Tex) -> bool {
        matches!(
            tex.kind,
            TexKind::Local(_)
                | TexKind::Deref(_)
                | TexKind::FieldAccess { .. }
                | TexKind::TupleAccess { .. }
        )
    }

    // ── Expression lowering ───────────────────────────────────────

    /// Lower one typed expression. Statement-shaped work is appended to
    /// `stmts`; the return value is the C expression for the value, or
    /// `None` for unit.
    pub(crate) fn emit_expr(
        &mut self,
        tex: &Tex,
        stmts: &mut String,
        ind: usize,
    ) -> Option<String> {
        match &tex.kind {
            TexKind::Unit => None,
            TexKind::I64(v) => Some(format!("{}LL", v)),
            TexKind::F64(v) => Some(format!("{:?}", v)),
            TexKind::Bool(v) => Some(if *v { "true" } else { "false" }.to_string()),
            TexKind::Char(v) => Some(format!("'{}'", escape_c_char(*v))),
            TexKind::Str(v) => Some(format!("\"{}\"", escape_c_string(v))),

            TexKind::Local(name) => {
                if tex.ty == Mono::Unit {
                    return None;
                }
                Some(self.lookup_local(name).to_string())
            }

            TexKind::Glob { top, inst } => {
                let inst = match inst {
                    Some(entries) => entries.clone(),
                    // References typed at a skeleton (recursion within a
                    // component) carry no instantiation; recover it by
                    // matching this use's ground type against the
                    // binding's polytype.
                    None => self.derive_inst(*top, &tex.ty),
                };
                let name = self.emit_top(*top, &inst);
                if tex.ty == Mono::Unit {
                    return None;
                }
                Some(name.to_string())
            }

            TexKind::Tuple(elems) => {
                let cty = self.c_type(&tex.ty);
                let mut inits = Vec::new();
                for (i, elem) in elems.iter().enumerate() {
                    if let Some(v) = self.emit_expr(elem, stmts, ind) {
                        inits.push(format!("._{} = {}", i, v));
                    }
                }
                if inits.is_empty() {
                    Some(format!("({}){{0}}", cty))
                } else {
                    Some(format!("({}){{ {} }}", cty, inits.join(", ")))
                }
            }

            TexKind::Call { func, args } => self.emit_call(tex, func, args, stmts, ind),

            TexKind::Let { name, value, body } => {
                let value_c = self.emit_expr(value, stmts, ind);
                let depth = self.locals.len();
                if value.ty == Mono::Unit {
                    if let Some(v) = value_c {
                        stmts.push_str(&format!("{}{};\n", pad(ind), v));
                    }
                    // Unit locals have no C representation.
                    self.locals.push((name.clone(), SmolStr::new("")));
                } else {
                    let cty = self.c_type(&value.ty);
                    let cname = self.alloc_local(name);
                    stmts.push_str(&format!(
                        "{}{} {} = {};\n",
                        pad(ind),
                        cty,
                        cname,
                        value_c.expect("non-unit value")
                    ));
                }
                let out = self.emit_expr(body, stmts, ind);
                self.locals.truncate(depth);
                out
            }

            TexKind::Seq(a, b) => {
                if let Some(v) = self.emit_expr(a, stmts, ind) {
                    stmts.push_str(&format!("{}{};\n", pad(ind), v));
                }
                self.emit_expr(b, stmts, ind)
            }

            TexKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_c = self
                    .emit_expr(cond, stmts, ind)
                    .expect("boolean condition");
                if tex.ty == Mono::Unit {
                    let mut then_stmts = String::new();
                    if let Some(v) = self.emit_expr(then_branch, &mut then_stmts, ind + 1) {
                        then_stmts.push_str(&format!("{}{};\n", pad(ind + 1), v));
                    }
                    stmts.push_str(&format!(
                        "{}if ({}) {{\n{}{}}}",
                        pad(ind),
                        cond_c,
                        then_stmts,
                        pad(ind)
                    ));
                    if let Some(els) = else_branch {
                        let mut else_stmts = String::new();
                        if let Some(v) = self.emit_expr(els, &mut else_stmts, ind + 1) {
                            else_stmts.push_str(&format!("{}{};\n", pad(ind + 1), v));
                        }
                        stmts.push_str(&format!(
                            " else {{\n{}{}}}",
                            else_stmts,
                            pad(ind)
                        ));
                    }
                    stmts.push('\n');
                    None
                } else {
                    // A valued if goes through a temporary assigned in
                    // both branches.
                    let cty = self.c_type(&tex.ty);
                    let tmp = self.fresh_tmp();
                    stmts.push_str(&format!("{}{} {};\n", pad(ind), cty, tmp));
                    let mut then_stmts = String::new();
                    let then_v = self.emit_expr(then_branch, &mut then_stmts, ind + 1);
                    if let Some(v) = then_v {
                        then_stmts.push_str(&format!(
                            "{}{} = {};\n",
                            pad(ind + 1),
                            tmp,
                            v
                        ));
                    }
                    let mut else_stmts = String::new();
                    let else_v = else_branch
                        .as_ref()
                        .and_then(|e| self.emit_expr(e, &mut else_stmts, ind + 1));
                    if let Some(v) = else_v {
                        else_stmts.push_str(&format!(
                            "{}{} = {};\n",
                            pad(ind + 1),
                            tmp,
                            v
                        ));
                    }
                    stmts.push_str(&format!(
                        "{}if ({}) {{\n{}{}}} else {{\n{}{}}}\n",
                        pad(ind),
                        cond_c,
                        then_stmts,
                        pad(ind),
                        else_stmts,
                        pad(ind)
                    ));
                    Some(tmp)
                }
            }

            TexKind::Match { scrutinee, arms } => {
                // The scrutinee is a variable bound by the desugarer, so
                // guards are pure projections of it.
                let _ = self.emit_expr(scrutinee, stmts, ind);
                let result = if tex.ty == Mono::Unit {
                    None
                } else {
                    let cty = self.c_type(&tex.ty);
                    let tmp = self.fresh_tmp();
                    stmts.push_str(&format!("{}{} {};\n", pad(ind), cty, tmp));
                    Some(tmp)
                };

                for (i, arm) in arms.iter().enumerate() {
                    let cond_c = self
                        .emit_expr(&arm.cond, stmts, ind)
                        .expect("boolean guard");
                    if i == 0 {
                        stmts.push_str(&format!("{}if ({}) {{\n", pad(ind), cond_c));
                    } else {
                        stmts.push_str(&format!(" else if ({}) {{\n", cond_c));
                    }
                    let depth = self.locals.len();
                    let mut arm_stmts = String::new();
                    for (name, value) in &arm.bindings {
                        let value_c = self.emit_expr(value, &mut arm_stmts, ind + 1);
                        if value.ty == Mono::Unit {
                            if let Some(v) = value_c {
                                arm_stmts.push_str(&format!("{}{};\n", pad(ind + 1), v));
                            }
                            self.locals.push((name.clone(), SmolStr::new("")));
                        } else {
                            let cty = self.c_type(&value.ty);
                            let cname = self.alloc_local(name);
                            arm_stmts.push_str(&format!(
                                "{}{} {} = {};\n",
                                pad(ind + 1),
                                cty,
                                cname,
                                value_c.expect("non-unit binding")
                            ));
                        }
                    }
                    let body_v = self.emit_expr(&arm.body, &mut arm_stmts, ind + 1);
                    self.locals.truncate(depth);
                    match (&result, body_v) {
                        (Some(tmp), Some(v)) => arm_stmts.push_str(&format!(
                            "{}{} = {};\n",
                            pad(ind + 1),
                            tmp,
                            v
                        )),
                        (None, Some(v)) => {
                            arm_stmts.push_str(&format!("{}{};\n", pad(ind + 1), v))
                        }
                        _ => {}
                    }
                    stmts.push_str(&arm_stmts);
                    stmts.push_str(&format!("{}}}", pad(ind)));
                }
                // Unmatched values trap.
                stmts.push_str(&format!(
                    " else {{\n{}assert(0);\n{}}}\n",
                    pad(ind + 1),
                    pad(ind)
                ));
                result
            }

            TexKind::Assign { target, value } => {
                let target_c = self
                    .emit_expr(target, stmts, ind)
                    .expect("assignment target has a location");
                match self.emit_expr(value, stmts, ind) {
                    Some(v) => {
                        stmts.push_str(&format!("{}{} = {};\n", pad(ind), target_c, v))
                    }
                    None => {}
                }
                None
            }

            TexKind::Struct { fields } => {
                let cty = self.c_type(&tex.ty);
                let mut inits = Vec::new();
                for (name, value) in fields {
                    if let Some(v) = self.emit_expr(value, stmts, ind) {
                        inits.push(format!(".{} = {}", name, v));
                    }
                }
                if inits.is_empty() {
                    Some(format!("({}){{0}}", cty))
                } else {
                    Some(format!("({}){{ {} }}", cty, inits.join(", ")))
                }
            }

            TexKind::Enum { variant, payload } => {
                let cty = self.c_type(&tex.ty);
                let tag_base = mangle(&tex.ty);
                let tag = format!("{}_{}_TAG", tag_base, variant);
                let payload_c = payload
                    .as_ref()
                    .and_then(|p| self.emit_expr(p, stmts, ind).map(|v| (p, v)));
                match payload_c {
                    Some((_, v)) => Some(format!(
                        "({}){{ .tag = {}, .data = {{ .{} = {} }} }}",
                        cty, tag, variant, v
                    )),
                    None => Some(format!("({}){{ .tag = {} }}", cty, tag)),
                }
            }

            TexKind::FieldAccess { base, field } => {
                let base_c = self.emit_expr(base, stmts, ind)?;
                if tex.ty == Mono::Unit {
                    return None;
                }
                Some(format!("({}).{}", base_c, field))
            }

            TexKind::TupleAccess { base, index } => {
                let base_c = self.emit_expr(base, stmts, ind)?;
                if tex.ty == Mono::Unit {
                    return None;
                }
                Some(format!("({})._{}", base_c, index))
            }

            TexKind::CheckVariant { variant, expr } => {
                let value = self
                    .emit_expr(expr, stmts, ind)
                    .expect("enum value is not unit");
                let tag_base = mangle(&expr.ty);
                Some(format!("(({}).tag == {}_{}_TAG)", value, tag_base, variant))
            }

            TexKind::AccessEnumField { variant, expr } => {
                let value = self.emit_expr(expr, stmts, ind)?;
                if tex.ty == Mono::Unit {
                    return None;
                }
                Some(format!("(({}).data.{})", value, variant))
            }

            TexKind::Ref(inner) => {
                if Self::is_lvalue(inner) {
                    let v = self.emit_expr(inner, stmts, ind)?;
                    Some(format!("(&{})", v))
                } else {
                    // Materialize rvalues before taking their address.
                    let cty = self.c_type(&inner.ty);
                    let v = self.emit_expr(inner, stmts, ind)?;
                    let tmp = self.fresh_tmp();
                    stmts.push_str(&format!("{}{} {} = {};\n", pad(ind), cty, tmp, v));
                    Some(format!("(&{})", tmp))
                }
            }

            TexKind::Deref(inner) => {
                let v = self.emit_expr(inner, stmts, ind)?;
                if tex.ty == Mono::Unit {
                    return None;
                }
                Some(format!("(*{})", v))
            }

            TexKind::SizeOf(mono) => {
                if *mono == Mono::Unit {
                    return Some("0LL".to_string());
                }
                let cty = self.c_type(mono);
                Some(format!("(int64_t)sizeof({})", cty))
            }

            TexKind::Loop(body) => {
                let result = if tex.ty == Mono::Unit {
                    None
                } else {
                    let cty = self.c_type(&tex.ty);
                    let tmp = self.fresh_tmp();
                    stmts.push_str(&format!("{}{} {};\n", pad(ind), cty, tmp));
                    Some(tmp)
                };
                self.loop_results.push(result.clone());
                let mut body_stmts = String::new();
                if let Some(v) = self.emit_expr(body, &mut body_stmts, ind + 1) {
                    body_stmts.push_str(&format!("{}{};\n", pad(ind + 1), v));
                }
                self.loop_results.pop();
                stmts.push_str(&format!(
                    "{}for (;;) {{\n{}{}}}\n",
                    pad(ind),
                    body_stmts,
                    pad(ind)
                ));
                result
            }

            TexKind::Break(value) => {
                let slot = self.loop_results.last().cloned().flatten();
                if let Some(v) = value {
                    if let Some(c) = self.emit_expr(v, stmts, ind) {
                        if let Some(tmp) = &slot {
                            stmts.push_str(&format!("{}{} = {};\n", pad(ind), tmp, c));
                        } else {
                            stmts.push_str(&format!("{}{};\n", pad(ind), c));
                        }
                    }
                }
                stmts.push_str(&format!("{}break;\n", pad(ind)));
                None
            }

            TexKind::Return(value) => {
                match value.as_ref().and_then(|v| self.emit_expr(v, stmts, ind)) {
                    Some(c) => stmts.push_str(&format!("{}return {};\n", pad(ind), c)),
                    None => stmts.push_str(&format!("{}return;\n", pad(ind))),
                }
                None
            }

            TexKind::Assert(inner) => {
                let v = self
                    .emit_expr(inner, stmts, ind)
                    .expect("assert takes a boolean");
                stmts.push_str(&format!("{}assert({});\n", pad(ind), v));
                None
            }

            TexKind::Binary { op, lhs, rhs } => {
                let l = self.emit_expr(lhs, stmts, ind).expect("operand");
                let r = self.emit_expr(rhs, stmts, ind).expect("operand");
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Rem => "%",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::And => "&&",
                    BinOp::Or => "||",
                };
                Some(format!("({} {} {})", l, sym, r))
            }

            TexKind::Unary { op, expr } => {
                let v = self.emit_expr(expr, stmts, ind).expect("operand");
                match op {
                    UnOp::Neg => Some(format!("(-{})", v)),
                    UnOp::Not => Some(format!("(!{})", v)),
                }
            }
        }
    }

    /// Lower a call. Multi-argument functions are emitted with separate
    /// C parameters, so a single tuple-typed argument is spread across
    /// them through a temporary.
    fn emit_call(
        &mut self,
        tex: &Tex,
        func: &Tex,
        args: &[Tex],
        stmts: &mut String,
        ind: usize,
    ) -> Option<String> {
        let callee = self
            .emit_expr(func, stmts, ind)
            .expect("callable value");

        let param_shape = match &func.ty {
            Mono::Func(param, _) => (**param).clone(),
            other => other.clone(),
        };

        let mut arg_values = Vec::new();
        if args.len() == 1 {
            if let Mono::Tuple(elems) = &param_shape {
                if elems.len() > 1 {
                    // One tuple expression feeding a multi-parameter
                    // function: bind it and pass its members.
                    let v = self
                        .emit_expr(&args[0], stmts, ind)
                        .expect("tuple argument");
                    let cty = self.c_type(&param_shape);
                    let tmp = self.fresh_tmp();
                    stmts.push_str(&format!("{}{} {} = {};\n", pad(ind), cty, tmp, v));
                    for (i, elem) in elems.iter().enumerate() {
                        if *elem != Mono::Unit {
                            arg_values.push(format!("{}._{}", tmp, i));
                        }
                    }
                    return self.finish_call(tex, callee, arg_values, stmts, ind);
                }
            }
        }
        for arg in args {
            if let Some(v) = self.emit_expr(arg, stmts, ind) {
                arg_values.push(v);
            }
        }
        self.finish_call(tex, callee, arg_values, stmts, ind)
    }

    fn finish_call(
        &mut self,
        tex: &Tex,
        callee: String,
        args: Vec<String>,
        stmts: &mut String,
        ind: usize,
    ) -> Option<String> {
        let call = format!("{}({})", callee, args.join(", "));
        if tex.ty == Mono::Unit {
            stmts.push_str(&format!("{}{};\n", pad(ind), call));
            None
        } else {
            Some(call)
        }
    }
}
