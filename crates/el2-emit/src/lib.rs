//! Monomorphizing C emitter. Walks reachable typed bindings starting
//! from the root module's monomorphic toplevels, specializing every
//! generic binding once per instantiation, and prints a single C99
//! translation unit.

mod ctype;
mod expr;

use std::collections::{HashMap, HashSet};
use std::io;

use smol_str::SmolStr;

use el2_typeck::{
    Compiler, InstMap, Mono, TexArm, TopArgs, TopId, TopVar, Tex, TexKind,
};

pub use ctype::mangle;

const PRELUDE: &str = "#include <stdint.h>\n\
#include <stdbool.h>\n\
#include <stdlib.h>\n\
#include <string.h>\n\
#include <assert.h>\n\
#include <stdio.h>\n";

/// Emit the translation unit for a checked compilation to `out`.
pub fn emit<W: io::Write>(comp: &Compiler, out: &mut W) -> io::Result<()> {
    out.write_all(emit_translation_unit(comp).as_bytes())
}

/// Emit the translation unit for a checked compilation as a string.
pub fn emit_translation_unit(comp: &Compiler) -> String {
    let mut emitter = CEmitter::new(comp);
    emitter.emit_roots();
    emitter.finish()
}

pub struct CEmitter<'a> {
    comp: &'a Compiler,

    // Output buffers, concatenated in order at the end.
    type_fwd: String,
    type_defs: String,
    decls: String,
    defs: String,

    /// Global initializer statements, in dependency order.
    init_stmts: String,

    /// Names of already-emitted type entities (user instantiations,
    /// tuple structs, function-pointer typedefs).
    emitted_types: HashSet<String>,
    /// Per-binding instantiation cache: at most one definition per
    /// (binding, type-argument vector).
    inst_cache: HashMap<(TopId, Vec<String>), SmolStr>,
    emitted_externs: HashSet<TopId>,

    // Per-function emission state, saved and restored around nested
    // emissions triggered by global references.
    locals: Vec<(SmolStr, SmolStr)>,
    used_names: HashSet<SmolStr>,
    loop_results: Vec<Option<String>>,
    tmp_counter: u32,
}

impl<'a> CEmitter<'a> {
    fn new(comp: &'a Compiler) -> Self {
        Self {
            comp,
            type_fwd: String::new(),
            type_defs: String::new(),
            decls: String::new(),
            defs: String::new(),
            init_stmts: String::new(),
            emitted_types: HashSet::new(),
            inst_cache: HashMap::new(),
            emitted_externs: HashSet::new(),
            locals: Vec::new(),
            used_names: HashSet::new(),
            loop_results: Vec::new(),
            tmp_counter: 0,
        }
    }

    // ── Monotype grounding ────────────────────────────────────────

    /// Deep-resolve through the table and default any still-unbound
    /// variable to `unit` (an unconstrained value is never consumed).
    pub(crate) fn resolve(&self, mono: &Mono) -> Mono {
        let applied = self.comp.table.apply(mono);
        ground(&applied)
    }

    /// Ground a monotype under an instantiation: resolve through the
    /// table first (which surfaces the quantified variables of a
    /// generalized binding), then substitute the instantiation, then
    /// default whatever is left.
    fn monomorphize(&self, mono: &Mono, map: &InstMap) -> Mono {
        let applied = self.comp.table.apply(mono);
        ground(&applied.subst_named(map))
    }

    /// Recover the instantiation of a polymorphic binding from a use
    /// site's ground type, in quantifier order.
    pub(crate) fn derive_inst(&self, top: TopId, use_ty: &Mono) -> InstMap {
        let el = match &self.comp.tops[top] {
            TopVar::El(el) => el,
            _ => return Vec::new(),
        };
        let quantifiers = el.poly.quantifiers();
        if quantifiers.is_empty() {
            return Vec::new();
        }
        let pattern = self.comp.table.apply(el.poly.mono());
        let mut found: Vec<(SmolStr, Mono)> = Vec::new();
        match_poly(&pattern, use_ty, &mut found);
        quantifiers
            .into_iter()
            .map(|name| {
                let mono = found
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, m)| m.clone())
                    .unwrap_or(Mono::Unit);
                (name, mono)
            })
            .collect()
    }

    // ── Roots ─────────────────────────────────────────────────────

    fn emit_roots(&mut self) {
        let root = &self.comp.modules[&self.comp.root_module];
        for &id in &root.decls {
            match &self.comp.tops[id] {
                TopVar::El(el) => {
                    if el.poly.is_mono() {
                        self.emit_top(id, &Vec::new());
                    }
                }
                TopVar::Extern { .. } => {
                    self.emit_top(id, &Vec::new());
                }
                // No declaration; the host compiler provides the symbol.
                TopVar::ImplicitExtern { .. } => {}
            }
        }
    }

    fn finish(mut self) -> String {
        let root = &self.comp.modules[&self.comp.root_module];
        let user_main = root.glob_vars.get(&SmolStr::new("main")).copied();

        let mut out = String::new();
        out.push_str(PRELUDE);
        out.push('\n');
        out.push_str(&self.type_fwd);
        out.push('\n');
        out.push_str(&self.type_defs);
        out.push('\n');
        out.push_str(&self.decls);
        out.push('\n');
        out.push_str(&self.defs);

        match user_main.filter(|&top| matches!(self.comp.tops[top], TopVar::El(_))) {
            Some(top) => {
                let el = self.comp.el(top);
                let name = el.unique_name.clone();
                let ret = match self.resolve(el.poly.mono()) {
                    Mono::Func(_, ret) => *ret,
                    other => other,
                };
                out.push_str("\nint main(void) {\n");
                out.push_str(&self.init_stmts);
                match ret {
                    Mono::Unit => {
                        out.push_str(&format!("  {}();\n  return 0;\n", name));
                    }
                    _ => {
                        out.push_str(&format!("  return (int){}();\n", name));
                    }
                }
                out.push_str("}\n");
            }
            None if !self.init_stmts.is_empty() => {
                out.push_str("\nvoid el2_init(void) {\n");
                out.push_str(&self.init_stmts);
                out.push_str("}\n");
            }
            None => {}
        }
        out
    }

    // ── Toplevel emission ─────────────────────────────────────────

    /// Emit one (binding, instantiation) pair, returning its C name.
    /// Cached so that every instantiation is defined at most once; the
    /// cache entry is written before the body is emitted so recursive
    /// references resolve to the name being defined.
    pub(crate) fn emit_top(&mut self, top: TopId, inst: &InstMap) -> SmolStr {
        match &self.comp.tops[top] {
            TopVar::ImplicitExtern { external, .. } => external.clone(),
            TopVar::Extern { external, ty, .. } => {
                let external = external.clone();
                let ty = self.resolve(&ty.clone());
                if self.emitted_externs.insert(top) {
                    match &ty {
                        Mono::Func(param, ret) => {
                            let params = self.c_params_of(param);
                            let param_list = if params.is_empty() {
                                "void".to_string()
                            } else {
                                params.join(", ")
                            };
                            let ret_ty = self.c_type(ret);
                            self.decls.push_str(&format!(
                                "extern {} {}({});\n",
                                ret_ty, external, param_list
                            ));
                        }
                        other => {
                            let c = self.c_type(other);
                            self.decls
                                .push_str(&format!("extern {} {};\n", c, external));
                        }
                    }
                }
                external
            }
            TopVar::El(el) => {
                let key_args: Vec<String> =
                    inst.iter().map(|(_, m)| mangle(&self.resolve(m))).collect();
                let key = (top, key_args.clone());
                if let Some(name) = self.inst_cache.get(&key) {
                    return name.clone();
                }
                let c_name = if inst.is_empty() {
                    el.unique_name.clone()
                } else {
                    SmolStr::new(format!(
                        "{}_inst_{}",
                        el.unique_name,
                        key_args.join("_")
                    ))
                };
                self.inst_cache.insert(key, c_name.clone());
                self.emit_el_definition(top, inst, &c_name);
                c_name
            }
        }
    }

    fn emit_el_definition(&mut self, top: TopId, inst: &InstMap, c_name: &SmolStr) {
        let el = self.comp.el(top);
        let typed = el
            .typed_expr
            .as_ref()
            .expect("binding typed before emission")
            .clone();
        let args = el.args.clone();
        let poly_mono = el.poly.mono().clone();

        // Monomorphize: substitute the instantiation into every type of
        // the binding, grounding the body completely.
        let inst_resolved: InstMap = inst
            .iter()
            .map(|(n, m)| (n.clone(), self.resolve(m)))
            .collect();
        let body = self.subst_tex(&typed, &inst_resolved);
        let mono = self.monomorphize(&poly_mono, &inst_resolved);

        // Nested emissions (for referenced globals) must not disturb the
        // current function's naming state.
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_names = std::mem::take(&mut self.used_names);
        let saved_loops = std::mem::take(&mut self.loop_results);

        match args {
            TopArgs::Func(params) => {
                let ret = match &mono {
                    Mono::Func(_, ret) => (**ret).clone(),
                    other => other.clone(),
                };
                let mut sig_params = Vec::new();
                for (pname, pty) in &params {
                    let pty = self.monomorphize(pty, &inst_resolved);
                    if pty == Mono::Unit {
                        continue;
                    }
                    let c = self.alloc_local(pname);
                    sig_params.push(format!("{} {}", self.c_type(&pty), c));
                }
                let param_list = if sig_params.is_empty() {
                    "void".to_string()
                } else {
                    sig_params.join(", ")
                };
                let ret_ty = self.c_type(&ret);
                self.decls
                    .push_str(&format!("{} {}({});\n", ret_ty, c_name, param_list));

                let mut stmts = String::new();
                let value = self.emit_expr(&body, &mut stmts, 1);
                let mut def = format!("{} {}({}) {{\n", ret_ty, c_name, param_list);
                def.push_str(&stmts);
                match value {
                    Some(v) if ret != Mono::Unit => {
                        def.push_str(&format!("  return {};\n", v))
                    }
                    Some(v) => def.push_str(&format!("  {};\n", v)),
                    None => {}
                }
                def.push_str("}\n");
                self.defs.push_str(&def);
            }
            TopArgs::NonFunc => {
                if mono == Mono::Unit {
                    // Unit globals carry no value; only their initializer
                    // side effects remain.
                    let mut stmts = String::new();
                    if let Some(v) = self.emit_expr(&body, &mut stmts, 1) {
                        stmts.push_str(&format!("  {};\n", v));
                    }
                    self.init_stmts.push_str(&stmts);
                } else {
                    let c = self.c_type(&mono);
                    self.decls.push_str(&format!("extern {} {};\n", c, c_name));
                    self.defs.push_str(&format!("{} {};\n", c, c_name));
                    let mut stmts = String::new();
                    let value = self.emit_expr(&body, &mut stmts, 1);
                    self.init_stmts.push_str(&stmts);
                    if let Some(v) = value {
                        self.init_stmts.push_str(&format!("  {} = {};\n", c_name, v));
                    }
                }
            }
        }

        self.locals = saved_locals;
        self.used_names = saved_names;
        self.loop_results = saved_loops;
    }

    // ── Monomorphization substitution ─────────────────────────────

    /// Substitute an instantiation map into a typed expression and
    /// ground every monotype in it.
    fn subst_tex(&self, tex: &Tex, map: &InstMap) -> Tex {
        let ty = self.monomorphize(&tex.ty, map);
        let kind = match &tex.kind {
            TexKind::Glob { top, inst } => TexKind::Glob {
                top: *top,
                inst: inst.as_ref().map(|entries| {
                    entries
                        .iter()
                        .map(|(n, m)| (n.clone(), self.monomorphize(m, map)))
                        .collect()
                }),
            },
            TexKind::SizeOf(m) => TexKind::SizeOf(self.monomorphize(m, map)),
            TexKind::Tuple(elems) => {
                TexKind::Tuple(elems.iter().map(|e| self.subst_tex(e, map)).collect())
            }
            TexKind::Call { func, args } => TexKind::Call {
                func: Box::new(self.subst_tex(func, map)),
                args: args.iter().map(|a| self.subst_tex(a, map)).collect(),
            },
            TexKind::Let { name, value, body } => TexKind::Let {
                name: name.clone(),
                value: Box::new(self.subst_tex(value, map)),
                body: Box::new(self.subst_tex(body, map)),
            },
            TexKind::Seq(a, b) => TexKind::Seq(
                Box::new(self.subst_tex(a, map)),
                Box::new(self.subst_tex(b, map)),
            ),
            TexKind::If {
                cond,
                then_branch,
                else_branch,
            } => TexKind::If {
                cond: Box::new(self.subst_tex(cond, map)),
                then_branch: Box::new(self.subst_tex(then_branch, map)),
                else_branch: else_branch
                    .as_ref()
                    .map(|e| Box::new(self.subst_tex(e, map))),
            },
            TexKind::Match { scrutinee, arms } => TexKind::Match {
                scrutinee: Box::new(self.subst_tex(scrutinee, map)),
                arms: arms
                    .iter()
                    .map(|arm| TexArm {
                        cond: self.subst_tex(&arm.cond, map),
                        bindings: arm
                            .bindings
                            .iter()
                            .map(|(n, e)| (n.clone(), self.subst_tex(e, map)))
                            .collect(),
                        body: self.subst_tex(&arm.body, map),
                    })
                    .collect(),
            },
            TexKind::Assign { target, value } => TexKind::Assign {
                target: Box::new(self.subst_tex(target, map)),
                value: Box::new(self.subst_tex(value, map)),
            },
            TexKind::Struct { fields } => TexKind::Struct {
                fields: fields
                    .iter()
                    .map(|(n, e)| (n.clone(), self.subst_tex(e, map)))
                    .collect(),
            },
            TexKind::Enum { variant, payload } => TexKind::Enum {
                variant: variant.clone(),
                payload: payload.as_ref().map(|p| Box::new(self.subst_tex(p, map))),
            },
            TexKind::FieldAccess { base, field } => TexKind::FieldAccess {
                base: Box::new(self.subst_tex(base, map)),
                field: field.clone(),
            },
            TexKind::TupleAccess { base, index } => TexKind::TupleAccess {
                base: Box::new(self.subst_tex(base, map)),
                index: *index,
            },
            TexKind::CheckVariant { variant, expr } => TexKind::CheckVariant {
                variant: variant.clone(),
                expr: Box::new(self.subst_tex(expr, map)),
            },
            TexKind::AccessEnumField { variant, expr } => TexKind::AccessEnumField {
                variant: variant.clone(),
                expr: Box::new(self.subst_tex(expr, map)),
            },
            TexKind::Ref(inner) => TexKind::Ref(Box::new(self.subst_tex(inner, map))),
            TexKind::Deref(inner) => TexKind::Deref(Box::new(self.subst_tex(inner, map))),
            TexKind::Loop(body) => TexKind::Loop(Box::new(self.subst_tex(body, map))),
            TexKind::Break(v) => {
                TexKind::Break(v.as_ref().map(|e| Box::new(self.subst_tex(e, map))))
            }
            TexKind::Return(v) => {
                TexKind::Return(v.as_ref().map(|e| Box::new(self.subst_tex(e, map))))
            }
            TexKind::Assert(inner) => {
                TexKind::Assert(Box::new(self.subst_tex(inner, map)))
            }
            TexKind::Binary { op, lhs, rhs } => TexKind::Binary {
                op: *op,
                lhs: Box::new(self.subst_tex(lhs, map)),
                rhs: Box::new(self.subst_tex(rhs, map)),
            },
            TexKind::Unary { op, expr } => TexKind::Unary {
                op: *op,
                expr: Box::new(self.subst_tex(expr, map)),
            },
            simple => simple.clone(),
        };
        Tex {
            ty,
            span: tex.span,
            kind,
        }
    }
}

/// Structurally match a polytype body (whose quantified variables are
/// still named) against a ground use-site type, recording what each
/// name stands for.
fn match_poly(pattern: &Mono, concrete: &Mono, out: &mut Vec<(SmolStr, Mono)>) {
    match (pattern, concrete) {
        (Mono::Var(name, _), _) => {
            if !out.iter().any(|(n, _)| n == name) {
                out.push((name.clone(), concrete.clone()));
            }
        }
        (Mono::Pointer(a), Mono::Pointer(b)) | (Mono::Opaque(a), Mono::Opaque(b)) => {
            match_poly(a, b, out)
        }
        (Mono::Tuple(xs), Mono::Tuple(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match_poly(x, y, out);
            }
        }
        (Mono::Func(p1, r1), Mono::Func(p2, r2)) => {
            match_poly(p1, p2, out);
            match_poly(r1, r2, out);
        }
        (Mono::User { args: xs, .. }, Mono::User { args: ys, .. }) => {
            for (x, y) in xs.iter().zip(ys) {
                match_poly(x, y, out);
            }
        }
        _ => {}
    }
}

/// Default any leftover unknowns to `unit`.
fn ground(mono: &Mono) -> Mono {
    match mono {
        Mono::Var(..) | Mono::Indir(_) => Mono::Unit,
        Mono::Pointer(inner) => Mono::pointer(ground(inner)),
        Mono::Tuple(elems) => Mono::Tuple(elems.iter().map(ground).collect()),
        Mono::Func(param, ret) => Mono::func(ground(param), ground(ret)),
        Mono::User { repr, args } => Mono::User {
            repr: repr.clone(),
            args: args.iter().map(ground).collect(),
        },
        Mono::Opaque(inner) => Mono::Opaque(Box::new(ground(inner))),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn compile_to_c(source: &str) -> String {
        let comp = el2_typeck::compile_source(source, Path::new("."))
            .unwrap_or_else(|e| panic!("compile error: {}", e));
        emit_translation_unit(&comp)
    }

    #[test]
    fn generic_identity_specializes_once_per_type() {
        let c = compile_to_c(
            "let id = fun x -> x
             let main () : i64 = (id(0); id(1); id(2))",
        );
        assert!(c.contains("main_id_inst_I64"));
        assert_eq!(c.matches("int64_t main_id_inst_I64(int64_t").count(), 2);
        assert!(c.contains("return (int)main_main();"));
    }

    #[test]
    fn two_instantiations_emit_two_definitions() {
        let c = compile_to_c(
            "let id = fun x -> x
             let main () : i64 = (id('c'); id(7))",
        );
        assert!(c.contains("main_id_inst_I64"));
        assert!(c.contains("main_id_inst_Char"));
    }

    #[test]
    fn option_match_lowers_to_tagged_union() {
        let c = compile_to_c(
            "type option(a) := | Some(a) | None
             let main () : i64 = match Some(1) with | Some(x) -> x | None -> 0",
        );
        assert!(c.contains("enum option_I64_tag"));
        assert!(c.contains("option_I64_Some_TAG"));
        assert!(c.contains(".tag == option_I64_Some_TAG"));
        assert!(c.contains(".data.Some"));
        assert!(c.contains("assert(0)"));
        // The tag enum is defined exactly once.
        assert_eq!(c.matches("enum option_I64_tag {").count(), 1);
    }

    #[test]
    fn unit_parameters_are_erased() {
        let c = compile_to_c(
            "let nop (u : unit) : i64 = 0
             let main () : i64 = nop(())",
        );
        assert!(c.contains("int64_t main_nop(void)"));
        assert!(c.contains("main_nop()"));
    }

    #[test]
    fn unit_return_lowers_to_void() {
        let c = compile_to_c("let pause () = ()\nlet main () = pause()");
        assert!(c.contains("void main_pause(void)"));
    }

    #[test]
    fn tuple_literal_uses_designated_initializer() {
        let c = compile_to_c("let main () : i64 = let p = (1, true) in p.0");
        assert!(c.contains("struct Tup2_I64_Bool"));
        assert!(c.contains("._0 = "));
        assert!(c.contains("._1 = "));
    }

    #[test]
    fn struct_literal_uses_designated_initializer() {
        let c = compile_to_c(
            "type point := { x : i64, y : i64 }
             let main () : i64 = point { x = 1, y = 2 }.x",
        );
        assert!(c.contains("struct point {"));
        assert!(c.contains(".x = "));
    }

    #[test]
    fn if_with_value_goes_through_temporary() {
        let c = compile_to_c("let main () : i64 = if true then 1 else 2");
        assert!(c.contains("int64_t __t0;"));
        assert!(c.contains("__t0 = 1LL;"));
        assert!(c.contains("__t0 = 2LL;"));
    }

    #[test]
    fn extern_declaration_is_emitted() {
        let c = compile_to_c(
            "extern my_abs : c_int -> c_int = \"abs\"
             let main () : c_int = my_abs(my_abs(5))",
        );
        assert!(c.contains("extern int abs(int);"));
        assert_eq!(c.matches("extern int abs(int);").count(), 1);
    }

    #[test]
    fn implicit_extern_has_no_declaration_but_is_called() {
        let c = compile_to_c(
            "implicit_extern my_puts : &char -> c_int = \"puts\"
             let main () = (my_puts(\"hello\"); ())",
        );
        assert!(!c.contains("extern int puts"));
        assert!(c.contains("puts(\"hello\")"));
    }

    #[test]
    fn string_literals_are_escaped() {
        let c = compile_to_c(
            "implicit_extern my_puts : &char -> c_int = \"puts\"
             let main () = (my_puts(\"a\\\"b\\\\c\"); ())",
        );
        assert!(c.contains(r#""a\"b\\c""#));
    }

    #[test]
    fn prelude_headers_come_first() {
        let c = compile_to_c("let main () : i64 = 0");
        assert!(c.starts_with("#include <stdint.h>"));
        assert!(c.contains("#include <assert.h>"));
    }

    #[test]
    fn global_value_initialized_before_main() {
        let c = compile_to_c("let answer = 41 + 1\nlet main () : i64 = answer");
        assert!(c.contains("int64_t main_answer;"));
        let init = c.find("main_answer = ").expect("initializer present");
        let call = c.find("return (int)main_main").expect("main call present");
        assert!(init < call);
    }

    #[test]
    fn mutually_recursive_functions_both_emitted() {
        let c = compile_to_c(
            "let even (n : i64) : bool = if n = 0 then true else odd(n - 1)
             let odd (n : i64) : bool = if n = 0 then false else even(n - 1)
             let main () : i64 = if even(10) then 0 else 1",
        );
        assert!(c.contains("bool main_even(int64_t"));
        assert!(c.contains("bool main_odd(int64_t"));
    }

    #[test]
    fn loop_break_value_via_temporary() {
        let c = compile_to_c(
            "let main () : i64 = let x = loop (break 42) in x",
        );
        assert!(c.contains("for (;;)"));
        assert!(c.contains("break;"));
    }

    #[test]
    fn sizeof_lowers_to_c_sizeof() {
        let c = compile_to_c("let main () : i64 = sizeof(i64)");
        assert!(c.contains("sizeof(int64_t)"));
    }

    #[test]
    fn assert_lowers_to_c_assert() {
        let c = compile_to_c("let main () : i64 = (assert(1 < 2); 0)");
        assert!(c.contains("assert((1LL < 2LL));"));
    }

    #[test]
    fn generic_struct_emits_one_struct_per_instantiation() {
        let c = compile_to_c(
            "type boxed(a) := { value : a }
             let wrap = fun x -> boxed { value = x }
             let main () : i64 = (wrap(1).value; wrap(true); 0)",
        );
        assert!(c.contains("struct boxed_I64"));
        assert!(c.contains("struct boxed_Bool"));
        assert_eq!(c.matches("struct boxed_I64 {").count(), 1);
    }

    #[test]
    fn pointer_types_lower_to_c_pointers() {
        let c = compile_to_c(
            "let deref (p : &i64) : i64 = *p
             let main () : i64 = let v = 3 in deref(&v)",
        );
        assert!(c.contains("int64_t main_deref(int64_t * p)"));
    }
}
