use super::*;
use std::path::Path;

fn check(source: &str) -> Result<Compiler, CompileError> {
    compile_source(source, Path::new("."))
}

fn check_ok(source: &str) -> Compiler {
    match check(source) {
        Ok(comp) => comp,
        Err(err) => panic!("unexpected compile error: {}", err),
    }
}

fn check_err(source: &str) -> CompileError {
    match check(source) {
        Ok(_) => panic!("expected a compile error, got none"),
        Err(err) => err,
    }
}

fn main_module_binding(comp: &Compiler, name: &str) -> TopId {
    comp.modules["Main"].glob_vars[&smol_str::SmolStr::new(name)]
}

fn has_unbound_indir(comp: &Compiler, mono: &Mono) -> bool {
    match mono {
        Mono::Indir(id) => match comp.table.lookup(*id) {
            Some(inner) => has_unbound_indir(comp, &inner.clone()),
            None => true,
        },
        Mono::Var(_, id) => match comp.table.lookup(*id) {
            Some(inner) => has_unbound_indir(comp, &inner.clone()),
            None => false,
        },
        Mono::Pointer(inner) | Mono::Opaque(inner) => has_unbound_indir(comp, inner),
        Mono::Tuple(elems) => elems.iter().any(|e| has_unbound_indir(comp, e)),
        Mono::Func(param, ret) => {
            has_unbound_indir(comp, param) || has_unbound_indir(comp, ret)
        }
        Mono::User { args, .. } => args.iter().any(|a| has_unbound_indir(comp, a)),
        _ => false,
    }
}

// ── Generalization and instantiation ─────────────────────────────

#[test]
fn identity_generalizes_to_forall() {
    let comp = check_ok("let id = fun x -> x\nlet main () : i64 = id(0)");
    let id = main_module_binding(&comp, "id");
    let el = comp.el(id);
    assert_eq!(el.poly.quantifiers().len(), 1);
    assert!(matches!(
        comp.table.apply(el.poly.mono()),
        Mono::Func(_, _)
    ));
}

#[test]
fn generalized_binding_is_closed() {
    let comp = check_ok("let id = fun x -> x\nlet main () : i64 = id(0)");
    let id = main_module_binding(&comp, "id");
    let resolved = comp.table.apply(comp.el(id).poly.mono());
    assert!(!has_unbound_indir(&comp, &resolved));
}

#[test]
fn instantiation_is_fresh_per_use() {
    let mut comp = check_ok("let id = fun x -> x");
    let id = main_module_binding(&comp, "id");
    let poly = comp.el(id).poly.clone();
    let (a, map_a) = infer::inst(&mut comp, &poly);
    let (b, map_b) = infer::inst(&mut comp, &poly);
    assert_eq!(map_a.len(), 1);
    assert_eq!(map_b.len(), 1);
    assert_ne!(map_a[0].1, map_b[0].1);
    // Unifying one instantiation at a concrete type leaves the other
    // untouched.
    comp.unify(&a, &Mono::func(Mono::I64, Mono::I64)).unwrap();
    assert!(has_unbound_indir(&comp, &comp.table.apply(&b)));
}

#[test]
fn polymorphic_function_used_at_two_types() {
    check_ok(
        "let id = fun x -> x
         let main () : i64 = (id(0); id('c'); id(1))",
    );
}

#[test]
fn annotated_return_type_is_enforced() {
    let err = check_err("let main () : i64 = true");
    assert!(matches!(err, CompileError::Unify { .. }));
}

// ── Weakening (value restriction) ────────────────────────────────

#[test]
fn value_binding_is_weakened_not_generalized() {
    let comp = check_ok("let id = fun x -> x\nlet alias = id");
    let alias = main_module_binding(&comp, "alias");
    assert!(comp.el(alias).poly.is_mono());
}

#[test]
fn weakened_binding_rejects_two_incompatible_uses() {
    let err = check_err(
        "let id = fun x -> x
         let alias = id
         let a = alias(1)
         let b = alias(true)",
    );
    assert!(matches!(err, CompileError::Unify { .. }));
}

#[test]
fn weakened_binding_usable_at_one_type() {
    check_ok(
        "let id = fun x -> x
         let alias = id
         let a = alias(1)
         let b = alias(2)",
    );
}

// ── SCC scheduling ───────────────────────────────────────────────

#[test]
fn mutually_recursive_functions_share_a_component() {
    let comp = check_ok(
        "let even (n : i64) : bool = if n = 0 then true else odd(n - 1)
         let odd (n : i64) : bool = if n = 0 then false else even(n - 1)",
    );
    let even = main_module_binding(&comp, "even");
    let odd = main_module_binding(&comp, "odd");
    let even_scc = comp.el(even).scc.unwrap();
    let odd_scc = comp.el(odd).scc.unwrap();
    assert_eq!(even_scc, odd_scc);
    assert_eq!(comp.sccs[even_scc].state, SccState::Done);
    assert_eq!(comp.sccs[even_scc].vars.len(), 2);
}

#[test]
fn independent_functions_get_own_components() {
    let comp = check_ok("let f () = 1\nlet g () = f()");
    let f = main_module_binding(&comp, "f");
    let g = main_module_binding(&comp, "g");
    assert_ne!(comp.el(f).scc.unwrap(), comp.el(g).scc.unwrap());
}

#[test]
fn forward_reference_resolves() {
    check_ok("let f () : i64 = g()\nlet g () : i64 = 7");
}

// ── Pattern desugaring ───────────────────────────────────────────

#[test]
fn toplevel_tuple_binding_splits_into_projections() {
    let comp = check_ok("let (a, b) = (1, 2)\nlet main () : i64 = a + b");
    let a = main_module_binding(&comp, "a");
    assert_eq!(comp.table.apply(comp.el(a).poly.mono()), Mono::I64);
}

#[test]
fn refutable_pattern_rejected_in_let() {
    let err = check_err("let main () = let 0 = 1 in 2");
    assert!(matches!(err, CompileError::Pattern { .. }));
}

#[test]
fn struct_pattern_binds_fields() {
    check_ok(
        "type point := { x : i64, y : i64 }
         let main () : i64 = let point { x, y } = point { x = 1, y = 2 } in x + y",
    );
}

#[test]
fn nested_tuple_pattern() {
    check_ok("let main () : i64 = let ((a, b), c) = ((1, 2), 3) in a + b + c");
}

#[test]
fn ref_pattern_dereferences() {
    check_ok("let main () : i64 = let v = 5 in let &w = &v in w");
}

#[test]
fn match_on_option() {
    let comp = check_ok(
        "type option(a) := | Some(a) | None
         let main () : i64 = match Some(1) with | Some(x) -> x | None -> 0",
    );
    let main = main_module_binding(&comp, "main");
    assert!(comp.el(main).typed_expr.is_some());
}

#[test]
fn match_literal_arm_compiles_to_equality_guard() {
    check_ok("let f (x : i64) : i64 = match x with | 0 -> 1 | n -> n * 2");
}

#[test]
fn match_arms_must_agree_on_result_type() {
    let err = check_err(
        "type option(a) := | Some(a) | None
         let main () = match Some(1) with | Some(x) -> x | None -> true",
    );
    assert!(matches!(err, CompileError::Unify { .. }));
}

#[test]
fn match_payload_type_flows_into_arm() {
    let err = check_err(
        "type option(a) := | Some(a) | None
         let main () : i64 = match Some(true) with | Some(x) -> x | None -> 0",
    );
    assert!(matches!(err, CompileError::Unify { .. }));
}

// ── Structs, enums, fields ───────────────────────────────────────

#[test]
fn struct_literal_and_field_access() {
    check_ok(
        "type point := { x : i64, y : i64 }
         let main () : i64 = let p = point { x = 1, y = 2 } in p.x + p.y",
    );
}

#[test]
fn struct_literal_with_wrong_field_name_fails() {
    let err = check_err(
        "type point := { x : i64, y : i64 }
         let main () = point { x = 1, z = 2 }",
    );
    assert!(matches!(
        err,
        CompileError::Name {
            kind: NameKind::Field,
            ..
        }
    ));
}

#[test]
fn struct_literal_with_missing_field_fails() {
    let err = check_err(
        "type point := { x : i64, y : i64 }
         let main () = point { x = 1 }",
    );
    assert!(matches!(err, CompileError::Pattern { .. }));
}

#[test]
fn field_access_on_unannotated_parameter_uses_field_table() {
    check_ok(
        "type point := { x : i64, y : i64 }
         let get_x (p) : i64 = p.x",
    );
}

#[test]
fn generic_struct_instantiates_per_use() {
    check_ok(
        "type boxed(a) := { value : a }
         let main () : i64 = let b = boxed { value = 1 } in
           let c = boxed { value = true } in b.value",
    );
}

#[test]
fn recursive_type_through_pointer() {
    check_ok(
        "type node := { value : i64, next : &node }
         let advance (n : node) : i64 = (*n.next).value",
    );
}

#[test]
fn alias_unifies_with_expansion() {
    check_ok(
        "type str := &char
         let greet (s : str) : str = s
         let main () : str = greet(\"hi\")",
    );
}

#[test]
fn enum_variant_arity_is_checked() {
    let err = check_err(
        "type option(a) := | Some(a) | None
         let main () = Some",
    );
    assert!(matches!(err, CompileError::Pattern { .. }));
}

#[test]
fn type_constructor_arity_is_checked() {
    let err = check_err(
        "type option(a) := | Some(a) | None
         let f (x : option(i64, bool)) = x",
    );
    assert!(matches!(err, CompileError::Arity { .. }));
}

// ── Duplicates and name errors ───────────────────────────────────

#[test]
fn duplicate_toplevel_rejected() {
    let err = check_err("let f () = 1\nlet f () = 2");
    assert!(matches!(err, CompileError::DuplicateToplevel(_)));
}

#[test]
fn duplicate_type_rejected() {
    let err = check_err("type t := i64\ntype t := bool");
    assert!(matches!(
        err,
        CompileError::Duplicate {
            kind: NameKind::Type,
            ..
        }
    ));
}

#[test]
fn duplicate_field_rejected() {
    let err = check_err("type p := { x : i64, x : bool }");
    assert!(matches!(
        err,
        CompileError::Duplicate {
            kind: NameKind::Field,
            ..
        }
    ));
}

#[test]
fn duplicate_variant_rejected() {
    let err = check_err("type e := | A | A");
    assert!(matches!(
        err,
        CompileError::Duplicate {
            kind: NameKind::Variant,
            ..
        }
    ));
}

#[test]
fn unknown_variable_rejected() {
    let err = check_err("let main () = missing");
    assert!(matches!(
        err,
        CompileError::Name {
            kind: NameKind::Variable,
            ..
        }
    ));
}

#[test]
fn unknown_type_rejected() {
    let err = check_err("let f (x : nosuch) = x");
    assert!(matches!(
        err,
        CompileError::Name {
            kind: NameKind::Type,
            ..
        }
    ));
}

// ── Low-level primitives ─────────────────────────────────────────

#[test]
fn ref_deref_roundtrip() {
    check_ok("let main () : i64 = let v = 3 in *(&v)");
}

#[test]
fn deref_assignment_types_as_unit() {
    check_ok("let set (p : &i64) = *p <- 3");
}

#[test]
fn assignment_to_literal_rejected() {
    let err = check_err("let main () = 1 <- 2");
    assert!(matches!(err, CompileError::Pattern { .. }));
}

#[test]
fn sizeof_is_i64() {
    check_ok("let main () : i64 = sizeof((i64, bool))");
}

#[test]
fn loop_break_carries_value() {
    let comp = check_ok("let main () : i64 = loop (break 42)");
    let main = main_module_binding(&comp, "main");
    let mono = comp.table.apply(comp.el(main).poly.mono());
    match mono {
        Mono::Func(_, ret) => assert_eq!(*ret, Mono::I64),
        other => panic!("expected function type, got {}", other),
    }
}

#[test]
fn break_outside_loop_rejected() {
    let err = check_err("let main () = break 1");
    assert!(matches!(err, CompileError::Pattern { .. }));
}

#[test]
fn return_unifies_with_declared_type() {
    check_ok("let f (x : i64) : i64 = (if x > 0 then return x else (); 0)");
}

#[test]
fn string_literal_is_char_pointer() {
    check_ok("implicit_extern my_puts : &char -> c_int = \"puts\"\nlet main () = (my_puts(\"hi\"); ())");
}

#[test]
fn extern_type_is_fixed() {
    let err = check_err(
        "extern my_abs : c_int -> c_int = \"abs\"
         let main () = my_abs(true)",
    );
    assert!(matches!(err, CompileError::Unify { .. }));
}

#[test]
fn lambda_outside_toplevel_rejected() {
    let err = check_err("let main () = let f = fun x -> x in f(1)");
    assert!(matches!(err, CompileError::Pattern { .. }));
}

#[test]
fn opaque_types_do_not_leak() {
    let err = check_err(
        "extern acquire : unit -> opaque(&char) = \"acquire\"
         let main () : &char = acquire(())",
    );
    assert!(matches!(err, CompileError::Unify { .. }));
}

// ── Modules ──────────────────────────────────────────────────────

#[test]
fn open_brings_module_globals_into_scope() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("util.el2"),
        "let double (x : i64) : i64 = x * 2",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("app.el2"),
        "open Util\nlet main () : i64 = double(21)",
    )
    .unwrap();
    let comp = compile_file(&dir.path().join("app.el2")).unwrap();
    assert!(comp.modules.contains_key("Util"));
}

#[test]
fn qualified_reference_loads_module_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("util.el2"),
        "let double (x : i64) : i64 = x * 2",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("app.el2"),
        "let main () : i64 = Util.double(21)",
    )
    .unwrap();
    let comp = compile_file(&dir.path().join("app.el2")).unwrap();
    assert!(comp.modules.contains_key("Util"));
}

#[test]
fn module_cycle_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.el2"), "open B\nlet x = 1").unwrap();
    std::fs::write(dir.path().join("b.el2"), "open A\nlet y = 2").unwrap();
    let err = compile_file(&dir.path().join("a.el2")).unwrap_err();
    match err {
        CompileError::ModuleCycle { from, offending } => {
            assert_eq!(from, "A");
            assert_eq!(offending, "b.el2");
        }
        other => panic!("expected module cycle, got {}", other),
    }
}

#[test]
fn missing_module_file_is_io_error() {
    let err = check_err("open Nosuch\nlet main () = 1");
    assert!(matches!(err, CompileError::Io { .. }));
}

#[test]
fn bad_module_file_name_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("BadName.el2");
    std::fs::write(&path, "let x = 1").unwrap();
    let err = compile_file(&path).unwrap_err();
    assert!(matches!(err, CompileError::BadFileName(_)));
}

#[test]
fn module_types_resolve_qualified() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("shapes.el2"),
        "type point := { x : i64, y : i64 }
         let origin () : point = point { x = 0, y = 0 }",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("app.el2"),
        "open Shapes
         let main () : i64 = origin().x",
    )
    .unwrap();
    compile_file(&dir.path().join("app.el2")).unwrap();
}

// ── Unification properties ───────────────────────────────────────

#[test]
fn unify_success_makes_sides_structurally_equal() {
    let mut comp = check_ok("let f () = 1");
    let a = comp.table.fresh();
    let b = Mono::Tuple(vec![Mono::I64, comp.table.fresh()]);
    let m = comp.unify(&a, &b).unwrap();
    assert_eq!(comp.table.apply(&a), comp.table.apply(&b));
    assert_eq!(comp.table.apply(&a), comp.table.apply(&m));
}

#[test]
fn nested_unify_failure_reports_innermost_pair() {
    let mut comp = check_ok("type list(a) := { head : a }");
    let a = Mono::User {
        repr: "list".into(),
        args: vec![Mono::pointer(Mono::Char)],
    };
    let b = Mono::User {
        repr: "list".into(),
        args: vec![Mono::I64],
    };
    let err = comp.unify(&a, &b).unwrap_err();
    assert_eq!(err.innermost(), &(Mono::pointer(Mono::Char), Mono::I64));
}
