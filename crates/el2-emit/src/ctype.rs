use el2_typeck::{Mono, UserInfo};
use smol_str::SmolStr;

use crate::CEmitter;

/// Deterministic identifier fragment for a ground monotype, used in
/// specialization and type names (`id_inst_I64`, `option_I64_tag`).
pub fn mangle(mono: &Mono) -> String {
    match mono {
        Mono::Unit => "Unit".to_string(),
        Mono::I64 => "I64".to_string(),
        Mono::CInt => "C_int".to_string(),
        Mono::F64 => "F64".to_string(),
        Mono::Bool => "Bool".to_string(),
        Mono::Char => "Char".to_string(),
        Mono::Pointer(inner) => format!("Ptr_{}", mangle(inner)),
        Mono::Tuple(elems) => {
            let parts: Vec<String> = elems.iter().map(mangle).collect();
            format!("Tup{}_{}", elems.len(), parts.join("_"))
        }
        Mono::Func(param, ret) => format!("Fn_{}_{}", mangle(param), mangle(ret)),
        Mono::User { repr, args } => {
            let mut out = repr.to_string();
            for a in args {
                out.push('_');
                out.push_str(&mangle(a));
            }
            out
        }
        Mono::Opaque(inner) => format!("Opaque_{}", mangle(inner)),
        // Ground types only reach the emitter; these are defensive.
        Mono::Var(name, _) => name.to_string(),
        Mono::Indir(id) => format!("u{}", id),
    }
}

pub fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

pub fn escape_c_char(c: char) -> String {
    match c {
        '\'' => "\\'".to_string(),
        '\\' => "\\\\".to_string(),
        '\n' => "\\n".to_string(),
        '\t' => "\\t".to_string(),
        '\r' => "\\r".to_string(),
        '\0' => "\\0".to_string(),
        c => c.to_string(),
    }
}

impl CEmitter<'_> {
    /// The C type naming a ground monotype, emitting any needed struct,
    /// enum or typedef definitions on first use. `Unit` lowers to `void`;
    /// value positions of unit type are erased by the caller.
    pub(crate) fn c_type(&mut self, mono: &Mono) -> String {
        match mono {
            Mono::Unit => "void".to_string(),
            Mono::I64 => "int64_t".to_string(),
            Mono::CInt => "int".to_string(),
            Mono::F64 => "double".to_string(),
            Mono::Bool => "bool".to_string(),
            Mono::Char => "char".to_string(),
            Mono::Pointer(inner) => match inner.as_ref() {
                Mono::Unit => "void *".to_string(),
                other => format!("{} *", self.c_type(&other.clone())),
            },
            Mono::Tuple(elems) => {
                let name = self.ensure_tuple(elems);
                format!("struct {}", name)
            }
            Mono::Func(param, ret) => self.ensure_fn_ptr(param, ret),
            Mono::User { repr, args } => {
                // Aliases expand instead of emitting a definition.
                if let Some(expanded) = self.comp.user_monify(repr, args) {
                    let resolved = self.resolve(&expanded);
                    return self.c_type(&resolved);
                }
                let name = self.ensure_user(repr, args);
                format!("struct {}", name)
            }
            Mono::Opaque(inner) => self.c_type(inner),
            Mono::Var(..) | Mono::Indir(_) => {
                unreachable!("unresolved type variable reached the emitter")
            }
        }
    }

    /// Emit (once) the struct/enum pair for a user type instantiation
    /// and return its C name.
    pub(crate) fn ensure_user(&mut self, repr: &SmolStr, args: &[Mono]) -> String {
        let name = mangle(&Mono::User {
            repr: repr.clone(),
            args: args.to_vec(),
        });
        if self.emitted_types.contains(&name) {
            return name;
        }
        self.emitted_types.insert(name.clone());
        self.type_fwd.push_str(&format!("struct {};\n", name));

        let def = self.comp.users[repr].clone();
        let map = def.subst(args);
        match def.info.expect("user info set during elaboration") {
            UserInfo::Alias(_) => unreachable!("aliases expand before emission"),
            UserInfo::Struct(fields) => {
                let mut body = String::new();
                for (fname, fty) in &fields {
                    let resolved = self.resolve(&fty.subst_named(&map));
                    if resolved == Mono::Unit {
                        continue;
                    }
                    body.push_str(&format!("  {} {};\n", self.c_type(&resolved), fname));
                }
                if body.is_empty() {
                    body.push_str("  char _empty;\n");
                }
                self.type_defs
                    .push_str(&format!("struct {} {{\n{}}};\n", name, body));
            }
            UserInfo::Enum(variants) => {
                let mut tags = String::new();
                let mut union_body = String::new();
                for (vname, payload) in &variants {
                    tags.push_str(&format!("  {}_{}_TAG,\n", name, vname));
                    if let Some(pty) = payload {
                        let resolved = self.resolve(&pty.subst_named(&map));
                        if resolved != Mono::Unit {
                            union_body.push_str(&format!(
                                "    {} {};\n",
                                self.c_type(&resolved),
                                vname
                            ));
                        }
                    }
                }
                self.type_defs
                    .push_str(&format!("enum {}_tag {{\n{}}};\n", name, tags));
                if union_body.is_empty() {
                    self.type_defs.push_str(&format!(
                        "struct {} {{\n  enum {}_tag tag;\n}};\n",
                        name, name
                    ));
                } else {
                    self.type_defs.push_str(&format!(
                        "struct {} {{\n  enum {}_tag tag;\n  union {{\n{}  }} data;\n}};\n",
                        name, name, union_body
                    ));
                }
            }
        }
        name
    }

    /// Emit (once) the struct for a tuple type and return its C name.
    /// Members keep their original indices; unit elements are erased.
    pub(crate) fn ensure_tuple(&mut self, elems: &[Mono]) -> String {
        let name = mangle(&Mono::Tuple(elems.to_vec()));
        if self.emitted_types.contains(&name) {
            return name;
        }
        self.emitted_types.insert(name.clone());
        self.type_fwd.push_str(&format!("struct {};\n", name));

        let mut body = String::new();
        for (i, elem) in elems.iter().enumerate() {
            if *elem == Mono::Unit {
                continue;
            }
            body.push_str(&format!("  {} _{};\n", self.c_type(&elem.clone()), i));
        }
        if body.is_empty() {
            body.push_str("  char _empty;\n");
        }
        self.type_defs
            .push_str(&format!("struct {} {{\n{}}};\n", name, body));
        name
    }

    /// Emit (once) a function-pointer typedef and return its name. The
    /// parameter shape matches emitted functions: a tuple parameter is
    /// flattened into separate C parameters and unit parameters vanish.
    pub(crate) fn ensure_fn_ptr(&mut self, param: &Mono, ret: &Mono) -> String {
        let name = mangle(&Mono::func(param.clone(), ret.clone()));
        if self.emitted_types.contains(&name) {
            return name;
        }
        self.emitted_types.insert(name.clone());

        let params = self.c_params_of(param);
        let param_list = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        let ret_ty = self.c_type(ret);
        self.type_defs.push_str(&format!(
            "typedef {} (*{})({});\n",
            ret_ty, name, param_list
        ));
        name
    }

    /// The C parameter type list for a function parameter monotype.
    pub(crate) fn c_params_of(&mut self, param: &Mono) -> Vec<String> {
        match param {
            Mono::Unit => Vec::new(),
            Mono::Tuple(elems) => elems
                .iter()
                .filter(|e| **e != Mono::Unit)
                .map(|e| self.c_type(&e.clone()))
                .collect(),
            other => vec![self.c_type(&other.clone())],
        }
    }
}
