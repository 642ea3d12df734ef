use la_arena::{Arena, Idx};
use smol_str::SmolStr;
pub use el2_lexer::Span;

// ── ID types ──────────────────────────────────────────────────────

pub type ExprId = Idx<Expr>;
pub type TypeExprId = Idx<TypeExpr>;
pub type PatternId = Idx<Pattern>;

// ── Module ────────────────────────────────────────────────────────

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub items: Vec<(Item, Span)>,
    pub exprs: Arena<Expr>,
    pub type_exprs: Arena<TypeExpr>,
    pub patterns: Arena<Pattern>,
}

impl SourceFile {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            exprs: Arena::new(),
            type_exprs: Arena::new(),
            patterns: Arena::new(),
        }
    }
}

impl Default for SourceFile {
    fn default() -> Self {
        Self::new()
    }
}

// ── Top-level items ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Item {
    /// `open Mod.Sub`
    Open(Open),
    /// `open "path/file.el2"`
    OpenFile(OpenFile),
    /// `type name(a, b) := ...`
    LetType(LetType),
    /// `let name(params) : ret = expr`
    LetFn(LetFn),
    /// `let pattern = expr`
    Let(Let),
    /// `extern name : type = "c_name"`
    Extern(ExternDecl),
    /// `implicit_extern name : type = "c_name"`
    ImplicitExtern(ExternDecl),
}

#[derive(Debug, Clone)]
pub struct Open {
    pub path: Vec<SmolStr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct OpenFile {
    pub path: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LetType {
    pub name: SmolStr,
    pub name_span: Span,
    pub ty_vars: Vec<SmolStr>,
    pub decl: TypeDecl,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeDecl {
    Alias(TypeExprId),
    Enum(Vec<VariantDef>),
    Struct(Vec<FieldDef>),
}

#[derive(Debug, Clone)]
pub struct VariantDef {
    pub name: SmolStr,
    pub name_span: Span,
    pub payload: Option<TypeExprId>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: SmolStr,
    pub name_span: Span,
    pub ty: TypeExprId,
}

#[derive(Debug, Clone)]
pub struct LetFn {
    pub name: SmolStr,
    pub name_span: Span,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExprId>,
    pub body: ExprId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: SmolStr,
    pub name_span: Span,
    pub type_ann: Option<TypeExprId>,
}

#[derive(Debug, Clone)]
pub struct Let {
    pub pattern: PatternId,
    pub value: ExprId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ExternDecl {
    pub name: SmolStr,
    pub name_span: Span,
    pub ty: TypeExprId,
    pub external: SmolStr,
    pub span: Span,
}

// ── Expressions ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Unit,
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    /// String literal; types as `&char`.
    Str(String),
    /// `A.B.name` — module path (possibly empty) plus a lowercase name.
    Var { path: Vec<SmolStr>, name: SmolStr },
    /// `A.B.Some(e)` / `None` — enum constructor.
    Variant {
        path: Vec<SmolStr>,
        name: SmolStr,
        payload: Option<ExprId>,
    },
    /// `point { x = 1, y }` — a `None` field value is shorthand for a
    /// variable of the same name.
    StructLit {
        path: Vec<SmolStr>,
        name: SmolStr,
        fields: Vec<(SmolStr, Option<ExprId>)>,
    },
    Tuple(Vec<ExprId>),
    Call { func: ExprId, args: Vec<ExprId> },
    /// `fun x y -> e`; only legal as the right-hand side of a toplevel `let`.
    Lambda { params: Vec<Param>, body: ExprId },
    Let {
        pattern: PatternId,
        value: ExprId,
        body: ExprId,
    },
    /// `e1; e2`
    Seq(ExprId, ExprId),
    If {
        cond: ExprId,
        then_branch: ExprId,
        else_branch: Option<ExprId>,
    },
    Match {
        scrutinee: ExprId,
        arms: Vec<MatchArm>,
    },
    /// `lvalue <- e`
    Assign { target: ExprId, value: ExprId },
    FieldAccess { base: ExprId, field: SmolStr },
    TupleAccess { base: ExprId, index: u32 },
    /// `&e`
    Ref(ExprId),
    /// `*e`
    Deref(ExprId),
    SizeOf(TypeExprId),
    Loop(ExprId),
    Break(Option<ExprId>),
    Return(Option<ExprId>),
    Assert(ExprId),
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary { op: UnOp, expr: ExprId },
    /// `(e : type)`
    Ascribe { expr: ExprId, ty: TypeExprId },
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: PatternId,
    pub body: ExprId,
}

// ── Patterns ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    Var(SmolStr),
    Unit,
    /// Literal pattern; refutable, so `match`-only.
    Lit(LitPattern),
    Tuple(Vec<PatternId>),
    /// `&p`
    Ref(PatternId),
    Struct {
        path: Vec<SmolStr>,
        name: SmolStr,
        /// A `None` sub-pattern binds the field name itself.
        fields: Vec<(SmolStr, Option<PatternId>)>,
    },
    Variant {
        path: Vec<SmolStr>,
        name: SmolStr,
        payload: Option<PatternId>,
    },
    /// `(p : type)`
    Ascribe { pattern: PatternId, ty: TypeExprId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitPattern {
    Int(i64),
    Bool(bool),
    Char(char),
}

// ── Type expressions ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    Unit,
    /// `A.B.name(args)`; resolution decides between primitives, type
    /// variables and user types.
    Named {
        path: Vec<SmolStr>,
        name: SmolStr,
        args: Vec<TypeExprId>,
    },
    /// `&T`
    Pointer(TypeExprId),
    Tuple(Vec<TypeExprId>),
    /// `T1 -> T2`
    Func(TypeExprId, TypeExprId),
    /// `opaque(T)`
    Opaque(TypeExprId),
}
