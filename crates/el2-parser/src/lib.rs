use el2_ast::*;
use el2_lexer::{lex, Span, Token};
use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.span.start, self.span.end, self.message)
    }
}

pub fn parse(source: &str) -> (SourceFile, Vec<ParseError>) {
    let (tokens, lex_errors) = lex(source);
    let mut parser = Parser::new(tokens);
    let mut errors: Vec<ParseError> = lex_errors
        .into_iter()
        .map(|span| ParseError {
            message: "unexpected character".into(),
            span,
        })
        .collect();
    parser.parse_file();
    errors.append(&mut parser.errors);
    (parser.file, errors)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    file: SourceFile,
    errors: Vec<ParseError>,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>) -> Self {
        Self {
            tokens,
            pos: 0,
            file: SourceFile::new(),
            errors: Vec::new(),
        }
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|(_, s)| Span::new(s.end, s.end))
                    .unwrap_or(Span::new(0, 0))
            })
    }

    fn advance(&mut self) -> (Token, Span) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Option<Span> {
        if self.check(expected) {
            let (_, span) = self.advance();
            Some(span)
        } else {
            let span = self.peek_span();
            self.error(
                format!("expected {:?}, found {:?}", expected, self.peek()),
                span,
            );
            None
        }
    }

    fn expect_ident(&mut self) -> Option<(SmolStr, Span)> {
        if let Some(Token::Ident(_)) = self.peek() {
            let (tok, span) = self.advance();
            if let Token::Ident(s) = tok {
                return Some((s, span));
            }
        }
        let span = self.peek_span();
        self.error(format!("expected identifier, found {:?}", self.peek()), span);
        None
    }

    fn error(&mut self, message: String, span: Span) {
        self.errors.push(ParseError { message, span });
    }

    fn alloc_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.file.exprs.alloc(Expr { kind, span })
    }

    fn alloc_pattern(&mut self, kind: PatternKind, span: Span) -> PatternId {
        self.file.patterns.alloc(Pattern { kind, span })
    }

    fn alloc_type(&mut self, kind: TypeExprKind, span: Span) -> TypeExprId {
        self.file.type_exprs.alloc(TypeExpr { kind, span })
    }

    // ── Top level ─────────────────────────────────────────────────

    fn parse_file(&mut self) {
        while !self.at_end() {
            let before = self.pos;
            if let Some((item, span)) = self.parse_item() {
                self.file.items.push((item, span));
            } else {
                self.sync_to_item(before);
            }
        }
    }

    /// Skip forward to the next token that can begin a toplevel item.
    fn sync_to_item(&mut self, before: usize) {
        if self.pos == before && !self.at_end() {
            self.advance();
        }
        while !self.at_end() {
            match self.peek() {
                Some(Token::Let)
                | Some(Token::Type)
                | Some(Token::Open)
                | Some(Token::Extern)
                | Some(Token::ImplicitExtern) => break,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_item(&mut self) -> Option<(Item, Span)> {
        match self.peek() {
            Some(Token::Open) => self.parse_open(),
            Some(Token::Type) => self.parse_type_decl(),
            Some(Token::Let) => self.parse_let(),
            Some(Token::Extern) => self.parse_extern(false),
            Some(Token::ImplicitExtern) => self.parse_extern(true),
            _ => {
                let span = self.peek_span();
                self.error(
                    format!("expected toplevel item, found {:?}", self.peek()),
                    span,
                );
                None
            }
        }
    }

    fn parse_open(&mut self) -> Option<(Item, Span)> {
        let start = self.expect(&Token::Open)?;
        match self.peek() {
            Some(Token::String(_)) => {
                let (tok, end) = self.advance();
                let path = match tok {
                    Token::String(s) => s,
                    _ => unreachable!(),
                };
                let span = start.merge(end);
                Some((Item::OpenFile(OpenFile { path, span }), span))
            }
            Some(Token::UpperIdent(_)) => {
                let mut path = Vec::new();
                let mut end = start;
                loop {
                    let (tok, span) = self.advance();
                    end = span;
                    match tok {
                        Token::UpperIdent(s) => path.push(s),
                        _ => {
                            self.error("expected module name".into(), span);
                            return None;
                        }
                    }
                    if !self.eat(&Token::Dot) {
                        break;
                    }
                }
                let span = start.merge(end);
                Some((Item::Open(Open { path, span }), span))
            }
            _ => {
                let span = self.peek_span();
                self.error("expected module name or file path after `open`".into(), span);
                None
            }
        }
    }

    fn parse_type_decl(&mut self) -> Option<(Item, Span)> {
        let start = self.expect(&Token::Type)?;
        let (name, name_span) = self.expect_ident()?;
        let mut ty_vars = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                let (v, _) = self.expect_ident()?;
                ty_vars.push(v);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        self.expect(&Token::ColonEq)?;

        let decl = match self.peek() {
            Some(Token::Pipe) => {
                let mut variants = Vec::new();
                while self.eat(&Token::Pipe) {
                    let (tok, vspan) = self.advance();
                    let vname = match tok {
                        Token::UpperIdent(s) => s,
                        _ => {
                            self.error("expected variant name".into(), vspan);
                            return None;
                        }
                    };
                    let payload = if self.eat(&Token::LParen) {
                        let ty = self.parse_type_expr()?;
                        self.expect(&Token::RParen)?;
                        Some(ty)
                    } else {
                        None
                    };
                    variants.push(VariantDef {
                        name: vname,
                        name_span: vspan,
                        payload,
                    });
                }
                TypeDecl::Enum(variants)
            }
            Some(Token::LBrace) => {
                self.advance();
                let mut fields = Vec::new();
                while !self.check(&Token::RBrace) {
                    let (fname, fspan) = self.expect_ident()?;
                    self.expect(&Token::Colon)?;
                    let ty = self.parse_type_expr()?;
                    fields.push(FieldDef {
                        name: fname,
                        name_span: fspan,
                        ty,
                    });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                TypeDecl::Struct(fields)
            }
            _ => TypeDecl::Alias(self.parse_type_expr()?),
        };

        let span = start.merge(self.prev_span());
        Some((
            Item::LetType(LetType {
                name,
                name_span,
                ty_vars,
                decl,
                span,
            }),
            span,
        ))
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|(_, s)| *s)
            .unwrap_or(Span::new(0, 0))
    }

    fn parse_let(&mut self) -> Option<(Item, Span)> {
        let start = self.expect(&Token::Let)?;

        // `let name(...)` is a function binding; anything else is a
        // pattern binding.
        if matches!(self.peek(), Some(Token::Ident(_)))
            && matches!(self.peek_nth(1), Some(Token::LParen))
        {
            let (name, name_span) = self.expect_ident()?;
            self.expect(&Token::LParen)?;
            let params = self.parse_params()?;
            self.expect(&Token::RParen)?;
            let return_type = if self.eat(&Token::Colon) {
                Some(self.parse_type_expr()?)
            } else {
                None
            };
            self.expect(&Token::Eq)?;
            let body = self.parse_expr()?;
            let span = start.merge(self.file.exprs[body].span);
            return Some((
                Item::LetFn(LetFn {
                    name,
                    name_span,
                    params,
                    return_type,
                    body,
                    span,
                }),
                span,
            ));
        }

        let pattern = self.parse_pattern()?;
        self.expect(&Token::Eq)?;
        let value = self.parse_expr()?;
        let span = start.merge(self.file.exprs[value].span);
        Some((Item::Let(Let { pattern, value, span }), span))
    }

    fn parse_params(&mut self) -> Option<Vec<Param>> {
        let mut params = Vec::new();
        if self.check(&Token::RParen) {
            return Some(params);
        }
        loop {
            let (name, name_span) = self.expect_ident()?;
            let type_ann = if self.eat(&Token::Colon) {
                Some(self.parse_type_expr()?)
            } else {
                None
            };
            params.push(Param {
                name,
                name_span,
                type_ann,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Some(params)
    }

    fn parse_extern(&mut self, implicit: bool) -> Option<(Item, Span)> {
        let start = self.advance().1;
        let (name, name_span) = self.expect_ident()?;
        self.expect(&Token::Colon)?;
        let ty = self.parse_type_expr()?;
        self.expect(&Token::Eq)?;
        let (tok, end) = self.advance();
        let external = match tok {
            Token::String(s) => SmolStr::new(s),
            _ => {
                self.error("expected external name string".into(), end);
                return None;
            }
        };
        let span = start.merge(end);
        let decl = ExternDecl {
            name,
            name_span,
            ty,
            external,
            span,
        };
        let item = if implicit {
            Item::ImplicitExtern(decl)
        } else {
            Item::Extern(decl)
        };
        Some((item, span))
    }

    // ── Expressions ───────────────────────────────────────────────

    fn parse_expr(&mut self) -> Option<ExprId> {
        self.parse_expr_bp(0)
    }

    /// Pratt loop: parse a prefix operand, then fold infix operators of
    /// binding power at least `min_bp`.
    fn parse_expr_bp(&mut self, min_bp: u8) -> Option<ExprId> {
        let mut lhs = self.parse_operand()?;

        loop {
            let (op_bp, right_bp) = match self.peek() {
                Some(Token::Semi) => (1, 1),
                Some(Token::LArrow) => (2, 3),
                Some(Token::OrOr) => (4, 5),
                Some(Token::AndAnd) => (6, 7),
                Some(Token::Eq) | Some(Token::NotEq) => (8, 9),
                Some(Token::Less)
                | Some(Token::LessEq)
                | Some(Token::Greater)
                | Some(Token::GreaterEq) => (10, 11),
                Some(Token::Plus) | Some(Token::Minus) => (12, 13),
                Some(Token::Star) | Some(Token::Slash) | Some(Token::Percent) => (14, 15),
                _ => break,
            };
            if op_bp < min_bp {
                break;
            }
            let (op_tok, _) = self.advance();
            let rhs = self.parse_expr_bp(right_bp)?;
            let span = self.file.exprs[lhs].span.merge(self.file.exprs[rhs].span);
            let kind = match op_tok {
                Token::Semi => ExprKind::Seq(lhs, rhs),
                Token::LArrow => ExprKind::Assign {
                    target: lhs,
                    value: rhs,
                },
                other => ExprKind::Binary {
                    op: match other {
                        Token::OrOr => BinOp::Or,
                        Token::AndAnd => BinOp::And,
                        Token::Eq => BinOp::Eq,
                        Token::NotEq => BinOp::Ne,
                        Token::Less => BinOp::Lt,
                        Token::LessEq => BinOp::Le,
                        Token::Greater => BinOp::Gt,
                        Token::GreaterEq => BinOp::Ge,
                        Token::Plus => BinOp::Add,
                        Token::Minus => BinOp::Sub,
                        Token::Star => BinOp::Mul,
                        Token::Slash => BinOp::Div,
                        Token::Percent => BinOp::Rem,
                        _ => unreachable!(),
                    },
                    lhs,
                    rhs,
                },
            };
            lhs = self.alloc_expr(kind, span);
        }

        Some(lhs)
    }

    /// A prefix operand with its postfix operators (calls and accesses).
    fn parse_operand(&mut self) -> Option<ExprId> {
        let mut expr = self.parse_prefix()?;

        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr_bp(4)?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.expect(&Token::RParen)?;
                    let span = self.file.exprs[expr].span.merge(end);
                    expr = self.alloc_expr(ExprKind::Call { func: expr, args }, span);
                }
                Some(Token::Dot) => {
                    self.advance();
                    let (tok, tspan) = self.advance();
                    let span = self.file.exprs[expr].span.merge(tspan);
                    match tok {
                        Token::Ident(field) => {
                            expr = self.alloc_expr(
                                ExprKind::FieldAccess { base: expr, field },
                                span,
                            );
                        }
                        Token::Int(index) => {
                            expr = self.alloc_expr(
                                ExprKind::TupleAccess {
                                    base: expr,
                                    index: index as u32,
                                },
                                span,
                            );
                        }
                        _ => {
                            self.error("expected field name or tuple index after `.`".into(), tspan);
                            return None;
                        }
                    }
                }
                _ => break,
            }
        }

        Some(expr)
    }

    fn parse_prefix(&mut self) -> Option<ExprId> {
        let span = self.peek_span();
        if self.at_end() {
            self.error("unexpected end of input".into(), span);
            return None;
        }
        match self.peek()? {
            Token::Let => self.parse_let_in(),
            Token::If => self.parse_if(),
            Token::Match => self.parse_match(),
            Token::Fun => self.parse_lambda(),
            Token::Loop => {
                self.advance();
                let body = self.parse_expr_bp(2)?;
                let full = span.merge(self.file.exprs[body].span);
                Some(self.alloc_expr(ExprKind::Loop(body), full))
            }
            Token::Break => {
                self.advance();
                let value = if self.starts_expr() {
                    Some(self.parse_expr_bp(4)?)
                } else {
                    None
                };
                Some(self.alloc_expr(ExprKind::Break(value), span))
            }
            Token::Return => {
                self.advance();
                let value = if self.starts_expr() {
                    Some(self.parse_expr_bp(4)?)
                } else {
                    None
                };
                Some(self.alloc_expr(ExprKind::Return(value), span))
            }
            Token::Assert => {
                self.advance();
                self.expect(&Token::LParen)?;
                let inner = self.parse_expr()?;
                let end = self.expect(&Token::RParen)?;
                Some(self.alloc_expr(ExprKind::Assert(inner), span.merge(end)))
            }
            Token::Sizeof => {
                self.advance();
                self.expect(&Token::LParen)?;
                let ty = self.parse_type_expr()?;
                let end = self.expect(&Token::RParen)?;
                Some(self.alloc_expr(ExprKind::SizeOf(ty), span.merge(end)))
            }
            Token::Minus => {
                self.advance();
                let operand = self.parse_operand()?;
                let full = span.merge(self.file.exprs[operand].span);
                Some(self.alloc_expr(
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        expr: operand,
                    },
                    full,
                ))
            }
            Token::Bang => {
                self.advance();
                let operand = self.parse_operand()?;
                let full = span.merge(self.file.exprs[operand].span);
                Some(self.alloc_expr(
                    ExprKind::Unary {
                        op: UnOp::Not,
                        expr: operand,
                    },
                    full,
                ))
            }
            Token::Amp => {
                self.advance();
                let operand = self.parse_operand()?;
                let full = span.merge(self.file.exprs[operand].span);
                Some(self.alloc_expr(ExprKind::Ref(operand), full))
            }
            Token::Star => {
                self.advance();
                let operand = self.parse_operand()?;
                let full = span.merge(self.file.exprs[operand].span);
                Some(self.alloc_expr(ExprKind::Deref(operand), full))
            }
            _ => self.parse_primary(),
        }
    }

    /// Whether the current token can begin an expression (used for the
    /// optional operands of `break` and `return`).
    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Int(_)
                    | Token::Float(_)
                    | Token::String(_)
                    | Token::Char(_)
                    | Token::True
                    | Token::False
                    | Token::Ident(_)
                    | Token::UpperIdent(_)
                    | Token::LParen
                    | Token::Amp
                    | Token::Star
                    | Token::Minus
                    | Token::Bang
                    | Token::If
                    | Token::Match
                    | Token::Let
                    | Token::Loop
                    | Token::Sizeof
            )
        )
    }

    fn parse_let_in(&mut self) -> Option<ExprId> {
        let start = self.expect(&Token::Let)?;
        let pattern = self.parse_pattern()?;
        self.expect(&Token::Eq)?;
        // The bound value must not swallow `in`-terminated sequences.
        let value = self.parse_expr_bp(2)?;
        self.expect(&Token::In)?;
        let body = self.parse_expr()?;
        let span = start.merge(self.file.exprs[body].span);
        Some(self.alloc_expr(
            ExprKind::Let {
                pattern,
                value,
                body,
            },
            span,
        ))
    }

    fn parse_if(&mut self) -> Option<ExprId> {
        let start = self.expect(&Token::If)?;
        let cond = self.parse_expr_bp(4)?;
        self.expect(&Token::Then)?;
        let then_branch = self.parse_expr_bp(2)?;
        let else_branch = if self.eat(&Token::Else) {
            Some(self.parse_expr_bp(2)?)
        } else {
            None
        };
        let end = else_branch.unwrap_or(then_branch);
        let span = start.merge(self.file.exprs[end].span);
        Some(self.alloc_expr(
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            },
            span,
        ))
    }

    fn parse_match(&mut self) -> Option<ExprId> {
        let start = self.expect(&Token::Match)?;
        let scrutinee = self.parse_expr_bp(4)?;
        self.expect(&Token::With)?;
        let mut arms = Vec::new();
        while self.eat(&Token::Pipe) {
            let pattern = self.parse_pattern()?;
            self.expect(&Token::Arrow)?;
            let body = self.parse_expr_bp(2)?;
            arms.push(MatchArm { pattern, body });
        }
        if arms.is_empty() {
            self.error("match expression has no arms".into(), start);
            return None;
        }
        let end = self.file.exprs[arms.last().unwrap().body].span;
        let span = start.merge(end);
        Some(self.alloc_expr(ExprKind::Match { scrutinee, arms }, span))
    }

    fn parse_lambda(&mut self) -> Option<ExprId> {
        let start = self.expect(&Token::Fun)?;
        let mut params = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Ident(_)) => {
                    let (name, name_span) = self.expect_ident()?;
                    params.push(Param {
                        name,
                        name_span,
                        type_ann: None,
                    });
                }
                Some(Token::LParen) => {
                    self.advance();
                    let (name, name_span) = self.expect_ident()?;
                    self.expect(&Token::Colon)?;
                    let ty = self.parse_type_expr()?;
                    self.expect(&Token::RParen)?;
                    params.push(Param {
                        name,
                        name_span,
                        type_ann: Some(ty),
                    });
                }
                _ => break,
            }
        }
        if params.is_empty() {
            self.error("expected at least one lambda parameter".into(), start);
            return None;
        }
        self.expect(&Token::Arrow)?;
        let body = self.parse_expr_bp(2)?;
        let span = start.merge(self.file.exprs[body].span);
        Some(self.alloc_expr(ExprKind::Lambda { params, body }, span))
    }

    fn parse_primary(&mut self) -> Option<ExprId> {
        let span = self.peek_span();
        match self.peek()? {
            Token::Int(_) => {
                let (tok, span) = self.advance();
                let value = match tok {
                    Token::Int(v) => v,
                    _ => unreachable!(),
                };
                Some(self.alloc_expr(ExprKind::Int(value), span))
            }
            Token::Float(_) => {
                let (tok, span) = self.advance();
                let value = match tok {
                    Token::Float(v) => v,
                    _ => unreachable!(),
                };
                Some(self.alloc_expr(ExprKind::Float(value), span))
            }
            Token::String(_) => {
                let (tok, span) = self.advance();
                let value = match tok {
                    Token::String(v) => v,
                    _ => unreachable!(),
                };
                Some(self.alloc_expr(ExprKind::Str(value), span))
            }
            Token::Char(_) => {
                let (tok, span) = self.advance();
                let value = match tok {
                    Token::Char(v) => v,
                    _ => unreachable!(),
                };
                Some(self.alloc_expr(ExprKind::Char(value), span))
            }
            Token::True => {
                self.advance();
                Some(self.alloc_expr(ExprKind::Bool(true), span))
            }
            Token::False => {
                self.advance();
                Some(self.alloc_expr(ExprKind::Bool(false), span))
            }
            Token::LParen => self.parse_paren(),
            Token::Ident(_) => self.parse_name(Vec::new(), span),
            Token::UpperIdent(_) => {
                let path = self.parse_module_path();
                match self.peek() {
                    // `A.B.name` / `A.B.point { .. }`
                    Some(Token::Ident(_)) => self.parse_name(path, span),
                    // trailing upper segment is a variant constructor
                    _ => {
                        let (name, init) = match path.split_last() {
                            Some((last, init)) => (last.clone(), init.to_vec()),
                            None => unreachable!(),
                        };
                        let payload = if self.eat(&Token::LParen) {
                            let inner = self.parse_expr()?;
                            self.expect(&Token::RParen)?;
                            Some(inner)
                        } else {
                            None
                        };
                        let full = span.merge(self.prev_span());
                        Some(self.alloc_expr(
                            ExprKind::Variant {
                                path: init,
                                name,
                                payload,
                            },
                            full,
                        ))
                    }
                }
            }
            _ => {
                self.error(format!("expected expression, found {:?}", self.peek()), span);
                None
            }
        }
    }

    /// Parse a dotted chain of uppercase module segments, stopping before
    /// a final lowercase name if one follows.
    fn parse_module_path(&mut self) -> Vec<SmolStr> {
        let mut path = Vec::new();
        while let Some(Token::UpperIdent(_)) = self.peek() {
            let (tok, _) = self.advance();
            if let Token::UpperIdent(s) = tok {
                path.push(s);
            }
            if !self.check(&Token::Dot) {
                break;
            }
            // Only consume the dot when another path segment or a final
            // name follows; `Some(x).0` must keep its dot for postfix.
            match self.peek_nth(1) {
                Some(Token::UpperIdent(_)) | Some(Token::Ident(_)) => {
                    self.advance();
                }
                _ => break,
            }
        }
        path
    }

    /// A lowercase name in expression position: a variable reference or,
    /// when followed by `{`, a struct literal.
    fn parse_name(&mut self, path: Vec<SmolStr>, start: Span) -> Option<ExprId> {
        let (name, name_span) = self.expect_ident()?;
        if self.check(&Token::LBrace) {
            self.advance();
            let mut fields = Vec::new();
            while !self.check(&Token::RBrace) {
                let (fname, _) = self.expect_ident()?;
                let value = if self.eat(&Token::Eq) {
                    Some(self.parse_expr_bp(4)?)
                } else {
                    None
                };
                fields.push((fname, value));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            let end = self.expect(&Token::RBrace)?;
            return Some(self.alloc_expr(
                ExprKind::StructLit { path, name, fields },
                start.merge(end),
            ));
        }
        Some(self.alloc_expr(
            ExprKind::Var { path, name },
            start.merge(name_span),
        ))
    }

    fn parse_paren(&mut self) -> Option<ExprId> {
        let start = self.expect(&Token::LParen)?;
        if self.check(&Token::RParen) {
            let end = self.advance().1;
            return Some(self.alloc_expr(ExprKind::Unit, start.merge(end)));
        }
        let first = self.parse_expr_bp(0)?;
        if self.eat(&Token::Colon) {
            let ty = self.parse_type_expr()?;
            let end = self.expect(&Token::RParen)?;
            return Some(self.alloc_expr(
                ExprKind::Ascribe { expr: first, ty },
                start.merge(end),
            ));
        }
        if self.check(&Token::Comma) {
            let mut elems = vec![first];
            while self.eat(&Token::Comma) {
                elems.push(self.parse_expr_bp(0)?);
            }
            let end = self.expect(&Token::RParen)?;
            return Some(self.alloc_expr(ExprKind::Tuple(elems), start.merge(end)));
        }
        self.expect(&Token::RParen)?;
        Some(first)
    }

    // ── Patterns ──────────────────────────────────────────────────

    fn parse_pattern(&mut self) -> Option<PatternId> {
        let span = self.peek_span();
        if self.at_end() {
            self.error("unexpected end of input".into(), span);
            return None;
        }
        match self.peek()? {
            Token::Ident(_) => {
                let (name, name_span) = self.expect_ident()?;
                if self.check(&Token::LBrace) {
                    return self.parse_struct_pattern(Vec::new(), name, span);
                }
                Some(self.alloc_pattern(PatternKind::Var(name), name_span))
            }
            Token::UpperIdent(_) => {
                let path = self.parse_module_path();
                if let Some(Token::Ident(_)) = self.peek() {
                    let (name, _) = self.expect_ident()?;
                    return self.parse_struct_pattern(path, name, span);
                }
                let (name, init) = match path.split_last() {
                    Some((last, init)) => (last.clone(), init.to_vec()),
                    None => unreachable!(),
                };
                let payload = if self.eat(&Token::LParen) {
                    let inner = self.parse_pattern()?;
                    self.expect(&Token::RParen)?;
                    Some(inner)
                } else {
                    None
                };
                let full = span.merge(self.prev_span());
                Some(self.alloc_pattern(
                    PatternKind::Variant {
                        path: init,
                        name,
                        payload,
                    },
                    full,
                ))
            }
            Token::Amp => {
                self.advance();
                let inner = self.parse_pattern()?;
                let full = span.merge(self.file.patterns[inner].span);
                Some(self.alloc_pattern(PatternKind::Ref(inner), full))
            }
            Token::Int(_) => {
                let (tok, span) = self.advance();
                let value = match tok {
                    Token::Int(v) => v,
                    _ => unreachable!(),
                };
                Some(self.alloc_pattern(PatternKind::Lit(LitPattern::Int(value)), span))
            }
            Token::Minus => {
                self.advance();
                let (tok, end) = self.advance();
                match tok {
                    Token::Int(v) => Some(self.alloc_pattern(
                        PatternKind::Lit(LitPattern::Int(-v)),
                        span.merge(end),
                    )),
                    _ => {
                        self.error("expected integer after `-` in pattern".into(), end);
                        None
                    }
                }
            }
            Token::Char(_) => {
                let (tok, span) = self.advance();
                let value = match tok {
                    Token::Char(v) => v,
                    _ => unreachable!(),
                };
                Some(self.alloc_pattern(PatternKind::Lit(LitPattern::Char(value)), span))
            }
            Token::True => {
                self.advance();
                Some(self.alloc_pattern(PatternKind::Lit(LitPattern::Bool(true)), span))
            }
            Token::False => {
                self.advance();
                Some(self.alloc_pattern(PatternKind::Lit(LitPattern::Bool(false)), span))
            }
            Token::LParen => {
                let start = self.advance().1;
                if self.check(&Token::RParen) {
                    let end = self.advance().1;
                    return Some(self.alloc_pattern(PatternKind::Unit, start.merge(end)));
                }
                let first = self.parse_pattern()?;
                if self.eat(&Token::Colon) {
                    let ty = self.parse_type_expr()?;
                    let end = self.expect(&Token::RParen)?;
                    return Some(self.alloc_pattern(
                        PatternKind::Ascribe { pattern: first, ty },
                        start.merge(end),
                    ));
                }
                if self.check(&Token::Comma) {
                    let mut elems = vec![first];
                    while self.eat(&Token::Comma) {
                        elems.push(self.parse_pattern()?);
                    }
                    let end = self.expect(&Token::RParen)?;
                    return Some(
                        self.alloc_pattern(PatternKind::Tuple(elems), start.merge(end)),
                    );
                }
                self.expect(&Token::RParen)?;
                Some(first)
            }
            _ => {
                self.error(format!("expected pattern, found {:?}", self.peek()), span);
                None
            }
        }
    }

    fn parse_struct_pattern(
        &mut self,
        path: Vec<SmolStr>,
        name: SmolStr,
        start: Span,
    ) -> Option<PatternId> {
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            let (fname, _) = self.expect_ident()?;
            let sub = if self.eat(&Token::Eq) {
                Some(self.parse_pattern()?)
            } else {
                None
            };
            fields.push((fname, sub));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let end = self.expect(&Token::RBrace)?;
        Some(self.alloc_pattern(
            PatternKind::Struct { path, name, fields },
            start.merge(end),
        ))
    }

    // ── Type expressions ──────────────────────────────────────────

    fn parse_type_expr(&mut self) -> Option<TypeExprId> {
        let lhs = self.parse_type_primary()?;
        if self.eat(&Token::Arrow) {
            let rhs = self.parse_type_expr()?;
            let span = self.file.type_exprs[lhs]
                .span
                .merge(self.file.type_exprs[rhs].span);
            return Some(self.alloc_type(TypeExprKind::Func(lhs, rhs), span));
        }
        Some(lhs)
    }

    fn parse_type_primary(&mut self) -> Option<TypeExprId> {
        let span = self.peek_span();
        match self.peek()? {
            Token::LParen => {
                let start = self.advance().1;
                if self.check(&Token::RParen) {
                    let end = self.advance().1;
                    return Some(self.alloc_type(TypeExprKind::Unit, start.merge(end)));
                }
                let first = self.parse_type_expr()?;
                if self.check(&Token::Comma) {
                    let mut elems = vec![first];
                    while self.eat(&Token::Comma) {
                        elems.push(self.parse_type_expr()?);
                    }
                    let end = self.expect(&Token::RParen)?;
                    return Some(
                        self.alloc_type(TypeExprKind::Tuple(elems), start.merge(end)),
                    );
                }
                self.expect(&Token::RParen)?;
                Some(first)
            }
            Token::Amp => {
                self.advance();
                let inner = self.parse_type_primary()?;
                let full = span.merge(self.file.type_exprs[inner].span);
                Some(self.alloc_type(TypeExprKind::Pointer(inner), full))
            }
            Token::Opaque => {
                self.advance();
                self.expect(&Token::LParen)?;
                let inner = self.parse_type_expr()?;
                let end = self.expect(&Token::RParen)?;
                Some(self.alloc_type(TypeExprKind::Opaque(inner), span.merge(end)))
            }
            Token::Ident(_) | Token::UpperIdent(_) => {
                let mut path = Vec::new();
                while let Some(Token::UpperIdent(_)) = self.peek() {
                    let (tok, _) = self.advance();
                    if let Token::UpperIdent(s) = tok {
                        path.push(s);
                    }
                    self.expect(&Token::Dot)?;
                }
                let (name, name_span) = self.expect_ident()?;
                let mut args = Vec::new();
                if self.eat(&Token::LParen) {
                    loop {
                        args.push(self.parse_type_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                }
                let full = span.merge(if args.is_empty() {
                    name_span
                } else {
                    self.prev_span()
                });
                Some(self.alloc_type(TypeExprKind::Named { path, name, args }, full))
            }
            _ => {
                self.error(format!("expected type, found {:?}", self.peek()), span);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> SourceFile {
        let (file, errors) = parse(source);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        file
    }

    fn first_item(source: &str) -> Item {
        let file = parse_ok(source);
        file.items[0].0.clone()
    }

    #[test]
    fn toplevel_function() {
        let item = first_item("let main () : i64 = 0");
        match item {
            Item::LetFn(f) => {
                assert_eq!(f.name, "main");
                assert!(f.params.is_empty());
                assert!(f.return_type.is_some());
            }
            other => panic!("expected LetFn, got {:?}", other),
        }
    }

    #[test]
    fn toplevel_value_with_lambda() {
        let item = first_item("let id = fun x -> x");
        match item {
            Item::Let(l) => {
                let file = parse_ok("let id = fun x -> x");
                assert!(matches!(
                    file.exprs[l.value].kind,
                    ExprKind::Lambda { .. }
                ));
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn enum_declaration() {
        let item = first_item("type option(a) := | Some(a) | None");
        match item {
            Item::LetType(t) => {
                assert_eq!(t.name, "option");
                assert_eq!(t.ty_vars, vec![SmolStr::new("a")]);
                match t.decl {
                    TypeDecl::Enum(vs) => {
                        assert_eq!(vs.len(), 2);
                        assert_eq!(vs[0].name, "Some");
                        assert!(vs[0].payload.is_some());
                        assert!(vs[1].payload.is_none());
                    }
                    other => panic!("expected enum, got {:?}", other),
                }
            }
            other => panic!("expected LetType, got {:?}", other),
        }
    }

    #[test]
    fn struct_declaration() {
        let item = first_item("type point := { x : i64, y : i64 }");
        match item {
            Item::LetType(t) => match t.decl {
                TypeDecl::Struct(fs) => {
                    assert_eq!(fs.len(), 2);
                    assert_eq!(fs[0].name, "x");
                }
                other => panic!("expected struct, got {:?}", other),
            },
            other => panic!("expected LetType, got {:?}", other),
        }
    }

    #[test]
    fn alias_declaration() {
        let item = first_item("type str := &char");
        match item {
            Item::LetType(t) => assert!(matches!(t.decl, TypeDecl::Alias(_))),
            other => panic!("expected LetType, got {:?}", other),
        }
    }

    #[test]
    fn match_with_arms() {
        let file = parse_ok(
            "let main () = match Some(1) with | Some(x) -> x | None -> 0",
        );
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!("expected LetFn")
        };
        let ExprKind::Match { arms, .. } = &file.exprs[f.body].kind else {
            panic!("expected match body")
        };
        assert_eq!(arms.len(), 2);
    }

    #[test]
    fn if_binds_tighter_than_seq() {
        let file = parse_ok("let f () = if true then 1 else 2; 3");
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!()
        };
        assert!(matches!(file.exprs[f.body].kind, ExprKind::Seq(_, _)));
    }

    #[test]
    fn arithmetic_precedence() {
        let file = parse_ok("let f () = 1 + 2 * 3");
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!()
        };
        let ExprKind::Binary { op, rhs, .. } = &file.exprs[f.body].kind else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            file.exprs[*rhs].kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn qualified_variable() {
        let file = parse_ok("let f () = Vec.push(1)");
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!()
        };
        let ExprKind::Call { func, .. } = &file.exprs[f.body].kind else {
            panic!("expected call")
        };
        let ExprKind::Var { path, name } = &file.exprs[*func].kind else {
            panic!("expected var")
        };
        assert_eq!(path.as_slice(), [SmolStr::new("Vec")]);
        assert_eq!(name, "push");
    }

    #[test]
    fn variant_then_tuple_access() {
        // The dot after a variant construction is postfix access, not a
        // module path separator.
        let file = parse_ok("let f () = (Some(1), 2).1");
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!()
        };
        assert!(matches!(
            file.exprs[f.body].kind,
            ExprKind::TupleAccess { index: 1, .. }
        ));
    }

    #[test]
    fn struct_literal_and_field_access() {
        let file = parse_ok("let f () = point { x = 1, y = 2 }.x");
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!()
        };
        assert!(matches!(
            file.exprs[f.body].kind,
            ExprKind::FieldAccess { .. }
        ));
    }

    #[test]
    fn deref_assignment() {
        let file = parse_ok("let f (p : &i64) = *p <- 3");
        let Item::LetFn(f) = &file.items[0].0 else {
            panic!()
        };
        assert!(matches!(file.exprs[f.body].kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn extern_item() {
        let item = first_item("extern my_puts : &char -> c_int = \"puts\"");
        match item {
            Item::Extern(e) => {
                assert_eq!(e.name, "my_puts");
                assert_eq!(e.external, "puts");
            }
            other => panic!("expected Extern, got {:?}", other),
        }
    }

    #[test]
    fn open_module_and_file() {
        let file = parse_ok("open Utils\nopen \"lib/extra.el2\"");
        assert!(matches!(file.items[0].0, Item::Open(_)));
        assert!(matches!(file.items[1].0, Item::OpenFile(_)));
    }

    #[test]
    fn pointer_function_type() {
        let item = first_item("extern f : (&char, i64) -> &char = \"f\"");
        let Item::Extern(e) = item else { panic!() };
        let file = parse_ok("extern f : (&char, i64) -> &char = \"f\"");
        assert!(matches!(
            file.type_exprs[e.ty].kind,
            TypeExprKind::Func(_, _)
        ));
    }

    #[test]
    fn refutable_patterns_parse() {
        parse_ok("let f (x : i64) = match x with | 0 -> 1 | n -> n");
    }

    #[test]
    fn loop_break() {
        parse_ok("let f () = loop (if true then break 1 else ())");
    }

    #[test]
    fn error_recovery_continues_to_next_item() {
        let (file, errors) = parse("type t := %\nlet good () = 1");
        assert!(!errors.is_empty());
        assert!(file
            .items
            .iter()
            .any(|(item, _)| matches!(item, Item::LetFn(f) if f.name == "good")));
    }

    #[test]
    fn truncated_let_reports_end_of_input() {
        let (_, errors) = parse("let bad = ");
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unexpected end of input")));
    }
}
