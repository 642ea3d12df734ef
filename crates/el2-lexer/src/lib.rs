use logos::Logos;
use smol_str::SmolStr;

/// Source span as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

fn parse_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => result.push('\n'),
                't' => result.push('\t'),
                'r' => result.push('\r'),
                '\\' => result.push('\\'),
                '"' => result.push('"'),
                '0' => result.push('\0'),
                other => {
                    result.push('\\');
                    result.push(other);
                }
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

fn parse_char(lex: &mut logos::Lexer<Token>) -> Option<char> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut chars = inner.chars();
    let c = chars.next()?;
    let value = if c == '\\' {
        match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '\\' => '\\',
            '\'' => '\'',
            '0' => '\0',
            _ => return None,
        }
    } else {
        c
    };
    chars.next().is_none().then_some(value)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":=")]
    ColonEq,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("|")]
    Pipe,
    #[token("->")]
    Arrow,
    #[token("<-")]
    LArrow,

    // Operators. `=` doubles as the binder in `let` and equality in
    // expressions; `&` doubles as address-of and pointer-type syntax;
    // `*` doubles as multiplication and dereference.
    #[token("=")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token("<")]
    Less,
    #[token(">=")]
    GreaterEq,
    #[token(">")]
    Greater,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,

    // Keywords
    #[token("let")]
    Let,
    #[token("fun")]
    Fun,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("then")]
    Then,
    #[token("else")]
    Else,
    #[token("match")]
    Match,
    #[token("with")]
    With,
    #[token("type")]
    Type,
    #[token("extern")]
    Extern,
    #[token("implicit_extern")]
    ImplicitExtern,
    #[token("open")]
    Open,
    #[token("loop")]
    Loop,
    #[token("break")]
    Break,
    #[token("return")]
    Return,
    #[token("assert")]
    Assert,
    #[token("sizeof")]
    Sizeof,
    #[token("opaque")]
    Opaque,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", priority = 3, callback = |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", priority = 2, callback = |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, callback = parse_string)]
    String(String),

    #[regex(r"'([^'\\]|\\.)'", callback = parse_char)]
    Char(char),

    /// Lowercase identifier: values, types, fields.
    #[regex(r"[a-z_][a-zA-Z0-9_]*", callback = |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),

    /// Uppercase identifier: modules and enum variants.
    #[regex(r"[A-Z][a-zA-Z0-9_]*", callback = |lex| SmolStr::new(lex.slice()))]
    UpperIdent(SmolStr),
}

/// Lex a source string into `(token, span)` pairs plus the spans of any
/// unrecognized characters.
pub fn lex(source: &str) -> (Vec<(Token, Span)>, Vec<Span>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start as u32, range.end as u32);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(span),
        }
    }
    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let (tokens, errors) = lex(source);
        assert!(errors.is_empty(), "lex errors at {:?}", errors);
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("let id = fun x -> x"),
            vec![
                Token::Let,
                Token::Ident("id".into()),
                Token::Eq,
                Token::Fun,
                Token::Ident("x".into()),
                Token::Arrow,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn type_declaration_tokens() {
        assert_eq!(
            kinds("type option(a) := | Some(a) | None"),
            vec![
                Token::Type,
                Token::Ident("option".into()),
                Token::LParen,
                Token::Ident("a".into()),
                Token::RParen,
                Token::ColonEq,
                Token::Pipe,
                Token::UpperIdent("Some".into()),
                Token::LParen,
                Token::Ident("a".into()),
                Token::RParen,
                Token::Pipe,
                Token::UpperIdent("None".into()),
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            kinds("42 3.25"),
            vec![Token::Int(42), Token::Float(3.25)]
        );
    }

    #[test]
    fn negative_number_is_minus_then_int() {
        // Prefix minus is an operator, not part of the literal.
        assert_eq!(kinds("-7"), vec![Token::Minus, Token::Int(7)]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![Token::String("a\nb".to_string())]
        );
    }

    #[test]
    fn char_escapes() {
        assert_eq!(kinds(r"'\n' 'x'"), vec![Token::Char('\n'), Token::Char('x')]);
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("<- := != <= && ||"),
            vec![
                Token::LArrow,
                Token::ColonEq,
                Token::NotEq,
                Token::LessEq,
                Token::AndAnd,
                Token::OrOr,
            ]
        );
    }

    #[test]
    fn line_comments_skipped() {
        assert_eq!(
            kinds("1 // comment\n2"),
            vec![Token::Int(1), Token::Int(2)]
        );
    }

    #[test]
    fn unknown_character_reported() {
        let (_, errors) = lex("let @ = 1");
        assert_eq!(errors.len(), 1);
    }
}
