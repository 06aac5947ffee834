use super::ast::{
    BinaryOp, DeclarationKind, Declarator, Literal, LogicalOp, LoopKind, Node, Pattern,
    PatternProperty, Property, UnaryOp,
};
use crate::error::{QueryError, QueryResult};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    Number(f64),
    String(String),
    Punct(&'static str),
    Eof,
}

// Longest first so that multi-character operators win.
const PUNCTUATION: &[&str] = &[
    ">>>=", "===", "!==", "**=", ">>>", "<<=", ">>=", "=>", "==", "!=", "<=", ">=", "&&", "||",
    "??", "**", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "(", ")",
    "[", "]", "{", "}", ",", ";", ":", ".", "?", "+", "-", "*", "/", "%", "!", "~", "<", ">",
    "=", "&", "|", "^",
];

const ASSIGNMENT_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=",
];

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> &'a str
    where
        F: FnMut(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::parse(message, self.input)
    }

    fn skip_trivia(&mut self) -> QueryResult<()> {
        loop {
            self.consume_while(char::is_whitespace);
            let rest = self.rest();
            if rest.starts_with("//") {
                self.consume_while(|c| c != '\n');
            } else if rest.starts_with("/*") {
                match rest[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => return Err(self.error("unterminated comment")),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn tokenize(mut self) -> QueryResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> QueryResult<Token> {
        self.skip_trivia()?;
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            '"' | '\'' => self.string(ch),
            '`' => Err(self.error("template literals are not supported")),
            c if c.is_ascii_digit() => self.number(),
            '.' if self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()) => self.number(),
            c if is_ident_start(c) => Ok(Token::Identifier(
                self.consume_while(is_ident_part).to_string(),
            )),
            _ => {
                let rest = self.rest();
                match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
                    Some(p) => {
                        self.pos += p.len();
                        Ok(Token::Punct(p))
                    }
                    None => Err(self.error(format!("unexpected character {ch:?}"))),
                }
            }
        }
    }

    fn number(&mut self) -> QueryResult<Token> {
        let rest = self.rest();
        if rest.starts_with("0x") || rest.starts_with("0X") {
            self.pos += 2;
            let digits = self.consume_while(|c| c.is_ascii_hexdigit());
            return u64::from_str_radix(digits, 16)
                .map(|n| Token::Number(n as f64))
                .map_err(|_| self.error(format!("invalid hex literal 0x{digits}")));
        }

        let start = self.pos;
        self.consume_while(|c| c.is_ascii_digit() || c == '.');
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if self.consume_while(|c| c.is_ascii_digit()).is_empty() {
                return Err(self.error("invalid number (expected exponent digits)"));
            }
        }
        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("invalid number {text:?}")))
    }

    fn string(&mut self, quote: char) -> QueryResult<Token> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(Token::String(out)),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated string"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        'u' => {
                            let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                            let c = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error(format!("invalid escape \\u{hex}")))?;
                            out.push(c);
                        }
                        other => out.push(other),
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn infix_binding_power(token: &Token) -> Option<(u8, bool)> {
    let Token::Punct(p) = token else {
        return match token {
            Token::Identifier(name) if name == "in" => Some((8, false)),
            _ => None,
        };
    };
    let bp = match *p {
        "??" => (1, false),
        "||" => (2, false),
        "&&" => (3, false),
        "|" => (4, false),
        "^" => (5, false),
        "&" => (6, false),
        "==" | "!=" | "===" | "!==" => (7, false),
        "<" | ">" | "<=" | ">=" => (8, false),
        "<<" | ">>" | ">>>" => (9, false),
        "+" | "-" => (10, false),
        "*" | "/" | "%" => (11, false),
        "**" => (12, true),
        _ => return None,
    };
    Some(bp)
}

fn binary_node(token: &Token, left: Node, right: Node) -> Node {
    let logical = match token {
        Token::Punct("??") => Some(LogicalOp::Nullish),
        Token::Punct("||") => Some(LogicalOp::Or),
        Token::Punct("&&") => Some(LogicalOp::And),
        _ => None,
    };
    if let Some(operator) = logical {
        return Node::Logical {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    let operator = match token {
        Token::Punct("|") => BinaryOp::BitOr,
        Token::Punct("^") => BinaryOp::BitXor,
        Token::Punct("&") => BinaryOp::BitAnd,
        Token::Punct("==") => BinaryOp::Equals,
        Token::Punct("!=") => BinaryOp::NotEquals,
        Token::Punct("===") => BinaryOp::StrictEquals,
        Token::Punct("!==") => BinaryOp::StrictNotEquals,
        Token::Punct("<") => BinaryOp::Less,
        Token::Punct(">") => BinaryOp::Greater,
        Token::Punct("<=") => BinaryOp::LessEquals,
        Token::Punct(">=") => BinaryOp::GreaterEquals,
        Token::Punct("<<") => BinaryOp::ShiftLeft,
        Token::Punct(">>") => BinaryOp::ShiftRight,
        Token::Punct(">>>") => BinaryOp::UnsignedShiftRight,
        Token::Punct("+") => BinaryOp::Add,
        Token::Punct("-") => BinaryOp::Subtract,
        Token::Punct("*") => BinaryOp::Multiply,
        Token::Punct("/") => BinaryOp::Divide,
        Token::Punct("%") => BinaryOp::Modulo,
        Token::Punct("**") => BinaryOp::Power,
        _ => BinaryOp::In,
    };
    Node::Binary {
        operator,
        left: Box::new(left),
        right: Box::new(right),
    }
}

static EOF: Token = Token::Eof;

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> QueryResult<Self> {
        Ok(Self {
            input,
            tokens: Lexer::new(input).tokenize()?,
            pos: 0,
        })
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::parse(message, self.input)
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&EOF)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Identifier(name) if name == keyword)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> QueryResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{punct}`, found {:?}", self.peek())))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> QueryResult<()> {
        if self.is_keyword(keyword) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected `{keyword}`, found {:?}", self.peek())))
        }
    }

    fn identifier(&mut self) -> QueryResult<String> {
        match self.bump() {
            Token::Identifier(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {other:?}"))),
        }
    }

    fn parse(&mut self) -> QueryResult<Node> {
        let node = self.parse_assignment()?;
        self.eat(";");
        if *self.peek() != Token::Eof {
            return Err(self.error(format!("unexpected token {:?}", self.peek())));
        }
        Ok(node)
    }

    /// Index just past the bracket matching the opener at the current position.
    fn matching_close(&self, open: &str, close: &str) -> Option<usize> {
        let mut depth = 0usize;
        for (i, token) in self.tokens[self.pos..].iter().enumerate() {
            match token {
                Token::Punct(p) if *p == open => depth += 1,
                Token::Punct(p) if *p == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(self.pos + i + 1);
                    }
                }
                Token::Eof => return None,
                _ => {}
            }
        }
        None
    }

    fn at_arrow(&self) -> bool {
        match self.peek() {
            Token::Identifier(_) => self.peek_at(1) == &Token::Punct("=>"),
            Token::Punct("(") => self
                .matching_close("(", ")")
                .is_some_and(|end| self.tokens.get(end) == Some(&Token::Punct("=>"))),
            _ => false,
        }
    }

    fn parse_assignment(&mut self) -> QueryResult<Node> {
        if self.at_arrow() {
            return self.parse_arrow();
        }
        if self.is_keyword("yield") {
            self.bump();
            let argument = if matches!(self.peek(), Token::Punct(")" | "]" | "}" | "," | ";"))
                || *self.peek() == Token::Eof
            {
                None
            } else {
                Some(Box::new(self.parse_assignment()?))
            };
            return Ok(Node::Yield { argument });
        }

        let target = self.parse_conditional()?;
        if let Token::Punct(p) = self.peek() {
            if ASSIGNMENT_OPS.contains(p) {
                let operator = p.to_string();
                self.bump();
                let value = self.parse_assignment()?;
                return Ok(Node::Assignment {
                    operator,
                    target: Box::new(target),
                    value: Box::new(value),
                });
            }
        }
        Ok(target)
    }

    fn parse_arrow(&mut self) -> QueryResult<Node> {
        let params = if self.eat("(") {
            self.parse_pattern_list(")")?
        } else {
            vec![Pattern::Identifier {
                name: self.identifier()?,
            }]
        };
        self.expect("=>")?;
        let body = if self.is_punct("{") {
            self.parse_block()?
        } else {
            self.parse_assignment()?
        };
        Ok(Node::ArrowFunction {
            params,
            body: Box::new(body),
        })
    }

    fn parse_pattern_list(&mut self, close: &str) -> QueryResult<Vec<Pattern>> {
        let mut params = Vec::new();
        while !self.eat(close) {
            params.push(self.parse_pattern()?);
            if !self.is_punct(close) {
                self.expect(",")?;
            }
        }
        Ok(params)
    }

    fn parse_pattern(&mut self) -> QueryResult<Pattern> {
        if !self.eat("{") {
            return Ok(Pattern::Identifier {
                name: self.identifier()?,
            });
        }
        let mut properties = Vec::new();
        while !self.eat("}") {
            let key = match self.bump() {
                Token::Identifier(name) | Token::String(name) => name,
                other => {
                    return Err(self.error(format!("invalid destructuring key {other:?}")))
                }
            };
            let binding = if self.eat(":") {
                self.identifier()?
            } else {
                key.clone()
            };
            properties.push(PatternProperty { key, binding });
            if !self.is_punct("}") {
                self.expect(",")?;
            }
        }
        Ok(Pattern::Object { properties })
    }

    fn parse_function(&mut self) -> QueryResult<Node> {
        self.expect_keyword("function")?;
        let name = match self.peek() {
            Token::Identifier(_) => Some(self.identifier()?),
            _ => None,
        };
        self.expect("(")?;
        let params = self.parse_pattern_list(")")?;
        let body = self.parse_block()?;
        Ok(Node::Function {
            name,
            params,
            body: Box::new(body),
        })
    }

    fn parse_block(&mut self) -> QueryResult<Node> {
        self.expect("{")?;
        let mut body = Vec::new();
        loop {
            if self.eat("}") {
                return Ok(Node::Block { body });
            }
            if self.eat(";") {
                continue;
            }
            if *self.peek() == Token::Eof {
                return Err(self.error("unterminated block"));
            }
            body.push(self.parse_statement()?);
        }
    }

    fn skip_parenthesized(&mut self) -> QueryResult<()> {
        match self.matching_close("(", ")") {
            Some(end) => {
                self.pos = end;
                Ok(())
            }
            None => Err(self.error("unbalanced parentheses")),
        }
    }

    fn parse_statement(&mut self) -> QueryResult<Node> {
        if self.is_punct("{") {
            return self.parse_block();
        }
        let keyword = match self.peek() {
            Token::Identifier(name) => name.clone(),
            _ => String::new(),
        };
        let node = match keyword.as_str() {
            "const" | "let" | "var" => {
                self.bump();
                let kind = match keyword.as_str() {
                    "const" => DeclarationKind::Const,
                    "let" => DeclarationKind::Let,
                    _ => DeclarationKind::Var,
                };
                let mut declarations = Vec::new();
                loop {
                    let id = self.parse_pattern()?;
                    let init = if self.eat("=") {
                        Some(Box::new(self.parse_assignment()?))
                    } else {
                        None
                    };
                    declarations.push(Declarator { id, init });
                    if !self.eat(",") {
                        break;
                    }
                }
                Node::Declaration { kind, declarations }
            }
            "return" => {
                self.bump();
                let argument = if matches!(self.peek(), Token::Punct(";" | "}")) {
                    None
                } else {
                    Some(Box::new(self.parse_assignment()?))
                };
                Node::Return { argument }
            }
            "if" => {
                self.bump();
                self.expect("(")?;
                let test = self.parse_assignment()?;
                self.expect(")")?;
                let consequent = self.parse_statement()?;
                self.eat(";");
                let alternate = if self.is_keyword("else") {
                    self.bump();
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                return Ok(Node::If {
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate,
                });
            }
            "for" | "while" => {
                self.bump();
                self.skip_parenthesized()?;
                let body = self.parse_statement()?;
                return Ok(Node::Loop {
                    kind: if keyword == "for" {
                        LoopKind::For
                    } else {
                        LoopKind::While
                    },
                    body: Box::new(body),
                });
            }
            "do" => {
                self.bump();
                let body = self.parse_statement()?;
                self.expect_keyword("while")?;
                self.skip_parenthesized()?;
                Node::Loop {
                    kind: LoopKind::DoWhile,
                    body: Box::new(body),
                }
            }
            "function" => return self.parse_function(),
            _ => self.parse_assignment()?,
        };
        self.eat(";");
        Ok(node)
    }

    fn parse_conditional(&mut self) -> QueryResult<Node> {
        let test = self.parse_binary(0)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Node::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> QueryResult<Node> {
        let mut left = self.parse_unary()?;
        while let Some((prec, right_assoc)) = infix_binding_power(self.peek()) {
            if prec < min_prec {
                break;
            }
            let op = self.bump();
            let right = self.parse_binary(if right_assoc { prec } else { prec + 1 })?;
            left = binary_node(&op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> QueryResult<Node> {
        let operator = match self.peek() {
            Token::Punct("-") => Some(UnaryOp::Negate),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("~") => Some(UnaryOp::BitNot),
            Token::Identifier(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(operator) = operator {
            self.bump();
            let argument = self.parse_unary()?;
            return Ok(Node::Unary {
                operator,
                argument: Box::new(argument),
            });
        }
        if let Token::Punct(p @ ("++" | "--")) = self.peek() {
            let operator = p.to_string();
            self.bump();
            let argument = self.parse_unary()?;
            return Ok(Node::Update {
                operator,
                prefix: true,
                argument: Box::new(argument),
            });
        }
        if self.is_keyword("await") {
            self.bump();
            let argument = self.parse_unary()?;
            return Ok(Node::Await {
                argument: Box::new(argument),
            });
        }

        let expr = self.parse_call_member()?;
        if let Token::Punct(p @ ("++" | "--")) = self.peek() {
            let operator = p.to_string();
            self.bump();
            return Ok(Node::Update {
                operator,
                prefix: false,
                argument: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> QueryResult<Node> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let name = self.identifier()?;
                expr = Node::Member {
                    object: Box::new(expr),
                    property: Box::new(Node::Identifier { name }),
                    computed: false,
                };
            } else if self.eat("[") {
                let property = self.parse_assignment()?;
                self.expect("]")?;
                expr = Node::Member {
                    object: Box::new(expr),
                    property: Box::new(property),
                    computed: true,
                };
            } else if self.eat("(") {
                let mut arguments = Vec::new();
                while !self.eat(")") {
                    arguments.push(self.parse_assignment()?);
                    if !self.is_punct(")") {
                        self.expect(",")?;
                    }
                }
                expr = Node::Call {
                    callee: Box::new(expr),
                    arguments,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> QueryResult<Node> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.bump();
                Ok(Node::literal(Literal::Number(n)))
            }
            Token::String(s) => {
                self.bump();
                Ok(Node::literal(Literal::String(s)))
            }
            Token::Identifier(name) => match name.as_str() {
                "function" => self.parse_function(),
                "true" | "false" => {
                    self.bump();
                    Ok(Node::literal(Literal::Boolean(name == "true")))
                }
                "null" => {
                    self.bump();
                    Ok(Node::literal(Literal::Null))
                }
                _ => {
                    self.bump();
                    Ok(Node::Identifier { name })
                }
            },
            Token::Punct("(") => {
                self.bump();
                let expr = self.parse_assignment()?;
                self.expect(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.bump();
                let mut elements = Vec::new();
                while !self.eat("]") {
                    elements.push(self.parse_assignment()?);
                    if !self.is_punct("]") {
                        self.expect(",")?;
                    }
                }
                Ok(Node::Array { elements })
            }
            Token::Punct("{") => self.parse_object(),
            other => Err(self.error(format!("unexpected token in expression: {other:?}"))),
        }
    }

    fn parse_object(&mut self) -> QueryResult<Node> {
        self.expect("{")?;
        let mut properties = Vec::new();
        while !self.eat("}") {
            let (key, shorthand) = match self.bump() {
                Token::Identifier(name) => (name, true),
                Token::String(s) => (s, false),
                Token::Number(n) => (tabula_columnar::Value::Number(n).to_string(), false),
                Token::Punct("[") => {
                    return Err(self.error("computed object keys are not supported"))
                }
                other => return Err(self.error(format!("invalid object key {other:?}"))),
            };
            let value = if self.eat(":") {
                self.parse_assignment()?
            } else if shorthand {
                Node::Identifier { name: key.clone() }
            } else {
                return Err(self.error(format!("expected `:` after object key {key:?}")));
            };
            properties.push(Property { key, value });
            if !self.is_punct("}") {
                self.expect(",")?;
            }
        }
        Ok(Node::Object { properties })
    }
}

/// Parse expression source text into a syntax tree.
pub fn parse(input: &str) -> QueryResult<Node> {
    Parser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn member(object: &str, property: &str) -> Node {
        Node::Member {
            object: Box::new(Node::identifier(object)),
            property: Box::new(Node::identifier(property)),
            computed: false,
        }
    }

    #[test]
    fn parses_arrow_with_precedence() {
        let node = parse("d => d.a + d.b * 2").unwrap();
        let Node::ArrowFunction { params, body } = node else {
            panic!("expected arrow function");
        };
        assert_eq!(params, vec![Pattern::Identifier { name: "d".into() }]);
        assert_eq!(
            *body,
            Node::Binary {
                operator: BinaryOp::Add,
                left: Box::new(member("d", "a")),
                right: Box::new(Node::Binary {
                    operator: BinaryOp::Multiply,
                    left: Box::new(member("d", "b")),
                    right: Box::new(Node::literal(Literal::Number(2.0))),
                }),
            }
        );
    }

    #[test]
    fn parses_destructured_params_and_blocks() {
        let node = parse("({ a, b: x }, $) => { const y = a * 2; return y > x ? 'hi' : \"lo\"; }")
            .unwrap();
        let Node::ArrowFunction { params, body } = node else {
            panic!("expected arrow function");
        };
        assert_eq!(
            params[0],
            Pattern::Object {
                properties: vec![
                    PatternProperty {
                        key: "a".into(),
                        binding: "a".into()
                    },
                    PatternProperty {
                        key: "b".into(),
                        binding: "x".into()
                    },
                ]
            }
        );
        let Node::Block { body } = *body else {
            panic!("expected block body");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0], Node::Declaration { kind: DeclarationKind::Const, .. }));
        assert!(matches!(body[1], Node::Return { argument: Some(_) }));
    }

    #[test]
    fn power_is_right_associative() {
        let node = parse("2 ** 3 ** 2").unwrap();
        let Node::Binary { left, right, .. } = node else {
            panic!("expected binary");
        };
        assert_eq!(*left, Node::literal(Literal::Number(2.0)));
        assert!(matches!(*right, Node::Binary { operator: BinaryOp::Power, .. }));
    }

    #[test]
    fn parses_rejected_constructs_into_nodes() {
        assert!(matches!(parse("x = 1").unwrap(), Node::Assignment { .. }));
        assert!(matches!(parse("x++").unwrap(), Node::Update { prefix: false, .. }));
        let node = parse("d => { for (let i = 0; i < 3; i++) { } return 1; }").unwrap();
        let Node::ArrowFunction { body, .. } = node else {
            panic!("expected arrow function");
        };
        let Node::Block { body } = *body else {
            panic!("expected block");
        };
        assert!(matches!(body[0], Node::Loop { kind: LoopKind::For, .. }));
    }

    #[test]
    fn reports_errors_with_source() {
        let err = parse("d => d.a +").unwrap_err();
        assert!(matches!(err, QueryError::Parse { ref snippet, .. } if snippet == "d => d.a +"));
        assert!(parse("'open").is_err());
        assert!(parse("`tpl`").is_err());
    }

    #[test]
    fn display_output_reparses_to_same_tree() {
        let source = "(d, $) => d.x > $.lo && op.mean(d[\"y z\"]) !== null ? -d.x : [1, 'a']";
        let node = parse(source).unwrap();
        let reparsed = parse(&node.to_string()).unwrap();
        assert_eq!(reparsed, node);
    }
}
