//! Formula parser for the sandbox
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST) using
//! recursive descent with operator precedence. A `return` outside any function
//! is reported with [`ParseErrorKind::ReturnOutsideFunction`] so the caller can
//! retry with the source wrapped in a function.

use std::rc::Rc;

use super::tokenizer::{tokenize, Spanned, Token};

/// Words that cannot be used as variable names
const RESERVED: &[&str] = &[
    "var", "let", "const", "if", "else", "return", "function", "true", "false", "null", "typeof",
    "new", "this", "while", "for", "do", "class", "delete", "in", "instanceof", "import",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `=` or a compound assignment (`+=` carries `Some(BinaryOp::Add)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignOp(pub Option<BinaryOp>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

/// Abstract Syntax Tree node for expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Identifier(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// `object.property`
    Member {
        object: Box<Expr>,
        property: String,
    },
    /// `object[index]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Short-circuiting `&&` / `||`
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        target: String,
        op: AssignOp,
        value: Box<Expr>,
    },
    Function(Rc<FunctionDef>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Concise arrow body: `x => x * 2`
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
}

/// Abstract Syntax Tree node for statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Declare {
        kind: DeclKind,
        declarations: Vec<(String, Option<Expr>)>,
    },
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Function(Rc<FunctionDef>),
    Empty,
}

/// A parsed formula
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    /// `return` used at the top level of the formula
    ReturnOutsideFunction,
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            kind: ParseErrorKind::Syntax,
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parser for formula tokens
pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    function_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            position: 0,
            function_depth: 0,
        }
    }

    /// Parse the tokens into a program
    pub fn parse(mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.statement()?);
        }
        Ok(Program { body })
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset).map(|s| &s.token)
    }

    /// Position of the current token, or end of input
    fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(0, |s| s.position)
    }

    fn newline_before_current(&self) -> bool {
        self.tokens
            .get(self.position)
            .is_some_and(|s| s.newline_before)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|s| s.token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_operator(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Operator(s)) if s == op)
    }

    fn match_operator(&mut self, op: &str) -> bool {
        if self.check_operator(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Identifier(s)) if s == keyword)
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseError> {
        if self.match_token(expected) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("Expected {}, found {}", what, self.describe_current()),
                self.current_position(),
            ))
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(token) => format!("{:?}", token),
            None => "end of input".to_string(),
        }
    }

    /// Identifier that is not a reserved word
    fn binding_name(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Identifier(name)) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(ParseError::new(
                format!("Expected identifier, found {}", self.describe_current()),
                self.current_position(),
            )),
        }
    }

    /// Statement terminator: `;`, a line break, `}` or end of input
    fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.match_token(&Token::Semicolon)
            || self.is_at_end()
            || self.peek() == Some(&Token::CloseBrace)
            || self.newline_before_current()
        {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("Expected ';', found {}", self.describe_current()),
                self.current_position(),
            ))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Token::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Some(Token::OpenBrace) => {
                self.advance();
                Ok(Stmt::Block(self.block_body()?))
            }
            Some(Token::Identifier(word)) => match word.as_str() {
                "var" | "let" | "const" => self.declaration(),
                "if" => self.if_statement(),
                "return" => self.return_statement(),
                "function" if matches!(self.peek_at(1), Some(Token::Identifier(_))) => {
                    self.advance();
                    let def = self.function_rest(true)?;
                    Ok(Stmt::Function(def))
                }
                _ => self.expression_statement(),
            },
            _ => self.expression_statement(),
        }
    }

    /// Statements up to the closing `}` (opening brace already consumed)
    fn block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        while !self.match_token(&Token::CloseBrace) {
            if self.is_at_end() {
                return Err(ParseError::new(
                    "Expected '}' before end of input",
                    self.current_position(),
                ));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        let kind = match self.advance() {
            Some(Token::Identifier(word)) if word == "let" => DeclKind::Let,
            Some(Token::Identifier(word)) if word == "const" => DeclKind::Const,
            _ => DeclKind::Var,
        };

        let mut declarations = Vec::new();
        loop {
            let name = self.binding_name()?;
            let init = if self.match_operator("=") {
                Some(self.assignment()?)
            } else if kind == DeclKind::Const {
                return Err(ParseError::new(
                    format!("Missing initializer in const declaration '{}'", name),
                    self.current_position(),
                ));
            } else {
                None
            };
            declarations.push((name, init));
            if !self.match_token(&Token::Comma) {
                break;
            }
        }

        self.end_statement()?;
        Ok(Stmt::Declare { kind, declarations })
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(&Token::OpenParen, "'(' after 'if'")?;
        let test = self.expression()?;
        self.expect(&Token::CloseParen, "')' after if condition")?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.match_keyword("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        self.advance();
        if self.function_depth == 0 {
            return Err(ParseError {
                kind: ParseErrorKind::ReturnOutsideFunction,
                message: "Illegal return statement outside of a function".to_string(),
                position,
            });
        }

        let value = if self.is_at_end()
            || self.newline_before_current()
            || matches!(self.peek(), Some(Token::Semicolon) | Some(Token::CloseBrace))
        {
            None
        } else {
            Some(self.expression()?)
        };
        self.end_statement()?;
        Ok(Stmt::Return(value))
    }

    fn expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        self.end_statement()?;
        Ok(Stmt::Expr(expr))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    /// Assignment: IDENT ( "=" | "+=" | "-=" | "*=" | "/=" | "%=" ) assignment | arrow | conditional
    fn assignment(&mut self) -> Result<Expr, ParseError> {
        if self.is_arrow_ahead() {
            return self.arrow_function();
        }

        let position = self.current_position();
        let target = self.conditional()?;

        let op = match self.peek() {
            Some(Token::Operator(s)) => match s.as_str() {
                "=" => Some(AssignOp(None)),
                "+=" => Some(AssignOp(Some(BinaryOp::Add))),
                "-=" => Some(AssignOp(Some(BinaryOp::Sub))),
                "*=" => Some(AssignOp(Some(BinaryOp::Mul))),
                "/=" => Some(AssignOp(Some(BinaryOp::Div))),
                "%=" => Some(AssignOp(Some(BinaryOp::Rem))),
                _ => None,
            },
            _ => None,
        };

        let Some(op) = op else {
            return Ok(target);
        };
        self.advance();

        match target {
            Expr::Identifier(name) => {
                let value = self.assignment()?;
                Ok(Expr::Assign {
                    target: name,
                    op,
                    value: Box::new(value),
                })
            }
            _ => Err(ParseError::new(
                "Invalid assignment target (only variables can be assigned)",
                position,
            )),
        }
    }

    /// `ident =>` or `( params ) =>` starts at the current token
    fn is_arrow_ahead(&self) -> bool {
        match self.peek() {
            Some(Token::Identifier(name)) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_at(1), Some(Token::Operator(op)) if op == "=>")
            }
            Some(Token::OpenParen) => {
                let mut offset = 1;
                loop {
                    match self.peek_at(offset) {
                        Some(Token::CloseParen) => {
                            return matches!(
                                self.peek_at(offset + 1),
                                Some(Token::Operator(op)) if op == "=>"
                            );
                        }
                        Some(Token::Identifier(_)) | Some(Token::Comma) => offset += 1,
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> Result<Expr, ParseError> {
        let params = if self.match_token(&Token::OpenParen) {
            self.parameter_list()?
        } else {
            vec![self.binding_name()?]
        };
        if !self.match_operator("=>") {
            return Err(ParseError::new("Expected '=>'", self.current_position()));
        }

        self.function_depth += 1;
        let body = if self.match_token(&Token::OpenBrace) {
            self.block_body().map(FunctionBody::Block)
        } else {
            self.assignment().map(|e| FunctionBody::Expr(Box::new(e)))
        };
        self.function_depth -= 1;

        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body: body?,
        })))
    }

    /// Parameters up to the closing `)` (opening paren already consumed)
    fn parameter_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if self.match_token(&Token::CloseParen) {
            return Ok(params);
        }
        loop {
            params.push(self.binding_name()?);
            if self.match_token(&Token::CloseParen) {
                return Ok(params);
            }
            self.expect(&Token::Comma, "',' or ')' in parameter list")?;
        }
    }

    /// `function` keyword already consumed
    fn function_rest(&mut self, require_name: bool) -> Result<Rc<FunctionDef>, ParseError> {
        let name = if require_name || matches!(self.peek(), Some(Token::Identifier(_))) {
            Some(self.binding_name()?)
        } else {
            None
        };
        self.expect(&Token::OpenParen, "'(' after function")?;
        let params = self.parameter_list()?;
        self.expect(&Token::OpenBrace, "'{' before function body")?;

        self.function_depth += 1;
        let body = self.block_body();
        self.function_depth -= 1;

        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body?),
        }))
    }

    /// Conditional: logical_or ( "?" assignment ":" assignment )?
    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.logical_or()?;
        if self.match_operator("?") {
            let consequent = self.assignment()?;
            if !self.match_operator(":") {
                return Err(ParseError::new(
                    "Expected ':' in conditional expression",
                    self.current_position(),
                ));
            }
            let alternate = self.assignment()?;
            Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            })
        } else {
            Ok(test)
        }
    }

    fn logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.logical_and()?;
        while self.match_operator("||") {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.equality()?;
        while self.match_operator("&&") {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Left-associative binary level over the given operator table
    fn binary_level(
        &mut self,
        table: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in table {
                if self.match_operator(symbol) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::LtEq),
                (">=", BinaryOp::GtEq),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::exponent,
        )
    }

    /// Exponent: unary ( "**" exponent )?   (right-associative)
    fn exponent(&mut self) -> Result<Expr, ParseError> {
        let left = self.unary()?;
        if self.match_operator("**") {
            let right = self.exponent()?;
            Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(left),
                right: Box::new(right),
            })
        } else {
            Ok(left)
        }
    }

    /// Unary: ( "-" | "+" | "!" | "typeof" ) unary | postfix
    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = if self.match_operator("-") {
            Some(UnaryOp::Neg)
        } else if self.match_operator("+") {
            Some(UnaryOp::Plus)
        } else if self.match_operator("!") {
            Some(UnaryOp::Not)
        } else if self.match_keyword("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };

        match op {
            Some(op) => {
                let operand = self.unary()?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.postfix(),
        }
    }

    /// Postfix: primary ( "(" arguments ")" | "[" expr "]" | "." IDENT )*
    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&Token::OpenParen) {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.match_token(&Token::OpenBracket) {
                let index = self.expression()?;
                self.expect(&Token::CloseBracket, "']' after index")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.match_operator(".") {
                match self.advance() {
                    Some(Token::Identifier(property)) => {
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property,
                        };
                    }
                    _ => {
                        return Err(ParseError::new(
                            "Expected property name after '.'",
                            self.current_position(),
                        ))
                    }
                }
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments up to the closing `)` (opening paren already consumed)
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.match_token(&Token::CloseParen) {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.match_token(&Token::CloseParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "',' or ')' after argument")?;
        }
    }

    /// Primary: literal | IDENT | "(" expr ")" | array | object | function
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Identifier(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "function" => Ok(Expr::Function(self.function_rest(false)?)),
                word if RESERVED.contains(&word) => Err(ParseError::new(
                    format!("Unexpected keyword '{}'", word),
                    position,
                )),
                _ => Ok(Expr::Identifier(name)),
            },
            Some(Token::OpenParen) => {
                let expr = self.expression()?;
                self.expect(&Token::CloseParen, "')' after expression")?;
                Ok(expr)
            }
            Some(Token::OpenBracket) => {
                let mut items = Vec::new();
                while !self.match_token(&Token::CloseBracket) {
                    items.push(self.assignment()?);
                    if !self.match_token(&Token::Comma) {
                        self.expect(&Token::CloseBracket, "']' after array elements")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(Token::OpenBrace) => self.object_literal(),
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                position,
            )),
            None => Err(ParseError::new("Unexpected end of input", position)),
        }
    }

    /// Object literal after `{`: ( key ":" expr ( "," key ":" expr )* ","? )? "}"
    fn object_literal(&mut self) -> Result<Expr, ParseError> {
        let mut entries = Vec::new();
        while !self.match_token(&Token::CloseBrace) {
            let key = match self.advance() {
                Some(Token::Identifier(key)) | Some(Token::Str(key)) => key,
                Some(Token::Number(n)) => super::value::number_to_string(n),
                _ => {
                    return Err(ParseError::new(
                        "Expected property name in object literal",
                        self.current_position(),
                    ))
                }
            };
            if !self.match_operator(":") {
                return Err(ParseError::new(
                    "Expected ':' after property name",
                    self.current_position(),
                ));
            }
            entries.push((key, self.assignment()?));
            if !self.match_token(&Token::Comma) {
                self.expect(&Token::CloseBrace, "'}' after object properties")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

/// Tokenize and parse formula source into a program
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source).map_err(|e| ParseError::new(e.message, e.position))?;
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Identifier(name.to_string()))
    }

    fn single_expr(source: &str) -> Expr {
        let program = parse_program(source).unwrap();
        assert_eq!(program.body.len(), 1, "expected one statement in {source:?}");
        match program.body.into_iter().next() {
            Some(Stmt::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_precedence() {
        assert_eq!(
            single_expr("a + b * c"),
            Expr::Binary {
                op: BinaryOp::Add,
                left: ident("a"),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: ident("b"),
                    right: ident("c"),
                }),
            }
        );
    }

    #[test]
    fn test_parse_power_right_associative() {
        assert_eq!(
            single_expr("2 ** 3 ** 2"),
            Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(Expr::Number(2.0)),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Pow,
                    left: Box::new(Expr::Number(3.0)),
                    right: Box::new(Expr::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn test_parse_conditional_and_logical() {
        assert_eq!(
            single_expr("a && b ? 1 : 2"),
            Expr::Conditional {
                test: Box::new(Expr::Logical {
                    op: LogicalOp::And,
                    left: ident("a"),
                    right: ident("b"),
                }),
                consequent: Box::new(Expr::Number(1.0)),
                alternate: Box::new(Expr::Number(2.0)),
            }
        );
    }

    #[test]
    fn test_parse_member_call_chain() {
        assert_eq!(
            single_expr("Math.max(rowValues.sales[rowNum], 0)"),
            Expr::Call {
                callee: Box::new(Expr::Member {
                    object: ident("Math"),
                    property: "max".to_string(),
                }),
                args: vec![
                    Expr::Index {
                        object: Box::new(Expr::Member {
                            object: ident("rowValues"),
                            property: "sales".to_string(),
                        }),
                        index: ident("rowNum"),
                    },
                    Expr::Number(0.0),
                ],
            }
        );
    }

    #[test]
    fn test_parse_declarations_and_asi() {
        let program = parse_program("var x = 1\nlet y = x + 2\nx * y").unwrap();
        assert_eq!(program.body.len(), 3);
        assert!(matches!(
            &program.body[0],
            Stmt::Declare { kind: DeclKind::Var, declarations } if declarations.len() == 1
        ));
        assert!(matches!(&program.body[2], Stmt::Expr(_)));
    }

    #[test]
    fn test_parse_missing_semicolon_on_same_line() {
        assert!(parse_program("a b").is_err());
    }

    #[test]
    fn test_parse_if_else() {
        let program = parse_program("if (a > 1) { b } else c").unwrap();
        match &program.body[0] {
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                assert!(matches!(consequent.as_ref(), Stmt::Block(body) if body.len() == 1));
                assert!(alternate.is_some());
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_return_outside_function() {
        let err = parse_program("return a + b;").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ReturnOutsideFunction);
    }

    #[test]
    fn test_parse_return_inside_function() {
        let program = parse_program("(function() {\nreturn a + b;\n})()").unwrap();
        match &program.body[0] {
            Stmt::Expr(Expr::Call { callee, args }) => {
                assert!(args.is_empty());
                assert!(matches!(callee.as_ref(), Expr::Function(def) if def.params.is_empty()));
            }
            other => panic!("expected IIFE, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_arrow_functions() {
        match single_expr("(a, b) => a + b") {
            Expr::Function(def) => {
                assert_eq!(def.params, vec!["a".to_string(), "b".to_string()]);
                assert!(matches!(def.body, FunctionBody::Expr(_)));
            }
            other => panic!("expected arrow, got {other:?}"),
        }
        match single_expr("v => { return v * 2 }") {
            Expr::Function(def) => assert!(matches!(def.body, FunctionBody::Block(_))),
            other => panic!("expected arrow, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_parenthesized_is_not_arrow() {
        assert_eq!(
            single_expr("(a) * 2"),
            Expr::Binary {
                op: BinaryOp::Mul,
                left: ident("a"),
                right: Box::new(Expr::Number(2.0)),
            }
        );
    }

    #[test]
    fn test_parse_function_declaration() {
        let program = parse_program("function double(x) { return x * 2 }\ndouble(3)").unwrap();
        assert!(matches!(&program.body[0], Stmt::Function(def) if def.name.as_deref() == Some("double")));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            single_expr("[1, 'a', null]"),
            Expr::Array(vec![
                Expr::Number(1.0),
                Expr::Str("a".to_string()),
                Expr::Null
            ])
        );
        assert_eq!(
            single_expr("({ total: 1, 'x y': true })"),
            Expr::Object(vec![
                ("total".to_string(), Expr::Number(1.0)),
                ("x y".to_string(), Expr::Bool(true)),
            ])
        );
    }

    #[test]
    fn test_parse_compound_assignment() {
        assert_eq!(
            single_expr("total += 2"),
            Expr::Assign {
                target: "total".to_string(),
                op: AssignOp(Some(BinaryOp::Add)),
                value: Box::new(Expr::Number(2.0)),
            }
        );
    }

    #[test]
    fn test_parse_error_invalid_assignment_target() {
        assert!(parse_program("a.b = 1").is_err());
        assert!(parse_program("1 = 2").is_err());
    }

    #[test]
    fn test_parse_error_unbalanced() {
        let err = parse_program("sum(a, b").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(parse_program("[1, 2").is_err());
        assert!(parse_program("{ a").is_err());
    }

    #[test]
    fn test_parse_error_reserved_word() {
        assert!(parse_program("var if = 1").is_err());
        assert!(parse_program("new Date()").is_err());
    }

    #[test]
    fn test_parse_empty_program() {
        assert_eq!(parse_program("").unwrap().body, vec![]);
    }
}
