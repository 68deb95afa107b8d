//! Tokenizer for the sandboxed formula language
//!
//! Converts formula source like `var x = sales * 1.1;` into a sequence of
//! tokens that can be parsed into an AST. Each token remembers its position and
//! whether a line break preceded it, which the parser uses for automatic
//! statement termination.

use std::iter::Peekable;
use std::str::Chars;

/// A token in formula source
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10, .5)
    Number(f64),
    /// A string literal (e.g., "hello" or 'world')
    Str(String),
    /// An identifier or keyword
    Identifier(String),
    /// Operators: + - * / % ** = += -= *= /= == != === !== < <= > >= && || ! => ? : .
    Operator(String),
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    Comma,
    Semicolon,
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// Character offset of the token start
    pub position: usize,
    /// A line break sits between the previous token and this one
    pub newline_before: bool,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula source
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
    saw_newline: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            position: 0,
            saw_newline: false,
        }
    }

    /// Tokenize the entire source into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, TokenizeError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia()?;
            let position = self.position;
            let newline_before = std::mem::take(&mut self.saw_newline);
            match self.next_token()? {
                Some(token) => tokens.push(Spanned {
                    token,
                    position,
                    newline_before,
                }),
                None => break,
            }
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        let c = match self.peek() {
            None => return Ok(None),
            Some(c) => c,
        };

        let token = match c {
            '"' | '\'' => self.read_string()?,

            '(' => self.single(Token::OpenParen),
            ')' => self.single(Token::CloseParen),
            '[' => self.single(Token::OpenBracket),
            ']' => self.single(Token::CloseBracket),
            '{' => self.single(Token::OpenBrace),
            '}' => self.single(Token::CloseBrace),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),

            '.' => {
                self.advance();
                if self.peek().is_some_and(|d| d.is_ascii_digit()) {
                    self.read_number(String::from("0."))?
                } else {
                    Token::Operator(".".to_string())
                }
            }

            '+' | '-' | '/' | '%' => {
                self.advance();
                if self.eat('=') {
                    Token::Operator(format!("{c}="))
                } else {
                    Token::Operator(c.to_string())
                }
            }

            '*' => {
                self.advance();
                if self.eat('*') {
                    Token::Operator("**".to_string())
                } else if self.eat('=') {
                    Token::Operator("*=".to_string())
                } else {
                    Token::Operator("*".to_string())
                }
            }

            '=' => {
                self.advance();
                if self.eat('=') {
                    if self.eat('=') {
                        Token::Operator("===".to_string())
                    } else {
                        Token::Operator("==".to_string())
                    }
                } else if self.eat('>') {
                    Token::Operator("=>".to_string())
                } else {
                    Token::Operator("=".to_string())
                }
            }

            '!' => {
                self.advance();
                if self.eat('=') {
                    if self.eat('=') {
                        Token::Operator("!==".to_string())
                    } else {
                        Token::Operator("!=".to_string())
                    }
                } else {
                    Token::Operator("!".to_string())
                }
            }

            '<' | '>' => {
                self.advance();
                if self.eat('=') {
                    Token::Operator(format!("{c}="))
                } else {
                    Token::Operator(c.to_string())
                }
            }

            '&' | '|' => {
                let start = self.position;
                self.advance();
                if self.eat(c) {
                    Token::Operator(format!("{c}{c}"))
                } else {
                    return Err(TokenizeError::new(
                        format!("Bitwise operator '{}' is not supported", c),
                        start,
                    ));
                }
            }

            '?' | ':' => self.single(Token::Operator(c.to_string())),

            c if c.is_ascii_digit() => self.read_number(String::new())?,

            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(),

            c => {
                return Err(TokenizeError::new(
                    format!("Unexpected character: '{}'", c),
                    self.position,
                ));
            }
        };

        Ok(Some(token))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    /// Consume `expected` if it is next
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    /// Skip whitespace and comments, noting line breaks
    fn skip_trivia(&mut self) -> Result<(), TokenizeError> {
        loop {
            match self.peek() {
                Some('\n') => {
                    self.saw_newline = true;
                    self.advance();
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => self.skip_block_comment()?,
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), TokenizeError> {
        let start = self.position;
        self.advance();
        self.advance();
        loop {
            match self.advance() {
                None => return Err(TokenizeError::new("Unterminated comment", start)),
                Some('\n') => self.saw_newline = true,
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    /// Read a string literal with backslash escapes
    fn read_string(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let quote = self.advance();
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(TokenizeError::new("Unterminated string literal", start_pos));
                }
                Some(c) if Some(c) == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some(c) => value.push(c),
                    None => {
                        return Err(TokenizeError::new("Unterminated string literal", start_pos));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(Token::Str(value))
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self, mut num_str: String) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let fraction_only = !num_str.is_empty();

        self.read_digits(&mut num_str);

        if !fraction_only && self.peek() == Some('.') {
            self.advance();
            num_str.push('.');
            self.read_digits(&mut num_str);
        }

        if let Some(c) = self.peek() {
            if c == 'e' || c == 'E' {
                self.advance();
                num_str.push('e');
                if let Some(sign) = self.peek() {
                    if sign == '+' || sign == '-' {
                        self.advance();
                        num_str.push(sign);
                    }
                }
                self.read_digits(&mut num_str);
            }
        }

        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(TokenizeError::new(
                "Identifier starts immediately after numeric literal",
                self.position,
            ));
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    fn read_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::Identifier(ident)
    }
}

/// Convenience function to tokenize formula source
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, TokenizeError> {
    Tokenizer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    fn op(s: &str) -> Token {
        Token::Operator(s.to_string())
    }

    fn ident(s: &str) -> Token {
        Token::Identifier(s.to_string())
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(tokens("42"), vec![Token::Number(42.0)]);
        assert_eq!(tokens("3.567"), vec![Token::Number(3.567)]);
        assert_eq!(tokens("1.5e10"), vec![Token::Number(1.5e10)]);
        assert_eq!(tokens("2E-5"), vec![Token::Number(2e-5)]);
        assert_eq!(tokens(".5"), vec![Token::Number(0.5)]);
    }

    #[test]
    fn test_tokenize_strings() {
        assert_eq!(tokens("\"North\""), vec![Token::Str("North".to_string())]);
        assert_eq!(tokens("'it\\'s'"), vec![Token::Str("it's".to_string())]);
        assert_eq!(tokens("'a\\nb'"), vec![Token::Str("a\nb".to_string())]);
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            tokens("a === b !== c ** d => e += f"),
            vec![
                ident("a"),
                op("==="),
                ident("b"),
                op("!=="),
                ident("c"),
                op("**"),
                ident("d"),
                op("=>"),
                ident("e"),
                op("+="),
                ident("f"),
            ]
        );
        assert_eq!(
            tokens("a && b || !c ? d : e"),
            vec![
                ident("a"),
                op("&&"),
                ident("b"),
                op("||"),
                op("!"),
                ident("c"),
                op("?"),
                ident("d"),
                op(":"),
                ident("e"),
            ]
        );
    }

    #[test]
    fn test_tokenize_member_access() {
        assert_eq!(
            tokens("Math.max(rowValues.sales[0])"),
            vec![
                ident("Math"),
                op("."),
                ident("max"),
                Token::OpenParen,
                ident("rowValues"),
                op("."),
                ident("sales"),
                Token::OpenBracket,
                Token::Number(0.0),
                Token::CloseBracket,
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_skips_comments() {
        assert_eq!(
            tokens("a // trailing\n/* block\n */ b"),
            vec![ident("a"), ident("b")]
        );
    }

    #[test]
    fn test_tokenize_tracks_newlines() {
        let spanned = tokenize("a\nb c").unwrap();
        assert!(!spanned[0].newline_before);
        assert!(spanned[1].newline_before);
        assert!(!spanned[2].newline_before);
        assert_eq!(spanned[2].position, 4);
    }

    #[test]
    fn test_tokenize_block_comment_counts_as_newline() {
        let spanned = tokenize("a /*\n*/ b").unwrap();
        assert!(spanned[1].newline_before);
    }

    #[test]
    fn test_tokenize_empty_string() {
        assert_eq!(tokens(""), vec![]);
        assert_eq!(tokens("   \n "), vec![]);
    }

    #[test]
    fn test_tokenize_error_unterminated_string() {
        let result = tokenize("\"hello");
        assert!(result.unwrap_err().message.contains("Unterminated"));
    }

    #[test]
    fn test_tokenize_error_unexpected_char() {
        let result = tokenize("a # b");
        assert!(result.unwrap_err().message.contains("Unexpected"));
    }

    #[test]
    fn test_tokenize_error_bitwise() {
        assert!(tokenize("a & b").is_err());
    }

    #[test]
    fn test_tokenize_error_private_use_token() {
        // Leftover substitution tokens are never valid source
        assert!(tokenize("\u{E000}abc\u{E001}").is_err());
    }
}
