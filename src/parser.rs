//! Parser for BASIC programs.
//!
//! A recursive descent parser that consumes the token stream and builds a
//! [`Program`], a map from line number to statement. Every source line is
//! `<integer> <command> <newline>`; the command grammars are dispatched on
//! the leading keyword.
//!
//! ## Expression grammar
//!
//! Operator precedence, from lowest to highest:
//!
//! ```text
//! 1. + -        addition, subtraction          (left-associative)
//! 2. * /        multiplication, division       (left-associative)
//! 3. ^          exponentiation                 (left-associative)
//! 4. %          remainder                      (left-associative)
//! 5. -          unary negation
//! 6. primary    literals, variables, calls, parenthesized groups
//! ```
//!
//! Relational operators (`= <> < <= > >=`) do not participate in the
//! ladder; they appear only between the two operand expressions of an IF
//! condition.
//!
//! ## Ambiguities
//!
//! Two constructs are resolved by preferring the longer parse:
//!
//! - `PRINT "THE SUM IS: "S` takes the string literal and the following
//!   expression as a single print item with no separator between them.
//! - An expression after `FN` parses as a function call whenever the name
//!   has the `FN` + letter shape.
//!
//! ## Errors
//!
//! A malformed command raises a syntax error naming the offending token
//! and its line; the position of the token is kept so the driver can
//! underline it in the source. Empty lines (a bare number, or a bare
//! newline) are rejected.

use crate::ast::*;
use crate::error::{BasicError, Result};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    err_pos: Option<(usize, usize, usize)>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            err_pos: None,
        }
    }

    /// Parses the whole token stream into a program.
    ///
    /// Stops at the first malformed line. A line number that occurs twice
    /// replaces the earlier statement, matching the usual BASIC editing
    /// model.
    pub fn parse(&mut self) -> Result<Program> {
        let mut program = Program::new();

        while !self.is_at_end() {
            let (lineno, stmt) = self.statement_line()?;
            program.lines.insert(lineno, stmt);
        }

        Ok(program)
    }

    /// Position (line, column, width) of the token behind the last syntax
    /// error, for caret underlining.
    pub fn error_position(&self) -> Option<(usize, usize, usize)> {
        self.err_pos
    }

    fn statement_line(&mut self) -> Result<(u32, Statement)> {
        let lineno = match self.peek_kind() {
            TokenKind::Integer(n) if *n > 0 => {
                let n = *n as u32;
                self.advance();
                n
            }
            TokenKind::Newline => return Err(self.syntax_at("Empty line")),
            _ => return Err(self.expected("a line number")),
        };

        if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
            return Err(self.syntax_at("Empty line"));
        }

        let stmt = self.command()?;

        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
            }
            TokenKind::Eof => {}
            _ => return Err(self.expected("end of line")),
        }

        Ok((lineno, stmt))
    }

    fn command(&mut self) -> Result<Statement> {
        match self.peek_kind().clone() {
            TokenKind::Let => self.let_statement(),
            TokenKind::Read => self.read_statement(),
            TokenKind::Data => self.data_statement(),
            TokenKind::Print => self.print_statement(),
            TokenKind::Input => self.input_statement(),
            TokenKind::Goto => {
                self.advance();
                let target = self.line_reference("GOTO")?;
                Ok(Statement::Goto { target })
            }
            TokenKind::Gosub => {
                self.advance();
                let target = self.line_reference("GOSUB")?;
                Ok(Statement::GoSub { target })
            }
            TokenKind::If => self.if_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Next => {
                self.advance();
                let var = self.expect_ident("a loop variable after NEXT")?;
                Ok(Statement::Next { var })
            }
            TokenKind::Def => self.def_statement(),
            TokenKind::Dim => self.dim_statement(),
            TokenKind::Return => {
                self.advance();
                Ok(Statement::Return)
            }
            TokenKind::Restore => {
                self.advance();
                Ok(Statement::Restore)
            }
            TokenKind::End => {
                self.advance();
                Ok(Statement::End)
            }
            TokenKind::Stop => {
                self.advance();
                Ok(Statement::Stop)
            }
            TokenKind::Rem(text) => {
                self.advance();
                Ok(Statement::Remark(text))
            }
            _ => Err(self.expected("a command")),
        }
    }

    fn let_statement(&mut self) -> Result<Statement> {
        self.advance();
        let var = self.variable()?;
        self.expect(&TokenKind::Equal, "'=' in LET")?;
        let expr = self.expression()?;
        Ok(Statement::Let { var, expr })
    }

    fn read_statement(&mut self) -> Result<Statement> {
        self.advance();
        let vars = self.varlist()?;
        Ok(Statement::Read { vars })
    }

    /// `DATA` holds a comma-separated mix of signed numbers and string
    /// literals.
    fn data_statement(&mut self) -> Result<Statement> {
        self.advance();
        let mut items = Vec::new();

        loop {
            let item = match self.peek_kind().clone() {
                TokenKind::Minus => {
                    self.advance();
                    match self.peek_kind().clone() {
                        TokenKind::Integer(n) => {
                            self.advance();
                            Value::Number(-(n as f64))
                        }
                        TokenKind::Float(x) => {
                            self.advance();
                            Value::Number(-x)
                        }
                        _ => return Err(self.expected("a number after '-' in DATA")),
                    }
                }
                TokenKind::Integer(n) => {
                    self.advance();
                    Value::Number(n as f64)
                }
                TokenKind::Float(x) => {
                    self.advance();
                    Value::Number(x)
                }
                TokenKind::Str(s) => {
                    self.advance();
                    Value::Str(s)
                }
                _ => return Err(self.expected("a number or string in DATA")),
            };
            items.push(item);

            if self.peek_kind() == &TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok(Statement::Data { items })
    }

    /// A print list is items separated by `,` or `;`, optionally ending
    /// in a separator that suppresses the final newline. A string literal
    /// directly followed by an expression is one item.
    fn print_statement(&mut self) -> Result<Statement> {
        self.advance();
        let mut items = Vec::new();

        if !matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
            loop {
                if let TokenKind::Str(s) = self.peek_kind().clone() {
                    self.advance();
                    items.push(PrintItem::Text(s));
                    if self.starts_expression() {
                        let expr = self.expression()?;
                        items.push(PrintItem::Expr(expr));
                    }
                } else {
                    let expr = self.expression()?;
                    items.push(PrintItem::Expr(expr));
                }

                match self.peek_kind() {
                    TokenKind::Comma => {
                        self.advance();
                        items.push(PrintItem::Comma);
                    }
                    TokenKind::Semicolon => {
                        self.advance();
                        items.push(PrintItem::Semicolon);
                    }
                    _ => break,
                }

                // A separator right before the newline is the print end.
                if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                    break;
                }
            }
        }

        Ok(Statement::Print { items })
    }

    fn input_statement(&mut self) -> Result<Statement> {
        self.advance();
        let mut label = None;

        if let TokenKind::Str(s) = self.peek_kind().clone() {
            self.advance();
            label = Some(s);
            if !matches!(self.peek_kind(), TokenKind::Comma | TokenKind::Semicolon) {
                return Err(self.expected("',' or ';' after the INPUT label"));
            }
            self.advance();
        }

        let vars = self.varlist()?;
        Ok(Statement::Input { label, vars })
    }

    fn if_statement(&mut self) -> Result<Statement> {
        self.advance();
        let cond = self.relational_expression()?;
        self.expect(&TokenKind::Then, "THEN after the IF condition")?;
        let target = self.line_reference("THEN")?;
        Ok(Statement::If { cond, target })
    }

    fn for_statement(&mut self) -> Result<Statement> {
        self.advance();
        let var = self.expect_ident("a loop variable after FOR")?;
        self.expect(&TokenKind::Equal, "'=' in FOR")?;
        let low = self.expression()?;
        self.expect(&TokenKind::To, "TO in FOR")?;
        let high = self.expression()?;

        let step = if self.peek_kind() == &TokenKind::Step {
            self.advance();
            Some(self.expression()?)
        } else {
            None
        };

        Ok(Statement::For {
            var,
            low,
            high,
            step,
        })
    }

    fn def_statement(&mut self) -> Result<Statement> {
        self.advance();
        let name = match self.peek_kind().clone() {
            TokenKind::Fname(name) => {
                self.advance();
                name
            }
            _ => return Err(self.expected("a function name after DEF")),
        };
        self.expect(&TokenKind::LeftParen, "'(' in DEF")?;
        let param = self.expect_ident("a parameter name in DEF")?;
        self.expect(&TokenKind::RightParen, "')' in DEF")?;
        self.expect(&TokenKind::Equal, "'=' in DEF")?;
        let body = self.expression()?;
        Ok(Statement::Def { name, param, body })
    }

    /// A dim item is `ident ( integer )` or `ident ( integer , integer )`
    /// with literal, positive sizes.
    fn dim_statement(&mut self) -> Result<Statement> {
        self.advance();
        let mut items = Vec::new();

        loop {
            let name = self.expect_ident("an array name in DIM")?;
            self.expect(&TokenKind::LeftParen, "'(' in DIM")?;
            let size1 = self.dim_size()?;
            let size2 = if self.peek_kind() == &TokenKind::Comma {
                self.advance();
                Some(self.dim_size()?)
            } else {
                None
            };
            self.expect(&TokenKind::RightParen, "')' in DIM")?;
            items.push(DimItem { name, size1, size2 });

            if self.peek_kind() == &TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok(Statement::Dim { items })
    }

    fn dim_size(&mut self) -> Result<usize> {
        match self.peek_kind() {
            TokenKind::Integer(n) if *n > 0 => {
                let n = *n as usize;
                self.advance();
                Ok(n)
            }
            _ => Err(self.expected("a positive dimension in DIM")),
        }
    }

    fn line_reference(&mut self, context: &str) -> Result<u32> {
        match self.peek_kind() {
            TokenKind::Integer(n) if *n > 0 => {
                let n = *n as u32;
                self.advance();
                Ok(n)
            }
            _ => Err(self.expected(&format!("a line number after {}", context))),
        }
    }

    fn varlist(&mut self) -> Result<Vec<Variable>> {
        let mut vars = vec![self.variable()?];
        while self.peek_kind() == &TokenKind::Comma {
            self.advance();
            vars.push(self.variable()?);
        }
        Ok(vars)
    }

    /// `ident`, `ident ( expr )` or `ident ( expr , expr )`.
    fn variable(&mut self) -> Result<Variable> {
        let name = self.expect_ident("a variable name")?;

        let mut dim1 = None;
        let mut dim2 = None;
        if self.peek_kind() == &TokenKind::LeftParen {
            self.advance();
            dim1 = Some(Box::new(self.expression()?));
            if self.peek_kind() == &TokenKind::Comma {
                self.advance();
                dim2 = Some(Box::new(self.expression()?));
            }
            self.expect(&TokenKind::RightParen, "')' after the subscript")?;
        }

        Ok(Variable { name, dim1, dim2 })
    }

    fn relational_expression(&mut self) -> Result<Expression> {
        let left = self.expression()?;
        let op = match self.peek_kind() {
            TokenKind::Equal => RelOp::Eq,
            TokenKind::NotEqual => RelOp::Ne,
            TokenKind::Less => RelOp::Lt,
            TokenKind::LessEqual => RelOp::Le,
            TokenKind::Greater => RelOp::Gt,
            TokenKind::GreaterEqual => RelOp::Ge,
            _ => return Err(self.expected("a relational operator in IF")),
        };
        self.advance();
        let right = self.expression()?;
        Ok(Expression::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn expression(&mut self) -> Result<Expression> {
        let mut expr = self.term()?;

        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            expr = Expression::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expression> {
        let mut expr = self.power()?;

        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.power()?;
            expr = Expression::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn power(&mut self) -> Result<Expression> {
        let mut expr = self.modulo()?;

        while self.peek_kind() == &TokenKind::Caret {
            self.advance();
            let right = self.modulo()?;
            expr = Expression::Binary {
                op: BinOp::Pow,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn modulo(&mut self) -> Result<Expression> {
        let mut expr = self.unary()?;

        while self.peek_kind() == &TokenKind::Percent {
            self.advance();
            let right = self.unary()?;
            expr = Expression::Binary {
                op: BinOp::Mod,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expression> {
        if self.peek_kind() == &TokenKind::Minus {
            self.advance();
            let expr = self.unary()?;
            return Ok(Expression::Neg(Box::new(expr)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression> {
        match self.peek_kind().clone() {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expression::Number(Number::Int(n)))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(Expression::Number(Number::Float(x)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expression::Str(s))
            }
            TokenKind::Ident(_) => Ok(Expression::Var(self.variable()?)),
            TokenKind::Fname(name) => {
                self.advance();
                self.expect(&TokenKind::LeftParen, "'(' after the function name")?;
                let args = self.exprlist()?;
                self.expect(&TokenKind::RightParen, "')' after the arguments")?;
                Ok(Expression::Call { name, args })
            }
            TokenKind::Bltin(name) => {
                self.advance();
                self.expect(&TokenKind::LeftParen, "'(' after the built-in name")?;
                let args = if self.peek_kind() == &TokenKind::RightParen {
                    Vec::new()
                } else {
                    self.exprlist()?
                };
                self.expect(&TokenKind::RightParen, "')' after the arguments")?;
                Ok(Expression::Builtin { name, args })
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RightParen, "')' after the expression")?;
                Ok(Expression::Group(Box::new(expr)))
            }
            _ => Err(self.expected("an expression")),
        }
    }

    fn exprlist(&mut self) -> Result<Vec<Expression>> {
        let mut exprs = vec![self.expression()?];
        while self.peek_kind() == &TokenKind::Comma {
            self.advance();
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Integer(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Ident(_)
                | TokenKind::Fname(_)
                | TokenKind::Bltin(_)
                | TokenKind::Minus
                | TokenKind::LeftParen
        )
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.peek_kind() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.expected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.expected(what)),
        }
    }

    fn expected(&mut self, what: &str) -> BasicError {
        let token = self.peek().clone();
        self.err_pos = Some((token.line, token.column, token.width()));
        BasicError::Syntax(format!(
            "Expected {}, found '{}' at line {}",
            what, token.kind, token.line
        ))
    }

    fn syntax_at(&mut self, message: &str) -> BasicError {
        let token = self.peek().clone();
        self.err_pos = Some((token.line, token.column, token.width()));
        BasicError::Syntax(format!("{} at line {}", message, token.line))
    }

    fn is_at_end(&self) -> bool {
        self.peek_kind() == &TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> &Token {
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
            &self.tokens[self.current - 1]
        } else {
            self.peek()
        }
    }
}
