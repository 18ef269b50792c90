use crate::ast::{Binding, Expr, ExprKind, Param, Program, Stmt, StmtKind};
use crate::diagnostic::Diagnostic;
use crate::lexer::{Token, TokenKind};
use crate::span::SourceLocation;
use crate::types::{DataType, OperatorType};

type ParseResult<T> = Result<T, Diagnostic>;

/// Parse a token stream into a program, or every syntax error found.
///
/// The parser never panics on malformed input: an error aborts the
/// current statement, is recorded, and parsing resumes at the next
/// statement boundary (panic-mode synchronization).
pub fn parse(tokens: Vec<Token>) -> Result<Program, Vec<Diagnostic>> {
    let mut parser = Parser {
        tokens,
        position: 0,
        diagnostics: Vec::new(),
    };
    let program = parser.program();
    if parser.diagnostics.is_empty() {
        Ok(program)
    } else {
        Err(parser.diagnostics)
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn program(&mut self) -> Program {
        let mut statements = Vec::new();

        while !self.at_end() {
            match self.statement() {
                Ok(statement) => statements.push(statement),
                Err(diagnostic) => {
                    self.diagnostics.push(diagnostic);
                    self.synchronize();
                }
            }
        }

        Program { statements }
    }

    // ----------------------------------------------------------------
    // Statements
    // ----------------------------------------------------------------

    fn statement(&mut self) -> ParseResult<Stmt> {
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(TokenKind::Return) {
            return self.return_statement();
        }
        if self.matches(TokenKind::LeftBrace) {
            return self.block_statement();
        }
        if self.matches(TokenKind::Var) {
            return self.variable_declaration(Binding::Var);
        }
        if self.matches(TokenKind::Let) {
            return self.variable_declaration(Binding::Let);
        }
        if self.matches(TokenKind::Const) {
            return self.variable_declaration(Binding::Const);
        }
        if self.matches(TokenKind::Function) {
            return self.function_declaration();
        }
        self.expression_statement()
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expression = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        let location = expression.location;
        Ok(Stmt::new(StmtKind::Expression(expression), location))
    }

    fn block_statement(&mut self) -> ParseResult<Stmt> {
        let location = self.previous().location;
        let mut statements = Vec::new();

        while !self.check(TokenKind::RightBrace) && !self.at_end() {
            statements.push(self.statement()?);
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(Stmt::new(StmtKind::Block(statements), location))
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let location = self.previous().location;
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        // `else` binds to the nearest `if`.
        let else_branch = if self.matches(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            location,
        ))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let location = self.previous().location;
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::new(StmtKind::While { condition, body }, location))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let location = self.previous().location;
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::new(StmtKind::Return { value }, location))
    }

    fn variable_declaration(&mut self, binding: Binding) -> ParseResult<Stmt> {
        let location = self.previous().location;
        self.consume(TokenKind::Identifier, "Expect variable name.")?;
        let name = self.previous().lexeme.clone();

        let declared = if self.matches(TokenKind::Colon) {
            self.parse_type()?
        } else {
            DataType::Unknown
        };

        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::new(
            StmtKind::VarDecl {
                binding,
                name,
                declared,
                initializer,
            },
            location,
        ))
    }

    fn function_declaration(&mut self) -> ParseResult<Stmt> {
        self.consume(TokenKind::Identifier, "Expect function name.")?;
        let name = self.previous().lexeme.clone();
        let location = self.previous().location;

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.")?;
        let params = self.parameters()?;
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;

        let return_type = if self.matches(TokenKind::Colon) {
            self.parse_type()?
        } else {
            DataType::Void
        };

        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.")?;
        let body = Box::new(self.block_statement()?);

        Ok(Stmt::new(
            StmtKind::FuncDecl {
                name,
                return_type,
                params,
                body,
            },
            location,
        ))
    }

    fn parameters(&mut self) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();

        if !self.check(TokenKind::RightParen) {
            loop {
                self.consume(TokenKind::Identifier, "Expect parameter name.")?;
                let name = self.previous().lexeme.clone();

                self.consume(TokenKind::Colon, "Expect ':' after parameter name.")?;
                let ty = self.parse_type()?;

                params.push(Param { name, ty });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        Ok(params)
    }

    fn parse_type(&mut self) -> ParseResult<DataType> {
        self.consume(TokenKind::Identifier, "Expect type name.")?;
        let token = self.previous();
        match DataType::from_name(&token.lexeme) {
            Some(ty) => Ok(ty),
            None => Err(Diagnostic::error(
                format!("Unknown type: {}", token.lexeme),
                token.location,
            )),
        }
    }

    // ----------------------------------------------------------------
    // Expressions, lowest to highest precedence
    // ----------------------------------------------------------------

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.logical_or()?;

        if self.matches(TokenKind::Assign) {
            let location = self.previous().location;
            // Right-associative.
            let value = self.assignment()?;

            if let ExprKind::Variable { name } = &expr.kind {
                return Ok(Expr::new(
                    ExprKind::Assignment {
                        name: name.clone(),
                        value: Box::new(value),
                    },
                    location,
                ));
            }
            return Err(Diagnostic::error("Invalid assignment target", location));
        }

        Ok(expr)
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.logical_and()?;

        while self.matches(TokenKind::OrOr) {
            let location = self.previous().location;
            let right = self.logical_and()?;
            expr = binary(expr, OperatorType::Or, right, location);
        }

        Ok(expr)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.equality()?;

        while self.matches(TokenKind::AndAnd) {
            let location = self.previous().location;
            let right = self.equality()?;
            expr = binary(expr, OperatorType::And, right, location);
        }

        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.comparison()?;

        loop {
            let op = if self.matches(TokenKind::EqualEqual) {
                OperatorType::Eq
            } else if self.matches(TokenKind::NotEqual) {
                OperatorType::Ne
            } else {
                break;
            };
            let location = self.previous().location;
            let right = self.comparison()?;
            expr = binary(expr, op, right, location);
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.term()?;

        loop {
            let op = if self.matches(TokenKind::Less) {
                OperatorType::Lt
            } else if self.matches(TokenKind::LessEqual) {
                OperatorType::Le
            } else if self.matches(TokenKind::Greater) {
                OperatorType::Gt
            } else if self.matches(TokenKind::GreaterEqual) {
                OperatorType::Ge
            } else {
                break;
            };
            let location = self.previous().location;
            let right = self.term()?;
            expr = binary(expr, op, right, location);
        }

        Ok(expr)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut expr = self.factor()?;

        loop {
            let op = if self.matches(TokenKind::Plus) {
                OperatorType::Add
            } else if self.matches(TokenKind::Minus) {
                OperatorType::Sub
            } else {
                break;
            };
            let location = self.previous().location;
            let right = self.factor()?;
            expr = binary(expr, op, right, location);
        }

        Ok(expr)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut expr = self.unary()?;

        loop {
            let op = if self.matches(TokenKind::Star) {
                OperatorType::Mul
            } else if self.matches(TokenKind::Slash) {
                OperatorType::Div
            } else if self.matches(TokenKind::Percent) {
                OperatorType::Mod
            } else {
                break;
            };
            let location = self.previous().location;
            let right = self.unary()?;
            expr = binary(expr, op, right, location);
        }

        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = if self.matches(TokenKind::Not) {
            Some(OperatorType::Not)
        } else if self.matches(TokenKind::Minus) {
            Some(OperatorType::Sub)
        } else {
            None
        };

        if let Some(op) = op {
            let location = self.previous().location;
            let operand = self.unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                location,
            ));
        }

        self.primary()
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        if self.matches(TokenKind::False) {
            return Ok(self.literal("false", DataType::Bool));
        }
        if self.matches(TokenKind::True) {
            return Ok(self.literal("true", DataType::Bool));
        }
        if self.matches(TokenKind::Null) {
            return Ok(self.literal("null", DataType::Unknown));
        }
        if self.matches(TokenKind::Integer) {
            let value = self.previous().lexeme.clone();
            return Ok(self.literal(&value, DataType::Int));
        }
        if self.matches(TokenKind::Float) {
            let value = self.previous().lexeme.clone();
            return Ok(self.literal(&value, DataType::Float));
        }
        if self.matches(TokenKind::String) {
            let value = self.previous().lexeme.clone();
            return Ok(self.literal(&value, DataType::String));
        }

        if self.matches(TokenKind::Identifier) {
            let name = self.previous().lexeme.clone();
            let location = self.previous().location;

            if self.matches(TokenKind::LeftParen) {
                let arguments = self.arguments()?;
                self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
                return Ok(Expr::new(
                    ExprKind::Call {
                        callee: name,
                        arguments,
                    },
                    location,
                ));
            }

            return Ok(Expr::new(ExprKind::Variable { name }, location));
        }

        if self.matches(TokenKind::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
            return Ok(expr);
        }

        Err(self.error_at_current("Expect expression."))
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let mut arguments = Vec::new();

        if !self.check(TokenKind::RightParen) {
            loop {
                arguments.push(self.expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        Ok(arguments)
    }

    fn literal(&self, value: &str, ty: DataType) -> Expr {
        Expr::new(
            ExprKind::Literal {
                value: value.to_string(),
                ty,
            },
            self.previous().location,
        )
    }

    // ----------------------------------------------------------------
    // Cursor helpers and recovery
    // ----------------------------------------------------------------

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        !self.at_end() && self.peek().kind == kind
    }

    fn advance(&mut self) {
        if !self.at_end() {
            self.position += 1;
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> ParseResult<()> {
        if self.check(kind) {
            self.advance();
            return Ok(());
        }
        Err(self.error_at_current(message))
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.position - 1]
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn error_at_current(&self, message: &str) -> Diagnostic {
        let location = if self.at_end() && self.position > 0 {
            self.previous().location
        } else {
            self.peek().location
        };
        Diagnostic::error(message, location)
    }

    /// Skip tokens until a statement boundary: just past a `;`, or in
    /// front of a token that can begin a statement.
    fn synchronize(&mut self) {
        while !self.at_end() {
            if self.position > 0 && self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek().kind {
                TokenKind::Function
                | TokenKind::Var
                | TokenKind::Let
                | TokenKind::Const
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }
}

fn binary(left: Expr, op: OperatorType, right: Expr, location: SourceLocation) -> Expr {
    Expr::new(
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        location,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Program {
        parse(tokenize(source)).expect("parse should succeed")
    }

    fn parse_errors(source: &str) -> Vec<Diagnostic> {
        parse(tokenize(source)).expect_err("parse should fail")
    }

    fn only_expression(program: &Program) -> &Expr {
        match &program.statements[0].kind {
            StmtKind::Expression(expr) => expr,
            other => panic!("expected expression statement, found {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let program = parse_source("a + b * c;");
        let ExprKind::Binary { left, op, right } = &only_expression(&program).kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, OperatorType::Add);
        assert!(matches!(left.kind, ExprKind::Variable { .. }));
        assert!(
            matches!(&right.kind, ExprKind::Binary { op, .. } if *op == OperatorType::Mul),
            "right operand should be the multiplication"
        );
    }

    #[test]
    fn addition_is_left_associative_with_factors() {
        let program = parse_source("a * b + c;");
        let ExprKind::Binary { left, op, right } = &only_expression(&program).kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, OperatorType::Add);
        assert!(matches!(&left.kind, ExprKind::Binary { op, .. } if *op == OperatorType::Mul));
        assert!(matches!(right.kind, ExprKind::Variable { .. }));
    }

    #[test]
    fn unary_minus_binds_tighter_than_multiplication() {
        let program = parse_source("-a * b;");
        let ExprKind::Binary { left, op, .. } = &only_expression(&program).kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, OperatorType::Mul);
        assert!(matches!(&left.kind, ExprKind::Unary { op, .. } if *op == OperatorType::Sub));
    }

    #[test]
    fn assignment_is_right_associative() {
        let program = parse_source("a = b = 1;");
        let ExprKind::Assignment { name, value } = &only_expression(&program).kind else {
            panic!("expected assignment");
        };
        assert_eq!(name, "a");
        assert!(matches!(&value.kind, ExprKind::Assignment { name, .. } if name == "b"));
    }

    #[test]
    fn rejects_non_identifier_assignment_target() {
        let errors = parse_errors("1 = 2;");
        assert_eq!(errors[0].message, "Invalid assignment target");
    }

    #[test]
    fn parses_calls_in_primary_position() {
        let program = parse_source("f(1, x);");
        let ExprKind::Call { callee, arguments } = &only_expression(&program).kind else {
            panic!("expected call");
        };
        assert_eq!(callee, "f");
        assert_eq!(arguments.len(), 2);
    }

    #[test]
    fn parses_empty_argument_lists() {
        let program = parse_source("input();");
        let ExprKind::Call { arguments, .. } = &only_expression(&program).kind else {
            panic!("expected call");
        };
        assert!(arguments.is_empty());
    }

    #[test]
    fn else_binds_to_the_nearest_if() {
        let program = parse_source("if (a) if (b) x; else y;");
        let StmtKind::If {
            then_branch,
            else_branch,
            ..
        } = &program.statements[0].kind
        else {
            panic!("expected if statement");
        };
        assert!(else_branch.is_none(), "outer if must not own the else");
        let StmtKind::If {
            else_branch: inner_else,
            ..
        } = &then_branch.kind
        else {
            panic!("expected nested if");
        };
        assert!(inner_else.is_some(), "inner if owns the else");
    }

    #[test]
    fn parses_variable_declarations() {
        let program = parse_source("const limit: int = 10;");
        let StmtKind::VarDecl {
            binding,
            name,
            declared,
            initializer,
        } = &program.statements[0].kind
        else {
            panic!("expected declaration");
        };
        assert_eq!(*binding, Binding::Const);
        assert_eq!(name, "limit");
        assert_eq!(*declared, DataType::Int);
        assert!(initializer.is_some());
    }

    #[test]
    fn function_return_type_defaults_to_void() {
        let program = parse_source("function go(steps: int) { }");
        let StmtKind::FuncDecl {
            return_type,
            params,
            ..
        } = &program.statements[0].kind
        else {
            panic!("expected function declaration");
        };
        assert_eq!(*return_type, DataType::Void);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].ty, DataType::Int);
    }

    #[test]
    fn reports_unknown_type_names() {
        let errors = parse_errors("var x: quux = 1;");
        assert_eq!(errors[0].message, "Unknown type: quux");
    }

    #[test]
    fn recovers_at_statement_boundaries() {
        let errors = parse_errors("var = 1; var y = 2; let 3;");
        // Two bad declarations, one good one in between.
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "Expect variable name.");
        assert_eq!(errors[1].message, "Expect variable name.");
    }

    #[test]
    fn reports_missing_semicolon() {
        let errors = parse_errors("var x = 1 var y = 2;");
        assert_eq!(errors[0].message, "Expect ';' after variable declaration.");
    }

    #[test]
    fn missing_expression_is_reported_at_the_offending_token() {
        let errors = parse_errors("var x = ;");
        assert_eq!(errors[0].message, "Expect expression.");
        assert_eq!(errors[0].location.column, 9);
    }
}
