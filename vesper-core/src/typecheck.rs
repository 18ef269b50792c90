//! Semantic analysis: scope discipline and type checking.
//!
//! The analyzer walks the tree produced by the parser, resolves every
//! identifier against a stack of lexical scopes, writes the resolved type
//! into each expression node, and accumulates diagnostics instead of
//! stopping at the first fault. The traversal always completes, so one
//! run surfaces as many errors as possible; lowering only runs when the
//! returned list is empty.

use crate::ast::{Binding, Expr, ExprKind, Program, Stmt, StmtKind};
use crate::diagnostic::Diagnostic;
use crate::span::SourceLocation;
use crate::symbols::{Symbol, SymbolTable};
use crate::types::{self, DataType};

/// Analyze a program in place, annotating expression types.
pub fn analyze(program: &mut Program) -> Result<(), Vec<Diagnostic>> {
    let mut analyzer = Analyzer::new();
    analyzer.check_program(program);
    if analyzer.diagnostics.is_empty() {
        Ok(())
    } else {
        Err(analyzer.diagnostics)
    }
}

struct Analyzer {
    symbols: SymbolTable,
    diagnostics: Vec<Diagnostic>,
    in_function: bool,
    current_return_type: DataType,
}

impl Analyzer {
    fn new() -> Analyzer {
        Analyzer {
            symbols: SymbolTable::new(),
            diagnostics: Vec::new(),
            in_function: false,
            current_return_type: DataType::Void,
        }
    }

    fn error(&mut self, message: impl Into<String>, location: SourceLocation) {
        self.diagnostics.push(Diagnostic::error(message, location));
    }

    fn check_program(&mut self, program: &mut Program) {
        for statement in &mut program.statements {
            self.check_stmt(statement);
        }
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        let location = stmt.location;
        match &mut stmt.kind {
            StmtKind::Block(statements) => {
                self.symbols.enter_scope();
                for statement in statements {
                    self.check_stmt(statement);
                }
                self.symbols.exit_scope();
            }

            StmtKind::VarDecl {
                binding,
                name,
                declared,
                initializer,
            } => {
                let initializer_type = match initializer {
                    Some(expr) => self.check_expr(expr),
                    None => DataType::Unknown,
                };

                let mut declared_type = *declared;
                if declared_type == DataType::Unknown {
                    declared_type = initializer_type;
                } else if initializer_type != DataType::Unknown
                    && !types::compatible(initializer_type, declared_type)
                {
                    self.error(
                        format!("Cannot initialize {declared_type} with {initializer_type}"),
                        location,
                    );
                }
                // Lowering sizes the variable's slot from this field, so
                // the inferred type is written back into the tree.
                *declared = declared_type;

                if *binding == Binding::Const && initializer.is_none() {
                    self.error(format!("Constant requires an initializer: {name}"), location);
                }

                let symbol = if *binding == Binding::Const {
                    Symbol::constant(name.clone(), declared_type, location)
                } else {
                    Symbol::variable(name.clone(), declared_type, location)
                };
                if !self.symbols.insert(symbol) {
                    self.error(format!("Variable already declared: {name}"), location);
                }
            }

            StmtKind::FuncDecl {
                name,
                return_type,
                params,
                body,
            } => {
                let parameter_types = params.iter().map(|param| param.ty).collect();
                let symbol =
                    Symbol::function(name.clone(), parameter_types, *return_type, location);

                // Inserted before the body is checked so the function can
                // call itself.
                if !self.symbols.insert(symbol) {
                    self.error(format!("Function already declared: {name}"), location);
                    return;
                }

                self.symbols.enter_scope();
                let was_in_function = self.in_function;
                let was_return_type = self.current_return_type;
                self.in_function = true;
                self.current_return_type = *return_type;

                for param in params.iter() {
                    let param_symbol =
                        Symbol::variable(param.name.clone(), param.ty, location);
                    if !self.symbols.insert(param_symbol) {
                        self.error(
                            format!("Parameter already declared: {}", param.name),
                            location,
                        );
                    }
                }

                self.check_stmt(body);

                self.in_function = was_in_function;
                self.current_return_type = was_return_type;
                self.symbols.exit_scope();
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition_location = condition.location;
                let condition_type = self.check_expr(condition);
                if condition_type != DataType::Bool {
                    self.error("If condition must be boolean", condition_location);
                }

                self.check_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch);
                }
            }

            StmtKind::While { condition, body } => {
                let condition_location = condition.location;
                let condition_type = self.check_expr(condition);
                if condition_type != DataType::Bool {
                    self.error("While condition must be boolean", condition_location);
                }

                self.check_stmt(body);
            }

            StmtKind::Return { value } => {
                if !self.in_function {
                    self.error("Return statement outside function", location);
                    return;
                }

                let return_type = match value {
                    Some(expr) => self.check_expr(expr),
                    None => DataType::Void,
                };
                if !types::compatible(return_type, self.current_return_type) {
                    self.error("Return type mismatch", location);
                }
            }

            StmtKind::Expression(expr) => {
                self.check_expr(expr);
            }
        }
    }

    /// Resolve the type of an expression, record it on the node, and
    /// return it. An unresolved expression yields `Unknown`, which the
    /// compatibility rule tolerates so one fault does not cascade.
    fn check_expr(&mut self, expr: &mut Expr) -> DataType {
        let location = expr.location;
        let ty = match &mut expr.kind {
            ExprKind::Literal { ty, .. } => *ty,

            ExprKind::Variable { name } => match self.symbols.lookup(name) {
                Some(symbol) => symbol.ty,
                None => {
                    let message = format!("Undefined variable: {name}");
                    self.error(message, location);
                    DataType::Unknown
                }
            },

            ExprKind::Binary { left, op, right } => {
                let op = *op;
                let left_type = self.check_expr(left);
                let right_type = self.check_expr(right);

                let result = types::binary_result_type(op, left_type, right_type);
                if result == DataType::Unknown {
                    self.error(
                        format!("Invalid operation between types {left_type} and {right_type}"),
                        location,
                    );
                }
                result
            }

            ExprKind::Unary { op, operand } => {
                let op = *op;
                let operand_type = self.check_expr(operand);

                let result = types::unary_result_type(op, operand_type);
                if result == DataType::Unknown {
                    self.error(
                        format!("Invalid unary operation on type {operand_type}"),
                        location,
                    );
                }
                result
            }

            ExprKind::Assignment { name, value } => {
                let name = name.clone();
                let value_type = self.check_expr(value);

                match self.symbols.lookup(&name) {
                    None => {
                        self.error(format!("Undefined variable: {name}"), location);
                        DataType::Unknown
                    }
                    Some(symbol) => {
                        let symbol_type = symbol.ty;
                        let is_constant = symbol.is_constant;
                        if is_constant {
                            self.error(format!("Cannot assign to constant: {name}"), location);
                        } else if !types::compatible(value_type, symbol_type) {
                            self.error(
                                format!(
                                    "Cannot assign {value_type} to variable of type {symbol_type}"
                                ),
                                location,
                            );
                        }
                        symbol_type
                    }
                }
            }

            ExprKind::Call { callee, arguments } => {
                let callee = callee.clone();
                let signature = match self.symbols.lookup(&callee) {
                    Some(symbol) if symbol.is_function => {
                        Some((symbol.parameter_types.clone(), symbol.return_type))
                    }
                    _ => None,
                };

                match signature {
                    None => {
                        self.error(format!("Undefined function: {callee}"), location);
                        DataType::Unknown
                    }
                    Some((parameter_types, return_type)) => {
                        if arguments.len() != parameter_types.len() {
                            self.error(
                                format!(
                                    "Function {callee} expects {} arguments, got {}",
                                    parameter_types.len(),
                                    arguments.len()
                                ),
                                location,
                            );
                            DataType::Unknown
                        } else {
                            for (index, (argument, parameter_type)) in
                                arguments.iter_mut().zip(&parameter_types).enumerate()
                            {
                                let argument_type = self.check_expr(argument);
                                if !types::compatible(argument_type, *parameter_type) {
                                    self.error(
                                        format!("Argument {} type mismatch", index + 1),
                                        location,
                                    );
                                }
                            }
                            return_type
                        }
                    }
                }
            }
        };

        expr.ty = ty;
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn analyze_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
        let mut program = parse(tokenize(source)).expect("parse should succeed");
        analyze(&mut program)?;
        Ok(program)
    }

    fn first_error(source: &str) -> Diagnostic {
        analyze_source(source)
            .expect_err("analysis should fail")
            .remove(0)
    }

    fn assert_all_typed(expr: &Expr) {
        assert_ne!(expr.ty, DataType::Unknown, "untyped expression: {expr:?}");
        match &expr.kind {
            ExprKind::Binary { left, right, .. } => {
                assert_all_typed(left);
                assert_all_typed(right);
            }
            ExprKind::Unary { operand, .. } => assert_all_typed(operand),
            ExprKind::Assignment { value, .. } => assert_all_typed(value),
            ExprKind::Call { arguments, .. } => {
                for argument in arguments {
                    assert_all_typed(argument);
                }
            }
            ExprKind::Literal { .. } | ExprKind::Variable { .. } => {}
        }
    }

    fn walk_expressions(stmt: &Stmt, visit: &mut impl FnMut(&Expr)) {
        match &stmt.kind {
            StmtKind::Block(statements) => {
                for statement in statements {
                    walk_expressions(statement, visit);
                }
            }
            StmtKind::VarDecl { initializer, .. } => {
                if let Some(expr) = initializer {
                    visit(expr);
                }
            }
            StmtKind::FuncDecl { body, .. } => walk_expressions(body, visit),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                visit(condition);
                walk_expressions(then_branch, visit);
                if let Some(else_branch) = else_branch {
                    walk_expressions(else_branch, visit);
                }
            }
            StmtKind::While { condition, body } => {
                visit(condition);
                walk_expressions(body, visit);
            }
            StmtKind::Return { value } => {
                if let Some(expr) = value {
                    visit(expr);
                }
            }
            StmtKind::Expression(expr) => visit(expr),
        }
    }

    #[test]
    fn declares_and_types_a_variable() {
        let program = analyze_source("var x: int = 42;").expect("analysis should succeed");
        let StmtKind::VarDecl { initializer, .. } = &program.statements[0].kind else {
            panic!("expected declaration");
        };
        assert_eq!(initializer.as_ref().map(|e| e.ty), Some(DataType::Int));
    }

    #[test]
    fn every_expression_is_resolved_after_analysis() {
        let source = "\
            var total: int = 0;\n\
            function weigh(a: int, b: float): float { return a * b + 1.5; }\n\
            while (total < 10) { total = total + 2; }\n\
            var w: float = weigh(total, 0.5);\n";
        let program = analyze_source(source).expect("analysis should succeed");
        for statement in &program.statements {
            walk_expressions(statement, &mut |expr| assert_all_typed(expr));
        }
    }

    #[test]
    fn int_and_float_are_mutually_assignable() {
        analyze_source("var x: int = 1; x = 2.5;").expect("analysis should succeed");
        analyze_source("var y: float = 3;").expect("analysis should succeed");
    }

    #[test]
    fn rejects_cross_type_assignment() {
        let error = first_error("var x: int = 1; x = \"oops\";");
        assert_eq!(error.message, "Cannot assign string to variable of type int");
    }

    #[test]
    fn rejects_non_boolean_if_condition() {
        let error = first_error("if (1) { }");
        assert_eq!(error.message, "If condition must be boolean");
        assert_eq!(error.location.column, 5);
    }

    #[test]
    fn rejects_non_boolean_while_condition() {
        let error = first_error("while (\"x\") { }");
        assert_eq!(error.message, "While condition must be boolean");
    }

    #[test]
    fn bare_return_is_incompatible_with_int() {
        let error = first_error("function f(): int { return; }");
        assert_eq!(error.message, "Return type mismatch");
    }

    #[test]
    fn rejects_return_outside_functions() {
        let error = first_error("return 0;");
        assert_eq!(error.message, "Return statement outside function");
    }

    #[test]
    fn rejects_undefined_names() {
        let error = first_error("ghost;");
        assert_eq!(error.message, "Undefined variable: ghost");
    }

    #[test]
    fn rejects_redeclaration_in_the_same_scope() {
        let error = first_error("var x = 1; var x = 2;");
        assert_eq!(error.message, "Variable already declared: x");
    }

    #[test]
    fn allows_shadowing_in_nested_scopes() {
        analyze_source("var x = 1; { var x = true; }").expect("analysis should succeed");
    }

    #[test]
    fn rejects_arity_mismatch() {
        let error = first_error("sqrt(1.0, 2.0);");
        assert_eq!(error.message, "Function sqrt expects 1 arguments, got 2");
    }

    #[test]
    fn rejects_incompatible_arguments() {
        let error = first_error("print(42);");
        assert_eq!(error.message, "Argument 1 type mismatch");
    }

    #[test]
    fn rejects_calls_to_non_functions() {
        let error = first_error("var x = 1; x(2);");
        assert_eq!(error.message, "Undefined function: x");
    }

    #[test]
    fn functions_may_recurse() {
        analyze_source(
            "function fact(n: int): int { if (n <= 1) { return 1; } return n * fact(n - 1); }",
        )
        .expect("analysis should succeed");
    }

    #[test]
    fn rejects_assignment_to_constants() {
        let error = first_error("const limit = 10; limit = 11;");
        assert_eq!(error.message, "Cannot assign to constant: limit");
    }

    #[test]
    fn constants_require_an_initializer() {
        let error = first_error("const limit: int;");
        assert_eq!(error.message, "Constant requires an initializer: limit");
    }

    #[test]
    fn rejects_logical_operators_on_numbers() {
        let error = first_error("var x = 1 && 2;");
        assert_eq!(error.message, "Invalid operation between types int and int");
    }

    #[test]
    fn rejects_unary_not_on_numbers() {
        let error = first_error("var x = !3;");
        assert_eq!(error.message, "Invalid unary operation on type int");
    }

    #[test]
    fn reports_every_error_in_one_pass() {
        let errors = analyze_source("if (1) { } ghost; return 2;")
            .expect_err("analysis should fail");
        assert_eq!(errors.len(), 3);
    }
}
