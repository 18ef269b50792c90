//! Lowering of the typed tree into the basic-block IR.
//!
//! Every declared variable and parameter becomes a stack slot allocated
//! in the entry block of its function; reads load, writes store. The
//! slot map is a scope stack, pushed per block and per function body, so
//! sibling scopes never alias and nothing leaks between functions.
//! Top-level statements are wrapped into an implicit `main` returning 0.
//!
//! The lowerer runs only over semantically valid programs; anything it
//! still cannot resolve is reported as an internal lowering error.

use std::collections::HashMap;

use crate::ast::{Expr, ExprKind, Param, Program, Stmt, StmtKind};
use crate::diagnostic::Diagnostic;
use crate::ir::{
    BinOp, BlockId, FloatPredicate, FuncId, IntPredicate, IrBuilder, IrError, IrType, Module, Value,
};
use crate::span::SourceLocation;
use crate::types::{DataType, OperatorType};

type LowerResult<T> = Result<T, Diagnostic>;

/// Lower a semantically valid program into a fresh IR module.
pub fn lower(program: &Program, module_name: &str) -> Result<Module, Vec<Diagnostic>> {
    let mut lowerer = Lowerer::new(module_name);
    match lowerer.lower_program(program) {
        Ok(()) => Ok(lowerer.builder.finish()),
        Err(diagnostic) => Err(vec![diagnostic]),
    }
}

/// IR mapping of a source-level type.
fn lowered_type(ty: DataType) -> IrType {
    match ty {
        DataType::Void => IrType::Void,
        DataType::Int => IrType::I32,
        DataType::Float => IrType::F64,
        DataType::Bool => IrType::I1,
        // Arrays and first-class functions are provisionally pointers.
        DataType::String | DataType::Array | DataType::Function | DataType::Unknown => IrType::Ptr,
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    ptr: Value,
    ty: IrType,
}

struct Lowerer {
    builder: IrBuilder,
    scopes: Vec<HashMap<String, Slot>>,
    current_function: Option<FuncId>,
    current_return_type: IrType,
    loop_headers: Vec<BlockId>,
    loop_exits: Vec<BlockId>,
}

impl Lowerer {
    fn new(module_name: &str) -> Lowerer {
        Lowerer {
            builder: IrBuilder::new(Module::new(module_name)),
            scopes: Vec::new(),
            current_function: None,
            current_return_type: IrType::Void,
            loop_headers: Vec::new(),
            loop_exits: Vec::new(),
        }
    }

    fn lower_program(&mut self, program: &Program) -> LowerResult<()> {
        self.declare_builtins();

        let mut top_level = Vec::new();
        for statement in &program.statements {
            match &statement.kind {
                StmtKind::FuncDecl {
                    name,
                    return_type,
                    params,
                    body,
                } => self.lower_function(name, *return_type, params, body, statement.location)?,
                _ => top_level.push(statement),
            }
        }

        if !top_level.is_empty() {
            self.lower_implicit_main(&top_level)?;
        }

        Ok(())
    }

    /// The runtime library supplies these symbols; the declarations
    /// mirror the signatures the semantic analyzer registers.
    fn declare_builtins(&mut self) {
        self.builder
            .add_function("print", IrType::Void, vec![IrType::Ptr], false);
        self.builder
            .add_function("input", IrType::Ptr, Vec::new(), false);
        self.builder
            .add_function("sqrt", IrType::F64, vec![IrType::F64], false);
    }

    fn lower_implicit_main(&mut self, statements: &[&Stmt]) -> LowerResult<()> {
        let location = statements[0].location;
        if self.builder.module().function("main").is_some() {
            return Err(Diagnostic::error(
                "Function 'main' conflicts with top-level statements",
                location,
            ));
        }

        let function = self
            .builder
            .add_function("main", IrType::I32, Vec::new(), false);
        let entry = self.builder.create_block(function, "entry");
        self.builder.position_at_end(function, entry);

        self.current_function = Some(function);
        self.current_return_type = IrType::I32;
        self.scopes.push(HashMap::new());

        let mut result = Ok(());
        for statement in statements {
            if self.builder.block_terminated() {
                break;
            }
            result = self.lower_stmt(statement);
            if result.is_err() {
                break;
            }
        }
        self.scopes.pop();
        result?;

        if !self.builder.block_terminated() {
            let zero = self.builder.const_int(0);
            self.builder
                .build_ret(Some(zero))
                .map_err(|error| internal(location, error))?;
        }
        self.current_function = None;
        Ok(())
    }

    fn lower_function(
        &mut self,
        name: &str,
        return_type: DataType,
        params: &[Param],
        body: &Stmt,
        location: SourceLocation,
    ) -> LowerResult<()> {
        let param_types: Vec<IrType> = params.iter().map(|param| lowered_type(param.ty)).collect();
        let lowered_return = lowered_type(return_type);

        let function =
            self.builder
                .add_function(name, lowered_return, param_types.clone(), false);
        let entry = self.builder.create_block(function, "entry");
        self.builder.position_at_end(function, entry);

        let saved_function = self.current_function;
        let saved_return = self.current_return_type;
        // A fresh slot stack: slots of the enclosing function must not be
        // visible inside this body.
        let saved_scopes = std::mem::take(&mut self.scopes);
        self.current_function = Some(function);
        self.current_return_type = lowered_return;
        self.scopes.push(HashMap::new());

        let result = self.lower_function_body(params, &param_types, body, location);

        self.scopes = saved_scopes;
        self.current_function = saved_function;
        self.current_return_type = saved_return;
        result
    }

    fn lower_function_body(
        &mut self,
        params: &[Param],
        param_types: &[IrType],
        body: &Stmt,
        location: SourceLocation,
    ) -> LowerResult<()> {
        for (index, (param, ty)) in params.iter().zip(param_types).enumerate() {
            let slot = self
                .builder
                .build_alloca(*ty, &param.name)
                .map_err(|error| internal(location, error))?;
            let formal = self.builder.param(index as u32, *ty);
            self.builder
                .build_store(formal, slot)
                .map_err(|error| internal(location, error))?;
            self.declare_slot(&param.name, Slot { ptr: slot, ty: *ty });
        }

        self.lower_stmt(body)?;

        if !self.builder.block_terminated() {
            let value = match self.current_return_type {
                IrType::Void => None,
                // Fall through on a path without an explicit return: the
                // function yields the zero of its return type.
                ty => Some(self.zero_value(ty)),
            };
            self.builder
                .build_ret(value)
                .map_err(|error| internal(location, error))?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> LowerResult<()> {
        let location = stmt.location;
        match &stmt.kind {
            StmtKind::Block(statements) => {
                self.scopes.push(HashMap::new());
                let result = self.lower_statements(statements);
                self.scopes.pop();
                result
            }

            StmtKind::VarDecl {
                name,
                declared,
                initializer,
                ..
            } => {
                let ty = lowered_type(*declared);
                let slot_ptr = self
                    .builder
                    .build_alloca(ty, name)
                    .map_err(|error| internal(location, error))?;
                let slot = Slot { ptr: slot_ptr, ty };
                self.declare_slot(name, slot);

                if let Some(initializer) = initializer {
                    let value = self.lower_expr(initializer)?;
                    let value = self.coerce(value, ty, location)?;
                    self.builder
                        .build_store(value, slot_ptr)
                        .map_err(|error| internal(location, error))?;
                }
                Ok(())
            }

            StmtKind::FuncDecl {
                name,
                return_type,
                params,
                body,
            } => {
                let saved_point = self.builder.insertion_point();
                self.lower_function(name, *return_type, params, body, location)?;
                if let Some((function, block)) = saved_point {
                    self.builder.position_at_end(function, block);
                }
                Ok(())
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition_value = self.lower_expr(condition)?;
                let function = self.enclosing_function(location)?;

                let then_block = self.builder.create_block(function, "then");
                let else_block = self.builder.create_block(function, "else");
                let merge_block = self.builder.create_block(function, "ifcont");

                self.builder
                    .build_cond_br(condition_value, then_block, else_block)
                    .map_err(|error| internal(location, error))?;

                self.builder.position_at_end(function, then_block);
                self.lower_stmt(then_branch)?;
                if !self.builder.block_terminated() {
                    self.builder
                        .build_br(merge_block)
                        .map_err(|error| internal(location, error))?;
                }

                // The else block exists even without an else arm; it then
                // only branches to the merge block.
                self.builder.position_at_end(function, else_block);
                if let Some(else_branch) = else_branch {
                    self.lower_stmt(else_branch)?;
                }
                if !self.builder.block_terminated() {
                    self.builder
                        .build_br(merge_block)
                        .map_err(|error| internal(location, error))?;
                }

                self.builder.position_at_end(function, merge_block);
                Ok(())
            }

            StmtKind::While { condition, body } => {
                let function = self.enclosing_function(location)?;

                let header_block = self.builder.create_block(function, "loop");
                let body_block = self.builder.create_block(function, "loop_body");
                let after_block = self.builder.create_block(function, "loop_end");

                self.builder
                    .build_br(header_block)
                    .map_err(|error| internal(location, error))?;

                self.builder.position_at_end(function, header_block);
                let condition_value = self.lower_expr(condition)?;
                self.builder
                    .build_cond_br(condition_value, body_block, after_block)
                    .map_err(|error| internal(location, error))?;

                // Break/continue targets for when the language grows them.
                self.loop_headers.push(header_block);
                self.loop_exits.push(after_block);

                self.builder.position_at_end(function, body_block);
                let body_result = self.lower_stmt(body);
                if body_result.is_ok() && !self.builder.block_terminated() {
                    self.builder
                        .build_br(header_block)
                        .map_err(|error| internal(location, error))?;
                }

                self.loop_headers.pop();
                self.loop_exits.pop();
                debug_assert_eq!(self.loop_headers.len(), self.loop_exits.len());
                body_result?;

                self.builder.position_at_end(function, after_block);
                Ok(())
            }

            StmtKind::Return { value } => {
                let return_value = match value {
                    Some(expr) => {
                        let value = self.lower_expr(expr)?;
                        Some(self.coerce(value, self.current_return_type, location)?)
                    }
                    None => None,
                };
                self.builder
                    .build_ret(return_value)
                    .map_err(|error| internal(location, error))
            }

            StmtKind::Expression(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
        }
    }

    /// Lower the statements of one block, stopping after a terminator:
    /// nothing may follow a `ret` or branch in the same basic block.
    fn lower_statements(&mut self, statements: &[Stmt]) -> LowerResult<()> {
        for statement in statements {
            if self.builder.block_terminated() {
                break;
            }
            self.lower_stmt(statement)?;
        }
        Ok(())
    }

    fn lower_expr(&mut self, expr: &Expr) -> LowerResult<Value> {
        let location = expr.location;
        match &expr.kind {
            ExprKind::Literal { value, ty } => match ty {
                DataType::Int => {
                    let parsed: i32 = value.parse().map_err(|_| {
                        Diagnostic::error(format!("Integer literal out of range: {value}"), location)
                    })?;
                    Ok(self.builder.const_int(i64::from(parsed)))
                }
                DataType::Float => {
                    let parsed: f64 = value.parse().map_err(|_| {
                        Diagnostic::error(format!("Invalid float literal: {value}"), location)
                    })?;
                    Ok(self.builder.const_float(parsed))
                }
                DataType::Bool => Ok(self.builder.const_bool(value == "true")),
                DataType::String => Ok(self.builder.global_string_ptr(value)),
                _ => Err(Diagnostic::error("Unsupported literal type", location)),
            },

            ExprKind::Variable { name } => {
                let slot = self.resolve_slot(name, location)?;
                self.builder
                    .build_load(slot.ty, slot.ptr)
                    .map_err(|error| internal(location, error))
            }

            ExprKind::Assignment { name, value } => {
                let value = self.lower_expr(value)?;
                let slot = self.resolve_slot(name, location)?;
                let stored = self.coerce(value, slot.ty, location)?;
                self.builder
                    .build_store(stored, slot.ptr)
                    .map_err(|error| internal(location, error))?;
                Ok(stored)
            }

            ExprKind::Unary { op, operand } => {
                let operand = self.lower_expr(operand)?;
                let result = match (op, operand.ty) {
                    (OperatorType::Sub, IrType::F64) => self.builder.build_fneg(operand),
                    (OperatorType::Sub, IrType::I32) => self.builder.build_neg(operand),
                    (OperatorType::Not, IrType::I1) => self.builder.build_not(operand),
                    _ => {
                        return Err(Diagnostic::error("Unsupported unary operation", location));
                    }
                };
                result.map_err(|error| internal(location, error))
            }

            ExprKind::Binary { left, op, right } => {
                let lhs = self.lower_expr(left)?;
                let rhs = self.lower_expr(right)?;
                self.lower_binary(*op, lhs, rhs, location)
            }

            ExprKind::Call { callee, arguments } => {
                let param_types = match self.builder.module().function(callee) {
                    Some(function) => function.param_types.clone(),
                    None => {
                        return Err(Diagnostic::error(
                            format!("Undefined function: {callee}"),
                            location,
                        ));
                    }
                };

                let mut args = Vec::with_capacity(arguments.len());
                for (argument, param_type) in arguments.iter().zip(&param_types) {
                    let value = self.lower_expr(argument)?;
                    args.push(self.coerce(value, *param_type, location)?);
                }

                let result = self
                    .builder
                    .build_call(callee, args)
                    .map_err(|error| internal(location, error))?;
                Ok(result.unwrap_or_else(|| self.builder.void_value()))
            }
        }
    }

    /// Pick the integer or floating opcode from the operand IR types,
    /// promoting a mixed int/float pair to float first.
    fn lower_binary(
        &mut self,
        op: OperatorType,
        lhs: Value,
        rhs: Value,
        location: SourceLocation,
    ) -> LowerResult<Value> {
        use OperatorType::*;

        let both_int = lhs.ty == IrType::I32 && rhs.ty == IrType::I32;
        let numeric = |ty: IrType| matches!(ty, IrType::I32 | IrType::F64);
        let as_float = numeric(lhs.ty) && numeric(rhs.ty) && !both_int;

        let result = match op {
            Add | Sub | Mul | Div | Mod => {
                if both_int {
                    let op = match op {
                        Add => BinOp::Add,
                        Sub => BinOp::Sub,
                        Mul => BinOp::Mul,
                        Div => BinOp::SDiv,
                        _ => BinOp::SRem,
                    };
                    self.builder.build_binary(op, lhs, rhs)
                } else if as_float {
                    let lhs = self.coerce(lhs, IrType::F64, location)?;
                    let rhs = self.coerce(rhs, IrType::F64, location)?;
                    let op = match op {
                        Add => BinOp::FAdd,
                        Sub => BinOp::FSub,
                        Mul => BinOp::FMul,
                        Div => BinOp::FDiv,
                        _ => BinOp::FRem,
                    };
                    self.builder.build_binary(op, lhs, rhs)
                } else {
                    return Err(Diagnostic::error("Unsupported binary operation", location));
                }
            }

            Eq | Ne | Lt | Le | Gt | Ge => {
                if both_int {
                    self.builder.build_icmp(int_predicate(op), lhs, rhs)
                } else if as_float {
                    let lhs = self.coerce(lhs, IrType::F64, location)?;
                    let rhs = self.coerce(rhs, IrType::F64, location)?;
                    self.builder.build_fcmp(float_predicate(op), lhs, rhs)
                } else if lhs.ty == rhs.ty && matches!(op, Eq | Ne) {
                    // Equality on booleans and pointers stays integral.
                    self.builder.build_icmp(int_predicate(op), lhs, rhs)
                } else {
                    return Err(Diagnostic::error("Unsupported binary operation", location));
                }
            }

            And | Or => {
                if lhs.ty == IrType::I1 && rhs.ty == IrType::I1 {
                    let op = if op == And { BinOp::And } else { BinOp::Or };
                    self.builder.build_binary(op, lhs, rhs)
                } else {
                    return Err(Diagnostic::error("Unsupported binary operation", location));
                }
            }

            Not | Assign => {
                return Err(Diagnostic::error("Unsupported binary operation", location));
            }
        };

        result.map_err(|error| internal(location, error))
    }

    /// Insert the numeric conversion the `int` <-> `float` compatibility
    /// rule implies; other type pairs pass through unchanged.
    fn coerce(&mut self, value: Value, target: IrType, location: SourceLocation) -> LowerResult<Value> {
        let converted = match (value.ty, target) {
            (IrType::I32, IrType::F64) => self.builder.build_sitofp(value),
            (IrType::F64, IrType::I32) => self.builder.build_fptosi(value),
            _ => return Ok(value),
        };
        converted.map_err(|error| internal(location, error))
    }

    fn zero_value(&self, ty: IrType) -> Value {
        match ty {
            IrType::F64 => self.builder.const_float(0.0),
            IrType::I1 => self.builder.const_bool(false),
            IrType::Ptr => self.builder.const_null(),
            _ => self.builder.const_int(0),
        }
    }

    fn declare_slot(&mut self, name: &str, slot: Slot) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    fn resolve_slot(&self, name: &str, location: SourceLocation) -> LowerResult<Slot> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .copied()
            .ok_or_else(|| Diagnostic::error(format!("Undefined variable: {name}"), location))
    }

    fn enclosing_function(&self, location: SourceLocation) -> LowerResult<FuncId> {
        self.current_function
            .ok_or_else(|| Diagnostic::error("No enclosing function", location))
    }
}

fn int_predicate(op: OperatorType) -> IntPredicate {
    match op {
        OperatorType::Eq => IntPredicate::Eq,
        OperatorType::Ne => IntPredicate::Ne,
        OperatorType::Lt => IntPredicate::Slt,
        OperatorType::Le => IntPredicate::Sle,
        OperatorType::Gt => IntPredicate::Sgt,
        _ => IntPredicate::Sge,
    }
}

fn float_predicate(op: OperatorType) -> FloatPredicate {
    match op {
        OperatorType::Eq => FloatPredicate::Oeq,
        OperatorType::Ne => FloatPredicate::One,
        OperatorType::Lt => FloatPredicate::Olt,
        OperatorType::Le => FloatPredicate::Ole,
        OperatorType::Gt => FloatPredicate::Ogt,
        _ => FloatPredicate::Oge,
    }
}

fn internal(location: SourceLocation, error: IrError) -> Diagnostic {
    Diagnostic::error(error.to_string(), location)
}
