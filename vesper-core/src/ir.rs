//! Basic-block intermediate representation and its builder.
//!
//! The lowerer drives a stateful [`IrBuilder`] positioned at one basic
//! block at a time: values are produced by instructions, variables live
//! in stack slots created by `alloca`, and control flow leaves a block
//! only through its single terminator. The builder refuses to append
//! past a terminator, so a finished [`Module`] never contains dead
//! instructions after one.
//!
//! The module can be printed as textual IR. Object and assembly emission
//! belong to a backend that consumes [`Module`]; nothing here knows
//! about optimization or target machines.

use std::fmt;

use thiserror::Error;

/// The IR-level type of a value or slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrType {
    Void,
    I1,
    I32,
    F64,
    Ptr,
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IrType::Void => "void",
            IrType::I1 => "i1",
            IrType::I32 => "i32",
            IrType::F64 => "double",
            IrType::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// Result of an instruction, numbered per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstId(u32);

/// A basic block inside its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(usize);

/// An interned module-level string constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrId(usize);

/// A function inside its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncId(usize);

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueKind {
    ConstInt(i64),
    ConstFloat(f64),
    ConstBool(bool),
    NullPtr,
    Str(StrId),
    Param(u32),
    Inst(InstId),
}

/// A typed operand: a constant, a formal parameter, or the result of an
/// earlier instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value {
    pub ty: IrType,
    kind: ValueKind,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ValueKind::ConstInt(value) => write!(f, "{value}"),
            ValueKind::ConstFloat(value) => write!(f, "{value:?}"),
            ValueKind::ConstBool(value) => write!(f, "{}", value as u8),
            ValueKind::NullPtr => f.write_str("null"),
            ValueKind::Str(StrId(index)) => write!(f, "@.str.{index}"),
            ValueKind::Param(index) => write!(f, "%p{index}"),
            ValueKind::Inst(InstId(index)) => write!(f, "%t{index}"),
        }
    }
}

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
}

impl BinOp {
    fn is_float(self) -> bool {
        matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
            BinOp::And => "and",
            BinOp::Or => "or",
        };
        f.write_str(name)
    }
}

/// Signed integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
        };
        f.write_str(name)
    }
}

/// Ordered floating-point comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

impl fmt::Display for FloatPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::One => "one",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Alloca {
        result: InstId,
        name: String,
        ty: IrType,
    },
    Load {
        result: InstId,
        ty: IrType,
        slot: Value,
    },
    Store {
        value: Value,
        slot: Value,
    },
    Binary {
        result: InstId,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },
    ICmp {
        result: InstId,
        predicate: IntPredicate,
        lhs: Value,
        rhs: Value,
    },
    FCmp {
        result: InstId,
        predicate: FloatPredicate,
        lhs: Value,
        rhs: Value,
    },
    Not {
        result: InstId,
        operand: Value,
    },
    Neg {
        result: InstId,
        operand: Value,
    },
    FNeg {
        result: InstId,
        operand: Value,
    },
    SiToFp {
        result: InstId,
        operand: Value,
    },
    FpToSi {
        result: InstId,
        operand: Value,
    },
    Call {
        result: Option<InstId>,
        callee: String,
        return_type: IrType,
        args: Vec<Value>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        condition: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret {
        value: Option<Value>,
    },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Br { .. } | Instruction::CondBr { .. } | Instruction::Ret { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|inst| inst.is_terminator())
    }
}

/// A function: an external declaration when it has no blocks, a
/// definition otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub return_type: IrType,
    pub param_types: Vec<IrType>,
    pub is_variadic: bool,
    pub blocks: Vec<BasicBlock>,
    next_temp: u32,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A compilation unit: named functions plus interned string constants.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    strings: Vec<String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            functions: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        return_type: IrType,
        param_types: Vec<IrType>,
        is_variadic: bool,
    ) -> FuncId {
        self.functions.push(Function {
            name: name.into(),
            return_type,
            param_types,
            is_variadic,
            blocks: Vec::new(),
            next_temp: 0,
        });
        FuncId(self.functions.len() - 1)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn function_id(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|function| function.name == name)
            .map(FuncId)
    }

    pub fn intern_string(&mut self, text: &str) -> StrId {
        if let Some(index) = self.strings.iter().position(|existing| existing == text) {
            return StrId(index);
        }
        self.strings.push(text.to_string());
        StrId(self.strings.len() - 1)
    }
}

/// Builder misuse surfaced to the lowerer as an internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("no insertion point is set")]
    NoInsertionPoint,
    #[error("basic block '{0}' is already terminated")]
    BlockTerminated(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Stateful construction interface over a [`Module`].
///
/// The builder owns the module while it is being populated; callers
/// position it at the end of a block and emit instructions there.
#[derive(Debug)]
pub struct IrBuilder {
    module: Module,
    position: Option<(FuncId, BlockId)>,
}

impl IrBuilder {
    pub fn new(module: Module) -> IrBuilder {
        IrBuilder {
            module,
            position: None,
        }
    }

    pub fn finish(self) -> Module {
        self.module
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        return_type: IrType,
        param_types: Vec<IrType>,
        is_variadic: bool,
    ) -> FuncId {
        self.module
            .add_function(name, return_type, param_types, is_variadic)
    }

    /// Append a block to `function`. Names are uniqued within the
    /// function so the printed IR stays unambiguous.
    pub fn create_block(&mut self, function: FuncId, name: &str) -> BlockId {
        let blocks = &mut self.module.functions[function.0].blocks;

        let mut unique = name.to_string();
        let mut suffix = 0;
        while blocks.iter().any(|block| block.name == unique) {
            suffix += 1;
            unique = format!("{name}{suffix}");
        }

        blocks.push(BasicBlock {
            name: unique,
            instructions: Vec::new(),
        });
        BlockId(blocks.len() - 1)
    }

    pub fn position_at_end(&mut self, function: FuncId, block: BlockId) {
        self.position = Some((function, block));
    }

    pub fn insertion_point(&self) -> Option<(FuncId, BlockId)> {
        self.position
    }

    /// The terminator of the current block, if the block has one.
    pub fn terminator(&self) -> Option<&Instruction> {
        let (function, block) = self.position?;
        self.module.functions[function.0].blocks[block.0].terminator()
    }

    pub fn block_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    // ----------------------------------------------------------------
    // Constants
    // ----------------------------------------------------------------

    pub fn const_int(&self, value: i64) -> Value {
        Value {
            ty: IrType::I32,
            kind: ValueKind::ConstInt(value),
        }
    }

    pub fn const_float(&self, value: f64) -> Value {
        Value {
            ty: IrType::F64,
            kind: ValueKind::ConstFloat(value),
        }
    }

    pub fn const_bool(&self, value: bool) -> Value {
        Value {
            ty: IrType::I1,
            kind: ValueKind::ConstBool(value),
        }
    }

    pub fn const_null(&self) -> Value {
        Value {
            ty: IrType::Ptr,
            kind: ValueKind::NullPtr,
        }
    }

    /// The `index`-th formal parameter of the enclosing function.
    pub fn param(&self, index: u32, ty: IrType) -> Value {
        Value {
            ty,
            kind: ValueKind::Param(index),
        }
    }

    /// Placeholder result of a void call used in expression position.
    pub fn void_value(&self) -> Value {
        Value {
            ty: IrType::Void,
            kind: ValueKind::ConstInt(0),
        }
    }

    /// Pointer to a module-level null-terminated string constant.
    pub fn global_string_ptr(&mut self, text: &str) -> Value {
        let id = self.module.intern_string(text);
        Value {
            ty: IrType::Ptr,
            kind: ValueKind::Str(id),
        }
    }

    // ----------------------------------------------------------------
    // Instructions
    // ----------------------------------------------------------------

    /// Allocate a stack slot in the entry block of the current function,
    /// regardless of where the builder is positioned.
    pub fn build_alloca(&mut self, ty: IrType, name: &str) -> Result<Value, IrError> {
        let (function, _) = self.position.ok_or(IrError::NoInsertionPoint)?;
        let result = self.fresh_temp()?;

        let function = &mut self.module.functions[function.0];
        let entry = function.blocks.first_mut().ok_or(IrError::NoInsertionPoint)?;
        let at = entry
            .instructions
            .iter()
            .take_while(|inst| matches!(inst, Instruction::Alloca { .. }))
            .count();
        entry.instructions.insert(
            at,
            Instruction::Alloca {
                result,
                name: name.to_string(),
                ty,
            },
        );

        Ok(Value {
            ty: IrType::Ptr,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_load(&mut self, ty: IrType, slot: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        self.push(Instruction::Load { result, ty, slot })?;
        Ok(Value {
            ty,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_store(&mut self, value: Value, slot: Value) -> Result<(), IrError> {
        self.push(Instruction::Store { value, slot })
    }

    pub fn build_binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        let ty = if op.is_float() { IrType::F64 } else { lhs.ty };
        self.push(Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        })?;
        Ok(Value {
            ty,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_icmp(
        &mut self,
        predicate: IntPredicate,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        self.push(Instruction::ICmp {
            result,
            predicate,
            lhs,
            rhs,
        })?;
        Ok(Value {
            ty: IrType::I1,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_fcmp(
        &mut self,
        predicate: FloatPredicate,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        self.push(Instruction::FCmp {
            result,
            predicate,
            lhs,
            rhs,
        })?;
        Ok(Value {
            ty: IrType::I1,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_not(&mut self, operand: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        let ty = operand.ty;
        self.push(Instruction::Not { result, operand })?;
        Ok(Value {
            ty,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_neg(&mut self, operand: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        let ty = operand.ty;
        self.push(Instruction::Neg { result, operand })?;
        Ok(Value {
            ty,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_fneg(&mut self, operand: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        self.push(Instruction::FNeg { result, operand })?;
        Ok(Value {
            ty: IrType::F64,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_sitofp(&mut self, operand: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        self.push(Instruction::SiToFp { result, operand })?;
        Ok(Value {
            ty: IrType::F64,
            kind: ValueKind::Inst(result),
        })
    }

    pub fn build_fptosi(&mut self, operand: Value) -> Result<Value, IrError> {
        let result = self.fresh_temp()?;
        self.push(Instruction::FpToSi { result, operand })?;
        Ok(Value {
            ty: IrType::I32,
            kind: ValueKind::Inst(result),
        })
    }

    /// Call a function declared in the module. Returns `None` for void
    /// callees.
    pub fn build_call(&mut self, callee: &str, args: Vec<Value>) -> Result<Option<Value>, IrError> {
        let return_type = self
            .module
            .function(callee)
            .ok_or_else(|| IrError::UnknownFunction(callee.to_string()))?
            .return_type;

        let result = if return_type == IrType::Void {
            None
        } else {
            Some(self.fresh_temp()?)
        };
        self.push(Instruction::Call {
            result,
            callee: callee.to_string(),
            return_type,
            args,
        })?;

        Ok(result.map(|id| Value {
            ty: return_type,
            kind: ValueKind::Inst(id),
        }))
    }

    pub fn build_br(&mut self, target: BlockId) -> Result<(), IrError> {
        self.push(Instruction::Br { target })
    }

    pub fn build_cond_br(
        &mut self,
        condition: Value,
        then_block: BlockId,
        else_block: BlockId,
    ) -> Result<(), IrError> {
        self.push(Instruction::CondBr {
            condition,
            then_block,
            else_block,
        })
    }

    pub fn build_ret(&mut self, value: Option<Value>) -> Result<(), IrError> {
        self.push(Instruction::Ret { value })
    }

    fn fresh_temp(&mut self) -> Result<InstId, IrError> {
        let (function, _) = self.position.ok_or(IrError::NoInsertionPoint)?;
        let function = &mut self.module.functions[function.0];
        let id = InstId(function.next_temp);
        function.next_temp += 1;
        Ok(id)
    }

    fn push(&mut self, instruction: Instruction) -> Result<(), IrError> {
        let (function, block) = self.position.ok_or(IrError::NoInsertionPoint)?;
        let block = &mut self.module.functions[function.0].blocks[block.0];
        if block.terminator().is_some() {
            return Err(IrError::BlockTerminated(block.name.clone()));
        }
        block.instructions.push(instruction);
        Ok(())
    }
}

// --------------------------------------------------------------------
// Textual printing
// --------------------------------------------------------------------

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;

        if !self.strings.is_empty() {
            writeln!(f)?;
            for (index, text) in self.strings.iter().enumerate() {
                writeln!(
                    f,
                    "@.str.{index} = private constant [{} x i8] c\"{}\\00\"",
                    text.len() + 1,
                    escape_bytes(text)
                )?;
            }
        }

        for function in self.functions.iter().filter(|func| func.is_declaration()) {
            writeln!(f)?;
            write!(f, "declare {} @{}(", function.return_type, function.name)?;
            write_params(f, function)?;
            writeln!(f, ")")?;
        }

        for function in self.functions.iter().filter(|func| !func.is_declaration()) {
            writeln!(f)?;
            write!(f, "define {} @{}(", function.return_type, function.name)?;
            write_params(f, function)?;
            writeln!(f, ") {{")?;

            for block in &function.blocks {
                writeln!(f, "{}:", block.name)?;
                for instruction in &block.instructions {
                    write!(f, "  ")?;
                    write_instruction(f, function, instruction)?;
                    writeln!(f)?;
                }
            }

            writeln!(f, "}}")?;
        }

        Ok(())
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, function: &Function) -> fmt::Result {
    for (index, ty) in function.param_types.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        if function.is_declaration() {
            write!(f, "{ty}")?;
        } else {
            write!(f, "{ty} %p{index}")?;
        }
    }
    if function.is_variadic {
        if !function.param_types.is_empty() {
            write!(f, ", ")?;
        }
        write!(f, "...")?;
    }
    Ok(())
}

fn write_instruction(
    f: &mut fmt::Formatter<'_>,
    function: &Function,
    instruction: &Instruction,
) -> fmt::Result {
    let label = |BlockId(index): BlockId| function.blocks[index].name.as_str();

    match instruction {
        Instruction::Alloca { result, name, ty } => {
            write!(f, "%t{} = alloca {ty} ; {name}", result.0)
        }
        Instruction::Load { result, ty, slot } => {
            write!(f, "%t{} = load {ty}, ptr {slot}", result.0)
        }
        Instruction::Store { value, slot } => {
            write!(f, "store {} {value}, ptr {slot}", value.ty)
        }
        Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        } => write!(f, "%t{} = {op} {} {lhs}, {rhs}", result.0, lhs.ty),
        Instruction::ICmp {
            result,
            predicate,
            lhs,
            rhs,
        } => write!(f, "%t{} = icmp {predicate} {} {lhs}, {rhs}", result.0, lhs.ty),
        Instruction::FCmp {
            result,
            predicate,
            lhs,
            rhs,
        } => write!(f, "%t{} = fcmp {predicate} double {lhs}, {rhs}", result.0),
        Instruction::Not { result, operand } => {
            write!(f, "%t{} = not {} {operand}", result.0, operand.ty)
        }
        Instruction::Neg { result, operand } => {
            write!(f, "%t{} = neg {} {operand}", result.0, operand.ty)
        }
        Instruction::FNeg { result, operand } => {
            write!(f, "%t{} = fneg double {operand}", result.0)
        }
        Instruction::SiToFp { result, operand } => {
            write!(f, "%t{} = sitofp i32 {operand} to double", result.0)
        }
        Instruction::FpToSi { result, operand } => {
            write!(f, "%t{} = fptosi double {operand} to i32", result.0)
        }
        Instruction::Call {
            result,
            callee,
            return_type,
            args,
        } => {
            if let Some(result) = result {
                write!(f, "%t{} = ", result.0)?;
            }
            write!(f, "call {return_type} @{callee}(")?;
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} {arg}", arg.ty)?;
            }
            write!(f, ")")
        }
        Instruction::Br { target } => write!(f, "br label %{}", label(*target)),
        Instruction::CondBr {
            condition,
            then_block,
            else_block,
        } => write!(
            f,
            "br i1 {condition}, label %{}, label %{}",
            label(*then_block),
            label(*else_block)
        ),
        Instruction::Ret { value } => match value {
            Some(value) => write!(f, "ret {} {value}", value.ty),
            None => write!(f, "ret void"),
        },
    }
}

fn escape_bytes(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' | b'\\' => escaped.push_str(&format!("\\{byte:02X}")),
            0x20..=0x7e => escaped.push(byte as char),
            other => escaped.push_str(&format!("\\{other:02X}")),
        }
    }
    escaped
}
