//! Pipeline orchestration.
//!
//! The pipeline is strictly linear: tokens, syntax tree, type-annotated
//! tree, IR module. Each stage either completes or hands back a
//! non-empty diagnostic list, and a failing stage halts the pipeline
//! before the next stage runs.

use crate::codegen;
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::ir;
use crate::lexer::{self, Token, TokenKind};
use crate::parser;
use crate::typecheck;

/// Tokenize `source`, failing with every lexical error in the stream.
pub fn tokenize_source(source: &str) -> Result<Vec<Token>, CoreError> {
    let tokens = lexer::tokenize(source);

    let errors: Vec<Diagnostic> = tokens
        .iter()
        .filter(|token| token.kind == TokenKind::Error)
        .map(|token| Diagnostic::error(token.lexeme.clone(), token.location))
        .collect();

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(CoreError::Lex(errors))
    }
}

/// Run the full pipeline and hand back the IR module.
pub fn compile(source: &str, module_name: &str) -> Result<ir::Module, CoreError> {
    let tokens = tokenize_source(source)?;
    let mut program = parser::parse(tokens).map_err(CoreError::Parse)?;
    typecheck::analyze(&mut program).map_err(CoreError::Semantic)?;
    codegen::lower(&program, module_name).map_err(CoreError::Lowering)
}

/// Compile and render the module as textual IR.
pub fn emit_ir(source: &str, module_name: &str) -> Result<String, CoreError> {
    Ok(compile(source, module_name)?.to_string())
}
