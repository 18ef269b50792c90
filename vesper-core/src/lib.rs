//! Core compiler pipeline for the Vesper language.
//!
//! This crate provides the front-end and mid-end of the Vesper
//! compiler. The pipeline is roughly:
//!
//!   source .vsp
//!     -> lexer      (tokens)
//!     -> parser     (syntax tree)
//!     -> typecheck  (scopes + type annotations)
//!     -> codegen    (basic-block IR module)
//!
//! Stages communicate through owned data and report failures as
//! accumulated diagnostic lists. Higher-level tools (the `vesperc`
//! driver, editors, a native backend) should depend on this crate
//! rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod diagnostic;
pub mod error;
pub mod span;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;

// ---------------------------------------------------------------------
// Semantic layer: types, symbols, type checking
// ---------------------------------------------------------------------

pub mod symbols;
pub mod typecheck;
pub mod types;

// ---------------------------------------------------------------------
// Back-end interface: IR construction and lowering
// ---------------------------------------------------------------------

pub mod codegen;
pub mod compiler;
pub mod ir;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{compile, emit_ir, tokenize_source};
pub use error::CoreError;
