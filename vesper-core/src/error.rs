use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// Failure of one pipeline stage at the library boundary.
///
/// The stage variants carry every diagnostic the stage accumulated, so a
/// caller can report all of them rather than just the first.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
    #[error("lexical analysis failed with {} error(s)", .0.len())]
    Lex(Vec<Diagnostic>),
    #[error("parsing failed with {} error(s)", .0.len())]
    Parse(Vec<Diagnostic>),
    #[error("semantic analysis failed with {} error(s)", .0.len())]
    Semantic(Vec<Diagnostic>),
    #[error("lowering failed with {} error(s)", .0.len())]
    Lowering(Vec<Diagnostic>),
}

impl CoreError {
    /// The diagnostics behind this error, empty for I/O failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CoreError::Io(_) => &[],
            CoreError::Lex(diagnostics)
            | CoreError::Parse(diagnostics)
            | CoreError::Semantic(diagnostics)
            | CoreError::Lowering(diagnostics) => diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceLocation;

    #[test]
    fn reports_diagnostic_count() {
        let error = CoreError::Parse(vec![
            Diagnostic::error("Expect expression.", SourceLocation::start()),
            Diagnostic::error("Expect ';' after expression.", SourceLocation::start()),
        ]);
        assert_eq!(error.to_string(), "parsing failed with 2 error(s)");
        assert_eq!(error.diagnostics().len(), 2);
    }

    #[test]
    fn io_errors_carry_no_diagnostics() {
        let error = CoreError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(error.diagnostics().is_empty());
    }
}
