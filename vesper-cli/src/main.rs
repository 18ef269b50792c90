use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{debug, Level};
use vesper_core::lexer::TokenKind;
use vesper_core::{emit_ir, tokenize_source, CoreError};

/// Driver for the Vesper compiler: `vesperc [options] <input-file>`.
#[derive(Parser, Debug)]
#[command(name = "vesperc", version, about = "Ahead-of-time compiler for the Vesper language")]
struct Cli {
    /// Input source file.
    #[arg(value_name = "input-file")]
    input: Vec<PathBuf>,

    /// Output path; defaults to the input stem with an `.s` suffix.
    #[arg(short = 'o', value_name = "path")]
    output: Option<PathBuf>,

    /// Emit the textual IR listing.
    #[arg(short = 'S')]
    assembly: bool,

    /// Emit a relocatable object (requires the native backend).
    #[arg(short = 'c')]
    object: bool,

    /// Emit the token stream to stdout and skip all later stages.
    #[arg(short = 'E')]
    tokens: bool,

    /// Verbose diagnostic logging.
    #[arg(short = 'v')]
    verbose: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            // --help and --version are informational; everything else is
            // an argument error and must exit 1, not clap's default 2.
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = error.print();
            process::exit(code);
        }
    };

    init_tracing(cli.verbose);

    if let Err(error) = execute(cli) {
        report(&error);
        process::exit(1);
    }
}

fn execute(cli: Cli) -> Result<()> {
    let input = match cli.input.as_slice() {
        [input] => input.clone(),
        [] => bail!("no input file specified"),
        _ => bail!("multiple input files are not supported"),
    };

    if cli.object && !cli.assembly {
        bail!("object emission requires the native backend; pass -S for the IR listing");
    }

    let source = fs::read_to_string(&input)
        .with_context(|| format!("failed to read input file {}", input.display()))?;
    debug!("read {} bytes from {}", source.len(), input.display());

    if cli.tokens {
        let tokens = tokenize_source(&source)?;
        for token in tokens.iter().filter(|token| token.kind != TokenKind::Eof) {
            println!("{token}");
        }
        return Ok(());
    }

    let module_name = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let listing = emit_ir(&source, &module_name)?;
    debug!("lowered module '{module_name}'");

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| input.with_extension("s"));
    fs::write(&output, listing)
        .with_context(|| format!("failed to write output file {}", output.display()))?;
    debug!("wrote {}", output.display());

    Ok(())
}

/// Compiler diagnostics print one per line as `line:column: message`;
/// anything else (I/O, usage) prints as a single error line.
fn report(error: &anyhow::Error) {
    match error.downcast_ref::<CoreError>() {
        Some(core) if !core.diagnostics().is_empty() => {
            for diagnostic in core.diagnostics() {
                eprintln!("{diagnostic}");
            }
            debug!("{core}");
        }
        _ => eprintln!("error: {error:#}"),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cli(input: Vec<PathBuf>) -> Cli {
        Cli {
            input,
            output: None,
            assembly: false,
            object: false,
            tokens: false,
            verbose: false,
        }
    }

    #[test]
    fn compiles_a_source_file_to_an_ir_listing() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("answer.vsp");
        fs::write(&input, "var x: int = 42;").expect("write input");
        let output = dir.path().join("answer.s");

        let mut args = cli(vec![input]);
        args.output = Some(output.clone());
        args.assembly = true;
        execute(args).expect("compilation should succeed");

        let listing = fs::read_to_string(&output).expect("read listing");
        assert!(listing.contains("define i32 @main() {"));
        assert!(listing.contains("store i32 42"));
    }

    #[test]
    fn default_output_is_the_input_stem_with_s_suffix() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("demo.vsp");
        fs::write(&input, "var x = 1;").expect("write input");

        execute(cli(vec![input.clone()])).expect("compilation should succeed");

        assert!(input.with_extension("s").exists());
    }

    #[test]
    fn token_dump_skips_later_stages() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("broken.vsp");
        // Would fail semantic analysis, but -E stops after the lexer.
        fs::write(&input, "if (1) { }").expect("write input");

        let mut args = cli(vec![input]);
        args.tokens = true;
        execute(args).expect("token dump should succeed");
    }

    #[test]
    fn rejects_missing_input() {
        let error = execute(cli(Vec::new())).expect_err("execute should fail");
        assert!(error.to_string().contains("no input file"));
    }

    #[test]
    fn rejects_multiple_inputs() {
        let error = execute(cli(vec![PathBuf::from("a.vsp"), PathBuf::from("b.vsp")]))
            .expect_err("execute should fail");
        assert!(error.to_string().contains("multiple input files"));
    }

    #[test]
    fn object_emission_requires_the_backend() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("demo.vsp");
        fs::write(&input, "var x = 1;").expect("write input");

        let mut args = cli(vec![input]);
        args.object = true;
        let error = execute(args).expect_err("execute should fail");
        assert!(error.to_string().contains("native backend"));
    }

    #[test]
    fn reports_unreadable_input() {
        let error = execute(cli(vec![PathBuf::from("/no/such/file.vsp")]))
            .expect_err("execute should fail");
        assert!(error.to_string().contains("failed to read input file"));
    }

    #[test]
    fn compile_errors_surface_their_diagnostics() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("bad.vsp");
        fs::write(&input, "if (1) { }").expect("write input");

        let error = execute(cli(vec![input])).expect_err("execute should fail");
        let core = error
            .downcast_ref::<CoreError>()
            .expect("core error expected");
        assert_eq!(
            core.diagnostics()[0].to_string(),
            "1:5: If condition must be boolean"
        );
    }
}
