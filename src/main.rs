mod cli;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser as CliParser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};
use watlite::wat::{self, ErrorKind, Module, NamedError};

use crate::cli::Cli;

#[derive(Serialize)]
struct Report<'a> {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<&'a Module>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

#[derive(Serialize)]
struct ErrorReport {
    kind: ErrorKind,
    line: u32,
    column: u32,
    message: String,
}

impl From<&NamedError> for ErrorReport {
    fn from(e: &NamedError) -> Self {
        let span = e.error.span();
        ErrorReport {
            kind: e.error.kind(),
            line: span.line,
            column: span.column,
            message: e.error.message().to_string(),
        }
    }
}

fn main() -> Result<()> {
    // Logging setup
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .context("error reading logging directives")?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let args = Cli::parse();

    let mut results = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let source = fs::read_to_string(path).with_context(|| format!("error reading {}", path.display()))?;
        let result = wat::parse_named(&path.display().to_string(), &source);
        info!(file = %path.display(), ok = result.is_ok(), "checked");
        results.push((path.as_path(), result));
    }

    if args.json {
        let reports: Vec<_> = results.iter().map(|(path, result)| report(path, result)).collect();
        println!("{}", serde_json::to_string_pretty(&reports).context("error writing report")?);
    } else {
        for (path, result) in &results {
            match result {
                Ok(module) if args.folded => print!("{}", module.folded()),
                Ok(module) if args.print => print!("{}", module),
                Ok(module) => print_summary(path, module),
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        bail!("{} of {} files failed validation", failed, results.len());
    }
    Ok(())
}

fn report<'a>(path: &Path, result: &'a Result<Module, NamedError>) -> Report<'a> {
    Report {
        file: path.display().to_string(),
        module: result.as_ref().ok(),
        error: result.as_ref().err().map(ErrorReport::from),
    }
}

fn print_summary(path: &Path, module: &Module) {
    println!("{}: ok", path.display());
    for (index, func) in module.functions.iter().enumerate() {
        let mut line = format!("  {}", func.describe(index));
        if let (Some(_), Some(export)) = (&func.name, &func.export) {
            line.push_str(&format!(" {:?}", export));
        }
        if !func.signature.params.is_empty() || !func.signature.results.is_empty() {
            line.push_str(&format!(" {}", func.signature));
        }
        println!("{}", line);
    }
}
