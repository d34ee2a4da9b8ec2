//! CLI entrypoint for the cshape call-site harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cshape_core::{AbiSignature, CATALOG, FormatFamily, Header, parse_format, signatures_in};
use cshape_harness::structured_log::LogEmitter;
use cshape_harness::{FixtureSet, HarnessError, TestRunner, VerificationReport};

/// Call-site verification tooling for cshape.
#[derive(Debug, Parser)]
#[command(name = "cshape-harness")]
#[command(about = "Verify C binding call sites against the signature catalog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify every call site in a fixture file.
    Verify {
        /// Fixture JSON path.
        #[arg(long)]
        fixture: PathBuf,
        /// Append structured JSONL records to this path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output report path (JSON). Printed to stdout when omitted.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Stop at the first call site whose verdict contradicts the fixture.
        #[arg(long)]
        fail_fast: bool,
    },
    /// Print the signature catalog as JSON.
    Catalog {
        /// Only functions declared in this header
        /// (stdio, stdlib, string, math, time).
        #[arg(long, value_parser = parse_header)]
        header: Option<Header>,
    },
    /// Parse a format string and print its directive sequence as JSON.
    Directives {
        /// Format string to parse.
        #[arg(long)]
        format: String,
        /// Parse with scanf rules instead of printf rules.
        #[arg(long)]
        scan: bool,
    },
}

fn parse_header(name: &str) -> Result<Header, String> {
    Ok(match name {
        "stdio" => Header::Stdio,
        "stdlib" => Header::Stdlib,
        "string" => Header::String,
        "math" => Header::Math,
        "time" => Header::Time,
        other => return Err(format!("unknown header `{other}`")),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Verify {
            fixture,
            log,
            report,
            fail_fast,
        } => {
            let (set, raw) = FixtureSet::from_file(&fixture)?;
            eprintln!(
                "Verifying {} call site(s) from {}",
                set.cases.len(),
                fixture.display()
            );
            let runner = TestRunner::new("verify").with_fail_fast(fail_fast);
            let results = match log {
                Some(path) => {
                    let mut emitter =
                        LogEmitter::to_file(&path, &set.suite).map_err(HarnessError::Log)?;
                    runner
                        .run_logged(&set, &mut emitter)
                        .map_err(HarnessError::Log)?
                }
                None => runner.run(&set),
            };

            for result in results.iter().filter(|r| !r.passed()) {
                match &result.diagnostic {
                    Some(diag) => eprintln!("FAIL {}: {diag}", result.name),
                    None => eprintln!("{:?} {}", result.outcome, result.name),
                }
            }

            let report_doc = VerificationReport::new(&set, &raw, results);
            let json = report_doc.to_json()?;
            match report {
                Some(path) => {
                    std::fs::write(&path, format!("{json}\n")).map_err(|source| {
                        HarnessError::Write {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    eprintln!("Report written to {}", path.display());
                }
                None => println!("{json}"),
            }
            eprintln!(
                "{} passed, {} failed, {} skipped",
                report_doc.passed, report_doc.failed, report_doc.skipped
            );
            if !report_doc.is_clean() {
                std::process::exit(1);
            }
        }
        Command::Catalog { header } => {
            let entries: Vec<&AbiSignature> = match header {
                Some(header) => signatures_in(header).collect(),
                None => CATALOG.iter().collect(),
            };
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Directives { format, scan } => {
            let family = if scan {
                FormatFamily::Scan
            } else {
                FormatFamily::Print
            };
            match parse_format(&format, family) {
                Ok(directives) => println!("{}", serde_json::to_string_pretty(&directives)?),
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
