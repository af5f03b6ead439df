//! # bpr CLI
//!
//! Command-line interface for bikepacking retrieval.
//!
//! This binary wraps `bpr-core`: ingest rider chunks, search, and evaluate
//! reranking against relevance judgments. Run `bpr --help` for usage.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
