//! The `kiln` binary.
//!
//! # Usage
//!
//! ```bash
//! kiln <command> [args...]
//! ```
//!
//! # Example
//!
//! ```bash
//! kiln build
//! kiln dev --port 3000
//! kiln g tmp
//! ```

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use kiln_cli::{Cli, run};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            if !output.is_null() {
                tracing::info!(%output, "command finished");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
