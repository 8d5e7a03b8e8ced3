// src/main.rs

use std::process::ExitCode;

use plandag::errors::PlandagError;
use plandag::{EXIT_DEADLOCK, EXIT_FAILED, cli, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("plandag error: {err:?}");
        return ExitCode::from(EXIT_FAILED);
    }

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(PlandagError::Deadlock(deadlock)) => {
            eprintln!("plandag: {deadlock}");
            if !deadlock.missing.is_empty() {
                eprintln!("  unknown dependencies: {}", deadlock.missing.join(", "));
            }
            ExitCode::from(EXIT_DEADLOCK)
        }
        Err(err) => {
            eprintln!("plandag error: {err}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}
