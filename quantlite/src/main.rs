mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use quantlite_commands::JobOutcome;
use quantlite_core::observability;

fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    match cli.command() {
        Commands::Run { rebuild } => {
            // Missing input and quantizer failure are reported on the console and
            // still exit 0; only infrastructure errors reach `?`.
            let outcome = quantlite_commands::cmd_run(rebuild)?;
            tracing::debug!(?outcome, "job finished");
            if let JobOutcome::ToolFailed { exit_code } = outcome {
                tracing::warn!(exit_code, "quantizer reported failure");
            }
        }
        Commands::Check => {
            quantlite_commands::check::cmd_check(&mut std::io::stdout().lock())?;
        }
        Commands::Image => {
            quantlite_commands::image::cmd_image(&mut std::io::stdout().lock())?;
        }
        Commands::Status { json } => {
            quantlite_commands::status::cmd_status(json, &mut std::io::stdout().lock())?;
        }
    }

    Ok(())
}
