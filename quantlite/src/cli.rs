use clap::{Parser, Subcommand};

/// quantlite - build llama-quantize in a provisioned environment and quantize a GGUF model
#[derive(Parser, Debug)]
#[command(name = "quantlite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Defaults to `run` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Provision the environment and run the quantize job once (default)
    Run {
        /// Discard the existing build tree and clone/build again (also QUANTLITE_REBUILD=1)
        #[arg(long, default_value = "false")]
        rebuild: bool,
    },

    /// Provision the environment only and report resolved tools
    Check,

    /// Print the environment image as a Dockerfile
    Image,

    /// Show model files on the volume and the last commit
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Subcommand to dispatch, with a bare invocation meaning `run`.
    pub fn command(self) -> Commands {
        self.command.unwrap_or(Commands::Run { rebuild: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_means_run() {
        let cli = Cli::try_parse_from(["quantlite"]).unwrap();
        assert_eq!(cli.command(), Commands::Run { rebuild: false });
    }

    #[test]
    fn test_run_rebuild_flag() {
        let cli = Cli::try_parse_from(["quantlite", "run", "--rebuild"]).unwrap();
        assert_eq!(cli.command(), Commands::Run { rebuild: true });
    }

    #[test]
    fn test_status_json() {
        let cli = Cli::try_parse_from(["quantlite", "status", "--json"]).unwrap();
        assert_eq!(cli.command(), Commands::Status { json: true });
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["quantlite", "deploy"]).is_err());
    }
}
