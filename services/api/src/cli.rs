use clap::{Args, Parser, Subcommand};
use trialflow::error::AppError;

use crate::preview::{run_penalty_preview, PenaltyPreviewArgs};
use crate::server;

#[derive(Parser, Debug)]
#[command(
    name = "Trialflow",
    about = "Run the trial session lifecycle service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Cancellation penalty tooling
    Penalty {
        #[command(subcommand)]
        command: PenaltyCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PenaltyCommand {
    /// Print the penalty curve for a notice period and sentiment score
    Preview(PenaltyPreviewArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Penalty {
            command: PenaltyCommand::Preview(args),
        } => run_penalty_preview(args),
    }
}
