use crate::demo::{run_demo, run_sweep, DemoArgs, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use estate_ops::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Estate Operations",
    about = "Run the eviction and escrow payment service or walk through it from the command line",
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
    /// Eviction notice maintenance tasks
    Evictions {
        #[command(subcommand)]
        command: EvictionCommand,
    },
    /// Walk through an eviction lifecycle and an escrow payout against sandbox data
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum EvictionCommand {
    /// Expire every overdue notice in the seeded demo portfolio
    Sweep(SweepArgs),
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
        Command::Evictions {
            command: EvictionCommand::Sweep(args),
        } => run_sweep(args),
        Command::Demo(args) => run_demo(args).await,
    }
}
