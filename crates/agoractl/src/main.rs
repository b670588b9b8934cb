mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { file } => commands::serve::execute(&file).await,
        Commands::Status { file, output } => commands::status::execute(&file, &output).await,
        Commands::Halt {
            file,
            reason,
            resume,
        } => commands::halt::execute(&file, &reason, resume).await,
    }
}
