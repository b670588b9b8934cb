use clap::{Parser, Subcommand};

/// Agora CLI - run and inspect a marketplace
#[derive(Parser, Debug)]
#[command(name = "agoractl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the marketplace daemon (store, fabric, coordinator, sweeper)
    Serve {
        /// Marketplace configuration file (YAML)
        #[arg(short, long, default_value = "marketplace.yaml")]
        file: String,
    },

    /// Print the system status of a marketplace store
    Status {
        /// Marketplace configuration file (YAML)
        #[arg(short, long, default_value = "marketplace.yaml")]
        file: String,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        output: String,
    },

    /// Issue a user override (emergency halt / resume)
    Halt {
        /// Marketplace configuration file (YAML)
        #[arg(short, long, default_value = "marketplace.yaml")]
        file: String,

        /// Reason recorded in the audit log
        #[arg(short, long, default_value = "operator halt")]
        reason: String,

        /// Lift the halt instead of engaging it
        #[arg(long)]
        resume: bool,
    },
}
