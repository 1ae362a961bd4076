use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "parley", version, about = "Multi-tenant WhatsApp assistant gateway")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start the webhook server.
    Serve,
    /// Validate the config file.
    Check {
        /// Output format: human (default) or json
        #[arg(long, default_value = "human")]
        format: String,
    },
    /// Inspect or replace per-tenant config documents.
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
    Version,
}

#[derive(Subcommand)]
pub(crate) enum TenantCommands {
    /// Print the tenant config document as JSON.
    Show { tenant: String },
    /// Replace the tenant config document from a JSON file.
    Put { tenant: String, file: String },
}
