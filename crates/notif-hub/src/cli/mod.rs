pub mod commands;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
/// Notif Hub CLI
///
/// This CLI provides commands to manage the notif hub, including serving the
/// hub, creating orgs and projects, and rotating keys.
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the notif hub server
    Serve,

    /// Create new entities
    Create(CreateCommands),

    /// Rotate keys
    Rotate(RotateCommands),
}

#[derive(Args)]
pub struct CreateCommands {
    #[command(subcommand)]
    pub command: CreateSubcommands,
}

#[derive(Subcommand)]
pub enum CreateSubcommands {
    /// Create a new org (bus account provisioned at serve time)
    Org {
        /// Tenant id, [A-Za-z0-9_-]{1,32}
        #[arg(long)]
        id: String,
        /// Human-readable name
        #[arg(long)]
        name: String,
    },

    /// Create a new project in an org
    Project {
        /// Owning org id
        #[arg(long)]
        org: String,
        /// Project slug
        #[arg(long)]
        slug: String,
    },
}

#[derive(Args)]
pub struct RotateCommands {
    #[command(subcommand)]
    pub command: RotateSubcommands,
}

#[derive(Subcommand)]
pub enum RotateSubcommands {
    /// Rotate the admin key
    Admin,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
