/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Notif Hub CLI application
//!
//! This module provides the command-line interface for the notif hub.
//! It includes functionality for serving the hub, creating orgs and projects,
//! and rotating keys.

use notif_hub::cli::{parse_cli, Commands, CreateSubcommands, RotateSubcommands};

use notif_hub::cli::commands;
use notif_hub::utils;
use notif_utils::config::Settings;

/// Main function to run the notif hub application
///
/// This function initializes the application, parses command-line arguments,
/// and executes the appropriate command based on user input.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    // Load configuration
    let config = Settings::new(None).expect("Failed to load configuration");

    // Initialize logging
    notif_utils::logging::init_with_format(&config.log.level, &config.log.format)
        .expect("Failed to initialize logging");

    // Create PAK controller
    let _ =
        utils::pak::create_pak_controller(Some(&config)).expect("Failed to create PAK controller");

    // Execute the appropriate command
    match cli.command {
        Commands::Serve => commands::serve(&config).await?,
        Commands::Create(create_commands) => match create_commands.command {
            CreateSubcommands::Org { id, name } => commands::create_org(&config, id, name)?,
            CreateSubcommands::Project { org, slug } => {
                commands::create_project(&config, org, slug)?
            }
        },
        Commands::Rotate(rotate_commands) => match rotate_commands.command {
            RotateSubcommands::Admin => commands::rotate_admin(&config)?,
        },
    }

    Ok(())
}
