//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "hearth",
    version,
    about = "HVAC automation daemon for Home Assistant hubs",
    long_about = "Observes indoor and outdoor temperature sensors on a \
                  Home Assistant hub and drives climate entities according \
                  to a declarative policy."
)]
pub struct Cli {
    /// Path to the configuration file (default: auto-detect).
    #[arg(short, long, global = true, env = "HEARTH_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller (the default when no command is given).
    Run,

    /// Load and validate the configuration, print a summary, and exit.
    Validate,
}
