use clap::{Parser, Subcommand};
use std::collections::HashSet;

use crate::domain::VesselId;

#[derive(Parser)]
#[command(name = "portpilot")]
#[command(version)]
#[command(about = "Batch departure bot for the shipping game", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus $PORTPILOT_ENV overrides)
    #[arg(short, long, global = true, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dispatch scheduler until Ctrl+C (SIGUSR1 triggers a pass now)
    Run {
        /// Stream dispatch events to stdout as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Run one dispatch pass now and print the summary
    Depart {
        /// Only consider these vessels (repeatable)
        #[arg(short, long = "vessel")]
        vessels: Vec<VesselId>,
        /// Evaluate every vessel but never depart
        #[arg(long)]
        dry_run: bool,
        /// Operator to dispatch for (defaults to every configured operator)
        #[arg(short, long)]
        operator: Option<String>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and validate configuration, then exit
    CheckConfig,
}

impl Commands {
    /// Vessel filter for `depart`; an empty list means no filter
    pub fn vessel_filter(&self) -> Option<HashSet<VesselId>> {
        match self {
            Commands::Depart { vessels, .. } if !vessels.is_empty() => {
                Some(vessels.iter().copied().collect())
            }
            _ => None,
        }
    }
}
