use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(author, version, about = "Nutrition reference retrieval for meal analysis", long_about = None)]
pub struct Cli {
    /// Path to the TOML settings file (optional)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the food CSV into the metadata database, replacing its contents
    ImportMetadata {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Encode every food in the CSV and write the embedding store
    Embed {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Build the vector index from the embedding store and save it
    BuildIndex,
    /// Print the reference foods most similar to a text query
    Search {
        /// Free-text food description to encode
        text: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print records with scores as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrieve reference foods and ask the local model for a nutrition estimate
    Ask {
        /// Meal description
        description: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
