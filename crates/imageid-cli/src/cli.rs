use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "imageid")]
#[command(author, version, about = "Classify images with a locally loaded model")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "imageid.yaml")]
    pub config: PathBuf,

    /// Model descriptor file (overrides the config's model section)
    #[arg(short, long, global = true)]
    pub model: Option<PathBuf>,

    /// Keep at most this many history entries
    #[arg(long, global = true)]
    pub history_limit: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify image files or URLs
    Classify {
        /// Image paths or http(s) URLs
        #[arg(required = true)]
        images: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive session
    Interactive,

    /// Load the model and print what it expects
    Inspect,
}
