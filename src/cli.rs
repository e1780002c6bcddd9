// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pose-to-action recognizer: replays extracted pose features and fires
/// the configured effect for each confirmed action.
#[derive(Parser, Debug)]
#[command(name = "motion-actions")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recognize actions in a JSONL feature-frame stream
    Run {
        /// Frame file, one JSON record per line (stdin when omitted)
        #[arg(short, long)]
        frames: Option<PathBuf>,

        /// Pin the active context (overrides config)
        #[arg(long)]
        context: Option<String>,

        /// Start with detection disarmed
        #[arg(long)]
        no_detect: bool,
    },

    /// Capture training samples for one label from a frame stream
    Train {
        #[arg(long)]
        context: String,

        #[arg(long)]
        label: String,

        /// Number of samples to capture
        #[arg(short, long, default_value = "25")]
        samples: usize,

        /// Frame file (stdin when omitted)
        #[arg(short, long)]
        frames: Option<PathBuf>,
    },

    /// List stored contexts, labels and effect profiles
    Contexts,
}
