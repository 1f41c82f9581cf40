//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sealant - memory-leak detection by repeated heap profiling
#[derive(Parser, Debug)]
#[command(name = "sealant")]
#[command(version)]
#[command(about = "Detect memory retained across repeated runs of a page action")]
#[command(
    long_about = "Sealant repeats an action against a DevTools target, captures heap snapshots or an allocation timeline, and reports the memory retained per repeat. Saved artifacts can be re-classified offline with `analyze`."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify saved heap artifacts
    Analyze {
        /// One .heaptimeline file, or two or more .heapsnapshot files in repeat order
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Seconds each repeat took, comma separated (timelines only)
        #[arg(long, value_delimiter = ',')]
        step_durations: Vec<f64>,

        /// Leak threshold in KB per repeat
        #[arg(long)]
        threshold_kb: Option<f64>,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Measure a page expression against a live target
    Measure {
        /// Expression evaluated once per repeat
        #[arg(short, long)]
        expression: String,

        /// Case name used in logs and for the evidence directory
        #[arg(short, long, default_value = "expression")]
        name: String,

        /// Compare full snapshots instead of an allocation timeline
        #[arg(long, default_value_t = false)]
        snapshot: bool,

        /// Do not wait for network and allocation activity to settle
        #[arg(long, default_value_t = false)]
        no_wait: bool,

        /// WebSocket debugger URL (skips discovery)
        #[arg(long)]
        ws: Option<String>,

        /// Host serving the /json target listing
        #[arg(long)]
        host: Option<String>,

        /// Port serving the /json target listing
        #[arg(long)]
        port: Option<u16>,

        /// Repeats in the first round
        #[arg(short, long)]
        repeat: Option<usize>,

        /// Leak threshold in KB per repeat
        #[arg(long)]
        threshold_kb: Option<f64>,

        /// Directory receiving artifacts and reports of leaking cases
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
