use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "watershed-join")]
#[command(about = "Join species occurrences to their nearest water-quality station")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Hide progress output")]
    pub quiet: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        help = "Config file [default: ./watershed.toml if present]"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline and load joined records into the store
    Run {
        #[arg(short, long, help = "GBIF occurrence export (JSON, JSON lines or CSV/TSV)")]
        observations: PathBuf,

        #[arg(short, long, help = "USGS instantaneous-values JSON response")]
        water_quality: PathBuf,

        #[arg(short, long, help = "SQLite database path")]
        database: Option<PathBuf>,

        #[arg(long, help = "PostgreSQL connection string (requires the postgres feature)")]
        postgres_url: Option<String>,

        #[arg(short, long, help = "Directory for raw/processed/summary audit blobs")]
        blob_root: Option<PathBuf>,

        #[arg(long, help = "Matcher strategy: indexed or brute-force")]
        matcher: Option<String>,

        #[arg(long, help = "Only keep observations from this state/province")]
        state_province: Option<String>,

        #[arg(long)]
        max_workers: Option<usize>,

        #[arg(long, help = "Wall-clock budget for the run in seconds")]
        time_budget_secs: Option<u64>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Fetch, normalize, aggregate and match without loading anything
    Validate {
        #[arg(short, long)]
        observations: PathBuf,

        #[arg(short, long)]
        water_quality: PathBuf,

        #[arg(long)]
        matcher: Option<String>,

        #[arg(long)]
        state_province: Option<String>,

        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Show what the store holds, optionally with a snapshot's details
    Info {
        #[arg(short, long, help = "SQLite database path")]
        database: Option<PathBuf>,

        #[arg(long)]
        postgres_url: Option<String>,

        #[arg(short, long, default_value = "10")]
        sample: usize,

        #[arg(long, help = "Processed Parquet snapshot to describe")]
        snapshot: Option<PathBuf>,
    },
}
