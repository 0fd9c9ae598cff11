use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hlsworker")]
#[command(about = "Transcodes uploaded videos into HLS renditions", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $HLSWORKER_CONFIG or config/hlsworker.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the queue consumer and the status server
    Worker(WorkerArgs),
    /// Submit a video for transcoding
    Enqueue(EnqueueArgs),
    /// Show the latest job for a video
    Status(StatusArgs),
    /// List tasks that failed permanently
    DeadLetters(DeadLettersArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct WorkerArgs {
    /// Probe the working directory for an uploads root when none is configured
    #[arg(long)]
    pub autodetect_uploads_root: bool,

    /// Override `server.bind_addr`
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct EnqueueArgs {
    #[arg(long)]
    pub video_id: String,

    /// Public path, absolute path, bare video id or object key
    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub category: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    pub video_id: String,

    /// Also print the job's status history
    #[arg(long)]
    pub events: bool,
}

#[derive(clap::Args, Debug)]
pub struct DeadLettersArgs {
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}
