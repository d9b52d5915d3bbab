use clap::{Parser, Subcommand};
use cloudsync::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cloudsync",
    version,
    about = "Synchronize a local directory with an object store"
)]
pub struct Cli {
    /// Directory holding the configuration file (default: ~/.cloudsync)
    #[arg(long, value_name = "DIR", global = true)]
    pub config_path: Option<PathBuf>,

    /// Configuration file name
    #[arg(long, value_name = "NAME", default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config_file: String,

    /// Turn verbose logging on
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload every changed file under a directory
    Upload(UploadArgs),
}

#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Directory to scan
    #[arg(short, long, value_name = "DIR")]
    pub path: PathBuf,

    /// Storage driver: AMAZON_S3, LOCAL_FS, GOOGLE_DRIVE, GCP_STORAGE, MS_AZURE_BLOB
    #[arg(short, long, value_name = "DRIVER")]
    pub driver: String,

    /// Seconds to wait for in-flight uploads when shutting down
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    pub shutdown_timeout: u64,
}
