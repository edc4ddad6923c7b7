//! CLI command definitions.

use clap::{Args, Subcommand};
use stash_core::ArchiveFormat;
use std::path::PathBuf;

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "STASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log every file and raise the log level to debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use a local directory as the object store instead of S3
    #[arg(long, global = true, env = "STASH_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// S3 region
    #[arg(long, global = true, env = "STASH_REGION")]
    pub region: Option<String>,

    /// Custom S3 endpoint (R2, MinIO)
    #[arg(long, global = true, env = "STASH_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Give up on an action after this many seconds
    #[arg(long, global = true, env = "STASH_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Compression workers for stream archives
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Archive artifacts and upload them under a key
    Put {
        bucket: String,

        key: String,

        /// Glob patterns selecting the artifacts
        #[arg(required = true)]
        artifacts: Vec<String>,

        /// Storage class of the uploaded object
        #[arg(long)]
        s3_class: Option<String>,

        /// Archive format (tar or stream)
        #[arg(long, default_value = "tar")]
        format: ArchiveFormat,
    },

    /// Download a key and restore it
    Get {
        bucket: String,

        key: String,

        /// Directory to extract into
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Archive format (tar or stream)
        #[arg(long, default_value = "tar")]
        format: ArchiveFormat,

        /// Output file for stream archives
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a key
    Delete { bucket: String, key: String },

    /// Run the action described by INPUT_* environment variables
    Action,

    /// Build an archive locally
    Pack {
        /// Archive to create
        destination: PathBuf,

        /// Glob patterns selecting the artifacts
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Write a multi-member gzip stream with the concurrent pipeline
        #[arg(long)]
        stream: bool,
    },

    /// Restore a local archive
    Unpack {
        /// Archive to read
        source: PathBuf,

        /// Directory to extract into
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Decode a stream archive instead of a tar archive
        #[arg(long)]
        stream: bool,

        /// Output file for stream archives (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Set a configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
