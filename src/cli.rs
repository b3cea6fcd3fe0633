use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "q2",
    about = "Single-host media indexer and serving engine",
    long_about = None,
    version = env!("GIT_VERSION"),
)]
pub struct Args {
    /// Path to TOML config file (overrides default search: ./q2.toml, ~/.config/q2/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the index, thumbnails, and playlists [default: ./.q2]
    #[arg(long, value_name = "DIR", global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a folder for indexing
    Addfolder {
        /// Folder to register
        folder: String,
    },
    /// Unregister a folder (its indexed files go with it)
    Removefolder {
        /// Folder to unregister
        folder: String,
    },
    /// List registered folders
    Listfolders,
    /// Index the files under a folder (must be within a registered folder)
    Scan {
        /// Folder to scan
        folder: String,
    },
    /// Start the HTTP server
    Serve {
        /// Port to listen on [default: 8090]
        #[arg(short, long)]
        port: Option<u16>,
    },
}
