use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "memfs", about = "In-memory FUSE filesystem")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount an empty memfs filesystem
    Mount {
        /// Path to the mount point
        mountpoint: PathBuf,

        /// Filesystem name shown by mount(8)
        #[arg(long, default_value = "memfs")]
        fs_name: String,

        /// Log file path
        #[arg(long, default_value = "/tmp/memfs.log")]
        log_file: PathBuf,

        /// Seconds the kernel may cache entries and attributes
        #[arg(long, default_value_t = 1)]
        ttl_secs: u64,
    },
    /// Unmount a memfs filesystem
    Unmount {
        /// Path to the mount point
        mountpoint: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct MemFsConfig {
    pub mountpoint: PathBuf,
    pub fs_name: String,
    pub log_file: PathBuf,
    pub ttl_secs: u64,
}

impl Default for MemFsConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::new(),
            fs_name: "memfs".to_string(),
            log_file: PathBuf::from("/tmp/memfs.log"),
            ttl_secs: 1,
        }
    }
}
