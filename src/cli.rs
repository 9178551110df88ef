use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "numserved engine tool daemon")]
pub struct Args {
    /// Sub-commands (run is the default)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Normal daemon operation (default if no sub-command)
    Run {
        /// Path to configuration file
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
    /// Detached watchdog peer; launched by the daemon, not by hand
    #[command(hide = true)]
    Watchdog {
        /// Control socket to listen on
        #[arg(long)]
        socket: PathBuf,

        /// Instance working directory (the watchdog log lives here)
        #[arg(long)]
        workdir: PathBuf,

        /// Log level for the watchdog process
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Pid of the daemon to supervise (defaults to the launching parent)
        #[arg(long)]
        parent_pid: Option<u32>,
    },
}
