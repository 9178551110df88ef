mod cli;
mod config;
mod engine;
mod orchestrator;
mod process;
mod server;
mod watchdog;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use log::error;

fn main() {
    let args = cli::Args::parse();

    // The watchdog runs detached with no terminal; its logs go to a file in
    // the instance directory instead of stderr
    match &args.sub {
        Some(cli::Cmd::Watchdog {
            workdir, log_level, ..
        }) => init_watchdog_logger(workdir, log_level),
        _ => init_daemon_logger(),
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            eprintln!("The daemon cannot start without an async runtime.");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(real_main(args)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn real_main(args: cli::Args) -> Result<()> {
    match args.sub.unwrap_or(cli::Cmd::Run { config: None }) {
        cli::Cmd::Run { config } => orchestrator::run(config).await,
        cli::Cmd::Watchdog {
            socket, parent_pid, ..
        } => {
            let parent_pid = parent_pid.unwrap_or_else(launching_parent_pid);
            watchdog::server::run(watchdog::WatchdogOptions::new(socket, parent_pid)).await
        }
    }
}

/// Pid of the process that launched us. The launcher normally passes
/// `--parent-pid` explicitly; this is the fallback, read before the parent
/// can possibly have exited and reparented us.
fn launching_parent_pid() -> u32 {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id()
    }
    #[cfg(not(unix))]
    {
        // No portable getppid; supervising pid 0 drains immediately, which
        // fails safe (no orphaned workers)
        0
    }
}

fn builder_with_format() -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_default_env();
    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "[{} {} {}:{}] {}",
            buf.timestamp_millis(),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });
    builder
}

fn init_daemon_logger() {
    builder_with_format()
        .filter_level(log::LevelFilter::Info)
        .init();
}

fn init_watchdog_logger(workdir: &Path, level: &str) {
    let filter = level.parse().unwrap_or(log::LevelFilter::Info);
    let mut builder = builder_with_format();
    builder.filter_level(filter);
    let log_path = workdir.join("watchdog.log");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(e) => {
            // Fall back to (discarded) stderr rather than refusing to run
            eprintln!("failed to open watchdog log at {}: {e}", log_path.display());
        }
    }
    builder.init();
}
