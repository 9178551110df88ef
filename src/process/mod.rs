//! Process liveness probing and termination.
//!
//! Everything the watchdog knows about OS processes goes through this module:
//! "is this pid alive", "kill this pid", and "tell me when this pid exits".
//! The mechanisms are platform-specific (signal-0 probing on Unix, process
//! handle queries on Windows) and live in platform modules selected at build
//! time; the rest of the daemon depends only on the functions below.

use std::time::Duration;

use anyhow::Result;
use log::debug;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as platform;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        use windows as platform;
    }
}

/// Default interval for liveness poll loops.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Check whether a process with the given pid currently exists.
pub fn is_alive(pid: u32) -> bool {
    platform::is_alive(pid)
}

/// Forcibly terminate a process by pid.
///
/// A pid that cannot be found is treated as success: termination is a
/// best-effort, idempotent operation and "already gone" is the desired
/// outcome anyway.
pub fn kill_process(pid: u32) -> Result<()> {
    platform::kill_process(pid)
}

/// Watch a process and return a channel that resolves exactly once, when the
/// process is observed to have exited.
///
/// The wait runs on a background task polling at `poll_interval`. Dropping
/// the receiver stops the poll loop.
pub fn watch_termination(pid: u32, poll_interval: Duration) -> oneshot::Receiver<()> {
    let (mut tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !is_alive(pid) {
                        break;
                    }
                }
                _ = tx.closed() => return,
            }
        }
        debug!("watched process {pid} has exited");
        let _ = tx.send(());
    });
    rx
}

/// Resolve the pid of the real worker process under a launcher.
///
/// Some engine installations ship a wrapper command that spawns the actual
/// compute process under a different name; killing or liveness-checking the
/// wrapper alone would miss it. Walks the process tree below `launcher_pid`
/// looking for a descendant whose name contains `worker_name` and returns
/// its pid, or `launcher_pid` when no such descendant exists (the launcher
/// is the worker).
pub fn resolve_worker_pid(launcher_pid: u32, worker_name: &str) -> u32 {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing(),
    );

    let launcher = Pid::from_u32(launcher_pid);
    let mut frontier = vec![launcher];
    while let Some(current) = frontier.pop() {
        for (pid, proc) in sys.processes() {
            if proc.parent() != Some(current) {
                continue;
            }
            let name = proc.name().to_string_lossy();
            if name.contains(worker_name) {
                debug!(
                    "resolved worker '{}' to pid {} under launcher {}",
                    worker_name,
                    pid.as_u32(),
                    launcher_pid
                );
                return pid.as_u32();
            }
            frontier.push(*pid);
        }
    }
    launcher_pid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn far_out_pid_is_not_alive() {
        // 2^22 is above the default pid limit on the platforms we run tests on
        assert!(!is_alive(4_194_304));
    }

    #[test]
    fn killing_a_missing_pid_is_success() {
        assert!(kill_process(4_194_304).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn watch_termination_fires_when_process_exits() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let rx = watch_termination(pid, Duration::from_millis(20));
        child.kill().expect("kill sleep");
        child.wait().expect("reap sleep");

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("termination not observed in time")
            .expect("watcher dropped without firing");
    }

    #[test]
    fn resolve_worker_pid_falls_back_to_launcher() {
        // The current process has no child named like this; the launcher pid
        // itself must come back.
        let pid = std::process::id();
        assert_eq!(resolve_worker_pid(pid, "no-such-worker-name"), pid);
    }
}
