//! Launching the detached watchdog process.
//!
//! The watchdog is this same binary re-invoked with the hidden `watchdog`
//! sub-command. It must survive anything that happens to the daemon,
//! including signals delivered to the daemon's process group, so it is
//! placed in its own group/session at spawn time.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use log::{debug, info};

use super::WatchdogError;

/// Handle to a freshly launched watchdog process.
///
/// Held only for the window between spawn and a successful transport
/// connect; if that window ends in failure the process is killed so no
/// ownerless watchdog lingers.
pub struct SpawnedWatchdog {
    pid: u32,
    child: Child,
}

impl SpawnedWatchdog {
    /// Tear down a watchdog whose startup never completed.
    pub fn kill(mut self) {
        debug!("killing half-started watchdog (pid {})", self.pid);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Re-invoke the running binary in watchdog mode, detached.
pub fn launch(
    socket_path: &Path,
    workdir: &Path,
    log_level: &str,
) -> Result<SpawnedWatchdog, WatchdogError> {
    let exe = std::env::current_exe().map_err(WatchdogError::FailedToGetExecutablePath)?;

    let mut cmd = Command::new(&exe);
    cmd.arg("watchdog")
        .arg("--socket")
        .arg(socket_path)
        .arg("--workdir")
        .arg(workdir)
        .arg("--log-level")
        .arg(log_level)
        .arg("--parent-pid")
        .arg(std::process::id().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: SIGINT/SIGTERM aimed at the daemon's group must
        // not take the watchdog with it.
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        use winapi::um::winbase::{CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS};
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd
        .spawn()
        .map_err(WatchdogError::FailedToStartWatchdogProcess)?;
    let pid = child.id();
    info!("watchdog process launched (pid {pid})");
    Ok(SpawnedWatchdog { pid, child })
}
