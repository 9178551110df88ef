//! Unix process liveness via signal probing.

use anyhow::Result;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Signal 0 probes for existence without delivering anything.
pub fn is_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // The process exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn kill_process(pid: u32) -> Result<()> {
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // Already gone
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("failed to kill pid {pid}: {e}")),
    }
}
