//! Windows process liveness via process handles.

use anyhow::Result;
use winapi::um::handleapi::CloseHandle;
use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
use winapi::um::winnt::{PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE};

pub fn is_alive(pid: u32) -> bool {
    // SAFETY: OpenProcess/CloseHandle on a pid we do not otherwise touch
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            false
        } else {
            CloseHandle(handle);
            true
        }
    }
}

pub fn kill_process(pid: u32) -> Result<()> {
    // SAFETY: handle is closed on every path; TerminateProcess is the
    // documented forceful-termination call
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            // Already gone (or never existed) - success either way
            return Ok(());
        }
        let ok = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if ok == 0 {
            return Err(anyhow::anyhow!(
                "TerminateProcess failed for pid {pid}: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(())
    }
}
