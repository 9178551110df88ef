//! Location of the watchdog control socket.

use std::path::{Path, PathBuf};

/// Compute the control socket path for one server instance.
///
/// The socket lives inside the instance's private working directory so that
/// concurrent daemon instances never collide and stale sockets disappear
/// with the directory.
pub fn socket_path(workdir: &Path, instance_id: &str) -> PathBuf {
    workdir.join(format!("watchdog-{instance_id}.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_rooted_in_workdir_and_unique_per_instance() {
        let a = socket_path(Path::new("/tmp/ns"), "100");
        let b = socket_path(Path::new("/tmp/ns"), "200");
        assert_eq!(a, PathBuf::from("/tmp/ns/watchdog-100.sock"));
        assert_ne!(a, b);
    }
}
