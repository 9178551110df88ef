//! Control protocol exchanged between the daemon and its watchdog.
//!
//! Two request/response pairs, JSON bodies over POST. Both sides share the
//! endpoint constants so client and server cannot drift apart.

use serde::{Deserialize, Serialize};

/// Endpoint registering a worker pid for supervision.
pub const REGISTER_PROCESS_PATH: &str = "/register-process";

/// Endpoint requesting a graceful drain-and-exit.
pub const SHUTDOWN_PATH: &str = "/shutdown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterProcessRequest {
    pub pid: u32,
}

/// Acknowledgement only.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegisterProcessResponse {}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShutdownRequest {}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShutdownResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_wire_shape() {
        let body = serde_json::to_string(&RegisterProcessRequest { pid: 4242 }).unwrap();
        assert_eq!(body, r#"{"pid":4242}"#);
    }

    #[test]
    fn shutdown_request_is_empty_object() {
        let body = serde_json::to_string(&ShutdownRequest {}).unwrap();
        assert_eq!(body, "{}");
    }
}
