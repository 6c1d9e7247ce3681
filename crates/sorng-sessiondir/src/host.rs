//! The session-host primitive the directory is written against.
//!
//! A [`SessionHost`] opens a [`ServerHandle`] for a target host. The handle
//! owns the native server handle and closes it when dropped, so every exit
//! path of an operation releases it. Attribute queries return an owned copy
//! of the native buffer; the native allocation is freed before the call
//! returns.
//!
//! Calls are synchronous and may block for as long as the host takes to
//! answer. The async service runs them on the blocking pool.

use crate::error::{SessionError, SessionResult};
use crate::types::{
    AttributeClass, HostTarget, LaunchRequest, LaunchedProcess, ProcessEntry,
    SendMessageRequest, SessionEntry,
};
use std::time::Duration;

/// Factory for open server handles.
pub trait SessionHost: Send + Sync {
    /// Open a scoped handle to `target`. Failure maps to `HostUnavailable`.
    fn open(&self, target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>>;

    /// Name of the machine this process runs on, if the host knows it.
    fn local_computer_name(&self) -> Option<String> {
        None
    }
}

/// An open connection to one session host.
pub trait ServerHandle: Send {
    /// Every session on the host, in one bulk call.
    fn enumerate_sessions(&self) -> SessionResult<Vec<SessionEntry>>;

    /// Raw bytes of one attribute class for one session.
    fn query_attribute(&self, session_id: u32, class: AttributeClass) -> SessionResult<Vec<u8>>;

    fn disconnect(&self, session_id: u32, wait: bool) -> SessionResult<()>;

    fn logoff(&self, session_id: u32, wait: bool) -> SessionResult<()>;

    /// Show a prompt on the session desktop and return the raw response code.
    fn send_message(&self, session_id: u32, request: &SendMessageRequest) -> SessionResult<u32>;

    /// Start a process on the session desktop under the session owner's token.
    ///
    /// When `request.wait` is set, waits at most `wait_timeout` for the exit
    /// code; a process still running after that reports no exit code.
    fn launch_interactive(
        &self,
        session_id: u32,
        request: &LaunchRequest,
        wait_timeout: Duration,
    ) -> SessionResult<LaunchedProcess>;

    fn list_processes(&self) -> SessionResult<Vec<ProcessEntry>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Unsupported platform
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Native host stand-in for platforms without the session API.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedHost;

impl SessionHost for UnsupportedHost {
    fn open(&self, _target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>> {
        Err(SessionError::platform())
    }
}

/// Local computer name from the environment.
pub fn computer_name_from_env() -> Option<String> {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionErrorKind;

    #[test]
    fn unsupported_host_reports_platform() {
        let err = UnsupportedHost.open(&HostTarget::Local).err().unwrap();
        assert_eq!(err.kind, SessionErrorKind::PlatformNotSupported);
        assert!(UnsupportedHost.local_computer_name().is_none());
    }
}
