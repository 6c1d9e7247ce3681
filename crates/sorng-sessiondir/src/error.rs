//! Error types for the session directory crate.

use serde::{Deserialize, Serialize};

/// Native error codes the directory maps to specific error kinds.
pub mod codes {
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_NOT_SUPPORTED: u32 = 50;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_NO_TOKEN: u32 = 1008;
    pub const ERROR_PRIVILEGE_NOT_HELD: u32 = 1314;
    pub const RPC_S_SERVER_UNAVAILABLE: u32 = 1722;
    pub const ERROR_CTX_WINSTATION_NOT_FOUND: u32 = 7022;
}

/// Error kinds produced while querying or acting on sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionErrorKind {
    /// The session host could not be opened or enumerated. Carries the native code.
    HostUnavailable(u32),
    /// The id or user filter matched nothing at validation time.
    SessionNotFound,
    /// A single attribute could not be resolved. Never aborts a query.
    AttributeUnavailable,
    /// The session is in a state the requested action does not accept.
    ActionRejected,
    /// The native action call failed after validation. Carries the native code.
    ActionFailed(u32),
    /// The caller lacks the rights needed to act on the session desktop.
    PrivilegeDenied,
    /// The caller-side deadline elapsed; the native call was abandoned.
    Timeout,
    /// Invalid parameter supplied.
    InvalidParameter,
    /// The native back-end is not available on this platform.
    PlatformNotSupported,
    /// The remote execution context failed to run the command.
    Remote,
    /// Generic / catch-all.
    Other,
}

/// All possible errors produced by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{kind:?}] {message}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn platform() -> Self {
        Self::new(
            SessionErrorKind::PlatformNotSupported,
            "the native session API is only available on Windows",
        )
    }

    pub fn host_unavailable(host: &str, code: u32) -> Self {
        Self::new(
            SessionErrorKind::HostUnavailable(code),
            format!("session host '{}' unavailable: native error {}", host, code),
        )
    }

    pub fn session_not_found(session_id: u32) -> Self {
        Self::new(
            SessionErrorKind::SessionNotFound,
            format!("session {} does not exist", session_id),
        )
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::ActionRejected, message)
    }

    /// Map a native failure code from an action call.
    ///
    /// Privilege failures get their own kind so callers can tell a missing
    /// right apart from a failed call.
    pub fn action_failed(context: &str, code: u32) -> Self {
        match code {
            codes::ERROR_PRIVILEGE_NOT_HELD => Self::new(
                SessionErrorKind::PrivilegeDenied,
                format!("{}: required privilege not held", context),
            ),
            _ => Self::new(
                SessionErrorKind::ActionFailed(code),
                format!("{}: native error {}", context, code),
            ),
        }
    }

    pub fn timeout(operation: &str, seconds: u64) -> Self {
        Self::new(
            SessionErrorKind::Timeout,
            format!("{} abandoned after {}s", operation, seconds),
        )
    }

    pub fn remote(host: &str, message: impl std::fmt::Display) -> Self {
        Self::new(
            SessionErrorKind::Remote,
            format!("remote execution on '{}' failed: {}", host, message),
        )
    }

    /// Whether this error aborts the whole operation rather than one action.
    pub fn is_operation_fatal(&self) -> bool {
        matches!(
            self.kind,
            SessionErrorKind::HostUnavailable(_)
                | SessionErrorKind::SessionNotFound
                | SessionErrorKind::Timeout
                | SessionErrorKind::PlatformNotSupported
                | SessionErrorKind::Remote
        )
    }
}

impl From<SessionError> for String {
    fn from(e: SessionError) -> Self {
        e.to_string()
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_contains_kind_and_message() {
        let e = SessionError::session_not_found(42);
        let s = e.to_string();
        assert!(s.contains("SessionNotFound"));
        assert!(s.contains("session 42"));
    }

    #[test]
    fn into_string() {
        let s: String = SessionError::rejected("listener").into();
        assert!(s.contains("ActionRejected"));
    }

    #[test]
    fn privilege_code_maps_to_privilege_denied() {
        let e = SessionError::action_failed("launch", codes::ERROR_PRIVILEGE_NOT_HELD);
        assert_eq!(e.kind, SessionErrorKind::PrivilegeDenied);
        let e = SessionError::action_failed("logoff", codes::ERROR_ACCESS_DENIED);
        assert_eq!(e.kind, SessionErrorKind::ActionFailed(5));
    }

    #[test]
    fn fatal_classification() {
        assert!(SessionError::host_unavailable("rdsh-01", 1722).is_operation_fatal());
        assert!(SessionError::session_not_found(3).is_operation_fatal());
        assert!(!SessionError::rejected("x").is_operation_fatal());
        assert!(!SessionError::action_failed("x", 5).is_operation_fatal());
    }

    #[test]
    fn kind_serde_roundtrip() {
        let kinds = vec![
            SessionErrorKind::HostUnavailable(1722),
            SessionErrorKind::SessionNotFound,
            SessionErrorKind::AttributeUnavailable,
            SessionErrorKind::ActionRejected,
            SessionErrorKind::ActionFailed(5),
            SessionErrorKind::PrivilegeDenied,
            SessionErrorKind::Timeout,
        ];
        for k in kinds {
            let e = SessionError::new(k.clone(), "test");
            let json = serde_json::to_string(&e).unwrap();
            let back: SessionError = serde_json::from_str(&json).unwrap();
            assert_eq!(back.kind, k);
        }
    }

    #[test]
    fn platform_error() {
        let e = SessionError::platform();
        assert_eq!(e.kind, SessionErrorKind::PlatformNotSupported);
        assert!(e.message.contains("Windows"));
    }
}
