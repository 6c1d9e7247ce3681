//! Service configuration.

use crate::error::{SessionError, SessionErrorKind, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the session directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDirConfig {
    /// Deadline for one query or action (seconds). 0 disables the deadline.
    pub default_timeout_seconds: u64,
    /// Whether disconnect and log off wait for the host to finish.
    pub wait_for_actions: bool,
    /// Upper bound on waiting for a launched process to exit (seconds).
    pub launch_wait_timeout_seconds: u64,
    /// Name used for the local host and for `.\name` patterns.
    /// Falls back to the environment when unset.
    pub local_computer_name: Option<String>,
    /// Resolve the detailed block when a caller does not say.
    pub detailed_by_default: bool,
    /// Hosts queried at once during fan-out.
    pub max_parallel_hosts: usize,
}

impl Default for SessionDirConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            wait_for_actions: true,
            launch_wait_timeout_seconds: 300,
            local_computer_name: None,
            detailed_by_default: false,
            max_parallel_hosts: 8,
        }
    }
}

impl SessionDirConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SessionError::new(
                SessionErrorKind::InvalidParameter,
                format!("cannot read config {}: {}", path.display(), e),
            )
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> SessionResult<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| {
            SessionError::new(
                SessionErrorKind::InvalidParameter,
                format!("invalid config: {}", e),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.max_parallel_hosts == 0 {
            return Err(SessionError::new(
                SessionErrorKind::InvalidParameter,
                "maxParallelHosts must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.default_timeout_seconds > 0).then(|| Duration::from_secs(self.default_timeout_seconds))
    }

    pub fn launch_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_wait_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let c = SessionDirConfig::default();
        assert_eq!(c.default_timeout_seconds, 30);
        assert!(c.wait_for_actions);
        assert_eq!(c.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(c.launch_wait_timeout(), Duration::from_secs(300));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let c = SessionDirConfig {
            default_timeout_seconds: 0,
            ..Default::default()
        };
        assert_eq!(c.timeout(), None);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c = SessionDirConfig::from_json(r#"{"localComputerName":"WS01","detailedByDefault":true}"#)
            .unwrap();
        assert_eq!(c.local_computer_name.as_deref(), Some("WS01"));
        assert!(c.detailed_by_default);
        assert_eq!(c.max_parallel_hosts, 8);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = SessionDirConfig::from_json(r#"{"maxParallelHosts":0}"#).unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::InvalidParameter);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"defaultTimeoutSeconds":5,"waitForActions":false}}"#).unwrap();
        let c = SessionDirConfig::load(file.path()).unwrap();
        assert_eq!(c.default_timeout_seconds, 5);
        assert!(!c.wait_for_actions);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionDirConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(err.message.contains("absent.json"));
    }

    #[test]
    fn serde_roundtrip() {
        let c = SessionDirConfig {
            local_computer_name: Some("RDSH".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("launchWaitTimeoutSeconds"));
        let back: SessionDirConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
