//! Audit channel for queries, attribute misses and actions.

use crate::error::{SessionError, SessionErrorKind};
use crate::resolver::AttributeMiss;
use crate::types::{ActionKind, AttributeClass};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditKind {
    Query,
    AttributeUnavailable,
    ActionSucceeded,
    ActionFailed,
    OperationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub session_id: Option<u32>,
    pub kind: AuditKind,
    pub action: Option<ActionKind>,
    pub attribute: Option<AttributeClass>,
    pub error_kind: Option<SessionErrorKind>,
    pub message: String,
}

impl AuditEvent {
    pub fn new(host: impl Into<String>, kind: AuditKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            host: host.into(),
            session_id: None,
            kind,
            action: None,
            attribute: None,
            error_kind: None,
            message: message.into(),
        }
    }

    pub fn session(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn action(mut self, action: ActionKind) -> Self {
        self.action = Some(action);
        self
    }

    pub fn error(mut self, error: &SessionError) -> Self {
        self.error_kind = Some(error.kind.clone());
        self
    }

    pub fn from_miss(host: &str, miss: &AttributeMiss) -> Self {
        let mut ev = Self::new(host, AuditKind::AttributeUnavailable, miss.error.message.clone())
            .session(miss.session_id);
        ev.attribute = Some(miss.class);
        ev.error_kind = Some(SessionErrorKind::AttributeUnavailable);
        ev
    }

    /// Event for a finished action: success or the failure it carried.
    pub fn for_action(
        host: &str,
        session_id: u32,
        action: ActionKind,
        failure: Option<&SessionError>,
    ) -> Self {
        match failure {
            None => Self::new(host, AuditKind::ActionSucceeded, format!("{} succeeded", action))
                .session(session_id)
                .action(action),
            Some(e) => Self::new(host, AuditKind::ActionFailed, e.message.clone())
                .session(session_id)
                .action(action)
                .error(e),
        }
    }
}

/// Receiver of audit events.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Writes events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait::async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) {
        let session = event
            .session_id
            .map(|id| format!(" session {}", id))
            .unwrap_or_default();
        match event.kind {
            AuditKind::Query => debug!("[audit] {}{}: {}", event.host, session, event.message),
            AuditKind::AttributeUnavailable => debug!(
                "[audit] {}{}: {:?} unavailable: {}",
                event.host, session, event.attribute, event.message
            ),
            AuditKind::ActionSucceeded => {
                info!("[audit] {}{}: {}", event.host, session, event.message)
            }
            AuditKind::ActionFailed | AuditKind::OperationFailed => {
                warn!("[audit] {}{}: {}", event.host, session, event.message)
            }
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, kind: AuditKind) -> usize {
        self.events.lock().await.iter().filter(|e| e.kind == kind).count()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }
}
