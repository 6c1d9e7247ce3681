//! Remote dispatch through an external execution context.
//!
//! A remote host is driven by sending it a typed [`SessionCommand`]. The
//! peer decodes it and runs the same directory and dispatcher locally with
//! [`handle_command`], answering with a [`SessionReply`]. Commands are
//! plain data, so they serialize to JSON for any transport.

use crate::actions::ActionDispatcher;
use crate::directory::QueryOutcome;
use crate::error::{SessionError, SessionErrorKind, SessionResult};
use crate::filter::{SessionFilter, SessionQuery};
use crate::types::{
    ActionResult, BatchResult, HostSummary, HostTarget, LaunchRequest, LaunchResult,
    SendMessageRequest, SendMessageResult, SessionEntry,
};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum SessionCommand {
    Enumerate,
    Query {
        query: SessionQuery,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect {
        session_id: u32,
        wait: bool,
    },
    #[serde(rename_all = "camelCase")]
    LogOff {
        session_id: u32,
        wait: bool,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        session_id: u32,
        request: SendMessageRequest,
    },
    #[serde(rename_all = "camelCase")]
    LaunchInteractive {
        session_id: u32,
        request: LaunchRequest,
    },
    Summary,
    DisconnectMatching {
        filter: SessionFilter,
        wait: bool,
    },
    LogOffMatching {
        filter: SessionFilter,
        wait: bool,
    },
    MessageMatching {
        filter: SessionFilter,
        request: SendMessageRequest,
    },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enumerate => "enumerate",
            Self::Query { .. } => "query",
            Self::Disconnect { .. } => "disconnect",
            Self::LogOff { .. } => "logOff",
            Self::SendMessage { .. } => "sendMessage",
            Self::LaunchInteractive { .. } => "launchInteractive",
            Self::Summary => "summary",
            Self::DisconnectMatching { .. } => "disconnectMatching",
            Self::LogOffMatching { .. } => "logOffMatching",
            Self::MessageMatching { .. } => "messageMatching",
        }
    }

    pub fn to_json(&self) -> SessionResult<String> {
        serde_json::to_string(self)
            .map_err(|e| SessionError::new(SessionErrorKind::Other, e.to_string()))
    }

    pub fn from_json(text: &str) -> SessionResult<Self> {
        serde_json::from_str(text).map_err(|e| {
            SessionError::new(
                SessionErrorKind::InvalidParameter,
                format!("malformed session command: {}", e),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "data", rename_all = "camelCase")]
pub enum SessionReply {
    Entries(Vec<SessionEntry>),
    Sessions(QueryOutcome),
    Action(ActionResult),
    Message(SendMessageResult),
    Launch(LaunchResult),
    Summary(HostSummary),
    Batch(BatchResult),
    Error(SessionError),
}

fn unexpected(reply: &SessionReply, wanted: &str) -> SessionError {
    SessionError::new(
        SessionErrorKind::Remote,
        format!("expected {} reply, got {:?}", wanted, reply),
    )
}

impl SessionReply {
    pub fn into_entries(self) -> SessionResult<Vec<SessionEntry>> {
        match self {
            Self::Entries(e) => Ok(e),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "entries")),
        }
    }

    /// Records and the attributes the peer could not read.
    pub fn into_outcome(self) -> SessionResult<QueryOutcome> {
        match self {
            Self::Sessions(o) => Ok(o),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "sessions")),
        }
    }

    pub fn into_action(self) -> SessionResult<ActionResult> {
        match self {
            Self::Action(r) => Ok(r),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "action")),
        }
    }

    pub fn into_message(self) -> SessionResult<SendMessageResult> {
        match self {
            Self::Message(r) => Ok(r),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "message")),
        }
    }

    pub fn into_launch(self) -> SessionResult<LaunchResult> {
        match self {
            Self::Launch(r) => Ok(r),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "launch")),
        }
    }

    pub fn into_summary(self) -> SessionResult<HostSummary> {
        match self {
            Self::Summary(s) => Ok(s),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "summary")),
        }
    }

    pub fn into_batch(self) -> SessionResult<BatchResult> {
        match self {
            Self::Batch(b) => Ok(b),
            Self::Error(e) => Err(e),
            other => Err(unexpected(&other, "batch")),
        }
    }
}

/// Runs a command on the local host. This is what a peer executes after
/// decoding a command it received.
pub fn handle_command(dispatcher: &ActionDispatcher, command: SessionCommand) -> SessionReply {
    let local = HostTarget::Local;
    debug!("Handling {} command", command.name());
    let reply = match command {
        SessionCommand::Enumerate => dispatcher.directory().enumerate(&local).map(SessionReply::Entries),
        SessionCommand::Query { query } => dispatcher
            .directory()
            .query(&local, &query)
            .map(SessionReply::Sessions),
        SessionCommand::Disconnect { session_id, wait } => dispatcher
            .disconnect(&local, session_id, wait)
            .map(SessionReply::Action),
        SessionCommand::LogOff { session_id, wait } => dispatcher
            .logoff(&local, session_id, wait)
            .map(SessionReply::Action),
        SessionCommand::SendMessage {
            session_id,
            request,
        } => dispatcher
            .send_message(&local, session_id, &request)
            .map(SessionReply::Message),
        SessionCommand::LaunchInteractive {
            session_id,
            request,
        } => dispatcher
            .launch_interactive(&local, session_id, &request)
            .map(SessionReply::Launch),
        SessionCommand::Summary => dispatcher.directory().summary(&local).map(SessionReply::Summary),
        SessionCommand::DisconnectMatching { filter, wait } => dispatcher
            .disconnect_matching(&local, &filter, wait)
            .map(SessionReply::Batch),
        SessionCommand::LogOffMatching { filter, wait } => dispatcher
            .logoff_matching(&local, &filter, wait)
            .map(SessionReply::Batch),
        SessionCommand::MessageMatching { filter, request } => dispatcher
            .message_matching(&local, &filter, &request)
            .map(SessionReply::Batch),
    };
    reply.unwrap_or_else(SessionReply::Error)
}

/// Execution context on a remote host.
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host` and return its reply. Transport failures are
    /// `Remote` errors; failures on the peer come back as `SessionReply::Error`.
    async fn execute(&self, host: &str, command: SessionCommand) -> SessionResult<SessionReply>;
}

/// Executes commands in-process against a local dispatcher, passing them
/// through their JSON form exactly as a transport would.
#[derive(Clone)]
pub struct LocalExecutor {
    dispatcher: ActionDispatcher,
}

impl LocalExecutor {
    pub fn new(dispatcher: ActionDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn execute(&self, host: &str, command: SessionCommand) -> SessionResult<SessionReply> {
        let payload = command.to_json()?;
        let dispatcher = self.dispatcher.clone();
        let host_name = host.to_string();
        let reply = tokio::task::spawn_blocking(move || -> SessionResult<String> {
            let command = SessionCommand::from_json(&payload)?;
            serde_json::to_string(&handle_command(&dispatcher, command))
                .map_err(|e| SessionError::remote(&host_name, e))
        })
        .await
        .map_err(|e| SessionError::remote(host, e))??;
        serde_json::from_str(&reply).map_err(|e| SessionError::remote(host, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryClient;
    use crate::sim::{SimSession, SimulatedHost};
    use crate::types::{ActionOutcome, AttributeClass, SessionState};
    use std::sync::Arc;

    fn executor() -> (SimulatedHost, LocalExecutor) {
        let host = SimulatedHost::with_defaults("PEER");
        host.add_session(SimSession::new(2, "RDP-Tcp#0", SessionState::Active).user("CORP", "alice"));
        let d = ActionDispatcher::new(DirectoryClient::new(Arc::new(host.clone())));
        (host, LocalExecutor::new(d))
    }

    #[test]
    fn command_json_shape() {
        let cmd = SessionCommand::Disconnect {
            session_id: 3,
            wait: true,
        };
        let json = cmd.to_json().unwrap();
        assert_eq!(json, r#"{"command":"disconnect","sessionId":3,"wait":true}"#);
        assert_eq!(SessionCommand::from_json(&json).unwrap(), cmd);
    }

    #[test]
    fn malformed_command() {
        let err = SessionCommand::from_json(r#"{"command":"format-disk"}"#).unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn query_through_executor() {
        let (_host, exec) = executor();
        let cmd = SessionCommand::Query {
            query: SessionQuery::filtered(SessionFilter::by_user("alice")),
        };
        let outcome = exec.execute("PEER", cmd).await.unwrap().into_outcome().unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].host_name, "PEER");
        assert!(outcome.misses.is_empty());
    }

    #[tokio::test]
    async fn query_carries_peer_misses() {
        let (host, exec) = executor();
        host.fail_attribute_for(2, AttributeClass::ClientDisplay);
        let cmd = SessionCommand::Query {
            query: SessionQuery::filtered(SessionFilter::by_id(2)).detailed(),
        };
        let outcome = exec.execute("PEER", cmd).await.unwrap().into_outcome().unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.misses.len(), 1);
        assert_eq!(outcome.misses[0].class, AttributeClass::ClientDisplay);
    }

    #[tokio::test]
    async fn batch_through_executor() {
        let (host, exec) = executor();
        let cmd = SessionCommand::LogOffMatching {
            filter: SessionFilter::by_user("alice"),
            wait: false,
        };
        let batch = exec.execute("PEER", cmd).await.unwrap().into_batch().unwrap();
        assert_eq!(batch.succeeded, 1);
        assert_eq!(host.session_state(2), None);

        let entries = exec
            .execute("PEER", SessionCommand::Enumerate)
            .await
            .unwrap()
            .into_entries()
            .unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn action_through_executor() {
        let (host, exec) = executor();
        let cmd = SessionCommand::Disconnect {
            session_id: 2,
            wait: false,
        };
        let r = exec.execute("PEER", cmd).await.unwrap().into_action().unwrap();
        assert_eq!(r.outcome, Some(ActionOutcome::Performed));
        assert_eq!(host.session_state(2), Some(SessionState::Disconnected));
    }

    #[tokio::test]
    async fn peer_error_comes_back_as_error() {
        let (_host, exec) = executor();
        let cmd = SessionCommand::LogOff {
            session_id: 77,
            wait: false,
        };
        let err = exec.execute("PEER", cmd).await.unwrap().into_action().unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::SessionNotFound);
    }

    #[test]
    fn mismatched_reply_is_remote_error() {
        let reply = SessionReply::Summary(HostSummary::default());
        let err = reply.into_outcome().unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::Remote);
    }
}
