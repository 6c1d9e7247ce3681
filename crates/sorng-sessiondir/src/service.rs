//! Async service facade for the session directory.
//!
//! Each operation runs its synchronous native call sequence on the blocking
//! pool under the configured deadline. Named hosts are reached through the
//! remote executor when one is installed, otherwise by opening the host
//! directly. Results and failures are reported to the audit sink.
//! Provides the `SessionDirServiceState` alias for shared ownership.

use crate::actions::ActionDispatcher;
use crate::audit::{AuditEvent, AuditKind, AuditSink, LogAuditSink};
use crate::config::SessionDirConfig;
use crate::directory::{DirectoryClient, QueryOutcome};
use crate::error::{SessionError, SessionResult};
use crate::filter::{SessionFilter, SessionQuery};
use crate::host::SessionHost;
use crate::remote::{RemoteExecutor, SessionCommand, SessionReply};
use crate::types::*;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Alias for shared managed state.
pub type SessionDirServiceState = Arc<Mutex<SessionDirService>>;

/// Per-host outcome of a fan-out query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostQueryResult {
    pub target: HostTarget,
    pub sessions: Option<Vec<SessionRecord>>,
    pub error: Option<SessionError>,
}

/// Time an operation may spend blocked on a user or a child process, on
/// top of the configured deadline.
#[derive(Debug, Clone, Copy)]
enum WaitAllowance {
    None,
    Bounded(Duration),
    Unbounded,
}

impl WaitAllowance {
    fn for_message(request: &SendMessageRequest) -> Self {
        match (request.wait, request.timeout_seconds) {
            (false, _) => Self::None,
            (true, 0) => Self::Unbounded,
            (true, secs) => Self::Bounded(Duration::from_secs(u64::from(secs))),
        }
    }
}

/// Central service for session queries and actions.
pub struct SessionDirService {
    host: Arc<dyn SessionHost>,
    audit: Arc<dyn AuditSink>,
    executor: Option<Arc<dyn RemoteExecutor>>,
    config: SessionDirConfig,
}

impl Default for SessionDirService {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDirService {
    /// Create a new service over the native host with default config.
    pub fn new() -> Self {
        Self::with_config(SessionDirConfig::default())
    }

    pub fn with_config(config: SessionDirConfig) -> Self {
        Self::with_host(Arc::new(crate::NativeHost::default()), config)
    }

    pub fn with_host(host: Arc<dyn SessionHost>, config: SessionDirConfig) -> Self {
        Self {
            host,
            audit: Arc::new(LogAuditSink),
            executor: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Route named hosts through `executor` instead of opening them directly.
    pub fn with_executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn new_state() -> SessionDirServiceState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn into_state(self) -> SessionDirServiceState {
        Arc::new(Mutex::new(self))
    }

    pub fn get_config(&self) -> SessionDirConfig {
        self.config.clone()
    }

    pub fn set_config(&mut self, config: SessionDirConfig) {
        self.config = config;
    }

    fn directory(&self) -> DirectoryClient {
        DirectoryClient::new(Arc::clone(&self.host))
            .with_local_name(self.config.local_computer_name.clone())
    }

    fn dispatcher(&self) -> ActionDispatcher {
        ActionDispatcher::new(self.directory())
            .with_launch_wait_timeout(self.config.launch_wait_timeout())
    }

    fn remote_for<'a>(&'a self, target: &'a HostTarget) -> Option<(&'a str, &'a Arc<dyn RemoteExecutor>)> {
        match (target, &self.executor) {
            (HostTarget::Named(name), Some(exec)) => Some((name.as_str(), exec)),
            _ => None,
        }
    }

    // ─── Execution plumbing ──────────────────────────────────────

    fn deadline(&self, allowance: WaitAllowance) -> Option<Duration> {
        let base = self.config.timeout()?;
        match allowance {
            WaitAllowance::None => Some(base),
            WaitAllowance::Bounded(extra) => Some(base + extra),
            WaitAllowance::Unbounded => None,
        }
    }

    async fn with_deadline<T, F>(&self, operation: &str, allowance: WaitAllowance, fut: F) -> SessionResult<T>
    where
        F: Future<Output = SessionResult<T>>,
    {
        match self.deadline(allowance) {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!("{} abandoned after {:?}", operation, limit);
                SessionError::timeout(operation, limit.as_secs())
            })?,
            None => fut.await,
        }
    }

    /// Run a blocking native sequence on the blocking pool under the deadline.
    /// On expiry the task is abandoned; it finishes in the background.
    async fn run_blocking<T, F>(&self, operation: &str, allowance: WaitAllowance, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> SessionResult<T> + Send + 'static,
    {
        let task = async move {
            tokio::task::spawn_blocking(f).await.map_err(|e| {
                SessionError::new(
                    crate::error::SessionErrorKind::Other,
                    format!("native task failed: {}", e),
                )
            })?
        };
        self.with_deadline(operation, allowance, task).await
    }

    async fn run_remote(
        &self,
        host: &str,
        exec: &Arc<dyn RemoteExecutor>,
        allowance: WaitAllowance,
        command: SessionCommand,
    ) -> SessionResult<SessionReply> {
        debug!("Sending {} command to {}", command.name(), host);
        let operation = format!("remote {} on {}", command.name(), host);
        self.with_deadline(&operation, allowance, exec.execute(host, command))
            .await
    }

    async fn audit_failure(&self, target: &HostTarget, err: &SessionError) {
        self.audit
            .record(AuditEvent::new(target.to_string(), AuditKind::OperationFailed, err.message.clone()).error(err))
            .await;
    }

    async fn audit_action(&self, target: &HostTarget, id: u32, action: ActionKind, failure: Option<&SessionError>) {
        self.audit
            .record(AuditEvent::for_action(&target.to_string(), id, action, failure))
            .await;
    }

    async fn audited<T>(&self, target: &HostTarget, result: SessionResult<T>) -> SessionResult<T> {
        if let Err(e) = &result {
            self.audit_failure(target, e).await;
        }
        result
    }

    // ─── Queries ─────────────────────────────────────────────────

    /// Bare enumeration: id, station name and state of every session.
    pub async fn enumerate(&self, target: &HostTarget) -> SessionResult<Vec<SessionEntry>> {
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::Enumerate)
                .await
                .and_then(|r| r.into_entries())
        } else {
            let dir = self.directory();
            let t = target.clone();
            self.run_blocking("enumerate", WaitAllowance::None, move || dir.enumerate(&t))
                .await
        };
        self.audited(target, result).await
    }

    /// Resolved and filtered sessions on one host.
    pub async fn query(&self, target: &HostTarget, query: SessionQuery) -> SessionResult<Vec<SessionRecord>> {
        let outcome: SessionResult<QueryOutcome> = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::Query { query })
                .await
                .and_then(|r| r.into_outcome())
        } else {
            let dir = self.directory();
            let t = target.clone();
            self.run_blocking("query", WaitAllowance::None, move || dir.query(&t, &query))
                .await
        };
        let result = match outcome {
            Ok(outcome) => {
                let host_name = self.directory().host_name(target);
                for miss in &outcome.misses {
                    self.audit.record(AuditEvent::from_miss(&host_name, miss)).await;
                }
                Ok(outcome.records)
            }
            Err(e) => Err(e),
        };
        if let Ok(records) = &result {
            self.audit
                .record(AuditEvent::new(
                    target.to_string(),
                    AuditKind::Query,
                    format!("{} sessions", records.len()),
                ))
                .await;
        }
        self.audited(target, result).await
    }

    /// Filtered sessions, detailed according to the configuration.
    pub async fn list_sessions(
        &self,
        target: &HostTarget,
        filter: SessionFilter,
    ) -> SessionResult<Vec<SessionRecord>> {
        let query = SessionQuery {
            filter,
            detailed: self.config.detailed_by_default,
        };
        self.query(target, query).await
    }

    /// One session with its detailed block.
    pub async fn get_session(&self, target: &HostTarget, session_id: u32) -> SessionResult<SessionRecord> {
        let query = SessionQuery::filtered(SessionFilter::by_id(session_id)).detailed();
        self.query(target, query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::session_not_found(session_id))
    }

    /// Query several hosts at once. Each host succeeds or fails on its own.
    pub async fn query_many(&self, targets: Vec<HostTarget>, query: SessionQuery) -> Vec<HostQueryResult> {
        let limit = self.config.max_parallel_hosts.max(1);
        stream::iter(targets)
            .map(|target| {
                let query = query.clone();
                async move {
                    match self.query(&target, query).await {
                        Ok(sessions) => HostQueryResult {
                            target,
                            sessions: Some(sessions),
                            error: None,
                        },
                        Err(e) => HostQueryResult {
                            target,
                            sessions: None,
                            error: Some(e),
                        },
                    }
                }
            })
            .buffered(limit)
            .collect()
            .await
    }

    pub async fn summary(&self, target: &HostTarget) -> SessionResult<HostSummary> {
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::Summary)
                .await
                .and_then(|r| r.into_summary())
        } else {
            let dir = self.directory();
            let t = target.clone();
            self.run_blocking("summary", WaitAllowance::None, move || dir.summary(&t))
                .await
        };
        self.audited(target, result).await
    }

    // ─── Actions ─────────────────────────────────────────────────

    pub async fn disconnect(&self, target: &HostTarget, session_id: u32) -> SessionResult<ActionResult> {
        let wait = self.config.wait_for_actions;
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::Disconnect { session_id, wait })
                .await
                .and_then(|r| r.into_action())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("disconnect", WaitAllowance::None, move || d.disconnect(&t, session_id, wait))
                .await
        };
        if let Ok(r) = &result {
            self.audit_action(target, session_id, ActionKind::Disconnect, r.failure.as_ref())
                .await;
        }
        self.audited(target, result).await
    }

    pub async fn logoff(&self, target: &HostTarget, session_id: u32) -> SessionResult<ActionResult> {
        let wait = self.config.wait_for_actions;
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::LogOff { session_id, wait })
                .await
                .and_then(|r| r.into_action())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("logoff", WaitAllowance::None, move || d.logoff(&t, session_id, wait))
                .await
        };
        if let Ok(r) = &result {
            self.audit_action(target, session_id, ActionKind::LogOff, r.failure.as_ref())
                .await;
        }
        self.audited(target, result).await
    }

    pub async fn send_message(
        &self,
        target: &HostTarget,
        session_id: u32,
        request: SendMessageRequest,
    ) -> SessionResult<SendMessageResult> {
        let allowance = WaitAllowance::for_message(&request);
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, allowance, SessionCommand::SendMessage { session_id, request })
                .await
                .and_then(|r| r.into_message())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("send message", allowance, move || d.send_message(&t, session_id, &request))
                .await
        };
        if let Ok(r) = &result {
            self.audit_action(target, session_id, ActionKind::SendMessage, r.failure.as_ref())
                .await;
        }
        self.audited(target, result).await
    }

    pub async fn launch_interactive(
        &self,
        target: &HostTarget,
        session_id: u32,
        request: LaunchRequest,
    ) -> SessionResult<LaunchResult> {
        let allowance = if request.wait {
            WaitAllowance::Bounded(self.config.launch_wait_timeout())
        } else {
            WaitAllowance::None
        };
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, allowance, SessionCommand::LaunchInteractive { session_id, request })
                .await
                .and_then(|r| r.into_launch())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("launch", allowance, move || d.launch_interactive(&t, session_id, &request))
                .await
        };
        if let Ok(r) = &result {
            self.audit_action(target, session_id, ActionKind::LaunchInteractive, r.failure.as_ref())
                .await;
        }
        self.audited(target, result).await
    }

    // ─── Batch operations ────────────────────────────────────────

    pub async fn disconnect_matching(&self, target: &HostTarget, filter: SessionFilter) -> SessionResult<BatchResult> {
        let wait = self.config.wait_for_actions;
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::DisconnectMatching { filter, wait })
                .await
                .and_then(|r| r.into_batch())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("batch disconnect", WaitAllowance::None, move || {
                d.disconnect_matching(&t, &filter, wait)
            })
            .await
        };
        self.finish_batch(target, "disconnect", result).await
    }

    pub async fn logoff_matching(&self, target: &HostTarget, filter: SessionFilter) -> SessionResult<BatchResult> {
        let wait = self.config.wait_for_actions;
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, WaitAllowance::None, SessionCommand::LogOffMatching { filter, wait })
                .await
                .and_then(|r| r.into_batch())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("batch logoff", WaitAllowance::None, move || {
                d.logoff_matching(&t, &filter, wait)
            })
            .await
        };
        self.finish_batch(target, "logoff", result).await
    }

    /// Waited prompts run one session after another, so the deadline is
    /// lifted for them.
    pub async fn message_matching(
        &self,
        target: &HostTarget,
        filter: SessionFilter,
        request: SendMessageRequest,
    ) -> SessionResult<BatchResult> {
        let allowance = match WaitAllowance::for_message(&request) {
            WaitAllowance::None => WaitAllowance::None,
            _ => WaitAllowance::Unbounded,
        };
        let result = if let Some((host, exec)) = self.remote_for(target) {
            self.run_remote(host, exec, allowance, SessionCommand::MessageMatching { filter, request })
                .await
                .and_then(|r| r.into_batch())
        } else {
            let d = self.dispatcher();
            let t = target.clone();
            self.run_blocking("batch message", allowance, move || {
                d.message_matching(&t, &filter, &request)
            })
            .await
        };
        self.finish_batch(target, "message", result).await
    }

    async fn finish_batch(
        &self,
        target: &HostTarget,
        what: &str,
        result: SessionResult<BatchResult>,
    ) -> SessionResult<BatchResult> {
        if let Ok(br) = &result {
            info!(
                "Batch {} on {}: {} ok, {} failed",
                what, target, br.succeeded, br.failed
            );
        }
        self.audited(target, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::error::SessionErrorKind;
    use crate::host::ServerHandle;
    use crate::remote::LocalExecutor;
    use crate::sim::{SimSession, SimulatedHost};

    fn service(host: &SimulatedHost) -> (SessionDirService, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let svc = SessionDirService::with_host(Arc::new(host.clone()), SessionDirConfig::default())
            .with_audit(audit.clone());
        (svc, audit)
    }

    fn populated() -> SimulatedHost {
        let host = SimulatedHost::with_defaults("WS01");
        host.add_session(
            SimSession::new(2, "RDP-Tcp#0", SessionState::Active)
                .user("CORP", "alice")
                .ipv4([10, 1, 1, 1]),
        );
        host
    }

    #[test]
    fn service_new() {
        let svc = SessionDirService::new();
        let config = svc.get_config();
        assert_eq!(config.default_timeout_seconds, 30);
        assert!(config.wait_for_actions);
    }

    #[test]
    fn service_state_is_sendable() {
        fn assert_send<T: Send + Sync>() {}
        assert_send::<SessionDirServiceState>();
        drop(SessionDirService::new_state());
    }

    #[test]
    fn set_config() {
        let mut svc = SessionDirService::new();
        svc.set_config(SessionDirConfig {
            default_timeout_seconds: 60,
            ..Default::default()
        });
        assert_eq!(svc.get_config().default_timeout_seconds, 60);
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn native_host_reports_platform_off_windows() {
        let svc = SessionDirService::new();
        let err = svc.enumerate(&HostTarget::Local).await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::PlatformNotSupported);
    }

    #[tokio::test]
    async fn query_audits_misses() {
        let host = populated();
        host.fail_attribute_for(2, AttributeClass::ClientAddress);
        let (svc, audit) = service(&host);
        let records = svc
            .query(&HostTarget::Local, SessionQuery::all().detailed())
            .await
            .unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(audit.count(AuditKind::AttributeUnavailable).await, 1);
        assert_eq!(audit.count(AuditKind::Query).await, 1);
    }

    #[tokio::test]
    async fn get_session_is_detailed() {
        let host = populated();
        let (svc, _) = service(&host);
        let r = svc.get_session(&HostTarget::Local, 2).await.unwrap();
        assert_eq!(r.detail.unwrap().client_address.unwrap().address, "10.1.1.1");
        let err = svc.get_session(&HostTarget::Local, 42).await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn list_sessions_honours_detailed_default() {
        let host = populated();
        let (mut svc, _) = service(&host);
        let plain = svc
            .list_sessions(&HostTarget::Local, SessionFilter::by_id(2))
            .await
            .unwrap();
        assert!(plain[0].detail.is_none());
        svc.set_config(SessionDirConfig {
            detailed_by_default: true,
            ..Default::default()
        });
        let detailed = svc
            .list_sessions(&HostTarget::Local, SessionFilter::by_id(2))
            .await
            .unwrap();
        assert!(detailed[0].detail.is_some());
    }

    #[tokio::test]
    async fn actions_are_audited() {
        let host = populated();
        let (svc, audit) = service(&host);
        let r = svc.disconnect(&HostTarget::Local, 2).await.unwrap();
        assert!(r.success);
        let r = svc.logoff(&HostTarget::Local, 65536).await.unwrap();
        assert!(!r.success);
        assert_eq!(audit.count(AuditKind::ActionSucceeded).await, 1);
        assert_eq!(audit.count(AuditKind::ActionFailed).await, 1);

        let err = svc.logoff(&HostTarget::Local, 99).await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::SessionNotFound);
        assert_eq!(audit.count(AuditKind::OperationFailed).await, 1);
    }

    #[tokio::test]
    async fn launch_and_message() {
        let host = populated();
        let (svc, _) = service(&host);
        let r = svc
            .launch_interactive(&HostTarget::Local, 2, LaunchRequest::new("notepad.exe"))
            .await
            .unwrap();
        assert!(r.success);
        let r = svc
            .send_message(&HostTarget::Local, 2, SendMessageRequest::new("Hi", "there"))
            .await
            .unwrap();
        assert!(r.delivered);
    }

    #[tokio::test]
    async fn batch_operations() {
        let host = populated();
        let (svc, _) = service(&host);
        let br = svc
            .message_matching(
                &HostTarget::Local,
                SessionFilter::default().excluding_system(),
                SendMessageRequest::new("Notice", "Reboot at 18:00"),
            )
            .await
            .unwrap();
        assert_eq!(br.succeeded, 2);
        let br = svc
            .disconnect_matching(&HostTarget::Local, SessionFilter::by_user("alice"))
            .await
            .unwrap();
        assert_eq!(br.succeeded, 1);
        let br = svc
            .logoff_matching(&HostTarget::Local, SessionFilter::by_user("alice"))
            .await
            .unwrap();
        assert_eq!(br.succeeded, 1);
        assert_eq!(host.session_state(2), None);
    }

    #[tokio::test]
    async fn fan_out_keeps_per_host_results() {
        let host = populated();
        let (svc, _) = service(&host);
        let results = svc
            .query_many(
                vec![HostTarget::Local, HostTarget::named("rdsh-01")],
                SessionQuery::all(),
            )
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].target, HostTarget::Local);
        assert_eq!(results[0].sessions.as_ref().unwrap().len(), 4);
        assert!(results[1].error.is_none());

        host.set_unreachable(Some(1722));
        let results = svc
            .query_many(vec![HostTarget::named("rdsh-01")], SessionQuery::all())
            .await;
        assert_eq!(
            results[0].error.as_ref().unwrap().kind,
            SessionErrorKind::HostUnavailable(1722)
        );
        assert!(results[0].sessions.is_none());
    }

    #[tokio::test]
    async fn named_host_goes_through_executor() {
        let local = populated();
        let peer = SimulatedHost::with_defaults("PEER");
        let exec = LocalExecutor::new(ActionDispatcher::new(DirectoryClient::new(Arc::new(
            peer.clone(),
        ))));
        let (svc, _) = service(&local);
        let svc = svc.with_executor(Arc::new(exec));

        let records = svc
            .query(&HostTarget::named("peer"), SessionQuery::all())
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.host_name == "PEER"));
        let summary = svc.summary(&HostTarget::named("peer")).await.unwrap();
        assert_eq!(summary.total_sessions, 3);
        let r = svc.disconnect(&HostTarget::named("peer"), 1).await.unwrap();
        assert!(r.success);
        assert_eq!(peer.session_state(1), Some(SessionState::Disconnected));
        // The local host was never touched.
        assert!(local.calls().is_empty());
    }

    #[tokio::test]
    async fn enumerate_and_batches_go_through_executor() {
        let local = populated();
        let peer = SimulatedHost::with_defaults("PEER");
        peer.add_session(SimSession::new(2, "RDP-Tcp#0", SessionState::Active).user("CORP", "alice"));
        let exec = LocalExecutor::new(ActionDispatcher::new(DirectoryClient::new(Arc::new(
            peer.clone(),
        ))));
        let (svc, _) = service(&local);
        let svc = svc.with_executor(Arc::new(exec));
        let target = HostTarget::named("peer");

        let entries = svc.enumerate(&target).await.unwrap();
        assert_eq!(entries.len(), 4);
        let br = svc
            .disconnect_matching(&target, SessionFilter::by_user("alice"))
            .await
            .unwrap();
        assert_eq!(br.succeeded, 1);
        assert_eq!(peer.session_state(2), Some(SessionState::Disconnected));
        let br = svc
            .message_matching(
                &target,
                SessionFilter::default().excluding_system(),
                SendMessageRequest::new("Notice", "Reboot"),
            )
            .await
            .unwrap();
        assert_eq!(br.succeeded, 2);
        let br = svc
            .logoff_matching(&target, SessionFilter::by_user("alice"))
            .await
            .unwrap();
        assert_eq!(br.succeeded, 1);
        assert_eq!(peer.session_state(2), None);
        assert!(local.calls().is_empty());
    }

    #[tokio::test]
    async fn peer_attribute_misses_are_audited() {
        let local = populated();
        let peer = SimulatedHost::with_defaults("PEER");
        peer.fail_attribute_for(1, AttributeClass::ClientAddress);
        let exec = LocalExecutor::new(ActionDispatcher::new(DirectoryClient::new(Arc::new(
            peer.clone(),
        ))));
        let (svc, audit) = service(&local);
        let svc = svc.with_executor(Arc::new(exec));
        let records = svc
            .query(&HostTarget::named("peer"), SessionQuery::all().detailed())
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(audit.count(AuditKind::AttributeUnavailable).await, 1);
    }

    /// Host whose prompts stay on screen for their whole timeout.
    struct SlowPromptHost(SimulatedHost);

    struct SlowPromptServer(Box<dyn ServerHandle>);

    impl SessionHost for SlowPromptHost {
        fn open(&self, target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>> {
            Ok(Box::new(SlowPromptServer(self.0.open(target)?)))
        }
    }

    impl ServerHandle for SlowPromptServer {
        fn enumerate_sessions(&self) -> SessionResult<Vec<SessionEntry>> {
            self.0.enumerate_sessions()
        }

        fn query_attribute(&self, session_id: u32, class: AttributeClass) -> SessionResult<Vec<u8>> {
            self.0.query_attribute(session_id, class)
        }

        fn disconnect(&self, session_id: u32, wait: bool) -> SessionResult<()> {
            self.0.disconnect(session_id, wait)
        }

        fn logoff(&self, session_id: u32, wait: bool) -> SessionResult<()> {
            self.0.logoff(session_id, wait)
        }

        fn send_message(&self, _session_id: u32, request: &SendMessageRequest) -> SessionResult<u32> {
            std::thread::sleep(Duration::from_secs(u64::from(request.timeout_seconds)));
            Ok(IDTIMEOUT)
        }

        fn launch_interactive(
            &self,
            session_id: u32,
            request: &LaunchRequest,
            wait_timeout: Duration,
        ) -> SessionResult<LaunchedProcess> {
            self.0.launch_interactive(session_id, request, wait_timeout)
        }

        fn list_processes(&self) -> SessionResult<Vec<ProcessEntry>> {
            self.0.list_processes()
        }
    }

    #[tokio::test]
    async fn waited_prompt_outlives_operation_deadline() {
        let cfg = SessionDirConfig {
            default_timeout_seconds: 1,
            ..Default::default()
        };
        let svc = SessionDirService::with_host(Arc::new(SlowPromptHost(populated())), cfg);
        let mut request = SendMessageRequest::new("Maintenance", "Save your work");
        request.wait = true;
        request.timeout_seconds = 2;
        let r = svc.send_message(&HostTarget::Local, 2, request).await.unwrap();
        assert!(!r.success);
        assert!(r.delivered);
        assert!(r.response.is_none());
        assert!(r.button_clicked.is_none());
    }

    #[test]
    fn deadline_widens_by_wait_bound() {
        let svc = SessionDirService::with_host(Arc::new(populated()), SessionDirConfig::default());
        let base = Duration::from_secs(30);
        assert_eq!(svc.deadline(WaitAllowance::None), Some(base));
        assert_eq!(
            svc.deadline(WaitAllowance::Bounded(Duration::from_secs(300))),
            Some(base + Duration::from_secs(300))
        );
        assert_eq!(svc.deadline(WaitAllowance::Unbounded), None);

        let mut request = SendMessageRequest::new("t", "m");
        assert!(matches!(WaitAllowance::for_message(&request), WaitAllowance::None));
        request.wait = true;
        assert!(matches!(WaitAllowance::for_message(&request), WaitAllowance::Unbounded));
    }

    /// Host whose open call blocks past the deadline.
    struct StalledHost;

    impl SessionHost for StalledHost {
        fn open(&self, _target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>> {
            std::thread::sleep(Duration::from_secs(2));
            Err(SessionError::platform())
        }
    }

    #[tokio::test]
    async fn deadline_abandons_stalled_host() {
        let cfg = SessionDirConfig {
            default_timeout_seconds: 1,
            ..Default::default()
        };
        let svc = SessionDirService::with_host(Arc::new(StalledHost), cfg);
        let err = svc.enumerate(&HostTarget::named("slow")).await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::Timeout);
    }
}
