//! State-changing actions against a single session.
//!
//! Every action opens a fresh handle, re-reads the target session from a
//! new enumeration and checks its state before making the native call. A
//! session that no longer exists is an error (`SessionNotFound`); a state
//! the action does not accept, or a failing native call, comes back as a
//! failed result so batch callers can carry on.

use crate::directory::{lookup, DirectoryClient};
use crate::error::{SessionError, SessionErrorKind, SessionResult};
use crate::filter::{SessionFilter, SessionQuery};
use crate::host::ServerHandle;
use crate::types::{
    ActionKind, ActionResult, BatchResult, HostTarget, LaunchRequest, LaunchResult,
    SendMessageRequest, SendMessageResult, SessionEntry, SessionState,
};
use log::{info, warn};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Clone)]
pub struct ActionDispatcher {
    directory: DirectoryClient,
    launch_wait_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(directory: DirectoryClient) -> Self {
        Self {
            directory,
            launch_wait_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_launch_wait_timeout(mut self, timeout: Duration) -> Self {
        self.launch_wait_timeout = timeout;
        self
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.directory
    }

    /// Open, re-validate and check the state precondition.
    ///
    /// The outer error aborts the call; the inner one is a rejection to be
    /// reported in the action's result.
    fn validate(
        &self,
        target: &HostTarget,
        session_id: u32,
        action: ActionKind,
    ) -> SessionResult<(Box<dyn ServerHandle>, Result<SessionEntry, SessionError>)> {
        let server = self.directory.open(target)?;
        let entry = lookup(server.as_ref(), session_id)?;
        if !action.accepts(entry.state) {
            let reason = SessionError::rejected(format!(
                "{} not allowed for session {} in state {}",
                action, session_id, entry.state
            ));
            warn!("{} on {}: {}", action, target, reason.message);
            return Ok((server, Err(reason)));
        }
        Ok((server, Ok(entry)))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Disconnect a session. Already-disconnected sessions are a no-op.
    pub fn disconnect(
        &self,
        target: &HostTarget,
        session_id: u32,
        wait: bool,
    ) -> SessionResult<ActionResult> {
        let action = ActionKind::Disconnect;
        let (server, entry) = self.validate(target, session_id, action)?;
        let entry = match entry {
            Ok(e) => e,
            Err(reason) => return Ok(ActionResult::failed(session_id, action, reason)),
        };
        if entry.state == SessionState::Disconnected {
            info!("Session {} on {} already disconnected", session_id, target);
            return Ok(ActionResult::no_op(session_id, action));
        }
        Ok(match server.disconnect(session_id, wait) {
            Ok(()) => {
                info!("Disconnected session {} on {}", session_id, target);
                ActionResult::performed(session_id, action)
            }
            Err(e) => {
                warn!("Disconnect of session {} on {} failed: {}", session_id, target, e);
                ActionResult::failed(session_id, action, e)
            }
        })
    }

    pub fn logoff(
        &self,
        target: &HostTarget,
        session_id: u32,
        wait: bool,
    ) -> SessionResult<ActionResult> {
        let action = ActionKind::LogOff;
        let (server, entry) = self.validate(target, session_id, action)?;
        if let Err(reason) = entry {
            return Ok(ActionResult::failed(session_id, action, reason));
        }
        Ok(match server.logoff(session_id, wait) {
            Ok(()) => {
                info!("Logged off session {} on {}", session_id, target);
                ActionResult::performed(session_id, action)
            }
            Err(e) => {
                warn!("Logoff of session {} on {} failed: {}", session_id, target, e);
                ActionResult::failed(session_id, action, e)
            }
        })
    }

    pub fn send_message(
        &self,
        target: &HostTarget,
        session_id: u32,
        request: &SendMessageRequest,
    ) -> SessionResult<SendMessageResult> {
        let (server, entry) = self.validate(target, session_id, ActionKind::SendMessage)?;
        if let Err(reason) = entry {
            return Ok(SendMessageResult::failed(session_id, reason));
        }
        Ok(match server.send_message(session_id, request) {
            Ok(code) => {
                info!(
                    "Message '{}' sent to session {} on {} (response {})",
                    request.title, session_id, target, code
                );
                SendMessageResult::from_response(session_id, code)
            }
            Err(e) => {
                warn!("Message to session {} on {} failed: {}", session_id, target, e);
                SendMessageResult::failed(session_id, e)
            }
        })
    }

    /// Run a command line on the session desktop as the session's user.
    pub fn launch_interactive(
        &self,
        target: &HostTarget,
        session_id: u32,
        request: &LaunchRequest,
    ) -> SessionResult<LaunchResult> {
        let (server, entry) = self.validate(target, session_id, ActionKind::LaunchInteractive)?;
        if let Err(reason) = entry {
            return Ok(LaunchResult::failed(session_id, reason));
        }
        let Some(image) = request.image_name() else {
            return Ok(LaunchResult::failed(
                session_id,
                SessionError::new(SessionErrorKind::InvalidParameter, "empty command line"),
            ));
        };

        // Processes already running, for picking out the new one afterwards.
        let before: Option<HashSet<u32>> = if request.wait {
            None
        } else {
            match server.list_processes() {
                Ok(list) => Some(list.into_iter().map(|p| p.process_id).collect()),
                Err(e) => {
                    warn!("Process snapshot before launch failed: {}", e);
                    None
                }
            }
        };

        let launched = match server.launch_interactive(session_id, request, self.launch_wait_timeout) {
            Ok(l) => l,
            Err(e) => {
                warn!("Launch in session {} on {} failed: {}", session_id, target, e);
                return Ok(LaunchResult::failed(session_id, e));
            }
        };

        let process_id = match (launched.process_id, before) {
            (Some(pid), _) => Some(pid),
            (None, Some(before)) => discover_pid(server.as_ref(), session_id, &image, &before),
            (None, None) => None,
        };
        info!(
            "Launched '{}' in session {} on {} (pid {:?}, exit {:?})",
            request.command_line, session_id, target, process_id, launched.exit_code
        );
        Ok(LaunchResult {
            session_id,
            success: true,
            process_id,
            exit_code: launched.exit_code,
            failure: None,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Batch operations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Ids of the sessions `filter` selects. Nothing selected is `SessionNotFound`.
    pub fn select(&self, target: &HostTarget, filter: &SessionFilter) -> SessionResult<Vec<u32>> {
        let outcome = self
            .directory
            .query(target, &SessionQuery::filtered(filter.clone()))?;
        if outcome.records.is_empty() {
            return Err(SessionError::new(
                SessionErrorKind::SessionNotFound,
                format!("no session on {} matches the filter", target),
            ));
        }
        Ok(outcome.records.iter().map(|r| r.session_id).collect())
    }

    fn batch<F>(&self, target: &HostTarget, filter: &SessionFilter, mut run: F) -> SessionResult<BatchResult>
    where
        F: FnMut(u32) -> SessionResult<Option<SessionError>>,
    {
        let ids = self.select(target, filter)?;
        let mut result = BatchResult::new();
        for id in ids {
            match run(id) {
                Ok(None) => result.record_success(),
                Ok(Some(e)) | Err(e) => {
                    result.record_failure(format!("session {}: {}", id, e));
                }
            }
        }
        info!(
            "Batch on {}: {} succeeded, {} failed",
            target, result.succeeded, result.failed
        );
        Ok(result)
    }

    pub fn disconnect_matching(
        &self,
        target: &HostTarget,
        filter: &SessionFilter,
        wait: bool,
    ) -> SessionResult<BatchResult> {
        self.batch(target, filter, |id| {
            self.disconnect(target, id, wait).map(|r| r.failure)
        })
    }

    pub fn logoff_matching(
        &self,
        target: &HostTarget,
        filter: &SessionFilter,
        wait: bool,
    ) -> SessionResult<BatchResult> {
        self.batch(target, filter, |id| self.logoff(target, id, wait).map(|r| r.failure))
    }

    /// A prompt counts as sent once delivered, whether or not it was answered.
    pub fn message_matching(
        &self,
        target: &HostTarget,
        filter: &SessionFilter,
        request: &SendMessageRequest,
    ) -> SessionResult<BatchResult> {
        self.batch(target, filter, |id| {
            self.send_message(target, id, request).map(|r| {
                if r.delivered {
                    None
                } else {
                    Some(r.failure.unwrap_or_else(|| {
                        SessionError::new(SessionErrorKind::Other, "message not delivered")
                    }))
                }
            })
        })
    }
}

/// Find the single new process with `image` in the session. Ambiguity or
/// an enumeration failure yields `None`.
fn discover_pid(
    server: &dyn ServerHandle,
    session_id: u32,
    image: &str,
    before: &HashSet<u32>,
) -> Option<u32> {
    let after = match server.list_processes() {
        Ok(list) => list,
        Err(e) => {
            warn!("Process snapshot after launch failed: {}", e);
            return None;
        }
    };
    let mut candidates = after.into_iter().filter(|p| {
        p.session_id == session_id
            && !before.contains(&p.process_id)
            && p.image_name.eq_ignore_ascii_case(image)
    });
    match (candidates.next(), candidates.next()) {
        (Some(p), None) => Some(p.process_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{NativeCall, SimSession, SimulatedHost};
    use crate::types::{ActionOutcome, ButtonClicked, MessageButtons, IDTIMEOUT};
    use std::sync::Arc;

    fn setup() -> (SimulatedHost, ActionDispatcher) {
        let host = SimulatedHost::with_defaults("WS01");
        host.add_session(
            SimSession::new(2, "RDP-Tcp#0", SessionState::Active).user("CORP", "alice"),
        );
        host.add_session(
            SimSession::new(3, "RDP-Tcp#1", SessionState::Disconnected).user("CORP", "bob"),
        );
        let d = ActionDispatcher::new(DirectoryClient::new(Arc::new(host.clone())));
        (host, d)
    }

    const LOCAL: HostTarget = HostTarget::Local;

    #[test]
    fn disconnect_active_session() {
        let (host, d) = setup();
        let r = d.disconnect(&LOCAL, 2, false).unwrap();
        assert!(r.success);
        assert_eq!(r.outcome, Some(ActionOutcome::Performed));
        assert_eq!(host.session_state(2), Some(SessionState::Disconnected));
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn disconnect_twice_is_no_op() {
        let (host, d) = setup();
        d.disconnect(&LOCAL, 2, false).unwrap();
        host.clear_calls();
        let r = d.disconnect(&LOCAL, 2, false).unwrap();
        assert!(r.success);
        assert_eq!(r.outcome, Some(ActionOutcome::NoOp));
        assert!(host.action_calls().is_empty());
    }

    #[test]
    fn listener_rejected() {
        let (host, d) = setup();
        let r = d.disconnect(&LOCAL, 65536, false).unwrap();
        assert!(!r.success);
        assert_eq!(r.failure.unwrap().kind, SessionErrorKind::ActionRejected);
        let r = d.logoff(&LOCAL, 65536, false).unwrap();
        assert!(!r.success);
        assert!(host.action_calls().is_empty());
    }

    #[test]
    fn stale_id_is_session_not_found() {
        let (host, d) = setup();
        host.remove_session(2);
        let err = d.logoff(&LOCAL, 2, false).unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::SessionNotFound);
        assert!(host.action_calls().is_empty());
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn logoff_removes_session() {
        let (host, d) = setup();
        let r = d.logoff(&LOCAL, 3, true).unwrap();
        assert!(r.success);
        assert_eq!(host.session_state(3), None);
    }

    #[test]
    fn message_response_decoded() {
        let (host, d) = setup();
        host.set_message_response(6);
        let mut req = SendMessageRequest::new("Update", "Restart now?");
        req.buttons = MessageButtons::YesNo;
        req.wait = true;
        let r = d.send_message(&LOCAL, 2, &req).unwrap();
        assert!(r.success);
        assert_eq!(r.button_clicked, Some(ButtonClicked::Yes));

        host.set_message_response(IDTIMEOUT);
        let r = d.send_message(&LOCAL, 2, &req).unwrap();
        assert!(!r.success);
        assert!(r.delivered);
        assert!(r.button_clicked.is_none());
    }

    #[test]
    fn message_to_listener_allowed() {
        let (host, d) = setup();
        let r = d
            .send_message(&LOCAL, 65536, &SendMessageRequest::new("t", "m"))
            .unwrap();
        assert!(r.delivered);
        assert_eq!(host.action_calls(), vec![NativeCall::SendMessage(65536)]);
    }

    #[test]
    fn launch_reports_pid_from_primitive() {
        let (_host, d) = setup();
        let r = d
            .launch_interactive(&LOCAL, 2, &LaunchRequest::new("notepad.exe"))
            .unwrap();
        assert!(r.success);
        assert!(r.process_id.is_some());
        assert!(r.exit_code.is_none());
    }

    #[test]
    fn launch_discovers_pid_by_rescan() {
        let (host, d) = setup();
        host.set_launch_reports_pid(false);
        host.add_process(2, 10, "notepad.exe");
        let r = d
            .launch_interactive(&LOCAL, 2, &LaunchRequest::new("notepad.exe"))
            .unwrap();
        let pid = r.process_id.unwrap();
        assert_ne!(pid, 10);
        assert!(host
            .processes()
            .iter()
            .any(|p| p.process_id == pid && p.session_id == 2));
    }

    #[test]
    fn launch_wait_returns_exit_code() {
        let (host, d) = setup();
        host.set_launch_exit_code(3);
        let mut req = LaunchRequest::new("cmd.exe /c exit 3");
        req.wait = true;
        let r = d.launch_interactive(&LOCAL, 2, &req).unwrap();
        assert_eq!(r.exit_code, Some(3));
        assert!(!host.calls().contains(&NativeCall::ListProcesses));
    }

    #[test]
    fn launch_without_privilege_is_reported() {
        let (host, d) = setup();
        host.set_privilege_held(false);
        let r = d
            .launch_interactive(&LOCAL, 2, &LaunchRequest::new("notepad.exe"))
            .unwrap();
        assert!(!r.success);
        assert_eq!(r.failure.unwrap().kind, SessionErrorKind::PrivilegeDenied);
    }

    #[test]
    fn launch_empty_command_line() {
        let (host, d) = setup();
        let r = d
            .launch_interactive(&LOCAL, 2, &LaunchRequest::new("  "))
            .unwrap();
        assert_eq!(r.failure.unwrap().kind, SessionErrorKind::InvalidParameter);
        assert!(host.action_calls().is_empty());
    }

    #[test]
    fn batch_disconnect_by_user() {
        let (host, d) = setup();
        host.add_session(
            SimSession::new(4, "RDP-Tcp#2", SessionState::Active).user("CORP", "alfred"),
        );
        let br = d
            .disconnect_matching(&LOCAL, &SessionFilter::by_user("al*"), false)
            .unwrap();
        assert_eq!(br.succeeded, 2);
        assert_eq!(br.failed, 0);
        assert_eq!(host.session_state(4), Some(SessionState::Disconnected));
    }

    #[test]
    fn batch_with_no_match_is_not_found() {
        let (_host, d) = setup();
        let err = d
            .logoff_matching(&LOCAL, &SessionFilter::by_user("nobody"), false)
            .unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::SessionNotFound);
    }

    #[test]
    fn batch_message_counts_deliveries() {
        let (_host, d) = setup();
        let br = d
            .message_matching(
                &LOCAL,
                &SessionFilter::default().excluding_system(),
                &SendMessageRequest::new("Notice", "Maintenance at 18:00"),
            )
            .unwrap();
        assert_eq!(br.succeeded, 3);
    }
}
