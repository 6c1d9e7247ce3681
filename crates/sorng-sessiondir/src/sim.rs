//! A fully in-memory session host for tests and offline use.
//!
//! Attribute buffers are encoded with the same schema tables the decoders
//! read, so the whole resolve path runs exactly as against a real host.
//! Every native call is recorded for assertions, and individual attribute
//! classes or whole hosts can be made to fail.

use crate::error::{codes, SessionError, SessionErrorKind, SessionResult};
use crate::host::{ServerHandle, SessionHost};
use crate::layout::{self, SchemaId};
use crate::types::{
    AttributeClass, HostTarget, LaunchRequest, LaunchedProcess, NetworkCounters,
    ProcessEntry, SendMessageRequest, SessionConfiguration, SessionEntry, SessionState,
    ShadowPolicy, IDASYNC,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One session as the simulated host reports it.
#[derive(Debug, Clone)]
pub struct SimSession {
    pub session_id: u32,
    pub win_station_name: String,
    pub state: SessionState,
    pub user_name: Option<String>,
    pub domain_name: Option<String>,
    pub client_name: Option<String>,
    pub client_protocol: Option<u16>,
    pub client_build_number: Option<u32>,
    pub client_directory: Option<String>,
    /// Native family code and address payload.
    pub client_address: Option<(u32, Vec<u8>)>,
    /// Width, height and native colour-depth code.
    pub client_display: Option<(u32, u32, u32)>,
    pub logon_time: Option<DateTime<Utc>>,
    pub connect_time: Option<DateTime<Utc>>,
    pub disconnect_time: Option<DateTime<Utc>>,
    pub last_input_time: Option<DateTime<Utc>>,
    pub counters: NetworkCounters,
    /// Native SessionFlags value.
    pub session_flags: i32,
    pub configuration: Option<SessionConfiguration>,
}

impl SimSession {
    pub fn new(session_id: u32, win_station_name: impl Into<String>, state: SessionState) -> Self {
        Self {
            session_id,
            win_station_name: win_station_name.into(),
            state,
            user_name: None,
            domain_name: None,
            client_name: None,
            client_protocol: None,
            client_build_number: None,
            client_directory: None,
            client_address: None,
            client_display: None,
            logon_time: None,
            connect_time: None,
            disconnect_time: None,
            last_input_time: None,
            counters: NetworkCounters::default(),
            session_flags: -1,
            configuration: None,
        }
    }

    /// The services session every host has.
    pub fn services() -> Self {
        Self::new(0, "Services", SessionState::Disconnected)
    }

    /// An RDP listener.
    pub fn listener(session_id: u32) -> Self {
        Self::new(session_id, "RDP-Tcp", SessionState::Listen)
    }

    pub fn user(mut self, domain: &str, name: &str) -> Self {
        self.domain_name = Some(domain.to_string());
        self.user_name = Some(name.to_string());
        self
    }

    pub fn client(mut self, name: &str, protocol: u16) -> Self {
        self.client_name = Some(name.to_string());
        self.client_protocol = Some(protocol);
        self
    }

    pub fn ipv4(mut self, octets: [u8; 4]) -> Self {
        self.client_address = Some((2, octets.to_vec()));
        self
    }

    pub fn address(mut self, family: u32, payload: &[u8]) -> Self {
        self.client_address = Some((family, payload.to_vec()));
        self
    }

    pub fn display(mut self, width: u32, height: u32, depth_code: u32) -> Self {
        self.client_display = Some((width, height, depth_code));
        self
    }

    pub fn logon_at(mut self, at: DateTime<Utc>) -> Self {
        self.logon_time = Some(at);
        self.connect_time = Some(at);
        self
    }

    pub fn last_input_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_input_time = Some(at);
        self
    }

    pub fn locked(mut self, locked: bool) -> Self {
        self.session_flags = if locked { 0 } else { 1 };
        self
    }

    pub fn configured(mut self, cfg: SessionConfiguration) -> Self {
        self.configuration = Some(cfg);
        self
    }

    fn entry(&self) -> SessionEntry {
        SessionEntry {
            session_id: self.session_id,
            win_station_name: self.win_station_name.clone(),
            state: self.state,
        }
    }
}

/// A native call the simulated host received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
    Open(HostTarget),
    Close,
    Enumerate,
    Query(u32, AttributeClass),
    Disconnect(u32),
    Logoff(u32),
    SendMessage(u32),
    Launch(u32),
    ListProcesses,
}

impl NativeCall {
    /// Whether this call changes session state.
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            Self::Disconnect(_) | Self::Logoff(_) | Self::SendMessage(_) | Self::Launch(_)
        )
    }
}

#[derive(Debug)]
struct SimState {
    computer_name: String,
    sessions: Vec<SimSession>,
    processes: Vec<ProcessEntry>,
    calls: Vec<NativeCall>,
    open_handles: usize,
    unreachable: Option<u32>,
    failing: HashSet<AttributeClass>,
    failing_sessions: HashSet<(u32, AttributeClass)>,
    message_response: u32,
    privilege_held: bool,
    launch_reports_pid: bool,
    launch_exit_code: u32,
    next_pid: u32,
    current_time: DateTime<Utc>,
}

/// In-memory [`SessionHost`].
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHost {
    pub fn new(computer_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                computer_name: computer_name.into(),
                sessions: Vec::new(),
                processes: Vec::new(),
                calls: Vec::new(),
                open_handles: 0,
                unreachable: None,
                failing: HashSet::new(),
                failing_sessions: HashSet::new(),
                message_response: 1,
                privilege_held: true,
                launch_reports_pid: true,
                launch_exit_code: 0,
                next_pid: 4000,
                current_time: Utc::now(),
            })),
        }
    }

    /// Host with a services session, a console user and an RDP listener.
    pub fn with_defaults(computer_name: impl Into<String>) -> Self {
        let host = Self::new(computer_name);
        host.add_session(SimSession::services());
        host.add_session(
            SimSession::new(1, "Console", SessionState::Active)
                .user("CORP", "admin")
                .client("", 0),
        );
        host.add_session(SimSession::listener(65536));
        host
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_session(&self, session: SimSession) {
        self.lock().sessions.push(session);
    }

    pub fn remove_session(&self, session_id: u32) {
        self.lock().sessions.retain(|s| s.session_id != session_id);
    }

    pub fn set_state(&self, session_id: u32, state: SessionState) {
        if let Some(s) = self.lock().sessions.iter_mut().find(|s| s.session_id == session_id) {
            s.state = state;
        }
    }

    pub fn session_state(&self, session_id: u32) -> Option<SessionState> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .map(|s| s.state)
    }

    pub fn add_process(&self, session_id: u32, process_id: u32, image_name: &str) {
        self.lock().processes.push(ProcessEntry {
            session_id,
            process_id,
            image_name: image_name.to_string(),
        });
    }

    /// Make every open fail with the given native code.
    pub fn set_unreachable(&self, code: Option<u32>) {
        self.lock().unreachable = code;
    }

    /// Make queries of `class` fail for every session.
    pub fn fail_attribute(&self, class: AttributeClass) {
        self.lock().failing.insert(class);
    }

    pub fn fail_attribute_for(&self, session_id: u32, class: AttributeClass) {
        self.lock().failing_sessions.insert((session_id, class));
    }

    /// Response code returned for waited prompts.
    pub fn set_message_response(&self, code: u32) {
        self.lock().message_response = code;
    }

    pub fn set_privilege_held(&self, held: bool) {
        self.lock().privilege_held = held;
    }

    pub fn set_launch_reports_pid(&self, reports: bool) {
        self.lock().launch_reports_pid = reports;
    }

    pub fn set_launch_exit_code(&self, code: u32) {
        self.lock().launch_exit_code = code;
    }

    pub fn set_current_time(&self, now: DateTime<Utc>) {
        self.lock().current_time = now;
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn action_calls(&self) -> Vec<NativeCall> {
        self.lock().calls.iter().filter(|c| c.is_action()).cloned().collect()
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    pub fn processes(&self) -> Vec<ProcessEntry> {
        self.lock().processes.clone()
    }
}

impl SessionHost for SimulatedHost {
    fn open(&self, target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>> {
        let mut st = self.lock();
        st.calls.push(NativeCall::Open(target.clone()));
        if let Some(code) = st.unreachable {
            return Err(SessionError::host_unavailable(&target.to_string(), code));
        }
        st.open_handles += 1;
        Ok(Box::new(SimServer {
            state: Arc::clone(&self.state),
        }))
    }

    fn local_computer_name(&self) -> Option<String> {
        Some(self.lock().computer_name.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Open handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SimServer {
    state: Arc<Mutex<SimState>>,
}

impl SimServer {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        let mut st = self.lock();
        st.open_handles = st.open_handles.saturating_sub(1);
        st.calls.push(NativeCall::Close);
    }
}

fn not_found(session_id: u32) -> SessionError {
    SessionError::action_failed(
        &format!("session {}", session_id),
        codes::ERROR_CTX_WINSTATION_NOT_FOUND,
    )
}

fn filetime(t: Option<DateTime<Utc>>) -> i64 {
    t.map(layout::datetime_to_filetime).unwrap_or(0)
}

fn encode_attribute(s: &SimSession, class: AttributeClass, now: DateTime<Utc>) -> Vec<u8> {
    let text = |v: &Option<String>| layout::encode_wstr(v.as_deref().unwrap_or(""));
    match class {
        AttributeClass::UserName => text(&s.user_name),
        AttributeClass::DomainName => text(&s.domain_name),
        AttributeClass::ClientName => text(&s.client_name),
        AttributeClass::ClientDirectory => text(&s.client_directory),
        AttributeClass::WinStationName => layout::encode_wstr(&s.win_station_name),
        AttributeClass::ClientProtocolType => {
            s.client_protocol.unwrap_or(0).to_le_bytes().to_vec()
        }
        AttributeClass::ClientBuildNumber => {
            s.client_build_number.unwrap_or(0).to_le_bytes().to_vec()
        }
        AttributeClass::ClientAddress => match &s.client_address {
            Some((family, payload)) => layout::encode_client_address(*family, payload),
            None => layout::encode_client_address(0, &[]),
        },
        AttributeClass::ClientDisplay => {
            let (w, h, d) = s.client_display.unwrap_or((0, 0, 0));
            [w, h, d].iter().flat_map(|v| v.to_le_bytes()).collect()
        }
        AttributeClass::SessionInfo => {
            let sc = layout::schema(SchemaId::SessionInfo);
            let mut buf = sc.alloc();
            sc.write_i32(&mut buf, "State", s.state.to_native());
            sc.write_u32(&mut buf, "SessionId", s.session_id);
            write_counters(sc, &mut buf, &s.counters);
            sc.write_wstr(&mut buf, "WinStationName", &s.win_station_name);
            sc.write_wstr(&mut buf, "Domain", s.domain_name.as_deref().unwrap_or(""));
            sc.write_wstr(&mut buf, "UserName", s.user_name.as_deref().unwrap_or(""));
            write_times(sc, &mut buf, s, now);
            buf
        }
        AttributeClass::SessionInfoEx => {
            let sc = layout::schema(SchemaId::SessionInfoExLevel1);
            let mut buf = sc.alloc();
            sc.write_u32(&mut buf, "Level", 1);
            sc.write_u32(&mut buf, "SessionId", s.session_id);
            sc.write_i32(&mut buf, "SessionState", s.state.to_native());
            sc.write_i32(&mut buf, "SessionFlags", s.session_flags);
            sc.write_wstr(&mut buf, "WinStationName", &s.win_station_name);
            sc.write_wstr(&mut buf, "UserName", s.user_name.as_deref().unwrap_or(""));
            sc.write_wstr(&mut buf, "DomainName", s.domain_name.as_deref().unwrap_or(""));
            write_times(sc, &mut buf, s, now);
            write_counters(sc, &mut buf, &s.counters);
            buf
        }
        AttributeClass::ConfigInfo => {
            let sc = layout::schema(SchemaId::ConfigInfo);
            let mut buf = sc.alloc();
            let cfg = s.configuration.clone().unwrap_or(SessionConfiguration {
                connect_client_drives_at_logon: false,
                connect_printer_at_logon: false,
                disable_printer_redirection: false,
                disable_default_main_client_printer: false,
                shadow: ShadowPolicy::Disabled,
                logon_user_name: s.user_name.clone(),
                logon_domain: s.domain_name.clone(),
                working_directory: None,
                initial_program: None,
                application_name: None,
            });
            let shadow = match cfg.shadow {
                ShadowPolicy::Disabled => 0,
                ShadowPolicy::FullControlWithConsent => 1,
                ShadowPolicy::FullControlWithoutConsent => 2,
                ShadowPolicy::ViewOnlyWithConsent => 3,
                ShadowPolicy::ViewOnlyWithoutConsent => 4,
                ShadowPolicy::Unknown => 99,
            };
            let flag = |b: bool| u32::from(b);
            sc.write_u32(&mut buf, "version", 1);
            sc.write_u32(&mut buf, "fConnectClientDrivesAtLogon", flag(cfg.connect_client_drives_at_logon));
            sc.write_u32(&mut buf, "fConnectPrinterAtLogon", flag(cfg.connect_printer_at_logon));
            sc.write_u32(&mut buf, "fDisablePrinterRedirection", flag(cfg.disable_printer_redirection));
            sc.write_u32(
                &mut buf,
                "fDisableDefaultMainClientPrinter",
                flag(cfg.disable_default_main_client_printer),
            );
            sc.write_u32(&mut buf, "ShadowSettings", shadow);
            let strings = [
                ("LogonUserName", &cfg.logon_user_name),
                ("LogonDomain", &cfg.logon_domain),
                ("WorkDirectory", &cfg.working_directory),
                ("InitialProgram", &cfg.initial_program),
                ("ApplicationName", &cfg.application_name),
            ];
            for (name, value) in strings {
                sc.write_wstr(&mut buf, name, value.as_deref().unwrap_or(""));
            }
            buf
        }
    }
}

fn write_counters(sc: &layout::Schema, buf: &mut [u8], c: &NetworkCounters) {
    sc.write_u32(buf, "IncomingBytes", c.incoming_bytes);
    sc.write_u32(buf, "OutgoingBytes", c.outgoing_bytes);
    sc.write_u32(buf, "IncomingFrames", c.incoming_frames);
    sc.write_u32(buf, "OutgoingFrames", c.outgoing_frames);
    sc.write_u32(buf, "IncomingCompressedBytes", c.incoming_compressed_bytes);
    sc.write_u32(buf, "OutgoingCompressedBytes", c.outgoing_compressed_bytes);
}

fn write_times(sc: &layout::Schema, buf: &mut [u8], s: &SimSession, now: DateTime<Utc>) {
    sc.write_i64(buf, "LogonTime", filetime(s.logon_time));
    sc.write_i64(buf, "ConnectTime", filetime(s.connect_time));
    sc.write_i64(buf, "DisconnectTime", filetime(s.disconnect_time));
    sc.write_i64(buf, "LastInputTime", filetime(s.last_input_time));
    sc.write_i64(buf, "CurrentTime", filetime(Some(now)));
}

impl ServerHandle for SimServer {
    fn enumerate_sessions(&self) -> SessionResult<Vec<SessionEntry>> {
        let mut st = self.lock();
        st.calls.push(NativeCall::Enumerate);
        Ok(st.sessions.iter().map(SimSession::entry).collect())
    }

    fn query_attribute(&self, session_id: u32, class: AttributeClass) -> SessionResult<Vec<u8>> {
        let mut st = self.lock();
        st.calls.push(NativeCall::Query(session_id, class));
        if st.failing.contains(&class) || st.failing_sessions.contains(&(session_id, class)) {
            return Err(SessionError::new(
                SessionErrorKind::AttributeUnavailable,
                format!("{:?} unavailable for session {}", class, session_id),
            ));
        }
        let now = st.current_time;
        st.sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .map(|s| encode_attribute(s, class, now))
            .ok_or_else(|| {
                SessionError::new(
                    SessionErrorKind::AttributeUnavailable,
                    format!("session {} vanished", session_id),
                )
            })
    }

    fn disconnect(&self, session_id: u32, _wait: bool) -> SessionResult<()> {
        let mut st = self.lock();
        st.calls.push(NativeCall::Disconnect(session_id));
        let now = st.current_time;
        let s = st
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| not_found(session_id))?;
        s.state = SessionState::Disconnected;
        s.disconnect_time = Some(now);
        Ok(())
    }

    fn logoff(&self, session_id: u32, _wait: bool) -> SessionResult<()> {
        let mut st = self.lock();
        st.calls.push(NativeCall::Logoff(session_id));
        let before = st.sessions.len();
        st.sessions.retain(|s| s.session_id != session_id);
        if st.sessions.len() == before {
            return Err(not_found(session_id));
        }
        st.processes.retain(|p| p.session_id != session_id);
        Ok(())
    }

    fn send_message(&self, session_id: u32, request: &SendMessageRequest) -> SessionResult<u32> {
        let mut st = self.lock();
        st.calls.push(NativeCall::SendMessage(session_id));
        if !st.sessions.iter().any(|s| s.session_id == session_id) {
            return Err(not_found(session_id));
        }
        if request.wait {
            Ok(st.message_response)
        } else {
            Ok(IDASYNC)
        }
    }

    fn launch_interactive(
        &self,
        session_id: u32,
        request: &LaunchRequest,
        _wait_timeout: Duration,
    ) -> SessionResult<LaunchedProcess> {
        let mut st = self.lock();
        st.calls.push(NativeCall::Launch(session_id));
        if !st.privilege_held {
            return Err(SessionError::action_failed(
                "WTSQueryUserToken",
                codes::ERROR_PRIVILEGE_NOT_HELD,
            ));
        }
        let owner = st.sessions.iter().find(|s| s.session_id == session_id);
        if owner.and_then(|s| s.user_name.as_ref()).is_none() {
            return Err(SessionError::action_failed("WTSQueryUserToken", codes::ERROR_NO_TOKEN));
        }
        let image = request.image_name().ok_or_else(|| {
            SessionError::action_failed("CreateProcessAsUserW", codes::ERROR_FILE_NOT_FOUND)
        })?;
        let pid = st.next_pid;
        st.next_pid += 4;
        let reported_pid = st.launch_reports_pid.then_some(pid);
        if request.wait {
            return Ok(LaunchedProcess {
                process_id: reported_pid,
                exit_code: Some(st.launch_exit_code),
            });
        }
        st.processes.push(ProcessEntry {
            session_id,
            process_id: pid,
            image_name: image,
        });
        Ok(LaunchedProcess {
            process_id: reported_pid,
            exit_code: None,
        })
    }

    fn list_processes(&self) -> SessionResult<Vec<ProcessEntry>> {
        let mut st = self.lock();
        st.calls.push(NativeCall::ListProcesses);
        Ok(st.processes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_counted_and_closed() {
        let host = SimulatedHost::with_defaults("WS01");
        {
            let server = host.open(&HostTarget::Local).unwrap();
            assert_eq!(host.open_handles(), 1);
            assert_eq!(server.enumerate_sessions().unwrap().len(), 3);
        }
        assert_eq!(host.open_handles(), 0);
        assert_eq!(host.calls().last(), Some(&NativeCall::Close));
    }

    #[test]
    fn unreachable_host() {
        let host = SimulatedHost::new("WS01");
        host.set_unreachable(Some(1722));
        let err = host.open(&HostTarget::named("far")).err().unwrap();
        assert_eq!(err.kind, SessionErrorKind::HostUnavailable(1722));
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn attribute_buffers_decode_through_layout() {
        let host = SimulatedHost::new("WS01");
        host.add_session(
            SimSession::new(2, "RDP-Tcp#0", SessionState::Active)
                .user("CORP", "alice")
                .client("LAPTOP", 2)
                .ipv4([10, 0, 0, 5])
                .display(1280, 1024, 4)
                .locked(true),
        );
        let server = host.open(&HostTarget::Local).unwrap();
        let user = server.query_attribute(2, AttributeClass::UserName).unwrap();
        assert_eq!(layout::decode_wstr(&user).as_deref(), Some("alice"));
        let proto = server.query_attribute(2, AttributeClass::ClientProtocolType).unwrap();
        assert_eq!(layout::decode_u16(&proto), Some(2));
        let addr = server.query_attribute(2, AttributeClass::ClientAddress).unwrap();
        assert_eq!(layout::decode_client_address(&addr).unwrap().address, "10.0.0.5");
        let disp = server.query_attribute(2, AttributeClass::ClientDisplay).unwrap();
        assert_eq!(layout::decode_client_display(&disp).unwrap().color_depth, 16);
        let ex = server.query_attribute(2, AttributeClass::SessionInfoEx).unwrap();
        assert_eq!(
            layout::decode_extended_info(&ex).unwrap().lock_state(),
            crate::types::LockState::Locked
        );
    }

    #[test]
    fn failing_attribute() {
        let host = SimulatedHost::with_defaults("WS01");
        host.fail_attribute_for(1, AttributeClass::ClientName);
        let server = host.open(&HostTarget::Local).unwrap();
        let err = server.query_attribute(1, AttributeClass::ClientName).unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::AttributeUnavailable);
        assert!(server.query_attribute(1, AttributeClass::UserName).is_ok());
    }

    #[test]
    fn logoff_removes_session_and_processes() {
        let host = SimulatedHost::with_defaults("WS01");
        host.add_process(1, 100, "explorer.exe");
        let server = host.open(&HostTarget::Local).unwrap();
        server.logoff(1, false).unwrap();
        assert_eq!(host.session_state(1), None);
        assert!(host.processes().is_empty());
        assert!(server.logoff(1, false).is_err());
    }

    #[test]
    fn launch_without_privilege() {
        let host = SimulatedHost::with_defaults("WS01");
        host.set_privilege_held(false);
        let server = host.open(&HostTarget::Local).unwrap();
        let err = server
            .launch_interactive(1, &LaunchRequest::new("notepad.exe"), Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::PrivilegeDenied);
    }

    #[test]
    fn unwaited_message_returns_async() {
        let host = SimulatedHost::with_defaults("WS01");
        let server = host.open(&HostTarget::Local).unwrap();
        let code = server
            .send_message(1, &SendMessageRequest::new("t", "m"))
            .unwrap();
        assert_eq!(code, IDASYNC);
    }
}
