//! Domain types for the session directory.
//!
//! These are Rust-native, serde-friendly views of the native session host
//! structures. They are available on every platform so callers can build
//! queries and inspect results even where the native back-end is missing.
//!
//! Every optional field means "not reported by the host". Nothing here is
//! defaulted to a zero or empty value that could be mistaken for real data.

use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Host selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The session host a query or action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "name")]
pub enum HostTarget {
    /// The machine this process runs on (no explicit server name).
    #[default]
    Local,
    /// A named remote session host.
    Named(String),
}

impl HostTarget {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed == "."
            || trimmed.eq_ignore_ascii_case("localhost")
        {
            Self::Local
        } else {
            Self::Named(trimmed.to_string())
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Native server name to open, `None` for the local host.
    pub fn server_name(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Named(n) => Some(n.as_str()),
        }
    }

    /// The computer name this target stands for, given the local name.
    ///
    /// Fully qualified names are shortened to their first label so they
    /// compare against the NetBIOS-style domain of local accounts. Address
    /// literals are kept whole.
    pub fn computer_name(&self, local_name: &str) -> String {
        let full = match self {
            Self::Local => local_name,
            Self::Named(n) => n.as_str(),
        };
        if full.parse::<IpAddr>().is_ok() {
            return full.to_string();
        }
        full.split('.').next().unwrap_or(full).to_string()
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "(local)"),
            Self::Named(n) => write!(f, "{}", n),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WTS_CONNECTSTATE_CLASS – the ten native session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// User is logged on and actively connected.
    Active,
    /// Session is connected to the client.
    Connected,
    /// Session is in the process of connecting to the client.
    ConnectQuery,
    /// Session is shadowing another session.
    Shadow,
    /// Session is active but the client is disconnected.
    Disconnected,
    /// WinStation is waiting for a client to connect.
    Idle,
    /// WinStation is listening for a connection.
    Listen,
    /// WinStation is being reset.
    Reset,
    /// WinStation is down due to an error.
    Down,
    /// WinStation is initializing.
    Init,
    /// A native value outside the documented range.
    Unknown,
}

impl SessionState {
    /// Map the native enumeration value.
    pub fn from_native(v: i32) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Connected,
            2 => Self::ConnectQuery,
            3 => Self::Shadow,
            4 => Self::Disconnected,
            5 => Self::Idle,
            6 => Self::Listen,
            7 => Self::Reset,
            8 => Self::Down,
            9 => Self::Init,
            _ => Self::Unknown,
        }
    }

    pub fn to_native(self) -> i32 {
        match self {
            Self::Active => 0,
            Self::Connected => 1,
            Self::ConnectQuery => 2,
            Self::Shadow => 3,
            Self::Disconnected => 4,
            Self::Idle => 5,
            Self::Listen => 6,
            Self::Reset => 7,
            Self::Down => 8,
            Self::Init => 9,
            Self::Unknown => -1,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "Active",
            Self::Connected => "Connected",
            Self::ConnectQuery => "ConnectQuery",
            Self::Shadow => "Shadow",
            Self::Disconnected => "Disconnected",
            Self::Idle => "Idle",
            Self::Listen => "Listen",
            Self::Reset => "Reset",
            Self::Down => "Down",
            Self::Init => "Init",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Client protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client protocol type (from WTSClientProtocolType).
/// 0 = Console, 1 = legacy (ICA), 2 = RDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientProtocol {
    /// Physical console session.
    Console,
    /// Legacy protocol (ICA / Citrix).
    Legacy,
    /// Remote Desktop Protocol (RDP).
    Rdp,
    /// Unknown / unmapped value.
    Unknown,
}

impl ClientProtocol {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0 => Self::Console,
            1 => Self::Legacy,
            2 => Self::Rdp,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ClientProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "Console"),
            Self::Legacy => write!(f, "Legacy"),
            Self::Rdp => write!(f, "RDP"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Attribute classes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One independently queried attribute of a session (a WTS_INFO_CLASS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeClass {
    UserName,
    WinStationName,
    DomainName,
    ClientBuildNumber,
    ClientName,
    ClientDirectory,
    ClientAddress,
    ClientDisplay,
    ClientProtocolType,
    SessionInfo,
    SessionInfoEx,
    ConfigInfo,
}

impl AttributeClass {
    /// Attributes resolved for every record.
    pub const BASE: &'static [AttributeClass] = &[
        AttributeClass::UserName,
        AttributeClass::DomainName,
        AttributeClass::ClientName,
        AttributeClass::ClientProtocolType,
    ];

    /// Attributes resolved only when the detailed block is requested.
    pub const DETAILED: &'static [AttributeClass] = &[
        AttributeClass::SessionInfo,
        AttributeClass::SessionInfoEx,
        AttributeClass::ClientAddress,
        AttributeClass::ClientBuildNumber,
        AttributeClass::ClientDirectory,
        AttributeClass::ClientDisplay,
        AttributeClass::ConfigInfo,
    ];

    /// Native WTS_INFO_CLASS value.
    pub fn native_class(self) -> i32 {
        match self {
            Self::UserName => 5,
            Self::WinStationName => 6,
            Self::DomainName => 7,
            Self::ClientBuildNumber => 9,
            Self::ClientName => 10,
            Self::ClientDirectory => 11,
            Self::ClientAddress => 14,
            Self::ClientDisplay => 15,
            Self::ClientProtocolType => 16,
            Self::SessionInfo => 24,
            Self::SessionInfoEx => 25,
            Self::ConfigInfo => 26,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Basic session entry, as returned by one bulk enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: u32,
    /// WinStation name (e.g. "Console", "RDP-Tcp#0", "Services").
    pub win_station_name: String,
    pub state: SessionState,
}

/// One resolved session on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Computer the record was read from.
    pub host_name: String,
    pub session_id: u32,
    pub state: SessionState,
    pub win_station_name: Option<String>,
    pub user_name: Option<String>,
    pub domain_name: Option<String>,
    pub client_name: Option<String>,
    pub client_protocol: Option<ClientProtocol>,
    /// Present iff the detailed block was requested.
    pub detail: Option<SessionDetail>,
}

impl SessionRecord {
    /// Build a record carrying only enumeration data.
    pub fn from_entry(host_name: impl Into<String>, entry: &SessionEntry) -> Self {
        Self {
            host_name: host_name.into(),
            session_id: entry.session_id,
            state: entry.state,
            win_station_name: non_empty(&entry.win_station_name),
            user_name: None,
            domain_name: None,
            client_name: None,
            client_protocol: None,
            detail: None,
        }
    }

    /// `DOMAIN\user`, or the bare user name when no domain was reported.
    pub fn qualified_user(&self) -> Option<String> {
        let user = self.user_name.as_deref()?;
        Some(match self.domain_name.as_deref() {
            Some(d) => format!("{}\\{}", d, user),
            None => user.to_string(),
        })
    }
}

/// The optional, more expensive attribute block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    // ── Timing ───────────────────────────────────────────────
    pub logon_time: Option<DateTime<Utc>>,
    pub connect_time: Option<DateTime<Utc>>,
    pub disconnect_time: Option<DateTime<Utc>>,
    pub last_input_time: Option<DateTime<Utc>>,
    pub current_time: Option<DateTime<Utc>>,
    /// Seconds since last input, derived from `current_time - last_input_time`.
    pub idle_time_seconds: Option<i64>,

    // ── Traffic ──────────────────────────────────────────────
    pub counters: Option<NetworkCounters>,

    // ── Client ───────────────────────────────────────────────
    pub client_address: Option<ClientAddress>,
    pub client_build_number: Option<u32>,
    pub client_directory: Option<String>,
    pub client_display: Option<ClientDisplay>,

    // ── Session ──────────────────────────────────────────────
    pub configuration: Option<SessionConfiguration>,
    pub lock_state: Option<LockState>,
}

impl SessionDetail {
    /// Derive the idle time when both timestamps are known.
    pub fn derive_idle_time(&mut self) {
        self.idle_time_seconds = match (self.current_time, self.last_input_time) {
            (Some(now), Some(last)) => Some(now.signed_duration_since(last).num_seconds().max(0)),
            _ => None,
        };
    }
}

/// Byte and frame counters of the session's client connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCounters {
    pub incoming_bytes: u32,
    pub outgoing_bytes: u32,
    pub incoming_frames: u32,
    pub outgoing_frames: u32,
    pub incoming_compressed_bytes: u32,
    pub outgoing_compressed_bytes: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Client address & display
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "ipv4")]
    Ipv4,
    #[serde(rename = "ipv6")]
    Ipv6,
}

/// Client network address, already rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAddress {
    pub family: AddressFamily,
    pub address: String,
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Client display resolution and colour depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDisplay {
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    /// Colour depth in bits per pixel.
    pub color_depth: u32,
}

impl ClientDisplay {
    /// Convert the native ColorDepth code to bits per pixel.
    pub fn depth_from_code(code: u32) -> u32 {
        match code {
            1 => 4,
            2 => 8,
            4 => 16,
            8 => 24,
            16 => 15,
            other => other,
        }
    }
}

impl fmt::Display for ClientDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({}-bit)",
            self.horizontal_resolution, self.vertical_resolution, self.color_depth
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shadowing (remote control) policy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShadowPolicy {
    Disabled,
    FullControlWithConsent,
    FullControlWithoutConsent,
    ViewOnlyWithConsent,
    ViewOnlyWithoutConsent,
    Unknown,
}

impl ShadowPolicy {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Disabled,
            1 => Self::FullControlWithConsent,
            2 => Self::FullControlWithoutConsent,
            3 => Self::ViewOnlyWithConsent,
            4 => Self::ViewOnlyWithoutConsent,
            _ => Self::Unknown,
        }
    }
}

/// Per-session configuration (WTSCONFIGINFO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfiguration {
    pub connect_client_drives_at_logon: bool,
    pub connect_printer_at_logon: bool,
    pub disable_printer_redirection: bool,
    pub disable_default_main_client_printer: bool,
    pub shadow: ShadowPolicy,
    pub logon_user_name: Option<String>,
    pub logon_domain: Option<String>,
    pub working_directory: Option<String>,
    pub initial_program: Option<String>,
    pub application_name: Option<String>,
}

/// Desktop lock state, from the extended session info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
    Locked,
    Unlocked,
    Unknown,
}

impl LockState {
    /// WTS_SESSIONSTATE_LOCK = 0, WTS_SESSIONSTATE_UNLOCK = 1.
    pub fn from_flags(v: i32) -> Self {
        match v {
            0 => Self::Locked,
            1 => Self::Unlocked,
            _ => Self::Unknown,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Processes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A process running on the session host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub session_id: u32,
    pub process_id: u32,
    /// Executable name (e.g. "explorer.exe").
    pub image_name: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Messaging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Response code when a waited prompt timed out.
pub const IDTIMEOUT: u32 = 32000;
/// Response code when the prompt was sent without waiting.
pub const IDASYNC: u32 = 32001;

/// Icon shown on the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageIcon {
    #[default]
    Information,
    Warning,
    Error,
    Question,
}

impl MessageIcon {
    /// MB_ICONxxx flag.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Error => 0x0000_0010,
            Self::Question => 0x0000_0020,
            Self::Warning => 0x0000_0030,
            Self::Information => 0x0000_0040,
        }
    }
}

/// Button set shown on the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageButtons {
    #[default]
    Ok,
    OkCancel,
    AbortRetryIgnore,
    YesNoCancel,
    YesNo,
    RetryCancel,
}

impl MessageButtons {
    /// MB_xxx button flag.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Ok => 0x0000_0000,
            Self::OkCancel => 0x0000_0001,
            Self::AbortRetryIgnore => 0x0000_0002,
            Self::YesNoCancel => 0x0000_0003,
            Self::YesNo => 0x0000_0004,
            Self::RetryCancel => 0x0000_0005,
        }
    }
}

/// The button the user pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonClicked {
    Ok,
    Cancel,
    Abort,
    Retry,
    Ignore,
    Yes,
    No,
}

impl ButtonClicked {
    /// Decode a dialog response code; codes outside 1..=7 carry no button.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Ok),
            2 => Some(Self::Cancel),
            3 => Some(Self::Abort),
            4 => Some(Self::Retry),
            5 => Some(Self::Ignore),
            6 => Some(Self::Yes),
            7 => Some(Self::No),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 1,
            Self::Cancel => 2,
            Self::Abort => 3,
            Self::Retry => 4,
            Self::Ignore => 5,
            Self::Yes => 6,
            Self::No => 7,
        }
    }
}

impl fmt::Display for ButtonClicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Cancel => "Cancel",
            Self::Abort => "Abort",
            Self::Retry => "Retry",
            Self::Ignore => "Ignore",
            Self::Yes => "Yes",
            Self::No => "No",
        };
        f.write_str(s)
    }
}

/// Parameters of a prompt sent to a session desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub icon: MessageIcon,
    #[serde(default)]
    pub buttons: MessageButtons,
    /// Seconds to wait for a response (0 = wait forever).
    #[serde(default)]
    pub timeout_seconds: u32,
    /// Whether to block until the user responds or the timeout elapses.
    #[serde(default)]
    pub wait: bool,
}

impl SendMessageRequest {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            icon: MessageIcon::default(),
            buttons: MessageButtons::default(),
            timeout_seconds: 0,
            wait: false,
        }
    }

    /// Combined MESSAGEBOX_STYLE flags.
    pub fn style(&self) -> u32 {
        self.icon.to_u32() | self.buttons.to_u32()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Interactive launch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A process to start on a session's desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    /// Full command line, executable first (quoted if it contains spaces).
    pub command_line: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Block until the process exits and report its exit code.
    #[serde(default)]
    pub wait: bool,
}

impl LaunchRequest {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            working_directory: None,
            wait: false,
        }
    }

    /// File name of the executable, e.g. `notepad.exe`.
    pub fn image_name(&self) -> Option<String> {
        let line = self.command_line.trim_start();
        let exe = if let Some(rest) = line.strip_prefix('"') {
            rest.split('"').next().unwrap_or("")
        } else {
            line.split_whitespace().next().unwrap_or("")
        };
        let name = exe.rsplit(['\\', '/']).next().unwrap_or(exe);
        if name.is_empty() {
            return None;
        }
        if name.contains('.') {
            Some(name.to_string())
        } else {
            Some(format!("{}.exe", name))
        }
    }
}

/// What the native launch primitive reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchedProcess {
    pub process_id: Option<u32>,
    pub exit_code: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Action results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The four state-changing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Disconnect,
    LogOff,
    SendMessage,
    LaunchInteractive,
}

impl ActionKind {
    /// Whether the action may be attempted against a session in `state`.
    pub fn accepts(self, state: SessionState) -> bool {
        match self {
            Self::SendMessage => true,
            Self::Disconnect | Self::LogOff | Self::LaunchInteractive => {
                state != SessionState::Listen
            }
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnect => "Disconnect",
            Self::LogOff => "LogOff",
            Self::SendMessage => "SendMessage",
            Self::LaunchInteractive => "LaunchInteractive",
        };
        f.write_str(s)
    }
}

/// Whether an action changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionOutcome {
    Performed,
    /// The session was already in the requested state; no native call was made.
    NoOp,
}

/// Result of a disconnect or log off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub session_id: u32,
    pub action: ActionKind,
    pub success: bool,
    pub outcome: Option<ActionOutcome>,
    pub failure: Option<SessionError>,
}

impl ActionResult {
    pub fn performed(session_id: u32, action: ActionKind) -> Self {
        Self {
            session_id,
            action,
            success: true,
            outcome: Some(ActionOutcome::Performed),
            failure: None,
        }
    }

    pub fn no_op(session_id: u32, action: ActionKind) -> Self {
        Self {
            session_id,
            action,
            success: true,
            outcome: Some(ActionOutcome::NoOp),
            failure: None,
        }
    }

    pub fn failed(session_id: u32, action: ActionKind, failure: SessionError) -> Self {
        Self {
            session_id,
            action,
            success: false,
            outcome: None,
            failure: Some(failure),
        }
    }
}

/// Result of a prompt sent to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResult {
    pub session_id: u32,
    /// A response code 1..=7 came back.
    pub success: bool,
    /// The prompt reached the session, whether or not anyone answered.
    pub delivered: bool,
    pub response: Option<u32>,
    pub button_clicked: Option<ButtonClicked>,
    pub failure: Option<SessionError>,
}

impl SendMessageResult {
    /// Interpret the raw response code of a delivered prompt.
    pub fn from_response(session_id: u32, code: u32) -> Self {
        match ButtonClicked::from_code(code) {
            Some(button) => Self {
                session_id,
                success: true,
                delivered: true,
                response: Some(code),
                button_clicked: Some(button),
                failure: None,
            },
            None => Self {
                session_id,
                success: false,
                delivered: true,
                response: None,
                button_clicked: None,
                failure: None,
            },
        }
    }

    pub fn failed(session_id: u32, failure: SessionError) -> Self {
        Self {
            session_id,
            success: false,
            delivered: false,
            response: None,
            button_clicked: None,
            failure: Some(failure),
        }
    }
}

/// Result of an interactive launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResult {
    pub session_id: u32,
    pub success: bool,
    /// Best-effort; absent when the process already exited or was ambiguous.
    pub process_id: Option<u32>,
    /// Present only when the launch waited for the process.
    pub exit_code: Option<u32>,
    pub failure: Option<SessionError>,
}

impl LaunchResult {
    pub fn failed(session_id: u32, failure: SessionError) -> Self {
        Self {
            session_id,
            success: false,
            process_id: None,
            exit_code: None,
            failure: Some(failure),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Batch operations & summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of the same action applied to several sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub succeeded: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, msg: String) {
        self.failed += 1;
        self.errors.push(msg);
    }
}

/// Session counts on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub host_name: String,
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub disconnected_sessions: usize,
    pub idle_sessions: usize,
    pub listen_sessions: usize,
}

impl HostSummary {
    pub fn from_entries(host_name: impl Into<String>, entries: &[SessionEntry]) -> Self {
        let mut summary = Self {
            host_name: host_name.into(),
            total_sessions: entries.len(),
            ..Default::default()
        };
        for e in entries {
            match e.state {
                SessionState::Active => summary.active_sessions += 1,
                SessionState::Disconnected => summary.disconnected_sessions += 1,
                SessionState::Idle => summary.idle_sessions += 1,
                SessionState::Listen => summary.listen_sessions += 1,
                _ => {}
            }
        }
        summary
    }
}

/// Treat an empty native string as "not reported".
pub(crate) fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
