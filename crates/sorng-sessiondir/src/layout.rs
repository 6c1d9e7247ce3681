//! Byte schemas for the native session structures.
//!
//! Attribute buffers come back from the host as raw bytes. Rather than
//! overlaying `#[repr(C)]` structs on them, each structure is described by a
//! schema table (field name → offset, width, decode rule) and decoded with
//! bounds-checked reads. A buffer shorter than its schema decodes to `None`.
//!
//! The schemas are registered once per process in a [`OnceLock`] registry.
//! The same tables drive the encoders used by the simulated host, so both
//! sides agree on every offset.

use crate::types::{
    AddressFamily, ClientAddress, ClientDisplay, LockState, NetworkCounters,
    SessionConfiguration, SessionState, ShadowPolicy,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

/// Bumped whenever a schema table changes.
pub const SCHEMA_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Schema tables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a field's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U16,
    U32,
    I32,
    /// FILETIME / LARGE_INTEGER.
    I64,
    /// Fixed-length UTF-16 array, length in code units.
    WStr(usize),
    /// Opaque bytes, length in bytes.
    Bytes(usize),
}

impl FieldKind {
    pub fn width(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::I64 => 8,
            Self::WStr(chars) => chars * 2,
            Self::Bytes(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
}

const fn field(name: &'static str, offset: usize, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, offset, kind }
}

/// Structures with a registered schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaId {
    SessionInfo,
    SessionInfoExLevel1,
    ClientAddress,
    ClientDisplay,
    ConfigInfo,
}

/// WTSINFOW.
const SESSION_INFO: &[FieldSpec] = &[
    field("State", 0, FieldKind::I32),
    field("SessionId", 4, FieldKind::U32),
    field("IncomingBytes", 8, FieldKind::U32),
    field("OutgoingBytes", 12, FieldKind::U32),
    field("IncomingFrames", 16, FieldKind::U32),
    field("OutgoingFrames", 20, FieldKind::U32),
    field("IncomingCompressedBytes", 24, FieldKind::U32),
    field("OutgoingCompressedBytes", 28, FieldKind::U32),
    field("WinStationName", 32, FieldKind::WStr(32)),
    field("Domain", 96, FieldKind::WStr(17)),
    field("UserName", 130, FieldKind::WStr(21)),
    field("ConnectTime", 176, FieldKind::I64),
    field("DisconnectTime", 184, FieldKind::I64),
    field("LastInputTime", 192, FieldKind::I64),
    field("LogonTime", 200, FieldKind::I64),
    field("CurrentTime", 208, FieldKind::I64),
];

/// WTSINFOEXW with a level-1 payload. `Level` precedes an 8-aligned union.
const SESSION_INFO_EX_LEVEL1: &[FieldSpec] = &[
    field("Level", 0, FieldKind::U32),
    field("SessionId", 8, FieldKind::U32),
    field("SessionState", 12, FieldKind::I32),
    field("SessionFlags", 16, FieldKind::I32),
    field("WinStationName", 20, FieldKind::WStr(33)),
    field("UserName", 86, FieldKind::WStr(21)),
    field("DomainName", 128, FieldKind::WStr(18)),
    field("LogonTime", 168, FieldKind::I64),
    field("ConnectTime", 176, FieldKind::I64),
    field("DisconnectTime", 184, FieldKind::I64),
    field("LastInputTime", 192, FieldKind::I64),
    field("CurrentTime", 200, FieldKind::I64),
    field("IncomingBytes", 208, FieldKind::U32),
    field("OutgoingBytes", 212, FieldKind::U32),
    field("IncomingFrames", 216, FieldKind::U32),
    field("OutgoingFrames", 220, FieldKind::U32),
    field("IncomingCompressedBytes", 224, FieldKind::U32),
    field("OutgoingCompressedBytes", 228, FieldKind::U32),
];

/// WTS_CLIENT_ADDRESS.
const CLIENT_ADDRESS: &[FieldSpec] = &[
    field("AddressFamily", 0, FieldKind::U32),
    field("Address", 4, FieldKind::Bytes(20)),
];

/// WTS_CLIENT_DISPLAY.
const CLIENT_DISPLAY: &[FieldSpec] = &[
    field("HorizontalResolution", 0, FieldKind::U32),
    field("VerticalResolution", 4, FieldKind::U32),
    field("ColorDepth", 8, FieldKind::U32),
];

/// WTSCONFIGINFOW.
const CONFIG_INFO: &[FieldSpec] = &[
    field("version", 0, FieldKind::U32),
    field("fConnectClientDrivesAtLogon", 4, FieldKind::U32),
    field("fConnectPrinterAtLogon", 8, FieldKind::U32),
    field("fDisablePrinterRedirection", 12, FieldKind::U32),
    field("fDisableDefaultMainClientPrinter", 16, FieldKind::U32),
    field("ShadowSettings", 20, FieldKind::U32),
    field("LogonUserName", 24, FieldKind::WStr(21)),
    field("LogonDomain", 66, FieldKind::WStr(18)),
    field("WorkDirectory", 102, FieldKind::WStr(261)),
    field("InitialProgram", 624, FieldKind::WStr(261)),
    field("ApplicationName", 1146, FieldKind::WStr(261)),
];

/// A registered structure layout.
#[derive(Debug)]
pub struct Schema {
    pub id: SchemaId,
    pub size: usize,
    fields: HashMap<&'static str, FieldSpec>,
}

impl Schema {
    fn new(id: SchemaId, size: usize, table: &'static [FieldSpec]) -> Self {
        let fields = table.iter().map(|f| (f.name, *f)).collect();
        Self { id, size, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    fn slice<'a>(&self, buf: &'a [u8], name: &str) -> Option<(&'a [u8], FieldKind)> {
        let field = self.field(name)?;
        let end = field.offset.checked_add(field.kind.width())?;
        buf.get(field.offset..end).map(|s| (s, field.kind))
    }

    pub fn read_u32(&self, buf: &[u8], name: &str) -> Option<u32> {
        let (bytes, _) = self.slice(buf, name)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn read_i32(&self, buf: &[u8], name: &str) -> Option<i32> {
        let (bytes, _) = self.slice(buf, name)?;
        Some(i32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn read_i64(&self, buf: &[u8], name: &str) -> Option<i64> {
        let (bytes, _) = self.slice(buf, name)?;
        Some(i64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Embedded UTF-16 string, trimmed at the first NUL. Empty reads as `None`.
    pub fn read_wstr(&self, buf: &[u8], name: &str) -> Option<String> {
        let (bytes, _) = self.slice(buf, name)?;
        decode_wstr(bytes)
    }

    pub fn read_bytes<'a>(&self, buf: &'a [u8], name: &str) -> Option<&'a [u8]> {
        self.slice(buf, name).map(|(b, _)| b)
    }

    /// A zeroed buffer the size of the structure.
    pub fn alloc(&self) -> Vec<u8> {
        vec![0u8; self.size]
    }

    pub fn write_u32(&self, buf: &mut [u8], name: &str, value: u32) {
        self.write_raw(buf, name, &value.to_le_bytes());
    }

    pub fn write_i32(&self, buf: &mut [u8], name: &str, value: i32) {
        self.write_raw(buf, name, &value.to_le_bytes());
    }

    pub fn write_i64(&self, buf: &mut [u8], name: &str, value: i64) {
        self.write_raw(buf, name, &value.to_le_bytes());
    }

    /// Write a NUL-terminated UTF-16 string, truncated to fit the field.
    pub fn write_wstr(&self, buf: &mut [u8], name: &str, value: &str) {
        let Some(field) = self.field(name) else { return };
        let FieldKind::WStr(chars) = field.kind else { return };
        let mut bytes = Vec::with_capacity(chars * 2);
        for unit in value.encode_utf16().take(chars.saturating_sub(1)) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.resize(chars * 2, 0);
        self.write_raw(buf, name, &bytes);
    }

    pub fn write_bytes(&self, buf: &mut [u8], name: &str, value: &[u8]) {
        let Some(field) = self.field(name) else { return };
        let mut bytes = value.to_vec();
        bytes.resize(field.kind.width(), 0);
        self.write_raw(buf, name, &bytes);
    }

    fn write_raw(&self, buf: &mut [u8], name: &str, bytes: &[u8]) {
        let Some(field) = self.field(name) else { return };
        let width = field.kind.width().min(bytes.len());
        if let Some(dst) = buf.get_mut(field.offset..field.offset + width) {
            dst.copy_from_slice(&bytes[..width]);
        }
    }
}

/// Process-wide schema registry.
#[derive(Debug)]
pub struct SchemaRegistry {
    pub version: u32,
    schemas: HashMap<SchemaId, Schema>,
}

impl SchemaRegistry {
    fn build() -> Self {
        let schemas = [
            Schema::new(SchemaId::SessionInfo, 216, SESSION_INFO),
            Schema::new(SchemaId::SessionInfoExLevel1, 232, SESSION_INFO_EX_LEVEL1),
            Schema::new(SchemaId::ClientAddress, 24, CLIENT_ADDRESS),
            Schema::new(SchemaId::ClientDisplay, 12, CLIENT_DISPLAY),
            Schema::new(SchemaId::ConfigInfo, 1668, CONFIG_INFO),
        ]
        .into_iter()
        .map(|s| (s.id, s))
        .collect();
        Self {
            version: SCHEMA_VERSION,
            schemas,
        }
    }

    pub fn get(&self, id: SchemaId) -> &Schema {
        // Every SchemaId is inserted by build().
        &self.schemas[&id]
    }
}

pub fn registry() -> &'static SchemaRegistry {
    static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SchemaRegistry::build)
}

pub fn schema(id: SchemaId) -> &'static Schema {
    registry().get(id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Scalar decoders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// UTF-16LE bytes up to the first NUL. Empty strings are "not reported".
pub fn decode_wstr(bytes: &[u8]) -> Option<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    let s = String::from_utf16_lossy(&units);
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub fn decode_u16(buf: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(0..2)?.try_into().ok()?))
}

pub fn decode_u32(buf: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(0..4)?.try_into().ok()?))
}

/// Encode a string the way string-valued attribute queries return it.
pub fn encode_wstr(s: &str) -> Vec<u8> {
    let mut out: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    out.extend_from_slice(&[0, 0]);
    out
}

const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME (100-ns intervals since 1601-01-01) to UTC.
/// Zero or negative values mean "never" and map to `None`.
pub fn filetime_to_datetime(ft: i64) -> Option<DateTime<Utc>> {
    if ft <= 0 {
        return None;
    }
    let unix_100ns = ft - FILETIME_UNIX_EPOCH;
    let secs = unix_100ns.div_euclid(10_000_000);
    let nanos = (unix_100ns.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

pub fn datetime_to_filetime(dt: DateTime<Utc>) -> i64 {
    dt.timestamp() * 10_000_000 + i64::from(dt.timestamp_subsec_nanos() / 100) + FILETIME_UNIX_EPOCH
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Compound decoders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timestamps shared by the basic and extended session info.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTimes {
    pub logon_time: Option<DateTime<Utc>>,
    pub connect_time: Option<DateTime<Utc>>,
    pub disconnect_time: Option<DateTime<Utc>>,
    pub last_input_time: Option<DateTime<Utc>>,
    pub current_time: Option<DateTime<Utc>>,
}

/// Decoded WTSINFOW.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub state: SessionState,
    pub session_id: u32,
    pub win_station_name: Option<String>,
    pub domain: Option<String>,
    pub user_name: Option<String>,
    pub counters: NetworkCounters,
    pub times: SessionTimes,
}

/// Decoded WTSINFOEXW, keyed by the level the host returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendedInfo {
    Level1(ExtendedInfoLevel1),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedInfoLevel1 {
    pub session_id: u32,
    pub state: SessionState,
    pub lock_state: LockState,
    pub win_station_name: Option<String>,
    pub user_name: Option<String>,
    pub domain_name: Option<String>,
    pub counters: NetworkCounters,
    pub times: SessionTimes,
}

impl ExtendedInfo {
    pub fn lock_state(&self) -> LockState {
        match self {
            Self::Level1(l1) => l1.lock_state,
        }
    }
}

fn read_counters(s: &Schema, buf: &[u8]) -> Option<NetworkCounters> {
    Some(NetworkCounters {
        incoming_bytes: s.read_u32(buf, "IncomingBytes")?,
        outgoing_bytes: s.read_u32(buf, "OutgoingBytes")?,
        incoming_frames: s.read_u32(buf, "IncomingFrames")?,
        outgoing_frames: s.read_u32(buf, "OutgoingFrames")?,
        incoming_compressed_bytes: s.read_u32(buf, "IncomingCompressedBytes")?,
        outgoing_compressed_bytes: s.read_u32(buf, "OutgoingCompressedBytes")?,
    })
}

fn read_times(s: &Schema, buf: &[u8]) -> Option<SessionTimes> {
    let t = |name| s.read_i64(buf, name).map(filetime_to_datetime);
    Some(SessionTimes {
        logon_time: t("LogonTime")?,
        connect_time: t("ConnectTime")?,
        disconnect_time: t("DisconnectTime")?,
        last_input_time: t("LastInputTime")?,
        current_time: t("CurrentTime")?,
    })
}

pub fn decode_session_info(buf: &[u8]) -> Option<SessionInfo> {
    let s = schema(SchemaId::SessionInfo);
    if buf.len() < s.size {
        return None;
    }
    Some(SessionInfo {
        state: SessionState::from_native(s.read_i32(buf, "State")?),
        session_id: s.read_u32(buf, "SessionId")?,
        win_station_name: s.read_wstr(buf, "WinStationName"),
        domain: s.read_wstr(buf, "Domain"),
        user_name: s.read_wstr(buf, "UserName"),
        counters: read_counters(s, buf)?,
        times: read_times(s, buf)?,
    })
}

/// Only level 1 is defined; any other level decodes to `None`.
pub fn decode_extended_info(buf: &[u8]) -> Option<ExtendedInfo> {
    let s = schema(SchemaId::SessionInfoExLevel1);
    match s.read_u32(buf, "Level")? {
        1 if buf.len() >= s.size => Some(ExtendedInfo::Level1(ExtendedInfoLevel1 {
            session_id: s.read_u32(buf, "SessionId")?,
            state: SessionState::from_native(s.read_i32(buf, "SessionState")?),
            lock_state: LockState::from_flags(s.read_i32(buf, "SessionFlags")?),
            win_station_name: s.read_wstr(buf, "WinStationName"),
            user_name: s.read_wstr(buf, "UserName"),
            domain_name: s.read_wstr(buf, "DomainName"),
            counters: read_counters(s, buf)?,
            times: read_times(s, buf)?,
        })),
        _ => None,
    }
}

const AF_UNSPEC: u32 = 0;
const AF_INET: u32 = 2;
const AF_INET6: u32 = 23;

/// Decode WTS_CLIENT_ADDRESS. The address payload starts two bytes into
/// the `Address` array for both IPv4 and IPv6.
pub fn decode_client_address(buf: &[u8]) -> Option<ClientAddress> {
    let s = schema(SchemaId::ClientAddress);
    let family = s.read_u32(buf, "AddressFamily")?;
    let addr = s.read_bytes(buf, "Address")?;
    let v4 = |a: &[u8]| -> Option<ClientAddress> {
        let octets: [u8; 4] = a.get(2..6)?.try_into().ok()?;
        Some(ClientAddress {
            family: AddressFamily::Ipv4,
            address: Ipv4Addr::from(octets).to_string(),
        })
    };
    match family {
        AF_INET => v4(addr),
        AF_INET6 => {
            let octets: [u8; 16] = addr.get(2..18)?.try_into().ok()?;
            Some(ClientAddress {
                family: AddressFamily::Ipv6,
                address: Ipv6Addr::from(octets).to_string(),
            })
        }
        AF_UNSPEC if addr.get(2..6)?.iter().any(|&b| b != 0) => v4(addr),
        _ => None,
    }
}

pub fn encode_client_address(family: u32, payload: &[u8]) -> Vec<u8> {
    let s = schema(SchemaId::ClientAddress);
    let mut buf = s.alloc();
    s.write_u32(&mut buf, "AddressFamily", family);
    let mut addr = vec![0u8; 2];
    addr.extend_from_slice(payload);
    s.write_bytes(&mut buf, "Address", &addr);
    buf
}

pub fn decode_client_display(buf: &[u8]) -> Option<ClientDisplay> {
    let s = schema(SchemaId::ClientDisplay);
    let width = s.read_u32(buf, "HorizontalResolution")?;
    let height = s.read_u32(buf, "VerticalResolution")?;
    let code = s.read_u32(buf, "ColorDepth")?;
    if width == 0 && height == 0 {
        return None;
    }
    Some(ClientDisplay {
        horizontal_resolution: width,
        vertical_resolution: height,
        color_depth: ClientDisplay::depth_from_code(code),
    })
}

pub fn decode_config_info(buf: &[u8]) -> Option<SessionConfiguration> {
    let s = schema(SchemaId::ConfigInfo);
    if buf.len() < s.size {
        return None;
    }
    let flag = |name| s.read_u32(buf, name).map(|v| v != 0);
    Some(SessionConfiguration {
        connect_client_drives_at_logon: flag("fConnectClientDrivesAtLogon")?,
        connect_printer_at_logon: flag("fConnectPrinterAtLogon")?,
        disable_printer_redirection: flag("fDisablePrinterRedirection")?,
        disable_default_main_client_printer: flag("fDisableDefaultMainClientPrinter")?,
        shadow: ShadowPolicy::from_u32(s.read_u32(buf, "ShadowSettings")?),
        logon_user_name: s.read_wstr(buf, "LogonUserName"),
        logon_domain: s.read_wstr(buf, "LogonDomain"),
        working_directory: s.read_wstr(buf, "WorkDirectory"),
        initial_program: s.read_wstr(buf, "InitialProgram"),
        application_name: s.read_wstr(buf, "ApplicationName"),
    })
}
