//! Per-session attribute resolution.
//!
//! Each attribute class is fetched with its own query against the open
//! handle and decoded through the byte schemas in [`crate::layout`]. A class
//! that fails leaves its fields absent and is recorded as an
//! [`AttributeMiss`]; it never fails the record or its siblings.

use crate::error::SessionError;
use crate::host::ServerHandle;
use crate::layout::{self, ExtendedInfo, SessionTimes};
use crate::types::{
    AttributeClass, ClientProtocol, SessionDetail, SessionEntry, SessionRecord, SessionState,
};
use log::debug;
use serde::{Deserialize, Serialize};

/// An attribute the host could not provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMiss {
    pub session_id: u32,
    pub class: AttributeClass,
    pub error: SessionError,
}

/// Resolves attribute classes for sessions on one open handle.
pub struct AttributeResolver<'a> {
    server: &'a dyn ServerHandle,
    host_name: &'a str,
    misses: Vec<AttributeMiss>,
}

impl<'a> AttributeResolver<'a> {
    pub fn new(server: &'a dyn ServerHandle, host_name: &'a str) -> Self {
        Self {
            server,
            host_name,
            misses: Vec::new(),
        }
    }

    /// Attribute misses collected so far.
    pub fn into_misses(self) -> Vec<AttributeMiss> {
        self.misses
    }

    /// Query one class; `None` (and a recorded miss) on failure or an empty buffer.
    fn fetch(&mut self, session_id: u32, class: AttributeClass) -> Option<Vec<u8>> {
        match self.server.query_attribute(session_id, class) {
            Ok(buf) if !buf.is_empty() => Some(buf),
            Ok(_) => None,
            Err(error) => {
                debug!(
                    "{}: {:?} unavailable for session {}: {}",
                    self.host_name, class, session_id, error
                );
                self.misses.push(AttributeMiss {
                    session_id,
                    class,
                    error,
                });
                None
            }
        }
    }

    fn fetch_string(&mut self, session_id: u32, class: AttributeClass) -> Option<String> {
        self.fetch(session_id, class).and_then(|b| layout::decode_wstr(&b))
    }

    /// Build the record for one enumerated session.
    pub fn resolve(&mut self, entry: &SessionEntry, detailed: bool) -> SessionRecord {
        let id = entry.session_id;
        let mut record = SessionRecord::from_entry(self.host_name, entry);

        for class in AttributeClass::BASE {
            match class {
                AttributeClass::UserName => {
                    record.user_name = self.fetch_string(id, *class);
                }
                AttributeClass::DomainName => {
                    record.domain_name = self.fetch_string(id, *class);
                }
                AttributeClass::ClientName => {
                    record.client_name = self.fetch_string(id, *class);
                }
                AttributeClass::ClientProtocolType => {
                    record.client_protocol = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_u16(&b))
                        .map(ClientProtocol::from_u16);
                }
                _ => {}
            }
        }
        // A domain without a user belongs to the machine account, not a logon.
        if record.user_name.is_none() {
            record.domain_name = None;
        }
        // Services and listeners report protocol 0 with no client attached.
        let non_remote = entry.session_id == 0 || entry.state == SessionState::Listen;
        if non_remote && record.client_name.is_none() {
            record.client_protocol = None;
        }

        if detailed {
            record.detail = Some(self.resolve_detail(id));
        }
        record
    }

    fn resolve_detail(&mut self, id: u32) -> SessionDetail {
        let mut detail = SessionDetail::default();
        let mut times: Option<SessionTimes> = None;
        let mut extended: Option<ExtendedInfo> = None;

        for class in AttributeClass::DETAILED {
            match class {
                AttributeClass::SessionInfo => {
                    if let Some(info) = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_session_info(&b))
                    {
                        detail.counters = Some(info.counters);
                        times = Some(info.times);
                    }
                }
                AttributeClass::SessionInfoEx => {
                    extended = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_extended_info(&b));
                }
                AttributeClass::ClientAddress => {
                    detail.client_address = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_client_address(&b));
                }
                AttributeClass::ClientBuildNumber => {
                    detail.client_build_number = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_u32(&b))
                        .filter(|&n| n != 0);
                }
                AttributeClass::ClientDirectory => {
                    detail.client_directory = self.fetch_string(id, *class);
                }
                AttributeClass::ClientDisplay => {
                    detail.client_display = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_client_display(&b));
                }
                AttributeClass::ConfigInfo => {
                    detail.configuration = self
                        .fetch(id, *class)
                        .and_then(|b| layout::decode_config_info(&b));
                }
                _ => {}
            }
        }

        if let Some(ExtendedInfo::Level1(l1)) = &extended {
            detail.lock_state = Some(l1.lock_state);
            // The extended block carries the same timing and traffic data.
            if times.is_none() {
                times = Some(l1.times.clone());
            }
            if detail.counters.is_none() {
                detail.counters = Some(l1.counters);
            }
        }

        if let Some(t) = times {
            detail.logon_time = t.logon_time;
            detail.connect_time = t.connect_time;
            detail.disconnect_time = t.disconnect_time;
            detail.last_input_time = t.last_input_time;
            detail.current_time = t.current_time;
        }
        detail.derive_idle_time();
        detail
    }
}

/// Resolve every entry in enumeration order.
pub fn resolve_all(
    server: &dyn ServerHandle,
    host_name: &str,
    entries: &[SessionEntry],
    detailed: bool,
) -> (Vec<SessionRecord>, Vec<AttributeMiss>) {
    let mut resolver = AttributeResolver::new(server, host_name);
    let records = entries
        .iter()
        .map(|e| resolver.resolve(e, detailed))
        .collect();
    (records, resolver.into_misses())
}
