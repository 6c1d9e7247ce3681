//! Session directory client: open, enumerate, resolve, filter.
//!
//! Every call opens its own handle, takes one enumeration snapshot and
//! drops the handle before returning. Nothing is cached between calls.

use crate::error::{SessionError, SessionResult};
use crate::filter::{SessionFilter, SessionQuery};
use crate::host::{computer_name_from_env, ServerHandle, SessionHost};
use crate::resolver::{resolve_all, AttributeMiss};
use crate::types::{HostSummary, HostTarget, SessionEntry, SessionRecord};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Records returned by a query plus the attributes that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub records: Vec<SessionRecord>,
    pub misses: Vec<AttributeMiss>,
}

#[derive(Clone)]
pub struct DirectoryClient {
    host: Arc<dyn SessionHost>,
    local_computer_name: Option<String>,
}

impl DirectoryClient {
    pub fn new(host: Arc<dyn SessionHost>) -> Self {
        Self {
            host,
            local_computer_name: None,
        }
    }

    /// Override the name used for the local host and for `.\name` patterns.
    pub fn with_local_name(mut self, name: Option<String>) -> Self {
        self.local_computer_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn host(&self) -> &Arc<dyn SessionHost> {
        &self.host
    }

    /// Computer name records from `target` are tagged with.
    pub fn host_name(&self, target: &HostTarget) -> String {
        let local = self
            .local_computer_name
            .clone()
            .or_else(|| self.host.local_computer_name())
            .or_else(computer_name_from_env)
            .unwrap_or_else(|| "localhost".to_string());
        target.computer_name(&local)
    }

    pub fn open(&self, target: &HostTarget) -> SessionResult<Box<dyn ServerHandle>> {
        debug!("Opening session host {}", target);
        self.host.open(target)
    }

    /// One bulk enumeration. A host with no sessions yields an empty Vec.
    pub fn enumerate(&self, target: &HostTarget) -> SessionResult<Vec<SessionEntry>> {
        let server = self.open(target)?;
        server.enumerate_sessions()
    }

    /// Enumerate, resolve and filter in one snapshot.
    pub fn query(&self, target: &HostTarget, query: &SessionQuery) -> SessionResult<QueryOutcome> {
        let compiled = query.filter.compile()?;
        let server = self.open(target)?;
        let host_name = self.host_name(target);

        let entries: Vec<SessionEntry> = server
            .enumerate_sessions()?
            .into_iter()
            .filter(|e| prefilter(&query.filter, e))
            .collect();
        let (records, misses) = resolve_all(server.as_ref(), &host_name, &entries, query.detailed);
        let records = compiled.apply(records);
        debug!(
            "{}: {} of {} sessions matched ({} attribute misses)",
            host_name,
            records.len(),
            entries.len(),
            misses.len()
        );
        Ok(QueryOutcome { records, misses })
    }

    pub fn summary(&self, target: &HostTarget) -> SessionResult<HostSummary> {
        let entries = self.enumerate(target)?;
        Ok(HostSummary::from_entries(self.host_name(target), &entries))
    }
}

/// Id and state are known from enumeration alone, so sessions failing them
/// are dropped before any attribute is queried.
fn prefilter(filter: &SessionFilter, entry: &SessionEntry) -> bool {
    filter.session_id.map_or(true, |id| entry.session_id == id)
        && filter.state.map_or(true, |s| entry.state == s)
}

/// Re-read a session from a fresh enumeration on an open handle.
pub fn lookup(server: &dyn ServerHandle, session_id: u32) -> SessionResult<SessionEntry> {
    server
        .enumerate_sessions()?
        .into_iter()
        .find(|e| e.session_id == session_id)
        .ok_or_else(|| SessionError::session_not_found(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionErrorKind;
    use crate::sim::{NativeCall, SimSession, SimulatedHost};
    use crate::types::{AttributeClass, SessionState};

    fn client(host: &SimulatedHost) -> DirectoryClient {
        DirectoryClient::new(Arc::new(host.clone()))
    }

    #[test]
    fn empty_host_enumerates_to_empty_vec() {
        let host = SimulatedHost::new("EMPTY");
        let c = client(&host);
        assert!(c.enumerate(&HostTarget::Local).unwrap().is_empty());
        let out = c.query(&HostTarget::Local, &SessionQuery::all()).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn unreachable_host_is_host_unavailable() {
        let host = SimulatedHost::new("WS01");
        host.set_unreachable(Some(1722));
        let err = client(&host)
            .query(&HostTarget::named("rdsh-09"), &SessionQuery::all())
            .unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::HostUnavailable(1722));
    }

    #[test]
    fn handle_released_after_query_and_error() {
        let host = SimulatedHost::with_defaults("WS01");
        let c = client(&host);
        c.query(&HostTarget::Local, &SessionQuery::all().detailed()).unwrap();
        assert_eq!(host.open_handles(), 0);
        let server = c.open(&HostTarget::Local).unwrap();
        assert!(lookup(server.as_ref(), 999).is_err());
        drop(server);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn invalid_pattern_never_opens_host() {
        let host = SimulatedHost::with_defaults("WS01");
        let q = SessionQuery::filtered(SessionFilter::by_user("[x"));
        assert!(client(&host).query(&HostTarget::Local, &q).is_err());
        assert!(host.calls().is_empty());
    }

    #[test]
    fn id_filter_skips_attribute_queries_for_other_sessions() {
        let host = SimulatedHost::with_defaults("WS01");
        let q = SessionQuery::filtered(SessionFilter::by_id(1));
        let out = client(&host).query(&HostTarget::Local, &q).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(host
            .calls()
            .iter()
            .all(|c| !matches!(c, NativeCall::Query(id, _) if *id != 1)));
    }

    #[test]
    fn records_tagged_with_host_name() {
        let host = SimulatedHost::with_defaults("WS01");
        let c = client(&host);
        assert_eq!(c.host_name(&HostTarget::Local), "WS01");
        assert_eq!(c.host_name(&HostTarget::named("rdsh-02.corp.local")), "rdsh-02");
        let c = c.with_local_name(Some("OVERRIDE".to_string()));
        assert_eq!(c.host_name(&HostTarget::Local), "OVERRIDE");
    }

    #[test]
    fn misses_are_reported_not_fatal() {
        let host = SimulatedHost::with_defaults("WS01");
        host.fail_attribute(AttributeClass::ClientName);
        let out = client(&host)
            .query(&HostTarget::Local, &SessionQuery::all())
            .unwrap();
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.misses.len(), 3);
        assert!(out.records.iter().all(|r| r.client_name.is_none()));
    }

    #[test]
    fn lookup_finds_fresh_state() {
        let host = SimulatedHost::with_defaults("WS01");
        host.add_session(SimSession::new(5, "RDP-Tcp#1", SessionState::Active).user("CORP", "x"));
        let c = client(&host);
        let server = c.open(&HostTarget::Local).unwrap();
        host.set_state(5, SessionState::Disconnected);
        assert_eq!(lookup(server.as_ref(), 5).unwrap().state, SessionState::Disconnected);
        host.remove_session(5);
        let err = lookup(server.as_ref(), 5).unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::SessionNotFound);
    }

    #[test]
    fn summary_counts() {
        let host = SimulatedHost::with_defaults("WS01");
        let s = client(&host).summary(&HostTarget::Local).unwrap();
        assert_eq!(s.host_name, "WS01");
        assert_eq!(s.total_sessions, 3);
        assert_eq!(s.listen_sessions, 1);
    }
}
