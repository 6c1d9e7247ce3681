//! Session filtering and projection.
//!
//! Filters are pure predicates over resolved records. All set predicates
//! must hold for a record to be kept, so the order they are applied in
//! never matters, and kept records stay in enumeration order.

use crate::error::{SessionError, SessionErrorKind, SessionResult};
use crate::types::{SessionRecord, SessionState};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Criteria for narrowing a session set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionFilter {
    pub session_id: Option<u32>,
    pub state: Option<SessionState>,
    /// Glob over the user name. `DOMAIN\name` also matches the domain;
    /// `.\name` uses the host's computer name as the domain.
    pub user: Option<String>,
    /// Drop session 0, listeners and sessions without a logged-on user.
    pub exclude_system_sessions: bool,
}

impl SessionFilter {
    pub fn by_id(session_id: u32) -> Self {
        Self {
            session_id: Some(session_id),
            ..Default::default()
        }
    }

    pub fn by_user(pattern: impl Into<String>) -> Self {
        Self {
            user: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn excluding_system(mut self) -> Self {
        self.exclude_system_sessions = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.state.is_none()
            && self.user.is_none()
            && !self.exclude_system_sessions
    }

    /// Compile the user glob. Fails with `InvalidParameter` on a malformed pattern.
    pub fn compile(&self) -> SessionResult<CompiledFilter> {
        let user = self.user.as_deref().map(UserPattern::parse).transpose()?;
        Ok(CompiledFilter {
            session_id: self.session_id,
            state: self.state,
            user,
            exclude_system_sessions: self.exclude_system_sessions,
        })
    }
}

/// A query: which sessions, and whether to resolve the detailed block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(flatten)]
    pub filter: SessionFilter,
    #[serde(default)]
    pub detailed: bool,
}

impl SessionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn detailed(mut self) -> Self {
        self.detailed = true;
        self
    }

    pub fn filtered(filter: SessionFilter) -> Self {
        Self {
            filter,
            detailed: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  User patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
enum DomainMatch {
    Any,
    LocalHost,
    Pattern(Regex),
}

/// A parsed `[DOMAIN\]name` glob.
#[derive(Debug, Clone)]
pub struct UserPattern {
    domain: DomainMatch,
    name: Regex,
}

impl UserPattern {
    pub fn parse(pattern: &str) -> SessionResult<Self> {
        let (domain, name) = match pattern.split_once('\\') {
            Some((".", name)) => (DomainMatch::LocalHost, name),
            Some((d, name)) => (DomainMatch::Pattern(glob_to_regex(d)?), name),
            None => (DomainMatch::Any, pattern),
        };
        Ok(Self {
            domain,
            name: glob_to_regex(name)?,
        })
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        let Some(user) = record.user_name.as_deref() else {
            return false;
        };
        if !self.name.is_match(user) {
            return false;
        }
        match &self.domain {
            DomainMatch::Any => true,
            DomainMatch::LocalHost => record
                .domain_name
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case(&record.host_name)),
            DomainMatch::Pattern(re) => record.domain_name.as_deref().is_some_and(|d| re.is_match(d)),
        }
    }
}

/// Translate a `*`, `?`, `[set]` glob into an anchored, case-insensitive regex.
fn glob_to_regex(glob: &str) -> SessionResult<Regex> {
    let mut re = String::from("(?i)^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' || c == '^' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if !closed {
                    return Err(SessionError::new(
                        SessionErrorKind::InvalidParameter,
                        format!("unterminated character set in pattern '{}'", glob),
                    ));
                }
                re.push('[');
                re.push_str(&class);
                re.push(']');
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| {
        SessionError::new(
            SessionErrorKind::InvalidParameter,
            format!("invalid pattern '{}': {}", glob, e),
        )
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Compiled filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session 0, listeners and sessions without a user.
pub fn is_system_session(record: &SessionRecord) -> bool {
    record.session_id == 0 || record.state == SessionState::Listen || record.user_name.is_none()
}

#[derive(Debug, Clone)]
pub struct CompiledFilter {
    session_id: Option<u32>,
    state: Option<SessionState>,
    user: Option<UserPattern>,
    exclude_system_sessions: bool,
}

impl CompiledFilter {
    pub fn matches(&self, record: &SessionRecord) -> bool {
        self.session_id.map_or(true, |id| record.session_id == id)
            && self.state.map_or(true, |s| record.state == s)
            && self.user.as_ref().map_or(true, |p| p.matches(record))
            && !(self.exclude_system_sessions && is_system_session(record))
    }

    pub fn apply(&self, records: Vec<SessionRecord>) -> Vec<SessionRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// Compile and apply `filter` in one step.
pub fn apply_filter(
    records: Vec<SessionRecord>,
    filter: &SessionFilter,
) -> SessionResult<Vec<SessionRecord>> {
    Ok(filter.compile()?.apply(records))
}
