//! # SortOfRemote NG – Session Directory
//!
//! Enumerate, resolve, filter and act on the logon sessions of a local or
//! remote session host. Provides:
//!
//! - **Directory Client** – open a scoped host handle and take one
//!   enumeration snapshot of every session
//! - **Attribute Resolver** – per-session typed attributes (user, client,
//!   protocol) and an optional detailed block (timing, traffic, client
//!   address and display, configuration, lock state)
//! - **Filter & Projection** – id, state, user glob and exclude-system
//!   predicates over the resolved set
//! - **Action Dispatcher** – disconnect, log off, send message and launch an
//!   interactive process, each against a freshly re-validated session
//! - **Remote Dispatch** – typed commands for an external execution context
//!
//! The core runs against the [`host::SessionHost`] trait. [`NativeHost`] is
//! the Windows Terminal Services back-end; [`sim::SimulatedHost`] is a fully
//! in-memory host for tests and offline use.

pub mod error;
pub mod types;
pub mod layout;
pub mod host;

#[cfg(windows)]
pub mod wts_ffi;

pub mod sim;
pub mod resolver;
pub mod filter;
pub mod directory;
pub mod actions;
pub mod audit;
pub mod remote;
pub mod config;
pub mod service;

/// The session host for this platform.
#[cfg(windows)]
pub type NativeHost = wts_ffi::WtsHost;

/// The session host for this platform.
#[cfg(not(windows))]
pub type NativeHost = host::UnsupportedHost;

pub use error::{SessionError, SessionErrorKind, SessionResult};
pub use filter::{SessionFilter, SessionQuery};
pub use service::{SessionDirService, SessionDirServiceState};
pub use types::*;
