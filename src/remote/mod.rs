//! Persistent SSH sessions for remote command execution.
//!
//! Commands that name a `target_host` run over a long-lived SSH session
//! owned by the [`SessionStore`]. Sessions are established best-effort at
//! startup and replaced lazily when a liveness probe fails before use.

pub mod store;

pub use store::{ExecOutput, HostSession, SessionStore};
