//! cmd2mqtt executes shell commands locally or over SSH and publishes the
//! results to MQTT for Home Assistant.
//!
//! Each configured command runs on its own periodic scheduler and publishes
//! its trimmed output (or an `"ERROR: ..."` string) to a sensor state topic,
//! after a one-time Home Assistant discovery announcement. Remote commands
//! reuse persistent SSH sessions from the [`remote::SessionStore`], with a
//! liveness probe and a single reconnect attempt before each use.

pub mod config;
pub mod error;
pub mod executor;
pub mod mqtt;
pub mod remote;
pub mod scheduler;
