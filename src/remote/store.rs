//! SSH session store with liveness checking and lazy reconnection.
//!
//! The store owns at most one live session per configured host name.
//! Sessions are created best-effort at startup; a host that cannot be
//! reached is logged and skipped, never fatal. Liveness is checked by
//! callers immediately before use, not by a background poller, so a dead
//! connection is only detected on the next scheduled use.

use crate::config::HostConfig;
use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use ssh2::Session;
use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Keepalive interval advertised to the server, in seconds.
const KEEPALIVE_INTERVAL: u32 = 30;

/// Default private key files tried when no explicit credential is configured.
const DEFAULT_KEY_FILES: [&str; 3] = ["id_rsa", "id_ed25519", "id_ecdsa"];

/// Output of one remote command invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 for success)
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns true if the command succeeded (exit code 0).
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One live SSH session bound to its host configuration.
///
/// Owned by the [`SessionStore`]; callers receive an `Arc` per lookup and
/// must not retain it past the current execution, since a reconnect
/// replaces the store entry with a fresh session.
pub struct HostSession {
    session: Session,
    spec: HostConfig,
}

impl HostSession {
    /// Probes the existing transport by opening and closing a channel,
    /// which forces a real round-trip to the server.
    ///
    /// Returns false on any transport error, including a stale or broken
    /// connection. Bounded by the timeout set at connect; never a new
    /// connection attempt.
    pub fn is_alive(&self) -> bool {
        match self.session.channel_session() {
            Ok(mut channel) => {
                let _ = channel.close();
                let _ = channel.wait_close();
                true
            }
            Err(e) => {
                debug!("Liveness probe failed for {}: {}", self.spec.name, e);
                false
            }
        }
    }

    /// Runs a command over this session, capturing stdout and stderr
    /// separately along with the exit status.
    pub fn exec(&self, command: &str) -> Result<ExecOutput> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| Error::Ssh(format!("failed to open channel: {}", e)))?;

        channel
            .exec(command)
            .map_err(|e| Error::Ssh(format!("failed to execute command: {}", e)))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(Error::Io)?;

        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(Error::Io)?;

        channel
            .wait_close()
            .map_err(|e| Error::Ssh(format!("failed to close channel: {}", e)))?;

        let exit_code = channel
            .exit_status()
            .map_err(|e| Error::Ssh(format!("failed to get exit status: {}", e)))?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Thread-safe mapping from host name to its current live session.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<HostSession>>>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The map lock is only held across map operations, never across a
    /// connection attempt or command execution.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<HostSession>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Establishes sessions for all configured hosts, best-effort.
    ///
    /// A host that cannot be connected is logged and excluded from the
    /// store. Returns `(connected, total)` for observability.
    pub fn initialize(&self, hosts: &[HostConfig]) -> (usize, usize) {
        let mut connected = 0;

        for host in hosts {
            match connect(host) {
                Ok(session) => {
                    self.lock().insert(
                        host.name.clone(),
                        Arc::new(HostSession {
                            session,
                            spec: host.clone(),
                        }),
                    );
                    info!("Connected to SSH host: {}", host.name);
                    connected += 1;
                }
                Err(e) => {
                    error!("Failed to connect to SSH host {}: {}", host.name, e);
                }
            }
        }

        (connected, hosts.len())
    }

    /// Looks up the current session for a host name. No side effects.
    pub fn get(&self, name: &str) -> Option<Arc<HostSession>> {
        self.lock().get(name).cloned()
    }

    /// Re-runs connection establishment for one host from its stored spec
    /// and replaces the entry only on success. On failure the prior (dead)
    /// entry remains; the caller treats the host as unusable for this
    /// execution and retries on the next one.
    pub fn reconnect(&self, name: &str) -> Result<()> {
        let spec = match self.lock().get(name) {
            Some(entry) => entry.spec.clone(),
            None => return Err(Error::Ssh(format!("SSH host {} not found", name))),
        };

        let session = connect(&spec)?;

        self.lock()
            .insert(name.to_string(), Arc::new(HostSession { session, spec }));
        Ok(())
    }

    /// Disconnects every live session. Errors during close are logged, not
    /// propagated; safe on an empty store and safe to call twice.
    pub fn close_all(&self) {
        let sessions: Vec<(String, Arc<HostSession>)> = self.lock().drain().collect();

        for (name, entry) in sessions {
            match entry.session.disconnect(None, "shutting down", None) {
                Ok(()) => info!("Closed SSH connection to: {}", name),
                Err(e) => warn!("Error closing SSH connection to {}: {}", name, e),
            }
        }
    }
}

/// Establishes and authenticates a new SSH session for a host.
fn connect(spec: &HostConfig) -> Result<Session> {
    let timeout = spec.connect_timeout();

    debug!("Establishing SSH connection to {}", spec.connection_string());

    // Resolve hostname to socket address
    let addr_str = format!("{}:{}", spec.host, spec.port);
    let addr = addr_str
        .to_socket_addrs()
        .map_err(|e| Error::Ssh(format!("failed to resolve host '{}': {}", spec.host, e)))?
        .next()
        .ok_or_else(|| Error::Ssh(format!("no addresses found for host '{}'", spec.host)))?;

    // Establish TCP connection with timeout
    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to connect to {}: {}", spec.host, e),
        ))
    })?;

    tcp.set_read_timeout(Some(timeout)).map_err(Error::Io)?;
    tcp.set_write_timeout(Some(timeout)).map_err(Error::Io)?;

    let mut session =
        Session::new().map_err(|e| Error::Ssh(format!("failed to create SSH session: {}", e)))?;

    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| Error::Ssh(format!("SSH handshake failed: {}", e)))?;

    // Bound every later round-trip (exec, keepalive) by the same timeout.
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_keepalive(true, KEEPALIVE_INTERVAL);

    authenticate(&session, spec)?;

    debug!("SSH connection to {} established", spec.name);
    Ok(session)
}

/// Authenticates a freshly handshaken session.
///
/// Tries the explicitly configured key file first, then the configured
/// password. Only when neither is configured, falls back to the SSH agent
/// followed by the default key files in `~/.ssh`. Encrypted keys without a
/// passphrase simply fail their attempt and fall through.
fn authenticate(session: &Session, spec: &HostConfig) -> Result<()> {
    debug!("Authenticating as user: {}", spec.user);

    if let Some(key_path) = &spec.key_path {
        let expanded = expand_path(key_path);
        debug!("Attempting public key authentication with: {:?}", expanded);

        match session.userauth_pubkey_file(&spec.user, None, &expanded, None) {
            Ok(()) => {
                debug!("Public key authentication successful");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Public key authentication failed for host {} with {}: {}",
                    spec.name, key_path, e
                );
            }
        }
    }

    if let Some(password) = &spec.password {
        match session.userauth_password(&spec.user, password) {
            Ok(()) => {
                debug!("Password authentication successful");
                return Ok(());
            }
            Err(e) => {
                warn!("Password authentication failed for host {}: {}", spec.name, e);
            }
        }
    }

    if spec.key_path.is_none() && spec.password.is_none() {
        // SSH agent, discovered via SSH_AUTH_SOCK
        if std::env::var_os("SSH_AUTH_SOCK").is_some() {
            match session.userauth_agent(&spec.user) {
                Ok(()) => {
                    debug!("Agent authentication successful for host {}", spec.name);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Agent authentication failed for host {}: {}", spec.name, e);
                }
            }
        } else {
            debug!(
                "SSH_AUTH_SOCK not set, SSH agent not available for host {}",
                spec.name
            );
        }

        // Default key files, tried in order until one authenticates
        if let Some(home) = dirs::home_dir() {
            for key in DEFAULT_KEY_FILES {
                let path = home.join(".ssh").join(key);
                if !path.exists() {
                    continue;
                }
                debug!("Trying SSH key: {}", path.display());
                match session.userauth_pubkey_file(&spec.user, None, &path, None) {
                    Ok(()) => {
                        debug!("Authenticated with SSH key: {}", path.display());
                        return Ok(());
                    }
                    Err(e) => {
                        debug!("Could not authenticate with {}: {}", path.display(), e);
                    }
                }
            }
        } else {
            warn!(
                "Could not determine home directory for host {}, skipping default SSH keys",
                spec.name
            );
        }
    }

    Err(Error::Ssh(format!(
        "no usable authentication method for host {} (tried: {})",
        spec.name,
        auth_methods_tried(spec)
    )))
}

fn auth_methods_tried(spec: &HostConfig) -> String {
    match (&spec.key_path, &spec.password) {
        (Some(key), Some(_)) => format!("{}, password", key),
        (Some(key), None) => key.clone(),
        (None, Some(_)) => "password".to_string(),
        (None, None) => "agent, default keys".to_string(),
    }
}

/// Expands ~ in paths to the home directory.
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    Path::new(path).to_path_buf()
}
