//! Command execution with local/remote dispatch.
//!
//! Every failure mode (missing host, dead and unrecoverable session,
//! non-zero exit, empty command) degrades to an `"ERROR: ..."` result string
//! that is published like any successful result. A failed health-check
//! command is itself meaningful telemetry for the consuming system, so the
//! executor never raises a fatal condition.

use crate::config::CommandConfig;
use crate::remote::SessionStore;
use log::{debug, error, warn};
use std::process::Command;

/// Executes one command to completion and returns its result text.
///
/// Dispatches to a local subprocess when the target is "local" or empty,
/// otherwise to the named host's session in the store. Successful output is
/// whitespace-trimmed; multi-line output is preserved verbatim.
pub fn execute(cmd: &CommandConfig, store: &SessionStore) -> String {
    debug!("Executing command: {}", cmd.name);

    if cmd.is_local() {
        execute_local(cmd)
    } else {
        execute_remote(cmd, store)
    }
}

fn execute_local(cmd: &CommandConfig) -> String {
    if cmd.command.trim().is_empty() {
        error!("Empty command for {}", cmd.name);
        return "ERROR: Empty command".to_string();
    }

    // Run through the shell so pipes, redirects etc. work.
    let output = match Command::new("sh").arg("-c").arg(&cmd.command).output() {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to spawn command {}: {}", cmd.name, e);
            return format!("ERROR: {}", e);
        }
    };

    // Combined stdout and stderr, like a terminal would show.
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let trimmed = combined.trim();

    if !output.status.success() {
        if trimmed.contains('\n') {
            error!(
                "Command {} failed: {}\nFull output:\n{}",
                cmd.name, output.status, trimmed
            );
        } else {
            error!(
                "Command {} failed: {} (output: {})",
                cmd.name, output.status, trimmed
            );
        }

        // Prefer the captured output over the bare exit status.
        if trimmed.is_empty() {
            return format!("ERROR: {}", output.status);
        }
        return format!("ERROR: {}", trimmed);
    }

    if trimmed.contains('\n') {
        debug!("Command {} produced multi-line output:\n{}", cmd.name, trimmed);
    }

    trimmed.to_string()
}

fn execute_remote(cmd: &CommandConfig, store: &SessionStore) -> String {
    let target = &cmd.target_host;

    let Some(session) = store.get(target) else {
        error!("Target host {} not found for command {}", target, cmd.name);
        return format!("ERROR: Target host {} not configured", target);
    };

    // Lazy liveness check with exactly one reconnect attempt. On reconnect
    // failure no command is attempted on the known-dead session.
    let session = if session.is_alive() {
        session
    } else {
        warn!("SSH connection to {} is dead, reconnecting...", target);
        if let Err(e) = store.reconnect(target) {
            error!("Failed to reconnect to SSH host {}: {}", target, e);
            return format!("ERROR: Failed to reconnect to SSH host: {}", e);
        }
        match store.get(target) {
            Some(fresh) => fresh,
            None => {
                // Only possible if the entry was removed concurrently.
                error!("Target host {} disappeared after reconnect", target);
                return format!("ERROR: Target host {} not configured", target);
            }
        }
    };

    match session.exec(&cmd.command) {
        Ok(output) if output.is_success() => {
            let result = output.stdout.trim().to_string();
            if result.contains('\n') {
                debug!("Command {} produced multi-line output:\n{}", cmd.name, result);
            }
            result
        }
        Ok(output) => {
            let stderr = output.stderr.trim();
            error!(
                "Remote command {} exited with status {}: {}",
                cmd.name, output.exit_code, stderr
            );
            format!(
                "ERROR: command exited with status {}, stderr: {}",
                output.exit_code, stderr
            )
        }
        Err(e) => {
            error!("SSH command {} failed: {}", cmd.name, e);
            format!("ERROR: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_command(command: &str) -> CommandConfig {
        CommandConfig {
            name: "test".to_string(),
            command: command.to_string(),
            ..CommandConfig::default()
        }
    }

    #[test]
    fn test_local_success_is_trimmed() {
        let store = SessionStore::new();
        let result = execute(&local_command("echo ok"), &store);
        assert_eq!(result, "ok");
    }

    #[test]
    fn test_local_failure_carries_stderr() {
        let store = SessionStore::new();
        let result = execute(&local_command("echo bad >&2; exit 1"), &store);
        assert_eq!(result, "ERROR: bad");
    }

    #[test]
    fn test_local_failure_without_output_reports_status() {
        let store = SessionStore::new();
        let result = execute(&local_command("exit 3"), &store);
        assert!(result.starts_with("ERROR:"), "got: {}", result);
    }

    #[test]
    fn test_empty_command_is_an_error() {
        let store = SessionStore::new();
        let result = execute(&local_command("   "), &store);
        assert_eq!(result, "ERROR: Empty command");
    }

    #[test]
    fn test_multi_line_output_preserved() {
        let store = SessionStore::new();
        let result = execute(&local_command("printf 'one\\ntwo\\n'"), &store);
        assert_eq!(result, "one\ntwo");
    }

    #[test]
    fn test_missing_remote_host_never_executes() {
        let store = SessionStore::new();
        let cmd = CommandConfig {
            name: "remote".to_string(),
            command: "uptime".to_string(),
            target_host: "ghost".to_string(),
            ..CommandConfig::default()
        };

        let result = execute(&cmd, &store);
        assert_eq!(result, "ERROR: Target host ghost not configured");
    }

    #[test]
    fn test_local_sentinel_dispatches_locally() {
        let store = SessionStore::new();
        let cmd = CommandConfig {
            name: "sentinel".to_string(),
            command: "echo local".to_string(),
            target_host: "local".to_string(),
            ..CommandConfig::default()
        };

        assert_eq!(execute(&cmd, &store), "local");
    }
}
