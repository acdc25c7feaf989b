//! End-to-end coverage of the scheduling and dispatch pipeline, using a
//! recording publisher in place of the MQTT broker.

use cmd2mqtt::config::{CommandConfig, Config};
use cmd2mqtt::remote::SessionStore;
use cmd2mqtt::scheduler::{self, Publisher};
use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

struct RecordingPublisher {
    announced: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    fn new() -> Self {
        Self {
            announced: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn announce(&self, cmd: &CommandConfig) {
        self.announced.lock().unwrap().push(cmd.name.clone());
    }

    fn publish(&self, cmd: &CommandConfig, result: &str) {
        self.published
            .lock()
            .unwrap()
            .push((cmd.name.clone(), result.to_string()));
    }
}

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_config_and_runs_commands_through_the_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
mqtt:
  broker: "localhost"
commands:
  - name: "Echo"
    command: "echo hello"
    frequency: "1h"
  - name: "Ghost Host"
    command: "uptime"
    frequency: "1h"
    target_host: "ghost"
"#,
    );

    let config = Config::load(&path).unwrap();
    assert_eq!(config.commands.len(), 2);

    let store = Arc::new(SessionStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let sink: Arc<dyn Publisher> = publisher.clone();

    for cmd in &config.commands {
        sink.announce(cmd);
        scheduler::spawn(cmd.clone(), Arc::clone(&store), Arc::clone(&sink));
    }

    thread::sleep(Duration::from_millis(400));

    assert_eq!(
        publisher.announced.lock().unwrap().as_slice(),
        ["Echo", "Ghost Host"]
    );

    let published = publisher.published();
    let echo = published.iter().find(|(name, _)| name == "Echo").unwrap();
    assert_eq!(echo.1, "hello");

    // A missing remote host degrades to a published error, never a crash.
    let ghost = published
        .iter()
        .find(|(name, _)| name == "Ghost Host")
        .unwrap();
    assert_eq!(ghost.1, "ERROR: Target host ghost not configured");
}

#[test]
fn commands_with_unparsable_frequency_still_run_once_immediately() {
    let store = Arc::new(SessionStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let sink: Arc<dyn Publisher> = publisher.clone();

    let cmd = CommandConfig {
        name: "Bad Frequency".to_string(),
        command: "echo still-running".to_string(),
        frequency: "sometimes".to_string(),
        ..CommandConfig::default()
    };

    scheduler::spawn(cmd, store, sink);
    thread::sleep(Duration::from_millis(300));

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1, "still-running");
}

#[test]
fn independent_schedulers_do_not_block_each_other() {
    let store = Arc::new(SessionStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let sink: Arc<dyn Publisher> = publisher.clone();

    let slow = CommandConfig {
        name: "Slow".to_string(),
        command: "sleep 2; echo slow".to_string(),
        frequency: "1h".to_string(),
        ..CommandConfig::default()
    };
    let fast = CommandConfig {
        name: "Fast".to_string(),
        command: "echo fast".to_string(),
        frequency: "100ms".to_string(),
        ..CommandConfig::default()
    };

    scheduler::spawn(slow, Arc::clone(&store), Arc::clone(&sink));
    scheduler::spawn(fast, store, sink);

    thread::sleep(Duration::from_millis(450));

    let fast_count = publisher
        .published()
        .iter()
        .filter(|(name, _)| name == "Fast")
        .count();
    assert!(
        fast_count >= 3,
        "fast command starved by slow command: {} runs",
        fast_count
    );
}

#[test]
fn store_close_all_is_safe_during_operation() {
    let store = SessionStore::new();
    assert!(store.get("anything").is_none());
    store.close_all();
    store.close_all();
}
