//! Per-command periodic scheduling.
//!
//! Each configured command gets its own scheduler thread: one immediate
//! execution at startup, then a fixed-cadence tick loop on the command's
//! interval. Every tick runs its execution on a separate worker thread, so
//! a slow or blocked execution never delays or skips later ticks;
//! overlapping executions of the same command are permitted. Schedulers run
//! until process exit; shutdown is global and abrupt.

use crate::config::CommandConfig;
use crate::executor;
use crate::remote::SessionStore;
use log::error;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Interval substituted when a command's frequency string is unparsable.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Sink for command results, implemented by the MQTT publisher.
///
/// Both operations are fire-and-forget: implementations log failures but
/// never surface them to the scheduler.
pub trait Publisher: Send + Sync {
    /// Announces a command's sensor to the consuming system, once at startup.
    fn announce(&self, cmd: &CommandConfig);

    /// Publishes one execution result.
    fn publish(&self, cmd: &CommandConfig, result: &str);
}

/// Spawns the scheduler thread for one command.
pub fn spawn(
    cmd: CommandConfig,
    store: Arc<SessionStore>,
    publisher: Arc<dyn Publisher>,
) -> JoinHandle<()> {
    thread::spawn(move || run(cmd, store, publisher))
}

fn run(cmd: CommandConfig, store: Arc<SessionStore>, publisher: Arc<dyn Publisher>) {
    let interval = match cmd.interval() {
        Some(interval) => interval,
        None => {
            error!(
                "Invalid frequency '{}' for command {}, using default of {}s",
                cmd.frequency,
                cmd.name,
                DEFAULT_INTERVAL.as_secs()
            );
            DEFAULT_INTERVAL
        }
    };

    let mut next_tick = Instant::now() + interval;

    // Execute immediately, then on every tick.
    execute_on_worker(&cmd, &store, &publisher);

    loop {
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
        next_tick += interval;

        execute_on_worker(&cmd, &store, &publisher);
    }
}

/// Runs one execution on its own thread and hands the result to the
/// publisher. The worker is detached; in-flight executions are not awaited
/// at shutdown.
fn execute_on_worker(cmd: &CommandConfig, store: &Arc<SessionStore>, publisher: &Arc<dyn Publisher>) {
    let cmd = cmd.clone();
    let store = Arc::clone(store);
    let publisher = Arc::clone(publisher);

    thread::spawn(move || {
        let result = executor::execute(&cmd, &store);
        publisher.publish(&cmd, &result);
    });
}
