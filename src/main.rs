use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use cmd2mqtt::config::Config;
use cmd2mqtt::mqtt::MqttPublisher;
use cmd2mqtt::remote::SessionStore;
use cmd2mqtt::scheduler::{self, Publisher};

#[derive(Parser)]
#[command(name = "cmd2mqtt")]
#[command(version)]
#[command(
    about = "Execute shell commands locally or over SSH and publish the results to MQTT for Home Assistant",
    long_about = None
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml", env = "CMD2MQTT_CONFIG")]
    config: PathBuf,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", env = "CMD2MQTT_LOG_LEVEL")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_str()),
    )
    .init();

    info!("Starting cmd2mqtt");

    let config = Config::load(&cli.config).context("failed to load configuration")?;

    let store = Arc::new(SessionStore::new());
    if config.ssh.hosts.is_empty() {
        info!("No SSH hosts configured, only local commands will be available");
    } else {
        info!("Initializing {} SSH connection(s)...", config.ssh.hosts.len());
        let (connected, total) = store.initialize(&config.ssh.hosts);
        info!("Successfully connected to {}/{} SSH hosts", connected, total);
    }

    let publisher = Arc::new(
        MqttPublisher::connect(&config.mqtt).context("failed to connect to MQTT broker")?,
    );

    // Announce each sensor once, then hand the command to its scheduler.
    let sink: Arc<dyn Publisher> = publisher.clone();
    for cmd in &config.commands {
        publisher.announce(cmd);
        scheduler::spawn(cmd.clone(), Arc::clone(&store), Arc::clone(&sink));
    }

    wait_for_shutdown()?;

    info!("Shutting down...");
    store.close_all();
    publisher.disconnect();

    Ok(())
}

/// Blocks until SIGINT/SIGTERM.
fn wait_for_shutdown() -> Result<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install signal handler")?;

    rx.recv().context("signal channel closed")?;
    Ok(())
}
