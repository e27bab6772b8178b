use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use log::{info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use pairwatch::bluetooth::{
    device_count_text, nearby_device_count_text, open_default_adapter, receiver_to_stream, BtleplugEnumeration,
    BtleplugStatusResolver, FieldChange, ListNotification,
};
use pairwatch::config::{default_settings_path, AppConfig};
use pairwatch::errors::{AppError, Result as AppResult};
use pairwatch::logging::{configure_logging, set_debug_flags};
use pairwatch::manager::DeviceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("pairwatch - paired Bluetooth device monitor");

    // Get command line args to determine what to run
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        None | Some("watch") => {
            let config = AppConfig::load().context("Failed to load settings")?;
            watch(config).await.context("Device watch failed")?;
        }
        Some("config") => print_config()?,
        Some("help") | Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            print_usage();
            anyhow::bail!("Unknown command: {}", other);
        }
    }

    Ok(())
}

fn print_usage() {
    println!("\nUsage:");
    println!("  pairwatch watch     - Watch paired devices and their connection status (default)");
    println!("  pairwatch config    - Show the effective settings and where they are stored");
    println!("  pairwatch help      - Show this message");
    println!("\nThe btleplug backend cannot read bond state. With discovery.assume_paired set");
    println!("(the default) every advertising device in range is listed as a nearby device.");
}

fn print_config() -> anyhow::Result<()> {
    let path = default_settings_path();
    let config = AppConfig::load_from(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    println!("Settings file: {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn watch(config: AppConfig) -> AppResult<()> {
    configure_logging(config.log_level, config.log_file.clone(), true).map_err(AppError::Logging)?;
    set_debug_flags(config.debug.clone());

    let adapter = Arc::new(open_default_adapter().await?);
    let service = BtleplugEnumeration::new(Arc::clone(&adapter), config.discovery.clone());
    let resolver = Arc::new(BtleplugStatusResolver::new(adapter));

    let (manager, notifications) = DeviceManager::new(&config, service, resolver);
    let count_text = if config.discovery.assume_paired {
        nearby_device_count_text
    } else {
        device_count_text
    };
    let printer = tokio::spawn(print_notifications(notifications, count_text));

    if let Err(e) = manager.start() {
        manager.shutdown().await;
        let _ = printer.await;
        return Err(e.into());
    }

    let run_for = config.discovery.run_duration.map(Duration::from_secs);
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            println!("Stopping...");
        }
        _ = run_limit(run_for) => {
            info!("Run duration elapsed");
        }
    }

    manager.shutdown().await;
    if let Err(e) = printer.await {
        warn!("Notification printer ended abnormally: {}", e);
    }
    Ok(())
}

async fn run_limit(limit: Option<Duration>) {
    match limit {
        Some(duration) => tokio::time::sleep(duration).await,
        None => futures::future::pending().await,
    }
}

async fn print_notifications(
    notifications: UnboundedReceiver<ListNotification>,
    count_text: fn(usize) -> String,
) {
    let mut stream = Box::pin(receiver_to_stream(notifications));
    let mut last_count = None;

    while let Some(notification) = stream.next().await {
        match notification {
            ListNotification::Added(device) => println!("+ {}", device),
            ListNotification::Removed(id) => println!("- {}", id),
            ListNotification::Changed { id, changes } => {
                for change in changes {
                    match change {
                        FieldChange::DisplayName(name) => println!("~ {} renamed to {}", id, name),
                        FieldChange::ConnectionStatus(status) => println!("~ {} {}", id, status),
                    }
                }
            }
            ListNotification::CountChanged(count) => {
                if last_count != Some(count) {
                    println!("{}", count_text(count));
                    last_count = Some(count);
                }
            }
            ListNotification::Notice(message) => println!("{}", message),
        }
    }
}
