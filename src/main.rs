/// Wake-word monitor service binary
///
/// Listens on the configured microphone, logs every captured command and
/// prints a one-line status every two seconds until Ctrl-C.

use std::io::Write;
use std::time::Duration;
use sysinfo::System;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wakeword_monitor::{
    list_input_devices, EnergyClassifier, MicrophoneDevice, Monitor, MonitorConfig,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "wakeword_monitor=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting wake-word monitor");

    let config = MonitorConfig::load()?;

    match list_input_devices() {
        Ok(devices) => {
            for device in devices {
                info!(
                    "Input device {}: {}{}",
                    device.index,
                    device.name,
                    if device.is_default { " (default)" } else { "" }
                );
            }
        }
        Err(e) => warn!("Could not enumerate input devices: {}", e),
    }

    let classifier = EnergyClassifier::new(config.energy_classifier.clone());
    let mut monitor = Monitor::new(config)?;
    monitor.start(Box::new(MicrophoneDevice::new()), classifier)?;

    let commands = monitor.commands();
    std::thread::Builder::new()
        .name("wakeword-consumer".to_string())
        .spawn(move || {
            for command in commands.iter() {
                info!(
                    "Command captured: {} ({:.2}s, {:?})",
                    command.audio_path.display(),
                    command.duration_secs,
                    command.reason
                );
            }
        })?;

    info!("Monitoring. Press Ctrl-C to stop");

    let mut system = System::new();
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                system.refresh_cpu_usage();
                monitor.state().set_cpu_usage(system.global_cpu_usage());
                print!("\r{}", monitor.status().status_line());
                let _ = std::io::stdout().flush();
            }
        }
    }

    println!();
    monitor.stop();
    info!("Wake-word monitor stopped");
    Ok(())
}
