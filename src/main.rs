use log::{error, info};
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use pvoutput_bridge::prelude::*;
use pvoutput_bridge::options::Options;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let options = Options::new();

    let mut config = Config::new(options.config_file.clone())?;
    if let Some(log_file) = &options.log_file {
        config.log_file = log_file.clone();
    }
    let config = Arc::new(ConfigWrapper::from_config(config));

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.loglevel()))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    // Create a channel for shutdown signaling
    let (shutdown_tx, _) = broadcast::channel(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, initiating shutdown");
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    // Run the application
    let runtime = options.runtime;
    let app_handle = tokio::spawn(pvoutput_bridge::app(shutdown_tx.subscribe(), config.clone(), options));

    // If a runtime limit is specified, terminate after that many seconds
    if let Some(time) = runtime {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            info!("Runtime of {} seconds specified, will terminate automatically", time);
            tokio::time::sleep(Duration::from_secs(time)).await;
            info!("Runtime duration reached, initiating shutdown");
            if let Err(e) = shutdown_tx_clone.send(()) {
                error!("Failed to send shutdown signal: {}", e);
            }
        });
    }

    // Wait for the application to complete
    if let Err(e) = app_handle.await? {
        error!("Application error: {}", e);
    }

    Ok(())
}
