pub mod channels;
pub mod config;
pub mod energy_log;
pub mod http_pool;
pub mod options;
pub mod prelude;
pub mod pvoutput;
pub mod scheduler;
pub mod unixtime;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::energy_log::JsonlReader;
use crate::http_pool::ReqwestTransport;
use crate::prelude::*;
use std::sync::Arc;
use tokio::sync::broadcast;

pub async fn app(
    mut shutdown: broadcast::Receiver<()>,
    config: Arc<ConfigWrapper>,
    options: options::Options,
) -> Result<()> {
    info!("Starting pvoutput-bridge {}", CARGO_PKG_VERSION);

    info!("  Creating Channels...");
    let channels = Channels::new();

    info!("  Creating HTTP pool...");
    let pool = Arc::new(HttpPool::new(2));
    let transport = Arc::new(ReqwestTransport::new()?);

    info!("  Creating PVOutput uploader...");
    let mut uploader = Uploader::new((*config).clone(), channels.clone(), pool.clone(), transport);
    uploader.attach_log_files(
        JsonlReader::new(config.log_file()),
        config.history_file().map(JsonlReader::new),
    );

    info!("  Creating Scheduler...");
    let mut scheduler = Scheduler::new(channels.clone());
    scheduler.register(Box::new(uploader));

    // First config load creates the session; later revisions restart it.
    let _ = channels
        .to_uploader
        .send(pvoutput::ChannelData::Config(config.pvoutput()));

    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("scheduler error: {}", e);
        }
    });

    run_control_loop(&mut shutdown, &channels, &config, &options).await;

    info!("Stopping scheduler...");
    let _ = channels.to_uploader.send(pvoutput::ChannelData::Shutdown);
    scheduler_handle.await?;
    info!("Shutdown complete");

    Ok(())
}

#[cfg(unix)]
async fn recv_signal(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(unix)]
async fn run_control_loop(
    shutdown: &mut broadcast::Receiver<()>,
    channels: &Channels,
    config: &Arc<ConfigWrapper>,
    options: &options::Options,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("Failed to install SIGHUP handler: {}", e);
            None
        }
    };
    let mut user1 = match signal(SignalKind::user_defined1()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("Failed to install SIGUSR1 handler: {}", e);
            None
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown requested");
                return;
            }
            _ = recv_signal(&mut hangup) => {
                info!("SIGHUP received, reloading configuration");
                match Config::new(options.config_file.clone()) {
                    Ok(mut new) => {
                        // The command line datalog override survives reloads.
                        if let Some(log_file) = &options.log_file {
                            new.log_file = log_file.clone();
                        }
                        config.replace(new);
                        let _ = channels.to_uploader.send(pvoutput::ChannelData::Config(config.pvoutput()));
                    }
                    Err(e) => error!("Config reload failed, keeping running config: {}", e),
                }
            }
            _ = recv_signal(&mut user1) => {
                let _ = channels.to_uploader.send(pvoutput::ChannelData::ReportStatus);
            }
        }
    }
}

#[cfg(not(unix))]
async fn run_control_loop(
    shutdown: &mut broadcast::Receiver<()>,
    _channels: &Channels,
    _config: &Arc<ConfigWrapper>,
    _options: &options::Options,
) {
    let _ = shutdown.recv().await;
    info!("Shutdown requested");
}
