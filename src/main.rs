use anyhow::{Context, Result};
use tokio::{signal, time};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sensorpush_cloud::{Config, HttpTransport, SensorPushClient, SensorPushHelper};

#[tokio::main]
async fn main() -> Result<()> {
    // SENSORPUSH_* may come from a local .env; a missing file is fine.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let client = SensorPushClient::with_transport(
        config.credentials.clone(),
        HttpTransport::new(config.base_url.clone()),
    );
    let helper = SensorPushHelper::new(client);

    let mut ticker = time::interval(config.poll_interval());
    info!(
        interval_secs = config.poll_interval_secs,
        email = %config.credentials.email(),
        "SensorPush polling loop started"
    );

    let stop = wait_for_stop();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            stopped = &mut stop => {
                stopped?;
                info!("SensorPush polling loop stopped");
                return Ok(());
            }
            _ = ticker.tick() => poll_once(&helper).await,
        }
    }
}

async fn poll_once(helper: &SensorPushHelper) {
    match helper.get_data().await {
        Ok(data) => {
            for record in data.values() {
                info!(
                    device_id = %record.device_id,
                    name = %record.name,
                    model = %record.model,
                    temperature = ?record.temperature,
                    humidity = ?record.humidity,
                    last_update = %record.last_update,
                    "Latest sample"
                );
            }
        }
        Err(e) if e.is_authentication() => {
            error!(
                error = %e,
                "SensorPush sign-in failed; check SENSORPUSH_EMAIL and SENSORPUSH_PASSWORD"
            );
        }
        Err(e) => {
            error!(error = %e, "Failed to fetch SensorPush data");
        }
    }
}

/// Resolves on Ctrl+C, or on SIGTERM from a service manager.
#[cfg(unix)]
async fn wait_for_stop() -> Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    tokio::select! {
        res = signal::ctrl_c() => res.context("listening for Ctrl+C"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_stop() -> Result<()> {
    signal::ctrl_c().await.context("listening for Ctrl+C")
}
