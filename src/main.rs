use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use letpot::device::client::BROKER_PATH;
use letpot::{AuthenticationInfo, LetPotClient, LetPotDeviceClient, config};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting letpot client (api={}, broker={}:{})",
        config.api_url, config.broker.host, config.broker.port,
    );

    let cached = config
        .auth_file
        .as_deref()
        .and_then(load_auth)
        .filter(|auth| auth.email == config.account.email);
    let mut client =
        LetPotClient::new(reqwest::Client::new(), cached).with_base_url(&config.api_url);

    let devices = match client
        .get_devices_with_login(&config.account.email, &config.account.password)
        .await
    {
        Ok(devices) => devices,
        Err(e) => {
            error!("Failed to list devices: {}", e);
            std::process::exit(1);
        }
    };

    // get_devices may have refreshed the tokens
    let Some(auth) = client.auth().cloned() else {
        error!("No authentication info after login");
        std::process::exit(1);
    };
    if let Some(path) = &config.auth_file {
        save_auth(path, &auth);
    }

    for device in &devices {
        info!(
            "  Device: {} ({}) type {}, online={}, remote={}",
            device.name,
            device.serial_number,
            device.device_type,
            device.is_online,
            device.is_remote,
        );
    }

    let Some(serial) = config.device else {
        return;
    };

    let device_client = match LetPotDeviceClient::new(&auth, &serial) {
        Ok(c) => Arc::new(c.with_broker(&config.broker.host, config.broker.port, BROKER_PATH)),
        Err(e) => {
            error!("Cannot follow device {}: {}", serial, e);
            std::process::exit(1);
        }
    };

    let subscriber = device_client.clone();
    let mut subscription = tokio::spawn(async move {
        subscriber
            .subscribe(|status| match serde_json::to_string(&status) {
                Ok(json) => info!("Status {}: {}", serial, json),
                Err(e) => warn!("Failed to serialize status: {}", e),
            })
            .await
    });

    tokio::select! {
        result = &mut subscription => {
            match result {
                Ok(Err(e)) => error!("Subscription ended: {}", e),
                Err(e) => error!("Subscription task failed: {}", e),
                Ok(Ok(())) => {}
            }
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = async {
            let mut sigterm = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate()
            ).expect("Failed to register SIGTERM handler");
            sigterm.recv().await;
        } => {
            info!("Received SIGTERM, shutting down");
        }
    }

    device_client.disconnect();
    let _ = tokio::time::timeout(Duration::from_secs(2), subscription).await;
    info!("letpot client stopped");
}

fn load_auth(path: &Path) -> Option<AuthenticationInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(auth) => Some(auth),
        Err(e) => {
            warn!("Ignoring invalid auth file {}: {}", path.display(), e);
            None
        }
    }
}

fn save_auth(path: &Path, auth: &AuthenticationInfo) {
    let result = serde_json::to_string_pretty(auth)
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
    if let Err(e) = result {
        warn!("Failed to write auth file {}: {}", path.display(), e);
    }
}
