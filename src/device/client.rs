use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use rumqttc::Transport;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::converters::{DeviceConverter, converter_for};
use crate::error::{LetPotError, Result};
use crate::models::{AuthenticationInfo, DeviceStatus, model_code};

use super::packets::{MAINTYPE_DATA, SUBTYPE_CUSTOM, generate_message_packets};

pub const BROKER_HOST: &str = "broker.letpot.net";
pub const BROKER_PORT: u16 = 443;
pub const BROKER_PATH: &str = "/mqttwss";

const MAX_RECONNECT_INTERVAL_SECS: u64 = 600;
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// How the client reaches the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransport {
    /// TLS websockets on `wss://host:port/path`, as the LetPot broker expects.
    SecureWebsocket,
    /// Plain MQTT over TCP, for local brokers.
    Tcp,
}

/// State shared between a running `subscribe` and the command methods.
struct Session {
    client: Option<AsyncClient>,
    message_id: u8,
    last_status: Option<DeviceStatus>,
}

/// Realtime connection to a single LetPot device.
///
/// Share it through an `Arc` to issue commands from other tasks while one
/// task runs [`LetPotDeviceClient::subscribe`]. Once disconnected, a client
/// stays disconnected; create a new one to subscribe again.
pub struct LetPotDeviceClient {
    serial: String,
    device_type: String,
    converter: &'static dyn DeviceConverter,
    username: String,
    password: String,
    broker_host: String,
    broker_port: u16,
    broker_path: String,
    transport: BrokerTransport,
    cancel: CancellationToken,
    session: Mutex<Session>,
}

impl LetPotDeviceClient {
    pub fn new(info: &AuthenticationInfo, device_serial: &str) -> Result<Self> {
        let device_type = model_code(device_serial).to_string();
        let converter = converter_for(&device_type)
            .ok_or_else(|| LetPotError::UnsupportedDevice(device_type.clone()))?;
        let (username, password) = mqtt_credentials(info);

        Ok(Self {
            serial: device_serial.to_string(),
            device_type,
            converter,
            username,
            password,
            broker_host: BROKER_HOST.to_string(),
            broker_port: BROKER_PORT,
            broker_path: BROKER_PATH.to_string(),
            transport: BrokerTransport::SecureWebsocket,
            cancel: CancellationToken::new(),
            session: Mutex::new(Session {
                client: None,
                message_id: 0,
                last_status: None,
            }),
        })
    }

    /// Connect to another broker endpoint. `path` only applies to websockets.
    pub fn with_broker(mut self, host: &str, port: u16, path: &str) -> Self {
        self.broker_host = host.to_string();
        self.broker_port = port;
        self.broker_path = path.to_string();
        self
    }

    pub fn with_transport(mut self, transport: BrokerTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        self.session().last_status.clone()
    }

    pub fn data_topic(&self) -> String {
        format!("{}/data", self.serial)
    }

    pub fn command_topic(&self) -> String {
        format!("{}/cmd", self.serial)
    }

    /// Receive status updates for this device until [`disconnect`] is called.
    ///
    /// Connection errors are retried with a growing delay. A broker refusing
    /// the credentials ends the subscription with
    /// [`LetPotError::Authentication`].
    ///
    /// [`disconnect`]: LetPotDeviceClient::disconnect
    pub async fn subscribe<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(DeviceStatus) + Send,
    {
        let mut attempts: u32 = 0;

        while !self.cancel.is_cancelled() {
            let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), 10);
            info!(
                "Connecting to {}:{}{} for device {}",
                self.broker_host, self.broker_port, self.broker_path, self.serial
            );

            let outcome = tokio::select! {
                result = self.run_session(&client, &mut eventloop, &mut callback, &mut attempts) => Some(result),
                _ = self.cancel.cancelled() => None,
            };
            let Some(result) = outcome else {
                self.close(&client, &mut eventloop).await;
                break;
            };
            self.session().client = None;

            match result {
                Err(e @ LetPotError::Authentication(_)) => {
                    error!("MQTT auth error for device {}: {}", self.serial, e);
                    return Err(e);
                }
                Err(e) => {
                    attempts += 1;
                    let wait = reconnect_interval(attempts);
                    error!("MQTT error, reconnecting in {:?}: {}", wait, e);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                }
                Ok(()) => break,
            }
        }
        Ok(())
    }

    /// Stop [`LetPotDeviceClient::subscribe`], whether it is running already
    /// or has yet to start.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Ask the device to send its current status.
    pub async fn request_status(&self) -> Result<()> {
        self.publish(self.converter.current_status_message()).await
    }

    pub async fn set_light_brightness(&self, level: u16) -> Result<()> {
        if !self
            .converter
            .light_brightness_levels(&self.device_type)
            .contains(&level)
        {
            return Err(LetPotError::Device(format!(
                "Device doesn't support setting light brightness to {level}"
            )));
        }
        self.update_status(|status| status.light_brightness = Some(level))
            .await
    }

    /// Set the light mode (flower/vegetable).
    pub async fn set_light_mode(&self, mode: u8) -> Result<()> {
        self.update_status(|status| status.light_mode = mode).await
    }

    /// Change the light schedule; `None` keeps the current start or end time.
    pub async fn set_light_schedule(
        &self,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<()> {
        self.update_status(|status| {
            if let Some(start) = start {
                status.light_schedule_start = start;
            }
            if let Some(end) = end {
                status.light_schedule_end = end;
            }
        })
        .await
    }

    pub async fn set_plant_days(&self, days: u16) -> Result<()> {
        self.update_status(|status| status.plant_days = days).await
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.update_status(|status| status.system_on = on).await
    }

    /// Turn the scheduled pump on or off.
    pub async fn set_pump_mode(&self, on: bool) -> Result<()> {
        self.update_status(|status| status.pump_mode = u8::from(on))
            .await
    }

    /// Turn the alarm sound on or off.
    pub async fn set_sound(&self, on: bool) -> Result<()> {
        self.update_status(|status| status.system_sound = Some(on))
            .await
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mqtt_options(&self) -> MqttOptions {
        let client_id = generate_client_id();
        let mut options = match self.transport {
            BrokerTransport::SecureWebsocket => {
                let url = format!(
                    "wss://{}:{}{}",
                    self.broker_host, self.broker_port, self.broker_path
                );
                let mut options = MqttOptions::new(client_id, url, self.broker_port);
                options.set_transport(Transport::wss_with_default_config());
                options
            }
            BrokerTransport::Tcp => {
                MqttOptions::new(client_id, &self.broker_host, self.broker_port)
            }
        };
        options.set_keep_alive(Duration::from_secs(30));
        options.set_credentials(&self.username, &self.password);
        options
    }

    /// Drive one broker connection until it fails.
    async fn run_session<F>(
        &self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        callback: &mut F,
        attempts: &mut u32,
    ) -> Result<()>
    where
        F: FnMut(DeviceStatus) + Send,
    {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Connected to LetPot broker for device {}", self.serial);
                    *attempts = 0;
                    {
                        let mut session = self.session();
                        session.client = Some(client.clone());
                        session.message_id = 0;
                    }

                    client.subscribe(self.data_topic(), QoS::AtMostOnce).await?;
                    self.request_status().await?;
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.handle_message(&publish.payload, callback);
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(
                    code @ (ConnectReturnCode::BadUserNamePassword
                    | ConnectReturnCode::NotAuthorized),
                )) => {
                    return Err(LetPotError::Authentication(format!(
                        "MQTT connection refused: {code:?}"
                    )));
                }
                Err(e) => return Err(LetPotError::Mqtt(e.to_string())),
            }
        }
    }

    /// Send DISCONNECT on a live connection and drive the event loop until
    /// the broker closes it.
    async fn close(&self, client: &AsyncClient, eventloop: &mut EventLoop) {
        let connected = self.session().client.take().is_some();
        if connected && client.try_disconnect().is_ok() {
            let flush = async { while eventloop.poll().await.is_ok() {} };
            if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
                debug!("Broker kept the connection open after DISCONNECT");
            }
        }
        info!("Disconnected from device {}", self.serial);
    }

    fn handle_message<F>(&self, payload: &[u8], callback: &mut F)
    where
        F: FnMut(DeviceStatus),
    {
        debug!("Message from {}: {}", self.serial, String::from_utf8_lossy(payload));
        match self.converter.convert_hex_to_status(payload) {
            Ok(Some(status)) => {
                self.session().last_status = Some(status.clone());
                callback(status);
            }
            Ok(None) => {}
            Err(e) => warn!("Dropping message from {}: {}", self.serial, e),
        }
    }

    async fn update_status(&self, update: impl FnOnce(&mut DeviceStatus)) -> Result<()> {
        let mut status = self.last_status().ok_or_else(|| {
            LetPotError::Device("Client doesn't have a status to update".into())
        })?;
        update(&mut status);
        self.publish(self.converter.update_status_message(&status))
            .await
    }

    /// Publish a message to the device command topic.
    async fn publish(&self, message: Vec<u8>) -> Result<()> {
        let (client, packets) = {
            let mut session = self.session();
            let client = session.client.clone().ok_or_else(|| {
                LetPotError::Device("Missing client to publish message with".into())
            })?;
            let packets = generate_message_packets(
                MAINTYPE_DATA,
                SUBTYPE_CUSTOM,
                &message,
                &mut session.message_id,
            );
            (client, packets)
        };

        let topic = self.command_topic();
        for packet in packets {
            debug!("Publishing {}: {}", topic, packet);
            client.publish(&topic, QoS::AtMostOnce, false, packet).await?;
        }
        Ok(())
    }
}

/// Broker username and password derived from the account.
pub fn mqtt_credentials(info: &AuthenticationInfo) -> (String, String) {
    let username = format!("{}__letpot_v3", info.email);
    let username_hash = format!("{:x}", md5::compute(username.as_bytes()));
    let password = format!(
        "{:x}",
        Sha256::digest(format!("{}|{}", info.user_id, username_hash).as_bytes())
    );
    (username, password)
}

fn generate_client_id() -> String {
    format!(
        "LetPot_{}_{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

/// Delay before reconnect attempt number `attempts`.
pub fn reconnect_interval(attempts: u32) -> Duration {
    Duration::from_secs((u64::from(attempts) * 15).min(MAX_RECONNECT_INTERVAL_SECS))
}
