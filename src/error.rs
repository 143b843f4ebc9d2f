use thiserror::Error;

#[derive(Error, Debug)]
pub enum LetPotError {
    /// Credentials were rejected, or are missing or expired.
    #[error("Authentication error: {0}")]
    Authentication(String),
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::v5::ClientError),
    /// The API answered, but not with what we asked for.
    #[error("API error: {0}")]
    Api(String),
    #[error("{0}")]
    Device(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Unsupported device type: {0}")]
    UnsupportedDevice(String),
}

pub type Result<T> = std::result::Result<T, LetPotError>;
