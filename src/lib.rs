//! Async client for LetPot hydroponic gardens.
//!
//! [`LetPotClient`] logs in and lists the devices of an account over HTTP.
//! [`LetPotDeviceClient`] connects to a single device through the LetPot MQTT
//! broker to receive its status and change its settings.

pub mod api;
pub mod config;
pub mod converters;
pub mod device;
pub mod error;
pub mod models;

pub use api::LetPotClient;
pub use device::LetPotDeviceClient;
pub use error::{LetPotError, Result};
pub use models::{AuthenticationInfo, DeviceStatus, LetPotDevice};
