//! Realtime device access over the LetPot MQTT broker.
//!
//! Status replies arrive on `<serial>/data`; commands are framed into hex
//! packets and published to `<serial>/cmd`.

pub mod client;
pub mod packets;

pub use client::LetPotDeviceClient;
