use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens and identity returned by a LetPot login.
///
/// Expiry fields are unix timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub access_token: String,
    pub access_token_expires: i64,
    pub refresh_token: String,
    pub refresh_token_expires: i64,
    pub user_id: String,
    pub email: String,
}

impl AuthenticationInfo {
    /// True while the access token has not expired yet.
    pub fn is_valid(&self) -> bool {
        self.access_token_expires > Utc::now().timestamp()
    }

    pub fn is_refresh_valid(&self) -> bool {
        self.refresh_token_expires > Utc::now().timestamp()
    }
}

/// A device linked to the account, as listed by the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetPotDevice {
    #[serde(rename = "sn")]
    pub serial_number: String,
    pub name: String,
    #[serde(rename = "dev_type")]
    pub device_type: String,
    pub is_online: bool,
    pub is_remote: bool,
}

impl LetPotDevice {
    /// Model code ("LPH21", "IGS01", ...) encoded in the serial number prefix.
    pub fn model_code(&self) -> &str {
        model_code(&self.serial_number)
    }
}

pub(crate) fn model_code(serial: &str) -> &str {
    serial.get(..5).unwrap_or(serial)
}

/// Last known state of a garden, decoded from a status message.
///
/// Fields that a model does not report are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub raw: Vec<u8>,
    pub light_brightness: Option<u16>,
    pub light_mode: u8,
    pub light_schedule_end: NaiveTime,
    pub light_schedule_start: NaiveTime,
    pub online: bool,
    pub plant_days: u16,
    pub pump_mode: u8,
    pub pump_nutrient: Option<bool>,
    pub pump_status: Option<u8>,
    pub system_on: bool,
    pub system_sound: Option<bool>,
    pub system_state: u8,
    pub temperature_unit: Option<u8>,
    pub temperature_value: Option<u16>,
    pub water_level: Option<u16>,
    pub water_mode: Option<u8>,
}
