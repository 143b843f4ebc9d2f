//! Per-model encoding of LetPot status and command messages.
//!
//! Every garden model family speaks the same framing but uses its own message
//! codes and field layout. A converter knows one family: which model codes it
//! handles, how to ask for the current status, how to decode the status
//! reply and how to encode a full status update.

use chrono::{NaiveTime, Timelike};
use tracing::{debug, warn};

use crate::error::{LetPotError, Result};
use crate::models::DeviceStatus;

const FULL_BRIGHTNESS_STEPS: [u16; 9] = [0, 125, 250, 375, 500, 625, 750, 875, 1000];

pub trait DeviceConverter: Send + Sync {
    /// Whether this converter handles the model code (first 5 serial characters).
    fn supports_type(&self, device_type: &str) -> bool;

    /// Message content requesting the current device status.
    fn current_status_message(&self) -> Vec<u8>;

    /// Decode an ASCII hex status payload.
    ///
    /// Returns `Ok(None)` for messages that are not a status reply for this
    /// model family.
    fn convert_hex_to_status(&self, hex_message: &[u8]) -> Result<Option<DeviceStatus>>;

    /// Message content that sets the device to `status`.
    fn update_status_message(&self, status: &DeviceStatus) -> Vec<u8>;

    fn light_brightness_levels(&self, device_type: &str) -> &'static [u16];
}

/// LPH11 (Mini), LPH21 (Air), LPH31 (SE).
pub struct Lphx1Converter;

/// IGS01 (Pro), LPH27, LPH37 (SE), LPH39 (Mini).
pub struct IgsOrAltConverter;

/// LPH60, LPH61, LPH62 (Max).
pub struct Lph6xConverter;

/// LPH63 (Max).
pub struct Lph63Converter;

pub static CONVERTERS: [&dyn DeviceConverter; 4] = [
    &Lphx1Converter,
    &IgsOrAltConverter,
    &Lph6xConverter,
    &Lph63Converter,
];

/// Find the converter for a model code.
pub fn converter_for(device_type: &str) -> Option<&'static dyn DeviceConverter> {
    CONVERTERS
        .iter()
        .copied()
        .find(|converter| converter.supports_type(device_type))
}

impl DeviceConverter for Lphx1Converter {
    fn supports_type(&self, device_type: &str) -> bool {
        matches!(device_type, "LPH11" | "LPH21" | "LPH31")
    }

    fn current_status_message(&self) -> Vec<u8> {
        vec![97, 1]
    }

    fn convert_hex_to_status(&self, hex_message: &[u8]) -> Result<Option<DeviceStatus>> {
        let Some(data) = decode_status(hex_message, [98, 1], 20)? else {
            return Ok(None);
        };
        let mut status = base_status(&data)?;
        status.light_brightness = Some(word(&data, 17));
        status.pump_status = Some(data[19]);
        status.system_sound = data.get(20).map(|b| *b == 1);
        status.raw = data;
        Ok(Some(status))
    }

    fn update_status_message(&self, status: &DeviceStatus) -> Vec<u8> {
        let mut message = update_prefix(97, status);
        push_word(&mut message, status.light_brightness.unwrap_or(0));
        message.push(flag(status.system_sound));
        message
    }

    fn light_brightness_levels(&self, device_type: &str) -> &'static [u16] {
        match device_type {
            "LPH21" | "LPH31" => &[500, 1000],
            _ => &[],
        }
    }
}

impl DeviceConverter for IgsOrAltConverter {
    fn supports_type(&self, device_type: &str) -> bool {
        matches!(device_type, "IGS01" | "LPH27" | "LPH37" | "LPH39")
    }

    fn current_status_message(&self) -> Vec<u8> {
        vec![11, 1]
    }

    fn convert_hex_to_status(&self, hex_message: &[u8]) -> Result<Option<DeviceStatus>> {
        let Some(data) = decode_status(hex_message, [12, 1], 17)? else {
            return Ok(None);
        };
        let mut status = base_status(&data)?;
        status.system_sound = data.get(17).map(|b| *b == 1);
        status.raw = data;
        Ok(Some(status))
    }

    fn update_status_message(&self, status: &DeviceStatus) -> Vec<u8> {
        let mut message = update_prefix(11, status);
        message.push(flag(status.system_sound));
        message
    }

    fn light_brightness_levels(&self, _device_type: &str) -> &'static [u16] {
        &[]
    }
}

impl DeviceConverter for Lph6xConverter {
    fn supports_type(&self, device_type: &str) -> bool {
        matches!(device_type, "LPH60" | "LPH61" | "LPH62")
    }

    fn current_status_message(&self) -> Vec<u8> {
        vec![13, 1]
    }

    fn convert_hex_to_status(&self, hex_message: &[u8]) -> Result<Option<DeviceStatus>> {
        let Some(data) = decode_status(hex_message, [14, 1], 27)? else {
            return Ok(None);
        };
        let mut status = base_status(&data)?;
        status.water_mode = Some(data[17]);
        status.light_brightness = Some(word(&data, 18));
        status.water_level = Some(word(&data, 20));
        status.temperature_value = Some(word(&data, 22));
        status.temperature_unit = Some(data[24]);
        status.system_sound = Some(data[25] == 1);
        status.pump_nutrient = Some(data[26] == 1);
        status.raw = data;
        Ok(Some(status))
    }

    fn update_status_message(&self, status: &DeviceStatus) -> Vec<u8> {
        let mut message = update_prefix(13, status);
        message.push(status.water_mode.unwrap_or(0));
        push_word(&mut message, status.light_brightness.unwrap_or(0));
        message.push(status.temperature_unit.unwrap_or(0));
        message.push(flag(status.system_sound));
        message.push(flag(status.pump_nutrient));
        message
    }

    fn light_brightness_levels(&self, _device_type: &str) -> &'static [u16] {
        &FULL_BRIGHTNESS_STEPS
    }
}

impl DeviceConverter for Lph63Converter {
    fn supports_type(&self, device_type: &str) -> bool {
        device_type == "LPH63"
    }

    fn current_status_message(&self) -> Vec<u8> {
        vec![101, 1]
    }

    fn convert_hex_to_status(&self, hex_message: &[u8]) -> Result<Option<DeviceStatus>> {
        let Some(data) = decode_status(hex_message, [102, 1], 27)? else {
            return Ok(None);
        };
        let mut status = base_status(&data)?;
        status.water_mode = Some(data[17]);
        status.light_brightness = Some(word(&data, 18));
        status.water_level = Some(word(&data, 20));
        status.temperature_value = Some(word(&data, 22));
        status.temperature_unit = Some(data[24]);
        status.pump_status = Some(data[26]);
        status.raw = data;
        Ok(Some(status))
    }

    fn update_status_message(&self, status: &DeviceStatus) -> Vec<u8> {
        let mut message = update_prefix(101, status);
        message.push(status.water_mode.unwrap_or(0));
        push_word(&mut message, status.light_brightness.unwrap_or(0));
        message
    }

    fn light_brightness_levels(&self, _device_type: &str) -> &'static [u16] {
        &FULL_BRIGHTNESS_STEPS
    }
}

/// Parse an ASCII hex payload ("4d0001...") into bytes.
pub fn hex_to_bytes(hex_message: &[u8]) -> Result<Vec<u8>> {
    let invalid = || LetPotError::InvalidMessage("Unable to convert from hex".into());
    if hex_message.len() % 2 != 0 || !hex_message.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    hex_message
        .chunks(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair).map_err(|_| invalid())?;
            u8::from_str_radix(digits, 16).map_err(|_| invalid())
        })
        .collect()
}

/// Decode and check the message code at bytes 4 and 5. Messages for another
/// code are ignored; matching messages must hold at least `min_len` bytes.
fn decode_status(hex_message: &[u8], header: [u8; 2], min_len: usize) -> Result<Option<Vec<u8>>> {
    let data = hex_to_bytes(hex_message)?;
    debug!("Status message: {:?}", data);

    if data.len() < 6 {
        return Err(LetPotError::InvalidMessage(format!(
            "message has {} bytes, too short for a header",
            data.len()
        )));
    }
    if data[4..6] != header {
        warn!("Invalid hex message, ignoring");
        return Ok(None);
    }
    if data.len() < min_len {
        return Err(LetPotError::InvalidMessage(format!(
            "status message has {} bytes, expected at least {}",
            data.len(),
            min_len
        )));
    }
    Ok(Some(data))
}

/// Fields shared by every model family (bytes 6 to 16).
fn base_status(data: &[u8]) -> Result<DeviceStatus> {
    Ok(DeviceStatus {
        raw: Vec::new(),
        light_brightness: None,
        light_mode: data[10],
        light_schedule_end: schedule_time(data[15], data[16])?,
        light_schedule_start: schedule_time(data[13], data[14])?,
        online: data[6] == 0,
        plant_days: word(data, 11),
        pump_mode: data[9],
        pump_nutrient: None,
        pump_status: None,
        system_on: data[8] == 1,
        system_sound: None,
        system_state: data[7],
        temperature_unit: None,
        temperature_value: None,
        water_level: None,
        water_mode: None,
    })
}

fn update_prefix(code: u8, status: &DeviceStatus) -> Vec<u8> {
    let mut message = vec![code, 2, u8::from(status.system_on), status.pump_mode, status.light_mode];
    push_word(&mut message, status.plant_days);
    message.extend([
        status.light_schedule_start.hour() as u8,
        status.light_schedule_start.minute() as u8,
        status.light_schedule_end.hour() as u8,
        status.light_schedule_end.minute() as u8,
    ]);
    message
}

fn schedule_time(hour: u8, minute: u8) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0).ok_or_else(|| {
        LetPotError::InvalidMessage(format!("invalid schedule time {hour}:{minute}"))
    })
}

fn word(data: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([data[index], data[index + 1]])
}

fn push_word(message: &mut Vec<u8>, value: u16) {
    message.extend(value.to_be_bytes());
}

fn flag(value: Option<bool>) -> u8 {
    u8::from(value == Some(true))
}
