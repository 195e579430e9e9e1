use serde::Serialize;
use time::OffsetDateTime;

use crate::utils::serialize_rfc3339;

/// A decoded SwitchBot meter reading, before it is stamped for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,
    pub temperature_celsius: f32,
    pub humidity_percent: u8,
    pub battery_percent: u8,
    /// High bit of the temperature byte. Decoded but not interpreted.
    pub temperature_flag: bool,
}

/// JSON body posted to the data endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SensorPayload {
    pub mac: String,
    pub temp: f32,
    pub humidity: u8,
    pub battery: u8,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub date: OffsetDateTime,
}

impl SensorPayload {
    pub fn new(reading: &Reading, observed_at: OffsetDateTime) -> Self {
        SensorPayload {
            mac: reading.device_id.clone(),
            temp: reading.temperature_celsius,
            humidity: reading.humidity_percent,
            battery: reading.battery_percent,
            date: observed_at,
        }
    }
}
