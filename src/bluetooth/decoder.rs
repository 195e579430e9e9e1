/// SwitchBot meter service data decoding
use thiserror::Error;

use crate::models::Reading;
use crate::utils::normalize_mac;

// SwitchBot meter frame constants
pub const METER_DEVICE_TYPE: u8 = 0x69; // Device-type code of the temperature/humidity meter
const MIN_FRAME_LEN: usize = 6;

const SEVEN_BIT_MASK: u8 = 0b0111_1111;
const HIGH_BIT_MASK: u8 = 0b1000_0000;
const FRACTION_MASK: u8 = 0b0000_1111;

/// Why a service data entry did not produce a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("payload too short: {0} bytes")]
    TooShort(usize),
    #[error("unknown device type 0x{0:02x}")]
    UnknownDeviceType(u8),
    #[error("battery level is zero")]
    NoBattery,
}

/// Decode SwitchBot meter service data into a reading
///
/// The meter frame is at least 6 bytes with fixed offsets:
/// - Byte 0: Device type (low 7 bits, 0x69 for the meter)
/// - Byte 1: Status flags (not used here)
/// - Byte 2: Battery percentage (low 7 bits)
/// - Byte 3: Temperature tenths (low 4 bits)
/// - Byte 4: Temperature whole degrees (low 7 bits), flag in the high bit
/// - Byte 5: Relative humidity percentage (low 7 bits)
///
/// Service data from unrelated devices shares the channel, so length and
/// type are checked before any bit is read. A zero battery marks a ghost
/// advertisement and is rejected.
///
/// # Arguments
/// * `device_address` - Hardware address of the advertising device
/// * `payload` - Raw service data bytes from the advertisement
///
/// # Returns
/// The decoded reading, or the reason the payload was not recognized
pub fn decode(device_address: &str, payload: &[u8]) -> Result<Reading, Rejection> {
    if payload.len() < MIN_FRAME_LEN {
        return Err(Rejection::TooShort(payload.len()));
    }

    let device_type = payload[0] & SEVEN_BIT_MASK;
    if device_type != METER_DEVICE_TYPE {
        return Err(Rejection::UnknownDeviceType(device_type));
    }

    let battery = payload[2] & SEVEN_BIT_MASK;
    if battery == 0 {
        return Err(Rejection::NoBattery);
    }

    let fraction = payload[3] & FRACTION_MASK;
    let whole = payload[4] & SEVEN_BIT_MASK;
    let temperature_flag = payload[4] & HIGH_BIT_MASK != 0;
    let humidity = payload[5] & SEVEN_BIT_MASK;

    Ok(Reading {
        device_id: normalize_mac(device_address),
        temperature_celsius: f32::from(whole) + f32::from(fraction) / 10.0,
        humidity_percent: humidity,
        battery_percent: battery,
        temperature_flag,
    })
}
