/// Per-device record of the last successful delivery
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

pub const SUPPRESSION_WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Devices {
    last_sent: HashMap<String, Instant>,
    in_flight: HashSet<String>,
}

/// Result of asking whether a device may deliver now
pub enum Admission {
    Granted(DeviceSlot),
    /// Delivered within the suppression window
    Suppressed,
    /// Another delivery for the device has not finished yet
    InFlight,
}

/// Permission for one delivery attempt of one device
///
/// While the slot is alive every other submission for the device is turned
/// away. Dropping it without `mark_sent` leaves the last-sent record as it was.
pub struct DeviceSlot {
    device_id: String,
    devices: Arc<Mutex<Devices>>,
}

impl DeviceSlot {
    pub fn mark_sent(self, at: Instant) {
        lock(&self.devices)
            .last_sent
            .insert(self.device_id.clone(), at);
    }
}

impl Drop for DeviceSlot {
    fn drop(&mut self) {
        lock(&self.devices).in_flight.remove(&self.device_id);
    }
}

pub struct RateLimitState {
    window: Duration,
    devices: Arc<Mutex<Devices>>,
}

impl RateLimitState {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            devices: Arc::new(Mutex::new(Devices::default())),
        }
    }

    /// Check and claim a device in one step, never waiting on other deliveries
    pub fn admit(&self, device_id: &str, now: Instant) -> Admission {
        let mut devices = lock(&self.devices);

        if devices.in_flight.contains(device_id) {
            return Admission::InFlight;
        }
        if let Some(last) = devices.last_sent.get(device_id) {
            if now.saturating_duration_since(*last) < self.window {
                return Admission::Suppressed;
            }
        }

        devices.in_flight.insert(device_id.to_string());
        Admission::Granted(DeviceSlot {
            device_id: device_id.to_string(),
            devices: Arc::clone(&self.devices),
        })
    }

    #[cfg(test)]
    pub fn last_sent(&self, device_id: &str) -> Option<Instant> {
        lock(&self.devices).last_sent.get(device_id).copied()
    }

    #[cfg(test)]
    pub fn tracked_devices(&self) -> usize {
        let devices = lock(&self.devices);
        devices.last_sent.len() + devices.in_flight.len()
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new(SUPPRESSION_WINDOW)
    }
}

// The critical sections never panic, so a poisoned map is still consistent
fn lock(devices: &Mutex<Devices>) -> MutexGuard<'_, Devices> {
    devices.lock().unwrap_or_else(PoisonError::into_inner)
}
