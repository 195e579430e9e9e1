/// Rate-limited forwarding of decoded readings
use log::{debug, error, info};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::delivery::client::{DeliveryError, Sink};
use crate::delivery::rate_limit::{Admission, RateLimitState};
use crate::models::{Reading, SensorPayload};
use crate::utils::error_chain;

#[derive(Debug)]
pub enum DeliveryOutcome {
    Suppressed,
    Delivered,
    DeliveryFailed(DeliveryError),
}

pub struct Forwarder<S> {
    sink: S,
    state: RateLimitState,
}

impl<S: Sink> Forwarder<S> {
    pub fn new(sink: S, state: RateLimitState) -> Self {
        Self { sink, state }
    }

    #[cfg(test)]
    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    /// Forward a reading unless its device delivered within the window
    ///
    /// A submission for a device whose previous delivery is still running is
    /// suppressed at once instead of queueing behind it. A failed delivery
    /// leaves the state untouched; the device's next broadcast is the retry.
    ///
    /// # Arguments
    /// * `reading` - Decoded reading
    /// * `observed_at` - Hand-off time, sent as the payload `date`
    pub async fn submit(&self, reading: Reading, observed_at: OffsetDateTime) -> DeliveryOutcome {
        let slot = match self.state.admit(&reading.device_id, Instant::now()) {
            Admission::Granted(slot) => slot,
            Admission::Suppressed => {
                debug!("Suppressing {}, delivered recently", reading.device_id);
                return DeliveryOutcome::Suppressed;
            }
            Admission::InFlight => {
                debug!("Suppressing {}, delivery in progress", reading.device_id);
                return DeliveryOutcome::Suppressed;
            }
        };

        let payload = SensorPayload::new(&reading, observed_at);

        match self.sink.send(&payload).await {
            Ok(()) => {
                slot.mark_sent(Instant::now());
                info!(
                    "Delivered reading for {}: temp={:.1}°C, humidity={}%, battery={}%",
                    payload.mac, payload.temp, payload.humidity, payload.battery
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                error!("Delivery for {} failed: {}", payload.mac, error_chain(&e));
                DeliveryOutcome::DeliveryFailed(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use time::macros::datetime;
    use tokio::time::Duration;

    /// Records every payload and answers with a configurable result
    #[derive(Default)]
    pub(crate) struct FakeSink {
        pub sent: Mutex<Vec<SensorPayload>>,
        pub failing: AtomicBool,
        pub latency: Duration,
        /// One device whose deliveries hang this long, then time out
        pub stalled: Option<(String, Duration)>,
    }

    impl FakeSink {
        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn sent_macs(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|p| p.mac.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Sink for FakeSink {
        async fn send(&self, payload: &SensorPayload) -> Result<(), DeliveryError> {
            if let Some((mac, stall)) = &self.stalled {
                if *mac == payload.mac {
                    tokio::time::sleep(*stall).await;
                    return Err(DeliveryError::Status(StatusCode::GATEWAY_TIMEOUT));
                }
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.sent.lock().unwrap().push(payload.clone());
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeliveryError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
            Ok(())
        }
    }

    pub(crate) fn reading(device_id: &str) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            temperature_celsius: 23.5,
            humidity_percent: 45,
            battery_percent: 80,
            temperature_flag: false,
        }
    }

    fn forwarder(sink: &Arc<FakeSink>) -> Forwarder<Arc<FakeSink>> {
        Forwarder::new(Arc::clone(sink), RateLimitState::default())
    }

    async fn submit_now(forwarder: &Forwarder<Arc<FakeSink>>, device_id: &str) -> DeliveryOutcome {
        forwarder
            .submit(reading(device_id), OffsetDateTime::now_utc())
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn suppresses_within_window() {
        let sink = Arc::new(FakeSink::default());
        let forwarder = forwarder(&sink);

        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Delivered
        ));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Suppressed
        ));
        assert_eq!(sink.sent_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Delivered
        ));
        assert_eq!(sink.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_device_eligible() {
        let sink = Arc::new(FakeSink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let forwarder = forwarder(&sink);

        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::DeliveryFailed(DeliveryError::Status(_))
        ));
        assert_eq!(forwarder.state().last_sent("a"), None);
        assert_eq!(forwarder.state().tracked_devices(), 0);

        sink.failing.store(false, Ordering::SeqCst);
        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Delivered
        ));
        assert_eq!(sink.sent_count(), 2);
        assert!(forwarder.state().last_sent("a").is_some());
        assert_eq!(forwarder.state().tracked_devices(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn devices_do_not_share_window() {
        let sink = Arc::new(FakeSink::default());
        let forwarder = forwarder(&sink);

        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Delivered
        ));
        assert!(matches!(
            submit_now(&forwarder, "b").await,
            DeliveryOutcome::Delivered
        ));
        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Suppressed
        ));

        assert_eq!(sink.sent_macs(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_carries_hand_off_time() {
        let sink = Arc::new(FakeSink {
            latency: Duration::from_secs(2),
            ..Default::default()
        });
        let forwarder = forwarder(&sink);
        let observed_at = datetime!(2024-03-01 12:30:00 UTC);

        forwarder.submit(reading("a"), observed_at).await;

        assert_eq!(sink.sent.lock().unwrap()[0].date, observed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submissions_deliver_once() {
        let sink = Arc::new(FakeSink {
            latency: Duration::from_millis(200),
            ..Default::default()
        });
        let forwarder = Arc::new(forwarder(&sink));

        let first = tokio::spawn({
            let forwarder = Arc::clone(&forwarder);
            async move { submit_now(&forwarder, "a").await }
        });
        let second = tokio::spawn({
            let forwarder = Arc::clone(&forwarder);
            async move { submit_now(&forwarder, "a").await }
        });

        let outcomes = [first.await.unwrap(), second.await.unwrap()];

        let delivered = outcomes
            .iter()
            .filter(|o| matches!(o, DeliveryOutcome::Delivered))
            .count();
        let suppressed = outcomes
            .iter()
            .filter(|o| matches!(o, DeliveryOutcome::Suppressed))
            .count();
        assert_eq!(delivered, 1);
        assert_eq!(suppressed, 1);
        assert_eq!(sink.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_device_is_not_queued() {
        let sink = Arc::new(FakeSink {
            stalled: Some(("a".to_string(), Duration::from_secs(10))),
            ..Default::default()
        });
        let forwarder = Arc::new(forwarder(&sink));

        let stuck = tokio::spawn({
            let forwarder = Arc::clone(&forwarder);
            async move { submit_now(&forwarder, "a").await }
        });
        while forwarder.state().tracked_devices() == 0 {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::Suppressed
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(matches!(
            stuck.await.unwrap(),
            DeliveryOutcome::DeliveryFailed(_)
        ));
        // The stalled attempt failed, so the device may try again
        assert!(matches!(
            submit_now(&forwarder, "a").await,
            DeliveryOutcome::DeliveryFailed(_)
        ));
    }
}
