/// Background dispatch of delivery attempts
use log::{debug, error};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::{JoinError, JoinSet};

use crate::delivery::client::Sink;
use crate::delivery::forwarder::{DeliveryOutcome, Forwarder};
use crate::models::Reading;

pub const MAX_IN_FLIGHT: usize = 32;

/// Runs each submission as its own task so a slow endpoint never stalls the
/// scan loop. At most `max_in_flight` deliveries run at once; beyond that,
/// `dispatch` waits for one to finish.
pub struct Dispatcher<S> {
    forwarder: Arc<Forwarder<S>>,
    tasks: JoinSet<DeliveryOutcome>,
    max_in_flight: usize,
}

impl<S: Sink + 'static> Dispatcher<S> {
    pub fn new(forwarder: Forwarder<S>, max_in_flight: usize) -> Self {
        Self {
            forwarder: Arc::new(forwarder),
            tasks: JoinSet::new(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Hand a reading over for delivery, stamping it with the hand-off time
    pub async fn dispatch(&mut self, reading: Reading) {
        let observed_at = OffsetDateTime::now_utc();
        self.reap();

        while self.tasks.len() >= self.max_in_flight {
            debug!("{} deliveries in flight, waiting", self.tasks.len());
            match self.tasks.join_next().await {
                Some(result) => log_join(result),
                None => break,
            }
        }

        let forwarder = Arc::clone(&self.forwarder);
        self.tasks
            .spawn(async move { forwarder.submit(reading, observed_at).await });
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every dispatched delivery to finish
    pub async fn drain(&mut self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(outcome) => {
                    debug!("Delivery finished: {:?}", outcome);
                    outcomes.push(outcome);
                }
                Err(e) => error!("Delivery task failed: {}", e),
            }
        }
        outcomes
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_join(result);
        }
    }
}

fn log_join(result: Result<DeliveryOutcome, JoinError>) {
    match result {
        Ok(outcome) => debug!("Delivery finished: {:?}", outcome),
        Err(e) => error!("Delivery task failed: {}", e),
    }
}
