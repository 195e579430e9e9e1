pub mod client;
pub mod dispatcher;
pub mod forwarder;
pub mod rate_limit;

pub use client::{HttpSink, Sink};
pub use dispatcher::{Dispatcher, MAX_IN_FLIGHT};
pub use forwarder::Forwarder;
pub use rate_limit::RateLimitState;
