// Booking race library: rate-limited, retried, first-wins booking of released appointment slots

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http_client;
pub mod in_flight;
pub mod logger;
pub mod model;
pub mod rate_limiter;
pub mod retry;
pub mod sinks;

#[cfg(test)]
mod mock;

// Re-export key types for convenience
pub use client::{AvailabilityClient, BookingClient, BookingResponse, CaptchaProvider, NoCaptcha};
pub use config::RacerConfig;
pub use coordinator::{BookingCoordinator, BookingRequest, Collaborators, RaceOptions, RaceOutcome};
pub use error::{ApiError, ConfigError, CoordinatorError, ErrorKind, RateLimitExceeded, RetryError};
pub use http_client::{HttpClientConfig, HttpSchedulingClient};
pub use in_flight::InFlightSlots;
pub use model::{BookingResult, Confirmation, Slot, SlotKey, SlotPreferences, SubscriptionStatus};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{RetryExecutor, RetryPolicy};
pub use sinks::{CounterMetrics, LogNotifier, MetricsSink, NotificationSink, PersistenceSink};
