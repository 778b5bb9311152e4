// Booking race coordinator: books the first of several candidate slots and cancels the rest

use crate::client::BookingClient;
use crate::error::{ApiError, CoordinatorError, RetryError};
use crate::in_flight::InFlightSlots;
use crate::logger::{new_round_id, record_outcome, round_span, warn_if_slow};
use crate::model::{BookingResult, Confirmation, Slot, SlotKey, SubscriptionStatus};
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::sinks::{
    metric, AppointmentRecord, BookedDetails, FailedDetails, FoundDetails, MetricsSink,
    NotificationSink, PersistenceSink,
};
use futures::FutureExt;
use rand::seq::SliceRandom;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

pub const DEFAULT_BOOKING_ENDPOINT: &str = "booking";

const SLOW_WRITE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RaceOptions {
    pub concurrency_cap: usize,
    pub overall_timeout: Duration,
}

impl Default for RaceOptions {
    fn default() -> Self {
        Self {
            concurrency_cap: 3,
            overall_timeout: Duration::from_secs(30),
        }
    }
}

/// Who and what a race round books for.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub service_id: String,
    pub location_id: String,
    pub user_id: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaceOutcome {
    Booked(Confirmation),
    AllFailed { failures: Vec<BookingResult> },
    TimedOut,
    // Nothing was attempted: no candidates, or all of them already in flight elsewhere
    Skipped,
}

impl RaceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RaceOutcome::Booked(_))
    }

    pub fn confirmation(&self) -> Option<&Confirmation> {
        match self {
            RaceOutcome::Booked(confirmation) => Some(confirmation),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RaceOutcome::Booked(_) => "booked",
            RaceOutcome::AllFailed { .. } => "all_failed",
            RaceOutcome::TimedOut => "timed_out",
            RaceOutcome::Skipped => "skipped",
        }
    }
}

pub struct Collaborators {
    pub booking_client: Arc<dyn BookingClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

// Everything a single slot attempt needs, shared by the round's tasks
#[derive(Clone)]
struct SlotAttempter {
    client: Arc<dyn BookingClient>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    metrics: Arc<dyn MetricsSink>,
    endpoint: String,
}

impl SlotAttempter {
    async fn book_once(&self, slot: &Slot, cancel: &CancellationToken) -> Result<Confirmation, ApiError> {
        self.rate_limiter.acquire(&self.endpoint, 1).await?;
        if cancel.is_cancelled() {
            self.rate_limiter.release(&self.endpoint, 1);
            return Err(ApiError::Cancelled);
        }

        self.metrics.increment(metric::BOOKING_ATTEMPT);
        let response = self.client.book(slot).await?;
        response.into_confirmation(slot)
    }

    async fn attempt(self: Arc<Self>, slot: Slot, cancel: CancellationToken) -> BookingResult {
        let pipeline = self.retry.execute(&cancel, || self.book_once(&slot, &cancel));

        let outcome = match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(slot = %slot, "booking attempt panicked");
                self.metrics.increment(metric::BOOKING_ATTEMPT_FAILED);
                return BookingResult::Failure {
                    slot,
                    reason: "unexpected error during booking attempt".to_string(),
                };
            }
        };

        match outcome {
            Ok(confirmation) => BookingResult::Success(confirmation),
            Err(RetryError::Cancelled) => BookingResult::Failure {
                slot,
                reason: "cancelled".to_string(),
            },
            Err(err) => {
                debug!(slot = %slot, error = %err, "slot attempt failed");
                self.metrics.increment(metric::BOOKING_ATTEMPT_FAILED);
                BookingResult::Failure {
                    slot,
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Races booking attempts over a bounded set of candidate slots.
///
/// Every attempt is gated by the shared [`RateLimiter`] and wrapped in a
/// [`RetryExecutor`]. The first confirmed booking cancels its siblings; the
/// round then persists the appointment, completes the subscription and
/// notifies the user. Slots claimed by a round are tracked in a shared
/// [`InFlightSlots`] set so overlapping rounds never book the same slot twice.
pub struct BookingCoordinator {
    attempter: Arc<SlotAttempter>,
    notifier: Arc<dyn NotificationSink>,
    persistence: Arc<dyn PersistenceSink>,
    metrics: Arc<dyn MetricsSink>,
    in_flight: Arc<InFlightSlots>,
}

impl BookingCoordinator {
    pub fn new(
        collaborators: Collaborators,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let Collaborators {
            booking_client,
            notifier,
            persistence,
            metrics,
        } = collaborators;

        Self {
            attempter: Arc::new(SlotAttempter {
                client: booking_client,
                rate_limiter,
                retry: RetryExecutor::new(retry_policy),
                metrics: Arc::clone(&metrics),
                endpoint: DEFAULT_BOOKING_ENDPOINT.to_string(),
            }),
            notifier,
            persistence,
            metrics,
            in_flight: Arc::new(InFlightSlots::new()),
        }
    }

    /// Share the in-flight set with other coordinators in the process.
    pub fn with_in_flight(mut self, in_flight: Arc<InFlightSlots>) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// Rate limiter resource key used for booking calls.
    pub fn with_booking_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.attempter).endpoint = endpoint.into();
        self
    }

    pub fn in_flight(&self) -> &Arc<InFlightSlots> {
        &self.in_flight
    }

    pub async fn attempt_booking(
        &self,
        request: &BookingRequest,
        slots: Vec<Slot>,
        options: &RaceOptions,
    ) -> Result<RaceOutcome, CoordinatorError> {
        if options.concurrency_cap == 0 {
            return Err(CoordinatorError::InvalidConcurrencyCap);
        }
        if options.overall_timeout.is_zero() {
            return Err(CoordinatorError::InvalidTimeout);
        }
        if slots.is_empty() {
            return Ok(RaceOutcome::Skipped);
        }

        let round_id = new_round_id();
        let span = round_span(&round_id, &request.subscription_id, &request.user_id);
        let outcome = self
            .run_round(request, slots, options)
            .instrument(span.clone())
            .await;
        record_outcome(&span, outcome.label());
        Ok(outcome)
    }

    async fn run_round(
        &self,
        request: &BookingRequest,
        mut slots: Vec<Slot>,
        options: &RaceOptions,
    ) -> RaceOutcome {
        let deadline = Instant::now() + options.overall_timeout;
        let candidates = slots.len();
        slots.shuffle(&mut rand::thread_rng());
        slots.truncate(options.concurrency_cap);

        let keys: Vec<SlotKey> = slots.iter().map(|slot| slot.key(&request.user_id)).collect();
        let (claimed, claim) = self.in_flight.claim(&keys);
        if claimed.is_empty() {
            debug!(candidates, "every selected slot is already being booked elsewhere");
            return RaceOutcome::Skipped;
        }
        let selected: Vec<Slot> = claimed.into_iter().map(|index| slots[index].clone()).collect();

        info!(
            candidates,
            parallel_attempts = selected.len(),
            "racing booking attempts"
        );
        self.notify_found(request, candidates, selected.len()).await;

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for slot in selected {
            let attempter = Arc::clone(&self.attempter);
            let cancel = cancel.clone();
            tasks.spawn(attempter.attempt(slot, cancel).instrument(Span::current()));
        }

        let mut failures = Vec::new();
        let outcome = loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Err(_) => break RaceOutcome::TimedOut,
                Ok(None) => {
                    break RaceOutcome::AllFailed {
                        failures: std::mem::take(&mut failures),
                    }
                }
                Ok(Some(Ok(BookingResult::Success(confirmation)))) => {
                    break RaceOutcome::Booked(confirmation)
                }
                Ok(Some(Ok(failure))) => failures.push(failure),
                Ok(Some(Err(join_err))) => warn!(error = %join_err, "booking task did not finish"),
            }
        };

        cancel.cancel();
        tasks.shutdown().await;

        match &outcome {
            RaceOutcome::Booked(confirmation) => self.finish_booked(request, confirmation).await,
            RaceOutcome::AllFailed { failures } => {
                info!(attempts = failures.len(), "all booking attempts failed");
                self.metrics.increment(metric::BOOKING_FAILED);
                self.notify_failed(request, "all attempts failed".to_string())
                    .await;
            }
            RaceOutcome::TimedOut => {
                let secs = options.overall_timeout.as_secs_f64();
                info!(timeout_secs = secs, "booking round timed out");
                self.metrics.increment(metric::BOOKING_TIMEOUT);
                self.notify_failed(request, format!("timed out after {secs}s"))
                    .await;
            }
            RaceOutcome::Skipped => {}
        }

        drop(claim);
        outcome
    }

    async fn finish_booked(&self, request: &BookingRequest, confirmation: &Confirmation) {
        info!(
            booking_id = %confirmation.booking_id,
            slot = %confirmation.slot,
            "slot booked"
        );

        let record = AppointmentRecord {
            service_id: request.service_id.clone(),
            location_id: request.location_id.clone(),
            slot: confirmation.slot.clone(),
            booking_id: confirmation.booking_id.clone(),
            user_id: request.user_id.clone(),
            subscription_id: request.subscription_id.clone(),
        };

        let persisted = warn_if_slow(
            "create_appointment",
            SLOW_WRITE,
            self.persistence.create_appointment(&record),
        )
        .await;

        match persisted {
            Ok(()) => {
                if let Err(err) = self
                    .persistence
                    .update_subscription_status(&request.subscription_id, SubscriptionStatus::Completed)
                    .await
                {
                    error!(error = %err, "failed to mark subscription completed");
                }
            }
            Err(err) => {
                error!(
                    error = %err,
                    booking_id = %confirmation.booking_id,
                    "failed to persist booked appointment"
                );
                self.metrics.increment(metric::BOOKING_PERSIST_FAILED);
            }
        }

        let details = BookedDetails {
            service_id: request.service_id.clone(),
            location_id: request.location_id.clone(),
            booking_id: confirmation.booking_id.clone(),
            slot: confirmation.slot.clone(),
        };
        if let Err(err) = self.notifier.send_booked(&request.user_id, &details).await {
            warn!(error = %err, "failed to send booked notification");
        }
        self.metrics.increment(metric::BOOKING_SUCCESS);
    }

    async fn notify_found(&self, request: &BookingRequest, candidates: usize, parallel: usize) {
        let details = FoundDetails {
            service_id: request.service_id.clone(),
            location_id: request.location_id.clone(),
            candidates,
            parallel_attempts: parallel,
        };
        if let Err(err) = self.notifier.send_found(&request.user_id, &details).await {
            warn!(error = %err, "failed to send found notification");
        }
    }

    async fn notify_failed(&self, request: &BookingRequest, reason: String) {
        let details = FailedDetails {
            service_id: request.service_id.clone(),
            location_id: request.location_id.clone(),
            reason,
        };
        if let Err(err) = self.notifier.send_failed(&request.user_id, &details).await {
            warn!(error = %err, "failed to send failed notification");
        }
    }
}
