// Side-effect collaborators driven by the booking coordinator: notifications, persistence, metrics

use crate::model::{Slot, SubscriptionStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub mod metric {
    pub const BOOKING_ATTEMPT: &str = "booking_attempt";
    pub const BOOKING_ATTEMPT_FAILED: &str = "booking_attempt_failed";
    pub const BOOKING_SUCCESS: &str = "booking_success";
    pub const BOOKING_FAILED: &str = "booking_failed";
    pub const BOOKING_TIMEOUT: &str = "booking_timeout";
    pub const BOOKING_PERSIST_FAILED: &str = "booking_persist_failed";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoundDetails {
    pub service_id: String,
    pub location_id: String,
    pub candidates: usize,
    pub parallel_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookedDetails {
    pub service_id: String,
    pub location_id: String,
    pub booking_id: String,
    pub slot: Slot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDetails {
    pub service_id: String,
    pub location_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentRecord {
    pub service_id: String,
    pub location_id: String,
    pub slot: Slot,
    pub booking_id: String,
    pub user_id: String,
    pub subscription_id: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn send_found(&self, user_id: &str, details: &FoundDetails) -> anyhow::Result<()>;
    async fn send_booked(&self, user_id: &str, details: &BookedDetails) -> anyhow::Result<()>;
    async fn send_failed(&self, user_id: &str, details: &FailedDetails) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    async fn create_appointment(&self, record: &AppointmentRecord) -> anyhow::Result<()>;

    async fn update_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> anyhow::Result<()>;
}

pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, name: &str);
}

/// In-process named counters.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counters: DashMap<String, AtomicU64>,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |counter| counter.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::SeqCst)))
            .collect()
    }
}

impl MetricsSink for CounterMetrics {
    fn increment(&self, name: &str) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// Notification sink that only writes structured log events.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send_found(&self, user_id: &str, details: &FoundDetails) -> anyhow::Result<()> {
        info!(
            user_id,
            service_id = %details.service_id,
            location_id = %details.location_id,
            parallel_attempts = details.parallel_attempts,
            "appointment found, attempting to book"
        );
        Ok(())
    }

    async fn send_booked(&self, user_id: &str, details: &BookedDetails) -> anyhow::Result<()> {
        info!(
            user_id,
            booking_id = %details.booking_id,
            slot = %details.slot,
            "appointment booked"
        );
        Ok(())
    }

    async fn send_failed(&self, user_id: &str, details: &FailedDetails) -> anyhow::Result<()> {
        info!(
            user_id,
            service_id = %details.service_id,
            reason = %details.reason,
            "booking failed"
        );
        Ok(())
    }
}
