// Fake collaborators for exercising the booking coordinator

use crate::client::{BookingClient, BookingResponse};
use crate::error::ApiError;
use crate::model::{Slot, SubscriptionStatus};
use crate::sinks::{
    AppointmentRecord, BookedDetails, FailedDetails, FoundDetails, NotificationSink,
    PersistenceSink,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

pub fn slot_at(time: &str) -> Slot {
    Slot::new(
        "passport",
        "downtown",
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
    )
}

#[derive(Debug, Clone)]
pub enum Reply {
    Book(String),
    Reject,
    Network,
    Panic,
}

#[derive(Debug, Clone)]
struct Script {
    delay: Duration,
    // Replies consumed in order; the last one repeats
    replies: Vec<Reply>,
}

/// Booking client whose answers are scripted per slot time ("HH:MM").
pub struct MockBookingClient {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl MockBookingClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn script(self, time: &str, delay: Duration, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .insert(time.to_string(), Script { delay, replies });
        self
    }

    pub fn calls_for(&self, time: &str) -> usize {
        self.calls.lock().get(time).copied().unwrap_or(0)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn next_reply(&self, time: &str) -> (Duration, Reply) {
        let call_index = {
            let mut calls = self.calls.lock();
            let count = calls.entry(time.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let scripts = self.scripts.lock();
        match scripts.get(time) {
            Some(script) => {
                let reply = script
                    .replies
                    .get(call_index)
                    .or_else(|| script.replies.last())
                    .cloned()
                    .unwrap_or(Reply::Reject);
                (script.delay, reply)
            }
            None => (Duration::ZERO, Reply::Reject),
        }
    }
}

#[async_trait]
impl BookingClient for MockBookingClient {
    async fn book(&self, slot: &Slot) -> Result<BookingResponse, ApiError> {
        let time = slot.time.format("%H:%M").to_string();
        self.started.fetch_add(1, Ordering::SeqCst);
        let (delay, reply) = self.next_reply(&time);

        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match reply {
            Reply::Book(booking_id) => Ok(BookingResponse {
                success: true,
                booking_id: Some(booking_id),
                message: "confirmed".into(),
            }),
            Reply::Reject => Ok(BookingResponse {
                success: false,
                booking_id: None,
                message: "slot already taken".into(),
            }),
            Reply::Network => Err(ApiError::NetworkError("connection reset".into())),
            Reply::Panic => panic!("booking client blew up for {time}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Found(FoundDetails),
    Booked(BookedDetails),
    Failed(FailedDetails),
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Sent)>>,
    found_delay: Duration,
}

impl RecordingNotifier {
    pub fn slow_found(delay: Duration) -> Self {
        Self {
            found_delay: delay,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().iter().map(|(_, sent)| sent.clone()).collect()
    }

    pub fn failed_reasons(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Failed(details) => Some(details.reason),
                _ => None,
            })
            .collect()
    }

    pub fn count_booked(&self) -> usize {
        self.sent()
            .iter()
            .filter(|sent| matches!(sent, Sent::Booked(_)))
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send_found(&self, user_id: &str, details: &FoundDetails) -> anyhow::Result<()> {
        if !self.found_delay.is_zero() {
            sleep(self.found_delay).await;
        }
        self.sent
            .lock()
            .push((user_id.to_string(), Sent::Found(details.clone())));
        Ok(())
    }

    async fn send_booked(&self, user_id: &str, details: &BookedDetails) -> anyhow::Result<()> {
        self.sent
            .lock()
            .push((user_id.to_string(), Sent::Booked(details.clone())));
        Ok(())
    }

    async fn send_failed(&self, user_id: &str, details: &FailedDetails) -> anyhow::Result<()> {
        self.sent
            .lock()
            .push((user_id.to_string(), Sent::Failed(details.clone())));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPersistence {
    appointments: Mutex<Vec<AppointmentRecord>>,
    statuses: Mutex<Vec<(String, SubscriptionStatus)>>,
    fail_appointments: AtomicBool,
}

impl RecordingPersistence {
    pub fn failing() -> Self {
        let persistence = Self::default();
        persistence.fail_appointments.store(true, Ordering::SeqCst);
        persistence
    }

    pub fn appointments(&self) -> Vec<AppointmentRecord> {
        self.appointments.lock().clone()
    }

    pub fn statuses(&self) -> Vec<(String, SubscriptionStatus)> {
        self.statuses.lock().clone()
    }
}

#[async_trait]
impl PersistenceSink for RecordingPersistence {
    async fn create_appointment(&self, record: &AppointmentRecord) -> anyhow::Result<()> {
        if self.fail_appointments.load(Ordering::SeqCst) {
            anyhow::bail!("database unavailable");
        }
        self.appointments.lock().push(record.clone());
        Ok(())
    }

    async fn update_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> anyhow::Result<()> {
        self.statuses
            .lock()
            .push((subscription_id.to_string(), status));
        Ok(())
    }
}
