// Value types passed between the availability check, the booking race and its collaborators

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bookable time slot offered by the external scheduling service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub service_id: String,
    pub location_id: String,
}

impl Slot {
    pub fn new(
        service_id: impl Into<String>,
        location_id: impl Into<String>,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Self {
        Self {
            date,
            time,
            service_id: service_id.into(),
            location_id: location_id.into(),
        }
    }

    /// Dedup identity of this slot when booked on behalf of `target`.
    pub fn key(&self, target: &str) -> SlotKey {
        SlotKey(format!(
            "{}|{}|{}|{}|{}",
            self.service_id,
            self.location_id,
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M:%S"),
            target
        ))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}@{})",
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M"),
            self.service_id,
            self.location_id
        )
    }
}

// service|location|date|time|target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(String);

impl SlotKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub booking_id: String,
    pub slot: Slot,
}

/// Normalized outcome of one slot's booking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingResult {
    Success(Confirmation),
    Failure { slot: Slot, reason: String },
}

impl BookingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BookingResult::Success(_))
    }

    pub fn slot(&self) -> &Slot {
        match self {
            BookingResult::Success(confirmation) => &confirmation.slot,
            BookingResult::Failure { slot, .. } => slot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Completed,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

// Subscription preferences used by callers to narrow an availability response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotPreferences {
    #[serde(default)]
    pub dates: Vec<NaiveDate>,
    pub earliest: Option<NaiveTime>,
    pub latest: Option<NaiveTime>,
    #[serde(default)]
    pub location_ids: Vec<String>,
}

impl SlotPreferences {
    pub fn matches(&self, slot: &Slot) -> bool {
        let date_ok = self.dates.is_empty() || self.dates.contains(&slot.date);
        let after_ok = self.earliest.map_or(true, |t| slot.time >= t);
        let before_ok = self.latest.map_or(true, |t| slot.time <= t);
        let location_ok =
            self.location_ids.is_empty() || self.location_ids.iter().any(|l| *l == slot.location_id);

        date_ok && after_ok && before_ok && location_ok
    }

    pub fn filter(&self, slots: Vec<Slot>) -> Vec<Slot> {
        slots.into_iter().filter(|slot| self.matches(slot)).collect()
    }
}
