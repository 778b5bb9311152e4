// Narrow interfaces to the external scheduling service

use crate::error::ApiError;
use crate::model::{Confirmation, Slot};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw answer to a booking call, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingResponse {
    pub success: bool,
    #[serde(default)]
    pub booking_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl BookingResponse {
    /// Collapse the response into a confirmation or a permanent rejection.
    pub fn into_confirmation(self, slot: &Slot) -> Result<Confirmation, ApiError> {
        match (self.success, self.booking_id) {
            (true, Some(booking_id)) if !booking_id.is_empty() => Ok(Confirmation {
                booking_id,
                slot: slot.clone(),
            }),
            (true, _) => Err(ApiError::Other(format!(
                "booking reported success without a booking id: {}",
                self.message
            ))),
            (false, _) => Err(ApiError::Rejected {
                message: if self.message.is_empty() {
                    "booking rejected".to_string()
                } else {
                    self.message
                },
            }),
        }
    }
}

#[async_trait]
pub trait AvailabilityClient: Send + Sync + 'static {
    async fn check_availability(
        &self,
        service_id: &str,
        location_id: Option<&str>,
        dates: &[NaiveDate],
    ) -> Result<Vec<Slot>, ApiError>;
}

#[async_trait]
pub trait BookingClient: Send + Sync + 'static {
    async fn book(&self, slot: &Slot) -> Result<BookingResponse, ApiError>;
}

/// Best-effort anti-bot token source consulted before each booking call.
#[async_trait]
pub trait CaptchaProvider: Send + Sync + 'static {
    async fn token(&self, slot: &Slot) -> Result<Option<String>, ApiError>;
}

pub struct NoCaptcha;

#[async_trait]
impl CaptchaProvider for NoCaptcha {
    async fn token(&self, _slot: &Slot) -> Result<Option<String>, ApiError> {
        Ok(None)
    }
}
