// HTTP implementation of the availability and booking clients

use crate::client::{AvailabilityClient, BookingClient, BookingResponse, CaptchaProvider, NoCaptcha};
use crate::error::{ApiError, RateLimitExceeded};
use crate::model::Slot;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct BookPayload<'a> {
    service_id: &'a str,
    location_id: &'a str,
    date: String,
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    captcha_token: Option<String>,
}

pub struct HttpSchedulingClient {
    http: Client,
    config: HttpClientConfig,
    captcha: Arc<dyn CaptchaProvider>,
}

impl HttpSchedulingClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ApiError::Other(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            config,
            captcha: Arc::new(NoCaptcha),
        })
    }

    pub fn with_captcha(mut self, captcha: Arc<dyn CaptchaProvider>) -> Self {
        self.captcha = captcha;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            ApiError::from(err)
        }
    }

    // Non-2xx statuses mapped onto the error taxonomy; 2xx passes through
    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }
}

pub fn classify_status(status: StatusCode, message: String) -> ApiError {
    match status {
        StatusCode::CONFLICT | StatusCode::GONE => ApiError::Rejected { message },
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimitExceeded(RateLimitExceeded {
            resource: "remote".to_string(),
            wait: Duration::ZERO,
        }),
        other => ApiError::ApiResponseError {
            status_code: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl AvailabilityClient for HttpSchedulingClient {
    async fn check_availability(
        &self,
        service_id: &str,
        location_id: Option<&str>,
        dates: &[NaiveDate],
    ) -> Result<Vec<Slot>, ApiError> {
        let mut query: Vec<(&str, String)> = vec![("service_id", service_id.to_string())];
        if let Some(location_id) = location_id {
            query.push(("location_id", location_id.to_string()));
        }
        for date in dates {
            query.push(("date", date.format("%Y-%m-%d").to_string()));
        }

        let response = self
            .http
            .get(self.url("availability"))
            .bearer_auth(&self.config.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let slots: Vec<Slot> = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|err| self.transport_error(err))?;

        debug!(service_id, count = slots.len(), "availability fetched");
        Ok(slots)
    }
}

#[async_trait]
impl BookingClient for HttpSchedulingClient {
    async fn book(&self, slot: &Slot) -> Result<BookingResponse, ApiError> {
        let captcha_token = self.captcha.token(slot).await?;

        let payload = BookPayload {
            service_id: &slot.service_id,
            location_id: &slot.location_id,
            date: slot.date.format("%Y-%m-%d").to_string(),
            time: slot.time.format("%H:%M").to_string(),
            captcha_token,
        };

        let response = self
            .http
            .post(self.url("appointments"))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        Self::check_status(response)
            .await?
            .json::<BookingResponse>()
            .await
            .map_err(|err| self.transport_error(err))
    }
}
