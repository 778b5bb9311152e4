use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{field, Span};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Returns false if one was already set.
pub fn init_tracing(json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        // Includes timing when the span closes
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .try_init()
            .is_ok()
    }
}

pub fn new_round_id() -> String {
    format!("round-{:08x}", rand::random::<u32>())
}

pub fn round_span(round_id: &str, subscription_id: &str, user_id: &str) -> Span {
    tracing::info_span!(
        "race_round",
        round_id = %round_id,
        subscription_id = %subscription_id,
        user_id = %user_id,
        outcome = field::Empty
    )
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("outcome", &field::display(outcome));
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
