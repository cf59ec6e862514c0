//! Step-by-step logging for a forward invocation.
//!
//! The forwarder reports progress through [`ForwardObserver`] so the sink can be
//! swapped out. Observers must not fail or panic.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ForwardEvent<'a> {
    BodyParsed,
    ImagesReceived { count: usize },
    ApiKeyResolved,
    RequestSent { endpoint: &'a str },
    ResponseReceived { status: u16, elapsed: Duration },
    Failed { status: u16, message: &'a str },
    Completed { status: u16 },
}

pub trait ForwardObserver: Send + Sync {
    fn record(&self, event: &ForwardEvent<'_>);
}

/// Writes every event as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ForwardObserver for TracingObserver {
    fn record(&self, event: &ForwardEvent<'_>) {
        match event {
            ForwardEvent::BodyParsed => tracing::info!("Request body parsed"),
            ForwardEvent::ImagesReceived { count } => {
                tracing::info!(image_count = count, "Images received")
            }
            ForwardEvent::ApiKeyResolved => tracing::info!("API key retrieved"),
            ForwardEvent::RequestSent { endpoint } => {
                tracing::info!(endpoint = %endpoint, "Sending request to Plant.id")
            }
            ForwardEvent::ResponseReceived { status, elapsed } => tracing::info!(
                status = status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Plant.id response received"
            ),
            ForwardEvent::Failed { status, message } if *status >= 500 => {
                tracing::error!(status = status, message = %message, "Forward failed")
            }
            ForwardEvent::Failed { status, message } => {
                tracing::warn!(status = status, message = %message, "Forward rejected")
            }
            ForwardEvent::Completed { status } => {
                tracing::info!(status = status, "Forward completed")
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ForwardObserver for NoopObserver {
    fn record(&self, _event: &ForwardEvent<'_>) {}
}
