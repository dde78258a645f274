mod rest;

pub use rest::{EventRecord, HttpEventPublisher};

use crate::error::NetworkError;
use crate::frame::DoorbellEvent;
use async_trait::async_trait;
use tracing::info;

/// Destination for completed doorbell events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &DoorbellEvent) -> Result<(), NetworkError>;
}

/// Logs a summary of each event instead of sending it anywhere
#[derive(Debug, Default, Clone)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, event: &DoorbellEvent) -> Result<(), NetworkError> {
        info!(
            "Doorbell event {}: {} byte photo, labels [{}]",
            event.id(),
            event.image().len(),
            event.annotations().summary(5)
        );
        Ok(())
    }
}
