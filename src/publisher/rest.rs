use super::EventPublisher;
use crate::config::PublisherConfig;
use crate::error::NetworkError;
use crate::frame::{AnnotationResult, DoorbellEvent};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("doorbell/", env!("CARGO_PKG_VERSION"));

/// JSON document appended to the events collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Base64 (standard alphabet) JPEG bytes
    pub image: String,
    pub annotations: AnnotationResult,
}

impl EventRecord {
    pub fn from_event(event: &DoorbellEvent) -> Self {
        Self {
            timestamp: DateTime::<Utc>::from(event.created_at()).timestamp_millis(),
            image: STANDARD.encode(event.image().bytes()),
            annotations: event.annotations().clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: Option<String>,
}

/// Appends events to a realtime-database collection over its REST API
/// (`POST <database_url>/<collection>.json`).
pub struct HttpEventPublisher {
    http_client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpEventPublisher {
    pub fn new(config: &PublisherConfig) -> Result<Self, NetworkError> {
        if config.database_url.trim().is_empty() {
            return Err(NetworkError::Config {
                details: "database_url is empty".to_string(),
            });
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| NetworkError::Config {
                details: e.to_string(),
            })?;

        let url = format!(
            "{}/{}.json",
            config.database_url.trim_end_matches('/'),
            config.collection.trim_matches('/')
        );
        info!("Publishing events to {}", url);

        Ok(Self {
            http_client,
            url,
            auth_token: Some(config.auth_token.clone()).filter(|t| !t.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, event: &DoorbellEvent) -> Result<(), NetworkError> {
        let record = EventRecord::from_event(event);
        debug!(
            "Publishing event {} ({} labels, {} byte photo)",
            event.id(),
            record.annotations.len(),
            event.image().len()
        );

        let mut request = self.http_client.post(&self.url);
        if let Some(token) = &self.auth_token {
            request = request.query(&[("auth", token.as_str())]);
        }

        let response = request
            .json(&record)
            .send()
            .await
            .map_err(|e| NetworkError::Request {
                details: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                code: status.as_u16(),
                body,
            });
        }

        // The store answers with the generated key; older mocks reply empty
        let key = response
            .json::<PushResponse>()
            .await
            .ok()
            .and_then(|r| r.name)
            .unwrap_or_else(|| "-".to_string());

        info!("Event {} published (key {})", event.id(), key);
        Ok(())
    }
}
