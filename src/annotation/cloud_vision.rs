use super::AnnotationClient;
use crate::config::AnnotationConfig;
use crate::error::NetworkError;
use crate::frame::{AnnotationResult, ImageBuffer};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("doorbell/", env!("CARGO_PKG_VERSION"));
const LABEL_DETECTION: &str = "LABEL_DETECTION";

#[derive(Debug, Serialize)]
struct AnnotateRequest<'a> {
    requests: Vec<ImageRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    image: ImageContent,
    features: Vec<Feature<'a>>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    description: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Google Cloud Vision `images:annotate` client requesting label detection
pub struct CloudVisionClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: u32,
}

impl CloudVisionClient {
    pub fn new(config: &AnnotationConfig) -> Result<Self, NetworkError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| NetworkError::Config {
                details: e.to_string(),
            })?;

        info!(
            "Cloud Vision client targeting {} (max {} labels)",
            config.endpoint, config.max_results
        );

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            max_results: config.max_results,
        })
    }

    fn request_body(&self, image: &ImageBuffer) -> AnnotateRequest<'static> {
        AnnotateRequest {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image.bytes()),
                },
                features: vec![Feature {
                    kind: LABEL_DETECTION,
                    max_results: self.max_results,
                }],
            }],
        }
    }
}

#[async_trait]
impl AnnotationClient for CloudVisionClient {
    fn name(&self) -> &str {
        "cloud_vision"
    }

    async fn annotate(&self, image: &ImageBuffer) -> Result<AnnotationResult, NetworkError> {
        debug!("Requesting labels for {} byte image", image.len());

        let mut request = self.http_client.post(&self.endpoint);
        if !self.api_key.is_empty() {
            request = request.query(&[("key", self.api_key.as_str())]);
        }

        let response = request
            .json(&self.request_body(image))
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

        let parsed: AnnotateResponse = response.json().await.map_err(|e| NetworkError::Parse {
            details: e.to_string(),
        })?;

        let mut result = AnnotationResult::new();
        for entry in parsed.responses {
            if let Some(error) = entry.error {
                return Err(NetworkError::Service {
                    message: format!("{} (code {})", error.message, error.code),
                });
            }
            for label in entry.label_annotations {
                result.insert(label.description, label.score);
            }
        }

        info!("Image annotated: {}", result.summary(5));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorded {
        bodies: Arc<Mutex<Vec<Value>>>,
        keys: Arc<Mutex<Vec<Option<String>>>>,
    }

    async fn serve(status: StatusCode, reply: Value) -> (String, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route(
                "/annotate",
                post(
                    move |State(recorded): State<Recorded>,
                          Query(query): Query<HashMap<String, String>>,
                          Json(body): Json<Value>| {
                        let reply = reply.clone();
                        async move {
                            recorded.bodies.lock().push(body);
                            recorded.keys.lock().push(query.get("key").cloned());
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/annotate", addr), recorded)
    }

    fn client(endpoint: String) -> CloudVisionClient {
        CloudVisionClient::new(&AnnotationConfig {
            backend: crate::config::AnnotationBackend::CloudVision,
            endpoint,
            api_key: "test-key".to_string(),
            max_results: 5,
            request_timeout_seconds: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_labels_are_parsed() {
        let (endpoint, recorded) = serve(
            StatusCode::OK,
            json!({
                "responses": [{
                    "labelAnnotations": [
                        {"mid": "/m/01g317", "description": "Person", "score": 0.94},
                        {"mid": "/m/02dgv", "description": "Door", "score": 0.71}
                    ]
                }]
            }),
        )
        .await;

        let image = ImageBuffer::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let result = client(endpoint).annotate(&image).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.get("Person"), Some(0.94));
        assert_eq!(result.get("Door"), Some(0.71));

        let bodies = recorded.bodies.lock();
        let request = &bodies[0]["requests"][0];
        assert_eq!(request["image"]["content"], STANDARD.encode([0xFF, 0xD8, 0xFF, 0xD9]));
        assert_eq!(request["features"][0]["type"], "LABEL_DETECTION");
        assert_eq!(request["features"][0]["maxResults"], 5);
        assert_eq!(recorded.keys.lock()[0].as_deref(), Some("test-key"));
    }

    #[tokio::test]
    async fn test_no_labels_is_empty_result() {
        let (endpoint, _) = serve(StatusCode::OK, json!({"responses": [{}]})).await;
        let result = client(endpoint)
            .annotate(&ImageBuffer::jpeg(vec![1, 2, 3]))
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_service_error_is_reported() {
        let (endpoint, _) = serve(
            StatusCode::OK,
            json!({"responses": [{"error": {"code": 3, "message": "Bad image data."}}]}),
        )
        .await;

        let error = client(endpoint)
            .annotate(&ImageBuffer::jpeg(vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(error, NetworkError::Service { ref message } if message.contains("Bad image data")));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (endpoint, _) = serve(
            StatusCode::FORBIDDEN,
            json!({"error": {"code": 403, "message": "API key not valid"}}),
        )
        .await;

        let error = client(endpoint)
            .annotate(&ImageBuffer::jpeg(vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(error, NetworkError::Status { code: 403, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = client(format!("http://{}/annotate", addr))
            .annotate(&ImageBuffer::jpeg(vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(error, NetworkError::Request { .. }));
    }
}
