use crate::encoder::EncodedPayload;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Raw status and body of one classification request
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Readiness reported by the service's health endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHealth {
    pub status: String,
    pub models_loaded: bool,
}

/// Carries encoded frames to the classification service
#[async_trait]
pub trait ClassificationTransport: Send + Sync {
    /// Send one payload; status interpretation is left to the caller
    async fn send(&self, payload: &EncodedPayload) -> Result<TransportResponse, TransportError>;

    /// Probe service readiness
    async fn health(&self) -> Result<ServiceHealth, TransportError>;
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
    #[serde(default)]
    components: Option<HealthComponents>,
}

#[derive(Debug, Deserialize)]
struct HealthComponents {
    #[serde(default)]
    ml_models: Option<String>,
}

/// Multipart-over-HTTP transport for the `classify-frame` endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    health_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint).map_err(|e| TransportError::Network {
            details: format!("Invalid endpoint '{}': {}", endpoint, e),
        })?;
        let health_url = endpoint.join("/health").map_err(|e| TransportError::Network {
            details: format!("Cannot derive health URL: {}", e),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network {
                details: format!("Failed to build HTTP client: {}", e),
            })?;

        debug!("HTTP transport targeting {}", endpoint);

        Ok(Self {
            client,
            endpoint,
            health_url,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout { timeout }
    } else {
        TransportError::Network {
            details: error.to_string(),
        }
    }
}

#[async_trait]
impl ClassificationTransport for HttpTransport {
    async fn send(&self, payload: &EncodedPayload) -> Result<TransportResponse, TransportError> {
        let part = Part::bytes(payload.data.to_vec())
            .file_name(format!("frame-{}.jpg", payload.frame_id))
            .mime_str(payload.content_type)
            .map_err(|e| TransportError::Network {
                details: format!("Invalid content type: {}", e),
            })?;
        let form = Form::new().part("image", part);

        trace!(
            "POST {} with {} byte payload",
            self.endpoint,
            payload.len()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        Ok(TransportResponse { status, body })
    }

    async fn health(&self) -> Result<ServiceHealth, TransportError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: HealthBody = response.json().await.map_err(|e| TransportError::Malformed {
            details: e.to_string(),
        })?;

        let models_loaded = body
            .components
            .and_then(|c| c.ml_models)
            .map(|state| state == "loaded")
            .unwrap_or(true);

        Ok(ServiceHealth {
            status: body.status,
            models_loaded,
        })
    }
}
