/// HTTP delivery of sensor payloads to the collection endpoint
use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::models::SensorPayload;

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to serialize payload")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to send data")]
    Request(#[from] reqwest::Error),
    #[error("failed to send data, status code: {0}")]
    Status(StatusCode),
}

/// Destination for stamped readings. Exactly one attempt per call.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, payload: &SensorPayload) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: Sink + ?Sized> Sink for Arc<T> {
    async fn send(&self, payload: &SensorPayload) -> Result<(), DeliveryError> {
        (**self).send(payload).await
    }
}

pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl HttpSink {
    pub fn new(endpoint: Url, api_key: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, payload: &SensorPayload) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(payload)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        debug!("Endpoint answered {} for {}", status, payload.mac);

        if status.as_u16() >= 400 {
            return Err(DeliveryError::Status(status));
        }

        Ok(())
    }
}
