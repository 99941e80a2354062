//! HTTP generation provider

use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};

use shared::{CredentialConfig, GenerationFailure, StyleParams};
use crate::error::ProducerResult;
use crate::traits::GenerationProvider;
use crate::types::GenerationRequest;

#[derive(Serialize)]
struct GenerateBody<'a> {
    identity: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    variants: u32,
    style: &'a StyleParams,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    images: Vec<String>,
}

/// Provider that POSTs generation requests to a remote endpoint with bearer auth
pub struct HttpGenerationProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerationProvider {
    pub fn new(endpoint: impl Into<String>) -> ProducerResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `retry-after` in whole seconds, as sent by the provider on 429
    fn retry_after_ms(response: &reqwest::Response) -> Option<u64> {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .map(|seconds| (seconds * 1000.0) as u64)
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    fn method(&self) -> String {
        "http".to_string()
    }

    async fn generate(
        &self,
        credential: &CredentialConfig,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, GenerationFailure> {
        let body = GenerateBody {
            identity: request.identity.as_str(),
            source: &request.source_ref,
            title: request.title.as_deref(),
            variants: request.variants,
            style: &request.style,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationFailure::Timeout { after_ms: 0 }
                } else {
                    GenerationFailure::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = Self::retry_after_ms(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationFailure::from_status(status.as_u16(), &text, retry_after_ms));
        }

        let reply: GenerateReply = response.json().await.map_err(|e| GenerationFailure::ServerError {
            status: status.as_u16(),
            message: format!("Failed to parse response: {e}"),
        })?;

        Ok(reply.images)
    }
}
