//! Tests for HttpGenerationProvider

use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared::{CredentialConfig, CredentialTier, GenerationFailure, SourceIdentity, StyleParams};
use crate::services::http_provider::HttpGenerationProvider;
use crate::traits::GenerationProvider;
use crate::types::GenerationRequest;

fn credential() -> CredentialConfig {
    CredentialConfig::for_tier("key-1", "test-secret-key", CredentialTier::Tier1)
}

fn request(variants: u32) -> GenerationRequest {
    GenerationRequest {
        identity: SourceIdentity::from("sku-42"),
        source_ref: "https://cdn.example.com/sku-42.jpg".to_string(),
        title: Some("Linen shirt".to_string()),
        variants,
        style: StyleParams {
            demographic: Some("adult".to_string()),
            style: Some("outdoor".to_string()),
            prompt: None,
        },
    }
}

async fn provider_for(server: &MockServer) -> HttpGenerationProvider {
    HttpGenerationProvider::new(format!("{}/v1/generate", server.uri())).unwrap()
}

#[tokio::test]
async fn test_successful_generation_sends_bearer_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate"))
        .and(header("authorization", "Bearer test-secret-key"))
        .and(body_partial_json(serde_json::json!({
            "identity": "sku-42",
            "source": "https://cdn.example.com/sku-42.jpg",
            "variants": 2,
            "style": {"style": "outdoor"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "images": ["blob://a.png", "blob://b.png"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server).await;
    let images = provider.generate(&credential(), &request(2)).await.unwrap();
    assert_eq!(images, vec!["blob://a.png", "blob://b.png"]);
    assert_eq!(provider.method(), "http");
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&server)
        .await;

    let failure = provider_for(&server).await.generate(&credential(), &request(1)).await.unwrap_err();
    assert_eq!(failure, GenerationFailure::RateLimited { retry_after_ms: Some(3_000) });
    assert!(failure.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let failure = provider_for(&server).await.generate(&credential(), &request(1)).await.unwrap_err();
    assert!(matches!(failure, GenerationFailure::ServerError { status: 503, .. }));
    assert!(failure.is_retryable());
}

#[tokio::test]
async fn test_auth_and_quota_failures_are_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer test-secret-key"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Quota exceeded for this billing period"))
        .mount(&server)
        .await;

    let failure = provider_for(&server).await.generate(&credential(), &request(1)).await.unwrap_err();
    assert_eq!(failure, GenerationFailure::QuotaExhausted);
    assert!(!failure.is_retryable());

    let unauthorized = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&unauthorized)
        .await;
    let failure = provider_for(&unauthorized).await.generate(&credential(), &request(1)).await.unwrap_err();
    assert_eq!(failure, GenerationFailure::AuthenticationFailed);
}

#[tokio::test]
async fn test_bad_input_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("source image unreadable"))
        .mount(&server)
        .await;

    let failure = provider_for(&server).await.generate(&credential(), &request(1)).await.unwrap_err();
    assert!(matches!(failure, GenerationFailure::InvalidInput(ref message) if message.contains("unreadable")));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    // Nothing listens on port 9 of localhost
    let provider = HttpGenerationProvider::new("http://127.0.0.1:9/v1/generate").unwrap();
    let failure = provider.generate(&credential(), &request(1)).await.unwrap_err();
    assert!(matches!(failure, GenerationFailure::NetworkError(_) | GenerationFailure::Timeout { .. }));
    assert!(failure.is_retryable());
}
