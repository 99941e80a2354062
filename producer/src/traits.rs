//! Producer trait definitions for dependency injection

use async_trait::async_trait;

use shared::{CredentialConfig, GenerationFailure};
use crate::types::GenerationRequest;

/// External image generation capability.
///
/// Implementations only classify failures; retrying is the dispatcher's job.
#[mockall::automock]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Label stored alongside cached results
    fn method(&self) -> String;

    /// Generate `request.variants` images, returning one reference per image
    async fn generate(
        &self,
        credential: &CredentialConfig,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, GenerationFailure>;
}
