//! Capability interfaces for the cloud provider and template sources

use crate::error::ProviderError;
use crate::types::{OperationHandle, PollResult, StackRequest};
use async_trait::async_trait;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Narrow view of a stack orchestration API
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Submit a create, update or delete. Must not wait for completion.
    async fn submit_change(&self, request: &StackRequest) -> ProviderResult<OperationHandle>;

    /// Current status of the named stack.
    ///
    /// A missing stack is reported as [`PollResult::not_found`], not as an error.
    async fn describe_status(&self, name: &str) -> ProviderResult<PollResult>;

    /// Ask the provider to abandon an in-flight change and roll back
    async fn cancel_change(&self, name: &str) -> ProviderResult<()>;

    /// Template body currently deployed for the stack, `None` if absent
    async fn deployed_template(&self, name: &str) -> ProviderResult<Option<String>>;

    /// Human-readable reasons for failed resources, most recent first
    async fn failure_reasons(&self, _name: &str) -> ProviderResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Supplies opaque template bodies by identifier
pub trait TemplateSource {
    type Error;

    fn load(&self, id: &str) -> std::result::Result<String, Self::Error>;
}
