//! CloudFormation-backed provider client

use crate::client::{load_sdk_config, Field};
use crate::errors::from_sdk;
use crate::status::{classify, is_failed_resource_status};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_cloudformation::error::BuildError;
use aws_sdk_cloudformation::types::{Capability, Stack, StackEvent, Tag};
use aws_sdk_cloudformation::Client;
use stackpilot_config::AwsSettings;
use stackpilot_core::{
    OperationHandle, PollResult, ProviderClient, ProviderError, ProviderResult, RawStatus,
    StackAction, StackRequest,
};
use std::collections::BTreeMap;
use tracing::debug;

const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

/// Provider client talking to the CloudFormation API
pub struct CloudFormationProvider {
    client: Client,
    capabilities: Vec<Capability>,
    tags: Vec<Tag>,
}

impl CloudFormationProvider {
    /// Build a provider from explicit settings
    pub async fn from_settings(settings: &AwsSettings) -> Result<Self> {
        let sdk_config = load_sdk_config(settings).await;
        Self::new(Client::new(&sdk_config), settings)
    }

    pub fn new(client: Client, settings: &AwsSettings) -> Result<Self> {
        let capabilities = settings
            .capabilities
            .iter()
            .map(|c| Capability::from(c.as_str()))
            .collect();
        let tags = settings
            .tags
            .iter()
            .map(|(key, value)| {
                Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .into_tag()
                    .with_context(|| format!("Invalid stack tag '{}'", key))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            client,
            capabilities,
            tags,
        })
    }

    fn tags(&self) -> Option<Vec<Tag>> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.clone())
        }
    }
}

#[async_trait]
impl ProviderClient for CloudFormationProvider {
    async fn submit_change(&self, request: &StackRequest) -> ProviderResult<OperationHandle> {
        let name = request.name();
        let stack_id = match request.action() {
            StackAction::Create => self
                .client
                .create_stack()
                .stack_name(name)
                .template_body(request.template_body())
                .set_capabilities(Some(self.capabilities.clone()))
                .set_tags(self.tags())
                .send()
                .await
                .map_err(from_sdk)?
                .stack_id()
                .field()
                .map(str::to_string),
            StackAction::Update => self
                .client
                .update_stack()
                .stack_name(name)
                .template_body(request.template_body())
                .set_capabilities(Some(self.capabilities.clone()))
                .set_tags(self.tags())
                .send()
                .await
                .map_err(from_sdk)?
                .stack_id()
                .field()
                .map(str::to_string),
            StackAction::Delete => {
                self.client
                    .delete_stack()
                    .stack_name(name)
                    .send()
                    .await
                    .map_err(from_sdk)?;
                None
            }
        };

        Ok(OperationHandle(stack_id.unwrap_or_else(|| name.to_string())))
    }

    async fn describe_status(&self, name: &str) -> ProviderResult<PollResult> {
        let output = match self.client.describe_stacks().stack_name(name).send().await {
            Ok(output) => output,
            Err(err) => {
                return match from_sdk(err) {
                    ProviderError::NotFound(_) => Ok(PollResult::not_found()),
                    other => Err(other),
                }
            }
        };

        let Some(stack) = output.stacks().first() else {
            return Ok(PollResult::not_found());
        };
        let raw = raw_status(stack);
        Ok(PollResult::new(classify(&raw.status), raw))
    }

    async fn cancel_change(&self, name: &str) -> ProviderResult<()> {
        self.client
            .cancel_update_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(from_sdk)?;
        Ok(())
    }

    async fn deployed_template(&self, name: &str) -> ProviderResult<Option<String>> {
        match self.client.get_template().stack_name(name).send().await {
            Ok(output) => Ok(output.template_body().map(str::to_string)),
            Err(err) => match from_sdk(err) {
                ProviderError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn failure_reasons(&self, name: &str) -> ProviderResult<Vec<String>> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(name)
            .send()
            .await
            .map_err(from_sdk)?;

        let events: Vec<EventRecord> = output.stack_events().iter().map(EventRecord::from).collect();
        debug!(stack = name, events = events.len(), "Scanned stack events");
        Ok(failed_resources(&events))
    }
}

fn raw_status(stack: &Stack) -> RawStatus {
    let status = stack
        .stack_status()
        .field()
        .map(|s| s.as_str())
        .unwrap_or("UNKNOWN");

    let mut raw = RawStatus::new(status);
    raw.reason = stack.stack_status_reason().map(str::to_string);
    raw.outputs = stack
        .outputs()
        .iter()
        .filter_map(|output| match (output.output_key(), output.output_value()) {
            (Some(key), Some(value)) => Some((key.to_string(), value.to_string())),
            _ => None,
        })
        .collect::<BTreeMap<_, _>>();
    raw
}

/// The subset of a stack event needed to explain a failure
#[derive(Debug, Clone, Default, PartialEq)]
struct EventRecord {
    logical_id: String,
    resource_type: String,
    status: String,
    reason: Option<String>,
}

impl From<&StackEvent> for EventRecord {
    fn from(event: &StackEvent) -> Self {
        Self {
            logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
            resource_type: event.resource_type().unwrap_or_default().to_string(),
            status: event
                .resource_status()
                .field()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            reason: event.resource_status_reason().map(str::to_string),
        }
    }
}

/// Failed resources from the most recent operation, newest first.
///
/// Events arrive newest first; the stack's own `*_IN_PROGRESS` event marks
/// where the current operation began.
fn failed_resources(events: &[EventRecord]) -> Vec<String> {
    let mut failures = Vec::new();
    for event in events {
        let is_stack = event.resource_type == STACK_RESOURCE_TYPE;
        if is_stack
            && matches!(
                event.status.as_str(),
                "CREATE_IN_PROGRESS"
                    | "UPDATE_IN_PROGRESS"
                    | "DELETE_IN_PROGRESS"
                    | "IMPORT_IN_PROGRESS"
            )
        {
            break;
        }
        if is_stack || !is_failed_resource_status(&event.status) {
            continue;
        }
        let reason = event.reason.as_deref().unwrap_or("no reason given");
        failures.push(format!(
            "{} ({}) {}: {}",
            event.logical_id, event.resource_type, event.status, reason
        ));
    }
    failures
}

/// `Tag::build` is fallible when the model marks key and value as required
trait IntoTag {
    fn into_tag(self) -> Result<Tag>;
}

impl IntoTag for Tag {
    fn into_tag(self) -> Result<Tag> {
        Ok(self)
    }
}

impl IntoTag for std::result::Result<Tag, BuildError> {
    fn into_tag(self) -> Result<Tag> {
        Ok(self?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(logical_id: &str, resource_type: &str, status: &str, reason: Option<&str>) -> EventRecord {
        EventRecord {
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            status: status.to_string(),
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_failed_resources_stop_at_operation_start() {
        let events = vec![
            event("app", STACK_RESOURCE_TYPE, "ROLLBACK_COMPLETE", None),
            event("Bucket", "AWS::S3::Bucket", "DELETE_COMPLETE", None),
            event("app", STACK_RESOURCE_TYPE, "ROLLBACK_IN_PROGRESS", Some("The following resource(s) failed to create: [Bucket].")),
            event("Bucket", "AWS::S3::Bucket", "CREATE_FAILED", Some("app-data already exists")),
            event("Bucket", "AWS::S3::Bucket", "CREATE_IN_PROGRESS", None),
            event("app", STACK_RESOURCE_TYPE, "CREATE_IN_PROGRESS", Some("User Initiated")),
            // Earlier operation, must be ignored
            event("Key", "AWS::KMS::Key", "CREATE_FAILED", Some("old failure")),
        ];

        let failures = failed_resources(&events);
        assert_eq!(
            failures,
            vec!["Bucket (AWS::S3::Bucket) CREATE_FAILED: app-data already exists"]
        );
    }

    #[test]
    fn test_failed_resources_without_reason() {
        let events = vec![event("Queue", "AWS::SQS::Queue", "UPDATE_FAILED", None)];
        assert_eq!(
            failed_resources(&events),
            vec!["Queue (AWS::SQS::Queue) UPDATE_FAILED: no reason given"]
        );
    }
}
