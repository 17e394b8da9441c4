//! Tagged resource lookup through the Resource Groups Tagging API

use crate::client::{load_sdk_config, Field};
use crate::errors::from_sdk;
use anyhow::{bail, Result};
use aws_sdk_resourcegroupstagging::types::{ResourceTagMapping, TagFilter};
use aws_sdk_resourcegroupstagging::Client;
use serde::Serialize;
use stackpilot_config::AwsSettings;
use stackpilot_core::ProviderError;
use std::collections::BTreeMap;
use tracing::debug;

/// A resource ARN with its tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedResource {
    pub arn: String,
    pub tags: BTreeMap<String, String>,
}

impl From<&ResourceTagMapping> for TaggedResource {
    fn from(mapping: &ResourceTagMapping) -> Self {
        let tags = mapping
            .tags()
            .iter()
            .filter_map(|tag| match (tag.key().field(), tag.value().field()) {
                (Some(key), Some(value)) => Some((key.to_string(), value.to_string())),
                _ => None,
            })
            .collect();
        Self {
            arn: mapping.resource_arn().unwrap_or_default().to_string(),
            tags,
        }
    }
}

/// Parse `KEY=VALUE` (or bare `KEY` for any value) filters, grouping
/// repeated keys into one filter with several accepted values.
pub fn parse_tag_filters(args: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for arg in args {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (arg.trim(), None),
        };
        if key.is_empty() {
            bail!("Invalid tag filter '{}': expected KEY=VALUE or KEY", arg);
        }
        let values = filters.entry(key.to_string()).or_default();
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            values.push(value.to_string());
        }
    }
    Ok(filters)
}

/// Lists resources across services by tag
pub struct ResourceLookup {
    client: Client,
}

impl ResourceLookup {
    pub async fn from_settings(settings: &AwsSettings) -> Self {
        let sdk_config = load_sdk_config(settings).await;
        Self::new(Client::new(&sdk_config))
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Every resource matching all filters, following pagination to the end
    pub async fn find(
        &self,
        filters: &BTreeMap<String, Vec<String>>,
    ) -> std::result::Result<Vec<TaggedResource>, ProviderError> {
        let tag_filters: Vec<TagFilter> = filters
            .iter()
            .map(|(key, values)| {
                TagFilter::builder()
                    .key(key)
                    .set_values((!values.is_empty()).then(|| values.clone()))
                    .build()
            })
            .collect();

        let mut resources = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;
        loop {
            let output = self
                .client
                .get_resources()
                .set_tag_filters((!tag_filters.is_empty()).then(|| tag_filters.clone()))
                .set_pagination_token(token.take())
                .send()
                .await
                .map_err(from_sdk)?;
            pages += 1;

            resources.extend(
                output
                    .resource_tag_mapping_list()
                    .iter()
                    .map(TaggedResource::from),
            );

            match output.pagination_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(pages, resources = resources.len(), "Fetched tagged resources");
        Ok(resources)
    }
}
