// stackpilot-aws - AWS implementations of the provider interfaces
//
// CloudFormationProvider backs the reconciler; ResourceLookup lists tagged
// resources. Both are built from explicit AwsSettings rather than ambient
// process-wide configuration.

mod client;
mod cloudformation;
mod errors;
pub mod status;
mod tagging;

pub use client::load_sdk_config;
pub use cloudformation::CloudFormationProvider;
pub use tagging::{parse_tag_filters, ResourceLookup, TaggedResource};
