// stackpilot - CLI glue around the stack reconciler
//
// Config loading, logging setup, provider construction and ctrl-c handling.
// The lifecycle logic itself lives in stackpilot-core.

use anyhow::Result;
use serde::Serialize;
use stackpilot_aws::{parse_tag_filters, CloudFormationProvider, ResourceLookup, TaggedResource};
use stackpilot_config::{LogFormat, LoggingSettings, PollSettings, StackpilotConfig};
use stackpilot_core::{CancelSignal, PollPolicy, StackReconciler, StackRequest, StackState};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

pub mod template;

/// Initialize tracing/logging. Logs go to stderr so stdout stays parseable.
pub fn init_tracing(settings: &LoggingSettings) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match settings.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

pub fn poll_policy(settings: &PollSettings) -> PollPolicy {
    PollPolicy {
        initial_interval: settings.initial_interval(),
        max_interval: settings.max_interval(),
        multiplier: settings.multiplier,
        jitter: settings.jitter,
        deadline: settings.timeout(),
        failure_threshold: settings.failure_threshold,
    }
}

async fn reconciler(config: &StackpilotConfig) -> Result<StackReconciler<CloudFormationProvider>> {
    let provider = CloudFormationProvider::from_settings(&config.aws).await?;
    Ok(StackReconciler::new(
        Arc::new(provider),
        poll_policy(&config.poll),
    ))
}

/// Run one lifecycle request to a terminal phase. Ctrl-C stops waiting.
pub async fn reconcile(config: &StackpilotConfig, request: StackRequest) -> Result<StackState> {
    let reconciler = reconciler(config).await?;

    let cancel = CancelSignal::new();
    let interrupt = tokio::spawn(cancel_on_interrupt(cancel.clone()));

    info!(
        stack = request.name(),
        action = %request.action(),
        timeout_secs = config.poll.timeout_secs,
        "Reconciling stack"
    );
    let outcome = reconciler.apply(&request, &cancel).await;
    interrupt.abort();

    Ok(outcome?)
}

async fn cancel_on_interrupt(cancel: CancelSignal) {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    warn!("Interrupt received, no longer waiting; the remote operation keeps running");
    cancel.cancel();
}

pub async fn status(config: &StackpilotConfig, name: &str) -> Result<StackState> {
    Ok(reconciler(config).await?.status(name).await?)
}

pub async fn cancel_update(config: &StackpilotConfig, name: &str) -> Result<StackState> {
    Ok(reconciler(config).await?.cancel_update(name).await?)
}

pub async fn list_resources(
    config: &StackpilotConfig,
    tag_args: &[String],
) -> Result<Vec<TaggedResource>> {
    let filters = parse_tag_filters(tag_args)?;
    let lookup = ResourceLookup::from_settings(&config.aws).await;
    Ok(lookup.find(&filters).await?)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
