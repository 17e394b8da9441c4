use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stackpilot::template::FileTemplateSource;
use stackpilot_config::StackpilotConfig;
use stackpilot_core::{ReconcileError, StackRequest, TemplateSource};
use std::path::PathBuf;
use std::process::ExitCode;

/// Create, update and delete CloudFormation stacks and wait for them to settle
#[derive(Parser)]
#[command(name = "stackpilot")]
#[command(version)]
#[command(about = "Create, update and delete CloudFormation stacks and wait for them to settle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// AWS region (overrides config file)
    #[arg(long, value_name = "REGION", global = true)]
    region: Option<String>,

    /// AWS shared config profile (overrides config file)
    #[arg(long, value_name = "PROFILE", global = true)]
    profile: Option<String>,

    /// Seconds to wait for the stack to settle
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a stack and wait until it is complete
    Create {
        /// Stack name
        name: String,
        /// Template file path, or - for stdin
        template: String,
    },
    /// Update a stack and wait until it is complete
    Update {
        /// Stack name
        name: String,
        /// Template file path, or - for stdin
        template: String,
    },
    /// Delete a stack and wait until it is gone (succeeds if already absent)
    Delete {
        /// Stack name
        name: String,
    },
    /// Show the current status of a stack
    Status {
        /// Stack name
        name: String,
    },
    /// Cancel an in-progress update and roll it back
    Cancel {
        /// Stack name
        name: String,
    },
    /// List tagged resources across services
    Resources {
        /// Tag filter as KEY=VALUE, or KEY for any value (repeatable)
        #[arg(long = "tag", value_name = "KEY=VALUE")]
        tags: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(reconcile) = err.downcast_ref::<ReconcileError>() {
                eprintln!("error[{}]: {}", reconcile.kind(), reconcile);
            } else if let Some(cli) = err.downcast_ref::<CliError>() {
                eprintln!("error[{}]: {:#}", cli.kind, cli.inner);
            } else {
                // Everything unlabelled comes from talking to AWS
                eprintln!("error[Provider]: {:#}", err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration
    let mut config = match &cli.config {
        Some(path) => StackpilotConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => StackpilotConfig::load().context("Failed to load configuration"),
    }
    .labelled("Config")?;

    // Step 2: Apply CLI overrides (highest priority), then validate once
    apply_cli_overrides(&mut config, &cli);
    config.validate().labelled("Config")?;

    // Step 3: Initialize tracing before any AWS calls
    stackpilot::init_tracing(&config.logging);

    // Step 4: Resolve the command before touching the network
    let action = match cli.command {
        Commands::Create { name, template } => Action::Reconcile(StackRequest::create(
            name,
            FileTemplateSource.load(&template).labelled("Input")?,
        )),
        Commands::Update { name, template } => Action::Reconcile(StackRequest::update(
            name,
            FileTemplateSource.load(&template).labelled("Input")?,
        )),
        Commands::Delete { name } => Action::Reconcile(StackRequest::delete(name)),
        Commands::Status { name } => Action::Status(name),
        Commands::Cancel { name } => Action::Cancel(name),
        Commands::Resources { tags } => Action::Resources(tags),
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
        .labelled("Internal")?
        .block_on(async {
            match action {
                Action::Reconcile(request) => {
                    stackpilot::print_json(&stackpilot::reconcile(&config, request).await?)
                }
                Action::Status(name) => {
                    stackpilot::print_json(&stackpilot::status(&config, &name).await?)
                }
                Action::Cancel(name) => {
                    stackpilot::print_json(&stackpilot::cancel_update(&config, &name).await?)
                }
                Action::Resources(tags) => {
                    stackpilot::print_json(&stackpilot::list_resources(&config, &tags).await?)
                }
            }
        })
}

/// Failure outside the reconciler, tagged with the kind printed on stderr
#[derive(Debug, thiserror::Error)]
#[error("{inner}")]
struct CliError {
    kind: &'static str,
    inner: anyhow::Error,
}

trait Labelled<T> {
    fn labelled(self, kind: &'static str) -> Result<T>;
}

impl<T> Labelled<T> for Result<T> {
    fn labelled(self, kind: &'static str) -> Result<T> {
        self.map_err(|source| CliError { kind, inner: source }.into())
    }
}

enum Action {
    Reconcile(StackRequest),
    Status(String),
    Cancel(String),
    Resources(Vec<String>),
}

fn apply_cli_overrides(config: &mut StackpilotConfig, cli: &Cli) {
    if let Some(region) = &cli.region {
        config.aws.region = Some(region.clone());
    }
    if let Some(profile) = &cli.profile {
        config.aws.profile = Some(profile.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.poll.timeout_secs = timeout;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
}
