//! Zentinel WS-Security binary.
//!
//! Run with: `zentinel-wssec --config config.yaml verify request.xml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zentinel_wssec::agent::{Decision, SoapRequest};
use zentinel_wssec::xml::{XmlEventSource, XmlReader, XmlWriter};
use zentinel_wssec::{OutboundWSSec, Policy, QName, SecurityConfig, SecurityEvent, SecurityProperties, WsSecurityAgent};

/// WS-Security processing for SOAP messages.
///
/// `verify` runs a message through inbound processing and policy
/// enforcement the way the proxy agent does. `secure` applies the configured
/// outbound actions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify and decrypt a secured message
    Verify {
        /// Message to process
        input: PathBuf,

        /// WS-SecurityPolicy document, overriding the configured one
        #[arg(short, long)]
        policy: Option<PathBuf>,

        /// Content-Type the message arrived with
        #[arg(long, default_value = "text/xml")]
        content_type: String,

        /// Write the processed document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sign and encrypt a message with the configured outbound actions
    Secure {
        /// Message to process
        input: PathBuf,

        /// Write the secured document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Verdict printed by `verify`.
#[derive(Serialize)]
struct Report<'a> {
    allowed: bool,
    operation: Option<String>,
    user: Option<&'a str>,
    events: &'a [SecurityEvent],
    fault: Option<&'a str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel WS-Security v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    let config = load_config(&args.config).await?;
    info!(
        inbound_bsp = config.bsp.enabled,
        outbound_actions = config.outbound.actions.len(),
        algorithm_suite = ?config.algorithm_suite,
        "Configuration loaded"
    );

    match args.command {
        Command::Verify {
            input,
            policy,
            content_type,
            output,
        } => verify(config, &input, policy, &content_type, output.as_deref()).await,
        Command::Secure { input, output } => secure(config, &input, output.as_deref()).await,
    }
}

async fn load_config(path: &Path) -> Result<SecurityConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")
    } else {
        info!("Config file not found, using defaults");
        Ok(SecurityConfig::default())
    }
}

async fn load_policy(path: &Path) -> Result<Policy> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read policy {}", path.display()))?;
    Policy::parse(&content).with_context(|| format!("Failed to parse policy {}", path.display()))
}

async fn verify(
    config: SecurityConfig,
    input: &Path,
    policy: Option<PathBuf>,
    content_type: &str,
    output: Option<&Path>,
) -> Result<()> {
    let policy_path = policy.or_else(|| config.policy.clone());
    let operation_policies = config.operation_policies.clone();
    let properties = SecurityProperties::from_config(config).context("Invalid configuration")?;

    let mut agent = WsSecurityAgent::new(properties);
    if let Some(path) = policy_path {
        agent = agent.with_policy(load_policy(&path).await?);
        info!(policy = %path.display(), "Policy loaded");
    }
    for (operation, path) in &operation_policies {
        agent = agent.with_operation_policy(QName::parse(operation), load_policy(path).await?);
        info!(operation = %operation, policy = %path.display(), "Operation policy loaded");
    }

    let body = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let request = SoapRequest::new(input.display().to_string(), Some(content_type), body);
    let response = agent.process(&request);

    let fault = match &response.decision {
        Decision::Block { body, .. } => body.as_deref(),
        Decision::Allow => None,
    };
    let message = response.message.as_ref();
    let report = Report {
        allowed: !response.is_blocked(),
        operation: message.and_then(|m| m.operation.as_ref()).map(ToString::to_string),
        user: message.and_then(|m| m.user.as_deref()),
        events: message.map(|m| m.events.as_slice()).unwrap_or_default(),
        fault,
    };
    eprintln!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(message) = message {
        write_output(output, message.xml.as_bytes()).await?;
    }
    if response.is_blocked() {
        warn!("Message rejected");
        anyhow::bail!("Message rejected by WS-Security processing");
    }
    Ok(())
}

async fn secure(config: SecurityConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let properties = SecurityProperties::from_config(config).context("Invalid configuration")?;
    let body = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let mut reader = XmlReader::from_bytes(body)?;
    let mut chain = OutboundWSSec::new(properties).process_out_message(XmlWriter::new(Vec::new()))?;
    while let Some(event) = reader.next_event()? {
        chain.process_event(event)?;
    }
    let secured = chain.finish()?.into_inner();
    info!(bytes = secured.len(), "Message secured");
    write_output(output, &secured).await
}

async fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", String::from_utf8_lossy(data));
            Ok(())
        }
    }
}
