mod classifier;
mod config;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use civic_engine::validator::{EdgeSummary, Precondition};
use civic_engine::TransitionValidator;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Citizen report workflow server and tools.
#[derive(Parser)]
#[command(name = "civic", version, about = "Citizen report workflow server and tools")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Path to a TOML config file (defaults apply when it does not exist)
        #[arg(long, default_value = "civic.toml")]
        config: PathBuf,
        /// Port to listen on (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Print the report transition table
    Transitions {
        /// Show the table with officer verification enabled
        #[arg(long)]
        officer_may_verify: bool,
    },

    /// Validate a config file and print the effective settings
    CheckConfig {
        /// Path to the TOML config file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            config,
            port,
            tls_cert,
            tls_key,
        } => {
            if tls_cert.is_some() != tls_key.is_some() {
                eprintln!("error: --tls-cert and --tls-key must both be provided");
                process::exit(1);
            }
            let mut config = match load_config(&config) {
                Ok(c) => c,
                Err(message) => {
                    eprintln!("error: {}", message);
                    process::exit(1);
                }
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("error: failed to create tokio runtime: {}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(serve::start_server(config, tls_cert, tls_key)) {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
        Commands::Transitions { officer_may_verify } => {
            cmd_transitions(officer_may_verify, cli.output);
        }
        Commands::CheckConfig { file } => {
            cmd_check_config(&file, cli.output);
        }
    }
}

/// Logs go to stderr so that `--output json` stays machine-readable.
fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> Result<ServerConfig, String> {
    let config = ServerConfig::load(Some(path))
        .and_then(ServerConfig::with_env_overrides)
        .map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn cmd_transitions(officer_may_verify: bool, output: OutputFormat) {
    let table = TransitionValidator::new(officer_may_verify).transition_table();
    match output {
        OutputFormat::Json => {
            let pretty = serde_json::to_string_pretty(&table)
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => {
            for edge in &table {
                println!("{}", format_edge(edge));
            }
        }
    }
}

fn format_edge(edge: &EdgeSummary) -> String {
    let roles: Vec<&str> = edge.roles.iter().map(|r| r.as_str()).collect();
    let mut line = format!(
        "{:<22} -> {:<22} {}",
        edge.from.as_str(),
        edge.to.as_str(),
        roles.join(", ")
    );
    if edge.assigned_officer_only {
        line.push_str(" (officer must be assigned)");
    }
    for precondition in &edge.preconditions {
        line.push_str(match precondition {
            Precondition::PhotosAfterRequired => " [requires after-photos]",
            Precondition::MisrouteReasonRequired => " [requires misroute reason]",
        });
    }
    line
}

fn cmd_check_config(file: &Path, output: OutputFormat) {
    let result = ServerConfig::from_file(file)
        .and_then(ServerConfig::with_env_overrides)
        .and_then(|c| c.validate().map(|()| c));

    match (result, output) {
        (Ok(config), OutputFormat::Json) => {
            let mut value = serde_json::to_value(&config).unwrap_or_default();
            if config.server.api_key.is_some() {
                value["server"]["api_key"] = serde_json::json!("<redacted>");
            }
            let pretty = serde_json::to_string_pretty(&value)
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
        (Ok(config), OutputFormat::Text) => {
            println!("{}: ok", file.display());
            println!("  port: {}", config.server.port);
            println!("  rate limit: {} req/min", config.server.rate_limit);
            println!(
                "  api key: {}",
                if config.server.api_key.is_some() { "set" } else { "not set" }
            );
            println!("  officer may verify: {}", config.workflow.officer_may_verify);
            println!("  dispatch attempts: {}", config.workflow.dispatch_attempts);
            println!(
                "  classifier: {}",
                config.classifier.url.as_deref().unwrap_or("disabled")
            );
            println!("  include deleted in listings: {}", config.listing.include_deleted);
        }
        (Err(e), OutputFormat::Json) => {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            process::exit(1);
        }
        (Err(e), OutputFormat::Text) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
