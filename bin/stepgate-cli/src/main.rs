//! Stepgate CLI - Operator Command Line Interface
//!
//! Loads an engine configuration, inspects it, and evaluates recorded
//! requests against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepgate_auth::{
    Assertion, Authentication, AuthenticationContextValidationResult, BYPASSED_PROVIDERS_ATTRIBUTE,
    Engine, Principal, RequestContext, Service,
};
use stepgate_common::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stepgate-cli")]
#[command(about = "Stepgate context validation CLI")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "stepgate.toml", env = "STEPGATE_CONFIG")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured providers
    Providers,
    /// List registered services
    Services,
    /// Evaluate a recorded request
    Evaluate {
        /// JSON request file
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Validate the configuration and exit
    CheckConfig,
    /// Evaluate requests and print the resulting metrics
    Metrics {
        /// JSON request files
        #[arg(short, long)]
        request: Vec<PathBuf>,
    },
}

/// A recorded request to evaluate
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Scenario {
    /// Service URL being accessed
    service: String,
    principal: Principal,
    /// Attributes attached to the authentication
    #[serde(default)]
    authentication_attributes: HashMap<String, Vec<String>>,
    #[serde(default)]
    successful_methods: Vec<String>,
    #[serde(default)]
    parameters: HashMap<String, String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    client_ip: Option<IpAddr>,
    /// Providers to mark unavailable before evaluating
    #[serde(default)]
    unavailable_providers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Evaluation {
    service: String,
    registered_service: Option<u64>,
    result: AuthenticationContextValidationResult,
    bypassed_providers: Vec<String>,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| args.log_level.clone().into())
    };
    if args.json {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Commands::CheckConfig = args.command {
        println!(
            "Configuration OK: {} providers, {} services",
            config.providers.len(),
            config.services.len()
        );
        return Ok(());
    }

    let engine = Engine::from_config(&config)?;
    info!("Loaded configuration from {}", args.config.display());

    match args.command {
        Commands::Providers => {
            let providers = engine.registry().providers();
            println!("Providers");
            println!("=========");
            if providers.is_empty() {
                println!("No providers configured");
            } else {
                println!(
                    "{:<20} {:>6} {:<10} {:<10} {:<10} {:<20}",
                    "ID", "ORDER", "FAILURE", "AVAILABLE", "BYPASS", "ALIASES"
                );
                println!("{}", "-".repeat(80));
                for provider in providers {
                    let available = provider
                        .is_available(None)
                        .map_or_else(|e| format!("error: {e}"), |a| a.to_string());
                    println!(
                        "{:<20} {:>6} {:<10} {:<10} {:<10} {:<20}",
                        provider.id(),
                        provider.order(),
                        provider.failure_mode().as_str(),
                        available,
                        provider.bypass_evaluator().map_or("-", |b| b.name()),
                        if provider.aliases().is_empty() {
                            "-".to_string()
                        } else {
                            provider.aliases().join(",")
                        }
                    );
                }
            }
        }
        Commands::Services => {
            let services = engine.services();
            println!("Services");
            println!("========");
            if services.is_empty() {
                println!("No services registered");
            } else {
                println!(
                    "{:<6} {:<20} {:>6} {:<30} {:<20}",
                    "ID", "NAME", "ORDER", "SERVICE ID", "PROVIDERS"
                );
                println!("{}", "-".repeat(86));
                for service in services {
                    let providers = service
                        .multifactor_policy
                        .as_ref()
                        .map_or_else(|| "-".to_string(), |p| p.providers.join(","));
                    println!(
                        "{:<6} {:<20} {:>6} {:<30} {:<20}",
                        service.id,
                        service.name,
                        service.evaluation_order,
                        service.service_id.as_str(),
                        providers
                    );
                }
            }
        }
        Commands::Evaluate { request } => {
            let evaluation = evaluate(&engine, &request)?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        Commands::Metrics { request } => {
            for path in &request {
                evaluate(&engine, path)?;
            }
            print!("{}", engine.metrics().export_prometheus());
        }
        Commands::CheckConfig => {}
    }

    Ok(())
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid request file {}", path.display()))
}

fn evaluate(engine: &Engine, path: &Path) -> Result<Evaluation> {
    let scenario = load_scenario(path)?;

    for provider_id in &scenario.unavailable_providers {
        if !engine.set_provider_available(provider_id, false) {
            anyhow::bail!("Unknown provider '{provider_id}'");
        }
    }

    let mut authentication = Authentication::new(scenario.principal);
    for method in scenario.successful_methods {
        authentication = authentication.with_successful_method(method);
    }
    for (name, values) in scenario.authentication_attributes {
        authentication = authentication.with_attribute(name, values);
    }
    let authentication = Arc::new(authentication);

    let mut request = RequestContext::new();
    for (name, value) in scenario.parameters {
        request = request.with_parameter(name, value);
    }
    for (name, value) in &scenario.headers {
        request = request.with_header(name, value);
    }
    if let Some(ip) = scenario.client_ip {
        request = request.with_client_ip(ip);
    }

    let service = Service::new(scenario.service);
    let registered_service = engine.find_service(&service).map(|s| s.id.0);
    let assertion = Assertion::new(service.clone(), Arc::clone(&authentication));
    let result = engine.validate_assertion(&assertion, &request)?;

    Ok(Evaluation {
        service: service.id,
        registered_service,
        result,
        bypassed_providers: authentication
            .attribute(BYPASSED_PROVIDERS_ATTRIBUTE)
            .unwrap_or_default(),
    })
}
