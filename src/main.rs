//! HTTP Intercept - CLI Entry Point
//!
//! Validates fixture files and shows how URLs would be answered by them.

use anyhow::Result;
use clap::Parser;
use http_intercept::{
    FixtureConfig, HookPoint, HttpClient, InterceptError, InterceptRegistry, RequestArgs,
    ResponseDescriptor, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "http-intercept",
    about = "Outbound HTTP fakes - validate fixture files and probe URLs against them",
    version
)]
struct Args {
    /// Path to fixture file
    #[arg(short, long, default_value = "http-fixtures.yaml")]
    config: PathBuf,

    /// URL to resolve against the fixtures (repeatable)
    #[arg(short, long, value_name = "URL")]
    probe: Vec<String>,

    /// HTTP method used for probes
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print example fixture file and exit
    #[arg(long)]
    print_config: bool,

    /// Validate fixture file and exit
    #[arg(long)]
    validate: bool,
}

/// Stands in for the network: probes never leave the process.
struct OfflineTransport;

impl Transport for OfflineTransport {
    fn send(&self, url: &str, _args: &RequestArgs) -> Result<ResponseDescriptor> {
        anyhow::bail!("no fixture matched {} (would reach the network)", url)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading fixtures");
        FixtureConfig::from_file(&args.config)?
    } else if args.validate || !args.probe.is_empty() {
        anyhow::bail!("Fixture file not found: {:?}", args.config);
    } else {
        info!("Using empty fixture set");
        FixtureConfig::default()
    };

    if args.validate {
        println!(
            "Fixtures are valid ({} rules, {} enabled)",
            config.rules.len(),
            config.enabled_rules().count()
        );
        return Ok(());
    }

    let hooks = Arc::new(HookPoint::new());
    let registry = InterceptRegistry::with_fixtures(Arc::clone(&hooks), &config);
    let client = HttpClient::new(hooks, OfflineTransport);
    let request = RequestArgs::new(&args.method);

    for url in &args.probe {
        match client.send(url, &request) {
            Ok(resp) => {
                println!("{} {} -> {} {}", request.method, url, resp.status, resp.message);
                let mut headers: Vec<_> = resp.headers.iter().collect();
                headers.sort();
                for (name, value) in headers {
                    println!("  {}: {}", name, value);
                }
                println!("  {}", resp.body_text());
            }
            Err(InterceptError::Transport(e)) => println!("{} {} -> {}", request.method, url, e),
            Err(e) => println!("{} {} -> error: {}", request.method, url, e),
        }
    }

    info!(recorded = registry.recorded().len(), "Probes finished");
    Ok(())
}
