//! catstatsd - catstats query daemon
//!
//! Runs one OData-style query against the in-memory primary store and
//! metrics gateway, printing the canonical records as JSON.
//!
//! Usage:
//!   catstatsd [OPTIONS] <EntityType> [query-string]
//!
//! Without a fixture file the bundled demo dataset is loaded.

use std::path::PathBuf;
use std::sync::Arc;

use catstats_core::SchemaRegistry;
use catstats_gateway::{
    in_memory_context, Fixture, GatewayConfig, GatewayError, MemoryDataset, StatsGateway,
};
use catstats_odata::parse_query_string;
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_FIXTURE: &str = include_str!("../fixtures/demo.json");

/// Parsed command-line arguments
struct Args {
    /// Gateway config file (TOML)
    config_path: Option<PathBuf>,
    /// Dataset file, overrides `backends.fixture` from the config
    fixture_path: Option<PathBuf>,
    /// Print the plan instead of executing it
    explain: bool,
    /// Disable the metrics gateway (every metrics expand uses the fallback)
    no_metrics: bool,
    json_logs: bool,
    entity_type: Option<String>,
    query: String,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args {
        config_path: None,
        fixture_path: None,
        explain: false,
        no_metrics: false,
        json_logs: false,
        entity_type: None,
        query: String::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    result.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("Missing argument for --config");
                    i += 1;
                }
            }
            "--fixture" | "-f" => {
                if i + 1 < args.len() {
                    result.fixture_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("Missing argument for --fixture");
                    i += 1;
                }
            }
            "--explain" => {
                result.explain = true;
                i += 1;
            }
            "--no-metrics" => {
                result.no_metrics = true;
                i += 1;
            }
            "--json-logs" => {
                result.json_logs = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // First positional is the entity type, the second the query
                if result.entity_type.is_none() {
                    result.entity_type = Some(arg.to_string());
                } else {
                    result.query = arg.trim_start_matches('?').to_string();
                }
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"catstatsd - catstats query daemon

Usage: catstatsd [OPTIONS] <EntityType> [query-string]

Options:
  -c, --config <path>   Gateway config file (TOML)
  -f, --fixture <path>  Dataset file (JSON); defaults to the bundled demo data
      --explain         Print the query plan without executing it
      --no-metrics      Run without a metrics gateway (fallback path only)
      --json-logs       Emit logs as JSON lines on stderr
  -h, --help            Print this help message

Environment:
  RUST_LOG              Log filter (default: catstatsd=info,catstats_gateway=info,...)

Examples:
  # Cats with their latest stats
  catstatsd Cat '$expand=stats($startTime=2024-01-01T00:00:00Z;$endTime=2024-01-01T01:00:00Z)'

  # Cats ordered by heart rate, pushed to the metrics gateway
  catstatsd Cat '$expand=stats($startTime=2024-01-01;$statType=max)&$orderby=stats/heartRate desc&$top=2'

  # Average price per item type
  catstatsd Item '$apply=groupby((itemType),aggregate(price with average as avgPrice))'

  # Show the plan only
  catstatsd --explain Cat '$expand=owner,stats&$select=name'
"#
    );
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            "catstatsd=info,catstats_gateway=info,catstats_query=info,catstats_odata=warn".into()
        });

    // stdout carries the query output, logs go to stderr
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_logging(args.json_logs);

    let Some(entity_type) = args.entity_type.clone() else {
        print_help();
        std::process::exit(2);
    };

    let gateway = build_gateway(&args)?;

    let result = if args.explain {
        explain(&gateway, &entity_type, &args.query)
    } else {
        gateway
            .list_query_string(&entity_type, &args.query)
            .await
            .map(|output| {
                tracing::info!(
                    path = ?output.path,
                    records = output.records.len(),
                    groups = output.groups.len(),
                    "Query executed"
                );
                serde_json::to_value(output).unwrap_or_default()
            })
    };

    match result {
        Ok(json) => {
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(status = e.status_code(), error = %e, "Query failed");
            eprintln!("error ({}): {}", e.status_code(), e);
            std::process::exit(if e.is_client_error() { 2 } else { 1 });
        }
    }
}

/// Load config, schema and dataset, and wire up the in-memory backends
fn build_gateway(args: &Args) -> anyhow::Result<StatsGateway> {
    let mut config = match &args.config_path {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            GatewayConfig::from_file(path)?
        }
        None => GatewayConfig::default(),
    };
    if args.no_metrics {
        config.backends.metrics_enabled = false;
    }

    let registry: Arc<SchemaRegistry> = Arc::new(config.load_registry()?);
    tracing::info!("Loaded {} entity types", registry.len());

    let fixture = match args.fixture_path.as_ref().or(config.backends.fixture.as_ref()) {
        Some(path) => {
            tracing::info!("Loading dataset from: {}", path.display());
            Fixture::from_file(path)?
        }
        None => {
            tracing::info!("No dataset provided, using bundled demo data");
            Fixture::from_json(DEMO_FIXTURE)?
        }
    };

    let data = MemoryDataset::from_fixture(registry, &fixture);
    Ok(StatsGateway::new(in_memory_context(&data, config)))
}

/// Render the plan as JSON: primary query, metrics query and side lookups
fn explain(
    gateway: &StatsGateway,
    entity_type: &str,
    query: &str,
) -> Result<serde_json::Value, GatewayError> {
    let params = parse_query_string(query)?;
    let plan = gateway.plan(entity_type, &params, Utc::now())?;

    let side_queries: Vec<serde_json::Value> = plan
        .side_queries
        .iter()
        .map(|side| {
            serde_json::json!({
                "navigation": side.expand.navigation,
                "table": side.table,
                "keyColumn": side.key_column,
                "latestOnly": side.latest_only,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "entityType": plan.entity_type,
        "flipped": plan.is_flipped,
        "primary": serde_json::to_value(&plan.primary).unwrap_or_default(),
        "metrics": plan.metrics.as_ref().map(|m| m.query.render()),
        "sideQueries": side_queries,
        "grouped": plan.apply.is_some(),
        "warnings": plan.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
    }))
}
