//! ajp-connector command line
//!
//! Drives a connector context from a `workers.properties` file without a
//! host web server: validate a configuration, resolve a URI, forward one
//! request to the backend, or print the worker status snapshot.
//!
//! Logs go to stderr at `log.level` (overridable with `RUST_LOG`); results
//! are printed to stdout as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use ajp_connector::config::{load_properties, validate};
use ajp_connector::{BufferedExchange, ConnectorContext, RequestDescriptor};

#[derive(Parser)]
#[command(name = "ajp-connector")]
#[command(about = "AJP13 connector: routing, load balancing and backend transport", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and summarize workers and mounts
    Check {
        /// Path to workers.properties
        config: PathBuf,
    },
    /// Show which worker serves a URI
    Route {
        config: PathBuf,
        uri: String,
    },
    /// Forward one request to its worker and print the response
    Forward {
        config: PathBuf,
        uri: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header as `name:value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query string without the leading `?`
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Print the status of every worker
    Status {
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Check { config } => {
            let props = load_properties(&config)?;
            if let Err(errors) = validate(&props) {
                for error in &errors {
                    eprintln!("  {}", error);
                }
                print_json(&json!({
                    "valid": false,
                    "errors": errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                }))?;
                return Ok(ExitCode::FAILURE);
            }

            let ctx = ConnectorContext::from_properties(&props)?;
            let table = ctx.uri_map().table();
            let mounts: Vec<Value> = table
                .all_rules()
                .iter()
                .map(|rule| {
                    json!({
                        "pattern": rule.pattern(),
                        "kind": rule.kind(),
                        "worker": rule.worker().to_string(),
                        "exclusion": rule.is_no_match(),
                        "disabled": rule.is_disabled(),
                    })
                })
                .collect();
            print_json(&json!({
                "valid": true,
                "workers": ctx.status(),
                "mounts": mounts,
            }))?;
        }
        Commands::Route { config, uri } => {
            let ctx = ConnectorContext::load(&config)?;
            let resolution = tracing::dispatcher::with_default(ctx.dispatch(), || ctx.uri_map().resolve(&uri));
            let found = resolution.is_some();
            print_json(&match resolution {
                Some(r) => json!({
                    "uri": uri,
                    "worker": r.worker.to_string(),
                    "kind": r.kind,
                    "context_len": r.context_len,
                    "fraud": r.fraud,
                }),
                None => json!({ "uri": uri, "worker": null }),
            })?;
            if !found {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Forward {
            config,
            uri,
            method,
            headers,
            data,
            query,
        } => {
            let ctx = ConnectorContext::load(&config)?;

            let mut req = RequestDescriptor::new(method, uri);
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| format!("header {:?} is not name:value", header))?;
                req = req.with_header(name.trim(), value.trim());
            }
            if let Some(query) = query {
                req = req.with_query(query);
            }
            let body = data.unwrap_or_default().into_bytes();
            if !body.is_empty() && req.content_length().is_none() {
                req = req.with_header("Content-Length", body.len().to_string());
            }

            let mut exchange = BufferedExchange::new(body);
            let status = ctx.service(&req, &mut exchange);
            let headers: Vec<Value> = exchange
                .headers
                .iter()
                .map(|(name, value)| json!([name, value]))
                .collect();
            print_json(&json!({
                "status": status,
                "reason": exchange.reason,
                "headers": headers,
                "body": exchange.body_text(),
            }))?;
            if !(200..400).contains(&status) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status { config } => {
            let ctx = ConnectorContext::load(&config)?;
            print_json(&json!({ "workers": ctx.status() }))?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
