//! calcframe API Server binary
//!
//! HTTP REST API for evaluating, validating and translating formulas.

use calcframe::api::{run_api_server, ApiConfig};
use calcframe::types::EngineOptions;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "calcframe-server")]
#[command(version)]
#[command(author = "RoyalBit Inc. <admin@royalbit.ca>")]
#[command(about = "calcframe API Server - HTTP REST API for formula evaluation")]
#[command(long_about = r#"
calcframe API Server - HTTP REST API

Provides RESTful endpoints for the formula engine:
  - POST /api/v1/evaluate  - Evaluate a formula session
  - POST /api/v1/validate  - Check that a formula compiles
  - POST /api/v1/translate - Rewrite a formula between field spellings

Additional endpoints:
  - GET  /health           - Health check
  - GET  /version          - Server version info
  - GET  /                 - API documentation

Features:
  - CORS enabled for cross-origin requests
  - Graceful shutdown on SIGINT/SIGTERM
  - JSON response format with request IDs
  - Tracing and structured logging

Example usage:
  calcframe-server                           # Start on localhost:8080
  calcframe-server --host 0.0.0.0 --port 3000

  curl -X POST http://localhost:8080/api/v1/evaluate \
    -H "Content-Type: application/json" \
    -d '{"formula": "Sales * 2", "fields": [{"id": "sales", "label": "Sales"}],
         "rows": [{"sales": 21}]}'
"#)]
struct Args {
    /// Host address to bind to (use 0.0.0.0 for all interfaces)
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "CALCFRAME_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "CALCFRAME_PORT")]
    port: u16,

    /// Default step budget per row evaluation
    #[arg(long, env = "CALCFRAME_MAX_STEPS")]
    max_steps: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut options = EngineOptions::default();
    if args.max_steps.is_some() {
        options.max_steps = args.max_steps;
    }

    let config = ApiConfig {
        host: args.host,
        port: args.port,
        options,
    };

    run_api_server(config).await
}
