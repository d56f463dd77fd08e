//! Run the pipeline once for the source keys given on the command line.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*};

use vsplit_pipeline::{Pipeline, PipelineConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = vsplit_pipeline::env_filter();

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    let sources: Vec<String> = std::env::args().skip(1).collect();
    if sources.is_empty() {
        eprintln!("usage: vsplit-run <source-key>...");
        std::process::exit(2);
    }

    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Pipeline config: {:?}", config);

    let pipeline = match Pipeline::connect(config).await {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let mut failures = 0;
    for source in &sources {
        match pipeline.run(source).await {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to render report: {}", e),
            },
            Err(e) => {
                error!(source_key = %source, "Run failed: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}
