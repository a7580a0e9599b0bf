//! nlsql-server - Main entry point.
//!
//! Serves `/ask`, `/health` and `/` over HTTP while a background task waits
//! for the generation backend and makes sure the model is present.

use clap::Parser;
use nlsql_server::config::Config;
use nlsql_server::db::SqlGateway;
use nlsql_server::http::{self, HttpServer};
use nlsql_server::llm::{OllamaClient, readiness};
use nlsql_server::orchestrator::QueryOrchestrator;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        model = %config.model_name,
        ollama_url = %config.ollama_url,
        strict_sql = config.strict_sql,
        "Starting nlsql-server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let gateway = SqlGateway::new(config.gateway_settings()?)?;
    let backend = Arc::new(OllamaClient::new(config.backend_settings())?);
    let classifier = config.classifier()?;

    // The server starts right away; /health reports progress until ready
    let startup = readiness::spawn(backend.clone(), config.startup_settings());

    let orchestrator = QueryOrchestrator::new(backend, gateway, config.orchestrator_settings()?)
        .with_classifier(classifier)
        .with_readiness(startup.subscribe());
    info!(
        classifier = orchestrator.classifier_name(),
        max_question_chars = orchestrator.settings().max_question_chars,
        "Query pipeline ready"
    );

    let app = http::router(Arc::new(orchestrator));
    let server = HttpServer::new(&config.host, config.port);
    let result = server.run(app).await;

    if !startup.is_finished() {
        info!(state = %startup.current(), "Cancelling startup routine");
        startup.abort();
    }

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
