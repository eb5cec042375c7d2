//! Jobwatch CLI
//!
//! Serves the job submission API, the live `/ws` state feed and the image
//! proxy from one listener.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use jobwatch_orchestrator::{
    create_router, AppState, Config, JobwatchError, MemoryJobStore, Submitted,
};
use jobwatch_proxy::router_from_config;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Jobwatch - submit a URL job and watch its result arrive live
#[derive(Parser, Debug)]
#[command(name = "jobwatch")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: jobwatch.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port for the HTTP server
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Submit this URL as soon as the server is up
    #[arg(short, long, value_name = "URL")]
    submit: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Jobwatch starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Exit status for a failed run: 2 when the server could not start, 1 otherwise.
fn exit_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<JobwatchError>() {
        Some(e) if e.is_fatal() => 2,
        _ => 1,
    }
}

/// Loads config, starts the server and blocks until Ctrl+C.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref host) = args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let proxy = router_from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to build image proxy: {e}"))?;

    let store = Arc::new(MemoryJobStore::new());
    let app_state = AppState::new(config.clone(), store);
    let orchestrator = app_state.orchestrator.clone();
    let router = create_router(app_state).merge(proxy);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");
    println!();

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    if let Some(url) = args.submit {
        match orchestrator.submit(url).await {
            Ok(submitted) => print_submitted(&submitted),
            Err(e) => {
                tracing::warn!(error = %e, "Initial submission failed");
                println!("Submission failed: {e}");
            }
        }
    }

    let served = server.await;

    println!();
    println!("Shutting down...");

    if let Err(e) = orchestrator.shutdown().await {
        tracing::warn!(error = %e, "Orchestrator already stopped");
    }

    served
        .map_err(|e| anyhow::anyhow!("HTTP server task failed: {e}"))?
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Ok(Config::load_from_file(path)?)
        }
        None => Ok(Config::load()?),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

fn print_config(config: &Config) {
    println!("Configuration:");
    println!("  Allowed domains: {}", config.allowed_domains.join(", "));
    println!("  Listen address:  {}", config.bind_address());
    println!(
        "  Proxy timeouts:  connect {}s, request {}s",
        config.proxy.connect_timeout_secs, config.proxy.request_timeout_secs
    );
    println!(
        "  Proxy limits:    {} bytes, {} redirects",
        config.proxy.max_image_bytes, config.proxy.max_redirects
    );
}

fn print_submitted(submitted: &Submitted) {
    println!("Submitted job {} ({})", submitted.job.id, submitted.job.url);
    println!("  Phase: {}", submitted.state.phase);
    if let Some(ref error) = submitted.state.display_error {
        println!("  Error: {error}");
    }
}
