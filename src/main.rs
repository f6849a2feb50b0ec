//! Entry point: load config, start the worker session, optionally serve the status surface.

use std::sync::Arc;

use clap::Parser;
use relay_worker::config::Config;
use relay_worker::models::WorkerStatus;
use relay_worker::services::MessageFn;
use relay_worker::{create_app, AppState, Supervisor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "relay-worker", about = "Serve platform inference jobs from a local LLM")]
struct Cli {
    /// Model name (env WORKER_MODEL)
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Worker API key (env WORKER_API_KEY)
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Worker ID salt; generated when unset (env WORKER_SALT)
    #[arg(short = 's', long)]
    salt: Option<String>,

    /// URL of the socket server (env WORKER_URL_SERVER)
    #[arg(long)]
    url_server: Option<String>,

    /// URL of the LLM server (env WORKER_URL_LLM)
    #[arg(long)]
    url_llm: Option<String>,

    /// Bind address for the status surface, e.g. 127.0.0.1:7070 (env STATUS_ADDR)
    #[arg(long)]
    status_addr: Option<String>,

    /// Log level (env LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn flag(&self, key: &str) -> Option<String> {
        match key {
            "WORKER_MODEL" => self.model.clone(),
            "WORKER_API_KEY" => self.api_key.clone(),
            "WORKER_SALT" => self.salt.clone(),
            "WORKER_URL_SERVER" => self.url_server.clone(),
            "WORKER_URL_LLM" => self.url_llm.clone(),
            "STATUS_ADDR" => self.status_addr.clone(),
            "LOG_LEVEL" => self.log_level.clone(),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_lookup(|key| cli.flag(key).or_else(|| std::env::var(key).ok()))
        .map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let message_fn: MessageFn = Arc::new(|message: &str, status: Option<WorkerStatus>| {
        match status {
            Some(status) => println!("LOG: {} [{}]", message, status.as_str()),
            None => println!("LOG: {}", message),
        }
    });
    let supervisor = Supervisor::from_config(&config, message_fn)?;

    if let Some(addr) = config.status_addr {
        let app = create_app(AppState::new(supervisor.control()));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "status surface listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "status surface stopped");
            }
        });
    }

    let handle = supervisor.start(config.session.clone());
    let abort = handle.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    handle.wait().await?;
    Ok(())
}
