use std::time::Duration;

use chatbox_proxy::{AppState, DEFAULT_ALLOWED_ORIGINS, DEFAULT_BODY_LIMIT, ProxySettings, serve};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "chatbox-proxy")]
struct ProxyArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind_address: String,
    #[arg(long, default_value_t = 300)]
    upstream_timeout_secs: u64,
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT)]
    body_limit_bytes: usize,
    /// Browser origin allowed to call the proxy; repeat for more, `*` for any.
    #[arg(long = "allowed-origin", default_values = DEFAULT_ALLOWED_ORIGINS)]
    allowed_origins: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ProxyArgs::parse();
    let settings = ProxySettings {
        upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
        body_limit: args.body_limit_bytes,
        allowed_origins: args.allowed_origins,
    };
    let state = match AppState::new(&settings) {
        Ok(state) => state,
        Err(err) => {
            error!("failed to build upstream client: {}", err);
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!("proxy starting on {}", args.bind_address);
    if let Err(err) = serve(listener, state).await {
        warn!("proxy server exited: {}", err);
    }
}
