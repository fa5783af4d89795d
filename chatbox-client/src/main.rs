use std::{path::PathBuf, process::ExitCode, time::Duration};

use chatbox_client::{FileStorage, ResilientHttpClient, ReqwestTransport, RetryPolicy};
use chatbox_core::{
    DEFAULT_PROXY_ENDPOINT, Headers, KeyValueStore, Outcome, ProxyConfig, RoutingDecision,
    StoreKey,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const STORAGE_FILE_NAME: &str = "storage.json";

#[derive(Parser, Debug)]
#[command(name = "chatbox", about = "Inspect chat storage and call LLM APIs through the proxy")]
struct ClientArgs {
    /// Directory holding storage.json.
    #[arg(long, env = "CHATBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[arg(long, env = "CHATBOX_PROXY_ENDPOINT", default_value = DEFAULT_PROXY_ENDPOINT)]
    proxy_endpoint: String,
    #[arg(long, default_value = "web")]
    platform: String,
    #[arg(long = "version-tag", default_value = "web")]
    version_tag: String,
    #[command(subcommand)]
    command: ClientCommand,
}

#[derive(Subcommand, Debug)]
enum ClientCommand {
    /// Print the value stored under a key (e.g. settings, chat_sessions, store_theme).
    Get { key: String },
    /// Store a JSON value under a key.
    Set { key: String, value: String },
    /// Delete a key; settings, chat_sessions and my_copilots are reset instead.
    Delete { key: String },
    /// List app state names under the store_ prefix.
    Keys,
    /// Show whether a URL would be called directly or through the proxy.
    Route { url: String },
    /// POST a JSON body to a target URL.
    Post {
        url: String,
        body: String,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(long, default_value_t = chatbox_client::DEFAULT_RETRY)]
        retry: u32,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// GET a target URL.
    Fetch {
        url: String,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(long, default_value_t = chatbox_client::DEFAULT_RETRY)]
        retry: u32,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = ClientArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ClientArgs) -> Result<(), String> {
    let config = ProxyConfig {
        endpoint: args.proxy_endpoint.clone(),
        platform: args.platform.clone(),
        version: args.version_tag.clone(),
    };

    match args.command {
        ClientCommand::Route { url } => {
            let decision = match chatbox_core::routing_decision(&url) {
                RoutingDecision::UseDirect => "direct",
                RoutingDecision::UseProxy => "proxy",
            };
            println!("{decision}");
            Ok(())
        }
        ClientCommand::Post {
            url,
            body,
            headers,
            retry,
            timeout_secs,
        } => {
            let body: Value =
                serde_json::from_str(&body).map_err(|err| format!("body is not JSON: {err}"))?;
            let headers = parse_headers(&headers)?;
            let client = http_client(config, timeout_secs)?;
            let cancel = cancel_on_ctrl_c();
            let response = client
                .post_with_retry(&url, &headers, body, Some(&cancel), retry)
                .await
                .map_err(|err| err.to_string())?;
            info!(status = response.status, "request finished");
            println!("{}", response.text());
            Ok(())
        }
        ClientCommand::Fetch {
            url,
            headers,
            retry,
            timeout_secs,
        } => {
            let headers = parse_headers(&headers)?;
            let client = http_client(config, timeout_secs)?;
            let cancel = cancel_on_ctrl_c();
            let response = client
                .get_with_retry(&url, &headers, Some(&cancel), retry)
                .await
                .map_err(|err| err.to_string())?;
            info!(status = response.status, "request finished");
            println!("{}", response.text());
            Ok(())
        }
        command => {
            let store = open_store(args.data_dir)?;
            run_store_command(&store, command)
        }
    }
}

fn run_store_command(
    store: &KeyValueStore<FileStorage>,
    command: ClientCommand,
) -> Result<(), String> {
    match command {
        ClientCommand::Get { key } => {
            let value = report(&key, store.get(&StoreKey::from_name(&key)))?;
            print_json(&value)
        }
        ClientCommand::Set { key, value } => {
            let value: Value =
                serde_json::from_str(&value).map_err(|err| format!("value is not JSON: {err}"))?;
            let persisted = report(&key, store.set(&StoreKey::from_name(&key), value))?;
            print_json(&persisted)
        }
        ClientCommand::Delete { key } => {
            let remaining = report(&key, store.delete(&StoreKey::from_name(&key)))?;
            if !remaining.is_null() {
                print_json(&remaining)?;
            }
            Ok(())
        }
        ClientCommand::Keys => {
            for name in store.store_keys().map_err(|err| err.to_string())? {
                println!("{name}");
            }
            Ok(())
        }
        _ => Err("not a storage command".to_owned()),
    }
}

fn report(key: &str, outcome: Outcome<Value>) -> Result<Value, String> {
    match outcome {
        Outcome::Ok(value) => Ok(value),
        Outcome::Defaulted { value, reason } => {
            warn!(key, "using default: {}", reason);
            Ok(value)
        }
        Outcome::Fault(err) => Err(format!("{key}: {err}")),
    }
}

fn print_json(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
    println!("{text}");
    Ok(())
}

fn open_store(data_dir: Option<PathBuf>) -> Result<KeyValueStore<FileStorage>, String> {
    let dir = data_dir.unwrap_or_else(default_data_dir);
    let storage = FileStorage::open(dir.join(STORAGE_FILE_NAME))
        .map_err(|err| format!("failed to open storage in {}: {err}", dir.display()))?;
    Ok(KeyValueStore::new(storage))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatbox")
}

fn http_client(
    config: ProxyConfig,
    timeout_secs: Option<u64>,
) -> Result<ResilientHttpClient<ReqwestTransport>, String> {
    let policy = RetryPolicy {
        attempt_timeout: timeout_secs.map(Duration::from_secs),
        ..RetryPolicy::default()
    };
    let transport = ReqwestTransport::new(policy).map_err(|err| err.to_string())?;
    Ok(ResilientHttpClient::new(transport, config))
}

fn parse_headers(raw: &[String]) -> Result<Headers, String> {
    raw.iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| format!("header must look like 'Name: value', got {header:?}"))
        })
        .collect()
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling request");
            child.cancel();
        }
    });
    token
}
