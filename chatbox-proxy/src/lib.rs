use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use chatbox_core::{
    HEADER_PLATFORM, HEADER_TARGET_URI, HEADER_VERSION, PROXY_PATH, is_correlation_header,
};
use futures::StreamExt;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);
/// Origins of the web front-end dev server.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:1212", "http://127.0.0.1:1212"];

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub upstream_timeout: Duration,
    pub body_limit: usize,
    /// Browser origins allowed to read proxied responses. `*` allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            body_limit: DEFAULT_BODY_LIMIT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.map(str::to_owned).to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    client: reqwest::Client,
    body_limit: usize,
    allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(settings: &ProxySettings) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(settings.upstream_timeout)
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            client,
            body_limit: settings.body_limit,
            allowed_origins: settings.allowed_origins.clone(),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route(PROXY_PATH, any(forward_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid allowed origin {:?}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "proxy listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn forward_handler(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, StatusCode> {
    let (parts, body) = req.into_parts();

    let target = parse_target(&parts.headers)?;
    let platform = header_text(&parts.headers, HEADER_PLATFORM).unwrap_or("unknown");
    let version = header_text(&parts.headers, HEADER_VERSION).unwrap_or("unknown");
    info!(
        method = %parts.method,
        target_uri = %target,
        platform,
        version,
        "forwarding request"
    );

    let body_bytes = to_bytes(body, state.body_limit).await.map_err(|err| {
        warn!("request body rejected: {}", err);
        StatusCode::PAYLOAD_TOO_LARGE
    })?;

    let mut builder = state.client.request(parts.method.clone(), target.clone());
    for (name, value) in parts.headers.iter() {
        if !should_forward(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if !body_bytes.is_empty() {
        builder = builder.body(body_bytes);
    }

    let response = builder.send().await.map_err(|err| {
        warn!(target_uri = %target, "upstream request failed: {}", err);
        StatusCode::BAD_GATEWAY
    })?;

    let status = response.status();
    info!(target_uri = %target, status = status.as_u16(), "upstream responded");
    let mut resp_builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        if *name == header::CONNECTION {
            continue;
        }
        resp_builder = resp_builder.header(name, value);
    }

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other));
    resp_builder
        .body(Body::from_stream(stream))
        .map_err(|_| StatusCode::BAD_GATEWAY)
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name.to_ascii_lowercase())
        .and_then(|value| value.to_str().ok())
}

fn parse_target(headers: &HeaderMap) -> Result<Url, StatusCode> {
    let Some(raw) = header_text(headers, HEADER_TARGET_URI) else {
        warn!("proxy request without {} header", HEADER_TARGET_URI);
        return Err(StatusCode::BAD_REQUEST);
    };
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        Ok(url) => {
            warn!("refusing to proxy {} target {}", url.scheme(), raw);
            Err(StatusCode::BAD_REQUEST)
        }
        Err(err) => {
            warn!("invalid proxy target {:?}: {}", raw, err);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

fn should_forward(name: &HeaderName) -> bool {
    !(is_correlation_header(name.as_str())
        || *name == header::HOST
        || *name == header::CONTENT_LENGTH
        || *name == header::CONNECTION)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn correlation_and_hop_headers_are_not_forwarded() {
        assert!(!should_forward(&HeaderName::from_static("chatbox-target-uri")));
        assert!(!should_forward(&HeaderName::from_static("chatbox-platform")));
        assert!(!should_forward(&HeaderName::from_static("chatbox-version")));
        assert!(!should_forward(&header::HOST));
        assert!(!should_forward(&header::CONTENT_LENGTH));
        assert!(should_forward(&header::AUTHORIZATION));
        assert!(should_forward(&header::CONTENT_TYPE));
    }

    #[test]
    fn target_must_be_http() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_target(&headers), Err(StatusCode::BAD_REQUEST));

        headers.insert("chatbox-target-uri", HeaderValue::from_static("ftp://example.com/x"));
        assert_eq!(parse_target(&headers), Err(StatusCode::BAD_REQUEST));

        headers.insert("chatbox-target-uri", HeaderValue::from_static("not a url"));
        assert_eq!(parse_target(&headers), Err(StatusCode::BAD_REQUEST));

        headers.insert(
            "chatbox-target-uri",
            HeaderValue::from_static("https://api.openai.com/v1/models"),
        );
        assert_eq!(
            parse_target(&headers).map(|url| url.host_str().map(str::to_owned)),
            Ok(Some("api.openai.com".to_owned()))
        );
    }
}
