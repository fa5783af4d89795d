use chatbox_core::{Headers, ProxyConfig, RoutingDecision, routing_decision};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

pub const DEFAULT_RETRY: u32 = 3;

/// HTTP client for LLM provider APIs.
///
/// Requests to loopback hosts go straight to the target. Everything else is
/// sent to the proxy endpoint, which forwards it to the URI named in the
/// `CHATBOX-TARGET-URI` header. Retry and cancellation are left to the
/// transport.
#[derive(Debug, Clone)]
pub struct ResilientHttpClient<T> {
    transport: T,
    config: ProxyConfig,
}

impl<T: Transport> ResilientHttpClient<T> {
    pub fn new(transport: T, config: ProxyConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn routing_decision(&self, target: &str) -> RoutingDecision {
        routing_decision(target)
    }

    pub async fn post(
        &self,
        target: &str,
        headers: &Headers,
        body: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, TransportError> {
        self.post_with_retry(target, headers, body, cancel, DEFAULT_RETRY)
            .await
    }

    pub async fn post_with_retry(
        &self,
        target: &str,
        headers: &Headers,
        body: Value,
        cancel: Option<&CancellationToken>,
        retry: u32,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.route(Method::Post, target, headers, Some(body));
        self.transport.request(request, cancel, retry).await
    }

    pub async fn get(
        &self,
        target: &str,
        headers: &Headers,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, TransportError> {
        self.get_with_retry(target, headers, cancel, DEFAULT_RETRY)
            .await
    }

    pub async fn get_with_retry(
        &self,
        target: &str,
        headers: &Headers,
        cancel: Option<&CancellationToken>,
        retry: u32,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.route(Method::Get, target, headers, None);
        self.transport.request(request, cancel, retry).await
    }

    fn route(
        &self,
        method: Method,
        target: &str,
        headers: &Headers,
        body: Option<Value>,
    ) -> HttpRequest {
        match routing_decision(target) {
            RoutingDecision::UseDirect => {
                debug!(target_uri = target, "calling loopback target directly");
                HttpRequest {
                    method,
                    url: target.to_owned(),
                    headers: headers.clone(),
                    body,
                }
            }
            RoutingDecision::UseProxy => {
                debug!(
                    target_uri = target,
                    endpoint = %self.config.endpoint,
                    "routing through proxy"
                );
                HttpRequest {
                    method,
                    url: self.config.endpoint.clone(),
                    headers: self.config.proxy_headers(target, headers),
                    body,
                }
            }
        }
    }
}
