use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chatbox_client::{
    HttpRequest, HttpResponse, Method, ResilientHttpClient, Transport, TransportError,
};
use chatbox_core::{
    DEFAULT_PROXY_ENDPOINT, HEADER_PLATFORM, HEADER_TARGET_URI, HEADER_VERSION, Headers,
    ProxyConfig, RoutingDecision,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<(HttpRequest, u32, bool)>>,
    fail_with: Option<u16>,
}

impl RecordingTransport {
    fn calls(&self) -> Vec<(HttpRequest, u32, bool)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn request(
        &self,
        request: HttpRequest,
        cancel: Option<&CancellationToken>,
        max_retries: u32,
    ) -> Result<HttpResponse, TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((request, max_retries, cancel.is_some()));
        if let Some(status) = self.fail_with {
            return Err(TransportError::Status {
                status,
                body: "upstream said no".to_owned(),
            });
        }
        Ok(HttpResponse {
            status: 200,
            headers: Headers::new(),
            body: Bytes::from_static(b"{\"ok\":true}"),
        })
    }
}

fn auth_headers() -> Headers {
    let mut headers = Headers::new();
    headers.insert("Authorization".to_owned(), "Bearer sk-test".to_owned());
    headers.insert("Content-Type".to_owned(), "application/json".to_owned());
    headers
}

#[tokio::test]
async fn remote_post_goes_through_the_proxy_with_correlation_headers() {
    let client = ResilientHttpClient::new(RecordingTransport::default(), ProxyConfig::default());
    let body = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});

    let response = client
        .post(
            "https://api.openai.com/v1/chat/completions",
            &auth_headers(),
            body.clone(),
            None,
        )
        .await
        .expect("post succeeds");
    assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({"ok": true}));

    let calls = client.transport().calls();
    assert_eq!(calls.len(), 1);
    let (request, retries, _) = &calls[0];
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.url, DEFAULT_PROXY_ENDPOINT);
    assert_eq!(request.body.as_ref(), Some(&body));
    assert_eq!(*retries, 3);

    let mut expected = auth_headers();
    expected.insert(
        HEADER_TARGET_URI.to_owned(),
        "https://api.openai.com/v1/chat/completions".to_owned(),
    );
    expected.insert(HEADER_PLATFORM.to_owned(), "web".to_owned());
    expected.insert(HEADER_VERSION.to_owned(), "web".to_owned());
    assert_eq!(request.headers, expected);
}

#[tokio::test]
async fn loopback_get_is_sent_directly() {
    let client = ResilientHttpClient::new(RecordingTransport::default(), ProxyConfig::default());
    let token = CancellationToken::new();

    client
        .get_with_retry(
            "http://127.0.0.1:11434/api/tags",
            &auth_headers(),
            Some(&token),
            1,
        )
        .await
        .expect("get succeeds");

    let calls = client.transport().calls();
    let (request, retries, had_cancel) = &calls[0];
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.url, "http://127.0.0.1:11434/api/tags");
    assert_eq!(request.headers, auth_headers());
    assert_eq!(request.body, None);
    assert_eq!(*retries, 1);
    assert!(*had_cancel);
}

#[tokio::test]
async fn unparsable_target_is_proxied_with_configured_identity() {
    let config = ProxyConfig {
        endpoint: "http://127.0.0.1:9000/proxy-api/completions".to_owned(),
        platform: "desktop".to_owned(),
        version: "1.4.0".to_owned(),
    };
    let client = ResilientHttpClient::new(RecordingTransport::default(), config);
    assert_eq!(
        client.routing_decision("not a url"),
        RoutingDecision::UseProxy
    );

    client
        .get("not a url", &Headers::new(), None)
        .await
        .expect("get succeeds");

    let calls = client.transport().calls();
    let (request, _, _) = &calls[0];
    assert_eq!(request.url, "http://127.0.0.1:9000/proxy-api/completions");
    assert_eq!(request.headers[HEADER_TARGET_URI], "not a url");
    assert_eq!(request.headers[HEADER_PLATFORM], "desktop");
    assert_eq!(request.headers[HEADER_VERSION], "1.4.0");
    assert_eq!(request.headers.len(), 3);
}

#[tokio::test]
async fn transport_failure_reaches_the_caller() {
    let transport = RecordingTransport {
        fail_with: Some(401),
        ..RecordingTransport::default()
    };
    let client = ResilientHttpClient::new(transport, ProxyConfig::default());

    let err = client
        .post("https://api.example.com/v1", &Headers::new(), json!({}), None)
        .await
        .expect_err("post fails");
    assert!(matches!(err, TransportError::Status { status: 401, .. }));
}
