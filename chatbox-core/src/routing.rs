use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_PROXY_ENDPOINT: &str = "http://localhost:8080/proxy-api/completions";
pub const PROXY_PATH: &str = "/proxy-api/completions";

pub const HEADER_TARGET_URI: &str = "CHATBOX-TARGET-URI";
pub const HEADER_PLATFORM: &str = "CHATBOX-PLATFORM";
pub const HEADER_VERSION: &str = "CHATBOX-VERSION";

const CORRELATION_HEADERS: [&str; 3] = [HEADER_TARGET_URI, HEADER_PLATFORM, HEADER_VERSION];

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    UseDirect,
    UseProxy,
}

/// Loopback targets are called directly; everything else, including input
/// that does not parse as an absolute URL, goes through the proxy.
#[must_use]
pub fn routing_decision(target: &str) -> RoutingDecision {
    match Url::parse(target) {
        Ok(url) if url.host_str().is_some_and(is_loopback_host) => RoutingDecision::UseDirect,
        _ => RoutingDecision::UseProxy,
    }
}

#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1"
}

#[must_use]
pub fn is_correlation_header(name: &str) -> bool {
    CORRELATION_HEADERS
        .iter()
        .any(|header| header.eq_ignore_ascii_case(name))
}

/// Where proxied requests go and how they identify the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub endpoint: String,
    pub platform: String,
    pub version: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PROXY_ENDPOINT.to_owned(),
            platform: "web".to_owned(),
            version: "web".to_owned(),
        }
    }
}

impl ProxyConfig {
    /// `headers` plus the three correlation headers. Caller headers that
    /// collide with a correlation header (in any case) are replaced.
    #[must_use]
    pub fn proxy_headers(&self, target: &str, headers: &Headers) -> Headers {
        let mut out: Headers = headers
            .iter()
            .filter(|(name, _)| !is_correlation_header(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        out.insert(HEADER_TARGET_URI.to_owned(), target.to_owned());
        out.insert(HEADER_PLATFORM.to_owned(), self.platform.clone());
        out.insert(HEADER_VERSION.to_owned(), self.version.clone());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_targets_are_direct() {
        assert_eq!(
            routing_decision("http://localhost:3000/x"),
            RoutingDecision::UseDirect
        );
        assert_eq!(
            routing_decision("http://127.0.0.1:1/x"),
            RoutingDecision::UseDirect
        );
        assert_eq!(
            routing_decision("HTTP://LocalHost/v1/chat"),
            RoutingDecision::UseDirect
        );
    }

    #[test]
    fn everything_else_is_proxied() {
        for target in [
            "https://api.example.com/v1",
            "not a url",
            "",
            "/relative/path",
            "mailto:someone@localhost",
            "http://localhost.example.com/v1",
            "http://127.0.0.2/v1",
        ] {
            assert_eq!(
                routing_decision(target),
                RoutingDecision::UseProxy,
                "{target}"
            );
        }
    }

    #[test]
    fn proxy_headers_add_exactly_three_correlation_headers() {
        let config = ProxyConfig {
            endpoint: DEFAULT_PROXY_ENDPOINT.to_owned(),
            platform: "desktop".to_owned(),
            version: "1.2.3".to_owned(),
        };
        let mut headers = Headers::new();
        headers.insert("Authorization".to_owned(), "Bearer sk".to_owned());
        headers.insert("chatbox-platform".to_owned(), "spoofed".to_owned());

        let out = config.proxy_headers("https://api.openai.com/v1/chat", &headers);
        assert_eq!(out.len(), 4);
        assert_eq!(out["Authorization"], "Bearer sk");
        assert_eq!(out[HEADER_TARGET_URI], "https://api.openai.com/v1/chat");
        assert_eq!(out[HEADER_PLATFORM], "desktop");
        assert_eq!(out[HEADER_VERSION], "1.2.3");
        assert!(!out.contains_key("chatbox-platform"));
    }
}
