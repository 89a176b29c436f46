use std::time::Duration;

/// Immutable configuration captured when a [`crate::HubConnection`] is built.
#[derive(Debug, Clone)]
pub struct HubConnectionOptions {
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub reconnect: bool,
    pub tls_verify: bool,
    pub server_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub handshake_timeout: Duration,
}

impl HubConnectionOptions {
    pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
}

/// Builds a [`crate::HubConnection`]'s [`HubConnectionOptions`].
///
/// ```no_run
/// # use signalr_client::HubConnectionBuilder;
/// let options = HubConnectionBuilder::new("https://example.com/hubs/chat")
///     .reconnect(true)
///     .header("X-Api-Key", "secret")
///     .build();
/// ```
pub struct HubConnectionBuilder {
    uri: String,
    headers: Vec<(String, String)>,
    reconnect: bool,
    tls_verify: bool,
    server_timeout: Duration,
    keep_alive_interval: Duration,
    handshake_timeout: Duration,
}

impl HubConnectionBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: normalize_uri(&uri.into()),
            headers: Vec::new(),
            reconnect: false,
            tls_verify: true,
            server_timeout: HubConnectionOptions::DEFAULT_SERVER_TIMEOUT,
            keep_alive_interval: HubConnectionOptions::DEFAULT_KEEP_ALIVE_INTERVAL,
            handshake_timeout: HubConnectionOptions::DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }

    pub fn tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn build(self) -> HubConnectionOptions {
        HubConnectionOptions {
            uri: self.uri,
            headers: self.headers,
            reconnect: self.reconnect,
            tls_verify: self.tls_verify,
            server_timeout: self.server_timeout,
            keep_alive_interval: self.keep_alive_interval,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

/// Lowercase the scheme for detection only, then rewrite `http(s)://` to
/// `ws(s)://`; any other scheme passes through untouched.
fn normalize_uri(uri: &str) -> String {
    let lower = uri.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("https://") {
        format!("wss://{}", &uri[uri.len() - rest.len()..])
    } else if let Some(rest) = lower.strip_prefix("http://") {
        format!("ws://{}", &uri[uri.len() - rest.len()..])
    } else {
        uri.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_uri_rewrites_http_and_https() {
        assert_eq!(normalize_uri("http://example.com/hub"), "ws://example.com/hub");
        assert_eq!(
            normalize_uri("HTTPS://Example.com/Hub"),
            "wss://Example.com/Hub"
        );
    }

    #[test]
    fn normalize_uri_leaves_other_schemes_untouched() {
        assert_eq!(normalize_uri("ws://example.com/hub"), "ws://example.com/hub");
        assert_eq!(
            normalize_uri("wss://example.com/hub"),
            "wss://example.com/hub"
        );
    }

    #[test]
    fn builder_applies_defaults() {
        let options = HubConnectionBuilder::new("http://localhost:5000/chat").build();
        assert_eq!(options.uri, "ws://localhost:5000/chat");
        assert!(!options.reconnect);
        assert_eq!(options.server_timeout, Duration::from_secs(30));
        assert_eq!(options.keep_alive_interval, Duration::from_secs(15));
        assert_eq!(options.handshake_timeout, Duration::from_secs(15));
    }

    #[test]
    fn builder_overrides_are_applied() {
        let options = HubConnectionBuilder::new("https://example.com/hub")
            .reconnect(true)
            .header("Authorization", "Bearer xyz")
            .server_timeout(Duration::from_secs(5))
            .build();
        assert!(options.reconnect);
        assert_eq!(options.headers, vec![("Authorization".to_owned(), "Bearer xyz".to_owned())]);
        assert_eq!(options.server_timeout, Duration::from_secs(5));
    }
}
