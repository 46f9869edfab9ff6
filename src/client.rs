//! Host HTTP abstraction.
//!
//! [`HttpClient`] is the narrow slice of an HTTP library the interceptor
//! needs: it consults the [`HookPoint`] before every send and only reaches
//! the real [`Transport`] when no hook answers.

use crate::config::ResponseDescriptor;
use crate::error::InterceptError;
use crate::hook::{HookPoint, Preempt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Full argument set of an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestArgs {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    /// Further transport options (redirection limits, TLS flags, ...)
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for RequestArgs {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
            extra: HashMap::new(),
        }
    }
}

impl RequestArgs {
    /// Arguments for `method`, uppercased.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            ..Self::default()
        }
    }

    /// Arguments for a GET request.
    pub fn get() -> Self {
        Self::new("GET")
    }

    /// Arguments for a POST request.
    pub fn post() -> Self {
        Self::new("POST")
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a transport option.
    pub fn option(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8, if there is one and it decodes.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// The real network layer behind the client.
pub trait Transport: Send + Sync {
    fn send(&self, url: &str, args: &RequestArgs) -> anyhow::Result<ResponseDescriptor>;
}

/// HTTP client that runs pre-send hooks before touching the transport.
pub struct HttpClient<T> {
    hooks: Arc<HookPoint>,
    transport: T,
}

impl<T: Transport> HttpClient<T> {
    /// Create a client over `transport` that consults `hooks` first.
    pub fn new(hooks: Arc<HookPoint>, transport: T) -> Self {
        Self { hooks, transport }
    }

    pub fn hooks(&self) -> &Arc<HookPoint> {
        &self.hooks
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request. Hook errors (such as a strict-mode miss) are returned
    /// as-is and the transport is never called.
    pub fn send(&self, url: &str, args: &RequestArgs) -> Result<ResponseDescriptor, InterceptError> {
        match self.hooks.run(url, args)? {
            Preempt::Respond(response) => Ok(response),
            Preempt::NotHandled => {
                debug!(url = %url, method = %args.method, "Passing request to transport");
                Ok(self.transport.send(url, args)?)
            }
        }
    }

    /// Send a GET request.
    pub fn get(&self, url: &str) -> Result<ResponseDescriptor, InterceptError> {
        self.send(url, &RequestArgs::get())
    }

    /// Send a POST request with `body`.
    pub fn post(&self, url: &str, body: impl Into<Vec<u8>>) -> Result<ResponseDescriptor, InterceptError> {
        self.send(url, &RequestArgs::post().body(body))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Transport that answers 299 and remembers what reached it.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, url: &str, _args: &RequestArgs) -> anyhow::Result<ResponseDescriptor> {
            self.sent.lock().unwrap().push(url.to_string());
            Ok(ResponseDescriptor {
                status: 299,
                message: "Real".to_string(),
                body: b"real".to_vec(),
                ..ResponseDescriptor::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send(&self, _url: &str, _args: &RequestArgs) -> anyhow::Result<ResponseDescriptor> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_request_args_builder() {
        let args = RequestArgs::new("post")
            .header("Content-Type", "application/json")
            .body("{}")
            .timeout(Duration::from_secs(5))
            .option("redirection", serde_json::json!(3));
        assert_eq!(args.method, "POST");
        assert_eq!(args.header_value("content-type"), Some("application/json"));
        assert_eq!(args.body_str(), Some("{}"));
        assert_eq!(args.timeout, Some(Duration::from_secs(5)));
        assert_eq!(args.extra["redirection"], 3);
    }

    #[test]
    fn test_passthrough_without_hooks() {
        let client = HttpClient::new(Arc::new(HookPoint::new()), RecordingTransport::default());
        let resp = client.get("https://a.test/x").unwrap();
        assert_eq!(resp.status, 299);
        assert_eq!(client.transport().sent(), vec!["https://a.test/x".to_string()]);
    }

    #[test]
    fn test_hook_answer_skips_transport() {
        let hooks = Arc::new(HookPoint::new());
        hooks.install(Arc::new(
            |_: &str, _: &RequestArgs| -> Result<Preempt, InterceptError> {
                Ok(Preempt::Respond(ResponseDescriptor::default()))
            },
        ));
        let client = HttpClient::new(hooks, RecordingTransport::default());

        let resp = client.post("https://a.test/x", "payload").unwrap();
        assert_eq!(resp.status, 200);
        assert!(client.transport().sent().is_empty());
    }

    #[test]
    fn test_transport_error_is_wrapped() {
        let client = HttpClient::new(Arc::new(HookPoint::new()), FailingTransport);
        let err = client.get("https://a.test").unwrap_err();
        assert!(matches!(err, InterceptError::Transport(_)));
    }
}
