//! Synthetic inbound requests.
//!
//! Runs a router once against a faked incoming request. The ambient
//! request state is rewritten for the call and restored afterwards, also
//! when the router returns an error or panics.

use crate::matcher::parse_query_string;
use crate::response::TestResponse;
use std::collections::HashMap;
use tracing::debug;

/// Methods whose data is exposed as form fields.
const FORM_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Ambient per-request globals seen by the router.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestState {
    /// Server variables (`REQUEST_METHOD`, `REQUEST_URI`, header entries, ...)
    pub server: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Form fields
    pub form: HashMap<String, String>,
    /// Query and form fields combined
    pub request: HashMap<String, String>,
}

/// Output produced by one routing pass.
#[derive(Debug, Default)]
pub struct ResponseCapture {
    /// Buffered output
    pub body: String,
    /// Status set by the router, 200 when unset
    pub status: Option<u16>,
    /// Raw `Name: value` header lines
    pub headers: Vec<String>,
}

impl ResponseCapture {
    /// Append to the buffered output.
    pub fn write(&mut self, output: &str) {
        self.body.push_str(output);
    }

    /// Set the response status.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Emit a raw `Name: value` header line.
    pub fn header(&mut self, line: impl Into<String>) {
        self.headers.push(line.into());
    }

    fn parsed_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect()
    }
}

/// The host entry point that handles a request.
pub trait Router {
    fn dispatch(&mut self, state: &RequestState, out: &mut ResponseCapture) -> anyhow::Result<()>;
}

impl<F> Router for F
where
    F: FnMut(&RequestState, &mut ResponseCapture) -> anyhow::Result<()>,
{
    fn dispatch(&mut self, state: &RequestState, out: &mut ResponseCapture) -> anyhow::Result<()> {
        self(state, out)
    }
}

/// A faked incoming request.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub method: String,
    pub uri: String,
    pub data: HashMap<String, String>,
    /// Copied into server variables as-is
    pub headers: HashMap<String, String>,
}

impl InboundRequest {
    /// Create a request for `method` and `uri`.
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            uri: uri.into(),
            data: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new("POST", uri)
    }

    pub fn put(uri: impl Into<String>) -> Self {
        Self::new("PUT", uri)
    }

    pub fn patch(uri: impl Into<String>) -> Self {
        Self::new("PATCH", uri)
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new("DELETE", uri)
    }

    /// Add a data field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Mark the request as coming from `referer`.
    pub fn from(self, referer: impl Into<String>) -> Self {
        self.header("HTTP_REFERER", referer)
    }

    fn apply(&self, state: &mut RequestState) {
        for (name, value) in &self.headers {
            state.server.insert(name.clone(), value.clone());
        }

        let (path, query) = split_uri(&self.uri);
        state.server.insert("REQUEST_METHOD".into(), self.method.clone());
        state.server.insert("REQUEST_URI".into(), self.uri.clone());
        state.server.insert("PATH_INFO".into(), path.to_string());
        state
            .server
            .insert("QUERY_STRING".into(), query.unwrap_or_default().to_string());

        if let Some(query) = query {
            let params = parse_query_string(query);
            state.query.extend(params.clone());
            state.request.extend(params);
        }

        if FORM_METHODS.contains(&self.method.as_str()) {
            state.form = self.data.clone();
            state.request = state.query.clone();
            state
                .request
                .extend(state.form.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}

/// Path and query string of a URI, absolute or relative.
fn split_uri(uri: &str) -> (&str, Option<&str>) {
    let uri = uri.split('#').next().unwrap_or(uri);
    let (before_query, query) = match uri.split_once('?') {
        Some((before, q)) => (before, Some(q)),
        None => (uri, None),
    };

    // Absolute and scheme-relative URIs carry an authority before the path
    let authority = match before_query.find("://") {
        Some(scheme_end) => Some(&before_query[scheme_end + 3..]),
        None => before_query.strip_prefix("//"),
    };

    let path = match authority {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None if before_query.is_empty() => "/",
        None => before_query,
    };

    (path, query)
}

/// Restores the snapshot when dropped.
struct StateGuard<'a> {
    state: &'a mut RequestState,
    saved: Option<RequestState>,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.state = saved;
        }
    }
}

/// Run `router` once against `request`.
///
/// `state` is identical before and after the call however the router exits.
pub fn execute<R: Router + ?Sized>(
    state: &mut RequestState,
    request: &InboundRequest,
    router: &mut R,
) -> anyhow::Result<TestResponse> {
    let saved = state.clone();
    let mut guard = StateGuard {
        state,
        saved: Some(saved),
    };
    request.apply(guard.state);

    debug!(method = %request.method, uri = %request.uri, "Dispatching synthetic request");

    let mut capture = ResponseCapture::default();
    router.dispatch(guard.state, &mut capture)?;
    drop(guard);

    Ok(TestResponse::new(
        std::mem::take(&mut capture.body),
        capture.status.unwrap_or(200),
        capture.parsed_headers(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn initial_state() -> RequestState {
        let mut state = RequestState::default();
        state.server.insert("SERVER_NAME".into(), "example.test".into());
        state.query.insert("existing".into(), "1".into());
        state
    }

    #[test]
    fn test_split_uri() {
        assert_eq!(split_uri("/blog/post?x=1"), ("/blog/post", Some("x=1")));
        assert_eq!(split_uri("https://a.test/p/q?y=2#top"), ("/p/q", Some("y=2")));
        assert_eq!(split_uri("https://a.test"), ("/", None));
        assert_eq!(split_uri(""), ("/", None));
        assert_eq!(split_uri("?only=query"), ("/", Some("only=query")));
    }

    #[test]
    fn test_split_scheme_relative_uri() {
        assert_eq!(
            split_uri("//cdn.test/assets/app.js?v=3"),
            ("/assets/app.js", Some("v=3"))
        );
        assert_eq!(split_uri("//cdn.test"), ("/", None));

        let mut state = RequestState::default();
        let mut seen = RequestState::default();
        let mut router = |s: &RequestState, _: &mut ResponseCapture| -> anyhow::Result<()> {
            seen = s.clone();
            Ok(())
        };
        execute(&mut state, &InboundRequest::get("//cdn.test/feed"), &mut router).unwrap();
        assert_eq!(seen.server["PATH_INFO"], "/feed");
        assert_eq!(seen.server["REQUEST_URI"], "//cdn.test/feed");
    }

    #[test]
    fn test_get_populates_state() {
        let mut state = initial_state();
        let request =
            InboundRequest::get("/search?s=rust&page=2").header("HTTP_ACCEPT", "text/html");

        let mut seen = RequestState::default();
        let mut router = |s: &RequestState, out: &mut ResponseCapture| -> anyhow::Result<()> {
            seen = s.clone();
            out.write("results for ");
            out.write(&s.query["s"]);
            Ok(())
        };
        let response = execute(&mut state, &request, &mut router).unwrap();

        assert_eq!(seen.server["REQUEST_METHOD"], "GET");
        assert_eq!(seen.server["REQUEST_URI"], "/search?s=rust&page=2");
        assert_eq!(seen.server["PATH_INFO"], "/search");
        assert_eq!(seen.server["QUERY_STRING"], "s=rust&page=2");
        assert_eq!(seen.server["HTTP_ACCEPT"], "text/html");
        assert_eq!(seen.query["page"], "2");
        assert_eq!(seen.query["existing"], "1");
        assert_eq!(seen.request["s"], "rust");
        assert!(seen.form.is_empty());

        response.assert_ok().assert_see("results for rust");
        assert_eq!(state, initial_state());
    }

    #[test]
    fn test_post_sets_form_and_request() {
        let mut state = initial_state();
        let request = InboundRequest::post("/submit?ref=home")
            .field("title", "Hello")
            .from("https://example.test/form");

        let mut seen = RequestState::default();
        let mut router = |s: &RequestState, _: &mut ResponseCapture| -> anyhow::Result<()> {
            seen = s.clone();
            Ok(())
        };
        execute(&mut state, &request, &mut router).unwrap();

        assert_eq!(seen.form["title"], "Hello");
        assert_eq!(seen.request["title"], "Hello");
        assert_eq!(seen.request["ref"], "home");
        assert_eq!(seen.server["QUERY_STRING"], "ref=home");
        assert_eq!(seen.server["HTTP_REFERER"], "https://example.test/form");
        assert_eq!(state, initial_state());
    }

    #[test]
    fn test_status_and_headers_captured() {
        let mut state = RequestState::default();
        let response = execute(
            &mut state,
            &InboundRequest::get("/missing"),
            &mut |_: &RequestState, out: &mut ResponseCapture| -> anyhow::Result<()> {
                out.set_status(404);
                out.header("Content-Type: text/html; charset=UTF-8");
                out.header("X-Robots-Tag: noindex");
                out.header("malformed line");
                out.write("<h1>Not found</h1>");
                Ok(())
            },
        )
        .unwrap();

        response
            .assert_not_found()
            .assert_header("Content-Type", Some("text/html; charset=UTF-8"))
            .assert_header("X-Robots-Tag", Some("noindex"));
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn test_state_restored_on_error() {
        let mut state = initial_state();
        let result = execute(
            &mut state,
            &InboundRequest::delete("/items/1").field("force", "1"),
            &mut |_: &RequestState, _: &mut ResponseCapture| -> anyhow::Result<()> {
                anyhow::bail!("routing failed")
            },
        );

        assert!(result.unwrap_err().to_string().contains("routing failed"));
        assert_eq!(state, initial_state());
    }

    #[test]
    fn test_state_restored_on_panic() {
        let mut state = initial_state();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = execute(
                &mut state,
                &InboundRequest::put("/items/1?x=y"),
                &mut |_: &RequestState, _: &mut ResponseCapture| -> anyhow::Result<()> {
                    panic!("router exploded")
                },
            );
        }));

        assert!(outcome.is_err());
        assert_eq!(state, initial_state());
    }

    #[test]
    fn test_struct_router() {
        struct Echo {
            calls: usize,
        }

        impl Router for Echo {
            fn dispatch(&mut self, state: &RequestState, out: &mut ResponseCapture) -> anyhow::Result<()> {
                self.calls += 1;
                out.write(&state.server["REQUEST_METHOD"]);
                Ok(())
            }
        }

        let mut router = Echo { calls: 0 };
        let mut state = RequestState::default();
        let response = execute(&mut state, &InboundRequest::patch("/x"), &mut router).unwrap();
        response.assert_see("PATCH");
        assert_eq!(router.calls, 1);
    }
}
