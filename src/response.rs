//! Assertions over a captured response.

use crate::config::ResponseDescriptor;
use crate::error::InterceptError;
use std::collections::HashMap;

/// A response captured from a synthetic request or a resolved fake.
///
/// The `assert_*` methods panic on failure and return `&Self` for chaining.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResponse {
    content: String,
    status: u16,
    headers: HashMap<String, String>,
}

impl TestResponse {
    /// Wrap a captured response.
    pub fn new(content: impl Into<String>, status: u16, headers: HashMap<String, String>) -> Self {
        Self {
            content: content.into(),
            status,
            headers,
        }
    }

    /// Response body.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Response status.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, InterceptError> {
        serde_json::from_str(&self.content).map_err(|e| InterceptError::InvalidJson {
            reason: e.to_string(),
        })
    }

    /// Assert the exact status code.
    #[track_caller]
    pub fn assert_status(&self, status: u16) -> &Self {
        assert_eq!(
            self.status, status,
            "Expected status {}, got {}",
            status, self.status
        );
        self
    }

    #[track_caller]
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(200)
    }

    #[track_caller]
    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(404)
    }

    /// Assert the body contains `value`.
    #[track_caller]
    pub fn assert_see(&self, value: &str) -> &Self {
        assert!(
            self.content.contains(value),
            "Expected response to contain {:?}",
            value
        );
        self
    }

    #[track_caller]
    pub fn assert_dont_see(&self, value: &str) -> &Self {
        assert!(
            !self.content.contains(value),
            "Expected response not to contain {:?}",
            value
        );
        self
    }

    /// Assert the body parses as JSON.
    #[track_caller]
    pub fn assert_json(&self) -> &Self {
        if let Err(e) = self.json() {
            panic!("{}", e);
        }
        self
    }

    /// Assert the value at `path`.
    ///
    /// `path` is either a dot path (`data.items.0.id`) or a JSONPath
    /// expression starting with `$`, in which case the first result is used.
    #[track_caller]
    pub fn assert_json_path(&self, path: &str, expected: serde_json::Value) -> &Self {
        let data = match self.json() {
            Ok(data) => data,
            Err(e) => panic!("{}", e),
        };
        match lookup_json_path(&data, path) {
            Some(actual) => assert_eq!(actual, expected, "JSON path '{}' mismatch", path),
            None => panic!("JSON path '{}' does not exist", path),
        }
        self
    }

    /// Assert a header is present, and optionally its value.
    #[track_caller]
    pub fn assert_header(&self, name: &str, value: Option<&str>) -> &Self {
        let actual = self
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str());
        match (actual, value) {
            (None, _) => panic!("Expected header {} to be present", name),
            (Some(actual), Some(expected)) => {
                assert_eq!(actual, expected, "Header {} mismatch", name)
            }
            (Some(_), None) => {}
        }
        self
    }
}

impl From<ResponseDescriptor> for TestResponse {
    fn from(resp: ResponseDescriptor) -> Self {
        let content = resp.body_text().into_owned();
        Self::new(content, resp.status, resp.headers)
    }
}

fn lookup_json_path(data: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    if path.starts_with('$') {
        use jsonpath_rust::JsonPath;

        let compiled = JsonPath::try_from(path).ok()?;
        return match compiled.find(data) {
            serde_json::Value::Null => None,
            serde_json::Value::Array(mut found) => {
                if found.is_empty() {
                    None
                } else {
                    Some(found.swap_remove(0))
                }
            }
            other => Some(other),
        };
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(key)?,
            serde_json::Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
