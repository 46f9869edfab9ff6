//! Response descriptors and fixture configuration.
//!
//! Defines the typed response shape returned to intercepted callers, the
//! partial form rules are written in, and the YAML fixture file format.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use crate::error::InterceptError;
use crate::matcher::UrlPattern;

/// Body used when a rule does not supply one: the empty JSON object.
pub const DEFAULT_BODY: &str = "{}";

/// Fixture file: a list of rules plus global settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl FixtureConfig {
    /// Load fixtures from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate fixtures from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every rule.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| anyhow::anyhow!("Rule {} ({}): {}", i, rule.pattern, e))?;
        }
        Ok(())
    }

    /// Rules that take part in matching.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().filter(|r| r.enabled)
    }
}

/// One pattern and the response it produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    /// URL pattern (`*`, substring, or wildcard)
    pub pattern: String,

    /// Optional description
    #[serde(default)]
    pub name: Option<String>,

    /// Response fields; unset fields take the defaults
    #[serde(default)]
    pub response: PartialResponse,

    /// Render the body with Handlebars against the request
    #[serde(default)]
    pub template: bool,

    /// Whether this rule is installed
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl RuleDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pattern.is_empty() {
            anyhow::bail!("Rule pattern cannot be empty");
        }
        UrlPattern::try_compile(&self.pattern)?;
        self.response.validate()?;
        Ok(())
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Fail on requests no rule matches
    #[serde(default)]
    pub strict: bool,

    /// Log matched requests
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests that fall through to the real transport
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            strict: false,
            log_matches: true,
            log_unmatched: true,
        }
    }
}

/// A response with every field optional.
///
/// Merged over the defaults by [`ResponseDescriptor::from_partial`]. Headers
/// and cookies, when given, replace the defaults as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Either a plain string or a tagged [`ResponseBody`]
    #[serde(
        default,
        deserialize_with = "deserialize_body",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<ResponseBody>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<HashMap<String, String>>,
}

impl PartialResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn body(mut self, body: ResponseBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Raw text body.
    pub fn text(self, content: impl Into<String>) -> Self {
        self.body(ResponseBody::Text {
            content: content.into(),
        })
    }

    /// JSON body.
    pub fn json(self, content: serde_json::Value) -> Self {
        self.body(ResponseBody::Json { content })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Decode a loosely-shaped JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(status) = self.status {
            if !(100..=599).contains(&status) {
                anyhow::bail!("Invalid status code: {}", status);
            }
        }
        Ok(())
    }
}

fn deserialize_body<'de, D>(deserializer: D) -> Result<Option<ResponseBody>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BodyRepr {
        Raw(String),
        Tagged(ResponseBody),
    }

    Ok(match Option::<BodyRepr>::deserialize(deserializer)? {
        None => None,
        Some(BodyRepr::Raw(content)) => Some(ResponseBody::Text { content }),
        Some(BodyRepr::Tagged(body)) => Some(body),
    })
}

/// Response body configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_vec(content)?),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }
}

/// A fully-populated response handed back to an intercepted caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub message: String,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

impl Default for ResponseDescriptor {
    fn default() -> Self {
        Self {
            status: 200,
            message: reason_phrase(200).to_string(),
            body: DEFAULT_BODY.as_bytes().to_vec(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
        }
    }
}

impl ResponseDescriptor {
    /// Merge a partial response over the defaults.
    ///
    /// An unset message follows the status: a partial with only
    /// `status: 404` yields `"Not Found"`, not `"OK"`.
    pub fn from_partial(partial: &PartialResponse) -> anyhow::Result<Self> {
        partial.validate()?;

        let defaults = Self::default();
        let status = partial.status.unwrap_or(defaults.status);
        let message = partial
            .message
            .clone()
            .unwrap_or_else(|| reason_phrase(status).to_string());
        let body = match &partial.body {
            Some(body) => body.to_bytes()?,
            None => defaults.body,
        };

        Ok(Self {
            status,
            message,
            body,
            headers: partial.headers.clone().unwrap_or(defaults.headers),
            cookies: partial.cookies.clone().unwrap_or(defaults.cookies),
        })
    }

    /// Body as text, lossily decoded.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, InterceptError> {
        serde_json::from_slice(&self.body).map_err(|e| InterceptError::InvalidJson {
            reason: e.to_string(),
        })
    }
}

/// Canonical reason phrase for a status code, empty when unknown.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let resp = ResponseDescriptor::from_partial(&PartialResponse::new()).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.message, "OK");
        assert_eq!(resp.body, b"{}");
        assert!(resp.headers.is_empty());
        assert!(resp.cookies.is_empty());
        assert_eq!(resp, ResponseDescriptor::default());
    }

    #[test]
    fn test_partial_overrides_defaults() {
        let partial = PartialResponse::new()
            .status(404)
            .text("missing")
            .header("X-Trace", "abc");
        let resp = ResponseDescriptor::from_partial(&partial).unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.message, "Not Found");
        assert_eq!(resp.body_text(), "missing");
        assert_eq!(resp.header("x-trace"), Some("abc"));
    }

    #[test]
    fn test_explicit_message_wins() {
        let partial = PartialResponse::new().status(418).message("I'm a teapot");
        let resp = ResponseDescriptor::from_partial(&partial).unwrap();
        assert_eq!(resp.message, "I'm a teapot");
    }

    #[test]
    fn test_invalid_status_rejected() {
        let partial = PartialResponse::new().status(42);
        assert!(ResponseDescriptor::from_partial(&partial).is_err());
    }

    #[test]
    fn test_json_body_and_cookies() {
        let partial = PartialResponse::new()
            .json(serde_json::json!({"ok": true}))
            .cookie("session", "s1");
        let resp = ResponseDescriptor::from_partial(&partial).unwrap();
        assert_eq!(resp.json().unwrap()["ok"], true);
        assert_eq!(resp.cookies.get("session"), Some(&"s1".to_string()));
    }

    #[test]
    fn test_partial_from_value_accepts_plain_body() {
        let partial = PartialResponse::from_value(serde_json::json!({
            "status": 201,
            "body": "created",
            "headers": {"Location": "/items/1"}
        }))
        .unwrap();
        assert_eq!(partial.status, Some(201));
        assert_eq!(
            partial.body,
            Some(ResponseBody::Text {
                content: "created".to_string()
            })
        );
    }

    #[test]
    fn test_partial_from_value_rejects_wrong_shape() {
        assert!(PartialResponse::from_value(serde_json::json!({"status": "abc"})).is_err());
        assert!(PartialResponse::from_value(serde_json::json!({"bogus": 1})).is_err());
        assert!(PartialResponse::from_value(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_response_body_to_bytes() {
        let b64 = ResponseBody::Base64 {
            content: "aGVsbG8=".to_string(),
        };
        assert_eq!(b64.to_bytes().unwrap(), b"hello");

        let bad = ResponseBody::Base64 {
            content: "***".to_string(),
        };
        assert!(bad.to_bytes().is_err());
    }

    #[test]
    fn test_parse_fixture_file() {
        let yaml = r#"
settings:
  strict: true
rules:
  - pattern: "https://api.example.com/*"
    name: api
    response:
      status: 200
      body:
        type: json
        content:
          ok: true
  - pattern: "b.test"
    response:
      status: 404
      body: "nope"
  - pattern: "disabled.test"
    enabled: false
"#;
        let config = FixtureConfig::from_yaml(yaml).unwrap();
        assert!(config.settings.strict);
        assert_eq!(config.rules.len(), 3);
        assert_eq!(config.enabled_rules().count(), 2);
        assert_eq!(config.rules[0].name.as_deref(), Some("api"));
        assert_eq!(
            config.rules[1].response.body,
            Some(ResponseBody::Text {
                content: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_fixture_validation() {
        let yaml = r#"
rules:
  - pattern: ""
"#;
        assert!(FixtureConfig::from_yaml(yaml).is_err());

        let yaml = r#"
rules:
  - pattern: "a.test"
    response:
      status: 700
"#;
        let err = FixtureConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("a.test"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
rules:
  - pattern: "a.test"
    priority: 3
"#;
        assert!(FixtureConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rules:\n  - pattern: \"*\"").unwrap();
        let config = FixtureConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rules[0].pattern, "*");
        assert!(!config.settings.strict);
        assert!(config.settings.log_matches);
    }
}
