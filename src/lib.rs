//! HTTP Intercept
//!
//! Fakes outbound HTTP for tests. Application code sends requests through a
//! client that consults a pre-send hook; the [`InterceptRegistry`] installs
//! that hook, records every request, and answers from registered URL
//! patterns.
//!
//! # Features
//!
//! - **URL Patterns**: `*` for everything, `*` wildcards, or plain substrings
//! - **Static and Generated Responses**: fixed fields or a closure over the request
//! - **Request Log**: every attempt recorded in call order, matched or not
//! - **Stray Request Guard**: strict mode turns unmatched requests into errors
//! - **Assertions**: sent / not sent / sent count, by pattern
//! - **Fixture Files**: YAML rules with optional Handlebars templates
//! - **Synthetic Inbound Requests**: run a router against a faked request
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use http_intercept::{HookPoint, InterceptRegistry, PartialResponse, Preempt, RequestArgs};
//!
//! let hooks = Arc::new(HookPoint::new());
//! let http = InterceptRegistry::new(Arc::clone(&hooks));
//! http.fake("https://api.example.com/*", PartialResponse::new().text(r#"{"ok":true}"#));
//!
//! let answer = hooks.run("https://api.example.com/v1/ping", &RequestArgs::get()).unwrap();
//! assert!(matches!(answer, Preempt::Respond(ref r) if r.status == 200));
//! http.assert_sent_count("api.example.com", 1);
//! ```
//!
//! # Example Fixture File
//!
//! ```yaml
//! settings:
//!   strict: true
//! rules:
//!   - pattern: "https://api.example.com/users/*"
//!     template: true
//!     response:
//!       status: 200
//!       body:
//!         type: json
//!         content:
//!           method: "{{method}}"
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod hook;
pub mod inbound;
pub mod matcher;
pub mod registry;
pub mod response;
pub mod template;

pub use client::{HttpClient, RequestArgs, Transport};
pub use config::{FixtureConfig, PartialResponse, ResponseBody, ResponseDescriptor};
pub use error::InterceptError;
pub use hook::{HookPoint, HookToken, PreSendHook, Preempt};
pub use inbound::{execute, InboundRequest, RequestState, ResponseCapture, Router};
pub use matcher::{matches, UrlPattern};
pub use registry::{InterceptRegistry, RecordedRequest, RegistryView, Responder};
pub use response::TestResponse;
