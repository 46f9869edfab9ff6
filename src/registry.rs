//! The intercept registry.
//!
//! Holds URL-pattern rules, the log of every outbound request, and the
//! strict-mode flag. Installs itself into a [`HookPoint`] so that requests
//! sent through the host client are answered from the rules.

use crate::client::RequestArgs;
use crate::config::{FixtureConfig, GlobalSettings, PartialResponse, ResponseDescriptor};
use crate::error::InterceptError;
use crate::hook::{HookPoint, HookToken, PreSendHook, Preempt};
use crate::matcher::UrlPattern;
use crate::template::TemplateEngine;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

type Generator = dyn Fn(&str, &RequestArgs) -> PartialResponse + Send + Sync;
type JsonGenerator = dyn Fn(&str, &RequestArgs) -> serde_json::Value + Send + Sync;

/// How a rule produces its response.
///
/// Generators are stored inside the registry. A generator that needs the
/// request log should capture a [`RegistryView`], not the registry itself,
/// or the registry is never dropped and its hook stays installed.
#[derive(Clone)]
pub enum Responder {
    /// Fixed response fields
    Static(PartialResponse),
    /// Computed from the request
    Generate(Arc<Generator>),
    /// Computed from the request as loose JSON, decoded at resolution time
    GenerateJson(Arc<JsonGenerator>),
    /// Body and header values rendered with Handlebars
    Template(PartialResponse),
}

impl Responder {
    /// Build the response from the request.
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&str, &RequestArgs) -> PartialResponse + Send + Sync + 'static,
    {
        Responder::Generate(Arc::new(f))
    }

    /// Build the response from the request as a JSON value.
    pub fn json_generator<F>(f: F) -> Self
    where
        F: Fn(&str, &RequestArgs) -> serde_json::Value + Send + Sync + 'static,
    {
        Responder::GenerateJson(Arc::new(f))
    }
}

impl Default for Responder {
    fn default() -> Self {
        Responder::Static(PartialResponse::default())
    }
}

impl From<PartialResponse> for Responder {
    fn from(partial: PartialResponse) -> Self {
        Responder::Static(partial)
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Responder::Static(p) => f.debug_tuple("Static").field(p).finish(),
            Responder::Generate(_) => f.write_str("Generate(..)"),
            Responder::GenerateJson(_) => f.write_str("GenerateJson(..)"),
            Responder::Template(p) => f.debug_tuple("Template").field(p).finish(),
        }
    }
}

/// One entry of the request log.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub args: RequestArgs,
    /// Capture time, for ordering and debugging only
    pub timestamp: DateTime<Utc>,
    /// Position in the log, starting at zero
    pub sequence: u64,
}

#[derive(Debug)]
struct MockRule {
    pattern: UrlPattern,
    responder: Responder,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<MockRule>,
    requests: Vec<RecordedRequest>,
    strict: bool,
    hook: Option<HookToken>,
    settings: GlobalSettings,
}

impl State {
    fn upsert(&mut self, pattern: String, responder: Responder) {
        match self.rules.iter_mut().find(|r| r.pattern.as_str() == pattern) {
            Some(rule) => rule.responder = responder,
            None => {
                let compiled = UrlPattern::compile(&pattern);
                if let UrlPattern::Invalid { reason, .. } = &compiled {
                    warn!(pattern = %pattern, reason = %reason, "Registered pattern will never match");
                }
                self.rules.push(MockRule {
                    pattern: compiled,
                    responder,
                });
            }
        }
    }
}

/// Shared between the registry handle and its installed hook.
struct Inner {
    state: Mutex<State>,
    templates: TemplateEngine,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn intercept(&self, url: &str, args: &RequestArgs) -> Result<Preempt, InterceptError> {
        // Record and select under one lock; resolve after releasing it so
        // responders may call back into the registry.
        let (matched, strict, settings) = {
            let mut state = self.lock();
            let sequence = state.requests.len() as u64;
            state.requests.push(RecordedRequest {
                url: url.to_string(),
                args: args.clone(),
                timestamp: Utc::now(),
                sequence,
            });

            let matched = state
                .rules
                .iter()
                .find(|rule| rule.pattern.is_match(url))
                .map(|rule| (rule.pattern.as_str().to_string(), rule.responder.clone()));
            (matched, state.strict, state.settings.clone())
        };

        match matched {
            Some((pattern, responder)) => {
                if settings.log_matches {
                    debug!(url = %url, pattern = %pattern, method = %args.method, "Request matched fake");
                }
                let response = self.resolve(&responder, url, args)?;
                Ok(Preempt::Respond(response))
            }
            None if strict => {
                warn!(url = %url, method = %args.method, "Stray request blocked");
                Err(InterceptError::UnmatchedStrictRequest {
                    url: url.to_string(),
                })
            }
            None => {
                if settings.log_unmatched {
                    debug!(url = %url, method = %args.method, "No fake matched, passing through");
                }
                Ok(Preempt::NotHandled)
            }
        }
    }

    fn matching(&self, pattern: &str) -> Vec<RecordedRequest> {
        let compiled = UrlPattern::compile(pattern);
        self.lock()
            .requests
            .iter()
            .filter(|r| compiled.is_match(&r.url))
            .cloned()
            .collect()
    }

    fn resolve(
        &self,
        responder: &Responder,
        url: &str,
        args: &RequestArgs,
    ) -> Result<ResponseDescriptor, InterceptError> {
        let partial = match responder {
            Responder::Static(partial) => partial.clone(),
            Responder::Generate(f) => f(url, args),
            Responder::GenerateJson(f) => PartialResponse::from_value(f(url, args))
                .map_err(|e| InterceptError::malformed(url, e))?,
            Responder::Template(partial) => self
                .templates
                .render_partial(partial, url, args)
                .map_err(|e| InterceptError::malformed(url, e))?,
        };

        ResponseDescriptor::from_partial(&partial).map_err(|e| InterceptError::malformed(url, e))
    }
}

struct InterceptHook(Arc<Inner>);

/// Read-only handle on a registry's log that does not keep it alive.
///
/// Once the registry is dropped the view reads as empty.
#[derive(Clone)]
pub struct RegistryView(Weak<Inner>);

impl RegistryView {
    /// Snapshot of the request log, in call order.
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.0
            .upgrade()
            .map(|inner| inner.lock().requests.clone())
            .unwrap_or_default()
    }

    /// Logged requests whose URL matches `pattern`.
    pub fn matching(&self, pattern: &str) -> Vec<RecordedRequest> {
        self.0
            .upgrade()
            .map(|inner| inner.matching(pattern))
            .unwrap_or_default()
    }

    /// Whether the registry still exists.
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl std::fmt::Debug for RegistryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryView")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PreSendHook for InterceptHook {
    fn pre_send(&self, url: &str, args: &RequestArgs) -> Result<Preempt, InterceptError> {
        self.0.intercept(url, args)
    }
}

/// Fake outbound HTTP for one test context.
///
/// Dropping the registry removes its hook.
pub struct InterceptRegistry {
    inner: Arc<Inner>,
    hooks: Arc<HookPoint>,
}

impl InterceptRegistry {
    /// Create a registry that will attach to `hooks` once it has work to do.
    pub fn new(hooks: Arc<HookPoint>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                templates: TemplateEngine::new(),
            }),
            hooks,
        }
    }

    /// Create a registry and load a fixture file's rules into it.
    pub fn with_fixtures(hooks: Arc<HookPoint>, config: &FixtureConfig) -> Self {
        let registry = Self::new(hooks);
        registry.load_fixtures(config);
        registry
    }

    /// Register a response for a pattern. Re-registering a pattern replaces
    /// its response and keeps its position.
    pub fn fake(&self, pattern: impl Into<String>, response: impl Into<Responder>) -> &Self {
        self.inner.lock().upsert(pattern.into(), response.into());
        self.ensure_installed();
        self
    }

    /// Register the default response for a pattern.
    pub fn fake_any(&self, pattern: impl Into<String>) -> &Self {
        self.fake(pattern, Responder::default())
    }

    /// Register several pairs at once, in iteration order.
    pub fn fake_many<I, P, R>(&self, rules: I) -> &Self
    where
        I: IntoIterator<Item = (P, R)>,
        P: Into<String>,
        R: Into<Responder>,
    {
        {
            let mut state = self.inner.lock();
            for (pattern, response) in rules {
                state.upsert(pattern.into(), response.into());
            }
        }
        self.ensure_installed();
        self
    }

    /// Install the enabled rules of a fixture file and apply its settings.
    ///
    /// The fixture's `strict` flag replaces the current mode in both
    /// directions. The hook stays installed so the loaded rules answer.
    pub fn load_fixtures(&self, config: &FixtureConfig) -> &Self {
        let rules = config.enabled_rules().map(|rule| {
            let responder = if rule.template {
                Responder::Template(rule.response.clone())
            } else {
                Responder::Static(rule.response.clone())
            };
            (rule.pattern.clone(), responder)
        });
        self.fake_many(rules);

        {
            let mut state = self.inner.lock();
            state.settings = config.settings.clone();
            state.strict = config.settings.strict;
        }

        info!(
            rules = config.enabled_rules().count(),
            strict = config.settings.strict,
            "Fixtures loaded"
        );
        self
    }

    /// Fail any request no rule matches.
    pub fn prevent_stray_requests(&self) -> &Self {
        self.inner.lock().strict = true;
        self.ensure_installed();
        self
    }

    /// Turn strict mode off and detach from the hook point.
    ///
    /// Detaching also stops fakes from answering requests sent through the
    /// host client until the next `fake` or `prevent_stray_requests`.
    pub fn allow_stray_requests(&self) -> &Self {
        self.inner.lock().strict = false;
        self.uninstall();
        self
    }

    /// Decide on one outbound request.
    ///
    /// The request is logged first, whatever the outcome.
    pub fn intercept(&self, url: &str, args: &RequestArgs) -> Result<Preempt, InterceptError> {
        self.inner.intercept(url, args)
    }

    /// Snapshot of the request log, in call order.
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.inner.lock().requests.clone()
    }

    /// Logged requests whose URL matches `pattern`.
    pub fn matching(&self, pattern: &str) -> Vec<RecordedRequest> {
        self.inner.matching(pattern)
    }

    /// A handle for responders that read the log.
    pub fn view(&self) -> RegistryView {
        RegistryView(Arc::downgrade(&self.inner))
    }

    /// Clear rules, log, and strict mode, and detach from the hook point.
    pub fn reset(&self) {
        {
            let mut state = self.inner.lock();
            state.rules.clear();
            state.requests.clear();
            state.strict = false;
            state.settings = GlobalSettings::default();
        }
        self.uninstall();
    }

    /// Whether unmatched requests fail.
    pub fn is_strict(&self) -> bool {
        self.inner.lock().strict
    }

    /// Whether the hook is currently on the hook point.
    pub fn is_installed(&self) -> bool {
        self.inner.lock().hook.is_some()
    }

    /// Number of registered patterns.
    pub fn rule_count(&self) -> usize {
        self.inner.lock().rules.len()
    }

    /// Registered patterns in evaluation order.
    pub fn patterns(&self) -> Vec<String> {
        self.inner
            .lock()
            .rules
            .iter()
            .map(|r| r.pattern.as_str().to_string())
            .collect()
    }

    /// At least one request matched `pattern`.
    pub fn check_sent(&self, pattern: &str) -> Result<(), InterceptError> {
        self.check_sent_with(pattern, |_, _| true)
    }

    /// At least one request matched `pattern`, and every match satisfies
    /// `callback`.
    pub fn check_sent_with<F>(&self, pattern: &str, callback: F) -> Result<(), InterceptError>
    where
        F: Fn(&str, &RequestArgs) -> bool,
    {
        let matching = self.matching(pattern);
        if matching.is_empty() {
            return Err(InterceptError::assertion(format!(
                "No HTTP request was sent to: {}",
                pattern
            )));
        }

        match matching.iter().find(|r| !callback(&r.url, &r.args)) {
            Some(failed) => Err(InterceptError::assertion(format!(
                "HTTP request to {} did not pass assertion",
                failed.url
            ))),
            None => Ok(()),
        }
    }

    /// No request matched `pattern`.
    pub fn check_not_sent(&self, pattern: &str) -> Result<(), InterceptError> {
        let count = self.matching(pattern).len();
        if count == 0 {
            Ok(())
        } else {
            Err(InterceptError::assertion(format!(
                "HTTP request was unexpectedly sent to: {} ({} matching)",
                pattern, count
            )))
        }
    }

    /// Exactly `expected` requests matched `pattern`.
    pub fn check_sent_count(&self, pattern: &str, expected: usize) -> Result<(), InterceptError> {
        let actual = self.matching(pattern).len();
        if actual == expected {
            Ok(())
        } else {
            Err(InterceptError::assertion(format!(
                "Expected {} requests to {}, got {}",
                expected, pattern, actual
            )))
        }
    }

    /// Panicking form of [`check_sent`](Self::check_sent).
    #[track_caller]
    pub fn assert_sent(&self, pattern: &str) {
        if let Err(e) = self.check_sent(pattern) {
            panic!("{}", e);
        }
    }

    /// Panicking form of [`check_sent_with`](Self::check_sent_with).
    #[track_caller]
    pub fn assert_sent_with<F>(&self, pattern: &str, callback: F)
    where
        F: Fn(&str, &RequestArgs) -> bool,
    {
        if let Err(e) = self.check_sent_with(pattern, callback) {
            panic!("{}", e);
        }
    }

    /// Panicking form of [`check_not_sent`](Self::check_not_sent).
    #[track_caller]
    pub fn assert_not_sent(&self, pattern: &str) {
        if let Err(e) = self.check_not_sent(pattern) {
            panic!("{}", e);
        }
    }

    /// Panicking form of [`check_sent_count`](Self::check_sent_count).
    #[track_caller]
    pub fn assert_sent_count(&self, pattern: &str, expected: usize) {
        if let Err(e) = self.check_sent_count(pattern, expected) {
            panic!("{}", e);
        }
    }

    fn ensure_installed(&self) {
        let mut state = self.inner.lock();
        if state.hook.is_none() {
            let token = self
                .hooks
                .install(Arc::new(InterceptHook(Arc::clone(&self.inner))));
            state.hook = Some(token);
            info!("HTTP interception enabled");
        }
    }

    fn uninstall(&self) {
        let token = self.inner.lock().hook.take();
        if let Some(token) = token {
            self.hooks.remove(token);
            info!("HTTP interception disabled");
        }
    }
}

impl Drop for InterceptRegistry {
    fn drop(&mut self) {
        self.uninstall();
    }
}

impl std::fmt::Debug for InterceptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("InterceptRegistry")
            .field("rules", &state.rules.len())
            .field("recorded", &state.requests.len())
            .field("strict", &state.strict)
            .field("installed", &state.hook.is_some())
            .finish()
    }
}
