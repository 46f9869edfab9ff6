//! Pre-send extension point of the host HTTP abstraction.
//!
//! Hooks are asked, in installation order, whether they want to answer a
//! request before it reaches the real transport. Installing returns a
//! [`HookToken`]; removal goes through that token.

use crate::client::RequestArgs;
use crate::config::ResponseDescriptor;
use crate::error::InterceptError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Decision returned by a pre-send hook.
#[derive(Debug, Clone, PartialEq)]
pub enum Preempt {
    /// Let the next hook, and then the real transport, handle the request.
    NotHandled,
    /// Answer the request with this response.
    Respond(ResponseDescriptor),
}

/// Something consulted before an outbound request is sent.
pub trait PreSendHook: Send + Sync {
    fn pre_send(&self, url: &str, args: &RequestArgs) -> Result<Preempt, InterceptError>;
}

impl<F> PreSendHook for F
where
    F: Fn(&str, &RequestArgs) -> Result<Preempt, InterceptError> + Send + Sync,
{
    fn pre_send(&self, url: &str, args: &RequestArgs) -> Result<Preempt, InterceptError> {
        self(url, args)
    }
}

/// Opaque handle for an installed hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookToken(u64);

/// The set of installed pre-send hooks.
#[derive(Default)]
pub struct HookPoint {
    hooks: Mutex<Vec<(HookToken, Arc<dyn PreSendHook>)>>,
    next_id: AtomicU64,
}

impl HookPoint {
    /// Create an empty hook point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook after all existing ones.
    pub fn install(&self, hook: Arc<dyn PreSendHook>) -> HookToken {
        let token = HookToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((token, hook));
        debug!(token = token.0, "Pre-send hook installed");
        token
    }

    /// Remove a hook. Returns false if the token was not installed.
    pub fn remove(&self, token: HookToken) -> bool {
        let mut hooks = self.lock();
        let before = hooks.len();
        hooks.retain(|(t, _)| *t != token);
        let removed = hooks.len() != before;
        if removed {
            debug!(token = token.0, "Pre-send hook removed");
        }
        removed
    }

    /// Whether `token` is still installed.
    pub fn is_installed(&self, token: HookToken) -> bool {
        self.lock().iter().any(|(t, _)| *t == token)
    }

    /// Number of installed hooks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask each hook in turn. The first answer other than
    /// [`Preempt::NotHandled`] wins; an error stops the chain.
    pub fn run(&self, url: &str, args: &RequestArgs) -> Result<Preempt, InterceptError> {
        // Hooks run outside the lock so they may install or remove hooks.
        let hooks: Vec<Arc<dyn PreSendHook>> =
            self.lock().iter().map(|(_, h)| Arc::clone(h)).collect();

        for hook in hooks {
            match hook.pre_send(url, args)? {
                Preempt::NotHandled => continue,
                answer => return Ok(answer),
            }
        }
        Ok(Preempt::NotHandled)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HookToken, Arc<dyn PreSendHook>)>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPoint")
            .field("installed", &self.len())
            .finish()
    }
}
