//! Hook registration and the request-signing seam.
//!
//! Handlers are registered on a [`HookRegistry`] under dotted event names
//! (`before-call.<service>.<operation>`); a handler registered under a
//! prefix fires for every event underneath it, so `before-send.s3` sees
//! all S3 operations. The client takes a snapshot of the registry at
//! construction — registering more handlers afterwards does not affect
//! existing clients.
//!
//! Signing is a pre-send concern: the [`SignRequest`] implementation runs
//! first in the before-send phase and receives the attempt number, so a
//! retried request is re-signed with fresh timestamps.

use crate::endpoint::{Request, ResponseDict};
use crate::model::OperationModel;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Signs a request description before it is sent.
#[async_trait]
pub trait SignRequest: Send + Sync {
    /// Signs `request` for the given 1-based attempt.
    async fn sign(&self, request: &mut Request, attempt: u32) -> Result<()>;
}

/// A signer that leaves the request untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSigner;

#[async_trait]
impl SignRequest for NoopSigner {
    async fn sign(&self, _request: &mut Request, _attempt: u32) -> Result<()> {
        Ok(())
    }
}

/// Runs before an operation call is serialized.
#[async_trait]
pub trait BeforeCallHook: Send + Sync {
    /// Observes the operation and parameters; may seed the call context.
    async fn on_before_call(
        &self,
        operation: &OperationModel,
        params: &Value,
        context: &mut HashMap<String, Value>,
    ) -> Result<()>;
}

/// Runs before each send attempt, after signing.
#[async_trait]
pub trait BeforeSendHook: Send + Sync {
    /// May mutate the outgoing request. `attempt` is 1-based.
    async fn on_before_send(&self, request: &mut Request, attempt: u32) -> Result<()>;
}

/// Runs after the response has been parsed.
#[async_trait]
pub trait AfterCallHook: Send + Sync {
    /// Observes the converted response and the parsed document.
    async fn on_after_call(
        &self,
        operation: &OperationModel,
        response: &ResponseDict,
        parsed: &Value,
    ) -> Result<()>;
}

/// An ordered collection of registered hooks.
///
/// Cloning the registry produces an independent snapshot sharing the same
/// handler instances.
#[derive(Clone, Default)]
pub struct HookRegistry {
    before_call: Vec<(String, Arc<dyn BeforeCallHook>)>,
    before_send: Vec<(String, Arc<dyn BeforeSendHook>)>,
    after_call: Vec<(String, Arc<dyn AfterCallHook>)>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a before-call handler under `event`.
    pub fn register_before_call(
        &mut self,
        event: impl Into<String>,
        hook: Arc<dyn BeforeCallHook>,
    ) {
        self.before_call.push((event.into(), hook));
    }

    /// Registers a before-send handler under `event`.
    pub fn register_before_send(
        &mut self,
        event: impl Into<String>,
        hook: Arc<dyn BeforeSendHook>,
    ) {
        self.before_send.push((event.into(), hook));
    }

    /// Registers an after-call handler under `event`.
    pub fn register_after_call(&mut self, event: impl Into<String>, hook: Arc<dyn AfterCallHook>) {
        self.after_call.push((event.into(), hook));
    }

    /// Returns `true` if a handler registered under `registered` should
    /// fire for `event`.
    fn event_matches(registered: &str, event: &str) -> bool {
        event == registered
            || event
                .strip_prefix(registered)
                .is_some_and(|rest| rest.starts_with('.'))
    }

    pub(crate) async fn emit_before_call(
        &self,
        event: &str,
        operation: &OperationModel,
        params: &Value,
        context: &mut HashMap<String, Value>,
    ) -> Result<()> {
        for (name, hook) in &self.before_call {
            if Self::event_matches(name, event) {
                hook.on_before_call(operation, params, context).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn emit_before_send(
        &self,
        event: &str,
        request: &mut Request,
        attempt: u32,
    ) -> Result<()> {
        for (name, hook) in &self.before_send {
            if Self::event_matches(name, event) {
                hook.on_before_send(request, attempt).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn emit_after_call(
        &self,
        event: &str,
        operation: &OperationModel,
        response: &ResponseDict,
        parsed: &Value,
    ) -> Result<()> {
        for (name, hook) in &self.after_call {
            if Self::event_matches(name, event) {
                hook.on_after_call(operation, response, parsed).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_call", &self.before_call.len())
            .field("before_send", &self.before_send.len())
            .field("after_call", &self.after_call.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_registrations_fire_for_nested_events() {
        assert!(HookRegistry::event_matches(
            "before-send",
            "before-send.s3.PutObject"
        ));
        assert!(HookRegistry::event_matches(
            "before-send.s3",
            "before-send.s3.PutObject"
        ));
        assert!(HookRegistry::event_matches(
            "before-send.s3.PutObject",
            "before-send.s3.PutObject"
        ));
    }

    #[test]
    fn unrelated_events_do_not_match() {
        assert!(!HookRegistry::event_matches(
            "before-send.s3",
            "before-send.sqs.SendMessage"
        ));
        // Prefixes only match at dot boundaries.
        assert!(!HookRegistry::event_matches(
            "before-send.s3",
            "before-send.s3control.CreateJob"
        ));
        assert!(!HookRegistry::event_matches(
            "after-call",
            "before-call.s3.PutObject"
        ));
    }
}
