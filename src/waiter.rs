//! Waiters: poll an operation until an acceptor matches.
//!
//! A [`Waiter`] is built from the service model's [`WaiterConfig`] — the
//! operation to poll, the delay between polls, the attempt budget, and an
//! ordered list of [`Acceptor`]s. Each poll evaluates the acceptors in
//! declaration order against the response (service errors are presented
//! as error documents so `error` matchers can see them); the first match
//! decides the state. Success returns, failure and exhaustion raise.

use crate::client::Client;
use crate::model::{resolve_path, resolve_path_multi};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// How an acceptor inspects a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    /// A single path value equals the expectation.
    Path,
    /// Every projected path value equals the expectation (and at least one
    /// exists).
    PathAll,
    /// At least one projected path value equals the expectation.
    PathAny,
    /// The HTTP status code equals the expectation.
    Status,
    /// The response is an error document; a string expectation matches the
    /// error code, a boolean expectation matches error presence.
    Error,
}

/// The state an acceptor moves the waiter into when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptorState {
    /// The condition is met; `wait` returns.
    Success,
    /// The condition can never be met; `wait` fails.
    Failure,
    /// Keep polling.
    Retry,
}

/// One (matcher, expectation, target-state) rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Acceptor {
    /// How the response is inspected.
    pub matcher: Matcher,
    /// The state to move into on a match.
    pub state: AcceptorState,
    /// The path argument for path-based matchers.
    #[serde(default)]
    pub argument: Option<String>,
    /// The expected value.
    pub expected: Value,
}

impl Acceptor {
    /// Returns `true` if this acceptor matches the response document.
    fn matches(&self, response: &Value) -> bool {
        match self.matcher {
            Matcher::Path => self
                .argument
                .as_deref()
                .and_then(|path| resolve_path(response, path))
                .is_some_and(|value| *value == self.expected),
            Matcher::PathAll => {
                let Some(path) = self.argument.as_deref() else {
                    return false;
                };
                let values = resolve_path_multi(response, path);
                !values.is_empty() && values.iter().all(|value| **value == self.expected)
            }
            Matcher::PathAny => {
                let Some(path) = self.argument.as_deref() else {
                    return false;
                };
                resolve_path_multi(response, path)
                    .iter()
                    .any(|value| **value == self.expected)
            }
            Matcher::Status => {
                let status = response
                    .get("ResponseMetadata")
                    .and_then(|meta| meta.get("HTTPStatusCode"))
                    .and_then(Value::as_u64);
                match (status, self.expected.as_u64()) {
                    (Some(actual), Some(expected)) => actual == expected,
                    _ => false,
                }
            }
            Matcher::Error => {
                let code = response
                    .get("Error")
                    .and_then(|error| error.get("Code"))
                    .and_then(Value::as_str);
                match &self.expected {
                    Value::String(expected) => code == Some(expected.as_str()),
                    Value::Bool(expected) => code.is_some() == *expected,
                    _ => false,
                }
            }
        }
    }
}

/// Waiter metadata for one polling loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaiterConfig {
    /// The operation to poll.
    pub operation: String,
    /// Seconds between polls.
    pub delay: f64,
    /// Maximum number of polls.
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
    /// The acceptor rules, evaluated in order.
    pub acceptors: Vec<Acceptor>,
}

/// Polls one operation until an acceptor decides the outcome.
#[derive(Debug, Clone)]
pub struct Waiter {
    name: String,
    config: WaiterConfig,
    client: Client,
}

impl Waiter {
    pub(crate) fn new(client: Client, name: impl Into<String>, config: WaiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client,
        }
    }

    /// The waiter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Polls until success, terminal failure, or attempt exhaustion.
    ///
    /// # Errors
    ///
    /// Fails with a waiter error carrying the waiter name, the reason,
    /// and the last response when an acceptor reaches the failure state,
    /// when an unmatched response carries an `Error` document, or when
    /// `maxAttempts` polls have not reached success.
    pub async fn wait(&self, params: Value) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let response = match self.client.call(&self.config.operation, params.clone()).await {
                Ok(response) => response.data,
                // Service errors become error documents so `error`
                // matchers can inspect them.
                Err(Error::Service {
                    code,
                    message,
                    status,
                    ..
                }) => json!({
                    "Error": {"Code": code, "Message": message},
                    "ResponseMetadata": {"HTTPStatusCode": status.as_u16()},
                }),
                Err(other) => return Err(other),
            };

            let mut state = None;
            for acceptor in &self.config.acceptors {
                if acceptor.matches(&response) {
                    state = Some(acceptor.state);
                    break;
                }
            }

            if state.is_none() {
                if let Some(error) = response.get("Error") {
                    let code = error.get("Code").and_then(Value::as_str).unwrap_or("Unknown");
                    let message = error.get("Message").and_then(Value::as_str).unwrap_or("");
                    return Err(Error::WaiterFailure {
                        name: self.name.clone(),
                        reason: format!("unexpected error: {code}: {message}"),
                        last_response: response,
                    });
                }
            }

            match state {
                Some(AcceptorState::Success) => {
                    tracing::debug!(waiter = %self.name, attempts, "Waiter reached success state");
                    return Ok(());
                }
                Some(AcceptorState::Failure) => {
                    return Err(Error::WaiterFailure {
                        name: self.name.clone(),
                        reason: "a failure acceptor matched".to_string(),
                        last_response: response,
                    });
                }
                Some(AcceptorState::Retry) | None => {
                    if attempts >= self.config.max_attempts {
                        return Err(Error::WaiterMaxAttempts {
                            name: self.name.clone(),
                            attempts,
                            last_response: response,
                        });
                    }
                    tracing::debug!(
                        waiter = %self.name,
                        attempts,
                        delay = self.config.delay,
                        "Waiter condition not met; sleeping"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(self.config.delay)).await;
                }
            }
        }
    }
}
