//! Retry policies, strategies, and predicates.
//!
//! The endpoint consults a [`RetryPolicy`] after every attempt with a
//! [`RetryContext`] describing what happened; the policy answers with
//! `None` (stop) or a sleep duration (retry after the backoff). The
//! [`StandardRetryPolicy`] composes a [`RetryStrategy`] (when and how long
//! to back off) with a [`RetryPredicate`] (which outcomes are worth
//! retrying) and honors `Retry-After` on throttling responses.

use crate::config::{RetryConfig, RetryMode};
use crate::error::THROTTLING_ERROR_CODES;
use crate::Error;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// What the retry policy sees after one attempt.
///
/// Exactly one of `status` (the attempt produced a response) or `error`
/// (the attempt raised) is populated; `error_code` is extracted from the
/// parsed response body when the service answered with an error document.
pub struct RetryContext<'a> {
    /// The attempt that just finished, 1-based.
    pub attempt: u32,
    /// The operation being invoked.
    pub operation: &'a str,
    /// The HTTP status code of the response, if one arrived.
    pub status: Option<u16>,
    /// The lower-cased response headers, if a response arrived.
    pub headers: Option<&'a HashMap<String, String>>,
    /// The service error code parsed out of the response body, if any.
    pub error_code: Option<&'a str>,
    /// The error the attempt raised, if it raised.
    pub error: Option<&'a Error>,
}

impl RetryContext<'_> {
    /// Returns `true` if the attempt was throttled by the service.
    pub fn is_throttled(&self) -> bool {
        self.status == Some(429)
            || self
                .error_code
                .is_some_and(|code| THROTTLING_ERROR_CODES.contains(&code))
    }
}

/// Decides, for each attempt, whether to retry and for how long to wait.
///
/// This is the needs-retry seam: the endpoint calls `decide` once per
/// attempt and sleeps for whatever duration it returns before the next
/// one.
pub trait RetryPolicy: Send + Sync {
    /// Returns the backoff before the next attempt, or `None` to stop.
    fn decide(&self, ctx: &RetryContext<'_>) -> Option<Duration>;
}

/// A policy that never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn decide(&self, _ctx: &RetryContext<'_>) -> Option<Duration> {
        None
    }
}

/// Defines when and how to back off between attempts.
///
/// # Examples
///
/// ```
/// use wavecall::retry::RetryStrategy;
/// use std::time::Duration;
///
/// // Exponential backoff: 100ms, 200ms, 400ms, 800ms...
/// let exponential = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     max_retries: 5,
///     jitter: true,
/// };
///
/// // Linear backoff: 1s, 1s, 1s
/// let linear = RetryStrategy::Linear {
///     delay: Duration::from_secs(1),
///     max_retries: 3,
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// Do not retry failed attempts.
    #[default]
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Each retry waits `initial_delay * 2^(attempt - 1)`, capped at
    /// `max_delay`. Jitter scales the delay by a random factor in
    /// `[0.5, 1.0]` to prevent thundering herds.
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// The maximum delay between retries.
        max_delay: Duration,
        /// The maximum number of retries.
        max_retries: usize,
        /// Whether to add random jitter to delays.
        jitter: bool,
    },

    /// Retry with a fixed delay between attempts.
    Linear {
        /// The delay between retries.
        delay: Duration,
        /// The maximum number of retries.
        max_retries: usize,
    },

    /// Custom backoff schedule.
    Custom {
        /// Takes the attempt number (1-indexed) and returns the delay
        /// before the next attempt, or `None` to stop retrying.
        delay_fn: fn(attempt: u32) -> Option<Duration>,
    },
}

impl RetryStrategy {
    /// Returns the delay after the given failed attempt, or `None` when
    /// retries are exhausted.
    ///
    /// `attempt` is 1-indexed: `delay_for_attempt(1)` is the backoff
    /// between the first and second attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if attempt as usize > *max_retries {
                    return None;
                }
                let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
                let base_delay =
                    initial_delay.saturating_mul(multiplier.try_into().unwrap_or(u32::MAX));
                let delay = base_delay.min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Linear { delay, max_retries } => {
                if attempt as usize > *max_retries {
                    None
                } else {
                    Some(*delay)
                }
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }
}

/// Trait for deciding whether a finished attempt is worth retrying.
///
/// # Examples
///
/// ```
/// use wavecall::retry::{RetryContext, RetryPredicate};
///
/// struct RetryOn503;
///
/// impl RetryPredicate for RetryOn503 {
///     fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
///         ctx.status == Some(503)
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if the attempt described by `ctx` should be retried.
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool;
}

/// Retry transient failures: network-class errors, 5xx and 429 responses,
/// and throttling error codes.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTransient;

impl RetryPredicate for RetryOnTransient {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        if let Some(error) = ctx.error {
            return error.is_retryable();
        }
        if ctx.is_throttled() {
            return true;
        }
        matches!(ctx.status, Some(status) if status >= 500)
    }
}

/// Retry only on 5xx responses.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        matches!(ctx.status, Some(status) if status >= 500)
    }
}

/// Retry only on connect/read timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        matches!(
            ctx.error,
            Some(Error::ConnectTimeout { .. }) | Some(Error::ReadTimeout { .. })
        )
    }
}

/// Retry only on connection-level failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        matches!(
            ctx.error,
            Some(Error::ConnectionClosed { .. })
                | Some(Error::EndpointConnection { .. })
                | Some(Error::ProxyConnection { .. })
                | Some(Error::Network(_))
        )
    }
}

/// Combine predicates with OR logic: retries if ANY predicate agrees.
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    /// Creates a new `OrPredicate` from a list of predicates.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        self.predicates.iter().any(|p| p.should_retry(ctx))
    }
}

/// Combine predicates with AND logic: retries only if ALL predicates agree.
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    /// Creates a new `AndPredicate` from a list of predicates.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        self.predicates.iter().all(|p| p.should_retry(ctx))
    }
}

/// The default retry policy: strategy × predicate, with `Retry-After`
/// support on throttling responses.
///
/// When a throttled response carries a `Retry-After` header (either
/// delay-seconds or an HTTP date), the indicated wait — capped by
/// `max_retry_after` — replaces the computed backoff for that attempt.
pub struct StandardRetryPolicy {
    strategy: RetryStrategy,
    predicate: Box<dyn RetryPredicate>,
    respect_retry_after: bool,
    max_retry_after: Duration,
}

impl StandardRetryPolicy {
    /// Creates a policy from an explicit strategy and predicate.
    pub fn new(strategy: RetryStrategy, predicate: Box<dyn RetryPredicate>) -> Self {
        Self {
            strategy,
            predicate,
            respect_retry_after: true,
            max_retry_after: Duration::from_secs(300),
        }
    }

    /// Creates the policy described by a [`RetryConfig`].
    pub fn from_config(config: &RetryConfig) -> Self {
        let max_retries = config.max_attempts.saturating_sub(1) as usize;
        let strategy = match config.mode {
            RetryMode::Legacy => RetryStrategy::ExponentialBackoff {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(10),
                max_retries,
                jitter: true,
            },
            RetryMode::Standard | RetryMode::Adaptive => RetryStrategy::ExponentialBackoff {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(20),
                max_retries,
                jitter: true,
            },
        };
        Self::new(strategy, Box::new(RetryOnTransient))
    }

    /// Sets whether `Retry-After` headers are honored.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Caps the wait taken from a `Retry-After` header.
    pub fn max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }
}

impl RetryPolicy for StandardRetryPolicy {
    fn decide(&self, ctx: &RetryContext<'_>) -> Option<Duration> {
        if !self.predicate.should_retry(ctx) {
            return None;
        }
        let delay = self.strategy.delay_for_attempt(ctx.attempt)?;
        if self.respect_retry_after && ctx.is_throttled() {
            if let Some(retry_after) = ctx.headers.and_then(parse_retry_after) {
                tracing::info!(
                    retry_after_ms = retry_after.as_millis(),
                    attempt = ctx.attempt,
                    operation = ctx.operation,
                    "Throttled; honoring Retry-After"
                );
                return Some(retry_after.min(self.max_retry_after));
            }
        }
        Some(delay)
    }
}

/// Parses a `Retry-After` header value from a lower-cased header map.
///
/// Supports both delay-seconds (integer) and HTTP-date formats.
fn parse_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    let header = headers.get("retry-after")?;

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date_time) = httpdate::parse_http_date(header) {
        if let Ok(duration) = date_time.duration_since(SystemTime::now()) {
            return Some(duration);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_ctx(attempt: u32, status: u16) -> RetryContext<'static> {
        RetryContext {
            attempt,
            operation: "ListWidgets",
            status: Some(status),
            headers: None,
            error_code: None,
            error: None,
        }
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 5,
            jitter: false,
        };

        assert_eq!(
            strategy.delay_for_attempt(1),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            strategy.delay_for_attempt(2),
            Some(Duration::from_millis(200))
        );
        assert_eq!(
            strategy.delay_for_attempt(3),
            Some(Duration::from_millis(400))
        );
        assert_eq!(
            strategy.delay_for_attempt(4),
            Some(Duration::from_millis(800))
        );
        assert_eq!(
            strategy.delay_for_attempt(5),
            Some(Duration::from_millis(1600))
        );
        assert_eq!(strategy.delay_for_attempt(6), None);
    }

    #[test]
    fn test_linear_delays() {
        let strategy = RetryStrategy::Linear {
            delay: Duration::from_secs(1),
            max_retries: 3,
        };

        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(3), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_no_retry() {
        let strategy = RetryStrategy::None;
        assert_eq!(strategy.delay_for_attempt(1), None);
    }

    #[test]
    fn transient_predicate_classifies_statuses() {
        let predicate = RetryOnTransient;
        assert!(predicate.should_retry(&response_ctx(1, 500)));
        assert!(predicate.should_retry(&response_ctx(1, 503)));
        assert!(predicate.should_retry(&response_ctx(1, 429)));
        assert!(!predicate.should_retry(&response_ctx(1, 404)));
        assert!(!predicate.should_retry(&response_ctx(1, 200)));
    }

    #[test]
    fn transient_predicate_recognises_throttle_codes() {
        let ctx = RetryContext {
            attempt: 1,
            operation: "PutWidget",
            status: Some(400),
            headers: None,
            error_code: Some("Throttling"),
            error: None,
        };
        assert!(RetryOnTransient.should_retry(&ctx));
    }

    #[test]
    fn standard_policy_stops_after_max_attempts() {
        let policy = StandardRetryPolicy::new(
            RetryStrategy::Linear {
                delay: Duration::from_millis(10),
                max_retries: 2,
            },
            Box::new(RetryOnTransient),
        );

        assert!(policy.decide(&response_ctx(1, 500)).is_some());
        assert!(policy.decide(&response_ctx(2, 500)).is_some());
        assert!(policy.decide(&response_ctx(3, 500)).is_none());
    }

    #[test]
    fn standard_policy_declines_non_retryable_outcomes() {
        let policy = StandardRetryPolicy::new(
            RetryStrategy::Linear {
                delay: Duration::from_millis(10),
                max_retries: 5,
            },
            Box::new(RetryOnTransient),
        );
        assert!(policy.decide(&response_ctx(1, 404)).is_none());
    }

    #[test]
    fn retry_after_overrides_backoff_when_throttled() {
        let policy = StandardRetryPolicy::new(
            RetryStrategy::Linear {
                delay: Duration::from_millis(10),
                max_retries: 5,
            },
            Box::new(RetryOnTransient),
        );

        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "2".to_string());
        let ctx = RetryContext {
            attempt: 1,
            operation: "PutWidget",
            status: Some(429),
            headers: Some(&headers),
            error_code: None,
            error: None,
        };
        assert_eq!(policy.decide(&ctx), Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = StandardRetryPolicy::new(
            RetryStrategy::Linear {
                delay: Duration::from_millis(10),
                max_retries: 5,
            },
            Box::new(RetryOnTransient),
        )
        .max_retry_after(Duration::from_secs(30));

        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "600".to_string());
        let ctx = RetryContext {
            attempt: 1,
            operation: "PutWidget",
            status: Some(429),
            headers: Some(&headers),
            error_code: None,
            error: None,
        };
        assert_eq!(policy.decide(&ctx), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_retry_after_supports_seconds() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "60".to_string());
        assert_eq!(
            parse_retry_after(&headers),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn never_retry_never_retries() {
        assert!(NeverRetry.decide(&response_ctx(1, 500)).is_none());
    }
}
