//! Response wrapper returned by client operation calls.
//!
//! [`ServiceResponse`] carries the parsed-response document together with
//! metadata about the HTTP transaction — status, normalized headers,
//! latency, and how many attempts the call took. Streaming-output
//! operations additionally hand over the body stream; ownership of that
//! stream transfers to the caller.

use crate::body::StreamingBody;
use crate::eventstream::{EventParser, EventStream};
use crate::{Error, Result};
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A successful operation response.
///
/// # Examples
///
/// ```no_run
/// # async fn example(client: wavecall::Client) -> Result<(), wavecall::Error> {
/// let response = client.call("ListTables", serde_json::json!({})).await?;
///
/// println!("Tables: {}", response.data["TableNames"]);
/// println!("Request took {:?}", response.latency);
/// if response.was_retried() {
///     println!("Needed {} attempts", response.attempts);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServiceResponse {
    /// The parsed-response document, including `ResponseMetadata`.
    pub data: Value,

    /// The body stream for streaming-output operations.
    ///
    /// `None` for operations whose body was buffered into the parsed
    /// document. Dropping the stream releases the connection.
    pub body: Option<StreamingBody>,

    /// The HTTP status code of the final attempt.
    pub status: StatusCode,

    /// The response headers, keys lower-cased.
    pub headers: HashMap<String, String>,

    /// Total latency across all attempts.
    pub latency: Duration,

    /// How many attempts the call took; `1` means no retries.
    pub attempts: u32,
}

impl ServiceResponse {
    /// Returns `true` if the call needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Takes the streaming body out of the response.
    pub fn take_body(&mut self) -> Option<StreamingBody> {
        self.body.take()
    }

    /// Converts a streaming response into an event stream.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the operation did not
    /// produce a streaming body.
    pub fn into_event_stream(self, parser: Arc<dyn EventParser>) -> Result<EventStream> {
        match self.body {
            Some(body) => Ok(EventStream::from_body(body, parser)),
            None => Err(Error::Configuration(
                "response has no streaming body to decode events from".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> ServiceResponse {
        ServiceResponse {
            data: json!({"Ok": true}),
            body: None,
            status: StatusCode::OK,
            headers: HashMap::from([("x-request-id".to_string(), "abc".to_string())]),
            latency: Duration::from_millis(5),
            attempts: 1,
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = response();
        assert_eq!(response.header("X-Request-Id"), Some("abc"));
        assert_eq!(response.header("x-request-id"), Some("abc"));
        assert_eq!(response.header("missing"), None);
    }

    #[test]
    fn retried_flag_follows_attempts() {
        let mut response = response();
        assert!(!response.was_retried());
        response.attempts = 3;
        assert!(response.was_retried());
    }

    #[test]
    fn event_stream_conversion_requires_a_body() {
        struct NoopParser;
        impl EventParser for NoopParser {
            fn parse_event(&self, _frame: &[u8]) -> Result<Value> {
                Ok(Value::Null)
            }
        }
        let err = response().into_event_stream(Arc::new(NoopParser));
        assert!(matches!(err, Err(Error::Configuration(_))));
    }
}
