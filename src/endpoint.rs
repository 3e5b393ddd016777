//! The endpoint: one logical operation invocation.
//!
//! [`Endpoint::send`] takes a fully-built request description and drives
//! the attempt loop: sign (attempt-aware), emit before-send hooks, call
//! the transport, convert the raw response to a [`ResponseDict`], hand it
//! to the protocol parser, and consult the retry policy. Each retry
//! rebuilds the request from the original description so a fresh
//! signature is produced, then awaits the backoff the policy returned.

use crate::body::StreamingBody;
use crate::hooks::{HookRegistry, SignRequest};
use crate::model::{OperationModel, ParseResponse};
use crate::retry::{RetryContext, RetryPolicy};
use crate::transport::{RawResponse, Transport};
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, Method};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// A request body.
pub enum Body {
    /// No body.
    Empty,
    /// An in-memory body; replayable across retries.
    Bytes(Bytes),
    /// A streaming body; can be sent exactly once.
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl Body {
    /// Clones the body if it is replayable.
    pub fn try_clone(&self) -> Option<Body> {
        match self {
            Body::Empty => Some(Body::Empty),
            Body::Bytes(bytes) => Some(Body::Bytes(bytes.clone())),
            Body::Stream(_) => None,
        }
    }

    /// Returns `true` for streaming bodies.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::Stream(_))
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

/// A request description: everything needed for one send.
///
/// Created by the serializer per call, mutated by pre-send hooks (signing,
/// checksums), and discarded when the call completes. The `context` map is
/// free-form space for hooks to exchange signing or checksum information.
#[derive(Debug)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,
    /// The absolute URL.
    pub url: Url,
    /// The request headers.
    pub headers: HeaderMap,
    /// The request body.
    pub body: Body,
    /// Free-form per-call context for hooks.
    pub context: HashMap<String, Value>,
}

impl Request {
    /// Creates a request with no body and an empty context.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
            context: HashMap::new(),
        }
    }

    /// Clones the request if its body is replayable.
    pub fn try_clone(&self) -> Option<Request> {
        Some(Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            context: self.context.clone(),
        })
    }
}

/// The converted response: status, normalized headers, buffered body.
///
/// Header keys are lower-cased strings, so lookups through
/// [`ResponseDict::header`] are case-insensitive. For streaming-output
/// operations the buffered body is empty and the stream travels separately.
#[derive(Debug, Clone)]
pub struct ResponseDict {
    /// The HTTP status code.
    pub status_code: u16,
    /// The response headers, keys lower-cased.
    pub headers: HashMap<String, String>,
    /// The buffered response body.
    pub body: Bytes,
}

impl ResponseDict {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// What the endpoint hands back for one operation invocation.
#[derive(Debug)]
pub struct EndpointResponse {
    /// The converted response.
    pub dict: ResponseDict,
    /// The body stream, for streaming-output operations.
    pub stream: Option<StreamingBody>,
    /// The parsed-response document.
    pub parsed: Value,
    /// How many retries were performed (attempts minus one).
    pub retries: u32,
}

/// Composes transport, signing, retry, and response conversion.
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn SignRequest>,
    parser: Arc<dyn ParseResponse>,
    retry_policy: Arc<dyn RetryPolicy>,
    hooks: HookRegistry,
    service_name: String,
}

impl Endpoint {
    /// Wires an endpoint from its collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        signer: Arc<dyn SignRequest>,
        parser: Arc<dyn ParseResponse>,
        retry_policy: Arc<dyn RetryPolicy>,
        hooks: HookRegistry,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            signer,
            parser,
            retry_policy,
            hooks,
            service_name: service_name.into(),
        }
    }

    /// Performs one logical operation invocation, retrying as the policy
    /// directs.
    ///
    /// On success the parsed document carries
    /// `ResponseMetadata.RetryAttempts` (the number of retries, not total
    /// tries); when the final attempt fails, that attempt's error is
    /// returned as-is.
    pub async fn send(
        &self,
        operation: &OperationModel,
        request: Request,
    ) -> Result<EndpointResponse> {
        let mut attempt: u32 = 1;
        let mut template = Some(request);

        loop {
            let attempt_request = match template.as_ref().and_then(Request::try_clone) {
                Some(clone) => clone,
                None => match template.take() {
                    Some(single_shot) => single_shot,
                    None => {
                        return Err(Error::Configuration(
                            "request body stream was already consumed and cannot be replayed"
                                .to_string(),
                        ))
                    }
                },
            };

            let outcome = self.attempt_once(operation, attempt_request, attempt).await;

            if let Err(e) = &outcome {
                tracing::warn!(
                    error = %e,
                    attempt,
                    operation = %operation.name,
                    "Operation attempt failed"
                );
            }

            // A consumed streaming body cannot be replayed; skip the policy.
            let delay = if template.is_some() {
                let decision = match &outcome {
                    Ok((dict, _, parsed)) => {
                        let error_code = parsed
                            .get("Error")
                            .and_then(|e| e.get("Code"))
                            .and_then(Value::as_str);
                        self.retry_policy.decide(&RetryContext {
                            attempt,
                            operation: &operation.name,
                            status: Some(dict.status_code),
                            headers: Some(&dict.headers),
                            error_code,
                            error: None,
                        })
                    }
                    Err(error) => self.retry_policy.decide(&RetryContext {
                        attempt,
                        operation: &operation.name,
                        status: None,
                        headers: None,
                        error_code: None,
                        error: Some(error),
                    }),
                };
                decision
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt,
                        operation = %operation.name,
                        "Retrying request after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    return outcome.map(|(dict, stream, mut parsed)| {
                        let retries = attempt - 1;
                        attach_response_metadata(&mut parsed, &dict, retries);
                        EndpointResponse {
                            dict,
                            stream,
                            parsed,
                            retries,
                        }
                    });
                }
            }
        }
    }

    /// One attempt: sign, before-send hooks, transport, convert, parse.
    async fn attempt_once(
        &self,
        operation: &OperationModel,
        mut request: Request,
        attempt: u32,
    ) -> Result<(ResponseDict, Option<StreamingBody>, Value)> {
        self.signer.sign(&mut request, attempt).await?;
        let event = format!("before-send.{}.{}", self.service_name, operation.name);
        self.hooks
            .emit_before_send(&event, &mut request, attempt)
            .await?;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            attempt,
            "Executing HTTP request"
        );

        let Request {
            method,
            url,
            headers,
            body,
            context: _,
        } = request;
        let raw = self.transport.request(method, url, headers, body).await?;
        let (dict, stream) = convert_response(operation, raw).await?;

        tracing::info!(
            status = dict.status_code,
            operation = %operation.name,
            attempt,
            "Received HTTP response"
        );

        let parsed = self.parser.parse(operation, &dict)?;
        Ok((dict, stream, parsed))
    }
}

/// Converts a raw transport response to a [`ResponseDict`].
///
/// Header keys are lower-cased; the body is left as a stream for
/// streaming-output operations with a success status and fully read
/// otherwise. Error statuses always read the body so the error payload can
/// be parsed.
pub(crate) async fn convert_response(
    operation: &OperationModel,
    raw: RawResponse,
) -> Result<(ResponseDict, Option<StreamingBody>)> {
    let status_code = raw.status.as_u16();
    let mut headers = HashMap::with_capacity(raw.headers.len());
    for (name, value) in raw.headers.iter() {
        headers.insert(
            name.as_str().to_ascii_lowercase(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<u64>().ok());

    let mut body_stream = StreamingBody::new(raw.body, content_length);
    if operation.streaming_output && status_code < 300 {
        Ok((
            ResponseDict {
                status_code,
                headers,
                body: Bytes::new(),
            },
            Some(body_stream),
        ))
    } else {
        let body = body_stream.read(None).await?;
        Ok((
            ResponseDict {
                status_code,
                headers,
                body,
            },
            None,
        ))
    }
}

/// Merges status, headers, and the retry count into the parsed document's
/// `ResponseMetadata`.
fn attach_response_metadata(parsed: &mut Value, dict: &ResponseDict, retries: u32) {
    if !parsed.is_object() {
        *parsed = Value::Object(Default::default());
    }
    if let Some(map) = parsed.as_object_mut() {
        let meta = map
            .entry("ResponseMetadata".to_string())
            .or_insert_with(|| json!({}));
        if let Some(meta) = meta.as_object_mut() {
            meta.insert("HTTPStatusCode".to_string(), json!(dict.status_code));
            meta.insert("HTTPHeaders".to_string(), json!(dict.headers));
            meta.insert("RetryAttempts".to_string(), json!(retries));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http::{HeaderValue, StatusCode};

    fn operation(streaming: bool) -> OperationModel {
        OperationModel {
            name: "GetWidget".to_string(),
            http_method: "GET".to_string(),
            request_uri: "/".to_string(),
            streaming_output: streaming,
        }
    }

    #[test]
    fn bytes_requests_are_replayable() {
        let mut request = Request::new(Method::POST, Url::parse("https://example.com/").unwrap());
        request.body = Body::Bytes(Bytes::from_static(b"payload"));
        assert!(request.try_clone().is_some());

        request.body = Body::Stream(futures::stream::empty().boxed());
        assert!(request.try_clone().is_none());
    }

    #[tokio::test]
    async fn conversion_lower_cases_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Amz-Request-Id", HeaderValue::from_static("abc123"));
        let raw = RawResponse::from_bytes(StatusCode::OK, headers, Bytes::from_static(b"{}"));

        let (dict, stream) = convert_response(&operation(false), raw).await.unwrap();
        assert!(stream.is_none());
        assert_eq!(dict.headers.get("x-amz-request-id").unwrap(), "abc123");
        // Lookup is case-insensitive through the helper.
        assert_eq!(dict.header("X-AMZ-REQUEST-ID"), Some("abc123"));
        assert_eq!(&dict.body[..], b"{}");
    }

    #[tokio::test]
    async fn streaming_success_keeps_the_stream() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length", HeaderValue::from_static("4"));
        let raw = RawResponse::from_bytes(StatusCode::OK, headers, Bytes::from_static(b"data"));

        let (dict, stream) = convert_response(&operation(true), raw).await.unwrap();
        assert!(dict.body.is_empty());
        let mut stream = stream.unwrap();
        assert_eq!(stream.content_length(), Some(4));
        assert_eq!(&stream.read(None).await.unwrap()[..], b"data");
    }

    #[tokio::test]
    async fn streaming_error_statuses_are_fully_read() {
        let raw = RawResponse::from_bytes(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Bytes::from_static(b"<Error/>"),
        );
        let (dict, stream) = convert_response(&operation(true), raw).await.unwrap();
        assert!(stream.is_none());
        assert_eq!(&dict.body[..], b"<Error/>");
    }

    #[test]
    fn metadata_is_attached_to_the_parsed_document() {
        let mut parsed = json!({"Items": []});
        let dict = ResponseDict {
            status_code: 200,
            headers: HashMap::from([("x-test".to_string(), "1".to_string())]),
            body: Bytes::new(),
        };
        attach_response_metadata(&mut parsed, &dict, 2);
        assert_eq!(parsed["ResponseMetadata"]["RetryAttempts"], json!(2));
        assert_eq!(parsed["ResponseMetadata"]["HTTPStatusCode"], json!(200));
        assert_eq!(parsed["ResponseMetadata"]["HTTPHeaders"]["x-test"], json!("1"));
    }
}
