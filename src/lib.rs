//! # Wavecall - an async core for service-description-driven API clients
//!
//! Wavecall is the asynchronous machinery under an AWS-style SDK: the
//! retrying HTTP endpoint, streaming response bodies, event-stream
//! decoding, paginators, and waiters. It deliberately does *not* know any
//! wire protocol — serialization, response parsing, and request signing
//! are traits ([`model::SerializeRequest`], [`model::ParseResponse`],
//! [`hooks::SignRequest`]) implemented by the embedding SDK.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::Value;
//! use wavecall::{Body, Client, Request, ResponseDict};
//! use wavecall::model::{OperationModel, ParseResponse, SerializeRequest, ServiceModel};
//!
//! struct JsonProtocol;
//!
//! impl SerializeRequest for JsonProtocol {
//!     fn serialize(
//!         &self,
//!         _operation: &OperationModel,
//!         params: &Value,
//!         endpoint_url: &url::Url,
//!     ) -> wavecall::Result<Request> {
//!         let mut request = Request::new(http::Method::POST, endpoint_url.clone());
//!         request.body = Body::Bytes(serde_json::to_vec(params).unwrap().into());
//!         Ok(request)
//!     }
//! }
//!
//! impl ParseResponse for JsonProtocol {
//!     fn parse(
//!         &self,
//!         _operation: &OperationModel,
//!         response: &ResponseDict,
//!     ) -> wavecall::Result<Value> {
//!         Ok(serde_json::from_slice(&response.body).unwrap_or(Value::Null))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wavecall::Error> {
//!     let model = ServiceModel::from_json(r#"{
//!         "service_name": "widgets",
//!         "endpoint_prefix": "widgets",
//!         "operations": {"ListWidgets": {"name": "ListWidgets"}},
//!         "pagination": {
//!             "ListWidgets": {"input_token": "Marker", "output_token": "NextMarker",
//!                             "result_key": "Widgets"}
//!         }
//!     }"#)?;
//!
//!     let client = Client::builder()
//!         .service_model(model)
//!         .endpoint_url("https://widgets.us-west-2.example.com")?
//!         .serializer(Arc::new(JsonProtocol))
//!         .parser(Arc::new(JsonProtocol))
//!         .build()?;
//!
//!     // One call.
//!     let response = client.call("ListWidgets", serde_json::json!({})).await?;
//!     println!("{}", response.data["Widgets"]);
//!
//!     // All pages.
//!     let mut pages = client
//!         .paginator("ListWidgets")?
//!         .paginate(serde_json::json!({}), Default::default())?;
//!     while let Some(page) = pages.next_page().await? {
//!         println!("{}", page["Widgets"]);
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Retrying endpoint** - per-attempt signing, pluggable retry policies
//!   with exponential backoff and `Retry-After` support, and a retry count
//!   attached to response metadata
//! - **Streaming bodies** - bounded reads, chunk and line iteration, and
//!   content-length verification that raises on short bodies
//! - **Event streams** - framed binary responses decoded as an async
//!   sequence through a pluggable event parser
//! - **Paginators** - continuation-token threading, max-items truncation
//!   with resume tokens, and repeated-token loop detection
//! - **Waiters** - acceptor-driven polling with bounded attempts
//! - **Async credentials** - provider chains and self-refreshing
//!   credentials behind one awaitable interface
//! - **Structured logging** - request, response, and retry events via
//!   `tracing`
//!
//! ## Concurrency model
//!
//! Everything suspends cooperatively; the only blocking work (credential
//! file parsing) is offloaded to a worker thread once per lookup. A
//! client's connection pool is its only shared mutable state and is safe
//! for concurrent calls; cancelling one call never tears down the pool.

pub mod body;
mod client;
pub mod config;
pub mod credentials;
mod endpoint;
mod error;
pub mod eventstream;
pub mod hooks;
pub mod model;
pub mod paginate;
mod response;
pub mod retry;
mod transport;
pub mod waiter;

pub use body::StreamingBody;
pub use client::{Client, ClientBuilder};
pub use endpoint::{Body, Endpoint, EndpointResponse, Request, ResponseDict};
pub use error::{Error, Result, THROTTLING_ERROR_CODES};
pub use eventstream::{EventParser, EventStream};
pub use response::ServiceResponse;
pub use transport::{HttpTransport, RawResponse, Transport};
