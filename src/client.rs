//! The per-service client facade.
//!
//! One [`Client`] binds a service model, an endpoint, and the collaborator
//! seams (serializer, parser, signer, retry policy) together. Use
//! [`ClientBuilder`] to configure and create clients; the client is cheap
//! to clone and shares one connection pool across clones.

use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, EndpointResponse};
use crate::hooks::{HookRegistry, NoopSigner, SignRequest};
use crate::model::{ParseResponse, SerializeRequest, ServiceModel};
use crate::paginate::Paginator;
use crate::response::ServiceResponse;
use crate::retry::{RetryPolicy, StandardRetryPolicy};
use crate::transport::{HttpTransport, Transport};
use crate::waiter::Waiter;
use crate::{Error, Result};
use http::header::USER_AGENT;
use http::{HeaderValue, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use url::Url;

/// An async client for one service.
///
/// Operation calls go through [`Client::call`]; multi-page list operations
/// through [`Client::paginator`]; polling through [`Client::waiter`]. The
/// client owns its endpoint and connection pool exclusively — leaving the
/// client's scope (an awaited [`Client::close`]) shuts the pool down,
/// while in-flight calls on clones keep it alive until they finish.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use serde_json::Value;
/// use wavecall::{Body, Client, Request, ResponseDict};
/// use wavecall::model::{OperationModel, ParseResponse, SerializeRequest, ServiceModel};
///
/// // A minimal JSON protocol: parameters in, a JSON document out. Real
/// // serializers and parsers come from the embedding SDK.
/// struct JsonProtocol;
///
/// impl SerializeRequest for JsonProtocol {
///     fn serialize(
///         &self,
///         _operation: &OperationModel,
///         params: &Value,
///         endpoint_url: &url::Url,
///     ) -> wavecall::Result<Request> {
///         let mut request = Request::new(http::Method::POST, endpoint_url.clone());
///         request.body = Body::Bytes(serde_json::to_vec(params).unwrap().into());
///         Ok(request)
///     }
/// }
///
/// impl ParseResponse for JsonProtocol {
///     fn parse(
///         &self,
///         _operation: &OperationModel,
///         response: &ResponseDict,
///     ) -> wavecall::Result<Value> {
///         Ok(serde_json::from_slice(&response.body).unwrap_or(Value::Null))
///     }
/// }
///
/// # async fn example() -> Result<(), wavecall::Error> {
/// let model = ServiceModel::from_json(r#"{
///     "service_name": "widgets",
///     "endpoint_prefix": "widgets",
///     "operations": {"ListWidgets": {"name": "ListWidgets"}}
/// }"#)?;
///
/// let client = Client::builder()
///     .service_model(model)
///     .endpoint_url("https://widgets.us-west-2.example.com")?
///     .serializer(Arc::new(JsonProtocol))
///     .parser(Arc::new(JsonProtocol))
///     .build()?;
///
/// let response = client.call("ListWidgets", serde_json::json!({})).await?;
/// println!("widgets: {}", response.data);
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    service: ServiceModel,
    config: ClientConfig,
    endpoint_url: Url,
    serializer: Arc<dyn SerializeRequest>,
    hooks: HookRegistry,
    endpoint: RwLock<Option<Arc<Endpoint>>>,
}

impl Client {
    /// Creates a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The service model this client is bound to.
    pub fn service_model(&self) -> &ServiceModel {
        &self.inner.service
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Invokes one operation.
    ///
    /// Hook order per call: before-call, then per attempt before-send
    /// (signing first), then after-call with the parsed response. A
    /// response with status >= 300 is raised as a service error carrying
    /// the parsed error code, message, status, and operation name.
    pub async fn call(&self, operation_name: &str, params: Value) -> Result<ServiceResponse> {
        let endpoint = self.endpoint()?;
        let operation = self.inner.service.operation(operation_name).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown operation {operation_name} for service {}",
                self.inner.service.service_name
            ))
        })?;

        if self.inner.config.validate_params {
            self.inner.serializer.validate(operation, &params)?;
        }

        let service = &self.inner.service.service_name;
        let mut context = HashMap::new();
        self.inner
            .hooks
            .emit_before_call(
                &format!("before-call.{service}.{}", operation.name),
                operation,
                &params,
                &mut context,
            )
            .await?;

        let mut request =
            self.inner
                .serializer
                .serialize(operation, &params, &self.inner.endpoint_url)?;
        if !request.headers.contains_key(USER_AGENT) {
            let user_agent = self.inner.config.full_user_agent();
            request.headers.insert(
                USER_AGENT,
                HeaderValue::from_str(&user_agent).map_err(|e| {
                    Error::Configuration(format!("invalid user agent \"{user_agent}\": {e}"))
                })?,
            );
        }
        request.context.extend(context);

        let start = Instant::now();
        let response = endpoint.send(operation, request).await?;
        let latency = start.elapsed();

        self.inner
            .hooks
            .emit_after_call(
                &format!("after-call.{service}.{}", operation.name),
                operation,
                &response.dict,
                &response.parsed,
            )
            .await?;

        let EndpointResponse {
            dict,
            stream,
            parsed,
            retries,
        } = response;

        let status = StatusCode::from_u16(dict.status_code)
            .map_err(|e| Error::Configuration(format!("invalid status code: {e}")))?;

        if dict.status_code >= 300 {
            let code = parsed
                .get("Error")
                .and_then(|e| e.get("Code"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            let message = parsed
                .get("Error")
                .and_then(|e| e.get("Message"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            tracing::warn!(
                status = dict.status_code,
                code = %code,
                operation = %operation.name,
                "Service returned an error response"
            );
            return Err(Error::Service {
                code,
                message,
                status,
                operation: operation.name.clone(),
            });
        }

        Ok(ServiceResponse {
            data: parsed,
            body: stream,
            status,
            headers: dict.headers,
            latency,
            attempts: retries + 1,
        })
    }

    /// Creates a paginator for a pageable operation.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the service model declares no
    /// pagination rules for the operation.
    pub fn paginator(&self, operation: &str) -> Result<Paginator> {
        let config = self
            .inner
            .service
            .pagination
            .get(operation)
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!("operation {operation} is not pageable"))
            })?;
        Ok(Paginator::new(self.clone(), operation, config))
    }

    /// Creates a waiter by name.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the service model declares no
    /// waiter with that name.
    pub fn waiter(&self, name: &str) -> Result<Waiter> {
        let config = self
            .inner
            .service
            .waiters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no waiter named {name}")))?;
        Ok(Waiter::new(self.clone(), name, config))
    }

    /// Closes the client, releasing the connection pool.
    ///
    /// Idempotent. Calls started before `close` keep their endpoint alive
    /// until they finish; calls made afterwards fail with a configuration
    /// error.
    pub async fn close(&self) {
        if let Ok(mut guard) = self.inner.endpoint.write() {
            *guard = None;
        }
    }

    /// Returns `true` once the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner
            .endpoint
            .read()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    fn endpoint(&self) -> Result<Arc<Endpoint>> {
        self.inner
            .endpoint
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| Error::Configuration("client is closed".to_string()))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.inner.service.service_name)
            .field("endpoint_url", &self.inner.endpoint_url.as_str())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    service: Option<ServiceModel>,
    endpoint_url: Option<Url>,
    config: ClientConfig,
    serializer: Option<Arc<dyn SerializeRequest>>,
    parser: Option<Arc<dyn ParseResponse>>,
    signer: Arc<dyn SignRequest>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    transport: Option<Arc<dyn Transport>>,
    hooks: HookRegistry,
}

impl ClientBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            service: None,
            endpoint_url: None,
            config: ClientConfig::default(),
            serializer: None,
            parser: None,
            signer: Arc::new(NoopSigner),
            retry_policy: None,
            transport: None,
            hooks: HookRegistry::new(),
        }
    }

    /// Sets the service model. Required.
    pub fn service_model(mut self, service: ServiceModel) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets the endpoint URL all operations are addressed to. Required.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn endpoint_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.endpoint_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the client configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the request serializer. Required.
    pub fn serializer(mut self, serializer: Arc<dyn SerializeRequest>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Sets the response parser. Required.
    pub fn parser(mut self, parser: Arc<dyn ParseResponse>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Sets the request signer. Defaults to a no-op signer.
    pub fn signer(mut self, signer: Arc<dyn SignRequest>) -> Self {
        self.signer = signer;
        self
    }

    /// Overrides the retry policy.
    ///
    /// By default the policy is built from the configuration's `retries`
    /// section.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Overrides the HTTP transport. Defaults to the pooled transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The hook registry handlers are registered on.
    ///
    /// The client snapshots the registry at build time; registrations made
    /// after `build` do not affect already-built clients.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Builds the configured [`Client`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a required collaborator is
    /// missing or the configuration fails validation.
    pub fn build(self) -> Result<Client> {
        let service = self
            .service
            .ok_or_else(|| Error::Configuration("a service model is required".to_string()))?;
        let endpoint_url = self
            .endpoint_url
            .ok_or_else(|| Error::Configuration("an endpoint URL is required".to_string()))?;
        let serializer = self
            .serializer
            .ok_or_else(|| Error::Configuration("a request serializer is required".to_string()))?;
        let parser = self
            .parser
            .ok_or_else(|| Error::Configuration("a response parser is required".to_string()))?;

        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let retry_policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(StandardRetryPolicy::from_config(&self.config.retries)),
        };

        // Snapshot: later registrations on the builder are invisible here.
        let hooks = self.hooks.clone();
        let endpoint = Endpoint::new(
            transport,
            self.signer,
            parser,
            retry_policy,
            hooks.clone(),
            service.service_name.clone(),
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                service,
                config: self.config,
                endpoint_url,
                serializer,
                hooks,
                endpoint: RwLock::new(Some(Arc::new(endpoint))),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
