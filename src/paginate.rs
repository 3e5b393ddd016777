//! Pagination over multi-page list operations.
//!
//! A [`Paginator`] is built from the service model's [`PaginationConfig`]
//! and threads continuation tokens from each page's output into the next
//! page's input. [`PageStream`] is the async page iterator: call
//! [`PageStream::next_page`] in a loop, or convert it with
//! [`PageStream::into_stream`]. A `max_items` cap truncates the final page
//! and records a resume token that a later run can pass as
//! `starting_token` to pick up where the first left off.

use crate::client::Client;
use crate::model::resolve_path;
use crate::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// One or several token names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenSpec {
    /// A single token name.
    Single(String),
    /// Several token names, threaded positionally.
    Many(Vec<String>),
}

impl TokenSpec {
    /// The token names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            TokenSpec::Single(name) => vec![name.as_str()],
            TokenSpec::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Pagination metadata for one operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    /// Parameter name(s) the continuation token is injected into.
    pub input_token: TokenSpec,
    /// Path(s) the next continuation token is extracted from.
    pub output_token: TokenSpec,
    /// Path of the primary result list.
    pub result_key: String,
    /// Parameter that caps the page size, when the operation has one.
    #[serde(default)]
    pub limit_key: Option<String>,
}

/// Caller-supplied pagination controls.
#[derive(Debug, Clone, Default)]
pub struct PaginationParams {
    /// Stop after this many items, recording a resume token.
    pub max_items: Option<u64>,
    /// Ask the service for pages of this size (requires a limit key).
    pub page_size: Option<u64>,
    /// Resume from a token recorded by an earlier run.
    pub starting_token: Option<String>,
}

/// Creates page streams for one operation of one client.
#[derive(Debug, Clone)]
pub struct Paginator {
    client: Client,
    operation: String,
    config: PaginationConfig,
}

impl Paginator {
    pub(crate) fn new(client: Client, operation: impl Into<String>, config: PaginationConfig) -> Self {
        Self {
            client,
            operation: operation.into(),
            config,
        }
    }

    /// Starts a paginated run with the given operation parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `params` is not an object (or
    /// null), or when a page size is requested for an operation with no
    /// limit key.
    pub fn paginate(&self, params: Value, options: PaginationParams) -> Result<PageStream> {
        let base_params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Configuration(format!(
                    "operation parameters must be an object, got {other}"
                )))
            }
        };
        if options.page_size.is_some() && self.config.limit_key.is_none() {
            return Err(Error::Configuration(format!(
                "page_size is not supported: operation {} has no limit key",
                self.operation
            )));
        }
        let token_count = self.config.input_token.names().len();
        let (current_tokens, starting_truncation) = match &options.starting_token {
            Some(token) => parse_starting_token(token, token_count),
            None => (vec![None; token_count], 0),
        };

        Ok(PageStream {
            client: self.client.clone(),
            operation: self.operation.clone(),
            config: self.config.clone(),
            base_params,
            max_items: options.max_items,
            page_size: options.page_size,
            state: PageState::FirstPagePending,
            current_tokens,
            previous_tokens: None,
            starting_truncation,
            num_results: 0,
            resume_token: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    FirstPagePending,
    InProgress,
    Stopped,
}

/// An async iterator over the pages of one paginated run.
///
/// Pages are fetched strictly in order; the next page is requested only
/// when the caller asks for it.
pub struct PageStream {
    client: Client,
    operation: String,
    config: PaginationConfig,
    base_params: Map<String, Value>,
    max_items: Option<u64>,
    page_size: Option<u64>,
    state: PageState,
    current_tokens: Vec<Option<String>>,
    previous_tokens: Option<Vec<Option<String>>>,
    starting_truncation: u64,
    num_results: u64,
    resume_token: Option<String>,
}

impl PageStream {
    /// Fetches the next page, or `None` when the run is complete.
    pub async fn next_page(&mut self) -> Result<Option<Value>> {
        if self.state == PageState::Stopped {
            return Ok(None);
        }

        let mut params = self.base_params.clone();
        for (name, token) in self
            .config
            .input_token
            .names()
            .into_iter()
            .zip(&self.current_tokens)
        {
            if let Some(token) = token {
                params.insert(name.to_string(), json!(token));
            }
        }
        if let (Some(limit_key), Some(page_size)) = (&self.config.limit_key, self.page_size) {
            params.insert(limit_key.clone(), json!(page_size));
        }

        let response = self
            .client
            .call(&self.operation, Value::Object(params))
            .await?;
        let mut page = response.data;

        let first_page = self.state == PageState::FirstPagePending;
        self.state = PageState::InProgress;

        // A resumed run drops the items the recorded offset already covered.
        if first_page && self.starting_truncation > 0 {
            truncate_front(&mut page, &self.config.result_key, self.starting_truncation);
        }

        let page_len = result_len(&page, &self.config.result_key);
        if let Some(max) = self.max_items {
            let remaining = max.saturating_sub(self.num_results);
            if page_len > remaining {
                truncate_back(&mut page, &self.config.result_key, remaining);
                self.num_results += remaining;

                let offset = if first_page {
                    self.starting_truncation + remaining
                } else {
                    remaining
                };
                let mut components: Vec<String> = self
                    .current_tokens
                    .iter()
                    .map(|t| t.clone().unwrap_or_else(|| "None".to_string()))
                    .collect();
                components.push(offset.to_string());
                self.resume_token = Some(components.join("___"));
                self.state = PageState::Stopped;
                return Ok(Some(page));
            }
            self.num_results += page_len;
        } else {
            self.num_results += page_len;
        }

        let next_tokens: Vec<Option<String>> = self
            .config
            .output_token
            .names()
            .into_iter()
            .map(|path| token_value(resolve_path(&page, path)))
            .collect();

        if !next_tokens.iter().any(Option::is_some) {
            self.state = PageState::Stopped;
            self.resume_token = None;
            return Ok(Some(page));
        }

        if self.previous_tokens.as_ref() == Some(&next_tokens) {
            self.state = PageState::Stopped;
            return Err(Error::PaginationLoop {
                token: join_tokens(&next_tokens),
            });
        }

        if matches!(self.max_items, Some(max) if self.num_results >= max) {
            // Hit the cap exactly on a page boundary.
            self.resume_token = Some(join_tokens(&next_tokens));
            self.state = PageState::Stopped;
            return Ok(Some(page));
        }

        self.previous_tokens = Some(next_tokens.clone());
        self.current_tokens = next_tokens;
        Ok(Some(page))
    }

    /// The resume token recorded when the run was truncated by
    /// `max_items`, if any.
    pub fn resume_token(&self) -> Option<&str> {
        self.resume_token.as_deref()
    }

    /// Converts the iterator into a [`futures::Stream`] of pages.
    pub fn into_stream(self) -> BoxStream<'static, Result<Value>> {
        stream::unfold(Some(self), |state| async move {
            let mut pages = state?;
            match pages.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(pages))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    /// Drains every remaining page and concatenates the primary result
    /// key into a single document.
    ///
    /// When the run was truncated by `max_items`, the aggregated document
    /// carries the resume token under `NextToken`.
    pub async fn build_full_result(mut self) -> Result<Value> {
        let mut aggregated: Vec<Value> = Vec::new();
        while let Some(page) = self.next_page().await? {
            if let Some(items) =
                resolve_path(&page, &self.config.result_key).and_then(Value::as_array)
            {
                aggregated.extend(items.iter().cloned());
            }
        }
        let mut result = Map::new();
        result.insert(self.config.result_key.clone(), Value::Array(aggregated));
        if let Some(token) = self.resume_token.clone() {
            result.insert("NextToken".to_string(), json!(token));
        }
        Ok(Value::Object(result))
    }
}

impl std::fmt::Debug for PageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStream")
            .field("operation", &self.operation)
            .field("state", &self.state)
            .field("num_results", &self.num_results)
            .finish_non_exhaustive()
    }
}

/// Splits a recorded resume token into token values and a truncation
/// offset.
///
/// The serialized form joins the input-token values with `"___"`, with an
/// optional trailing integer for the in-page offset; `"None"` marks an
/// absent token value.
fn parse_starting_token(token: &str, token_count: usize) -> (Vec<Option<String>>, u64) {
    let parts: Vec<&str> = token.split("___").collect();
    let (value_parts, truncation) = if parts.len() == token_count + 1 {
        match parts[token_count].parse::<u64>() {
            Ok(offset) => (&parts[..token_count], offset),
            Err(_) => (&parts[..], 0),
        }
    } else {
        (&parts[..], 0)
    };

    let mut values: Vec<Option<String>> = value_parts
        .iter()
        .map(|part| {
            if part.is_empty() || *part == "None" {
                None
            } else {
                Some((*part).to_string())
            }
        })
        .collect();
    values.resize(token_count, None);
    (values, truncation)
}

fn token_value(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn join_tokens(tokens: &[Option<String>]) -> String {
    tokens
        .iter()
        .map(|t| t.clone().unwrap_or_else(|| "None".to_string()))
        .collect::<Vec<_>>()
        .join("___")
}

fn resolve_array_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Vec<Value>> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get_mut(segment)?;
    }
    match current {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn result_len(page: &Value, path: &str) -> u64 {
    resolve_path(page, path)
        .and_then(Value::as_array)
        .map(|items| items.len() as u64)
        .unwrap_or(0)
}

fn truncate_front(page: &mut Value, path: &str, count: u64) {
    if let Some(items) = resolve_array_mut(page, path) {
        let count = (count as usize).min(items.len());
        items.drain(..count);
    }
}

fn truncate_back(page: &mut Value, path: &str, keep: u64) {
    if let Some(items) = resolve_array_mut(page, path) {
        items.truncate(keep as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_single_and_many_tokens() {
        let config: PaginationConfig = serde_json::from_str(
            r#"{"input_token": "Marker", "output_token": "NextMarker",
                "result_key": "Contents", "limit_key": "MaxKeys"}"#,
        )
        .unwrap();
        assert_eq!(config.input_token.names(), vec!["Marker"]);

        let config: PaginationConfig = serde_json::from_str(
            r#"{"input_token": ["KeyMarker", "UploadIdMarker"],
                "output_token": ["NextKeyMarker", "NextUploadIdMarker"],
                "result_key": "Uploads"}"#,
        )
        .unwrap();
        assert_eq!(
            config.input_token.names(),
            vec!["KeyMarker", "UploadIdMarker"]
        );
        assert!(config.limit_key.is_none());
    }

    #[test]
    fn starting_token_splits_values_and_offset() {
        let (tokens, offset) = parse_starting_token("abc___3", 1);
        assert_eq!(tokens, vec![Some("abc".to_string())]);
        assert_eq!(offset, 3);

        let (tokens, offset) = parse_starting_token("abc", 1);
        assert_eq!(tokens, vec![Some("abc".to_string())]);
        assert_eq!(offset, 0);

        let (tokens, offset) = parse_starting_token("None___def___2", 2);
        assert_eq!(tokens, vec![None, Some("def".to_string())]);
        assert_eq!(offset, 2);
    }

    #[test]
    fn token_values_ignore_null_and_empty() {
        assert_eq!(token_value(Some(&json!("next"))), Some("next".to_string()));
        assert_eq!(token_value(Some(&json!(17))), Some("17".to_string()));
        assert_eq!(token_value(Some(&json!(""))), None);
        assert_eq!(token_value(Some(&Value::Null)), None);
        assert_eq!(token_value(None), None);
    }

    #[test]
    fn truncation_helpers_edit_the_result_list() {
        let mut page = json!({"Contents": [1, 2, 3, 4, 5]});
        truncate_front(&mut page, "Contents", 2);
        assert_eq!(page["Contents"], json!([3, 4, 5]));
        truncate_back(&mut page, "Contents", 1);
        assert_eq!(page["Contents"], json!([3]));
        assert_eq!(result_len(&page, "Contents"), 1);
        assert_eq!(result_len(&page, "Missing"), 0);
    }
}
