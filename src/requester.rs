//! Requester boundary: the only place the crate talks HTTP.
//!
//! The core never builds URLs itself. It names a route (`upload_get`,
//! `processing_execution_logs`, ...) and the requester resolves that name
//! into a concrete URL using the `routes` section of the configuration.
//!
//! The [`Requester`] trait is annotated for `mockall` so every store
//! operation can be exercised against a deterministic mock in tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{RequestError, TransportError};

/// HTTP verb used by a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Values substituted into a route template (`{datastore}`, `{upload}`, ...).
pub type RouteParams = HashMap<String, String>;

/// Query string parameters; a key may repeat.
pub type QueryParams = Vec<(String, String)>;

/// One decoded server response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl ApiResponse {
    pub fn json(&self) -> &Value {
        &self.body
    }

    /// The pagination header, if the server sent one.
    pub fn content_range(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-range"))
            .map(|(_, v)| v.as_str())
    }
}

/// Boundary through which every store operation reaches the remote API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Requester: Send + Sync {
    /// Issues one request against a named route.
    async fn route_request(
        &self,
        route_name: &str,
        route_params: RouteParams,
        method: Method,
        query: QueryParams,
        body: Option<Value>,
    ) -> Result<ApiResponse, RequestError>;

    /// Sends one local file as a multipart upload against a named route.
    async fn route_upload_file(
        &self,
        route_name: &str,
        route_params: RouteParams,
        method: Method,
        query: QueryParams,
        file_path: &Path,
        file_key: &str,
    ) -> Result<ApiResponse, RequestError>;
}

/// Collaborator issuing bearer tokens; the authentication flow itself is
/// outside this crate.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, TransportError>;
}

/// Token provider backed by a fixed token, typically taken from the
/// environment by the CLI.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, TransportError> {
        Ok(self.token.clone())
    }
}

/// Concrete requester backed by `reqwest`.
pub struct HttpRequester {
    client: reqwest::Client,
    config: Arc<Config>,
    tokens: Box<dyn TokenProvider>,
}

impl HttpRequester {
    pub fn new(config: Arc<Config>, tokens: Box<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    /// Resolves a route name into a concrete URL by substituting the
    /// route parameters into the configured template. A `{datastore}`
    /// placeholder falls back to the configured default datastore.
    fn route_url(&self, route_name: &str, route_params: &RouteParams) -> Result<String, TransportError> {
        let template = self
            .config
            .get("routes", route_name)
            .ok_or_else(|| TransportError::RouteNotFound(route_name.to_string()))?;

        let mut url = template;
        while let Some(start) = url.find('{') {
            let Some(length) = url[start..].find('}') else {
                break;
            };
            let param = url[start + 1..start + length].to_string();
            let value = match route_params.get(&param) {
                Some(v) if !v.is_empty() => v.clone(),
                _ if param == "datastore" => {
                    let default = self.config.get_str("store_api", "datastore", "");
                    if default.is_empty() {
                        return Err(TransportError::MissingRouteParam {
                            route: route_name.to_string(),
                            param,
                        });
                    }
                    default
                }
                _ => {
                    return Err(TransportError::MissingRouteParam {
                        route: route_name.to_string(),
                        param,
                    })
                }
            };
            url.replace_range(start..start + length + 1, &value);
        }
        Ok(url)
    }

    async fn send(
        &self,
        route_name: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiResponse, RequestError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                route: route_name.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let text = response.text().await.map_err(|e| TransportError::Request {
            route: route_name.to_string(),
            detail: e.to_string(),
        })?;

        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(route = route_name, "resource not found");
            return Err(RequestError::NotFound {
                route: route_name.to_string(),
            });
        }
        if !status.is_success() {
            error!(route = route_name, status = status.as_u16(), body = %text, "request failed");
            return Err(TransportError::Status {
                route: route_name.to_string(),
                status: status.as_u16(),
                detail: text,
            }
            .into());
        }

        // Deletions and state changes legitimately answer with no body.
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(route = route_name, status = status.as_u16(), "request succeeded");
        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn route_request(
        &self,
        route_name: &str,
        route_params: RouteParams,
        method: Method,
        query: QueryParams,
        body: Option<Value>,
    ) -> Result<ApiResponse, RequestError> {
        let url = self.route_url(route_name, &route_params)?;
        info!(route = route_name, method = method.as_str(), url = %url, "sending request");

        let mut request = self
            .client
            .request(Self::reqwest_method(method), &url)
            .query(&query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(route_name, request).await
    }

    async fn route_upload_file(
        &self,
        route_name: &str,
        route_params: RouteParams,
        method: Method,
        query: QueryParams,
        file_path: &Path,
        file_key: &str,
    ) -> Result<ApiResponse, RequestError> {
        let url = self.route_url(route_name, &route_params)?;
        info!(route = route_name, file = %file_path.display(), "uploading file");

        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| TransportError::File {
                path: file_path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let form = reqwest::multipart::Form::new()
            .part(
                file_key.to_string(),
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let request = self
            .client
            .request(Self::reqwest_method(method), &url)
            .query(&query)
            .multipart(form);
        self.send(route_name, request).await
    }
}

/// Parses a `Content-Range` header of the form `start-end/total`.
fn parse_range(raw: &str) -> Option<(usize, usize, usize)> {
    let (range, total) = raw.trim().split_once('/')?;
    let total = total.trim().parse().ok()?;
    let (start, end) = range.split_once('-')?;
    Some((
        start.trim().parse().ok()?,
        end.trim().parse().ok()?,
        total,
    ))
}

/// Decides whether another page must be requested, given the range header
/// of the last response and the number of items accumulated so far.
///
/// A missing or unparsable header means "pagination complete", never an
/// error: failing open here is what keeps a misbehaving server from
/// trapping the client in an infinite loop.
pub fn range_next_page(content_range: Option<&str>, accumulated: usize) -> bool {
    let Some(raw) = content_range else {
        return false;
    };
    match parse_range(raw) {
        Some((_, _, total)) => accumulated < total,
        None => {
            warn!(header = raw, "unparsable Content-Range header, stopping pagination");
            false
        }
    }
}

/// Total number of pages declared by a range header for the given page
/// size. Unparsable input counts as a single page.
pub fn range_total_page(content_range: Option<&str>, limit: usize) -> usize {
    if limit == 0 {
        return 1;
    }
    match content_range.and_then(parse_range) {
        Some((_, _, total)) => total.div_ceil(limit).max(1),
        None => 1,
    }
}
