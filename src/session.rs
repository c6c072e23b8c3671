//! Authenticated access to the catalog API.
//!
//! [`Session`] is the seam between the pipeline and the network: the resolver,
//! the stream locator and the response cache only ever see [`ApiRequest`] in and
//! [`ApiResponse`] out. [`HttpSession`] is the production implementation,
//! authenticating with the token a browser stored in its cookie jar.

use crate::config::{RetryConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Length of a valid auth token
pub const TOKEN_LEN: usize = 32;

/// Cookie names that may carry the auth token
const TOKEN_COOKIES: &[&str] = &["auth", "access_token"];

/// Profile endpoint used for credential checks
pub const PROFILE_ENDPOINT: &str = "/api/v2/tiny/profile";

/// HTTP method of an API request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET with query parameters
    Get,
    /// POST with a JSON body
    Post,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One outbound catalog request
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Endpoint path relative to the service origin (e.g. "/api/tiny/tracks")
    pub endpoint: String,
    /// Query parameters, kept sorted so equal requests fingerprint equally
    pub params: BTreeMap<String, String>,
    /// JSON body for POST requests
    pub body: Option<Value>,
}

impl ApiRequest {
    /// GET request to `endpoint`
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            body: None,
        }
    }

    /// POST request to `endpoint` carrying `body` as JSON
    pub fn post_json(endpoint: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            body: Some(body),
        }
    }

    /// Add a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Canonical text form: method, endpoint, sorted params and body
    pub fn canonical(&self) -> String {
        let mut out = format!("{} {}", self.method.as_str(), self.endpoint);
        for (k, v) in &self.params {
            out.push('\n');
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        if let Some(body) = &self.body {
            out.push('\n');
            out.push_str(&body.to_string());
        }
        out
    }
}

/// Raw response: HTTP status plus decoded JSON body
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// JSON body (`Null` when the body was empty or not JSON on an error status)
    pub body: Value,
}

impl ApiResponse {
    /// True for 401/403, which callers must treat as expired credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, 401 | 403)
    }

    /// True for 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert a non-2xx status into the matching [`Error`]
    pub fn into_result(self, endpoint: &str) -> Result<Value> {
        match Error::from_status(self.status, endpoint) {
            Some(err) => Err(err),
            None => Ok(self.body),
        }
    }
}

/// Authenticated access to the catalog API
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Perform `request` with the session's credentials.
    ///
    /// Transport failures are returned as `Err`; any HTTP status, including
    /// 401/403, is returned as an [`ApiResponse`] for the caller to interpret.
    async fn authenticated_request(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Production [`Session`] backed by reqwest
pub struct HttpSession {
    client: reqwest::Client,
    base: url::Url,
    token: String,
}

impl HttpSession {
    /// Create a session for `token` using the transport settings in `config`
    pub fn new(config: &SessionConfig, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        validate_token(&token)?;

        let base = url::Url::parse(&config.api_base).map_err(|e| Error::Config {
            message: format!("invalid api_base {}: {}", config.api_base, e),
            key: Some("session.api_base".to_string()),
        })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let origin = config.api_base.trim_end_matches('/').to_string();
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&origin) {
            headers.insert(reqwest::header::ORIGIN, value);
        }
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("{}/", origin)) {
            headers.insert(reqwest::header::REFERER, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Create a session from the token in `config`, falling back to the cookie file
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let token = match &config.token {
            Some(token) => token.clone(),
            None => read_token_from_cookie_file(&config.cookie_file)?,
        };
        Self::new(config, token)
    }

    fn url_for(&self, endpoint: &str) -> Result<url::Url> {
        self.base
            .join(endpoint)
            .map_err(|e| Error::Other(format!("invalid endpoint {}: {}", endpoint, e)))
    }
}

#[async_trait::async_trait]
impl Session for HttpSession {
    async fn authenticated_request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(&request.endpoint)?;
        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let mut builder = builder
            .header("x-auth-token", &self.token)
            .query(&request.params);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(_) if !(200..300).contains(&status) => Value::Null,
                Err(e) => {
                    return Err(Error::Api(format!(
                        "{} returned non-JSON body: {}",
                        request.endpoint, e
                    )));
                }
            }
        };

        tracing::trace!(endpoint = %request.endpoint, status, "API response");
        Ok(ApiResponse { status, body })
    }
}

/// Perform `request`, retrying transport failures and 429/5xx statuses per `retry`.
///
/// Other statuses, including 401/403, are returned as a response so the caller
/// (and the response cache) can see them.
pub async fn request_with_retry(
    session: &dyn Session,
    request: &ApiRequest,
    retry: &RetryConfig,
) -> Result<ApiResponse> {
    with_retry(retry, || async {
        let response = session.authenticated_request(request).await?;
        if (response.status == 429 || response.status >= 500)
            && let Some(err) = Error::from_status(response.status, &request.endpoint)
        {
            return Err(err);
        }
        Ok(response)
    })
    .await
}

/// Reject tokens that cannot be valid
pub fn validate_token(token: &str) -> Result<()> {
    if token.len() != TOKEN_LEN || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Config {
            message: format!(
                "auth token must be {} alphanumeric characters; cookies may be stale",
                TOKEN_LEN
            ),
            key: Some("session.token".to_string()),
        });
    }
    Ok(())
}

/// Extract the auth token from a Netscape-format cookie jar
pub fn parse_cookie_token(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            // HttpOnly cookies are exported with this prefix instead of being commented out
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            Some((fields[5], fields[6]))
        })
        .find(|(name, _)| TOKEN_COOKIES.contains(name))
        .map(|(_, value)| value.trim().to_string())
}

/// Read the auth token from a cookie file on disk
pub fn read_token_from_cookie_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("cannot read cookie file {}: {}", path.display(), e),
        key: Some("session.cookie_file".to_string()),
    })?;
    parse_cookie_token(&text).ok_or_else(|| Error::Config {
        message: format!("no auth cookie found in {}", path.display()),
        key: Some("session.cookie_file".to_string()),
    })
}

/// Whether the account behind `session` has an active subscription.
///
/// Fails with [`Error::AuthExpired`] when the token is rejected.
pub async fn check_subscription(session: &dyn Session) -> Result<bool> {
    let response = session
        .authenticated_request(&ApiRequest::get(PROFILE_ENDPOINT))
        .await?;
    let body = response.into_result(PROFILE_ENDPOINT)?;
    Ok(body
        .pointer("/result/is_prime")
        .and_then(Value::as_bool)
        .unwrap_or(false))
}
