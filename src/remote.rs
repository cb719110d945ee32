use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

/// Server-side limit on a stored document.
pub const MAX_DATA_BYTES: usize = 1024 * 1024;

const AUTH_FAILURE_CODES: &[&str] = &["UNAUTHORIZED", "INVALID_TOKEN", "USER_NOT_FOUND"];

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request ({status}): {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("server returned an invalid response")]
    InvalidResponse,
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RemoteError {
    /// The bearer token is no longer accepted; the session must log out.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            RemoteError::Api { status, code, .. } => {
                *status == StatusCode::UNAUTHORIZED.as_u16()
                    || AUTH_FAILURE_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub user: RemoteUser,
    pub token: String,
    /// Untrusted; normalize before use.
    pub data: Value,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        data: &Value,
    ) -> Result<AuthResponse, RemoteError>;

    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError>;

    async fn get_user_data(&self, token: &str) -> Result<Value, RemoteError>;

    /// Returns the server's `updatedAt` stamp.
    async fn put_user_data(&self, token: &str, data: &Value) -> Result<String, RemoteError>;
}

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let res = req.send().await?;
        let status = res.status();
        let is_json = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);
        if !is_json {
            return Err(RemoteError::InvalidResponse);
        }
        let payload: Value = res.json().await.map_err(|_| RemoteError::InvalidResponse)?;
        check_envelope(status, payload)
    }
}

fn check_envelope(status: StatusCode, payload: Value) -> Result<Value, RemoteError> {
    let ok = payload.get("ok").and_then(Value::as_bool) == Some(true);
    if ok && status.is_success() {
        return Ok(payload);
    }
    let text = |key: &str, fallback: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    Err(RemoteError::Api {
        status: status.as_u16(),
        code: text("code", "REQUEST_FAILED"),
        message: text("error", "server error"),
    })
}

fn auth_response(payload: Value) -> Result<AuthResponse, RemoteError> {
    let user = payload
        .get("user")
        .cloned()
        .ok_or(RemoteError::InvalidResponse)?;
    Ok(AuthResponse {
        user: serde_json::from_value(user)?,
        token: payload
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        data: payload.get("data").cloned().unwrap_or(Value::Null),
    })
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        data: &Value,
    ) -> Result<AuthResponse, RemoteError> {
        let body = json!({ "email": email, "password": password, "name": name, "data": data });
        let payload = self.request(Method::POST, "auth/register", None, Some(&body)).await?;
        auth_response(payload)
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError> {
        let body = json!({ "email": email, "password": password });
        let payload = self.request(Method::POST, "auth/login", None, Some(&body)).await?;
        auth_response(payload)
    }

    async fn get_user_data(&self, token: &str) -> Result<Value, RemoteError> {
        let payload = self.request(Method::GET, "user/data", Some(token), None).await?;
        Ok(payload.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn put_user_data(&self, token: &str, data: &Value) -> Result<String, RemoteError> {
        let size = serde_json::to_vec(data)?.len();
        if size > MAX_DATA_BYTES {
            return Err(RemoteError::TooLarge {
                size,
                limit: MAX_DATA_BYTES,
            });
        }
        let body = json!({ "data": data });
        let payload = self.request(Method::PUT, "user/data", Some(token), Some(&body)).await?;
        Ok(payload
            .get("updatedAt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}
