use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::error::KiraError;
use crate::session::SessionProvider;

/// Which remote service an [`RpcClient`] talks to; decides error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Metadata,
    DataStore,
}

impl Service {
    fn http_error(self, message: String) -> KiraError {
        match self {
            Service::Metadata => KiraError::MetadataHttp(message),
            Service::DataStore => KiraError::DataStoreHttp(message),
        }
    }

    fn status_error(self, status: u16, message: String) -> KiraError {
        match self {
            Service::Metadata => KiraError::MetadataStatus { status, message },
            Service::DataStore => KiraError::DataStoreStatus { status, message },
        }
    }
}

/// JSON-RPC 2.0 over HTTP POST.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: Url,
    service: Service,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(endpoint: Url, timeout: Duration, service: Service) -> Result<Self, KiraError> {
        let client = http_client(timeout, Some(timeout), service)?;
        Ok(Self {
            client,
            endpoint,
            service,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value, KiraError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": params,
        });
        tracing::debug!(method, endpoint = %self.endpoint, "rpc call");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .map_err(|err| self.service.http_error(err.to_string()))?;
        let response = handle_status(response, self.service)?;
        let payload: Value = response
            .json()
            .map_err(|err| self.service.http_error(err.to_string()))?;

        if let Some(error) = payload.get("error").filter(|value| !value.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(KiraError::Rpc {
                method: method.to_string(),
                message,
            });
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Calls `method` with a fresh session token, logging in again once if the
    /// service reports the session as invalid.
    pub fn call_with_session<F>(
        &self,
        session: &dyn SessionProvider,
        method: &str,
        params: F,
    ) -> Result<Value, KiraError>
    where
        F: Fn(&str) -> Value,
    {
        let token = session.token()?;
        match self.call(method, params(&token)) {
            Err(err) if is_session_error(&err) => {
                tracing::info!(method, "session expired; logging in again");
                let token = session.refresh()?;
                self.call(method, params(&token))
            }
            other => other,
        }
    }
}

/// Blocking client carrying the crate user agent. `timeout` bounds the wait
/// for the response and each read from its body; `None` disables it.
pub fn http_client(
    connect_timeout: Duration,
    timeout: Option<Duration>,
    service: Service,
) -> Result<Client, KiraError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("kira-sf/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| service.http_error(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|err| service.http_error(err.to_string()))
}

pub fn handle_status(
    response: reqwest::blocking::Response,
    service: Service,
) -> Result<reqwest::blocking::Response, KiraError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "request failed".to_string());
    Err(service.status_error(status, message))
}

/// Joins a relative service path onto a base URL without dropping any path
/// prefix the base already carries.
pub fn service_url(base: &Url, relative: &str) -> Result<Url, KiraError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(relative.trim_start_matches('/'))
        .map_err(|err| KiraError::InvalidConfig(format!("invalid service URL: {err}")))
}

pub fn is_session_error(err: &KiraError) -> bool {
    match err {
        KiraError::Rpc { message, .. } => {
            let message = message.to_ascii_lowercase();
            message.contains("session")
                && (message.contains("invalid")
                    || message.contains("expired")
                    || message.contains("does not exist"))
        }
        _ => false,
    }
}
