//! REST transport shared by the session manager and other SDK services.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::{ApiErrorBody, ClientError};

/// Shared in-memory slot for the current bearer token.
///
/// The session manager writes it; every outbound call (REST and the realtime
/// handshake) reads it. The token lives here and nowhere else: it must never
/// be written to durable client storage.
pub type BearerSlot = Arc<Mutex<Option<String>>>;

/// Thin wrapper around `reqwest::Client` for the Tably REST API.
///
/// The cookie store is the only holder of the session id and refresh token
/// cookies; they are set and cleared by the server and never surface to
/// calling code.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    bearer: BearerSlot,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http,
            bearer: Arc::new(Mutex::new(None)),
        })
    }

    /// Handle to the bearer slot, for services that authenticate outside this
    /// client (the realtime router's handshake).
    pub fn bearer_slot(&self) -> BearerSlot {
        self.bearer.clone()
    }

    pub fn set_bearer(&self, token: Option<String>) {
        *self.bearer.lock() = token;
    }

    pub fn bearer(&self) -> Option<String> {
        self.bearer.lock().clone()
    }

    /// POST a JSON body and decode a JSON response, attaching the bearer
    /// token when one is held.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let token = self.bearer.lock().clone();
        let mut req = self.http.post(&url).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        // Prefer the structured envelope; fall back to the bare status line.
        match resp.json::<ApiErrorBody>().await {
            Ok(body) => Err(ClientError::Api {
                status: status.as_u16(),
                code: body.error.code,
                message: body.error.message,
            }),
            Err(_) => Err(ClientError::Api {
                status: status.as_u16(),
                code: "UNKNOWN".to_string(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            }),
        }
    }
}
