//! Outgoing request interception.
//!
//! All traffic flows through a [`Transport`]. The [`RequestDecorator`] wraps
//! the capability captured at install time and rewrites only NanoGPT image
//! generation payloads: LoRA URLs for the one model that accepts them, plus
//! the stored reference images for every model. Everything else, including
//! anything that fails to parse, is forwarded untouched: a malformed payload
//! must never block the user's request.

use crate::error::{EnhancerError, Result};
use crate::settings::SettingsStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// URL substring identifying the image generation endpoint.
pub const GENERATE_ENDPOINT: &str = "/api/sd/nanogpt/generate";

/// The only model that accepts LoRA URL parameters.
pub const LORA_MODEL: &str = "flux-2-dev-lora";

/// An outgoing HTTP call, as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Header name/value pairs, forwarded verbatim.
    pub headers: Vec<(String, String)>,
    /// Request body, if any.
    pub body: Option<String>,
}

impl OutboundRequest {
    /// Creates a GET request with no body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a POST request with the given body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".into(),
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }
}

/// Response handed back by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The ambient network-call capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the response.
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse>;
}

/// The original capability: forwards over a [`reqwest::Client`].
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| EnhancerError::InvalidRequest(format!("bad method: {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        Ok(TransportResponse {
            status: response.status().as_u16(),
            body: response.bytes().await?.to_vec(),
        })
    }
}

/// Decorates matching generation requests before delegating to the inner
/// transport captured at construction time.
pub struct RequestDecorator {
    inner: Arc<dyn Transport>,
    store: Arc<SettingsStore>,
}

impl RequestDecorator {
    /// Wraps `inner`, reading settings from `store` at request time.
    pub fn new(inner: Arc<dyn Transport>, store: Arc<SettingsStore>) -> Self {
        Self { inner, store }
    }

    /// Rewrites a generation payload from the current settings document.
    ///
    /// LoRA slots are injected (trimmed, non-empty only) when the payload's
    /// model is [`LORA_MODEL`]; reference image data URLs are attached in
    /// insertion order regardless of model, when any exist.
    fn decorate_body(&self, body: &str) -> Result<String> {
        let mut payload: Value = serde_json::from_str(body)?;
        let object = payload.as_object_mut().ok_or_else(|| {
            EnhancerError::InvalidRequest("generation payload is not a JSON object".into())
        })?;

        let settings = self.store.ensure();

        if object.get("model").and_then(Value::as_str) == Some(LORA_MODEL) {
            for (slot, value) in settings.loras.entries() {
                let value = value.trim();
                if !value.is_empty() {
                    object.insert(slot.key().to_string(), Value::String(value.to_string()));
                }
            }
        }

        let image_data_urls: Vec<Value> = settings
            .reference_images
            .iter()
            .map(|image| image.data_url.as_str())
            .filter(|url| !url.is_empty())
            .map(|url| Value::String(url.to_string()))
            .collect();
        if !image_data_urls.is_empty() {
            object.insert("imageDataUrls".to_string(), Value::Array(image_data_urls));
        }

        Ok(serde_json::to_string(&payload)?)
    }
}

#[async_trait]
impl Transport for RequestDecorator {
    async fn send(&self, mut request: OutboundRequest) -> Result<TransportResponse> {
        if request.url.contains(GENERATE_ENDPOINT) {
            if let Some(body) = request.body.as_deref() {
                // Fail open: a payload that cannot be decorated is forwarded
                // exactly as supplied.
                match self.decorate_body(body) {
                    Ok(decorated) => request.body = Some(decorated),
                    Err(error) => {
                        tracing::warn!(%error, "could not decorate generation request")
                    }
                }
            }
        }

        self.inner.send(request).await
    }
}

static INSTALLED: OnceLock<Arc<RequestDecorator>> = OnceLock::new();

/// Installs the decorator as the process-wide transport hook.
///
/// Returns `false` (a no-op) if a hook is already installed; the capability
/// reference captured by the first install is never re-resolved.
pub fn install(decorator: RequestDecorator) -> bool {
    INSTALLED.set(Arc::new(decorator)).is_ok()
}

/// Returns the installed hook, if any.
pub fn installed() -> Option<Arc<RequestDecorator>> {
    INSTALLED.get().cloned()
}
