// src/backend/mod.rs
//! Wire protocol and transport for the external inference backend.
//!
//! The backend is a chat-completion-style HTTP JSON API:
//! - `POST {base_url}/chat/completions` for generation
//! - `GET {base_url}/models` as a reachability probe (any 2xx)
//!
//! The `Transport` trait is the seam the pool and coordinator talk through,
//! so tests can substitute a scripted backend for the HTTP client.

use crate::error::GatewayError;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    total_tokens: u32,
}

/// What the gateway keeps from a backend completion.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub content: String,
    pub tokens_used: u32,
}

/// One live channel to the backend. Each pooled connection owns exactly one
/// transport and carries at most one in-flight request at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_chat(&self, payload: &ChatCompletionRequest) -> Result<BackendReply, GatewayError>;

    /// Cheap reachability check used by connection creation and the
    /// background health loop.
    async fn probe(&self) -> Result<(), GatewayError>;
}

/// Creates transports during pool growth. Creation includes a probe, so an
/// unreachable backend fails fast with `ConnectionCreationFailed`.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>, GatewayError>;
}

fn map_send_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else {
        GatewayError::ConnectionFailed(e.to_string())
    }
}

/// HTTP transport backed by a dedicated `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_chat(&self, payload: &ChatCompletionRequest) -> Result<BackendReply, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ConnectionFailed(format!("malformed completion body: {}", e)))?;

        let choice = body.choices.into_iter().next().ok_or(GatewayError::UpstreamError {
            status: status.as_u16(),
            message: "completion contained no choices".to_string(),
        })?;

        Ok(BackendReply {
            content: choice.message.content,
            tokens_used: body.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::UpstreamError {
                status: response.status().as_u16(),
                message: "health probe rejected".to_string(),
            })
        }
    }
}

/// Builds `HttpTransport` instances for the pool.
pub struct HttpTransportFactory {
    base_url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpTransportFactory {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration, request_timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl TransportFactory for HttpTransportFactory {
    async fn connect(&self) -> Result<Arc<dyn Transport>, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| GatewayError::ConnectionCreationFailed(e.to_string()))?;

        let transport = HttpTransport {
            client,
            base_url: self.base_url.clone(),
        };

        transport
            .probe()
            .await
            .map_err(|e| GatewayError::ConnectionCreationFailed(e.to_string()))?;

        debug!("Opened backend connection to {}", self.base_url);
        Ok(Arc::new(transport))
    }
}
