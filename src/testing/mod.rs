// src/testing/mod.rs
//! Scriptable in-process backend used by unit and integration tests, so no
//! network is required to exercise the pool, breaker, and coordinator.

use crate::backend::{BackendReply, ChatCompletionRequest, Transport, TransportFactory};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A fake inference backend shared by every transport the factory creates.
/// Tests flip its switches to script failures and delays.
pub struct MockBackend {
    connects: AtomicU64,
    sends: AtomicU64,
    probes: AtomicU64,
    probe_ok: AtomicBool,
    fail_sends: AtomicU32,
    send_delay: Mutex<Duration>,
    reply_content: Mutex<Option<String>>,
}

impl MockBackend {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicU64::new(0),
            sends: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            probe_ok: AtomicBool::new(true),
            fail_sends: AtomicU32::new(0),
            send_delay: Mutex::new(Duration::ZERO),
            reply_content: Mutex::new(None),
        })
    }

    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(MockTransport {
            backend: Arc::clone(self),
        })
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn TransportFactory> {
        Arc::new(MockFactory {
            backend: Arc::clone(self),
        })
    }

    /// Number of successful factory connects so far.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of chat sends attempted so far.
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// When false, probes fail and new connections cannot be created.
    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    /// Makes the next `n` sends fail with `ConnectionFailed`.
    pub fn fail_next_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Adds latency to every send, for timeout scenarios.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    /// Fixes the reply content instead of the default echo.
    pub fn set_reply(&self, content: impl Into<String>) {
        *self.reply_content.lock().unwrap() = Some(content.into());
    }

    fn take_failure(&self) -> bool {
        self.fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct MockTransport {
    backend: Arc<MockBackend>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_chat(&self, payload: &ChatCompletionRequest) -> Result<BackendReply, GatewayError> {
        self.backend.sends.fetch_add(1, Ordering::SeqCst);

        let delay = *self.backend.send_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        if self.backend.take_failure() {
            return Err(GatewayError::ConnectionFailed(
                "scripted send failure".to_string(),
            ));
        }

        let content = self.backend.reply_content.lock().unwrap().clone().unwrap_or_else(|| {
            let prompt = payload
                .messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            format!("[{}] {}", payload.model, prompt)
        });
        let tokens_used = (content.len() / 4) as u32;
        Ok(BackendReply {
            content,
            tokens_used,
        })
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        self.backend.probes.fetch_add(1, Ordering::SeqCst);
        if self.backend.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::ConnectionFailed(
                "scripted probe failure".to_string(),
            ))
        }
    }
}

struct MockFactory {
    backend: Arc<MockBackend>,
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(&self) -> Result<Arc<dyn Transport>, GatewayError> {
        if !self.backend.probe_ok.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionCreationFailed(
                "scripted backend unreachable".to_string(),
            ));
        }
        self.backend.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.transport())
    }
}
