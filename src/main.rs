// src/main.rs
//! Demo binary: loads configuration from the environment, connects the
//! gateway to the configured backend, runs a few requests across the tier
//! range, and prints the resulting status snapshot.

use anyhow::Context;
use inference_gateway::gateway::types::RequestPriority;
use inference_gateway::utils::setup_logging;
use inference_gateway::{Gateway, GenerationRequest};
use log::{info, warn};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging().expect("Failed to initialize logging");
    info!("Inference gateway starting...");

    let config = inference_gateway::load_config().context("configuration invalid")?;
    let gateway = Gateway::connect(config)
        .await
        .context("failed to start gateway")?;

    let requests = vec![
        GenerationRequest::new("Summarize the plot of Moby-Dick in two sentences.", 0.2),
        GenerationRequest::new("Draft a migration plan from REST to gRPC for a payments API.", 0.55)
            .with_system_prompt("You are a pragmatic staff engineer."),
        GenerationRequest::new("Design a multi-region failover strategy for a stateful service.", 0.9)
            .with_priority(RequestPriority::High)
            .with_max_tokens(900),
    ];

    let ids: Vec<_> = requests.iter().map(|r| r.id).collect();
    let results =
        futures::future::join_all(requests.into_iter().map(|r| gateway.generate(r))).await;

    for (id, result) in ids.into_iter().zip(results) {
        match result {
            Ok(response) => info!(
                "Request {} -> model={} tier={:?} cache_hit={} fallback={} confidence={:.2} ({}ms)",
                id,
                response.model_used,
                response.influence.tier,
                response.cache_hit,
                response.fallback_used,
                response.confidence,
                response.processing_ms
            ),
            Err(e) => warn!("Request {} failed: {}", id, e),
        }
    }

    let status = gateway.status().await;
    info!(
        "Gateway status: {}",
        serde_json::to_string_pretty(&status).unwrap_or_default()
    );

    gateway.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
