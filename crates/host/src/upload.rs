//! Multipart upload client for the attachment host.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fraglift_protocol::{AttachmentManifest, HostMessage};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::HostError;
use crate::traits::{HostTransport, ProgressFn};

/// Stream granularity of the request body; also the progress resolution.
const BODY_CHUNK: usize = 64 * 1024;

const RETRY_AFTER_HEADER: &str = "x-ratelimit-reset-after";

/// One upload endpoint on the host, bound to a channel.
#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub channel_id: String,
}

/// Set of webhooks the session may upload through.
#[derive(Debug, Clone, Default)]
pub struct WebhookPool {
    webhooks: Vec<Webhook>,
}

impl WebhookPool {
    pub fn new(webhooks: Vec<Webhook>) -> Self {
        Self { webhooks }
    }

    pub fn is_empty(&self) -> bool {
        self.webhooks.is_empty()
    }

    /// Picks a webhook at random, weighted toward channels with fewer
    /// webhooks so traffic spreads across channels rather than across raw
    /// webhook count.
    pub fn pick(&self) -> Option<&Webhook> {
        if self.webhooks.is_empty() {
            return None;
        }
        let mut per_channel: HashMap<&str, usize> = HashMap::new();
        for wh in &self.webhooks {
            *per_channel.entry(wh.channel_id.as_str()).or_default() += 1;
        }
        let weights: Vec<f64> = self
            .webhooks
            .iter()
            .map(|wh| 1.0 / per_channel[wh.channel_id.as_str()] as f64)
            .collect();
        let total: f64 = weights.iter().sum();

        let mut point = rand::rng().random_range(0.0..total);
        for (wh, weight) in self.webhooks.iter().zip(&weights) {
            if point < *weight {
                return Some(wh);
            }
            point -= weight;
        }
        self.webhooks.last()
    }
}

/// Reqwest-backed [`HostTransport`].
pub struct HostClient {
    client: reqwest::Client,
    pool: WebhookPool,
}

impl HostClient {
    /// No overall timeout: large uploads legitimately take minutes. Only
    /// the connect phase is bounded.
    pub fn new(pool: WebhookPool) -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client, pool })
    }
}

#[async_trait]
impl HostTransport for HostClient {
    async fn upload(
        &self,
        parts: Vec<Bytes>,
        filename: &str,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<HostMessage, HostError> {
        let webhook = self.pool.pick().ok_or(HostError::NoWebhook)?;
        let manifest = AttachmentManifest::uniform(parts.len(), filename);
        let manifest_json =
            serde_json::to_string(&manifest).map_err(|e| HostError::Decode(e.to_string()))?;

        let sent = Arc::new(AtomicU64::new(0));
        let mut form = reqwest::multipart::Form::new();
        for (i, bytes) in parts.into_iter().enumerate() {
            let len = bytes.len() as u64;
            let body = counting_body(bytes, Arc::clone(&sent), Arc::clone(&progress));
            let part = reqwest::multipart::Part::stream_with_length(body, len)
                .file_name(filename.to_string());
            form = form.part(format!("files[{i}]"), part);
        }
        form = form.text("json_payload", manifest_json);

        trace!(url = %webhook.url, channel = %webhook.channel_id, "host upload start");
        let send = self.client.post(&webhook.url).multipart(form).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(HostError::Cancelled),
            r = send => r?,
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .map(Duration::from_secs_f64);
            let message = response.text().await.unwrap_or_default();
            return Err(HostError::from_status(status.as_u16(), retry_after, message));
        }

        let message: HostMessage = response
            .json()
            .await
            .map_err(|e| HostError::Decode(e.to_string()))?;
        debug!(
            message = %message.id,
            channel = %message.channel_id,
            attachments = message.attachments.len(),
            "host upload complete"
        );
        Ok(message)
    }
}

/// Wraps part bytes in a chunked stream that reports cumulative sent bytes
/// across the whole request as chunks are pulled onto the wire.
fn counting_body(bytes: Bytes, sent: Arc<AtomicU64>, progress: ProgressFn) -> reqwest::Body {
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(BODY_CHUNK)
        .map(|start| bytes.slice(start..(start + BODY_CHUNK).min(bytes.len())))
        .collect();
    let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
        let total = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
        progress(total);
        Ok::<Bytes, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}
