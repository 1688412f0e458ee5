//! Typed messages exchanged with an isolated scan sandbox.
//!
//! On the wire every message is `{ "sender": <kind>, "message": <payload> }`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::engine::EngineError;
use crate::errors::AppError;
use crate::models::finding::ViolationInput;
use crate::store::ReconcileOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sender", content = "message", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Begin a scan of one content item.
    StartScan { content_id: i64 },
    /// Work through the background queue.
    StartScheduledScan {
        #[serde(default)]
        limit: Option<i64>,
    },
    /// Persist violations the sandbox collected itself.
    SaveScan {
        content_id: i64,
        violations: Vec<ViolationInput>,
    },
}

impl InboundMessage {
    pub fn content_id(&self) -> Option<i64> {
        match self {
            Self::StartScan { content_id } | Self::SaveScan { content_id, .. } => Some(*content_id),
            Self::StartScheduledScan { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "sender", content = "message", rename_all = "kebab-case")]
pub enum OutboundMessage {
    ScanComplete {
        content_id: i64,
        violations: usize,
        rules_evaluated: usize,
        errors: Vec<EngineError>,
    },
    ScanSaved {
        content_id: i64,
        outcome: ReconcileOutcome,
    },
    ScheduledScanComplete {
        scanned: Vec<i64>,
        skipped: Vec<i64>,
        failed: Vec<i64>,
    },
    ScanFailed {
        content_id: Option<i64>,
        retryable: bool,
        message: String,
    },
}

impl OutboundMessage {
    pub fn failed(content_id: Option<i64>, error: &AppError) -> Self {
        Self::ScanFailed {
            content_id,
            retryable: error.is_retryable(),
            message: error.to_string(),
        }
    }
}

/// A message together with the origin it was posted from.
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    pub origin: String,
    pub body: M,
}

/// Transport between the coordinator and a sandbox.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Next inbound message; `None` once the sandbox side is gone.
    async fn recv(&self) -> Option<Envelope<InboundMessage>>;

    async fn send(&self, message: OutboundMessage) -> Result<(), AppError>;
}

/// Coordinator side of an in-process channel pair.
pub struct InProcessChannel {
    inbound: Mutex<mpsc::Receiver<Envelope<InboundMessage>>>,
    outbound: mpsc::Sender<OutboundMessage>,
}

/// Sandbox side of an in-process channel pair.
pub struct SandboxHandle {
    origin: String,
    outbound: mpsc::Sender<Envelope<InboundMessage>>,
    replies: mpsc::Receiver<OutboundMessage>,
}

impl InProcessChannel {
    pub fn pair(origin: &str, capacity: usize) -> (Self, SandboxHandle) {
        let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                inbound: Mutex::new(in_rx),
                outbound: out_tx,
            },
            SandboxHandle {
                origin: origin.to_string(),
                outbound: in_tx,
                replies: out_rx,
            },
        )
    }
}

#[async_trait]
impl MessageChannel for InProcessChannel {
    async fn recv(&self) -> Option<Envelope<InboundMessage>> {
        self.inbound.lock().await.recv().await
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), AppError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| AppError::Unavailable("Sandbox channel closed".to_string()))
    }
}

impl SandboxHandle {
    /// Post a message stamped with this sandbox's origin.
    pub async fn post(&self, body: InboundMessage) -> Result<(), AppError> {
        self.post_as(&self.origin, body).await
    }

    /// Post a message claiming an arbitrary origin.
    pub async fn post_as(&self, origin: &str, body: InboundMessage) -> Result<(), AppError> {
        self.outbound
            .send(Envelope {
                origin: origin.to_string(),
                body,
            })
            .await
            .map_err(|_| AppError::Unavailable("Coordinator channel closed".to_string()))
    }

    pub async fn next_reply(&mut self) -> Option<OutboundMessage> {
        self.replies.recv().await
    }
}
