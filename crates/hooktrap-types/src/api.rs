//! Control API request and response bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /api/webhook/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub port: u16,
    #[serde(default)]
    pub enable_tunnel: bool,
}

/// Result of starting the server or toggling the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub public_url: String,
    pub port: u16,
}

/// Point-in-time status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStatus {
    pub running: bool,
    pub public_url: String,
    pub port: u16,
}

/// Acknowledgement returned for every captured request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureAck {
    pub status: String,
    pub id: Uuid,
    pub message: String,
}

impl CaptureAck {
    pub fn received(id: Uuid) -> Self {
        Self {
            status: "received".to_string(),
            id,
            message: "Webhook received".to_string(),
        }
    }
}
