use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One history entry as the relay sees it: an opaque ciphertext plus the
/// routing metadata needed to fan it out to the user's other devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedHistoryEntry {
    /// Hex-encoded AES-GCM ciphertext (including tag).
    pub encrypted_data: String,
    /// Hex-encoded 96-bit nonce.
    pub nonce: String,
    /// Device that produced (and submitted) this entry.
    #[serde(default)]
    pub device_id: String,
    pub user_id: String,
    pub date: DateTime<Utc>,
    pub encrypted_id: String,
    #[serde(default)]
    pub read_count: i32,
}

/// Names one history entry across devices by the device that recorded it and
/// the instant the command finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIdentifier {
    pub device_id: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIdentifiers {
    pub ids: Vec<MessageIdentifier>,
}

/// Broadcast instruction asking every device of a user to delete the named
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub user_id: String,
    /// Set by the relay when fanning the request out; empty when sent.
    #[serde(default)]
    pub destination_device_id: String,
    pub send_time: DateTime<Utc>,
    pub messages: MessageIdentifiers,
    #[serde(default)]
    pub read_count: i32,
}

/// Request from a newly bootstrapped device asking its peers to re-push their
/// full history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRequest {
    pub user_id: String,
    pub requesting_device_id: String,
    pub request_time: DateTime<Utc>,
}

/// Release metadata returned by `/api/v1/download`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    #[serde(default)]
    pub linux_amd64_url: String,
    #[serde(default)]
    pub linux_amd64_attestation_url: String,
    #[serde(default)]
    pub darwin_amd64_url: String,
    #[serde(default)]
    pub darwin_amd64_attestation_url: String,
    #[serde(default)]
    pub darwin_arm64_url: String,
    #[serde(default)]
    pub darwin_arm64_attestation_url: String,
    pub version: String,
}
