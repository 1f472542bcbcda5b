//! Typed calls against the relay's `/api/v1` endpoints.

use anyhow::Context as _;
use histsync_common::sync::{DeletionRequest, DumpRequest, EncryptedHistoryEntry, UpdateInfo};
use serde::de::DeserializeOwned;

use super::Transport;

const JSON: &str = "application/json";

fn decode<D: DeserializeOwned>(call: &str, body: &[u8]) -> anyhow::Result<D> {
    serde_json::from_slice(body).with_context(|| format!("failed to load JSON response from {call}"))
}

fn encode<S: serde::Serialize + ?Sized>(call: &str, value: &S) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(value).with_context(|| format!("failed to serialize request body for {call}"))
}

/// Announce a new device for `user_id`.
///
/// # Errors
///
/// Returns an error if the relay is unreachable or rejects the call.
pub fn register<T: Transport + ?Sized>(
    transport: &T,
    user_id: &str,
    device_id: &str,
) -> anyhow::Result<()> {
    transport
        .get(
            "/api/v1/register",
            &[("user_id", user_id), ("device_id", device_id)],
        )
        .context("failed to register device with backend")?;
    Ok(())
}

/// Every entry the relay holds for `user_id`.
///
/// # Errors
///
/// Returns an error if the call fails or the body is not a JSON entry list.
pub fn bootstrap<T: Transport + ?Sized>(
    transport: &T,
    user_id: &str,
    device_id: &str,
) -> anyhow::Result<Vec<EncryptedHistoryEntry>> {
    let body = transport
        .get(
            "/api/v1/bootstrap",
            &[("user_id", user_id), ("device_id", device_id)],
        )
        .context("failed to bootstrap device from the backend")?;
    decode("/api/v1/bootstrap", &body)
}

/// Upload entries produced by `source_device_id`.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized or the call fails.
pub fn submit<T: Transport + ?Sized>(
    transport: &T,
    source_device_id: &str,
    entries: &[EncryptedHistoryEntry],
) -> anyhow::Result<()> {
    let body = encode("/api/v1/submit", entries)?;
    transport
        .post(
            "/api/v1/submit",
            &[("source_device_id", source_device_id)],
            JSON,
            body,
        )
        .context("failed to submit history entries")?;
    Ok(())
}

/// Entries queued for `device_id` since its last pull.
///
/// # Errors
///
/// Returns an error if the call fails or the body is not a JSON entry list.
pub fn query<T: Transport + ?Sized>(
    transport: &T,
    device_id: &str,
    user_id: &str,
) -> anyhow::Result<Vec<EncryptedHistoryEntry>> {
    let body = transport.get(
        "/api/v1/query",
        &[("device_id", device_id), ("user_id", user_id)],
    )?;
    decode("/api/v1/query", &body)
}

/// # Errors
///
/// Returns an error if the call fails or the body cannot be decoded.
pub fn get_deletion_requests<T: Transport + ?Sized>(
    transport: &T,
    user_id: &str,
    device_id: &str,
) -> anyhow::Result<Vec<DeletionRequest>> {
    let body = transport.get(
        "/api/v1/get-deletion-requests",
        &[("user_id", user_id), ("device_id", device_id)],
    )?;
    decode("/api/v1/get-deletion-requests", &body)
}

/// # Errors
///
/// Returns an error if the body cannot be serialized or the call fails.
pub fn add_deletion_request<T: Transport + ?Sized>(
    transport: &T,
    request: &DeletionRequest,
) -> anyhow::Result<()> {
    let body = encode("/api/v1/add-deletion-request", request)?;
    transport.post("/api/v1/add-deletion-request", &[], JSON, body)?;
    Ok(())
}

/// # Errors
///
/// Returns an error if the call fails or the body cannot be decoded.
pub fn get_dump_requests<T: Transport + ?Sized>(
    transport: &T,
    user_id: &str,
    device_id: &str,
) -> anyhow::Result<Vec<DumpRequest>> {
    let body = transport.get(
        "/api/v1/get-dump-requests",
        &[("user_id", user_id), ("device_id", device_id)],
    )?;
    decode("/api/v1/get-dump-requests", &body)
}

/// Answer a dump request from `requesting_device_id` with a slice of the
/// local history.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized or the call fails.
pub fn submit_dump<T: Transport + ?Sized>(
    transport: &T,
    user_id: &str,
    requesting_device_id: &str,
    source_device_id: &str,
    entries: &[EncryptedHistoryEntry],
) -> anyhow::Result<()> {
    let body = encode("/api/v1/submit-dump", entries)?;
    transport
        .post(
            "/api/v1/submit-dump",
            &[
                ("user_id", user_id),
                ("requesting_device_id", requesting_device_id),
                ("source_device_id", source_device_id),
            ],
            JSON,
            body,
        )
        .context("failed to submit dump")?;
    Ok(())
}

/// Parameters identifying the caller to the banner endpoint.
#[derive(Debug, Clone, Copy)]
pub struct BannerQuery<'a> {
    pub commit_hash: &'a str,
    pub user_id: &'a str,
    pub device_id: &'a str,
    pub version: &'a str,
    pub forced_banner: &'a str,
}

/// Raw banner bytes; empty when the relay has nothing to announce.
///
/// # Errors
///
/// Returns an error if the call fails.
pub fn banner<T: Transport + ?Sized>(transport: &T, q: &BannerQuery<'_>) -> anyhow::Result<Vec<u8>> {
    transport.get(
        "/api/v1/banner",
        &[
            ("commit_hash", q.commit_hash),
            ("user_id", q.user_id),
            ("device_id", q.device_id),
            ("version", q.version),
            ("forced_banner", q.forced_banner),
        ],
    )
}

/// Latest release information.
///
/// # Errors
///
/// Returns an error if the call fails or the body cannot be decoded.
pub fn download<T: Transport + ?Sized>(transport: &T) -> anyhow::Result<UpdateInfo> {
    let body = transport.get("/api/v1/download", &[])?;
    decode("/api/v1/download", &body)
}
