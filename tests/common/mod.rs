//! An in-memory relay that fans entries, deletion requests, and dump
//! requests out to a user's devices, for multi-device scenarios without a
//! network.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use histsync::remote::{Query, Transport};
use histsync_common::sync::{
    DeletionRequest, DumpRequest, EncryptedHistoryEntry, UpdateInfo,
};

/// One `submit` or `submit-dump` call as the relay saw it.
#[derive(Debug, Clone)]
pub struct SubmitCall {
    pub path: String,
    pub source_device_id: String,
    pub entries: Vec<EncryptedHistoryEntry>,
}

#[derive(Default)]
struct State {
    /// user id → registered device ids
    devices: HashMap<String, Vec<String>>,
    /// user id → every entry ever submitted (what bootstrap returns)
    archive: HashMap<String, Vec<EncryptedHistoryEntry>>,
    /// device id → entries not yet pulled
    pending: HashMap<String, Vec<EncryptedHistoryEntry>>,
    /// device id → deletion requests not yet pulled
    deletions: HashMap<String, Vec<DeletionRequest>>,
    dumps: Vec<DumpRequest>,
    submits: Vec<SubmitCall>,
    calls: Vec<String>,
    offline: bool,
    banner: Vec<u8>,
}

#[derive(Default)]
pub struct Relay {
    state: Mutex<State>,
}

fn param<'a>(query: Query<'a>, key: &str) -> &'a str {
    query
        .iter()
        .find(|(k, _)| *k == key)
        .map_or("", |(_, v)| *v)
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make every call fail the way an unreachable server does.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_banner(&self, banner: &str) {
        self.state().banner = banner.as_bytes().to_vec();
    }

    pub fn submits(&self) -> Vec<SubmitCall> {
        self.state().submits.clone()
    }

    /// Paths of every call received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn devices(&self, user_id: &str) -> Vec<String> {
        self.state().devices.get(user_id).cloned().unwrap_or_default()
    }

    pub fn pending_dumps(&self) -> Vec<DumpRequest> {
        self.state().dumps.clone()
    }

    /// Queue `entry` for `device_id` as if a peer had submitted it.
    pub fn inject(&self, device_id: &str, entry: EncryptedHistoryEntry) {
        self.state()
            .pending
            .entry(device_id.to_string())
            .or_default()
            .push(entry);
    }

    /// Forget the archive, as a relay that only retained queued entries would.
    pub fn forget_archive(&self) {
        self.state().archive.clear();
    }
}

fn json<T: serde::Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

impl State {
    fn fan_out(&mut self, user_id: &str, source: &str, entries: &[EncryptedHistoryEntry]) {
        let devices = self.devices.get(user_id).cloned().unwrap_or_default();
        for device in devices.iter().filter(|d| d.as_str() != source) {
            self.pending
                .entry(device.clone())
                .or_default()
                .extend(entries.iter().cloned());
        }
    }
}

impl Transport for Relay {
    fn get(&self, path: &str, query: Query<'_>) -> anyhow::Result<Vec<u8>> {
        let mut st = self.state();
        if st.offline {
            anyhow::bail!("failed to GET http://relay.test{path}: tcp connect error: Connection refused (os error 111)");
        }
        st.calls.push(path.to_string());
        let user_id = param(query, "user_id");
        let device_id = param(query, "device_id");
        match path {
            "/api/v1/register" => {
                let devices = st.devices.entry(user_id.to_string()).or_default();
                let has_peers = !devices.is_empty();
                if !devices.iter().any(|d| d == device_id) {
                    devices.push(device_id.to_string());
                }
                if has_peers {
                    st.dumps.push(DumpRequest {
                        user_id: user_id.to_string(),
                        requesting_device_id: device_id.to_string(),
                        request_time: chrono::Utc::now(),
                    });
                }
                Ok(Vec::new())
            }
            "/api/v1/bootstrap" => json(&st.archive.get(user_id).cloned().unwrap_or_default()),
            "/api/v1/query" => json(&st.pending.remove(device_id).unwrap_or_default()),
            "/api/v1/get-deletion-requests" => {
                json(&st.deletions.remove(device_id).unwrap_or_default())
            }
            "/api/v1/get-dump-requests" => {
                let dumps: Vec<DumpRequest> = st
                    .dumps
                    .iter()
                    .filter(|d| d.user_id == user_id && d.requesting_device_id != device_id)
                    .cloned()
                    .collect();
                json(&dumps)
            }
            "/api/v1/banner" => Ok(st.banner.clone()),
            "/api/v1/download" => json(&UpdateInfo {
                version: "v9.9.9".to_string(),
                ..UpdateInfo::default()
            }),
            other => anyhow::bail!("GET {other} failed: status_code=404"),
        }
    }

    fn post(
        &self,
        path: &str,
        query: Query<'_>,
        content_type: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<Vec<u8>> {
        let mut st = self.state();
        if st.offline {
            anyhow::bail!("failed to POST http://relay.test{path}: tcp connect error: Connection refused (os error 111)");
        }
        assert_eq!(content_type, "application/json");
        st.calls.push(path.to_string());
        match path {
            "/api/v1/submit" => {
                let entries: Vec<EncryptedHistoryEntry> = serde_json::from_slice(&body)?;
                let source = param(query, "source_device_id").to_string();
                for entry in &entries {
                    st.archive
                        .entry(entry.user_id.clone())
                        .or_default()
                        .push(entry.clone());
                }
                if let Some(user_id) = entries.first().map(|e| e.user_id.clone()) {
                    st.fan_out(&user_id, &source, &entries);
                }
                st.submits.push(SubmitCall {
                    path: path.to_string(),
                    source_device_id: source,
                    entries,
                });
                Ok(Vec::new())
            }
            "/api/v1/submit-dump" => {
                let entries: Vec<EncryptedHistoryEntry> = serde_json::from_slice(&body)?;
                let user_id = param(query, "user_id").to_string();
                let requester = param(query, "requesting_device_id").to_string();
                st.pending
                    .entry(requester.clone())
                    .or_default()
                    .extend(entries.iter().cloned());
                st.dumps
                    .retain(|d| !(d.user_id == user_id && d.requesting_device_id == requester));
                st.submits.push(SubmitCall {
                    path: path.to_string(),
                    source_device_id: param(query, "source_device_id").to_string(),
                    entries,
                });
                Ok(Vec::new())
            }
            "/api/v1/add-deletion-request" => {
                let request: DeletionRequest = serde_json::from_slice(&body)?;
                if let Some(archive) = st.archive.get_mut(&request.user_id) {
                    archive.retain(|e| {
                        !request
                            .messages
                            .ids
                            .iter()
                            .any(|id| id.device_id == e.device_id && id.date == e.date)
                    });
                }
                let devices = st.devices.get(&request.user_id).cloned().unwrap_or_default();
                for device in devices {
                    let mut copy = request.clone();
                    copy.destination_device_id.clone_from(&device);
                    st.deletions.entry(device).or_default().push(copy);
                }
                Ok(Vec::new())
            }
            other => anyhow::bail!("POST {other} failed: status_code=404"),
        }
    }
}
