//! Device lifecycle and push/pull reconciliation against the relay.
//!
//! [`SyncEngine`] is driven by explicit calls; nothing here schedules work in
//! the background. Every remote call except [`SyncEngine::setup`]'s
//! registration degrades to "did nothing" when the relay is unreachable, and
//! every local write goes through the [`Store`]'s retry-and-dedup path so a
//! pull can run alongside foreground reads and writes on another connection.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use histsync_common::chunks;
use histsync_common::sync::{
    DeletionRequest, DumpRequest, EncryptedHistoryEntry, MessageIdentifier, MessageIdentifiers,
    UpdateInfo,
};

use crate::config::ClientConfig;
use crate::crypto;
use crate::history::{HistoryEntry, SearchOrder, Store};
use crate::import::{self, Origin};
use crate::query::{self, Predicate};
use crate::remote::api::{self, BannerQuery};
use crate::remote::{Transport, is_offline_error};

/// Entries per `submit` / `submit-dump` request.
pub const UPLOAD_CHUNK_SIZE: usize = 100;

/// Outcome of a pull from the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote entries that were new to this device.
    pub retrieved: usize,
    /// Local rows removed by deletion requests.
    pub deleted: usize,
    /// The relay was unreachable (or the device is configured offline) and at
    /// least one step was skipped.
    pub offline: bool,
}

impl SyncReport {
    const fn offline() -> Self {
        Self {
            retrieved: 0,
            deleted: 0,
            offline: true,
        }
    }

    const fn merge(self, other: Self) -> Self {
        Self {
            retrieved: self.retrieved + other.retrieved,
            deleted: self.deleted + other.deleted,
            offline: self.offline || other.offline,
        }
    }
}

pub struct SyncEngine<T: Transport> {
    config: ClientConfig,
    config_path: PathBuf,
    store: Store,
    transport: T,
}

impl<T: Transport> SyncEngine<T> {
    pub const fn new(config: ClientConfig, config_path: PathBuf, store: Store, transport: T) -> Self {
        Self {
            config,
            config_path,
            store,
            transport,
        }
    }

    /// Initialise this installation: fresh device id, persisted config, empty
    /// local history, and (unless `offline`) registration with the relay
    /// followed by a bootstrap pull of everything it holds for the user.
    ///
    /// A random secret is generated when `secret` is `None` or empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved, the store cannot be
    /// cleared, or, when online, registration, bootstrap, or decryption fails.
    /// Connectivity failures are not tolerated here.
    pub fn setup(
        store: Store,
        transport: T,
        config_path: PathBuf,
        secret: Option<&str>,
        offline: bool,
    ) -> anyhow::Result<Self> {
        let user_secret = secret
            .filter(|s| !s.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), ToString::to_string);
        let config = ClientConfig {
            user_secret,
            device_id: uuid::Uuid::new_v4().to_string(),
            is_enabled: true,
            is_offline: offline,
            ..ClientConfig::default()
        };
        config
            .save(&config_path)
            .context("failed to persist config to disk")?;
        let engine = Self::new(config, config_path, store, transport);
        engine.store.clear()?;
        tracing::info!(device_id = %engine.config.device_id, offline, "device set up");
        if offline {
            return Ok(engine);
        }

        let user_id = engine.user_id()?;
        api::register(&engine.transport, &user_id, &engine.config.device_id)?;
        let remote = api::bootstrap(&engine.transport, &user_id, &engine.config.device_id)?;
        let added = engine.absorb(&remote)?;
        tracing::info!(received = remote.len(), added, "bootstrapped from relay");
        Ok(engine)
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// # Errors
    ///
    /// Returns an error if the secret cannot key the MAC.
    pub fn user_id(&self) -> anyhow::Result<String> {
        crypto::user_id(&self.config.user_secret)
    }

    const fn order(&self) -> SearchOrder {
        if self.config.beta_mode {
            SearchOrder::StartTimeDesc
        } else {
            SearchOrder::EndTimeDesc
        }
    }

    /// Compile `query` against configured and observed custom column names.
    ///
    /// # Errors
    ///
    /// Returns a [`query::QueryError`] (reachable via `downcast_ref`) for an
    /// unknown atom or an unparseable value.
    pub fn compile(&self, query: &str) -> anyhow::Result<Predicate> {
        let predicate = query::compile_with(query, || {
            let mut names: Vec<String> = self
                .config
                .custom_column_names()
                .map(ToString::to_string)
                .collect();
            names.extend(self.store.custom_column_names()?);
            Ok(names)
        })?;
        Ok(predicate)
    }

    /// Entries matching `query`, newest first. `limit <= 0` means unbounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query does not compile or the store read fails.
    pub fn search(&self, query: &str, limit: i64) -> anyhow::Result<Vec<HistoryEntry>> {
        let predicate = self.compile(query)?;
        self.store.search(&predicate, self.order(), limit)
    }

    fn encrypt_for_upload(&self, entries: &[HistoryEntry]) -> anyhow::Result<Vec<EncryptedHistoryEntry>> {
        entries
            .iter()
            .map(|entry| -> anyhow::Result<EncryptedHistoryEntry> {
                let mut enc = crypto::encrypt_entry(&self.config.user_secret, entry)?;
                enc.device_id.clone_from(&self.config.device_id);
                Ok(enc)
            })
            .collect()
    }

    /// Decrypt remote entries and insert the ones this device has not seen.
    fn absorb(&self, remote: &[EncryptedHistoryEntry]) -> anyhow::Result<usize> {
        let mut added = 0;
        for enc in remote {
            let entry = crypto::decrypt_entry(&self.config.user_secret, enc)
                .context("failed to decrypt history entry from server")?;
            if self.store.insert_if_new(&entry)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Push the entire local history to the relay in chunks of
    /// [`UPLOAD_CHUNK_SIZE`], one request at a time. The first failure aborts
    /// the upload; callers retry the whole thing. Returns the number of entries
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the local read, encryption, or any submit fails.
    pub fn reupload(&self) -> anyhow::Result<usize> {
        if self.config.is_offline {
            return Ok(0);
        }
        let entries = self
            .store
            .search(&Predicate::all(), self.order(), 0)
            .context("failed to reupload due to failed search")?;
        for chunk in chunks(&entries, UPLOAD_CHUNK_SIZE) {
            let enc = self
                .encrypt_for_upload(chunk)
                .context("failed to reupload due to failed encryption")?;
            api::submit(&self.transport, &self.config.device_id, &enc)
                .context("failed to reupload due to failed POST")?;
        }
        tracing::info!(entries = entries.len(), "reuploaded local history");
        Ok(entries.len())
    }

    /// Pull entries queued for this device, then apply pending deletion
    /// requests. Deletions are processed even when the pull was skipped
    /// because the relay was unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error for non-connectivity failures: a rejected call, an
    /// undecodable response, or an entry that fails to decrypt.
    pub fn retrieve_additional_entries(&self) -> anyhow::Result<SyncReport> {
        if self.config.is_offline {
            return Ok(SyncReport::offline());
        }
        let user_id = self.user_id()?;
        let pulled = match api::query(&self.transport, &self.config.device_id, &user_id) {
            Ok(remote) => SyncReport {
                retrieved: self.absorb(&remote)?,
                ..SyncReport::default()
            },
            Err(e) if is_offline_error(&e) => {
                tracing::warn!(error = %format!("{e:#}"), "relay unreachable, skipping pull");
                SyncReport::offline()
            }
            Err(e) => return Err(e.context("failed to retrieve entries from remote")),
        };
        if pulled.retrieved > 0 {
            tracing::info!(retrieved = pulled.retrieved, "retrieved new entries");
        }
        Ok(pulled.merge(self.process_deletion_requests()?))
    }

    /// Apply every pending deletion request to the local store.
    ///
    /// # Errors
    ///
    /// Returns an error if the call is rejected, the response cannot be
    /// decoded, or a local delete fails.
    pub fn process_deletion_requests(&self) -> anyhow::Result<SyncReport> {
        if self.config.is_offline {
            return Ok(SyncReport::offline());
        }
        let user_id = self.user_id()?;
        let requests =
            match api::get_deletion_requests(&self.transport, &user_id, &self.config.device_id) {
                Ok(requests) => requests,
                Err(e) if is_offline_error(&e) => {
                    tracing::warn!(error = %format!("{e:#}"), "relay unreachable, skipping deletions");
                    return Ok(SyncReport::offline());
                }
                Err(e) => return Err(e.context("failed to fetch deletion requests")),
            };
        let mut deleted = 0;
        for request in &requests {
            for id in &request.messages.ids {
                deleted += self.store.delete_by_identifier(&id.device_id, &id.date)?;
            }
        }
        if deleted > 0 {
            tracing::info!(requests = requests.len(), deleted, "applied deletion requests");
        }
        Ok(SyncReport {
            deleted,
            ..SyncReport::default()
        })
    }

    /// One-time import of pre-existing shell history as synthetic entries
    /// attributed to `origin`, followed by a [`reupload`](Self::reupload).
    /// Skipped once an import has completed unless `force` is set. Returns
    /// the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert, the reupload, or saving the config fails.
    pub fn import_history<I, S>(&mut self, lines: I, origin: &Origin, force: bool) -> anyhow::Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.config.have_completed_initial_import && !force {
            tracing::debug!("initial import already completed, skipping");
            return Ok(0);
        }
        let mut imported = 0;
        for line in lines {
            let Some(command) = import::normalize(line.as_ref()) else {
                continue;
            };
            let entry = origin.entry(command, &self.config.device_id, Utc::now());
            if self
                .store
                .insert(&entry)
                .context("failed to insert imported history entry")?
            {
                imported += 1;
            }
        }
        self.reupload().context("failed to upload history import")?;
        self.config.have_completed_initial_import = true;
        self.config.save(&self.config_path).context(
            "failed to mark initial import as completed, this may lead to duplicate history entries",
        )?;
        self.store.checkpoint()?;
        tracing::info!(imported, "imported shell history");
        Ok(imported)
    }

    /// Dump requests addressed to this device; empty when offline.
    ///
    /// # Errors
    ///
    /// Returns an error for a rejected call or an undecodable response.
    pub fn get_dump_requests(&self) -> anyhow::Result<Vec<DumpRequest>> {
        if self.config.is_offline {
            return Ok(Vec::new());
        }
        let user_id = self.user_id()?;
        match api::get_dump_requests(&self.transport, &user_id, &self.config.device_id) {
            Ok(requests) => Ok(requests),
            Err(e) if is_offline_error(&e) => {
                tracing::warn!(error = %format!("{e:#}"), "relay unreachable, skipping dump requests");
                Ok(Vec::new())
            }
            Err(e) => Err(e.context("failed to fetch dump requests")),
        }
    }

    /// Answer every pending dump request with this device's full history.
    /// Returns the number of requests answered; stops quietly if the relay
    /// becomes unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error for non-connectivity failures.
    pub fn handle_dump_requests(&self) -> anyhow::Result<usize> {
        let requests = self.get_dump_requests()?;
        if requests.is_empty() {
            return Ok(0);
        }
        let entries = self.store.search(&Predicate::all(), self.order(), 0)?;
        let enc = self.encrypt_for_upload(&entries)?;
        let user_id = self.user_id()?;
        let mut answered = 0;
        for request in &requests {
            for chunk in chunks(&enc, UPLOAD_CHUNK_SIZE) {
                match api::submit_dump(
                    &self.transport,
                    &user_id,
                    &request.requesting_device_id,
                    &self.config.device_id,
                    chunk,
                ) {
                    Ok(()) => {}
                    Err(e) if is_offline_error(&e) => {
                        tracing::warn!(error = %format!("{e:#}"), "relay unreachable, abandoning dump");
                        return Ok(answered);
                    }
                    Err(e) => return Err(e),
                }
            }
            tracing::info!(
                requesting_device_id = %request.requesting_device_id,
                entries = entries.len(),
                "answered dump request"
            );
            answered += 1;
        }
        Ok(answered)
    }

    /// Broadcast `request` so the user's other devices delete the same entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent, including when offline.
    pub fn send_deletion_request(&self, request: &DeletionRequest) -> anyhow::Result<()> {
        api::add_deletion_request(&self.transport, request).context(
            "failed to send deletion request to backend service, this may cause commands to not get deleted on other devices",
        )
    }

    /// The relay's banner for this client build. `Some(empty)` when the
    /// device is configured offline, `None` when the relay is unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the call is rejected.
    pub fn get_banner(&self, commit_hash: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if self.config.is_offline {
            return Ok(Some(Vec::new()));
        }
        let user_id = self.user_id()?;
        let forced_banner = std::env::var("FORCED_BANNER").unwrap_or_default();
        let q = BannerQuery {
            commit_hash,
            user_id: &user_id,
            device_id: &self.config.device_id,
            version: env!("CARGO_PKG_VERSION"),
            forced_banner: &forced_banner,
        };
        match api::banner(&self.transport, &q) {
            Ok(body) => Ok(Some(body)),
            Err(e) if is_offline_error(&e) => {
                tracing::warn!(error = %format!("{e:#}"), "relay unreachable, no banner");
                Ok(None)
            }
            Err(e) => Err(e.context("failed to fetch banner")),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the call fails or the response cannot be decoded.
    pub fn get_download_data(&self) -> anyhow::Result<UpdateInfo> {
        api::download(&self.transport).context("failed to download update info")
    }

    /// Save a freshly completed command locally and push it to the relay.
    /// The entry is attributed to this device. Returns whether it was new.
    /// A connectivity failure on the push is logged and left for the next
    /// [`reupload`](Self::reupload).
    ///
    /// # Errors
    ///
    /// Returns an error if the local write fails or the push is rejected.
    pub fn record(&self, entry: &HistoryEntry) -> anyhow::Result<bool> {
        if !self.config.is_enabled {
            return Ok(false);
        }
        let mut entry = entry.clone();
        entry.device_id.clone_from(&self.config.device_id);
        if !self.store.insert_if_new(&entry)? {
            return Ok(false);
        }
        if self.config.is_offline {
            return Ok(true);
        }
        let enc = self.encrypt_for_upload(std::slice::from_ref(&entry))?;
        match api::submit(&self.transport, &self.config.device_id, &enc) {
            Ok(()) => {}
            Err(e) if is_offline_error(&e) => {
                tracing::warn!(error = %format!("{e:#}"), "relay unreachable, entry saved locally only");
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    /// Delete every local entry matching `query` and ask the user's other
    /// devices to do the same. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query does not compile, the local delete fails,
    /// or the deletion request cannot be sent.
    pub fn redact(&self, query: &str) -> anyhow::Result<usize> {
        let predicate = self.compile(query)?;
        let matches = self.store.search(&predicate, self.order(), 0)?;
        let deleted = self.store.delete_matching(&predicate)?;
        tracing::info!(query, deleted, "redacted local entries");
        if matches.is_empty() || self.config.is_offline {
            return Ok(deleted);
        }
        let request = DeletionRequest {
            user_id: self.user_id()?,
            destination_device_id: String::new(),
            send_time: Utc::now(),
            messages: MessageIdentifiers {
                ids: matches
                    .iter()
                    .map(|e| MessageIdentifier {
                        device_id: e.device_id.clone(),
                        date: e.end_time,
                    })
                    .collect(),
            },
            read_count: 0,
        };
        self.send_deletion_request(&request)?;
        Ok(deleted)
    }
}
