use std::io::BufRead as _;
use std::path::PathBuf;

use anyhow::Context as _;
use histsync::config::ClientConfig;
use histsync::history::Store;
use histsync::import::{self, Origin};
use histsync::paths;
use histsync::remote::ApiClient;
use histsync::sync_core::SyncEngine;

fn config_path() -> anyhow::Result<PathBuf> {
    paths::config_path().ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))
}

fn open_store() -> anyhow::Result<Store> {
    let path = paths::db_path().ok_or_else(|| anyhow::anyhow!("cannot determine history DB path"))?;
    Store::open(&path)
}

/// Load the config, open the store, and connect to the relay.
pub fn open_engine() -> anyhow::Result<SyncEngine<ApiClient>> {
    let config_path = config_path()?;
    let config = ClientConfig::load(&config_path)?;
    Ok(SyncEngine::new(
        config,
        config_path,
        open_store()?,
        ApiClient::from_env()?,
    ))
}

/// Handle `histsync init`.
///
/// # Errors
///
/// Returns an error if setup fails (see [`SyncEngine::setup`]).
pub fn cmd_init(secret: Option<&str>, offline: bool) -> anyhow::Result<i32> {
    let engine = SyncEngine::setup(
        open_store()?,
        ApiClient::from_env()?,
        config_path()?,
        secret,
        offline,
    )?;
    eprintln!(
        "[histsync] Secret key: {} (use `histsync init <secret>` on your other devices)",
        engine.config().user_secret
    );
    eprintln!(
        "[histsync] Device {} ready with {} entr(ies).",
        engine.config().device_id,
        engine.store().count()?
    );
    Ok(0)
}

/// Handle `histsync import`.
///
/// # Errors
///
/// Returns an error if a history file is unreadable or the import fails.
pub fn cmd_import(force: bool, read_stdin: bool) -> anyhow::Result<i32> {
    let mut engine = open_engine()?;
    let origin = Origin::detect();
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    let histfile = std::env::var_os("HISTFILE")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let mut lines = import::collect_shell_history(&home, histfile)?;
    if read_stdin {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("failed to read stdin")?;
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
    }
    let imported = engine.import_history(&lines, &origin, force)?;
    if imported == 0 && !force {
        eprintln!("[histsync] Nothing imported (use --force to import again)");
    } else {
        eprintln!("[histsync] Imported {imported} entr(ies)");
    }
    Ok(0)
}

/// Handle `histsync sync`.
///
/// # Errors
///
/// Returns an error for any non-connectivity failure.
pub fn cmd_sync(reupload: bool) -> anyhow::Result<i32> {
    let engine = open_engine()?;
    let report = engine.retrieve_additional_entries()?;
    let dumps = engine.handle_dump_requests()?;
    if reupload {
        let sent = engine.reupload()?;
        eprintln!("[histsync] Uploaded {sent} entr(ies)");
    }
    if report.offline && !engine.config().is_offline {
        eprintln!("[histsync] Warning: sync server unreachable, showing local data only");
    }
    eprintln!(
        "[histsync] Retrieved {}, deleted {}, answered {dumps} dump request(s)",
        report.retrieved, report.deleted
    );
    Ok(0)
}

/// Handle `histsync banner`.
///
/// # Errors
///
/// Returns an error if the banner call is rejected.
pub fn cmd_banner(commit_hash: &str) -> anyhow::Result<i32> {
    let engine = open_engine()?;
    match engine.get_banner(commit_hash)? {
        Some(body) => print!("{}", String::from_utf8_lossy(&body)),
        None => eprintln!("[histsync] Warning: sync server unreachable"),
    }
    Ok(0)
}
