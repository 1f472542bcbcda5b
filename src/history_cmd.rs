use histsync::history::HistoryEntry;

use crate::sync_cmd::open_engine;

fn format_row(entry: &HistoryEntry) -> String {
    let runtime = if entry.is_unfinished() {
        "N/A".to_string()
    } else {
        format!(
            "{}ms",
            (entry.end_time - entry.start_time).num_milliseconds()
        )
    };
    format!(
        "{}\t{}\t{}\t{runtime}\t{}\t{}",
        entry.hostname,
        entry.current_working_directory,
        entry.start_time.with_timezone(&chrono::Local).format("%b %d %Y %H:%M:%S"),
        entry.exit_code,
        entry.command
    )
}

/// Handle `histsync search`. Pulls from the relay first; an unreachable
/// relay only produces a warning.
///
/// # Errors
///
/// Returns an error if the query is invalid or the store cannot be read.
pub fn cmd_search(query: &str, limit: i64) -> anyhow::Result<i32> {
    let engine = open_engine()?;
    let report = engine.retrieve_additional_entries()?;
    if report.offline && !engine.config().is_offline {
        eprintln!("[histsync] Warning: sync server unreachable, showing local data only");
    }
    let entries = engine.search(query, limit)?;
    let mut last_command: Option<&str> = None;
    for entry in &entries {
        if engine.config().filter_duplicate_commands
            && last_command.is_some_and(|c| c.trim() == entry.command.trim())
        {
            continue;
        }
        println!("{}", format_row(entry));
        last_command = Some(entry.command.as_str());
    }
    Ok(0)
}

/// Handle `histsync redact`.
///
/// # Errors
///
/// Returns an error if the query is invalid, the delete fails, or the
/// deletion request cannot be sent.
pub fn cmd_redact(query: &str) -> anyhow::Result<i32> {
    let engine = open_engine()?;
    let deleted = engine.redact(query)?;
    eprintln!("[histsync] Deleted {deleted} entr(ies)");
    Ok(0)
}

/// Handle `histsync status`.
///
/// # Errors
///
/// Returns an error if the config or store cannot be read.
pub fn cmd_status() -> anyhow::Result<i32> {
    let engine = open_engine()?;
    let config = engine.config();
    println!("Device: {}", config.device_id);
    println!("Enabled: {}", config.is_enabled);
    println!("Offline: {}", config.is_offline);
    println!("Initial import: {}", config.have_completed_initial_import);
    println!("Entries: {}", engine.store().count()?);
    println!("Config: {}", engine.config_path().display());
    Ok(0)
}
