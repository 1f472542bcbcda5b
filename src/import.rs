//! Normalisation of raw shell history lines for the one-time import.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::history::HistoryEntry;

/// `: <epoch>:<duration>;<command>` as written by zsh's extended history.
static ZSH_EXTENDED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^: \d+:\d+;(.*)$").ok());

/// `#<epoch>` lines bash writes when `HISTTIMEFORMAT` is set.
static BASH_TIMESTAMP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^#\d+\s*$").ok());

/// Cwd recorded for imported entries, which carry no directory.
pub const UNKNOWN_CWD: &str = "Unknown";

/// Strip zsh's extended-history prefix, if present.
pub fn strip_zsh_prefix(line: &str) -> &str {
    ZSH_EXTENDED
        .as_ref()
        .and_then(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map_or(line, |m| m.as_str())
}

pub fn is_bash_timestamp(line: &str) -> bool {
    BASH_TIMESTAMP.as_ref().is_some_and(|re| re.is_match(line))
}

/// The command an imported history line stands for, or `None` if the line
/// should be skipped (bash timestamps, blank lines, and lines starting with a
/// space, which shells treat as "don't record").
pub fn normalize(line: &str) -> Option<&str> {
    let cmd = strip_zsh_prefix(line);
    if cmd.trim().is_empty() || is_bash_timestamp(cmd) || cmd.starts_with(' ') {
        return None;
    }
    Some(cmd)
}

/// Commands from a fish history file (`- cmd: <command>` records).
pub fn parse_fish_history(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- cmd: "))
        .map(ToString::to_string)
        .collect()
}

/// Lines of the file at `path`; a missing file yields nothing.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_history_file(path: &Path) -> anyhow::Result<Vec<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(ToString::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Gather every history line found under `home`: bash, zsh, fish, and
/// `$HISTFILE` when it names a different file.
///
/// # Errors
///
/// Returns an error naming the first history file that exists but cannot be read.
pub fn collect_shell_history(home: &Path, histfile: Option<PathBuf>) -> anyhow::Result<Vec<String>> {
    let bash = home.join(".bash_history");
    let zsh = home.join(".zsh_history");
    let mut lines = read_history_file(&bash).context("failed to parse bash history")?;
    lines.extend(read_history_file(&zsh).context("failed to parse zsh history")?);
    let fish = read_history_file(&home.join(".local/share/fish/fish_history"))
        .context("failed to parse fish history")?;
    lines.extend(parse_fish_history(&fish.join("\n")));
    if let Some(histfile) = histfile
        && histfile != bash
        && histfile != zsh
    {
        lines.extend(read_history_file(&histfile).context("failed to parse histfile")?);
    }
    Ok(lines)
}

/// Who and where imported commands are attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub local_username: String,
    pub hostname: String,
    pub home_directory: String,
}

impl Origin {
    /// The current user, host, and home directory of this process.
    pub fn detect() -> Self {
        let local_username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let home_directory = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            local_username,
            hostname,
            home_directory,
        }
    }

    /// A synthetic entry for an imported command: unknown cwd, exit code 0,
    /// started and finished at `at`.
    pub fn entry(&self, command: &str, device_id: &str, at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            local_username: self.local_username.clone(),
            hostname: self.hostname.clone(),
            command: command.to_string(),
            current_working_directory: UNKNOWN_CWD.to_string(),
            home_directory: self.home_directory.clone(),
            exit_code: 0,
            start_time: at,
            end_time: at,
            device_id: device_id.to_string(),
            custom_columns: Vec::new(),
        }
    }
}
