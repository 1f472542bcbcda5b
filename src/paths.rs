//! User-directory resolution.
//!
//! When `HISTSYNC_HOME` is set, it replaces **all** platform-native user
//! directories (config and data).
//!
//! Priority for the history database:
//!   1. `HISTSYNC_DB_PATH` env var
//!   2. `HISTSYNC_HOME`
//!   3. `dirs::data_local_dir().map(|d| d.join("histsync"))`

use std::path::PathBuf;

/// Return the `HISTSYNC_HOME` path when set and non-empty, otherwise the
/// platform-native `dirs_fallback`.
fn resolve_user_path(dirs_fallback: Option<PathBuf>) -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HISTSYNC_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs_fallback
}

/// Returns the user-level config directory (holds `config.toml`).
pub fn user_dir() -> Option<PathBuf> {
    resolve_user_path(dirs::config_dir().map(|d| d.join("histsync")))
}

/// Returns the base directory for data files.
///
/// When `HISTSYNC_HOME` is set, identical to `user_dir()`.
pub fn user_data_dir() -> Option<PathBuf> {
    resolve_user_path(dirs::data_local_dir().map(|d| d.join("histsync")))
}

/// Path of the persisted [`crate::config::ClientConfig`].
pub fn config_path() -> Option<PathBuf> {
    user_dir().map(|d| d.join("config.toml"))
}

/// Path of the local history database; `HISTSYNC_DB_PATH` wins when set.
pub fn db_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("HISTSYNC_DB_PATH")
        && !p.is_empty()
    {
        return Some(PathBuf::from(p));
    }
    user_data_dir().map(|d| d.join("history.db"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn set_env(key: &str, val: &str) {
        // SAFETY: test-only env mutation; #[serial] prevents races.
        unsafe { std::env::set_var(key, val) };
    }

    fn clear_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    #[serial]
    fn user_dir_uses_histsync_home_when_set() {
        set_env("HISTSYNC_HOME", "/custom/home");
        let result = user_dir();
        clear_env("HISTSYNC_HOME");
        assert_eq!(result, Some(PathBuf::from("/custom/home")));
    }

    #[test]
    #[serial]
    fn user_dir_ignores_empty_histsync_home() {
        set_env("HISTSYNC_HOME", "");
        let result = user_dir();
        clear_env("HISTSYNC_HOME");
        assert_eq!(result, dirs::config_dir().map(|d| d.join("histsync")));
    }

    #[test]
    #[serial]
    fn config_and_db_live_under_histsync_home() {
        clear_env("HISTSYNC_DB_PATH");
        set_env("HISTSYNC_HOME", "/unified");
        let config = config_path();
        let db = db_path();
        clear_env("HISTSYNC_HOME");
        assert_eq!(config, Some(PathBuf::from("/unified/config.toml")));
        assert_eq!(db, Some(PathBuf::from("/unified/history.db")));
    }

    #[test]
    #[serial]
    fn db_path_env_overrides_home() {
        set_env("HISTSYNC_HOME", "/unified");
        set_env("HISTSYNC_DB_PATH", "/elsewhere/h.db");
        let db = db_path();
        clear_env("HISTSYNC_HOME");
        clear_env("HISTSYNC_DB_PATH");
        assert_eq!(db, Some(PathBuf::from("/elsewhere/h.db")));
    }
}
