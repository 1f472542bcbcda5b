use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Replace `path` with `content`, readable by the owner only on Unix.
///
/// The content goes to a sibling `.tmp` file that is renamed over `path`, so
/// a crash mid-write never leaves a truncated config (and secret) behind.
/// Missing parent directories are created.
///
/// # Errors
///
/// Returns an error if the directory, temporary file, or rename fails.
pub fn write_private_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}
