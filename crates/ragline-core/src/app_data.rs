//! Where ragline keeps its own files (config).

use std::path::PathBuf;

/// Returns the directory where ragline stores its config.
/// On Linux: `~/.local/share/ragline/`; on macOS: `~/Library/Application Support/Ragline/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Ragline", "Ragline")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
