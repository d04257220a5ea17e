//! Where ragdesk stores its own data (config, vector store, default document folder).

use std::path::PathBuf;

/// Returns the directory where ragdesk stores config and index data.
/// On Linux: `~/.local/share/ragdesk/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Ragdesk", "ragdesk")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
