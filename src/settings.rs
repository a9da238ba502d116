//! Local filesystem locations used by the application.

use anyhow::Result;
use std::path::PathBuf;

/// Get the path to the log directory.
///
/// `~/Library/Logs/<name>` on macOS, the local data dir elsewhere.
pub fn log_directory(name: &str) -> PathBuf {
    if cfg!(target_os = "macos") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        home.join("Library/Logs").join(name)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(name)
            .join("logs")
    }
}

/// Initialize the log directory.
pub fn init_log_directory(name: &str) -> Result<PathBuf> {
    let log_dir = log_directory(name);
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }
    Ok(log_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory() {
        let path = log_directory("b2c-session");
        assert!(path.to_string_lossy().contains("b2c-session"));
    }
}
