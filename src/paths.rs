use std::path::PathBuf;

/// Run log directory: `~/.local/share/ptemplate/logs/`
pub fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ptemplate")
        .join("logs")
}
