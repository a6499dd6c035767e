use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{fs, io, path::Path, path::PathBuf};

pub const CONFIG_ENV: &str = "LAUNCH_WATCH_CONFIG";

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join("launch-watch")
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("launches.sqlite")
}

/// `$LAUNCH_WATCH_CONFIG` when set, otherwise `config.json` in the data root.
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => data_root().join("config.json"),
    }
}

pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
