// ── Laminark Engine: Paths ─────────────────────────────────────────────────
// Config-dir resolution. `LAMINARK_HOME` overrides; default ~/.laminark.
// The directory holds data.db (+ -wal/-shm), an optional models/ cache for
// embedders, and debug.log.

use crate::atoms::error::{LaminarkError, LaminarkResult};
use std::path::PathBuf;

/// Resolve the configuration directory, creating it if needed.
pub fn config_dir() -> LaminarkResult<PathBuf> {
    let dir = match std::env::var_os("LAMINARK_HOME") {
        Some(home) => PathBuf::from(home),
        None => dirs::home_dir()
            .ok_or_else(|| LaminarkError::Config("cannot resolve home directory".into()))?
            .join(".laminark"),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path to the single-file database.
pub fn db_path() -> LaminarkResult<PathBuf> {
    Ok(config_dir()?.join("data.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("LAMINARK_HOME", tmp.path());
        let dir = config_dir().unwrap();
        assert_eq!(dir, tmp.path());
        assert!(db_path().unwrap().ends_with("data.db"));
        std::env::remove_var("LAMINARK_HOME");
    }
}
