// ── Laminark Engine: Project Identity ──────────────────────────────────────
// Every table carries a project_hash column; this is where it comes from.
// Two paths that resolve to the same directory (through symlinks) must hash
// identically, so the path is canonicalized before digesting.

use crate::atoms::error::LaminarkResult;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Deterministic 16-hex-character digest of the canonicalized absolute
/// project directory path. The only isolation boundary in the store.
pub fn project_hash(project_dir: &Path) -> LaminarkResult<String> {
    let canonical = project_dir.canonicalize()?;
    Ok(hash_canonical_path(&canonical.to_string_lossy()))
}

/// Digest an already-canonical path string. Split out so tests can cover
/// the digest without touching the filesystem.
pub(crate) fn hash_canonical_path(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_16_hex_chars() {
        let h = hash_canonical_path("/home/user/project");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_is_deterministic_and_path_sensitive() {
        assert_eq!(
            hash_canonical_path("/home/user/project"),
            hash_canonical_path("/home/user/project")
        );
        assert_ne!(
            hash_canonical_path("/home/user/project"),
            hash_canonical_path("/home/user/other")
        );
    }

    #[test]
    fn symlink_resolves_to_same_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = tmp.path().join("link");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&real, &link).unwrap();
            assert_eq!(
                project_hash(&real).unwrap(),
                project_hash(&link).unwrap()
            );
        }
    }
}
