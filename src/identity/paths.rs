use std::path::{Path, PathBuf};

use crate::error::{CortexError, Result};

/// Every filesystem location derived from an identity id.
///
/// Always computed fresh from `(home, id)`; nothing holds one across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub identity_id: String,
    pub root: PathBuf,
    pub facts_db: PathBuf,
    pub graph_dir: PathBuf,
    pub graph_data: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: PathBuf,
}

impl IdentityPaths {
    pub fn resolve(home: &Path, identity_id: &str) -> Self {
        let root = home.join("identities").join(identity_id);
        let graph_dir = root.join("graph");
        Self {
            identity_id: identity_id.to_string(),
            facts_db: root.join("facts.db"),
            graph_data: graph_dir.join("data"),
            compose_file: graph_dir.join("docker-compose.yml"),
            env_file: graph_dir.join(".env"),
            graph_dir,
            root,
        }
    }

    /// Create the per-identity directory tree.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.graph_data)?;
        Ok(())
    }
}

/// Identity ids become directory names and compose project names, so they are
/// restricted to ASCII alphanumerics, `-` and `_`.
pub fn validate_identity_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 {
        return Err(CortexError::InvalidIdentity(format!(
            "identity id must be 1-64 characters, got {:?}",
            id
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CortexError::InvalidIdentity(format!(
            "identity id may only contain [A-Za-z0-9_-], got {id:?}"
        )));
    }
    Ok(())
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_scoped_under_identity() {
        let paths = IdentityPaths::resolve(Path::new("/data/cortex"), "charlie");
        assert_eq!(paths.root, PathBuf::from("/data/cortex/identities/charlie"));
        assert_eq!(
            paths.facts_db,
            PathBuf::from("/data/cortex/identities/charlie/facts.db")
        );
        assert!(paths.compose_file.starts_with(&paths.graph_dir));
        assert!(paths.env_file.ends_with(".env"));
    }

    #[test]
    fn rejects_path_traversal_ids() {
        assert!(validate_identity_id("charlie").is_ok());
        assert!(validate_identity_id("bot_01-a").is_ok());
        assert!(validate_identity_id("../etc").is_err());
        assert!(validate_identity_id("").is_err());
        assert!(validate_identity_id("a b").is_err());
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("record");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!path.with_extension("tmp").exists());
    }
}
