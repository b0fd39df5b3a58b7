//! File-backed identity registry (`<home>/identities.json`).
//!
//! The registry is re-read on every lookup so that identities registered by
//! another process are visible without a restart.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::paths::{validate_identity_id, write_atomic};
use crate::error::{CortexError, Result};

/// Whether an identity belongs to a human user or an automated agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Bot => "bot",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "bot" => Ok(Self::Bot),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A tenant scope. Facts, graph data and service instances all belong to exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    pub role: Role,
    /// Free-form profile values. Scalars only (string, number, bool, null).
    #[serde(default)]
    pub extended_profile: BTreeMap<String, serde_json::Value>,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            role,
            extended_profile: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_identity_id(&self.id)?;
        for (key, value) in &self.extended_profile {
            if value.is_array() || value.is_object() {
                return Err(CortexError::InvalidIdentity(format!(
                    "extended_profile.{key} must be a scalar"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    identities: Vec<Identity>,
}

#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    path: PathBuf,
}

impl IdentityRegistry {
    pub fn new(home: &Path) -> Self {
        Self {
            path: home.join("identities.json"),
        }
    }

    fn read(&self) -> Result<RegistryFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<Identity>> {
        Ok(self.read()?.identities)
    }

    pub fn get(&self, id: &str) -> Result<Option<Identity>> {
        Ok(self.read()?.identities.into_iter().find(|i| i.id == id))
    }

    /// Add an identity. Registering an existing id replaces its record but keeps
    /// the original `created_at`.
    pub fn register(&self, identity: Identity) -> Result<Identity> {
        identity.validate()?;
        let mut file = self.read()?;
        let stored = match file.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => {
                let created_at = existing.created_at.clone();
                *existing = Identity {
                    created_at,
                    ..identity
                };
                existing.clone()
            }
            None => {
                file.identities.push(identity.clone());
                identity
            }
        };
        write_atomic(&self.path, serde_json::to_string_pretty(&file)?.as_bytes())?;
        tracing::info!(identity = %stored.id, role = %stored.role, "identity registered");
        Ok(stored)
    }

    /// Register a primary identity with the given id if the registry is empty.
    pub fn ensure_default(&self, id: &str) -> Result<Identity> {
        if let Some(existing) = self.get(id)? {
            return Ok(existing);
        }
        if let Some(first) = self.list()?.into_iter().next() {
            return Ok(first);
        }
        self.register(Identity::new(id, id, Role::Primary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = IdentityRegistry::new(tmp.path());

        assert!(registry.get("charlie").unwrap().is_none());
        registry
            .register(Identity::new("charlie", "Charlie", Role::Primary))
            .unwrap();
        registry
            .register(Identity::new("helper", "Helper Bot", Role::Bot))
            .unwrap();

        let charlie = registry.get("charlie").unwrap().unwrap();
        assert_eq!(charlie.display_name, "Charlie");
        assert_eq!(registry.list().unwrap().len(), 2);
    }

    #[test]
    fn re_register_keeps_created_at() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = IdentityRegistry::new(tmp.path());

        let first = registry
            .register(Identity::new("charlie", "Charlie", Role::Primary))
            .unwrap();
        let mut renamed = Identity::new("charlie", "Chuck", Role::Primary);
        renamed.created_at = "2099-01-01T00:00:00+00:00".into();
        let second = registry.register(renamed).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.display_name, "Chuck");
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn non_scalar_profile_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = IdentityRegistry::new(tmp.path());

        let mut identity = Identity::new("charlie", "Charlie", Role::Primary);
        identity
            .extended_profile
            .insert("tags".into(), serde_json::json!(["a", "b"]));
        assert!(matches!(
            registry.register(identity),
            Err(CortexError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn ensure_default_only_seeds_empty_registry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = IdentityRegistry::new(tmp.path());

        let seeded = registry.ensure_default("primary").unwrap();
        assert_eq!(seeded.id, "primary");
        assert_eq!(seeded.role, Role::Primary);

        let again = registry.ensure_default("primary").unwrap();
        assert_eq!(again.created_at, seeded.created_at);
        assert_eq!(registry.list().unwrap().len(), 1);
    }
}
