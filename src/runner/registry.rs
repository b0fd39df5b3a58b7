//! Declarative descriptors for external tool servers.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ToolServerConfig;
use crate::error::{CortexError, Result};

/// How to launch a tool server, and what it is good for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into().to_lowercase());
        self
    }
}

impl From<&ToolServerConfig> for ToolSpec {
    fn from(config: &ToolServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            tags: config.tags.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(servers: &[ToolServerConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for server in servers {
            registry.register(ToolSpec::from(server))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if spec.name.trim().is_empty() || spec.command.trim().is_empty() {
            return Err(CortexError::Config(format!(
                "tool server {:?} needs a name and a command",
                spec.name
            )));
        }
        if self.specs.contains_key(&spec.name) {
            return Err(CortexError::Config(format!("duplicate tool server: {}", spec.name)));
        }
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    /// Servers advertising `tag`, in name order.
    pub fn by_tag(&self, tag: &str) -> Vec<&ToolSpec> {
        let tag = tag.to_lowercase();
        self.specs.values().filter(|s| s.tags.contains(&tag)).collect()
    }

    pub fn list(&self) -> impl Iterator<Item = &ToolSpec> {
        self.specs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
