//! Language services used to project facts into the graph.
//!
//! [`LanguageServices`] is the seam for restating a fact and pulling entities and
//! relations out of it. All methods are pure. A failure is not fatal: the graph
//! sync path falls back to uploading the raw text.

pub mod rule_based;

pub use rule_based::RuleBasedLanguage;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A subject-predicate-object triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

pub trait LanguageServices: Send + Sync {
    /// Rewrite a fact as a standalone declarative sentence.
    fn restate(&self, content: &str) -> Result<String>;

    /// Named entities in order of first appearance, without duplicates.
    fn extract_entities(&self, text: &str) -> Result<Vec<String>>;

    fn extract_relations(&self, text: &str) -> Result<Vec<Relation>>;

    /// The entity a fact is about. Used by the auditor to find a fact in the graph.
    fn primary_entity(&self, text: &str) -> Option<String> {
        self.extract_entities(text).ok()?.into_iter().next()
    }
}
