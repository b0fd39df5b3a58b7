//! Fact records and the values returned by the local store.
//!
//! Defines [`Fact`] (one atomic statement owned by one identity), [`FactSource`]
//! (which stores hold it), and the result types of the store operations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which stores a fact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    /// Written to the local store only.
    Local,
    /// Imported from the graph store.
    Graph,
    /// Dual-written: local row plus a queued graph projection.
    Both,
}

impl FactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Graph => "graph",
            Self::Both => "both",
        }
    }
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "graph" => Ok(Self::Graph),
            "both" => Ok(Self::Both),
            _ => Err(format!("unknown fact source: {s}")),
        }
    }
}

/// A single atomic fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: String,
    pub owner_id: String,
    pub content: String,
    pub topics: BTreeSet<String>,
    /// Empty when the fact is superseded or the vector was not loaded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub created_at: String,
    pub updated_at: String,
    pub source: FactSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl Fact {
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// A query hit. `score` is cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFact {
    #[serde(flatten)]
    pub fact: Fact,
    pub score: f64,
}

/// State of a fact's pending graph projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphWriteStatus {
    Pending,
    Done,
    Failed,
}

impl GraphWriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for GraphWriteStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown graph write status: {s}")),
        }
    }
}

/// An active dual-written fact together with the state of its graph write.
#[derive(Debug, Clone, Serialize)]
pub struct DualFact {
    #[serde(flatten)]
    pub fact: Fact,
    pub graph_status: Option<GraphWriteStatus>,
}

/// Outcome of `store` or `update`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub fact_id: String,
    /// `true` when an existing fact matched and no row was inserted.
    pub deduplicated: bool,
    /// `true` when a graph write was newly queued for `fact_id`.
    pub graph_write_queued: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FactStats {
    pub count: usize,
    pub topic_histogram: BTreeMap<String, usize>,
    pub recent_count: usize,
    pub superseded_count: usize,
    pub pending_graph_writes: usize,
}

/// Lowercased alphanumeric tokens joined by single spaces.
pub fn normalize_text(content: &str) -> String {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-set Jaccard similarity of two normalized strings.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a: BTreeSet<&str> = a.split_whitespace().collect();
    let b: BTreeSet<&str> = b.split_whitespace().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    let total = a.union(&b).count();
    shared as f64 / total as f64
}

/// Trim, lowercase and drop empty topic labels.
pub fn normalize_topics<I, S>(topics: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    topics
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
