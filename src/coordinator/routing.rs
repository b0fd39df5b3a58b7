//! Query modes and the heuristic `auto` routing policy.

use serde::Serialize;

use crate::config::RoutingConfig;
use crate::graph::QueryMode;
use crate::language::LanguageServices;

/// Graph retrieval mode used when `auto` routes to the graph.
pub const AUTO_GRAPH_MODE: QueryMode = QueryMode::Hybrid;

/// Caller-selected routing hint.
///
/// `local` always means the local fact store. The graph's own single-hop mode is
/// spelled `graph:local`; the other graph modes may be given bare or prefixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgeMode {
    Auto,
    Local,
    Graph(QueryMode),
}

impl std::fmt::Display for KnowledgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Local => f.write_str("local"),
            Self::Graph(QueryMode::Local) => f.write_str("graph:local"),
            Self::Graph(mode) => write!(f, "{mode}"),
        }
    }
}

impl std::str::FromStr for KnowledgeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "" | "auto" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "graph" => Ok(Self::Graph(AUTO_GRAPH_MODE)),
            other => other
                .strip_prefix("graph:")
                .unwrap_or(other)
                .parse::<QueryMode>()
                .map(Self::Graph)
                .map_err(|_| format!("unknown knowledge mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Local,
    Graph,
}

impl Route {
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Graph,
            Self::Graph => Self::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub primary: Route,
    pub reason: &'static str,
}

/// Tunable thresholds for `auto` routing.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    pub short_query_words: usize,
    pub min_local_score: f64,
    pub multi_entity_threshold: usize,
    pub relational_terms: Vec<String>,
    pub factual_prefixes: Vec<String>,
    pub graph_empty_markers: Vec<String>,
}

impl From<&RoutingConfig> for RoutingPolicy {
    fn from(config: &RoutingConfig) -> Self {
        let lower = |list: &[String]| list.iter().map(|s| s.to_lowercase()).collect();
        Self {
            short_query_words: config.short_query_words,
            min_local_score: config.min_local_score,
            multi_entity_threshold: config.multi_entity_threshold,
            relational_terms: lower(&config.relational_terms),
            factual_prefixes: lower(&config.factual_prefixes),
            graph_empty_markers: config.graph_empty_markers.clone(),
        }
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl RoutingPolicy {
    /// Pick the store `auto` mode tries first.
    ///
    /// Relational language and multi-entity queries go to the graph. Short and
    /// simple factual queries go to the local store, as does anything else.
    pub fn route(&self, query: &str, language: &dyn LanguageServices) -> RouteDecision {
        let lower = query.trim().to_lowercase();
        let padded = format!(" {} ", pad_words(&lower));

        if self
            .relational_terms
            .iter()
            .any(|term| padded.contains(&format!(" {} ", pad_words(term))))
        {
            return RouteDecision { primary: Route::Graph, reason: "relational" };
        }

        let entities = language.extract_entities(query).map(|e| e.len()).unwrap_or(0);
        if self.multi_entity_threshold > 0 && entities >= self.multi_entity_threshold {
            return RouteDecision { primary: Route::Graph, reason: "multi_entity" };
        }

        if lower.split_whitespace().count() <= self.short_query_words {
            return RouteDecision { primary: Route::Local, reason: "short" };
        }
        if self.factual_prefixes.iter().any(|p| lower.starts_with(p.as_str())) {
            return RouteDecision { primary: Route::Local, reason: "factual" };
        }
        RouteDecision { primary: Route::Local, reason: "default" }
    }

    /// Whether a local result is too weak to stand on its own.
    pub fn is_low_confidence(&self, top_score: Option<f64>) -> bool {
        top_score.map_or(true, |s| s < self.min_local_score)
    }
}

/// Lowercased words separated by single spaces, punctuation dropped.
fn pad_words(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::RuleBasedLanguage;

    fn route(query: &str) -> RouteDecision {
        RoutingPolicy::default().route(query, &RuleBasedLanguage::new())
    }

    #[test]
    fn parses_modes() {
        assert_eq!("auto".parse::<KnowledgeMode>().unwrap(), KnowledgeMode::Auto);
        assert_eq!("LOCAL".parse::<KnowledgeMode>().unwrap(), KnowledgeMode::Local);
        assert_eq!(
            "global".parse::<KnowledgeMode>().unwrap(),
            KnowledgeMode::Graph(QueryMode::Global)
        );
        assert_eq!(
            "graph:local".parse::<KnowledgeMode>().unwrap(),
            KnowledgeMode::Graph(QueryMode::Local)
        );
        assert_eq!(
            "graph".parse::<KnowledgeMode>().unwrap(),
            KnowledgeMode::Graph(AUTO_GRAPH_MODE)
        );
        assert!("sideways".parse::<KnowledgeMode>().is_err());
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in [
            KnowledgeMode::Auto,
            KnowledgeMode::Local,
            KnowledgeMode::Graph(QueryMode::Local),
            KnowledgeMode::Graph(QueryMode::Mix),
        ] {
            assert_eq!(mode.to_string().parse::<KnowledgeMode>().unwrap(), mode);
        }
    }

    #[test]
    fn short_and_factual_queries_go_local() {
        assert_eq!(route("charlie's birthday").primary, Route::Local);
        assert_eq!(
            route("what is the name of the dentist I saw last spring").reason,
            "factual"
        );
    }

    #[test]
    fn relational_queries_go_to_graph() {
        let decision = route("how is charlie related to the lake house");
        assert_eq!(decision.primary, Route::Graph);
        assert_eq!(decision.reason, "relational");
        // Whole words only.
        assert_eq!(route("bothersome noise").primary, Route::Local);
    }

    #[test]
    fn multi_entity_queries_go_to_graph() {
        let decision = route("did Charlie meet Dana at the Portland office last year");
        assert_eq!(decision.primary, Route::Graph);
        assert_eq!(decision.reason, "multi_entity");
    }

    #[test]
    fn low_confidence_threshold() {
        let policy = RoutingPolicy::default();
        assert!(policy.is_low_confidence(None));
        assert!(policy.is_low_confidence(Some(0.1)));
        assert!(!policy.is_low_confidence(Some(0.9)));
    }
}
