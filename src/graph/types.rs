//! Wire types for the graph service REST protocol.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Retrieval strategy passed through to the graph service unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Local,
    Global,
    Hybrid,
    Naive,
    Mix,
    Bypass,
}

impl QueryMode {
    pub const ALL: [QueryMode; 6] = [
        Self::Local,
        Self::Global,
        Self::Hybrid,
        Self::Naive,
        Self::Mix,
        Self::Bypass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
            Self::Hybrid => "hybrid",
            Self::Naive => "naive",
            Self::Mix => "mix",
            Self::Bypass => "bypass",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown graph query mode: {s}"))
    }
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQuery {
    pub query: String,
    pub mode: QueryMode,
    pub top_k: usize,
    pub response_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAnswer {
    pub response: String,
    #[serde(default)]
    pub mode: Option<QueryMode>,
}

impl GraphAnswer {
    /// Whether the answer carries no usable context.
    pub fn is_empty(&self, markers: &[String]) -> bool {
        let text = self.response.trim();
        if text.is_empty() {
            return true;
        }
        let lower = text.to_lowercase();
        markers.iter().any(|m| lower.contains(&m.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityWrite {
    pub entity_name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationWrite {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub description: String,
}

/// `created` when the service reports a new node or edge (HTTP 201).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStatus {
    Ok,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationWriteOutcome {
    pub status: WriteStatus,
    /// Endpoint entities that did not exist and were created with the default type.
    pub synthesized: Vec<String>,
}

/// Metadata sent with an uploaded document. A `file_name` switches the upload to
/// the multipart endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentMetadata {
    pub file_name: Option<String>,
    pub source: Option<String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EntityEditBody<'a> {
    pub entity_name: &'a str,
    pub updated_data: EntityData<'a>,
    pub allow_rename: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct EntityData<'a> {
    pub entity_type: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RelationEditBody<'a> {
    pub source_id: &'a str,
    pub target_id: &'a str,
    pub updated_data: RelationData<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RelationData<'a> {
    pub description: &'a str,
    pub keywords: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextDocumentBody<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_source: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub track_id: Option<String>,
}

impl UploadResponse {
    pub fn id(self) -> Option<String> {
        [self.doc_id, self.track_id]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        for mode in QueryMode::ALL {
            assert_eq!(mode.as_str().parse::<QueryMode>().unwrap(), mode);
        }
        assert!("auto".parse::<QueryMode>().is_err());
    }

    #[test]
    fn query_body_shape() {
        let body = serde_json::to_value(GraphQuery {
            query: "who is Dana".into(),
            mode: QueryMode::Hybrid,
            top_k: 40,
            response_type: "Multiple Paragraphs".into(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "query": "who is Dana",
                "mode": "hybrid",
                "top_k": 40,
                "response_type": "Multiple Paragraphs"
            })
        );
    }

    #[test]
    fn empty_answer_detection() {
        let markers = vec!["[no-context]".to_string()];
        let blank = GraphAnswer { response: "  ".into(), mode: None };
        let none = GraphAnswer { response: "Sorry [no-context]".into(), mode: None };
        let real = GraphAnswer { response: "Dana is Charlie's sister.".into(), mode: None };
        assert!(blank.is_empty(&markers));
        assert!(none.is_empty(&markers));
        assert!(!real.is_empty(&markers));
    }

    #[test]
    fn upload_id_prefers_doc_id() {
        let both = UploadResponse { doc_id: Some("doc-1".into()), track_id: Some("t-1".into()) };
        assert_eq!(both.id().as_deref(), Some("doc-1"));
        let track = UploadResponse { doc_id: None, track_id: Some("t-1".into()) };
        assert_eq!(track.id().as_deref(), Some("t-1"));
        let neither = UploadResponse { doc_id: Some(String::new()), track_id: None };
        assert_eq!(neither.id(), None);
    }
}
