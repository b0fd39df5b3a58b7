//! HTTP client for the graph service.
//!
//! Translates [`GraphStore`] calls to the REST protocol and maps failures onto the
//! error taxonomy: transport errors, timeouts and 5xx become
//! [`CortexError::GraphUnavailable`], 4xx becomes [`CortexError::GraphRejected`]
//! with the body verbatim. Nothing is retried or swallowed here.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::types::{
    EntityData, EntityEditBody, RelationData, RelationEditBody, TextDocumentBody, UploadResponse,
};
use super::{
    DocumentMetadata, EndpointResolver, EntityWrite, GraphAnswer, GraphQuery, GraphStore,
    RelationWrite, RelationWriteOutcome, WriteStatus,
};
use crate::config::GraphConfig;
use crate::error::{CortexError, Result};

pub struct GraphServiceClient {
    http: reqwest::Client,
    endpoint: Arc<dyn EndpointResolver>,
    default_entity_type: String,
}

impl GraphServiceClient {
    pub fn new(config: &GraphConfig, endpoint: Arc<dyn EndpointResolver>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CortexError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            default_entity_type: config.default_entity_type.clone(),
        })
    }

    async fn url(&self, path: &str) -> Result<String> {
        Ok(format!("{}{path}", self.endpoint.base_url().await?))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(unavailable)?;
        check_status(response).await
    }

    async fn edit_entity(
        &self,
        entity_name: &str,
        entity_type: &str,
        description: &str,
    ) -> Result<WriteStatus> {
        let body = EntityEditBody {
            entity_name,
            updated_data: EntityData {
                entity_type,
                description,
            },
            allow_rename: false,
        };
        let url = self.url("/graph/entity/edit").await?;
        let response = self.send(self.http.post(url).json(&body)).await?;
        Ok(write_status(response.status()))
    }
}

fn unavailable(e: reqwest::Error) -> CortexError {
    if e.is_timeout() {
        CortexError::GraphUnavailable(format!("request timed out: {e}"))
    } else {
        CortexError::GraphUnavailable(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(CortexError::GraphRejected {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(CortexError::GraphUnavailable(format!("HTTP {status}: {body}")))
    }
}

fn write_status(status: StatusCode) -> WriteStatus {
    if status == StatusCode::CREATED {
        WriteStatus::Created
    } else {
        WriteStatus::Ok
    }
}

#[async_trait]
impl GraphStore for GraphServiceClient {
    async fn query(&self, query: &GraphQuery) -> Result<GraphAnswer> {
        let url = self.url("/query").await?;
        let response = self.send(self.http.post(url).json(query)).await?;
        let mut answer: GraphAnswer = response.json().await.map_err(unavailable)?;
        answer.mode = Some(query.mode);
        tracing::debug!(mode = %query.mode, chars = answer.response.len(), "graph query answered");
        Ok(answer)
    }

    async fn write_entity(&self, entity: &EntityWrite) -> Result<WriteStatus> {
        self.edit_entity(&entity.entity_name, &entity.entity_type, &entity.description)
            .await
    }

    async fn write_relation(&self, relation: &RelationWrite) -> Result<RelationWriteOutcome> {
        let labels = self.list_labels().await?;
        let mut synthesized = Vec::new();
        for endpoint in [&relation.subject, &relation.object] {
            if labels.contains(endpoint) || synthesized.contains(endpoint) {
                continue;
            }
            self.edit_entity(endpoint, &self.default_entity_type, &relation.description)
                .await?;
            tracing::warn!(
                entity = %endpoint,
                entity_type = %self.default_entity_type,
                "synthesized missing relation endpoint"
            );
            synthesized.push(endpoint.clone());
        }

        let body = RelationEditBody {
            source_id: &relation.subject,
            target_id: &relation.object,
            updated_data: RelationData {
                description: &relation.description,
                keywords: &relation.predicate,
            },
        };
        let url = self.url("/graph/relation/edit").await?;
        let response = self.send(self.http.post(url).json(&body)).await?;
        Ok(RelationWriteOutcome {
            status: write_status(response.status()),
            synthesized,
        })
    }

    async fn upload_document(&self, text: &str, metadata: &DocumentMetadata) -> Result<String> {
        let request = match &metadata.file_name {
            Some(file_name) => {
                let part = reqwest::multipart::Part::text(text.to_string())
                    .file_name(file_name.clone());
                let form = reqwest::multipart::Form::new().part("file", part);
                self.http.post(self.url("/documents/upload").await?).multipart(form)
            }
            None => {
                let body = TextDocumentBody {
                    text,
                    file_source: metadata.source.as_deref(),
                };
                self.http.post(self.url("/documents/text").await?).json(&body)
            }
        };

        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let raw = response.text().await.map_err(unavailable)?;
        let parsed: UploadResponse = serde_json::from_str(&raw)?;
        parsed.id().ok_or(CortexError::GraphRejected {
            status,
            body: format!("upload response carried no document id: {raw}"),
        })
    }

    async fn list_labels(&self) -> Result<BTreeSet<String>> {
        let url = self.url("/graph/label/list").await?;
        let response = self.send(self.http.get(url)).await?;
        let labels: Vec<String> = response.json().await.map_err(unavailable)?;
        Ok(labels.into_iter().collect())
    }
}
