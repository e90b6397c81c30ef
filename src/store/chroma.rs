//! Chroma-compatible REST client.
//!
//! All calls are scoped to one collection, addressed by name in
//! configuration and by id on the wire. The id is resolved lazily on first
//! use and then reused for the lifetime of the client:
//!
//! - read path: `GET /api/v1/collections/{name}`; a missing collection is
//!   [`RetrievalError::CollectionNotFound`].
//! - write path: `POST /api/v1/collections {name, get_or_create: true}`.
//!
//! Transport errors and non-success statuses map to
//! [`RetrievalError::StoreUnavailable`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use crate::error::{RetrievalError, RetrievalResult};

use super::{MetadataFilter, StoreHit, VectorRecord, VectorStore};

pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    documents: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    metadatas: Vec<&'a Map<String, Value>>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    include: [&'static str; 3],
}

/// Chroma answers queries with one inner list per query embedding.
#[derive(Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

/// Chroma rejects a multi-key `where` object; several conditions must be
/// combined with `$and`.
fn where_clause(filter: &MetadataFilter) -> Value {
    if filter.len() <= 1 {
        return Value::Object(filter.clone());
    }
    let clauses: Vec<Value> = filter
        .iter()
        .map(|(k, v)| {
            let mut m = Map::new();
            m.insert(k.clone(), v.clone());
            Value::Object(m)
        })
        .collect();
    json!({ "$and": clauses })
}

fn transport_error(url: &str, e: reqwest::Error) -> RetrievalError {
    if e.is_timeout() {
        RetrievalError::StoreUnavailable(format!("{} timed out", url))
    } else {
        RetrievalError::StoreUnavailable(format!("{}: {}", url, e))
    }
}

impl ChromaStore {
    pub fn new(base_url: &str, collection: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            collection_id: OnceCell::new(),
        })
    }

    async fn resolve_collection(&self, create: bool) -> RetrievalResult<String> {
        let response = if create {
            let url = format!("{}/api/v1/collections", self.base_url);
            self.client
                .post(&url)
                .json(&json!({ "name": self.collection, "get_or_create": true }))
                .send()
                .await
                .map_err(|e| transport_error(&url, e))?
        } else {
            let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| transport_error(&url, e))?
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Older servers answer a missing collection with a 500 and a
            // "does not exist" message instead of a 404.
            if !create && (status == StatusCode::NOT_FOUND || body.contains("does not exist")) {
                return Err(RetrievalError::CollectionNotFound(self.collection.clone()));
            }
            return Err(RetrievalError::StoreUnavailable(format!(
                "collection lookup returned {}: {}",
                status,
                crate::text::truncate_chars(&body, 200)
            )));
        }

        let parsed: CollectionResponse = response.json().await.map_err(|e| {
            RetrievalError::StoreUnavailable(format!("invalid collection response: {}", e))
        })?;
        tracing::debug!(collection = %self.collection, id = %parsed.id, "resolved collection");
        Ok(parsed.id)
    }

    async fn collection_id(&self, create: bool) -> RetrievalResult<&str> {
        self.collection_id
            .get_or_try_init(|| self.resolve_collection(create))
            .await
            .map(String::as_str)
    }

    async fn post(&self, id: &str, op: &str, body: &impl Serialize) -> RetrievalResult<reqwest::Response> {
        let url = format!("{}/api/v1/collections/{}/{}", self.base_url, id, op);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::StoreUnavailable(format!(
                "{} returned {}: {}",
                op,
                status,
                crate::text::truncate_chars(&text, 200)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn upsert(&self, records: &[VectorRecord]) -> RetrievalResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(true).await?;
        let body = UpsertRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };
        self.post(id, "upsert", &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> RetrievalResult<Vec<StoreHit>> {
        let id = self.collection_id(false).await?;
        let body = QueryRequest {
            query_embeddings: [embedding],
            n_results,
            filter: filter.filter(|f| !f.is_empty()).map(where_clause),
            include: ["documents", "metadatas", "distances"],
        };
        let response = self.post(id, "query", &body).await?;
        let parsed: QueryResponse = response.json().await.map_err(|e| {
            RetrievalError::StoreUnavailable(format!("invalid query response: {}", e))
        })?;

        let ids = parsed.ids.into_iter().next().unwrap_or_default();
        let mut documents = parsed
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut metadatas = parsed
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut distances = parsed
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();

        Ok(ids
            .into_iter()
            .map(|id| StoreHit {
                id,
                document: documents.next().flatten().unwrap_or_default(),
                metadata: metadatas.next().flatten().unwrap_or_default(),
                distance: distances.next().flatten().unwrap_or(f32::MAX),
            })
            .collect())
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> RetrievalResult<()> {
        let id = self.collection_id(true).await?;
        self.post(id, "delete", &json!({ "where": where_clause(filter) }))
            .await?;
        Ok(())
    }

    async fn count(&self) -> RetrievalResult<usize> {
        let id = self.collection_id(false).await?;
        let url = format!("{}/api/v1/collections/{}/count", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        if !response.status().is_success() {
            return Err(RetrievalError::StoreUnavailable(format!(
                "count returned {}",
                response.status()
            )));
        }
        response.json::<usize>().await.map_err(|e| {
            RetrievalError::StoreUnavailable(format!("invalid count response: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::filter_eq;

    #[test]
    fn test_where_clause_single_and_multi() {
        assert_eq!(where_clause(&filter_eq("topic", "guide")), json!({"topic": "guide"}));

        let mut filter = filter_eq("topic", "guide");
        filter.insert("source".into(), Value::from("a.md"));
        let clause = where_clause(&filter);
        let and = clause["$and"].as_array().unwrap();
        assert_eq!(and.len(), 2);
        assert!(and.contains(&json!({"topic": "guide"})));
        assert!(and.contains(&json!({"source": "a.md"})));
    }

    #[test]
    fn test_query_response_tolerates_nulls() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "ids": [["a", "b"]],
            "documents": [["doc a", null]],
            "metadatas": null,
            "distances": [[0.1, 0.2]]
        }))
        .unwrap();
        assert_eq!(parsed.ids[0].len(), 2);
        assert!(parsed.metadatas.is_none());
        assert_eq!(parsed.documents.unwrap()[0][1], None);
    }
}
