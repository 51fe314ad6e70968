use crate::models::{Embedding, Metadata, ScoredPoint, VectorLayout, VectorPoint};
use crate::settings::{CollectionSettings, QdrantConnection};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Qdrant collection spoken to over its REST API.
pub struct QdrantStore {
    endpoint: String,
    collection: CollectionSettings,
    client: Client,
}

impl QdrantStore {
    pub fn new(connection: &QdrantConnection, collection: CollectionSettings) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = connection.api_key() {
            let value = HeaderValue::from_str(api_key.trim())
                .map_err(|_| SearchError::Request("invalid Qdrant API key".to_string()))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            endpoint: connection.base_url(),
            collection,
            client,
        })
    }

    pub fn collection(&self) -> &CollectionSettings {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection.name)
    }

    fn check_vector(&self, vector: &Embedding) -> Result<(), SearchError> {
        let expected = if self.collection.multi_vector {
            VectorLayout::Multi
        } else {
            VectorLayout::Single
        };
        if vector.layout() != expected {
            return Err(SearchError::Request(format!(
                "collection {} expects {:?} vectors, got {:?}",
                self.collection.name,
                expected,
                vector.layout()
            )));
        }
        if !vector.has_dimensions(self.collection.vector_size) {
            return Err(SearchError::Request(format!(
                "embedding dimension does not match collection size {}",
                self.collection.vector_size
            )));
        }
        Ok(())
    }

    async fn create_collection(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.collection_url())
            .json(&self.collection.create_body())
            .send()
            .await?;
        ensure_success(response).await?;

        info!(
            collection = %self.collection.name,
            size = self.collection.vector_size,
            multi_vector = self.collection.multi_vector,
            "created qdrant collection"
        );
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("{status}: {body}"),
    })
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    #[serde(default)]
    vectors: Value,
}

/// Rejects an existing collection built for another vector size or shape.
fn check_existing(expected: &CollectionSettings, vectors: &Value) -> Result<(), SearchError> {
    let size = vectors.get("size").and_then(Value::as_u64);
    let multi_vector = vectors.get("multivector_config").is_some_and(|config| !config.is_null());

    if size == Some(expected.vector_size as u64) && multi_vector == expected.multi_vector {
        return Ok(());
    }

    Err(SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!(
            "collection {} holds vectors {vectors} but the model needs size {} (multi_vector: {}); \
             recreate the collection or pick the matching model",
            expected.name, expected.vector_size, expected.multi_vector
        ),
    })
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryPoints,
}

#[derive(Debug, Deserialize)]
struct QueryPoints {
    #[serde(default)]
    points: Vec<RawScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct RawScoredPoint {
    id: Value,
    score: f64,
    #[serde(default)]
    payload: Option<Metadata>,
}

impl From<RawScoredPoint> for ScoredPoint {
    fn from(raw: RawScoredPoint) -> Self {
        let id = match raw.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        Self {
            id,
            score: raw.score,
            payload: raw.payload.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return self.create_collection().await;
        }

        let existing: CollectionInfoResponse = ensure_success(response).await?.json().await?;
        check_existing(&self.collection, &existing.result.config.params.vectors)?;
        debug!(collection = %self.collection.name, "qdrant collection already exists");
        Ok(())
    }

    async fn recreate_collection(&self) -> Result<(), SearchError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
        }
        self.create_collection().await
    }

    async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), SearchError> {
        for point in points {
            self.check_vector(&point.vector)?;
        }

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        ensure_success(response).await?;

        Ok(())
    }

    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredPoint>, SearchError> {
        self.check_vector(query)?;

        let response = self
            .client
            .post(format!("{}/points/query", self.collection_url()))
            .json(&json!({
                "query": query,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed: QueryResponse = ensure_success(response).await?.json().await?;
        Ok(parsed.result.points.into_iter().map(ScoredPoint::from).collect())
    }
}
