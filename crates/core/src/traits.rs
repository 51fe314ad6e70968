use crate::models::{Embedding, ScoredPoint, VectorPoint};
use crate::SearchError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex {
    /// Creates the collection if it does not exist yet.
    async fn ensure_collection(&self) -> Result<(), SearchError>;

    /// Drops the collection and creates it again, empty.
    async fn recreate_collection(&self) -> Result<(), SearchError>;

    async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), SearchError>;

    /// Up to `limit` nearest points, best first.
    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredPoint>, SearchError>;
}
