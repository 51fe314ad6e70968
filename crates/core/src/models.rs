use crate::error::ConfigError;
use crate::metadata_store::DEFAULT_CURATOR;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// `"author": null` reads the same as a missing key.
fn authors_or_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One scraped source document and the PDF it was saved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub url: String,
    pub title: String,
    #[serde(rename = "author", default, deserialize_with = "authors_or_empty")]
    pub authors: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "pdf_path")]
    pub local_pdf_path: String,
}

/// Payload stored next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub title: String,
    #[serde(rename = "author", default, deserialize_with = "authors_or_empty")]
    pub authors: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "url", default)]
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl From<&ExtractionRecord> for Metadata {
    fn from(record: &ExtractionRecord) -> Self {
        Self {
            title: record.title.clone(),
            authors: record.authors.clone(),
            date: record.date.clone(),
            source_url: record.url.clone(),
            base64_image: None,
            text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Image {
        number: u32,
        path: PathBuf,
        bytes: Vec<u8>,
    },
    Text {
        number: u32,
        text: String,
    },
}

impl PageContent {
    pub fn number(&self) -> u32 {
        match self {
            PageContent::Image { number, .. } | PageContent::Text { number, .. } => *number,
        }
    }
}

/// A single PDF page ready for embedding.
#[derive(Debug, Clone)]
pub struct PageDocument {
    pub id: Uuid,
    pub content: PageContent,
    pub metadata: Metadata,
}

impl PageDocument {
    pub fn new(content: PageContent, record: &ExtractionRecord) -> Self {
        let mut metadata = Metadata::from(record);
        match &content {
            PageContent::Image { bytes, .. } => metadata.base64_image = Some(STANDARD.encode(bytes)),
            PageContent::Text { text, .. } => metadata.text = Some(text.clone()),
        }

        Self {
            id: Uuid::new_v4(),
            content,
            metadata,
        }
    }

    pub fn to_point(&self, vector: Embedding) -> VectorPoint {
        VectorPoint {
            id: self.id.to_string(),
            vector,
            payload: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorLayout {
    Single,
    Multi,
}

/// Dense vector, or a bag of vectors compared with max-sim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Embedding {
    Single(Vec<f32>),
    Multi(Vec<Vec<f32>>),
}

impl Embedding {
    pub fn layout(&self) -> VectorLayout {
        match self {
            Embedding::Single(_) => VectorLayout::Single,
            Embedding::Multi(_) => VectorLayout::Multi,
        }
    }

    /// True when every vector has exactly `size` components.
    pub fn has_dimensions(&self, size: usize) -> bool {
        match self {
            Embedding::Single(vector) => vector.len() == size,
            Embedding::Multi(vectors) => {
                !vectors.is_empty() && vectors.iter().all(|vector| vector.len() == size)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Embedding,
    pub payload: Metadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
    pub payload: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub score: f64,
    pub matched_content: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub batch_size: usize,
    pub max_upsert_attempts: usize,
    pub retry_backoff: Duration,
    pub show_progress: bool,
    /// Author given to metadata records that carry none.
    pub curator: String,
}

impl IngestionOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_upsert_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            show_progress: true,
            curator: DEFAULT_CURATOR.to_string(),
        }
    }
}
