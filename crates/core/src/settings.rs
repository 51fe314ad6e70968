use crate::error::ConfigError;
use crate::models::VectorLayout;
use serde_json::{json, Value};
use std::path::PathBuf;

pub const DEFAULT_COLLECTION_NAME: &str = "mauboussinTwin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionModelConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextModelConfig {
    pub name: String,
    pub query_prefix: Option<String>,
}

/// Which embedding family the pipeline runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingModelConfig {
    Vision(VisionModelConfig),
    Text(TextModelConfig),
}

impl EmbeddingModelConfig {
    /// Exactly one of `vision` and `text` must be set.
    pub fn from_options(
        vision: Option<String>,
        text: Option<String>,
        query_prefix: Option<String>,
    ) -> Result<Self, ConfigError> {
        let vision = vision.filter(|name| !name.trim().is_empty());
        let text = text.filter(|name| !name.trim().is_empty());

        match (vision, text) {
            (Some(name), None) => Ok(Self::Vision(VisionModelConfig { name })),
            (None, Some(name)) => Ok(Self::Text(TextModelConfig { name, query_prefix })),
            (None, None) => Err(ConfigError::NoEmbeddingModel),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingEmbeddingModels),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Vision(config) => &config.name,
            Self::Text(config) => &config.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QdrantConnection {
    Local { host: String, port: u16 },
    Cloud { url: String, api_key: Option<String> },
}

impl QdrantConnection {
    pub fn base_url(&self) -> String {
        match self {
            Self::Local { host, port } => format!("http://{host}:{port}"),
            Self::Cloud { url, .. } => url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::Cloud { api_key, .. } => api_key.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarQuantization {
    pub quantile: f32,
    pub always_ram: bool,
}

impl Default for ScalarQuantization {
    fn default() -> Self {
        Self {
            quantile: 0.99,
            always_ram: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSettings {
    pub name: String,
    pub vector_size: usize,
    pub multi_vector: bool,
    pub on_disk_payload: bool,
    pub indexing_threshold: u64,
    pub quantization: ScalarQuantization,
}

impl CollectionSettings {
    /// Image collections: one bag of vectors per page, scored with max-sim.
    pub fn multi_vector(name: impl Into<String>, vector_size: usize) -> Self {
        Self {
            multi_vector: true,
            ..Self::single_vector(name, vector_size)
        }
    }

    pub fn single_vector(name: impl Into<String>, vector_size: usize) -> Self {
        Self {
            name: name.into(),
            vector_size,
            multi_vector: false,
            on_disk_payload: true,
            indexing_threshold: 100,
            quantization: ScalarQuantization::default(),
        }
    }

    pub fn for_layout(name: impl Into<String>, layout: VectorLayout, vector_size: usize) -> Self {
        match layout {
            VectorLayout::Multi => Self::multi_vector(name, vector_size),
            VectorLayout::Single => Self::single_vector(name, vector_size),
        }
    }

    /// Request body for `PUT /collections/{name}`.
    pub fn create_body(&self) -> Value {
        let mut vectors = json!({
            "size": self.vector_size,
            "distance": "Cosine",
        });
        if self.multi_vector {
            vectors["multivector_config"] = json!({ "comparator": "max_sim" });
        }

        json!({
            "vectors": vectors,
            "on_disk_payload": self.on_disk_payload,
            "optimizers_config": { "indexing_threshold": self.indexing_threshold },
            "quantization_config": {
                "scalar": {
                    "type": "int8",
                    "quantile": self.quantization.quantile,
                    "always_ram": self.quantization.always_ram,
                }
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub embedding: EmbeddingModelConfig,
    pub connection: QdrantConnection,
    pub collection_name: String,
    pub model_cache_dir: PathBuf,
    pub data_dir: PathBuf,
}
