//! Embedding models for page documents and queries.
//!
//! Both families run locally through fastembed:
//! - text: one ONNX text encoder for pages and queries
//! - vision: an image encoder for pages, paired with the text encoder trained
//!   into the same space for queries

use crate::error::{ConfigError, EmbeddingError, IngestError};
use crate::models::{Embedding, PageContent, PageDocument, VectorLayout};
use crate::settings::{EmbeddingModelConfig, TextModelConfig, VisionModelConfig};
use fastembed::{EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

pub trait Embedder {
    fn dimensions(&self) -> usize;

    fn layout(&self) -> VectorLayout;

    /// One embedding per document, in input order.
    fn embed_documents(&self, documents: &[PageDocument]) -> Result<Vec<Embedding>, EmbeddingError>;

    fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError>;
}

pub type BoxedEmbedder = Box<dyn Embedder + Send + Sync>;

/// Loads the configured model family, downloading weights into `cache_dir` on first use.
pub fn load_embedder(config: &EmbeddingModelConfig, cache_dir: &Path) -> Result<BoxedEmbedder, IngestError> {
    std::fs::create_dir_all(cache_dir)?;

    let embedder: BoxedEmbedder = match config {
        EmbeddingModelConfig::Vision(vision) => Box::new(FastembedVision::new(vision, cache_dir.to_path_buf())?),
        EmbeddingModelConfig::Text(text) => Box::new(FastembedText::new(text, cache_dir.to_path_buf())?),
    };

    info!(
        model = config.name(),
        dimensions = embedder.dimensions(),
        "embedding model loaded"
    );
    Ok(embedder)
}

fn resolve_text_model(name: &str) -> Result<(EmbeddingModel, usize), ConfigError> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(name))
        .map(|info| (info.model, info.dim))
        .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
}

fn resolve_image_model(name: &str) -> Result<(ImageEmbeddingModel, usize), ConfigError> {
    ImageEmbedding::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(name))
        .map(|info| (info.model, info.dim))
        .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
}

/// Text encoder sharing the image model's space, with its query prefix.
fn paired_query_model(model: &ImageEmbeddingModel) -> Option<(EmbeddingModel, Option<&'static str>)> {
    match model {
        ImageEmbeddingModel::NomicEmbedVisionV15 => Some((EmbeddingModel::NomicEmbedTextV15, Some("search_query: "))),
        ImageEmbeddingModel::ClipVitB32 => Some((EmbeddingModel::ClipVitB32, None)),
        _ => None,
    }
}

fn text_model(model: EmbeddingModel, cache_dir: PathBuf) -> Result<TextEmbedding, EmbeddingError> {
    let options = InitOptions::new(model)
        .with_cache_dir(cache_dir)
        .with_show_download_progress(true);
    TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
}

fn lock_failed<T>(error: std::sync::PoisonError<T>) -> EmbeddingError {
    EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {error}"))
}

fn with_prefix(prefix: Option<&str>, text: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{text}"),
        None => text.to_string(),
    }
}

/// fastembed's `embed()` takes `&mut self`, hence the mutexes.
pub struct FastembedText {
    model: Mutex<TextEmbedding>,
    dimensions: usize,
    query_prefix: Option<String>,
}

impl FastembedText {
    pub fn new(config: &TextModelConfig, cache_dir: PathBuf) -> Result<Self, IngestError> {
        let (model, dimensions) = resolve_text_model(&config.name)?;
        Ok(Self {
            model: Mutex::new(text_model(model, cache_dir)?),
            dimensions,
            query_prefix: config.query_prefix.clone(),
        })
    }
}

impl Embedder for FastembedText {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn layout(&self) -> VectorLayout {
        VectorLayout::Single
    }

    fn embed_documents(&self, documents: &[PageDocument]) -> Result<Vec<Embedding>, EmbeddingError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let texts = documents
            .iter()
            .map(|document| match &document.content {
                PageContent::Text { text, .. } => Ok(text.as_str()),
                PageContent::Image { number, .. } => Err(EmbeddingError::EmbeddingFailed(format!(
                    "text model cannot embed image page {number}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut model = self.model.lock().map_err(lock_failed)?;
        let vectors = model
            .embed(texts, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        Ok(vectors.into_iter().map(Embedding::Single).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let query = with_prefix(self.query_prefix.as_deref(), text);
        let mut model = self.model.lock().map_err(lock_failed)?;
        let vector = model
            .embed(vec![query], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        Ok(Embedding::Single(vector))
    }
}

/// Image encoder for pages; emits multi-vectors so the collection can use max-sim.
pub struct FastembedVision {
    images: Mutex<ImageEmbedding>,
    queries: Mutex<TextEmbedding>,
    dimensions: usize,
    query_prefix: Option<&'static str>,
}

impl FastembedVision {
    pub fn new(config: &VisionModelConfig, cache_dir: PathBuf) -> Result<Self, IngestError> {
        let (model, dimensions) = resolve_image_model(&config.name)?;
        let (query_model, query_prefix) =
            paired_query_model(&model).ok_or_else(|| ConfigError::UnknownModel(format!(
                "{} has no paired text encoder for queries",
                config.name
            )))?;

        let options = ImageInitOptions::new(model)
            .with_cache_dir(cache_dir.clone())
            .with_show_download_progress(true);
        let images = ImageEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            images: Mutex::new(images),
            queries: Mutex::new(text_model(query_model, cache_dir)?),
            dimensions,
            query_prefix,
        })
    }
}

impl Embedder for FastembedVision {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn layout(&self) -> VectorLayout {
        VectorLayout::Multi
    }

    fn embed_documents(&self, documents: &[PageDocument]) -> Result<Vec<Embedding>, EmbeddingError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let paths = documents
            .iter()
            .map(|document| match &document.content {
                PageContent::Image { path, .. } => Ok(path.as_path()),
                PageContent::Text { number, .. } => Err(EmbeddingError::EmbeddingFailed(format!(
                    "vision model cannot embed text page {number}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut model = self.images.lock().map_err(lock_failed)?;
        let vectors = model
            .embed(paths, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        Ok(vectors.into_iter().map(|vector| Embedding::Multi(vec![vector])).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let query = with_prefix(self.query_prefix, text);
        let mut model = self.queries.lock().map_err(lock_failed)?;
        let vector = model
            .embed(vec![query], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        Ok(Embedding::Multi(vec![vector]))
    }
}
