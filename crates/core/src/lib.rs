pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod metadata_store;
pub mod models;
pub mod orchestrator;
pub mod scrape;
pub mod settings;
pub mod stores;
pub mod traits;

pub use embeddings::{load_embedder, BoxedEmbedder, Embedder, FastembedText, FastembedVision};
pub use error::{
    ConfigError, EmbeddingError, IngestError, MetadataError, ScrapeError, SearchError, UpsertFailure,
};
pub use extractor::{normalize_whitespace, LopdfTextPages, PageSource, PdfRasterizer};
pub use ingest::{build_page_documents, PageDocuments, SkippedRecord};
pub use metadata_store::{MetadataStore, DEFAULT_CURATOR, DEFAULT_METADATA_FILE};
pub use models::{
    Embedding, ExtractionRecord, IngestionOptions, Metadata, PageContent, PageDocument, QueryResult,
    ScoredPoint, VectorLayout, VectorPoint,
};
pub use orchestrator::{IngestionReport, UpsertSuccess, VectorStore};
pub use scrape::{scrape_sources, ScraperConfig};
pub use settings::{
    CollectionSettings, DbSettings, EmbeddingModelConfig, QdrantConnection, TextModelConfig,
    VisionModelConfig, DEFAULT_COLLECTION_NAME,
};
pub use stores::QdrantStore;
pub use traits::VectorIndex;
