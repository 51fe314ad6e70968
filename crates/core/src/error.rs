use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetching {url} returned {status}")]
    Fetch { url: String, status: u16 },

    #[error("no element matches `{selector}` on {url}")]
    ElementNotFound { selector: String, url: String },

    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("invalid css selector `{0}`")]
    InvalidSelector(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("series scraper task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metadata file: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("either a vision or a text embedding model must be configured")]
    NoEmbeddingModel,

    #[error("only one embedding model (vision or text) can be configured at a time")]
    ConflictingEmbeddingModels,

    #[error("unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf rasterization failed: {0}")]
    Rasterize(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedder returned {actual} vectors for a batch of {expected} documents")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("vector store error: {0}")]
    Search(#[from] SearchError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// A batch whose upsert kept failing after every allowed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upsert of points {start}..{end} failed after {attempts} attempts: {last_error}")]
pub struct UpsertFailure {
    pub start: usize,
    pub end: usize,
    pub attempts: usize,
    pub last_error: String,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
