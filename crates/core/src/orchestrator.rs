use crate::embeddings::{load_embedder, BoxedEmbedder};
use crate::error::{ConfigError, IngestError, UpsertFailure};
use crate::extractor::{LopdfTextPages, PageSource, PdfRasterizer};
use crate::ingest::{build_page_documents, SkippedRecord};
use crate::metadata_store::MetadataStore;
use crate::models::{IngestionOptions, Metadata, PageDocument, QueryResult, VectorPoint};
use crate::settings::{CollectionSettings, DbSettings, EmbeddingModelConfig};
use crate::stores::QdrantStore;
use crate::traits::VectorIndex;
use crate::SearchError;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSuccess {
    pub start: usize,
    pub end: usize,
    pub attempts: usize,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    /// Every point built, including those of failed batches.
    pub points: Vec<VectorPoint>,
    pub upserted_batches: Vec<UpsertSuccess>,
    pub failed_batches: Vec<UpsertFailure>,
    pub skipped: Vec<SkippedRecord>,
}

impl IngestionReport {
    /// True when every batch reached the vector database.
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty()
    }

    pub fn stored_points(&self) -> usize {
        self.upserted_batches.iter().map(|batch| batch.end - batch.start).sum()
    }
}

/// Encode-and-upsert pipeline over one vector collection, plus its query path.
pub struct VectorStore<V>
where
    V: VectorIndex,
{
    index: V,
    embedder: BoxedEmbedder,
    pages: Box<dyn PageSource + Send + Sync>,
    options: IngestionOptions,
}

impl VectorStore<QdrantStore> {
    /// Loads the configured model and connects to (or creates) its Qdrant collection.
    pub async fn from_pretrained(
        settings: &DbSettings,
        options: IngestionOptions,
        recreate: bool,
    ) -> Result<Self, IngestError> {
        options.validate()?;

        let embedder = load_embedder(&settings.embedding, &settings.model_cache_dir)?;
        let collection = CollectionSettings::for_layout(
            settings.collection_name.as_str(),
            embedder.layout(),
            embedder.dimensions(),
        );
        let index = QdrantStore::new(&settings.connection, collection)?;
        if recreate {
            index.recreate_collection().await?;
        } else {
            index.ensure_collection().await?;
        }

        let pages: Box<dyn PageSource + Send + Sync> = match &settings.embedding {
            EmbeddingModelConfig::Vision(_) => Box::new(PdfRasterizer::new(settings.data_dir.join("pages"))),
            EmbeddingModelConfig::Text(_) => Box::new(LopdfTextPages),
        };

        Ok(Self::new(index, embedder, pages, options)?)
    }
}

impl<V> VectorStore<V>
where
    V: VectorIndex + Send + Sync,
{
    pub fn new(
        index: V,
        embedder: BoxedEmbedder,
        pages: Box<dyn PageSource + Send + Sync>,
        options: IngestionOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            index,
            embedder,
            pages,
            options,
        })
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    /// Reads the metadata file, splits each PDF into pages and indexes them in batches.
    ///
    /// Failed upserts are reported per batch and do not stop the run.
    pub async fn ingest(&self, metadata_path: &Path) -> Result<IngestionReport, IngestError> {
        let records = MetadataStore::new(metadata_path)
            .with_curator(self.options.curator.as_str())
            .load()?;
        info!(path = %metadata_path.display(), records = records.len(), "loaded extraction metadata");

        let built = build_page_documents(&records, self.pages.as_ref()).await;
        let mut report = self.encode_and_upsert(&built.documents).await?;
        report.skipped = built.skipped;

        info!(
            points = report.points.len(),
            upserted_batches = report.upserted_batches.len(),
            failed_batches = report.failed_batches.len(),
            skipped_records = report.skipped.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Embeds `documents` batch by batch, in order, and upserts each batch.
    ///
    /// An embedder returning the wrong number of vectors aborts immediately.
    pub async fn encode_and_upsert(&self, documents: &[PageDocument]) -> Result<IngestionReport, IngestError> {
        let mut report = IngestionReport::default();
        let progress = self.progress_bar(documents.len());

        for (batch_index, batch) in documents.chunks(self.options.batch_size).enumerate() {
            let start = batch_index * self.options.batch_size;

            let vectors = self.embedder.embed_documents(batch)?;
            if vectors.len() != batch.len() {
                progress.abandon();
                return Err(IngestError::EmbeddingCountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }

            let points: Vec<VectorPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(document, vector)| document.to_point(vector))
                .collect();

            match self.upsert_with_retry(&points, start).await {
                Ok(success) => report.upserted_batches.push(success),
                Err(failure) => report.failed_batches.push(failure),
            }

            report.points.extend(points);
            progress.inc(batch.len() as u64);
        }

        progress.finish();
        Ok(report)
    }

    /// Upserts one batch, trying up to `max_upsert_attempts` times.
    pub async fn upsert_with_retry(&self, points: &[VectorPoint], start: usize) -> Result<UpsertSuccess, UpsertFailure> {
        let end = start + points.len();
        let max_attempts = self.options.max_upsert_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.index.upsert_points(points).await {
                Ok(()) => {
                    info!(start, end, attempt, "upserted points");
                    return Ok(UpsertSuccess {
                        start,
                        end,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    warn!(start, end, attempt, %error, "upsert failed");
                    last_error = error.to_string();
                }
            }

            if attempt < max_attempts && !self.options.retry_backoff.is_zero() {
                tokio::time::sleep(self.options.retry_backoff * attempt as u32).await;
            }
        }

        let failure = UpsertFailure {
            start,
            end,
            attempts: max_attempts,
            last_error,
        };
        error!(%failure, "giving up on batch");
        Err(failure)
    }

    /// Top-`k` pages for `text`, best match first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryResult>, SearchError> {
        if text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(text)?;
        let mut hits = self.index.search(&vector, k).await?;
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|hit| QueryResult {
                query: text.to_string(),
                score: hit.score,
                matched_content: matched_content(&hit.payload),
                metadata: hit.payload,
            })
            .collect())
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Indexing pages")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(total as u64).with_style(style)
    }
}

fn matched_content(payload: &Metadata) -> String {
    payload
        .text
        .clone()
        .or_else(|| payload.base64_image.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use crate::error::EmbeddingError;
    use crate::models::{Embedding, ExtractionRecord, PageContent, ScoredPoint, VectorLayout};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeIndex {
        failures_left: Mutex<usize>,
        calls: Mutex<usize>,
        stored: Mutex<Vec<VectorPoint>>,
        hits: Vec<ScoredPoint>,
    }

    impl FakeIndex {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: Mutex::new(times),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }

        fn stored(&self) -> usize {
            self.stored.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn ensure_collection(&self) -> Result<(), SearchError> {
            Ok(())
        }

        async fn recreate_collection(&self) -> Result<(), SearchError> {
            Ok(())
        }

        async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), SearchError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SearchError::Request("qdrant unavailable".to_string()));
            }
            self.stored.lock().unwrap().extend_from_slice(points);
            Ok(())
        }

        async fn search(&self, _query: &Embedding, limit: usize) -> Result<Vec<ScoredPoint>, SearchError> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    struct FakeEmbedder {
        missing: usize,
    }

    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn layout(&self) -> VectorLayout {
            VectorLayout::Single
        }

        fn embed_documents(&self, documents: &[PageDocument]) -> Result<Vec<Embedding>, EmbeddingError> {
            let count = documents.len().saturating_sub(self.missing);
            Ok((0..count).map(|_| Embedding::Single(vec![1.0, 0.0])).collect())
        }

        fn embed_query(&self, _text: &str) -> Result<Embedding, EmbeddingError> {
            Ok(Embedding::Single(vec![1.0, 0.0]))
        }
    }

    struct FakePages {
        per_pdf: u32,
    }

    #[async_trait]
    impl PageSource for FakePages {
        async fn pages(&self, pdf: &Path) -> Result<Vec<PageContent>, IngestError> {
            Ok((1..=self.per_pdf)
                .map(|number| PageContent::Image {
                    number,
                    path: pdf.with_extension(format!("{number}.png")),
                    bytes: vec![number as u8],
                })
                .collect())
        }
    }

    fn options(batch_size: usize) -> IngestionOptions {
        IngestionOptions {
            batch_size,
            max_upsert_attempts: 3,
            retry_backoff: Duration::ZERO,
            show_progress: false,
            ..IngestionOptions::default()
        }
    }

    fn store(index: FakeIndex, missing: usize, per_pdf: u32, batch_size: usize) -> VectorStore<FakeIndex> {
        VectorStore::new(
            index,
            Box::new(FakeEmbedder { missing }),
            Box::new(FakePages { per_pdf }),
            options(batch_size),
        )
        .expect("valid options")
    }

    fn documents(count: usize) -> Vec<PageDocument> {
        let record = ExtractionRecord {
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            authors: Vec::new(),
            date: None,
            local_pdf_path: "a.pdf".to_string(),
        };
        (1..=count)
            .map(|n| PageDocument::new(PageContent::Text { number: n as u32, text: format!("p{n}") }, &record))
            .collect()
    }

    fn write_metadata(dir: &Path, pdfs: &[(&str, bool)]) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
        let mut records = Vec::new();
        for (title, exists) in pdfs {
            let pdf = dir.join(format!("{title}.pdf"));
            if *exists {
                std::fs::write(&pdf, b"%PDF-1.4")?;
            }
            records.push(ExtractionRecord {
                url: format!("https://example.com/{title}"),
                title: title.to_string(),
                authors: vec!["Michael Mauboussin".to_string()],
                date: Some("2024".to_string()),
                local_pdf_path: pdf.to_string_lossy().to_string(),
            });
        }
        let path = dir.join("extraction_metadata.json");
        MetadataStore::new(&path).save(&records)?;
        Ok(path)
    }

    #[tokio::test]
    async fn ingest_builds_one_point_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let metadata = write_metadata(dir.path(), &[("first", true), ("second", true)])?;
        let store = store(FakeIndex::default(), 0, 3, 4);

        let report = store.ingest(&metadata).await?;

        assert_eq!(report.points.len(), 6);
        assert!(report.is_complete());
        assert_eq!(
            report.upserted_batches,
            vec![
                UpsertSuccess { start: 0, end: 4, attempts: 1 },
                UpsertSuccess { start: 4, end: 6, attempts: 1 },
            ]
        );
        assert_eq!(store.index().stored(), 6);
        assert_eq!(report.points.iter().filter(|p| p.payload.title == "second").count(), 3);
        assert!(report.points.iter().all(|p| p.payload.base64_image.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_pdf_is_skipped_without_affecting_others() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let metadata = write_metadata(dir.path(), &[("gone", false), ("kept", true)])?;
        let store = store(FakeIndex::default(), 0, 2, 5);

        let report = store.ingest(&metadata).await?;

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].title, "gone");
        assert_eq!(report.points.len(), 2);
        assert!(report.points.iter().all(|p| p.payload.title == "kept"));
        Ok(())
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_fatal() {
        let store = store(FakeIndex::default(), 1, 1, 3);

        let result = store.encode_and_upsert(&documents(3)).await;

        assert!(matches!(
            result,
            Err(IngestError::EmbeddingCountMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(store.index().calls(), 0);
    }

    #[tokio::test]
    async fn failing_batch_is_reported_and_ingest_continues() -> Result<(), IngestError> {
        let store = store(FakeIndex::failing(3), 0, 1, 2);

        let report = store.encode_and_upsert(&documents(4)).await?;

        assert_eq!(store.index().calls(), 4);
        assert_eq!(report.failed_batches.len(), 1);
        let failure = &report.failed_batches[0];
        assert_eq!((failure.start, failure.end, failure.attempts), (0, 2, 3));
        assert!(failure.last_error.contains("qdrant unavailable"));
        assert_eq!(report.upserted_batches, vec![UpsertSuccess { start: 2, end: 4, attempts: 1 }]);
        assert_eq!(report.points.len(), 4);
        assert_eq!(report.stored_points(), 2);
        assert!(!report.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_attempts() {
        let store = store(FakeIndex::failing(2), 0, 1, 5);
        let points: Vec<_> = documents(2)
            .iter()
            .map(|d| d.to_point(Embedding::Single(vec![0.0, 1.0])))
            .collect();

        let outcome = store.upsert_with_retry(&points, 10).await;

        assert_eq!(outcome, Ok(UpsertSuccess { start: 10, end: 12, attempts: 3 }));
        assert_eq!(store.index().calls(), 3);
    }

    #[tokio::test]
    async fn query_returns_available_hits_best_first() -> Result<(), SearchError> {
        let hit = |id: &str, score: f64, text: &str| ScoredPoint {
            id: id.to_string(),
            score,
            payload: Metadata {
                title: id.to_string(),
                text: Some(text.to_string()),
                ..Metadata::default()
            },
        };
        let index = FakeIndex {
            hits: vec![hit("b", 0.2, "low"), hit("a", 0.9, "high"), hit("c", 0.5, "mid")],
            ..FakeIndex::default()
        };
        let store = store(index, 0, 1, 5);

        let results = store.query("x", 5).await?;

        assert_eq!(results.len(), 3);
        let scores: Vec<_> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
        assert_eq!(results[0].matched_content, "high");
        assert!(results.iter().all(|r| r.query == "x"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let store = store(FakeIndex::default(), 0, 1, 5);
        assert!(matches!(store.query("  ", 5).await, Err(SearchError::Request(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = VectorStore::new(
            FakeIndex::default(),
            Box::new(FakeEmbedder { missing: 0 }),
            Box::new(FakePages { per_pdf: 1 }),
            options(0),
        );
        assert!(matches!(result, Err(ConfigError::InvalidBatchSize)));
    }
}
