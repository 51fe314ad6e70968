use crate::extractor::PageSource;
use crate::models::{ExtractionRecord, PageDocument};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub title: String,
    pub pdf_path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PageDocuments {
    pub documents: Vec<PageDocument>,
    pub skipped: Vec<SkippedRecord>,
}

/// One document per page of every record's PDF.
///
/// Records whose PDF is missing or unreadable are skipped, the rest are unaffected.
pub async fn build_page_documents<P>(records: &[ExtractionRecord], pages: &P) -> PageDocuments
where
    P: PageSource + Sync + ?Sized,
{
    let mut result = PageDocuments::default();

    for record in records {
        let path = Path::new(&record.local_pdf_path);
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        if !exists {
            warn!(path = %path.display(), title = %record.title, "pdf not found, skipping record");
            result.skipped.push(SkippedRecord {
                title: record.title.clone(),
                pdf_path: path.to_path_buf(),
                reason: "pdf not found".to_string(),
            });
            continue;
        }

        match pages.pages(path).await {
            Ok(contents) => {
                debug!(path = %path.display(), pages = contents.len(), "pdf split into pages");
                result
                    .documents
                    .extend(contents.into_iter().map(|content| PageDocument::new(content, record)));
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "could not split pdf, skipping record");
                result.skipped.push(SkippedRecord {
                    title: record.title.clone(),
                    pdf_path: path.to_path_buf(),
                    reason: error.to_string(),
                });
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::models::PageContent;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    struct CountingPages;

    #[async_trait]
    impl PageSource for CountingPages {
        async fn pages(&self, pdf: &Path) -> Result<Vec<PageContent>, IngestError> {
            let count = fs::read_to_string(pdf)?.trim().parse::<u32>().map_err(|e| IngestError::PdfParse(e.to_string()))?;
            Ok((1..=count)
                .map(|number| PageContent::Text { number, text: format!("page {number}") })
                .collect())
        }
    }

    fn record(title: &str, path: &Path) -> ExtractionRecord {
        ExtractionRecord {
            url: format!("https://example.com/{title}"),
            title: title.to_string(),
            authors: vec!["Michael Mauboussin".to_string()],
            date: Some("2024".to_string()),
            local_pdf_path: path.to_string_lossy().to_string(),
        }
    }

    #[tokio::test]
    async fn every_page_becomes_a_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("a.pdf");
        fs::write(&pdf, "4")?;

        let built = build_page_documents(&[record("a", &pdf)], &CountingPages).await;

        assert_eq!(built.documents.len(), 4);
        assert!(built.skipped.is_empty());
        let numbers: Vec<_> = built.documents.iter().map(|d| d.content.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert!(built.documents.iter().all(|d| d.metadata.title == "a" && d.metadata.source_url == "https://example.com/a"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_and_unreadable_pdfs_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        fs::write(&good, "2")?;
        fs::write(&bad, "not a number")?;

        let records = [
            record("missing", &dir.path().join("missing.pdf")),
            record("bad", &bad),
            record("good", &good),
        ];
        let built = build_page_documents(&records, &CountingPages).await;

        assert_eq!(built.documents.len(), 2);
        assert!(built.documents.iter().all(|d| d.metadata.title == "good"));
        let skipped: Vec<_> = built.skipped.iter().map(|s| (s.title.as_str(), s.reason.as_str())).collect();
        assert_eq!(skipped[0], ("missing", "pdf not found"));
        assert_eq!(skipped[1].0, "bad");
        Ok(())
    }
}
