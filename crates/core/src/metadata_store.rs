use crate::error::MetadataError;
use crate::models::ExtractionRecord;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_METADATA_FILE: &str = "extraction_metadata.json";
pub const DEFAULT_CURATOR: &str = "Michael Mauboussin";

/// JSON file listing every scraped document.
///
/// Writes are read-modify-write and assume a single writer.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
    curator: String,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            curator: DEFAULT_CURATOR.to_string(),
        }
    }

    /// Author filled into loaded records whose `author` is missing, null or empty.
    pub fn with_curator(mut self, curator: impl Into<String>) -> Self {
        self.curator = curator.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `records` to whatever array the file already holds.
    ///
    /// Missing, empty or malformed content is replaced by a fresh array.
    pub fn save(&self, records: &[ExtractionRecord]) -> Result<usize, MetadataError> {
        let mut entries = self.existing_entries()?;
        for record in records {
            entries.push(serde_json::to_value(record)?);
        }

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let rendered = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, rendered)?;

        info!(path = %self.path.display(), appended = records.len(), total = entries.len(), "saved extraction metadata");
        Ok(entries.len())
    }

    pub fn load(&self) -> Result<Vec<ExtractionRecord>, MetadataError> {
        let raw = fs::read_to_string(&self.path)?;
        let mut records: Vec<ExtractionRecord> = serde_json::from_str(&raw)?;
        for record in records.iter_mut().filter(|record| record.authors.is_empty()) {
            record.authors = vec![self.curator.clone()];
        }
        Ok(records)
    }

    fn existing_entries(&self) -> Result<Vec<Value>, MetadataError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "existing metadata is not a JSON array, starting fresh");
                Ok(Vec::new())
            }
        }
    }
}
