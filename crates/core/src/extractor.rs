use crate::error::IngestError;
use crate::models::PageContent;
use crate::scrape::sanitize_filename;
use async_trait::async_trait;
use lopdf::Document;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

/// Splits a PDF into per-page content, in page order.
#[async_trait]
pub trait PageSource {
    async fn pages(&self, pdf: &Path) -> Result<Vec<PageContent>, IngestError>;
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of every page, read with lopdf. Blank pages yield empty text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfTextPages;

impl LopdfTextPages {
    pub fn extract(&self, path: &Path) -> Result<Vec<PageContent>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push(PageContent::Text {
                number: page_no,
                text: normalize_whitespace(&text),
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!("pdf has no pages: {}", path.display())));
        }

        Ok(pages)
    }
}

#[async_trait]
impl PageSource for LopdfTextPages {
    async fn pages(&self, pdf: &Path) -> Result<Vec<PageContent>, IngestError> {
        self.extract(pdf)
    }
}

/// Renders each page to PNG with poppler's `pdftoppm`.
///
/// Images land in `<output_dir>/<flattened pdf path>/page-<n>.png` and are replaced on re-runs.
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    pub output_dir: PathBuf,
    pub program: String,
    pub dpi: u32,
}

impl PdfRasterizer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            program: "pdftoppm".to_string(),
            dpi: 100,
        }
    }
}

#[async_trait]
impl PageSource for PdfRasterizer {
    async fn pages(&self, pdf: &Path) -> Result<Vec<PageContent>, IngestError> {
        let target = self.output_dir.join(render_dir_name(pdf)?);

        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::create_dir_all(&target).await?;

        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(target.join("page"))
            .output()
            .await
            .map_err(|error| IngestError::Rasterize(format!("failed to run {}: {error}", self.program)))?;

        if !output.status.success() {
            return Err(IngestError::Rasterize(format!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                pdf.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut pages = Vec::new();
        for (number, path) in rendered_pages(&target) {
            let bytes = tokio::fs::read(&path).await?;
            pages.push(PageContent::Image { number, path, bytes });
        }

        if pages.is_empty() {
            return Err(IngestError::Rasterize(format!("no pages rendered for {}", pdf.display())));
        }

        debug!(pdf = %pdf.display(), pages = pages.len(), "rasterized pdf");
        Ok(pages)
    }
}

/// Directory name unique to `pdf`'s path, so equal stems in different folders never share output.
fn render_dir_name(pdf: &Path) -> Result<String, IngestError> {
    if pdf.file_stem().is_none() {
        return Err(IngestError::PdfParse(format!("path has no file name: {}", pdf.display())));
    }
    let flattened = sanitize_filename(&pdf.with_extension("").to_string_lossy());
    Ok(flattened.trim_start_matches('_').to_string())
}

/// `page-7.png` and `page-007.png` both map to page 7.
fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

fn rendered_pages(dir: &Path) -> Vec<(u32, PathBuf)> {
    let mut pages: Vec<_> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let number = entry.file_name().to_str().and_then(page_number)?;
            Some((number, entry.into_path()))
        })
        .collect();

    pages.sort_unstable_by_key(|(number, _)| *number);
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn page_numbers_ignore_zero_padding() {
        assert_eq!(page_number("page-7.png"), Some(7));
        assert_eq!(page_number("page-012.png"), Some(12));
        assert_eq!(page_number("page-1.ppm"), None);
        assert_eq!(page_number("cover.png"), None);
    }

    #[test]
    fn equal_stems_render_into_separate_directories() -> Result<(), IngestError> {
        let first = render_dir_name(Path::new("data/research/report.pdf"))?;
        let second = render_dir_name(Path::new("data/series/report.pdf"))?;

        assert_eq!(first, "data_research_report");
        assert_eq!(second, "data_series_report");
        assert_eq!(render_dir_name(Path::new("/tmp/a b.pdf"))?, "tmp_a_b");
        assert!(render_dir_name(Path::new("/")).is_err());
        Ok(())
    }

    #[test]
    fn rendered_pages_sort_numerically() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["page-10.png", "page-02.png", "page-1.png", "notes.txt"] {
            fs::write(dir.path().join(name), b"x")?;
        }

        let numbers: Vec<_> = rendered_pages(dir.path()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
        Ok(())
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_whitespace("  a\n\tb\u{a0} c "), "a b c");
    }

    fn write_pdf(path: &Path, page_texts: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in page_texts {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }

    #[test]
    fn blank_pages_keep_their_slot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("three.pdf");
        write_pdf(&path, &["Base rates", "", "Skill and luck"])?;

        let pages = LopdfTextPages.extract(&path)?;

        let numbers: Vec<_> = pages.iter().map(PageContent::number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        match &pages[1] {
            PageContent::Text { text, .. } => assert!(text.is_empty()),
            other => panic!("expected text page, got {other:?}"),
        }
        match &pages[0] {
            PageContent::Text { text, .. } => assert!(text.contains("Base rates")),
            other => panic!("expected text page, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = LopdfTextPages.extract(&path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_rasterizer_binary_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("doc.pdf");
        fs::write(&pdf, b"%PDF-1.4")?;

        let rasterizer = PdfRasterizer {
            program: "definitely-not-a-real-pdftoppm".to_string(),
            ..PdfRasterizer::new(dir.path().join("pages"))
        };

        let result = rasterizer.pages(&pdf).await;
        assert!(matches!(result, Err(IngestError::Rasterize(_))));
        Ok(())
    }
}
