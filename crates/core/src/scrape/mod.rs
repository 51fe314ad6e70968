//! Scraping of the research listing page and the article series behind it.
//!
//! The listing page is fetched over plain HTTP. Articles in the series are
//! rendered by a headless browser, one tab per article.

pub mod listing;
pub mod series;

use crate::error::ScrapeError;
use crate::metadata_store::DEFAULT_CURATOR;
use crate::models::ExtractionRecord;
use reqwest::Client;
use scraper::Selector;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

pub use listing::{parse_label_date, partition_listing_links, scrape_listing, ListingLink, ListingLinks, ListingScrape};
pub use series::{collect_article_links, extract_article, scrape_series, ArticleFields};

/// Class lists (space separated, as they appear in the markup) for article pages.
#[derive(Debug, Clone)]
pub struct ArticleSelectors {
    pub article_links: String,
    pub date_class: String,
    pub title_class: String,
    pub text_class: String,
    pub pdf_button_class: String,
}

impl Default for ArticleSelectors {
    fn default() -> Self {
        Self {
            article_links: ".series-detail-articles a".to_string(),
            date_class: "insightHeaderTextRegular text-uppercase customColor insightDateColor".to_string(),
            title_class: "heroProductName equalSpace noMargin customColor".to_string(),
            text_class: "blockText".to_string(),
            pdf_button_class: "buttoncomponent left custom-btn btn btn-default btn-lg".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub window_size: (u32, u32),
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            window_size: (1280, 720),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub listing_url: String,
    pub research_marker: String,
    pub series_marker: String,
    pub content_region: String,
    /// Which content region holds the links, counted from the last one (1 = last).
    pub region_from_end: usize,
    pub selectors: ArticleSelectors,
    pub data_dir: PathBuf,
    /// Author attached to every record.
    pub curator: String,
    pub request_timeout: Duration,
    pub browser: BrowserOptions,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://www.michaelmauboussin.com/writing".to_string(),
            research_marker: "Research".to_string(),
            series_marker: "The Consilient Observer".to_string(),
            content_region: ".sqs-html-content".to_string(),
            region_from_end: 2,
            selectors: ArticleSelectors::default(),
            data_dir: PathBuf::from("data"),
            curator: DEFAULT_CURATOR.to_string(),
            request_timeout: Duration::from_secs(100),
            browser: BrowserOptions::default(),
        }
    }
}

pub fn build_client(config: &ScraperConfig) -> Result<Client, ScrapeError> {
    let client = Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("mauboussin-twin/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Scrapes the listing page, then the article series it links to.
pub async fn scrape_sources(config: &ScraperConfig) -> Result<Vec<ExtractionRecord>, ScrapeError> {
    let client = build_client(config)?;
    let listing = scrape_listing(&client, config).await?;
    let mut records = listing.records;

    match listing.series_url {
        Some(series_url) => {
            let series_config = config.clone();
            let runtime = Handle::current();
            let series = tokio::task::spawn_blocking(move || {
                scrape_series(&series_url, &series_config, &client, &runtime)
            })
            .await??;
            records.extend(series);
        }
        None => warn!(url = %config.listing_url, marker = %config.series_marker, "series link not found"),
    }

    info!(records = records.len(), "scrape finished");
    Ok(records)
}

/// Keeps ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
pub fn sanitize_filename(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub(crate) async fn fetch_text(client: &Client, url: &str) -> Result<String, ScrapeError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Fetch {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response.text().await?)
}

/// Downloads `url` to `<dir>/<stem>.pdf`, overwriting an earlier download.
pub async fn download_pdf(
    client: &Client,
    url: &str,
    dir: &Path,
    stem: &str,
) -> Result<PathBuf, ScrapeError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Fetch {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let bytes = response.bytes().await?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{stem}.pdf"));
    tokio::fs::write(&path, &bytes).await?;

    info!(url, path = %path.display(), bytes = bytes.len(), "downloaded pdf");
    Ok(path)
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|_| ScrapeError::InvalidSelector(css.to_string()))
}

/// `"a b c"` becomes `.a.b.c`.
pub(crate) fn class_selector(classes: &str) -> String {
    classes
        .split_whitespace()
        .map(|class| format!(".{class}"))
        .collect()
}

pub(crate) fn element_text(element: scraper::ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_replaces_punctuation() {
        assert_eq!(
            sanitize_filename("Research, Articles (1995-2004)"),
            "Research__Articles__1995-2004_"
        );
        assert_eq!(sanitize_filename("Base_Rates-2"), "Base_Rates-2");
    }

    #[test]
    fn class_lists_become_compound_selectors() {
        assert_eq!(class_selector("btn  btn-default"), ".btn.btn-default");
        assert!(parse_selector(&class_selector(&ArticleSelectors::default().title_class)).is_ok());
    }

    #[test]
    fn default_config_targets_second_to_last_region() {
        let config = ScraperConfig::default();
        assert_eq!(config.region_from_end, 2);
        assert_eq!(config.curator, "Michael Mauboussin");
    }
}
