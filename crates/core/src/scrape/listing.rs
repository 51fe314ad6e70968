use super::{download_pdf, element_text, fetch_text, parse_selector, sanitize_filename, ScraperConfig};
use crate::error::ScrapeError;
use crate::models::ExtractionRecord;
use regex::Regex;
use reqwest::Client;
use scraper::Html;
use std::sync::OnceLock;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    pub label: String,
    pub href: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListingLinks {
    pub research: Vec<ListingLink>,
    pub series: Option<ListingLink>,
}

#[derive(Debug, Clone)]
pub struct ListingScrape {
    pub records: Vec<ExtractionRecord>,
    pub series_url: Option<String>,
}

/// Text between the first pair of parentheses, e.g. `1995-2004`.
pub fn parse_label_date(label: &str) -> Option<String> {
    static DATE: OnceLock<Regex> = OnceLock::new();
    let pattern = DATE.get_or_init(|| Regex::new(r"\(([^)]*)\)").expect("static regex"));

    pattern
        .captures(label)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().trim().to_string())
        .filter(|date| !date.is_empty())
}

pub fn partition_listing_links(
    html: &str,
    page_url: &Url,
    config: &ScraperConfig,
) -> Result<ListingLinks, ScrapeError> {
    let document = Html::parse_document(html);
    let region_selector = parse_selector(&config.content_region)?;
    let link_selector = parse_selector("a[href]")?;

    let regions: Vec<_> = document.select(&region_selector).collect();
    let region = regions
        .len()
        .checked_sub(config.region_from_end)
        .and_then(|index| regions.get(index))
        .ok_or_else(|| ScrapeError::ElementNotFound {
            selector: config.content_region.clone(),
            url: page_url.to_string(),
        })?;

    let mut links = ListingLinks::default();
    for anchor in region.select(&link_selector) {
        let label = element_text(anchor);
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = page_url.join(href)?.to_string();

        if label.starts_with(&config.research_marker) {
            links.research.push(ListingLink { label, href });
        } else if links.series.is_none() && label.starts_with(&config.series_marker) {
            links.series = Some(ListingLink { label, href });
        } else {
            debug!(%label, "ignoring listing link");
        }
    }

    Ok(links)
}

/// Downloads every research PDF on the listing page.
///
/// A failed download aborts the step.
pub async fn scrape_listing(client: &Client, config: &ScraperConfig) -> Result<ListingScrape, ScrapeError> {
    let page_url = Url::parse(&config.listing_url)?;
    let html = fetch_text(client, page_url.as_str()).await?;
    let links = partition_listing_links(&html, &page_url, config)?;

    let mut records = Vec::with_capacity(links.research.len());
    for link in links.research {
        let stem = sanitize_filename(&link.label);
        let path = download_pdf(client, &link.href, &config.data_dir, &stem).await?;

        records.push(ExtractionRecord {
            date: parse_label_date(&link.label),
            url: link.href,
            title: link.label,
            authors: vec![config.curator.clone()],
            local_pdf_path: path.to_string_lossy().to_string(),
        });
    }

    info!(url = %page_url, research = records.len(), "listing scraped");
    Ok(ListingScrape {
        records,
        series_url: links.series.map(|link| link.href),
    })
}
