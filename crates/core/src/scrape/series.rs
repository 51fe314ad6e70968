use super::{class_selector, download_pdf, element_text, parse_selector, sanitize_filename, BrowserOptions, ScraperConfig};
use crate::error::ScrapeError;
use crate::models::ExtractionRecord;
use headless_chrome::{Browser, LaunchOptions, Tab};
use reqwest::Client;
use scraper::Html;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleFields {
    pub date: String,
    pub title: String,
    pub body: String,
    pub pdf_url: String,
}

/// Article URLs of the series index, first occurrence wins.
pub fn collect_article_links(html: &str, base: &Url, selector: &str) -> Result<Vec<String>, ScrapeError> {
    let document = Html::parse_document(html);
    let selector = parse_selector(selector)?;

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let url = base.join(href)?.to_string();
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    Ok(urls)
}

/// Pulls date, title, body and PDF link out of a rendered article page.
pub fn extract_article(html: &str, page_url: &str, config: &ScraperConfig) -> Result<ArticleFields, ScrapeError> {
    let document = Html::parse_document(html);
    let selectors = &config.selectors;

    let text_of = |classes: &str| -> Result<String, ScrapeError> {
        let css = class_selector(classes);
        let selector = parse_selector(&css)?;
        document
            .select(&selector)
            .next()
            .map(element_text)
            .ok_or(ScrapeError::ElementNotFound {
                selector: css,
                url: page_url.to_string(),
            })
    };

    let date = text_of(&selectors.date_class)?;
    let title = text_of(&selectors.title_class)?;
    let body = text_of(&selectors.text_class)?;

    let pdf_css = class_selector(&selectors.pdf_button_class);
    let pdf_selector = parse_selector(&pdf_css)?;
    let href = document
        .select(&pdf_selector)
        .find_map(|button| button.value().attr("href"))
        .ok_or_else(|| ScrapeError::ElementNotFound {
            selector: pdf_css.clone(),
            url: page_url.to_string(),
        })?;
    let pdf_url = Url::parse(page_url)?.join(href)?.to_string();

    Ok(ArticleFields {
        date,
        title,
        body,
        pdf_url,
    })
}

fn browser_error(error: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Browser(error.to_string())
}

fn launch_browser(options: &BrowserOptions) -> Result<Browser, ScrapeError> {
    let args: Vec<&OsStr> = ["--disable-dev-shm-usage", "--disable-gpu", "--disable-extensions"]
        .iter()
        .map(|arg| OsStr::new(*arg))
        .collect();
    let launch_options = LaunchOptions {
        headless: options.headless,
        sandbox: false,
        window_size: Some(options.window_size),
        args,
        ..Default::default()
    };

    Browser::new(launch_options).map_err(browser_error)
}

fn open_tab(browser: &Browser, url: &str, options: &BrowserOptions) -> Result<Arc<Tab>, ScrapeError> {
    let tab = browser.new_tab().map_err(browser_error)?;
    tab.set_default_timeout(options.navigation_timeout);
    tab.navigate_to(url).map_err(browser_error)?;
    Ok(tab)
}

/// The browser as seen by the per-article loop.
trait ArticleSession {
    type Tab;

    /// Fails with [`ScrapeError::SessionLost`] once the browser is gone.
    fn ensure_session(&self) -> Result<(), ScrapeError>;

    fn scrape_tab(&self, tab: &Self::Tab) -> Result<ExtractionRecord, ScrapeError>;

    fn tab_url(&self, tab: &Self::Tab) -> String;

    fn close_tab(&self, tab: &Self::Tab);
}

struct ChromeSession<'a> {
    browser: &'a Browser,
    config: &'a ScraperConfig,
    client: &'a Client,
    runtime: &'a Handle,
}

impl ArticleSession for ChromeSession<'_> {
    type Tab = Arc<Tab>;

    fn ensure_session(&self) -> Result<(), ScrapeError> {
        self.browser
            .get_version()
            .map(|_| ())
            .map_err(|error| ScrapeError::SessionLost(error.to_string()))
    }

    fn scrape_tab(&self, tab: &Arc<Tab>) -> Result<ExtractionRecord, ScrapeError> {
        tab.wait_until_navigated().map_err(browser_error)?;
        let html = tab.get_content().map_err(browser_error)?;
        let url = tab.get_url();

        let article = extract_article(&html, &url, self.config)?;
        debug!(%url, body_chars = article.body.len(), "article extracted");

        let stem = sanitize_filename(&article.title);
        let path = self
            .runtime
            .block_on(download_pdf(self.client, &article.pdf_url, &self.config.data_dir, &stem))?;

        Ok(ExtractionRecord {
            url,
            title: article.title,
            authors: vec![self.config.curator.clone()],
            date: Some(article.date),
            local_pdf_path: path.to_string_lossy().to_string(),
        })
    }

    fn tab_url(&self, tab: &Arc<Tab>) -> String {
        tab.get_url()
    }

    fn close_tab(&self, tab: &Arc<Tab>) {
        if let Err(error) = tab.close(true) {
            debug!(%error, "closing article tab failed");
        }
    }
}

/// Scrapes the open tabs in order, closing each one afterwards.
///
/// Articles whose markup does not match are skipped. A dead browser session
/// ends the loop and keeps what was collected so far.
fn scrape_open_tabs<S: ArticleSession>(session: &S, tabs: Vec<S::Tab>) -> Vec<ExtractionRecord> {
    let mut records = Vec::with_capacity(tabs.len());
    for tab in tabs {
        let outcome = session.ensure_session().and_then(|()| session.scrape_tab(&tab));
        match outcome {
            Ok(record) => records.push(record),
            Err(ScrapeError::SessionLost(reason)) => {
                error!(%reason, scraped = records.len(), "browser session lost, stopping series scrape");
                break;
            }
            Err(error) => warn!(url = %session.tab_url(&tab), %error, "skipping article"),
        }

        session.close_tab(&tab);
    }
    records
}

/// Opens every article of the series in its own tab and scrapes them one by one.
///
/// Must run off the async runtime; `runtime` drives the PDF downloads.
pub fn scrape_series(
    series_url: &str,
    config: &ScraperConfig,
    client: &Client,
    runtime: &Handle,
) -> Result<Vec<ExtractionRecord>, ScrapeError> {
    let browser = launch_browser(&config.browser)?;

    let index = open_tab(&browser, series_url, &config.browser)?;
    index.wait_until_navigated().map_err(browser_error)?;
    let html = index.get_content().map_err(browser_error)?;
    let article_urls = collect_article_links(&html, &Url::parse(series_url)?, &config.selectors.article_links)?;
    info!(url = series_url, articles = article_urls.len(), "series index loaded");

    let mut tabs = Vec::with_capacity(article_urls.len());
    for url in &article_urls {
        match open_tab(&browser, url, &config.browser) {
            Ok(tab) => tabs.push(tab),
            Err(error) => warn!(%url, %error, "could not open article tab"),
        }
    }
    if let Err(error) = index.close(true) {
        debug!(%error, "closing series index tab failed");
    }

    let session = ChromeSession {
        browser: &browser,
        config,
        client,
        runtime,
    };
    let records = scrape_open_tabs(&session, tabs);

    info!(url = series_url, records = records.len(), "series scraped");
    Ok(records)
}
