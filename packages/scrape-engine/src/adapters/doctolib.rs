//! doctolib.de adapter.
//!
//! The first page is `/{specialty}/{city}`. Later pages follow the
//! "Next page" link, so the search ends when that link is missing or a
//! page has no result cards.

use async_stream::stream;
use async_trait::async_trait;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::dedup::ProviderDedup;
use super::http::HttpContext;
use super::pacing::RequestPacer;
use super::parse::{element_text, first_attr, first_text, resolve};
use crate::error::{ExtractionError, ExtractionResult};
use crate::traits::adapter::{ContextOptions, PageOutcome, PageStream, SiteAdapter, SiteSession};
use crate::types::{
    identity::EgressIdentity, record::ProviderRecord, session::SearchQuery, target::Target,
};

lazy_static! {
    static ref CARD: Selector = Selector::parse("div.searchResult-item").unwrap();
    static ref NAME: Selector = Selector::parse("span.doctor-name").unwrap();
    static ref SPECIALTY: Selector = Selector::parse("div.doctor-speciality").unwrap();
    static ref ADDRESS: Selector = Selector::parse("div.doctor-address").unwrap();
    static ref PROFILE_LINK: Selector = Selector::parse("a[href]").unwrap();
    static ref NEXT_PAGE: Selector = Selector::parse(r#"a[aria-label="Next page"]"#).unwrap();
}

/// One parsed search page.
#[derive(Debug, Default)]
pub struct ResultPage {
    pub records: Vec<ProviderRecord>,
    pub next_url: Option<String>,
}

/// Adapter for doctolib.de.
#[derive(Debug, Clone)]
pub struct DoctolibAdapter {
    base_url: String,
}

impl Default for DoctolibAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DoctolibAdapter {
    pub fn new() -> Self {
        Self {
            base_url: Target::Doctolib.base_url().to_string(),
        }
    }

    /// Point the adapter at another host (mirrors, fixtures).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SiteAdapter for DoctolibAdapter {
    fn target(&self) -> Target {
        Target::Doctolib
    }

    async fn open(
        &self,
        egress: Option<&EgressIdentity>,
        options: &ContextOptions,
    ) -> ExtractionResult<Box<dyn SiteSession>> {
        let http = HttpContext::build(egress, options)?;
        Ok(Box::new(DoctolibSession {
            http,
            base_url: self.base_url.clone(),
            dedup: ProviderDedup::new(),
        }))
    }
}

struct DoctolibSession {
    http: HttpContext,
    base_url: String,
    dedup: ProviderDedup,
}

impl DoctolibSession {
    fn first_page_url(&self, query: &SearchQuery) -> ExtractionResult<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ExtractionError::Fatal(format!("bad base url {}: {}", self.base_url, e)))?;
        let specialty = query.specialty.trim().to_lowercase();
        let city = query.city.trim().to_lowercase();
        url.path_segments_mut()
            .map_err(|_| ExtractionError::Fatal(format!("base url cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend([specialty.as_str(), city.as_str()]);
        Ok(url.to_string())
    }
}

#[async_trait]
impl SiteSession for DoctolibSession {
    fn search<'a>(&'a mut self, query: &'a SearchQuery) -> PageStream<'a> {
        Box::pin(stream! {
            let budget = query.page_budget();
            let mut pacer = RequestPacer::new(query.delay());

            let mut next = match self.first_page_url(query) {
                Ok(url) => Some(url),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut page_number = 0;
            while let Some(url) = next.take() {
                if page_number >= budget {
                    break;
                }
                page_number += 1;
                pacer.wait().await;

                let html = match self.http.fetch_html(&url).await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!(url = %url, page = page_number, error = %e, "Doctolib page failed");
                        yield Ok(PageOutcome::Failed { page_number, url, error: e.to_string() });
                        break;
                    }
                };

                let page = parse_results(&html, &url);
                if page.records.is_empty() {
                    debug!(page = page_number, "No more Doctolib results");
                    break;
                }

                let found = page.records.len();
                let records = self.dedup.filter(page.records);
                info!(page = page_number, found, kept = records.len(), "Scraped Doctolib page");
                next = page.next_url;
                yield Ok(PageOutcome::Scraped { page_number, url, records });
            }
        })
    }

    async fn close(self: Box<Self>) {
        debug!(providers = self.dedup.len(), "Closing Doctolib session");
    }
}

/// Parse result cards and the next-page link.
pub fn parse_results(html: &str, page_url: &str) -> ResultPage {
    let document = Html::parse_document(html);

    let records = document
        .select(&CARD)
        .map(|card| ProviderRecord {
            name: first_text(card, &NAME),
            specialty: first_text(card, &SPECIALTY),
            address: first_text(card, &ADDRESS),
            source_url: first_attr(card, &PROFILE_LINK, "href")
                .and_then(|href| resolve(page_url, &href))
                .or_else(|| Some(page_url.to_string())),
            raw_text: element_text(card),
            ..Default::default()
        })
        .collect();

    let next_url = document
        .select(&NEXT_PAGE)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve(page_url, href));

    ResultPage { records, next_url }
}
