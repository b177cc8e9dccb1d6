//! jameda.de adapter.
//!
//! Search pages are addressed by number:
//! `/aerzte/{specialty}/{city}/?page=N`. A page without result cards ends
//! the search.

use async_stream::stream;
use async_trait::async_trait;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::dedup::ProviderDedup;
use super::http::HttpContext;
use super::pacing::RequestPacer;
use super::parse::{element_text, first_attr, first_number, first_text, parse_rating, resolve};
use crate::error::{ExtractionError, ExtractionResult};
use crate::traits::adapter::{ContextOptions, PageOutcome, PageStream, SiteAdapter, SiteSession};
use crate::types::{
    identity::EgressIdentity, record::ProviderRecord, session::SearchQuery, target::Target,
};

lazy_static! {
    static ref CARD: Selector = Selector::parse("div.search-list-entry").unwrap();
    static ref NAME: Selector = Selector::parse("a.doc-name").unwrap();
    static ref SPECIALTY: Selector = Selector::parse("span.doc-specialization").unwrap();
    static ref ADDRESS: Selector = Selector::parse("div.practice-address").unwrap();
    static ref PHONE: Selector = Selector::parse(r#"a[href^="tel:"]"#).unwrap();
    static ref RATING: Selector = Selector::parse("div.rating-stars[data-rating]").unwrap();
    static ref REVIEWS: Selector = Selector::parse("span.rating-count").unwrap();
}

/// Adapter for jameda.de.
#[derive(Debug, Clone)]
pub struct JamedaAdapter {
    base_url: String,
}

impl Default for JamedaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl JamedaAdapter {
    pub fn new() -> Self {
        Self {
            base_url: Target::Jameda.base_url().to_string(),
        }
    }

    /// Point the adapter at another host (mirrors, fixtures).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SiteAdapter for JamedaAdapter {
    fn target(&self) -> Target {
        Target::Jameda
    }

    async fn open(
        &self,
        egress: Option<&EgressIdentity>,
        options: &ContextOptions,
    ) -> ExtractionResult<Box<dyn SiteSession>> {
        let http = HttpContext::build(egress, options)?;
        Ok(Box::new(JamedaSession {
            http,
            base_url: self.base_url.clone(),
            dedup: ProviderDedup::new(),
        }))
    }
}

struct JamedaSession {
    http: HttpContext,
    base_url: String,
    dedup: ProviderDedup,
}

impl JamedaSession {
    fn page_url(&self, query: &SearchQuery, page: u32) -> ExtractionResult<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ExtractionError::Fatal(format!("bad base url {}: {}", self.base_url, e)))?;
        let specialty = query.specialty.trim().to_lowercase();
        let city = query.city.trim().to_lowercase();
        url.path_segments_mut()
            .map_err(|_| ExtractionError::Fatal(format!("base url cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["aerzte", specialty.as_str(), city.as_str(), ""]);
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url.to_string())
    }
}

#[async_trait]
impl SiteSession for JamedaSession {
    fn search<'a>(&'a mut self, query: &'a SearchQuery) -> PageStream<'a> {
        Box::pin(stream! {
            let budget = query.page_budget();
            let mut pacer = RequestPacer::new(query.delay());

            for page_number in 1..=budget {
                let url = match self.page_url(query, page_number) {
                    Ok(url) => url,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                pacer.wait().await;

                let html = match self.http.fetch_html(&url).await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!(url = %url, page = page_number, error = %e, "Jameda page failed");
                        yield Ok(PageOutcome::Failed { page_number, url, error: e.to_string() });
                        continue;
                    }
                };

                let cards = parse_results(&html, &url);
                if cards.is_empty() {
                    debug!(page = page_number, "No more Jameda results");
                    break;
                }

                let found = cards.len();
                let records = self.dedup.filter(cards);
                info!(page = page_number, found, kept = records.len(), "Scraped Jameda page");
                yield Ok(PageOutcome::Scraped { page_number, url, records });
            }
        })
    }

    async fn close(self: Box<Self>) {
        debug!(providers = self.dedup.len(), "Closing Jameda session");
    }
}

/// Parse result cards from a search page.
pub fn parse_results(html: &str, page_url: &str) -> Vec<ProviderRecord> {
    let document = Html::parse_document(html);
    document
        .select(&CARD)
        .map(|card| {
            let name_link = card.select(&NAME).next();
            let phone = first_attr(card, &PHONE, "href")
                .and_then(|href| href.strip_prefix("tel:").map(|p| p.trim().to_string()))
                .filter(|p| !p.is_empty())
                .or_else(|| first_text(card, &PHONE));

            ProviderRecord {
                name: name_link.and_then(element_text),
                specialty: first_text(card, &SPECIALTY),
                address: first_text(card, &ADDRESS),
                phone,
                rating: first_attr(card, &RATING, "data-rating").and_then(|r| parse_rating(&r)),
                review_count: first_text(card, &REVIEWS).and_then(|t| first_number(&t)),
                source_url: name_link
                    .and_then(|a| a.value().attr("href"))
                    .and_then(|href| resolve(page_url, href))
                    .or_else(|| Some(page_url.to_string())),
                raw_text: element_text(card),
                ..Default::default()
            }
        })
        .collect()
}
