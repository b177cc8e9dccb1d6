//! Extraction adapter traits.
//!
//! A `SiteAdapter` is registered per target. Opening it acquires an
//! execution context (HTTP client bound to an optional egress identity);
//! that step is the only place a failure is fatal before any page is
//! fetched. The resulting `SiteSession` yields one `PageOutcome` per page,
//! lazily and in increasing page order, and must stop after the query's
//! page budget or when the site has no further results.
//!
//! Adapters own deduplication: a `(name, address)` pair is emitted at most
//! once per session.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::error::ExtractionResult;
use crate::types::{
    config::EngineConfig, identity::EgressIdentity, record::ProviderRecord,
    session::SearchQuery, target::Target,
};

/// Lazy page sequence. Finite and not restartable.
///
/// An `Err` item is fatal and ends the session; page-level problems are
/// `PageOutcome::Failed` values.
pub type PageStream<'a> =
    Pin<Box<dyn Stream<Item = ExtractionResult<PageOutcome>> + Send + 'a>>;

/// Result of fetching one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// Page loaded and parsed. `records` may be empty when every card on
    /// the page was a duplicate.
    Scraped {
        page_number: u32,
        url: String,
        records: Vec<ProviderRecord>,
    },

    /// Page could not be loaded or parsed. Extraction continues.
    Failed {
        page_number: u32,
        url: String,
        error: String,
    },
}

impl PageOutcome {
    pub fn page_number(&self) -> u32 {
        match self {
            PageOutcome::Scraped { page_number, .. } | PageOutcome::Failed { page_number, .. } => {
                *page_number
            }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            PageOutcome::Scraped { url, .. } | PageOutcome::Failed { url, .. } => url,
        }
    }
}

/// Settings for building an execution context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub user_agent: String,

    /// Per-request timeout. Exceeding it is a page failure.
    pub request_timeout: Duration,
}

impl ContextOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
        }
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Per-target factory for extraction sessions.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// The target this adapter scrapes.
    fn target(&self) -> Target;

    /// Acquire an execution context, optionally routed through `egress`.
    ///
    /// Errors here are fatal: the session goes from `pending` straight
    /// to `failed`.
    async fn open(
        &self,
        egress: Option<&EgressIdentity>,
        options: &ContextOptions,
    ) -> ExtractionResult<Box<dyn SiteSession>>;
}

/// An open execution context for one session.
#[async_trait]
pub trait SiteSession: Send {
    /// Run the query. Stops after `query.page_budget()` pages or when no
    /// further results exist, whichever comes first.
    fn search<'a>(&'a mut self, query: &'a SearchQuery) -> PageStream<'a>;

    /// Tear down the context. Called on every exit path.
    async fn close(self: Box<Self>);
}
