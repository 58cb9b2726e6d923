// 📚 Paginated Collector - pull the historical pages behind a listing's first page
// Strategies run in a fixed order until one of them adds rows: direct GET replay,
// stateful POST replay, then (when enabled) a real browser clicking "load more"

pub mod browser;
pub mod replay;
pub mod stateful;

pub use browser::{BrowserAutomation, BrowserSession};
pub use replay::DirectReplay;
pub use stateful::StatefulReplay;

use crate::config::SourceSettings;
use crate::error::{IngestError, Result};
use crate::html::ListingParser;
use crate::http::Transport;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

// ============================================================================
// ROW TRACKING
// ============================================================================

/// Row fingerprints seen so far; growth is measured against it
#[derive(Debug, Clone, Default)]
pub struct RowTracker {
    seen: HashSet<String>,
}

impl RowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a page's row keys and return how many were new
    pub fn absorb(&mut self, keys: Vec<String>) -> usize {
        keys.into_iter().filter(|k| self.seen.insert(k.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ============================================================================
// STRATEGY TRAIT
// ============================================================================

/// Everything a strategy needs to page through one source
pub struct CollectRequest<'a> {
    pub source: &'a str,
    pub url: &'a str,
    pub first_page: &'a str,
    pub parser: &'a ListingParser,
    pub settings: &'a SourceSettings,
    /// Rows of the first page
    pub seen: &'a RowTracker,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOutcome {
    /// Fragments beyond the first page, in fetch order
    pub fragments: Vec<String>,
    pub new_rows: usize,
}

#[async_trait]
pub trait PageStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self, request: &CollectRequest<'_>) -> Result<StrategyOutcome>;
}

/// Resolve an endpoint advertised by the page against the page URL.
/// A malformed one only disqualifies the strategy, never the source.
pub(crate) fn resolve_endpoint(source: &str, page_url: &str, endpoint: &str) -> Result<Url> {
    Url::parse(page_url)
        .and_then(|base| base.join(endpoint))
        .map_err(|e| IngestError::NoLiveConfig(format!("{} (endpoint {:?}: {})", source, endpoint, e)))
}

/// Stop reason shared by the paging loops: a page that adds nothing ends collection
pub(crate) fn log_stall(strategy: &str, source: &str, page: usize) {
    debug!(strategy, source, page, "no new rows, stopping");
}

// ============================================================================
// COLLECTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    /// First page followed by every extra fragment
    pub fragments: Vec<String>,
    /// Strategy that produced the extra fragments, if any did
    pub strategy: Option<&'static str>,
    pub rows: usize,
}

pub struct PaginatedCollector {
    strategies: Vec<Box<dyn PageStrategy>>,
}

impl PaginatedCollector {
    /// The fixed strategy order; browser automation only when a session is supplied
    pub fn new(transport: Arc<dyn Transport>, browser: Option<Arc<BrowserSession>>) -> Self {
        let mut strategies: Vec<Box<dyn PageStrategy>> = vec![
            Box::new(DirectReplay::new(transport.clone())),
            Box::new(StatefulReplay::new(transport)),
        ];
        if let Some(session) = browser {
            strategies.push(Box::new(BrowserAutomation::new(session)));
        }
        PaginatedCollector { strategies }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn PageStrategy>>) -> Self {
        PaginatedCollector { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order; the first one that adds rows wins
    pub async fn collect(
        &self,
        source: &str,
        url: &str,
        first_page: &str,
        parser: &ListingParser,
        settings: &SourceSettings,
    ) -> Result<Collection> {
        let mut seen = RowTracker::new();
        let first_rows = seen.absorb(parser.row_keys(first_page));

        let request = CollectRequest {
            source,
            url,
            first_page,
            parser,
            settings,
            seen: &seen,
        };

        for strategy in &self.strategies {
            match strategy.collect(&request).await {
                Ok(outcome) if outcome.new_rows > 0 => {
                    info!(
                        source,
                        strategy = strategy.name(),
                        fragments = outcome.fragments.len(),
                        new_rows = outcome.new_rows,
                        "pagination collected"
                    );
                    let mut fragments = vec![first_page.to_string()];
                    fragments.extend(outcome.fragments);
                    return Ok(Collection {
                        fragments,
                        strategy: Some(strategy.name()),
                        rows: first_rows + outcome.new_rows,
                    });
                }
                Ok(_) => debug!(source, strategy = strategy.name(), "strategy added no rows"),
                Err(e) if e.is_recoverable() => {
                    warn!(source, strategy = strategy.name(), error = %e, "strategy failed, trying next")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Collection {
            fragments: vec![first_page.to_string()],
            strategy: None,
            rows: first_rows,
        })
    }
}
