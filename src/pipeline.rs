// 🚰 Ingestion Pipeline - sources → tokens → records → merged ledger
// One run per game: primary sources first, fallbacks only when primaries yield nothing

use crate::collector::browser::BrowserSession;
use crate::collector::PaginatedCollector;
use crate::config::{AppConfig, GameConfig, SourceConfig, SourceKind, SourceSettings};
use crate::diagnostics::Diagnostics;
use crate::error::{IngestError, Result};
use crate::game::GameSpec;
use crate::html::{check_pending, HtmlSelectors, ListingParser};
use crate::http::{HttpTransport, Transport, DEFAULT_USER_AGENT};
use crate::ledger::{Ledger, WriteOutcome};
use crate::merge::{MergeCounts, MergeEngine};
use crate::pdf;
use crate::record::{SourceRole, SourcedRecord};
use crate::token::{RawItem, Token, TokenClassifier};
use crate::tuner::{assemble_document, DocumentOutcome, TunerParams};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Full fetch, ledger rebuilt from scratch
    Seed,
    /// Fetch, merge into the existing ledger
    Update,
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub name: String,
    pub role: SourceRole,
    pub pages: usize,
    pub rows: usize,
    pub skips: BTreeMap<String, usize>,
    pub strategy: Option<&'static str>,
    pub error: Option<String>,
    pub dump: Option<PathBuf>,
}

impl SourceReport {
    fn new(source: &SourceConfig) -> Self {
        SourceReport {
            name: source.name.clone(),
            role: source.role,
            pages: 0,
            rows: 0,
            skips: BTreeMap::new(),
            strategy: None,
            error: None,
            dump: None,
        }
    }

    pub fn skip_total(&self) -> usize {
        self.skips.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub game: String,
    pub mode: RunMode,
    pub sources: Vec<SourceReport>,
    pub merge: MergeCounts,
    pub write: WriteOutcome,
    pub ledger: PathBuf,
    pub ledger_rows: usize,
}

/// Records pulled from one source plus its report
struct SourceHarvest {
    report: SourceReport,
    records: Vec<SourcedRecord>,
}

/// Offline extraction of a local document
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub tokens: Vec<Token>,
    pub outcome: DocumentOutcome,
}

// ============================================================================
// EXTRACTION
// ============================================================================

fn classify_and_assemble(
    game: &GameSpec,
    items: &[RawItem],
    drop_patterns: &[String],
    params: &TunerParams,
    verbose: bool,
) -> Result<(Vec<Token>, DocumentOutcome)> {
    let classifier = TokenClassifier::new(game)?.with_drop_patterns(drop_patterns.iter().cloned());
    let tokens = classifier.classify_all(items, verbose);
    let outcome = assemble_document(&tokens, game, params);
    Ok((tokens, outcome))
}

/// Parse a local PDF or HTML file without touching the network or the ledger
pub fn parse_local(
    game: &GameSpec,
    tuner: &TunerParams,
    path: &Path,
    kind: SourceKind,
    selectors: &HtmlSelectors,
    pane_count: Option<usize>,
) -> Result<ParsedDocument> {
    let items = match kind {
        SourceKind::Pdf => pdf::extract_file(path)?,
        SourceKind::Html => {
            let html = std::fs::read_to_string(path)?;
            ListingParser::new(game, selectors)?.extract_items(&html, 0)
        }
    };
    let panes = pane_count.unwrap_or(match kind {
        SourceKind::Pdf => 3,
        SourceKind::Html => 1,
    });
    let params = tuner.with_pane_count(panes);
    let (tokens, outcome) = classify_and_assemble(game, &items, &[], &params, true)?;
    Ok(ParsedDocument { tokens, outcome })
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: AppConfig,
    base: Option<HttpTransport>,
    transport: Option<Arc<dyn Transport>>,
    settings: Option<SourceSettings>,
    merger: MergeEngine,
}

impl Pipeline {
    /// Pipeline talking to the network through a shared reqwest pool
    pub fn new(config: AppConfig) -> Result<Self> {
        let base = HttpTransport::new(DEFAULT_USER_AGENT, SourceSettings::default().timeout())?;
        Ok(Pipeline {
            config,
            base: Some(base),
            transport: None,
            settings: None,
            merger: MergeEngine::new(),
        })
    }

    /// Pipeline over a caller-supplied transport (offline runs, tests)
    pub fn with_transport(config: AppConfig, transport: Arc<dyn Transport>) -> Self {
        Pipeline {
            config,
            base: None,
            transport: Some(transport),
            settings: None,
            merger: MergeEngine::new(),
        }
    }

    /// Builder pattern: same settings for every source instead of `<PREFIX>_*` variables
    pub fn with_settings(mut self, settings: SourceSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn settings_for(&self, source: &SourceConfig) -> SourceSettings {
        self.settings
            .clone()
            .unwrap_or_else(|| SourceSettings::load(&source.env_prefix()))
    }

    fn transport_for(&self, settings: &SourceSettings) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }
        match &self.base {
            Some(base) if settings.user_agent == DEFAULT_USER_AGENT => {
                Ok(Arc::new(base.with_timeout(settings.timeout())))
            }
            _ => Ok(Arc::new(HttpTransport::new(
                &settings.user_agent,
                settings.timeout(),
            )?)),
        }
    }

    /// Run one game end to end
    pub async fn run(&self, game_name: &str, mode: RunMode) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, game = game_name, ?mode);
        self.run_inner(run_id, game_name, mode).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, game_name: &str, mode: RunMode) -> Result<RunSummary> {
        let game_config = self.config.game(game_name)?;
        let game = game_config.spec();
        let diagnostics = Diagnostics::new(&self.config.diagnostics_dir, run_id);
        info!(
            primary = game_config.primary_sources().count(),
            fallback = game_config.fallback_sources().count(),
            "run started"
        );

        let settings: Vec<(SourceConfig, SourceSettings)> = game_config
            .sources
            .iter()
            .map(|s| (s.clone(), self.settings_for(s)))
            .collect();
        let browser = settings
            .iter()
            .any(|(_, s)| s.browser)
            .then(|| Arc::new(BrowserSession::new()));

        let result = self
            .harvest_game(&game, game_config, &settings, browser.clone(), &diagnostics)
            .await;
        if let Some(session) = &browser {
            session.close();
        }
        let harvests = result?;

        let incoming: Vec<SourcedRecord> = harvests.iter().flat_map(|h| h.records.clone()).collect();
        let reports: Vec<SourceReport> = harvests.into_iter().map(|h| h.report).collect();

        if incoming.is_empty() {
            warn!(game = %game.name, "zero rows from every source, ledger untouched");
            return Err(IngestError::NoRows {
                game: game.name.clone(),
            });
        }

        let ledger = Ledger::new(&game, self.config.ledger_path(&game));
        let existing = match mode {
            RunMode::Seed => Vec::new(),
            RunMode::Update => ledger.read()?,
        };

        let merged = self.merger.merge(&existing, &incoming);
        let write = match mode {
            RunMode::Seed => ledger.write_atomic(&merged.records)?,
            RunMode::Update if !merged.counts.changed() => WriteOutcome::Unchanged,
            RunMode::Update if merged.append_only && ledger.exists() => ledger.append(&merged.new_records)?,
            RunMode::Update => ledger.write_atomic(&merged.records)?,
        };

        info!(
            added = merged.counts.added,
            replaced = merged.counts.replaced,
            dropped_stale = merged.counts.dropped_stale,
            rows = merged.records.len(),
            "run complete"
        );

        Ok(RunSummary {
            run_id,
            game: game.name.clone(),
            mode,
            sources: reports,
            merge: merged.counts,
            write,
            ledger: ledger.path().to_path_buf(),
            ledger_rows: merged.records.len(),
        })
    }

    /// Primaries first; fallbacks only when the primaries produced no rows
    async fn harvest_game(
        &self,
        game: &GameSpec,
        game_config: &GameConfig,
        settings: &[(SourceConfig, SourceSettings)],
        browser: Option<Arc<BrowserSession>>,
        diagnostics: &Diagnostics,
    ) -> Result<Vec<SourceHarvest>> {
        let of_role = |role: SourceRole| {
            settings
                .iter()
                .filter(|(s, _)| s.role == role)
                .collect::<Vec<_>>()
        };

        let mut harvests = self
            .harvest_sources(game, &of_role(SourceRole::Primary), browser.clone(), diagnostics)
            .await?;

        let primary_rows: usize = harvests.iter().map(|h| h.records.len()).sum();
        if primary_rows == 0 {
            let fallbacks = of_role(SourceRole::Fallback);
            if !fallbacks.is_empty() {
                info!(game = %game_config.name, count = fallbacks.len(), "primary sources empty, trying fallbacks");
                harvests.extend(self.harvest_sources(game, &fallbacks, browser, diagnostics).await?);
            }
        }
        Ok(harvests)
    }

    /// Concurrent when no source drives a browser, one at a time otherwise
    async fn harvest_sources(
        &self,
        game: &GameSpec,
        sources: &[&(SourceConfig, SourceSettings)],
        browser: Option<Arc<BrowserSession>>,
        diagnostics: &Diagnostics,
    ) -> Result<Vec<SourceHarvest>> {
        let outcomes = if browser.is_none() {
            join_all(
                sources
                    .iter()
                    .map(|(source, settings)| self.harvest_source(game, source, settings, None, diagnostics)),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(sources.len());
            for (source, settings) in sources {
                let session = settings.browser.then(|| browser.clone()).flatten();
                outcomes.push(
                    self.harvest_source(game, source, settings, session, diagnostics)
                        .await,
                );
            }
            outcomes
        };
        outcomes.into_iter().collect()
    }

    #[instrument(skip_all, fields(source = %source.name))]
    async fn harvest_source(
        &self,
        game: &GameSpec,
        source: &SourceConfig,
        settings: &SourceSettings,
        browser: Option<Arc<BrowserSession>>,
        diagnostics: &Diagnostics,
    ) -> Result<SourceHarvest> {
        let mut report = SourceReport::new(source);

        match self.extract(game, source, settings, browser, &mut report).await {
            Ok(items) => {
                let params = self
                    .config
                    .tuner
                    .clone()
                    .with_pane_count(source.effective_pane_count());
                let (tokens, outcome) =
                    classify_and_assemble(game, &items, &source.drop_patterns, &params, settings.verbose)?;

                let combined = outcome.combined_report();
                report.pages = outcome.pages.len();
                report.rows = combined.rows();
                report.skips = combined
                    .skips_by_reason()
                    .into_iter()
                    .map(|(reason, n)| (reason.to_string(), n))
                    .collect();

                if settings.verbose {
                    if let Err(e) = diagnostics.trace(&game.name, &source.name, &tokens, &combined.skips) {
                        warn!(error = %e, "could not write token trace");
                    }
                }
                if report.rows == 0 {
                    warn!(pages = report.pages, tokens = tokens.len(), "source yielded zero rows");
                    match diagnostics.dump_tokens(&game.name, &source.name, &tokens) {
                        Ok(path) => report.dump = Some(path),
                        Err(e) => warn!(error = %e, "could not write token dump"),
                    }
                }

                info!(pages = report.pages, rows = report.rows, skips = report.skip_total(), "source assembled");
                let records = combined
                    .records
                    .into_iter()
                    .map(|r| SourcedRecord::new(r, source.role, &source.name))
                    .collect();
                Ok(SourceHarvest { report, records })
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "source failed");
                report.error = Some(e.to_string());
                Ok(SourceHarvest {
                    report,
                    records: Vec::new(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch one source and turn it into positioned items
    async fn extract(
        &self,
        game: &GameSpec,
        source: &SourceConfig,
        settings: &SourceSettings,
        browser: Option<Arc<BrowserSession>>,
        report: &mut SourceReport,
    ) -> Result<Vec<RawItem>> {
        let transport = self.transport_for(settings)?;
        let response = transport.get(&source.url, &[]).await?;

        match source.kind {
            SourceKind::Pdf => {
                if !response.is_pdf() {
                    check_pending(&response.text(), &source.name)?;
                    return Err(IngestError::Pdf(format!(
                        "{} did not return a PDF ({})",
                        source.url,
                        response.content_type.as_deref().unwrap_or("no content type")
                    )));
                }
                tokio::task::spawn_blocking(move || pdf::extract_items(&response.body))
                    .await
                    .map_err(|e| IngestError::Pdf(format!("extraction task: {}", e)))?
            }
            SourceKind::Html => {
                let first_page = response.text();
                let parser = ListingParser::new(game, &source.selectors)?;
                // A pending notice only counts when the page lists no draws
                if parser.row_keys(&first_page).is_empty() {
                    check_pending(&first_page, &source.name)?;
                }

                let collector = PaginatedCollector::new(transport, browser);
                let collection = collector
                    .collect(&source.name, &response.url, &first_page, &parser, settings)
                    .await?;
                report.strategy = collection.strategy;

                Ok(collection
                    .fragments
                    .iter()
                    .enumerate()
                    .flat_map(|(page, html)| parser.extract_items(html, page))
                    .collect())
            }
        }
    }
}
