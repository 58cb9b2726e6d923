// 🖥️ Browser Automation - click "load more" in a real headless browser
// One browser process per run, created on first use and torn down by its owning session

use super::{CollectRequest, PageStrategy, StrategyOutcome};
use crate::error::{IngestError, Result};
use crate::html::find_live_config;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn browser_error(context: &str, e: impl std::fmt::Display) -> IngestError {
    IngestError::Browser(format!("{}: {}", context, e))
}

// ============================================================================
// SESSION
// ============================================================================

/// Scoped owner of the browser process. Launches lazily; closing (or dropping) kills it.
#[derive(Default)]
pub struct BrowserSession {
    browser: Mutex<Option<Arc<Browser>>>,
}

impl BrowserSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared browser, launching it on first call. Blocking.
    pub fn handle(&self) -> Result<Arc<Browser>> {
        let mut slot = self
            .browser
            .lock()
            .map_err(|_| IngestError::Browser("browser session lock poisoned".to_string()))?;

        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }

        let options = LaunchOptions::default_builder()
            .headless(true)
            .idle_browser_timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| browser_error("launch options", e))?;
        let browser = Arc::new(Browser::new(options).map_err(|e| browser_error("launch", e))?);
        info!("headless browser launched");

        *slot = Some(browser.clone());
        Ok(browser)
    }

    pub fn is_launched(&self) -> bool {
        self.browser.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub fn close(&self) {
        if let Ok(mut slot) = self.browser.lock() {
            if slot.take().is_some() {
                info!("headless browser closed");
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// DOM PROBES
// ============================================================================

/// Growth signals after a click: row count, document height and
/// completed XHR/fetch responses whose URL matches the paging endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomSnapshot {
    pub rows: u64,
    pub height: u64,
    pub responses: u64,
}

impl DomSnapshot {
    pub fn grew_from(&self, before: &DomSnapshot) -> bool {
        self.rows > before.rows || self.height > before.height || self.responses > before.responses
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Count finished fetch/XHR responses whose URL contains `url_match` (empty matches all)
pub fn response_counter_script(url_match: &str) -> String {
    format!(
        "(function() {{ if (window.__drawResponses !== undefined) return true; \
         window.__drawResponses = 0; const m = {}; \
         const hit = (u) => {{ if (!m || String(u).indexOf(m) !== -1) window.__drawResponses++; }}; \
         if (window.fetch) {{ const f = window.fetch; window.fetch = function() {{ \
           return f.apply(this, arguments).then((r) => {{ hit(r.url); return r; }}); }}; }} \
         const open = XMLHttpRequest.prototype.open; \
         XMLHttpRequest.prototype.open = function(method, url) {{ \
           this.addEventListener('loadend', () => hit(this.responseURL || url)); \
           return open.apply(this, arguments); }}; \
         return true; }})()",
        js_string(url_match)
    )
}

pub fn measure_script(row_selector: &str) -> String {
    format!(
        "JSON.stringify([document.querySelectorAll({}).length, \
         document.body ? document.body.scrollHeight : 0, window.__drawResponses || 0])",
        js_string(row_selector)
    )
}

pub fn click_script(load_more_selector: &str) -> String {
    format!(
        "(function() {{ const el = document.querySelector({}); \
         if (!el || el.disabled || el.hidden || el.getAttribute('aria-disabled') === 'true') return false; \
         el.scrollIntoView(); el.click(); return true; }})()",
        js_string(load_more_selector)
    )
}

/// Parse the measure script's `[rows, height, responses]` JSON
pub fn parse_snapshot(raw: &str) -> Option<DomSnapshot> {
    let values: Vec<f64> = serde_json::from_str(raw).ok()?;
    match values.as_slice() {
        [rows, height] => Some(DomSnapshot {
            rows: *rows as u64,
            height: *height as u64,
            responses: 0,
        }),
        [rows, height, responses] => Some(DomSnapshot {
            rows: *rows as u64,
            height: *height as u64,
            responses: *responses as u64,
        }),
        _ => None,
    }
}

fn measure(tab: &Tab, row_selector: &str) -> Result<DomSnapshot> {
    let remote = tab
        .evaluate(&measure_script(row_selector), false)
        .map_err(|e| browser_error("measure", e))?;
    let snapshot = remote
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(parse_snapshot)
        .unwrap_or_default();
    Ok(snapshot)
}

fn click_load_more(tab: &Tab, selector: &str) -> Result<bool> {
    let remote = tab
        .evaluate(&click_script(selector), false)
        .map_err(|e| browser_error("click", e))?;
    Ok(remote.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

// ============================================================================
// STRATEGY
// ============================================================================

/// Owned inputs of one blocking browser run
#[derive(Debug, Clone)]
struct BrowserJob {
    source: String,
    url: String,
    row_selector: String,
    load_more_selector: String,
    /// Endpoint advertised by the page; empty when none was found
    response_match: String,
    max_clicks: usize,
    click_wait: Duration,
    timeout: Duration,
}

fn load_all(browser: &Browser, job: &BrowserJob) -> Result<String> {
    let tab = browser.new_tab().map_err(|e| browser_error("new tab", e))?;
    let result = drive(&tab, job);
    if let Err(e) = tab.close(true) {
        debug!(source = %job.source, error = %e, "tab close failed");
    }
    result
}

fn drive(tab: &Tab, job: &BrowserJob) -> Result<String> {
    tab.set_default_timeout(job.timeout);
    tab.navigate_to(&job.url)
        .map_err(|e| browser_error("navigate", e))?;
    tab.wait_until_navigated()
        .map_err(|e| browser_error("page load", e))?;
    tab.evaluate(&response_counter_script(&job.response_match), false)
        .map_err(|e| browser_error("install response counter", e))?;

    let mut snapshot = measure(&tab, &job.row_selector)?;
    debug!(source = %job.source, rows = snapshot.rows, "initial DOM");

    for click in 1..=job.max_clicks {
        if !click_load_more(&tab, &job.load_more_selector)? {
            debug!(source = %job.source, click, "load-more gone");
            break;
        }

        let deadline = Instant::now() + job.click_wait;
        let mut grown = false;
        while Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
            let now = measure(&tab, &job.row_selector)?;
            if now.grew_from(&snapshot) {
                snapshot = now;
                grown = true;
                break;
            }
        }
        if !grown {
            debug!(source = %job.source, click, "no growth after click, stopping");
            break;
        }
    }

    tab.get_content()
        .map_err(|e| browser_error("read content", e))
}

pub struct BrowserAutomation {
    session: Arc<BrowserSession>,
}

impl BrowserAutomation {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        BrowserAutomation { session }
    }
}

#[async_trait]
impl PageStrategy for BrowserAutomation {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn collect(&self, request: &CollectRequest<'_>) -> Result<StrategyOutcome> {
        let job = BrowserJob {
            source: request.source.to_string(),
            url: request.url.to_string(),
            row_selector: request.parser.row_selector().to_string(),
            load_more_selector: request.parser.load_more_selector().to_string(),
            response_match: find_live_config(request.first_page)
                .map(|c| c.endpoint)
                .unwrap_or_default(),
            max_clicks: request.settings.max_clicks,
            click_wait: request.settings.click_wait(),
            timeout: request.settings.timeout(),
        };
        let session = self.session.clone();

        let html = tokio::task::spawn_blocking(move || {
            let browser = session.handle()?;
            load_all(&browser, &job)
        })
        .await
        .map_err(|e| browser_error("browser task", e))??;

        let mut tracker = request.seen.clone();
        let added = tracker.absorb(request.parser.row_keys(&html));
        let fragments = if added > 0 { vec![html] } else { Vec::new() };
        Ok(StrategyOutcome {
            fragments,
            new_rows: added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_is_lazy() {
        let session = BrowserSession::new();
        assert!(!session.is_launched());
        session.close();
        assert!(!session.is_launched());
    }

    #[test]
    fn test_growth_by_rows_or_height() {
        let before = DomSnapshot { rows: 10, height: 900, responses: 1 };
        assert!(DomSnapshot { rows: 12, ..before }.grew_from(&before));
        assert!(DomSnapshot { height: 1400, ..before }.grew_from(&before));
        assert!(!before.grew_from(&before));
    }

    #[test]
    fn test_matching_response_counts_as_growth() {
        let before = DomSnapshot { rows: 10, height: 900, responses: 1 };
        assert!(DomSnapshot { responses: 2, ..before }.grew_from(&before));
    }

    #[test]
    fn test_snapshot_parsing() {
        assert_eq!(
            parse_snapshot("[25, 3120]"),
            Some(DomSnapshot { rows: 25, height: 3120, responses: 0 })
        );
        assert_eq!(
            parse_snapshot("[25, 3120, 2]"),
            Some(DomSnapshot { rows: 25, height: 3120, responses: 2 })
        );
        assert_eq!(parse_snapshot("[1]"), None);
        assert_eq!(parse_snapshot("oops"), None);
    }

    #[test]
    fn test_scripts_quote_selectors() {
        let script = measure_script(r#"tr[data-kind="draw"]"#);
        assert!(script.contains(r#"querySelectorAll("tr[data-kind=\"draw\"]")"#));
        assert!(click_script("button.load-more").contains(r#"querySelector("button.load-more")"#));
        assert!(response_counter_script("/draws/more").contains(r#"const m = "/draws/more";"#));
        assert!(measure_script("tr").contains("__drawResponses"));
    }
}
