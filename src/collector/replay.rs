// 🔁 Direct Replay - GET the next-page endpoint advertised by the live component

use super::{log_stall, resolve_endpoint, CollectRequest, PageStrategy, StrategyOutcome};
use crate::error::Result;
use crate::html::{find_live_config, unwrap_response};
use crate::http::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DirectReplay {
    transport: Arc<dyn Transport>,
}

impl DirectReplay {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        DirectReplay { transport }
    }
}

#[async_trait]
impl PageStrategy for DirectReplay {
    fn name(&self) -> &'static str {
        "direct-replay"
    }

    async fn collect(&self, request: &CollectRequest<'_>) -> Result<StrategyOutcome> {
        let config = find_live_config(request.first_page)?;
        let endpoint = resolve_endpoint(request.source, request.url, &config.endpoint)?;
        debug!(source = request.source, endpoint = %endpoint, "replaying pages");

        let mut tracker = request.seen.clone();
        let mut outcome = StrategyOutcome::default();

        for page in 2..=request.settings.max_pages.max(2) {
            let response = match self
                .transport
                .get(endpoint.as_str(), &config.query_for_page(page))
                .await
            {
                Ok(r) => r,
                // Keep what earlier pages produced
                Err(e) if outcome.new_rows > 0 && e.is_recoverable() => {
                    warn!(source = request.source, page, error = %e, "replay interrupted");
                    break;
                }
                Err(e) => return Err(e),
            };

            let fragment = unwrap_response(&response.text());
            let added = tracker.absorb(request.parser.row_keys(&fragment.html));
            if added == 0 {
                log_stall(self.name(), request.source, page);
                break;
            }
            outcome.new_rows += added;
            outcome.fragments.push(fragment.html);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::{listing, ScriptedTransport};
    use crate::collector::RowTracker;
    use crate::config::SourceSettings;
    use crate::error::IngestError;
    use crate::game::GameSpec;
    use crate::html::{HtmlSelectors, ListingParser};

    const FIRST: &str = r#"<div data-live-config='{"endpoint":"/draws/more","params":{"game":"daily3"}}'>
        <table><tr><td>Jan 3, 2024</td><td>1 2 3</td></tr></table></div>"#;

    fn parser() -> ListingParser {
        ListingParser::new(&GameSpec::new("daily3", 3), &HtmlSelectors::default()).unwrap()
    }

    async fn run(transport: ScriptedTransport, settings: SourceSettings) -> (Result<StrategyOutcome>, Vec<String>) {
        let transport = Arc::new(transport);
        let strategy = DirectReplay::new(transport.clone());
        let parser = parser();
        let mut seen = RowTracker::new();
        seen.absorb(parser.row_keys(FIRST));
        let request = CollectRequest {
            source: "archive",
            url: "https://lotto.test/daily3/history",
            first_page: FIRST,
            parser: &parser,
            settings: &settings,
            seen: &seen,
        };
        let result = strategy.collect(&request).await;
        (result, transport.requests())
    }

    #[tokio::test]
    async fn test_pages_until_no_new_rows() {
        let page2 = listing(&[("Jan 2, 2024", "4 5 6")]);
        let page3 = listing(&[("Jan 1, 2024", "7 8 9")]);
        // page 4 repeats page 3 → no growth
        let transport = ScriptedTransport::new()
            .on_get(&page2)
            .on_get(&page3)
            .on_get(&page3);

        let (result, requests) = run(transport, SourceSettings::default()).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.new_rows, 2);
        assert_eq!(outcome.fragments, vec![page2, page3]);
        assert_eq!(
            requests,
            vec![
                "GET https://lotto.test/draws/more?game=daily3&page=2",
                "GET https://lotto.test/draws/more?game=daily3&page=3",
                "GET https://lotto.test/draws/more?game=daily3&page=4",
            ]
        );
    }

    #[tokio::test]
    async fn test_json_envelope_fragments() {
        let envelope = serde_json::json!({ "html": listing(&[("Jan 2, 2024", "4 5 6")]) }).to_string();
        let transport = ScriptedTransport::new().on_get(&envelope).on_get("{}");
        let (result, _) = run(transport, SourceSettings::default()).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.new_rows, 1);
        assert!(outcome.fragments[0].starts_with("<table>"));
    }

    #[tokio::test]
    async fn test_page_cap_bounds_requests() {
        let transport = ScriptedTransport::new()
            .on_get(&listing(&[("Jan 2, 2024", "4 5 6")]))
            .on_get(&listing(&[("Jan 1, 2024", "7 8 9")]));
        let settings = SourceSettings {
            max_pages: 2,
            ..SourceSettings::default()
        };
        let (result, requests) = run(transport, settings).await;
        assert_eq!(result.unwrap().new_rows, 1);
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_first_request_failure_is_an_error() {
        let transport = ScriptedTransport::new().on_get_error(IngestError::Timeout("page 2".into()));
        let (result, _) = run(transport, SourceSettings::default()).await;
        assert!(matches!(result, Err(IngestError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_later_failure_keeps_earlier_pages() {
        let transport = ScriptedTransport::new()
            .on_get(&listing(&[("Jan 2, 2024", "4 5 6")]))
            .on_get_error(IngestError::Timeout("page 3".into()));
        let (result, _) = run(transport, SourceSettings::default()).await;
        assert_eq!(result.unwrap().new_rows, 1);
    }

    #[tokio::test]
    async fn test_page_without_live_config() {
        let strategy = DirectReplay::new(Arc::new(ScriptedTransport::new()));
        let parser = parser();
        let seen = RowTracker::new();
        let settings = SourceSettings::default();
        let request = CollectRequest {
            source: "archive",
            url: "https://lotto.test/",
            first_page: "<p>static page</p>",
            parser: &parser,
            settings: &settings,
            seen: &seen,
        };
        let err = strategy.collect(&request).await.unwrap_err();
        assert!(matches!(err, IngestError::NoLiveConfig(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_recoverable() {
        let transport = Arc::new(ScriptedTransport::new());
        let strategy = DirectReplay::new(transport.clone());
        let parser = parser();
        let seen = RowTracker::new();
        let settings = SourceSettings::default();
        let request = CollectRequest {
            source: "archive",
            url: "https://lotto.test/",
            first_page: r#"<div data-live-config='{"endpoint":"http://[bad"}'></div>"#,
            parser: &parser,
            settings: &settings,
            seen: &seen,
        };
        let err = strategy.collect(&request).await.unwrap_err();
        assert!(matches!(err, IngestError::NoLiveConfig(_)));
        assert!(err.is_recoverable());
        assert!(transport.requests().is_empty());
    }
}
