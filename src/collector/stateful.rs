// 🔂 Stateful Replay - POST the component's opaque state back, page after page
// The state blob each response returns is echoed on the next request

use super::{log_stall, resolve_endpoint, CollectRequest, PageStrategy, StrategyOutcome};
use crate::error::{IngestError, Result};
use crate::html::{find_live_config, find_properties, unwrap_response, Fragment};
use crate::http::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Form keys components commonly expect the state under, tried in order
pub const PROPERTY_KEYS: &[&str] = &["properties", "props", "state", "componentProperties"];

pub struct StatefulReplay {
    transport: Arc<dyn Transport>,
}

impl StatefulReplay {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        StatefulReplay { transport }
    }

    async fn post(&self, endpoint: &str, key: &str, properties: &str) -> Result<Fragment> {
        let form = vec![
            (key.to_string(), properties.to_string()),
            ("action".to_string(), "loadMore".to_string()),
        ];
        let response = self.transport.post_form(endpoint, &form).await?;
        Ok(unwrap_response(&response.text()))
    }

    /// First request: find the key under which the endpoint accepts the state
    async fn negotiate(
        &self,
        request: &CollectRequest<'_>,
        endpoint: &str,
        properties: &str,
    ) -> Result<Option<(&'static str, Fragment)>> {
        let mut last_error = None;
        for key in PROPERTY_KEYS.iter().copied() {
            match self.post(endpoint, key, properties).await {
                Ok(fragment) if !request.parser.row_keys(&fragment.html).is_empty() => {
                    debug!(source = request.source, key, "state key accepted");
                    return Ok(Some((key, fragment)));
                }
                Ok(_) => debug!(source = request.source, key, "no parseable fragment"),
                Err(e) if e.is_recoverable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PageStrategy for StatefulReplay {
    fn name(&self) -> &'static str {
        "stateful-replay"
    }

    async fn collect(&self, request: &CollectRequest<'_>) -> Result<StrategyOutcome> {
        let mut outcome = StrategyOutcome::default();
        if !request.parser.has_load_more(request.first_page) {
            debug!(source = request.source, "no load-more affordance");
            return Ok(outcome);
        }

        let mut properties = find_properties(request.first_page)
            .ok_or_else(|| IngestError::NoLiveConfig(format!("{} (no state blob)", request.source)))?;

        let endpoint = match find_live_config(request.first_page) {
            Ok(config) => resolve_endpoint(request.source, request.url, &config.endpoint)?,
            Err(_) => resolve_endpoint(request.source, request.url, request.url)?,
        };

        let Some((key, mut fragment)) = self.negotiate(request, endpoint.as_str(), &properties).await? else {
            return Ok(outcome);
        };

        let mut tracker = request.seen.clone();
        for iteration in 1..=request.settings.max_pages.max(1) {
            let added = tracker.absorb(request.parser.row_keys(&fragment.html));
            if added == 0 {
                log_stall(self.name(), request.source, iteration);
                break;
            }
            outcome.new_rows += added;
            let more = request.parser.has_load_more(&fragment.html);
            let next_properties = fragment.properties.take();
            outcome.fragments.push(fragment.html);

            let Some(next) = next_properties.filter(|_| more) else {
                debug!(source = request.source, iteration, "load-more gone, stopping");
                break;
            };
            if iteration == request.settings.max_pages {
                break;
            }
            properties = next;

            fragment = match self.post(endpoint.as_str(), key, &properties).await {
                Ok(f) => f,
                Err(e) if e.is_recoverable() => {
                    warn!(source = request.source, iteration, error = %e, "stateful replay interrupted");
                    break;
                }
                Err(e) => return Err(e),
            };
        }

        Ok(outcome)
    }
}
