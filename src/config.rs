// ⚙️ Configuration - games, their sources, and per-source runtime settings
// Layers: built-in defaults → TOML file → DRAWLEDGER__* environment overrides

use crate::error::{IngestError, Result};
use crate::game::{DateOrder, GameSpec, Session, SessionCode};
use crate::html::HtmlSelectors;
use crate::http::DEFAULT_USER_AGENT;
use crate::record::SourceRole;
use crate::tuner::TunerParams;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// SOURCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub kind: SourceKind,

    #[serde(default)]
    pub role: SourceRole,

    /// Prefix of the `<PREFIX>_<SETTING>` environment variables; derived from the name if unset
    #[serde(default)]
    pub env_prefix: Option<String>,

    /// Side-by-side panes per page; PDFs default to 3, HTML listings to 1
    #[serde(default)]
    pub pane_count: Option<usize>,

    #[serde(default)]
    pub selectors: HtmlSelectors,

    /// Extra boilerplate phrases to drop during classification
    #[serde(default)]
    pub drop_patterns: Vec<String>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, kind: SourceKind) -> Self {
        SourceConfig {
            name: name.into(),
            url: url.into(),
            kind,
            role: SourceRole::Primary,
            env_prefix: None,
            pane_count: None,
            selectors: HtmlSelectors::default(),
            drop_patterns: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: SourceRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_pane_count(mut self, count: usize) -> Self {
        self.pane_count = Some(count);
        self
    }

    /// "state-pdf" → "STATE_PDF"
    pub fn env_prefix(&self) -> String {
        self.env_prefix.clone().unwrap_or_else(|| {
            self.name
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        })
    }

    pub fn effective_pane_count(&self) -> usize {
        self.pane_count.unwrap_or(match self.kind {
            SourceKind::Pdf => 3,
            SourceKind::Html => 1,
        })
    }
}

/// Runtime knobs read from `<PREFIX>_<SETTING>` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub timeout_secs: u64,
    pub max_pages: usize,
    pub max_clicks: usize,
    pub click_wait_ms: u64,
    pub browser: bool,
    pub verbose: bool,
    pub user_agent: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            timeout_secs: 30,
            max_pages: 50,
            max_clicks: 25,
            click_wait_ms: 1500,
            browser: false,
            verbose: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl SourceSettings {
    pub fn load(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary lookup; invalid values fall back to defaults
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SourceSettings::default();
        let get = |setting: &str| lookup(&format!("{}_{}", prefix, setting));

        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> T {
            match raw {
                Some(v) => v.trim().parse().unwrap_or_else(|_| {
                    warn!(key, value = %v, "invalid setting, using default");
                    default
                }),
                None => default,
            }
        }

        let flag = |setting: &str, default: bool| match get(setting) {
            Some(v) => parse_flag(&v).unwrap_or_else(|| {
                warn!(key = setting, value = %v, "invalid flag, using default");
                default
            }),
            None => default,
        };

        SourceSettings {
            timeout_secs: parsed("TIMEOUT_SECS", get("TIMEOUT_SECS"), defaults.timeout_secs),
            max_pages: parsed("MAX_PAGES", get("MAX_PAGES"), defaults.max_pages),
            max_clicks: parsed("MAX_CLICKS", get("MAX_CLICKS"), defaults.max_clicks),
            click_wait_ms: parsed("CLICK_WAIT_MS", get("CLICK_WAIT_MS"), defaults.click_wait_ms),
            browser: flag("BROWSER", defaults.browser),
            verbose: flag("VERBOSE", defaults.verbose),
            user_agent: get("USER_AGENT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn click_wait(&self) -> Duration {
        Duration::from_millis(self.click_wait_ms)
    }
}

// ============================================================================
// GAMES
// ============================================================================

fn default_number_width() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub name: String,
    pub arity: usize,

    #[serde(default = "default_number_width")]
    pub number_width: usize,

    #[serde(default)]
    pub sessions: Vec<SessionCode>,

    #[serde(default)]
    pub bonus_tag: Option<String>,

    #[serde(default)]
    pub date_order: DateOrder,

    #[serde(default)]
    pub ledger_file: Option<String>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl GameConfig {
    pub fn spec(&self) -> GameSpec {
        GameSpec {
            name: self.name.clone(),
            arity: self.arity,
            number_width: self.number_width,
            sessions: self.sessions.clone(),
            bonus_tag: self.bonus_tag.clone(),
            date_order: self.date_order,
            ledger_file: self.ledger_file.clone(),
        }
    }

    pub fn primary_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.role == SourceRole::Primary)
    }

    pub fn fallback_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.role == SourceRole::Fallback)
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the CSV ledgers
    pub data_dir: PathBuf,

    /// Directory for token dumps and traces
    pub diagnostics_dir: PathBuf,

    #[serde(default)]
    pub tuner: TunerParams,

    #[serde(default)]
    pub games: Vec<GameConfig>,
}

impl AppConfig {
    /// Load from a TOML file (optional) with DRAWLEDGER__* overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let builder = Config::builder()
            .set_default("data_dir", "data")?
            .set_default("diagnostics_dir", "diagnostics")?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("DRAWLEDGER")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        if config.games.is_empty() {
            info!(path = %path.display(), "no games configured, using built-in defaults");
            config.games = Self::default_config().games;
        }
        Ok(config)
    }

    /// A working configuration: a Pick-3 style game drawn midday and evening with a bonus ball
    pub fn default_config() -> Self {
        let pick3 = GameConfig {
            name: "pick3".to_string(),
            arity: 3,
            number_width: 1,
            sessions: vec![
                SessionCode::new("M", Session::Midday),
                SessionCode::new("E", Session::Evening),
            ],
            bonus_tag: Some("FB".to_string()),
            date_order: DateOrder::MonthFirst,
            ledger_file: None,
            sources: vec![
                SourceConfig::new(
                    "results-pdf",
                    "https://results.example.com/pick3/past-results.pdf",
                    SourceKind::Pdf,
                ),
                SourceConfig::new(
                    "results-archive",
                    "https://archive.example.com/pick3/history",
                    SourceKind::Html,
                )
                .with_role(SourceRole::Fallback),
            ],
        };

        AppConfig {
            data_dir: PathBuf::from("data"),
            diagnostics_dir: PathBuf::from("diagnostics"),
            tuner: TunerParams::default(),
            games: vec![pick3],
        }
    }

    pub fn game(&self, name: &str) -> Result<&GameConfig> {
        self.games
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| IngestError::UnknownGame(name.to_string()))
    }

    pub fn ledger_path(&self, game: &GameSpec) -> PathBuf {
        self.data_dir.join(game.ledger_file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_settings_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("STATE_PDF_TIMEOUT_SECS", "12"),
            ("STATE_PDF_MAX_PAGES", "4"),
            ("STATE_PDF_BROWSER", "yes"),
            ("STATE_PDF_CLICK_WAIT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let settings =
            SourceSettings::from_lookup("STATE_PDF", |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.timeout_secs, 12);
        assert_eq!(settings.timeout(), Duration::from_secs(12));
        assert_eq!(settings.max_pages, 4);
        assert!(settings.browser);
        assert!(!settings.verbose);
        assert_eq!(settings.click_wait_ms, 1500, "invalid value keeps the default");
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_env_prefix_derived_from_name() {
        let source = SourceConfig::new("state-pdf", "https://x.test/a.pdf", SourceKind::Pdf);
        assert_eq!(source.env_prefix(), "STATE_PDF");
        assert_eq!(source.effective_pane_count(), 3);

        let html = SourceConfig::new("archive", "https://x.test/", SourceKind::Html);
        assert_eq!(html.effective_pane_count(), 1);
    }

    #[test]
    fn test_default_config_has_pick3() {
        let config = AppConfig::default_config();
        let game = config.game("PICK3").unwrap();
        let spec = game.spec();
        assert_eq!(spec.arity, 3);
        assert!(spec.is_multi_session());
        assert!(spec.has_bonus());
        assert_eq!(game.primary_sources().count(), 1);
        assert_eq!(game.fallback_sources().count(), 1);
        assert!(matches!(config.game("powerball"), Err(IngestError::UnknownGame(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
data_dir = "/var/lib/draws"

[tuner]
max_attempts = 2

[[games]]
name = "cash5"
arity = 5
number_width = 2

[[games.sources]]
name = "cash5-listing"
url = "https://x.test/cash5"
kind = "html"
role = "fallback"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/draws"));
        assert_eq!(config.diagnostics_dir, PathBuf::from("diagnostics"));
        assert_eq!(config.tuner.max_attempts, 2);
        assert_eq!(config.tuner.target_skip_rate, 0.25);

        let game = config.game("cash5").unwrap();
        assert_eq!(game.spec().number_width, 2);
        assert!(!game.spec().is_multi_session());
        assert_eq!(game.sources[0].role, SourceRole::Fallback);
        assert_eq!(game.sources[0].kind, SourceKind::Html);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.game("pick3").is_ok());
    }
}
