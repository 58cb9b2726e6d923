// ⚠️ Error taxonomy for the ingestion pipeline
// Transport, parse, structural and upstream-state failures, each with its own recovery path

use thiserror::Error;

/// Main error type for the ingestion library
#[derive(Error, Debug)]
pub enum IngestError {
    // Transport errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out: {0}")]
    Timeout(String),

    // Document errors
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("HTML extraction failed: {0}")]
    Html(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // Upstream state
    #[error("Results pending at source {0}")]
    PendingResults(String),

    #[error("No live-component configuration found on {0}")]
    NoLiveConfig(String),

    #[error("Browser automation error: {0}")]
    Browser(String),

    // Outcome errors
    #[error("Zero rows obtained from all sources for game {game}")]
    NoRows { game: String },

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    // Ledger errors
    #[error("Ledger header mismatch: expected [{expected}], found [{found}]")]
    HeaderMismatch { expected: String, found: String },

    #[error("Ledger row {line} is malformed: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether the caller should fall through to the next strategy or source
    /// instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IngestError::Http(_)
                | IngestError::Status { .. }
                | IngestError::Timeout(_)
                | IngestError::Pdf(_)
                | IngestError::Html(_)
                | IngestError::PendingResults(_)
                | IngestError::NoLiveConfig(_)
                | IngestError::Browser(_)
                | IngestError::Json(_)
        )
    }
}

/// Result type alias for IngestError
pub type Result<T> = std::result::Result<T, IngestError>;
