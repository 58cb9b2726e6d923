// Draw Ledger - Core Library
// Exposes the ingestion pipeline for the CLI and tests

pub mod error;
pub mod game;
pub mod record;
pub mod token;          // Token Classifier
pub mod columns;        // Column Clusterer
pub mod panes;          // Pane Partitioner
pub mod assembler;      // Row Assembler
pub mod tuner;          // Page-Level Tuner
pub mod pdf;            // PDF positioned-text extraction
pub mod html;           // HTML listing extraction + live-component discovery
pub mod http;
pub mod config;
pub mod collector;      // Paginated Collector (replay, stateful replay, browser)
pub mod ledger;
pub mod merge;          // Canonical Merger
pub mod diagnostics;
pub mod pipeline;

// Re-export commonly used types
pub use error::{IngestError, Result};
pub use game::{DateOrder, GameSpec, Session, SessionCode};
pub use record::{DrawKey, DrawRecord, SourceRole, SourcedRecord};
pub use token::{RawItem, Token, TokenClassifier, TokenKind};
pub use columns::{cluster_columns, Column, ClusterParams};
pub use panes::{partition_panes, Pane, PaneParams};
pub use assembler::{AssemblyReport, RowAssembler, SkipReason, SkippedRow, Tolerances};
pub use tuner::{assemble_document, tune_page, DocumentOutcome, PageOutcome, TunerParams};
pub use html::{HtmlSelectors, ListingParser};
pub use http::{HttpResponse, HttpTransport, Transport};
pub use crate::config::{AppConfig, GameConfig, SourceConfig, SourceKind, SourceSettings};
pub use collector::{PaginatedCollector, PageStrategy};
pub use ledger::{Ledger, WriteOutcome};
pub use merge::{MergeCounts, MergeEngine, MergeOutcome};
pub use diagnostics::Diagnostics;
pub use pipeline::{parse_local, ParsedDocument, Pipeline, RunMode, RunSummary, SourceReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
