// 🩺 Diagnostics - token dumps and traces for layout debugging
// Written only when a source yields nothing, or when verbose mode asks for a trace

use crate::assembler::SkippedRow;
use crate::error::Result;
use crate::token::Token;
use csv::{Terminator, WriterBuilder};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Write `page,x,y,kind,text` for every token
pub fn write_token_dump(path: &Path, tokens: &[Token]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_path(path)?;
    writer.write_record(["page", "x", "y", "kind", "text"])?;
    for t in tokens {
        writer.write_record([
            t.page.to_string(),
            format!("{:.2}", t.x),
            format!("{:.2}", t.y),
            t.kind.as_str().to_string(),
            t.text.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct TraceLine<'a> {
    run_id: &'a str,
    source: &'a str,
    #[serde(flatten)]
    token: &'a Token,
}

#[derive(Serialize)]
struct SkipLine<'a> {
    run_id: &'a str,
    source: &'a str,
    skip: &'a SkippedRow,
}

/// Per-run diagnostics directory
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
    run_id: Uuid,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Diagnostics {
            dir: dir.into(),
            run_id,
        }
    }

    fn file(&self, game: &str, source: &str, suffix: &str) -> PathBuf {
        let short = self.run_id.simple().to_string();
        self.dir
            .join(format!("{}-{}-{}.{}", game, source, &short[..8], suffix))
    }

    /// Token dump for a source that produced zero rows
    pub fn dump_tokens(&self, game: &str, source: &str, tokens: &[Token]) -> Result<PathBuf> {
        let path = self.file(game, source, "tokens.csv");
        write_token_dump(&path, tokens)?;
        info!(path = %path.display(), tokens = tokens.len(), "token dump written");
        Ok(path)
    }

    /// JSON-lines trace of every token and skipped row
    pub fn trace(
        &self,
        game: &str,
        source: &str,
        tokens: &[Token],
        skips: &[SkippedRow],
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file(game, source, "trace.jsonl");
        let run_id = self.run_id.to_string();
        let mut out = BufWriter::new(File::create(&path)?);

        for token in tokens {
            serde_json::to_writer(
                &mut out,
                &TraceLine {
                    run_id: &run_id,
                    source,
                    token,
                },
            )?;
            out.write_all(b"\n")?;
        }
        for skip in skips {
            serde_json::to_writer(
                &mut out,
                &SkipLine {
                    run_id: &run_id,
                    source,
                    skip,
                },
            )?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        info!(path = %path.display(), "token trace written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::SkipReason;
    use crate::token::TokenKind;

    fn tokens() -> Vec<Token> {
        vec![
            Token::new(0, 12.0, 700.5, "Jun 1, 2024", TokenKind::Date),
            Token::new(0, 60.0, 700.0, "E", TokenKind::Session),
            Token::new(1, 300.25, 20.0, "Page 2, of 9", TokenKind::Noise),
        ]
    }

    #[test]
    fn test_token_dump_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.csv");
        write_token_dump(&path, &tokens()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "page,x,y,kind,text");
        assert_eq!(lines[1], "0,12.00,700.50,date,\"Jun 1, 2024\"");
        assert_eq!(lines[3], "1,300.25,20.00,noise,\"Page 2, of 9\"");
    }

    #[test]
    fn test_trace_is_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("diag"), Uuid::new_v4());
        let skip = SkippedRow {
            page: 0,
            pane: 1,
            y: 700.0,
            marker: "E".to_string(),
            reason: SkipReason::NoDateLeft,
            detail: "no date within 8.0pt".to_string(),
        };
        let path = diagnostics.trace("pick3", "pdf", &tokens(), &[skip]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1]["kind"], "session");
        assert_eq!(lines[3]["skip"]["reason"], "noDateLeft");
    }

    #[test]
    fn test_dump_file_names_carry_game_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path(), Uuid::new_v4());
        let path = diagnostics.dump_tokens("pick3", "results-pdf", &tokens()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("pick3-results-pdf-"));
        assert!(name.ends_with(".tokens.csv"));
    }
}
