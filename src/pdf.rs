// 📄 PDF Extractor - positioned text items from a PDF's content streams
// Tracks the text and graphics matrices so every shown string lands at its page position

use crate::error::{IngestError, Result};
use crate::token::RawItem;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object};
use std::path::Path;
use tracing::{debug, warn};

/// Average glyph advance as a fraction of the font size; fonts are not parsed
const CHAR_WIDTH_EM: f64 = 0.5;

/// TJ adjustments wider than this (thousandths of an em) split the run into separate items
const TJ_SPLIT_THRESHOLD: f64 = 300.0;

// ============================================================================
// MATRIX
// ============================================================================

/// Affine matrix [a b c d e f] as used by PDF content streams
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Matrix {
    const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    fn from_operands(ops: &[Object]) -> Option<Matrix> {
        if ops.len() < 6 {
            return None;
        }
        Some(Matrix {
            a: number(&ops[0])?,
            b: number(&ops[1])?,
            c: number(&ops[2])?,
            d: number(&ops[3])?,
            e: number(&ops[4])?,
            f: number(&ops[5])?,
        })
    }

    /// self × other
    fn multiply(&self, o: &Matrix) -> Matrix {
        Matrix {
            a: self.a * o.a + self.b * o.c,
            b: self.a * o.b + self.b * o.d,
            c: self.c * o.a + self.d * o.c,
            d: self.c * o.b + self.d * o.d,
            e: self.e * o.a + self.f * o.c + o.e,
            f: self.e * o.b + self.f * o.d + o.f,
        }
    }

    fn translate(tx: f64, ty: f64) -> Matrix {
        Matrix {
            e: tx,
            f: ty,
            ..Matrix::IDENTITY
        }
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Decode a PDF string: UTF-16BE with BOM, otherwise Latin-1
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

// ============================================================================
// TEXT STATE MACHINE
// ============================================================================

struct TextState {
    page: usize,
    ctm: Matrix,
    stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f64,
    leading: f64,
    /// Text shown since the last positioning operator, with its start position in text space
    pending: Option<(f64, String)>,
    /// Horizontal text-space offset of the pen from `tm` within the pending run
    advance: f64,
    items: Vec<RawItem>,
}

impl TextState {
    fn new(page: usize) -> Self {
        TextState {
            page,
            ctm: Matrix::IDENTITY,
            stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            font_size: 0.0,
            leading: 0.0,
            pending: None,
            advance: 0.0,
            items: Vec::new(),
        }
    }

    fn flush(&mut self) {
        if let Some((start, text)) = self.pending.take() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                let (x, y) = self.tm.multiply(&self.ctm).apply(start, 0.0);
                self.items.push(RawItem::new(self.page, x, y, trimmed));
            }
        }
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.flush();
        self.tlm = Matrix::translate(tx, ty).multiply(&self.tlm);
        self.tm = self.tlm;
        self.advance = 0.0;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn show(&mut self, text: &str) {
        match self.pending.as_mut() {
            Some((_, buf)) => buf.push_str(text),
            None => self.pending = Some((self.advance, text.to_string())),
        }
        self.advance += text.chars().count() as f64 * self.font_size * CHAR_WIDTH_EM;
    }

    fn show_array(&mut self, parts: &[Object]) {
        for part in parts {
            match part {
                Object::String(bytes, _) => self.show(&decode_pdf_string(bytes)),
                other => {
                    if let Some(adjust) = number(other) {
                        if -adjust > TJ_SPLIT_THRESHOLD {
                            self.flush();
                        }
                        self.advance -= adjust / 1000.0 * self.font_size;
                    }
                }
            }
        }
    }

    fn apply(&mut self, op: &Operation) {
        let ops = &op.operands;
        match op.operator.as_str() {
            "q" => self.stack.push(self.ctm),
            "Q" => {
                if let Some(m) = self.stack.pop() {
                    self.ctm = m;
                }
            }
            "cm" => {
                if let Some(m) = Matrix::from_operands(ops) {
                    self.ctm = m.multiply(&self.ctm);
                }
            }
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
                self.advance = 0.0;
            }
            "ET" => self.flush(),
            "Tf" => {
                if let Some(size) = ops.get(1).and_then(number) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some(l) = ops.first().and_then(number) {
                    self.leading = l;
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(ops) {
                    self.flush();
                    self.tm = m;
                    self.tlm = m;
                    self.advance = 0.0;
                }
            }
            "Td" | "TD" => {
                let tx = ops.first().and_then(number).unwrap_or(0.0);
                let ty = ops.get(1).and_then(number).unwrap_or(0.0);
                if op.operator == "TD" {
                    self.leading = -ty;
                }
                self.move_line(tx, ty);
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = ops.first() {
                    self.show(&decode_pdf_string(bytes));
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = ops.first() {
                    self.show_array(parts);
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = ops.first() {
                    self.show(&decode_pdf_string(bytes));
                }
            }
            "\"" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = ops.get(2) {
                    self.show(&decode_pdf_string(bytes));
                }
            }
            _ => {}
        }
    }
}

/// Positioned text items of one page's decoded content operations
pub fn items_from_operations(page: usize, operations: &[Operation]) -> Vec<RawItem> {
    let mut state = TextState::new(page);
    for op in operations {
        state.apply(op);
    }
    state.flush();
    state.items
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// Extract positioned items from every page of an in-memory PDF; pages are 0-based
pub fn extract_items(bytes: &[u8]) -> Result<Vec<RawItem>> {
    let doc = Document::load_mem(bytes).map_err(|e| IngestError::Pdf(e.to_string()))?;
    if doc.is_encrypted() {
        return Err(IngestError::Pdf("document is encrypted".to_string()));
    }

    let pages = doc.get_pages();
    debug!(pages = pages.len(), "loaded PDF");

    let mut items = Vec::new();
    for (number, page_id) in pages {
        let page = number.saturating_sub(1) as usize;
        let content = match doc
            .get_page_content(page_id)
            .and_then(|bytes| Content::decode(&bytes))
        {
            Ok(content) => content,
            Err(e) => {
                warn!(page, error = %e, "unreadable page content, skipping page");
                continue;
            }
        };
        let page_items = items_from_operations(page, &content.operations);
        debug!(page, items = page_items.len(), "extracted page items");
        items.extend(page_items);
    }

    Ok(items)
}

pub fn extract_file(path: &Path) -> Result<Vec<RawItem>> {
    let bytes = std::fs::read(path)?;
    extract_items(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    fn n(v: i64) -> Object {
        Object::Integer(v)
    }

    fn font(size: i64) -> Operation {
        op("Tf", vec![Object::Name(b"F1".to_vec()), n(size)])
    }

    fn texts(items: &[RawItem]) -> Vec<(&str, f64, f64)> {
        items.iter().map(|i| (i.text.as_str(), i.x, i.y)).collect()
    }

    #[test]
    fn test_positions_follow_text_matrix() {
        let ops = vec![
            op("BT", vec![]),
            font(10),
            op(
                "Tm",
                vec![n(1), n(0), n(0), n(1), n(50), n(700)],
            ),
            op("Tj", vec![Object::string_literal("Jan 2, 2024")]),
            op("Td", vec![n(60), n(0)]),
            op("Tj", vec![Object::string_literal("E")]),
            op("Td", vec![n(15), n(-14)]),
            op("Tj", vec![Object::string_literal("7")]),
            op("ET", vec![]),
        ];
        let items = items_from_operations(0, &ops);
        assert_eq!(
            texts(&items),
            vec![("Jan 2, 2024", 50.0, 700.0), ("E", 110.0, 700.0), ("7", 125.0, 686.0)]
        );
    }

    #[test]
    fn test_tj_kerning_gap_splits_items() {
        let ops = vec![
            op("BT", vec![]),
            font(10),
            op("Td", vec![n(100), n(500)]),
            op(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("1"),
                    Object::Integer(-2000),
                    Object::string_literal("2"),
                    Object::Integer(-50),
                    Object::string_literal("3"),
                ])],
            ),
            op("ET", vec![]),
        ];
        let items = items_from_operations(2, &ops);
        // "1" advances 5pt, then a 20pt gap; the small kern keeps "2" and "3" together
        assert_eq!(texts(&items), vec![("1", 100.0, 500.0), ("23", 125.0, 500.0)]);
        assert!(items.iter().all(|i| i.page == 2));
    }

    #[test]
    fn test_leading_from_td_drives_next_line() {
        let ops = vec![
            op("BT", vec![]),
            font(12),
            op("TD", vec![n(20), n(-14)]),
            op("Tj", vec![Object::string_literal("A")]),
            op("T*", vec![]),
            op("Tj", vec![Object::string_literal("B")]),
            op("'", vec![Object::string_literal("C")]),
            op("ET", vec![]),
        ];
        let items = items_from_operations(0, &ops);
        assert_eq!(
            texts(&items),
            vec![("A", 20.0, -14.0), ("B", 20.0, -28.0), ("C", 20.0, -42.0)]
        );
    }

    #[test]
    fn test_cm_translates_text_space() {
        let ops = vec![
            op("q", vec![]),
            op(
                "cm",
                vec![n(1), n(0), n(0), n(1), n(10), n(20)],
            ),
            op("BT", vec![]),
            font(10),
            op("Td", vec![n(5), n(5)]),
            op("Tj", vec![Object::string_literal("FB")]),
            op("ET", vec![]),
            op("Q", vec![]),
            op("BT", vec![]),
            op("Td", vec![n(5), n(5)]),
            op("Tj", vec![Object::string_literal("x")]),
            op("ET", vec![]),
        ];
        let items = items_from_operations(0, &ops);
        assert_eq!(texts(&items), vec![("FB", 15.0, 25.0), ("x", 5.0, 5.0)]);
    }

    #[test]
    fn test_utf16_and_latin1_strings() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x46, 0x00, 0x42]), "FB");
        assert_eq!(decode_pdf_string(&[0xA9, b' ', b'2']), "© 2");
    }

    #[test]
    fn test_blank_runs_are_dropped() {
        let ops = vec![
            op("BT", vec![]),
            op("Tj", vec![Object::string_literal("   ")]),
            op("ET", vec![]),
        ];
        assert!(items_from_operations(0, &ops).is_empty());
    }

    /// Two-page document, one shown string per page
    fn two_page_pdf() -> Vec<u8> {
        use lopdf::{dictionary, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for (x, text) in [(72, "Jun 3, 2024"), (300, "FB")] {
            let content = Content {
                operations: vec![
                    op("BT", vec![]),
                    font(10),
                    op("Td", vec![n(x), n(700)]),
                    op("Tj", vec![Object::string_literal(text)]),
                    op("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 2,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_document_pages_are_zero_based() {
        let items = extract_items(&two_page_pdf()).unwrap();
        let found: Vec<(usize, &str, f64, f64)> = items
            .iter()
            .map(|i| (i.page, i.text.as_str(), i.x, i.y))
            .collect();
        assert_eq!(found, vec![(0, "Jun 3, 2024", 72.0, 700.0), (1, "FB", 300.0, 700.0)]);
    }

    #[test]
    fn test_garbage_bytes_are_a_pdf_error() {
        let err = extract_items(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, IngestError::Pdf(_)));
    }
}
