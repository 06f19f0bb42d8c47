//! Built-in PDF evidence pack renderer
//!
//! Plain PDF 1.4, A4 pages, the standard Helvetica fonts (no embedding).
//! Text is laid out from the pack outline with greedy word wrapping.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use qms_common::{Error, Result};

use super::evidence_pack::{EvidencePack, EvidencePackRenderer, Line};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FOOTER_Y: i64 = 30;

/// Font resource names in the page resources dictionary
const REGULAR: &str = "F1";
const BOLD: &str = "F2";

#[derive(Debug, Clone, Copy)]
struct Style {
    font: &'static str,
    size: i64,
    leading: i64,
}

const TITLE: Style = Style { font: BOLD, size: 18, leading: 26 };
const HEADING: Style = Style { font: BOLD, size: 12, leading: 20 };
const TEXT: Style = Style { font: REGULAR, size: 9, leading: 12 };

/// One positioned run of text
#[derive(Debug, Clone, PartialEq)]
struct Placed {
    font: &'static str,
    size: i64,
    y: i64,
    text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PdfRenderer {
    /// Characters per line at the body font size
    pub wrap_width: usize,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        // Helvetica averages a little over half an em per character
        let usable = (PAGE_WIDTH - 2 * MARGIN) as usize;
        Self {
            wrap_width: usable * 2 / (TEXT.size as usize + 1),
        }
    }
}

/// Greedy word wrap; words longer than `width` are split
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let indent: String = text.chars().take_while(|c| *c == ' ').collect();
    let mut lines = Vec::new();
    let mut current = indent.clone();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while !word.is_empty() {
            let used = current.chars().count();
            let room = width.saturating_sub(used + usize::from(used > indent.len()));
            if word.len() <= room {
                if used > indent.len() {
                    current.push(' ');
                }
                current.extend(word.drain(..));
            } else if used > indent.len() {
                lines.push(std::mem::replace(&mut current, indent.clone()));
            } else {
                let take = room.max(1).min(word.len());
                current.extend(word.drain(..take));
                lines.push(std::mem::replace(&mut current, indent.clone()));
            }
        }
    }
    if current.chars().count() > indent.len() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Map text to WinAnsi bytes; anything outside Latin-1 becomes `?`
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

impl PdfRenderer {
    /// Break the outline into pages of positioned text
    fn paginate(&self, outline: &[Line]) -> Vec<Vec<Placed>> {
        let top = PAGE_HEIGHT - MARGIN;
        let mut pages = vec![Vec::new()];
        let mut y = top;

        for line in outline {
            let (style, text) = match line {
                Line::Title(t) => (TITLE, t.as_str()),
                Line::Heading(t) => (HEADING, t.as_str()),
                Line::Text(t) => (TEXT, t.as_str()),
                Line::Blank => {
                    y -= TEXT.leading;
                    continue;
                }
            };
            let width = self.wrap_width * TEXT.size as usize / style.size as usize;
            let wrapped = wrap(text, width);

            // Keep a heading on the same page as its first record
            let needed = match line {
                Line::Heading(_) => style.leading + TEXT.leading * 2,
                _ => style.leading,
            };
            for (i, piece) in wrapped.into_iter().enumerate() {
                let reserve = if i == 0 { needed } else { style.leading };
                if y - reserve < MARGIN {
                    pages.push(Vec::new());
                    y = top;
                }
                y -= style.leading;
                if let Some(page) = pages.last_mut() {
                    page.push(Placed {
                        font: style.font,
                        size: style.size,
                        y,
                        text: piece,
                    });
                }
            }
        }
        pages
    }

    fn page_content(placed: &[Placed], page_number: usize, page_count: usize) -> Result<Vec<u8>> {
        let mut operations = Vec::with_capacity(placed.len() * 5 + 5);
        for run in placed {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![run.font.into(), run.size.into()],
            ));
            operations.push(Operation::new("Td", vec![MARGIN.into(), run.y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(encode_text(&run.text))],
            ));
            operations.push(Operation::new("ET", vec![]));
        }

        let footer = format!("Page {} of {}", page_number, page_count);
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec![REGULAR.into(), 8.into()]));
        operations.push(Operation::new(
            "Td",
            vec![(PAGE_WIDTH - MARGIN - 60).into(), FOOTER_Y.into()],
        ));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(encode_text(&footer))],
        ));
        operations.push(Operation::new("ET", vec![]));

        Content { operations }
            .encode()
            .map_err(|e| Error::Internal(format!("Failed to encode PDF page: {}", e)))
    }

    fn build(&self, pack: &EvidencePack) -> Result<Document> {
        let mut doc = Document::with_version("1.4");
        let pages_id: ObjectId = doc.new_object_id();

        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                REGULAR => regular_id,
                BOLD => bold_id,
            },
        });

        let pages = self.paginate(&pack.outline());
        let page_count = pages.len();
        let mut kids = Vec::with_capacity(page_count);
        for (index, placed) in pages.iter().enumerate() {
            let content = Self::page_content(placed, index + 1, page_count)?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("QMS Evidence Pack"),
            "Author" => Object::string_literal(encode_text(&pack.generated_by)),
            "Producer" => Object::string_literal(concat!("qms-server ", env!("CARGO_PKG_VERSION"))),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        Ok(doc)
    }
}

impl EvidencePackRenderer for PdfRenderer {
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }

    fn file_extension(&self) -> &'static str {
        "pdf"
    }

    fn render(&self, pack: &EvidencePack) -> Result<Vec<u8>> {
        let mut doc = self.build(pack)?;
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| Error::Internal(format!("Failed to write PDF: {}", e)))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qms_common::query::DateRange;

    fn pack_with_log_lines(count: usize) -> EvidencePack {
        let now = qms_common::time::now();
        let entries = (0..count)
            .map(|i| crate::db::audit_logs::AuditLogEntry {
                id: i as i64 + 1,
                user_id: Some(1),
                username: Some("admin".to_string()),
                action: "update".to_string(),
                entity_type: "ncr".to_string(),
                entity_id: Some(i as i64),
                old_values: None,
                new_values: None,
                details: None,
                created_at: now,
            })
            .collect();
        EvidencePack {
            generated_at: now,
            generated_by: "Zoë Auditor".to_string(),
            period: DateRange::default(),
            audits: None,
            findings: None,
            ncrs: None,
            capas: None,
            ideas: None,
            idea_tasks: Default::default(),
            audit_log: Some(entries),
        }
    }

    #[test]
    fn test_wrap_respects_width() {
        let lines = wrap("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        assert!(wrap("abcdefghij", 4).iter().all(|l| l.chars().count() <= 4));
        assert_eq!(wrap("", 10), vec![String::new()]);
    }

    #[test]
    fn test_wrap_keeps_indent() {
        let lines = wrap("    one two three", 12);
        assert!(lines.iter().all(|l| l.starts_with("    ")));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_encode_text_replaces_unsupported() {
        assert_eq!(encode_text("a(b)"), b"a(b)".to_vec());
        assert_eq!(encode_text("Zoë"), vec![b'Z', b'o', 0xEB]);
        assert_eq!(encode_text("✓"), b"?".to_vec());
    }

    #[test]
    fn test_renders_pdf_header() {
        let bytes = PdfRenderer::default().render(&pack_with_log_lines(3)).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4"));
        let tail = String::from_utf8_lossy(&bytes[bytes.len() - 32..]).to_string();
        assert!(tail.contains("%%EOF"));
    }

    #[test]
    fn test_long_packs_span_pages() {
        let renderer = PdfRenderer::default();
        let pages = renderer.paginate(&pack_with_log_lines(200).outline());
        assert!(pages.len() > 2);
        for page in &pages {
            assert!(page.iter().all(|p| p.y >= MARGIN && p.y <= PAGE_HEIGHT - MARGIN));
        }
    }
}
