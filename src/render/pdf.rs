use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use ttf_parser::{Face, GlyphId};

use super::{RenderError, ReportDocument};

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FOOTER_Y: i64 = 30;

const REGULAR: &str = "F1";
const BOLD: &str = "F2";
const UNICODE: &str = "F3";
const WIN_ANSI: &str = "WinAnsiEncoding";

/// Face for text the builtin fonts cannot encode (Cyrillic, Greek, ...).
static UNICODE_FONT: &[u8] = include_bytes!("../../fonts/DejaVuSans.ttf");
const UNICODE_FONT_NAME: &str = "DejaVuSans";

/// Characters per line at body size; Helvetica averages ~0.5em per glyph.
const WRAP_COLUMNS: usize = 90;
const LABEL_INDENT: i64 = 0;
const VALUE_INDENT: i64 = 130;
const VALUE_COLUMNS: usize = 68;

#[derive(Debug, Clone)]
struct Line {
    text: String,
    font: &'static str,
    size: i64,
    x: i64,
    /// Vertical space consumed before this line is drawn.
    advance: i64,
}

impl Line {
    fn new(text: impl Into<String>, font: &'static str, size: i64, x: i64, advance: i64) -> Self {
        Self { text: text.into(), font, size, x, advance }
    }
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.push(word.drain(..width).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = if current.is_empty() { word.chars().count() } else { current.chars().count() + 1 + word.chars().count() };
            if needed > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn layout(doc: &ReportDocument) -> Vec<Line> {
    let mut lines = vec![
        Line::new(doc.title, BOLD, 20, LABEL_INDENT, 24),
        Line::new(format!("Reference Number: {}", doc.reference_number), BOLD, 12, LABEL_INDENT, 22),
        Line::new(format!("Status: {}", doc.status), REGULAR, 10, LABEL_INDENT, 16),
        Line::new(format!("Submitted: {}", doc.submitted_at), REGULAR, 10, LABEL_INDENT, 14),
    ];
    for section in &doc.sections {
        lines.push(Line::new(section.title, BOLD, 13, LABEL_INDENT, 28));
        for field in &section.fields {
            let wrapped = wrap(&field.value, VALUE_COLUMNS);
            for (i, chunk) in wrapped.into_iter().enumerate() {
                if i == 0 {
                    lines.push(Line::new(field.label, BOLD, 10, LABEL_INDENT, 16));
                    // same baseline as the label
                    lines.push(Line::new(chunk, REGULAR, 10, VALUE_INDENT, 0));
                } else {
                    lines.push(Line::new(chunk, REGULAR, 10, VALUE_INDENT, 14));
                }
            }
        }
    }
    lines.push(Line::new(format!("Photos ({})", doc.photos.len()), BOLD, 13, LABEL_INDENT, 28));
    for photo in &doc.photos {
        let text = format!("{}: {}", photo.label, photo.url);
        for chunk in wrap(&text, WRAP_COLUMNS) {
            lines.push(Line::new(chunk, REGULAR, 10, LABEL_INDENT, 14));
        }
    }
    lines.push(Line::new(format!("Generated {}", doc.generated_at), REGULAR, 8, LABEL_INDENT, 28));
    lines
}

/// Splits lines into pages so nothing is drawn below the bottom margin.
fn paginate(lines: Vec<Line>) -> Vec<Vec<Line>> {
    let usable = PAGE_HEIGHT - 2 * MARGIN;
    let mut pages = vec![Vec::new()];
    let mut used = 0;
    for line in lines {
        // zero-advance lines share the previous baseline and stay with it
        if line.advance > 0 && used + line.advance > usable && used > 0 {
            pages.push(Vec::new());
            used = 0;
        }
        used += line.advance;
        if let Some(page) = pages.last_mut() {
            page.push(line);
        }
    }
    pages
}

/// WinAnsiEncoding byte for `c`, when the builtin fonts can show it.
fn win_ansi(c: char) -> Option<u8> {
    let mut buf = [0u8; 4];
    match Document::encode_text(Some(WIN_ANSI), c.encode_utf8(&mut buf)).as_slice() {
        [byte] => Some(*byte),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
enum Run {
    /// WinAnsi bytes drawn with the line's Helvetica face.
    Builtin(Vec<u8>),
    /// Text outside WinAnsi, drawn with the embedded Unicode face.
    Unicode(String),
}

fn split_runs(text: &str) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for c in text.chars() {
        match win_ansi(c) {
            Some(byte) => {
                if let Some(Run::Builtin(bytes)) = runs.last_mut() {
                    bytes.push(byte);
                    continue;
                }
                runs.push(Run::Builtin(vec![byte]));
            }
            None => {
                if let Some(Run::Unicode(s)) = runs.last_mut() {
                    s.push(c);
                    continue;
                }
                runs.push(Run::Unicode(c.to_string()));
            }
        }
    }
    runs
}

/// CIDs for characters drawn with the embedded face, in order of first use.
/// CID 0 stays `.notdef`.
#[derive(Default)]
struct UnicodeGlyphs {
    chars: Vec<char>,
    cids: HashMap<char, u16>,
}

impl UnicodeGlyphs {
    /// Two-byte Identity-H codes for `text`.
    fn encode(&mut self, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() * 2);
        for c in text.chars() {
            let cid = match self.cids.get(&c) {
                Some(cid) => *cid,
                None => match u16::try_from(self.chars.len() + 1) {
                    Ok(cid) => {
                        self.chars.push(c);
                        self.cids.insert(c, cid);
                        cid
                    }
                    Err(_) => 0,
                },
            };
            out.extend_from_slice(&cid.to_be_bytes());
        }
        out
    }

    /// Adds the Type0 font when any text needed it. Characters the face has no
    /// glyph for still map back to their code points through ToUnicode.
    fn embed(&self, pdf: &mut Document) -> Result<Option<ObjectId>, RenderError> {
        if self.chars.is_empty() {
            return Ok(None);
        }
        let pdf_err = |e: lopdf::Error| RenderError::Pdf(e.to_string());
        let face = Face::parse(UNICODE_FONT, 0).map_err(|e| RenderError::Pdf(format!("embedded font: {e}")))?;
        let upem = i64::from(face.units_per_em().max(1));
        let scale = |v: i64| v * 1000 / upem;

        let mut gid_map = Vec::with_capacity((self.chars.len() + 1) * 2);
        gid_map.extend_from_slice(&[0, 0]);
        let mut widths: Vec<Object> = Vec::with_capacity(self.chars.len());
        let mut missing = String::new();
        for &c in &self.chars {
            let gid = face.glyph_index(c).unwrap_or_else(|| {
                missing.push(c);
                GlyphId(0)
            });
            gid_map.extend_from_slice(&gid.0.to_be_bytes());
            let advance = face.glyph_hor_advance(gid).map(i64::from).unwrap_or(upem);
            widths.push(Object::Integer(scale(advance)));
        }
        if !missing.is_empty() {
            tracing::warn!(chars = %missing, "embedded font has no glyph; text is kept but drawn as .notdef");
        }

        let mut font_file = Stream::new(
            dictionary! { "Length1" => UNICODE_FONT.len() as i64 },
            UNICODE_FONT.to_vec(),
        );
        font_file.compress().map_err(pdf_err)?;
        let font_file_id = pdf.add_object(font_file);

        let bbox = face.global_bounding_box();
        let font_bbox: Vec<Object> = [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max]
            .into_iter()
            .map(|v| Object::Integer(scale(i64::from(v))))
            .collect();
        let descriptor_id = pdf.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => UNICODE_FONT_NAME,
            "Flags" => Object::Integer(32),
            "FontBBox" => font_bbox,
            "ItalicAngle" => Object::Integer(0),
            "Ascent" => Object::Integer(scale(i64::from(face.ascender()))),
            "Descent" => Object::Integer(scale(i64::from(face.descender()))),
            "CapHeight" => Object::Integer(scale(i64::from(face.capital_height().unwrap_or(face.ascender())))),
            "StemV" => Object::Integer(80),
            "FontFile2" => font_file_id,
        });

        let mut cid_to_gid = Stream::new(dictionary! {}, gid_map);
        cid_to_gid.compress().map_err(pdf_err)?;
        let cid_to_gid_id = pdf.add_object(cid_to_gid);

        let cid_font_id = pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => UNICODE_FONT_NAME,
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => Object::Integer(0),
            },
            "FontDescriptor" => descriptor_id,
            "W" => vec![Object::Integer(1), Object::Array(widths)],
            "CIDToGIDMap" => cid_to_gid_id,
        });
        let to_unicode_id = pdf.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&self.chars).into_bytes()));

        Ok(Some(pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => UNICODE_FONT_NAME,
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        })))
    }
}

/// CID to UTF-16 map; CID `n` is `chars[n - 1]`.
fn to_unicode_cmap(chars: &[char]) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    // bfchar blocks hold at most 100 entries
    for (block_no, block) in chars.chunks(100).enumerate() {
        cmap.push_str(&format!("{} beginbfchar\n", block.len()));
        for (i, c) in block.iter().enumerate() {
            let cid = block_no * 100 + i + 1;
            let mut units = [0u16; 2];
            let target: String = c.encode_utf16(&mut units).iter().map(|u| format!("{u:04X}")).collect();
            cmap.push_str(&format!("<{cid:04X}> <{target}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

fn text_ops(text: &str, font: &'static str, size: i64, x: i64, y: i64, glyphs: &mut UnicodeGlyphs) -> Vec<Operation> {
    let mut ops = vec![Operation::new("BT", vec![]), Operation::new("Td", vec![x.into(), y.into()])];
    for run in split_runs(text) {
        let (run_font, bytes, format) = match run {
            Run::Builtin(bytes) => (font, bytes, StringFormat::Literal),
            Run::Unicode(s) => (UNICODE, glyphs.encode(&s), StringFormat::Hexadecimal),
        };
        ops.push(Operation::new("Tf", vec![run_font.into(), size.into()]));
        ops.push(Operation::new("Tj", vec![Object::String(bytes, format)]));
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

fn page_content(lines: &[Line], page_no: usize, page_count: usize, glyphs: &mut UnicodeGlyphs) -> Content {
    let mut operations = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        y -= line.advance;
        operations.extend(text_ops(&line.text, line.font, line.size, MARGIN + line.x, y, glyphs));
    }
    let footer = format!("Page {page_no} of {page_count}");
    operations.extend(text_ops(&footer, REGULAR, 8, PAGE_WIDTH - MARGIN - 60, FOOTER_Y, glyphs));
    Content { operations }
}

/// PDF date string, e.g. `D:20240316120000Z`.
fn pdf_date(at: DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%SZ").to_string()
}

pub(super) fn render(doc: &ReportDocument, generated_at: DateTime<Utc>) -> Result<Vec<u8>, RenderError> {
    let pdf_err = |e: lopdf::Error| RenderError::Pdf(e.to_string());

    let mut pdf = Document::with_version("1.5");
    let pages_id = pdf.new_object_id();
    let regular_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => WIN_ANSI,
    });
    let bold_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => WIN_ANSI,
    });
    let resources_id = pdf.new_object_id();

    let pages = paginate(layout(doc));
    let page_count = pages.len();
    let mut glyphs = UnicodeGlyphs::default();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    for (i, lines) in pages.iter().enumerate() {
        let content = page_content(lines, i + 1, page_count, &mut glyphs).encode().map_err(pdf_err)?;
        let content_id = pdf.add_object(Stream::new(dictionary! {}, content));
        let page_id: ObjectId = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let mut fonts = dictionary! {
        REGULAR => regular_id,
        BOLD => bold_id,
    };
    if let Some(unicode_id) = glyphs.embed(&mut pdf)? {
        fonts.set(UNICODE, unicode_id);
    }
    pdf.objects.insert(resources_id, Object::Dictionary(dictionary! { "Font" => fonts }));

    let media_box: Vec<Object> = vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()];
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "Resources" => resources_id,
            "MediaBox" => media_box,
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = pdf.add_object(dictionary! {
        "Title" => Object::string_literal(format!("{} {}", doc.title, doc.reference_number)),
        "Producer" => Object::string_literal(env!("CARGO_PKG_NAME")),
        "CreationDate" => Object::string_literal(pdf_date(generated_at)),
    });
    pdf.trailer.set("Root", catalog_id);
    pdf.trailer.set("Info", info_id);

    let mut out = Vec::new();
    pdf.save_to(&mut out).map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(out)
}
