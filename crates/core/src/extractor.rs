use crate::error::ExtractionError;
use crate::models::{NormalizedText, PositionedTextToken, RawPdfText};
use crate::normalizer::normalize;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Tokens whose baselines differ by more than this belong to different lines.
pub const LINE_BREAK_THRESHOLD: f32 = 5.0;

/// Glyph width as a fraction of the font size when no font metrics are read.
const APPROX_CHAR_WIDTH_RATIO: f32 = 0.5;

/// A `TJ` kerning adjustment wider than this share of an em is a word gap.
const TJ_WORD_GAP_EM: f32 = 0.25;

/// Boundary to the low-level PDF library.
pub trait PdfParser {
    fn parse(&self, bytes: &[u8]) -> Result<RawPdfText, ExtractionError>;
}

/// Turns an uploaded file on disk into normalized text.
pub trait TextExtractor {
    fn extract(&self, path: &Path) -> Result<NormalizedText, ExtractionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfParser;

impl PdfParser for LopdfParser {
    fn parse(&self, bytes: &[u8]) -> Result<RawPdfText, ExtractionError> {
        let document =
            Document::load_mem(bytes).map_err(|error| ExtractionError::Corrupt(error.to_string()))?;

        let mut tokens = Vec::new();
        for (page_no, page_id) in document.get_pages() {
            match page_tokens(&document, page_no, page_id) {
                Ok(page) => tokens.extend(page),
                Err(reason) => warn!(page = page_no, %reason, "skipping unreadable page content"),
            }
        }

        if !tokens.is_empty() {
            return Ok(RawPdfText::Positioned(tokens));
        }

        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
        match document.extract_text(&page_numbers) {
            Ok(text) => Ok(RawPdfText::Flat(text)),
            Err(error) => {
                debug!(%error, "flat text extraction failed, treating document as textless");
                Ok(RawPdfText::Flat(String::new()))
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PdfTextExtractor<P = LopdfParser> {
    parser: P,
}

impl<P: PdfParser> PdfTextExtractor<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }

    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<NormalizedText, ExtractionError> {
        let raw = match self.parser.parse(bytes)? {
            RawPdfText::Positioned(tokens) => reconstruct_text(&tokens),
            RawPdfText::Flat(text) => text,
        };

        let content = normalize(&raw);
        if content.is_empty() {
            return Err(ExtractionError::EmptyContent);
        }

        Ok(NormalizedText { content })
    }
}

impl<P: PdfParser> TextExtractor for PdfTextExtractor<P> {
    fn extract(&self, path: &Path) -> Result<NormalizedText, ExtractionError> {
        let bytes = std::fs::read(path).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => ExtractionError::NotFound(path.display().to_string()),
            _ => ExtractionError::Unreadable(error),
        })?;

        self.extract_bytes(&bytes)
    }
}

/// Rebuilds reading text from positioned tokens: a token starts a new line
/// when its page changes or its baseline moves by more than
/// [`LINE_BREAK_THRESHOLD`]; tokens on one line are joined with a space when
/// the horizontal gap exceeds half the average glyph width.
pub fn reconstruct_text(tokens: &[PositionedTextToken]) -> String {
    let mut output = String::new();
    let mut previous: Option<&PositionedTextToken> = None;

    for token in tokens.iter().filter(|token| !token.text.is_empty()) {
        if let Some(prev) = previous {
            if prev.page != token.page || (token.y - prev.y).abs() > LINE_BREAK_THRESHOLD {
                output.push('\n');
            } else {
                let gap = token.x - (prev.x + prev.width);
                let average = (average_char_width(prev) + average_char_width(token)) / 2.0;
                let already_spaced = output.ends_with(char::is_whitespace)
                    || token.text.starts_with(char::is_whitespace);

                if gap > average / 2.0 && !already_spaced {
                    output.push(' ');
                }
            }
        }

        output.push_str(&token.text);
        previous = Some(token);
    }

    output
}

fn average_char_width(token: &PositionedTextToken) -> f32 {
    let count = token.text.chars().count();
    if count == 0 {
        0.0
    } else {
        token.width / count as f32
    }
}

fn page_tokens(
    document: &Document,
    page_no: u32,
    page_id: ObjectId,
) -> Result<Vec<PositionedTextToken>, String> {
    let raw = document
        .get_page_content(page_id)
        .map_err(|error| error.to_string())?;
    let content = Content::decode(&raw).map_err(|error| error.to_string())?;

    let encodings = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding()))
        .collect::<BTreeMap<Vec<u8>, &str>>();

    let mut state = TextState::new(&encodings);
    let mut tokens = Vec::new();
    for operation in &content.operations {
        if let Some(token) = state.apply(operation, page_no) {
            tokens.push(token);
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
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

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        let values = operands.iter().filter_map(number).collect::<Vec<_>>();
        match values.as_slice() {
            &[a, b, c, d, e, f] => Some(Matrix { a, b, c, d, e, f }),
            _ => None,
        }
    }

    fn translated(self, tx: f32, ty: f32) -> Matrix {
        Matrix {
            e: self.e + tx * self.a + ty * self.c,
            f: self.f + tx * self.b + ty * self.d,
            ..self
        }
    }

    /// `self × other` in PDF row-vector order: `self` applies first.
    fn then(self, other: Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn horizontal_scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// The parts of the graphics state that `q` and `Q` save and restore.
#[derive(Debug, Clone, Copy)]
struct GraphicsState<'a> {
    ctm: Matrix,
    font_size: f32,
    leading: f32,
    encoding: Option<&'a str>,
}

struct TextState<'a> {
    text: Matrix,
    line: Matrix,
    graphics: GraphicsState<'a>,
    saved: Vec<GraphicsState<'a>>,
    encodings: &'a BTreeMap<Vec<u8>, &'a str>,
}

impl<'a> TextState<'a> {
    fn new(encodings: &'a BTreeMap<Vec<u8>, &'a str>) -> Self {
        Self {
            text: Matrix::IDENTITY,
            line: Matrix::IDENTITY,
            graphics: GraphicsState {
                ctm: Matrix::IDENTITY,
                font_size: 12.0,
                leading: 0.0,
                encoding: None,
            },
            saved: Vec::new(),
            encodings,
        }
    }

    fn apply(&mut self, operation: &Operation, page: u32) -> Option<PositionedTextToken> {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "q" => {
                self.saved.push(self.graphics);
                None
            }
            "Q" => {
                if let Some(graphics) = self.saved.pop() {
                    self.graphics = graphics;
                }
                None
            }
            "cm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    self.graphics.ctm = matrix.then(self.graphics.ctm);
                }
                None
            }
            "BT" => {
                self.text = Matrix::IDENTITY;
                self.line = Matrix::IDENTITY;
                None
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.graphics.encoding = self.encodings.get(name).copied();
                }
                if let Some(size) = operands.get(1).and_then(number) {
                    self.graphics.font_size = size.abs();
                }
                None
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    self.graphics.leading = leading;
                }
                None
            }
            "Tm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    self.line = matrix;
                    self.text = matrix;
                }
                None
            }
            "Td" | "TD" => {
                let tx = operands.first().and_then(number).unwrap_or(0.0);
                let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                if operation.operator == "TD" {
                    self.graphics.leading = -ty;
                }
                self.move_line(tx, ty);
                None
            }
            "T*" => {
                self.next_line();
                None
            }
            "Tj" => operands.first().and_then(|text| self.show(&[text.clone()], page)),
            "TJ" => match operands.first() {
                Some(Object::Array(items)) => self.show(items, page),
                _ => None,
            },
            "'" => {
                self.next_line();
                operands.first().and_then(|text| self.show(&[text.clone()], page))
            }
            "\"" => {
                self.next_line();
                operands.get(2).and_then(|text| self.show(&[text.clone()], page))
            }
            _ => None,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line = self.line.translated(tx, ty);
        self.text = self.line;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.graphics.leading);
    }

    fn show(&mut self, items: &[Object], page: u32) -> Option<PositionedTextToken> {
        let font_size = self.graphics.font_size;
        let glyph_width = font_size * APPROX_CHAR_WIDTH_RATIO;
        let mut text = String::new();
        let mut advance = 0.0f32;

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let piece = decode_pdf_string(self.graphics.encoding, bytes);
                    advance += piece.chars().count() as f32 * glyph_width;
                    text.push_str(&piece);
                }
                other => {
                    if let Some(adjustment) = number(other) {
                        let shift = -adjustment / 1000.0 * font_size;
                        if shift > font_size * TJ_WORD_GAP_EM && !text.ends_with(' ') {
                            text.push(' ');
                        }
                        advance += shift;
                    }
                }
            }
        }

        let rendering = self.text.then(self.graphics.ctm);
        self.text = self.text.translated(advance, 0.0);

        if text.trim().is_empty() {
            return None;
        }

        Some(PositionedTextToken {
            text,
            x: rendering.e,
            y: rendering.f,
            width: advance.max(0.0) * rendering.horizontal_scale(),
            page,
        })
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

/// Decodes a string operand through the current font's simple encoding.
/// UTF-16BE strings with a byte order mark and composite (`Identity-*`)
/// fonts are handled here. Control characters are dropped.
fn decode_pdf_string(encoding: Option<&str>, bytes: &[u8]) -> String {
    let decoded = if bytes.starts_with(&[0xFE, 0xFF]) {
        let units = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        String::from_utf16_lossy(&units)
    } else if encoding.is_some_and(|name| name.starts_with("Identity-")) {
        bytes.iter().map(|byte| *byte as char).collect()
    } else {
        Document::decode_text(encoding, bytes)
    };

    decoded.chars().filter(|ch| !ch.is_control()).collect()
}
