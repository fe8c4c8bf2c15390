//! Page layout recovered from PDF content streams.
//!
//! [`PdfLayout::load`] walks every page's content stream with `lopdf`, tracking
//! the graphics and text matrices, and records positioned text runs and the
//! placement of every image XObject (including images nested in form
//! XObjects). Glyph widths are estimated from the font size, so run boxes are
//! approximate but deterministic. Strings are decoded through the font's
//! `/ToUnicode` CMap when it has one.

use crate::cmap::ToUnicodeMap;
use crate::error::{IngestError, Result};
use crate::geometry::BBox;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Average glyph advance as a fraction of the font size.
const GLYPH_WIDTH: f32 = 0.5;
const ASCENT: f32 = 0.8;
const DESCENT: f32 = 0.2;
const MAX_FORM_DEPTH: usize = 8;
const MAX_PARENT_DEPTH: usize = 32;
/// Tail of the marker `lopdf` writes for text it cannot decode,
/// e.g. `?Identity-H Unimplemented?`.
const PLACEHOLDER_SUFFIX: &str = " Unimplemented?";
const DEFAULT_PAGE: BBox = BBox {
    x1: 0.0,
    y1: 0.0,
    x2: 612.0,
    y2: 792.0,
};

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub bbox: BBox,
    pub font_size: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorModel>, palette: Vec<u8> },
}

impl ColorModel {
    pub fn components(&self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
            ColorModel::Indexed { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    /// A complete encoded image file (JPEG from `DCTDecode`).
    Encoded(Vec<u8>),
    /// Decompressed sample rows as stored in the PDF.
    Samples {
        width: u32,
        height: u32,
        bits_per_component: u8,
        color: ColorModel,
        data: Vec<u8>,
    },
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub name: String,
    pub bbox: BBox,
    pub data: ImageData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// Zero-based page index.
    pub index: u32,
    pub width: f32,
    pub height: f32,
    pub runs: Vec<TextRun>,
    pub images: Vec<PlacedImage>,
    /// Plain page text from `lopdf`, set when it holds more text than the
    /// positioned runs (no runs at all, or glyphs without a unicode mapping).
    /// Replaces the runs for segmentation.
    pub fallback_text: Option<String>,
    /// Glyphs drawn in a font whose codes could not be mapped to text.
    pub undecoded_glyphs: usize,
}

impl PageLayout {
    pub fn bounds(&self) -> BBox {
        BBox {
            x1: 0.0,
            y1: 0.0,
            x2: self.width,
            y2: self.height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdfLayout {
    pub path: PathBuf,
    pub pages: Vec<PageLayout>,
}

impl PdfLayout {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::NotFound(path.display().to_string()));
        }
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        Ok(Self::from_document(&document, path))
    }

    pub fn load_mem(bytes: &[u8], path: &Path) -> Result<Self> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        Ok(Self::from_document(&document, path))
    }

    pub fn from_document(document: &Document, path: &Path) -> Self {
        let mut pages = Vec::new();

        for (page_no, page_id) in document.get_pages() {
            let index = page_no.saturating_sub(1);
            let Ok(page) = document.get_dictionary(page_id) else {
                warn!(path = %path.display(), page = index, "page dictionary unreadable");
                continue;
            };

            let media = inherited(document, page, b"MediaBox")
                .and_then(|object| rectangle(document, object))
                .unwrap_or(DEFAULT_PAGE);
            let resources = inherited(document, page, b"Resources").and_then(|object| object.as_dict().ok());

            let mut interpreter = Interpreter::new(document, media);
            match document.get_page_content(page_id) {
                Ok(content) => interpreter.run(&content, resources, GraphicsState::default(), 0),
                Err(error) => {
                    warn!(path = %path.display(), page = index, %error, "page content unreadable")
                }
            }

            if interpreter.undecoded > 0 {
                warn!(
                    path = %path.display(),
                    page = index,
                    glyphs = interpreter.undecoded,
                    "glyphs without a unicode mapping"
                );
            }
            let positioned: usize = interpreter.runs.iter().map(|run| visible_chars(&run.text)).sum();
            let fallback_text = if interpreter.runs.is_empty() || interpreter.undecoded > 0 {
                document
                    .extract_text(&[page_no])
                    .ok()
                    .map(|text| strip_placeholders(&text))
                    .filter(|text| visible_chars(text) > positioned)
            } else {
                None
            };

            pages.push(PageLayout {
                index,
                width: media.width(),
                height: media.height(),
                runs: interpreter.runs,
                images: interpreter.images,
                fallback_text,
                undecoded_glyphs: interpreter.undecoded,
            });
        }

        Self {
            path: path.to_path_buf(),
            pages,
        }
    }

    /// File name without extension, used to name figure artifacts.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn page(&self, index: u32) -> Option<&PageLayout> {
        self.pages.iter().find(|page| page.index == index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn translate(tx: f32, ty: f32) -> Matrix {
        Matrix {
            e: tx,
            f: ty,
            ..Matrix::IDENTITY
        }
    }

    /// `self × other` in PDF row-vector convention: apply `self`, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() < 6 {
            return None;
        }
        Some(Matrix {
            a: number(&operands[0])?,
            b: number(&operands[1])?,
            c: number(&operands[2])?,
            d: number(&operands[3])?,
            e: number(&operands[4])?,
            f: number(&operands[5])?,
        })
    }

    fn vertical_scale(&self) -> f32 {
        self.c.hypot(self.d)
    }
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    font_size: f32,
    leading: f32,
    /// Index into [`Interpreter::fonts`].
    font: Option<usize>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            font_size: 12.0,
            leading: 0.0,
            font: None,
        }
    }
}

/// Text of one shown string.
#[derive(Debug, Clone, PartialEq)]
struct Decoded {
    text: String,
    glyphs: usize,
    missing: usize,
}

impl Decoded {
    fn plain(bytes: &[u8]) -> Self {
        let text = decode_pdf_string(bytes);
        let glyphs = text.chars().count();
        Self {
            text,
            glyphs,
            missing: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct FontDecoder {
    /// Type0 fonts show two-byte codes unless their CMap says otherwise.
    composite: bool,
    to_unicode: Option<ToUnicodeMap>,
}

impl FontDecoder {
    fn from_dict(document: &Document, font: &Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .ok()
            .and_then(|subtype| subtype.as_name().ok())
            .is_some_and(|subtype| subtype == b"Type0");
        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|object| resolve(document, object))
            .and_then(|object| object.as_stream().ok())
            .and_then(stream_bytes)
            .map(|bytes| ToUnicodeMap::parse(&bytes))
            .filter(|map| !map.is_empty());
        Self {
            composite,
            to_unicode,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Decoded {
        let width = if self.composite { 2 } else { 1 };
        match (&self.to_unicode, self.composite) {
            (Some(map), _) => {
                let codes = map.codes(bytes, width);
                let mut text = String::new();
                let mut missing = 0;
                for code in &codes {
                    match map.lookup(code) {
                        Some(mapped) => text.push_str(&mapped),
                        None if !self.composite => text.push_str(&decode_pdf_string(code)),
                        None => missing += 1,
                    }
                }
                Decoded {
                    text,
                    glyphs: codes.len(),
                    missing,
                }
            }
            (None, true) => {
                let glyphs = (bytes.len() + 1) / 2;
                Decoded {
                    text: String::new(),
                    glyphs,
                    missing: glyphs,
                }
            }
            (None, false) => Decoded::plain(bytes),
        }
    }
}

struct Interpreter<'a> {
    document: &'a Document,
    media: BBox,
    runs: Vec<TextRun>,
    images: Vec<PlacedImage>,
    fonts: Vec<FontDecoder>,
    font_ids: BTreeMap<ObjectId, usize>,
    undecoded: usize,
}

impl<'a> Interpreter<'a> {
    fn new(document: &'a Document, media: BBox) -> Self {
        Self {
            document,
            media,
            runs: Vec::new(),
            images: Vec::new(),
            fonts: Vec::new(),
            font_ids: BTreeMap::new(),
            undecoded: 0,
        }
    }

    fn run(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        initial: GraphicsState,
        depth: usize,
    ) {
        let operations = match Content::decode(content) {
            Ok(content) => content.operations,
            Err(error) => {
                warn!(%error, "content stream could not be decoded");
                return;
            }
        };

        let mut state = initial;
        let mut saved = Vec::new();
        let mut text_matrix = Matrix::IDENTITY;
        let mut line_matrix = Matrix::IDENTITY;

        for operation in operations {
            let operands = operation.operands.as_slice();
            match operation.operator.as_str() {
                "q" => saved.push(state),
                "Q" => {
                    if let Some(previous) = saved.pop() {
                        state = previous;
                    }
                }
                "cm" => {
                    if let Some(matrix) = Matrix::from_operands(operands) {
                        state.ctm = matrix.then(&state.ctm);
                    }
                }
                "BT" => {
                    text_matrix = Matrix::IDENTITY;
                    line_matrix = Matrix::IDENTITY;
                }
                "Tf" => {
                    if let Some(size) = operands.get(1).and_then(number) {
                        state.font_size = size;
                    }
                    state.font = operands
                        .first()
                        .and_then(|name| name.as_name().ok())
                        .and_then(|name| self.load_font(resources, name));
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(number) {
                        state.leading = leading;
                    }
                }
                "Td" | "TD" => {
                    let tx = operands.first().and_then(number).unwrap_or(0.0);
                    let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                    if operation.operator == "TD" {
                        state.leading = -ty;
                    }
                    line_matrix = Matrix::translate(tx, ty).then(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tm" => {
                    if let Some(matrix) = Matrix::from_operands(operands) {
                        line_matrix = matrix;
                        text_matrix = matrix;
                    }
                }
                "T*" => {
                    line_matrix = Matrix::translate(0.0, -state.leading).then(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tj" => self.show(&state, &mut text_matrix, operands.get(..1).unwrap_or(&[])),
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        self.show(&state, &mut text_matrix, items);
                    }
                }
                "'" | "\"" => {
                    line_matrix = Matrix::translate(0.0, -state.leading).then(&line_matrix);
                    text_matrix = line_matrix;
                    let shown = if operation.operator == "'" { 0 } else { 2 };
                    if let Some(item) = operands.get(shown) {
                        self.show(&state, &mut text_matrix, std::slice::from_ref(item));
                    }
                }
                "Do" => {
                    if let Some(name) = operands.first().and_then(|name| name.as_name().ok()) {
                        self.draw_xobject(name, resources, &state, depth);
                    }
                }
                _ => {}
            }
        }
    }

    fn show(&mut self, state: &GraphicsState, text_matrix: &mut Matrix, items: &[Object]) {
        let size = state.font_size;
        let mut text = String::new();
        let mut advance = 0.0f32;

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let decoded = match state.font.and_then(|index| self.fonts.get(index)) {
                        Some(font) => font.decode(bytes),
                        None => Decoded::plain(bytes),
                    };
                    advance += decoded.glyphs as f32 * GLYPH_WIDTH * size;
                    self.undecoded += decoded.missing;
                    text.push_str(&decoded.text);
                }
                other => {
                    if let Some(adjustment) = number(other) {
                        advance -= adjustment / 1000.0 * size;
                        // Large negative kerning is how many producers encode a word gap.
                        if adjustment < -250.0 && !text.ends_with(' ') {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        if !text.trim().is_empty() {
            let rendering = text_matrix.then(&state.ctm);
            let corners = [
                rendering.apply(0.0, -DESCENT * size),
                rendering.apply(advance.max(0.0), -DESCENT * size),
                rendering.apply(0.0, ASCENT * size),
                rendering.apply(advance.max(0.0), ASCENT * size),
            ];
            let scale = rendering.vertical_scale();
            self.runs.push(TextRun {
                text: text.trim().to_string(),
                bbox: self.to_page_space(&corners),
                font_size: if scale > 0.0 { size * scale } else { size },
            });
        }

        *text_matrix = Matrix::translate(advance, 0.0).then(text_matrix);
    }

    fn draw_xobject(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        state: &GraphicsState,
        depth: usize,
    ) {
        let Some(stream) = resources
            .and_then(|resources| resources.get(b"XObject").ok())
            .and_then(|object| resolve(self.document, object))
            .and_then(|object| object.as_dict().ok())
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|object| resolve(self.document, object))
            .and_then(|object| object.as_stream().ok())
        else {
            debug!(name = %String::from_utf8_lossy(name), "xobject not found");
            return;
        };

        match stream.dict.get(b"Subtype").and_then(|subtype| subtype.as_name()).ok() {
            Some(b"Image") => {
                let corners = [
                    state.ctm.apply(0.0, 0.0),
                    state.ctm.apply(1.0, 0.0),
                    state.ctm.apply(0.0, 1.0),
                    state.ctm.apply(1.0, 1.0),
                ];
                self.images.push(PlacedImage {
                    name: String::from_utf8_lossy(name).to_string(),
                    bbox: self.to_page_space(&corners),
                    data: image_data(self.document, stream),
                });
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                let Some(content) = stream_bytes(stream) else {
                    return;
                };
                let form_matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|object| resolve(self.document, object))
                    .and_then(|object| object.as_array().ok())
                    .and_then(|operands| Matrix::from_operands(operands))
                    .unwrap_or(Matrix::IDENTITY);
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|object| resolve(self.document, object))
                    .and_then(|object| object.as_dict().ok())
                    .or(resources);

                let mut nested = *state;
                nested.ctm = form_matrix.then(&state.ctm);
                self.run(&content, form_resources, nested, depth + 1);
            }
            _ => {}
        }
    }

    fn load_font(&mut self, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<usize> {
        let entry = resources?
            .get(b"Font")
            .ok()
            .and_then(|object| resolve(self.document, object))
            .and_then(|object| object.as_dict().ok())?
            .get(name)
            .ok()?;
        let id = entry.as_reference().ok();
        if let Some(index) = id.and_then(|id| self.font_ids.get(&id)) {
            return Some(*index);
        }

        let font = resolve(self.document, entry)?.as_dict().ok()?;
        self.fonts.push(FontDecoder::from_dict(self.document, font));
        let index = self.fonts.len() - 1;
        if let Some(id) = id {
            self.font_ids.insert(id, index);
        }
        Some(index)
    }

    /// Maps user-space points to top-left page coordinates.
    fn to_page_space(&self, corners: &[(f32, f32)]) -> BBox {
        let mut bbox = BBox {
            x1: f32::INFINITY,
            y1: f32::INFINITY,
            x2: f32::NEG_INFINITY,
            y2: f32::NEG_INFINITY,
        };
        for (x, y) in corners {
            let page_x = x - self.media.x1;
            let page_y = self.media.y2 - y;
            bbox.x1 = bbox.x1.min(page_x);
            bbox.y1 = bbox.y1.min(page_y);
            bbox.x2 = bbox.x2.max(page_x);
            bbox.y2 = bbox.y2.max(page_y);
        }
        bbox
    }
}

fn image_data(document: &Document, stream: &Stream) -> ImageData {
    let dict = &stream.dict;
    if dict
        .get(b"ImageMask")
        .ok()
        .and_then(|value| value.as_bool().ok())
        .unwrap_or(false)
    {
        return ImageData::Unsupported("stencil mask".to_string());
    }

    let filters = filter_names(document, dict);
    if filters.len() == 1 && filters[0] == b"DCTDecode" {
        return ImageData::Encoded(stream.content.clone());
    }
    if let Some(filter) = filters
        .iter()
        .find(|filter| !matches!(filter.as_slice(), b"FlateDecode" | b"LZWDecode"))
    {
        return ImageData::Unsupported(format!(
            "filter {}",
            String::from_utf8_lossy(filter)
        ));
    }

    let Some(data) = stream_bytes(stream) else {
        return ImageData::Unsupported("undecodable stream".to_string());
    };
    let dimension = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|object| resolve(document, object))
            .and_then(number)
            .map(|value| value.max(0.0) as u32)
    };
    let (Some(width), Some(height)) = (dimension(b"Width"), dimension(b"Height")) else {
        return ImageData::Unsupported("missing dimensions".to_string());
    };
    let bits_per_component = dimension(b"BitsPerComponent").unwrap_or(8) as u8;
    let Some(color) = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|object| color_model(document, object))
    else {
        return ImageData::Unsupported("color space".to_string());
    };

    ImageData::Samples {
        width,
        height,
        bits_per_component,
        color,
        data,
    }
}

fn color_model(document: &Document, object: &Object) -> Option<ColorModel> {
    match resolve(document, object)? {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(ColorModel::Cmyk),
            _ => None,
        },
        Object::Array(items) => {
            let family = items.first()?.as_name().ok()?;
            match family {
                b"ICCBased" => {
                    let profile = resolve(document, items.get(1)?)?.as_stream().ok()?;
                    match profile.dict.get(b"N").ok().and_then(number)? as u32 {
                        1 => Some(ColorModel::Gray),
                        3 => Some(ColorModel::Rgb),
                        4 => Some(ColorModel::Cmyk),
                        _ => None,
                    }
                }
                b"Indexed" | b"I" => {
                    let base = color_model(document, items.get(1)?)?;
                    let palette = match resolve(document, items.get(3)?)? {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(stream) => stream_bytes(stream)?,
                        _ => return None,
                    };
                    Some(ColorModel::Indexed {
                        base: Box::new(base),
                        palette,
                    })
                }
                b"CalGray" => Some(ColorModel::Gray),
                b"CalRGB" | b"Lab" => Some(ColorModel::Rgb),
                _ => None,
            }
        }
        _ => None,
    }
}

fn filter_names(document: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").ok().and_then(|object| resolve(document, object)) {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(|name| name.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn inherited<'a>(document: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(value) = current.get(key) {
            return resolve(document, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = document.get_dictionary(parent).ok()?;
    }
    None
}

fn rectangle(document: &Document, object: &Object) -> Option<BBox> {
    let values = object
        .as_array()
        .ok()?
        .iter()
        .map(|value| resolve(document, value).and_then(number))
        .collect::<Option<Vec<_>>>()?;
    match values.as_slice() {
        [x1, y1, x2, y2] => Some(BBox::from_corners(*x1, *y1, *x2, *y2)),
        _ => None,
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn visible_chars(text: &str) -> usize {
    text.chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_control())
        .count()
}

/// Removes `lopdf`'s markers for undecodable text and stray control
/// characters.
fn strip_placeholders(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(end) = rest.find(PLACEHOLDER_SUFFIX) {
        let start = rest[..end].rfind('?').unwrap_or(end);
        cleaned.push_str(&rest[..start]);
        rest = &rest[end + PLACEHOLDER_SUFFIX.len()..];
    }
    cleaned.push_str(rest);
    cleaned
        .chars()
        .filter(|ch| !ch.is_control() || ch.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Decodes a PDF text string: UTF-16BE when it carries a byte-order mark,
/// otherwise one character per byte.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        return String::from_utf16_lossy(&units)
            .chars()
            .filter(|ch| !ch.is_control())
            .collect();
    }

    bytes
        .iter()
        .map(|&byte| byte as char)
        .filter(|ch| !ch.is_control() || *ch == ' ')
        .collect()
}
