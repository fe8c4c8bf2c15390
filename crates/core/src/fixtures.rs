//! In-memory PDF builder for tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

/// Raw 8-bit RGB pixels.
#[derive(Debug, Clone)]
pub struct Pixels {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

pub fn checkerboard(width: u32, height: u32) -> Pixels {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = if (x + y) % 2 == 0 { 0 } else { 255 };
            rgb.extend_from_slice(&[value, value / 2, 255 - value]);
        }
    }
    Pixels { width, height, rgb }
}

pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Pixels {
    let rgb = (0..width * height).flat_map(|_| color).collect();
    Pixels { width, height, rgb }
}

#[derive(Debug, Clone)]
pub struct FixtureImage {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub pixels: Pixels,
}

impl FixtureImage {
    /// `x`/`y` are the lower-left corner in PDF user space.
    pub fn new(x: f32, y: f32, width: f32, height: f32, pixels: Pixels) -> Self {
        Self {
            x,
            y,
            width,
            height,
            pixels,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixturePage {
    pub lines: Vec<(f32, f32, f32, String)>,
    /// Lines drawn in an Identity-H Type0 font; the flag says whether the
    /// font carries a ToUnicode CMap.
    pub cid_lines: Vec<(f32, f32, f32, String, bool)>,
    pub images: Vec<FixtureImage>,
}

impl FixturePage {
    pub fn line(mut self, x: f32, y: f32, size: f32, text: &str) -> Self {
        self.lines.push((x, y, size, text.to_string()));
        self
    }

    /// A line in a composite font with a ToUnicode map, as office suites
    /// write CJK text.
    pub fn cid_line(mut self, x: f32, y: f32, size: f32, text: &str) -> Self {
        self.cid_lines.push((x, y, size, text.to_string(), true));
        self
    }

    /// A line in a composite font without any unicode mapping.
    pub fn unmapped_cid_line(mut self, x: f32, y: f32, size: f32, text: &str) -> Self {
        self.cid_lines.push((x, y, size, text.to_string(), false));
        self
    }

    pub fn image(mut self, image: FixtureImage) -> Self {
        self.images.push(image);
        self
    }
}

pub fn build_pdf(pages: &[FixturePage]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    // Glyph ids are 1-based positions in `glyphs`.
    let mut glyphs: Vec<char> = Vec::new();
    for page in pages {
        for ch in page.cid_lines.iter().flat_map(|line| line.3.chars()) {
            if !glyphs.contains(&ch) {
                glyphs.push(ch);
            }
        }
    }
    let glyph_code = |ch: char| {
        let id = glyphs.iter().position(|known| *known == ch).unwrap_or(0) + 1;
        (id as u16).to_be_bytes()
    };
    let cmap_id = document.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&glyphs)));
    let descendant = dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => "FixtureSans",
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
    };
    let mapped_font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "FixtureSans",
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Dictionary(descendant.clone())],
        "ToUnicode" => cmap_id,
    });
    let unmapped_font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "FixtureSans",
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Dictionary(descendant)],
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let mut operations = Vec::new();
        let mut xobjects = lopdf::Dictionary::new();

        for (x, y, size, text) in &page.lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), (*size).into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text.as_str())]));
            operations.push(Operation::new("ET", vec![]));
        }

        for (x, y, size, text, mapped) in &page.cid_lines {
            let font = if *mapped { "F2" } else { "F3" };
            let codes: Vec<u8> = text.chars().flat_map(glyph_code).collect();
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![font.into(), (*size).into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(codes, StringFormat::Hexadecimal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }

        for (index, image) in page.images.iter().enumerate() {
            let name = format!("Im{}", index + 1);
            let image_id = document.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => image.pixels.width as i64,
                    "Height" => image.pixels.height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                image.pixels.rgb.clone(),
            ));
            xobjects.set(name.as_bytes().to_vec(), image_id);

            operations.push(Operation::new("q", vec![]));
            operations.push(Operation::new(
                "cm",
                vec![
                    image.width.into(),
                    0.into(),
                    0.into(),
                    image.height.into(),
                    image.x.into(),
                    image.y.into(),
                ],
            ));
            operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
            operations.push(Operation::new("Q", vec![]));
        }

        let content = Content { operations };
        let content_id = document.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap_or_default(),
        ));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! {
                    "F1" => font_id,
                    "F2" => mapped_font_id,
                    "F3" => unmapped_font_id,
                },
                "XObject" => xobjects,
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .expect("in-memory pdf should serialize");
    bytes
}

fn to_unicode_cmap(glyphs: &[char]) -> Vec<u8> {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CMapName /Fixture-UCS def\n1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    cmap.push_str(&format!("{} beginbfchar\n", glyphs.len()));
    for (index, ch) in glyphs.iter().enumerate() {
        let mut units = [0u16; 2];
        let target: String = ch
            .encode_utf16(&mut units)
            .iter()
            .map(|unit| format!("{unit:04X}"))
            .collect();
        cmap.push_str(&format!("<{:04X}> <{target}>\n", index + 1));
    }
    cmap.push_str("endbfchar\nendcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap.into_bytes()
}
