//! PDF output for laid-out reports
//!
//! Pages are drawn with the standard Helvetica fonts, so no font program is
//! embedded. Photos are embedded as baseline JPEG (`DCTDecode`) images;
//! anything else is re-encoded first.

use crate::layout::{line_height, text_width, Align, Color, Element, TableCell, TextStyle, MM_PER_PT};
use crate::resizer::encode_jpeg;
use crate::{Document, InventoryError, Photo};
use image::{ColorType, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream};
use tracing::{debug, warn};

const PT_PER_MM: f64 = 72.0 / 25.4;
const EMBED_QUALITY: u8 = 90;
const GRID: Color = Color(200, 200, 200);
const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

fn real(value: f64) -> Object {
    Object::Real(value as _)
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

/// Single-byte WinAnsi text; characters outside Latin-1 become `?`.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
        .collect()
}

struct PageCanvas {
    height_mm: f64,
    operations: Vec<Operation>,
    images: Vec<(String, ObjectId)>,
}

impl PageCanvas {
    fn new(height_mm: f64) -> Self {
        Self {
            height_mm,
            operations: Vec::new(),
            images: Vec::new(),
        }
    }

    fn op(&mut self, operator: &str, operands: Vec<Object>) {
        self.operations.push(Operation::new(operator, operands));
    }

    fn x(&self, mm: f64) -> Object {
        real(mm * PT_PER_MM)
    }

    fn y(&self, mm: f64) -> Object {
        real((self.height_mm - mm) * PT_PER_MM)
    }

    fn fill_color(&mut self, color: Color) {
        let Color(r, g, b) = color;
        self.op("rg", vec![real(r as f64 / 255.0), real(g as f64 / 255.0), real(b as f64 / 255.0)]);
    }

    fn stroke_color(&mut self, color: Color) {
        let Color(r, g, b) = color;
        self.op("RG", vec![real(r as f64 / 255.0), real(g as f64 / 255.0), real(b as f64 / 255.0)]);
    }

    /// Rectangle with its top-left corner at `(x, y)` mm.
    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64, fill: Option<Color>, stroke: Option<Color>) {
        let operands = vec![
            self.x(x),
            self.y(y + height),
            real(width * PT_PER_MM),
            real(height * PT_PER_MM),
        ];
        match (fill, stroke) {
            (Some(fill), Some(stroke)) => {
                self.fill_color(fill);
                self.stroke_color(stroke);
                self.op("re", operands);
                self.op("B", vec![]);
            }
            (Some(fill), None) => {
                self.fill_color(fill);
                self.op("re", operands);
                self.op("f", vec![]);
            }
            (None, Some(stroke)) => {
                self.stroke_color(stroke);
                self.op("re", operands);
                self.op("S", vec![]);
            }
            (None, None) => {}
        }
    }

    fn text(&mut self, x: f64, baseline: f64, text: &str, style: &TextStyle) {
        let x = match style.align {
            Align::Left => x,
            Align::Center => x - text_width(text, style.size) / 2.0,
        };
        let font = if style.bold { BOLD_FONT } else { REGULAR_FONT };

        self.op("BT", vec![]);
        self.op("Tf", vec![name(font), real(style.size)]);
        self.fill_color(style.color);
        let (px, py) = (self.x(x), self.y(baseline));
        self.op("Td", vec![px, py]);
        self.op("Tj", vec![Object::string_literal(encode_text(text))]);
        self.op("ET", vec![]);
    }

    fn table_row(&mut self, y: f64, height: f64, fill: Option<Color>, style: &TextStyle, padding: f64, cells: &[TableCell]) {
        self.op("w", vec![real(0.1 * PT_PER_MM)]);
        let ascent = style.size * MM_PER_PT * 0.8;
        for cell in cells {
            self.rect(cell.x, y, cell.width, height, fill, Some(GRID));
            for (i, line) in cell.lines.iter().enumerate() {
                let baseline = y + padding + ascent + i as f64 * line_height(style.size);
                self.text(cell.x + padding, baseline, line, style);
            }
        }
    }

    fn image(&mut self, x: f64, y: f64, width: f64, height: f64, image_id: ObjectId) {
        let key = format!("Im{}", self.images.len() + 1);
        let matrix = vec![
            real(width * PT_PER_MM),
            real(0.0),
            real(0.0),
            real(height * PT_PER_MM),
            self.x(x),
            self.y(y + height),
        ];
        self.op("q", vec![]);
        self.op("cm", matrix);
        self.op("Do", vec![name(&key)]);
        self.op("Q", vec![]);
        self.images.push((key, image_id));
    }
}

/// JPEG bytes and pixel size of `photo`, re-encoding when it is not an RGB
/// JPEG already.
fn embeddable_jpeg(photo: &Photo) -> Result<(Vec<u8>, u32, u32), InventoryError> {
    let decoded = image::load_from_memory(photo.as_bytes())?;
    let (width, height) = (decoded.width(), decoded.height());

    if photo.format() == Some(ImageFormat::Jpeg) && decoded.color() == ColorType::Rgb8 {
        return Ok((photo.as_bytes().to_vec(), width, height));
    }
    Ok((encode_jpeg(&decoded, EMBED_QUALITY)?, width, height))
}

fn add_image(pdf: &mut lopdf::Document, photo: &Photo) -> Result<ObjectId, InventoryError> {
    let (bytes, width, height) = embeddable_jpeg(photo)?;
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(width as i64),
            "Height" => Object::Integer(height as i64),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => "DCTDecode",
        },
        bytes,
    )
    .with_compression(false);
    Ok(pdf.add_object(stream))
}

/// Renders `document` to PDF bytes.
pub fn render_pdf(document: &Document) -> Result<Vec<u8>, InventoryError> {
    let geometry = &document.geometry;
    let mut pdf = lopdf::Document::with_version("1.5");
    let pages_id = pdf.new_object_id();

    let regular_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        let mut canvas = PageCanvas::new(geometry.height);

        for element in &page.elements {
            match element {
                Element::Text { x, y, text, style } => canvas.text(*x, *y, text, style),
                Element::TableRow {
                    y,
                    height,
                    fill,
                    style,
                    padding,
                    cells,
                    ..
                } => canvas.table_row(*y, *height, *fill, style, *padding, cells),
                Element::Photo {
                    x,
                    y,
                    width,
                    height,
                    record_id,
                    index,
                    photo,
                    ..
                } => match add_image(&mut pdf, photo) {
                    Ok(image_id) => canvas.image(*x, *y, *width, *height, image_id),
                    Err(e) => {
                        warn!("Skipping photo {} of equipment {}: {}", index, record_id, e);
                        let style = TextStyle::regular(8.0).colored(Color::ERROR);
                        canvas.text(*x, *y + geometry.photo_cell / 2.0, "Invalid photo", &style);
                    }
                },
                Element::PhotoError { x, y, size, message, .. } => {
                    canvas.rect(*x, *y, *size, *size, None, Some(GRID));
                    let style = TextStyle::regular(8.0).colored(Color::ERROR);
                    canvas.text(*x, *y + *size / 2.0, message, &style);
                }
            }
        }

        let mut xobjects = Dictionary::new();
        for (key, id) in &canvas.images {
            xobjects.set(key.as_bytes().to_vec(), Object::Reference(*id));
        }
        let resources = dictionary! {
            "Font" => dictionary! {
                REGULAR_FONT => regular_id,
                BOLD_FONT => bold_id,
            },
            "XObject" => xobjects,
        };

        let content = Content {
            operations: canvas.operations,
        };
        let encoded = content
            .encode()
            .map_err(|e| InventoryError::RenderFailed(e.to_string()))?;
        let content_id = pdf.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(Object::Reference(page_id));
    }

    let page_count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_count),
            "MediaBox" => vec![
                real(0.0),
                real(0.0),
                real(geometry.width * PT_PER_MM),
                real(geometry.height * PT_PER_MM),
            ],
        }),
    );

    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = pdf.add_object(dictionary! {
        "Title" => Object::string_literal(encode_text(&document.title)),
        "Producer" => Object::string_literal("equipment-checklist"),
        "CreationDate" => Object::string_literal(document.generated_at.format("D:%Y%m%d%H%M%S").to_string()),
    });
    pdf.trailer.set("Root", catalog_id);
    pdf.trailer.set("Info", info_id);
    pdf.compress();

    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes)
        .map_err(|e| InventoryError::RenderFailed(e.to_string()))?;
    debug!("Rendered {} pages into {} bytes", page_count, bytes.len());
    Ok(bytes)
}
