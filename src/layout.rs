//! Page-aware document model
//!
//! Reports are laid out into positioned elements on fixed-size pages before
//! anything is rendered. All coordinates are millimetres from the top-left
//! corner of the page; text `y` is the baseline.

use crate::{PageGeometry, Photo};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// Millimetres per typographic point
pub const MM_PER_PT: f64 = 0.3528;

const AVG_CHAR_EM: f64 = 0.45;
const LINE_SPACING: f64 = 1.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const BLACK: Color = Color(0, 0, 0);
    pub const TEXT: Color = Color(50, 50, 50);
    pub const WHITE: Color = Color(255, 255, 255);
    pub const HEADER: Color = Color(0, 80, 157);
    pub const STRIPE: Color = Color(230, 240, 255);
    pub const ERROR: Color = Color(255, 0, 0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Align {
    Left,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextStyle {
    /// Font size in points
    pub size: f64,
    pub bold: bool,
    pub color: Color,
    pub align: Align,
}

impl TextStyle {
    pub fn regular(size: f64) -> Self {
        Self {
            size,
            bold: false,
            color: Color::BLACK,
            align: Align::Left,
        }
    }

    pub fn bold(self) -> Self {
        Self { bold: true, ..self }
    }

    pub fn colored(self, color: Color) -> Self {
        Self { color, ..self }
    }

    pub fn centered(self) -> Self {
        Self {
            align: Align::Center,
            ..self
        }
    }
}

/// Approximate width of one character at `size` points, in mm.
pub fn char_width(size: f64) -> f64 {
    size * MM_PER_PT * AVG_CHAR_EM
}

/// Baseline-to-baseline distance at `size` points, in mm.
pub fn line_height(size: f64) -> f64 {
    size * MM_PER_PT * LINE_SPACING
}

pub fn text_width(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * char_width(size)
}

/// Breaks `text` into lines no wider than `width` mm at `size` points.
///
/// Breaks happen between words; a word longer than a full line is split.
/// Existing line breaks are kept. Always yields at least one line.
pub fn wrap_text(text: &str, width: f64, size: f64) -> Vec<String> {
    let max_chars = ((width / char_width(size)).floor() as usize).max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();

            let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
            if needed <= max_chars {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.extend(word.iter());
                current_len += word.len();
                continue;
            }

            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
            }
            while word.len() > max_chars {
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            current.extend(word.iter());
            current_len = word.len();
        }

        lines.push(current);
    }

    lines
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCell {
    pub x: f64,
    pub width: f64,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Element {
    Text {
        x: f64,
        y: f64,
        text: String,
        style: TextStyle,
    },
    TableRow {
        /// Top edge of the row
        y: f64,
        height: f64,
        header: bool,
        fill: Option<Color>,
        style: TextStyle,
        padding: f64,
        cells: Vec<TableCell>,
    },
    Photo {
        x: f64,
        y: f64,
        /// Drawn size, fitted inside the photo cell
        width: f64,
        height: f64,
        record_id: u64,
        index: usize,
        pixel_width: u32,
        pixel_height: u32,
        #[serde(skip)]
        photo: Photo,
    },
    /// Stands in for a photo that could not be decoded, same footprint
    PhotoError {
        x: f64,
        y: f64,
        size: f64,
        record_id: u64,
        index: usize,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// 1-based
    pub number: usize,
    pub elements: Vec<Element>,
}

impl Page {
    pub fn table_rows(&self) -> impl Iterator<Item = &Element> {
        self.elements
            .iter()
            .filter(|e| matches!(e, Element::TableRow { header: false, .. }))
    }
}

/// A laid-out report, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// File name without extension
    pub name: String,
    pub title: String,
    pub generated_at: DateTime<FixedOffset>,
    pub geometry: PageGeometry,
    /// Records included, in table order
    pub record_ids: Vec<u64>,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.name)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Body rows of the summary table across all pages
    pub fn table_row_count(&self) -> usize {
        self.pages.iter().map(|p| p.table_rows().count()).sum()
    }

    /// Every photo cell, decoded or not, as `(page number, element)`
    pub fn photo_cells(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.pages.iter().flat_map(|page| {
            page.elements
                .iter()
                .filter(|e| matches!(e, Element::Photo { .. } | Element::PhotoError { .. }))
                .map(move |e| (page.number, e))
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().flat_map(|p| p.elements.iter()).filter_map(|e| match e {
            Element::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Vertical cursor over a growing list of pages.
pub(crate) struct Flow {
    geometry: PageGeometry,
    pages: Vec<Page>,
    pub y: f64,
}

impl Flow {
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            y: geometry.title_y,
            pages: vec![Page {
                number: 1,
                elements: Vec::new(),
            }],
            geometry,
        }
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Whether `height` mm more still fit above the bottom margin.
    pub fn fits(&self, height: f64) -> bool {
        self.y + height <= self.geometry.content_bottom()
    }

    pub fn new_page(&mut self) {
        let number = self.pages.len() + 1;
        self.pages.push(Page {
            number,
            elements: Vec::new(),
        });
        self.y = self.geometry.continuation_top;
    }

    pub fn push(&mut self, element: Element) {
        if let Some(page) = self.pages.last_mut() {
            page.elements.push(element);
        }
    }

    pub fn into_pages(self) -> Vec<Page> {
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_short_text_is_one_line() {
        assert_eq!(wrap_text("Switch Cisco", 27.0, 8.0), vec!["Switch Cisco"]);
        assert_eq!(wrap_text("", 27.0, 8.0), vec![""]);
    }

    #[test]
    fn test_wrap_breaks_between_words() {
        // 8pt gives about 1.27 mm per char, so 12 mm holds 9 chars
        let lines = wrap_text("alpha beta gamma", 12.0, 8.0);
        assert_eq!(lines, vec!["alpha", "beta", "gamma"]);
        for line in &lines {
            assert!(text_width(line, 8.0) <= 12.0);
        }
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let lines = wrap_text("abcdefghijklmnop", 12.0, 8.0);
        assert_eq!(lines, vec!["abcdefghi", "jklmnop"]);
    }

    #[test]
    fn test_wrap_keeps_line_breaks() {
        assert_eq!(wrap_text("one\ntwo", 50.0, 8.0), vec!["one", "two"]);
    }

    #[test]
    fn test_flow_pages() {
        let mut flow = Flow::new(PageGeometry::default());
        assert_eq!(flow.y, 30.0);
        flow.y = 280.0;
        assert!(flow.fits(7.0));
        assert!(!flow.fits(7.5));

        flow.new_page();
        assert_eq!(flow.y, 20.0);
        let pages = flow.into_pages();
        assert_eq!(pages.iter().map(|p| p.number).collect::<Vec<_>>(), vec![1, 2]);
    }
}
