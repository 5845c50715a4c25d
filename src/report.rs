//! Checklist report generation
//!
//! [`ReportEngine`] selects records by check date and location, then lays
//! them out as a paginated [`Document`]: a title block, a summary table
//! whose header repeats on every page, and a photo appendix.

use crate::layout::{line_height, text_width, wrap_text, Color, Element, Flow, TableCell, TextStyle};
use crate::{Document, EquipmentRecord, InventoryError, Metrics, ReportConfig, ReportRequest, Selection};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const TITLE_SIZE: f64 = 14.0;
const HEADING_SIZE: f64 = 10.0;
const BODY_SIZE: f64 = 8.0;
const HEADER_SIZE: f64 = 9.0;
const CELL_PADDING: f64 = 1.5;

/// Gap between the generation timestamp line and the next line
const AFTER_TIMESTAMP: f64 = 7.0;
const AFTER_FILTERS: f64 = 10.0;
const WITHOUT_FILTERS: f64 = 3.0;
const AFTER_TABLE: f64 = 10.0;
const CAPTION_GAP: f64 = 7.0;
const CAPTION_BLOCK: f64 = 15.0;
const AFTER_PHOTOS: f64 = 10.0;

/// Column labels and widths in mm; `None` takes the remaining width.
const COLUMNS: [(&str, Option<f64>); 8] = [
    ("Name", Some(30.0)),
    ("Type", Some(15.0)),
    ("Status", Some(18.0)),
    ("Location", Some(25.0)),
    ("Last Check", Some(22.0)),
    ("Verified", Some(15.0)),
    ("Notes", None),
    ("Photo", Some(20.0)),
];

const DATE_TIME_FORMAT: &str = "%d/%m/%Y %H:%M";
const DATE_FORMAT: &str = "%d/%m/%Y";

pub struct ReportEngine {
    config: ReportConfig,
    offset: FixedOffset,
    metrics: Arc<Metrics>,
}

impl ReportEngine {
    pub fn new(config: ReportConfig) -> Self {
        let offset = config.offset();
        Self {
            config,
            offset,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Records admitted by `request`, in input order.
    ///
    /// With a date bound set, a record needs a parsable `lastCheck` within
    /// `[start 00:00:00.000, end 23:59:59.999]` in the report offset.
    pub fn select<'a>(
        &self,
        records: &'a [EquipmentRecord],
        request: &ReportRequest,
    ) -> Result<Vec<&'a EquipmentRecord>, InventoryError> {
        if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
            if start > end {
                return Err(InventoryError::Validation(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }

        let start = request.start_date.and_then(|d| self.day_bound(d.and_hms_opt(0, 0, 0)));
        let end = request
            .end_date
            .and_then(|d| self.day_bound(d.and_hms_milli_opt(23, 59, 59, 999)));
        let bounded = start.is_some() || end.is_some();

        Ok(records
            .iter()
            .filter(|record| request.location.admits(&record.location))
            .filter(|record| {
                if !bounded {
                    return true;
                }
                let Some(checked_at) = record.last_check_at() else {
                    return false;
                };
                start.map_or(true, |s| checked_at >= s) && end.map_or(true, |e| checked_at <= e)
            })
            .collect())
    }

    pub fn generate(
        &self,
        records: &[EquipmentRecord],
        request: &ReportRequest,
    ) -> Result<Document, InventoryError> {
        self.generate_at(records, request, Utc::now())
    }

    /// Like [`generate`](Self::generate), stamped with `now` instead of the
    /// current time.
    pub fn generate_at(
        &self,
        records: &[EquipmentRecord],
        request: &ReportRequest,
        now: DateTime<Utc>,
    ) -> Result<Document, InventoryError> {
        let started = Instant::now();
        let selected = self.select(records, request)?;
        let generated_at = now.with_timezone(&self.offset);
        info!("Generating report for {} of {} records", selected.len(), records.len());

        let mut flow = Flow::new(self.config.page.clone());
        self.layout_heading(&mut flow, request, generated_at);
        self.layout_table(&mut flow, &selected);
        self.layout_photos(&mut flow, &selected);

        let document = Document {
            name: format!("{}_{}", self.config.file_prefix, generated_at.format("%Y%m%d_%H%M")),
            title: self.config.title.clone(),
            generated_at,
            geometry: self.config.page.clone(),
            record_ids: selected.iter().map(|r| r.id).collect(),
            pages: flow.into_pages(),
        };

        let elapsed = started.elapsed();
        self.metrics.record_report(elapsed);
        debug!("Laid out {} pages in {:?}", document.page_count(), elapsed);
        Ok(document)
    }

    fn day_bound(&self, local: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&local?)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn filter_summary(&self, request: &ReportRequest) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(start) = request.start_date {
            parts.push(format!("From: {}", start.format(DATE_FORMAT)));
        }
        if let Some(end) = request.end_date {
            parts.push(format!("To: {}", end.format(DATE_FORMAT)));
        }
        if let Selection::Only(location) = &request.location {
            parts.push(format!("Location: {location}"));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" | "))
        }
    }

    fn layout_heading(&self, flow: &mut Flow, request: &ReportRequest, generated_at: DateTime<FixedOffset>) {
        let geometry = flow.geometry().clone();
        let left = geometry.margin_left;

        flow.push(Element::Text {
            x: geometry.width / 2.0,
            y: flow.y,
            text: self.config.title.clone(),
            style: TextStyle::regular(TITLE_SIZE).bold().centered(),
        });
        flow.y += 15.0;

        let label = "Generated on: ";
        flow.push(Element::Text {
            x: left,
            y: flow.y,
            text: label.to_string(),
            style: TextStyle::regular(HEADING_SIZE).bold(),
        });
        flow.push(Element::Text {
            x: left + text_width(label, HEADING_SIZE),
            y: flow.y,
            text: generated_at.format(DATE_TIME_FORMAT).to_string(),
            style: TextStyle::regular(HEADING_SIZE),
        });
        flow.y += AFTER_TIMESTAMP;

        match self.filter_summary(request) {
            Some(summary) => {
                let label = "Filters: ";
                flow.push(Element::Text {
                    x: left,
                    y: flow.y,
                    text: label.to_string(),
                    style: TextStyle::regular(HEADING_SIZE).bold(),
                });
                flow.push(Element::Text {
                    x: left + text_width(label, HEADING_SIZE),
                    y: flow.y,
                    text: summary,
                    style: TextStyle::regular(HEADING_SIZE),
                });
                flow.y += AFTER_FILTERS;
            }
            None => flow.y += WITHOUT_FILTERS,
        }
    }

    fn column_layout(&self, content_width: f64, left: f64) -> Vec<(f64, f64)> {
        let fixed: f64 = COLUMNS.iter().filter_map(|(_, w)| *w).sum();
        let auto = (content_width - fixed).max(10.0);

        let mut x = left;
        COLUMNS
            .iter()
            .map(|(_, width)| {
                let width = width.unwrap_or(auto);
                let column = (x, width);
                x += width;
                column
            })
            .collect()
    }

    fn table_row(
        &self,
        columns: &[(f64, f64)],
        texts: &[String],
        y: f64,
        header: bool,
        fill: Option<Color>,
    ) -> Element {
        let style = if header {
            TextStyle::regular(HEADER_SIZE).bold().colored(Color::WHITE)
        } else {
            TextStyle::regular(BODY_SIZE).colored(Color::TEXT)
        };

        let cells: Vec<TableCell> = columns
            .iter()
            .zip(texts)
            .map(|(&(x, width), text)| TableCell {
                x,
                width,
                lines: wrap_text(text, width - 2.0 * CELL_PADDING, style.size),
            })
            .collect();

        row_element(cells, y, header, fill, style)
    }

    fn row_texts(&self, record: &EquipmentRecord) -> Vec<String> {
        let or_dash = |s: &str| {
            if s.trim().is_empty() {
                "-".to_string()
            } else {
                s.to_string()
            }
        };

        vec![
            record.name.clone(),
            or_dash(&record.kind),
            record.status.to_string(),
            record.location.clone(),
            record
                .last_check_at()
                .map(|at| at.with_timezone(&self.offset).format(DATE_TIME_FORMAT).to_string())
                .unwrap_or_else(|| "-".to_string()),
            "Yes".to_string(),
            or_dash(record.notes.as_deref().unwrap_or("")),
            if record.has_photos() { "Photo(s) included" } else { "No photo" }.to_string(),
        ]
    }

    fn layout_table(&self, flow: &mut Flow, records: &[&EquipmentRecord]) {
        let geometry = flow.geometry().clone();
        let columns = self.column_layout(geometry.content_width(), geometry.margin_left);
        let labels: Vec<String> = COLUMNS.iter().map(|(label, _)| label.to_string()).collect();

        let mut header = self.table_row(&columns, &labels, flow.y, true, Some(Color::HEADER));
        flow.y += row_height(&header);
        flow.push(header.clone());
        let page_room = geometry.content_bottom() - geometry.continuation_top - row_height(&header);

        for (i, record) in records.iter().enumerate() {
            let fill = if i % 2 == 1 { Some(Color::STRIPE) } else { None };
            let mut row = self.table_row(&columns, &self.row_texts(record), flow.y, false, fill);

            while !flow.fits(row_height(&row)) {
                // Rows that fit a fresh page move whole; taller ones are split across pages
                if row_height(&row) <= page_room {
                    break_table_page(flow, &mut header);
                    set_row_y(&mut row, flow.y);
                    break;
                }

                let room = geometry.content_bottom() - flow.y - 2.0 * CELL_PADDING;
                let lines = (room / line_height(BODY_SIZE)).floor();
                if lines >= 1.0 {
                    match split_row(&mut row, lines as usize) {
                        Some(rest) => {
                            flow.y += row_height(&row);
                            flow.push(std::mem::replace(&mut row, rest));
                        }
                        None => break,
                    }
                }
                break_table_page(flow, &mut header);
                set_row_y(&mut row, flow.y);
            }

            flow.y += row_height(&row);
            flow.push(row);
        }

        flow.y += AFTER_TABLE;
    }

    fn layout_photos(&self, flow: &mut Flow, records: &[&EquipmentRecord]) {
        let geometry = flow.geometry().clone();
        let cell = geometry.photo_cell;
        let step = cell + geometry.photo_spacing;
        let per_row = geometry.photos_per_row();
        let right_edge = geometry.width - geometry.margin_right;

        for record in records.iter().filter(|r| r.has_photos()) {
            if !flow.fits(CAPTION_BLOCK + step) {
                flow.new_page();
            }

            flow.push(Element::Text {
                x: geometry.margin_left,
                y: flow.y,
                text: format!("Photos of: {} ({})", record.name, record.location),
                style: TextStyle::regular(HEADING_SIZE).colored(Color::TEXT),
            });
            flow.y += CAPTION_GAP;

            let mut x = geometry.margin_left;
            for (index, photo) in record.photos.iter().enumerate() {
                if x + cell > right_edge || (index > 0 && index % per_row == 0) {
                    x = geometry.margin_left;
                    flow.y += step;
                    if !flow.fits(cell) {
                        flow.new_page();
                    }
                }

                let element = match image::load_from_memory(photo.as_bytes()) {
                    Ok(decoded) => {
                        let (pixel_width, pixel_height) = (decoded.width(), decoded.height());
                        let scale = (cell / pixel_width as f64).min(cell / pixel_height as f64);
                        Element::Photo {
                            x,
                            y: flow.y,
                            width: pixel_width as f64 * scale,
                            height: pixel_height as f64 * scale,
                            record_id: record.id,
                            index,
                            pixel_width,
                            pixel_height,
                            photo: photo.clone(),
                        }
                    }
                    Err(e) => {
                        warn!("Photo {} of equipment {} is unreadable: {}", index, record.id, e);
                        Element::PhotoError {
                            x,
                            y: flow.y,
                            size: cell,
                            record_id: record.id,
                            index,
                            message: "Invalid photo".to_string(),
                        }
                    }
                };
                flow.push(element);
                x += step;
            }

            flow.y += cell + AFTER_PHOTOS;
        }
    }
}

fn row_height(row: &Element) -> f64 {
    match row {
        Element::TableRow { height, .. } => *height,
        _ => 0.0,
    }
}

fn set_row_y(row: &mut Element, top: f64) {
    if let Element::TableRow { y, .. } = row {
        *y = top;
    }
}

fn row_element(
    cells: Vec<TableCell>,
    y: f64,
    header: bool,
    fill: Option<Color>,
    style: TextStyle,
) -> Element {
    let lines = cells.iter().map(|c| c.lines.len()).max().unwrap_or(1).max(1);
    let height = lines as f64 * line_height(style.size) + 2.0 * CELL_PADDING;

    Element::TableRow {
        y,
        height,
        header,
        fill,
        style,
        padding: CELL_PADDING,
        cells,
    }
}

/// Keeps the first `lines` lines of every cell in `row` and returns the
/// remainder as a continuation row with the same fill.
fn split_row(row: &mut Element, lines: usize) -> Option<Element> {
    let Element::TableRow {
        y,
        header,
        fill,
        style,
        cells,
        ..
    } = row
    else {
        return None;
    };

    let (top, header, fill, style) = (*y, *header, *fill, *style);

    let rest: Vec<TableCell> = cells
        .iter_mut()
        .map(|cell| TableCell {
            x: cell.x,
            width: cell.width,
            lines: cell.lines.split_off(lines.min(cell.lines.len())),
        })
        .collect();
    let head = std::mem::take(cells);

    *row = row_element(head, top, header, fill, style);
    Some(row_element(rest, top, header, fill, style))
}

fn break_table_page(flow: &mut Flow, header: &mut Element) {
    flow.new_page();
    set_row_y(header, flow.y);
    flow.y += row_height(header);
    flow.push(header.clone());
}
