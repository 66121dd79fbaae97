//! Paginated PDF assembly: ordered blocks of text, tables, and chart
//! images, with automatic page breaks and a repeated header row for tables
//! that span pages.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use dram_report_core::{
    display_age, AttendeeReport, GroupAggregate, ReportError, ReportOptions,
};
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerReference, Point, Rgb,
};

const PAGE_WIDTH: f64 = 210.0;
const PAGE_HEIGHT: f64 = 297.0;
const TOP_MARGIN: f64 = 15.0;
const BOTTOM_MARGIN: f64 = 15.0;
const LEFT_MARGIN: f64 = 10.0;
const ROW_HEIGHT: f64 = 8.0;
const CHART_WIDTH: f64 = 190.0;
const CHART_DPI: f64 = 300.0;

/// Approximate advance width of builtin Helvetica, in mm per point of font
/// size; good enough for centering headings.
const GLYPH_WIDTH_FACTOR: f64 = 0.5 * 25.4 / 72.0;

/// Assembles the full report document in its fixed section order.
///
/// # Errors
/// Returns [`ReportError::RenderFailed`] when a chart image cannot be read
/// or the document cannot be written.
pub fn write_report(
    report: &AttendeeReport,
    options: &ReportOptions,
    trend_chart: &Path,
    distillery_chart: &Path,
    region_chart: &Path,
    output: &Path,
) -> Result<(), ReportError> {
    let mut builder = DocumentBuilder::new(&format!(
        "Whisky Club Report for {}",
        report.summary.attendee
    ))?;

    // Title page: summary stats and the trend chart.
    builder.centered_heading(
        &format!("Whisky Club Report for {}", report.summary.attendee),
        16.0,
    );
    builder.space(6.0);
    builder.key_value("Meetings Attended:", &report.summary.meetings_attended.to_string());
    builder.key_value("Whiskies Scored:", &report.summary.whiskies_scored.to_string());
    builder.key_value(
        "Total Price of Whiskies Scored:",
        &format_currency(report.summary.total_price),
    );
    builder.key_value("Average Score:", &format!("{:.2}", report.summary.avg_score));
    builder.space(6.0);
    builder.embed_chart(trend_chart)?;

    // Distillery analysis.
    builder.start_page();
    builder.centered_heading("Distillery Analysis", 12.0);
    builder.space(4.0);
    builder.embed_chart(distillery_chart)?;
    let group_columns = [("Distillery", 60.0), ("Avg Score", 30.0), ("Count", 30.0)];
    builder.group_table("Top Distilleries", &group_columns, &report.distilleries.top);
    builder.group_table("Bottom Distilleries", &group_columns, &report.distilleries.bottom);

    // Regional analysis.
    builder.start_page();
    builder.centered_heading("Regional Analysis", 12.0);
    builder.space(4.0);
    builder.embed_chart(region_chart)?;
    let region_columns = [("Region", 60.0), ("Avg Score", 30.0), ("Count", 30.0)];
    builder.group_table("Top Regions", &region_columns, &report.regions.top);
    builder.group_table("Bottom Regions", &region_columns, &report.regions.bottom);

    // Scoring pattern analysis.
    builder.start_page();
    builder.centered_heading("Scoring Pattern Analysis", 12.0);
    builder.space(4.0);

    let correlation_columns = [
        ("Attendee", 60.0),
        ("Correlation", 40.0),
        ("Common Whiskies", 40.0),
    ];
    let correlation_spec = TableSpec::centered(&correlation_columns);
    let head = report
        .correlations
        .iter()
        .take(options.similar_scorers_size);
    builder.heading("Most Similar Scorers", 11.0);
    builder.table_header(&correlation_spec);
    for row in head {
        builder.table_row(
            &correlation_spec,
            &[
                row.attendee.clone(),
                format!("{:.3}", row.correlation),
                row.common_whiskies.to_string(),
            ],
        );
    }
    builder.space(6.0);

    let tail_start = report
        .correlations
        .len()
        .saturating_sub(options.similar_scorers_size);
    builder.heading("Most Different Scorers", 11.0);
    builder.table_header(&correlation_spec);
    for row in &report.correlations[tail_start..] {
        builder.table_row(
            &correlation_spec,
            &[
                row.attendee.clone(),
                format!("{:.3}", row.correlation),
                row.common_whiskies.to_string(),
            ],
        );
    }
    builder.space(6.0);

    let difference_columns = [
        ("Description", 60.0),
        ("Distillery", 35.0),
        ("Age", 15.0),
        ("Other Attendee", 30.0),
        ("Your Score", 20.0),
        ("Their Score", 20.0),
        ("Difference", 20.0),
    ];
    let difference_spec = TableSpec::centered(&difference_columns);
    builder.heading("Largest Score Differences", 11.0);
    builder.table_header(&difference_spec);
    for row in report.differences.iter().take(options.difference_table_size) {
        builder.table_row(
            &difference_spec,
            &[
                truncate(row.description.as_deref().unwrap_or(""), 30),
                truncate(row.distillery.as_deref().unwrap_or(""), 17),
                display_age(row.age_years),
                truncate(&row.other_attendee, 15),
                format!("{:.1}", row.target_score),
                format!("{:.1}", row.other_score),
                format!("{:.1}", row.absolute_difference),
            ],
        );
    }

    // Complete scoring history; the header row repeats on every page the
    // table spans.
    builder.start_page();
    builder.centered_heading("Complete Scoring History", 12.0);
    builder.space(4.0);
    let history_columns = [
        ("Meeting", 15.0),
        ("Score", 15.0),
        ("Description", 50.0),
        ("Distillery", 35.0),
        ("Age", 12.0),
        ("Region", 25.0),
        ("ABV%", 12.0),
        ("Price", 20.0),
    ];
    let history_spec = TableSpec::centered(&history_columns);
    builder.table_header(&history_spec);
    builder.repeat_header(history_spec.clone());
    for row in &report.history {
        builder.table_row(
            &history_spec,
            &[
                row.meeting.to_string(),
                format!("{:.1}", row.score),
                truncate(&row.description, 35),
                truncate(&row.distillery, 20),
                row.age_display.clone(),
                truncate(&row.region, 15),
                row.abv_percent
                    .map_or_else(String::new, |abv| format!("{abv:.0}%")),
                row.price.map_or_else(String::new, format_price_whole),
            ],
        );
    }

    builder.save(output)
}

/// Fixed-width column layout, centered on the page.
#[derive(Debug, Clone)]
struct TableSpec {
    headers: Vec<String>,
    widths: Vec<f64>,
    left: f64,
}

impl TableSpec {
    fn centered(columns: &[(&str, f64)]) -> Self {
        let total: f64 = columns.iter().map(|(_, width)| width).sum();
        Self {
            headers: columns.iter().map(|(name, _)| (*name).to_string()).collect(),
            widths: columns.iter().map(|(_, width)| *width).collect(),
            left: (PAGE_WIDTH - total) / 2.0,
        }
    }
}

struct DocumentBuilder {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    cursor: f64,
    repeating_header: Option<TableSpec>,
}

impl DocumentBuilder {
    fn new(title: &str) -> Result<Self, ReportError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH as f32), Mm(PAGE_HEIGHT as f32), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|err| render_error("failed to load builtin font", &err))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|err| render_error("failed to load builtin font", &err))?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            cursor: PAGE_HEIGHT - TOP_MARGIN,
            repeating_header: None,
        })
    }

    fn start_page(&mut self) {
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH as f32), Mm(PAGE_HEIGHT as f32), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = PAGE_HEIGHT - TOP_MARGIN;
        if let Some(spec) = self.repeating_header.clone() {
            self.table_header(&spec);
        }
    }

    /// Breaks the page when fewer than `needed` millimetres remain.
    fn ensure_room(&mut self, needed: f64) {
        if self.cursor - needed < BOTTOM_MARGIN {
            self.start_page();
        }
    }

    fn space(&mut self, height: f64) {
        self.cursor -= height;
    }

    fn centered_heading(&mut self, text: &str, size: f64) {
        self.ensure_room(ROW_HEIGHT + 2.0);
        let clean = clean_text(text);
        let width = text_width(&clean, size);
        let x = ((PAGE_WIDTH - width) / 2.0).max(LEFT_MARGIN);
        self.cursor -= ROW_HEIGHT;
        self.layer
            .use_text(clean, size as f32, Mm(x as f32), Mm(self.cursor as f32), &self.bold);
        self.cursor -= 2.0;
    }

    fn heading(&mut self, text: &str, size: f64) {
        self.ensure_room(ROW_HEIGHT + 2.0);
        self.cursor -= ROW_HEIGHT;
        self.layer.use_text(
            clean_text(text),
            size as f32,
            Mm(LEFT_MARGIN as f32),
            Mm(self.cursor as f32),
            &self.bold,
        );
        self.cursor -= 2.0;
    }

    fn key_value(&mut self, label: &str, value: &str) {
        self.ensure_room(ROW_HEIGHT);
        self.cursor -= ROW_HEIGHT;
        let label_clean = clean_text(label);
        let offset = text_width(&label_clean, 12.0) + 2.0;
        self.layer
            .use_text(label_clean, 12.0, Mm(LEFT_MARGIN as f32), Mm(self.cursor as f32), &self.bold);
        self.layer.use_text(
            clean_text(value),
            12.0,
            Mm((LEFT_MARGIN + offset) as f32),
            Mm(self.cursor as f32),
            &self.regular,
        );
    }

    /// Registers a table header to redraw at the top of every page break
    /// from here on.
    fn repeat_header(&mut self, spec: TableSpec) {
        self.repeating_header = Some(spec);
    }

    fn table_header(&mut self, spec: &TableSpec) {
        self.ensure_room(ROW_HEIGHT);
        self.cursor -= ROW_HEIGHT;
        self.layer
            .set_outline_color(Color::Rgb(Rgb::new(0.4, 0.4, 0.4, None)));
        self.layer.set_outline_thickness(0.3);
        let mut x = spec.left;
        for (header, width) in spec.headers.iter().zip(&spec.widths) {
            self.layer.add_line(cell_outline(x, self.cursor, *width));
            self.layer.use_text(
                clean_text(header),
                9.0,
                Mm((x + 1.5) as f32),
                Mm((self.cursor + 2.5) as f32),
                &self.bold,
            );
            x += width;
        }
    }

    fn table_row(&mut self, spec: &TableSpec, cells: &[String]) {
        self.ensure_room(ROW_HEIGHT);
        self.cursor -= ROW_HEIGHT;
        let mut x = spec.left;
        for (cell, width) in cells.iter().zip(&spec.widths) {
            self.layer.add_line(cell_outline(x, self.cursor, *width));
            self.layer.use_text(
                clean_text(cell),
                8.0,
                Mm((x + 1.5) as f32),
                Mm((self.cursor + 2.5) as f32),
                &self.regular,
            );
            x += width;
        }
    }

    fn group_table(&mut self, title: &str, columns: &[(&str, f64)], groups: &[GroupAggregate]) {
        let spec = TableSpec::centered(columns);
        self.space(4.0);
        self.heading(title, 11.0);
        self.table_header(&spec);
        for group in groups {
            self.table_row(
                &spec,
                &[
                    truncate(&group.name, 30),
                    format!("{:.2}", group.avg_score),
                    group.whisky_count.to_string(),
                ],
            );
        }
    }

    fn embed_chart(&mut self, path: &Path) -> Result<(), ReportError> {
        let dynamic = printpdf::image_crate::open(path).map_err(|err| {
            ReportError::RenderFailed(format!(
                "failed to read chart image {}: {err}",
                path.display()
            ))
        })?;
        let width_mm = px_to_mm(dynamic.width());
        let height_mm = px_to_mm(dynamic.height());
        let scale = CHART_WIDTH / width_mm;
        let displayed_height = height_mm * scale;

        self.ensure_room(displayed_height + 4.0);
        let y = self.cursor - displayed_height;
        let image = Image::from_dynamic_image(&dynamic);
        image.add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(LEFT_MARGIN as f32)),
                translate_y: Some(Mm(y as f32)),
                scale_x: Some(scale as f32),
                scale_y: Some(scale as f32),
                dpi: Some(CHART_DPI as f32),
                ..ImageTransform::default()
            },
        );
        self.cursor = y - 4.0;
        Ok(())
    }

    fn save(self, output: &Path) -> Result<(), ReportError> {
        let file = File::create(output).map_err(|err| {
            ReportError::RenderFailed(format!(
                "failed to create report file {}: {err}",
                output.display()
            ))
        })?;
        self.doc
            .save(&mut BufWriter::new(file))
            .map_err(|err| render_error("failed to write report document", &err))
    }
}

fn cell_outline(x: f64, y: f64, width: f64) -> Line {
    Line {
        points: vec![
            (Point::new(Mm(x as f32), Mm(y as f32)), false),
            (Point::new(Mm((x + width) as f32), Mm(y as f32)), false),
            (Point::new(Mm((x + width) as f32), Mm((y + ROW_HEIGHT) as f32)), false),
            (Point::new(Mm(x as f32), Mm((y + ROW_HEIGHT) as f32)), false),
        ],
        is_closed: true,
    }
}

fn text_width(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * size * GLYPH_WIDTH_FACTOR
}

fn px_to_mm(pixels: u32) -> f64 {
    f64::from(pixels) / CHART_DPI * 25.4
}

fn render_error(context: &str, err: &dyn std::fmt::Display) -> ReportError {
    ReportError::RenderFailed(format!("{context}: {err}"))
}

/// Maps typographic punctuation to ASCII equivalents and replaces anything
/// else outside ASCII, so text survives the builtin-font character set.
/// Best-effort per cell; never a report failure.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let expanded = text.replace('\u{2026}', "...");
    expanded
        .chars()
        .map(|ch| match ch {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            ch if ch.is_ascii() => ch,
            _ => '?',
        })
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn format_currency(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    format!("${}.{fraction}", group_thousands(whole))
}

fn format_price_whole(value: f64) -> String {
    format!("${}", group_thousands(&format!("{value:.0}")))
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = digits
        .strip_prefix('-')
        .map_or(("", digits), |rest| ("-", rest));
    let mut reversed = String::with_capacity(digits.len() + digits.len() / 3);
    for (count, ch) in digits.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            reversed.push(',');
        }
        reversed.push(ch);
    }
    format!("{sign}{}", reversed.chars().rev().collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_maps_typographic_punctuation() {
        assert_eq!(clean_text("\u{2018}quote\u{2019}"), "'quote'");
        assert_eq!(clean_text("em\u{2014}dash"), "em-dash");
        assert_eq!(clean_text("wait\u{2026}"), "wait...");
        assert_eq!(clean_text("Caol Ila"), "Caol Ila");
        assert_eq!(clean_text("Bj\u{f8}rn"), "Bj?rn");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("ab", 4), "ab");
    }

    #[test]
    fn currency_groups_thousands() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(1234.5), "$1,234.50");
        assert_eq!(format_currency(9_876_543.21), "$9,876,543.21");
        assert_eq!(format_price_whole(1234.4), "$1,234");
    }

    #[test]
    fn table_spec_centers_its_columns() {
        let spec = TableSpec::centered(&[("A", 60.0), ("B", 40.0)]);
        assert!((spec.left - 55.0).abs() < f64::EPSILON);
        assert_eq!(spec.headers, ["A".to_string(), "B".to_string()]);
    }
}
