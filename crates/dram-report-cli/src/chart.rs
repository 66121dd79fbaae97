//! Chart rendering: takes a derived view, produces a PNG artifact.

use std::path::Path;

use dram_report_core::{GroupAggregate, ReportError, TrendPoint};
use plotters::prelude::*;

const CHART_SIZE: (u32, u32) = (1200, 600);
/// Default score axis; widened when observed values fall outside it
/// (rescaled scores do).
const SCORE_AXIS: (f64, f64) = (6.0, 10.0);
const GREY: RGBColor = RGBColor(128, 128, 128);

/// Scatter of individual scores with the trailing moving average on top.
///
/// # Errors
/// Returns [`ReportError::RenderFailed`] when the backend cannot draw or
/// write the image.
pub fn render_trend_chart(
    trend: &[TrendPoint],
    window: usize,
    output: &Path,
) -> Result<(), ReportError> {
    let root = BitMapBackend::new(output, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|err| chart_error("trend", err))?;

    let caption = format!("Scoring Trend Over Time ({window}-whisky Moving Average)");
    let (y_min, y_max) = score_axis(
        trend
            .iter()
            .flat_map(|point| [point.score, point.moving_avg]),
    );
    let x_max = i32::try_from(trend.len()).unwrap_or(i32::MAX).max(1);

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(50)
        .build_cartesian_2d(0..x_max, y_min..y_max)
        .map_err(|err| chart_error("trend", err))?;

    chart
        .configure_mesh()
        .x_desc("Whiskies Tasted (Chronological Order)")
        .y_desc("Score")
        .draw()
        .map_err(|err| chart_error("trend", err))?;

    chart
        .draw_series(trend.iter().enumerate().map(|(index, point)| {
            let x = i32::try_from(index).unwrap_or(i32::MAX);
            Circle::new((x, point.score), 3, GREY.mix(0.5).filled())
        }))
        .map_err(|err| chart_error("trend", err))?
        .label("Individual Scores")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, GREY.mix(0.5).filled()));

    chart
        .draw_series(LineSeries::new(
            trend.iter().enumerate().map(|(index, point)| {
                let x = i32::try_from(index).unwrap_or(i32::MAX);
                (x, point.moving_avg)
            }),
            BLUE.stroke_width(2),
        ))
        .map_err(|err| chart_error("trend", err))?
        .label("Moving Average")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(2)));

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .draw()
        .map_err(|err| chart_error("trend", err))?;

    root.present().map_err(|err| chart_error("trend", err))
}

/// Bar chart of mean score per group, one bar per entry in `groups`.
///
/// # Errors
/// Returns [`ReportError::RenderFailed`] when the backend cannot draw or
/// write the image.
pub fn render_group_chart(
    groups: &[GroupAggregate],
    caption: &str,
    x_desc: &str,
    output: &Path,
) -> Result<(), ReportError> {
    let root = BitMapBackend::new(output, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|err| chart_error(caption, err))?;

    let (y_min, y_max) = score_axis(groups.iter().map(|group| group.avg_score));
    let x_max = i32::try_from(groups.len()).unwrap_or(i32::MAX).max(1);

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(90)
        .y_label_area_size(50)
        .build_cartesian_2d(0..x_max, y_min..y_max)
        .map_err(|err| chart_error(caption, err))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_desc)
        .y_desc("Average Score")
        .x_labels(groups.len().max(1))
        .x_label_formatter(&|index| {
            usize::try_from(*index)
                .ok()
                .and_then(|position| groups.get(position))
                .map(|group| group.name.clone())
                .unwrap_or_default()
        })
        .draw()
        .map_err(|err| chart_error(caption, err))?;

    chart
        .draw_series(groups.iter().enumerate().map(|(index, group)| {
            let x = i32::try_from(index).unwrap_or(i32::MAX);
            Rectangle::new([(x, y_min), (x + 1, group.avg_score)], BLUE.filled())
        }))
        .map_err(|err| chart_error(caption, err))?;

    root.present().map_err(|err| chart_error(caption, err))
}

fn score_axis<I>(values: I) -> (f64, f64)
where
    I: Iterator<Item = f64>,
{
    let mut min = SCORE_AXIS.0;
    let mut max = SCORE_AXIS.1;
    for value in values {
        if value < min {
            min = value;
        }
        if value > max {
            max = value;
        }
    }
    (min, max)
}

fn chart_error(chart: &str, err: impl std::fmt::Display) -> ReportError {
    ReportError::RenderFailed(format!("failed to render {chart} chart: {err}"))
}
