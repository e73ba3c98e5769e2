//! Plot artifacts
//!
//! Love plot (before/after SMD per covariate) and the cumulative-mortality
//! curve with a number-at-risk table. Rendering goes through the plotters
//! bitmap backend only; no display or GUI toolkit is ever touched, so the
//! renderer is safe on worker threads and headless hosts.

use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;

use super::super::error::AnalysisError;
use super::super::models::{BalanceReport, SurvivalPoint, SurvivalResult};

const TREATMENT_COLOR: RGBColor = RGBColor(0xE7, 0x4C, 0x3C);
const CONTROL_COLOR: RGBColor = RGBColor(0x34, 0x98, 0xDB);
const BEFORE_COLOR: RGBColor = RGBColor(0x17, 0xA5, 0x89);
const REFERENCE_GRAY: RGBColor = RGBColor(0x90, 0x90, 0x90);

fn render_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::RenderFailure(e.to_string())
}

/// Number-at-risk rows for the mortality plot.
pub struct RiskTable {
    pub days: Vec<f64>,
    pub treatment: Vec<f64>,
    pub control: Vec<f64>,
}

/// Love plot: per covariate, a triangle at the pre-matching SMD and a
/// circle at the post-matching SMD, ordered by descending |before-SMD|
/// with the worst imbalance on top.
pub fn love_plot(path: &Path, report: &BalanceReport) -> Result<(), AnalysisError> {
    if report.entries.is_empty() {
        return Err(AnalysisError::RenderFailure("no balance entries to plot".into()));
    }

    // ascending |before| so index n-1 (plotted on top) is the worst
    let mut entries = report.entries.clone();
    entries.sort_by(|a, b| a.smd_before.abs().partial_cmp(&b.smd_before.abs()).unwrap());

    let n = entries.len();
    let height = (160 + 36 * n).max(480) as u32;
    let width = 960u32;

    let max_abs = entries
        .iter()
        .flat_map(|e| [e.smd_before.abs(), e.smd_after.abs()])
        .fold(0.25f64, f64::max)
        * 1.15;

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(16)
        .caption(
            "Covariate Balance: Before vs After Matching",
            ("sans-serif", 22).into_font(),
        )
        .x_label_area_size(44)
        .y_label_area_size(170)
        .build_cartesian_2d(-max_abs..max_abs, 0f64..n as f64)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(0)
        .x_desc("Standardized Mean Difference")
        .axis_desc_style(("sans-serif", 16))
        .label_style(("sans-serif", 13))
        .draw()
        .map_err(render_err)?;

    // reference lines: zero plus the +-0.1 balance convention
    for (x, color, width) in [
        (-0.1, REFERENCE_GRAY, 1u32),
        (0.1, REFERENCE_GRAY, 1),
        (0.0, BLACK, 2),
    ] {
        chart
            .draw_series(LineSeries::new(
                vec![(x, 0.0), (x, n as f64)],
                color.stroke_width(width),
            ))
            .map_err(render_err)?;
    }

    chart
        .draw_series(
            entries
                .iter()
                .enumerate()
                .map(|(i, e)| TriangleMarker::new((e.smd_before, i as f64 + 0.5), 7, BEFORE_COLOR.filled())),
        )
        .map_err(render_err)?
        .label("Before matching")
        .legend(|(x, y)| TriangleMarker::new((x + 10, y), 7, BEFORE_COLOR.filled()));

    chart
        .draw_series(
            entries
                .iter()
                .enumerate()
                .map(|(i, e)| Circle::new((e.smd_after, i as f64 + 0.5), 6, TREATMENT_COLOR.filled())),
        )
        .map_err(render_err)?
        .label("After matching")
        .legend(|(x, y)| Circle::new((x + 10, y), 6, TREATMENT_COLOR.filled()));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .border_style(BLACK)
        .background_style(WHITE.mix(0.85))
        .label_font(("sans-serif", 14))
        .draw()
        .map_err(render_err)?;

    // covariate names along the left edge, anchored to their rows
    let name_style = ("sans-serif", 13)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Right, VPos::Center));
    for (i, entry) in entries.iter().enumerate() {
        let (x_px, y_px) = chart.backend_coord(&(-max_abs, i as f64 + 0.5));
        root.draw(&Text::new(entry.covariate.clone(), (x_px - 8, y_px), name_style.clone()))
            .map_err(render_err)?;
    }

    // improvement annotation, boxed in the lower-left of the plot area
    let improved = report.n_improved();
    let annotation = format!("{}/{} variables improved", improved, n);
    let (ax, ay) = chart.backend_coord(&(-max_abs, 0.0));
    root.draw(&Rectangle::new(
        [(ax + 6, ay - 40), (ax + 220, ay - 8)],
        REFERENCE_GRAY.stroke_width(1),
    ))
    .map_err(render_err)?;
    root.draw(&Text::new(
        annotation,
        (ax + 14, ay - 24),
        ("sans-serif", 14)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Center)),
    ))
    .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(())
}

/// Cumulative-mortality step curves per arm with the number-at-risk table
/// and a boxed hazard-ratio annotation.
pub fn mortality_plot(
    path: &Path,
    survival: &SurvivalResult,
    risk: &RiskTable,
    horizon: f64,
) -> Result<(), AnalysisError> {
    let width = 960u32;
    let height = 760u32;
    let chart_height = 560u32;

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let (upper, lower) = root.split_vertically(chart_height);

    let y_max = survival
        .cumulative_mortality_treatment
        .iter()
        .chain(survival.cumulative_mortality_control.iter())
        .map(|p| p.cumulative_mortality)
        .fold(0.05f64, f64::max)
        * 1.1;

    let mut chart = ChartBuilder::on(&upper)
        .margin(18)
        .caption("28-Day Cumulative Mortality", ("sans-serif", 24).into_font())
        .x_label_area_size(46)
        .y_label_area_size(64)
        .build_cartesian_2d(0f64..horizon, 0f64..y_max)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .x_desc("Days")
        .y_desc("Cumulative Mortality")
        .axis_desc_style(("sans-serif", 16))
        .label_style(("sans-serif", 13))
        .light_line_style(WHITE.mix(0.0))
        .draw()
        .map_err(render_err)?;

    let series = [
        (&survival.cumulative_mortality_treatment, TREATMENT_COLOR, "Treatment"),
        (&survival.cumulative_mortality_control, CONTROL_COLOR, "Control"),
    ];
    for (points, color, label) in series {
        chart
            .draw_series(LineSeries::new(
                step_points(points, horizon),
                color.stroke_width(3),
            ))
            .map_err(render_err)?
            .label(label)
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3))
            });
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .border_style(BLACK)
        .background_style(WHITE.mix(0.85))
        .label_font(("sans-serif", 15))
        .draw()
        .map_err(render_err)?;

    // boxed HR annotation in the upper-right corner of the plot area
    let annotation = format!(
        "HR {:.2} (CI {:.2}, {:.2}); p = {:.4}",
        survival.hazard_ratio, survival.ci95_lower, survival.ci95_upper, survival.p_value
    );
    let (right_px, top_px) = chart.backend_coord(&(horizon, y_max));
    root.draw(&Rectangle::new(
        [(right_px - 330, top_px + 10), (right_px - 10, top_px + 44)],
        REFERENCE_GRAY.stroke_width(1),
    ))
    .map_err(render_err)?;
    root.draw(&Text::new(
        annotation,
        (right_px - 320, top_px + 27),
        ("sans-serif", 15)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Center)),
    ))
    .map_err(render_err)?;

    drop(lower);
    draw_risk_table(&root, &chart, risk, chart_height)?;

    root.present().map_err(render_err)?;
    Ok(())
}

/// Expand a cumulative-mortality series into step-plot vertices.
fn step_points(points: &[SurvivalPoint], horizon: f64) -> Vec<(f64, f64)> {
    let mut out = vec![(0.0, 0.0)];
    let mut last = 0.0;
    for p in points {
        if p.day > 0.0 {
            out.push((p.day, last));
        }
        out.push((p.day, p.cumulative_mortality));
        last = p.cumulative_mortality;
    }
    out.push((horizon, last));
    out
}

type MortalityChart<'a, 'b> =
    ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

fn draw_risk_table(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    chart: &MortalityChart<'_, '_>,
    risk: &RiskTable,
    chart_height: u32,
) -> Result<(), AnalysisError> {
    let header_style = ("sans-serif", 15)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    let cell_style = ("sans-serif", 14)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    let label_right = ("sans-serif", 14)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Right, VPos::Center));

    let base_y = chart_height as i32 + 24;
    let (label_x, _) = chart.backend_coord(&(0.0, 0.0));

    root.draw(&Text::new("No. at Risk", (18, base_y), header_style))
        .map_err(render_err)?;

    let rows = [
        ("Treatment", &risk.treatment, TREATMENT_COLOR),
        ("Control", &risk.control, CONTROL_COLOR),
    ];
    for (r, (name, counts, color)) in rows.iter().enumerate() {
        let y = base_y + 28 + r as i32 * 26;
        root.draw(&Text::new(
            name.to_string(),
            (label_x - 12, y),
            label_right.clone().color(color),
        ))
        .map_err(render_err)?;
        for (day, count) in risk.days.iter().zip(counts.iter()) {
            let (x, _) = chart.backend_coord(&(*day, 0.0));
            root.draw(&Text::new(format!("{:.0}", count), (x, y), cell_style.clone()))
                .map_err(render_err)?;
        }
    }

    // day axis under the rows
    let y = base_y + 28 + 2 * 26;
    root.draw(&Text::new("Days".to_string(), (label_x - 12, y), label_right))
        .map_err(render_err)?;
    for day in &risk.days {
        let (x, _) = chart.backend_coord(&(*day, 0.0));
        root.draw(&Text::new(format!("{:.0}", day), (x, y), cell_style.clone()))
            .map_err(render_err)?;
    }

    Ok(())
}
