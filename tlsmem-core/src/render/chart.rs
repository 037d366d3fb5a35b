// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SVG line charts of heap usage over time.

use std::fmt::Write;

use super::SeriesSet;
use crate::error::RenderError;
use crate::trace::Samples;

/// Distinct line colors, assigned in series order.
const PALETTE: [&str; 6] = ["#1f77b4", "#d62728", "#2ca02c", "#ff7f0e", "#9467bd", "#8c564b"];

/// Dash patterns cycled once the palette is exhausted.
const DASHES: [&str; 3] = ["none", "8 4", "2 3"];

/// Above this many points per series, markers are left out.
const MAX_MARKERS: usize = 200;

const MARGIN_LEFT: u32 = 90;
const MARGIN_RIGHT: u32 = 180;
const MARGIN_TOP: u32 = 50;
const MARGIN_BOTTOM: u32 = 60;

/// Smallest plot area left inside the margins.
const MIN_PLOT: u32 = 100;

/// Narrowest chart that still has a plot area.
pub const MIN_WIDTH: u32 = MARGIN_LEFT + MARGIN_RIGHT + MIN_PLOT;

/// Shortest chart that still has a plot area.
pub const MIN_HEIGHT: u32 = MARGIN_TOP + MARGIN_BOTTOM + MIN_PLOT;

const TICKS: u32 = 5;

/// Chart dimensions in SVG user units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 700,
        }
    }
}

/// A rendered chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub title: String,
    pub svg: String,
}

/// Render `set` titled with its mode.
pub fn render(set: &SeriesSet, style: &ChartStyle) -> Result<Chart, RenderError> {
    render_titled(set, style, set.mode().as_str())
}

/// Render `set` on a shared time axis and a shared heap axis.
pub fn render_titled(
    set: &SeriesSet,
    style: &ChartStyle,
    title: &str,
) -> Result<Chart, RenderError> {
    let series: Vec<(&str, &Samples)> = set
        .iter()
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(name, samples)| (name.as_str(), samples))
        .collect();

    if series.is_empty() {
        return Err(RenderError::NoSeries {
            mode: set.mode().to_string(),
        });
    }

    let max_elapsed = series.iter().map(|(_, s)| s.max_elapsed()).max().unwrap_or(0);
    let max_heap = series
        .iter()
        .filter_map(|(_, s)| s.peak())
        .max()
        .unwrap_or(0);
    let time_label = series[0].1.time_unit.label();

    let x_axis = Axis::new(max_elapsed);
    let y_axis = Axis::new(max_heap);

    let style = ChartStyle {
        width: style.width.max(MIN_WIDTH),
        height: style.height.max(MIN_HEIGHT),
    };
    let plot = Plot {
        left: MARGIN_LEFT as f64,
        top: MARGIN_TOP as f64,
        width: (style.width - MARGIN_LEFT - MARGIN_RIGHT) as f64,
        height: (style.height - MARGIN_TOP - MARGIN_BOTTOM) as f64,
    };

    let mut svg = String::new();
    write_chart(&mut svg, title, time_label, &style, &plot, &x_axis, &y_axis, &series)?;

    Ok(Chart {
        title: title.to_string(),
        svg,
    })
}

#[derive(Debug, Clone, Copy)]
struct Plot {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Plot {
    fn x(&self, axis: &Axis, value: u64) -> f64 {
        self.left + self.width * value as f64 / axis.max as f64
    }

    fn y(&self, axis: &Axis, value: u64) -> f64 {
        self.top + self.height * (1.0 - value as f64 / axis.max as f64)
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }

    fn right(&self) -> f64 {
        self.left + self.width
    }
}

/// Axis from zero to a rounded maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Axis {
    max: u64,
    step: u64,
}

impl Axis {
    fn new(data_max: u64) -> Self {
        let step = nice_step(data_max.max(1).div_ceil(TICKS as u64));
        let max = data_max.max(1).div_ceil(step) * step;
        Self { max, step }
    }

    fn ticks(&self) -> impl Iterator<Item = u64> + '_ {
        (0..=self.max / self.step).map(move |i| i * self.step)
    }
}

/// Smallest 1, 2 or 5 times a power of ten not below `raw`.
fn nice_step(raw: u64) -> u64 {
    let mut magnitude = 1u64;
    while magnitude.saturating_mul(10) <= raw {
        magnitude *= 10;
    }
    [1, 2, 5, 10]
        .into_iter()
        .map(|m| m * magnitude)
        .find(|step| *step >= raw)
        .unwrap_or(10 * magnitude)
}

#[allow(clippy::too_many_arguments)]
fn write_chart(
    svg: &mut String,
    title: &str,
    time_label: &str,
    style: &ChartStyle,
    plot: &Plot,
    x_axis: &Axis,
    y_axis: &Axis,
    series: &[(&str, &Samples)],
) -> std::fmt::Result {
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="13">"#,
        w = style.width,
        h = style.height
    )?;
    writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="18">{}</text>"#,
        plot.left + plot.width / 2.0,
        plot.top / 2.0 + 6.0,
        escape(title)
    )?;

    // Grid and tick labels
    for tick in y_axis.ticks() {
        let y = plot.y(y_axis, tick);
        writeln!(
            svg,
            r##"<line x1="{:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#e0e0e0"/>"##,
            plot.left,
            plot.right()
        )?;
        writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
            plot.left - 8.0,
            y + 4.0,
            format_bytes(tick)
        )?;
    }
    for tick in x_axis.ticks() {
        let x = plot.x(x_axis, tick);
        writeln!(
            svg,
            r##"<line x1="{x:.1}" y1="{:.1}" x2="{x:.1}" y2="{:.1}" stroke="#e0e0e0"/>"##,
            plot.top,
            plot.bottom()
        )?;
        writeln!(
            svg,
            r#"<text x="{x:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            plot.bottom() + 18.0,
            format_count(tick)
        )?;
    }

    // Axes
    writeln!(
        svg,
        r#"<path d="M{:.1},{:.1} V{:.1} H{:.1}" fill="none" stroke="black"/>"#,
        plot.left,
        plot.top,
        plot.bottom(),
        plot.right()
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
        plot.left + plot.width / 2.0,
        plot.bottom() + 42.0,
        escape(time_label)
    )?;
    writeln!(
        svg,
        r#"<text transform="translate(18,{:.1}) rotate(-90)" text-anchor="middle">heap</text>"#,
        plot.top + plot.height / 2.0
    )?;

    for (i, (name, samples)) in series.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let dash = DASHES[(i / PALETTE.len()) % DASHES.len()];

        let points = samples
            .samples
            .iter()
            .map(|s| {
                let (x, y) = (plot.x(x_axis, s.elapsed), plot.y(y_axis, s.heap_bytes));
                format!("{:.1},{:.1}", x, y)
            })
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(
            svg,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2" stroke-dasharray="{}"/>"#,
            points, color, dash
        )?;

        if samples.len() <= MAX_MARKERS {
            for s in &samples.samples {
                writeln!(
                    svg,
                    r#"<circle cx="{:.1}" cy="{:.1}" r="2.5" fill="{}"/>"#,
                    plot.x(x_axis, s.elapsed),
                    plot.y(y_axis, s.heap_bytes),
                    color
                )?;
            }
        }

        // Legend
        let ly = plot.top + 10.0 + 22.0 * i as f64;
        let lx = plot.right() + 16.0;
        writeln!(
            svg,
            r#"<line x1="{:.1}" y1="{ly:.1}" x2="{:.1}" y2="{ly:.1}" stroke="{}" stroke-width="2" stroke-dasharray="{}"/>"#,
            lx,
            lx + 28.0,
            color,
            dash
        )?;
        writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}">{}</text>"#,
            lx + 36.0,
            ly + 4.0,
            escape(name)
        )?;
    }

    writeln!(svg, "</svg>")
}

/// Binary-prefixed byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Decimal-prefixed count, e.g. instructions.
pub fn format_count(count: u64) -> String {
    match count {
        0..=9_999 => count.to_string(),
        10_000..=9_999_999 => format!("{}k", count / 1_000),
        10_000_000..=9_999_999_999 => format!("{}M", count / 1_000_000),
        _ => format!("{}G", count / 1_000_000_000),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
