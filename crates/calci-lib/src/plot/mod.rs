use crate::pipeline::ColumnAnalysis;
use serde::{Deserialize, Serialize};

pub const RATIO_COLOR: Color = Color(0x1F77B4);
pub const FIT_COLOR: Color = Color(0xD62728);
pub const MAXIMA_COLOR: Color = Color(0x2CA02C);
pub const MINIMA_COLOR: Color = Color(0xFF7F0E);
pub const TAU_COLOR: Color = Color(0x9467BD);

/// Half height of a 1/e marker, relative to the column amplitude.
const TAU_MARKER_REACH: f64 = 0.2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
    /// Fixed `(min, max)`; fitted to the data when `None`.
    pub range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub radius: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Points(PointSeries),
}

impl Series {
    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(line) => &line.points,
            Series::Points(points) => &points.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis::default(),
            y: Axis::default(),
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Axis ranges: the fixed ones where set, otherwise the extent of the
    /// finite points. Falls back to `0..1` for an axis without data.
    pub fn bounds(&self) -> ((f64, f64), (f64, f64)) {
        let extent = |axis: usize| {
            let (lo, hi) = self
                .series
                .iter()
                .flat_map(|s| s.points().iter().map(move |p| p[axis]))
                .filter(|v| v.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            if lo > hi {
                (0.0, 1.0)
            } else if lo == hi {
                (lo - 0.5, hi + 0.5)
            } else {
                (lo, hi)
            }
        };
        (
            self.x.range.unwrap_or_else(|| extent(0)),
            self.y.range.unwrap_or_else(|| extent(1)),
        )
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

/// Fixed axis ranges applied to every panel of a chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub x: Option<(f64, f64)>,
    pub y: Option<(f64, f64)>,
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// Split `(x, y)` samples into runs of finite `y`, dropping the gaps.
pub fn finite_runs(x: &[f64], y: &[f64]) -> Vec<Vec<[f64; 2]>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (&xv, &yv) in x.iter().zip(y) {
        if yv.is_finite() {
            current.push([xv, yv]);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn markers(name: &str, time: &[f64], values: &[f64], indices: &[usize], color: Color) -> Series {
    let points = indices
        .iter()
        .filter_map(|&i| Some([*time.get(i)?, *values.get(i)?]))
        .filter(|p| p[1].is_finite())
        .collect();
    Series::Points(PointSeries {
        name: name.into(),
        points,
        radius: 3,
        color,
    })
}

/// One chart panel for an analyzed column: the ratio trace, every fitted decay,
/// detected maxima and minima, and a short vertical tick where each fit
/// reaches 1/e of its amplitude.
pub fn figure_from_analysis(
    title: &str,
    analysis: &ColumnAnalysis,
    limits: AxisLimits,
    max_points: usize,
) -> Figure {
    let mut fig = Figure::new(Some(title.to_string()));
    fig.x = Axis {
        label: Some("Time".into()),
        range: limits.x,
    };
    fig.y = Axis {
        label: Some("Ratio".into()),
        range: limits.y,
    };

    let time = &analysis.time;
    for run in finite_runs(time, &analysis.ratio) {
        fig.add_series(Series::Line(LineSeries {
            name: "ratio".into(),
            points: decimate_points(&run, max_points),
            style: Style {
                width: 1.0,
                dash: None,
                color: RATIO_COLOR,
            },
        }));
    }
    for run in finite_runs(time, &analysis.fitted_curve) {
        fig.add_series(Series::Line(LineSeries {
            name: "decay fit".into(),
            points: run,
            style: Style {
                width: 2.0,
                dash: Some([4.0, 2.0]),
                color: FIT_COLOR,
            },
        }));
    }
    let extrema = &analysis.extrema;
    fig.add_series(markers("maxima", time, &analysis.ratio, &extrema.maxima, MAXIMA_COLOR));
    fig.add_series(markers("minima", time, &analysis.ratio, &extrema.minima, MINIMA_COLOR));
    let reach = analysis.metrics.amplitude.abs() * TAU_MARKER_REACH;
    for &i in analysis.tau_markers.iter().take(analysis.decay_cycles.len()) {
        let (Some(&t), Some(&v)) = (time.get(i), analysis.fitted_curve.get(i)) else {
            continue;
        };
        if !v.is_finite() {
            continue;
        }
        fig.add_series(Series::Line(LineSeries {
            name: "tau".into(),
            points: vec![[t, v - reach], [t, v + reach]],
            style: Style {
                width: 1.5,
                dash: None,
                color: TAU_COLOR,
            },
        }));
    }
    fig
}
