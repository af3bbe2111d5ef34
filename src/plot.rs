//! Labeled 2-D scatter plots of reduced embeddings.

use std::collections::BTreeMap;
use std::path::Path;

use plotters::prelude::*;
use thiserror::Error;
use tracing::info;

const PLOT_SIZE: (u32, u32) = (1000, 1000);
const MARKER_SIZE: i32 = 4;

// tab10
const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

/// Failures raised while rendering a plot.
#[derive(Debug, Error)]
pub enum PlotError {
    /// Reduced points are not two-dimensional.
    #[error("cannot plot {0}-dimensional points")]
    Dimension(usize),
    /// Labels and points differ in count.
    #[error("{labels} labels for {points} points")]
    Misaligned {
        /// Label count.
        labels: usize,
        /// Point count.
        points: usize,
    },
    /// The drawing backend failed.
    #[error("failed to render plot: {0}")]
    Render(String),
}

/// Marker shape assigned to a label.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Marker {
    /// Filled circle.
    Circle,
    /// Filled triangle.
    Triangle,
    /// Stroked cross.
    Cross,
}

impl Marker {
    fn nth(index: usize) -> Self {
        match (index / PALETTE.len()) % 3 {
            0 => Self::Circle,
            1 => Self::Triangle,
            _ => Self::Cross,
        }
    }
}

/// All points sharing a label, with the style they are drawn in.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelSeries {
    /// Category label shown in the legend.
    pub label: String,
    /// Fill or stroke color.
    pub color: RGBColor,
    /// Marker shape.
    pub marker: Marker,
    /// Points in record order.
    pub points: Vec<(f64, f64)>,
}

/// Groups 2-D points by label; series are ordered by label name and styled
/// by that position.
pub fn group_by_label(
    labels: &[String],
    points: &[Vec<f64>],
) -> Result<Vec<LabelSeries>, PlotError> {
    if labels.len() != points.len() {
        return Err(PlotError::Misaligned {
            labels: labels.len(),
            points: points.len(),
        });
    }
    let mut grouped: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for (label, point) in labels.iter().zip(points) {
        let [x, y] = point.as_slice() else {
            return Err(PlotError::Dimension(point.len()));
        };
        grouped.entry(label.as_str()).or_default().push((*x, *y));
    }
    Ok(grouped
        .into_iter()
        .enumerate()
        .map(|(index, (label, points))| LabelSeries {
            label: label.to_string(),
            color: PALETTE[index % PALETTE.len()],
            marker: Marker::nth(index),
            points,
        })
        .collect())
}

/// Renders the series as an SVG scatter plot with a legend.
pub fn render_scatter(path: &Path, title: &str, series: &[LabelSeries]) -> Result<(), PlotError> {
    let (x_range, y_range) = bounds(series);
    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)
        .map_err(render_error)?;
    chart.configure_mesh().draw().map_err(render_error)?;

    for entry in series {
        let points = entry.points.iter().copied();
        match entry.marker {
            Marker::Circle => {
                let style = entry.color.filled();
                chart
                    .draw_series(points.map(|p| Circle::new(p, MARKER_SIZE, style)))
                    .map_err(render_error)?
                    .label(entry.label.as_str())
                    .legend(move |c| Circle::new(c, MARKER_SIZE, style));
            }
            Marker::Triangle => {
                let style = entry.color.filled();
                chart
                    .draw_series(points.map(|p| TriangleMarker::new(p, MARKER_SIZE + 1, style)))
                    .map_err(render_error)?
                    .label(entry.label.as_str())
                    .legend(move |c| TriangleMarker::new(c, MARKER_SIZE + 1, style));
            }
            Marker::Cross => {
                let style = entry.color.stroke_width(2);
                chart
                    .draw_series(points.map(|p| Cross::new(p, MARKER_SIZE, style)))
                    .map_err(render_error)?
                    .label(entry.label.as_str())
                    .legend(move |c| Cross::new(c, MARKER_SIZE, style));
            }
        }
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    info!(path = %path.display(), series = series.len(), "plot written");
    Ok(())
}

fn bounds(series: &[LabelSeries]) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let mut points = series.iter().flat_map(|s| s.points.iter());
    let Some(&(x0, y0)) = points.next() else {
        return (-1.0..1.0, -1.0..1.0);
    };
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (x0, x0, y0, y0);
    for &(x, y) in points {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    (padded(min_x, max_x), padded(min_y, max_y))
}

fn padded(min: f64, max: f64) -> std::ops::Range<f64> {
    let pad = if max > min { (max - min) * 0.05 } else { 1.0 };
    (min - pad)..(max + pad)
}

fn render_error<E: std::fmt::Display>(err: E) -> PlotError {
    PlotError::Render(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn groups_points_by_sorted_label() {
        let series = group_by_label(
            &labels(&["Web(Patrick)", "VR(Patrick)", "Web(Patrick)"]),
            &[vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]],
        )
        .expect("group");

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "VR(Patrick)");
        assert_eq!(series[0].points, vec![(2.0, 3.0)]);
        assert_eq!(series[1].points, vec![(0.0, 1.0), (4.0, 5.0)]);
        assert_ne!(series[0].color, series[1].color);
    }

    #[test]
    fn styles_repeat_with_different_markers() {
        let names: Vec<String> = (0..12).map(|i| format!("label-{i:02}")).collect();
        let points = vec![vec![0.0, 0.0]; names.len()];
        let series = group_by_label(&names, &points).expect("group");
        assert_eq!(series[0].marker, Marker::Circle);
        assert_eq!(series[10].marker, Marker::Triangle);
        assert_eq!(series[10].color, series[0].color);
    }

    #[test]
    fn rejects_non_planar_points() {
        let err = group_by_label(&labels(&["a"]), &[vec![1.0, 2.0, 3.0]]).expect_err("3-d");
        assert!(matches!(err, PlotError::Dimension(3)));
    }

    #[test]
    fn renders_svg_with_legend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plot.svg");
        let series = group_by_label(
            &labels(&["Web(Patrick)", "VR(Patrick)"]),
            &[vec![-1.0, 0.5], vec![1.0, -0.5]],
        )
        .expect("group");

        render_scatter(&path, "PACMAP", &series).expect("render");
        let svg = fs::read_to_string(&path).expect("read svg");
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Web(Patrick)"));
    }
}
