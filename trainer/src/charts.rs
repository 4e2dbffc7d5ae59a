//! SVG line charts for the training curves, written directly so the
//! trainer stays headless.

use std::fs;
use std::io;
use std::path::Path;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 60.0;
const MARGIN_LEFT: f64 = 70.0;

const SERIES_COLORS: [&str; 4] = ["#3498db", "#2ecc71", "#e74c3c", "#9b59b6"];
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Writes one line chart with a shared x axis (epoch number) for all
/// series. The y axis starts at zero and spans the data.
pub fn line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[Series],
    output: &Path,
) -> io::Result<()> {
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let epochs = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let y_max = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .fold(0.0f64, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.05 } else { 1.0 };

    let x_pos = |epoch: usize| {
        if epochs < 2 {
            MARGIN_LEFT + plot_w / 2.0
        } else {
            MARGIN_LEFT + epoch as f64 / (epochs - 1) as f64 * plot_w
        }
    };
    let y_pos = |value: f64| MARGIN_TOP + plot_h - value / y_max * plot_h;

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}" width="{WIDTH}" height="{HEIGHT}">"#
    ));
    svg.push_str(&format!(
        r#"<rect width="{WIDTH}" height="{HEIGHT}" fill="white"/>"#
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{COLOR_TEXT}">{}</text>"#,
        WIDTH / 2.0,
        escape_xml(title)
    ));

    // Horizontal grid with y-axis labels.
    for i in 0..=5 {
        let fraction = i as f64 / 5.0;
        let y = MARGIN_TOP + plot_h - fraction * plot_h;
        svg.push_str(&format!(
            r#"<line x1="{MARGIN_LEFT}" y1="{y}" x2="{}" y2="{y}" stroke="{COLOR_GRID}" stroke-width="1"/>"#,
            MARGIN_LEFT + plot_w
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{COLOR_TEXT}">{:.2}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            fraction * y_max
        ));
    }

    // Axes.
    svg.push_str(&format!(
        r#"<line x1="{MARGIN_LEFT}" y1="{}" x2="{}" y2="{}" stroke="{COLOR_AXIS}" stroke-width="2"/>"#,
        MARGIN_TOP + plot_h,
        MARGIN_LEFT + plot_w,
        MARGIN_TOP + plot_h
    ));
    svg.push_str(&format!(
        r#"<line x1="{MARGIN_LEFT}" y1="{MARGIN_TOP}" x2="{MARGIN_LEFT}" y2="{}" stroke="{COLOR_AXIS}" stroke-width="2"/>"#,
        MARGIN_TOP + plot_h
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{COLOR_TEXT}">{}</text>"#,
        MARGIN_LEFT + plot_w / 2.0,
        HEIGHT - 20.0,
        escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{COLOR_TEXT}" transform="rotate(-90 20 {})">{}</text>"#,
        HEIGHT / 2.0,
        HEIGHT / 2.0,
        escape_xml(y_label)
    ));

    for (index, series) in series.iter().enumerate() {
        let color = SERIES_COLORS[index % SERIES_COLORS.len()];
        let points: Vec<String> = series
            .values
            .iter()
            .enumerate()
            .map(|(epoch, &value)| format!("{:.1},{:.1}", x_pos(epoch), y_pos(value)))
            .collect();
        svg.push_str(&format!(
            r#"<polyline points="{}" fill="none" stroke="{color}" stroke-width="2"/>"#,
            points.join(" ")
        ));

        // Legend entry.
        let legend_y = MARGIN_TOP + 10.0 + index as f64 * 20.0;
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="12" height="12" fill="{color}"/>"#,
            MARGIN_LEFT + plot_w - 150.0,
            legend_y - 10.0
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{legend_y}" font-family="Arial, sans-serif" font-size="12" fill="{COLOR_TEXT}">{}</text>"#,
            MARGIN_LEFT + plot_w - 132.0,
            escape_xml(&series.name)
        ));
    }

    svg.push_str("</svg>");
    fs::write(output, svg)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_chart_with_all_series() {
        let path = std::env::temp_dir().join("retina_chart_test.svg");
        let series = vec![
            Series {
                name: "Train Accuracy".into(),
                values: vec![55.0, 70.0, 81.0],
            },
            Series {
                name: "Val Accuracy".into(),
                values: vec![50.0, 66.0, 74.0],
            },
        ];
        line_chart("Accuracy", "Epoch", "Accuracy (%)", &series, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();
        assert!(content.starts_with("<svg"));
        assert!(content.contains("Train Accuracy"));
        assert!(content.contains("Val Accuracy"));
        assert!(content.contains("polyline"));
    }

    #[test]
    fn escapes_markup_in_labels() {
        assert_eq!(escape_xml("a<b>&c"), "a&lt;b&gt;&amp;c");
    }
}
