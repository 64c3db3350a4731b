use super::grid::GridRender;

/// Self-contained Plotly page for a grid render payload.
pub fn render_html(grid: &GridRender, title: &str) -> String {
    let trace = serde_json::json!({
        "type": "heatmap",
        "x": grid.x,
        "y": grid.y,
        "z": grid.z,
        "zmin": grid.zmin,
        "zmax": grid.zmax,
    });
    let layout = serde_json::json!({
        "title": title,
        "xaxis": { "title": "Time" },
        "yaxis": { "title": "Price" },
    });
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <script src="https://cdn.plot.ly/plotly-latest.min.js"></script>
  <title>{title}</title>
</head>
<body>
  <div id="heatmap" style="width:100%;height:600px;"></div>
  <script>
    Plotly.newPlot('heatmap', [{trace}], {layout});
  </script>
</body>
</html>
"#,
        title = escape_html(title),
        trace = script_safe(&trace.to_string()),
        layout = script_safe(&layout.to_string()),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// JSON inside <script> must not close the element early.
fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/")
}
