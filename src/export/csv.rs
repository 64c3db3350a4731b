use crate::axis::{format_time, resolve_axes};
use crate::error::HeatmapError;
use crate::payload::SparseHeatmapPayload;
use crate::transform::TransformOptions;

pub const HEADER: &str = "time,price,value";

/// One `time,price,value` line per sparse entry, in payload order.
///
/// Axes are resolved exactly as the dense transformer resolves them, and
/// out-of-range entries follow the same strict/lenient policy.
pub fn render_csv(payload: &SparseHeatmapPayload, options: TransformOptions) -> Result<String, HeatmapError> {
    let axes = resolve_axes(payload)?;
    let mut lines = Vec::with_capacity(payload.data.len() + 1);
    lines.push(HEADER.to_string());
    for (i, entry) in payload.data.iter().enumerate() {
        let (ti, pi) = match axes.cell(i, entry) {
            Ok(cell) => cell,
            Err(_) if options.lenient => continue,
            Err(err) => return Err(err),
        };
        lines.push(format!(
            "{},{},{}",
            format_time(&axes.times[ti]),
            axes.prices[pi],
            entry.raw_value
        ));
    }
    Ok(lines.join("\n"))
}
