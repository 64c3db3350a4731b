//! Sparse-to-dense conversion of a validated heatmap payload.

use std::thread;

use chrono::{DateTime, Utc};

use crate::axis::{resolve_axes, Axes};
use crate::error::HeatmapError;
use crate::logging::{self, v_num, Domain};
use crate::payload::SparseHeatmapPayload;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Skip and count out-of-range entries instead of failing.
    pub lenient: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub entries: usize,
    pub written: usize,
    pub skipped: usize,
    /// Writes that replaced an earlier entry for the same cell
    pub overwritten: usize,
}

/// Fully materialised T x P grid, time-major. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    times: Vec<DateTime<Utc>>,
    prices: Vec<f64>,
    volume: Vec<f64>,
    max_value_hint: Option<f64>,
}

impl DenseMatrix {
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// (time count, price count)
    pub fn dims(&self) -> (usize, usize) {
        (self.times.len(), self.prices.len())
    }

    pub fn get(&self, time_index: usize, price_index: usize) -> Option<f64> {
        let (t, p) = self.dims();
        if time_index < t && price_index < p {
            Some(self.volume[time_index * p + price_index])
        } else {
            None
        }
    }

    /// All price cells for one time step, or `None` past the last one.
    pub fn row(&self, time_index: usize) -> Option<&[f64]> {
        if time_index >= self.times.len() {
            return None;
        }
        let p = self.prices.len();
        self.volume.get(time_index * p..(time_index + 1) * p)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        let p = self.prices.len();
        // chunks(0) panics; a zero-width grid still has T empty rows
        (0..self.times.len()).map(move |t| &self.volume[t * p..(t + 1) * p])
    }

    pub fn max_value_hint(&self) -> Option<f64> {
        self.max_value_hint
    }

    pub fn observed_max(&self) -> f64 {
        self.volume.iter().copied().fold(0.0, f64::max)
    }
}

/// Convert a sparse payload into a dense matrix.
///
/// Entries are applied in sequence order, so a later duplicate of a cell
/// replaces an earlier one. Out-of-range entries fail the whole conversion
/// unless `options.lenient` is set.
pub fn densify(
    payload: &SparseHeatmapPayload,
    options: TransformOptions,
) -> Result<(DenseMatrix, TransformReport), HeatmapError> {
    let axes = resolve_axes(payload)?;
    let (t, p) = axes.dims();

    let mut volume = vec![0.0; t * p];
    let mut touched = vec![false; t * p];
    let mut report = TransformReport {
        entries: payload.data.len(),
        ..Default::default()
    };

    for (i, entry) in payload.data.iter().enumerate() {
        let (ti, pi) = match axes.cell(i, entry) {
            Ok(cell) => cell,
            Err(err) if options.lenient && !err.is_shape_error() => {
                report.skipped += 1;
                logging::debug(
                    Domain::Transform,
                    "transform.skip",
                    &[("reason", serde_json::json!(err.to_string()))],
                );
                continue;
            }
            Err(err) => return Err(err),
        };
        let idx = ti * p + pi;
        if touched[idx] {
            report.overwritten += 1;
        }
        touched[idx] = true;
        volume[idx] = entry.value;
        report.written += 1;
    }

    if report.skipped > 0 {
        logging::warn(
            Domain::Transform,
            "transform.skipped_out_of_range",
            &[
                ("skipped", v_num(report.skipped as f64)),
                ("entries", v_num(report.entries as f64)),
            ],
        );
    }

    let Axes { times, prices } = axes;
    Ok((
        DenseMatrix {
            times,
            prices,
            volume,
            max_value_hint: payload.max_liq_value,
        },
        report,
    ))
}

/// Convert several independent payloads on scoped worker threads. Results
/// keep the input order.
pub fn densify_many(
    payloads: &[SparseHeatmapPayload],
    options: TransformOptions,
) -> Vec<Result<(DenseMatrix, TransformReport), HeatmapError>> {
    if payloads.is_empty() {
        return Vec::new();
    }
    let workers = num_cpus::get().clamp(1, payloads.len());
    let chunk = payloads.len().div_ceil(workers);
    thread::scope(|s| {
        let handles: Vec<_> = payloads
            .chunks(chunk)
            .map(|batch| s.spawn(move || batch.iter().map(|p| densify(p, options)).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(results) => results,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}
