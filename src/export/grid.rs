use serde::Serialize;

use crate::axis::format_time;
use crate::transform::DenseMatrix;

/// Render-ready heatmap: `z[price][time]`, with `x` the ISO times and `y`
/// the prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridRender {
    pub x: Vec<String>,
    pub y: Vec<f64>,
    pub z: Vec<Vec<f64>>,
    pub zmin: f64,
    pub zmax: f64,
}

impl GridRender {
    pub fn from_matrix(matrix: &DenseMatrix) -> Self {
        let (t, p) = matrix.dims();
        let mut z = vec![Vec::with_capacity(t); p];
        for row in matrix.rows() {
            for (pi, v) in row.iter().enumerate() {
                z[pi].push(*v);
            }
        }
        // The upstream ceiling is only a hint; fall back to the data when it
        // is absent or unusable.
        let zmax = matrix
            .max_value_hint()
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or_else(|| matrix.observed_max());
        Self {
            x: matrix.times().iter().map(format_time).collect(),
            y: matrix.prices().to_vec(),
            z,
            zmin: 0.0,
            zmax,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::SparseHeatmapPayload;
    use crate::transform::{densify, TransformOptions};
    use serde_json::json;

    fn matrix(hint: serde_json::Value) -> DenseMatrix {
        let p = SparseHeatmapPayload::from_heatmap(&json!({
            "chartTimeArray": [1000, 2000, 3000],
            "priceArray": ["10", "20"],
            "data": [[0, 1, 5], [2, 0, 3]],
            "maxLiqValue": hint
        }))
        .unwrap();
        densify(&p, TransformOptions::default()).unwrap().0
    }

    #[test]
    fn test_price_major_orientation() {
        let g = GridRender::from_matrix(&matrix(json!(50)));
        assert_eq!(g.y, vec![10.0, 20.0]);
        assert_eq!(g.x.len(), 3);
        assert_eq!(g.x[0], "1970-01-01T00:00:01.000Z");
        assert_eq!(g.z, vec![vec![0.0, 0.0, 3.0], vec![5.0, 0.0, 0.0]]);
        assert_eq!(g.zmax, 50.0);
        assert_eq!(g.zmin, 0.0);
    }

    #[test]
    fn test_missing_hint_uses_observed_max() {
        let g = GridRender::from_matrix(&matrix(json!(null)));
        assert_eq!(g.zmax, 5.0);
    }

    #[test]
    fn test_json_field_names() {
        let v: serde_json::Value = serde_json::from_str(&GridRender::from_matrix(&matrix(json!(8))).to_json()).unwrap();
        for key in ["x", "y", "z", "zmin", "zmax"] {
            assert!(v.get(key).is_some(), "missing {}", key);
        }
    }
}
