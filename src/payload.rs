//! Upstream liquidation-heatmap data contract.
//!
//! The endpoint answers with an envelope `{ success, msg, data: { liqHeatMap } }`.
//! `liqHeatMap` lists T timestamps, P price levels and the non-zero cells of
//! the T x P grid as `[timeIndex, priceIndex, value]` triples.

use serde::Deserialize;
use serde_json::Value;

use crate::error::HeatmapError;

#[derive(Debug, Clone, PartialEq)]
pub struct SparseEntry {
    pub time_index: i64,
    pub price_index: i64,
    pub value: f64,
    /// Value exactly as it appeared upstream, for exporters that must not
    /// reformat it.
    pub raw_value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseHeatmapPayload {
    pub chart_time_array: Vec<Value>,
    pub price_array: Vec<Value>,
    pub data: Vec<SparseEntry>,
    /// Colour-scale ceiling hint; never used for correctness.
    pub max_liq_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl SparseHeatmapPayload {
    /// Extract and validate `data.liqHeatMap` from a full API response.
    pub fn from_response(response: &Value) -> Result<Self, HeatmapError> {
        let envelope = Envelope::deserialize(response)
            .map_err(|e| HeatmapError::invalid("response", e.to_string()))?;
        if envelope.success == Some(false) {
            return Err(HeatmapError::Rejected {
                message: envelope.msg.unwrap_or_else(|| "success=false".to_string()),
            });
        }
        let heatmap = envelope
            .data
            .as_ref()
            .and_then(|d| d.get("liqHeatMap"))
            .ok_or(HeatmapError::MissingField("data.liqHeatMap"))?;
        Self::from_heatmap(heatmap)
    }

    /// Validate a bare `liqHeatMap` object.
    ///
    /// Every required field is checked before anything is built, so a
    /// malformed payload never yields a partial result. Index range is not
    /// checked here: it depends on the axes and belongs to the consumers.
    pub fn from_heatmap(heatmap: &Value) -> Result<Self, HeatmapError> {
        let obj = heatmap
            .as_object()
            .ok_or_else(|| HeatmapError::invalid("liqHeatMap", "expected an object"))?;

        let chart_time_array = required_array(obj, "chartTimeArray")?.clone();
        let price_array = required_array(obj, "priceArray")?.clone();
        let raw_data = required_array(obj, "data")?;

        let data = raw_data
            .iter()
            .enumerate()
            .map(|(i, triple)| parse_entry(i, triple))
            .collect::<Result<Vec<_>, _>>()?;

        let max_liq_value = match obj.get("maxLiqValue") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                as_number(v).ok_or_else(|| HeatmapError::invalid("maxLiqValue", "expected a number"))?,
            ),
        };

        Ok(Self {
            chart_time_array,
            price_array,
            data,
            max_liq_value,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.chart_time_array.len(), self.price_array.len())
    }
}

fn required_array<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a Vec<Value>, HeatmapError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(HeatmapError::MissingField(field)),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(HeatmapError::invalid(field, "expected an array")),
    }
}

fn parse_entry(i: usize, triple: &Value) -> Result<SparseEntry, HeatmapError> {
    let field = || format!("data[{}]", i);
    let items = triple
        .as_array()
        .ok_or_else(|| HeatmapError::invalid(field(), "expected [timeIndex, priceIndex, value]"))?;
    if items.len() != 3 {
        return Err(HeatmapError::invalid(
            field(),
            format!("expected 3 elements, got {}", items.len()),
        ));
    }
    let time_index = as_index(&items[0])
        .ok_or_else(|| HeatmapError::invalid(field(), "timeIndex is not an integer"))?;
    let price_index = as_index(&items[1])
        .ok_or_else(|| HeatmapError::invalid(field(), "priceIndex is not an integer"))?;
    let value = as_number(&items[2])
        .ok_or_else(|| HeatmapError::invalid(field(), "value is not a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(HeatmapError::invalid(
            field(),
            format!("value {} is not a non-negative magnitude", value),
        ));
    }
    // Number tokens keep their source text (serde_json `arbitrary_precision`).
    let raw_value = match &items[2] {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    Ok(SparseEntry {
        time_index,
        price_index,
        value,
        raw_value,
    })
}

/// Integer index from a JSON integer, an integral float, or a numeric string.
/// Indices too large for `i64` saturate so they still fail the bounds check.
fn as_index(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if n.as_u64().is_some() {
                Some(i64::MAX)
            } else {
                n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64)
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub(crate) fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
