//! Axis resolution shared by the dense transformer and the CSV exporter, so
//! both always agree on what a given index means.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::HeatmapError;
use crate::payload::{as_number, SparseEntry, SparseHeatmapPayload};

#[derive(Debug, Clone, PartialEq)]
pub struct Axes {
    pub times: Vec<DateTime<Utc>>,
    pub prices: Vec<f64>,
}

impl Axes {
    pub fn dims(&self) -> (usize, usize) {
        (self.times.len(), self.prices.len())
    }

    /// Grid cell for a sparse entry, or a bounds error naming the entry.
    pub fn cell(&self, entry_no: usize, entry: &SparseEntry) -> Result<(usize, usize), HeatmapError> {
        let (t, p) = self.dims();
        let in_range = |i: i64, len: usize| i >= 0 && (i as u64) < len as u64;
        if in_range(entry.time_index, t) && in_range(entry.price_index, p) {
            Ok((entry.time_index as usize, entry.price_index as usize))
        } else {
            Err(HeatmapError::IndexOutOfBounds {
                entry: entry_no,
                time_index: entry.time_index,
                price_index: entry.price_index,
                times: t,
                prices: p,
            })
        }
    }
}

pub fn resolve_axes(payload: &SparseHeatmapPayload) -> Result<Axes, HeatmapError> {
    let times = payload
        .chart_time_array
        .iter()
        .enumerate()
        .map(|(i, v)| {
            parse_time(v).ok_or_else(|| {
                HeatmapError::invalid(format!("chartTimeArray[{}]", i), format!("unparseable timestamp {}", v))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let prices = payload
        .price_array
        .iter()
        .enumerate()
        .map(|(i, v)| {
            parse_price(v).ok_or_else(|| {
                HeatmapError::invalid(format!("priceArray[{}]", i), format!("unparseable price {}", v))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Axes { times, prices })
}

/// Epoch milliseconds (number or numeric string) or an ISO-8601 string.
pub fn parse_time(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => millis_to_time(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
            }
            millis_to_time(s.parse::<f64>().ok()?)
        }
        _ => None,
    }
}

fn millis_to_time(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(ms.trunc() as i64)
}

pub fn parse_price(v: &Value) -> Option<f64> {
    as_number(v).filter(|p| p.is_finite())
}

/// ISO-8601 instant with millisecond precision and a `Z` suffix.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_epoch_millis() {
        let t = parse_time(&json!(1000)).unwrap();
        assert_eq!(format_time(&t), "1970-01-01T00:00:01.000Z");
        let t = parse_time(&json!("1717200000000")).unwrap();
        assert_eq!(format_time(&t), "2024-06-01T00:00:00.000Z");
    }

    #[test]
    fn test_iso_strings() {
        let t = parse_time(&json!("2024-06-01T12:30:00+02:00")).unwrap();
        assert_eq!(format_time(&t), "2024-06-01T10:30:00.000Z");
        let t = parse_time(&json!("2024-06-01T12:30:00.250")).unwrap();
        assert_eq!(format_time(&t), "2024-06-01T12:30:00.250Z");
        let t = parse_time(&json!("2024-06-01")).unwrap();
        assert_eq!(format_time(&t), "2024-06-01T00:00:00.000Z");
    }

    #[test]
    fn test_unparseable_time() {
        assert!(parse_time(&json!("yesterday")).is_none());
        assert!(parse_time(&json!(null)).is_none());
        assert!(parse_time(&json!([1])).is_none());
    }

    #[test]
    fn test_prices() {
        assert_eq!(parse_price(&json!("10.0")), Some(10.0));
        assert_eq!(parse_price(&json!(" 64250.5 ")), Some(64250.5));
        assert_eq!(parse_price(&json!(3)), Some(3.0));
        assert_eq!(parse_price(&json!("NaN")), None);
        assert_eq!(parse_price(&json!("abc")), None);
    }

    #[test]
    fn test_resolve_names_bad_axis_item() {
        let payload = SparseHeatmapPayload::from_heatmap(&json!({
            "chartTimeArray": [1000, "nope"],
            "priceArray": ["1"],
            "data": []
        }))
        .unwrap();
        let err = resolve_axes(&payload).unwrap_err();
        assert!(matches!(err, HeatmapError::InvalidField { ref field, .. } if field == "chartTimeArray[1]"));
    }

    #[test]
    fn test_cell_bounds() {
        let axes = Axes {
            times: vec![Utc::now(); 2],
            prices: vec![1.0; 3],
        };
        let entry = |t, p| SparseEntry {
            time_index: t,
            price_index: p,
            value: 1.0,
            raw_value: "1".to_string(),
        };
        assert_eq!(axes.cell(0, &entry(1, 2)).unwrap(), (1, 2));
        assert!(axes.cell(0, &entry(2, 0)).is_err());
        assert!(axes.cell(0, &entry(0, 3)).is_err());
        assert!(axes.cell(0, &entry(-1, 0)).is_err());
        assert!(axes.cell(0, &entry(i64::MAX, 0)).is_err());
    }
}
