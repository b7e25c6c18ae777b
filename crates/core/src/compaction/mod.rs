//! # Result Compaction
//!
//! Replaces large tabular tool results with a bounded summary: a row sample,
//! numeric aggregates and small categorical previews. The query that produced
//! the rows is kept so the agent can re-fetch the full data on demand.
//!
//! Compaction is idempotent: a value carrying the compaction marker passes
//! through untouched.

pub mod history;

pub use history::{compact_history, Compactor, HistoryProcessor, Turn};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field marking a value as already compacted
pub const COMPACTION_MARKER: &str = "_compacted";

/// Columns with more distinct values than this get no categorical preview
pub const DISTINCT_VALUE_LIMIT: usize = 20;

/// Identifier-like columns skipped for aggregates and previews
const IDENTIFIER_COLUMNS: &[&str] = &["id", "labels"];

/// Compaction thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Tool results with at least this many rows are compacted
    #[serde(default = "default_min_rows")]
    pub min_rows_to_compact: usize,
    /// Rows kept verbatim in the sample
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Leave the trailing tool results (not yet seen by the agent) at full fidelity
    #[serde(default = "default_preserve_latest")]
    pub preserve_latest: bool,
}

fn default_min_rows() -> usize {
    20
}

fn default_sample_size() -> usize {
    10
}

fn default_preserve_latest() -> bool {
    true
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_rows_to_compact: default_min_rows(),
            sample_size: default_sample_size(),
            preserve_latest: default_preserve_latest(),
        }
    }
}

/// min/max/sum/avg over the numeric values of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericAggregate {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub avg: f64,
    pub count: usize,
}

/// Bounded stand-in for a raw tabular result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactedResult {
    #[serde(rename = "_compacted")]
    pub marker: bool,
    /// Key (usually the query text) to re-fetch the full result
    pub original_query: String,
    pub result_count: usize,
    pub truncated: bool,
    pub summary: String,
    pub columns: Vec<String>,
    pub sample: Vec<Value>,
    pub aggregates: BTreeMap<String, NumericAggregate>,
    pub distinct_values: BTreeMap<String, Vec<String>>,
}

/// True iff `value` is an object with a list-valued `results` field
pub fn is_compactable(value: &Value) -> bool {
    value.get("results").map(Value::is_array).unwrap_or(false)
}

/// True iff `value` carries a compaction marker, its own or an upstream one
pub fn is_already_compacted(value: &Value) -> bool {
    [COMPACTION_MARKER, "compacted"]
        .iter()
        .any(|field| value.get(*field).and_then(Value::as_bool).unwrap_or(false))
}

/// Number of rows a tabular result stands for
pub fn row_count(value: &Value) -> usize {
    let listed = value
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    value
        .get("result_count")
        .and_then(Value::as_u64)
        .map(|declared| (declared as usize).max(listed))
        .unwrap_or(listed)
}

/// Compact `value`, keeping `original_key` for re-fetching.
///
/// Already-compacted and non-tabular values are returned unchanged.
pub fn compact(value: &Value, original_key: &str, sample_size: usize) -> Value {
    if is_already_compacted(value) || !is_compactable(value) {
        return value.clone();
    }

    let rows = value
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let truncated = value
        .get("truncated")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut compacted = summarize(rows, original_key, sample_size, truncated);
    compacted.result_count = row_count(value);

    serde_json::to_value(&compacted).unwrap_or_else(|e| {
        tracing::warn!("Failed to serialize compacted result: {}", e);
        value.clone()
    })
}

/// Build the [`CompactedResult`] for a list of rows
pub fn summarize(
    rows: &[Value],
    original_key: &str,
    sample_size: usize,
    truncated: bool,
) -> CompactedResult {
    if rows.is_empty() {
        return CompactedResult {
            marker: true,
            original_query: original_key.to_string(),
            result_count: 0,
            truncated,
            summary: "Query returned no results.".to_string(),
            columns: Vec::new(),
            sample: Vec::new(),
            aggregates: BTreeMap::new(),
            distinct_values: BTreeMap::new(),
        };
    }

    let columns: Vec<String> = rows[0]
        .as_object()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();

    let mut aggregates = BTreeMap::new();
    let mut distinct_values = BTreeMap::new();

    for column in columns
        .iter()
        .filter(|c| !IDENTIFIER_COLUMNS.contains(&c.as_str()))
    {
        let cells: Vec<&Value> = rows.iter().filter_map(|row| row.get(column)).collect();

        if let Some(aggregate) = aggregate(&cells) {
            aggregates.insert(column.clone(), aggregate);
        }
        if let Some(values) = distinct_strings(&cells) {
            distinct_values.insert(column.clone(), values);
        }
    }

    let sample: Vec<Value> = rows.iter().take(sample_size).cloned().collect();

    CompactedResult {
        marker: true,
        original_query: original_key.to_string(),
        result_count: rows.len(),
        truncated,
        summary: format!(
            "{} rows compacted to a {}-row sample over columns [{}]. \
             Re-run the original query to fetch the full result.",
            rows.len(),
            sample.len(),
            columns.join(", ")
        ),
        columns,
        sample,
        aggregates,
        distinct_values,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn aggregate(cells: &[&Value]) -> Option<NumericAggregate> {
    let numbers: Vec<f64> = cells.iter().filter_map(|v| numeric(v)).collect();
    if numbers.is_empty() {
        return None;
    }

    let sum: f64 = numbers.iter().sum();
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(NumericAggregate {
        min,
        max,
        sum,
        avg: sum / numbers.len() as f64,
        count: numbers.len(),
    })
}

fn distinct_strings(cells: &[&Value]) -> Option<Vec<String>> {
    let mut seen: Vec<String> = Vec::new();
    for cell in cells {
        if let Value::String(s) = cell {
            if !seen.iter().any(|existing| existing == s) {
                if seen.len() == DISTINCT_VALUE_LIMIT {
                    return None;
                }
                seen.push(s.clone());
            }
        }
    }
    (!seen.is_empty()).then_some(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_with_rows(n: usize) -> Value {
        let rows: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "id": format!("row-{}", i),
                    "region": if i % 2 == 0 { "emea" } else { "apac" },
                    "revenue": i * 10,
                    "margin": format!("{}.5", i),
                })
            })
            .collect();
        json!({ "results": rows })
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let raw = result_with_rows(25);
        let once = compact(&raw, "MATCH (a) RETURN a", 10);
        let twice = compact(&once, "MATCH (a) RETURN a", 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sample_is_bounded_and_count_preserved() {
        let raw = result_with_rows(25);
        let compacted: CompactedResult =
            serde_json::from_value(compact(&raw, "q", 10)).unwrap();

        assert!(compacted.marker);
        assert_eq!(compacted.result_count, 25);
        assert_eq!(compacted.sample.len(), 10);
        assert_eq!(compacted.original_query, "q");
    }

    #[test]
    fn test_aggregates_skip_identifier_columns() {
        let compacted = summarize(
            result_with_rows(4)["results"].as_array().unwrap(),
            "q",
            2,
            false,
        );

        let revenue = &compacted.aggregates["revenue"];
        assert_eq!(revenue.count, 4);
        assert_eq!(revenue.min, 0.0);
        assert_eq!(revenue.max, 30.0);
        assert_eq!(revenue.sum, 60.0);
        assert_eq!(revenue.avg, 15.0);

        // numeric strings still aggregate
        assert_eq!(compacted.aggregates["margin"].count, 4);
        assert!(!compacted.aggregates.contains_key("id"));
        assert!(!compacted.distinct_values.contains_key("id"));
    }

    #[test]
    fn test_non_numeric_column_has_no_aggregate() {
        let compacted = summarize(
            result_with_rows(4)["results"].as_array().unwrap(),
            "q",
            2,
            false,
        );
        assert!(!compacted.aggregates.contains_key("region"));
        assert_eq!(
            compacted.distinct_values["region"],
            vec!["emea".to_string(), "apac".to_string()]
        );
    }

    #[test]
    fn test_high_cardinality_column_has_no_preview() {
        let rows: Vec<Value> = (0..30)
            .map(|i| json!({ "name": format!("customer-{}", i) }))
            .collect();
        let compacted = summarize(&rows, "q", 5, false);
        assert!(!compacted.distinct_values.contains_key("name"));
    }

    #[test]
    fn test_empty_results() {
        let compacted: CompactedResult =
            serde_json::from_value(compact(&json!({ "results": [] }), "q", 10)).unwrap();
        assert_eq!(compacted.result_count, 0);
        assert!(compacted.sample.is_empty());
        assert!(compacted.columns.is_empty());
        assert!(compacted.summary.contains("no results"));
    }

    #[test]
    fn test_detection() {
        assert!(is_compactable(&json!({ "results": [] })));
        assert!(!is_compactable(&json!({ "results": "nope" })));
        assert!(!is_compactable(&json!("text")));
        assert!(is_already_compacted(&json!({ "_compacted": true })));
        assert!(is_already_compacted(&json!({ "compacted": true, "results": [] })));
        assert!(!is_already_compacted(&json!({ "results": [] })));
    }

    #[test]
    fn test_upstream_compacted_value_passes_through() {
        let upstream = json!({ "compacted": true, "results": [1, 2, 3] });
        assert_eq!(compact(&upstream, "q", 1), upstream);
    }
}
