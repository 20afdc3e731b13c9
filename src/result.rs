//! Result sink: columns, typed rows, summary statistics.
//!
//! The executor drains the plan root into a [`ResultSet`]; the embedding
//! host renders it (or serializes it to JSON) and appends the summary
//! lines. Backpressure is the host's concern — the sink itself only
//! enforces the configured record cap.

use serde::Serialize;

use crate::model::Value;

/// Mutation counters reported with every query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub indices_created: u64,
    pub constraints_created: u64,
    pub execution_time_ms: u64,
}

impl QueryStats {
    pub fn merge(&mut self, other: &QueryStats) {
        self.nodes_created += other.nodes_created;
        self.nodes_deleted += other.nodes_deleted;
        self.relationships_created += other.relationships_created;
        self.relationships_deleted += other.relationships_deleted;
        self.properties_set += other.properties_set;
        self.labels_added += other.labels_added;
        self.labels_removed += other.labels_removed;
        self.indices_created += other.indices_created;
        self.constraints_created += other.constraints_created;
    }
}

/// A completed query result: a column header, rows of values, and the
/// summary statistics.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub stats: QueryStats,
}

impl ResultSet {
    pub fn empty(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new(), stats: QueryStats::default() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> &[Value] {
        &self.rows[i]
    }

    /// Value by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }

    /// Flatten a single column into a value list; test helpers lean on it.
    pub fn column(&self, column: &str) -> Vec<Value> {
        let Some(col) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        self.rows.iter().filter_map(|r| r.get(col).cloned()).collect()
    }

    /// Per-column type names of the first row ("the type header"); an
    /// empty result has no types.
    pub fn column_types(&self) -> Vec<&'static str> {
        match self.rows.first() {
            Some(row) => row.iter().map(Value::type_name).collect(),
            None => Vec::new(),
        }
    }

    /// Summary lines in the classic "Nodes created: 1" shape. Zero
    /// counters are omitted; the timing line is always present.
    pub fn summary(&self) -> Vec<String> {
        let mut out = Vec::new();
        let s = &self.stats;
        for (count, label) in [
            (s.labels_added, "Labels added"),
            (s.labels_removed, "Labels removed"),
            (s.nodes_created, "Nodes created"),
            (s.nodes_deleted, "Nodes deleted"),
            (s.properties_set, "Properties set"),
            (s.relationships_created, "Relationships created"),
            (s.relationships_deleted, "Relationships deleted"),
            (s.indices_created, "Indices created"),
            (s.constraints_created, "Constraints created"),
        ] {
            if count > 0 {
                out.push(format!("{label}: {count}"));
            }
        }
        out.push(format!(
            "Query internal execution time: {} milliseconds",
            s.execution_time_ms
        ));
        out
    }

    /// JSON rendering: header, rows, statistics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "columns": self.columns,
            "rows": self.rows.iter().map(|row| {
                row.iter().map(value_to_json).collect::<Vec<_>>()
            }).collect::<Vec<_>>(),
            "statistics": self.summary(),
        })
    }
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::json!(b),
        Value::Int(i) => serde_json::json!(i),
        Value::Double(f) => serde_json::json!(f),
        Value::String(s) => serde_json::json!(s),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Point { latitude, longitude } => {
            serde_json::json!({ "latitude": latitude, "longitude": longitude })
        }
        Value::Node(n) => serde_json::json!({
            "id": n.id.0,
            "labels": n.labels,
            "properties": n.properties.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect::<serde_json::Map<String, serde_json::Value>>(),
        }),
        Value::Edge(e) => serde_json::json!({
            "id": e.id.0,
            "src": e.src.0,
            "dst": e.dst.0,
            "relation": e.relation,
            "properties": e.properties.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect::<serde_json::Map<String, serde_json::Value>>(),
        }),
        Value::Path(p) => serde_json::json!({
            "nodes": p.nodes.iter().map(|n| value_to_json(&Value::Node(Box::new(n.clone())))).collect::<Vec<_>>(),
            "edges": p.edges.iter().map(|e| value_to_json(&Value::Edge(Box::new(e.clone())))).collect::<Vec<_>>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_column_access() {
        let rs = ResultSet {
            columns: vec!["a".into(), "b".into()],
            rows: vec![
                vec![Value::Int(1), Value::from("x")],
                vec![Value::Int(2), Value::from("y")],
            ],
            stats: QueryStats::default(),
        };
        assert_eq!(rs.get(1, "b"), Some(&Value::from("y")));
        assert_eq!(rs.column("a"), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(rs.column_types(), vec!["INTEGER", "STRING"]);
    }

    #[test]
    fn test_summary_omits_zero_counters() {
        let mut rs = ResultSet::empty(vec![]);
        rs.stats.nodes_created = 2;
        let summary = rs.summary();
        assert!(summary.iter().any(|l| l == "Nodes created: 2"));
        assert!(!summary.iter().any(|l| l.starts_with("Nodes deleted")));
        assert!(summary.last().unwrap().contains("execution time"));
    }

    #[test]
    fn test_json_shape() {
        let rs = ResultSet {
            columns: vec!["n".into()],
            rows: vec![vec![Value::Int(5)]],
            stats: QueryStats::default(),
        };
        let json = rs.to_json();
        assert_eq!(json["columns"][0], "n");
        assert_eq!(json["rows"][0][0], 5);
    }
}
