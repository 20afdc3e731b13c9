//! Per-graph tunables.
//!
//! Changes take effect for subsequent queries; a running query keeps the
//! values it started with.

use crate::model::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Worker threads a single query's matrix operations may use.
    pub thread_count: u32,
    /// Compiled-plan cache capacity (entries); 0 disables caching.
    pub cache_size: usize,
    /// Default query timeout; 0 means no deadline.
    pub timeout_default_ms: u64,
    /// Upper bound a caller-supplied timeout is clamped to; 0 means no cap.
    pub timeout_max_ms: u64,
    /// Result-set record cap; 0 means unlimited.
    pub result_set_max_unstable_records: u64,
    /// Entities buffered by the bulk loader between flushes.
    pub node_creation_buffer: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            cache_size: 64,
            timeout_default_ms: 0,
            timeout_max_ms: 0,
            result_set_max_unstable_records: 0,
            node_creation_buffer: 16_384,
        }
    }
}

impl GraphConfig {
    pub const NAMES: &'static [&'static str] = &[
        "thread_count",
        "cache_size",
        "timeout_default_ms",
        "timeout_max_ms",
        "result_set_max_unstable_records",
        "node_creation_buffer",
    ];

    pub fn get(&self, name: &str) -> Result<Value> {
        Ok(match name {
            "thread_count" => Value::Int(self.thread_count as i64),
            "cache_size" => Value::Int(self.cache_size as i64),
            "timeout_default_ms" => Value::Int(self.timeout_default_ms as i64),
            "timeout_max_ms" => Value::Int(self.timeout_max_ms as i64),
            "result_set_max_unstable_records" => {
                Value::Int(self.result_set_max_unstable_records as i64)
            }
            "node_creation_buffer" => Value::Int(self.node_creation_buffer as i64),
            other => return Err(Error::Semantic(format!("unknown config parameter: {other}"))),
        })
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        let n = value.as_int().ok_or_else(|| Error::RuntimeType {
            expected: format!("integer value for {name}"),
            got: value.type_name().into(),
        })?;
        if n < 0 {
            return Err(Error::Semantic(format!("{name} cannot be negative")));
        }
        match name {
            "thread_count" => self.thread_count = n as u32,
            "cache_size" => self.cache_size = n as usize,
            "timeout_default_ms" => self.timeout_default_ms = n as u64,
            "timeout_max_ms" => self.timeout_max_ms = n as u64,
            "result_set_max_unstable_records" => self.result_set_max_unstable_records = n as u64,
            "node_creation_buffer" => self.node_creation_buffer = n as u64,
            other => return Err(Error::Semantic(format!("unknown config parameter: {other}"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_set_roundtrip() {
        let mut config = GraphConfig::default();
        config.set("cache_size", &Value::Int(128)).unwrap();
        assert_eq!(config.get("cache_size").unwrap(), Value::Int(128));
    }

    #[test]
    fn test_unknown_parameter() {
        let config = GraphConfig::default();
        assert!(config.get("no_such_knob").is_err());
    }

    #[test]
    fn test_negative_rejected() {
        let mut config = GraphConfig::default();
        assert!(config.set("thread_count", &Value::Int(-1)).is_err());
    }
}
