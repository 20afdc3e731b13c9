//! Aggregation state machine.
//!
//! Each aggregate instance moves through { Init, Accumulating, Terminal,
//! Finalized }. Identity-bearing monoids (count, sum, collect) start from
//! their identity in Init; monoids with a known absorbing value (any over
//! booleans, all over booleans) short-circuit into Terminal and ignore
//! further input. `finalize` is called exactly once.
//!
//! Boolean min/max normalize to the logical AND/OR monoids here; the
//! renaming is internal and never leaks into user-visible typing.

use crate::model::Value;
use crate::plan::AggKind;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggState {
    Init,
    Accumulating,
    /// Absorbing value reached; further input cannot change the result.
    Terminal,
    Finalized,
}

#[derive(Debug)]
pub struct Aggregate {
    kind: AggKind,
    state: AggState,
    distinct: bool,
    seen: Vec<Value>,
    count: i64,
    sum_int: i64,
    sum_double: f64,
    saw_double: bool,
    best: Option<Value>,
    collected: Vec<Value>,
    flag: bool,
}

impl Aggregate {
    pub fn new(kind: AggKind, distinct: bool) -> Self {
        let flag = match kind {
            // all() starts true, any() starts false
            AggKind::All => true,
            _ => false,
        };
        Self {
            kind,
            state: AggState::Init,
            distinct,
            seen: Vec::new(),
            count: 0,
            sum_int: 0,
            sum_double: 0.0,
            saw_double: false,
            best: None,
            collected: Vec::new(),
            flag,
        }
    }

    pub fn state(&self) -> AggState {
        self.state
    }

    /// Feed one input value. NULL contributes nothing (except to
    /// count(*), which the caller steps with a non-null marker).
    pub fn step(&mut self, value: Value) -> Result<()> {
        debug_assert!(self.state != AggState::Finalized, "step after finalize");
        if self.state == AggState::Terminal {
            return Ok(());
        }
        if value.is_null() {
            return Ok(());
        }
        if self.distinct {
            if self.seen.contains(&value) {
                return Ok(());
            }
            self.seen.push(value.clone());
        }
        self.state = AggState::Accumulating;

        match self.kind {
            AggKind::CountStar | AggKind::Count => {
                self.count += 1;
            }
            AggKind::Sum => match &value {
                Value::Int(i) => self.sum_int += i,
                Value::Double(f) => {
                    self.saw_double = true;
                    self.sum_double += f;
                }
                other => {
                    return Err(Error::RuntimeType {
                        expected: "numeric".into(),
                        got: other.type_name().into(),
                    });
                }
            },
            AggKind::Avg => {
                let Some(f) = value.as_double() else {
                    return Err(Error::RuntimeType {
                        expected: "numeric".into(),
                        got: value.type_name().into(),
                    });
                };
                self.sum_double += f;
                self.count += 1;
            }
            AggKind::Min | AggKind::Max => {
                // boolean min is logical AND, boolean max is logical OR;
                // false (resp. true) is absorbing
                if let Value::Bool(b) = value {
                    let folded = match (&self.best, self.kind) {
                        (None, _) => b,
                        (Some(Value::Bool(cur)), AggKind::Min) => *cur && b,
                        (Some(Value::Bool(cur)), _) => *cur || b,
                        (Some(_), _) => b,
                    };
                    let absorbing = self.kind == AggKind::Max;
                    self.best = Some(Value::Bool(folded));
                    if folded == absorbing {
                        self.state = AggState::Terminal;
                    }
                    return Ok(());
                }
                let replace = match &self.best {
                    None => true,
                    Some(current) => {
                        let ord = value.total_cmp(current);
                        if self.kind == AggKind::Min {
                            ord == std::cmp::Ordering::Less
                        } else {
                            ord == std::cmp::Ordering::Greater
                        }
                    }
                };
                if replace {
                    self.best = Some(value);
                }
            }
            AggKind::Collect => {
                self.collected.push(value);
            }
            AggKind::Any => {
                if value.is_truthy() {
                    self.flag = true;
                    self.state = AggState::Terminal;
                }
            }
            AggKind::All => {
                if !value.is_truthy() {
                    self.flag = false;
                    self.state = AggState::Terminal;
                }
            }
        }
        Ok(())
    }

    /// Close the aggregate and produce its value. Over an empty input,
    /// identity-bearing monoids yield their identity and the rest NULL.
    pub fn finalize(&mut self) -> Value {
        let never_stepped = self.state == AggState::Init;
        let result = match self.kind {
            AggKind::CountStar | AggKind::Count => Value::Int(self.count),
            AggKind::Sum => {
                if self.saw_double {
                    Value::Double(self.sum_int as f64 + self.sum_double)
                } else {
                    Value::Int(self.sum_int)
                }
            }
            AggKind::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Double(self.sum_double / self.count as f64)
                }
            }
            AggKind::Min | AggKind::Max => self.best.take().unwrap_or(Value::Null),
            AggKind::Collect => Value::Array(std::mem::take(&mut self.collected)),
            AggKind::Any => {
                if never_stepped {
                    Value::Null
                } else {
                    Value::Bool(self.flag)
                }
            }
            AggKind::All => {
                if never_stepped {
                    Value::Null
                } else {
                    Value::Bool(self.flag)
                }
            }
        };
        self.state = AggState::Finalized;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_count_identity_on_empty() {
        let mut agg = Aggregate::new(AggKind::Count, false);
        assert_eq!(agg.state(), AggState::Init);
        assert_eq!(agg.finalize(), Value::Int(0));
    }

    #[test]
    fn test_sum_identity_on_empty() {
        let mut agg = Aggregate::new(AggKind::Sum, false);
        assert_eq!(agg.finalize(), Value::Int(0));
    }

    #[test]
    fn test_avg_null_on_empty() {
        let mut agg = Aggregate::new(AggKind::Avg, false);
        assert_eq!(agg.finalize(), Value::Null);
    }

    #[test]
    fn test_collect_identity_is_empty_list() {
        let mut agg = Aggregate::new(AggKind::Collect, false);
        assert_eq!(agg.finalize(), Value::Array(vec![]));
    }

    #[test]
    fn test_sum_mixed_promotes_to_double() {
        let mut agg = Aggregate::new(AggKind::Sum, false);
        agg.step(Value::Int(1)).unwrap();
        agg.step(Value::Double(0.5)).unwrap();
        assert_eq!(agg.finalize(), Value::Double(1.5));
    }

    #[test]
    fn test_min_max() {
        let mut min = Aggregate::new(AggKind::Min, false);
        let mut max = Aggregate::new(AggKind::Max, false);
        for v in [3, 1, 2] {
            min.step(Value::Int(v)).unwrap();
            max.step(Value::Int(v)).unwrap();
        }
        assert_eq!(min.finalize(), Value::Int(1));
        assert_eq!(max.finalize(), Value::Int(3));
    }

    #[test]
    fn test_boolean_min_is_logical_and() {
        let mut agg = Aggregate::new(AggKind::Min, false);
        agg.step(Value::Bool(true)).unwrap();
        assert_eq!(agg.state(), AggState::Accumulating);
        agg.step(Value::Bool(false)).unwrap();
        // absorbing value reached
        assert_eq!(agg.state(), AggState::Terminal);
        agg.step(Value::Bool(true)).unwrap();
        assert_eq!(agg.finalize(), Value::Bool(false));
    }

    #[test]
    fn test_any_short_circuits() {
        let mut agg = Aggregate::new(AggKind::Any, false);
        agg.step(Value::Bool(false)).unwrap();
        assert_eq!(agg.state(), AggState::Accumulating);
        agg.step(Value::Bool(true)).unwrap();
        assert_eq!(agg.state(), AggState::Terminal);
        assert_eq!(agg.finalize(), Value::Bool(true));
    }

    #[test]
    fn test_distinct_count() {
        let mut agg = Aggregate::new(AggKind::Count, true);
        for v in [1, 1, 2, 2, 3] {
            agg.step(Value::Int(v)).unwrap();
        }
        assert_eq!(agg.finalize(), Value::Int(3));
    }

    #[test]
    fn test_null_is_skipped() {
        let mut agg = Aggregate::new(AggKind::Count, false);
        agg.step(Value::Null).unwrap();
        agg.step(Value::Int(1)).unwrap();
        assert_eq!(agg.finalize(), Value::Int(1));
    }
}
