//! Runtime expression evaluation.
//!
//! Expressions evaluate against a record (slot-addressed through the
//! query's layout), the query parameters, and the graph store (for the
//! few functions that must materialize entities). NULL propagates through
//! operators the way Cypher prescribes; dynamic type mismatches surface as
//! `RuntimeType` errors.

use hashbrown::HashMap;

use crate::cypher::ast::{BinaryOp, Expr, Literal, MapSelector, StringOp, UnaryOp};
use crate::model::{PropertyMap, Value};
use crate::store::GraphStore;
use crate::{Error, Result};

use super::record::{Record, RecordLayout};

/// Everything an expression can see.
pub struct EvalEnv<'a> {
    pub layout: &'a RecordLayout,
    pub params: &'a PropertyMap,
    pub graph: &'a GraphStore,
}

pub fn eval(expr: &Expr, record: &Record, env: &EvalEnv<'_>) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Double(f) => Value::Double(*f),
            Literal::String(s) => Value::String(s.clone()),
        }),

        Expr::Variable(name) => {
            let slot = env.layout.slot(name).ok_or_else(|| {
                Error::Semantic(format!("'{name}' not defined"))
            })?;
            Ok(record.get(slot).clone())
        }

        Expr::Parameter(name) => {
            env.params.get(name).cloned().ok_or_else(|| {
                Error::Semantic(format!("missing parameter: ${name}"))
            })
        }

        Expr::Property { expr: inner, key } => {
            let val = eval(inner, record, env)?;
            match val {
                Value::Node(n) => Ok(n.get(key).cloned().unwrap_or(Value::Null)),
                Value::Edge(e) => Ok(e.get(key).cloned().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::RuntimeType {
                    expected: "node or edge".into(),
                    got: other.type_name().into(),
                }),
            }
        }

        Expr::FunctionCall { name, args, .. } => eval_function(name, args, record, env),

        Expr::BinaryOp { left, op, right } => {
            // short-circuit logic operators
            match op {
                BinaryOp::And => {
                    let lv = eval(left, record, env)?;
                    if !lv.is_null() && !lv.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    let rv = eval(right, record, env)?;
                    if !rv.is_null() && !rv.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    if lv.is_null() || rv.is_null() {
                        return Ok(Value::Null);
                    }
                    return Ok(Value::Bool(true));
                }
                BinaryOp::Or => {
                    let lv = eval(left, record, env)?;
                    if lv.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    let rv = eval(right, record, env)?;
                    if rv.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    if lv.is_null() || rv.is_null() {
                        return Ok(Value::Null);
                    }
                    return Ok(Value::Bool(false));
                }
                _ => {}
            }
            let lv = eval(left, record, env)?;
            let rv = eval(right, record, env)?;
            eval_binary_op(&lv, *op, &rv)
        }

        Expr::UnaryOp { op, expr: inner } => {
            let val = eval(inner, record, env)?;
            match op {
                UnaryOp::Not => match val {
                    Value::Null => Ok(Value::Null),
                    v => Ok(Value::Bool(!v.is_truthy())),
                },
                UnaryOp::Negate => match val {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Double(f) => Ok(Value::Double(-f)),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::RuntimeType {
                        expected: "numeric".into(),
                        got: other.type_name().into(),
                    }),
                },
            }
        }

        Expr::List(items) => {
            let vals: Vec<Value> = items
                .iter()
                .map(|e| eval(e, record, env))
                .collect::<Result<_>>()?;
            Ok(Value::Array(vals))
        }

        Expr::Map(entries) => {
            // duplicate keys resolve last-write-wins
            let mut map = HashMap::new();
            for (k, v) in entries {
                map.insert(k.clone(), eval(v, record, env)?);
            }
            Ok(value_map(map))
        }

        Expr::Subscript { expr: inner, index } => {
            let container = eval(inner, record, env)?;
            let idx = eval(index, record, env)?;
            eval_subscript(container, idx)
        }

        Expr::IsNull { expr: inner, negated } => {
            let val = eval(inner, record, env)?;
            let is_null = val.is_null();
            Ok(Value::Bool(if *negated { !is_null } else { is_null }))
        }

        Expr::In { expr: item, list } => {
            let item_val = eval(item, record, env)?;
            let list_val = eval(list, record, env)?;
            match list_val {
                Value::Null => Ok(Value::Null),
                Value::Array(items) => {
                    if item_val.is_null() {
                        Ok(Value::Null)
                    } else {
                        Ok(Value::Bool(items.contains(&item_val)))
                    }
                }
                other => Err(Error::RuntimeType {
                    expected: "list".into(),
                    got: other.type_name().into(),
                }),
            }
        }

        Expr::HasLabel { expr: inner, label } => {
            let val = eval(inner, record, env)?;
            match val {
                Value::Node(n) => Ok(Value::Bool(n.has_label(label))),
                Value::Null => Ok(Value::Null),
                other => Err(Error::RuntimeType {
                    expected: "node".into(),
                    got: other.type_name().into(),
                }),
            }
        }

        Expr::StringOp { left, op, right } => {
            let lv = eval(left, record, env)?;
            let rv = eval(right, record, env)?;
            match (&lv, &rv) {
                (Value::String(a), Value::String(b)) => {
                    let result = match op {
                        StringOp::StartsWith => a.starts_with(b.as_str()),
                        StringOp::EndsWith => a.ends_with(b.as_str()),
                        StringOp::Contains => a.contains(b.as_str()),
                    };
                    Ok(Value::Bool(result))
                }
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                _ => Err(Error::RuntimeType {
                    expected: "string".into(),
                    got: format!("{}, {}", lv.type_name(), rv.type_name()),
                }),
            }
        }

        Expr::Case { operand, whens, else_expr } => {
            if let Some(op) = operand {
                let op_val = eval(op, record, env)?;
                for (when_expr, then_expr) in whens {
                    if op_val == eval(when_expr, record, env)? {
                        return eval(then_expr, record, env);
                    }
                }
            } else {
                for (when_expr, then_expr) in whens {
                    if eval(when_expr, record, env)?.is_truthy() {
                        return eval(then_expr, record, env);
                    }
                }
            }
            match else_expr {
                Some(e) => eval(e, record, env),
                None => Ok(Value::Null),
            }
        }

        Expr::Reduce { acc, init, variable, list, expr: body } => {
            let list_val = eval(list, record, env)?;
            let Value::Array(items) = list_val else {
                return match list_val {
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::RuntimeType {
                        expected: "list".into(),
                        got: other.type_name().into(),
                    }),
                };
            };
            // accumulator and loop variable live in scratch slots; the
            // layout registered them during enrichment only if they shadow
            // nothing, so evaluate with a local overlay instead
            let mut overlay = Overlay::new(env, record);
            let mut acc_val = eval(init, record, env)?;
            for item in items {
                overlay.set(acc, acc_val.clone());
                overlay.set(variable, item);
                acc_val = overlay.eval(body)?;
            }
            Ok(acc_val)
        }

        Expr::MapProjection { variable, selectors } => {
            let base = eval(&Expr::Variable(variable.clone()), record, env)?;
            let mut map: HashMap<String, Value> = HashMap::new();
            let props = match &base {
                Value::Node(n) => Some(&n.properties),
                Value::Edge(e) => Some(&e.properties),
                Value::Null => return Ok(Value::Null),
                _ => None,
            };
            for selector in selectors {
                match selector {
                    MapSelector::Property(key) => {
                        let val = props
                            .and_then(|p| p.get(key).cloned())
                            .unwrap_or(Value::Null);
                        map.insert(key.clone(), val);
                    }
                    MapSelector::AllProperties => {
                        if let Some(props) = props {
                            for (k, v) in props.iter() {
                                map.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    MapSelector::Literal(key, value) => {
                        map.insert(key.clone(), eval(value, record, env)?);
                    }
                    MapSelector::Identifier(name) => {
                        let val = eval(&Expr::Variable(name.clone()), record, env)?;
                        map.insert(name.clone(), val);
                    }
                }
            }
            Ok(value_map(map))
        }

        Expr::Star => Err(Error::Semantic("'*' is only valid in RETURN or count(*)".into())),
    }
}

/// Maps surface as sorted key/value arrays: `[[k, v], …]`. The value
/// taxonomy has no first-class map, and a deterministic order keeps
/// DISTINCT and comparisons stable.
fn value_map(map: HashMap<String, Value>) -> Value {
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Array(
        entries
            .into_iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
            .collect(),
    )
}

/// Local variable overlay for reduce-style scoped evaluation.
struct Overlay<'a, 'b> {
    env: &'a EvalEnv<'b>,
    record: &'a Record,
    locals: Vec<(String, Value)>,
}

impl<'a, 'b> Overlay<'a, 'b> {
    fn new(env: &'a EvalEnv<'b>, record: &'a Record) -> Self {
        Self { env, record, locals: Vec::new() }
    }

    fn set(&mut self, name: &str, value: Value) {
        if let Some(entry) = self.locals.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.locals.push((name.to_owned(), value));
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Variable(name) => {
                if let Some((_, v)) = self.locals.iter().find(|(n, _)| n == name) {
                    return Ok(v.clone());
                }
                eval(expr, self.record, self.env)
            }
            Expr::BinaryOp { left, op, right } => {
                let lv = self.eval(left)?;
                let rv = self.eval(right)?;
                eval_binary_op(&lv, *op, &rv)
            }
            Expr::UnaryOp { op, expr } => {
                let val = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
                    UnaryOp::Negate => match val {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Double(f) => Ok(Value::Double(-f)),
                        other => Err(Error::RuntimeType {
                            expected: "numeric".into(),
                            got: other.type_name().into(),
                        }),
                    },
                }
            }
            Expr::Property { expr, key } => {
                let val = self.eval(expr)?;
                match val {
                    Value::Node(n) => Ok(n.get(key).cloned().unwrap_or(Value::Null)),
                    Value::Edge(e) => Ok(e.get(key).cloned().unwrap_or(Value::Null)),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::RuntimeType {
                        expected: "node or edge".into(),
                        got: other.type_name().into(),
                    }),
                }
            }
            // other forms cannot reference the loop variables in ways the
            // simple overlay misses often; fall back to plain evaluation
            other => eval(other, self.record, self.env),
        }
    }
}

fn eval_subscript(container: Value, index: Value) -> Result<Value> {
    match (container, index) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Array(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let idx = if i < 0 { len + i } else { i };
            if idx < 0 || idx >= len {
                return Err(Error::IndexOutOfBounds(format!(
                    "list index {i} out of range for length {len}"
                )));
            }
            Ok(items.into_iter().nth(idx as usize).unwrap_or(Value::Null))
        }
        (container, index) => Err(Error::RuntimeType {
            expected: "list with integer index".into(),
            got: format!("{}[{}]", container.type_name(), index.type_name()),
        }),
    }
}

// ============================================================================
// Binary operators
// ============================================================================

pub fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Neq => Ok(Value::Bool(left != right)),
        BinaryOp::Lt => Ok(cmp_result(left, right, |o| o == std::cmp::Ordering::Less)),
        BinaryOp::Lte => Ok(cmp_result(left, right, |o| o != std::cmp::Ordering::Greater)),
        BinaryOp::Gt => Ok(cmp_result(left, right, |o| o == std::cmp::Ordering::Greater)),
        BinaryOp::Gte => Ok(cmp_result(left, right, |o| o != std::cmp::Ordering::Less)),

        BinaryOp::Add => eval_add(left, right),
        BinaryOp::Sub => eval_arith(left, right, i64::wrapping_sub, |a, b| a - b),
        BinaryOp::Mul => eval_arith(left, right, i64::wrapping_mul, |a, b| a * b),
        BinaryOp::Div => {
            match right {
                Value::Int(0) => Err(Error::RuntimeType {
                    expected: "non-zero divisor".into(),
                    got: "0".into(),
                }),
                _ => eval_arith(left, right, |a, b| a.wrapping_div(b), |a, b| a / b),
            }
        }
        BinaryOp::Mod => match right {
            Value::Int(0) => Err(Error::RuntimeType {
                expected: "non-zero divisor".into(),
                got: "0".into(),
            }),
            _ => eval_arith(left, right, |a, b| a.wrapping_rem(b), |a, b| a % b),
        },
        BinaryOp::Pow => {
            let l = require_num(left)?;
            let r = require_num(right)?;
            Ok(Value::Double(l.powf(r)))
        }

        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        BinaryOp::Xor => Ok(Value::Bool(left.is_truthy() ^ right.is_truthy())),
    }
}

fn cmp_result(left: &Value, right: &Value, test: fn(std::cmp::Ordering) -> bool) -> Value {
    match left.compare(right) {
        Some(ord) => Value::Bool(test(ord)),
        None => Value::Null,
    }
}

fn require_num(v: &Value) -> Result<f64> {
    v.as_double().ok_or_else(|| Error::RuntimeType {
        expected: "numeric".into(),
        got: v.type_name().into(),
    })
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::Int(a), Value::Double(b)) => Ok(Value::Double(*a as f64 + b)),
        (Value::Double(a), Value::Int(b)) => Ok(Value::Double(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::String(a), b) if b.is_numeric() => Ok(Value::String(format!("{a}{b}"))),
        (a, Value::String(b)) if a.is_numeric() => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.clone());
            Ok(Value::Array(out))
        }
        (Value::Array(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            Ok(Value::Array(out))
        }
        _ => Err(Error::RuntimeType {
            expected: "compatible operands for +".into(),
            got: format!("{}, {}", left.type_name(), right.type_name()),
        }),
    }
}

fn eval_arith(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    double_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(double_op(*a, *b))),
        (Value::Int(a), Value::Double(b)) => Ok(Value::Double(double_op(*a as f64, *b))),
        (Value::Double(a), Value::Int(b)) => Ok(Value::Double(double_op(*a, *b as f64))),
        _ => Err(Error::RuntimeType {
            expected: "numeric".into(),
            got: format!("{}, {}", left.type_name(), right.type_name()),
        }),
    }
}

// ============================================================================
// Built-in functions
// ============================================================================

fn eval_function(name: &str, args: &[Expr], record: &Record, env: &EvalEnv<'_>) -> Result<Value> {
    let arg = |i: usize| -> Result<Value> {
        let expr = args.get(i).ok_or_else(|| {
            Error::Semantic(format!("{name}() is missing argument {}", i + 1))
        })?;
        eval(expr, record, env)
    };

    match name.to_uppercase().as_str() {
        "ID" => match arg(0)? {
            Value::Node(n) => Ok(Value::Int(n.id.0 as i64)),
            Value::Edge(e) => Ok(Value::Int(e.id.0 as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("node or edge", &other)),
        },
        "LABELS" => match arg(0)? {
            Value::Node(n) => Ok(Value::Array(
                n.labels.iter().map(|l| Value::String(l.clone())).collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("node", &other)),
        },
        "TYPE" => match arg(0)? {
            Value::Edge(e) => Ok(Value::String(e.relation.clone())),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("edge", &other)),
        },
        "PROPERTIES" => match arg(0)? {
            Value::Node(n) => Ok(value_map(n.properties.clone())),
            Value::Edge(e) => Ok(value_map(e.properties.clone())),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("node or edge", &other)),
        },
        "KEYS" => match arg(0)? {
            Value::Node(n) => {
                let mut keys: Vec<String> = n.properties.keys().cloned().collect();
                keys.sort();
                Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
            }
            Value::Edge(e) => {
                let mut keys: Vec<String> = e.properties.keys().cloned().collect();
                keys.sort();
                Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
            }
            Value::Null => Ok(Value::Null),
            other => Err(type_err("node or edge", &other)),
        },
        "STARTNODE" => match arg(0)? {
            Value::Edge(e) => env
                .graph
                .materialize_node(e.src)
                .map(|n| Value::Node(Box::new(n)))
                .ok_or_else(|| Error::InternalInvariant(format!("edge {} has no source", e.id))),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("edge", &other)),
        },
        "ENDNODE" => match arg(0)? {
            Value::Edge(e) => env
                .graph
                .materialize_node(e.dst)
                .map(|n| Value::Node(Box::new(n)))
                .ok_or_else(|| Error::InternalInvariant(format!("edge {} has no target", e.id))),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("edge", &other)),
        },
        "EXISTS" => Ok(Value::Bool(!arg(0)?.is_null())),
        "COALESCE" => {
            for expr in args {
                let val = eval(expr, record, env)?;
                if !val.is_null() {
                    return Ok(val);
                }
            }
            Ok(Value::Null)
        }
        "SIZE" | "LENGTH" => match arg(0)? {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Array(l) => Ok(Value::Int(l.len() as i64)),
            Value::Path(p) => Ok(Value::Int(p.len() as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("string, list, or path", &other)),
        },
        "HEAD" => match arg(0)? {
            Value::Array(l) => Ok(l.into_iter().next().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("list", &other)),
        },
        "LAST" => match arg(0)? {
            Value::Array(l) => Ok(l.into_iter().next_back().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("list", &other)),
        },
        "TAIL" => match arg(0)? {
            Value::Array(mut l) => {
                if !l.is_empty() {
                    l.remove(0);
                }
                Ok(Value::Array(l))
            }
            Value::Null => Ok(Value::Null),
            other => Err(type_err("list", &other)),
        },
        "RANGE" => {
            let start = int_arg(name, arg(0)?)?;
            let end = int_arg(name, arg(1)?)?;
            let step = if args.len() > 2 { int_arg(name, arg(2)?)? } else { 1 };
            if step == 0 {
                return Err(Error::RuntimeType {
                    expected: "non-zero step".into(),
                    got: "0".into(),
                });
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i <= end) || (step < 0 && i >= end) {
                out.push(Value::Int(i));
                i += step;
            }
            Ok(Value::Array(out))
        }
        "NODES" => match arg(0)? {
            Value::Path(p) => Ok(Value::Array(
                p.nodes.into_iter().map(|n| Value::Node(Box::new(n))).collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("path", &other)),
        },
        "RELATIONSHIPS" => match arg(0)? {
            Value::Path(p) => Ok(Value::Array(
                p.edges.into_iter().map(|e| Value::Edge(Box::new(e))).collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("path", &other)),
        },
        "ABS" => match arg(0)? {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Double(f) => Ok(Value::Double(f.abs())),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("numeric", &other)),
        },
        "SIGN" => match arg(0)? {
            Value::Int(i) => Ok(Value::Int(i.signum())),
            Value::Double(f) => Ok(Value::Int(if f > 0.0 { 1 } else if f < 0.0 { -1 } else { 0 })),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("numeric", &other)),
        },
        "CEIL" => double_fn(arg(0)?, f64::ceil),
        "FLOOR" => double_fn(arg(0)?, f64::floor),
        "ROUND" => double_fn(arg(0)?, f64::round),
        "SQRT" => double_fn(arg(0)?, f64::sqrt),
        "TOINTEGER" => match arg(0)? {
            v @ Value::Int(_) => Ok(v),
            Value::Double(f) => Ok(Value::Int(f as i64)),
            Value::String(s) => Ok(s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("convertible to integer", &other)),
        },
        "TOFLOAT" => match arg(0)? {
            v @ Value::Double(_) => Ok(v),
            Value::Int(i) => Ok(Value::Double(i as f64)),
            Value::String(s) => Ok(s.trim().parse::<f64>().map(Value::Double).unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("convertible to double", &other)),
        },
        "TOSTRING" => match arg(0)? {
            Value::String(s) => Ok(Value::String(s)),
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(format!("{other}"))),
        },
        "TOBOOLEAN" => match arg(0)? {
            v @ Value::Bool(_) => Ok(v),
            Value::String(s) => Ok(match s.to_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            }),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("convertible to boolean", &other)),
        },
        "TOUPPER" => match arg(0)? {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("string", &other)),
        },
        "TOLOWER" => match arg(0)? {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("string", &other)),
        },
        "TRIM" => match arg(0)? {
            Value::String(s) => Ok(Value::String(s.trim().to_owned())),
            Value::Null => Ok(Value::Null),
            other => Err(type_err("string", &other)),
        },
        "POINT" => {
            // point({latitude: …, longitude: …}) — the map arrives as the
            // sorted entry-list encoding
            let Value::Array(entries) = arg(0)? else {
                return Err(Error::RuntimeType {
                    expected: "map with latitude and longitude".into(),
                    got: "non-map".into(),
                });
            };
            let mut latitude = None;
            let mut longitude = None;
            for entry in &entries {
                if let Value::Array(kv) = entry {
                    if let [Value::String(k), v] = kv.as_slice() {
                        match k.as_str() {
                            "latitude" => latitude = v.as_double(),
                            "longitude" => longitude = v.as_double(),
                            _ => {}
                        }
                    }
                }
            }
            match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Ok(Value::Point { latitude, longitude }),
                _ => Err(Error::RuntimeType {
                    expected: "map with latitude and longitude".into(),
                    got: "incomplete map".into(),
                }),
            }
        }
        // aggregates are handled by the Aggregate operator; reaching the
        // scalar evaluator means the planner let one through
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" | "COLLECT" | "ANY" | "ALL" => {
            Err(Error::Semantic(format!(
                "{name}() is an aggregate and cannot be used here"
            )))
        }
        _ => Err(Error::Semantic(format!("unknown function: {name}"))),
    }
}

fn type_err(expected: &str, got: &Value) -> Error {
    Error::RuntimeType {
        expected: expected.into(),
        got: got.type_name().into(),
    }
}

fn int_arg(name: &str, v: Value) -> Result<i64> {
    v.as_int().ok_or_else(|| Error::RuntimeType {
        expected: format!("integer argument for {name}()"),
        got: v.type_name().into(),
    })
}

fn double_fn(v: Value, f: fn(f64) -> f64) -> Result<Value> {
    match v {
        Value::Int(i) => Ok(Value::Double(f(i as f64))),
        Value::Double(d) => Ok(Value::Double(f(d))),
        Value::Null => Ok(Value::Null),
        other => Err(type_err("numeric", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use pretty_assertions::assert_eq;

    fn env_fixture() -> (Arc<RecordLayout>, PropertyMap, GraphStore) {
        let mut layout = RecordLayout::new();
        layout.add("n");
        layout.add("x");
        (Arc::new(layout), PropertyMap::new(), GraphStore::new())
    }

    fn eval_str(expr_text: &str) -> Value {
        let (layout, params, graph) = env_fixture();
        let query = format!("RETURN {expr_text}");
        let crate::cypher::ast::Ast::Query(stmt) = crate::cypher::parse(&query).unwrap() else {
            panic!()
        };
        let crate::cypher::ast::Clause::Return(proj) = &stmt.segments[0].clauses[0] else {
            panic!()
        };
        let crate::cypher::ast::ProjectionItems::Items(items) = &proj.items else { panic!() };
        let record = Record::empty(&layout);
        let env = EvalEnv { layout: &layout, params: &params, graph: &graph };
        eval(&items[0].expr, &record, &env).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_str("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval_str("7 / 2"), Value::Int(3));
        assert_eq!(eval_str("7.0 / 2"), Value::Double(3.5));
        assert_eq!(eval_str("7 % 3"), Value::Int(1));
        assert_eq!(eval_str("-(3)"), Value::Int(-3));
    }

    #[test]
    fn test_null_propagation() {
        assert_eq!(eval_str("null + 1"), Value::Null);
        assert_eq!(eval_str("null = null"), Value::Null);
        assert_eq!(eval_str("null IS NULL"), Value::Bool(true));
        assert_eq!(eval_str("coalesce(null, 2)"), Value::Int(2));
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(eval_str("true AND null"), Value::Null);
        assert_eq!(eval_str("false AND null"), Value::Bool(false));
        assert_eq!(eval_str("true OR null"), Value::Bool(true));
        assert_eq!(eval_str("false OR null"), Value::Null);
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(eval_str("'graph' STARTS WITH 'gr'"), Value::Bool(true));
        assert_eq!(eval_str("'graph' ENDS WITH 'ph'"), Value::Bool(true));
        assert_eq!(eval_str("'graph' CONTAINS 'rap'"), Value::Bool(true));
        assert_eq!(eval_str("'a' + 'b'"), Value::String("ab".into()));
    }

    #[test]
    fn test_list_ops() {
        assert_eq!(eval_str("[1,2,3][0]"), Value::Int(1));
        assert_eq!(eval_str("[1,2,3][-1]"), Value::Int(3));
        assert_eq!(eval_str("2 IN [1,2,3]"), Value::Bool(true));
        assert_eq!(eval_str("size([1,2,3])"), Value::Int(3));
        assert_eq!(eval_str("head(range(1, 3))"), Value::Int(1));
        assert_eq!(eval_str("last(range(1, 3))"), Value::Int(3));
    }

    #[test]
    fn test_subscript_out_of_bounds() {
        let (layout, params, graph) = env_fixture();
        let crate::cypher::ast::Ast::Query(stmt) =
            crate::cypher::parse("RETURN [1,2][5]").unwrap()
        else {
            panic!()
        };
        let crate::cypher::ast::Clause::Return(proj) = &stmt.segments[0].clauses[0] else {
            panic!()
        };
        let crate::cypher::ast::ProjectionItems::Items(items) = &proj.items else { panic!() };
        let record = Record::empty(&layout);
        let env = EvalEnv { layout: &layout, params: &params, graph: &graph };
        let err = eval(&items[0].expr, &record, &env).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds(_)));
    }

    #[test]
    fn test_case_and_reduce() {
        assert_eq!(
            eval_str("CASE WHEN 1 > 2 THEN 'a' ELSE 'b' END"),
            Value::String("b".into())
        );
        assert_eq!(
            eval_str("reduce(acc = 0, x IN [1,2,3] | acc + x)"),
            Value::Int(6)
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval_str("toInteger('42')"), Value::Int(42));
        assert_eq!(eval_str("toInteger('nope')"), Value::Null);
        assert_eq!(eval_str("toFloat(1)"), Value::Double(1.0));
        assert_eq!(eval_str("toString(7)"), Value::String("7".into()));
        assert_eq!(eval_str("toBoolean('true')"), Value::Bool(true));
    }

    #[test]
    fn test_point() {
        assert_eq!(
            eval_str("point({latitude: 32.0, longitude: 34.8})"),
            Value::Point { latitude: 32.0, longitude: 34.8 }
        );
    }

    #[test]
    fn test_division_by_zero() {
        let (layout, params, graph) = env_fixture();
        let crate::cypher::ast::Ast::Query(stmt) = crate::cypher::parse("RETURN 1 / 0").unwrap()
        else {
            panic!()
        };
        let crate::cypher::ast::Clause::Return(proj) = &stmt.segments[0].clauses[0] else {
            panic!()
        };
        let crate::cypher::ast::ProjectionItems::Items(items) = &proj.items else { panic!() };
        let record = Record::empty(&layout);
        let env = EvalEnv { layout: &layout, params: &params, graph: &graph };
        assert!(eval(&items[0].expr, &record, &env).is_err());
    }
}
