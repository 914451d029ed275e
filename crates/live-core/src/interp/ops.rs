//! Vectorised operators and indexing.

use super::ast::BinOp;
use super::value::{List, Value};

/// Longest vector user code may build.
pub const MAX_LENGTH: usize = 1 << 26;

pub const TOO_LONG: &str = "result would be too long a vector";

/// Length of a vector about to be built from a user-supplied count, checked
/// before anything is allocated.
pub fn checked_length(count: f64) -> Result<usize, String> {
    if count.is_finite() && count >= 0.0 && count <= MAX_LENGTH as f64 {
        Ok(count as usize)
    } else {
        Err(TOO_LONG.into())
    }
}

fn recycle_len(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        0
    } else {
        a.max(b)
    }
}

fn r_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

fn is_atomic(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Logical(_) | Value::Double(_) | Value::Character(_))
}

pub fn arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    let (Some(a), Some(b)) = (lhs.as_doubles(), rhs.as_doubles()) else {
        return Err("non-numeric argument to binary operator".into());
    };
    let len = recycle_len(a.len(), b.len());
    let values = (0..len)
        .map(|i| {
            let (x, y) = (a[i % a.len()], b[i % b.len()]);
            match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Pow => x.powf(y),
                BinOp::Mod => r_mod(x, y),
                _ => f64::NAN,
            }
        })
        .collect();
    Ok(Value::Double(values))
}

pub fn comparison(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    if !is_atomic(lhs) || !is_atomic(rhs) {
        return Err(format!(
            "comparison ({}) is possible only for atomic types",
            op.symbol()
        ));
    }
    let textual = matches!(lhs, Value::Character(_)) || matches!(rhs, Value::Character(_));
    let result = if textual {
        let a = lhs.as_strings().unwrap_or_default();
        let b = rhs.as_strings().unwrap_or_default();
        let len = recycle_len(a.len(), b.len());
        (0..len)
            .map(|i| compare(op, a[i % a.len()].cmp(&b[i % b.len()])))
            .collect()
    } else {
        let a = lhs.as_doubles().unwrap_or_default();
        let b = rhs.as_doubles().unwrap_or_default();
        let len = recycle_len(a.len(), b.len());
        (0..len)
            .map(|i| match a[i % a.len()].partial_cmp(&b[i % b.len()]) {
                Some(ordering) => compare(op, ordering),
                None => false,
            })
            .collect()
    };
    Ok(Value::Logical(result))
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinOp::Eq => ordering == Equal,
        BinOp::Ne => ordering != Equal,
        BinOp::Lt => ordering == Less,
        BinOp::Le => ordering != Greater,
        BinOp::Gt => ordering == Greater,
        BinOp::Ge => ordering != Less,
        _ => false,
    }
}

pub fn logical(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    let (Some(a), Some(b)) = (lhs.as_logicals(), rhs.as_logicals()) else {
        return Err("operations are possible only for numeric, logical or complex types".into());
    };
    let len = recycle_len(a.len(), b.len());
    let values = (0..len)
        .map(|i| {
            let (x, y) = (a[i % a.len()], b[i % b.len()]);
            if op == BinOp::And { x && y } else { x || y }
        })
        .collect();
    Ok(Value::Logical(values))
}

pub fn range(from: &Value, to: &Value) -> Result<Value, String> {
    let (Some(from), Some(to)) = (from.as_double(), to.as_double()) else {
        return Err("argument of length 0".into());
    };
    let count = checked_length((to - from).abs().floor() + 1.0)?;
    let step = if to >= from { 1.0 } else { -1.0 };
    Ok(Value::Double((0..count).map(|i| from + step * i as f64).collect()))
}

/// Truth value of a condition in `if` or `while`.
pub fn truthy(value: &Value) -> Result<bool, String> {
    match value.as_logicals() {
        Some(v) if v.is_empty() => Err("argument is of length zero".into()),
        Some(v) => Ok(v[0]),
        None => Err("argument is not interpretable as logical".into()),
    }
}

/// Resolves an index value against a length into zero-based positions.
/// Positions past the end are `None` unless `extend` is set, as it is for
/// assignment.
fn positions(
    index: &Value,
    len: usize,
    names: Option<&[String]>,
    extend: bool,
) -> Result<Vec<Option<usize>>, String> {
    match index {
        Value::Character(keys) => Ok(keys
            .iter()
            .map(|key| names.and_then(|n| n.iter().position(|name| name == key)))
            .collect()),
        Value::Logical(mask) => {
            if mask.is_empty() {
                return Ok(Vec::new());
            }
            Ok((0..len.max(mask.len()))
                .filter(|i| mask[i % mask.len()])
                .map(|i| if i < len || extend { Some(i) } else { None })
                .collect())
        }
        Value::Double(idx) => {
            if idx.iter().any(|i| *i < 0.0) {
                if idx.iter().any(|i| *i > 0.0) {
                    return Err("can't mix positive and negative subscripts".into());
                }
                let excluded: Vec<usize> = idx.iter().map(|i| (-i) as usize).collect();
                return Ok((0..len).filter(|i| !excluded.contains(&(i + 1))).map(Some).collect());
            }
            idx.iter()
                .filter(|i| **i >= 1.0)
                .map(|i| {
                    if i.floor() > len as f64 && !extend {
                        return Ok(None);
                    }
                    Ok(Some(checked_length(*i)? - 1))
                })
                .collect()
        }
        Value::Null => Ok(Vec::new()),
        other => Err(format!("invalid subscript type '{}'", other.type_name())),
    }
}

fn pick<T: Clone>(values: &[T], positions: &[Option<usize>], missing: T) -> Vec<T> {
    positions
        .iter()
        .map(|p| p.map(|i| values[i].clone()).unwrap_or_else(|| missing.clone()))
        .collect()
}

pub fn index(target: &Value, index: &Value, double: bool) -> Result<Value, String> {
    if double {
        return index_element(target, index);
    }
    match target {
        Value::Null => Ok(Value::Null),
        Value::Logical(v) => Ok(Value::Logical(pick(v, &positions(index, v.len(), None, false)?, false))),
        Value::Double(v) => Ok(Value::Double(pick(v, &positions(index, v.len(), None, false)?, f64::NAN))),
        Value::Character(v) => Ok(Value::Character(pick(
            v,
            &positions(index, v.len(), None, false)?,
            "NA".to_string(),
        ))),
        Value::List(list) => {
            let pos = positions(index, list.values.len(), list.names.as_deref(), false)?;
            let values = pick(&list.values, &pos, Value::Null);
            let names = list.names.as_ref().map(|n| pick(n, &pos, "<NA>".to_string()));
            let class = if list.is_data_frame() { list.class.clone() } else { Vec::new() };
            Ok(Value::List(List { values, names, class }))
        }
        other => Err(format!("object of type '{}' is not subsettable", other.type_name())),
    }
}

fn index_element(target: &Value, index: &Value) -> Result<Value, String> {
    if index.len() != 1 {
        return Err(if index.len() == 0 {
            "subscript of length 0".into()
        } else {
            "subscript out of bounds".into()
        });
    }
    if let Value::Env(env) = target {
        let key = index.as_string().ok_or("wrong args for environment subassignment")?;
        return Ok(env.get_local(&key).unwrap_or(Value::Null));
    }
    let names = match target {
        Value::List(list) => list.names.as_deref(),
        _ => None,
    };
    let pos = positions(index, target.len(), names, false)?;
    let Some(Some(i)) = pos.first().copied() else {
        if matches!((target, index), (Value::List(_), Value::Character(_))) {
            return Ok(Value::Null);
        }
        return Err("subscript out of bounds".into());
    };
    Ok(match target {
        Value::Logical(v) => Value::Logical(vec![v[i]]),
        Value::Double(v) => Value::Double(vec![v[i]]),
        Value::Character(v) => Value::Character(vec![v[i].clone()]),
        Value::List(list) => list.values[i].clone(),
        other => return Err(format!("object of type '{}' is not subsettable", other.type_name())),
    })
}

/// `x$name` on a list, environment or data frame.
pub fn dollar(target: &Value, name: &str) -> Result<Value, String> {
    match target {
        Value::List(list) => Ok(list.get(name).cloned().unwrap_or(Value::Null)),
        Value::Env(env) => Ok(env.get_local(name).unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        _ => Err("$ operator is invalid for atomic vectors".into()),
    }
}

pub fn set_dollar(target: Value, name: &str, value: Value) -> Result<Value, String> {
    match target {
        Value::Null => {
            let mut list = List::default();
            list.set(name, value);
            Ok(Value::List(list))
        }
        Value::List(mut list) => {
            list.set(name, value);
            Ok(Value::List(list))
        }
        Value::Env(env) => {
            env.set(name, value);
            Ok(Value::Env(env))
        }
        _ => Err("invalid type for $ assignment".into()),
    }
}

fn extend<T: Clone>(values: &mut Vec<T>, len: usize, fill: T) {
    if values.len() < len {
        values.resize(len, fill);
    }
}

/// `x[i] <- value` and `x[[i]] <- value`.
pub fn assign_index(target: Value, index: &Value, value: Value, double: bool) -> Result<Value, String> {
    if let Value::Character(keys) = index {
        if keys.len() == 1 {
            if let Value::List(_) | Value::Null | Value::Env(_) = target {
                return set_dollar(target, &keys[0], value);
            }
        }
    }

    if let Value::List(mut list) = target {
        let pos = positions(index, list.values.len(), list.names.as_deref(), true)?;
        let items: Vec<Value> = match (&value, double) {
            (Value::List(src), false) => src.values.clone(),
            _ => vec![value.clone()],
        };
        for (k, p) in pos.iter().enumerate() {
            let Some(i) = *p else { continue };
            extend(&mut list.values, i + 1, Value::Null);
            if let Some(names) = list.names.as_mut() {
                extend(names, i + 1, String::new());
            }
            list.values[i] = items[k % items.len().max(1)].clone();
        }
        return Ok(Value::List(list));
    }

    if !is_atomic(&target) || !is_atomic(&value) {
        return Err("incompatible types in subassignment".into());
    }
    if value.len() == 0 {
        return Err("replacement has length zero".into());
    }
    let pos: Vec<usize> = positions(index, target.len(), None, true)?.into_iter().flatten().collect();
    if double && pos.len() != 1 {
        return Err("more elements supplied than there are to replace".into());
    }

    let textual = matches!(target, Value::Character(_)) || matches!(value, Value::Character(_));
    let logical = matches!(target, Value::Logical(_) | Value::Null) && matches!(value, Value::Logical(_));
    if textual {
        let mut out = target.as_strings().unwrap_or_default();
        let src = value.as_strings().unwrap_or_default();
        for (k, i) in pos.iter().enumerate() {
            extend(&mut out, i + 1, "NA".to_string());
            out[*i] = src[k % src.len()].clone();
        }
        Ok(Value::Character(out))
    } else if logical {
        let mut out = target.as_logicals().unwrap_or_default();
        let src = value.as_logicals().unwrap_or_default();
        for (k, i) in pos.iter().enumerate() {
            extend(&mut out, i + 1, false);
            out[*i] = src[k % src.len()];
        }
        Ok(Value::Logical(out))
    } else {
        let mut out = target.as_doubles().unwrap_or_default();
        let src = value.as_doubles().unwrap_or_default();
        for (k, i) in pos.iter().enumerate() {
            extend(&mut out, i + 1, f64::NAN);
            out[*i] = src[k % src.len()];
        }
        Ok(Value::Double(out))
    }
}
