use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::errors::AdapterError;
use crate::types::ID_FIELD;

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_SORT_FIELDS: usize = 8;

/// Evaluates a native selector against a document.
///
/// # Errors
/// Returns a storage error for unknown or malformed operators.
pub fn matches(doc: &Document, selector: &Document) -> Result<bool, AdapterError> {
    for (key, cond) in selector {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for s in sub_selectors(key, cond)? {
                    if !matches(doc, s)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for s in sub_selectors(key, cond)? {
                    if matches(doc, s)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            k if k.starts_with('$') => {
                return Err(AdapterError::Storage(format!("unknown top-level operator {k}")));
            }
            path => field_matches(get_path(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_selectors<'a>(op: &str, cond: &'a Bson) -> Result<Vec<&'a Document>, AdapterError> {
    let Bson::Array(items) = cond else {
        return Err(AdapterError::Storage(format!("{op} requires an array")));
    };
    if items.is_empty() {
        return Err(AdapterError::Storage(format!("{op} requires a nonempty array")));
    }
    items
        .iter()
        .map(|i| match i {
            Bson::Document(d) => Ok(d),
            _ => Err(AdapterError::Storage(format!("{op} entries must be objects"))),
        })
        .collect()
}

fn is_operator_doc(cond: &Bson) -> Option<&Document> {
    match cond {
        Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn field_matches(value: Option<&Bson>, cond: &Bson) -> Result<bool, AdapterError> {
    let Some(ops) = is_operator_doc(cond) else {
        return Ok(eq_matches(value, cond));
    };
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => eq_matches(value, arg),
            "$ne" => !eq_matches(value, arg),
            "$in" => in_set(value, list_arg(op, arg)?),
            "$nin" => !in_set(value, list_arg(op, arg)?),
            "$all" => {
                let wanted = list_arg(op, arg)?;
                match value {
                    Some(Bson::Array(have)) => {
                        wanted.iter().all(|w| have.iter().any(|h| bson_eq(h, w)))
                    }
                    Some(v) => !wanted.is_empty() && wanted.iter().all(|w| bson_eq(v, w)),
                    None => false,
                }
            }
            "$gt" => cmp_matches(value, arg, |o| o == Ordering::Greater),
            "$gte" => cmp_matches(value, arg, |o| o != Ordering::Less),
            "$lt" => cmp_matches(value, arg, |o| o == Ordering::Less),
            "$lte" => cmp_matches(value, arg, |o| o != Ordering::Greater),
            other => return Err(AdapterError::Storage(format!("unknown operator {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list_arg<'a>(op: &str, arg: &'a Bson) -> Result<&'a [Bson], AdapterError> {
    match arg {
        Bson::Array(items) => Ok(items),
        _ => Err(AdapterError::Storage(format!("{op} needs an array"))),
    }
}

// Missing fields compare equal to null; arrays match when any element does.
fn eq_matches(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(v) if bson_eq(v, target) => true,
        Some(Bson::Array(items)) => items.iter().any(|i| bson_eq(i, target)),
        Some(_) => false,
    }
}

fn in_set(value: Option<&Bson>, set: &[Bson]) -> bool {
    set.iter().any(|s| eq_matches(value, s))
}

fn cmp_matches(value: Option<&Bson>, target: &Bson, pred: impl Fn(Ordering) -> bool) -> bool {
    let comparable = |v: &Bson| same_class(v, target) && pred(compare_bson(v, target));
    match value {
        None => false,
        Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => items.iter().any(comparable),
        Some(v) => comparable(v),
    }
}

fn same_class(a: &Bson, b: &Bson) -> bool {
    (is_num(a) && is_num(b)) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Equality with numeric values compared across integer/float representations.
#[must_use]
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b)) == Ordering::Equal;
    }
    a == b
}

#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => 255,
    }
}

pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut cur = doc;
    let mut segs = path.split('.').peekable();
    let mut depth = 0usize;
    while let Some(seg) = segs.next() {
        depth += 1;
        if depth > MAX_PATH_DEPTH {
            return None;
        }
        let v = cur.get(seg)?;
        if segs.peek().is_none() {
            return Some(v);
        }
        match v {
            Bson::Document(d) => cur = d,
            _ => return None,
        }
    }
    None
}

/// Orders two documents by a native sort map (`1` ascending, `-1` descending).
#[must_use]
pub fn compare_docs(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, dir) in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (get_path(a, field), get_path(b, field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            let descending = is_num(dir) && as_f64_num(dir) < 0.0;
            return if descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        v if is_num(v) => as_f64_num(v) != 0.0,
        _ => true,
    }
}

/// Applies a native projection map.
///
/// Any truthy non-identifier entry selects inclusion mode (listed fields plus `_id` unless it is
/// excluded); otherwise the listed fields are removed.
#[must_use]
pub fn project(doc: Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc;
    }
    let inclusive = projection.iter().any(|(k, v)| k != ID_FIELD && truthy(v));
    if inclusive {
        let keep_id = projection.get(ID_FIELD).is_none_or(truthy);
        doc.into_iter()
            .filter(|(k, _)| {
                if k == ID_FIELD {
                    keep_id
                } else {
                    projection.get(k).is_some_and(truthy)
                }
            })
            .collect()
    } else {
        doc.into_iter().filter(|(k, _)| projection.get(k).is_none_or(truthy)).collect()
    }
}
