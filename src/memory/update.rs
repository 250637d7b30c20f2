use bson::{Bson, Document};

use super::eval::{bson_eq, get_path};
use crate::errors::AdapterError;
use crate::query::ops::{EACH, INC, PULL, PULL_ALL, PUSH, RENAME, SET, UNSET};

fn ensure_subdoc<'a>(root: &'a mut Document, key: &str) -> &'a mut Document {
    if !matches!(root.get(key), Some(Bson::Document(_))) {
        root.insert(key.to_string(), Bson::Document(Document::new()));
    }
    match root.get_mut(key) {
        Some(Bson::Document(d)) => d,
        _ => unreachable!(),
    }
}

fn traverse_to_parent<'a>(root: &'a mut Document, path: &str) -> (&'a mut Document, String) {
    let mut cur = root;
    let mut iter = path.split('.').peekable();
    let mut last = String::new();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            last = seg.to_string();
            break;
        }
        cur = ensure_subdoc(cur, seg);
    }
    (cur, last)
}

fn set_path(root: &mut Document, path: &str, value: Bson) -> bool {
    let (parent, last) = traverse_to_parent(root, path);
    let old = parent.insert(last, value.clone());
    old.as_ref() != Some(&value)
}

fn unset_path(root: &mut Document, path: &str) -> bool {
    if get_path(root, path).is_none() {
        return false;
    }
    let (parent, last) = traverse_to_parent(root, path);
    parent.remove(&last).is_some()
}

fn add_numbers(cur: &Bson, by: &Bson) -> Option<Bson> {
    #[allow(clippy::cast_precision_loss)]
    let as_f64 = |v: &Bson| match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    };
    Some(match (cur, by) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            a.checked_add(*b).map_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32)
        }
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).checked_add(*b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_add(i64::from(*b))?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b)?),
        _ => Bson::Double(as_f64(cur)? + as_f64(by)?),
    })
}

fn inc_path(root: &mut Document, path: &str, by: &Bson) -> Result<bool, AdapterError> {
    let cur = get_path(root, path).cloned().unwrap_or(Bson::Int32(0));
    let next = add_numbers(&cur, by)
        .ok_or_else(|| AdapterError::Storage(format!("cannot apply $inc to `{path}`")))?;
    Ok(set_path(root, path, next))
}

fn array_at<'a>(root: &'a mut Document, path: &str) -> Result<Option<&'a mut Vec<Bson>>, AdapterError> {
    let (parent, last) = traverse_to_parent(root, path);
    match parent.get_mut(&last) {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(_) => Err(AdapterError::Storage(format!("`{path}` is not an array"))),
    }
}

fn push_path(root: &mut Document, path: &str, arg: &Bson) -> Result<bool, AdapterError> {
    let values = match arg {
        Bson::Document(d) if d.contains_key(EACH) => match d.get(EACH) {
            Some(Bson::Array(items)) => items.clone(),
            _ => return Err(AdapterError::Storage("$each requires an array".into())),
        },
        other => vec![other.clone()],
    };
    if values.is_empty() {
        return Ok(false);
    }
    if let Some(items) = array_at(root, path)? {
        items.extend(values);
        return Ok(true);
    }
    set_path(root, path, Bson::Array(values));
    Ok(true)
}

fn pull_path(root: &mut Document, path: &str, remove: &[Bson]) -> Result<bool, AdapterError> {
    let Some(items) = array_at(root, path)? else {
        return Ok(false);
    };
    let before = items.len();
    items.retain(|i| !remove.iter().any(|r| bson_eq(i, r)));
    Ok(items.len() != before)
}

/// Applies a native update document in place; returns whether the document changed.
///
/// # Errors
/// Returns a storage error for unknown operators or type mismatches.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, AdapterError> {
    let mut changed = false;
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(AdapterError::Storage(format!("{op} requires an object")));
        };
        for (path, arg) in fields {
            let c = match op.as_str() {
                SET => set_path(doc, path, arg.clone()),
                UNSET => unset_path(doc, path),
                INC => inc_path(doc, path, arg)?,
                RENAME => {
                    let Bson::String(to) = arg else {
                        return Err(AdapterError::Storage("$rename target must be a string".into()));
                    };
                    match get_path(doc, path).cloned() {
                        Some(v) => {
                            unset_path(doc, path);
                            set_path(doc, to, v);
                            true
                        }
                        None => false,
                    }
                }
                PUSH => push_path(doc, path, arg)?,
                PULL => pull_path(doc, path, std::slice::from_ref(arg))?,
                PULL_ALL => match arg {
                    Bson::Array(items) => pull_path(doc, path, items)?,
                    _ => return Err(AdapterError::Storage("$pullAll requires an array".into())),
                },
                other => return Err(AdapterError::Storage(format!("unknown update operator {other}"))),
            };
            changed |= c;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_inc_unset_rename() {
        let mut d = doc! {"power": 5, "info": {"visits": 1}, "handle": "Pug", "old": true};
        let upd = doc! {
            "$set": {"type": "wizard"},
            "$inc": {"power": 2, "info.visits": 1.5},
            "$unset": {"old": ""},
            "$rename": {"handle": "name"}
        };
        assert!(apply_update(&mut d, &upd).unwrap());
        assert_eq!(d.get_str("type").unwrap(), "wizard");
        assert_eq!(d.get_i32("power").unwrap(), 7);
        assert_eq!(d.get_document("info").unwrap().get_f64("visits").unwrap(), 2.5);
        assert!(!d.contains_key("old"));
        assert_eq!(d.get_str("name").unwrap(), "Pug");
    }

    #[test]
    fn push_each_and_scalar() {
        let mut d = doc! {"tags": ["a"]};
        apply_update(&mut d, &doc! {"$push": {"tags": {"$each": ["b", "c"]}}}).unwrap();
        apply_update(&mut d, &doc! {"$push": {"tags": "d", "fresh": 1}}).unwrap();
        assert_eq!(d, doc! {"tags": ["a", "b", "c", "d"], "fresh": [1]});
    }

    #[test]
    fn pull_and_pull_all() {
        let mut d = doc! {"tags": ["a", "b", "a", "c"]};
        apply_update(&mut d, &doc! {"$pull": {"tags": "a"}}).unwrap();
        assert_eq!(d, doc! {"tags": ["b", "c"]});
        apply_update(&mut d, &doc! {"$pullAll": {"tags": ["b", "c"]}}).unwrap();
        assert_eq!(d, doc! {"tags": []});
        assert!(!apply_update(&mut d, &doc! {"$pull": {"nothing": 1}}).unwrap());
    }

    #[test]
    fn type_mismatches_are_errors() {
        let mut d = doc! {"handle": "Pug"};
        assert!(apply_update(&mut d, &doc! {"$inc": {"handle": 1}}).is_err());
        assert!(apply_update(&mut d, &doc! {"$push": {"handle": 1}}).is_err());
        assert!(apply_update(&mut d, &doc! {"$mul": {"handle": 2}}).is_err());
    }

    #[test]
    fn setting_same_value_is_not_a_change() {
        let mut d = doc! {"a": 1};
        assert!(!apply_update(&mut d, &doc! {"$set": {"a": 1}}).unwrap());
    }
}
