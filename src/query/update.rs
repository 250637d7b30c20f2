use bson::{Bson, Document};

use super::types::{QueryEnvelope, UpdateDirective, UpdateOp};

pub const SET: &str = "$set";
pub const UNSET: &str = "$unset";
pub const RENAME: &str = "$rename";
pub const INC: &str = "$inc";
pub const PUSH: &str = "$push";
pub const PULL: &str = "$pull";
pub const PULL_ALL: &str = "$pullAll";
pub const EACH: &str = "$each";

/// Native operator bucket and value for a single directive.
fn native_directive(d: &UpdateDirective) -> (&'static str, Bson) {
    match (d.op, &d.value) {
        (UpdateOp::Push, Bson::Array(_)) => {
            let mut each = Document::new();
            each.insert(EACH, d.value.clone());
            (PUSH, Bson::Document(each))
        }
        (UpdateOp::Pull, Bson::Array(_)) => (PULL_ALL, d.value.clone()),
        (UpdateOp::Set, _) => (SET, d.value.clone()),
        (UpdateOp::Unset, _) => (UNSET, d.value.clone()),
        (UpdateOp::Rename, _) => (RENAME, d.value.clone()),
        (UpdateOp::Inc, _) => (INC, d.value.clone()),
        (UpdateOp::Push, _) => (PUSH, d.value.clone()),
        (UpdateOp::Pull, _) => (PULL, d.value.clone()),
    }
}

fn bucket<'a>(update: &'a mut Document, op: &str) -> &'a mut Document {
    if !matches!(update.get(op), Some(Bson::Document(_))) {
        update.insert(op, Document::new());
    }
    match update.get_mut(op) {
        Some(Bson::Document(d)) => d,
        _ => unreachable!("bucket inserted above"),
    }
}

/// Folds `updates` and the single `body` document into a native update document.
///
/// Directives are applied in list order; a later directive on the same operator and field replaces
/// an earlier one. `body` keys land in `$set` last and overwrite same-named directive values.
#[must_use]
pub fn build_update(qe: &QueryEnvelope) -> Document {
    let mut out = Document::new();
    for d in qe.updates.iter().flatten() {
        let (op, value) = native_directive(d);
        bucket(&mut out, op).insert(d.field.clone(), value);
    }
    if let Some(body) = qe.body.as_ref().and_then(|b| b.first()) {
        let set = bucket(&mut out, SET);
        for (k, v) in body {
            set.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Whether an update is expected to touch more than one document.
#[must_use]
pub fn is_multi(qe: &QueryEnvelope) -> bool {
    qe.matches.is_some() || qe.ids.as_ref().is_some_and(|ids| ids.len() > 1)
}
