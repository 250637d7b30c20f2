use bson::{Bson, Document};

use super::types::{AND_NATIVE, MatchNode, MatchOp, OR_NATIVE, QueryEnvelope};
use crate::types::{ID_FIELD, to_native_id};

/// Rewrites an envelope match tree into the store's native selector.
///
/// Only operator positions are rewritten; field names and values are copied verbatim.
#[must_use]
pub fn map_operators(node: Option<&MatchNode>) -> Document {
    node.map_or_else(Document::new, map_node)
}

fn map_node(node: &MatchNode) -> Document {
    let mut out = Document::new();
    match node {
        MatchNode::And(nodes) => {
            out.insert(AND_NATIVE, map_children(nodes));
        }
        MatchNode::Or(nodes) => {
            out.insert(OR_NATIVE, map_children(nodes));
        }
        MatchNode::Leaf { field, op, value } => {
            let mut cond = Document::new();
            cond.insert(op.native(), value.clone());
            out.insert(field.clone(), cond);
        }
    }
    out
}

fn map_children(nodes: &[MatchNode]) -> Bson {
    Bson::Array(nodes.iter().map(|n| Bson::Document(map_node(n))).collect())
}

/// Identifier-membership constraint for a list of portable identifiers.
#[must_use]
pub fn id_selector(ids: &[Bson]) -> Document {
    let mut cond = Document::new();
    cond.insert(MatchOp::In.native(), Bson::Array(ids.iter().map(to_native_id).collect()));
    let mut out = Document::new();
    out.insert(ID_FIELD, cond);
    out
}

/// Builds the native selector for an envelope from its `match` tree and `ids` list.
///
/// When the match already constrains the identifier field, both constraints are kept under `$and`
/// so the identifier list narrows the result instead of replacing the match.
#[must_use]
pub fn build_selector(qe: &QueryEnvelope) -> Document {
    let mut sel = map_operators(qe.matches.as_ref());
    let Some(ids) = &qe.ids else {
        return sel;
    };
    let by_id = id_selector(ids);
    if sel.contains_key(ID_FIELD) {
        let mut combined = Document::new();
        combined.insert(AND_NATIVE, vec![Bson::Document(sel), Bson::Document(by_id)]);
        return combined;
    }
    for (k, v) in by_id {
        sel.insert(k, v);
    }
    sel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Verb;
    use bson::doc;
    use bson::oid::ObjectId;

    #[test]
    fn each_operator_maps_to_its_native_marker() {
        for op in MatchOp::ALL {
            let sel = map_operators(Some(&MatchNode::leaf("power", op, 8)));
            let cond = sel.get_document("power").unwrap();
            assert_eq!(cond.len(), 1);
            assert_eq!(cond.get(op.native()), Some(&Bson::Int32(8)));
        }
    }

    #[test]
    fn containers_map_structurally() {
        let tree = MatchNode::Or(vec![
            MatchNode::leaf("type", MatchOp::Eq, "rogue"),
            MatchNode::And(vec![MatchNode::leaf("power", MatchOp::Gt, 5)]),
        ]);
        assert_eq!(
            map_operators(Some(&tree)),
            doc! {"$or": [{"type": {"$eq": "rogue"}}, {"$and": [{"power": {"$gt": 5}}]}]}
        );
    }

    #[test]
    fn operator_lookalike_values_and_fields_are_untouched() {
        let tree = MatchNode::And(vec![
            MatchNode::leaf("in", MatchOp::Eq, "and"),
            MatchNode::leaf("note", MatchOp::Neq, "{\"or\":1}"),
        ]);
        assert_eq!(
            map_operators(Some(&tree)),
            doc! {"$and": [{"in": {"$eq": "and"}}, {"note": {"$ne": "{\"or\":1}"}}]}
        );
    }

    #[test]
    fn absent_match_is_empty_selector() {
        assert!(map_operators(None).is_empty());
        assert!(build_selector(&QueryEnvelope::new(Verb::Find, "x")).is_empty());
    }

    #[test]
    fn ids_become_native_in_set() {
        let (a, b) = (ObjectId::new(), ObjectId::new());
        let mut qe = QueryEnvelope::new(Verb::Find, "x");
        qe.ids = Some(vec![a.to_hex().into(), b.to_hex().into()]);
        assert_eq!(build_selector(&qe), doc! {"_id": {"$in": [a, b]}});
    }

    #[test]
    fn ids_narrow_an_existing_match() {
        let a = ObjectId::new();
        let mut qe = QueryEnvelope::new(Verb::Find, "x");
        qe.matches = Some(MatchNode::leaf("type", MatchOp::Eq, "rogue"));
        qe.ids = Some(vec![a.to_hex().into()]);
        assert_eq!(build_selector(&qe), doc! {"type": {"$eq": "rogue"}, "_id": {"$in": [a]}});

        qe.matches = Some(MatchNode::leaf("_id", MatchOp::Nin, vec![Bson::String("k".into())]));
        assert_eq!(
            build_selector(&qe),
            doc! {"$and": [{"_id": {"$nin": ["k"]}}, {"_id": {"$in": [a]}}]}
        );
    }
}
