use crate::errors::AdapterError;
use bson::{Bson, Document};
use serde::{Deserialize, Deserializer};

use super::types::{MatchNode, MatchOp, QueryEnvelope, UpdateDirective, UpdateOp};

// Envelope-side container keys
const AND_KEY: &str = "and";
const OR_KEY: &str = "or";

impl TryFrom<Document> for MatchNode {
    type Error = String;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let mut entries = doc.into_iter();
        let (key, value) = match (entries.next(), entries.next()) {
            (Some(kv), None) => kv,
            _ => return Err("match node must hold exactly one key".into()),
        };
        match (key.as_str(), value) {
            (AND_KEY | OR_KEY, Bson::Array(children)) => {
                if children.is_empty() {
                    return Err(format!("`{key}` container requires at least one node"));
                }
                let nodes = children
                    .into_iter()
                    .map(|child| match child {
                        Bson::Document(d) => Self::try_from(d),
                        other => Err(format!("`{key}` children must be objects, got {other}")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if key == AND_KEY { Self::And(nodes) } else { Self::Or(nodes) })
            }
            (_, Bson::Document(cond)) => {
                let mut ops = cond.into_iter();
                let (op, value) = match (ops.next(), ops.next()) {
                    (Some(kv), None) => kv,
                    _ => return Err(format!("condition on `{key}` must hold exactly one operator")),
                };
                let op = MatchOp::parse(&op)
                    .ok_or_else(|| format!("unknown match operator `{op}` on `{key}`"))?;
                Ok(Self::Leaf { field: key, op, value })
            }
            (_, other) => Err(format!("condition on `{key}` must be an object, got {other}")),
        }
    }
}

impl From<MatchNode> for Document {
    fn from(node: MatchNode) -> Self {
        fn children(nodes: Vec<MatchNode>) -> Bson {
            Bson::Array(nodes.into_iter().map(|n| Bson::Document(n.into())).collect())
        }
        let mut out = Self::new();
        match node {
            MatchNode::And(nodes) => {
                out.insert(AND_KEY, children(nodes));
            }
            MatchNode::Or(nodes) => {
                out.insert(OR_KEY, children(nodes));
            }
            MatchNode::Leaf { field, op, value } => {
                let mut cond = Self::new();
                cond.insert(op.name(), value);
                out.insert(field, cond);
            }
        }
        out
    }
}

impl TryFrom<Document> for UpdateDirective {
    type Error = String;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let mut entries = doc.into_iter();
        let (field, spec) = match (entries.next(), entries.next()) {
            (Some(kv), None) => kv,
            _ => return Err("update directive must hold exactly one field".into()),
        };
        let Bson::Document(spec) = spec else {
            return Err(format!("update on `{field}` must be an object"));
        };
        let mut ops = spec.into_iter();
        let (op, value) = match (ops.next(), ops.next()) {
            (Some(kv), None) => kv,
            _ => return Err(format!("update on `{field}` must hold exactly one operator")),
        };
        let op =
            UpdateOp::parse(&op).ok_or_else(|| format!("unknown update operator `{op}` on `{field}`"))?;
        Ok(Self { field, op, value })
    }
}

impl From<UpdateDirective> for Document {
    fn from(d: UpdateDirective) -> Self {
        let mut spec = Self::new();
        spec.insert(d.op.name(), d.value);
        let mut out = Self::new();
        out.insert(d.field, spec);
        out
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BodySerde {
    Many(Vec<Document>),
    One(Document),
}

/// Accepts either a list of documents or a single document for `body`.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<Document>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BodySerde>::deserialize(deserializer)?.map(|b| match b {
        BodySerde::Many(docs) => docs,
        BodySerde::One(doc) => vec![doc],
    }))
}

impl QueryEnvelope {
    /// # Errors
    /// Returns an error if the value does not describe a well-formed envelope.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, AdapterError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// # Errors
/// Returns an error if the JSON string cannot be parsed into an envelope.
pub fn parse_envelope_json(json: &str) -> Result<QueryEnvelope, AdapterError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn parses_nested_match_tree() {
        let qe = parse_envelope_json(
            r#"{"do":"find","on":"supers","match":{"or":[
                {"type":{"eq":"rogue"}},
                {"and":[{"power":{"gt":5}},{"speed":{"lte":10}}]}
            ]}}"#,
        )
        .unwrap();
        let Some(MatchNode::Or(nodes)) = qe.matches else { panic!("expected or container") };
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], MatchNode::Leaf { field, op: MatchOp::Eq, .. } if field == "type"));
        assert!(matches!(&nodes[1], MatchNode::And(inner) if inner.len() == 2));
    }

    #[test]
    fn field_named_like_a_container_is_a_leaf() {
        let node = MatchNode::try_from(doc! {"and": {"eq": "or"}}).unwrap();
        assert_eq!(node, MatchNode::leaf("and", MatchOp::Eq, "or"));
    }

    #[test]
    fn rejects_malformed_nodes() {
        assert!(MatchNode::try_from(doc! {"and": []}).is_err());
        assert!(MatchNode::try_from(doc! {"a": {"eq": 1, "gt": 0}}).is_err());
        assert!(MatchNode::try_from(doc! {"a": {"like": 1}}).is_err());
        assert!(MatchNode::try_from(doc! {"a": 1}).is_err());
        assert!(MatchNode::try_from(doc! {"a": {"eq": 1}, "b": {"eq": 2}}).is_err());
        let bad = parse_envelope_json(r#"{"do":"find","on":"x","match":{"a":{"like":1}}}"#);
        assert!(matches!(bad, Err(AdapterError::Json(_))));
    }

    #[test]
    fn parses_updates_and_single_body() {
        let qe = parse_envelope_json(
            r#"{"do":"update","on":"x","body":{"a":1},"updates":[{"tags":{"push":["m","n"]}}]}"#,
        )
        .unwrap();
        assert_eq!(qe.body.as_ref().map(Vec::len), Some(1));
        let updates = qe.updates.unwrap();
        assert_eq!(updates[0].field, "tags");
        assert_eq!(updates[0].op, UpdateOp::Push);
        assert!(parse_envelope_json(r#"{"do":"update","on":"x","updates":[{"a":{"mul":2}}]}"#).is_err());
    }

    #[test]
    fn match_tree_serializes_back_to_envelope_form() {
        let node = MatchNode::And(vec![MatchNode::leaf("power", MatchOp::Gte, 8)]);
        let doc: Document = node.clone().into();
        assert_eq!(doc, doc! {"and": [{"power": {"gte": 8}}]});
        assert_eq!(MatchNode::try_from(doc).unwrap(), node);
    }
}
