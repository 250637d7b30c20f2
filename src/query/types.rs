use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::AdapterError;

/// Action requested by an envelope's `do` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Find,
    Update,
    Remove,
}

impl Verb {
    /// # Errors
    /// Returns `UnsupportedOperation` naming the verb when it is not one of the four actions.
    pub fn parse(verb: &str) -> Result<Self, AdapterError> {
        match verb {
            "create" => Ok(Self::Create),
            "find" => Ok(Self::Find),
            "update" => Ok(Self::Update),
            "remove" => Ok(Self::Remove),
            other => Err(AdapterError::UnsupportedOperation(other.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Find => "find",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

/// Leaf operators of a match tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    Eq,
    Neq,
    In,
    Nin,
    All,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl MatchOp {
    pub const ALL: [Self; 9] = [
        Self::Eq,
        Self::Neq,
        Self::In,
        Self::Nin,
        Self::All,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
    ];

    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.name() == op)
    }

    /// Envelope spelling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::In => "in",
            Self::Nin => "nin",
            Self::All => "all",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    /// Native store spelling.
    #[must_use]
    pub const fn native(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Neq => "$ne",
            Self::In => "$in",
            Self::Nin => "$nin",
            Self::All => "$all",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

pub const AND_NATIVE: &str = "$and";
pub const OR_NATIVE: &str = "$or";

/// Logical match tree. Containers hold at least one child; a leaf constrains one field with one
/// operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Document", into = "Document")]
pub enum MatchNode {
    And(Vec<MatchNode>),
    Or(Vec<MatchNode>),
    Leaf { field: String, op: MatchOp, value: Bson },
}

impl MatchNode {
    pub fn leaf(field: impl Into<String>, op: MatchOp, value: impl Into<Bson>) -> Self {
        Self::Leaf { field: field.into(), op, value: value.into() }
    }
}

/// Update directive operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    Set,
    Unset,
    Rename,
    Inc,
    Push,
    Pull,
}

impl UpdateOp {
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "set" => Some(Self::Set),
            "unset" => Some(Self::Unset),
            "rename" => Some(Self::Rename),
            "inc" => Some(Self::Inc),
            "push" => Some(Self::Push),
            "pull" => Some(Self::Pull),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Unset => "unset",
            Self::Rename => "rename",
            Self::Inc => "inc",
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

/// `{field: {op: value}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Document", into = "Document")]
pub struct UpdateDirective {
    pub field: String,
    pub op: UpdateOp,
    pub value: Bson,
}

impl UpdateDirective {
    pub fn new(field: impl Into<String>, op: UpdateOp, value: impl Into<Bson>) -> Self {
        Self { field: field.into(), op, value: value.into() }
    }
}

/// Linked-data lookup for one field of the primary result rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulateDirective {
    /// Foreign field matched against the collected values; defaults to the primary identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Partial envelope for the secondary lookup; `on` defaults to the populate field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Box<QueryEnvelope>>,
}

/// Self-describing request: verb, target collection, constraints and payload.
///
/// `do` is kept as the raw string so that an unknown verb can be reported as
/// `UnsupportedOperation` rather than failing to decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    #[serde(rename = "do", default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<MatchNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<Bson>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(
        default,
        deserialize_with = "super::parse::one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<Document>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Vec<UpdateDirective>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate: Option<BTreeMap<String, PopulateDirective>>,
}

impl QueryEnvelope {
    pub fn new(verb: Verb, on: impl Into<String>) -> Self {
        Self { verb: Some(verb.as_str().to_string()), on: Some(on.into()), ..Self::default() }
    }

    /// Checks the two required fields and resolves the verb.
    ///
    /// # Errors
    /// `InvalidEnvelope` when `do` or `on` is missing or empty, `UnsupportedOperation` for an
    /// unknown verb.
    pub fn validate(&self) -> Result<Verb, AdapterError> {
        let verb = self.verb.as_deref().filter(|v| !v.is_empty());
        let on = self.on.as_deref().filter(|o| !o.is_empty());
        match (verb, on) {
            (Some(v), Some(_)) => Verb::parse(v),
            _ => Err(AdapterError::InvalidEnvelope("requires .do and .on".into())),
        }
    }

    /// Resource label for replies.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.on.as_deref().unwrap_or(crate::types::DEFAULT_RESOURCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_round_trip_through_their_names() {
        for v in [Verb::Create, Verb::Find, Verb::Update, Verb::Remove] {
            assert_eq!(Verb::parse(v.as_str()).unwrap(), v);
        }
        let err = Verb::parse("list").unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedOperation(v) if v == "list"));
    }

    #[test]
    fn validate_requires_do_and_on() {
        let mut qe = QueryEnvelope { on: Some("x".into()), ..QueryEnvelope::default() };
        assert!(matches!(qe.validate(), Err(AdapterError::InvalidEnvelope(_))));
        qe.verb = Some("find".into());
        assert_eq!(qe.validate().unwrap(), Verb::Find);
        qe.on = Some(String::new());
        assert!(matches!(qe.validate(), Err(AdapterError::InvalidEnvelope(_))));
    }

    #[test]
    fn operator_names_are_distinct() {
        for op in MatchOp::ALL {
            assert_eq!(MatchOp::parse(op.name()), Some(op));
            assert!(op.native().starts_with('$'));
        }
        assert_eq!(MatchOp::parse("$eq"), None);
    }
}
