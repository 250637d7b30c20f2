use bson::{Bson, Document};
use std::collections::BTreeMap;

use crate::types::{DEFAULT_RESOURCE, ID_FIELD, to_portable_id};

/// Payload held under the resource key of a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyData {
    Rows(Vec<Document>),
    Count(u64),
}

/// Normalized response: `{<resource>: data}` plus optional `linked` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub resource: String,
    pub data: ReplyData,
    pub linked: Option<BTreeMap<String, Vec<Document>>>,
}

impl Reply {
    /// Wraps store rows, converting every identifier to its portable form.
    #[must_use]
    pub fn rows(resource: Option<&str>, mut rows: Vec<Document>) -> Self {
        for row in &mut rows {
            map_id(row);
        }
        Self { resource: label(resource), data: ReplyData::Rows(rows), linked: None }
    }

    #[must_use]
    pub fn count(resource: Option<&str>, n: u64) -> Self {
        Self { resource: label(resource), data: ReplyData::Count(n), linked: None }
    }

    #[must_use]
    pub fn with_linked(mut self, linked: BTreeMap<String, Vec<Document>>) -> Self {
        self.linked = Some(linked);
        self
    }

    /// Rows of the reply; empty for count replies.
    #[must_use]
    pub fn as_rows(&self) -> &[Document] {
        match &self.data {
            ReplyData::Rows(rows) => rows,
            ReplyData::Count(_) => &[],
        }
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Document> {
        match self.data {
            ReplyData::Rows(rows) => rows,
            ReplyData::Count(_) => Vec::new(),
        }
    }

    #[must_use]
    pub const fn as_count(&self) -> Option<u64> {
        match self.data {
            ReplyData::Count(n) => Some(n),
            ReplyData::Rows(_) => None,
        }
    }

    /// Linked rows fetched for a populate field.
    #[must_use]
    pub fn linked(&self, field: &str) -> Option<&[Document]> {
        self.linked.as_ref()?.get(field).map(Vec::as_slice)
    }

    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut out = Document::new();
        let data = match &self.data {
            ReplyData::Rows(rows) => rows_bson(rows),
            ReplyData::Count(n) => i64::try_from(*n).map_or(Bson::Double(*n as f64), Bson::Int64),
        };
        out.insert(self.resource.clone(), data);
        if let Some(linked) = &self.linked {
            let mut l = Document::new();
            for (field, rows) in linked {
                l.insert(field.clone(), rows_bson(rows));
            }
            out.insert("linked", l);
        }
        out
    }

    /// Relaxed extended JSON form of [`Reply::to_document`].
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        Bson::Document(self.to_document()).into_relaxed_extjson()
    }
}

fn label(resource: Option<&str>) -> String {
    resource.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_RESOURCE).to_string()
}

fn rows_bson(rows: &[Document]) -> Bson {
    Bson::Array(rows.iter().cloned().map(Bson::Document).collect())
}

fn map_id(row: &mut Document) {
    if let Some(id) = row.get(ID_FIELD) {
        let portable = to_portable_id(id);
        row.insert(ID_FIELD, portable);
    }
}
