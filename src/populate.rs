//! Linked-data lookups emulating joins.
//!
//! For every populate field the values found in the primary rows become a secondary find, run
//! concurrently on the connection that served the primary query. Results land under `linked`.

use bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::{Id, JoinSet};

use crate::adapter::Adapter;
use crate::errors::AdapterError;
use crate::memory::get_path;
use crate::query::{MatchNode, MatchOp, PopulateDirective, QueryEnvelope, Verb};
use crate::store::Connection;
use crate::telemetry::AdapterMetrics;

/// Values of `field` across `rows`. Arrays are flattened, duplicates kept, missing and null skipped.
#[must_use]
pub fn candidates(rows: &[Document], field: &str) -> Vec<Bson> {
    let mut out = Vec::new();
    for value in rows.iter().filter_map(|r| get_path(r, field)) {
        match value {
            Bson::Array(items) => out.extend(items.iter().filter(|v| !matches!(v, Bson::Null)).cloned()),
            Bson::Null => {}
            other => out.push(other.clone()),
        }
    }
    out
}

/// Secondary find envelope for one populate field.
///
/// With a `key`, an `in` leaf on that key is ANDed into the directive's own match; otherwise the
/// candidates are looked up by identifier.
#[must_use]
pub fn lookup_envelope(field: &str, directive: &PopulateDirective, candidates: Vec<Bson>) -> QueryEnvelope {
    let mut qe = directive.query.as_deref().cloned().unwrap_or_default();
    qe.verb = Some(Verb::Find.as_str().to_string());
    if qe.on.as_deref().is_none_or(str::is_empty) {
        qe.on = Some(field.to_string());
    }
    let Some(key) = &directive.key else {
        qe.ids = Some(candidates);
        return qe;
    };
    let leaf = MatchNode::leaf(key.clone(), MatchOp::In, candidates);
    qe.matches = Some(match qe.matches.take() {
        None => leaf,
        Some(MatchNode::And(mut children)) => {
            children.push(leaf);
            MatchNode::And(children)
        }
        Some(other) => MatchNode::And(vec![other, leaf]),
    });
    qe
}

pub(crate) async fn resolve(
    adapter: &Adapter,
    conn: &Arc<dyn Connection>,
    directives: &BTreeMap<String, PopulateDirective>,
    rows: &[Document],
) -> Result<BTreeMap<String, Vec<Document>>, AdapterError> {
    let mut tasks = JoinSet::new();
    let mut fields: HashMap<Id, String> = HashMap::new();
    for (field, directive) in directives {
        let qe = lookup_envelope(field, directive, candidates(rows, field));
        let verb = qe.validate().map_err(|e| AdapterError::PopulateLookupFailed {
            field: field.clone(),
            source: Box::new(e),
        })?;
        AdapterMetrics::incr(&adapter.metrics_ref().populate_lookups);
        log::debug!("populate `{field}` from `{}`", qe.resource());
        let (adapter, conn, name) = (adapter.clone(), conn.clone(), field.clone());
        let handle = tasks.spawn(async move {
            let result = adapter.dispatch(conn, verb, qe).await;
            (name, result)
        });
        fields.insert(handle.id(), field.clone());
    }

    let mut linked = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (field, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                let field = fields.remove(&e.id()).unwrap_or_default();
                log::error!("populate `{field}` task died: {e}");
                return Err(AdapterError::PopulateLookupFailed {
                    field,
                    source: Box::new(AdapterError::Storage(format!("lookup task failed: {e}"))),
                });
            }
        };
        match result {
            Ok(reply) => {
                linked.insert(field, reply.into_rows());
            }
            Err(e) => {
                log::warn!("populate `{field}` failed: {e}");
                return Err(AdapterError::PopulateLookupFailed { field, source: Box::new(e) });
            }
        }
    }
    Ok(linked)
}
