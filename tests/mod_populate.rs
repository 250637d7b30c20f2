use async_trait::async_trait;
use bson::{Bson, Document, doc};
use nexus_adapter::memory::{MemoryConnection, MemoryStore};
use nexus_adapter::query::{MatchNode, MatchOp, PopulateDirective};
use nexus_adapter::store::{FindOptions, UpdateOptions};
use nexus_adapter::{
    Adapter, AdapterConfig, AdapterError, Connection, MemoryDriver, QueryEnvelope, StorageDriver, Verb,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

async fn seed(adapter: &Adapter, on: &str, body: Vec<Document>) {
    let mut qe = QueryEnvelope::new(Verb::Create, on);
    qe.body = Some(body);
    adapter.exec(qe).await.unwrap();
}

async fn heroes_with_tags() -> Adapter {
    let adapter = Adapter::new(MemoryDriver::new());
    seed(
        &adapter,
        "supers",
        vec![
            doc! {"handle": "Drzzt", "tags": [1, 3], "mentor": "Pug"},
            doc! {"handle": "Joe", "tags": 3},
            doc! {"handle": "Bruce"},
        ],
    )
    .await;
    seed(
        &adapter,
        "tags",
        vec![doc! {"_id": 1, "label": "fast"}, doc! {"_id": 2, "label": "slow"}, doc! {"_id": 3, "label": "sly"}],
    )
    .await;
    seed(&adapter, "mentors", vec![doc! {"handle": "Pug", "school": "magic"}, doc! {"handle": "Ezio", "school": "blade"}])
        .await;
    adapter
}

fn labels(rows: &[Document]) -> Vec<&str> {
    let mut out: Vec<&str> = rows.iter().map(|r| r.get_str("label").unwrap()).collect();
    out.sort_unstable();
    out
}

#[tokio::test]
async fn keys_only_lookup_lands_under_linked() {
    let adapter = heroes_with_tags().await;
    let reply = adapter
        .exec_json(r#"{"do":"find","on":"supers","match":{"handle":{"eq":"Drzzt"}},"populate":{"tags":{}}}"#)
        .await
        .unwrap();
    let tags = reply.linked("tags").unwrap();
    assert_eq!(labels(tags), ["fast", "sly"]);
    let ids: Vec<&str> = tags.iter().map(|t| t.get_str("_id").unwrap()).collect();
    assert!(ids.contains(&"1") && ids.contains(&"3"));

    let json = reply.to_json();
    assert_eq!(json["linked"]["tags"].as_array().map(Vec::len), Some(2));
    assert_eq!(adapter.metrics().populate_lookups, 1);
}

#[tokio::test]
async fn duplicate_candidates_still_fetch_each_row_once() {
    let adapter = heroes_with_tags().await;
    let mut qe = QueryEnvelope::new(Verb::Find, "supers");
    qe.populate = Some(BTreeMap::from([("tags".to_string(), PopulateDirective::default())]));
    let reply = adapter.exec(qe).await.unwrap();
    assert_eq!(reply.as_rows().len(), 3);
    assert_eq!(labels(reply.linked("tags").unwrap()), ["fast", "sly"]);
}

#[tokio::test]
async fn foreign_key_lookup_respects_directive_query() {
    let adapter = heroes_with_tags().await;
    let mut query = QueryEnvelope::default();
    query.on = Some("mentors".into());
    query.select = Some(vec!["school".into()]);
    query.matches = Some(MatchNode::leaf("school", MatchOp::Neq, "blade"));
    let directive = PopulateDirective { key: Some("handle".into()), query: Some(Box::new(query)) };

    let mut qe = QueryEnvelope::new(Verb::Find, "supers");
    qe.populate = Some(BTreeMap::from([("mentor".to_string(), directive)]));
    let reply = adapter.exec(qe).await.unwrap();
    let mentors = reply.linked("mentor").unwrap();
    assert_eq!(mentors.len(), 1);
    assert_eq!(mentors[0].get_str("school").unwrap(), "magic");
    assert!(!mentors[0].contains_key("handle"));
}

#[tokio::test]
async fn several_fields_resolve_together() {
    let adapter = heroes_with_tags().await;
    let reply = adapter
        .exec_json(
            r#"{"do":"find","on":"supers","populate":{
                "tags":{},
                "mentor":{"key":"handle","query":{"on":"mentors"}}
            }}"#,
        )
        .await
        .unwrap();
    assert_eq!(reply.linked("tags").unwrap().len(), 2);
    assert_eq!(reply.linked("mentor").unwrap()[0].get_str("handle").unwrap(), "Pug");
    assert_eq!(adapter.metrics().populate_lookups, 2);
}

/// Delegates to the memory driver but fails every find on one collection, by error or by panic.
struct BrokenCollection {
    inner: MemoryConnection,
    broken: &'static str,
    panics: bool,
}

#[async_trait]
impl Connection for BrokenCollection {
    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Document>, AdapterError> {
        self.inner.insert(collection, docs).await
    }

    async fn find(&self, collection: &str, selector: &Document, opts: &FindOptions) -> Result<Vec<Document>, AdapterError> {
        if collection == self.broken {
            assert!(!self.panics, "{collection} lookup blew up");
            return Err(AdapterError::Storage(format!("{collection} is offline")));
        }
        self.inner.find(collection, selector, opts).await
    }

    async fn update(
        &self,
        collection: &str,
        selector: &Document,
        update: &Document,
        opts: UpdateOptions,
    ) -> Result<u64, AdapterError> {
        self.inner.update(collection, selector, update, opts).await
    }

    async fn remove(&self, collection: &str, selector: &Document) -> Result<u64, AdapterError> {
        self.inner.remove(collection, selector).await
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.inner.closed()
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

struct BrokenDriver {
    store: Arc<MemoryStore>,
    panics: bool,
}

#[async_trait]
impl StorageDriver for BrokenDriver {
    async fn connect(&self, _config: &AdapterConfig) -> Result<Arc<dyn Connection>, AdapterError> {
        Ok(Arc::new(BrokenCollection {
            inner: MemoryConnection::new(self.store.clone()),
            broken: "mentors",
            panics: self.panics,
        }))
    }
}

async fn find_with_broken_mentors(panics: bool) -> AdapterError {
    let adapter = Adapter::new(BrokenDriver { store: MemoryStore::new(), panics });
    seed(&adapter, "supers", vec![doc! {"handle": "Drzzt", "tags": [1], "mentor": "Pug"}]).await;
    seed(&adapter, "tags", vec![doc! {"_id": 1, "label": "fast"}]).await;

    adapter
        .exec_json(
            r#"{"do":"find","on":"supers","populate":{
                "tags":{},
                "mentor":{"key":"handle","query":{"on":"mentors"}}
            }}"#,
        )
        .await
        .unwrap_err()
}

#[tokio::test]
async fn first_failed_lookup_fails_the_whole_find() {
    let err = find_with_broken_mentors(false).await;
    match &err {
        AdapterError::PopulateLookupFailed { field, .. } => assert_eq!(field, "mentor"),
        other => panic!("unexpected error {other}"),
    }
    assert!(matches!(err.root_cause(), AdapterError::Storage(m) if m == "mentors is offline"));
}

#[tokio::test]
async fn panicking_lookup_still_names_its_field() {
    let err = find_with_broken_mentors(true).await;
    match &err {
        AdapterError::PopulateLookupFailed { field, .. } => assert_eq!(field, "mentor"),
        other => panic!("unexpected error {other}"),
    }
    assert!(matches!(err.root_cause(), AdapterError::Storage(m) if m.contains("lookup task failed")));
}

#[tokio::test]
async fn rows_without_the_field_link_nothing() {
    let adapter = heroes_with_tags().await;
    let mut qe = QueryEnvelope::new(Verb::Find, "supers");
    qe.matches = Some(MatchNode::leaf("handle", MatchOp::Eq, "Bruce"));
    qe.populate = Some(BTreeMap::from([("tags".to_string(), PopulateDirective::default())]));
    let reply = adapter.exec(qe).await.unwrap();
    assert_eq!(reply.linked("tags"), Some(&[][..]));
    assert_eq!(reply.as_rows()[0].get("tags"), None::<&Bson>);
}
