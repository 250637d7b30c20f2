//! In-process storage driver.
//!
//! Evaluates the native selector, projection, sort and update syntax over `bson` documents held
//! in memory. Several drivers may share one [`MemoryStore`], so data survives reconnects.

mod eval;
mod update;

pub use eval::{bson_eq, compare_bson, compare_docs, matches, project};
pub(crate) use eval::get_path;
pub use update::apply_update;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::AdapterConfig;
use crate::errors::AdapterError;
use crate::store::{Connection, FindOptions, StorageDriver, UpdateOptions};
use crate::types::{CollectionName, ID_FIELD};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionName, Vec<Document>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of documents held in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, Vec::len)
    }

    pub fn list_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy of every document in `collection`, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections.read().get(collection).cloned().unwrap_or_default()
    }
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn connect(&self, config: &AdapterConfig) -> Result<Arc<dyn Connection>, AdapterError> {
        log::info!("memory driver connected ({})", config.redacted_url());
        Ok(Arc::new(MemoryConnection::new(self.store.clone())))
    }
}

pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    closed: watch::Sender<bool>,
}

impl MemoryConnection {
    #[must_use]
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store, closed: watch::Sender::new(false) }
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if *self.closed.borrow() {
            return Err(AdapterError::Storage("connection closed".into()));
        }
        Ok(())
    }
}

fn with_id(doc: Document) -> Document {
    if doc.contains_key(ID_FIELD) {
        return doc;
    }
    let mut out = Document::new();
    out.insert(ID_FIELD, Bson::ObjectId(ObjectId::new()));
    for (k, v) in doc {
        out.insert(k, v);
    }
    out
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Document>, AdapterError> {
        self.ensure_open()?;
        let docs: Vec<Document> = docs.into_iter().map(with_id).collect();
        let mut cols = self.store.collections.write();
        cols.entry(collection.to_string()).or_default().extend(docs.iter().cloned());
        log::debug!("memory insert {} into {collection}", docs.len());
        Ok(docs)
    }

    async fn find(
        &self,
        collection: &str,
        selector: &Document,
        opts: &FindOptions,
    ) -> Result<Vec<Document>, AdapterError> {
        self.ensure_open()?;
        let mut rows = Vec::new();
        {
            let cols = self.store.collections.read();
            for d in cols.get(collection).into_iter().flatten() {
                if matches(d, selector)? {
                    rows.push(d.clone());
                }
            }
        }
        if let Some(sort) = opts.sort.as_ref().filter(|s| !s.is_empty()) {
            rows.sort_by(|a, b| compare_docs(a, b, sort));
        }
        let skip = to_usize(opts.skip.unwrap_or(0));
        let limit = opts.limit.filter(|l| *l > 0).map_or(usize::MAX, to_usize);
        Ok(rows
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| project(d, &opts.projection))
            .collect())
    }

    async fn update(
        &self,
        collection: &str,
        selector: &Document,
        update: &Document,
        opts: UpdateOptions,
    ) -> Result<u64, AdapterError> {
        self.ensure_open()?;
        let mut cols = self.store.collections.write();
        let Some(docs) = cols.get_mut(collection) else {
            return Ok(0);
        };
        let mut modified = 0u64;
        for d in docs.iter_mut() {
            if !matches(d, selector)? {
                continue;
            }
            let mut next = d.clone();
            if apply_update(&mut next, update)? {
                *d = next;
                modified += 1;
            }
            if !opts.multi {
                break;
            }
        }
        Ok(modified)
    }

    async fn remove(&self, collection: &str, selector: &Document) -> Result<u64, AdapterError> {
        self.ensure_open()?;
        let mut cols = self.store.collections.write();
        let Some(docs) = cols.get_mut(collection) else {
            return Ok(0);
        };
        let keep = docs
            .iter()
            .map(|d| matches(d, selector).map(|m| !m))
            .collect::<Result<Vec<bool>, _>>()?;
        let before = docs.len();
        let mut flags = keep.into_iter();
        docs.retain(|_| flags.next().unwrap_or(true));
        Ok((before - docs.len()) as u64)
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}
