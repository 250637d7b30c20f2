//! Boundary with the storage capability.
//!
//! A driver opens [`Connection`]s; a connection executes native selectors, projections, sort maps
//! and update documents against named collections. The adapter never looks behind this seam.

use async_trait::async_trait;
use bson::Document;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::AdapterConfig;
use crate::errors::AdapterError;

/// Native find options. Sort is applied before `skip`/`limit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Document,
    pub sort: Option<Document>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub multi: bool,
}

#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Opens a connection using `config`.
    async fn connect(&self, config: &AdapterConfig) -> Result<Arc<dyn Connection>, AdapterError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Inserts documents and returns them as stored (identifiers assigned).
    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Document>, AdapterError>;

    async fn find(
        &self,
        collection: &str,
        selector: &Document,
        opts: &FindOptions,
    ) -> Result<Vec<Document>, AdapterError>;

    /// Applies `update` to matching documents and returns the modified count.
    async fn update(
        &self,
        collection: &str,
        selector: &Document,
        update: &Document,
        opts: UpdateOptions,
    ) -> Result<u64, AdapterError>;

    /// Removes matching documents and returns the deleted count.
    async fn remove(&self, collection: &str, selector: &Document) -> Result<u64, AdapterError>;

    /// Flips to `true` once the connection has closed.
    fn closed(&self) -> watch::Receiver<bool>;

    async fn close(&self);
}

/// Lazily executed find, configured the way a native driver cursor is.
pub struct Cursor {
    conn: Arc<dyn Connection>,
    collection: String,
    selector: Document,
    opts: FindOptions,
}

impl Cursor {
    #[must_use]
    pub fn new(conn: Arc<dyn Connection>, collection: &str, selector: Document, projection: Document) -> Self {
        Self {
            conn,
            collection: collection.to_string(),
            selector,
            opts: FindOptions { projection, ..FindOptions::default() },
        }
    }

    #[must_use]
    pub fn sort(mut self, sort: Document) -> Self {
        self.opts.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.opts.limit = Some(n);
        self
    }

    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.opts.skip = Some(n);
        self
    }

    #[must_use]
    pub const fn options(&self) -> &FindOptions {
        &self.opts
    }

    /// # Errors
    /// Passes through any storage failure.
    pub async fn to_vec(self) -> Result<Vec<Document>, AdapterError> {
        self.conn.find(&self.collection, &self.selector, &self.opts).await
    }
}
