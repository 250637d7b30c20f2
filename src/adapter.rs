//! `exec` entry point.
//!
//! An [`Adapter`] owns its configuration, connection manager, deferred queue and counters. It is a
//! cheap handle (`Arc` inside) and may be cloned into tasks.

use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::AdapterConfig;
use crate::connection::{Admission, ConnectionManager, ConnectionState};
use crate::errors::AdapterError;
use crate::logger::AUDIT_TARGET;
use crate::populate;
use crate::query::{
    QueryEnvelope, Reply, Verb, build_projection, build_selector, build_sort, build_update, is_multi,
    parse_envelope_json,
};
use crate::store::{Connection, Cursor, StorageDriver, UpdateOptions};
use crate::telemetry::{AdapterMetrics, MetricsSnapshot};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct AdapterInner {
    config: RwLock<AdapterConfig>,
    driver: Arc<dyn StorageDriver>,
    manager: ConnectionManager,
    metrics: AdapterMetrics,
}

#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

impl Adapter {
    pub fn new(driver: impl StorageDriver + 'static) -> Self {
        Self::with_config(driver, AdapterConfig::default())
    }

    pub fn with_config(driver: impl StorageDriver + 'static, config: AdapterConfig) -> Self {
        Self::from_driver(Arc::new(driver), config)
    }

    #[must_use]
    pub fn from_driver(driver: Arc<dyn StorageDriver>, config: AdapterConfig) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                config: RwLock::new(config),
                driver,
                manager: ConnectionManager::default(),
                metrics: AdapterMetrics::default(),
            }),
        }
    }

    /// Replaces the settings used by the next connect attempt.
    pub fn configure(&self, config: AdapterConfig) {
        *self.inner.config.write() = config;
    }

    #[must_use]
    pub fn config(&self) -> AdapterConfig {
        self.inner.config.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.inner.metrics.metrics_text()
    }

    pub(crate) fn metrics_ref(&self) -> &AdapterMetrics {
        &self.inner.metrics
    }

    /// Executes one envelope.
    ///
    /// The envelope is validated before any connection work. While no connection is usable the
    /// request is parked and replayed in arrival order once the connect attempt succeeds.
    ///
    /// # Errors
    /// `InvalidEnvelope`, `UnsupportedOperation`, `ConnectionFailed`, `Storage` or
    /// `PopulateLookupFailed`, as described on [`AdapterError`].
    pub async fn exec(&self, envelope: QueryEnvelope) -> Result<Reply, AdapterError> {
        let verb = envelope.validate()?;
        AdapterMetrics::incr(&self.inner.metrics.queries_total);
        match self.inner.manager.admit(envelope, verb) {
            Admission::Ready(conn, envelope) => self.dispatch(conn, verb, envelope).await,
            Admission::Queued { reply, start_connect } => {
                AdapterMetrics::incr(&self.inner.metrics.deferred_total);
                log::debug!("request parked ({} waiting)", self.inner.manager.queued());
                if start_connect {
                    let attempt = tokio::spawn(self.clone().connect_and_drain());
                    tokio::spawn(self.clone().supervise_connect(attempt));
                }
                reply
                    .await
                    .map_err(|_| AdapterError::ConnectionFailed("request dropped before replay".into()))?
            }
        }
    }

    /// Parses a JSON envelope and executes it.
    ///
    /// # Errors
    /// `Json` for malformed input, then anything [`Adapter::exec`] returns.
    pub async fn exec_json(&self, json: &str) -> Result<Reply, AdapterError> {
        self.exec(parse_envelope_json(json)?).await
    }

    /// Closes the cached connection, if any. The next `exec` reconnects.
    pub async fn disconnect(&self) {
        if let Some(conn) = self.inner.manager.disconnect() {
            log::info!("closing connection to {}", self.inner.config.read().redacted_url());
            conn.close().await;
        }
    }

    async fn connect_and_drain(self) {
        AdapterMetrics::incr(&self.inner.metrics.connect_attempts);
        let config = self.config();
        let conn = match self.inner.driver.connect(&config).await {
            Ok(conn) => conn,
            Err(e) => {
                AdapterMetrics::incr(&self.inner.metrics.connect_failures);
                let msg = match e {
                    AdapterError::ConnectionFailed(m) => m,
                    other => other.to_string(),
                };
                log::warn!("connect to {} failed: {msg}", config.redacted_url());
                self.flush_queue(&msg);
                return;
            }
        };
        log::info!("connected to {}", config.redacted_url());
        let generation = self.inner.manager.begin_drain();
        self.watch_close(&conn, generation);
        while let Some(d) = self.inner.manager.next_deferred(&conn) {
            let result = self.dispatch(conn.clone(), d.verb, d.envelope).await;
            if d.reply.send(result).is_err() {
                log::debug!("caller went away before deferred {} completed", d.verb.as_str());
            }
        }
    }

    /// A connect or drain task that dies before publishing leaves the phase at `Connecting`;
    /// every waiter is failed so the next `exec` starts over.
    async fn supervise_connect(self, attempt: JoinHandle<()>) {
        let Err(e) = attempt.await else {
            return;
        };
        AdapterMetrics::incr(&self.inner.metrics.connect_failures);
        log::error!("connect task for {} died: {e}", self.inner.config.read().redacted_url());
        self.flush_queue(&format!("connect task failed: {e}"));
    }

    fn flush_queue(&self, msg: &str) {
        for d in self.inner.manager.fail_connect() {
            if d.reply.send(Err(AdapterError::ConnectionFailed(msg.to_string()))).is_err() {
                log::debug!("caller went away before connect failure was reported");
            }
        }
    }

    fn watch_close(&self, conn: &Arc<dyn Connection>, generation: u64) {
        let mut closed = conn.closed();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let _ = closed.wait_for(|c| *c).await;
            if let Some(inner) = inner.upgrade() {
                inner.manager.mark_closed(generation);
            }
        });
    }

    /// Runs one validated envelope on `conn`. Boxed so populate lookups can recurse through it.
    pub(crate) fn dispatch(
        &self,
        conn: Arc<dyn Connection>,
        verb: Verb,
        qe: QueryEnvelope,
    ) -> BoxFuture<'_, Result<Reply, AdapterError>> {
        Box::pin(async move {
            let collection = qe.resource().to_string();
            log::info!(target: AUDIT_TARGET, "do={} on={collection}", verb.as_str());
            let reply = match verb {
                Verb::Create => Self::create(&conn, &collection, qe).await,
                Verb::Find => self.find(&conn, &collection, qe).await,
                Verb::Update => Self::update(&conn, &collection, &qe).await,
                Verb::Remove => conn
                    .remove(&collection, &build_selector(&qe))
                    .await
                    .map(|n| Reply::count(qe.on.as_deref(), n)),
            };
            if let Err(e) = &reply {
                log::warn!("{} on {collection} failed: {e}", verb.as_str());
            }
            reply
        })
    }

    async fn create(
        conn: &Arc<dyn Connection>,
        collection: &str,
        qe: QueryEnvelope,
    ) -> Result<Reply, AdapterError> {
        let body = qe.body.unwrap_or_default();
        if body.is_empty() {
            return Err(AdapterError::InvalidEnvelope("create requires .body".into()));
        }
        let inserted = conn.insert(collection, body).await?;
        log::debug!("inserted {} into {collection}", inserted.len());
        Ok(Reply::rows(qe.on.as_deref(), inserted))
    }

    async fn find(
        &self,
        conn: &Arc<dyn Connection>,
        collection: &str,
        qe: QueryEnvelope,
    ) -> Result<Reply, AdapterError> {
        let mut cursor = Cursor::new(
            conn.clone(),
            collection,
            build_selector(&qe),
            build_projection(qe.select.as_deref()),
        );
        if qe.sort.is_some() {
            cursor = cursor.sort(build_sort(qe.sort.as_deref()));
        }
        if let Some(n) = qe.limit {
            cursor = cursor.limit(n);
        }
        if let Some(n) = qe.offset {
            cursor = cursor.skip(n);
        }
        let rows = cursor.to_vec().await?;
        log::debug!("find on {collection} returned {} rows", rows.len());
        match qe.populate.as_ref().filter(|p| !p.is_empty()) {
            Some(directives) => {
                let linked = populate::resolve(self, conn, directives, &rows).await?;
                Ok(Reply::rows(qe.on.as_deref(), rows).with_linked(linked))
            }
            None => Ok(Reply::rows(qe.on.as_deref(), rows)),
        }
    }

    async fn update(
        conn: &Arc<dyn Connection>,
        collection: &str,
        qe: &QueryEnvelope,
    ) -> Result<Reply, AdapterError> {
        let selector = build_selector(qe);
        let update = build_update(qe);
        if selector.is_empty() || update.is_empty() {
            log::debug!("update on {collection} skipped: empty selector or update");
            return Ok(Reply::count(qe.on.as_deref(), 0));
        }
        let n = conn
            .update(collection, &selector, &update, UpdateOptions { multi: is_multi(qe) })
            .await?;
        Ok(Reply::count(qe.on.as_deref(), n))
    }
}
