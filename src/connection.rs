//! Connection lifecycle and the FIFO queue of requests issued before a connection exists.
//!
//! The manager is a synchronous state machine guarded by one mutex; the adapter drives the async
//! side (connecting, draining, observing close). While the queue is being drained the phase stays
//! `Connecting`, so callers that arrive mid-drain line up behind earlier requests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::errors::AdapterError;
use crate::query::{QueryEnvelope, Reply, Verb};
use crate::store::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum Phase {
    Disconnected,
    Connecting,
    Connected(Arc<dyn Connection>),
}

/// A request parked until the connection is usable.
pub(crate) struct Deferred {
    pub envelope: QueryEnvelope,
    pub verb: Verb,
    pub reply: oneshot::Sender<Result<Reply, AdapterError>>,
}

pub(crate) enum Admission {
    /// Connected with an empty queue; run now.
    Ready(Arc<dyn Connection>, QueryEnvelope),
    /// Parked; `start_connect` is set for exactly one caller per attempt.
    Queued {
        reply: oneshot::Receiver<Result<Reply, AdapterError>>,
        start_connect: bool,
    },
}

struct Inner {
    phase: Phase,
    queue: VecDeque<Deferred>,
    generation: u64,
}

pub(crate) struct ConnectionManager {
    inner: Mutex<Inner>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner { phase: Phase::Disconnected, queue: VecDeque::new(), generation: 0 }),
        }
    }
}

impl ConnectionManager {
    pub fn state(&self) -> ConnectionState {
        match self.inner.lock().phase {
            Phase::Disconnected => ConnectionState::Disconnected,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn admit(&self, envelope: QueryEnvelope, verb: Verb) -> Admission {
        let mut g = self.inner.lock();
        if let Phase::Connected(conn) = &g.phase {
            return Admission::Ready(conn.clone(), envelope);
        }
        let (tx, rx) = oneshot::channel();
        g.queue.push_back(Deferred { envelope, verb, reply: tx });
        let start_connect = matches!(g.phase, Phase::Disconnected);
        if start_connect {
            g.phase = Phase::Connecting;
        }
        Admission::Queued { reply: rx, start_connect }
    }

    /// Starts draining after a successful connect; returns the generation of the new connection.
    pub fn begin_drain(&self) -> u64 {
        let mut g = self.inner.lock();
        g.generation += 1;
        g.generation
    }

    /// Pops the oldest parked request. Once the queue is empty the connection is published to
    /// new callers, or dropped if it closed during the drain.
    pub fn next_deferred(&self, conn: &Arc<dyn Connection>) -> Option<Deferred> {
        let mut g = self.inner.lock();
        if let Some(d) = g.queue.pop_front() {
            return Some(d);
        }
        if *conn.closed().borrow() {
            log::info!("connection closed while draining deferred requests");
            g.phase = Phase::Disconnected;
        } else {
            g.phase = Phase::Connected(conn.clone());
        }
        None
    }

    /// Returns to `Disconnected` and hands back every parked request.
    pub fn fail_connect(&self) -> Vec<Deferred> {
        let mut g = self.inner.lock();
        g.phase = Phase::Disconnected;
        g.queue.drain(..).collect()
    }

    /// Close observer callback; ignored when a newer connection replaced `generation`.
    pub fn mark_closed(&self, generation: u64) {
        let mut g = self.inner.lock();
        if g.generation == generation && matches!(g.phase, Phase::Connected(_)) {
            log::info!("connection closed; next request reconnects");
            g.phase = Phase::Disconnected;
        }
    }

    /// Forgets the cached connection and returns it so the caller can close it.
    pub fn disconnect(&self) -> Option<Arc<dyn Connection>> {
        let mut g = self.inner.lock();
        match std::mem::replace(&mut g.phase, Phase::Disconnected) {
            Phase::Connected(conn) => Some(conn),
            other => {
                g.phase = other;
                None
            }
        }
    }
}
