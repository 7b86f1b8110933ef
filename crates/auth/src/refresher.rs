//! Background refresh of `last_used_at`.
//!
//! Authentication only enqueues; a single worker task applies updates with its
//! own cancellation scope, so a slow or failing store never delays a request
//! and finishing or cancelling a request never cancels a refresh.
//!
//! The field is advisory: a full queue drops the update, a failed update is
//! logged and forgotten, and updating a token that was revoked meanwhile is a
//! no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use keyward_core::TokenId;

use crate::store::TokenStore;
use crate::token::TokenHash;

/// Refresher configuration.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Maximum queued refreshes before new ones are dropped.
    pub queue_capacity: usize,
    /// Upper bound for a single store update.
    pub update_timeout: Duration,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            update_timeout: Duration::from_secs(2),
        }
    }
}

impl RefresherConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct RefreshRequest {
    token_id: TokenId,
    hash: TokenHash,
    used_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    dropped: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of refresher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefresherStats {
    pub scheduled: u64,
    pub dropped: u64,
    pub applied: u64,
    /// Updates that touched no row (token revoked or expired meanwhile).
    pub stale: u64,
    pub failed: u64,
}

/// Cheap, cloneable sender side used by the ledger.
#[derive(Debug, Clone)]
pub struct RefreshQueue {
    tx: mpsc::Sender<RefreshRequest>,
    counters: Arc<Counters>,
}

impl RefreshQueue {
    /// Enqueue without waiting. Returns `false` if the update was dropped.
    pub fn schedule(&self, token_id: TokenId, hash: TokenHash, used_at: DateTime<Utc>) -> bool {
        let request = RefreshRequest {
            token_id,
            hash,
            used_at,
        };
        match self.tx.try_send(request) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(req)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(token_id = %req.token_id, "last-used queue full; dropping refresh");
                false
            }
            Err(mpsc::error::TrySendError::Closed(req)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(token_id = %req.token_id, "last-used worker stopped; dropping refresh");
                false
            }
        }
    }

    pub fn stats(&self) -> RefresherStats {
        let c = &self.counters;
        RefresherStats {
            scheduled: c.scheduled.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            applied: c.applied.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to control and join the worker.
#[derive(Debug)]
pub struct RefresherHandle {
    queue: RefreshQueue,
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl RefresherHandle {
    pub fn queue(&self) -> RefreshQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> RefresherStats {
        self.queue.stats()
    }

    /// Stop the worker after applying whatever is already queued.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawns the last-used worker.
#[derive(Debug)]
pub struct LastUsedRefresher;

impl LastUsedRefresher {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<S>(store: S, config: RefresherConfig) -> RefresherHandle
    where
        S: TokenStore + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        let join = tokio::spawn(worker_loop(
            store,
            rx,
            shutdown.clone(),
            counters.clone(),
            config.update_timeout,
        ));

        RefresherHandle {
            queue: RefreshQueue { tx, counters },
            shutdown,
            join: Some(join),
        }
    }
}

async fn worker_loop<S: TokenStore>(
    store: S,
    mut rx: mpsc::Receiver<RefreshRequest>,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
    timeout: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(req) => apply(&store, req, &counters, timeout).await,
                None => return,
            },
        }
    }

    // Drain what was accepted before shutdown.
    while let Ok(req) = rx.try_recv() {
        apply(&store, req, &counters, timeout).await;
    }
}

async fn apply<S: TokenStore>(store: &S, req: RefreshRequest, counters: &Counters, timeout: Duration) {
    match tokio::time::timeout(timeout, store.update_last_used(&req.hash, req.used_at)).await {
        Ok(Ok(true)) => {
            counters.applied.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Ok(false)) => {
            counters.stale.fetch_add(1, Ordering::Relaxed);
            debug!(token_id = %req.token_id, "last-used refresh touched no row");
        }
        Ok(Err(err)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(token_id = %req.token_id, error = %err, "last-used refresh failed");
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(token_id = %req.token_id, "last-used refresh timed out");
        }
    }
}
