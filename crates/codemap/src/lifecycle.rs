//! Index lifecycle: a four-state status machine paired with a re-armable
//! readiness latch.
//!
//! The latch is observed at most once per epoch: it fires when a run leaves
//! `in_progress` for `ready` or `failed`, and a re-index entering
//! `in_progress` from a terminal state first re-arms it with a fresh
//! channel. Tools that need graph data block on [`IndexLifecycle::wait_for_ready`].

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    NotStarted,
    InProgress,
    Ready,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::NotStarted => "not_started",
            IndexStatus::InProgress => "in_progress",
            IndexStatus::Ready => "ready",
            IndexStatus::Failed => "failed",
        }
    }
}

struct Inner {
    status: IndexStatus,
    error: Option<String>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    ready_tx: watch::Sender<bool>,
}

pub struct IndexLifecycle {
    inner: Mutex<Inner>,
}

impl IndexLifecycle {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                status: IndexStatus::NotStarted,
                error: None,
                started_at: None,
                finished_at: None,
                ready_tx,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enter `in_progress`, starting a new epoch.
    ///
    /// Rejects while a run is already in progress. Entering from `ready` or
    /// `failed` re-arms the latch with a fresh channel.
    pub fn begin(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.status {
            IndexStatus::InProgress => return Err(IndexError::IndexInProgress),
            IndexStatus::Ready | IndexStatus::Failed => {
                let (ready_tx, _) = watch::channel(false);
                inner.ready_tx = ready_tx;
            }
            IndexStatus::NotStarted => {}
        }
        inner.status = IndexStatus::InProgress;
        inner.error = None;
        inner.started_at = Some(Instant::now());
        inner.finished_at = None;
        Ok(())
    }

    /// Terminate the current epoch and fire the latch.
    pub fn finish(&self, result: std::result::Result<(), String>) {
        let mut inner = self.lock();
        match result {
            Ok(()) => {
                inner.status = IndexStatus::Ready;
                inner.error = None;
            }
            Err(message) => {
                inner.status = IndexStatus::Failed;
                inner.error = Some(message);
            }
        }
        inner.finished_at = Some(Instant::now());
        let _ = inner.ready_tx.send(true);
    }

    /// Current status, latched error, and run duration (elapsed so far when
    /// a run is in flight).
    pub fn status(&self) -> (IndexStatus, Option<String>, Option<Duration>) {
        let inner = self.lock();
        let duration = match (inner.started_at, inner.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        };
        (inner.status, inner.error.clone(), duration)
    }

    /// Block until the current epoch latches or the token is cancelled.
    ///
    /// Returns the epoch's error when it latched via `failed`.
    pub async fn wait_for_ready(&self, cancel: &CancellationToken) -> Result<()> {
        eprintln!("DEBUG: entering wait_for_ready");
        let mut rx = self.lock().ready_tx.subscribe();
        eprintln!("DEBUG: subscribed, value={}", *rx.borrow());
        loop {
            if *rx.borrow_and_update() {
                eprintln!("DEBUG: value true, about to lock for error");
                let inner = self.lock();
                eprintln!("DEBUG: locked for error, error={:?}", inner.error);
                return match &inner.error {
                    Some(message) => Err(IndexError::IndexFailed(message.clone())),
                    None => Ok(()),
                };
            }
            eprintln!("DEBUG: value false, waiting for change");
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // The epoch was re-armed under us; pick up the new channel.
                        rx = self.lock().ready_tx.subscribe();
                    }
                }
                _ = cancel.cancelled() => return Err(IndexError::Cancelled),
            }
        }
    }
}

impl Default for IndexLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_begin_rejects_while_in_progress() {
        let lifecycle = IndexLifecycle::new();
        lifecycle.begin().unwrap();
        assert!(matches!(
            lifecycle.begin().unwrap_err(),
            IndexError::IndexInProgress
        ));
    }

    #[test]
    fn test_status_transitions() {
        let lifecycle = IndexLifecycle::new();
        assert_eq!(lifecycle.status().0, IndexStatus::NotStarted);

        lifecycle.begin().unwrap();
        assert_eq!(lifecycle.status().0, IndexStatus::InProgress);

        lifecycle.finish(Ok(()));
        let (status, error, duration) = lifecycle.status();
        assert_eq!(status, IndexStatus::Ready);
        assert!(error.is_none());
        assert!(duration.is_some());
    }

    #[test]
    fn test_failed_latches_error() {
        let lifecycle = IndexLifecycle::new();
        lifecycle.begin().unwrap();
        lifecycle.finish(Err("scan failed".to_string()));

        let (status, error, _) = lifecycle.status();
        assert_eq!(status, IndexStatus::Failed);
        assert_eq!(error.as_deref(), Some("scan failed"));
    }

    #[tokio::test]
    async fn test_waiter_unblocks_on_ready() {
        let lifecycle = Arc::new(IndexLifecycle::new());
        lifecycle.begin().unwrap();

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                lifecycle.wait_for_ready(&cancel).await
            })
        };

        // Give the waiter a chance to park before the latch fires.
        tokio::time::sleep(Duration::from_millis(20)).await;
        lifecycle.finish(Ok(()));

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_waiter_receives_failure() {
        let lifecycle = Arc::new(IndexLifecycle::new());
        lifecycle.begin().unwrap();
        lifecycle.finish(Err("no language server".to_string()));

        let cancel = CancellationToken::new();
        let err = lifecycle.wait_for_ready(&cancel).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexFailed(_)));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_current_epoch_latches() {
        let lifecycle = Arc::new(IndexLifecycle::new());
        lifecycle.begin().unwrap();
        lifecycle.finish(Ok(()));

        // New epoch re-arms the latch; a fresh waiter must block again.
        lifecycle.begin().unwrap();

        let cancel = CancellationToken::new();
        let wait = tokio::time::timeout(
            Duration::from_millis(50),
            lifecycle.wait_for_ready(&cancel),
        )
        .await;
        assert!(wait.is_err(), "waiter resolved before the epoch latched");

        lifecycle.finish(Ok(()));
        tokio::time::timeout(
            Duration::from_millis(100),
            lifecycle.wait_for_ready(&cancel),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_wait_cancellation() {
        let lifecycle = IndexLifecycle::new();
        lifecycle.begin().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = lifecycle.wait_for_ready(&cancel).await.unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }
}
