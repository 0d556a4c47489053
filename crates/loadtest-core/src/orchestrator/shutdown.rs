//! Cooperative shutdown signalling
//!
//! Signal handlers and other tasks never touch the orchestrator directly; they
//! trigger a [`ShutdownHandle`] and the monitoring loop notices on its next tick
//! (or immediately, if it is sleeping).

use std::sync::Arc;

use tokio::sync::watch;

use crate::report::TerminationReason;

/// Cloneable, idempotent shutdown trigger. The first reason wins.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<Option<TerminationReason>>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Returns `false` if shutdown was already requested.
    pub fn trigger(&self, reason: TerminationReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<TerminationReason>> {
        self.tx.subscribe()
    }

    /// Resolves once shutdown has been requested
    pub async fn triggered(&self) -> TerminationReason {
        let mut rx = self.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return TerminationReason::Requested;
            }
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_triggered());

        assert!(handle.trigger(TerminationReason::Signal));
        assert!(!handle.clone().trigger(TerminationReason::MemoryLimit));
        assert_eq!(handle.reason(), Some(TerminationReason::Signal));
    }

    #[tokio::test]
    async fn test_waiters_are_woken() {
        let handle = ShutdownHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.triggered().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.trigger(TerminationReason::Requested);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, TerminationReason::Requested);
    }
}
