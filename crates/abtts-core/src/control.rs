//! Run-abort signalling.
//!
//! One `RunControl` is shared by the coordinator and every worker. Aborting
//! stops workers from issuing new requests promptly: the signal is observable
//! both synchronously (checked before each send) and as a future, so delays,
//! retry backoffs, and checkpoint waits can be cancelled mid-suspension.
//! A unit is only ever recorded in the manifest after its send attempt
//! genuinely finished, so an abort never corrupts durable state.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable abort signal for one run.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request abort. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// True once abort has been requested.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when abort is requested; pends forever otherwise. Intended
    /// for use inside `tokio::select!` against sleeps and gate waits.
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn abort_is_observable_both_ways() {
        let control = RunControl::new();
        assert!(!control.is_aborted());

        let waiter = control.clone();
        let handle = tokio::spawn(async move {
            waiter.aborted().await;
        });

        control.abort();
        assert!(control.is_aborted());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("aborted() resolves after abort()")
            .unwrap();
    }

    #[tokio::test]
    async fn aborted_resolves_immediately_when_already_aborted() {
        let control = RunControl::new();
        control.abort();
        tokio::time::timeout(Duration::from_millis(100), control.aborted())
            .await
            .expect("resolves without waiting");
    }
}
