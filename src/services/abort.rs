//! Session cancellation: one shared abort signal per session.

use std::future::Future;

use tokio::sync::watch;

use crate::error::{RelayError, RelayResult};

/// Trigger side. Cloneable; firing it more than once is a no-op.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, checked at every suspension point of the session.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

impl AbortHandle {
    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn abort(&self) -> bool {
        self.tx.send_if_modified(|aborted| {
            if *aborted {
                false
            } else {
                *aborted = true;
                true
            }
        })
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Pending forever if the handle is
    /// dropped without firing.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless the signal fires first, in which case `fut` is dropped
    /// and `RelayError::Aborted` is returned.
    pub async fn guard<F, T>(&self, fut: F) -> RelayResult<T>
    where
        F: Future<Output = T>,
    {
        let mut signal = self.clone();
        tokio::select! {
            biased;
            _ = signal.aborted() => Err(RelayError::Aborted),
            out = fut => Ok(out),
        }
    }
}
