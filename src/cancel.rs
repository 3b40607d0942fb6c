// src/cancel.rs

//! Stop requests for a run.
//!
//! A [`StopHandle`] is held by whoever may stop the run (Ctrl-C handler, a
//! ready timeout, a test); the [`CancelSignal`] is threaded through the
//! coordinator and the installer, which check it at stage boundaries and
//! race it against process exit once something is running.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected stop handle / cancel signal pair.
pub fn stop_channel() -> (StopHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request cancellation. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal nobody can fire.
    pub fn never() -> Self {
        let (_handle, signal) = stop_channel();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop was requested. Pends forever if every
    /// [`StopHandle`] was dropped without stopping.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
