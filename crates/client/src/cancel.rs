//! Explicit cancellation for the client-side loops.
//!
//! Dropping the token counts as cancellation: an owner that goes away must
//! not leave a loop rescheduling itself.

use tokio::sync::watch;

pub struct CancelToken {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested or the token is dropped.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
