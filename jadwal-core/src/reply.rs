//! Single-use reply slot with a bounded wait.
//!
//! A [`Replier`] travels to whoever will answer (usually on another callback
//! thread); the [`PendingReply`] stays with the caller, who waits at most a
//! given duration. Dropping the replier without answering wakes the caller
//! immediately instead of letting it sit out the timeout.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("replier dropped without answering")]
    Dropped,
}

#[derive(Debug)]
pub struct Replier<T> {
    tx: SyncSender<T>,
}

impl<T> Replier<T> {
    /// Returns false when the waiting side already gave up.
    pub fn reply(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }
}

#[derive(Debug)]
pub struct PendingReply<T> {
    rx: Receiver<T>,
}

impl<T> PendingReply<T> {
    pub fn wait(self, timeout: Duration) -> Result<T, WaitError> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(WaitError::Dropped),
        }
    }

    /// Non-blocking check; `Ok(None)` means still outstanding.
    pub fn try_take(&self) -> Result<Option<T>, WaitError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WaitError::Dropped),
        }
    }
}

pub fn reply_channel<T>() -> (Replier<T>, PendingReply<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Replier { tx }, PendingReply { rx })
}
