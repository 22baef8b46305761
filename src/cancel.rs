//! Query cancellation.
//!
//! A [`CancelToken`] is handed to [`crate::dispatch::Dispatcher::ask`]. The
//! dispatcher checks it between pipeline stages and between generated
//! fragments; once cancelled, no partial answer is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use paper_copilot_core::{CopilotError, Result};
use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// `Err(Cancelled)` if the token has fired.
    pub fn check(&self, query_id: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(CopilotError::Cancelled {
                query_id: query_id.to_string(),
            });
        }
        Ok(())
    }
}
