//! Caller-side handle of a running transcode.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{TranscodeEvent, TranscodeId};
use crate::pipeline::{TranscodeError, TranscodeOutput, TranscodeResult};

/// Handle for observing and cancelling one transcode.
///
/// Events arrive on an unbounded channel fed from the worker thread, so the
/// worker never blocks on a slow consumer. Dropping the handle detaches the
/// worker; it runs to completion and releases its resources on its own.
pub struct TranscodeHandle {
    id: TranscodeId,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<TranscodeEvent>,
    worker: std::thread::JoinHandle<()>,
}

impl TranscodeHandle {
    pub(crate) fn new(
        id: TranscodeId,
        cancel: CancellationToken,
        events: mpsc::UnboundedReceiver<TranscodeEvent>,
        worker: std::thread::JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            cancel,
            events,
            worker,
        }
    }

    pub fn id(&self) -> TranscodeId {
        self.id
    }

    /// Requests cancellation.
    ///
    /// Best-effort: if the worker already finished, the completion event
    /// stands and this has no effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the worker, for wiring into other shutdown paths.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Next event, or `None` once the terminal event was consumed.
    pub async fn next_event(&mut self) -> Option<TranscodeEvent> {
        self.events.recv().await
    }

    /// Blocking variant of [`TranscodeHandle::next_event`] for synchronous callers.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_next_event(&mut self) -> Option<TranscodeEvent> {
        self.events.blocking_recv()
    }

    /// Waits for the terminal outcome, discarding progress events.
    ///
    /// # Errors
    /// - `TranscodeError` - The transcode failed or was cancelled
    /// - `TranscodeError::Worker` - The worker exited without a terminal event
    pub async fn wait(mut self) -> TranscodeResult<TranscodeOutput> {
        while let Some(event) = self.events.recv().await {
            match event {
                TranscodeEvent::Progress { .. } => {}
                TranscodeEvent::Completed(output) => return Ok(output),
                TranscodeEvent::Failed { error } => return Err(error),
            }
        }
        Err(TranscodeError::Worker {
            reason: format!("transcode {} ended without an outcome", self.id),
        })
    }
}

impl std::fmt::Debug for TranscodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
