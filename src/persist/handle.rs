use crossbeam_channel::{RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::error;

use super::worker::{PersistCommand, PersistWorker, SyncReport, WorkerSettings};
use crate::core::Block;
use crate::error::AcquisitionError;
use crate::observability::PersistMetrics;

/// Producer-side handle to the persist worker thread.
///
/// Flushes are fire-and-forget; `sync`, `reset` and `finalize` block until
/// the worker acknowledges, bounded by a timeout.
pub struct PersistHandle {
    tx: Sender<PersistCommand>,
    thread: Option<thread::JoinHandle<()>>,
    metrics: Arc<PersistMetrics>,
}

impl PersistHandle {
    pub fn spawn(settings: WorkerSettings) -> Result<Self, AcquisitionError> {
        let metrics = Arc::new(PersistMetrics::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = PersistWorker::new(settings, metrics.clone());

        let thread = thread::Builder::new()
            .name("persist-worker".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| {
                AcquisitionError::PersistFailure(format!("failed to start persist worker: {}", e))
            })?;

        Ok(Self {
            tx,
            thread: Some(thread),
            metrics,
        })
    }

    pub fn metrics(&self) -> Arc<PersistMetrics> {
        self.metrics.clone()
    }

    /// Queues a block without waiting for it to be written
    pub fn post_flush(&self, block: Block, axis: Vec<f64>) -> Result<(), AcquisitionError> {
        self.tx
            .send(PersistCommand::Flush { block, axis })
            .map_err(|_| AcquisitionError::WorkerUnavailable)
    }

    /// Waits until every previously posted command has been applied
    pub fn sync(&self, timeout: Duration) -> Result<SyncReport, AcquisitionError> {
        self.request(|ack| PersistCommand::Sync { ack }, timeout)
    }

    pub fn reset(&self, timeout: Duration) -> Result<(), AcquisitionError> {
        self.request(|ack| PersistCommand::Reset { ack }, timeout)
    }

    /// Exports the working store; returns the number of frames exported
    pub fn finalize(
        &self,
        comments: String,
        destination: PathBuf,
        timeout: Duration,
    ) -> Result<usize, AcquisitionError> {
        self.request(
            |ack| PersistCommand::Finalize {
                comments,
                destination,
                ack,
            },
            timeout,
        )?
    }

    fn request<T>(
        &self,
        make: impl FnOnce(Sender<T>) -> PersistCommand,
        timeout: Duration,
    ) -> Result<T, AcquisitionError> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(make(ack_tx))
            .map_err(|_| AcquisitionError::WorkerUnavailable)?;
        ack_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => AcquisitionError::SaveTimeout(timeout),
            RecvTimeoutError::Disconnected => AcquisitionError::WorkerUnavailable,
        })
    }

    /// Stops the worker after it has applied everything already queued
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(PersistCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("persist worker panicked");
            }
        }
    }
}

impl Drop for PersistHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
