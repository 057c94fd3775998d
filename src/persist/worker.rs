use anyhow::{bail, Result};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::PersistState;
use crate::core::{Block, FrameShape};
use crate::error::AcquisitionError;
use crate::observability::PersistMetrics;
use crate::store::{not_initialized, PersistentStore, StoreBackend, StoreLayout};

/// Fixed settings for the worker, decided at run construction
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub backend: StoreBackend,
    /// Working store file, extension included
    pub temp_path: PathBuf,
    pub parameter_keys: Vec<String>,
    pub transpose_batch: usize,
}

/// Messages accepted by the persist worker, applied strictly in order
pub enum PersistCommand {
    /// Append a block; `axis` is the latest axis known to the producer
    Flush { block: Block, axis: Vec<f64> },
    /// Acknowledged once every earlier command has been applied
    Sync { ack: Sender<SyncReport> },
    /// Forget the current store; the next flush recreates it
    Reset { ack: Sender<()> },
    /// Attach comments and export the store to `destination`
    Finalize {
        comments: String,
        destination: PathBuf,
        ack: Sender<Result<usize, AcquisitionError>>,
    },
    Shutdown,
}

/// Worker status returned with a sync acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub state: PersistState,
    pub frames_persisted: usize,
    /// Blocks that failed to write and are waiting for a retry
    pub pending_blocks: usize,
}

/// Deletes a leftover working store. A missing file is not an error.
pub fn remove_stale(path: &Path) -> Result<(), AcquisitionError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = ?path, "removed stale working store");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AcquisitionError::StaleTempFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Sole owner of the run's on-disk store
pub(crate) struct PersistWorker {
    settings: WorkerSettings,
    state: PersistState,
    store: Option<Box<dyn PersistentStore>>,
    backlog: VecDeque<Block>,
    axis: Vec<f64>,
    axis_dirty: bool,
    metrics: Arc<PersistMetrics>,
}

impl PersistWorker {
    pub fn new(settings: WorkerSettings, metrics: Arc<PersistMetrics>) -> Self {
        Self {
            settings,
            state: PersistState::Uninitialized,
            store: None,
            backlog: VecDeque::new(),
            axis: Vec::new(),
            axis_dirty: false,
            metrics,
        }
    }

    pub fn run(mut self, rx: Receiver<PersistCommand>) {
        for command in rx.iter() {
            match command {
                PersistCommand::Flush { block, axis } => {
                    if axis != self.axis {
                        self.axis = axis;
                        self.axis_dirty = true;
                    }
                    if !block.is_empty() {
                        self.backlog.push_back(block);
                    }
                    self.drain_backlog();
                }
                PersistCommand::Sync { ack } => {
                    let _ = ack.send(self.report());
                }
                PersistCommand::Reset { ack } => {
                    self.reset();
                    let _ = ack.send(());
                }
                PersistCommand::Finalize {
                    comments,
                    destination,
                    ack,
                } => {
                    let result = self.finalize(&comments, &destination);
                    if let Err(e) = &result {
                        error!(error = %e, destination = ?destination, "finalize failed");
                    }
                    let _ = ack.send(result);
                }
                PersistCommand::Shutdown => break,
            }
        }
        debug!(state = self.state.name(), "persist worker stopped");
    }

    fn report(&self) -> SyncReport {
        SyncReport {
            state: self.state,
            frames_persisted: self.store.as_ref().map(|s| s.frame_count()).unwrap_or(0),
            pending_blocks: self.backlog.len(),
        }
    }

    /// Writes queued blocks in order, stopping at the first failure
    fn drain_backlog(&mut self) {
        while let Some(block) = self.backlog.pop_front() {
            let start = self.metrics.start_write();
            match self.write_block(&block) {
                Ok(()) => {
                    self.metrics.record_block(block.frame_count(), start);
                    debug!(
                        frames = block.frame_count(),
                        total = self.report().frames_persisted,
                        "block persisted"
                    );
                }
                Err(e) => {
                    self.metrics.record_failure();
                    if let Some(AcquisitionError::StoreNotInitialized(reason)) =
                        e.downcast_ref::<AcquisitionError>()
                    {
                        error!(%reason, "store not initialized, recreating on next flush");
                        self.invalidate();
                    } else {
                        let reason = format!("{:#}", e);
                        error!(
                            error = %reason,
                            pending = self.backlog.len() + 1,
                            "flush failed, block kept for retry"
                        );
                    }
                    self.backlog.push_front(block);
                    break;
                }
            }
        }
    }

    fn write_block(&mut self, block: &Block) -> Result<()> {
        if self.state.needs_store() {
            self.create_store(block.shape)?;
        }
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| not_initialized("no store for the current run"))?;
        if self.axis_dirty {
            store.set_axis(&self.axis)?;
            self.axis_dirty = false;
        }
        store.append(block)?;
        if self.state == PersistState::Created {
            self.transition_to(PersistState::Appending)?;
        }
        Ok(())
    }

    fn create_store(&mut self, shape: FrameShape) -> Result<()> {
        self.store = None;
        let path = self.settings.temp_path.clone();
        if let Err(e) = remove_stale(&path) {
            warn!(error = %e, "creating store over stale file");
        }

        let layout = StoreLayout {
            shape,
            parameter_keys: self.settings.parameter_keys.clone(),
            axis: self.axis.clone(),
        };
        let store = self
            .settings
            .backend
            .create(&path, &layout, self.settings.transpose_batch)?;
        info!(path = ?path, shape = %shape, backend = ?self.settings.backend, "working store created");

        self.store = Some(store);
        self.axis_dirty = false;
        self.transition_to(PersistState::Created)
    }

    fn transition_to(&mut self, target: PersistState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            bail!(
                "Invalid persist transition: {} -> {}",
                self.state.name(),
                target.name()
            );
        }
        self.state = target;
        Ok(())
    }

    fn invalidate(&mut self) {
        self.store = None;
        self.state = PersistState::Uninitialized;
    }

    fn reset(&mut self) {
        if !self.backlog.is_empty() {
            warn!(
                blocks = self.backlog.len(),
                "discarding unpersisted blocks from the previous run"
            );
            self.backlog.clear();
        }
        self.invalidate();
        if let Err(e) = remove_stale(&self.settings.temp_path) {
            warn!(error = %e, "ignoring stale working store");
        }
    }

    fn finalize(&mut self, comments: &str, destination: &Path) -> Result<usize, AcquisitionError> {
        self.drain_backlog();
        if !self.backlog.is_empty() {
            return Err(AcquisitionError::PersistFailure(format!(
                "{} blocks could not be written to the working store",
                self.backlog.len()
            )));
        }

        let store = match (self.state, self.store.as_mut()) {
            (PersistState::Appending, Some(store)) => store,
            _ => {
                return Err(AcquisitionError::StoreNotInitialized(
                    "no frames have been persisted in this run".to_string(),
                ))
            }
        };
        if self.axis_dirty {
            store
                .set_axis(&self.axis)
                .map_err(|e| AcquisitionError::persist(&e))?;
            self.axis_dirty = false;
        }
        store
            .set_comments(comments)
            .map_err(|e| AcquisitionError::persist(&e))?;
        store
            .export(destination)
            .map_err(|e| AcquisitionError::persist(&e))?;

        info!(
            destination = ?destination,
            frames = store.frame_count(),
            "run exported"
        );
        Ok(store.frame_count())
    }
}
