use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::events::{FrameAppended, MaximumUpdated, Observer};
use super::working_set::{frame_maximum, WorkingSet};
use crate::config::AcquisitionConfig;
use crate::core::{Frame, FrameShape};
use crate::correction::CorrectionPipeline;
use crate::error::AcquisitionError;
use crate::finalize::{Finalizer, SaveReport};
use crate::history::{unix_seconds, ParameterHistory};
use crate::observability::PersistMetrics;
use crate::persist::{PersistHandle, SyncReport, WorkerSettings};

/// Producer side of a run: corrects frames, buffers them with their
/// parameter snapshots and hands full blocks to the persist worker.
pub struct Acquisition {
    config: AcquisitionConfig,
    shape: FrameShape,
    history: Arc<ParameterHistory>,
    correction: CorrectionPipeline,
    working: WorkingSet,
    axis: Vec<f64>,
    run_start: Instant,
    frames_in_run: u64,
    last_maximum: Option<MaximumUpdated>,
    persist: PersistHandle,
    frame_observer: Observer<FrameAppended>,
    maximum_observer: Observer<MaximumUpdated>,
}

impl Acquisition {
    /// Starts a run for a detector of the given shape.
    ///
    /// Any working store left behind by an aborted run is discarded.
    pub fn new(
        config: AcquisitionConfig,
        shape: FrameShape,
        history: Arc<ParameterHistory>,
    ) -> Result<Self, AcquisitionError> {
        config.validate()?;
        if shape.size() == 0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "detector shape {} has no pixels",
                shape
            )));
        }

        let persist = PersistHandle::spawn(WorkerSettings {
            backend: config.backend,
            temp_path: config.temp_store_file(),
            parameter_keys: history.tracked_names().to_vec(),
            transpose_batch: config.transpose_batch,
        })?;

        let mut acquisition = Self {
            correction: CorrectionPipeline::new(
                config.correction.mode,
                config.correction.absorbance_floor,
            ),
            working: WorkingSet::new(shape, history.series_names().len()),
            shape,
            history,
            axis: Vec::new(),
            run_start: Instant::now(),
            frames_in_run: 0,
            last_maximum: None,
            persist,
            frame_observer: Observer::new(),
            maximum_observer: Observer::new(),
            config,
        };
        acquisition.clear()?;
        Ok(acquisition)
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn history(&self) -> &Arc<ParameterHistory> {
        &self.history
    }

    pub fn correction(&self) -> &CorrectionPipeline {
        &self.correction
    }

    pub fn correction_mut(&mut self) -> &mut CorrectionPipeline {
        &mut self.correction
    }

    /// Latest axis seen by `append`
    pub fn axis(&self) -> &[f64] {
        &self.axis
    }

    /// Frames waiting in memory for the next flush
    pub fn buffered_frames(&self) -> usize {
        self.working.len()
    }

    pub fn frames_in_run(&self) -> u64 {
        self.frames_in_run
    }

    pub fn last_maximum(&self) -> Option<MaximumUpdated> {
        self.last_maximum
    }

    pub fn metrics(&self) -> Arc<PersistMetrics> {
        self.persist.metrics()
    }

    pub fn temp_store_path(&self) -> PathBuf {
        self.config.temp_store_file()
    }

    /// Directory used by subsequent saves
    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config.output_dir = dir.into();
    }

    pub fn subscribe_frames(&mut self) -> mpsc::UnboundedReceiver<FrameAppended> {
        self.frame_observer.subscribe()
    }

    pub fn subscribe_maxima(&mut self) -> mpsc::UnboundedReceiver<MaximumUpdated> {
        self.maximum_observer.subscribe()
    }

    /// Starts a fresh run.
    ///
    /// Waits for the worker to apply every flush posted so far before it
    /// forgets the store, so no earlier block can land in the new run.
    pub fn clear(&mut self) -> Result<(), AcquisitionError> {
        self.working.clear();
        self.run_start = Instant::now();
        self.frames_in_run = 0;
        self.last_maximum = None;
        self.persist.reset(self.config.save_timeout())?;
        info!(shape = %self.shape, "acquisition cleared");
        Ok(())
    }

    /// Adds one frame to the run.
    ///
    /// Never waits on persistence; every `flush_threshold` frames a block
    /// is posted to the worker.
    pub fn append(&mut self, axis: &[f64], frame: Frame) -> Result<(), AcquisitionError> {
        if frame.shape() != self.shape {
            return Err(AcquisitionError::FrameShapeMismatch {
                expected: self.shape,
                actual: frame.shape(),
            });
        }
        if axis.len() != self.shape.len() {
            return Err(AcquisitionError::AxisLengthMismatch {
                expected: self.shape.len(),
                actual: axis.len(),
            });
        }
        if axis != self.axis.as_slice() {
            self.axis = axis.to_vec();
        }

        let frame = self.correction.apply(frame);
        let snapshot = self.snapshot();
        self.working.push(&frame, &snapshot)?;
        let index = self.frames_in_run;
        self.frames_in_run += 1;

        if let Some((value, position)) = frame_maximum(&frame, &self.axis) {
            let maximum = MaximumUpdated {
                time: snapshot[0],
                value,
                position,
            };
            self.last_maximum = Some(maximum);
            self.maximum_observer.emit(maximum);
        }
        if self.frame_observer.is_active() {
            self.frame_observer.emit(FrameAppended {
                index,
                axis: self.axis.clone(),
                frame,
            });
        }

        if self.working.len() >= self.config.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// `time`, `absolute_time`, then the latest value of each tracked parameter
    fn snapshot(&self) -> Vec<f64> {
        let mut snapshot = vec![self.run_start.elapsed().as_secs_f64(), unix_seconds()];
        snapshot.extend(self.history.latest_tracked());
        snapshot
    }

    /// Posts whatever is buffered to the worker, even below the threshold
    pub fn flush(&mut self) -> Result<(), AcquisitionError> {
        if self.working.is_empty() {
            return Ok(());
        }
        let block = self.working.take_block();
        let frames = block.frame_count();
        debug!(frames, run_total = self.frames_in_run, "posting flush");
        self.persist
            .post_flush(block, self.axis.clone())
            .map_err(|e| {
                error!(frames, error = %e, "flush could not be posted");
                e
            })
    }

    /// Blocks until every posted flush has been applied
    pub fn sync(&self) -> Result<SyncReport, AcquisitionError> {
        self.persist.sync(self.config.save_timeout())
    }

    /// Finalizes the run into `<output_dir>/<destination_name>_<HH_MM_SS>.<ext>`
    /// plus the parameter dumps. The working store stays usable afterwards.
    pub fn save(
        &mut self,
        destination_name: &str,
        comments: &str,
    ) -> Result<SaveReport, AcquisitionError> {
        self.flush()?;
        Finalizer {
            persist: &self.persist,
            history: &self.history,
            output_dir: self.config.output_dir.as_path(),
            extension: self.config.backend.extension(),
            timeout: self.config.save_timeout(),
        }
        .finalize(destination_name, comments)
    }
}
