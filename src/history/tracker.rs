use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::{ABSOLUTE_TIME_SERIES, TIME_SERIES};
use crate::error::AcquisitionError;

/// Wall-clock time as fractional Unix seconds
pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The two series selected for live display, latest values only
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryUpdate {
    pub x_name: String,
    pub y_name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Full copy of every series, in series order
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryDump {
    pub names: Vec<String>,
    pub series: Vec<Vec<f64>>,
}

impl HistoryDump {
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.series[i].as_slice())
    }

    /// Tracked parameter names, without the two time series
    pub fn parameter_keys(&self) -> &[String] {
        self.names.get(2..).unwrap_or(&[])
    }
}

struct HistoryState {
    series: Vec<VecDeque<f64>>,
    started: Instant,
    display: (usize, usize),
}

/// Bounded time series for every tracked instrument parameter.
///
/// Series 0 is elapsed time, series 1 is wall-clock time, the rest follow
/// the tracked-parameter order fixed at construction. Each series silently
/// drops its oldest value once `capacity` is exceeded.
pub struct ParameterHistory {
    names: Vec<String>,
    capacity: usize,
    display_window: usize,
    state: Mutex<HistoryState>,
    observer: Mutex<Option<mpsc::UnboundedSender<HistoryUpdate>>>,
}

impl ParameterHistory {
    pub fn new(
        tracked: Vec<String>,
        capacity: usize,
        display_window: usize,
    ) -> Result<Self, AcquisitionError> {
        let mut names = vec![TIME_SERIES.to_string(), ABSOLUTE_TIME_SERIES.to_string()];
        names.extend(tracked);

        {
            let mut seen = HashSet::new();
            if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
                return Err(AcquisitionError::InvalidConfig(format!(
                    "parameter {} is tracked twice",
                    dup
                )));
            }
        }
        if capacity == 0 {
            return Err(AcquisitionError::InvalidConfig(
                "history capacity must be at least 1".to_string(),
            ));
        }

        let series = names.iter().map(|_| VecDeque::new()).collect();
        Ok(Self {
            names,
            capacity,
            display_window,
            state: Mutex::new(HistoryState {
                series,
                started: Instant::now(),
                display: (0, 1),
            }),
            observer: Mutex::new(None),
        })
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn series_names(&self) -> &[String] {
        &self.names
    }

    pub fn tracked_names(&self) -> &[String] {
        &self.names[2..]
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers the display observer, replacing any previous one
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HistoryUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        rx
    }

    /// Appends one reading of every tracked parameter, in tracked order
    pub fn update(&self, values: &[f64]) -> Result<(), AcquisitionError> {
        let expected = self.names.len() - 2;
        if values.len() != expected {
            return Err(AcquisitionError::InvalidParameterVector {
                expected,
                actual: values.len(),
            });
        }

        let update = {
            let mut state = self.state();
            let elapsed = state.started.elapsed().as_secs_f64();
            let now = unix_seconds();
            let capacity = self.capacity;

            let readings = [elapsed, now].into_iter().chain(values.iter().copied());
            for (series, value) in state.series.iter_mut().zip(readings) {
                series.push_back(value);
                while series.len() > capacity {
                    series.pop_front();
                }
            }

            let (x, y) = state.display;
            HistoryUpdate {
                x_name: self.names[x].clone(),
                y_name: self.names[y].clone(),
                x: tail(&state.series[x], self.display_window),
                y: tail(&state.series[y], self.display_window),
            }
        };

        let mut observer = self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = observer.as_ref() {
            if tx.send(update).is_err() {
                debug!("history observer dropped");
                *observer = None;
            }
        }
        Ok(())
    }

    /// Chooses which two series are emitted on subsequent updates
    pub fn select_display_axes(&self, x_name: &str, y_name: &str) -> Result<(), AcquisitionError> {
        let x = self.index_of(x_name)?;
        let y = self.index_of(y_name)?;
        self.state().display = (x, y);
        Ok(())
    }

    pub fn display_axes(&self) -> (String, String) {
        let (x, y) = self.state().display;
        (self.names[x].clone(), self.names[y].clone())
    }

    /// Most recent value of every tracked parameter, `NaN` where none was read yet
    pub fn latest_tracked(&self) -> Vec<f64> {
        let state = self.state();
        state.series[2..]
            .iter()
            .map(|s| s.back().copied().unwrap_or(f64::NAN))
            .collect()
    }

    /// Latest `n` values of one series
    pub fn latest(&self, name: &str, n: usize) -> Result<Vec<f64>, AcquisitionError> {
        let index = self.index_of(name)?;
        Ok(tail(&self.state().series[index], n))
    }

    pub fn dump(&self) -> HistoryDump {
        let state = self.state();
        HistoryDump {
            names: self.names.clone(),
            series: state
                .series
                .iter()
                .map(|s| s.iter().copied().collect())
                .collect(),
        }
    }

    /// Empties every series and restarts the elapsed-time clock
    pub fn clear(&self) {
        let mut state = self.state();
        for series in state.series.iter_mut() {
            series.clear();
            series.shrink_to_fit();
        }
        state.started = Instant::now();
    }

    fn index_of(&self, name: &str) -> Result<usize, AcquisitionError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| AcquisitionError::UnknownParameter(name.to_string()))
    }
}

fn tail(series: &VecDeque<f64>, n: usize) -> Vec<f64> {
    let skip = series.len().saturating_sub(n);
    series.iter().skip(skip).copied().collect()
}
