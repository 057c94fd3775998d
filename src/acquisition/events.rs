use tokio::sync::mpsc;

use crate::core::Frame;

/// A corrected frame entered the working set
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAppended {
    /// Position of the frame within the run
    pub index: u64,
    pub axis: Vec<f64>,
    pub frame: Frame,
}

/// Largest value of the latest frame and where on the axis it sits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaximumUpdated {
    /// Seconds since the run started
    pub time: f64,
    pub value: f64,
    pub position: f64,
}

/// Single-subscriber slot for one event type
pub(crate) struct Observer<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
}

impl<T> Observer<T> {
    pub fn new() -> Self {
        Self { tx: None }
    }

    /// Replaces any previous subscriber
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&mut self, event: T) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                self.tx = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_subscriber_is_released() {
        let mut observer = Observer::new();
        let rx = observer.subscribe();
        assert!(observer.is_active());

        drop(rx);
        observer.emit(1u32);
        assert!(!observer.is_active());
    }

    #[test]
    fn test_resubscribe_replaces_previous() {
        let mut observer = Observer::new();
        let mut first = observer.subscribe();
        let mut second = observer.subscribe();

        observer.emit(7u32);
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap(), 7);
    }
}
