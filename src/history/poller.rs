use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::ParameterHistory;

/// Read-only instrument parameters polled on a fixed interval
#[async_trait]
pub trait ParameterSource: Send {
    /// Current value of every tracked parameter, in tracked order
    async fn read(&mut self) -> Result<Vec<f64>>;
}

/// Background task feeding a [`ParameterHistory`] independently of acquisition
pub struct ParameterPoller {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<u64>>,
}

impl ParameterPoller {
    pub fn spawn(
        mut source: Box<dyn ParameterSource>,
        history: Arc<ParameterHistory>,
        period: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = 0u64;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match source.read().await {
                            Ok(values) => {
                                if let Err(e) = history.update(&values) {
                                    warn!(error = %e, "discarding parameter reading");
                                    continue;
                                }
                                ticks += 1;
                            }
                            Err(e) => warn!(error = %e, "parameter read failed"),
                        }
                    }
                }
            }

            debug!(ticks, "parameter poller stopped");
            ticks
        });

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stops polling and returns the number of readings recorded
    pub async fn stop(mut self) -> Result<u64> {
        let _ = self.shutdown_tx.send(());
        match self.handle.take() {
            Some(handle) => Ok(handle.await?),
            None => Ok(0),
        }
    }
}

impl Drop for ParameterPoller {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: f64,
    }

    #[async_trait]
    impl ParameterSource for Counter {
        async fn read(&mut self) -> Result<Vec<f64>> {
            self.value += 1.0;
            Ok(vec![self.value])
        }
    }

    struct Broken;

    #[async_trait]
    impl ParameterSource for Broken {
        async fn read(&mut self) -> Result<Vec<f64>> {
            anyhow::bail!("instrument offline")
        }
    }

    #[tokio::test]
    async fn test_poller_feeds_history() {
        let history = Arc::new(ParameterHistory::new(vec!["count".into()], 100, 10).unwrap());
        let poller = ParameterPoller::spawn(
            Box::new(Counter { value: 0.0 }),
            history.clone(),
            Duration::from_millis(5),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        let ticks = poller.stop().await.unwrap();

        let dump = history.dump();
        let counts = dump.get("count").unwrap();
        assert_eq!(counts.len() as u64, ticks);
        assert!(ticks > 0);
        assert_eq!(counts[0], 1.0);
    }

    #[tokio::test]
    async fn test_poller_survives_read_errors() {
        let history = Arc::new(ParameterHistory::new(vec!["x".into()], 100, 10).unwrap());
        let poller = ParameterPoller::spawn(Box::new(Broken), history.clone(), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(poller.stop().await.unwrap(), 0);
        assert!(history.dump().get("x").unwrap().is_empty());
    }
}
