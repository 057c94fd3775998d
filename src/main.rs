use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use spectrostore::core::{Frame, FrameShape};
use spectrostore::history::{ParameterHistory, ParameterPoller, ParameterSource};
use spectrostore::logging::init_logging;
use spectrostore::{Acquisition, AcquisitionConfig};

/// Runs a simulated spectrometer acquisition and saves it
#[derive(Parser, Debug)]
#[command(name = "spectrostore")]
struct Args {
    /// JSON acquisition config; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reference frame (CSV) for the configured correction mode
    #[arg(long)]
    reference: Option<PathBuf>,

    #[arg(long, default_value_t = 200)]
    frames: usize,

    #[arg(long, default_value_t = 512)]
    pixels: usize,

    /// Base name of the saved files
    #[arg(long, default_value = "demo")]
    name: String,

    #[arg(long, default_value = "")]
    comments: String,
}

/// Stage temperature and position drifting slowly
struct SimulatedStage {
    tick: f64,
}

#[async_trait]
impl ParameterSource for SimulatedStage {
    async fn read(&mut self) -> Result<Vec<f64>> {
        self.tick += 1.0;
        let temperature = 21.0 + 0.5 * (self.tick / 50.0).sin();
        let position = self.tick * 0.01;
        Ok(vec![temperature, position])
    }
}

fn simulated_spectrum(axis: &[f64], index: usize) -> Frame {
    let center = 450.0 + 20.0 * (index as f64 / 40.0).sin();
    let data = axis
        .iter()
        .map(|x| 100.0 + 1000.0 * (-((x - center) / 8.0).powi(2)).exp())
        .collect();
    Frame::spectrum(data)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AcquisitionConfig::load(path)?,
        None => AcquisitionConfig::default(),
    };

    let history = Arc::new(ParameterHistory::new(
        vec!["temperature".to_string(), "stage_position".to_string()],
        config.history_capacity,
        config.display_window,
    )?);
    let poller = ParameterPoller::spawn(
        Box::new(SimulatedStage { tick: 0.0 }),
        history.clone(),
        Duration::from_millis(20),
    );

    // waits on the worker's reset acknowledgment
    let mut acquisition = tokio::task::block_in_place(|| {
        Acquisition::new(
            config,
            FrameShape::Spectrum { len: args.pixels },
            history.clone(),
        )
    })?;
    if let Some(reference) = &args.reference {
        acquisition.correction_mut().load_reference(reference)?;
    }
    let mut maxima = acquisition.subscribe_maxima();

    let axis: Vec<f64> = (0..args.pixels).map(|i| 400.0 + i as f64 * 0.2).collect();
    let mut ticker = tokio::time::interval(Duration::from_millis(5));
    for index in 0..args.frames {
        ticker.tick().await;
        acquisition.append(&axis, simulated_spectrum(&axis, index))?;
    }

    let mut peak = None;
    while let Ok(maximum) = maxima.try_recv() {
        peak = Some(maximum);
    }
    if let Some(peak) = peak {
        info!(value = peak.value, position = peak.position, "last peak");
    }

    let report = tokio::task::block_in_place(|| acquisition.save(&args.name, &args.comments))?;
    poller.stop().await?;

    println!("Saved {} frames to {}", report.frames, report.store_path.display());
    println!("Parameters: {}", report.parameters_csv.display());
    println!("{}", acquisition.metrics().generate_report());

    Ok(())
}
