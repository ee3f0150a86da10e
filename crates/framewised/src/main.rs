use anyhow::{Context, Result};
use framewise_core::detector::ContrastSaliency;
use framewise_core::{CompositionScore, CompositionScorer, DetectorSet};
use framewise_hw::{
    FrameSensor, IioAccelerometer, OrientationSensor, SyntheticConfig, SyntheticOrientation,
    SyntheticSensor,
};
use framewise_pipeline::{Pipeline, PipelineComponents};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, OrientationSource};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        target_fps = config.target_fps,
        detection_stride = config.detection_stride,
        orientation = %config.orientation_source,
        "framewised starting"
    );

    let mut pipeline = Pipeline::new(config.pipeline(), components(&config)?);
    pipeline.subscribe(log_score);
    pipeline.start().context("failed to start pipeline")?;

    tracing::info!("framewised ready");

    let mut ticker = tokio::time::interval(Duration::from_secs(config.stats_interval_secs));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = pipeline.stats();
                tracing::info!(
                    frames_captured = stats.frames_captured,
                    frames_dropped = stats.frames_dropped,
                    detection_failures = stats.detection_failures,
                    scores_emitted = stats.scores_emitted,
                    scores_superseded = stats.scores_superseded,
                    roll = pipeline.orientation().latest().roll,
                    "pipeline statistics"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    tracing::info!("framewised shutting down");
    // Joining stage threads blocks.
    tokio::task::spawn_blocking(move || pipeline.stop()).await?;

    Ok(())
}

fn log_score(score: CompositionScore) {
    tracing::info!(
        total = score.total,
        tier = %score.tier,
        rule_of_thirds = score.rule_of_thirds,
        subject_weight = score.subject_weight,
        horizon_level = score.horizon_level,
        lead_room = score.lead_room,
        confidence = score.confidence,
        source = ?score.source,
        "composition score"
    );
}

fn components(config: &Config) -> Result<PipelineComponents> {
    Ok(PipelineComponents {
        sensor: frame_sensor(config)?,
        backend: Box::new(detectors(config)),
        scorer: scorer(config),
        orientation: orientation_sensor(config.orientation_source),
    })
}

/// Saliency always runs; face detection joins it when a model is configured.
fn detectors(config: &Config) -> DetectorSet {
    let set = DetectorSet::new().with_saliency(ContrastSaliency::default());
    let Some(path) = &config.face_model_path else {
        return set;
    };

    #[cfg(feature = "onnx")]
    {
        match framewise_core::face::ScrfdFaceDetector::load(&path.to_string_lossy()) {
            Ok(face) => set.with_face(face),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "face detector unavailable; continuing with saliency only"
                );
                set
            }
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        tracing::warn!(
            path = %path.display(),
            "face model configured but built without the onnx feature; saliency only"
        );
        set
    }
}

fn frame_sensor(config: &Config) -> Result<Box<dyn FrameSensor>> {
    if config.uses_synthetic_camera() {
        return Ok(Box::new(SyntheticSensor::new(SyntheticConfig::default())));
    }

    #[cfg(feature = "v4l2")]
    {
        Ok(Box::new(framewise_hw::V4lSensor::new(&config.camera_device)))
    }
    #[cfg(not(feature = "v4l2"))]
    {
        anyhow::bail!(
            "camera device {} requires a build with the v4l2 feature",
            config.camera_device
        )
    }
}

fn orientation_sensor(source: OrientationSource) -> Option<Box<dyn OrientationSensor>> {
    match source {
        OrientationSource::None => None,
        OrientationSource::Synthetic => Some(Box::new(SyntheticOrientation::default())),
        OrientationSource::Auto => IioAccelerometer::discover()
            .map(|sensor| Box::new(sensor) as Box<dyn OrientationSensor>),
    }
}

fn scorer(config: &Config) -> CompositionScorer {
    let Some(path) = &config.model_path else {
        return CompositionScorer::heuristic();
    };

    #[cfg(feature = "onnx")]
    {
        match framewise_core::learned::OnnxScorer::load(
            &path.to_string_lossy(),
            config.model_acceptance,
        ) {
            Ok(learned) => CompositionScorer::with_learned(Box::new(learned)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "learned scorer unavailable; using heuristic"
                );
                CompositionScorer::heuristic()
            }
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        tracing::warn!(
            path = %path.display(),
            acceptance = config.model_acceptance,
            "model configured but built without the onnx feature; using heuristic"
        );
        CompositionScorer::heuristic()
    }
}
