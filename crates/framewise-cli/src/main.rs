use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use framewise_core::detector::ContrastSaliency;
use framewise_core::types::{Keypoint, Landmark};
use framewise_core::{
    extract, BoundingBox, CompositionScore, CompositionScorer, DetectionBackend, DetectionResult,
    DetectorSet, FeatureVector, OrientationSample, PoseObservation, ScriptedBackend,
};
use framewise_hw::{
    FixedOrientation, OrientationSensor, SyntheticConfig, SyntheticOrientation, SyntheticSensor,
};
use framewise_pipeline::{Pipeline, PipelineComponents, PipelineConfig};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "framewise", about = "FrameWise composition scoring CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a feature vector directly
    Score {
        #[arg(long, default_value_t = 0.0)]
        offset_x: f64,
        #[arg(long, default_value_t = 0.0)]
        offset_y: f64,
        #[arg(long, default_value_t = 0.2)]
        subject_weight: f64,
        #[arg(long, default_value_t = 1.0)]
        horizon_level: f64,
        #[arg(long, default_value_t = 0.5)]
        lead_room: f64,
    },
    /// Extract features from a described scene and score them
    Analyze {
        /// Face center in image space, e.g. "0.33,0.33"
        #[arg(long, value_parser = parse_point)]
        face: Option<(f64, f64)>,
        /// Torso landmark in image space
        #[arg(long, value_parser = parse_point)]
        torso: Option<(f64, f64)>,
        /// Mark the scene as salient
        #[arg(long)]
        salient: bool,
        /// Device roll in degrees
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        roll_deg: f64,
    },
    /// Run the pipeline on synthetic input and print scores as JSON lines
    Simulate {
        /// How long to run
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        /// Requested capture rate
        #[arg(long, default_value_t = 60)]
        fps: u32,
        /// Highest rate the synthetic sensor grants
        #[arg(long, default_value_t = 60)]
        sensor_max_fps: u32,
        /// Detection runs on every Nth frame
        #[arg(long, default_value_t = 2)]
        stride: u32,
        /// Script a face at this image-space center instead of saliency detection
        #[arg(long, value_parser = parse_point)]
        face: Option<(f64, f64)>,
        /// Hold the roll fixed (degrees) instead of a synthetic sweep
        #[arg(long, allow_hyphen_values = true)]
        roll_deg: Option<f64>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            offset_x,
            offset_y,
            subject_weight,
            horizon_level,
            lead_room,
        } => {
            let features = FeatureVector {
                thirds_offset_x: offset_x,
                thirds_offset_y: offset_y,
                subject_weight,
                horizon_level,
                lead_room,
            };
            print_scored(&features)?;
        }
        Commands::Analyze {
            face,
            torso,
            salient,
            roll_deg,
        } => {
            let detection = scene(face, torso, salient);
            let features = extract(&detection, OrientationSample::new(roll_deg.to_radians()));
            print_scored(&features)?;
        }
        Commands::Simulate {
            seconds,
            fps,
            sensor_max_fps,
            stride,
            face,
            roll_deg,
        } => simulate(seconds, fps, sensor_max_fps, stride, face, roll_deg).await?,
        Commands::Devices => list_devices(),
    }

    Ok(())
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got {s:?}"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x: {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y: {e}"))?;
    Ok((x, y))
}

fn scene(face: Option<(f64, f64)>, torso: Option<(f64, f64)>, salient: bool) -> DetectionResult {
    DetectionResult {
        frame_sequence: 0,
        faces: face
            .map(|(x, y)| vec![BoundingBox::centered(x, y, 0.2, 0.2)])
            .unwrap_or_default(),
        poses: torso
            .map(|(x, y)| {
                vec![PoseObservation {
                    keypoints: vec![Keypoint::new(Landmark::Torso, x, y, 1.0)],
                }]
            })
            .unwrap_or_default(),
        salient,
    }
}

fn print_scored(features: &FeatureVector) -> Result<()> {
    let score = CompositionScorer::heuristic().score(features);
    let out = json!({ "features": features.clamped(), "score": score });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn simulate(
    seconds: u64,
    fps: u32,
    sensor_max_fps: u32,
    stride: u32,
    face: Option<(f64, f64)>,
    roll_deg: Option<f64>,
) -> Result<()> {
    let config = PipelineConfig {
        target_fps: fps,
        detection_stride: stride,
        ..PipelineConfig::default()
    };

    let backend: Box<dyn DetectionBackend> = match face {
        Some(point) => Box::new(ScriptedBackend::constant(scene(Some(point), None, false))),
        None => Box::new(DetectorSet::new().with_saliency(ContrastSaliency::default())),
    };
    let orientation: Box<dyn OrientationSensor> = match roll_deg {
        Some(deg) => Box::new(FixedOrientation::new(deg.to_radians())),
        None => Box::new(SyntheticOrientation::default()),
    };

    let mut pipeline = Pipeline::new(
        config,
        PipelineComponents {
            sensor: Box::new(SyntheticSensor::new(SyntheticConfig {
                max_fps: sensor_max_fps,
                ..SyntheticConfig::default()
            })),
            backend,
            scorer: CompositionScorer::heuristic(),
            orientation: Some(orientation),
        },
    );

    let stdout_closed = Arc::new(Notify::new());
    {
        let closed = Arc::clone(&stdout_closed);
        let failed = AtomicBool::new(false);
        pipeline.subscribe(move |score| {
            if failed.load(Ordering::Relaxed) {
                return;
            }
            if let Err(e) = write_score(&mut std::io::stdout().lock(), &score) {
                failed.store(true, Ordering::Relaxed);
                tracing::warn!(error = %e, "stdout closed; ending simulation");
                closed.notify_one();
            }
        });
    }
    pipeline.start().context("failed to start pipeline")?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = stdout_closed.notified() => {}
        signal = tokio::signal::ctrl_c() => signal?,
    }

    let pipeline = tokio::task::spawn_blocking(move || {
        pipeline.stop();
        pipeline
    })
    .await?;

    tracing::info!(seconds, "simulation finished");
    let rate = pipeline.frame_rate();
    let summary = json!({
        "requested_fps": rate.map(|r| r.requested),
        "actual_fps": rate.map(|r| r.actual),
        "stats": pipeline.stats(),
    });
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Write one score as a JSON line and flush it.
fn write_score(out: &mut impl Write, score: &CompositionScore) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, score)?;
    writeln!(out)?;
    out.flush()
}

#[cfg(feature = "v4l2")]
fn list_devices() {
    let devices = framewise_hw::V4lSensor::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

#[cfg(not(feature = "v4l2"))]
fn list_devices() {
    println!("Built without the v4l2 feature; only the synthetic sensor is available");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("0.33, 0.5"), Ok((0.33, 0.5)));
        assert!(parse_point("0.33").is_err());
        assert!(parse_point("a,b").is_err());
    }

    #[test]
    fn test_scene_builds_detection() {
        let detection = scene(Some((0.33, 0.33)), Some((0.5, 0.5)), true);
        assert_eq!(detection.faces.len(), 1);
        assert_eq!(detection.poses[0].torso(), Some((0.5, 0.5)));
        assert!(detection.salient);
        assert!(scene(None, None, false).is_empty());
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_score_emits_json_line() {
        let score = CompositionScorer::heuristic().score(&FeatureVector::uniform(0.5));
        let mut out = Vec::new();
        write_score(&mut out, &score).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed["total"], score.total);
    }

    #[test]
    fn test_write_score_reports_broken_pipe() {
        let score = CompositionScorer::heuristic().score(&FeatureVector::uniform(0.5));
        let err = write_score(&mut ClosedPipe, &score).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "framewise", "simulate", "--seconds", "2", "--face", "0.3,0.3", "--roll-deg", "-10",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                seconds,
                face,
                roll_deg,
                ..
            } => {
                assert_eq!(seconds, 2);
                assert_eq!(face, Some((0.3, 0.3)));
                assert_eq!(roll_deg, Some(-10.0));
            }
            _ => panic!("expected simulate"),
        }
    }
}
