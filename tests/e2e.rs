//! Runs whole reconstructions through real `lamino worker` processes on a fake GPU list.

use std::{fs, path::Path, process::Command};

use orchestrator::{ReconError, WorkerCommand, configs::ReconstructionConfig};
use serde_json::json;
use tempfile::TempDir;

const LAMINO: &str = env!("CARGO_BIN_EXE_lamino");
const GIB: u64 = 1 << 30;

fn gpus(n: usize) -> String {
    let gpus: Vec<_> = (0..n)
        .map(|i| {
            json!({
                "name": format!("fake{i}"),
                "global_mem_size": 8 * GIB,
                "max_mem_alloc_size": 2 * GIB,
            })
        })
        .collect();

    serde_json::Value::from(gpus).to_string()
}

fn projections(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        image::GrayImage::new(64, 32)
            .save(dir.join(format!("proj-{i:04}.tif")))
            .unwrap();
    }
}

fn config(dir: &TempDir) -> serde_json::Value {
    let input = dir.path().join("projections");
    projections(&input, 8);

    json!({
        "input": input,
        "output": dir.path().join("slice"),
        "lamino_angle": 30.0,
        "region": [-10, 10, 1],
        "slices_per_device": 4,
        "dry_run": true,
    })
}

fn worker(num_gpus: usize) -> WorkerCommand {
    WorkerCommand::new(LAMINO)
        .arg("worker")
        .env("LAMINO_GPUS", gpus(num_gpus))
        .env("LAMINO_ENGINE", "")
}

#[test]
fn dry_run_goes_through_every_pass() {
    let dir = tempfile::tempdir().unwrap();
    let config: ReconstructionConfig = serde_json::from_value(config(&dir)).unwrap();

    let report = orchestrator::reconstruct(&config, worker(2)).unwrap();

    let sizes: Vec<_> = report.plan.passes.iter().map(|p| p.chunks.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(report.plan.num_gpus, 2);

    let passes: Vec<_> = report.passes.iter().map(|p| p.pass).collect();
    assert_eq!(passes, vec![0, 1, 2]);
    assert!(report.total_seconds() >= 0.0);
}

#[test]
fn estimate_covers_the_region_in_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config["slices_per_device"] = json!(0);

    let config: ReconstructionConfig = serde_json::from_value(config).unwrap();
    let report = orchestrator::reconstruct(&config, worker(2)).unwrap();

    assert_eq!(report.plan.slices_per_device, 20);
    assert_eq!(report.plan.passes.len(), 1);
    assert_eq!(report.passes.len(), 1);
}

#[test]
fn real_run_without_an_engine_runner_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    config["dry_run"] = json!(false);
    config["region"] = json!([-4, 4, 1]);

    let config: ReconstructionConfig = serde_json::from_value(config).unwrap();
    let err = orchestrator::reconstruct(&config, worker(1)).unwrap_err();

    assert!(matches!(err, ReconError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("LAMINO_ENGINE"), "{err}");

    let written = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().starts_with("slice"));
    assert!(!written);
}

#[test]
fn no_gpus_is_a_planning_error() {
    let dir = tempfile::tempdir().unwrap();
    let config: ReconstructionConfig = serde_json::from_value(config(&dir)).unwrap();

    let err = orchestrator::reconstruct(&config, worker(0)).unwrap_err();
    assert!(matches!(err, ReconError::Planning(_)), "{err}");
}

#[test]
fn run_mode_reads_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recon.json");
    fs::write(&path, config(&dir).to_string()).unwrap();

    let status = Command::new(LAMINO)
        .arg("run")
        .arg(&path)
        .env("LAMINO_GPUS", gpus(1))
        .status()
        .unwrap();

    assert!(status.success());
}

#[test]
fn run_mode_fails_on_bad_configs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recon.json");
    fs::write(&path, r#"{"input": "nowhere", "unknown": 1}"#).unwrap();

    let status = Command::new(LAMINO).arg("run").arg(&path).status().unwrap();
    assert!(!status.success());

    let status = Command::new(LAMINO).arg("dance").status().unwrap();
    assert!(!status.success());
}
