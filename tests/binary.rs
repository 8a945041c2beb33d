//! Runs the `vol-autoencoder` binary and checks exit status and log output
use ndarray::Array2;
use ndarray_npy::NpzWriter;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Output};

const VOXELS: usize = 30 * 30 * 30;

fn write_dataset(path: &Path, num_samples: usize) {
    let grids = Array2::from_shape_fn((num_samples, VOXELS), |(i, j)| ((i + j) % 2) as f32);
    let mut npz = NpzWriter::new(File::create(path).unwrap());
    npz.add_array("labels", &grids).unwrap();
    npz.finish().unwrap();
}

fn run(data: &Path, model_dir: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vol-autoencoder"))
        .arg("--train_data_dir")
        .arg(data)
        .arg("--model_dir")
        .arg(model_dir)
        .args(["--hidden_size", "8", "--latent_size", "4", "--cpu", "--no_progress"])
        .args(extra)
        .env("RUST_LOG", "info")
        .output()
        .unwrap()
}

#[test]
fn one_epoch_run_succeeds_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("train_data.npz");
    let model_dir = dir.path().join("logs");
    write_dataset(&data, 3);

    let output = run(&data, &model_dir, &["--epochs", "1", "--batch_size", "2"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(model_dir.join("last.safetensors").is_file());
    let log = fs::read_to_string(model_dir.join("train.log")).unwrap();
    assert!(log.contains("Loading the datasets..."));
    assert!(log.contains("Number of training examples: 3"));
    assert!(log.contains("Epoch 1/1"));
    assert!(log.contains("Average Loss on this epoch"));
}

#[test]
fn missing_dataset_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("logs");

    let output = run(&dir.path().join("nope.npz"), &model_dir, &["--epochs", "1"]);
    assert!(!output.status.success());

    let log = fs::read_to_string(model_dir.join("train.log")).unwrap();
    assert!(log.contains("Failed to load dataset"));
}

#[test]
fn missing_restore_file_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("train_data.npz");
    let model_dir = dir.path().join("logs");
    write_dataset(&data, 2);

    let output = run(&data, &model_dir, &["--epochs", "1", "--restore_file", "best"]);
    assert!(!output.status.success());
    assert!(!model_dir.join("last.safetensors").exists());

    let log = fs::read_to_string(model_dir.join("train.log")).unwrap();
    assert!(log.contains("Restoring parameters from"));
    assert!(log.contains("Failed to restore checkpoint"));
}

#[test]
fn zero_batch_size_exits_before_any_io() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("train_data.npz");
    let model_dir = dir.path().join("logs");
    write_dataset(&data, 2);

    let output = run(&data, &model_dir, &["--batch_size", "0"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("batch_size"));
    assert!(!model_dir.exists());
}
