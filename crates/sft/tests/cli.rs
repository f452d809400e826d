use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn prints_a_json_report() {
    let output = Command::cargo_bin("sft")
        .unwrap()
        .args(["--seed", "3", "--control-samples", "40"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["control_points"], 40);
    assert_eq!(report["surface"]["positions"].as_array().unwrap().len(), 400);
    assert!(report["rms_error"].as_f64().unwrap() < 2.0);
}

#[test]
fn reads_config_and_writes_output_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("demo.json");
    let output = dir.path().join("report.json");
    fs::write(
        &config,
        r#"{ "surface_samples": [4, 3], "isometric": { "step": 0.25 }, "scene": { "control_samples": 30 } }"#,
    )
    .unwrap();

    Command::cargo_bin("sft")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(report["surface"]["nx"], 4);
    assert_eq!(report["surface"]["normals"].as_array().unwrap().len(), 12);
    assert_eq!(report["control_points"], 30);
}

#[test]
fn missing_config_fails() {
    Command::cargo_bin("sft")
        .unwrap()
        .args(["--config", "/nonexistent/demo.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn too_few_control_points_fail() {
    Command::cargo_bin("sft")
        .unwrap()
        .args(["--control-samples", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("need at least 3"));
}

#[test]
fn writes_a_depth_map() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("demo.json");
    let depth = dir.path().join("depth.png");
    fs::write(&config, r#"{ "surface_samples": [8, 6] }"#).unwrap();

    Command::cargo_bin("sft")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("--depth-map")
        .arg(&depth)
        .assert()
        .success();

    let img = sft::io::load_gray(&depth).unwrap();
    assert_eq!(img.dimensions(), (8, 6));
    // The quadratic surface is nearest along its middle column.
    let middle = img.get_pixel(4, 3).0[0];
    let edge = img.get_pixel(0, 3).0[0];
    assert!(middle > edge, "middle {middle}, edge {edge}");
}
