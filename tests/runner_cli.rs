use std::io::{BufRead, BufReader};
use std::process::Stdio;

use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command;
use tempfile::tempdir;

fn runner() -> Command {
    Command::cargo_bin("ixa-contagion").unwrap()
}

#[test]
fn prints_the_run_summary() {
    let output = runner()
        .args(["--config", "tests/data/quick_run.json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Loading parameters from: tests/data/quick_run.json"));
    assert!(stdout.contains("ticks executed:"));
    assert!(stdout.contains("unaffected:"));
}

#[test]
fn same_seed_same_summary() {
    let run = |seed: &str| {
        let output = runner()
            .args(["--config", "tests/data/quick_run.json", "--random-seed", seed])
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    };
    assert_eq!(run("5"), run("5"));
}

#[test]
fn writes_reports_to_the_output_dir() {
    let temp_dir = tempdir().unwrap();
    runner()
        .args(["--config", "tests/data/quick_run.json", "--save-data", "--output-dir"])
        .arg(temp_dir.path())
        .assert()
        .success();
    assert!(temp_dir.path().join("statistics.csv").exists());
    assert!(temp_dir.path().join("population.csv").exists());

    // The files exist now and the config does not allow overwriting.
    runner()
        .args(["--config", "tests/data/quick_run.json", "--save-data", "--output-dir"])
        .arg(temp_dir.path())
        .assert()
        .failure();
}

#[test]
fn logs_tick_lines_when_verbose() {
    let output = runner()
        .args(["--config", "tests/data/quick_run.json", "-v"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("0: healthy: "));
    assert!(stderr.contains("of total: 80"));
}

#[test]
fn rejects_invalid_configuration() {
    let output = runner()
        .args(["--config", "tests/data/degenerate_recovery.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("invalid configuration"));
}

#[test]
fn rejects_unknown_arguments() {
    runner().arg("--no-such-flag").assert().failure();
}

#[cfg(unix)]
#[test]
fn interrupt_ends_the_run_with_summary_and_reports() {
    let temp_dir = tempdir().unwrap();
    let mut child = std::process::Command::cargo_bin("ixa-contagion")
        .unwrap()
        .args(["--config", "tests/data/long_run.json", "--save-data", "-v", "--output-dir"])
        .arg(temp_dir.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // The first tick line is logged once the run is set up and listening for interrupts.
    let mut interrupted = false;
    for line in BufReader::new(child.stderr.take().unwrap()).lines() {
        if !interrupted && line.unwrap().contains("0: healthy: ") {
            let status = std::process::Command::new("kill")
                .args(["-INT", &child.id().to_string()])
                .status()
                .unwrap();
            assert!(status.success());
            interrupted = true;
        }
    }
    assert!(interrupted);

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("ticks executed:"));
    assert!(temp_dir.path().join("population.csv").exists());
    assert!(temp_dir.path().join("statistics.csv").exists());
}
