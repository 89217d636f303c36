//! CLI integration tests
//!
//! Runs the `remuse` binary against temporary directories. Analysis runs use
//! `--offline`, so no network access is needed.

#![cfg(feature = "cli")]

use image::{Rgba, RgbaImage};
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Black frame with a white square, saved as PNG
fn write_frame(path: &Path) {
    let frame = RgbaImage::from_fn(16, 16, |x, y| {
        if (4..12).contains(&x) && (4..12).contains(&y) {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    frame.save(path).expect("Failed to write test frame");
}

fn run(args: &[&OsStr]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_remuse"))
        .args(args)
        .env_remove("GEMINI_PROXY_URL")
        .output()
        .expect("Failed to execute CLI")
}

#[test]
fn test_remove_background_only_writes_transparent_stickers() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    write_frame(&input_dir.path().join("cup.png"));
    write_frame(&input_dir.path().join("box.png"));
    fs::write(input_dir.path().join("notes.txt"), "not an image").unwrap();

    let output = run(&[
        OsStr::new("--remove-background-only"),
        OsStr::new("--output"),
        output_dir.path().as_os_str(),
        input_dir.path().as_os_str(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for name in ["cup_sticker.png", "box_sticker.png"] {
        let sticker = image::open(output_dir.path().join(name))
            .unwrap_or_else(|e| panic!("missing {}: {}", name, e))
            .to_rgba8();
        assert_eq!(sticker.get_pixel(0, 0)[3], 0);
        assert_eq!(sticker.get_pixel(8, 8)[3], 255);
    }
    assert!(!output_dir.path().join("notes_sticker.png").exists());
}

#[test]
fn test_offline_analysis_writes_summary_in_name_order() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    for name in ["z_last.png", "a_first.png", "m_middle.png"] {
        write_frame(&input_dir.path().join(name));
    }

    let output = run(&[
        OsStr::new("--offline"),
        OsStr::new("--stickers"),
        OsStr::new("--output"),
        output_dir.path().as_os_str(),
        input_dir.path().as_os_str(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary = fs::read_to_string(output_dir.path().join("remuse-summary.json")).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&summary).unwrap();
    assert_eq!(summary["succeeded"], 3);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["cancelled"], false);

    let names: Vec<&str> = summary["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["input"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a_first.png", "m_middle.png", "z_last.png"]);

    for item in summary["items"].as_array().unwrap() {
        assert_eq!(item["status"]["state"], "success");
        assert_eq!(item["sticker"]["sticker"]["background_removed"], true);
        let path = item["sticker_path"].as_str().unwrap();
        assert!(Path::new(path).exists(), "sticker not written: {}", path);
    }
}

#[test]
fn test_offline_single_file_prints_summary_to_stdout() {
    let input_dir = TempDir::new().unwrap();
    let photo = input_dir.path().join("bottle.png");
    write_frame(&photo);

    let output = run(&[OsStr::new("--offline"), photo.as_os_str()]);
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["succeeded"], 1);
    assert_eq!(summary["items"][0]["status"]["state"], "success");
    assert!(summary["items"][0].get("sticker_path").is_none());
}

#[test]
fn test_invalid_arguments_fail() {
    let input_dir = TempDir::new().unwrap();

    let output = run(&[
        OsStr::new("--concurrency"),
        OsStr::new("0"),
        input_dir.path().as_os_str(),
    ]);
    assert!(!output.status.success());

    let output = run(&[
        OsStr::new("--remove-background-only"),
        OsStr::new("--stickers"),
        input_dir.path().as_os_str(),
    ]);
    assert!(!output.status.success());

    let missing = input_dir.path().join("missing.png");
    let output = run(&[OsStr::new("--offline"), missing.as_os_str()]);
    assert!(!output.status.success());
}

#[cfg(feature = "tracing-files")]
#[test]
fn test_log_file_receives_tracing_output() {
    let input_dir = TempDir::new().unwrap();
    let photo = input_dir.path().join("jar.png");
    write_frame(&photo);
    let log = input_dir.path().join("remuse.log");

    let output = run(&[
        OsStr::new("--offline"),
        OsStr::new("--log-file"),
        log.as_os_str(),
        photo.as_os_str(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let contents = fs::read_to_string(&log).unwrap();
    assert!(contents.contains("Re-Museum session started"), "log: {}", contents);
}

#[cfg(not(feature = "tracing-files"))]
#[test]
fn test_log_file_needs_tracing_files_feature() {
    let input_dir = TempDir::new().unwrap();
    let photo = input_dir.path().join("jar.png");
    write_frame(&photo);
    let log = input_dir.path().join("remuse.log");

    let output = run(&[
        OsStr::new("--offline"),
        OsStr::new("--log-file"),
        log.as_os_str(),
        photo.as_os_str(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("tracing-files"));
}
