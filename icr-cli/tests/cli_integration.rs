//! CLI integration tests for icr-cli.
//!
//! These tests run the actual binary and check outputs, exit codes and the
//! files it writes.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use icr_core::{CatalogCard, OcrResponse, TextAnnotation};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the icr binary.
fn icr() -> Command {
    let mut cmd = Command::cargo_bin("icr").unwrap();
    cmd.env_remove("GOOGLE_VISION_API_KEY").env_remove("RUST_LOG");
    cmd
}

/// Write a synthetic 120x200 slab photo; `shade` makes each one distinct.
fn write_slab(dir: &Path, name: &str, shade: u8) -> PathBuf {
    let img = RgbImage::from_fn(120, 200, |x, y| {
        Rgb([shade, (x % 7) as u8 * 30, (y % 5) as u8 * 40])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();

    let path = dir.join(name);
    fs::write(&path, out.into_inner()).unwrap();
    path
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_lists_commands() {
    icr()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Graded card label recognition"))
        .stdout(predicate::str::contains("hash"))
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("stitch"))
        .stdout(predicate::str::contains("parse"))
        .stdout(predicate::str::contains("scan"));
}

#[test]
fn test_help_shows_exit_codes() {
    icr()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("66"))
        .stdout(predicate::str::contains("69"));
}

#[test]
fn test_version_displays_version() {
    icr()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("icr"));
}

#[test]
fn test_scan_help_shows_options() {
    icr()
        .args(["scan", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--catalog"))
        .stdout(predicate::str::contains("--mock-ocr"))
        .stdout(predicate::str::contains("--batch-id"));
}

// ============================================================================
// Hash Tests
// ============================================================================

#[test]
fn test_hash_prints_sha256() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("abc.bin");
    fs::write(&file, b"abc").unwrap();

    icr()
        .args(["hash", path_str(&file)])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  ",
        ));
}

#[test]
fn test_hash_json_lists_every_file() {
    let temp = TempDir::new().unwrap();
    let a = write_slab(temp.path(), "a.png", 10);
    let b = write_slab(temp.path(), "b.png", 20);

    let output = icr()
        .args(["hash", "--format", "json", path_str(&a), path_str(&b)])
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_ne!(items[0]["hash"], items[1]["hash"]);
    assert_eq!(items[0]["hash"].as_str().unwrap().len(), 64);
}

#[test]
fn test_hash_empty_file_is_data_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("empty.jpg");
    fs::write(&file, b"").unwrap();

    // Exit code 65 = EX_DATAERR
    icr()
        .args(["hash", path_str(&file)])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn test_missing_file_returns_input_error() {
    // Exit code 66 = EX_NOINPUT
    icr()
        .args(["hash", "nonexistent_slab.jpg"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to read file"));
}

// ============================================================================
// Extract and Stitch Tests
// ============================================================================

#[test]
fn test_extract_writes_label_next_to_input() {
    let temp = TempDir::new().unwrap();
    let slab = write_slab(temp.path(), "slab.png", 30);

    icr()
        .args(["extract", path_str(&slab)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Label extracted"));

    let label = image::open(temp.path().join("slab.label.png")).unwrap();
    assert_eq!((label.width(), label.height()), (120, 44));
}

#[test]
fn test_extract_with_custom_region() {
    let temp = TempDir::new().unwrap();
    let slab = write_slab(temp.path(), "slab.png", 40);
    let out = temp.path().join("crop.png");

    icr()
        .args([
            "--quiet",
            "extract",
            "--region",
            "0,0,0.5,0.5",
            "-o",
            path_str(&out),
            path_str(&slab),
        ])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let label = image::open(&out).unwrap();
    assert_eq!((label.width(), label.height()), (60, 100));
}

#[test]
fn test_extract_rejects_invalid_region() {
    let temp = TempDir::new().unwrap();
    let slab = write_slab(temp.path(), "slab.png", 50);

    icr()
        .args(["extract", "--region", "0,0,2", path_str(&slab)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("region"));
}

#[test]
fn test_extract_corrupt_image_is_data_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("corrupt.jpg");
    fs::write(&file, b"definitely not an image").unwrap();

    icr()
        .args(["extract", path_str(&file)])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("decode"));
}

#[test]
fn test_stitch_prints_position_table() {
    let temp = TempDir::new().unwrap();
    let a = write_slab(temp.path(), "first.png", 60);
    let b = write_slab(temp.path(), "second.png", 70);
    let out = temp.path().join("composite.png");

    icr()
        .args(["stitch", "-o", path_str(&out), path_str(&a), path_str(&b)])
        .assert()
        .success()
        .stdout(predicate::str::contains("INDEX"))
        .stdout(predicate::str::contains("first.png"))
        .stdout(predicate::str::contains("second.png"));

    let composite = image::open(&out).unwrap();
    assert_eq!(composite.width(), 120);
    assert!(composite.height() >= 88);
}

#[test]
fn test_stitch_json_positions_do_not_overlap() {
    let temp = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| write_slab(temp.path(), &format!("slab-{i}.png"), 80 + i * 10))
        .collect();
    let out = temp.path().join("composite.png");

    let mut args = vec!["stitch", "--format", "json", "-o", path_str(&out)];
    args.extend(files.iter().map(|f| path_str(f)));
    let output = icr().args(&args).assert().success();

    let report: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    let positions = report["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 3);
    for (i, pair) in positions.windows(2).enumerate() {
        assert_eq!(pair[0]["index"], i);
        let end = pair[0]["y_offset"].as_u64().unwrap() + pair[0]["height"].as_u64().unwrap();
        assert!(end <= pair[1]["y_offset"].as_u64().unwrap());
    }
    assert_eq!(report["label_set_hash"].as_str().unwrap().len(), 64);
}

// ============================================================================
// Parse Tests
// ============================================================================

#[test]
fn test_parse_reads_stdin() {
    let output = icr()
        .arg("parse")
        .write_stdin("2016 POKEMON XY EVOLUTIONS #11\nCHARIZARD-HOLO\nGEM MT 10\n87654321\n")
        .assert()
        .success();

    let fields: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(fields["year"], 2016);
    assert_eq!(fields["cert_number"], "87654321");
    assert_eq!(fields["grade_label"], "GEM MT");
}

#[test]
fn test_parse_text_format_from_file() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("label.txt");
    fs::write(&file, "1999 POKEMON GAME\nCHARIZARD\n12345678\n").unwrap();

    icr()
        .args(["--color=never", "parse", "--format", "text", path_str(&file)])
        .assert()
        .success()
        .stdout(predicate::str::contains("1999"))
        .stdout(predicate::str::contains("12345678"))
        .stdout(predicate::str::contains("\x1b[").not());
}

// ============================================================================
// Scan Tests
// ============================================================================

fn write_catalog(dir: &Path) -> PathBuf {
    let catalog = vec![CatalogCard {
        id: "base1-4".into(),
        name: "Charizard".into(),
        number: "4".into(),
        set_name: "Base Set".into(),
        year: Some(1999),
        modifiers: vec!["HOLO".into()],
    }];
    let path = dir.join("catalog.json");
    fs::write(&path, serde_json::to_string(&catalog).unwrap()).unwrap();
    path
}

#[test]
fn test_scan_without_ocr_provider_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let slab = write_slab(temp.path(), "slab.png", 110);
    let catalog = write_catalog(temp.path());

    // Exit code 69 = EX_UNAVAILABLE
    icr()
        .args(["scan", "--catalog", path_str(&catalog), path_str(&slab)])
        .assert()
        .code(69)
        .stderr(predicate::str::contains("No OCR provider"));
}

#[test]
fn test_scan_invalid_catalog_is_data_error() {
    let temp = TempDir::new().unwrap();
    let slab = write_slab(temp.path(), "slab.png", 120);
    let catalog = temp.path().join("catalog.json");
    fs::write(&catalog, "{ not json").unwrap();

    icr()
        .args(["scan", "--catalog", path_str(&catalog), path_str(&slab)])
        .assert()
        .code(65);
}

#[test]
fn test_scan_matches_with_recorded_ocr() {
    let temp = TempDir::new().unwrap();
    let a = write_slab(temp.path(), "charizard.png", 130);
    let b = write_slab(temp.path(), "blank.png", 140);
    let catalog = write_catalog(temp.path());

    // The stitch command lays labels out exactly like the pipeline does.
    let composite = temp.path().join("composite.png");
    let output = icr()
        .args([
            "stitch",
            "--format",
            "json",
            "-o",
            path_str(&composite),
            path_str(&a),
            path_str(&b),
        ])
        .assert()
        .success();
    let report: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    let band = &report["positions"][0];
    let x = band["x_offset"].as_f64().unwrap() as f32;
    let y = band["y_offset"].as_f64().unwrap() as f32;

    let lines = ["1999 POKEMON GAME", "CHARIZARD HOLO", "#4 GEM MT 10", "87654321"];
    let response = OcrResponse {
        raw_annotations: lines
            .iter()
            .enumerate()
            .map(|(i, text)| {
                TextAnnotation::rect(*text, 0.95, x + 2.0, y + 1.0 + i as f32 * 10.0, 60.0, 8.0)
            })
            .collect(),
        full_text: lines.join("\n"),
        processing_time_ms: 5,
    };
    let fixture = temp.path().join("ocr.json");
    fs::write(&fixture, serde_json::to_string(&response).unwrap()).unwrap();

    let output = icr()
        .args([
            "scan",
            "--format",
            "json",
            "--batch-id",
            "cli_test",
            "--catalog",
            path_str(&catalog),
            "--mock-ocr",
            path_str(&fixture),
            path_str(&a),
            path_str(&b),
        ])
        .assert()
        .success();

    let scans: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    let scans = scans.as_array().unwrap();
    assert_eq!(scans.len(), 2);

    assert_eq!(scans[0]["original_filename"], "charizard.png");
    assert_eq!(scans[0]["batch_id"], "cli_test");
    assert_eq!(scans[0]["processing_status"], "matched");
    assert_eq!(scans[0]["extracted"]["cert_number"], "87654321");
    assert_eq!(scans[0]["candidates"][0]["card_id"], "base1-4");

    assert_eq!(scans[1]["processing_status"], "matched");
    assert!(scans[1]["candidates"].as_array().unwrap().is_empty());
}

#[test]
fn test_scan_text_output_summarises_matches() {
    let temp = TempDir::new().unwrap();
    let slab = write_slab(temp.path(), "slab.png", 150);
    let catalog = write_catalog(temp.path());
    let fixture = temp.path().join("ocr.json");
    fs::write(&fixture, serde_json::to_string(&OcrResponse::default()).unwrap()).unwrap();

    icr()
        .args([
            "--color=never",
            "scan",
            "--catalog",
            path_str(&catalog),
            "--mock-ocr",
            path_str(&fixture),
            path_str(&slab),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("slab.png"))
        .stdout(predicate::str::contains("0 of 1 scans have a catalog match"));
}

// ============================================================================
// Flag Handling Tests
// ============================================================================

#[test]
fn test_invalid_format_rejected() {
    icr()
        .args(["parse", "--format", "xml"])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("invalid").or(predicate::str::contains("possible values")),
        );
}

#[test]
fn test_conflicting_verbose_quiet_rejected() {
    icr()
        .args(["--verbose", "--quiet", "hash", "x.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
