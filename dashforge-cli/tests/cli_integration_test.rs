//! Integration tests for the dashforge binary
//!
//! Each test runs the real binary against a blueprint in a temporary
//! directory and asserts on output and exit codes.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn dashforge_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dashforge"))
}

fn run_in(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(dashforge_binary())
        .args(args)
        .current_dir(dir)
        .output()?;
    Ok(output)
}

fn write_blueprint(dir: &Path) -> PathBuf {
    let path = dir.join("dashboard.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "version": "2.0.0",
            "title": "Store Traffic",
            "description": "Foot traffic per store",
            "author": "analytics",
            "datasource": "supabase",
            "charts": [
                {"id": "visits", "type": "line", "query": "SELECT day, visits FROM traffic"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    path
}

#[test]
fn validate_accepts_a_valid_blueprint() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_blueprint(temp_dir.path());

    let output = run_in(temp_dir.path(), &["validate", "dashboard.json"])?;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));

    Ok(())
}

#[test]
fn validate_reports_every_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("broken.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "version": "2.0.0",
            "datasource": "supabase",
            "charts": []
        })
        .to_string(),
    )?;

    let output = run_in(temp_dir.path(), &["validate", "broken.json"])?;
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dashboard must contain at least one chart"));
    assert!(stdout.contains("title"));

    Ok(())
}

#[test]
fn validate_json_output_lists_issues() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("broken.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "title": "Ok Title",
            "datasource": "supabase",
            "charts": [{"id": "a", "type": "hologram", "query": "SELECT 1"}]
        })
        .to_string(),
    )?;

    let output = run_in(temp_dir.path(), &["validate", "broken.json", "--json"])?;
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let issues: serde_json::Value = serde_json::from_str(stdout.trim())?;
    assert!(issues
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i["path"] == "charts.0.type"));

    Ok(())
}

#[test]
fn build_emits_a_signed_artifact() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_blueprint(temp_dir.path());

    let output = run_in(
        temp_dir.path(),
        &["build", "dashboard.json", "--output", "dist"],
    )?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let dist = temp_dir.path().join("dist");
    assert!(dist.join("manifest.json").exists());
    assert!(dist.join("dependencies.json").exists());
    assert!(dist.join("signature.json").exists());
    assert!(dist.join("entry.web.html").exists());

    Ok(())
}

#[test]
fn publish_dry_run_succeeds_and_leaves_no_package() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_blueprint(temp_dir.path());

    let output = run_in(
        temp_dir.path(),
        &["build", "dashboard.json", "--output", "dist"],
    )?;
    assert!(output.status.success());

    let output = run_in(
        temp_dir.path(),
        &["publish", "dist", "--channel", "beta", "--dry-run"],
    )?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dry run"));
    assert!(stdout.contains("promote to stable"));

    // No package archive anywhere in the working directory
    let leftover = walk_for_extension(temp_dir.path(), "gz");
    assert!(leftover.is_empty(), "leftover packages: {leftover:?}");

    Ok(())
}

#[test]
fn publish_blocks_unsigned_builds() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_blueprint(temp_dir.path());

    let output = run_in(
        temp_dir.path(),
        &[
            "build",
            "dashboard.json",
            "--output",
            "dist",
            "--skip-signature",
        ],
    )?;
    assert!(output.status.success());

    let output = run_in(temp_dir.path(), &["publish", "dist", "--dry-run"])?;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("signature.json"));

    Ok(())
}

#[test]
fn publish_rejects_unknown_channel_before_packaging() -> Result<()> {
    let temp_dir = TempDir::new()?;
    write_blueprint(temp_dir.path());

    let output = run_in(
        temp_dir.path(),
        &["publish", "dist", "--channel", "production", "--dry-run"],
    )?;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid channel 'production'"));

    Ok(())
}

#[test]
fn build_strict_fails_on_undeclared_plugins() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("plugins.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "version": "2.0.0",
            "title": "Flow Analysis",
            "datasource": "supabase",
            "charts": [
                {"id": "flows", "type": "plugin:sankey", "query": "SELECT * FROM flows"}
            ]
        })
        .to_string(),
    )?;

    let output = run_in(
        temp_dir.path(),
        &["build", "plugins.json", "--output", "dist", "--strict"],
    )?;
    assert!(!output.status.success());
    assert!(!temp_dir.path().join("dist").exists());

    Ok(())
}

fn walk_for_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            found.extend(walk_for_extension(&path, extension));
        } else if path.extension().map(|e| e == extension).unwrap_or(false) {
            found.push(path);
        }
    }
    found
}
