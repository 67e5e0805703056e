//! Pre-publish gate
//!
//! Runs independent completeness, size, and structure checks over a
//! built artifact directory. Every check runs even after one fails, so
//! a single invocation reports every problem at once. Errors block
//! publishing; warnings are surfaced but never block.

use std::path::Path;

use crate::blueprint::Blueprint;
use crate::build::{MANIFEST_FILE, SIGNATURE_FILE};

/// Hard ceiling on artifact directory size: exceeding it is an error
pub const HARD_SIZE_LIMIT: u64 = 50 * 1024 * 1024;

/// Soft ceiling on artifact directory size: exceeding it is a warning
pub const SOFT_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// The gate's verdict: blocking errors and non-blocking warnings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl GateReport {
    /// Whether publishing may proceed
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a built artifact directory against the publish requirements.
///
/// The checks are independent of one another; completeness of the
/// report is part of the contract, so none of them short-circuits.
pub fn check(artifact_dir: &Path, blueprint: &Blueprint) -> GateReport {
    let mut report = GateReport::default();

    check_required_files(artifact_dir, &mut report);
    check_title(blueprint, &mut report);
    check_charts(blueprint, &mut report);
    check_listing_metadata(blueprint, &mut report);
    check_plugin_declarations(blueprint, &mut report);
    check_directory_size(artifact_dir, &mut report);

    tracing::debug!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "pre-publish gate evaluated"
    );

    report
}

fn check_required_files(artifact_dir: &Path, report: &mut GateReport) {
    for file in [MANIFEST_FILE, SIGNATURE_FILE] {
        if !artifact_dir.join(file).exists() {
            report.errors.push(format!("required file missing: {file}"));
        }
    }

    let has_entry = std::fs::read_dir(artifact_dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("entry.") && name.ends_with(".html")
            })
        })
        .unwrap_or(false);

    if !has_entry {
        report
            .errors
            .push("rendered entry point missing (expected entry.<target>.html)".to_string());
    }
}

fn check_title(blueprint: &Blueprint, report: &mut GateReport) {
    if blueprint.title.trim().chars().count() < 3 {
        report
            .errors
            .push("Dashboard title must be at least 3 characters".to_string());
    }
}

fn check_charts(blueprint: &Blueprint, report: &mut GateReport) {
    if blueprint.charts.is_empty() {
        report
            .errors
            .push("Dashboard must contain at least one chart".to_string());
    }
}

fn check_listing_metadata(blueprint: &Blueprint, report: &mut GateReport) {
    if blueprint
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        report
            .warnings
            .push("no description set; the marketplace listing will be empty".to_string());
    }

    if blueprint
        .author
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        report.warnings.push("no author set".to_string());
    }
}

fn check_plugin_declarations(blueprint: &Blueprint, report: &mut GateReport) {
    let plugin_chart_count = blueprint.plugin_charts().count();
    if plugin_chart_count > 0 && blueprint.plugins.is_empty() {
        report.warnings.push(format!(
            "{plugin_chart_count} chart(s) use plugin visual types but no plugins are declared"
        ));
    }
}

fn check_directory_size(artifact_dir: &Path, report: &mut GateReport) {
    let total: u64 = walkdir::WalkDir::new(artifact_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum();

    if total > HARD_SIZE_LIMIT {
        report.errors.push(format!(
            "artifact directory is {}, exceeding the 50 MB limit",
            format_size(total)
        ));
    } else if total > SOFT_SIZE_LIMIT {
        report.warnings.push(format!(
            "artifact directory is {}; consider trimming assets (soft limit 10 MB)",
            format_size(total)
        ));
    }
}

fn format_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod gate_tests {
    use super::*;
    use crate::build::{build, BuildOptions};
    use serde_json::json;
    use tempfile::TempDir;

    fn doc() -> serde_json::Value {
        json!({
            "version": "2.0.0",
            "title": "Store KPIs",
            "description": "KPIs per store",
            "author": "analytics",
            "datasource": "supabase",
            "charts": [
                {"id": "rev", "type": "line", "query": "SELECT day, revenue FROM sales"}
            ]
        })
    }

    fn built(temp_dir: &TempDir, doc: &serde_json::Value, skip_signature: bool) -> crate::build::BuildArtifact {
        let mut opts = BuildOptions::new(temp_dir.path().join("out"));
        opts.skip_signature = skip_signature;
        build(doc, &opts).unwrap()
    }

    #[test]
    fn test_complete_artifact_passes() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = built(&temp_dir, &doc(), false);

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(report.passed(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_signature_is_blocking() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = built(&temp_dir, &doc(), true);

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(!report.passed());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains(SIGNATURE_FILE)));
    }

    #[test]
    fn test_short_title_is_blocking() {
        let temp_dir = TempDir::new().unwrap();
        let mut doc = doc();
        doc["title"] = json!("Hi");
        let artifact = built(&temp_dir, &doc, false);

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("at least 3 characters")));
    }

    #[test]
    fn test_missing_description_and_author_warn() {
        let temp_dir = TempDir::new().unwrap();
        let mut doc = doc();
        doc.as_object_mut().unwrap().remove("description");
        doc.as_object_mut().unwrap().remove("author");
        let artifact = built(&temp_dir, &doc, false);

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(report.passed());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_undeclared_plugins_warn_but_do_not_block() {
        let temp_dir = TempDir::new().unwrap();
        let mut doc = doc();
        doc["charts"] = json!([
            {"id": "c1", "type": "plugin:sankey", "query": "SELECT * FROM flows"}
        ]);
        let artifact = built(&temp_dir, &doc, false);

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(report.passed());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("no plugins are declared")));
    }

    #[test]
    fn test_all_checks_run_even_when_one_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut doc = doc();
        doc["title"] = json!("Hi");
        doc.as_object_mut().unwrap().remove("description");
        let artifact = built(&temp_dir, &doc, true);

        let report = check(&artifact.dir, &artifact.blueprint);
        // signature error and title error both present, plus the
        // description warning
        assert!(report.errors.len() >= 2);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn test_soft_size_ceiling_warns() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = built(&temp_dir, &doc(), false);
        std::fs::write(
            artifact.dir.join("assets.bin"),
            vec![0u8; (SOFT_SIZE_LIMIT + 1024) as usize],
        )
        .unwrap();

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("soft limit")));
    }

    #[test]
    fn test_hard_size_ceiling_blocks() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = built(&temp_dir, &doc(), false);
        std::fs::write(
            artifact.dir.join("assets.bin"),
            vec![0u8; (HARD_SIZE_LIMIT + 1024) as usize],
        )
        .unwrap();

        let report = check(&artifact.dir, &artifact.blueprint);
        assert!(!report.passed());
        assert!(report.errors.iter().any(|e| e.contains("50 MB limit")));
    }
}
