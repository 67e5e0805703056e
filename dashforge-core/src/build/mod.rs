//! Build orchestration
//!
//! Sequences the pipeline for one build invocation: schema revision
//! detection, migration when needed, validation, dependency resolution,
//! environment overrides, artifact emission, and signing. Each build is
//! an independent computation over its inputs; no state is shared
//! across invocations, so parallel builds need no coordination.
//!
//! On any failure the output directory is removed; a failed build
//! never leaves a partial artifact behind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::blueprint::{
    migrate, validate, Blueprint, MigrationError, SchemaRevision, TargetKind, ValidationReport,
};
use crate::resolve::{resolve_with_options, Resolution};

mod signing;

pub use signing::{sign, verify, SignatureRecord, SIGNATURE_FILE, SIGNING_VERSION};

/// Finalized blueprint file name within an artifact directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Resolved dependency lists file name within an artifact directory
pub const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Which entry artifacts a build renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTarget {
    Desktop,
    #[default]
    Web,
    Both,
}

impl BuildTarget {
    /// The concrete target platforms this selection expands to
    pub fn kinds(&self) -> &'static [TargetKind] {
        match self {
            BuildTarget::Desktop => &[TargetKind::Desktop],
            BuildTarget::Web => &[TargetKind::Web],
            BuildTarget::Both => &[TargetKind::Desktop, TargetKind::Web],
        }
    }
}

/// Entry artifact file name for a target platform
pub fn entry_file_name(target: TargetKind) -> String {
    format!("entry.{}.html", target.as_str())
}

/// Configuration for one build invocation
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Output directory for the artifact (created fresh)
    pub output: PathBuf,

    /// Entry artifacts to render
    pub target: BuildTarget,

    /// Named environment whose overrides are applied before emission
    pub environment: Option<String>,

    /// Keep only explicitly declared plugins
    pub skip_plugins: bool,

    /// Do not sign the artifact (it will fail the pre-publish gate)
    pub skip_signature: bool,

    /// Abort on resolution warnings instead of surfacing them
    pub strict: bool,
}

impl BuildOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            target: BuildTarget::default(),
            environment: None,
            skip_plugins: false,
            skip_signature: false,
            strict: false,
        }
    }
}

/// A completed build: the artifact directory and everything that went
/// into it. Owned by the caller for the duration of one invocation.
#[derive(Debug)]
pub struct BuildArtifact {
    /// Artifact directory
    pub dir: PathBuf,

    /// The finalized blueprint written as the manifest
    pub blueprint: Blueprint,

    /// Resolved dependency sets
    pub resolution: Resolution,

    /// Identifier for this build invocation
    pub build_id: String,

    /// Every non-blocking issue surfaced during the build
    pub warnings: Vec<String>,
}

/// Build failures, one variant per pipeline stage
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("blueprint failed validation with {} error(s)", .0.error_count())]
    Validation(ValidationReport),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("aborting: {} unresolved dependency warning(s) in strict mode", .0.len())]
    StrictWarnings(Vec<String>),

    #[error("environment '{name}' is not defined in the blueprint's deployment section")]
    UnknownEnvironment { name: String },

    #[error("failed to emit build artifact: {context}")]
    Emit {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode build output: {message}")]
    Encode { message: String },

    #[error("failed to sign build artifact: {message}")]
    Signing { message: String },
}

/// Run the build pipeline over a raw blueprint document.
///
/// `start -> [migrate ->] validate -> resolve -> emit -> sign -> done`,
/// aborting without an output directory on any validation or resolution
/// failure.
pub fn build(raw: &serde_json::Value, options: &BuildOptions) -> Result<BuildArtifact, BuildError> {
    let build_id = uuid::Uuid::now_v7().to_string();
    tracing::info!(build_id = %build_id, output = %options.output.display(), "starting build");

    // Schema-version branching happens exactly once, here; every later
    // stage sees only the current shape.
    let document = match SchemaRevision::detect(raw) {
        SchemaRevision::Legacy => migrate(raw)?,
        SchemaRevision::Current => raw.clone(),
    };

    let validated = validate(&document).map_err(BuildError::Validation)?;
    let mut warnings: Vec<String> = validated.report.warnings().map(|i| i.to_string()).collect();

    let resolution = resolve_with_options(&validated.blueprint, options.skip_plugins);
    warnings.extend(resolution.warnings.iter().cloned());

    if options.strict && !resolution.warnings.is_empty() {
        return Err(BuildError::StrictWarnings(resolution.warnings.clone()));
    }

    let (blueprint, variables) = match &options.environment {
        Some(name) => with_environment(&validated.blueprint, name)?,
        None => (validated.blueprint.clone(), BTreeMap::new()),
    };

    if let Err(e) = emit(&blueprint, &resolution, &variables, options) {
        // Clean as we go: a failed emission leaves nothing behind.
        if let Err(cleanup) = std::fs::remove_dir_all(&options.output) {
            tracing::warn!(error = %cleanup, "failed to remove partial build output");
        }
        return Err(e);
    }

    tracing::info!(
        build_id = %build_id,
        plugins = resolution.plugins.len(),
        connectors = resolution.connectors.len(),
        "build complete"
    );

    Ok(BuildArtifact {
        dir: options.output.clone(),
        blueprint,
        resolution,
        build_id,
        warnings,
    })
}

/// Produce a new blueprint with the named environment's overrides
/// applied, plus the variables to inject into entry artifacts
fn with_environment(
    blueprint: &Blueprint,
    name: &str,
) -> Result<(Blueprint, BTreeMap<String, String>), BuildError> {
    let Some(env) = blueprint.environment(name) else {
        return Err(BuildError::UnknownEnvironment {
            name: name.to_string(),
        });
    };
    let env = env.clone();

    let mut next = blueprint.clone();
    if let Some(datasource) = env.datasource {
        tracing::debug!(environment = name, "applying environment datasource override");
        next.datasource = datasource;
    }

    Ok((next, env.variables))
}

/// Emit the artifact directory: manifest, dependency lists, entry
/// artifacts, signature
fn emit(
    blueprint: &Blueprint,
    resolution: &Resolution,
    variables: &BTreeMap<String, String>,
    options: &BuildOptions,
) -> Result<(), BuildError> {
    let dir = &options.output;

    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|source| BuildError::Emit {
            context: format!("could not replace existing output {}", dir.display()),
            source,
        })?;
    }
    std::fs::create_dir_all(dir).map_err(|source| BuildError::Emit {
        context: format!("could not create output {}", dir.display()),
        source,
    })?;

    let manifest = serde_json::to_vec_pretty(blueprint).map_err(|e| BuildError::Encode {
        message: format!("manifest serialization failed: {e}"),
    })?;
    write_file(&dir.join(MANIFEST_FILE), &manifest)?;

    let dependencies = serde_json::to_vec_pretty(resolution).map_err(|e| BuildError::Encode {
        message: format!("dependency list serialization failed: {e}"),
    })?;
    write_file(&dir.join(DEPENDENCIES_FILE), &dependencies)?;

    for target in options.target.kinds() {
        let entry = render_entry(blueprint, *target, variables);
        write_file(&dir.join(entry_file_name(*target)), entry.as_bytes())?;
    }

    if options.skip_signature {
        tracing::warn!("signature skipped; this artifact cannot pass the pre-publish gate");
    } else {
        signing::sign(dir).map_err(|e| BuildError::Signing {
            message: format!("{e:#}"),
        })?;
    }

    Ok(())
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), BuildError> {
    std::fs::write(path, content).map_err(|source| BuildError::Emit {
        context: format!("could not write {}", path.display()),
        source,
    })
}

/// Render the entry artifact for one target platform: a self-contained
/// HTML shell referencing the manifest and carrying the environment
/// variables
fn render_entry(
    blueprint: &Blueprint,
    target: TargetKind,
    variables: &BTreeMap<String, String>,
) -> String {
    let theme = serde_json::to_value(blueprint.settings.theme)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "light".to_string());

    let env_json =
        serde_json::to_string(variables).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"<!doctype html>
<html lang="en" data-theme="{theme}">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
</head>
<body data-target="{target}">
  <div id="dashboard-root" data-manifest="{manifest}"></div>
  <script>
    window.__DASHBOARD_TARGET__ = "{target}";
    window.__DASHBOARD_ENV__ = {env_json};
  </script>
</body>
</html>
"#,
        theme = theme,
        title = escape_html(&blueprint.title),
        target = target.as_str(),
        manifest = MANIFEST_FILE,
        env_json = env_json,
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod build_tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn valid_doc() -> serde_json::Value {
        json!({
            "version": "2.0.0",
            "title": "Retail KPIs",
            "description": "Daily retail KPI overview",
            "author": "analytics",
            "datasource": "supabase",
            "charts": [
                {"id": "rev", "type": "line", "query": "SELECT day, revenue FROM sales"}
            ],
            "deployment": {
                "environments": {
                    "staging": {
                        "datasource": {"type": "postgres"},
                        "variables": {"API_BASE": "https://staging.example.com"}
                    }
                }
            }
        })
    }

    fn options(dir: &TempDir) -> BuildOptions {
        BuildOptions::new(dir.path().join("out"))
    }

    #[test]
    fn test_build_emits_expected_files() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = build(&valid_doc(), &options(&temp_dir)).unwrap();

        assert!(artifact.dir.join(MANIFEST_FILE).exists());
        assert!(artifact.dir.join(DEPENDENCIES_FILE).exists());
        assert!(artifact.dir.join("entry.web.html").exists());
        assert!(artifact.dir.join(SIGNATURE_FILE).exists());
    }

    #[test]
    fn test_build_both_targets() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = options(&temp_dir);
        opts.target = BuildTarget::Both;

        let artifact = build(&valid_doc(), &opts).unwrap();
        assert!(artifact.dir.join("entry.web.html").exists());
        assert!(artifact.dir.join("entry.desktop.html").exists());
    }

    #[test]
    fn test_legacy_document_is_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let legacy = json!({
            "name": "Old Dashboard",
            "datasource": "supabase",
            "visuals": [
                {"type": "bar", "encoding": {"x": "region", "y": "units"}}
            ]
        });

        let artifact = build(&legacy, &options(&temp_dir)).unwrap();
        assert_eq!(artifact.blueprint.title, "Old Dashboard");
        assert_eq!(artifact.blueprint.charts.len(), 1);
        assert_eq!(
            artifact.blueprint.charts[0].query,
            "SELECT region, units FROM data"
        );
    }

    #[test]
    fn test_validation_failure_leaves_no_output() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options(&temp_dir);
        let doc = json!({"title": "No Charts", "datasource": "supabase", "charts": []});

        let err = build(&doc, &opts).unwrap_err();
        assert!(matches!(err, BuildError::Validation(_)));
        assert!(!opts.output.exists());
    }

    #[test]
    fn test_unknown_environment_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = options(&temp_dir);
        opts.environment = Some("production".to_string());

        let err = build(&valid_doc(), &opts).unwrap_err();
        assert!(matches!(err, BuildError::UnknownEnvironment { .. }));
        assert!(!opts.output.exists());
    }

    #[test]
    fn test_environment_override_applied_to_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = options(&temp_dir);
        opts.environment = Some("staging".to_string());

        let artifact = build(&valid_doc(), &opts).unwrap();
        assert_eq!(artifact.blueprint.datasource.connector_kind(), "postgres");

        let entry = std::fs::read_to_string(artifact.dir.join("entry.web.html")).unwrap();
        assert!(entry.contains("https://staging.example.com"));
    }

    #[test]
    fn test_skip_signature_omits_signature_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = options(&temp_dir);
        opts.skip_signature = true;

        let artifact = build(&valid_doc(), &opts).unwrap();
        assert!(!artifact.dir.join(SIGNATURE_FILE).exists());
    }

    #[test]
    fn test_strict_mode_aborts_on_undeclared_plugin() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = options(&temp_dir);
        opts.strict = true;

        let mut doc = valid_doc();
        doc["charts"] = json!([
            {"id": "c1", "type": "plugin:sankey", "query": "SELECT * FROM flows"}
        ]);

        let err = build(&doc, &opts).unwrap_err();
        assert!(matches!(err, BuildError::StrictWarnings(_)));
        assert!(!opts.output.exists());
    }

    #[test]
    fn test_plugin_warning_surfaced_in_non_strict_build() {
        let temp_dir = TempDir::new().unwrap();
        let mut doc = valid_doc();
        doc["charts"] = json!([
            {"id": "c1", "type": "plugin:sankey", "query": "SELECT * FROM flows"}
        ]);

        let artifact = build(&doc, &options(&temp_dir)).unwrap();
        assert!(artifact
            .warnings
            .iter()
            .any(|w| w.contains("plugin 'sankey'")));
    }
}
