//! Dependency resolution
//!
//! Inspects a validated blueprint and computes the set of plugin and
//! connector modules it requires: detected references from chart types
//! and datasource configurations, merged with the blueprint's explicit
//! declarations. Explicit declarations win on version constraints;
//! conflicts are surfaced as warnings, never hard failures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::blueprint::{Blueprint, DependencyDecl, BUILTIN_CONNECTOR_KINDS};

/// How a dependency reference entered the resolved set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencySource {
    /// Explicitly listed in the blueprint's `plugins`/`connectors`
    Declared,
    /// Derived from chart types or datasource configuration
    Detected,
}

/// A resolved plugin or connector reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub source: DependencySource,
}

/// The resolved dependency sets for one blueprint, deduplicated by name
/// and ordered deterministically
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub plugins: Vec<DependencyRef>,
    pub connectors: Vec<DependencyRef>,

    /// Ambiguities and unresolvable references; non-fatal unless the
    /// caller runs in strict mode
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Resolution {
    pub fn plugin(&self, name: &str) -> Option<&DependencyRef> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn connector(&self, name: &str) -> Option<&DependencyRef> {
        self.connectors.iter().find(|c| c.name == name)
    }
}

/// Resolve the dependency sets for a validated blueprint
pub fn resolve(blueprint: &Blueprint) -> Resolution {
    resolve_with_options(blueprint, false)
}

/// Resolve with plugin detection optionally skipped (`--skip-plugins`
/// builds keep only explicitly declared plugins)
pub fn resolve_with_options(blueprint: &Blueprint, skip_plugins: bool) -> Resolution {
    let mut warnings = Vec::new();

    let detected_plugins = if skip_plugins {
        Vec::new()
    } else {
        detect_plugins(blueprint)
    };

    let plugins = merge(
        detected_plugins,
        &blueprint.plugins,
        "plugin",
        &mut warnings,
    );
    let connectors = merge(
        detect_connectors(blueprint),
        &blueprint.connectors,
        "connector",
        &mut warnings,
    );

    for plugin in plugins.iter().filter(|p| p.source == DependencySource::Detected) {
        warnings.push(format!(
            "plugin '{}' is required by a chart type but is not declared in 'plugins'",
            plugin.name
        ));
    }

    for connector in connectors
        .iter()
        .filter(|c| c.source == DependencySource::Detected)
    {
        if !BUILTIN_CONNECTOR_KINDS.contains(&connector.name.as_str()) {
            warnings.push(format!(
                "connector '{}' is not built in and is not declared in 'connectors'",
                connector.name
            ));
        }
    }

    tracing::debug!(
        plugins = plugins.len(),
        connectors = connectors.len(),
        warnings = warnings.len(),
        "resolved blueprint dependencies"
    );

    Resolution {
        plugins,
        connectors,
        warnings,
    }
}

/// Plugin references detected from chart types
fn detect_plugins(blueprint: &Blueprint) -> Vec<(String, Option<String>)> {
    let mut detected = Vec::new();
    for chart in blueprint.plugin_charts() {
        let Some(name) = chart.plugin_name() else {
            continue;
        };
        let version = chart
            .plugin
            .as_ref()
            .and_then(|p| p.version.clone());
        detected.push((name.to_string(), version));
    }
    detected
}

/// Connector references detected from the datasource and every
/// per-environment override
fn detect_connectors(blueprint: &Blueprint) -> Vec<(String, Option<String>)> {
    let mut detected = vec![(blueprint.datasource.connector_kind().to_string(), None)];

    if let Some(deployment) = &blueprint.deployment {
        for env in deployment.environments.values() {
            if let Some(datasource) = &env.datasource {
                detected.push((datasource.connector_kind().to_string(), None));
            }
        }
    }

    detected
}

/// Merge detected references with explicit declarations.
///
/// Detected references are deduplicated by name (first detection wins on
/// version). Declarations override: an explicit version replaces a
/// detected one, and when the same name is declared twice with different
/// versions, the last declaration wins and a warning is emitted.
fn merge(
    detected: Vec<(String, Option<String>)>,
    declared: &[DependencyDecl],
    kind: &str,
    warnings: &mut Vec<String>,
) -> Vec<DependencyRef> {
    let mut set: BTreeMap<String, DependencyRef> = BTreeMap::new();

    for (name, version) in detected {
        set.entry(name.clone()).or_insert(DependencyRef {
            name,
            version,
            source: DependencySource::Detected,
        });
    }

    for decl in declared {
        match set.get_mut(&decl.name) {
            Some(existing) if existing.source == DependencySource::Declared => {
                if let (Some(previous), Some(next)) = (&existing.version, &decl.version) {
                    if previous != next {
                        warnings.push(format!(
                            "{kind} '{}' is declared twice with versions {previous} and {next}; the last declaration wins",
                            decl.name
                        ));
                    }
                }
                if decl.version.is_some() {
                    existing.version = decl.version.clone();
                }
            }
            Some(existing) => {
                if let (Some(detected), Some(declared)) = (&existing.version, &decl.version) {
                    if detected != declared {
                        warnings.push(format!(
                            "{kind} '{}' was detected with version {detected} but declared as {declared}; the declared version wins",
                            decl.name
                        ));
                    }
                }
                if decl.version.is_some() {
                    existing.version = decl.version.clone();
                }
                existing.source = DependencySource::Declared;
            }
            None => {
                set.insert(
                    decl.name.clone(),
                    DependencyRef {
                        name: decl.name.clone(),
                        version: decl.version.clone(),
                        source: DependencySource::Declared,
                    },
                );
            }
        }
    }

    set.into_values().collect()
}

#[cfg(test)]
mod resolve_tests {
    use super::*;
    use crate::blueprint::validate;
    use serde_json::json;

    fn blueprint_from(doc: serde_json::Value) -> Blueprint {
        validate(&doc).unwrap().blueprint
    }

    fn base_doc() -> serde_json::Value {
        json!({
            "version": "2.0.0",
            "title": "Ops Dashboard",
            "datasource": "supabase",
            "charts": [
                {"id": "c1", "type": "plugin:sankey", "query": "SELECT * FROM flows"},
                {"id": "c2", "type": "bar", "query": "SELECT * FROM sales"}
            ]
        })
    }

    #[test]
    fn test_detects_plugin_from_chart_type() {
        let resolution = resolve(&blueprint_from(base_doc()));
        let sankey = resolution.plugin("sankey").unwrap();
        assert_eq!(sankey.source, DependencySource::Detected);
    }

    #[test]
    fn test_detects_connector_from_datasource() {
        let resolution = resolve(&blueprint_from(base_doc()));
        assert!(resolution.connector("supabase").is_some());
    }

    #[test]
    fn test_detects_connectors_from_environment_overrides() {
        let mut doc = base_doc();
        doc["deployment"] = json!({
            "environments": {
                "staging": {"datasource": {"type": "postgres"}},
                "production": {"datasource": "bigquery"}
            }
        });

        let resolution = resolve(&blueprint_from(doc));
        assert!(resolution.connector("supabase").is_some());
        assert!(resolution.connector("postgres").is_some());
        assert!(resolution.connector("bigquery").is_some());
    }

    #[test]
    fn test_declared_version_wins_over_detected() {
        let mut doc = base_doc();
        doc["charts"][0]["plugin"] = json!({"name": "sankey", "version": "0.9.0"});
        doc["plugins"] = json!([{"name": "sankey", "version": "1.2.0"}]);

        let resolution = resolve(&blueprint_from(doc));
        let sankey = resolution.plugin("sankey").unwrap();
        assert_eq!(sankey.version.as_deref(), Some("1.2.0"));
        assert_eq!(sankey.source, DependencySource::Declared);
        assert!(resolution
            .warnings
            .iter()
            .any(|w| w.contains("declared version wins")));
    }

    #[test]
    fn test_duplicate_declaration_last_wins_with_warning() {
        let mut doc = base_doc();
        doc["plugins"] = json!([
            {"name": "sankey", "version": "1.0.0"},
            {"name": "sankey", "version": "2.0.0"}
        ]);

        let resolution = resolve(&blueprint_from(doc));
        assert_eq!(resolution.plugins.len(), 1);
        assert_eq!(
            resolution.plugin("sankey").unwrap().version.as_deref(),
            Some("2.0.0")
        );
        assert!(resolution
            .warnings
            .iter()
            .any(|w| w.contains("declared twice")));
    }

    #[test]
    fn test_undeclared_plugin_is_a_warning() {
        let resolution = resolve(&blueprint_from(base_doc()));
        assert!(resolution
            .warnings
            .iter()
            .any(|w| w.contains("plugin 'sankey'") && w.contains("not declared")));
    }

    #[test]
    fn test_builtin_connector_needs_no_declaration() {
        let resolution = resolve(&blueprint_from(base_doc()));
        assert!(!resolution
            .warnings
            .iter()
            .any(|w| w.contains("connector 'supabase'")));
    }

    #[test]
    fn test_skip_plugins_keeps_only_declared() {
        let mut doc = base_doc();
        doc["plugins"] = json!([{"name": "choropleth", "version": "0.3.0"}]);

        let resolution = resolve_with_options(&blueprint_from(doc), true);
        assert!(resolution.plugin("sankey").is_none());
        assert!(resolution.plugin("choropleth").is_some());
    }

    #[test]
    fn test_sets_are_deduplicated_and_sorted() {
        let mut doc = base_doc();
        doc["charts"] = json!([
            {"id": "c1", "type": "plugin:sankey", "query": "SELECT 1"},
            {"id": "c2", "type": "plugin:sankey", "query": "SELECT 2"},
            {"id": "c3", "type": "plugin:calendar", "query": "SELECT 3"}
        ]);

        let resolution = resolve(&blueprint_from(doc));
        let names: Vec<&str> = resolution.plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["calendar", "sankey"]);
    }
}
