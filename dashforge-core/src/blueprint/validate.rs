//! Blueprint validation
//!
//! Validates arbitrary JSON input against the current blueprint schema.
//! Every violation is collected into a single report with a dotted path
//! and a human-readable message; validation never short-circuits on the
//! first problem. Legacy fields (`id`, `name`, `visuals`) are tolerated
//! so that migration can run afterward.
//!
//! Validation is a pure function of its input: defaults are applied to
//! the returned value, the input is never modified.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use super::{
    Blueprint, BUILTIN_CHART_KINDS, BUILTIN_CONNECTOR_KINDS, CURRENT_SCHEMA_VERSION,
    PLUGIN_TYPE_PREFIX,
};

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The document cannot be accepted
    Error,
    /// Worth surfacing, never blocks
    Warning,
}

/// A single validation issue, tagged with the dotted path of the
/// offending field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Full validation report: every issue found in one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub(crate) fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        });
    }

    pub(crate) fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// A validated blueprint together with the non-blocking issues found
/// along the way
#[derive(Debug, Clone)]
pub struct Validated {
    pub blueprint: Blueprint,
    pub report: ValidationReport,
}

/// Validate a raw JSON document against the current blueprint schema.
///
/// Returns the typed blueprint (with defaults applied) and any warnings,
/// or the full report when the document has at least one error.
pub fn validate(raw: &Value) -> Result<Validated, ValidationReport> {
    let mut report = ValidationReport::default();

    let Some(doc) = raw.as_object() else {
        report.error("", "blueprint must be a JSON object");
        return Err(report);
    };

    check_title(doc, &mut report);
    check_version(doc, &mut report);
    check_datasource_at(doc.get("datasource"), "datasource", true, &mut report);
    check_charts(doc, &mut report);
    check_layout(doc, &mut report);
    check_filters(doc, &mut report);
    check_settings(doc, &mut report);
    check_dependency_list(doc, "plugins", &mut report);
    check_dependency_list(doc, "connectors", &mut report);
    check_deployment(doc, &mut report);

    if report.has_errors() {
        return Err(report);
    }

    // Every enum and shape has been checked above, so decoding applies
    // defaults and cannot reject the document.
    let mut defaulted = doc.clone();
    defaulted
        .entry("version")
        .or_insert_with(|| Value::String(CURRENT_SCHEMA_VERSION.to_string()));

    match serde_json::from_value::<Blueprint>(Value::Object(defaulted)) {
        Ok(blueprint) => {
            tracing::debug!(
                title = %blueprint.title,
                charts = blueprint.charts.len(),
                warnings = report.warning_count(),
                "blueprint validated"
            );
            Ok(Validated { blueprint, report })
        }
        Err(e) => {
            report.error("", format!("failed to decode blueprint: {e}"));
            Err(report)
        }
    }
}

fn check_title(doc: &Map<String, Value>, report: &mut ValidationReport) {
    match doc.get("title") {
        None => report.error("title", "is required"),
        Some(Value::String(s)) if s.trim().is_empty() => {
            report.error("title", "must not be empty");
        }
        Some(Value::String(_)) => {}
        Some(_) => report.error("title", "must be a string"),
    }

    for key in ["description", "author"] {
        if let Some(value) = doc.get(key) {
            if !value.is_string() && !value.is_null() {
                report.error(key, "must be a string");
            }
        }
    }

    if let Some(tags) = doc.get("tags") {
        match tags.as_array() {
            Some(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if !entry.is_string() {
                        report.error(format!("tags.{i}"), "must be a string");
                    }
                }
            }
            None => report.error("tags", "must be an array"),
        }
    }
}

fn check_version(doc: &Map<String, Value>, report: &mut ValidationReport) {
    match doc.get("version") {
        None => {}
        Some(Value::String(v)) => {
            if semver::Version::parse(v).is_err() {
                report.error("version", "must be a semantic version (e.g. 2.0.0)");
            }
        }
        Some(_) => report.error("version", "must be a string"),
    }
}

fn check_datasource_at(
    value: Option<&Value>,
    path: &str,
    required: bool,
    report: &mut ValidationReport,
) {
    match value {
        None => {
            if required {
                report.error(path, "is required");
            }
        }
        Some(Value::String(name)) => {
            if name.trim().is_empty() {
                report.error(path, "connector name must not be empty");
            } else if !BUILTIN_CONNECTOR_KINDS.contains(&name.as_str()) {
                report.warning(path, format!("unknown connector type '{name}'"));
            }
        }
        Some(Value::Object(config)) => match config.get("type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => {
                if !BUILTIN_CONNECTOR_KINDS.contains(&kind.as_str()) {
                    report.warning(format!("{path}.type"), format!("unknown connector type '{kind}'"));
                }
            }
            Some(Value::String(_)) => report.error(format!("{path}.type"), "must not be empty"),
            Some(_) => report.error(format!("{path}.type"), "must be a string"),
            None => report.error(format!("{path}.type"), "is required"),
        },
        Some(_) => report.error(path, "must be a connector name or a connection object"),
    }
}

fn check_charts(doc: &Map<String, Value>, report: &mut ValidationReport) {
    let charts = match doc.get("charts") {
        Some(Value::Array(charts)) => charts,
        Some(_) => {
            report.error("charts", "must be an array");
            return;
        }
        None => {
            report.error("charts", "Dashboard must contain at least one chart");
            return;
        }
    };

    if charts.is_empty() {
        report.error("charts", "Dashboard must contain at least one chart");
        return;
    }

    let mut seen_ids: Vec<&str> = Vec::new();
    for (i, chart) in charts.iter().enumerate() {
        let Some(chart) = chart.as_object() else {
            report.error(format!("charts.{i}"), "must be an object");
            continue;
        };

        match chart.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => {
                if seen_ids.contains(&id.as_str()) {
                    report.error(format!("charts.{i}.id"), format!("duplicate chart id '{id}'"));
                } else {
                    seen_ids.push(id.as_str());
                }
            }
            Some(Value::String(_)) => report.error(format!("charts.{i}.id"), "must not be empty"),
            Some(_) => report.error(format!("charts.{i}.id"), "must be a string"),
            None => report.error(format!("charts.{i}.id"), "is required"),
        }

        match chart.get("type") {
            Some(Value::String(kind)) => {
                let plugin_suffix = kind.strip_prefix(PLUGIN_TYPE_PREFIX);
                let valid = match plugin_suffix {
                    Some(suffix) => !suffix.trim().is_empty(),
                    None => BUILTIN_CHART_KINDS.contains(&kind.as_str()),
                };
                if !valid {
                    report.error(format!("charts.{i}.type"), "invalid enum value");
                }
            }
            Some(_) => report.error(format!("charts.{i}.type"), "must be a string"),
            None => report.error(format!("charts.{i}.type"), "is required"),
        }

        match chart.get("query") {
            Some(Value::String(q)) if q.trim().is_empty() => {
                report.error(format!("charts.{i}.query"), "must not be empty");
            }
            Some(Value::String(_)) => {}
            Some(_) => report.error(format!("charts.{i}.query"), "must be a string"),
            None => report.error(format!("charts.{i}.query"), "is required"),
        }

        if let Some(position) = chart.get("position") {
            check_position(position, &format!("charts.{i}.position"), report);
        }

        if let Some(encoding) = chart.get("encoding") {
            match encoding.as_object() {
                Some(fields) => {
                    for key in ["x", "y", "color", "text"] {
                        if let Some(value) = fields.get(key) {
                            if !value.is_string() && !value.is_null() {
                                report.error(
                                    format!("charts.{i}.encoding.{key}"),
                                    "must be a string",
                                );
                            }
                        }
                    }
                }
                None => report.error(format!("charts.{i}.encoding"), "must be an object"),
            }
        }

        if let Some(plugin) = chart.get("plugin") {
            match plugin.as_object() {
                Some(p) => {
                    if !p.get("name").map(Value::is_string).unwrap_or(false) {
                        report.error(format!("charts.{i}.plugin.name"), "is required");
                    }
                }
                None => report.error(format!("charts.{i}.plugin"), "must be an object"),
            }
        }
    }
}

fn check_position(value: &Value, path: &str, report: &mut ValidationReport) {
    let Some(position) = value.as_object() else {
        report.error(path, "must be an object");
        return;
    };
    for key in ["x", "y", "w", "h"] {
        if let Some(v) = position.get(key) {
            if !v.is_u64() {
                report.error(format!("{path}.{key}"), "must be a non-negative integer");
            }
        }
    }
}

fn check_layout(doc: &Map<String, Value>, report: &mut ValidationReport) {
    let Some(layout) = doc.get("layout") else {
        return;
    };
    let Some(layout) = layout.as_object() else {
        report.error("layout", "must be an object");
        return;
    };

    if let Some(kind) = layout.get("type") {
        match kind.as_str() {
            Some("grid" | "freeform" | "responsive") => {}
            _ => report.error("layout.type", "invalid enum value"),
        }
    }

    for key in ["columns", "rowHeight", "margin", "padding"] {
        if let Some(v) = layout.get(key) {
            if !v.is_u64() {
                report.error(format!("layout.{key}"), "must be a non-negative integer");
            }
        }
    }

    if let Some(columns) = layout.get("columns").and_then(Value::as_u64) {
        if columns == 0 {
            report.error("layout.columns", "must be at least 1");
        }
    }
}

fn check_filters(doc: &Map<String, Value>, report: &mut ValidationReport) {
    let Some(filters) = doc.get("filters") else {
        return;
    };
    let Some(filters) = filters.as_array() else {
        report.error("filters", "must be an array");
        return;
    };

    for (i, filter) in filters.iter().enumerate() {
        let Some(filter) = filter.as_object() else {
            report.error(format!("filters.{i}"), "must be an object");
            continue;
        };

        match filter.get("field") {
            Some(Value::String(f)) if !f.trim().is_empty() => {}
            Some(Value::String(_)) => {
                report.error(format!("filters.{i}.field"), "must not be empty")
            }
            Some(_) => report.error(format!("filters.{i}.field"), "must be a string"),
            None => report.error(format!("filters.{i}.field"), "is required"),
        }

        if let Some(component) = filter.get("component") {
            match component.as_str() {
                Some(
                    "dropdown" | "multiselect" | "daterange" | "slider" | "search" | "toggle",
                ) => {}
                _ => report.error(format!("filters.{i}.component"), "invalid enum value"),
            }
        }

        if let Some(position) = filter.get("position") {
            check_position(position, &format!("filters.{i}.position"), report);
        }
    }
}

fn check_settings(doc: &Map<String, Value>, report: &mut ValidationReport) {
    let Some(settings) = doc.get("settings") else {
        return;
    };
    let Some(settings) = settings.as_object() else {
        report.error("settings", "must be an object");
        return;
    };

    if let Some(theme) = settings.get("theme") {
        match theme.as_str() {
            Some("light" | "dark" | "auto") => {}
            _ => report.error("settings.theme", "invalid enum value"),
        }
    }

    if let Some(interval) = settings.get("refreshInterval") {
        if !interval.is_u64() && !interval.is_null() {
            report.error("settings.refreshInterval", "must be a non-negative integer");
        }
    }

    for key in ["allowExport", "allowEdit"] {
        if let Some(v) = settings.get(key) {
            if !v.is_boolean() {
                report.error(format!("settings.{key}"), "must be a boolean");
            }
        }
    }
}

fn check_dependency_list(doc: &Map<String, Value>, key: &str, report: &mut ValidationReport) {
    let Some(deps) = doc.get(key) else {
        return;
    };
    let Some(deps) = deps.as_array() else {
        report.error(key, "must be an array");
        return;
    };

    for (i, dep) in deps.iter().enumerate() {
        let Some(dep) = dep.as_object() else {
            report.error(format!("{key}.{i}"), "must be an object");
            continue;
        };
        match dep.get("name") {
            Some(Value::String(n)) if !n.trim().is_empty() => {}
            Some(Value::String(_)) => report.error(format!("{key}.{i}.name"), "must not be empty"),
            Some(_) => report.error(format!("{key}.{i}.name"), "must be a string"),
            None => report.error(format!("{key}.{i}.name"), "is required"),
        }
        if let Some(version) = dep.get("version") {
            if !version.is_string() && !version.is_null() {
                report.error(format!("{key}.{i}.version"), "must be a string");
            }
        }
    }
}

fn check_deployment(doc: &Map<String, Value>, report: &mut ValidationReport) {
    let Some(deployment) = doc.get("deployment") else {
        return;
    };
    let Some(deployment) = deployment.as_object() else {
        report.error("deployment", "must be an object");
        return;
    };

    if let Some(targets) = deployment.get("targets") {
        match targets.as_array() {
            Some(entries) => {
                for (i, target) in entries.iter().enumerate() {
                    match target.as_str() {
                        Some("desktop" | "web") => {}
                        _ => report.error(format!("deployment.targets.{i}"), "invalid enum value"),
                    }
                }
            }
            None => report.error("deployment.targets", "must be an array"),
        }
    }

    if let Some(environments) = deployment.get("environments") {
        match environments.as_object() {
            Some(envs) => {
                for (name, env) in envs {
                    let env_path = format!("deployment.environments.{name}");
                    let Some(env) = env.as_object() else {
                        report.error(env_path, "must be an object");
                        continue;
                    };
                    check_datasource_at(
                        env.get("datasource"),
                        &format!("{env_path}.datasource"),
                        false,
                        report,
                    );
                    if let Some(variables) = env.get("variables") {
                        match variables.as_object() {
                            Some(vars) => {
                                for (var, value) in vars {
                                    if !value.is_string() {
                                        report.error(
                                            format!("{env_path}.variables.{var}"),
                                            "must be a string",
                                        );
                                    }
                                }
                            }
                            None => {
                                report.error(format!("{env_path}.variables"), "must be an object")
                            }
                        }
                    }
                }
            }
            None => report.error("deployment.environments", "must be an object"),
        }
    }

    if let Some(publish) = deployment.get("publish") {
        let Some(publish) = publish.as_object() else {
            report.error("deployment.publish", "must be an object");
            return;
        };
        if let Some(visibility) = publish.get("visibility") {
            match visibility.as_str() {
                Some("private" | "public" | "unlisted") => {}
                _ => report.error("deployment.publish.visibility", "invalid enum value"),
            }
        }
        if let Some(pricing) = publish.get("pricing") {
            match pricing.as_object() {
                Some(p) => {
                    if !p.get("model").map(Value::is_string).unwrap_or(false) {
                        report.error("deployment.publish.pricing.model", "is required");
                    }
                }
                None => report.error("deployment.publish.pricing", "must be an object"),
            }
        }
    }
}
