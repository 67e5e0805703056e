//! Legacy document migration
//!
//! Upgrades a pre-2.0 dashboard document into the current blueprint
//! shape. The schema revision is decided once, at the pipeline entry;
//! downstream stages only ever see the current, fully-migrated shape.
//!
//! Migration is deterministic: identical legacy input yields identical
//! migrated output, and no generated identifiers are introduced.

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::CURRENT_SCHEMA_VERSION;

/// Schema revision of a raw document, resolved once at pipeline entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRevision {
    /// Pre-2.0 document (`visuals` list, `name` instead of `title`)
    Legacy,
    /// Current blueprint shape
    Current,
}

impl SchemaRevision {
    /// Classify a raw document by its `version` field.
    ///
    /// An absent version or a version below the current schema version
    /// means legacy. An unparseable version is classified as current so
    /// that validation reports it instead of migration guessing.
    pub fn detect(raw: &Value) -> Self {
        let Some(version) = raw.get("version").and_then(Value::as_str) else {
            return SchemaRevision::Legacy;
        };

        let current = semver::Version::parse(CURRENT_SCHEMA_VERSION)
            .unwrap_or_else(|_| semver::Version::new(2, 0, 0));

        match semver::Version::parse(version) {
            Ok(v) if v < current => SchemaRevision::Legacy,
            _ => SchemaRevision::Current,
        }
    }
}

/// Fatal migration failures, reported with the legacy field that could
/// not be mapped
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("legacy document cannot be migrated: it has neither 'visuals' nor 'charts'")]
    NothingToMap,

    #[error("legacy document cannot be migrated: 'visuals' must be an array")]
    MalformedVisuals,

    #[error("legacy document cannot be migrated: 'visuals.{index}' is not an object")]
    MalformedVisual { index: usize },

    #[error("legacy document cannot be migrated: document is not a JSON object")]
    NotAnObject,
}

/// Migrate a legacy document into the current blueprint shape.
///
/// Maps the legacy `visuals` list into `charts`, synthesizing a query
/// for each visual from its encoding fields, and carries layout,
/// filters, and settings over verbatim. The output must be passed back
/// through validation before it is accepted as a blueprint.
pub fn migrate(raw: &Value) -> Result<Value, MigrationError> {
    let Some(doc) = raw.as_object() else {
        return Err(MigrationError::NotAnObject);
    };

    let mut migrated = doc.clone();

    // Legacy `name` becomes the title unless the document already has one.
    if !migrated.contains_key("title") {
        if let Some(name) = doc.get("name").cloned() {
            migrated.insert("title".to_string(), name);
        }
    }

    let visuals = match doc.get("visuals") {
        Some(Value::Array(visuals)) => visuals.as_slice(),
        Some(_) => return Err(MigrationError::MalformedVisuals),
        None => &[],
    };

    let charts = if visuals.is_empty() {
        // Some pre-2.0 documents already carried a chart list.
        match doc.get("charts") {
            Some(Value::Array(charts)) if !charts.is_empty() => charts.clone(),
            _ => return Err(MigrationError::NothingToMap),
        }
    } else {
        let mut charts = Vec::with_capacity(visuals.len());
        for (index, visual) in visuals.iter().enumerate() {
            let visual = visual
                .as_object()
                .ok_or(MigrationError::MalformedVisual { index })?;
            charts.push(map_visual(visual, index));
        }
        charts
    };

    migrated.insert("charts".to_string(), Value::Array(charts));
    migrated.insert(
        "version".to_string(),
        Value::String(CURRENT_SCHEMA_VERSION.to_string()),
    );

    // The migrated shape no longer carries the legacy spellings.
    migrated.remove("visuals");
    migrated.remove("name");
    migrated.remove("id");

    tracing::info!(
        to = CURRENT_SCHEMA_VERSION,
        "migrated legacy dashboard document"
    );

    Ok(Value::Object(migrated))
}

/// Map one legacy visual into a chart object
fn map_visual(visual: &Map<String, Value>, index: usize) -> Value {
    let id = visual
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("chart-{}", index + 1));

    let kind = visual
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("bar")
        .to_string();

    let query = match visual.get("query").and_then(Value::as_str) {
        Some(query) => query.to_string(),
        None => synthesize_query(visual),
    };

    let mut chart = Map::new();
    chart.insert("id".to_string(), Value::String(id));
    chart.insert("type".to_string(), Value::String(kind));
    chart.insert("query".to_string(), Value::String(query));
    chart.insert(
        "position".to_string(),
        visual
            .get("position")
            .cloned()
            .unwrap_or_else(|| default_slot(index)),
    );

    for key in ["encoding", "style", "plugin"] {
        if let Some(value) = visual.get(key) {
            chart.insert(key.to_string(), value.clone());
        }
    }

    Value::Object(chart)
}

/// Synthesize a query string from a legacy visual's encoding fields.
///
/// Fields are taken in x, y, color, text order; a visual with no
/// encoded fields falls back to a wildcard selection.
fn synthesize_query(visual: &Map<String, Value>) -> String {
    let encoding = visual.get("encoding").and_then(Value::as_object);

    let mut fields: Vec<&str> = Vec::new();
    if let Some(encoding) = encoding {
        for key in ["x", "y", "color", "text"] {
            if let Some(field) = encoding.get(key).and_then(Value::as_str) {
                if !field.is_empty() && !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
    }

    let table = visual
        .get("data")
        .or_else(|| visual.get("dataset"))
        .and_then(Value::as_str)
        .unwrap_or("data");

    if fields.is_empty() {
        format!("SELECT * FROM {table}")
    } else {
        format!("SELECT {} FROM {table}", fields.join(", "))
    }
}

/// Deterministic grid slot for visuals without a position: two columns
/// of half-width charts
fn default_slot(index: usize) -> Value {
    json!({
        "x": (index % 2) * 6,
        "y": (index / 2) * 4,
        "w": 6,
        "h": 4
    })
}
