//! Dashboard blueprint document model
//!
//! A blueprint is the versioned JSON document describing a dashboard:
//! its charts, filters, layout, datasource, and declared dependencies.
//! Once a blueprint has been validated for a build it is never mutated;
//! migration and environment overrides always produce a new value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod migrate;
mod validate;

pub use migrate::{migrate, MigrationError, SchemaRevision};
pub use validate::{validate, Severity, Validated, ValidationIssue, ValidationReport};

/// Current blueprint schema version. Documents below this are migrated
/// before they enter the pipeline.
pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

/// Chart types carrying this prefix name an externally supplied visual kind.
pub const PLUGIN_TYPE_PREFIX: &str = "plugin:";

/// Built-in chart kinds
pub const BUILTIN_CHART_KINDS: &[&str] = &[
    "bar", "line", "area", "pie", "donut", "scatter", "table", "metric", "gauge", "heatmap",
    "funnel",
];

/// Built-in datasource connector kinds
pub const BUILTIN_CONNECTOR_KINDS: &[&str] = &[
    "supabase", "postgres", "mysql", "sqlite", "rest", "csv", "bigquery",
];

/// A dashboard blueprint (the current document shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    /// Schema version (semantic version string)
    pub version: String,

    /// Dashboard title
    pub title: String,

    /// Description shown on the marketplace listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Author name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Searchable tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Layout configuration
    #[serde(default)]
    pub layout: Layout,

    /// Primary datasource
    pub datasource: Datasource,

    /// Charts, in render order (at least one)
    pub charts: Vec<Chart>,

    /// Global filter controls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,

    /// Display and behavior settings
    #[serde(default)]
    pub settings: Settings,

    /// Declared plugin dependencies (the resolver can add detected ones)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<DependencyDecl>,

    /// Declared connector dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<DependencyDecl>,

    /// Deployment targets, environments, and publish metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
}

impl Blueprint {
    /// Charts whose type names an externally supplied visual kind
    pub fn plugin_charts(&self) -> impl Iterator<Item = &Chart> {
        self.charts.iter().filter(|c| c.is_plugin_kind())
    }

    /// Environment override by name, if the blueprint defines one
    pub fn environment(&self, name: &str) -> Option<&EnvironmentOverride> {
        self.deployment
            .as_ref()
            .and_then(|d| d.environments.get(name))
    }
}

/// Layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    /// Layout strategy
    #[serde(rename = "type", default)]
    pub kind: LayoutKind,

    /// Grid column count
    #[serde(default = "default_columns")]
    pub columns: u32,

    /// Grid row height in pixels
    #[serde(default = "default_row_height")]
    pub row_height: u32,

    /// Outer margin in pixels
    #[serde(default = "default_margin")]
    pub margin: u32,

    /// Inner cell padding in pixels
    #[serde(default = "default_padding")]
    pub padding: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            kind: LayoutKind::Grid,
            columns: default_columns(),
            row_height: default_row_height(),
            margin: default_margin(),
            padding: default_padding(),
        }
    }
}

fn default_columns() -> u32 {
    12
}

fn default_row_height() -> u32 {
    80
}

fn default_margin() -> u32 {
    16
}

fn default_padding() -> u32 {
    8
}

/// Layout strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    #[default]
    Grid,
    Freeform,
    Responsive,
}

/// A datasource reference: either a bare connector name or a full
/// connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datasource {
    /// Bare connector name, e.g. `"supabase"`
    Named(String),
    /// Structured connection configuration
    Config(DatasourceConfig),
}

impl Datasource {
    /// The connector kind this datasource requires
    pub fn connector_kind(&self) -> &str {
        match self {
            Datasource::Named(name) => name,
            Datasource::Config(config) => &config.kind,
        }
    }
}

/// Structured datasource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceConfig {
    /// Connector kind, e.g. `"postgres"`
    #[serde(rename = "type")]
    pub kind: String,

    /// Connector-specific connection settings (opaque to the pipeline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<serde_json::Value>,

    /// Database schema name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Result cache time-to-live in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<u64>,
}

/// One visual unit within a blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    /// Identifier, unique within the blueprint
    pub id: String,

    /// Visual kind: one of the built-in kinds, or `plugin:<name>` for an
    /// externally supplied kind
    #[serde(rename = "type")]
    pub kind: String,

    /// Data-retrieval expression (opaque to the pipeline)
    pub query: String,

    /// Grid position and span
    #[serde(default)]
    pub position: Position,

    /// Field/role mapping for the visual
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,

    /// Visual styling (opaque to the pipeline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<serde_json::Value>,

    /// Supplying module, for plugin-typed charts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<ChartPlugin>,
}

impl Chart {
    /// Whether this chart's type names an externally supplied visual kind
    pub fn is_plugin_kind(&self) -> bool {
        self.kind.starts_with(PLUGIN_TYPE_PREFIX)
    }

    /// Plugin name for plugin-typed charts (`plugin:sankey` -> `sankey`)
    pub fn plugin_name(&self) -> Option<&str> {
        self.kind.strip_prefix(PLUGIN_TYPE_PREFIX)
    }
}

/// Grid position and span of a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default = "default_span_w")]
    pub w: u32,
    #[serde(default = "default_span_h")]
    pub h: u32,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: default_span_w(),
            h: default_span_h(),
        }
    }
}

fn default_span_w() -> u32 {
    6
}

fn default_span_h() -> u32 {
    4
}

/// Field/role mapping for a chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encoding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Supplying module reference for a plugin-typed chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPlugin {
    /// Plugin module name
    pub name: String,

    /// Requested version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A global filter control bound to a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Field the control filters on
    pub field: String,

    /// UI component kind
    #[serde(default)]
    pub component: FilterComponent,

    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Default value applied on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Optional position within the filter bar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Filter UI component kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterComponent {
    #[default]
    Dropdown,
    Multiselect,
    Daterange,
    Slider,
    Search,
    Toggle,
}

/// Display and behavior settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Color theme
    #[serde(default)]
    pub theme: Theme,

    /// Auto-refresh interval in seconds (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<u64>,

    /// Whether viewers may export data
    #[serde(default = "default_true")]
    pub allow_export: bool,

    /// Whether viewers may edit the dashboard
    #[serde(default)]
    pub allow_edit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            refresh_interval: None,
            allow_export: true,
            allow_edit: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Color themes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Auto,
}

/// A declared plugin or connector dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDecl {
    /// Module name
    pub name: String,

    /// Requested version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Deployment section: targets, environments, publish metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Target platforms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetKind>,

    /// Per-environment overrides, keyed by environment name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, EnvironmentOverride>,

    /// Marketplace publish metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishMetadata>,
}

/// Target platforms for rendered entry artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Desktop,
    Web,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Desktop => "desktop",
            TargetKind::Web => "web",
        }
    }
}

/// Overrides applied when building for a named environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentOverride {
    /// Replacement datasource for this environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<Datasource>,

    /// Variables injected into the rendered entry artifact
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// Marketplace publish metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMetadata {
    /// Preferred release channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Listing visibility
    #[serde(default)]
    pub visibility: Visibility,

    /// SPDX license identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Pricing model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
}

/// Marketplace listing visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
    Unlisted,
}

/// Pricing model for a published dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    /// Pricing model, e.g. `"free"` or `"one-time"`
    pub model: String,

    /// Price in the listing currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    /// ISO 4217 currency code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}
