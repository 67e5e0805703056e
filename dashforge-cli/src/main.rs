//! Dashforge - build, sign, package, and publish dashboard blueprints

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tracing_subscriber::EnvFilter;

use dashforge_core::blueprint::{
    migrate, validate, Blueprint, SchemaRevision, ValidationReport,
};
use dashforge_core::build::{self, BuildOptions, BuildTarget};
use dashforge_core::gate;
use dashforge_core::package;
use dashforge_core::publish::{
    Channel, PublishOutcome, PublishRequest, Publisher, RegistryManager,
};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "dashforge",
    about = "Build, sign, package, and publish dashboard blueprints",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a blueprint document and report every issue found
    Validate {
        /// Path to the blueprint JSON document
        blueprint: PathBuf,

        /// Exit non-zero on warnings too
        #[clap(long)]
        strict: bool,

        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Build a blueprint into a signed artifact directory
    Build {
        /// Path to the blueprint JSON document
        blueprint: PathBuf,

        /// Output directory for the artifact
        #[clap(long, short, default_value = "./dist")]
        output: PathBuf,

        /// Entry artifacts to render
        #[clap(long, value_enum, default_value = "web")]
        target: TargetArg,

        /// Environment whose datasource/variable overrides are applied
        #[clap(long)]
        env: Option<String>,

        /// Keep only explicitly declared plugins
        #[clap(long)]
        skip_plugins: bool,

        /// Skip signing (the artifact will not pass the pre-publish gate)
        #[clap(long)]
        skip_signature: bool,

        /// Abort on dependency resolution warnings
        #[clap(long)]
        strict: bool,
    },

    /// Publish a built artifact directory to a registry channel
    Publish {
        /// Path to a built artifact directory
        built_dir: PathBuf,

        /// Release channel (stable, beta, alpha, dev); defaults to the
        /// blueprint's publish metadata, then stable
        #[clap(long)]
        channel: Option<String>,

        /// Release notes for the marketplace listing
        #[clap(long)]
        notes: Option<String>,

        /// Registry to publish to (defaults to the configured default)
        #[clap(long)]
        registry: Option<String>,

        /// Skip the confirmation prompt
        #[clap(long)]
        force: bool,

        /// Simulate the upload without any network call
        #[clap(long)]
        dry_run: bool,

        /// Upload timeout in seconds
        #[clap(long, default_value = "60")]
        timeout: u64,
    },

    /// Manage marketplace registries
    Registry {
        #[clap(subcommand)]
        command: RegistryCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// List configured registries
    List,

    /// Add a registry
    Add { name: String, url: String },

    /// Remove a registry
    Remove { name: String },
}

/// Entry artifact targets
#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    Desktop,
    Web,
    Both,
}

impl From<TargetArg> for BuildTarget {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Desktop => BuildTarget::Desktop,
            TargetArg::Web => BuildTarget::Web,
            TargetArg::Both => BuildTarget::Both,
        }
    }
}

/// Initialize tracing from the --log-level flag. Logs go to stderr so
/// stdout stays clean for command output.
fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::new(log_level.to_filter_directive());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    match cli.command {
        Command::Validate {
            blueprint,
            strict,
            json,
        } => validate_command(blueprint, strict, json),
        Command::Build {
            blueprint,
            output,
            target,
            env,
            skip_plugins,
            skip_signature,
            strict,
        } => build_command(
            blueprint,
            output,
            target,
            env,
            skip_plugins,
            skip_signature,
            strict,
        ),
        Command::Publish {
            built_dir,
            channel,
            notes,
            registry,
            force,
            dry_run,
            timeout,
        } => publish_command(built_dir, channel, notes, registry, force, dry_run, timeout).await,
        Command::Registry { command } => registry_command(command),
    }
}

/// Read and parse a blueprint document from disk
fn read_document(path: &Path) -> Result<serde_json::Value> {
    tracing::debug!(path = %path.display(), "reading blueprint document");
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read blueprint: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Blueprint is not valid JSON: {}", path.display()))
}

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Print every issue in a report, errors and warnings alike
fn print_report(report: &ValidationReport) {
    if report.issues.is_empty() {
        return;
    }

    let rows: Vec<IssueRow> = report
        .issues
        .iter()
        .map(|issue| IssueRow {
            severity: format!("{:?}", issue.severity).to_lowercase(),
            path: issue.path.clone(),
            message: issue.message.clone(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
}

fn validate_command(path: PathBuf, strict: bool, json: bool) -> Result<()> {
    let raw = read_document(&path)?;

    let document = match SchemaRevision::detect(&raw) {
        SchemaRevision::Legacy => match migrate(&raw) {
            Ok(document) => {
                if !json {
                    println!("note: legacy document; validated after migration");
                }
                document
            }
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        SchemaRevision::Current => raw,
    };

    match validate(&document) {
        Ok(validated) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&validated.report.issues)?
                );
            } else {
                print_report(&validated.report);
                println!(
                    "'{}' is valid: {} chart(s), {} warning(s)",
                    validated.blueprint.title,
                    validated.blueprint.charts.len(),
                    validated.report.warning_count()
                );
            }
            if strict && validated.report.warning_count() > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report.issues)?);
            } else {
                print_report(&report);
                eprintln!(
                    "Validation failed: {} error(s), {} warning(s)",
                    report.error_count(),
                    report.warning_count()
                );
            }
            std::process::exit(1);
        }
    }
}

fn build_command(
    path: PathBuf,
    output: PathBuf,
    target: TargetArg,
    env: Option<String>,
    skip_plugins: bool,
    skip_signature: bool,
    strict: bool,
) -> Result<()> {
    let raw = read_document(&path)?;

    let mut options = BuildOptions::new(output);
    options.target = target.into();
    options.environment = env;
    options.skip_plugins = skip_plugins;
    options.skip_signature = skip_signature;
    options.strict = strict;

    match build::build(&raw, &options) {
        Ok(artifact) => {
            for warning in &artifact.warnings {
                println!("warning: {warning}");
            }
            println!("Build complete: {}", artifact.dir.display());
            println!(
                "  {} chart(s), {} plugin(s), {} connector(s)",
                artifact.blueprint.charts.len(),
                artifact.resolution.plugins.len(),
                artifact.resolution.connectors.len()
            );
            if skip_signature {
                println!("note: unsigned build; it will not pass the pre-publish gate");
            }
            Ok(())
        }
        Err(build::BuildError::Validation(report)) => {
            print_report(&report);
            eprintln!(
                "Build failed: {} validation error(s)",
                report.error_count()
            );
            std::process::exit(1);
        }
        Err(build::BuildError::StrictWarnings(warnings)) => {
            for warning in &warnings {
                eprintln!("error: {warning}");
            }
            eprintln!("Build failed: {} unresolved dependency(ies) in strict mode", warnings.len());
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn publish_command(
    built_dir: PathBuf,
    channel: Option<String>,
    notes: Option<String>,
    registry: Option<String>,
    force: bool,
    dry_run: bool,
    timeout: u64,
) -> Result<()> {
    // An explicitly requested channel is validated before anything else
    // runs; an unknown channel never reaches packaging or the network.
    let explicit_channel: Option<Channel> = match channel.as_deref() {
        Some(name) => match name.parse() {
            Ok(channel) => Some(channel),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let registry_manager = RegistryManager::load()?;
    let registry = match &registry {
        Some(name) => registry_manager
            .get_registry(name)
            .with_context(|| format!("Registry '{name}' is not configured"))?,
        None => registry_manager
            .default_registry()
            .context("No registries configured")?,
    };

    let manifest_path = built_dir.join(build::MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
    let blueprint: Blueprint =
        serde_json::from_str(&content).context("Failed to parse build manifest")?;

    let channel = match explicit_channel {
        Some(channel) => channel,
        None => {
            let name = blueprint
                .deployment
                .as_ref()
                .and_then(|d| d.publish.as_ref())
                .and_then(|p| p.channel.clone())
                .unwrap_or_else(|| "stable".to_string());
            match name.parse() {
                Ok(channel) => channel,
                Err(e) => {
                    eprintln!("Error: {e} (from the blueprint's publish metadata)");
                    std::process::exit(1);
                }
            }
        }
    };

    let report = gate::check(&built_dir, &blueprint);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    if !report.passed() {
        for error in &report.errors {
            eprintln!("error: {error}");
        }
        eprintln!("Publish blocked: {} error(s)", report.errors.len());
        std::process::exit(1);
    }

    // The gate only requires the signature file to exist; the signature
    // itself must also still match the manifest.
    if !build::verify(&built_dir)? {
        eprintln!("error: signature verification failed; rebuild the artifact before publishing");
        std::process::exit(1);
    }

    let staging = tempfile::tempdir().context("Failed to create package staging directory")?;
    let pkg = package::package(&built_dir, &blueprint, staging.path())?;
    println!(
        "Packaged {} ({} bytes, sha256 {})",
        pkg.file_name(),
        pkg.size,
        pkg.checksums.sha256
    );

    // Cooperative cancellation point between packaging and publish:
    // declining deletes the just-built package.
    if !force && !dry_run {
        let prompt = format!(
            "Publish '{}' v{} to the '{}' channel?",
            blueprint.title, blueprint.version, channel
        );
        if !confirm(&prompt)? {
            std::fs::remove_file(&pkg.path).ok();
            println!("Publish cancelled");
            return Ok(());
        }
    }

    let publisher = Publisher::new(registry.url.clone());
    let outcome = publisher
        .publish(PublishRequest {
            package: pkg,
            blueprint: &blueprint,
            channel,
            release_notes: notes,
            dry_run,
            timeout: Duration::from_secs(timeout),
        })
        .await;

    match outcome {
        Ok(PublishOutcome::Published(receipt)) => {
            println!(
                "Published {} to the '{}' channel",
                receipt.package_id, receipt.channel
            );
            println!("  {}", receipt.marketplace_url);
            if let Some(advisory) = channel.promotion_advisory() {
                println!("note: {advisory}");
            }
            Ok(())
        }
        Ok(PublishOutcome::DryRun(summary)) => {
            println!(
                "Dry run: would publish {} ({} bytes) to the '{}' channel",
                summary.package_name, summary.size, summary.channel
            );
            println!("  md5    {}", summary.checksums.md5);
            println!("  sha256 {}", summary.checksums.sha256);
            if let Some(advisory) = channel.promotion_advisory() {
                println!("note: {advisory}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Ask for confirmation on stdin; default is no
fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

fn registry_command(command: RegistryCommand) -> Result<()> {
    match command {
        RegistryCommand::List => {
            let manager = RegistryManager::load()?;

            #[derive(Tabled)]
            struct RegistryRow {
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "URL")]
                url: String,
                #[tabled(rename = "Default")]
                is_default: String,
            }

            let rows: Vec<RegistryRow> = manager
                .registries()
                .iter()
                .map(|r| RegistryRow {
                    name: r.name.clone(),
                    url: r.url.clone(),
                    is_default: if r.is_default { "*".to_string() } else { String::new() },
                })
                .collect();

            let mut table = Table::new(rows);
            table.with(Style::sharp());
            println!("{table}");
            Ok(())
        }
        RegistryCommand::Add { name, url } => {
            let mut manager = RegistryManager::load()?;
            manager.add_registry(&name, &url)?;
            manager.save()?;
            println!("Added registry '{name}'");
            Ok(())
        }
        RegistryCommand::Remove { name } => {
            let mut manager = RegistryManager::load()?;
            manager.remove_registry(&name)?;
            manager.save()?;
            println!("Removed registry '{name}'");
            Ok(())
        }
    }
}
