//! Registry publishing
//!
//! Uploads a packaged dashboard to a marketplace registry under a named
//! release channel, or simulates the upload in dry-run mode. The local
//! package file is never a durable artifact: it is removed after every
//! publish attempt, whether it succeeded, failed, or was simulated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::blueprint::Blueprint;
use crate::package::{Checksums, Package};

mod registry;

pub use registry::{
    Registry, RegistryConfig, RegistryManager, DEFAULT_REGISTRY_NAME, DEFAULT_REGISTRY_URL,
};

/// Default timeout for a registry upload
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Release channels a package may be published under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
    Alpha,
    Dev,
}

impl Channel {
    pub const ALL: &'static [Channel] =
        &[Channel::Stable, Channel::Beta, Channel::Alpha, Channel::Dev];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Alpha => "alpha",
            Channel::Dev => "dev",
        }
    }

    /// Advisory shown after publishing to a non-stable channel
    pub fn promotion_advisory(&self) -> Option<String> {
        match self {
            Channel::Stable => None,
            other => Some(format!(
                "published to the '{}' channel; promote to stable when ready",
                other.as_str()
            )),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Channel::Stable),
            "beta" => Ok(Channel::Beta),
            "alpha" => Ok(Channel::Alpha),
            "dev" => Ok(Channel::Dev),
            other => Err(PublishError::InvalidChannel(other.to_string())),
        }
    }
}

/// Publish failures. The build artifact itself stays valid and
/// re-publishable after any of these.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid channel '{0}'; valid channels are stable, beta, alpha, dev")]
    InvalidChannel(String),

    #[error("failed to read package file: {context}")]
    PackageRead {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registry upload failed: {0}")]
    Upload(String),

    #[error("registry rejected the package (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("registry returned an unreadable response: {0}")]
    MalformedResponse(String),
}

/// Returned only on a real, successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    /// Opaque identifier assigned by the registry
    pub package_id: String,

    /// Browsable listing URL
    pub marketplace_url: String,

    /// Channel the package was published under
    pub channel: Channel,
}

/// What a dry run would have uploaded
#[derive(Debug, Clone)]
pub struct DryRunSummary {
    pub package_name: String,
    pub size: u64,
    pub checksums: Checksums,
    pub channel: Channel,
}

/// The result of one publish attempt
#[derive(Debug)]
pub enum PublishOutcome {
    Published(PublishReceipt),
    DryRun(DryRunSummary),
}

/// One publish attempt's inputs
#[derive(Debug)]
pub struct PublishRequest<'a> {
    pub package: Package,
    pub blueprint: &'a Blueprint,
    pub channel: Channel,
    pub release_notes: Option<String>,
    pub dry_run: bool,
    pub timeout: Duration,
}

/// Publishes packages to one marketplace registry
pub struct Publisher {
    registry_url: String,
}

impl Publisher {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
        }
    }

    /// Publish a package, or simulate the upload when `dry_run` is set.
    ///
    /// The package file is removed before this returns, on every path.
    pub async fn publish(
        &self,
        request: PublishRequest<'_>,
    ) -> Result<PublishOutcome, PublishError> {
        if request.dry_run {
            tracing::info!(
                package = %request.package.path.display(),
                channel = %request.channel,
                "dry run: skipping registry upload"
            );
            let summary = DryRunSummary {
                package_name: request.package.file_name(),
                size: request.package.size,
                checksums: request.package.checksums.clone(),
                channel: request.channel,
            };
            remove_package(&request.package.path);
            return Ok(PublishOutcome::DryRun(summary));
        }

        let result = self.upload(&request).await;

        // The package file is never a durable artifact of a publish
        // attempt, failed or not.
        remove_package(&request.package.path);

        result.map(PublishOutcome::Published)
    }

    async fn upload(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
        let package = &request.package;

        let bytes =
            tokio::fs::read(&package.path)
                .await
                .map_err(|source| PublishError::PackageRead {
                    context: package.path.display().to_string(),
                    source,
                })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("dashforge/", env!("CARGO_PKG_VERSION")))
            .timeout(request.timeout)
            .build()
            .map_err(|e| PublishError::Upload(e.to_string()))?;

        let blueprint_json = serde_json::to_string(request.blueprint)
            .map_err(|e| PublishError::Upload(format!("blueprint serialization failed: {e}")))?;
        let metadata = serde_json::json!({
            "size": package.size,
            "checksums": package.checksums,
        });

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(package.file_name())
            .mime_str("application/gzip")
            .map_err(|e| PublishError::Upload(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("package", part)
            .text("blueprint", blueprint_json)
            .text("channel", request.channel.to_string())
            .text("metadata", metadata.to_string());
        if let Some(notes) = &request.release_notes {
            form = form.text("releaseNotes", notes.clone());
        }

        let base = self.registry_url.trim_end_matches('/');
        let url = format!("{base}/api/v1/packages");

        tracing::info!(url = %url, channel = %request.channel, "uploading package to registry");

        let response = client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout(request.timeout)
                } else {
                    PublishError::Upload(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UploadResponse {
            package_id: String,
            #[serde(default)]
            url: Option<String>,
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| PublishError::MalformedResponse(e.to_string()))?;

        let marketplace_url = upload
            .url
            .unwrap_or_else(|| format!("{base}/packages/{}", upload.package_id));

        tracing::info!(package_id = %upload.package_id, "package published");

        Ok(PublishReceipt {
            package_id: upload.package_id,
            marketplace_url,
            channel: request.channel,
        })
    }
}

fn remove_package(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(package = %path.display(), "removed local package file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(package = %path.display(), error = %e, "failed to remove package file")
        }
    }
}

#[cfg(test)]
mod publish_tests {
    use super::*;
    use crate::build::{build, BuildOptions};
    use crate::package::package;
    use serde_json::json;
    use tempfile::TempDir;

    fn packaged(temp_dir: &TempDir) -> (Package, Blueprint) {
        let doc = json!({
            "version": "2.0.0",
            "title": "Checkout Funnel",
            "datasource": "supabase",
            "charts": [
                {"id": "funnel", "type": "funnel", "query": "SELECT step, count FROM checkout"}
            ]
        });
        let artifact = build(&doc, &BuildOptions::new(temp_dir.path().join("out"))).unwrap();
        let pkg = package(&artifact.dir, &artifact.blueprint, temp_dir.path()).unwrap();
        (pkg, artifact.blueprint)
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("stable".parse::<Channel>().unwrap(), Channel::Stable);
        assert_eq!("dev".parse::<Channel>().unwrap(), Channel::Dev);
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let err = "production".parse::<Channel>().unwrap_err();
        assert!(matches!(err, PublishError::InvalidChannel(_)));
        assert!(err.to_string().contains("production"));
    }

    #[test]
    fn test_promotion_advisory_only_for_non_stable() {
        assert!(Channel::Stable.promotion_advisory().is_none());
        let advisory = Channel::Beta.promotion_advisory().unwrap();
        assert!(advisory.contains("promote to stable"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_network_and_removes_package() {
        let temp_dir = TempDir::new().unwrap();
        let (pkg, blueprint) = packaged(&temp_dir);
        let package_path = pkg.path.clone();

        // An unroutable registry proves no network call happens: a dry
        // run against it still succeeds.
        let publisher = Publisher::new("http://127.0.0.1:1");
        let outcome = publisher
            .publish(PublishRequest {
                package: pkg,
                blueprint: &blueprint,
                channel: Channel::Beta,
                release_notes: None,
                dry_run: true,
                timeout: DEFAULT_PUBLISH_TIMEOUT,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, PublishOutcome::DryRun(_)));
        assert!(!package_path.exists());
    }

    #[tokio::test]
    async fn test_failed_upload_removes_package() {
        let temp_dir = TempDir::new().unwrap();
        let (pkg, blueprint) = packaged(&temp_dir);
        let package_path = pkg.path.clone();

        let publisher = Publisher::new("http://127.0.0.1:1");
        let result = publisher
            .publish(PublishRequest {
                package: pkg,
                blueprint: &blueprint,
                channel: Channel::Stable,
                release_notes: Some("first release".to_string()),
                dry_run: false,
                timeout: Duration::from_secs(2),
            })
            .await;

        assert!(result.is_err());
        assert!(!package_path.exists());
    }
}
