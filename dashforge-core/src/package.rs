//! Packaging
//!
//! Archives a built artifact directory into one distributable tar.gz
//! and computes its checksums. The archive walk is sorted and headers
//! are normalized (fixed mode, zero mtime), so packaging the same
//! artifact directory twice yields byte-identical output. Checksums are
//! computed over the archive bytes, not the uncompressed contents:
//! they describe exactly the bytes that will be transmitted.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::blueprint::Blueprint;

/// Checksum set describing a package file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub md5: String,
    pub sha256: String,
}

/// A packaged artifact, ready for upload
#[derive(Debug, Clone)]
pub struct Package {
    /// Path of the archive file
    pub path: PathBuf,

    /// Archive size in bytes
    pub size: u64,

    /// Checksums over the archive bytes
    pub checksums: Checksums,
}

impl Package {
    /// The archive file name
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Archive an artifact directory into `<slug>-<version>.tar.gz` under
/// `dest_dir`.
///
/// The whole directory is included, unfiltered. The archive is staged
/// in a temporary file and only persisted on success, so a failure
/// never leaves a partial package on disk.
pub fn package(artifact_dir: &Path, blueprint: &Blueprint, dest_dir: &Path) -> Result<Package> {
    let root = slugify(&blueprint.title);
    let file_name = format!("{root}-{}.tar.gz", blueprint.version);
    let final_path = dest_dir.join(&file_name);

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create package directory: {}", dest_dir.display()))?;

    let bytes = archive_bytes(artifact_dir, &root)?;

    let checksums = Checksums {
        md5: hex::encode(Md5::digest(&bytes)),
        sha256: hex::encode(Sha256::digest(&bytes)),
    };
    let size = bytes.len() as u64;

    let mut staging = tempfile::NamedTempFile::new_in(dest_dir)
        .context("Failed to create package staging file")?;
    staging
        .write_all(&bytes)
        .context("Failed to write package archive")?;
    staging
        .persist(&final_path)
        .with_context(|| format!("Failed to persist package: {}", final_path.display()))?;

    tracing::info!(
        package = %final_path.display(),
        size,
        sha256 = %checksums.sha256,
        "packaged build artifact"
    );

    Ok(Package {
        path: final_path,
        size,
        checksums,
    })
}

/// Build the tar.gz bytes for a directory, rooted under `root_name/`
fn archive_bytes(dir: &Path, root_name: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let encoder = GzEncoder::new(&mut bytes, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        append_dir(&mut builder, root_name, "")?;

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let rel = entry
                .path()
                .strip_prefix(dir)
                .context("Walked entry outside the artifact directory")?;
            if rel.as_os_str().is_empty() {
                continue;
            }
            let rel = rel.to_string_lossy();

            if entry.file_type().is_dir() {
                append_dir(&mut builder, root_name, &rel)?;
            } else if entry.file_type().is_file() {
                let data = std::fs::read(entry.path()).with_context(|| {
                    format!("Failed to read artifact file: {}", entry.path().display())
                })?;

                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(0);
                builder
                    .append_data(&mut header, format!("{root_name}/{rel}"), data.as_slice())
                    .context("Failed to append file to package archive")?;
            }
        }

        builder
            .into_inner()
            .context("Failed to finalize package archive")?
            .finish()
            .context("Failed to finish package compression")?;
    }

    Ok(bytes)
}

fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    root_name: &str,
    rel: &str,
) -> Result<()> {
    let path = if rel.is_empty() {
        format!("{root_name}/")
    } else {
        format!("{root_name}/{rel}/")
    };

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(0);
    builder
        .append_data(&mut header, path, std::io::empty())
        .context("Failed to append directory to package archive")?;
    Ok(())
}

/// Convert a dashboard title into a file-name-safe slug
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "dashboard".to_string()
    } else {
        slug.to_string()
    }
}
