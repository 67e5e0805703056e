//! Build signing
//!
//! Computes an integrity signature over the canonical byte
//! representation of the emitted manifest and dependency lists, not over
//! arbitrary files, so signing stays deterministic across irrelevant
//! filesystem metadata. SHA-256 for the content digest, HMAC-SHA256 for
//! the signature itself.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::{DEPENDENCIES_FILE, MANIFEST_FILE};

type HmacSha256 = Hmac<Sha256>;

/// Signature record file name within an artifact directory
pub const SIGNATURE_FILE: &str = "signature.json";

/// Signing scheme version for future compatibility
pub const SIGNING_VERSION: u32 = 1;

/// The signature record written alongside the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// Signing scheme version
    pub version: u32,

    /// Signature algorithm identifier
    pub algorithm: String,

    /// SHA-256 digest of the signed payload
    pub payload_digest: String,

    /// HMAC-SHA256 signature of the payload
    pub signature: String,

    /// When the signature was produced (RFC 3339)
    pub signed_at: String,
}

/// Sign a build artifact directory and write `signature.json` into it
pub fn sign(artifact_dir: &Path) -> Result<SignatureRecord> {
    let payload = canonical_payload(artifact_dir)?;

    let digest = format!("sha256:{}", hex::encode(Sha256::digest(&payload)));
    let signature = compute_hmac(&payload)?;

    let record = SignatureRecord {
        version: SIGNING_VERSION,
        algorithm: "hmac-sha256".to_string(),
        payload_digest: digest,
        signature,
        signed_at: chrono::Utc::now().to_rfc3339(),
    };

    let path = artifact_dir.join(SIGNATURE_FILE);
    let content = serde_json::to_vec_pretty(&record).context("Failed to serialize signature")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write signature: {}", path.display()))?;

    tracing::info!(path = %path.display(), "signed build artifact");
    Ok(record)
}

/// Verify the signature record of an artifact directory.
///
/// Returns `false` when the signature file is missing or does not match
/// the current manifest and dependency bytes.
pub fn verify(artifact_dir: &Path) -> Result<bool> {
    let path = artifact_dir.join(SIGNATURE_FILE);
    if !path.exists() {
        return Ok(false);
    }

    let content = std::fs::read(&path)
        .with_context(|| format!("Failed to read signature: {}", path.display()))?;
    let record: SignatureRecord =
        serde_json::from_slice(&content).context("Failed to parse signature record")?;

    let payload = canonical_payload(artifact_dir)?;
    verify_hmac(&payload, &record.signature)
}

/// The canonical signed payload: manifest bytes, a separator, then
/// dependency-list bytes
fn canonical_payload(artifact_dir: &Path) -> Result<Vec<u8>> {
    let manifest_path = artifact_dir.join(MANIFEST_FILE);
    let mut payload = std::fs::read(&manifest_path)
        .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;

    payload.push(b'\n');

    let deps_path = artifact_dir.join(DEPENDENCIES_FILE);
    let deps = std::fs::read(&deps_path)
        .with_context(|| format!("Failed to read dependency lists: {}", deps_path.display()))?;
    payload.extend_from_slice(&deps);

    Ok(payload)
}

/// Derive the HMAC signing key from installation context.
///
/// Deterministic per installation without external key management.
fn derive_signing_key() -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"DASHFORGE_SIGNING_V1");

    // In test mode with the specific feature, use only deterministic
    // inputs for reproducible tests
    #[cfg(feature = "deterministic-tests")]
    {
        hasher.update(b"TEST_MODE_FIXED_KEY");
    }

    #[cfg(not(feature = "deterministic-tests"))]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            hasher.update(exe_path.to_string_lossy().as_bytes());
        }

        #[cfg(target_os = "linux")]
        {
            if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
                hasher.update(machine_id.trim().as_bytes());
            }
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(output) = std::process::Command::new("ioreg")
                .args(["-rd1", "-c", "IOPlatformExpertDevice"])
                .output()
            {
                hasher.update(&output.stdout);
            }
        }

        if let Ok(username) = std::env::var("USER").or_else(|_| std::env::var("USERNAME")) {
            hasher.update(username.as_bytes());
        }
    }

    let key_material = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&key_material);
    key
}

/// Compute HMAC-SHA256 for a payload using the derived signing key
fn compute_hmac(payload: &[u8]) -> Result<String> {
    let key = derive_signing_key();

    let mut mac =
        HmacSha256::new_from_slice(&key).context("Failed to create HMAC instance")?;
    mac.update(payload);
    let result = mac.finalize();

    Ok(format!("hmac-sha256:{}", hex::encode(result.into_bytes())))
}

/// Verify an HMAC-SHA256 signature
fn verify_hmac(payload: &[u8], signature: &str) -> Result<bool> {
    let hex_signature = signature.strip_prefix("hmac-sha256:").unwrap_or(signature);
    let signature_bytes = hex::decode(hex_signature).context("Failed to decode signature")?;

    let key = derive_signing_key();
    let mut mac =
        HmacSha256::new_from_slice(&key).context("Failed to create HMAC instance")?;
    mac.update(payload);

    // Constant-time comparison
    Ok(mac.verify_slice(&signature_bytes).is_ok())
}
