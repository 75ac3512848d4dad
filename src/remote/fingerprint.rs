//! Content fingerprints for transfer validation.

use crate::error::{Result, ScribeError};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// A content-derived check value, written as `sha1:<hex>` or `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Fingerprint {
    Sha1(String),
    Sha256(String),
}

impl Fingerprint {
    pub fn hex(&self) -> &str {
        match self {
            Fingerprint::Sha1(hex) | Fingerprint::Sha256(hex) => hex,
        }
    }

    /// Compute a fingerprint of the same algorithm over `path`.
    pub fn compute_like(&self, path: &Path) -> Result<Fingerprint> {
        let mut hasher = FingerprintHasher::like(self);
        hash_file(path, &mut hasher)?;
        Ok(hasher.finish())
    }

    /// SHA-256 of a file.
    pub fn sha256_of(path: &Path) -> Result<Fingerprint> {
        let mut hasher = FingerprintHasher::Sha256(Sha256::new());
        hash_file(path, &mut hasher)?;
        Ok(hasher.finish())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Sha1(hex) => write!(f, "sha1:{hex}"),
            Fingerprint::Sha256(hex) => write!(f, "sha256:{hex}"),
        }
    }
}

impl FromStr for Fingerprint {
    type Err = ScribeError;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| ScribeError::validation(format!("fingerprint without algorithm: {s}")))?;
        let hex = hex.trim().to_ascii_lowercase();
        let expected_len = match algo {
            "sha1" => 40,
            "sha256" => 64,
            other => {
                return Err(ScribeError::validation(format!(
                    "unsupported fingerprint algorithm: {other}"
                )));
            }
        };
        if hex.len() != expected_len || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ScribeError::validation(format!("malformed {algo} digest: {hex}")));
        }
        Ok(match algo {
            "sha1" => Fingerprint::Sha1(hex),
            _ => Fingerprint::Sha256(hex),
        })
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ScribeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_string()
    }
}

/// Incremental hasher matching a [`Fingerprint`] algorithm.
pub enum FingerprintHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl FingerprintHasher {
    pub fn like(fingerprint: &Fingerprint) -> Self {
        match fingerprint {
            Fingerprint::Sha1(_) => FingerprintHasher::Sha1(Sha1::new()),
            Fingerprint::Sha256(_) => FingerprintHasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            FingerprintHasher::Sha1(h) => h.update(bytes),
            FingerprintHasher::Sha256(h) => h.update(bytes),
        }
    }

    pub fn finish(self) -> Fingerprint {
        match self {
            FingerprintHasher::Sha1(h) => Fingerprint::Sha1(format!("{:x}", h.finalize())),
            FingerprintHasher::Sha256(h) => Fingerprint::Sha256(format!("{:x}", h.finalize())),
        }
    }
}

fn hash_file(path: &Path, hasher: &mut FingerprintHasher) -> Result<()> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}
