use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::{Result, TemplateError};

/// SHA-256 digests of the stock pattern images
pub const EXPECTED_HASHES: [(&str, &str); 5] = [
    ("Pattern.S8.jpg", "dc4b94a14ef3d3dad3fe9d5708b4f2702bed44be2a3ed0aef63e8405301b3562"),
    ("Pattern.R8.jpg", "ce7c81572bc0a03b079d655aab10ec16924c8d3b313087bd841cf68a6657fe9a"),
    ("Pattern_BW.jpg", "4a90371097219e5d5604c00bead6710b694e70b48fe66dbc5c2ce31ceedce4cf"),
    ("Pattern_WB.jpg", "60d50644f26407503267b763bcc48d7bec88dd6f58bb238cf9bec6ba86938f33"),
    ("Pattern_Corner_TR.jpg", "5e56a49c029013588646b11adbdc4a223217abfb91423dd3cdde26abbf5dcd9c"),
];

/// Hex SHA-256 of a byte slice
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check every stock pattern in `dir` against its known digest
///
/// A damaged pattern still "matches" somewhere, just at a meaningless
/// position, so this has to pass before any alignment runs.
pub fn verify_integrity<P: AsRef<Path>>(dir: P) -> Result<()> {
    verify_against(dir.as_ref(), &EXPECTED_HASHES)
}

pub(crate) fn verify_against(dir: &Path, expected: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();
    let mut invalid = Vec::new();

    for (name, digest) in expected {
        let path = dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                if compute_hash(&bytes) != *digest {
                    invalid.push(name.to_string());
                }
            }
            Err(_) => missing.push(name.to_string()),
        }
    }

    if missing.is_empty() && invalid.is_empty() {
        info!("✅ Template files verified in {:?}", dir);
        Ok(())
    } else {
        error!(
            "Template integrity check failed in {:?}: missing {:?}, invalid {:?}",
            dir, missing, invalid
        );
        Err(TemplateError::Corrupt { missing, invalid }.into())
    }
}
