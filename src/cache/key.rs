use serde::Serialize;

use crate::error::Result;

/// Derives a cache key from the JSON form of `identity`, e.g. an ordered file
/// list. Equal identities give equal keys across runs and machines.
pub fn stable_key<T: Serialize + ?Sized>(prefix: &str, identity: &T) -> Result<String> {
    let bytes = serde_json::to_vec(identity)?;
    let digest = blake3::hash(&bytes).to_hex();
    Ok(format!("{prefix}-{}.cache", &digest[..32]))
}
