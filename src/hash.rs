//! Disk-list fingerprinting
//!
//! The operator detects changes to an SPC's declared disk set by comparing
//! a fingerprint stored in the `openebs.io/csp-disk-hash` annotation against
//! a freshly computed one. The fingerprint is the lowercase hex MD5 of the
//! canonical JSON encoding of the value. It is a change detector, not a
//! security property.

use md5::{Digest, Md5};
use serde::Serialize;

use crate::error::Result;

/// Lowercase hex MD5 over the canonical JSON encoding of `value`.
///
/// `serde_json` serializes struct fields in declaration order, so equal
/// values always produce equal digests regardless of how they were built.
pub fn hash<T: Serialize>(value: &T) -> Result<String> {
    let encoded = serde_json::to_vec(value)?;
    let digest = Md5::digest(&encoded);
    Ok(hex::encode(digest))
}
