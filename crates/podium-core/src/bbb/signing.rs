//! Request checksums.
//!
//! A request is authenticated by a hex digest over
//! `resource || canonical(params) || secret`. Outbound requests are signed
//! with SHA-256. Inbound verification accepts both SHA-1 (legacy clients)
//! and SHA-256, selected by the length of the provided digest.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::params::Params;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("request carries no checksum")]
    Missing,

    #[error("checksum does not match")]
    Mismatch,
}

/// Compute the SHA-256 checksum for a resource, parameter map and secret.
pub fn checksum(resource: &str, params: &Params, secret: &str) -> String {
    let material = signed_material(resource, params, secret);
    hex::encode(Sha256::digest(material.as_bytes()))
}

/// Verify a provided checksum against the signed material.
///
/// The digest function is chosen by the length of the provided value:
/// 40 hex characters select SHA-1, 64 select SHA-256. Anything else fails.
/// Comparison is constant-time.
pub fn verify(
    resource: &str,
    params: &Params,
    secret: &str,
    provided: &str,
) -> Result<(), ChecksumError> {
    let material = signed_material(resource, params, secret);
    let expected = match provided.len() {
        40 => hex::encode(Sha1::digest(material.as_bytes())),
        64 => hex::encode(Sha256::digest(material.as_bytes())),
        _ => return Err(ChecksumError::Mismatch),
    };

    if constant_time_str_eq(&expected, &provided.to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(ChecksumError::Mismatch)
    }
}

/// Constant-time string comparison for checksum digests.
///
/// The length check short-circuits, which is fine: digest lengths are
/// public knowledge, only the digest bytes are secret-derived.
fn constant_time_str_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

fn signed_material(resource: &str, params: &Params, secret: &str) -> String {
    format!("{resource}{}{secret}", params.canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "639259d4-9dd8-4b25-bf01-95f9567eaf4b";

    fn create_params() -> Params {
        Params::from([
            ("name", "Test Meeting"),
            ("meetingID", "abc123"),
            ("attendeePW", "111222"),
            ("moderatorPW", "333444"),
        ])
    }

    #[test]
    fn sign_create_request() {
        assert_eq!(
            checksum("create", &create_params(), SECRET),
            "94ec9a89c7dc53af01537aef9f8ecbae5e95cd7f37cd4bf18101b976a4a8b097"
        );
    }

    #[test]
    fn sign_empty_params() {
        assert_eq!(
            checksum("create", &Params::new(), SECRET),
            "272c9555258496a3f19c5ad8f599af2a4ebec031381ff1e37b34842c42c12284"
        );
    }

    #[test]
    fn verify_accepts_legacy_sha1() {
        let result = verify(
            "create",
            &create_params(),
            SECRET,
            "0b89c2ebcfefb76772cbcf19386c33561f66f6ae",
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn verify_accepts_sha256() {
        let digest = checksum("create", &create_params(), SECRET);
        assert_eq!(verify("create", &create_params(), SECRET, &digest), Ok(()));
    }

    #[test]
    fn verify_rejects_wrong_checksum() {
        assert_eq!(
            verify("create", &create_params(), SECRET, "foob4r"),
            Err(ChecksumError::Mismatch)
        );
    }

    #[test]
    fn verify_rejects_odd_digest_length() {
        let digest = checksum("create", &create_params(), SECRET);
        assert_eq!(
            verify("create", &create_params(), SECRET, &digest[..63]),
            Err(ChecksumError::Mismatch)
        );
    }

    #[test]
    fn checksum_excludes_existing_checksum_param() {
        let mut params = create_params();
        let plain = checksum("create", &params, SECRET);
        params.set("checksum", "r3m0v3M3");
        assert_eq!(checksum("create", &params, SECRET), plain);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            // Signing only depends on the mapping, not on insertion order.
            #[test]
            fn sign_is_order_independent(
                pairs in proptest::collection::vec(("[a-zA-Z]{1,8}", "[ -~]{0,16}"), 0..8)
            ) {
                let forward: Params =
                    pairs.iter().cloned().collect();
                let reverse: Params =
                    pairs.iter().rev().cloned().collect();
                prop_assert_eq!(
                    checksum("create", &forward, "s3cr3t"),
                    checksum("create", &reverse, "s3cr3t")
                );
            }

            // A signed request always verifies with the same secret.
            #[test]
            fn sign_verify_roundtrip(
                pairs in proptest::collection::vec(("[a-z]{1,8}", "[ -~]{0,16}"), 0..8),
                secret in "[a-zA-Z0-9-]{8,36}"
            ) {
                let params: Params = pairs.into_iter().collect();
                let digest = checksum("join", &params, &secret);
                prop_assert_eq!(verify("join", &params, &secret, &digest), Ok(()));
            }
        }
    }
}
