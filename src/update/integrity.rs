use sha2::{Digest, Sha256, Sha512};
use log::{info, warn, error};

/// Result of checking a firmware image against its published checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityOutcome {
    /// Digest matched the published checksum
    Verified,
    /// No checksum was published; integrity could not be established
    Unverified,
    /// The image must not be flashed
    Rejected(IntegrityFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    WeakAlgorithm(String),
    UnsupportedAlgorithm(String),
    MalformedChecksum,
    Mismatch { expected: String, computed: String },
}

impl IntegrityOutcome {
    /// Whether the image may proceed to flashing
    pub fn passed(&self) -> bool {
        !matches!(self, IntegrityOutcome::Rejected(_))
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, IntegrityOutcome::Verified)
    }
}

/// Validate `data` against `checksum` using the named algorithm.
///
/// Only SHA-256 and SHA-512 are accepted. MD5 and SHA-1 are refused even when
/// the digest would match.
pub fn validate(data: &[u8], checksum: Option<&str>, checksum_type: Option<&str>) -> IntegrityOutcome {
    let (Some(expected), Some(kind)) = (checksum, checksum_type) else {
        warn!(
            "No checksum provided for firmware validation. Firmware integrity cannot be \
             verified; the image could be corrupted or tampered with."
        );
        return IntegrityOutcome::Unverified;
    };
    if expected.is_empty() || kind.is_empty() {
        warn!("Empty checksum provided for firmware validation. Firmware integrity cannot be verified.");
        return IntegrityOutcome::Unverified;
    }

    let kind = kind.to_ascii_lowercase();
    let computed = match kind.as_str() {
        "md5" | "sha1" | "sha-1" => {
            error!(
                "SECURITY: Rejecting firmware with {} checksum. It is cryptographically broken; \
                 only SHA256 and SHA512 are accepted.",
                kind.to_uppercase()
            );
            return IntegrityOutcome::Rejected(IntegrityFailure::WeakAlgorithm(kind));
        }
        "sha256" => hex::encode(Sha256::digest(data)),
        "sha512" => hex::encode(Sha512::digest(data)),
        _ => {
            error!("Unsupported checksum type: {}. Only SHA256 and SHA512 are supported.", kind);
            return IntegrityOutcome::Rejected(IntegrityFailure::UnsupportedAlgorithm(kind));
        }
    };

    let expected = expected.trim().to_ascii_lowercase();
    if expected.len() != computed.len() || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
        error!("Malformed {} checksum in release notes: {}", kind, expected);
        return IntegrityOutcome::Rejected(IntegrityFailure::MalformedChecksum);
    }

    if expected != computed {
        error!(
            "Firmware checksum mismatch! Expected {}, got {}. Firmware may be corrupted or tampered with.",
            expected, computed
        );
        return IntegrityOutcome::Rejected(IntegrityFailure::Mismatch { expected, computed });
    }

    info!("Firmware checksum validated successfully using {}", kind);
    IntegrityOutcome::Verified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Vec<u8> {
        (0..4096u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_missing_checksum_is_unverified_but_passes() {
        let outcome = validate(&image(), None, None);
        assert_eq!(outcome, IntegrityOutcome::Unverified);
        assert!(outcome.passed());
        assert!(!outcome.is_verified());
        assert!(validate(&image(), Some("abc"), None).passed());
        assert!(validate(&image(), None, Some("sha256")).passed());
    }

    #[test]
    fn test_weak_algorithms_always_rejected() {
        let data = image();
        // md5 hex is 32 chars; the value does not matter, the algorithm does
        let md5_like = "0".repeat(32);
        assert!(!validate(&data, Some(&md5_like), Some("md5")).passed());
        assert!(!validate(&data, Some(&"0".repeat(40)), Some("SHA1")).passed());
    }

    #[test]
    fn test_sha256_match_and_bit_flip() {
        let mut data = image();
        let digest = hex::encode(Sha256::digest(&data));
        assert!(validate(&data, Some(&digest), Some("sha256")).is_verified());
        assert!(validate(&data, Some(&digest.to_uppercase()), Some("SHA256")).is_verified());

        data[100] ^= 0x01;
        let outcome = validate(&data, Some(&digest), Some("sha256"));
        assert!(matches!(outcome, IntegrityOutcome::Rejected(IntegrityFailure::Mismatch { .. })));
    }

    #[test]
    fn test_sha512_match() {
        let data = image();
        let digest = hex::encode(Sha512::digest(&data));
        assert!(validate(&data, Some(&digest), Some("sha512")).is_verified());
    }

    #[test]
    fn test_malformed_and_unknown_rejected() {
        let data = image();
        assert_eq!(
            validate(&data, Some("not-hex"), Some("sha256")),
            IntegrityOutcome::Rejected(IntegrityFailure::MalformedChecksum)
        );
        assert!(matches!(
            validate(&data, Some(&"0".repeat(64)), Some("crc32")),
            IntegrityOutcome::Rejected(IntegrityFailure::UnsupportedAlgorithm(_))
        ));
    }
}
