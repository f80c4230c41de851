//! Signed entry credentials.
//!
//! A credential is a short `|`-delimited ASCII string asserting a subject
//! identity, rendered as a QR code by the client. The canonical format is
//! time-boxed: `subject_id|issued_at|signature`, where the signature is the
//! full lowercase-hex HMAC-SHA256 over `"{subject_id}|{issued_at}"`. The
//! compact format `subject_id|signature` carries no timestamp (its validity
//! is anchored to the identity's own expiry) and truncates the base64url
//! digest to [`COMPACT_SIGNATURE_CHARS`] characters to keep the QR payload
//! small.
//!
//! The codec is pure: the current time is always an argument, never read
//! from the environment, and no I/O happens here.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default validity window for time-boxed credentials, in seconds.
pub const DEFAULT_VALIDITY_SECONDS: i64 = 300;

/// Signature length of the compact format, in unpadded base64url characters.
///
/// 12 characters encode 9 bytes of the digest, above the 8-byte floor for a
/// truncated MAC. Received signatures of any other length are rejected
/// before comparison.
pub const COMPACT_SIGNATURE_CHARS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat {
    /// `subject_id|issued_at|hex_hmac_sha256`, full-length signature.
    TimeBoxed,
    /// `subject_id|base64url_hmac_prefix`, no embedded timestamp.
    Compact,
}

impl std::str::FromStr for TokenFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timeboxed" | "time-boxed" => Ok(Self::TimeBoxed),
            "compact" => Ok(Self::Compact),
            other => Err(format!("invalid token format: {other}")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    BadSignature,
}

/// Issues and verifies entry credentials with an injected secret key.
#[derive(Debug, Clone)]
pub struct PassCodec {
    secret: SecretString,
    format: TokenFormat,
    validity_seconds: i64,
}

impl PassCodec {
    #[must_use]
    pub fn new(secret: SecretString, format: TokenFormat, validity_seconds: i64) -> Self {
        Self {
            secret,
            format,
            validity_seconds,
        }
    }

    #[must_use]
    pub fn format(&self) -> TokenFormat {
        self.format
    }

    /// Build a signed credential for `subject_id` at the given clock reading.
    #[must_use]
    pub fn issue(&self, subject_id: i64, now_unix_seconds: i64) -> String {
        match self.format {
            TokenFormat::TimeBoxed => {
                let message = format!("{subject_id}|{now_unix_seconds}");
                let signature = hex::encode(self.sign(&message));
                format!("{message}|{signature}")
            }
            TokenFormat::Compact => {
                let message = subject_id.to_string();
                let digest = Base64UrlUnpadded::encode_string(&self.sign(&message));
                format!("{message}|{}", &digest[..COMPACT_SIGNATURE_CHARS])
            }
        }
    }

    /// Verify a credential and return the subject id it asserts.
    ///
    /// No identity lookup happens here; a syntactically valid token for a
    /// subject that does not exist verifies fine and is rejected downstream.
    ///
    /// # Errors
    ///
    /// - `Malformed`: wrong field count, or `subject_id`/`issued_at` are not
    ///   integers.
    /// - `Expired`: the token is older than the validity window, or claims
    ///   to be issued in the future (no negative-age tolerance).
    /// - `BadSignature`: the recomputed signature does not match under
    ///   constant-time comparison.
    pub fn verify(&self, token: &str, now_unix_seconds: i64) -> Result<i64, TokenError> {
        match self.format {
            TokenFormat::TimeBoxed => self.verify_time_boxed(token, now_unix_seconds),
            TokenFormat::Compact => self.verify_compact(token),
        }
    }

    fn verify_time_boxed(&self, token: &str, now_unix_seconds: i64) -> Result<i64, TokenError> {
        let mut parts = token.split('|');
        let subject = parts.next().ok_or(TokenError::Malformed)?;
        let issued = parts.next().ok_or(TokenError::Malformed)?;
        let signature = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let subject_id: i64 = subject.parse().map_err(|_| TokenError::Malformed)?;
        let issued_at: i64 = issued.parse().map_err(|_| TokenError::Malformed)?;

        let age = now_unix_seconds - issued_at;
        if age > self.validity_seconds || age < 0 {
            return Err(TokenError::Expired);
        }

        // Recompute over the fields as received, not their re-rendered form.
        let message = format!("{subject}|{issued}");
        let expected = hex::encode(self.sign(&message));
        if signatures_match(signature.as_bytes(), expected.as_bytes()) {
            Ok(subject_id)
        } else {
            Err(TokenError::BadSignature)
        }
    }

    fn verify_compact(&self, token: &str) -> Result<i64, TokenError> {
        let mut parts = token.split('|');
        let subject = parts.next().ok_or(TokenError::Malformed)?;
        let signature = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let subject_id: i64 = subject.parse().map_err(|_| TokenError::Malformed)?;

        // The comparison length is fixed by configuration; clients do not get
        // to pick how much of the digest they have to forge.
        if signature.len() != COMPACT_SIGNATURE_CHARS {
            return Err(TokenError::BadSignature);
        }

        let digest = Base64UrlUnpadded::encode_string(&self.sign(subject));
        let expected = &digest[..COMPACT_SIGNATURE_CHARS];
        if signatures_match(signature.as_bytes(), expected.as_bytes()) {
            Ok(subject_id)
        } else {
            Err(TokenError::BadSignature)
        }
    }

    fn sign(&self, message: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Constant-time signature comparison; never short-circuits on a mismatch.
fn signatures_match(received: &[u8], expected: &[u8]) -> bool {
    received.ct_eq(expected).into()
}
