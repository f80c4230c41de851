//! # Pordisto (Biometric Access Control Gateway)
//!
//! `pordisto` guards a physical entry point. A principal presents a rotating
//! QR credential together with a live face image; the gateway checks the
//! credential's HMAC signature and validity window, resolves the claimed
//! identity, scores the live image against the identity's enrolled face
//! embedding, and renders an Allow/Deny decision. Every attempt, whatever
//! its outcome, lands exactly once in the append-only entry log.
//!
//! ## Split of responsibilities
//!
//! - [`gate`] is the decision core: token codec, similarity matcher,
//!   embedding-extractor capability, identity/audit store contracts, and the
//!   entry-decision engine.
//! - [`api`] is the thin HTTP surface over the core (axum).
//! - [`cli`] parses configuration and boots telemetry.
//!
//! Face embeddings are produced by an external face-analysis sidecar; the
//! gateway never runs model inference in-process.

pub mod api;
pub mod cli;
pub mod gate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
