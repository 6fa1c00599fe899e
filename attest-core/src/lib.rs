//! # attest-core
//!
//! Server-side verification engine for the Auditor remote-attestation
//! protocol: a paired mobile Auditor forwards hardware key-attestation
//! evidence from an Auditee device; this crate verifies it and enforces
//! continuity against a per-device pairing record.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Verifier                             │
//! │                                                              │
//! │  raw bytes                                                   │
//! │      │                                                       │
//! │      ▼                                                       │
//! │  ┌────────┐   ┌──────────────┐   ┌───────────────────────┐   │
//! │  │ codec  │──▶│ chain verify │──▶│ extension → policy    │   │
//! │  │(DEFLATE│   │ (pinned root)│   │ (challenge, app, OS,  │   │
//! │  │ + frame)   └──────────────┘   │  boot state, device)  │   │
//! │  └────────┘                      └───────────────────────┘   │
//! │      │                                      │                │
//! │      ▼                                      ▼                │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │ PinningStore (SQLite, one transaction per request)   │    │
//! │  │  pair on first contact · pin chain + boot key ·      │    │
//! │  │  monotonic OS/patch/app versions · audit log         │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security properties
//!
//! - **Fresh evidence**: every attestation must embed a pending challenge;
//!   challenges are consumed at most once.
//! - **Hardware-rooted**: the certificate chain must end in the pinned
//!   Google attestation root and the leaf's key-attestation metadata must
//!   show a locked, verified device.
//! - **Continuity**: after pairing, the intermediate certificates and the
//!   verified boot key are immutable and OS/patch/app versions can only
//!   move forward.
//!
//! Trust policy (root certificate, device catalog, compression dictionary,
//! app signature digests) is compiled in; configuration cannot relax it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod challenge;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod extension;
pub mod pinning;
pub mod policy;
pub mod report;
pub mod verify;

pub use challenge::ChallengeStore;
pub use codec::{
    AttestationMessage, OsEnforcedFlags, CHALLENGE_LENGTH, CHALLENGE_MESSAGE_LENGTH,
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use config::ServerConfig;
pub use device::{DeviceDescriptor, OsVariant};
pub use error::AttestError;
pub use extension::{KeyDescription, KeyOrigin, SecurityLevel, VerifiedBootState};
pub use pinning::{AuditEntry, PairingRecord, PinningStore};
pub use policy::Verified;
pub use verify::{VerificationResult, Verifier};
