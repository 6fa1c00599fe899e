//! The verification orchestrator.
//!
//! Composes codec, chain verification, extension parsing, content policy,
//! and the pinning store into the two flows of the protocol:
//!
//! - **Pairing**: first contact from a device. The transmitted fingerprint
//!   must match the leaf certificate, whose key also signs the message; on
//!   success a pairing record pins the chain, the verified boot key, and
//!   the version floors.
//! - **Re-verification**: the fingerprint resolves to a pairing record. The
//!   intermediates must match the pinned chain byte for byte, the pinned
//!   certificate's key must sign the message, and the attested versions
//!   must not go backward.
//!
//! All database reads and writes of one request happen in a single
//! transaction, so a failed verification leaves no trace and the audit log
//! only ever records successes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use x509_parser::prelude::*;

use crate::chain::{self, google_root_der};
use crate::challenge::ChallengeStore;
use crate::codec::{self, FINGERPRINT_LENGTH};
use crate::error::AttestError;
use crate::extension;
use crate::pinning::{PairingRecord, PinningStore};
use crate::policy::{self, Verified};
use crate::report;

/// Successful verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the attestation was pinned against an existing pairing.
    pub strong: bool,
    /// TEE-enforced report text.
    pub tee_enforced: String,
    /// OS-enforced report text.
    pub os_enforced: String,
}

/// The attestation verification engine.
pub struct Verifier {
    challenges: Arc<ChallengeStore>,
    pinning: PinningStore,
    allow_debug_signature: bool,
}

impl Verifier {
    /// Create an engine over the given collaborators.
    ///
    /// Debug builds additionally accept the attestation app's debug signing
    /// key.
    #[must_use]
    pub fn new(challenges: Arc<ChallengeStore>, pinning: PinningStore) -> Self {
        Self {
            challenges,
            pinning,
            allow_debug_signature: cfg!(debug_assertions),
        }
    }

    /// Override acceptance of the attestation app's debug signing key.
    #[must_use]
    pub fn accept_debug_app_signature(mut self, accept: bool) -> Self {
        self.allow_debug_signature = accept;
        self
    }

    /// Verify a serialized attestation message against the current wall
    /// clock.
    #[instrument(skip_all, fields(len = data.len()))]
    pub fn verify_serialized(&self, data: &[u8]) -> Result<VerificationResult, AttestError> {
        self.verify_at(data, Utc::now())
    }

    /// Verify a serialized attestation message at an explicit time.
    ///
    /// `now` drives certificate validity checks, the pinned timestamps, and
    /// the report; injecting it keeps verification deterministic.
    pub fn verify_at(
        &self,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VerificationResult, AttestError> {
        let message = codec::decode(data)?;

        // The root never travels on the wire; the chain is completed with
        // the pinned root so downstream equality checks compare exact DER.
        let mut chain_der = message.chain;
        chain_der.push(google_root_der().to_vec());
        if chain_der.len() != chain::CHAIN_LENGTH {
            return Err(AttestError::UnsupportedChainLength {
                length: chain_der.len(),
            });
        }

        let fingerprint = message.persistent_key_fingerprint;
        let leaf_fingerprint: [u8; FINGERPRINT_LENGTH] = Sha256::digest(&chain_der[0]).into();

        let txn = self.pinning.begin()?;
        let record = txn.get(&fingerprint)?;
        let strong = record.is_some();
        debug!(strong, "pairing state resolved");

        match &record {
            Some(record) => {
                for (index, pinned) in record.pinned_certificates.iter().enumerate().skip(1) {
                    if &chain_der[index] != pinned {
                        return Err(AttestError::ChainMismatch);
                    }
                }
                let pinned_fingerprint: [u8; FINGERPRINT_LENGTH] =
                    Sha256::digest(&record.pinned_certificates[0]).into();
                if pinned_fingerprint != fingerprint {
                    return Err(AttestError::CorruptPairingData);
                }
                verify_outer_signature(
                    &record.pinned_certificates[0],
                    &message.signed_range,
                    &message.signature,
                )?;
            }
            None => {
                if leaf_fingerprint != fingerprint {
                    return Err(AttestError::PairingMissing);
                }
                verify_outer_signature(&chain_der[0], &message.signed_range, &message.signature)?;
            }
        }

        chain::verify_chain(&chain_der, google_root_der(), now.timestamp())?;

        let (_, leaf) = X509Certificate::from_der(&chain_der[0])
            .map_err(|_| AttestError::CertificateParse { index: 0 })?;
        let attestation = extension::parse_key_description(&leaf)?;
        let verified = policy::evaluate(&attestation, &self.challenges, self.allow_debug_signature)?;

        match &record {
            Some(record) => {
                check_continuity(record, &verified)?;
                txn.update_monotonic(
                    &fingerprint,
                    verified.os_version,
                    verified.os_patch_level,
                    verified.app_version,
                    now.timestamp_millis(),
                )?;
            }
            None => {
                txn.create(
                    &fingerprint,
                    [
                        chain_der[0].as_slice(),
                        chain_der[1].as_slice(),
                        chain_der[2].as_slice(),
                    ],
                    &verified.verified_boot_key,
                    verified.os_version,
                    verified.os_patch_level,
                    verified.app_version,
                    now.timestamp_millis(),
                )?;
            }
        }

        let tee_enforced = report::tee_enforced_report(&verified, now);
        let os_enforced =
            report::os_enforced_report(verified.app_version, message.os_enforced_flags);
        txn.append_audit(&fingerprint, strong, &tee_enforced, &os_enforced)?;
        txn.commit()?;

        info!(
            device = verified.device_name,
            strong,
            fingerprint = %hex::encode_upper(&fingerprint[..4]),
            "attestation verified"
        );

        Ok(VerificationResult {
            strong,
            tee_enforced,
            os_enforced,
        })
    }
}

/// Enforce the continuity invariants of an existing pairing: the verified
/// boot key never changes and the attested versions never go backward.
fn check_continuity(record: &PairingRecord, verified: &Verified) -> Result<(), AttestError> {
    if verified.verified_boot_key != record.pinned_verified_boot_key {
        return Err(AttestError::BootKeyChanged);
    }
    if verified.os_version < record.pinned_os_version {
        return Err(AttestError::OsVersionDowngrade);
    }
    if verified.os_patch_level < record.pinned_os_patch_level {
        return Err(AttestError::OsPatchDowngrade);
    }
    if verified.app_version < record.pinned_app_version {
        return Err(AttestError::AppVersionDowngrade);
    }
    Ok(())
}

/// Verify the outer SHA256-with-ECDSA signature over the signed range.
///
/// The verifying key comes from the certificate's subject public key; the
/// catalog devices all attest with P-256 keys.
fn verify_outer_signature(
    cert_der: &[u8],
    signed_range: &[u8],
    signature: &[u8],
) -> Result<(), AttestError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|_| AttestError::CertificateParse { index: 0 })?;
    let key = VerifyingKey::from_sec1_bytes(&cert.tbs_certificate.subject_pki.subject_public_key.data)
        .map_err(|_| AttestError::SignatureVerificationFailed)?;
    let signature =
        Signature::from_der(signature).map_err(|_| AttestError::SignatureVerificationFailed)?;
    key.verify(signed_range, &signature)
        .map_err(|_| AttestError::SignatureVerificationFailed)
}
