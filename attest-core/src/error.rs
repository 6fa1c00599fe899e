//! Error types for attestation verification.
//!
//! Every error is fatal to the current request; there is no internal
//! recovery. The `Display` strings are the fixed operator-facing messages
//! attached to non-2xx responses, so they must not leak internal state
//! beyond what they already say.

use thiserror::Error;

/// Errors that can occur while verifying an attestation message.
#[derive(Debug, Error)]
pub enum AttestError {
    // ---- decode -------------------------------------------------------

    /// The message declares a protocol version newer than this server.
    #[error("unsupported protocol version: {version}")]
    UnsupportedVersion {
        /// Version byte from the wire.
        version: u8,
    },

    /// The compressed certificate chain inflates past the fixed budget.
    #[error("certificate chain is too large")]
    ChainTooLarge,

    /// The message ends before a field it promises.
    #[error("truncated attestation message")]
    TruncatedMessage,

    /// The OS-enforced flag byte is internally inconsistent.
    #[error("invalid device administrator state")]
    InvalidFlags,

    // ---- certificate chain --------------------------------------------

    /// The chain does not have the length required by this protocol version.
    #[error("currently only support certificate chains with length 4, got {length}")]
    UnsupportedChainLength {
        /// Number of certificates presented (root included).
        length: usize,
    },

    /// A certificate in the chain is not parseable DER.
    #[error("certificate {index} in the chain failed to parse")]
    CertificateParse {
        /// Index into the chain, leaf first.
        index: usize,
    },

    /// A certificate is outside its validity window.
    #[error("certificate {index} in the chain is expired or not yet valid")]
    CertExpired {
        /// Index into the chain, leaf first.
        index: usize,
    },

    /// A certificate is not signed by its successor in the chain.
    #[error("failed to verify signature of certificate {index} in the chain")]
    InvalidSignatureInChain {
        /// Index into the chain, leaf first.
        index: usize,
    },

    /// The last certificate is not the pinned Google attestation root.
    #[error("root certificate is not the Google key attestation root")]
    RootMismatch,

    // ---- attestation extension ----------------------------------------

    /// The leaf certificate carries no key-attestation extension.
    #[error("no key attestation extension in leaf certificate")]
    ExtensionMissing,

    /// The key-attestation extension is not well-formed.
    #[error("malformed key attestation extension: {reason}")]
    ExtensionMalformed {
        /// What the parser tripped over.
        reason: String,
    },

    // ---- policy ---------------------------------------------------------

    /// The attestation challenge was never issued or was already consumed.
    #[error("challenge not pending")]
    ChallengeNotPending,

    /// The attesting app is not the attestation app.
    #[error("wrong attestation app package name or package count")]
    WrongApp,

    /// The attestation app is below the minimum supported version.
    #[error("attestation app is too old")]
    AppTooOld,

    /// The attestation app is not signed with a known release key.
    #[error("wrong attestation app signature digest")]
    WrongAppSignature,

    /// The OS is below the minimum supported version.
    #[error("OS version too old")]
    OsTooOld,

    /// The OS security patch level is below the minimum.
    #[error("OS patch level too old")]
    PatchTooOld,

    /// The attestation carries no root of trust.
    #[error("missing root of trust")]
    RootOfTrustMissing,

    /// The bootloader is unlocked.
    #[error("device is not locked")]
    DeviceNotLocked,

    /// Verified boot finished in a state other than Verified or SelfSigned.
    #[error("verified boot state is not verified or self signed")]
    UnknownVerifiedBootState,

    /// The verified boot key fingerprint maps to no known device.
    #[error("invalid verified boot key fingerprint")]
    UnknownDevice,

    /// The attested key was imported rather than generated in hardware.
    #[error("not a generated key")]
    KeyNotGenerated,

    /// The attested key is usable by apps other than the attestation app.
    #[error("expected key only usable by attestation app")]
    KeyNotAppBound,

    /// The device requires rollback resistance but the key lacks it.
    #[error("expected rollback resistant key")]
    KeyNotRollbackResistant,

    /// The attestation format version is below the device's floor.
    #[error("attestation version below the minimum for this device")]
    AttestationVersionTooLow,

    /// The keymaster version is below the device's floor.
    #[error("keymaster version below the minimum for this device")]
    KeymasterVersionTooLow,

    /// Attestation or keymaster runs at software security level.
    #[error("attestation or keymaster security level is not the trusted environment")]
    SoftwareSecurityLevel,

    // ---- pairing --------------------------------------------------------

    /// An intermediate certificate differs from the pinned chain.
    #[error("certificate chain mismatch")]
    ChainMismatch,

    /// The stored pairing data does not hash to the claimed fingerprint.
    #[error("corrupt pairing data")]
    CorruptPairingData,

    /// The verified boot key changed since pairing.
    #[error("pinned verified boot key mismatch")]
    BootKeyChanged,

    /// The OS version went backward since the last verification.
    #[error("OS version downgrade detected")]
    OsVersionDowngrade,

    /// The OS patch level went backward since the last verification.
    #[error("OS patch level downgrade detected")]
    OsPatchDowngrade,

    /// The attestation app version went backward since the last verification.
    #[error("app version downgraded")]
    AppVersionDowngrade,

    /// The message references a persistent key this server has never pinned.
    #[error(
        "Pairing data for this Auditee is missing. Cannot perform paired attestation.\n\
         \nEither the initial pairing was incomplete or the device is compromised.\n\
         \nIf the initial pairing was simply not completed, clear the pairing data on \
         either the Auditee or the Auditor via the menu and try again.\n"
    )]
    PairingMissing,

    /// A pairing record already exists for this fingerprint.
    #[error("pairing record already exists")]
    PairingExists,

    /// The outer signature over the signed message does not verify.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    // ---- resource -------------------------------------------------------

    /// The store is contended past the busy timeout.
    #[error("attestation store is busy")]
    StoreBusy,

    /// Any other store failure.
    #[error("attestation store failure: {message}")]
    StoreFailure {
        /// Underlying store error.
        message: String,
    },
}

impl AttestError {
    /// Whether the caller may retry the identical request.
    ///
    /// Only transient store contention qualifies; every other error is a
    /// property of the message or of the pinned state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreBusy)
    }
}

impl From<rusqlite::Error> for AttestError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                return Self::StoreBusy;
            }
        }
        Self::StoreFailure {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_protocol() {
        assert_eq!(
            AttestError::ChallengeNotPending.to_string(),
            "challenge not pending"
        );
        assert_eq!(
            AttestError::RootMismatch.to_string(),
            "root certificate is not the Google key attestation root"
        );
        assert_eq!(
            AttestError::OsPatchDowngrade.to_string(),
            "OS patch level downgrade detected"
        );
        assert_eq!(
            AttestError::UnsupportedVersion { version: 9 }.to_string(),
            "unsupported protocol version: 9"
        );
    }

    #[test]
    fn test_pairing_missing_keeps_operator_guidance() {
        let text = AttestError::PairingMissing.to_string();
        assert!(text.contains("initial pairing was incomplete"));
        assert!(text.contains("clear the pairing data"));
    }

    #[test]
    fn test_only_busy_is_transient() {
        assert!(AttestError::StoreBusy.is_transient());
        assert!(!AttestError::ChainTooLarge.is_transient());
        assert!(!AttestError::StoreFailure { message: "io".into() }.is_transient());
    }
}
