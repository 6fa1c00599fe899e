//! Wire codec for the compact attestation message.
//!
//! Attestation message layout (big-endian multi-byte fields):
//!
//! ```text
//! signed message {
//!     byte  version = min(maxVersion, PROTOCOL_VERSION)
//!     short compressedChainLength
//!     byte[] compressedChain { [short encodedCertificateLength, byte[] encodedCertificate] }
//!     byte[] fingerprint (length: FINGERPRINT_LENGTH)
//!     byte  osEnforcedFlags
//! }
//! byte[] signature (rest of message)
//! ```
//!
//! The chain is compressed with raw DEFLATE (no zlib wrapper) against a
//! preset dictionary generated from sample certificates. The dictionary is
//! part of the protocol: it is not versioned separately from
//! [`PROTOCOL_VERSION`].
//!
//! The codec only splits framing. It does not look inside the certificates;
//! chain and content validation happen downstream.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use once_cell::sync::Lazy;

use crate::error::AttestError;

/// Highest protocol version this server understands.
pub const PROTOCOL_VERSION: u8 = 1;

/// Length in bytes of a challenge and of a challenge index.
pub const CHALLENGE_LENGTH: usize = 32;

/// Length in bytes of a SHA-256 certificate fingerprint.
pub const FINGERPRINT_LENGTH: usize = 32;

/// Hard upper bound on a serialized attestation message.
///
/// Enforced at the transport boundary before bytes reach the codec.
pub const MAX_MESSAGE_SIZE: usize = 2953;

/// Budget for the inflated certificate chain. Decompression that does not
/// finish within this many bytes is rejected.
pub const MAX_ENCODED_CHAIN_LENGTH: usize = 3000;

/// Length of the challenge message the server issues:
/// `[maxVersion, challenge index, challenge]`.
pub const CHALLENGE_MESSAGE_LENGTH: usize = 1 + 2 * CHALLENGE_LENGTH;

/// Preset DEFLATE dictionary, generated from sample attestation
/// certificates. Must be byte-identical on both ends of the protocol.
const DEFLATE_DICTIONARY_BASE64: &str = concat!(
    "MIICZjCCAg2gAwIBAgIBATAKBggqhkjOPQQDAjAbMRkwFwYDVQQFExBkNzc1MjM0ODY2ZjM3ZjUz",
    "MCAXDTE4MDIwNTAxNDM1OVoYDzIxMDYwMjA3MDYyODE1WjAfMR0wGwYDVQQDDBRBbmRyb2lkIEtl",
    "eXN0b3JlIEtleTBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABODxAGPDQUKeGN90LJ30XS5voSvK",
    "VvEj2a0UP7R6fOy+pob45fFAH1qvqqLv9J6Ajb7PZX7HTpanJ7uaIQ5wpRmjggE6MIIBNjAOBgNV",
    "HQ8BAf8EBAMCB4AwggEiBgorBgEEAdZ5AgERBIIBEjCCAQ4CAQIKAQECAQMKAQEEIHpMSeMQFv3g",
    "4qCffZTszv/WNaIc3ePgFDtbvAM/uwLvBAAwZr+DEAgCBgFhY6JZLr+FPQgCBgFhY6Meu7+FRUoE",
    "SDBGMSAwHgQZY28uY29wcGVyaGVhZC5hdHRlc3RhdGlvbgIBATEiBCAW9DOe5NbEQZ3vCP9JSfcq",
    "G5CR7Ymx/pRH8xqOO8y8bzB0oQgxBgIBAgIBA6IDAgEDowQCAgEApQUxAwIBBKoDAgEBv4N3AgUA",
    "v4U+AwIBAL+FPwIFAL+FQCowKAQgFxYW6u8mAJ/EbcbYnz0kIX6SbIGmfOZdLjqdwnBAx6sBAf8K",
    "AQC/hUEFAgMBOOS/hUIFAgMDFEkwCgYIKoZIzj0EAwIDRwAwRAIgRQm5K1AAPmPc5lcJm3sICuav",
    "Zfaf3RBuEZHHpmc17YoCIAroE4eLaP5edIVWDGYCR5dTgEY3TOkACdQsQvfZCOKaMIICKTCCAa+g",
    "AwIBAgIJaDkSRnQoRzlhMAoGCCqGSM49BAMCMBsxGTAXBgNVBAUTEDg3ZjQ1MTQ0NzViYTBhMmIw",
    "HhcNMTYwNTI2MTcwNzMzWhcNMjYwNTI0MTcwNzMzWjAbMRkwFwYDVQQFExBkNzc1MjM0ODY2ZjM3",
    "ZjUzMFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEqrXOysRNrb+GjpMdrmsXrqq+jyLaahkcgCo6",
    "rAROyYWOKaERvaFowtGsxkSfMSbqopj3qp//JBOW5iRrHRcp4KOB2zCB2DAdBgNVHQ4EFgQUL78c",
    "0llO0rDTlgtwnhdE3BoQUEswHwYDVR0jBBgwFoAUMEQj5aL2BuFQq3dfFha7kcxjxlkwDAYDVR0T",
    "AQH/BAIwADAOBgNVHQ8BAf8EBAMCB4AwJAYDVR0eBB0wG6AZMBeCFWludmFsaWQ7ZW1haWw6aW52",
    "YWxpZDBSBgNVHR8ESzBJMEegRaBDhkFodHRwczovL2FuZHJvaWQuZ29vZ2xlYXBpcy5jb20vYXR0",
    "ZXN0YXRpb24vY3JsLzY4MzkxMjQ2NzQyODQ3Mzk2MTAKBggqhkjOPQQDAgNoADBlAjA9rA4BW4Nt",
    "HoD3nXysHziKlLoAhCup8V4dNmWu6htIt43I3ANmVm7CzetNqgEjNPACMQCBuDKKwLOHBA9a/dHb",
    "9y8ApGZ+AU6StdxH/rHPYRFq84/5WOmUV7vPeFuRoMPe080wggPDMIIBq6ADAgECAgoDiCZnYGWJ",
    "loV1MA0GCSqGSIb3DQEBCwUAMBsxGTAXBgNVBAUTEGY5MjAwOWU4NTNiNmIwNDUwHhcNMTYwNTI2",
    "MTcwMTUxWhcNMjYwNTI0MTcwMTUxWjAbMRkwFwYDVQQFExA4N2Y0NTE0NDc1YmEwYTJiMHYwEAYH",
    "KoZIzj0CAQYFK4EEACIDYgAEZDtWaB0n+sSCz2wgTevO8ClcNQwBqowyfz7V9Emu9ClmQl85PYR2",
    "O12tVrENBFnGLGpPkyVWqJKTw9FOovHf7w48uiJyoyI54bK0faxVC6u8XKdV4qpIYorWPHb/Z9xy",
    "o4G2MIGzMB0GA1UdDgQWBBQwRCPlovYG4VCrd18WFruRzGPGWTAfBgNVHSMEGDAWgBQ2YeEAfIgF",
    "CVGLRGxH/xpMyepPEjAPBgNVHRMBAf8EBTADAQH/MA4GA1UdDwEB/wQEAwIBhjBQBgNVHR8ESTBH",
    "MEWgQ6BBhj9odHRwczovL2FuZHJvaWQuZ29vZ2xlYXBpcy5jb20vYXR0ZXN0YXRpb24vY3JsL0U4",
    "RkExOTYzMTREMkZBMTgwDQYJKoZIhvcNAQELBQADggIBAEA5ios2vJOZs6WeuOci8OhfHNos6AJe",
    "7b2XsqlsUdpxUvGBi4ZGIgRCrNkGpRhK30+DH4/Yq+ge3P32wRmvbFN7QPDoJMdMCbFZdQV2uW8Q",
    "ybYbJJ+8lF8w0K5fWghL8zk99ERjZhkfIur+yfWwmvcWNsox1QwGjkBxqZwPcfzCX07/qp+Ff7nu",
    "JfOgrrIzMlEb8yWSbnz+wWTSmNrJQFyGZQkvQVDoiEpiDLxEoTZQPJco4Tv5kxIxRSQB3PKfY8W/",
    "tO9C0OTSB7aaRWs2t89KCUzME2+tIMc8GZOS1fPCx5VqAhFPlYj3U6tQ5g8WCiy2x8fjaGznAm0A",
    "UY/AOD/WY1rxTIf2TVsytGrdKt7PVcbQm7tIY3+41fl2RzC98CZp22Yzs+n6XZUdFhFHrTSMBwzb",
    "7tuXx6Cp8z8Du/IMtmo8jEPCQtePZ4332clklVoZ8H10fIU6oGoEzpJ3JXoxIivcAeijq74FYhf3",
    "6ryfWqDkjolZ4R74rnxJtENWg1CCwo/3+I+u5cxTmubbLA/EgJUbKyXUaAA/4Undfqg/S1cVZCVi",
    "hZ1KWhJUc1lCqPZ6//r2wycaxN4nDVXsjSBH55k0R/F769kPgo/zwrG6I8J73iun4Cqzn9jC4Kjq",
    "tD4caLk5k0GxBdgi58KVIGN746mNBvscmCKEl3Ojb8gH",
);

static DEFLATE_DICTIONARY: Lazy<Vec<u8>> = Lazy::new(|| {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(DEFLATE_DICTIONARY_BASE64)
        .expect("compiled-in dictionary is valid base64")
});

/// The preset DEFLATE dictionary bytes.
///
/// Exposed so clients producing attestation messages can compress against
/// the same dictionary.
#[must_use]
pub fn deflate_dictionary() -> &'static [u8] {
    &DEFLATE_DICTIONARY
}

const FLAG_USER_PROFILE_SECURE: u8 = 1;
const FLAG_ACCESSIBILITY: u8 = 1 << 1;
const FLAG_DEVICE_ADMIN: u8 = 1 << 2;
const FLAG_ADB_ENABLED: u8 = 1 << 3;
const FLAG_ADD_USERS_WHEN_LOCKED: u8 = 1 << 4;
const FLAG_ENROLLED_FINGERPRINTS: u8 = 1 << 5;
const FLAG_DENY_NEW_USB: u8 = 1 << 6;
const FLAG_DEVICE_ADMIN_NON_SYSTEM: u8 = 1 << 7;

/// OS-enforced state bits reported by the Auditee.
///
/// These come from the OS rather than the TEE, so they are advisory: an
/// attacker with control over a verified OS could forge them. Unknown bits
/// are carried but ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsEnforcedFlags(u8);

impl OsEnforcedFlags {
    /// Wrap a raw flag byte, checking internal consistency.
    ///
    /// A non-system device administrator implies a device administrator;
    /// a byte claiming otherwise is rejected.
    pub fn from_bits(bits: u8) -> Result<Self, AttestError> {
        let flags = Self(bits);
        if flags.device_admin_non_system() && !flags.device_admin() {
            return Err(AttestError::InvalidFlags);
        }
        Ok(flags)
    }

    /// The raw flag byte.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// The user profile has a secure lock method.
    #[must_use]
    pub fn user_profile_secure(self) -> bool {
        self.0 & FLAG_USER_PROFILE_SECURE != 0
    }

    /// At least one accessibility service is enabled.
    #[must_use]
    pub fn accessibility(self) -> bool {
        self.0 & FLAG_ACCESSIBILITY != 0
    }

    /// At least one device administrator is enabled.
    #[must_use]
    pub fn device_admin(self) -> bool {
        self.0 & FLAG_DEVICE_ADMIN != 0
    }

    /// A non-system app holds device administration.
    #[must_use]
    pub fn device_admin_non_system(self) -> bool {
        self.0 & FLAG_DEVICE_ADMIN_NON_SYSTEM != 0
    }

    /// Android Debug Bridge is enabled.
    #[must_use]
    pub fn adb_enabled(self) -> bool {
        self.0 & FLAG_ADB_ENABLED != 0
    }

    /// Users can be added from the lock screen.
    #[must_use]
    pub fn add_users_when_locked(self) -> bool {
        self.0 & FLAG_ADD_USERS_WHEN_LOCKED != 0
    }

    /// Fingerprints are enrolled.
    #[must_use]
    pub fn enrolled_fingerprints(self) -> bool {
        self.0 & FLAG_ENROLLED_FINGERPRINTS != 0
    }

    /// New USB peripherals are denied while locked.
    #[must_use]
    pub fn deny_new_usb(self) -> bool {
        self.0 & FLAG_DENY_NEW_USB != 0
    }
}

/// A decoded attestation message.
///
/// `chain` holds the certificates carried on the wire, leaf first. The
/// trusted root is never transmitted; the orchestrator appends the pinned
/// root before chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationMessage {
    /// Negotiated protocol version.
    pub version: u8,
    /// DER certificates from the wire, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// SHA-256 fingerprint of the device's persistent attestation key.
    pub persistent_key_fingerprint: [u8; FINGERPRINT_LENGTH],
    /// OS-enforced state bits.
    pub os_enforced_flags: OsEnforcedFlags,
    /// The wire bytes covered by the signature: `[version … flags]`.
    pub signed_range: Vec<u8>,
    /// Signature over `signed_range` by the persistent key.
    pub signature: Vec<u8>,
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], AttestError> {
    let end = pos.checked_add(len).ok_or(AttestError::TruncatedMessage)?;
    if end > data.len() {
        return Err(AttestError::TruncatedMessage);
    }
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn take_u16(data: &[u8], pos: &mut usize) -> Result<u16, AttestError> {
    let bytes = take(data, pos, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Decode a serialized attestation message.
///
/// Rejects unknown protocol versions, oversized chains, truncation, and an
/// inconsistent flag byte. Certificate contents are not validated here.
pub fn decode(data: &[u8]) -> Result<AttestationMessage, AttestError> {
    let mut pos = 0;

    let version = take(data, &mut pos, 1)?[0];
    if version > PROTOCOL_VERSION {
        return Err(AttestError::UnsupportedVersion { version });
    }

    let compressed_len = take_u16(data, &mut pos)? as usize;
    let compressed = take(data, &mut pos, compressed_len)?;
    let encoded = inflate_chain(compressed)?;
    let chain = split_chain(&encoded)?;

    let mut persistent_key_fingerprint = [0u8; FINGERPRINT_LENGTH];
    persistent_key_fingerprint.copy_from_slice(take(data, &mut pos, FINGERPRINT_LENGTH)?);

    let os_enforced_flags = OsEnforcedFlags::from_bits(take(data, &mut pos, 1)?[0])?;

    let signed_range = data[..pos].to_vec();
    let signature = data[pos..].to_vec();

    Ok(AttestationMessage {
        version,
        chain,
        persistent_key_fingerprint,
        os_enforced_flags,
        signed_range,
        signature,
    })
}

/// Assemble a serialized attestation message.
///
/// The inverse of [`decode`]; compresses `chain` against the preset
/// dictionary. Used by tests and by Rust-side message producers.
pub fn encode_wire(
    version: u8,
    chain: &[Vec<u8>],
    persistent_key_fingerprint: &[u8; FINGERPRINT_LENGTH],
    os_enforced_flags: OsEnforcedFlags,
    signature: &[u8],
) -> Result<Vec<u8>, AttestError> {
    let mut encoded = Vec::new();
    for cert in chain {
        let len = u16::try_from(cert.len()).map_err(|_| AttestError::ChainTooLarge)?;
        encoded.extend_from_slice(&len.to_be_bytes());
        encoded.extend_from_slice(cert);
    }
    let compressed = deflate_chain(&encoded)?;
    let compressed_len = u16::try_from(compressed.len()).map_err(|_| AttestError::ChainTooLarge)?;

    let mut out = Vec::with_capacity(1 + 2 + compressed.len() + FINGERPRINT_LENGTH + 1);
    out.push(version);
    out.extend_from_slice(&compressed_len.to_be_bytes());
    out.extend_from_slice(&compressed);
    out.extend_from_slice(persistent_key_fingerprint);
    out.push(os_enforced_flags.bits());
    out.extend_from_slice(signature);
    Ok(out)
}

fn inflate_chain(compressed: &[u8]) -> Result<Vec<u8>, AttestError> {
    let mut inflater = Decompress::new(false);
    inflater
        .set_dictionary(deflate_dictionary())
        .map_err(|_| AttestError::TruncatedMessage)?;

    let mut encoded = vec![0u8; MAX_ENCODED_CHAIN_LENGTH];
    let status = inflater
        .decompress(compressed, &mut encoded, FlushDecompress::Finish)
        .map_err(|_| AttestError::TruncatedMessage)?;
    if status != Status::StreamEnd {
        // The stream did not finish within the fixed output budget.
        return Err(AttestError::ChainTooLarge);
    }
    encoded.truncate(inflater.total_out() as usize);
    Ok(encoded)
}

fn deflate_chain(encoded: &[u8]) -> Result<Vec<u8>, AttestError> {
    let mut compressor = Compress::new(Compression::best(), false);
    compressor
        .set_dictionary(deflate_dictionary())
        .map_err(|_| AttestError::ChainTooLarge)?;

    // Worst-case deflate expansion is a few bytes per block.
    let mut out = vec![0u8; encoded.len() + 256];
    let status = compressor
        .compress(encoded, &mut out, FlushCompress::Finish)
        .map_err(|_| AttestError::ChainTooLarge)?;
    if status != Status::StreamEnd {
        return Err(AttestError::ChainTooLarge);
    }
    out.truncate(compressor.total_out() as usize);
    Ok(out)
}

fn split_chain(encoded: &[u8]) -> Result<Vec<Vec<u8>>, AttestError> {
    let mut certs = Vec::new();
    let mut pos = 0;
    while pos < encoded.len() {
        let len = take_u16(encoded, &mut pos)? as usize;
        certs.push(take(encoded, &mut pos, len)?.to_vec());
    }
    Ok(certs)
}
